use std::hash::{Hash, Hasher};

use bitflags::bitflags;

use crate::descriptor_heap::DescriptorHeapKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Unknown,
    Rgba8Typeless,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    R32Typeless,
    R32Float,
    R32Uint,
    D32Float,
    R24G8Typeless,
    D24UnormS8Uint,
}

impl Format {
    pub fn is_typeless(self) -> bool {
        matches!(
            self,
            Format::Rgba8Typeless | Format::R32Typeless | Format::R24G8Typeless
        )
    }

    pub fn is_depth_stencil(self) -> bool {
        matches!(self, Format::D32Float | Format::D24UnormS8Uint)
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Format::D24UnormS8Uint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceDimension {
    Buffer,
    Texture1D,
    #[default]
    Texture2D,
    Texture3D,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u32 {
        const ALLOW_RENDER_TARGET = 1 << 0;
        const ALLOW_DEPTH_STENCIL = 1 << 1;
        const ALLOW_UNORDERED_ACCESS = 1 << 2;
        const DENY_SHADER_RESOURCE = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceStates: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
        const DEPTH_WRITE = 1 << 4;
        const DEPTH_READ = 1 << 5;
        const NON_PIXEL_SHADER_RESOURCE = 1 << 6;
        const PIXEL_SHADER_RESOURCE = 1 << 7;
        const INDIRECT_ARGUMENT = 1 << 9;
        const COPY_DEST = 1 << 10;
        const COPY_SOURCE = 1 << 11;
        const ALL_SHADER_RESOURCE =
            Self::NON_PIXEL_SHADER_RESOURCE.bits() | Self::PIXEL_SHADER_RESOURCE.bits();
        const GENERIC_READ = Self::VERTEX_AND_CONSTANT_BUFFER.bits()
            | Self::INDEX_BUFFER.bits()
            | Self::ALL_SHADER_RESOURCE.bits()
            | Self::INDIRECT_ARGUMENT.bits()
            | Self::COPY_SOURCE.bits();
    }
}

/// Optimized clear value baked into a render target or depth-stencil resource.
#[derive(Debug, Clone, Copy)]
pub enum ClearValue {
    Color { format: Format, rgba: [f32; 4] },
    DepthStencil { format: Format, depth: f32, stencil: u8 },
}

impl ClearValue {
    pub fn format(&self) -> Format {
        match self {
            ClearValue::Color { format, .. } | ClearValue::DepthStencil { format, .. } => *format,
        }
    }
}

// Floats are compared bitwise so that equality agrees with `Hash`.
impl PartialEq for ClearValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                ClearValue::Color { format, rgba },
                ClearValue::Color {
                    format: other_format,
                    rgba: other_rgba,
                },
            ) => {
                format == other_format
                    && rgba
                        .iter()
                        .zip(other_rgba)
                        .all(|(a, b)| a.to_bits() == b.to_bits())
            }
            (
                ClearValue::DepthStencil {
                    format,
                    depth,
                    stencil,
                },
                ClearValue::DepthStencil {
                    format: other_format,
                    depth: other_depth,
                    stencil: other_stencil,
                },
            ) => {
                format == other_format
                    && depth.to_bits() == other_depth.to_bits()
                    && stencil == other_stencil
            }
            _ => false,
        }
    }
}

impl Eq for ClearValue {}

impl Hash for ClearValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ClearValue::Color { format, rgba } => {
                format.hash(state);
                for channel in rgba {
                    channel.to_bits().hash(state);
                }
            }
            ClearValue::DepthStencil {
                format,
                depth,
                stencil,
            } => {
                format.hash(state);
                depth.to_bits().hash(state);
                stencil.hash(state);
            }
        }
    }
}

/// Type signature of a physical resource. Pooling reuses resources whose
/// signatures compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceType {
    pub dimension: ResourceDimension,
    pub width: u64,
    pub height: u32,
    pub depth_or_array_size: u32,
    pub mip_levels: u32,
    pub format: Format,
    pub sample_count: u32,
    pub flags: ResourceFlags,
    pub clear_value: Option<ClearValue>,
}

impl ResourceType {
    pub fn buffer(size_in_bytes: u64) -> Self {
        Self {
            dimension: ResourceDimension::Buffer,
            width: size_in_bytes,
            height: 1,
            depth_or_array_size: 1,
            mip_levels: 1,
            format: Format::Unknown,
            sample_count: 1,
            flags: ResourceFlags::empty(),
            clear_value: None,
        }
    }

    pub fn texture_2d(format: Format, width: u32, height: u32) -> Self {
        Self {
            dimension: ResourceDimension::Texture2D,
            width: u64::from(width),
            height,
            depth_or_array_size: 1,
            mip_levels: 1,
            format,
            sample_count: 1,
            flags: ResourceFlags::empty(),
            clear_value: None,
        }
    }

    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_array_size(mut self, depth_or_array_size: u32) -> Self {
        self.depth_or_array_size = depth_or_array_size;
        self
    }

    pub fn with_sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    pub fn with_clear_value(mut self, clear_value: ClearValue) -> Self {
        self.clear_value = Some(clear_value);
        self
    }

    pub fn is_buffer(&self) -> bool {
        self.dimension == ResourceDimension::Buffer
    }

    /// Black for color targets, depth 1.0 and stencil 0 for depth targets.
    /// Buffers, typeless formats and resources that cannot be bound as a
    /// target get none.
    pub fn default_clear_value(&self) -> Option<ClearValue> {
        if self.is_buffer() || self.format.is_typeless() {
            return None;
        }
        if self.flags.contains(ResourceFlags::ALLOW_DEPTH_STENCIL) {
            Some(ClearValue::DepthStencil {
                format: self.format,
                depth: 1.0,
                stencil: 0,
            })
        } else if self.flags.contains(ResourceFlags::ALLOW_RENDER_TARGET) {
            Some(ClearValue::Color {
                format: self.format,
                rgba: [0.0, 0.0, 0.0, 1.0],
            })
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ViewDimension {
    #[default]
    Unknown,
    Buffer,
    Texture1D,
    Texture1DArray,
    Texture2D,
    Texture2DArray,
    Texture2DMs,
    Texture3D,
    TextureCube,
    TextureCubeArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CbvDesc {
    /// Byte offset into the buffer.
    pub offset: u64,
    pub size_in_bytes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SrvDesc {
    pub format: Format,
    pub dimension: ViewDimension,
    pub most_detailed_mip: u32,
    pub mip_levels: u32,
    pub first_array_slice: u32,
    pub array_size: u32,
    pub first_element: u64,
    pub num_elements: u32,
    pub structure_byte_stride: u32,
}

impl SrvDesc {
    pub fn texture_2d(format: Format) -> Self {
        Self {
            format,
            dimension: ViewDimension::Texture2D,
            most_detailed_mip: 0,
            mip_levels: u32::MAX,
            first_array_slice: 0,
            array_size: 1,
            first_element: 0,
            num_elements: 0,
            structure_byte_stride: 0,
        }
    }

    pub fn structured_buffer(first_element: u64, num_elements: u32, stride: u32) -> Self {
        Self {
            format: Format::Unknown,
            dimension: ViewDimension::Buffer,
            most_detailed_mip: 0,
            mip_levels: 0,
            first_array_slice: 0,
            array_size: 0,
            first_element,
            num_elements,
            structure_byte_stride: stride,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UavDesc {
    pub format: Format,
    pub dimension: ViewDimension,
    pub mip_slice: u32,
    pub first_array_slice: u32,
    pub array_size: u32,
    pub first_element: u64,
    pub num_elements: u32,
    pub structure_byte_stride: u32,
}

impl UavDesc {
    pub fn texture_2d(format: Format) -> Self {
        Self {
            format,
            dimension: ViewDimension::Texture2D,
            mip_slice: 0,
            first_array_slice: 0,
            array_size: 1,
            first_element: 0,
            num_elements: 0,
            structure_byte_stride: 0,
        }
    }

    pub fn structured_buffer(first_element: u64, num_elements: u32, stride: u32) -> Self {
        Self {
            format: Format::Unknown,
            dimension: ViewDimension::Buffer,
            mip_slice: 0,
            first_array_slice: 0,
            array_size: 0,
            first_element,
            num_elements,
            structure_byte_stride: stride,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RtvDesc {
    pub format: Format,
    pub dimension: ViewDimension,
    pub mip_slice: u32,
    pub first_array_slice: u32,
    pub array_size: u32,
}

impl RtvDesc {
    pub fn texture_2d(format: Format) -> Self {
        Self {
            format,
            dimension: ViewDimension::Texture2D,
            mip_slice: 0,
            first_array_slice: 0,
            array_size: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DsvDesc {
    pub format: Format,
    pub dimension: ViewDimension,
    pub mip_slice: u32,
    pub first_array_slice: u32,
    pub array_size: u32,
    pub read_only_depth: bool,
    pub read_only_stencil: bool,
}

impl DsvDesc {
    pub fn texture_2d(format: Format) -> Self {
        Self {
            format,
            dimension: ViewDimension::Texture2D,
            mip_slice: 0,
            first_array_slice: 0,
            array_size: 1,
            read_only_depth: false,
            read_only_stencil: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    Cbv,
    Srv,
    Uav,
    Rtv,
    Dsv,
}

/// A view a pass wants on a resource node. The `Null*` variants carry no
/// description; the backend derives the view from the resource itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewDesc {
    Cbv(CbvDesc),
    Srv(SrvDesc),
    Uav(UavDesc),
    Rtv(RtvDesc),
    Dsv(DsvDesc),
    NullCbv,
    NullSrv,
    NullUav,
    NullRtv,
    NullDsv,
}

impl ViewDesc {
    pub fn kind(&self) -> ViewKind {
        match self {
            ViewDesc::Cbv(_) | ViewDesc::NullCbv => ViewKind::Cbv,
            ViewDesc::Srv(_) | ViewDesc::NullSrv => ViewKind::Srv,
            ViewDesc::Uav(_) | ViewDesc::NullUav => ViewKind::Uav,
            ViewDesc::Rtv(_) | ViewDesc::NullRtv => ViewKind::Rtv,
            ViewDesc::Dsv(_) | ViewDesc::NullDsv => ViewKind::Dsv,
        }
    }

    pub fn heap_kind(&self) -> DescriptorHeapKind {
        match self.kind() {
            ViewKind::Cbv | ViewKind::Srv | ViewKind::Uav => DescriptorHeapKind::CbvSrvUav,
            ViewKind::Rtv => DescriptorHeapKind::Rtv,
            ViewKind::Dsv => DescriptorHeapKind::Dsv,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(
            self,
            ViewDesc::NullCbv
                | ViewDesc::NullSrv
                | ViewDesc::NullUav
                | ViewDesc::NullRtv
                | ViewDesc::NullDsv
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn render_targets_get_black_clear_value() {
        let ty = ResourceType::texture_2d(Format::Rgba8Unorm, 64, 64)
            .with_flags(ResourceFlags::ALLOW_RENDER_TARGET);
        assert_eq!(
            ty.default_clear_value(),
            Some(ClearValue::Color {
                format: Format::Rgba8Unorm,
                rgba: [0.0, 0.0, 0.0, 1.0],
            })
        );
    }

    #[test]
    fn depth_targets_clear_to_far_plane() {
        let ty = ResourceType::texture_2d(Format::D32Float, 64, 64)
            .with_flags(ResourceFlags::ALLOW_DEPTH_STENCIL);
        assert_eq!(
            ty.default_clear_value(),
            Some(ClearValue::DepthStencil {
                format: Format::D32Float,
                depth: 1.0,
                stencil: 0,
            })
        );
    }

    #[test]
    fn typeless_and_buffers_have_no_default_clear_value() {
        let typeless = ResourceType::texture_2d(Format::R24G8Typeless, 64, 64)
            .with_flags(ResourceFlags::ALLOW_DEPTH_STENCIL);
        assert_eq!(typeless.default_clear_value(), None);
        assert_eq!(ResourceType::buffer(256).default_clear_value(), None);
        let plain = ResourceType::texture_2d(Format::Rgba8Unorm, 8, 8);
        assert_eq!(plain.default_clear_value(), None);
    }

    #[test]
    fn clear_value_participates_in_type_equality() {
        let plain = ResourceType::texture_2d(Format::Rgba8Unorm, 32, 32)
            .with_flags(ResourceFlags::ALLOW_RENDER_TARGET);
        let cleared = plain.with_clear_value(ClearValue::Color {
            format: Format::Rgba8Unorm,
            rgba: [0.0, 0.0, 0.0, 1.0],
        });
        assert_eq!(plain, plain);
        assert_eq!(cleared, cleared);
        assert_ne!(plain, cleared);

        let mut pool: HashMap<ResourceType, u32> = HashMap::new();
        pool.insert(cleared, 1);
        assert_eq!(pool.get(&cleared), Some(&1));
        assert_eq!(pool.get(&plain), None);
    }

    #[test]
    fn views_map_to_heap_kinds() {
        assert_eq!(ViewDesc::NullSrv.heap_kind(), DescriptorHeapKind::CbvSrvUav);
        assert_eq!(
            ViewDesc::Rtv(RtvDesc::texture_2d(Format::Rgba8Unorm)).heap_kind(),
            DescriptorHeapKind::Rtv
        );
        assert_eq!(ViewDesc::NullDsv.heap_kind(), DescriptorHeapKind::Dsv);
        assert!(ViewDesc::NullUav.is_null());
        assert!(!ViewDesc::Cbv(CbvDesc { offset: 0, size_in_bytes: 256 }).is_null());
    }
}
