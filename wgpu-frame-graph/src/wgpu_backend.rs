//! wgpu implementation of the backend seam.
//!
//! wgpu has no descriptor heaps, so heaps are emulated in software: each heap
//! is a vector of view slots and a descriptor handle encodes the heap id in
//! its upper 32 bits and the slot index in the lower bits. Pass callbacks turn
//! handles back into views with [`WgpuDevice::view`]. wgpu tracks resource
//! states itself, so transitions are only logged.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::descriptor_heap::{
    CpuDescriptorHandle, DescriptorHeapDesc, DescriptorHeapKind, GpuDescriptorHandle,
};
use crate::device::{CommandList, CommandQueue, Device};
use crate::error::{FrameGraphError, Result};
use crate::resource::{
    Format, ResourceDimension, ResourceFlags, ResourceStates, ResourceType, ViewDesc,
    ViewDimension,
};

const HEAP_ID_SHIFT: u32 = 32;
const SLOT_INDEX_MASK: u64 = (1 << HEAP_ID_SHIFT) - 1;
const GPU_HANDLE_TAG: u64 = 1 << 63;

#[derive(Debug, Clone)]
pub enum WgpuResource {
    Texture(Arc<wgpu::Texture>),
    Buffer(Arc<wgpu::Buffer>),
}

impl WgpuResource {
    pub fn texture(&self) -> Option<&wgpu::Texture> {
        match self {
            WgpuResource::Texture(texture) => Some(texture),
            WgpuResource::Buffer(_) => None,
        }
    }

    pub fn buffer(&self) -> Option<&wgpu::Buffer> {
        match self {
            WgpuResource::Buffer(buffer) => Some(buffer),
            WgpuResource::Texture(_) => None,
        }
    }
}

impl PartialEq for WgpuResource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (WgpuResource::Texture(a), WgpuResource::Texture(b)) => Arc::ptr_eq(a, b),
            (WgpuResource::Buffer(a), WgpuResource::Buffer(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// What a descriptor slot holds.
#[derive(Debug, Clone)]
pub enum BoundView {
    Texture(Arc<wgpu::TextureView>),
    Buffer {
        buffer: Arc<wgpu::Buffer>,
        offset: u64,
        size: Option<NonZeroU64>,
    },
}

impl BoundView {
    pub fn binding_resource(&self) -> wgpu::BindingResource<'_> {
        match self {
            BoundView::Texture(view) => wgpu::BindingResource::TextureView(view),
            BoundView::Buffer {
                buffer,
                offset,
                size,
            } => wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer,
                offset: *offset,
                size: *size,
            }),
        }
    }

    pub fn texture_view(&self) -> Option<&wgpu::TextureView> {
        match self {
            BoundView::Texture(view) => Some(view),
            BoundView::Buffer { .. } => None,
        }
    }
}

type SlotStorage = Arc<RwLock<Vec<Option<BoundView>>>>;
type HeapRegistry = Arc<RwLock<HashMap<u32, SlotStorage>>>;

pub struct WgpuDescriptorHeap {
    id: u32,
    desc: DescriptorHeapDesc,
    registry: HeapRegistry,
}

impl WgpuDescriptorHeap {
    pub fn desc(&self) -> &DescriptorHeapDesc {
        &self.desc
    }
}

impl Drop for WgpuDescriptorHeap {
    fn drop(&mut self) {
        self.registry.write().remove(&self.id);
    }
}

pub struct WgpuCommandAllocator {
    resets: u64,
}

impl WgpuCommandAllocator {
    pub fn resets(&self) -> u64 {
        self.resets
    }
}

pub struct WgpuCommandList {
    encoder: Option<wgpu::CommandEncoder>,
    command_buffer: Option<wgpu::CommandBuffer>,
}

impl WgpuCommandList {
    /// The open encoder, or `None` once the list is closed.
    pub fn encoder(&mut self) -> Option<&mut wgpu::CommandEncoder> {
        self.encoder.as_mut()
    }
}

impl CommandList for WgpuCommandList {
    type Resource = WgpuResource;

    fn transition(&mut self, resource: &WgpuResource, before: ResourceStates, after: ResourceStates) {
        log::trace!("Transition {resource:?}: {before:?} -> {after:?}");
    }

    fn copy_resource(&mut self, destination: &WgpuResource, source: &WgpuResource) {
        let Some(encoder) = self.encoder.as_mut() else {
            log::warn!("Copy recorded into a closed command list");
            return;
        };
        match (destination, source) {
            (WgpuResource::Texture(destination), WgpuResource::Texture(source)) => {
                if destination.size() != source.size() || destination.format() != source.format() {
                    log::warn!("Skipping copy between textures of different size or format");
                    return;
                }
                encoder.copy_texture_to_texture(
                    source.as_image_copy(),
                    destination.as_image_copy(),
                    source.size(),
                );
            }
            (WgpuResource::Buffer(destination), WgpuResource::Buffer(source)) => {
                let size = source.size().min(destination.size()) & !(wgpu::COPY_BUFFER_ALIGNMENT - 1);
                encoder.copy_buffer_to_buffer(source, 0, destination, 0, size);
            }
            _ => log::warn!("Cannot copy between a texture and a buffer"),
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(encoder) = self.encoder.take() {
            self.command_buffer = Some(encoder.finish());
        }
        Ok(())
    }
}

pub struct WgpuDevice {
    device: wgpu::Device,
    heaps: HeapRegistry,
    next_heap_id: AtomicU32,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device) -> Self {
        Self {
            device,
            heaps: Arc::new(RwLock::new(HashMap::new())),
            next_heap_id: AtomicU32::new(1),
        }
    }

    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The view last written to the slot `handle` points at.
    pub fn view(&self, handle: CpuDescriptorHandle) -> Option<BoundView> {
        self.lookup(handle.0)
    }

    pub fn shader_view(&self, handle: GpuDescriptorHandle) -> Option<BoundView> {
        self.lookup(handle.0 & !GPU_HANDLE_TAG)
    }

    fn lookup(&self, address: u64) -> Option<BoundView> {
        let heap_id = (address >> HEAP_ID_SHIFT) as u32;
        let index = (address & SLOT_INDEX_MASK) as usize;
        let slots = self.heaps.read().get(&heap_id).cloned()?;
        let slots = slots.read();
        slots.get(index).cloned().flatten()
    }

    fn with_error_scope<T>(&self, call: &'static str, create: impl FnOnce() -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let created = create();
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        let validation = pollster::block_on(self.device.pop_error_scope());

        if out_of_memory.is_some() {
            return Err(FrameGraphError::OutOfDeviceMemory { call });
        }
        if let Some(error) = validation {
            return Err(FrameGraphError::Validation {
                call,
                reason: error.to_string(),
            });
        }
        Ok(created)
    }

    fn create_texture_view(
        texture: &wgpu::Texture,
        format: Format,
        dimension: ViewDimension,
        base_mip_level: u32,
        mip_level_count: Option<u32>,
        base_array_layer: u32,
        array_layer_count: Option<u32>,
    ) -> BoundView {
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: None,
            format: texture_format(format),
            dimension: view_dimension(dimension),
            usage: None,
            aspect: wgpu::TextureAspect::All,
            base_mip_level,
            mip_level_count,
            base_array_layer,
            array_layer_count,
        });
        BoundView::Texture(Arc::new(view))
    }
}

impl Device for WgpuDevice {
    type Resource = WgpuResource;
    type DescriptorHeap = WgpuDescriptorHeap;
    type CommandAllocator = WgpuCommandAllocator;
    type CommandList = WgpuCommandList;

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> Result<WgpuDescriptorHeap> {
        let id = self.next_heap_id.fetch_add(1, Ordering::Relaxed);
        let slots = vec![None; desc.num_descriptors as usize];
        self.heaps
            .write()
            .insert(id, Arc::new(RwLock::new(slots)));
        Ok(WgpuDescriptorHeap {
            id,
            desc: *desc,
            registry: Arc::clone(&self.heaps),
        })
    }

    fn descriptor_heap_start(
        &self,
        heap: &WgpuDescriptorHeap,
    ) -> (CpuDescriptorHandle, Option<GpuDescriptorHandle>) {
        let base = u64::from(heap.id) << HEAP_ID_SHIFT;
        let gpu = heap
            .desc
            .shader_visible
            .then_some(GpuDescriptorHandle(base | GPU_HANDLE_TAG));
        (CpuDescriptorHandle(base), gpu)
    }

    fn descriptor_increment_size(&self, _kind: DescriptorHeapKind) -> u32 {
        1
    }

    fn create_committed_resource(
        &self,
        ty: &ResourceType,
        initial_state: ResourceStates,
    ) -> Result<WgpuResource> {
        log::trace!("Creating {ty:?} in {initial_state:?}");
        if ty.is_buffer() {
            let buffer = self.with_error_scope("Device::create_buffer", || {
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("frame graph buffer"),
                    size: ty.width,
                    usage: buffer_usages(ty),
                    mapped_at_creation: false,
                })
            })?;
            return Ok(WgpuResource::Buffer(Arc::new(buffer)));
        }

        let format = texture_format(ty.format)
            .ok_or(FrameGraphError::UnsupportedFormat { format: ty.format })?;
        let dimension = match ty.dimension {
            ResourceDimension::Texture1D => wgpu::TextureDimension::D1,
            ResourceDimension::Texture3D => wgpu::TextureDimension::D3,
            ResourceDimension::Texture2D | ResourceDimension::Buffer => wgpu::TextureDimension::D2,
        };
        let texture = self.with_error_scope("Device::create_texture", || {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("frame graph texture"),
                size: wgpu::Extent3d {
                    width: ty.width as u32,
                    height: ty.height,
                    depth_or_array_layers: ty.depth_or_array_size,
                },
                mip_level_count: ty.mip_levels,
                sample_count: ty.sample_count,
                dimension,
                format,
                usage: texture_usages(ty),
                view_formats: &[],
            })
        })?;
        Ok(WgpuResource::Texture(Arc::new(texture)))
    }

    fn create_view(&self, resource: &WgpuResource, view: &ViewDesc, destination: CpuDescriptorHandle) {
        let bound = match (resource, view) {
            (WgpuResource::Buffer(buffer), ViewDesc::Cbv(desc)) => Some(BoundView::Buffer {
                buffer: Arc::clone(buffer),
                offset: desc.offset,
                size: NonZeroU64::new(u64::from(desc.size_in_bytes)),
            }),
            (WgpuResource::Buffer(buffer), ViewDesc::Srv(desc)) => Some(BoundView::Buffer {
                buffer: Arc::clone(buffer),
                offset: desc.first_element * u64::from(desc.structure_byte_stride),
                size: NonZeroU64::new(
                    u64::from(desc.num_elements) * u64::from(desc.structure_byte_stride),
                ),
            }),
            (WgpuResource::Buffer(buffer), ViewDesc::Uav(desc)) => Some(BoundView::Buffer {
                buffer: Arc::clone(buffer),
                offset: desc.first_element * u64::from(desc.structure_byte_stride),
                size: NonZeroU64::new(
                    u64::from(desc.num_elements) * u64::from(desc.structure_byte_stride),
                ),
            }),
            (
                WgpuResource::Buffer(buffer),
                ViewDesc::NullCbv | ViewDesc::NullSrv | ViewDesc::NullUav,
            ) => Some(BoundView::Buffer {
                buffer: Arc::clone(buffer),
                offset: 0,
                size: None,
            }),
            (WgpuResource::Texture(texture), ViewDesc::Srv(desc)) => {
                Some(Self::create_texture_view(
                    texture,
                    desc.format,
                    desc.dimension,
                    desc.most_detailed_mip,
                    (desc.mip_levels != u32::MAX).then_some(desc.mip_levels),
                    desc.first_array_slice,
                    (desc.array_size > 0).then_some(desc.array_size),
                ))
            }
            (WgpuResource::Texture(texture), ViewDesc::Uav(desc)) => {
                Some(Self::create_texture_view(
                    texture,
                    desc.format,
                    desc.dimension,
                    desc.mip_slice,
                    Some(1),
                    desc.first_array_slice,
                    (desc.array_size > 0).then_some(desc.array_size),
                ))
            }
            (WgpuResource::Texture(texture), ViewDesc::Rtv(desc)) => {
                Some(Self::create_texture_view(
                    texture,
                    desc.format,
                    desc.dimension,
                    desc.mip_slice,
                    Some(1),
                    desc.first_array_slice,
                    (desc.array_size > 0).then_some(desc.array_size),
                ))
            }
            (WgpuResource::Texture(texture), ViewDesc::Dsv(desc)) => {
                Some(Self::create_texture_view(
                    texture,
                    desc.format,
                    desc.dimension,
                    desc.mip_slice,
                    Some(1),
                    desc.first_array_slice,
                    (desc.array_size > 0).then_some(desc.array_size),
                ))
            }
            (
                WgpuResource::Texture(texture),
                ViewDesc::NullSrv | ViewDesc::NullUav | ViewDesc::NullRtv | ViewDesc::NullDsv,
            ) => Some(BoundView::Texture(Arc::new(
                texture.create_view(&wgpu::TextureViewDescriptor::default()),
            ))),
            (resource, view) => {
                log::warn!("Cannot create a {:?} view of {resource:?}", view.kind());
                None
            }
        };

        let heap_id = (destination.0 >> HEAP_ID_SHIFT) as u32;
        let index = (destination.0 & SLOT_INDEX_MASK) as usize;
        let Some(slots) = self.heaps.read().get(&heap_id).cloned() else {
            log::warn!("Descriptor handle {destination:?} points at no live heap");
            return;
        };
        match slots.write().get_mut(index) {
            Some(slot) => *slot = bound,
            None => log::warn!("Descriptor handle {destination:?} is out of range"),
        }
    }

    fn create_command_allocator(&self) -> Result<WgpuCommandAllocator> {
        Ok(WgpuCommandAllocator { resets: 0 })
    }

    fn reset_command_allocator(&self, allocator: &mut WgpuCommandAllocator) -> Result<()> {
        allocator.resets += 1;
        Ok(())
    }

    fn create_command_list(&self, _allocator: &WgpuCommandAllocator) -> Result<WgpuCommandList> {
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame graph pass"),
            });
        Ok(WgpuCommandList {
            encoder: Some(encoder),
            command_buffer: None,
        })
    }
}

pub struct WgpuQueue {
    device: wgpu::Device,
    queue: wgpu::Queue,
    completed: Arc<AtomicU64>,
}

impl WgpuQueue {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn wgpu_queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

impl CommandQueue for WgpuQueue {
    type Device = WgpuDevice;

    fn execute_command_lists(&self, command_lists: Vec<WgpuCommandList>) -> Result<()> {
        let command_buffers: Vec<wgpu::CommandBuffer> = command_lists
            .into_iter()
            .filter_map(|command_list| command_list.command_buffer)
            .collect();
        self.queue.submit(command_buffers);
        Ok(())
    }

    fn signal(&self, value: u64) -> Result<()> {
        let completed = Arc::clone(&self.completed);
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(value, Ordering::AcqRel);
        });
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    fn wait_for_value(&self, value: u64) -> Result<()> {
        if self.completed_value() >= value {
            return Ok(());
        }
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|error| FrameGraphError::DeviceLost {
                call: "Device::poll",
                reason: error.to_string(),
            })?;
        if self.completed_value() < value {
            log::warn!("Fence {value} still pending after waiting for all submitted work");
        }
        Ok(())
    }
}

fn texture_format(format: Format) -> Option<wgpu::TextureFormat> {
    match format {
        Format::Unknown => None,
        Format::Rgba8Typeless | Format::Rgba8Unorm => Some(wgpu::TextureFormat::Rgba8Unorm),
        Format::Rgba8UnormSrgb => Some(wgpu::TextureFormat::Rgba8UnormSrgb),
        Format::Bgra8Unorm => Some(wgpu::TextureFormat::Bgra8Unorm),
        Format::Rgba16Float => Some(wgpu::TextureFormat::Rgba16Float),
        Format::Rgba32Float => Some(wgpu::TextureFormat::Rgba32Float),
        Format::R32Typeless | Format::R32Float => Some(wgpu::TextureFormat::R32Float),
        Format::R32Uint => Some(wgpu::TextureFormat::R32Uint),
        Format::D32Float => Some(wgpu::TextureFormat::Depth32Float),
        Format::R24G8Typeless | Format::D24UnormS8Uint => {
            Some(wgpu::TextureFormat::Depth24PlusStencil8)
        }
    }
}

fn view_dimension(dimension: ViewDimension) -> Option<wgpu::TextureViewDimension> {
    match dimension {
        ViewDimension::Unknown | ViewDimension::Buffer => None,
        ViewDimension::Texture1D | ViewDimension::Texture1DArray => {
            Some(wgpu::TextureViewDimension::D1)
        }
        ViewDimension::Texture2D | ViewDimension::Texture2DMs => {
            Some(wgpu::TextureViewDimension::D2)
        }
        ViewDimension::Texture2DArray => Some(wgpu::TextureViewDimension::D2Array),
        ViewDimension::Texture3D => Some(wgpu::TextureViewDimension::D3),
        ViewDimension::TextureCube => Some(wgpu::TextureViewDimension::Cube),
        ViewDimension::TextureCubeArray => Some(wgpu::TextureViewDimension::CubeArray),
    }
}

fn texture_usages(ty: &ResourceType) -> wgpu::TextureUsages {
    let mut usage = wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
    if !ty.flags.contains(ResourceFlags::DENY_SHADER_RESOURCE) {
        usage |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if ty
        .flags
        .intersects(ResourceFlags::ALLOW_RENDER_TARGET | ResourceFlags::ALLOW_DEPTH_STENCIL)
    {
        usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if ty.flags.contains(ResourceFlags::ALLOW_UNORDERED_ACCESS) {
        usage |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    usage
}

fn buffer_usages(ty: &ResourceType) -> wgpu::BufferUsages {
    let mut usage = wgpu::BufferUsages::COPY_SRC
        | wgpu::BufferUsages::COPY_DST
        | wgpu::BufferUsages::UNIFORM;
    if ty.flags.contains(ResourceFlags::ALLOW_UNORDERED_ACCESS)
        || !ty.flags.contains(ResourceFlags::DENY_SHADER_RESOURCE)
    {
        usage |= wgpu::BufferUsages::STORAGE;
    }
    usage
}
