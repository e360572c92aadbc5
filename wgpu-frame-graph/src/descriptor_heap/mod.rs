//! Descriptor heap hierarchy.
//!
//! CPU-only descriptors live in growable pools of heaps ([`CpuDescriptorHeap`]).
//! Shader-visible descriptors live in a single [`GpuDescriptorHeap`] split
//! into a static region and a dynamic region; the dynamic region is handed
//! out in chunks to per-consumer [`DynamicSuballocator`]s that are reset
//! every frame.

mod allocation;
mod cpu_heap;
mod dynamic;
mod gpu_heap;
mod manager;

use std::sync::Arc;

pub use allocation::DescriptorHeapAllocation;
pub use cpu_heap::CpuDescriptorHeap;
pub use dynamic::DynamicSuballocator;
pub use gpu_heap::GpuDescriptorHeap;
pub use manager::DescriptorHeapAllocationManager;

use crate::config::DescriptorHeapConfig;
use crate::device::Device;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CpuDescriptorHandle(pub u64);

impl CpuDescriptorHandle {
    pub const NULL: Self = Self(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn offset(self, index: u32, increment_size: u32) -> Self {
        Self(self.0 + u64::from(index) * u64::from(increment_size))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GpuDescriptorHandle(pub u64);

impl GpuDescriptorHandle {
    pub fn offset(self, index: u32, increment_size: u32) -> Self {
        Self(self.0 + u64::from(index) * u64::from(increment_size))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHeapDesc {
    pub kind: DescriptorHeapKind,
    pub num_descriptors: u32,
    pub shader_visible: bool,
}

/// Receives allocations handed back by [`DescriptorHeapAllocation`]'s drop.
pub(crate) trait AllocationOwner<D: Device>: Send + Sync {
    fn release(&self, allocation: DescriptorHeapAllocation<D>);
}

/// Owns every descriptor heap a renderer needs. Constructed once per device
/// and shared by reference counting with the resource managers that draw from
/// it.
pub struct DescriptorHeapContext<D: Device> {
    cbv_srv_uav_cpu: CpuDescriptorHeap<D>,
    rtv_cpu: CpuDescriptorHeap<D>,
    dsv_cpu: CpuDescriptorHeap<D>,
    cbv_srv_uav_gpu: GpuDescriptorHeap<D>,
}

impl<D: Device> DescriptorHeapContext<D> {
    pub fn new(device: &Arc<D>, config: &DescriptorHeapConfig) -> Result<Self> {
        log::debug!("Creating descriptor heaps: {config:?}");
        Ok(Self {
            cbv_srv_uav_cpu: CpuDescriptorHeap::new(
                Arc::clone(device),
                config.cpu_cbv_srv_uav_descriptors,
                DescriptorHeapKind::CbvSrvUav,
            )?,
            rtv_cpu: CpuDescriptorHeap::new(
                Arc::clone(device),
                config.cpu_rtv_descriptors,
                DescriptorHeapKind::Rtv,
            )?,
            dsv_cpu: CpuDescriptorHeap::new(
                Arc::clone(device),
                config.cpu_dsv_descriptors,
                DescriptorHeapKind::Dsv,
            )?,
            cbv_srv_uav_gpu: GpuDescriptorHeap::new(
                device.as_ref(),
                config.gpu_static_descriptors,
                config.gpu_dynamic_descriptors,
                DescriptorHeapKind::CbvSrvUav,
            )?,
        })
    }

    pub fn cbv_srv_uav_cpu(&self) -> &CpuDescriptorHeap<D> {
        &self.cbv_srv_uav_cpu
    }

    pub fn rtv_cpu(&self) -> &CpuDescriptorHeap<D> {
        &self.rtv_cpu
    }

    pub fn dsv_cpu(&self) -> &CpuDescriptorHeap<D> {
        &self.dsv_cpu
    }

    pub fn cbv_srv_uav_gpu(&self) -> &GpuDescriptorHeap<D> {
        &self.cbv_srv_uav_gpu
    }

    pub fn cpu_heap(&self, kind: DescriptorHeapKind) -> Option<&CpuDescriptorHeap<D>> {
        match kind {
            DescriptorHeapKind::CbvSrvUav => Some(&self.cbv_srv_uav_cpu),
            DescriptorHeapKind::Rtv => Some(&self.rtv_cpu),
            DescriptorHeapKind::Dsv => Some(&self.dsv_cpu),
            DescriptorHeapKind::Sampler => None,
        }
    }
}
