use std::fmt;
use std::sync::{Arc, Weak};

use super::{AllocationOwner, CpuDescriptorHandle, GpuDescriptorHandle};
use crate::device::Device;

/// A contiguous run of descriptor slots in one heap.
///
/// Allocations are move-only. Dropping one hands its slots back to the pool or
/// heap that produced it; views carved out of a dynamic suballocator chunk have
/// no owner and release nothing.
pub struct DescriptorHeapAllocation<D: Device> {
    first_cpu_handle: CpuDescriptorHandle,
    first_gpu_handle: Option<GpuDescriptorHandle>,
    num_handles: u32,
    heap: Option<Arc<D::DescriptorHeap>>,
    manager_id: u16,
    descriptor_size: u32,
    owner: Option<Weak<dyn AllocationOwner<D>>>,
}

impl<D: Device> DescriptorHeapAllocation<D> {
    pub fn null() -> Self {
        Self {
            first_cpu_handle: CpuDescriptorHandle::NULL,
            first_gpu_handle: None,
            num_handles: 0,
            heap: None,
            manager_id: u16::MAX,
            descriptor_size: 0,
            owner: None,
        }
    }

    pub(crate) fn new(
        owner: Option<Weak<dyn AllocationOwner<D>>>,
        heap: Arc<D::DescriptorHeap>,
        first_cpu_handle: CpuDescriptorHandle,
        first_gpu_handle: Option<GpuDescriptorHandle>,
        num_handles: u32,
        manager_id: u16,
        descriptor_size: u32,
    ) -> Self {
        debug_assert!(!first_cpu_handle.is_null());
        Self {
            first_cpu_handle,
            first_gpu_handle,
            num_handles,
            heap: Some(heap),
            manager_id,
            descriptor_size,
            owner,
        }
    }

    pub fn is_null(&self) -> bool {
        self.first_cpu_handle.is_null()
    }

    /// False for null allocations and for views whose range someone else
    /// releases.
    pub fn is_owned(&self) -> bool {
        self.owner.is_some()
    }

    pub fn is_shader_visible(&self) -> bool {
        self.first_gpu_handle.is_some()
    }

    pub fn cpu_handle(&self, offset: u32) -> CpuDescriptorHandle {
        debug_assert!(offset < self.num_handles, "descriptor offset {offset} out of range");
        self.first_cpu_handle.offset(offset, self.descriptor_size)
    }

    pub fn gpu_handle(&self, offset: u32) -> Option<GpuDescriptorHandle> {
        debug_assert!(offset < self.num_handles, "descriptor offset {offset} out of range");
        self.first_gpu_handle
            .map(|handle| handle.offset(offset, self.descriptor_size))
    }

    pub fn num_handles(&self) -> u32 {
        self.num_handles
    }

    pub fn manager_id(&self) -> u16 {
        self.manager_id
    }

    pub fn descriptor_size(&self) -> u32 {
        self.descriptor_size
    }

    pub fn heap(&self) -> Option<&Arc<D::DescriptorHeap>> {
        self.heap.as_ref()
    }

    pub(crate) fn reset(&mut self) {
        self.first_cpu_handle = CpuDescriptorHandle::NULL;
        self.first_gpu_handle = None;
        self.num_handles = 0;
        self.heap = None;
        self.manager_id = u16::MAX;
        self.descriptor_size = 0;
        self.owner = None;
    }
}

impl<D: Device> Default for DescriptorHeapAllocation<D> {
    fn default() -> Self {
        Self::null()
    }
}

impl<D: Device> Drop for DescriptorHeapAllocation<D> {
    fn drop(&mut self) {
        if self.is_null() {
            return;
        }
        let Some(owner) = self.owner.take() else {
            return;
        };
        match owner.upgrade() {
            Some(owner) => owner.release(std::mem::take(self)),
            None => log::warn!(
                "Descriptor allocation of {} slots outlived its heap",
                self.num_handles
            ),
        }
    }
}

impl<D: Device> fmt::Debug for DescriptorHeapAllocation<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorHeapAllocation")
            .field("first_cpu_handle", &self.first_cpu_handle)
            .field("first_gpu_handle", &self.first_gpu_handle)
            .field("num_handles", &self.num_handles)
            .field("manager_id", &self.manager_id)
            .field("descriptor_size", &self.descriptor_size)
            .field("owned", &self.owner.is_some())
            .finish()
    }
}
