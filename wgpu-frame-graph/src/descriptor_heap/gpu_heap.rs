use std::sync::{Arc, Weak};

use super::{
    AllocationOwner, DescriptorHeapAllocation, DescriptorHeapAllocationManager, DescriptorHeapDesc,
    DescriptorHeapKind,
};
use crate::device::Device;
use crate::error::Result;

const STATIC_MANAGER_ID: usize = 0;
const DYNAMIC_MANAGER_ID: usize = 1;

struct GpuHeapInner<D: Device> {
    heap_desc: DescriptorHeapDesc,
    descriptor_size: u32,
    static_manager: DescriptorHeapAllocationManager<D>,
    dynamic_manager: DescriptorHeapAllocationManager<D>,
}

/// One shader-visible heap. The first `num_static` slots back long-lived
/// allocations; the remaining `num_dynamic` slots are handed out in chunks to
/// dynamic suballocators.
pub struct GpuDescriptorHeap<D: Device> {
    inner: Arc<GpuHeapInner<D>>,
}

impl<D: Device> Clone for GpuDescriptorHeap<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Device> GpuDescriptorHeap<D> {
    pub fn new(
        device: &D,
        num_static: u32,
        num_dynamic: u32,
        kind: DescriptorHeapKind,
    ) -> Result<Self> {
        let heap_desc = DescriptorHeapDesc {
            kind,
            num_descriptors: num_static + num_dynamic,
            shader_visible: true,
        };
        let heap = Arc::new(device.create_descriptor_heap(&heap_desc)?);
        log::debug!(
            "Created shader-visible {kind:?} heap: {num_static} static + {num_dynamic} dynamic slots"
        );

        let static_manager = DescriptorHeapAllocationManager::with_subrange(
            device,
            STATIC_MANAGER_ID,
            Arc::clone(&heap),
            heap_desc,
            0,
            num_static,
        );
        let dynamic_manager = DescriptorHeapAllocationManager::with_subrange(
            device,
            DYNAMIC_MANAGER_ID,
            heap,
            heap_desc,
            num_static,
            num_dynamic,
        );

        Ok(Self {
            inner: Arc::new(GpuHeapInner {
                heap_desc,
                descriptor_size: static_manager.descriptor_size(),
                static_manager,
                dynamic_manager,
            }),
        })
    }

    /// Allocates from the static region. Returns a null allocation when the
    /// region is exhausted.
    pub fn allocate(&self, count: u32) -> DescriptorHeapAllocation<D> {
        let owner = Arc::downgrade(&self.inner);
        let owner: Weak<dyn AllocationOwner<D>> = owner;
        self.inner.static_manager.allocate(count, Some(&owner))
    }

    /// Allocates from the dynamic region. Returns a null allocation when the
    /// region is exhausted.
    pub fn allocate_dynamic(&self, count: u32) -> DescriptorHeapAllocation<D> {
        let owner = Arc::downgrade(&self.inner);
        let owner: Weak<dyn AllocationOwner<D>> = owner;
        self.inner.dynamic_manager.allocate(count, Some(&owner))
    }

    /// Returns an owning allocation. Non-owning views, such as those a
    /// dynamic suballocator hands out, are ignored.
    pub fn free(&self, allocation: DescriptorHeapAllocation<D>) {
        if !allocation.is_owned() {
            if !allocation.is_null() {
                log::warn!(
                    "Ignoring free of a non-owning view of {} descriptors",
                    allocation.num_handles()
                );
            }
            return;
        }
        self.inner.release(allocation);
    }

    pub fn heap(&self) -> &Arc<D::DescriptorHeap> {
        self.inner.static_manager.heap()
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.inner.heap_desc.kind
    }

    pub fn descriptor_size(&self) -> u32 {
        self.inner.descriptor_size
    }

    pub fn max_static_descriptors(&self) -> u32 {
        self.inner.static_manager.max_descriptors()
    }

    pub fn max_dynamic_descriptors(&self) -> u32 {
        self.inner.dynamic_manager.max_descriptors()
    }

    pub fn num_available_static_descriptors(&self) -> u32 {
        self.inner.static_manager.num_available_descriptors()
    }

    pub fn num_available_dynamic_descriptors(&self) -> u32 {
        self.inner.dynamic_manager.num_available_descriptors()
    }

    pub fn max_static_allocated_size(&self) -> u32 {
        self.inner.static_manager.max_allocated_size()
    }

    pub fn max_dynamic_allocated_size(&self) -> u32 {
        self.inner.dynamic_manager.max_allocated_size()
    }
}

impl<D: Device> AllocationOwner<D> for GpuHeapInner<D> {
    fn release(&self, allocation: DescriptorHeapAllocation<D>) {
        if allocation.is_null() {
            return;
        }
        match usize::from(allocation.manager_id()) {
            STATIC_MANAGER_ID => self.static_manager.free_allocation(allocation),
            DYNAMIC_MANAGER_ID => self.dynamic_manager.free_allocation(allocation),
            manager_id => {
                let mut allocation = allocation;
                allocation.reset();
                panic!("unexpected GPU descriptor heap manager id {manager_id}");
            }
        }
    }
}
