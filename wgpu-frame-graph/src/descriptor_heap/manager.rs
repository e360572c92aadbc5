use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{
    AllocationOwner, CpuDescriptorHandle, DescriptorHeapAllocation, DescriptorHeapDesc,
    GpuDescriptorHandle,
};
use crate::device::Device;
use crate::error::Result;
use crate::range_allocator::RangeAllocator;

struct ManagerState {
    free_blocks: RangeAllocator,
    max_allocated_size: u32,
}

/// Sub-allocates descriptor slots from one physical heap, either a heap it
/// created itself or a sub-range of a heap owned by someone else.
pub struct DescriptorHeapAllocationManager<D: Device> {
    heap: Arc<D::DescriptorHeap>,
    heap_desc: DescriptorHeapDesc,
    manager_id: usize,
    descriptor_size: u32,
    num_descriptors: u32,
    first_cpu_handle: CpuDescriptorHandle,
    first_gpu_handle: Option<GpuDescriptorHandle>,
    state: Mutex<ManagerState>,
}

impl<D: Device> DescriptorHeapAllocationManager<D> {
    pub fn new(device: &D, manager_id: usize, heap_desc: DescriptorHeapDesc) -> Result<Self> {
        let heap = Arc::new(device.create_descriptor_heap(&heap_desc)?);
        log::debug!(
            "Created {:?} descriptor heap #{manager_id} with {} slots",
            heap_desc.kind,
            heap_desc.num_descriptors
        );
        Ok(Self::with_subrange(
            device,
            manager_id,
            heap,
            heap_desc,
            0,
            heap_desc.num_descriptors,
        ))
    }

    /// Manages `[first_descriptor, first_descriptor + num_descriptors)` of an
    /// existing heap described by `heap_desc`.
    pub fn with_subrange(
        device: &D,
        manager_id: usize,
        heap: Arc<D::DescriptorHeap>,
        heap_desc: DescriptorHeapDesc,
        first_descriptor: u32,
        num_descriptors: u32,
    ) -> Self {
        debug_assert!(first_descriptor + num_descriptors <= heap_desc.num_descriptors);
        debug_assert!(
            manager_id < usize::from(u16::MAX),
            "manager id {manager_id} does not fit the allocation's 16-bit id"
        );

        let descriptor_size = device.descriptor_increment_size(heap_desc.kind);
        let (heap_cpu_start, heap_gpu_start) = device.descriptor_heap_start(&heap);
        let first_gpu_handle = if heap_desc.shader_visible {
            heap_gpu_start.map(|start| start.offset(first_descriptor, descriptor_size))
        } else {
            None
        };

        Self {
            heap,
            heap_desc,
            manager_id,
            descriptor_size,
            num_descriptors,
            first_cpu_handle: heap_cpu_start.offset(first_descriptor, descriptor_size),
            first_gpu_handle,
            state: Mutex::new(ManagerState {
                free_blocks: RangeAllocator::new(u64::from(num_descriptors)),
                max_allocated_size: 0,
            }),
        }
    }

    /// Returns a null allocation when the range has no run of `count` free
    /// slots. `owner` receives the slots back when the allocation is dropped.
    pub(crate) fn allocate(
        &self,
        count: u32,
        owner: Option<&Weak<dyn AllocationOwner<D>>>,
    ) -> DescriptorHeapAllocation<D> {
        debug_assert!(count > 0);
        let mut state = self.state.lock();

        let allocation = state.free_blocks.allocate(u64::from(count), 1);
        if !allocation.is_valid() {
            return DescriptorHeapAllocation::null();
        }
        debug_assert_eq!(allocation.size, u64::from(count));

        let used = state.free_blocks.used_size() as u32;
        state.max_allocated_size = state.max_allocated_size.max(used);

        let offset = allocation.unaligned_offset as u32;
        DescriptorHeapAllocation::new(
            owner.cloned(),
            Arc::clone(&self.heap),
            self.first_cpu_handle.offset(offset, self.descriptor_size),
            self.first_gpu_handle
                .map(|handle| handle.offset(offset, self.descriptor_size)),
            count,
            self.manager_id as u16,
            self.descriptor_size,
        )
    }

    pub fn free_allocation(&self, mut allocation: DescriptorHeapAllocation<D>) {
        if allocation.is_null() {
            return;
        }
        let manager_id = usize::from(allocation.manager_id());
        if manager_id != self.manager_id {
            allocation.reset();
            panic!(
                "allocation from manager #{manager_id} returned to manager #{}",
                self.manager_id
            );
        }

        let offset = (allocation.cpu_handle(0).0 - self.first_cpu_handle.0)
            / u64::from(self.descriptor_size);
        self.state
            .lock()
            .free_blocks
            .free(offset, u64::from(allocation.num_handles()));
        allocation.reset();
    }

    pub fn heap(&self) -> &Arc<D::DescriptorHeap> {
        &self.heap
    }

    pub fn heap_desc(&self) -> &DescriptorHeapDesc {
        &self.heap_desc
    }

    pub fn manager_id(&self) -> usize {
        self.manager_id
    }

    pub fn descriptor_size(&self) -> u32 {
        self.descriptor_size
    }

    pub fn first_cpu_handle(&self) -> CpuDescriptorHandle {
        self.first_cpu_handle
    }

    pub fn first_gpu_handle(&self) -> Option<GpuDescriptorHandle> {
        self.first_gpu_handle
    }

    pub fn max_descriptors(&self) -> u32 {
        self.num_descriptors
    }

    pub fn num_available_descriptors(&self) -> u32 {
        self.state.lock().free_blocks.free_size() as u32
    }

    pub fn max_allocated_size(&self) -> u32 {
        self.state.lock().max_allocated_size
    }
}

impl<D: Device> Drop for DescriptorHeapAllocationManager<D> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let state = self.state.get_mut();
        debug_assert!(
            state.free_blocks.is_empty(),
            "{:?} heap manager #{} dropped with {} descriptors still allocated",
            self.heap_desc.kind,
            self.manager_id,
            state.free_blocks.used_size()
        );
        log::trace!(
            "{:?} heap manager #{} peak usage: {}/{}",
            self.heap_desc.kind,
            self.manager_id,
            state.max_allocated_size,
            self.num_descriptors
        );
    }
}
