use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{
    AllocationOwner, DescriptorHeapAllocation, DescriptorHeapAllocationManager, DescriptorHeapDesc,
    DescriptorHeapKind,
};
use crate::device::Device;
use crate::error::Result;

struct CpuHeapState<D: Device> {
    heap_pool: Vec<DescriptorHeapAllocationManager<D>>,
    available_heaps: BTreeSet<usize>,
    current_size: u32,
    max_size: u32,
}

struct CpuHeapInner<D: Device> {
    device: Arc<D>,
    heap_desc: DescriptorHeapDesc,
    descriptor_size: u32,
    state: Mutex<CpuHeapState<D>>,
}

/// Growable pool of non-shader-visible descriptor heaps of one kind.
///
/// A request that no existing heap can satisfy creates a new heap of
/// `max(default size, count)` slots. Heaps are never released while the pool
/// lives.
pub struct CpuDescriptorHeap<D: Device> {
    inner: Arc<CpuHeapInner<D>>,
}

impl<D: Device> Clone for CpuDescriptorHeap<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Device> CpuDescriptorHeap<D> {
    pub fn new(device: Arc<D>, num_descriptors_in_heap: u32, kind: DescriptorHeapKind) -> Result<Self> {
        let heap_desc = DescriptorHeapDesc {
            kind,
            num_descriptors: num_descriptors_in_heap,
            shader_visible: false,
        };
        let first_heap = DescriptorHeapAllocationManager::new(device.as_ref(), 0, heap_desc)?;
        let descriptor_size = first_heap.descriptor_size();

        Ok(Self {
            inner: Arc::new(CpuHeapInner {
                device,
                heap_desc,
                descriptor_size,
                state: Mutex::new(CpuHeapState {
                    heap_pool: vec![first_heap],
                    available_heaps: BTreeSet::from([0]),
                    current_size: 0,
                    max_size: 0,
                }),
            }),
        })
    }

    /// Allocates `count` contiguous slots, growing the pool if necessary. Only
    /// heap creation itself can fail.
    pub fn allocate(&self, count: u32) -> Result<DescriptorHeapAllocation<D>> {
        let owner = Arc::downgrade(&self.inner);
        let owner: Weak<dyn AllocationOwner<D>> = owner;
        let mut state = self.inner.state.lock();

        let mut allocation = DescriptorHeapAllocation::null();
        let candidates: Vec<usize> = state.available_heaps.iter().copied().collect();
        for index in candidates {
            allocation = state.heap_pool[index].allocate(count, Some(&owner));
            if state.heap_pool[index].num_available_descriptors() == 0 {
                state.available_heaps.remove(&index);
            }
            if !allocation.is_null() {
                break;
            }
        }

        if allocation.is_null() {
            let manager_id = state.heap_pool.len();
            let heap_desc = DescriptorHeapDesc {
                num_descriptors: self.inner.heap_desc.num_descriptors.max(count),
                ..self.inner.heap_desc
            };
            log::debug!(
                "Growing {:?} CPU descriptor pool: heap #{manager_id} with {} slots",
                heap_desc.kind,
                heap_desc.num_descriptors
            );
            let manager =
                DescriptorHeapAllocationManager::new(self.inner.device.as_ref(), manager_id, heap_desc)?;
            state.heap_pool.push(manager);
            state.available_heaps.insert(manager_id);
            allocation = state.heap_pool[manager_id].allocate(count, Some(&owner));
            debug_assert!(!allocation.is_null(), "fresh descriptor heap cannot satisfy request");
        }

        state.current_size += allocation.num_handles();
        state.max_size = state.max_size.max(state.current_size);
        Ok(allocation)
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

    pub fn kind(&self) -> DescriptorHeapKind {
        self.inner.heap_desc.kind
    }

    pub fn descriptor_size(&self) -> u32 {
        self.inner.descriptor_size
    }

    pub fn num_heaps(&self) -> usize {
        self.inner.state.lock().heap_pool.len()
    }

    pub fn current_size(&self) -> u32 {
        self.inner.state.lock().current_size
    }

    pub fn max_size(&self) -> u32 {
        self.inner.state.lock().max_size
    }
}

impl<D: Device> AllocationOwner<D> for CpuHeapInner<D> {
    fn release(&self, allocation: DescriptorHeapAllocation<D>) {
        if allocation.is_null() {
            return;
        }
        let mut state = self.state.lock();
        let manager_id = usize::from(allocation.manager_id());
        state.current_size -= allocation.num_handles();
        state.heap_pool[manager_id].free_allocation(allocation);
        state.available_heaps.insert(manager_id);
    }
}

impl<D: Device> Drop for CpuHeapInner<D> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let state = self.state.get_mut();
        debug_assert_eq!(
            state.current_size, 0,
            "{:?} CPU descriptor pool dropped with outstanding allocations",
            self.heap_desc.kind
        );
        log::debug!(
            "{:?} CPU descriptor pool peak usage: {} slots across {} heaps",
            self.heap_desc.kind,
            state.max_size,
            state.heap_pool.len()
        );
    }
}
