use super::{DescriptorHeapAllocation, GpuDescriptorHeap};
use crate::device::Device;

/// Linear allocator over chunks of a GPU heap's dynamic region.
///
/// Every view it hands out is non-owning and stays valid until
/// [`release_allocations`](Self::release_allocations) returns the chunks to
/// the parent heap. Call that once per frame, after the GPU has retired the
/// work that referenced the views. Not synchronized; keep one instance per
/// recording context.
pub struct DynamicSuballocator<D: Device> {
    parent: GpuDescriptorHeap<D>,
    name: String,
    chunk_size: u32,
    suballocations: Vec<DescriptorHeapAllocation<D>>,
    current_offset: u32,
    current_descriptor_count: u32,
    peak_descriptor_count: u32,
    current_suballocations_total_size: u32,
    peak_suballocations_total_size: u32,
}

impl<D: Device> DynamicSuballocator<D> {
    pub fn new(parent: GpuDescriptorHeap<D>, chunk_size: u32, name: impl Into<String>) -> Self {
        debug_assert!(chunk_size > 0);
        Self {
            parent,
            name: name.into(),
            chunk_size,
            suballocations: Vec::new(),
            current_offset: 0,
            current_descriptor_count: 0,
            peak_descriptor_count: 0,
            current_suballocations_total_size: 0,
            peak_suballocations_total_size: 0,
        }
    }

    /// Returns a null allocation when the parent's dynamic region cannot
    /// provide another chunk.
    pub fn allocate(&mut self, count: u32) -> DescriptorHeapAllocation<D> {
        if count == 0 {
            return DescriptorHeapAllocation::null();
        }
        let needs_chunk = self
            .suballocations
            .last()
            .is_none_or(|chunk| self.current_offset + count > chunk.num_handles());

        if needs_chunk {
            let chunk_size = self.chunk_size.max(count);
            let chunk = self.parent.allocate_dynamic(chunk_size);
            if chunk.is_null() {
                log::warn!(
                    "{}: dynamic descriptor region exhausted while requesting {chunk_size} slots",
                    self.name
                );
                return DescriptorHeapAllocation::null();
            }
            self.current_suballocations_total_size += chunk.num_handles();
            self.peak_suballocations_total_size = self
                .peak_suballocations_total_size
                .max(self.current_suballocations_total_size);
            self.suballocations.push(chunk);
            self.current_offset = 0;
        }

        let Some(chunk) = self.suballocations.last() else {
            return DescriptorHeapAllocation::null();
        };
        let Some(heap) = chunk.heap() else {
            return DescriptorHeapAllocation::null();
        };

        let allocation = DescriptorHeapAllocation::new(
            None,
            std::sync::Arc::clone(heap),
            chunk.cpu_handle(self.current_offset),
            chunk.gpu_handle(self.current_offset),
            count,
            chunk.manager_id(),
            chunk.descriptor_size(),
        );

        self.current_offset += count;
        self.current_descriptor_count += count;
        self.peak_descriptor_count = self.peak_descriptor_count.max(self.current_descriptor_count);
        allocation
    }

    pub fn release_allocations(&mut self) {
        for chunk in self.retire_allocations() {
            self.parent.free(chunk);
        }
    }

    /// Starts over without freeing anything. The caller owns the returned
    /// chunks and frees them once the GPU no longer reads the views.
    pub fn retire_allocations(&mut self) -> Vec<DescriptorHeapAllocation<D>> {
        if !self.suballocations.is_empty() {
            log::trace!(
                "{}: retiring {} dynamic chunks ({} slots used)",
                self.name,
                self.suballocations.len(),
                self.current_descriptor_count
            );
        }
        self.current_offset = 0;
        self.current_descriptor_count = 0;
        self.current_suballocations_total_size = 0;
        std::mem::take(&mut self.suballocations)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn num_chunks(&self) -> usize {
        self.suballocations.len()
    }

    pub fn current_descriptor_count(&self) -> u32 {
        self.current_descriptor_count
    }

    pub fn peak_descriptor_count(&self) -> u32 {
        self.peak_descriptor_count
    }

    pub fn current_suballocations_total_size(&self) -> u32 {
        self.current_suballocations_total_size
    }

    pub fn peak_suballocations_total_size(&self) -> u32 {
        self.peak_suballocations_total_size
    }
}

impl<D: Device> Drop for DynamicSuballocator<D> {
    fn drop(&mut self) {
        self.release_allocations();
        log::trace!(
            "{}: peak {} descriptors in {} chunk slots",
            self.name,
            self.peak_descriptor_count,
            self.peak_suballocations_total_size
        );
    }
}
