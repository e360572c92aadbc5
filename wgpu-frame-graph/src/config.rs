use std::num::NonZeroUsize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapConfig {
    pub cpu_cbv_srv_uav_descriptors: u32,
    pub cpu_rtv_descriptors: u32,
    pub cpu_dsv_descriptors: u32,
    pub gpu_static_descriptors: u32,
    pub gpu_dynamic_descriptors: u32,
}

impl Default for DescriptorHeapConfig {
    fn default() -> Self {
        Self {
            cpu_cbv_srv_uav_descriptors: 1024,
            cpu_rtv_descriptors: 256,
            cpu_dsv_descriptors: 256,
            gpu_static_descriptors: 4096,
            gpu_dynamic_descriptors: 4096,
        }
    }
}

impl DescriptorHeapConfig {
    pub fn with_cpu_heap_sizes(mut self, cbv_srv_uav: u32, rtv: u32, dsv: u32) -> Self {
        self.cpu_cbv_srv_uav_descriptors = cbv_srv_uav;
        self.cpu_rtv_descriptors = rtv;
        self.cpu_dsv_descriptors = dsv;
        self
    }

    pub fn with_gpu_heap_sizes(mut self, num_static: u32, num_dynamic: u32) -> Self {
        self.gpu_static_descriptors = num_static;
        self.gpu_dynamic_descriptors = num_dynamic;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceManagerConfig {
    /// Slots requested from the GPU heap's dynamic region per suballocator chunk.
    pub dynamic_chunk_size: u32,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            dynamic_chunk_size: 256,
        }
    }
}

impl ResourceManagerConfig {
    pub fn with_dynamic_chunk_size(mut self, dynamic_chunk_size: u32) -> Self {
        self.dynamic_chunk_size = dynamic_chunk_size;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub worker_threads: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

impl ExecutorConfig {
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads.max(1);
        self
    }
}
