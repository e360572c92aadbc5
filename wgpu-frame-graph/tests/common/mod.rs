#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use wgpu_frame_graph::{
    CommandList, CommandQueue, CpuDescriptorHandle, DescriptorHeapConfig, DescriptorHeapContext,
    DescriptorHeapDesc, DescriptorHeapKind, Device, Executor, ExecutorConfig, GpuDescriptorHandle,
    ResourceManager, ResourceManagerConfig, ResourceStates, ResourceType, Result, ViewDesc,
};

pub const GPU_HANDLE_TAG: u64 = 1 << 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MockResource {
    pub id: u64,
}

#[derive(Debug)]
pub struct MockHeap {
    pub id: u64,
    pub desc: DescriptorHeapDesc,
}

#[derive(Debug)]
pub struct MockCommandAllocator {
    pub id: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Transition {
        resource: MockResource,
        before: ResourceStates,
        after: ResourceStates,
    },
    Copy {
        destination: MockResource,
        source: MockResource,
    },
    Marker(String),
}

#[derive(Debug, Default)]
pub struct MockCommandList {
    pub commands: Vec<Command>,
    pub closed: bool,
}

impl MockCommandList {
    pub fn mark(&mut self, label: impl Into<String>) {
        self.commands.push(Command::Marker(label.into()));
    }

    pub fn markers(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                Command::Marker(label) => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn transitions(&self) -> Vec<(MockResource, ResourceStates, ResourceStates)> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                Command::Transition {
                    resource,
                    before,
                    after,
                } => Some((*resource, *before, *after)),
                _ => None,
            })
            .collect()
    }
}

impl CommandList for MockCommandList {
    type Resource = MockResource;

    fn transition(&mut self, resource: &MockResource, before: ResourceStates, after: ResourceStates) {
        assert!(!self.closed, "recording into a closed command list");
        self.commands.push(Command::Transition {
            resource: *resource,
            before,
            after,
        });
    }

    fn copy_resource(&mut self, destination: &MockResource, source: &MockResource) {
        assert!(!self.closed, "recording into a closed command list");
        self.commands.push(Command::Copy {
            destination: *destination,
            source: *source,
        });
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedView {
    pub resource: MockResource,
    pub view: ViewDesc,
    pub destination: CpuDescriptorHandle,
}

#[derive(Default)]
pub struct MockDevice {
    next_heap_id: AtomicU64,
    next_resource_id: AtomicU64,
    pub created_resources: Mutex<Vec<(MockResource, ResourceType)>>,
    pub created_views: Mutex<Vec<CreatedView>>,
    pub allocators_created: AtomicUsize,
    pub allocator_resets: AtomicUsize,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn num_resources_created(&self) -> usize {
        self.created_resources.lock().len()
    }

    pub fn num_views_created(&self) -> usize {
        self.created_views.lock().len()
    }
}

impl Device for MockDevice {
    type Resource = MockResource;
    type DescriptorHeap = MockHeap;
    type CommandAllocator = MockCommandAllocator;
    type CommandList = MockCommandList;

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> Result<MockHeap> {
        Ok(MockHeap {
            id: self.next_heap_id.fetch_add(1, Ordering::Relaxed) + 1,
            desc: *desc,
        })
    }

    fn descriptor_heap_start(
        &self,
        heap: &MockHeap,
    ) -> (CpuDescriptorHandle, Option<GpuDescriptorHandle>) {
        let base = heap.id << 32;
        let gpu = heap
            .desc
            .shader_visible
            .then_some(GpuDescriptorHandle(base | GPU_HANDLE_TAG));
        (CpuDescriptorHandle(base), gpu)
    }

    fn descriptor_increment_size(&self, kind: DescriptorHeapKind) -> u32 {
        match kind {
            DescriptorHeapKind::CbvSrvUav => 32,
            DescriptorHeapKind::Sampler => 8,
            DescriptorHeapKind::Rtv | DescriptorHeapKind::Dsv => 16,
        }
    }

    fn create_committed_resource(
        &self,
        ty: &ResourceType,
        _initial_state: ResourceStates,
    ) -> Result<MockResource> {
        let resource = MockResource {
            id: self.next_resource_id.fetch_add(1, Ordering::Relaxed) + 1,
        };
        self.created_resources.lock().push((resource, *ty));
        Ok(resource)
    }

    fn create_view(&self, resource: &MockResource, view: &ViewDesc, destination: CpuDescriptorHandle) {
        self.created_views.lock().push(CreatedView {
            resource: *resource,
            view: *view,
            destination,
        });
    }

    fn create_command_allocator(&self) -> Result<MockCommandAllocator> {
        let id = self.allocators_created.fetch_add(1, Ordering::Relaxed);
        Ok(MockCommandAllocator { id })
    }

    fn reset_command_allocator(&self, _allocator: &mut MockCommandAllocator) -> Result<()> {
        self.allocator_resets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn create_command_list(&self, _allocator: &MockCommandAllocator) -> Result<MockCommandList> {
        Ok(MockCommandList::default())
    }
}

/// Queue whose fence only advances when a test says so or when someone waits.
#[derive(Default)]
pub struct MockQueue {
    pub submissions: Mutex<Vec<Vec<MockCommandList>>>,
    pub signals: Mutex<Vec<u64>>,
    pub waits: Mutex<Vec<u64>>,
    completed: AtomicU64,
}

impl MockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete_up_to(&self, value: u64) {
        self.completed.fetch_max(value, Ordering::AcqRel);
    }

    pub fn last_submission(&self) -> Vec<MockCommandList> {
        self.submissions.lock().pop().unwrap_or_default()
    }
}

impl CommandQueue for MockQueue {
    type Device = MockDevice;

    fn execute_command_lists(&self, command_lists: Vec<MockCommandList>) -> Result<()> {
        assert!(
            command_lists.iter().all(|command_list| command_list.closed),
            "submitted an open command list"
        );
        self.submissions.lock().push(command_lists);
        Ok(())
    }

    fn signal(&self, value: u64) -> Result<()> {
        self.signals.lock().push(value);
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    fn wait_for_value(&self, value: u64) -> Result<()> {
        self.waits.lock().push(value);
        self.complete_up_to(value);
        Ok(())
    }
}

pub struct Harness {
    pub device: Arc<MockDevice>,
    pub heaps: Arc<DescriptorHeapContext<MockDevice>>,
    pub resources: Mutex<ResourceManager<MockDevice>>,
    pub executor: Executor<MockDevice>,
    pub queue: MockQueue,
}

impl Harness {
    pub fn new(worker_threads: usize) -> Self {
        let device = MockDevice::new();
        let config = DescriptorHeapConfig::default()
            .with_cpu_heap_sizes(16, 8, 8)
            .with_gpu_heap_sizes(32, 32);
        let heaps = Arc::new(
            DescriptorHeapContext::new(&device, &config).expect("descriptor heaps"),
        );
        let resources = ResourceManager::new(
            Arc::clone(&device),
            Arc::clone(&heaps),
            &ResourceManagerConfig::default().with_dynamic_chunk_size(8),
        );
        let executor = Executor::new(
            Arc::clone(&device),
            &ExecutorConfig::default().with_worker_threads(worker_threads),
        )
        .expect("executor");
        Self {
            device,
            heaps,
            resources: Mutex::new(resources),
            executor,
            queue: MockQueue::new(),
        }
    }

    pub fn new_frame(&mut self) {
        self.resources.lock().new_frame(self.queue.completed_value());
        self.executor.new_frame().expect("executor frame reset");
    }
}
