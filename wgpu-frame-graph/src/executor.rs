//! Records a compiled frame graph across a worker pool.
//!
//! The calling thread walks the schedule in order and, under the resource
//! manager lock, performs every lifecycle step that mutates shared state:
//! construction, barrier emission, view creation, moves and the CPU half of
//! destruction. Pass callbacks then record in parallel on the pool, each into
//! its own command list. Lists are submitted in schedule order once every
//! callback has finished.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ExecutorConfig;
use crate::device::{CommandList, CommandQueue, Device};
use crate::error::{FrameGraphError, Result};
use crate::graph::{CompiledSchedule, FrameGraph};
use crate::resource_manager::{PassResources, ResourceManager};

pub type PassFn<D> =
    Box<dyn FnOnce(&mut <D as Device>::CommandList, &PassResources<D>) + Send + 'static>;

pub struct Executor<D: Device> {
    device: Arc<D>,
    thread_pool: rayon::ThreadPool,
    pass_fns: HashMap<usize, PassFn<D>>,
    free_allocators: Vec<D::CommandAllocator>,
    used_allocators: Vec<D::CommandAllocator>,
}

impl<D: Device> Executor<D> {
    pub fn new(device: Arc<D>, config: &ExecutorConfig) -> Result<Self> {
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|index| format!("frame-graph-pass-{index}"))
            .build()?;
        log::debug!(
            "Pass recording pool started with {} threads",
            thread_pool.current_num_threads()
        );
        Ok(Self {
            device,
            thread_pool,
            pass_fns: HashMap::new(),
            free_allocators: Vec::new(),
            used_allocators: Vec::new(),
        })
    }

    /// Resets the allocators used last frame and forgets callbacks that were
    /// never executed. Call after the frame gate guarantees the GPU is done
    /// with the previous use of these allocators.
    pub fn new_frame(&mut self) -> Result<()> {
        while let Some(mut allocator) = self.used_allocators.pop() {
            self.device.reset_command_allocator(&mut allocator)?;
            self.free_allocators.push(allocator);
        }
        if !self.pass_fns.is_empty() {
            log::debug!("Dropping {} pass callbacks that never ran", self.pass_fns.len());
            self.pass_fns.clear();
        }
        Ok(())
    }

    pub fn register_pass_fn<F>(&mut self, pass: usize, pass_fn: F) -> &mut Self
    where
        F: FnOnce(&mut D::CommandList, &PassResources<D>) + Send + 'static,
    {
        self.pass_fns.insert(pass, Box::new(pass_fn));
        self
    }

    /// Registers a pass that copies `sources[i]` into `destinations[i]`.
    pub fn register_copy_pass(
        &mut self,
        pass: usize,
        sources: &[usize],
        destinations: &[usize],
    ) -> &mut Self {
        assert_eq!(
            sources.len(),
            destinations.len(),
            "copy pass {pass} needs one destination per source"
        );
        let pairs: Vec<(usize, usize)> = sources
            .iter()
            .copied()
            .zip(destinations.iter().copied())
            .collect();
        self.register_pass_fn(pass, move |command_list, resources| {
            for &(source, destination) in &pairs {
                match (resources.get(&source), resources.get(&destination)) {
                    (Some(source), Some(destination)) => {
                        command_list.copy_resource(&destination.resource, &source.resource);
                    }
                    _ => log::warn!(
                        "Copy pass {pass}: resource node {source} or {destination} was not requested"
                    ),
                }
            }
        })
    }

    /// Registers a copy pass pairing the pass node's inputs with its outputs.
    pub fn register_copy_pass_from_graph(
        &mut self,
        graph: &FrameGraph,
        pass: usize,
    ) -> Result<&mut Self> {
        let pass_node = graph.pass_node(pass)?;
        let (inputs, outputs) = (pass_node.inputs.clone(), pass_node.outputs.clone());
        Ok(self.register_copy_pass(pass, &inputs, &outputs))
    }

    pub fn execute<Q>(
        &mut self,
        queue: &Q,
        schedule: &CompiledSchedule,
        resources: &Mutex<ResourceManager<D>>,
    ) -> Result<()>
    where
        Q: CommandQueue<Device = D>,
    {
        {
            let mut manager = resources.lock();
            manager.reserve_descriptor_heaps()?;
            manager.allocate_handles()?;
        }

        let num_passes = schedule.num_passes();
        if num_passes == 0 {
            return Ok(());
        }

        let mut command_lists: Vec<Option<D::CommandList>> = Vec::with_capacity(num_passes);
        for _ in 0..num_passes {
            let allocator = match self.free_allocators.pop() {
                Some(allocator) => allocator,
                None => self.device.create_command_allocator()?,
            };
            let command_list = self.device.create_command_list(&allocator);
            self.used_allocators.push(allocator);
            command_lists.push(Some(command_list?));
        }

        {
            let mut manager = resources.lock();
            let prelude = &schedule.prelude;
            for &node in &prelude.construct_resources {
                manager.construct(node)?;
            }
            for &src in &prelude.move_resources {
                let dst = *schedule
                    .moves_src_to_dst
                    .get(&src)
                    .ok_or(FrameGraphError::MoveSourceMissing { src })?;
                manager.move_resource(dst, src)?;
            }
            if let Some(first) = command_lists.first_mut().and_then(Option::as_mut) {
                for &node in &prelude.destruct_resources {
                    manager.destruct(first, node);
                }
            }
        }

        let recorded: Vec<Mutex<Option<Result<D::CommandList>>>> =
            (0..num_passes).map(|_| Mutex::new(None)).collect();
        let recorded_slots = &recorded;
        let pass_fns = &mut self.pass_fns;

        let scheduled = self.thread_pool.in_place_scope(|scope| -> Result<()> {
            let mut manager = resources.lock();
            for &pass in &schedule.sorted_passes {
                let order = *schedule
                    .pass_to_order
                    .get(&pass)
                    .ok_or(FrameGraphError::PassNodeNotFound { index: pass })?;
                let mut command_list = command_lists[order]
                    .take()
                    .ok_or(FrameGraphError::CommandListMissing { order })?;
                let info = schedule.info(pass);

                if let Some(info) = info {
                    for &node in &info.construct_resources {
                        manager.construct(node)?;
                    }
                }

                let pass_resources = manager.request_pass_resources(&mut command_list, pass)?;

                let mut destructs = Vec::new();
                if let Some(info) = info {
                    for &src in &info.move_resources {
                        let dst = *schedule
                            .moves_src_to_dst
                            .get(&src)
                            .ok_or(FrameGraphError::MoveSourceMissing { src })?;
                        manager.move_resource(dst, src)?;
                    }
                    for &node in &info.destruct_resources {
                        manager.destruct_cpu(node);
                    }
                    destructs.clone_from(&info.destruct_resources);
                }

                let pass_fn = pass_fns.remove(&pass);
                let slot = &recorded_slots[order];
                scope.spawn(move |_| {
                    if let Some(pass_fn) = pass_fn {
                        pass_fn(&mut command_list, &pass_resources);
                    }
                    if !destructs.is_empty() {
                        let mut manager = resources.lock();
                        for &node in &destructs {
                            manager.destruct_gpu(&mut command_list, node);
                        }
                    }
                    let result = command_list.close().map(|()| command_list);
                    *slot.lock() = Some(result);
                });
            }
            Ok(())
        });
        scheduled?;

        let mut submission = Vec::with_capacity(num_passes);
        for (order, slot) in recorded.into_iter().enumerate() {
            match slot.into_inner() {
                Some(command_list) => submission.push(command_list?),
                None => return Err(FrameGraphError::CommandListMissing { order }),
            }
        }
        log::trace!("Submitting {} command lists", submission.len());
        queue.execute_command_lists(submission)
    }

    pub fn num_pending_pass_fns(&self) -> usize {
        self.pass_fns.len()
    }

    pub fn num_command_allocators(&self) -> usize {
        self.free_allocators.len() + self.used_allocators.len()
    }
}
