//! Per-frame resource bookkeeping for a frame graph.
//!
//! Each frame the caller registers what every resource node is (an imported
//! external resource or a temporal resource described by a [`ResourceType`])
//! and what state and views each pass needs it in. The executor then drives
//! the manager through the compiled schedule: nodes are constructed at first
//! use (reusing pooled physical resources where a type matches), transitioned
//! and given descriptors before each pass, moved onto aliasing nodes, and
//! destructed after their last use. [`ResourceManager::new_frame`] resets
//! every per-frame table and evicts pooled resources the finished frame did
//! not touch. Descriptors stay reserved until the fence passed to
//! [`ResourceManager::end_frame`] completes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::config::ResourceManagerConfig;
use crate::descriptor_heap::{
    CpuDescriptorHandle, DescriptorHeapAllocation, DescriptorHeapContext, DynamicSuballocator,
    GpuDescriptorHandle,
};
use crate::device::{CommandList, Device};
use crate::error::{FrameGraphError, Result};
use crate::graph::FrameGraph;
use crate::resource::{
    CbvDesc, ClearValue, DsvDesc, ResourceStates, ResourceType, RtvDesc, SrvDesc, UavDesc,
    ViewDesc,
};

/// A physical resource together with the state it was last transitioned to.
pub struct ResourceView<D: Device> {
    pub resource: D::Resource,
    pub state: ResourceStates,
}

impl<D: Device> Clone for ResourceView<D> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            state: self.state,
        }
    }
}

impl<D: Device> fmt::Debug for ResourceView<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceView")
            .field("resource", &self.resource)
            .field("state", &self.state)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptorInfo {
    pub cpu_handle: CpuDescriptorHandle,
    pub gpu_handle: Option<GpuDescriptorHandle>,
    pub initialized: bool,
}

#[derive(Debug, Clone)]
struct ViewCache<K> {
    described: HashMap<K, DescriptorInfo>,
    null: Option<DescriptorInfo>,
}

impl<K> Default for ViewCache<K> {
    fn default() -> Self {
        Self {
            described: HashMap::new(),
            null: None,
        }
    }
}

impl<K: Eq + Hash> ViewCache<K> {
    fn len(&self) -> usize {
        self.described.len() + usize::from(self.null.is_some())
    }
}

/// Descriptors materialized for one resource node, split by view kind.
#[derive(Debug, Clone, Default)]
pub struct DescriptorCache {
    cbv: ViewCache<CbvDesc>,
    srv: ViewCache<SrvDesc>,
    uav: ViewCache<UavDesc>,
    rtv: ViewCache<RtvDesc>,
    dsv: ViewCache<DsvDesc>,
}

impl DescriptorCache {
    pub fn get(&self, view: &ViewDesc) -> Option<&DescriptorInfo> {
        match view {
            ViewDesc::Cbv(desc) => self.cbv.described.get(desc),
            ViewDesc::Srv(desc) => self.srv.described.get(desc),
            ViewDesc::Uav(desc) => self.uav.described.get(desc),
            ViewDesc::Rtv(desc) => self.rtv.described.get(desc),
            ViewDesc::Dsv(desc) => self.dsv.described.get(desc),
            ViewDesc::NullCbv => self.cbv.null.as_ref(),
            ViewDesc::NullSrv => self.srv.null.as_ref(),
            ViewDesc::NullUav => self.uav.null.as_ref(),
            ViewDesc::NullRtv => self.rtv.null.as_ref(),
            ViewDesc::NullDsv => self.dsv.null.as_ref(),
        }
    }

    fn get_mut(&mut self, view: &ViewDesc) -> Option<&mut DescriptorInfo> {
        match view {
            ViewDesc::Cbv(desc) => self.cbv.described.get_mut(desc),
            ViewDesc::Srv(desc) => self.srv.described.get_mut(desc),
            ViewDesc::Uav(desc) => self.uav.described.get_mut(desc),
            ViewDesc::Rtv(desc) => self.rtv.described.get_mut(desc),
            ViewDesc::Dsv(desc) => self.dsv.described.get_mut(desc),
            ViewDesc::NullCbv => self.cbv.null.as_mut(),
            ViewDesc::NullSrv => self.srv.null.as_mut(),
            ViewDesc::NullUav => self.uav.null.as_mut(),
            ViewDesc::NullRtv => self.rtv.null.as_mut(),
            ViewDesc::NullDsv => self.dsv.null.as_mut(),
        }
    }

    fn insert(&mut self, view: &ViewDesc, info: DescriptorInfo) {
        match view {
            ViewDesc::Cbv(desc) => {
                self.cbv.described.insert(*desc, info);
            }
            ViewDesc::Srv(desc) => {
                self.srv.described.insert(*desc, info);
            }
            ViewDesc::Uav(desc) => {
                self.uav.described.insert(*desc, info);
            }
            ViewDesc::Rtv(desc) => {
                self.rtv.described.insert(*desc, info);
            }
            ViewDesc::Dsv(desc) => {
                self.dsv.described.insert(*desc, info);
            }
            ViewDesc::NullCbv => self.cbv.null = Some(info),
            ViewDesc::NullSrv => self.srv.null = Some(info),
            ViewDesc::NullUav => self.uav.null = Some(info),
            ViewDesc::NullRtv => self.rtv.null = Some(info),
            ViewDesc::NullDsv => self.dsv.null = Some(info),
        }
    }

    pub fn contains(&self, view: &ViewDesc) -> bool {
        self.get(view).is_some()
    }

    pub fn cpu_handle(&self, view: &ViewDesc) -> Option<CpuDescriptorHandle> {
        self.get(view).map(|info| info.cpu_handle)
    }

    pub fn gpu_handle(&self, view: &ViewDesc) -> Option<GpuDescriptorHandle> {
        self.get(view).and_then(|info| info.gpu_handle)
    }

    pub fn len(&self) -> usize {
        self.cbv.len() + self.srv.len() + self.uav.len() + self.rtv.len() + self.dsv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a pass callback sees for one resource node.
pub struct PassResource<D: Device> {
    pub resource: D::Resource,
    pub descriptors: DescriptorCache,
}

impl<D: Device> Clone for PassResource<D> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            descriptors: self.descriptors.clone(),
        }
    }
}

impl<D: Device> fmt::Debug for PassResource<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassResource")
            .field("resource", &self.resource)
            .field("descriptors", &self.descriptors)
            .finish()
    }
}

pub type PassResources<D> = HashMap<usize, PassResource<D>>;

#[derive(Debug, Clone, Default)]
struct PassRequirement {
    state: ResourceStates,
    views: Vec<ViewDesc>,
}

struct PooledResource<D: Device> {
    view: ResourceView<D>,
    used_this_frame: bool,
}

struct PendingRestore<D: Device> {
    resource: D::Resource,
    current: ResourceStates,
    original: ResourceStates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotSource {
    CbvSrvUavGpu,
    RtvCpu,
    DsvCpu,
}

impl SlotSource {
    fn name(self) -> &'static str {
        match self {
            SlotSource::CbvSrvUavGpu => "shader-visible CBV/SRV/UAV",
            SlotSource::RtvCpu => "RTV",
            SlotSource::DsvCpu => "DSV",
        }
    }
}

/// A block of descriptor slots that only ever grows, handed out one slot at a
/// time. A frame's slots return to the free list once its fence completes.
struct DescriptorSlotTable<D: Device> {
    source: SlotSource,
    allocation: DescriptorHeapAllocation<D>,
    free: Vec<u32>,
    used: Vec<u32>,
    in_flight: Vec<(u64, Vec<u32>)>,
    retired_blocks: Vec<(u64, DescriptorHeapAllocation<D>)>,
}

impl<D: Device> DescriptorSlotTable<D> {
    fn new(source: SlotSource) -> Self {
        Self {
            source,
            allocation: DescriptorHeapAllocation::null(),
            free: Vec::new(),
            used: Vec::new(),
            in_flight: Vec::new(),
            retired_blocks: Vec::new(),
        }
    }

    fn capacity(&self) -> u32 {
        self.allocation.num_handles()
    }

    fn reserve(&mut self, heaps: &DescriptorHeapContext<D>, num_descriptors: u32) -> Result<()> {
        debug_assert!(self.used.is_empty(), "slot table grown mid-frame");
        if self.free.len() as u32 >= num_descriptors {
            return Ok(());
        }

        let original = self.capacity();
        let num_in_flight: u32 = self
            .in_flight
            .iter()
            .map(|(_, slots)| slots.len() as u32)
            .sum();
        let capacity = num_descriptors + num_in_flight;

        // In-flight slots keep the old block alive until their last fence.
        let previous = std::mem::take(&mut self.allocation);
        match self.in_flight.drain(..).map(|(fence, _)| fence).max() {
            Some(fence) => self.retired_blocks.push((fence, previous)),
            None => drop(previous),
        }
        self.free.clear();

        let allocation = match self.source {
            SlotSource::CbvSrvUavGpu => heaps.cbv_srv_uav_gpu().allocate(capacity),
            SlotSource::RtvCpu => heaps.rtv_cpu().allocate(capacity)?,
            SlotSource::DsvCpu => heaps.dsv_cpu().allocate(capacity)?,
        };
        if allocation.is_null() {
            return Err(FrameGraphError::DescriptorHeapExhausted {
                heap: self.source.name(),
                requested: capacity,
            });
        }

        log::debug!(
            "Grew {} slot table from {original} to {capacity}",
            self.source.name()
        );
        self.allocation = allocation;
        self.free.extend(0..capacity);
        Ok(())
    }

    fn acquire(&mut self) -> Option<(CpuDescriptorHandle, Option<GpuDescriptorHandle>)> {
        let index = self.free.pop()?;
        self.used.push(index);
        Some((self.allocation.cpu_handle(index), self.allocation.gpu_handle(index)))
    }

    fn retire(&mut self, fence: u64) {
        if !self.used.is_empty() {
            self.in_flight.push((fence, std::mem::take(&mut self.used)));
        }
    }

    fn release_completed(&mut self, completed_fence: u64) {
        let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(|(fence, _)| *fence <= completed_fence);
        self.in_flight = pending;
        for (_, slots) in done {
            self.free.extend(slots);
        }
        self.retired_blocks.retain(|(fence, _)| *fence > completed_fence);
    }

    fn num_in_flight(&self) -> usize {
        self.in_flight.iter().map(|(_, slots)| slots.len()).sum()
    }
}

pub struct ResourceManager<D: Device> {
    device: Arc<D>,
    heaps: Arc<DescriptorHeapContext<D>>,

    pool: HashMap<ResourceType, Vec<PooledResource<D>>>,
    num_created_resources: usize,

    importeds: HashMap<usize, ResourceView<D>>,
    temporals: HashMap<usize, ResourceType>,
    pass_requirements: BTreeMap<usize, BTreeMap<usize, PassRequirement>>,
    actives: HashMap<usize, ResourceView<D>>,
    pending_restores: HashMap<usize, PendingRestore<D>>,
    descriptor_caches: HashMap<usize, DescriptorCache>,

    cbv_srv_uav_dynamic: DynamicSuballocator<D>,
    retired_chunks: Vec<(u64, Vec<DescriptorHeapAllocation<D>>)>,
    cbv_srv_uav_table: DescriptorSlotTable<D>,
    rtv_table: DescriptorSlotTable<D>,
    dsv_table: DescriptorSlotTable<D>,
}

impl<D: Device> ResourceManager<D> {
    pub fn new(
        device: Arc<D>,
        heaps: Arc<DescriptorHeapContext<D>>,
        config: &ResourceManagerConfig,
    ) -> Self {
        let cbv_srv_uav_dynamic = DynamicSuballocator::new(
            heaps.cbv_srv_uav_gpu().clone(),
            config.dynamic_chunk_size,
            "frame graph resource tables",
        );
        Self {
            device,
            heaps,
            pool: HashMap::new(),
            num_created_resources: 0,
            importeds: HashMap::new(),
            temporals: HashMap::new(),
            pass_requirements: BTreeMap::new(),
            actives: HashMap::new(),
            pending_restores: HashMap::new(),
            descriptor_caches: HashMap::new(),
            cbv_srv_uav_dynamic,
            retired_chunks: Vec::new(),
            cbv_srv_uav_table: DescriptorSlotTable::new(SlotSource::CbvSrvUavGpu),
            rtv_table: DescriptorSlotTable::new(SlotSource::RtvCpu),
            dsv_table: DescriptorSlotTable::new(SlotSource::DsvCpu),
        }
    }

    pub fn register_imported_resource(
        &mut self,
        node: usize,
        resource: D::Resource,
        state: ResourceStates,
    ) -> &mut Self {
        debug_assert!(!self.is_registered(node), "resource node {node} registered twice");
        self.importeds.insert(node, ResourceView { resource, state });
        self
    }

    pub fn register_temporal_resource(&mut self, node: usize, ty: ResourceType) -> &mut Self {
        debug_assert!(!self.is_registered(node), "resource node {node} registered twice");
        self.temporals.insert(node, ty);
        self
    }

    /// Registers `ty` with the default clear value its format and flags imply.
    pub fn register_temporal_resource_auto_clear(
        &mut self,
        node: usize,
        ty: ResourceType,
    ) -> &mut Self {
        let ty = ResourceType {
            clear_value: ty.default_clear_value(),
            ..ty
        };
        self.register_temporal_resource(node, ty)
    }

    pub fn register_temporal_resource_with_clear(
        &mut self,
        node: usize,
        ty: ResourceType,
        clear_value: ClearValue,
    ) -> &mut Self {
        self.register_temporal_resource(node, ty.with_clear_value(clear_value))
    }

    pub fn register_pass_resource_state(
        &mut self,
        pass: usize,
        node: usize,
        state: ResourceStates,
    ) -> &mut Self {
        self.requirement_mut(pass, node).state = state;
        self
    }

    pub fn register_pass_resource_view(
        &mut self,
        pass: usize,
        node: usize,
        view: ViewDesc,
    ) -> &mut Self {
        self.requirement_mut(pass, node).views.push(view);
        self
    }

    pub fn register_pass_resource(
        &mut self,
        pass: usize,
        node: usize,
        state: ResourceStates,
        view: ViewDesc,
    ) -> &mut Self {
        let requirement = self.requirement_mut(pass, node);
        requirement.state = state;
        requirement.views.push(view);
        self
    }

    /// Records externally owned descriptor handles for a node's view so that
    /// handle allocation skips it. Shader-visible kinds need a GPU handle.
    pub fn register_resource_handle(
        &mut self,
        node: usize,
        view: ViewDesc,
        cpu_handle: CpuDescriptorHandle,
        gpu_handle: Option<GpuDescriptorHandle>,
        initialized: bool,
    ) -> &mut Self {
        match view {
            ViewDesc::Rtv(_) | ViewDesc::NullRtv | ViewDesc::Dsv(_) | ViewDesc::NullDsv => {
                assert!(gpu_handle.is_none(), "RTV and DSV handles are CPU only");
            }
            ViewDesc::Cbv(_)
            | ViewDesc::Srv(_)
            | ViewDesc::Uav(_)
            | ViewDesc::NullCbv
            | ViewDesc::NullSrv
            | ViewDesc::NullUav => {
                assert!(gpu_handle.is_some(), "CBV, SRV and UAV handles need a GPU handle");
            }
        }
        self.descriptor_caches.entry(node).or_default().insert(
            &view,
            DescriptorInfo {
                cpu_handle,
                gpu_handle,
                initialized,
            },
        );
        self
    }

    /// Places the views contiguously in the shader-visible dynamic region so a
    /// shader can bind them as one table. The views are materialized when a
    /// pass requests their nodes. The returned allocation is a non-owning view
    /// of the table; its first GPU handle is the table's base. The manager
    /// releases the range, so dropping the view is enough and heap `free`
    /// ignores it.
    pub fn register_resource_table(
        &mut self,
        entries: &[(usize, ViewDesc)],
    ) -> Result<DescriptorHeapAllocation<D>> {
        for (_, view) in entries {
            assert!(
                matches!(
                    view,
                    ViewDesc::Cbv(_)
                        | ViewDesc::Srv(_)
                        | ViewDesc::Uav(_)
                        | ViewDesc::NullCbv
                        | ViewDesc::NullSrv
                        | ViewDesc::NullUav
                ),
                "resource tables hold only CBV, SRV and UAV descriptors"
            );
        }
        if entries.is_empty() {
            return Ok(DescriptorHeapAllocation::null());
        }

        let count = entries.len() as u32;
        let table = self.cbv_srv_uav_dynamic.allocate(count);
        if table.is_null() {
            return Err(FrameGraphError::DescriptorHeapExhausted {
                heap: "shader-visible dynamic CBV/SRV/UAV",
                requested: count,
            });
        }

        for (index, (node, view)) in entries.iter().enumerate() {
            self.descriptor_caches.entry(*node).or_default().insert(
                view,
                DescriptorInfo {
                    cpu_handle: table.cpu_handle(index as u32),
                    gpu_handle: table.gpu_handle(index as u32),
                    initialized: false,
                },
            );
        }
        Ok(table)
    }

    /// Grows the backing slot tables so they can hold every distinct
    /// `(node, view)` pair registered this frame.
    pub fn reserve_descriptor_heaps(&mut self) -> Result<()> {
        let mut unique: HashSet<(usize, ViewDesc)> = HashSet::new();
        let (mut num_cbv_srv_uav, mut num_rtv, mut num_dsv) = (0_u32, 0_u32, 0_u32);

        for requirements in self.pass_requirements.values() {
            for (&node, requirement) in requirements {
                for view in &requirement.views {
                    if !unique.insert((node, *view)) {
                        continue;
                    }
                    match view {
                        ViewDesc::Cbv(_)
                        | ViewDesc::Srv(_)
                        | ViewDesc::Uav(_)
                        | ViewDesc::NullCbv
                        | ViewDesc::NullSrv
                        | ViewDesc::NullUav => num_cbv_srv_uav += 1,
                        ViewDesc::Rtv(_) | ViewDesc::NullRtv => num_rtv += 1,
                        ViewDesc::Dsv(_) | ViewDesc::NullDsv => num_dsv += 1,
                    }
                }
            }
        }

        self.cbv_srv_uav_table.reserve(&self.heaps, num_cbv_srv_uav)?;
        self.rtv_table.reserve(&self.heaps, num_rtv)?;
        self.dsv_table.reserve(&self.heaps, num_dsv)?;
        Ok(())
    }

    /// Assigns a slot to every registered view that has none yet. The slot is
    /// written when a pass first requests the node.
    pub fn allocate_handles(&mut self) -> Result<()> {
        for requirements in self.pass_requirements.values() {
            for (&node, requirement) in requirements {
                let cache = self.descriptor_caches.entry(node).or_default();
                for view in &requirement.views {
                    if cache.contains(view) {
                        continue;
                    }
                    let table = match view {
                        ViewDesc::Cbv(_)
                        | ViewDesc::Srv(_)
                        | ViewDesc::Uav(_)
                        | ViewDesc::NullCbv
                        | ViewDesc::NullSrv
                        | ViewDesc::NullUav => &mut self.cbv_srv_uav_table,
                        ViewDesc::Rtv(_) | ViewDesc::NullRtv => &mut self.rtv_table,
                        ViewDesc::Dsv(_) | ViewDesc::NullDsv => &mut self.dsv_table,
                    };
                    let Some((cpu_handle, gpu_handle)) = table.acquire() else {
                        return Err(FrameGraphError::DescriptorHeapExhausted {
                            heap: table.source.name(),
                            requested: table.capacity() + 1,
                        });
                    };
                    cache.insert(
                        view,
                        DescriptorInfo {
                            cpu_handle,
                            gpu_handle,
                            initialized: false,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Makes `node` active: imported nodes use their external resource,
    /// temporal nodes take a pooled resource of the same type or create one.
    pub fn construct(&mut self, node: usize) -> Result<()> {
        debug_assert!(!self.actives.contains_key(&node), "resource node {node} constructed twice");

        let view = if let Some(imported) = self.importeds.get(&node) {
            imported.clone()
        } else {
            let ty = *self
                .temporals
                .get(&node)
                .ok_or(FrameGraphError::ResourceNodeNotRegistered { node })?;
            match self.pool.get_mut(&ty).and_then(Vec::pop) {
                Some(pooled) => {
                    log::trace!("Resource node {node} reuses pooled {:?}", pooled.view.resource);
                    pooled.view
                }
                None => {
                    let resource = self
                        .device
                        .create_committed_resource(&ty, ResourceStates::COMMON)?;
                    self.num_created_resources += 1;
                    log::debug!("Created {resource:?} for resource node {node}: {ty:?}");
                    ResourceView {
                        resource,
                        state: ResourceStates::COMMON,
                    }
                }
            }
        };

        self.actives.insert(node, view);
        Ok(())
    }

    /// CPU half of destruction. Temporal resources go back to the pool in
    /// their current state; imported resources that were transitioned away
    /// from their registered state are queued for [`destruct_gpu`](Self::destruct_gpu).
    pub fn destruct_cpu(&mut self, node: usize) {
        let Some(view) = self.actives.remove(&node) else {
            log::warn!("Destructing resource node {node} which is not active");
            return;
        };

        if let Some(imported) = self.importeds.get(&node) {
            if view.state != imported.state {
                self.pending_restores.insert(
                    node,
                    PendingRestore {
                        resource: view.resource,
                        current: view.state,
                        original: imported.state,
                    },
                );
            }
        } else if let Some(ty) = self.temporals.get(&node) {
            self.pool.entry(*ty).or_default().push(PooledResource {
                view,
                used_this_frame: true,
            });
        }
    }

    /// GPU half of destruction: records the transition that hands an imported
    /// resource back in the state it was registered with.
    pub fn destruct_gpu(&mut self, command_list: &mut D::CommandList, node: usize) {
        if let Some(restore) = self.pending_restores.remove(&node) {
            command_list.transition(&restore.resource, restore.current, restore.original);
        }
    }

    pub fn destruct(&mut self, command_list: &mut D::CommandList, node: usize) {
        self.destruct_cpu(node);
        self.destruct_gpu(command_list, node);
    }

    /// Hands `src`'s active resource and registration over to `dst`. `src` is
    /// left inactive and will not be destructed.
    pub fn move_resource(&mut self, dst: usize, src: usize) -> Result<()> {
        debug_assert!(!self.actives.contains_key(&dst), "move target {dst} is already active");
        let view = self
            .actives
            .remove(&src)
            .ok_or(FrameGraphError::ResourceNotActive { node: src })?;

        if let Some(imported) = self.importeds.remove(&src) {
            self.temporals.remove(&dst);
            self.importeds.insert(dst, imported);
        } else if let Some(ty) = self.temporals.remove(&src) {
            self.importeds.remove(&dst);
            self.temporals.insert(dst, ty);
        }

        log::trace!("Moved resource node {src} onto {dst}");
        self.actives.insert(dst, view);
        Ok(())
    }

    /// Transitions every node the pass uses into its required state and writes
    /// any descriptor not yet materialized this frame.
    pub fn request_pass_resources(
        &mut self,
        command_list: &mut D::CommandList,
        pass: usize,
    ) -> Result<PassResources<D>> {
        let mut pass_resources = PassResources::new();
        let Some(requirements) = self.pass_requirements.get(&pass) else {
            return Ok(pass_resources);
        };

        for (&node, requirement) in requirements {
            let view = self
                .actives
                .get_mut(&node)
                .ok_or(FrameGraphError::ResourceNotActive { node })?;
            if view.state != requirement.state {
                command_list.transition(&view.resource, view.state, requirement.state);
                view.state = requirement.state;
            }

            let cache = self.descriptor_caches.entry(node).or_default();
            for desc in &requirement.views {
                let info = cache
                    .get_mut(desc)
                    .ok_or(FrameGraphError::DescriptorNotAllocated { node })?;
                if !info.initialized {
                    self.device.create_view(&view.resource, desc, info.cpu_handle);
                    info.initialized = true;
                }
            }

            pass_resources.insert(
                node,
                PassResource {
                    resource: view.resource.clone(),
                    descriptors: cache.clone(),
                },
            );
        }
        Ok(pass_resources)
    }

    /// True when every node of `graph` is registered and every pass has
    /// requirements for all of its inputs and outputs.
    pub fn check_complete(&self, graph: &FrameGraph) -> bool {
        for node in 0..graph.resource_nodes().len() {
            if !self.is_registered(node) {
                log::warn!(
                    "Resource node {node} ({}) is not registered",
                    graph.resource_nodes()[node].name
                );
                return false;
            }
        }

        for (pass, pass_node) in graph.pass_nodes().iter().enumerate() {
            let Some(requirements) = self.pass_requirements.get(&pass) else {
                log::warn!("Pass {pass} ({}) has no resource requirements", pass_node.name);
                return false;
            };
            let missing = pass_node
                .inputs
                .iter()
                .chain(&pass_node.outputs)
                .find(|&&node| !requirements.contains_key(&node));
            if let Some(node) = missing {
                log::warn!(
                    "Pass {pass} ({}) does not register resource node {node}",
                    pass_node.name
                );
                return false;
            }
        }
        true
    }

    /// Starts a frame: clears every per-frame table and evicts pooled
    /// resources the previous frame did not touch. Descriptors retired by
    /// [`end_frame`](Self::end_frame) under a fence above `completed_fence`
    /// stay reserved. Those of a frame that was never ended are released now.
    pub fn new_frame(&mut self, completed_fence: u64) {
        self.importeds.clear();
        self.temporals.clear();
        self.pass_requirements.clear();
        self.actives.clear();
        self.pending_restores.clear();
        self.descriptor_caches.clear();

        self.retire_descriptors(0);
        self.release_retired_descriptors(completed_fence);

        let mut evicted = 0;
        for entries in self.pool.values_mut() {
            let before = entries.len();
            entries.retain(|entry| entry.used_this_frame);
            evicted += before - entries.len();
            for entry in entries.iter_mut() {
                entry.used_this_frame = false;
            }
        }
        self.pool.retain(|_, entries| !entries.is_empty());
        if evicted > 0 {
            log::debug!("Evicted {evicted} pooled resources unused last frame");
        }
    }

    /// Keeps this frame's descriptor slots and resource table chunks reserved
    /// until the GPU reaches `fence`. Call once the frame is submitted and
    /// `fence` signaled.
    pub fn end_frame(&mut self, fence: u64) {
        self.retire_descriptors(fence);
    }

    fn retire_descriptors(&mut self, fence: u64) {
        for table in [
            &mut self.cbv_srv_uav_table,
            &mut self.rtv_table,
            &mut self.dsv_table,
        ] {
            table.retire(fence);
        }
        let chunks = self.cbv_srv_uav_dynamic.retire_allocations();
        if !chunks.is_empty() {
            self.retired_chunks.push((fence, chunks));
        }
    }

    fn release_retired_descriptors(&mut self, completed_fence: u64) {
        for table in [
            &mut self.cbv_srv_uav_table,
            &mut self.rtv_table,
            &mut self.dsv_table,
        ] {
            table.release_completed(completed_fence);
        }
        let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retired_chunks)
            .into_iter()
            .partition(|(fence, _)| *fence <= completed_fence);
        self.retired_chunks = pending;
        let heap = self.heaps.cbv_srv_uav_gpu();
        for chunk in done.into_iter().flat_map(|(_, chunks)| chunks) {
            heap.free(chunk);
        }
    }

    /// Resets like [`new_frame`](Self::new_frame) with every fence treated as
    /// complete and drops every pooled resource. Only call once the GPU is
    /// idle.
    pub fn clear(&mut self) {
        self.new_frame(u64::MAX);
        self.pool.clear();
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn heaps(&self) -> &Arc<DescriptorHeapContext<D>> {
        &self.heaps
    }

    pub fn active_view(&self, node: usize) -> Option<&ResourceView<D>> {
        self.actives.get(&node)
    }

    pub fn descriptor_cache(&self, node: usize) -> Option<&DescriptorCache> {
        self.descriptor_caches.get(&node)
    }

    pub fn is_imported(&self, node: usize) -> bool {
        self.importeds.contains_key(&node)
    }

    pub fn is_registered(&self, node: usize) -> bool {
        self.importeds.contains_key(&node) || self.temporals.contains_key(&node)
    }

    pub fn num_pooled_resources(&self) -> usize {
        self.pool.values().map(Vec::len).sum()
    }

    pub fn num_created_resources(&self) -> usize {
        self.num_created_resources
    }

    pub fn dynamic_suballocator(&self) -> &DynamicSuballocator<D> {
        &self.cbv_srv_uav_dynamic
    }

    /// Resource table chunks waiting for their frame's fence.
    pub fn num_retired_chunks(&self) -> usize {
        self.retired_chunks.iter().map(|(_, chunks)| chunks.len()).sum()
    }

    /// Descriptor slots of ended frames the GPU may still read.
    pub fn num_in_flight_slots(&self) -> usize {
        self.cbv_srv_uav_table.num_in_flight()
            + self.rtv_table.num_in_flight()
            + self.dsv_table.num_in_flight()
    }

    fn requirement_mut(&mut self, pass: usize, node: usize) -> &mut PassRequirement {
        self.pass_requirements
            .entry(pass)
            .or_default()
            .entry(node)
            .or_default()
    }
}

impl<D: Device> Drop for ResourceManager<D> {
    fn drop(&mut self) {
        // Slots go back while `heaps` is still alive.
        for table in [
            &mut self.cbv_srv_uav_table,
            &mut self.rtv_table,
            &mut self.dsv_table,
        ] {
            drop(std::mem::take(&mut table.allocation));
            table.free.clear();
            table.used.clear();
            table.in_flight.clear();
            table.retired_blocks.clear();
        }
        self.retired_chunks.clear();
        self.cbv_srv_uav_dynamic.release_allocations();
    }
}
