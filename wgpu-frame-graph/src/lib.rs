//! Resource and descriptor lifetime management for frame graphs.
//!
//! A [`FrameGraph`] of passes and resource nodes compiles into a
//! [`CompiledSchedule`]. The [`ResourceManager`] creates, pools, aliases and
//! transitions the resources that schedule touches and writes their views into
//! descriptor heaps carved out by a [`RangeAllocator`]. The [`Executor`] walks
//! the schedule and records passes in parallel into per-pass command lists.
//!
//! Everything backend specific sits behind the [`Device`], [`CommandList`]
//! and [`CommandQueue`] traits. [`wgpu_backend`] implements them for wgpu.

pub mod config;
pub mod descriptor_heap;
pub mod device;
pub mod error;
pub mod executor;
pub mod frame_resource;
pub mod graph;
pub mod range_allocator;
pub mod resource;
pub mod resource_manager;
pub mod wgpu_backend;

pub use config::{DescriptorHeapConfig, ExecutorConfig, ResourceManagerConfig};
pub use descriptor_heap::{
    CpuDescriptorHandle, CpuDescriptorHeap, DescriptorHeapAllocation,
    DescriptorHeapAllocationManager, DescriptorHeapContext, DescriptorHeapDesc,
    DescriptorHeapKind, DynamicSuballocator, GpuDescriptorHandle, GpuDescriptorHeap,
};
pub use device::{CommandList, CommandQueue, Device};
pub use error::{FrameGraphError, Result};
pub use executor::{Executor, PassFn};
pub use frame_resource::{FrameResource, FrameResourceRing};
pub use graph::{CompiledSchedule, FrameGraph, PassInfo, PassNode, ResourceNode};
pub use range_allocator::{RangeAllocation, RangeAllocator};
pub use resource::{
    CbvDesc, ClearValue, DsvDesc, Format, ResourceDimension, ResourceFlags, ResourceStates,
    ResourceType, RtvDesc, SrvDesc, UavDesc, ViewDesc, ViewDimension, ViewKind,
};
pub use resource_manager::{
    DescriptorCache, DescriptorInfo, PassResource, PassResources, ResourceManager, ResourceView,
};
