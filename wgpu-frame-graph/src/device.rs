//! The seam between the frame graph and a graphics API.
//!
//! Everything above this module is backend neutral; [`crate::wgpu_backend`]
//! implements these traits on top of wgpu.

use std::fmt::Debug;

use crate::descriptor_heap::{
    CpuDescriptorHandle, DescriptorHeapDesc, DescriptorHeapKind, GpuDescriptorHandle,
};
use crate::error::Result;
use crate::resource::{ResourceStates, ResourceType, ViewDesc};

pub trait Device: Send + Sync + 'static {
    /// Cheap, clonable handle to a physical resource. Equality is identity.
    type Resource: Clone + PartialEq + Debug + Send + Sync + 'static;
    type DescriptorHeap: Send + Sync + 'static;
    type CommandAllocator: Send + 'static;
    type CommandList: CommandList<Resource = Self::Resource>;

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> Result<Self::DescriptorHeap>;

    /// First CPU handle of the heap, plus the first GPU handle when the heap
    /// is shader visible.
    fn descriptor_heap_start(
        &self,
        heap: &Self::DescriptorHeap,
    ) -> (CpuDescriptorHandle, Option<GpuDescriptorHandle>);

    fn descriptor_increment_size(&self, kind: DescriptorHeapKind) -> u32;

    fn create_committed_resource(
        &self,
        ty: &ResourceType,
        initial_state: ResourceStates,
    ) -> Result<Self::Resource>;

    /// Writes a view of `resource` into the descriptor slot at `destination`.
    fn create_view(&self, resource: &Self::Resource, view: &ViewDesc, destination: CpuDescriptorHandle);

    fn create_command_allocator(&self) -> Result<Self::CommandAllocator>;

    fn reset_command_allocator(&self, allocator: &mut Self::CommandAllocator) -> Result<()>;

    fn create_command_list(&self, allocator: &Self::CommandAllocator) -> Result<Self::CommandList>;
}

pub trait CommandList: Send + 'static {
    type Resource;

    fn transition(&mut self, resource: &Self::Resource, before: ResourceStates, after: ResourceStates);

    fn copy_resource(&mut self, destination: &Self::Resource, source: &Self::Resource);

    fn close(&mut self) -> Result<()>;
}

pub trait CommandQueue: Send + Sync {
    type Device: Device;

    /// Submits the lists in order as one batch.
    fn execute_command_lists(
        &self,
        command_lists: Vec<<Self::Device as Device>::CommandList>,
    ) -> Result<()>;

    fn signal(&self, value: u64) -> Result<()>;

    fn completed_value(&self) -> u64;

    fn wait_for_value(&self, value: u64) -> Result<()>;
}
