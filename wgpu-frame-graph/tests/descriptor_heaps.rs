mod common;

use std::sync::Arc;

use common::{GPU_HANDLE_TAG, MockDevice};
use wgpu_frame_graph::{
    CpuDescriptorHeap, DescriptorHeapConfig, DescriptorHeapContext, DescriptorHeapKind,
    DynamicSuballocator, GpuDescriptorHeap,
};

#[test]
fn cpu_heap_grows_a_new_heap_when_no_heap_fits() {
    let device = MockDevice::new();
    let heap = CpuDescriptorHeap::new(Arc::clone(&device), 4, DescriptorHeapKind::Rtv).unwrap();
    assert_eq!(heap.num_heaps(), 1);

    let first = heap.allocate(3).unwrap();
    assert_eq!(first.manager_id(), 0);
    assert_eq!(first.num_handles(), 3);
    assert!(!first.is_shader_visible());

    let second = heap.allocate(3).unwrap();
    assert_eq!(second.manager_id(), 1);
    assert_eq!(heap.num_heaps(), 2);

    let oversized = heap.allocate(10).unwrap();
    assert_eq!(oversized.manager_id(), 2);
    assert_eq!(oversized.num_handles(), 10);
    assert_eq!(heap.num_heaps(), 3);
    assert_eq!(heap.current_size(), 16);

    drop(oversized);
    drop(second);
    heap.free(first);
    assert_eq!(heap.current_size(), 0);
    assert_eq!(heap.max_size(), 16);

    let reused = heap.allocate(4).unwrap();
    assert_eq!(reused.manager_id(), 0);
    assert_eq!(heap.num_heaps(), 3);
}

#[test]
fn handles_within_an_allocation_step_by_the_increment_size() {
    let device = MockDevice::new();
    let heap = CpuDescriptorHeap::new(Arc::clone(&device), 8, DescriptorHeapKind::Dsv).unwrap();
    assert_eq!(heap.descriptor_size(), 16);

    let allocation = heap.allocate(3).unwrap();
    let base = allocation.cpu_handle(0);
    assert!(!base.is_null());
    assert_eq!(allocation.cpu_handle(2).0, base.0 + 32);
    assert_eq!(allocation.gpu_handle(2), None);

    let next = heap.allocate(2).unwrap();
    assert_eq!(next.cpu_handle(0).0, base.0 + 3 * 16);
}

#[test]
fn dropping_an_allocation_returns_its_slots() {
    let device = MockDevice::new();
    let heap =
        CpuDescriptorHeap::new(Arc::clone(&device), 4, DescriptorHeapKind::CbvSrvUav).unwrap();
    {
        let _a = heap.allocate(2).unwrap();
        let _b = heap.allocate(2).unwrap();
        assert_eq!(heap.current_size(), 4);
    }
    assert_eq!(heap.current_size(), 0);

    let whole = heap.allocate(4).unwrap();
    assert_eq!(whole.manager_id(), 0);
    assert_eq!(heap.num_heaps(), 1);
}

#[test]
fn gpu_heap_splits_static_and_dynamic_regions() {
    let device = MockDevice::new();
    let heap = GpuDescriptorHeap::new(device.as_ref(), 8, 16, DescriptorHeapKind::CbvSrvUav)
        .unwrap();
    assert_eq!(heap.max_static_descriptors(), 8);
    assert_eq!(heap.max_dynamic_descriptors(), 16);

    let fixed = heap.allocate(4);
    assert_eq!(fixed.manager_id(), 0);
    assert!(fixed.is_shader_visible());
    let gpu = fixed.gpu_handle(0).unwrap();
    assert_eq!(gpu.0 & GPU_HANDLE_TAG, GPU_HANDLE_TAG);

    let dynamic = heap.allocate_dynamic(4);
    assert_eq!(dynamic.manager_id(), 1);
    assert_eq!(dynamic.cpu_handle(0).0 - fixed.cpu_handle(0).0, 8 * 32);
    assert_eq!(
        dynamic.gpu_handle(0).unwrap().0 - gpu.0,
        8 * 32,
        "dynamic region starts right after the static region"
    );

    assert!(heap.allocate(5).is_null());
    assert!(heap.allocate_dynamic(13).is_null());
    assert_eq!(heap.num_available_static_descriptors(), 4);
    assert_eq!(heap.num_available_dynamic_descriptors(), 12);

    heap.free(fixed);
    drop(dynamic);
    assert_eq!(heap.num_available_static_descriptors(), 8);
    assert_eq!(heap.num_available_dynamic_descriptors(), 16);
    assert_eq!(heap.max_static_allocated_size(), 4);
}

#[test]
fn dynamic_suballocator_packs_views_into_chunks() {
    let device = MockDevice::new();
    let heap = GpuDescriptorHeap::new(device.as_ref(), 4, 16, DescriptorHeapKind::CbvSrvUav)
        .unwrap();
    let mut suballocator = DynamicSuballocator::new(heap.clone(), 4, "test tables");

    let first = suballocator.allocate(3);
    assert_eq!(suballocator.num_chunks(), 1);
    let second = suballocator.allocate(3);
    assert_eq!(suballocator.num_chunks(), 2, "3 + 3 does not fit a chunk of 4");
    let third = suballocator.allocate(1);
    assert_eq!(suballocator.num_chunks(), 2);
    assert_eq!(third.cpu_handle(0), second.cpu_handle(0).offset(3, 32));
    assert_eq!(
        third.gpu_handle(0),
        second.gpu_handle(0).map(|handle| handle.offset(3, 32))
    );
    assert_eq!(first.manager_id(), 1);

    let large = suballocator.allocate(6);
    assert_eq!(large.num_handles(), 6);
    assert_eq!(suballocator.num_chunks(), 3);
    assert_eq!(suballocator.current_descriptor_count(), 13);
    assert_eq!(suballocator.current_suballocations_total_size(), 14);
    assert_eq!(heap.num_available_dynamic_descriptors(), 2);

    drop(first);
    assert_eq!(
        heap.num_available_dynamic_descriptors(),
        2,
        "views carved from a chunk release nothing"
    );

    assert!(suballocator.allocate(4).is_null());

    suballocator.release_allocations();
    assert_eq!(suballocator.num_chunks(), 0);
    assert_eq!(suballocator.current_descriptor_count(), 0);
    assert_eq!(suballocator.peak_descriptor_count(), 13);
    assert_eq!(suballocator.peak_suballocations_total_size(), 14);
    assert_eq!(heap.num_available_dynamic_descriptors(), 16);
}

#[test]
fn heap_context_builds_every_heap_from_config() {
    let device = MockDevice::new();
    let config = DescriptorHeapConfig::default()
        .with_cpu_heap_sizes(32, 4, 2)
        .with_gpu_heap_sizes(64, 128);
    let heaps = DescriptorHeapContext::new(&device, &config).unwrap();

    assert_eq!(heaps.cbv_srv_uav_cpu().kind(), DescriptorHeapKind::CbvSrvUav);
    assert_eq!(heaps.rtv_cpu().kind(), DescriptorHeapKind::Rtv);
    assert_eq!(heaps.dsv_cpu().kind(), DescriptorHeapKind::Dsv);
    assert_eq!(heaps.cbv_srv_uav_gpu().max_static_descriptors(), 64);
    assert_eq!(heaps.cbv_srv_uav_gpu().max_dynamic_descriptors(), 128);
    assert!(heaps.cpu_heap(DescriptorHeapKind::Sampler).is_none());
    assert_eq!(
        heaps.cpu_heap(DescriptorHeapKind::Rtv).map(|heap| heap.descriptor_size()),
        Some(16)
    );

    let rtvs = heaps.rtv_cpu().allocate(6).unwrap();
    assert_eq!(heaps.rtv_cpu().num_heaps(), 2);
    drop(rtvs);
}

#[test]
fn empty_requests_on_a_full_chunk_return_a_null_view() {
    let device = MockDevice::new();
    let heap = GpuDescriptorHeap::new(device.as_ref(), 4, 8, DescriptorHeapKind::CbvSrvUav)
        .unwrap();
    let mut suballocator = DynamicSuballocator::new(heap.clone(), 4, "full chunk");

    let full = suballocator.allocate(4);
    assert_eq!(full.num_handles(), 4);
    let empty = suballocator.allocate(0);
    assert!(empty.is_null());
    assert_eq!(suballocator.num_chunks(), 1);
    assert_eq!(suballocator.current_descriptor_count(), 4);
}

#[test]
fn freeing_a_suballocated_view_leaves_the_chunk_reserved() {
    let device = MockDevice::new();
    let heap = GpuDescriptorHeap::new(device.as_ref(), 4, 16, DescriptorHeapKind::CbvSrvUav)
        .unwrap();
    let mut suballocator = DynamicSuballocator::new(heap.clone(), 4, "tables");

    let view = suballocator.allocate(2);
    assert!(!view.is_owned());
    assert_eq!(heap.num_available_dynamic_descriptors(), 12);

    heap.free(view);
    assert_eq!(heap.num_available_dynamic_descriptors(), 12);

    let next = suballocator.allocate(2);
    assert!(!next.is_null());
    assert_eq!(heap.num_available_dynamic_descriptors(), 12);

    suballocator.release_allocations();
    assert_eq!(heap.num_available_dynamic_descriptors(), 16);
}
