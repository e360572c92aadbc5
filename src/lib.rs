mod passes;

use std::sync::Arc;

use parking_lot::Mutex;
use wgpu_frame_graph::wgpu_backend::{WgpuDevice, WgpuQueue, WgpuResource};
use wgpu_frame_graph::{
    CommandQueue, CompiledSchedule, DescriptorHeapConfig, DescriptorHeapContext, Executor, ExecutorConfig,
    Format, FrameGraph, FrameGraphError, FrameResourceRing, ResourceFlags, ResourceManager,
    ResourceManagerConfig, ResourceStates, ResourceType, RtvDesc, ViewDesc,
};

use crate::passes::{ClearPass, frame_color};

#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error("No suitable GPU adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),

    #[error("Failed to request a device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error(transparent)]
    FrameGraph(#[from] FrameGraphError),

    #[error("Frame graph registration is incomplete")]
    IncompleteRegistration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoConfig {
    pub frames: usize,
    pub frames_in_flight: usize,
    pub width: u32,
    pub height: u32,
    pub worker_threads: usize,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            frames: 240,
            frames_in_flight: 2,
            width: 1280,
            height: 720,
            worker_threads: ExecutorConfig::default().worker_threads,
        }
    }
}

impl DemoConfig {
    /// Defaults overridden by `FRAME_GRAPH_FRAMES` and `FRAME_GRAPH_THREADS`.
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
        };
        let defaults = Self::default();
        Self {
            frames: read("FRAME_GRAPH_FRAMES").unwrap_or(defaults.frames),
            worker_threads: read("FRAME_GRAPH_THREADS")
                .unwrap_or(defaults.worker_threads)
                .max(1),
            ..defaults
        }
    }
}

pub struct Gpu {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl Gpu {
    pub async fn new_async() -> Result<Self, DemoError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;
        log::info!("Using adapter: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("WGPU Device"),
                memory_hints: wgpu::MemoryHints::default(),
                required_features: wgpu::Features::default(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                trace: wgpu::Trace::Off,
            })
            .await?;
        Ok(Self { device, queue })
    }
}

/// Resource and pass nodes of the demo graph:
/// `scene -> scene_color`, `blit: scene_color -> blit_color`,
/// `blit_color` moved onto `final_color`, `present: final_color -> output`.
struct DemoGraph {
    graph: FrameGraph,
    schedule: CompiledSchedule,
    scene_color: usize,
    blit_color: usize,
    final_color: usize,
    output: usize,
    scene: usize,
    blit: usize,
    present: usize,
}

impl DemoGraph {
    fn new() -> Result<Self, FrameGraphError> {
        let mut graph = FrameGraph::new();
        let scene_color = graph.register_resource_node("scene_color");
        let blit_color = graph.register_resource_node("blit_color");
        let final_color = graph.register_resource_node("final_color");
        let output = graph.register_resource_node("output");

        let scene = graph.register_pass_node("scene", vec![], vec![scene_color]);
        let blit = graph.register_pass_node("blit", vec![scene_color], vec![blit_color]);
        let present = graph.register_pass_node("present", vec![final_color], vec![output]);
        graph.register_move_node(final_color, blit_color);

        let schedule = graph.compile()?;
        log::info!("Frame graph compiled: {:?}", schedule.sorted_passes);

        Ok(Self {
            graph,
            schedule,
            scene_color,
            blit_color,
            final_color,
            output,
            scene,
            blit,
            present,
        })
    }
}

pub fn run(config: &DemoConfig) -> Result<(), DemoError> {
    let gpu = pollster::block_on(Gpu::new_async())?;
    let device = Arc::new(WgpuDevice::new(gpu.device.clone()));
    let queue = WgpuQueue::new(gpu.device.clone(), gpu.queue.clone());

    let heaps = Arc::new(DescriptorHeapContext::new(
        &device,
        &DescriptorHeapConfig::default(),
    )?);
    let resources = Mutex::new(ResourceManager::new(
        Arc::clone(&device),
        Arc::clone(&heaps),
        &ResourceManagerConfig::default(),
    ));
    let mut executor = Executor::new(
        Arc::clone(&device),
        &ExecutorConfig::default().with_worker_threads(config.worker_threads),
    )?;
    let mut frames = FrameResourceRing::new(config.frames_in_flight);

    let demo = DemoGraph::new()?;
    let color_type = ResourceType::texture_2d(Format::Rgba8Unorm, config.width, config.height)
        .with_flags(ResourceFlags::ALLOW_RENDER_TARGET);
    let output = WgpuResource::Texture(Arc::new(gpu.device.create_texture(
        &wgpu::TextureDescriptor {
            label: Some("Output Texture"),
            size: wgpu::Extent3d {
                width: config.width,
                height: config.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        },
    )));
    let rtv = ViewDesc::Rtv(RtvDesc::texture_2d(Format::Rgba8Unorm));

    for index in 0..config.frames {
        let frame = frames.begin_frame(&queue)?;
        frame.register_temporal_resource("frame index", index);

        resources.lock().new_frame(queue.completed_value());
        executor.new_frame()?;

        {
            let mut resources = resources.lock();
            resources
                .register_temporal_resource_auto_clear(demo.scene_color, color_type)
                .register_temporal_resource(demo.blit_color, color_type)
                .register_temporal_resource(demo.final_color, color_type)
                .register_imported_resource(demo.output, output.clone(), ResourceStates::COMMON)
                .register_pass_resource(
                    demo.scene,
                    demo.scene_color,
                    ResourceStates::RENDER_TARGET,
                    rtv,
                )
                .register_pass_resource_state(demo.blit, demo.scene_color, ResourceStates::COPY_SOURCE)
                .register_pass_resource_state(demo.blit, demo.blit_color, ResourceStates::COPY_DEST)
                .register_pass_resource_state(
                    demo.present,
                    demo.final_color,
                    ResourceStates::COPY_SOURCE,
                )
                .register_pass_resource_state(demo.present, demo.output, ResourceStates::COPY_DEST);
            if !resources.check_complete(&demo.graph) {
                return Err(DemoError::IncompleteRegistration);
            }
        }

        let clear = ClearPass {
            device: Arc::clone(&device),
            node: demo.scene_color,
            view: rtv,
            color: frame_color(index),
        };
        executor
            .register_pass_fn(demo.scene, move |command_list, pass_resources| {
                clear.record(command_list, pass_resources);
            })
            .register_copy_pass_from_graph(&demo.graph, demo.blit)?
            .register_copy_pass_from_graph(&demo.graph, demo.present)?;

        executor.execute(&queue, &demo.schedule, &resources)?;
        frames.end_frame(&queue)?;
        resources.lock().end_frame(frames.cpu_fence());

        if index % 60 == 0 {
            log::info!("Frame {index} submitted (fence {})", frames.cpu_fence());
        }
    }

    queue.wait_for_value(frames.cpu_fence())?;
    let resources = resources.lock();
    log::info!(
        "Done: {} frames, {} resources created, {} pooled, RTV peak {} slots",
        config.frames,
        resources.num_created_resources(),
        resources.num_pooled_resources(),
        heaps.rtv_cpu().max_size()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_graph_moves_the_blit_target_onto_the_final_target() {
        let demo = DemoGraph::new().unwrap();
        assert_eq!(
            demo.schedule.sorted_passes,
            vec![demo.scene, demo.blit, demo.present]
        );

        let blit = demo.schedule.info(demo.blit).unwrap();
        assert_eq!(blit.construct_resources, vec![demo.blit_color]);
        assert_eq!(blit.move_resources, vec![demo.blit_color]);
        assert_eq!(blit.destruct_resources, vec![demo.scene_color]);

        let present = demo.schedule.info(demo.present).unwrap();
        assert_eq!(present.construct_resources, vec![demo.output]);
        assert_eq!(
            present.destruct_resources,
            vec![demo.final_color, demo.output]
        );
        assert!(demo.schedule.prelude.is_empty());
    }

    #[test]
    fn default_config_runs_two_frames_in_flight_on_at_least_one_thread() {
        let config = DemoConfig::default();
        assert!(config.worker_threads >= 1);
        assert_eq!(config.frames_in_flight, 2);
    }
}
