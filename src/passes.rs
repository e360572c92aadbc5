use std::sync::Arc;

use wgpu::{Operations, RenderPassColorAttachment};
use wgpu_frame_graph::wgpu_backend::{WgpuCommandList, WgpuDevice};
use wgpu_frame_graph::{PassResources, ViewDesc};

/// Clears `node` through its render target view.
pub struct ClearPass {
    pub device: Arc<WgpuDevice>,
    pub node: usize,
    pub view: ViewDesc,
    pub color: wgpu::Color,
}

impl ClearPass {
    pub fn record(self, command_list: &mut WgpuCommandList, resources: &PassResources<WgpuDevice>) {
        let Some(target) = resources
            .get(&self.node)
            .and_then(|resource| resource.descriptors.cpu_handle(&self.view))
            .and_then(|handle| self.device.view(handle))
        else {
            log::warn!("Clear pass: resource node {} has no render target view", self.node);
            return;
        };
        let Some(color_view) = target.texture_view() else {
            log::warn!("Clear pass: resource node {} is not a texture", self.node);
            return;
        };
        let Some(encoder) = command_list.encoder() else {
            return;
        };

        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Scene Clear Pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: color_view,
                resolve_target: None,
                ops: Operations {
                    load: wgpu::LoadOp::Clear(self.color),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }
}

/// Color for frame `index`, cycling through a slow gradient.
pub fn frame_color(index: usize) -> wgpu::Color {
    let t = (index % 120) as f64 / 120.0;
    wgpu::Color {
        r: t,
        g: 1.0 - t,
        b: 0.5,
        a: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_colors_wrap() {
        assert_eq!(frame_color(0), frame_color(120));
        assert_eq!(frame_color(0).g, 1.0);
        assert!(frame_color(60).r > 0.49);
    }
}
