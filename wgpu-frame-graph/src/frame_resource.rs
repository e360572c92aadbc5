use std::any::Any;
use std::collections::BTreeMap;

use crate::device::CommandQueue;
use crate::error::Result;

type DelayedUpdate = Box<dyn FnOnce(&mut (dyn Any + Send + 'static)) + Send>;

/// Per in-flight frame state guarded by a fence value.
///
/// Resources that the GPU may still read can be registered here and released
/// or updated only after [`wait`](Self::wait) has observed the fence of the
/// frame that used them.
#[derive(Default)]
pub struct FrameResource {
    cpu_fence: u64,
    resources: BTreeMap<String, Box<dyn Any + Send>>,
    delayed_unregisters: Vec<String>,
    delayed_updates: Vec<(String, DelayedUpdate)>,
}

impl FrameResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cpu_fence(&self) -> u64 {
        self.cpu_fence
    }

    pub fn signal<Q: CommandQueue>(&mut self, queue: &Q, cpu_fence: u64) -> Result<()> {
        self.cpu_fence = cpu_fence;
        queue.signal(cpu_fence)
    }

    /// Blocks until the GPU has passed this frame's fence, then applies the
    /// delayed unregisters and updates.
    pub fn wait<Q: CommandQueue>(&mut self, queue: &Q) -> Result<()> {
        if self.cpu_fence != 0 && queue.completed_value() < self.cpu_fence {
            log::trace!("Waiting for fence {}", self.cpu_fence);
            queue.wait_for_value(self.cpu_fence)?;
        }

        for name in std::mem::take(&mut self.delayed_unregisters) {
            self.unregister_resource(&name);
        }
        for (name, update) in std::mem::take(&mut self.delayed_updates) {
            match self.resources.get_mut(&name) {
                Some(resource) => update(&mut **resource),
                None => log::warn!("Delayed update of unknown frame resource '{name}'"),
            }
        }
        Ok(())
    }

    pub fn register_resource<T: Any + Send>(&mut self, name: impl Into<String>, resource: T) -> &mut Self {
        let name = name.into();
        debug_assert!(!self.resources.contains_key(&name), "frame resource '{name}' registered twice");
        self.resources.insert(name, Box::new(resource));
        self
    }

    /// Registers a resource that lives until the next time this frame slot is
    /// waited on.
    pub fn register_temporal_resource<T: Any + Send>(
        &mut self,
        name: impl Into<String>,
        resource: T,
    ) -> &mut Self {
        let name = name.into();
        self.delayed_unregisters.push(name.clone());
        self.register_resource(name, resource)
    }

    pub fn unregister_resource(&mut self, name: &str) -> &mut Self {
        self.resources.remove(name);
        self
    }

    pub fn delay_unregister_resource(&mut self, name: impl Into<String>) -> &mut Self {
        self.delayed_unregisters.push(name.into());
        self
    }

    pub fn delay_update_resource<T, F>(&mut self, name: impl Into<String>, update: F) -> &mut Self
    where
        T: Any + Send,
        F: FnOnce(&mut T) + Send + 'static,
    {
        let name = name.into();
        let label = name.clone();
        self.delayed_updates.push((
            name,
            Box::new(move |resource: &mut (dyn Any + Send + 'static)| match resource.downcast_mut::<T>() {
                Some(resource) => update(resource),
                None => log::warn!("Frame resource '{label}' has an unexpected type"),
            }),
        ));
        self
    }

    pub fn resource<T: Any>(&self, name: &str) -> Option<&T> {
        self.resources.get(name)?.downcast_ref::<T>()
    }

    pub fn resource_mut<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        self.resources.get_mut(name)?.downcast_mut::<T>()
    }

    pub fn has_resource(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }
}

/// Cycles a fixed number of [`FrameResource`]s with a monotonically
/// increasing fence value.
pub struct FrameResourceRing {
    frames: Vec<FrameResource>,
    current: usize,
    cpu_fence: u64,
}

impl FrameResourceRing {
    pub fn new(num_frames: usize) -> Self {
        assert!(num_frames > 0, "a frame ring needs at least one frame");
        Self {
            frames: (0..num_frames).map(|_| FrameResource::new()).collect(),
            current: 0,
            cpu_fence: 0,
        }
    }

    /// Waits until the GPU has finished the frame that last used the current
    /// slot and returns it.
    pub fn begin_frame<Q: CommandQueue>(&mut self, queue: &Q) -> Result<&mut FrameResource> {
        let frame = &mut self.frames[self.current];
        frame.wait(queue)?;
        Ok(frame)
    }

    /// Signals the current slot's fence and advances to the next slot.
    pub fn end_frame<Q: CommandQueue>(&mut self, queue: &Q) -> Result<()> {
        self.cpu_fence += 1;
        self.frames[self.current].signal(queue, self.cpu_fence)?;
        self.current = (self.current + 1) % self.frames.len();
        Ok(())
    }

    pub fn current(&mut self) -> &mut FrameResource {
        &mut self.frames[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn cpu_fence(&self) -> u64 {
        self.cpu_fence
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_lookup_respects_type() {
        let mut frame = FrameResource::new();
        frame.register_resource("constants", vec![1_u32, 2, 3]);
        assert_eq!(frame.resource::<Vec<u32>>("constants"), Some(&vec![1, 2, 3]));
        assert!(frame.resource::<String>("constants").is_none());
        frame.resource_mut::<Vec<u32>>("constants").unwrap().push(4);
        assert_eq!(frame.resource::<Vec<u32>>("constants").unwrap().len(), 4);
        frame.unregister_resource("constants");
        assert!(!frame.has_resource("constants"));
    }
}
