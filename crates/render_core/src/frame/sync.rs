//! Frame synchronization objects
//!
//! Acquire semaphores and fences are per frame in flight. Render-finished
//! semaphores are per swapchain image, since presentation of an image may
//! still wait on one after its frame slot comes around again.
//!
//! A failed acquire or present can leave a semaphore with a pending signal or
//! wait, so resizing replaces every semaphore instead of reusing them.

use crate::backend::{VulkanError, VulkanResult};
use crate::resources::{FenceHandle, ResourceFactory, SemaphoreHandle};

/// Objects owned by one frame-in-flight slot
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    /// Signaled when the acquired image may be rendered to
    pub image_available: SemaphoreHandle,
    /// Signaled when the slot's submission has executed
    pub in_flight: FenceHandle,
}

/// Semaphores and fences for every frame slot and swapchain image
#[derive(Debug)]
pub struct FrameSync {
    slots: Vec<FrameSlot>,
    render_finished: Vec<SemaphoreHandle>,
}

impl FrameSync {
    /// Create `frames_in_flight` slots and one render-finished semaphore per
    /// swapchain image. Fences start signaled so the first wait returns.
    pub fn new(factory: &mut ResourceFactory, frames_in_flight: usize, image_count: usize) -> VulkanResult<Self> {
        let mut slots = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            slots.push(FrameSlot {
                image_available: factory.create_semaphore()?,
                in_flight: factory.create_fence(true)?,
            });
        }
        let render_finished = create_semaphores(factory, image_count)?;
        log::debug!(
            "Frame sync created: {} slots, {} image semaphores",
            slots.len(),
            render_finished.len()
        );
        Ok(Self { slots, render_finished })
    }

    /// Objects of a frame slot
    pub fn slot(&self, frame_slot: usize) -> VulkanResult<FrameSlot> {
        self.slots
            .get(frame_slot)
            .copied()
            .ok_or_else(|| VulkanError::not_found("frame slot", frame_slot))
    }

    /// Render-finished semaphore of a swapchain image
    pub fn render_finished(&self, image_index: u32) -> VulkanResult<SemaphoreHandle> {
        self.render_finished
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| VulkanError::not_found("render-finished semaphore", image_index))
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Replace every semaphore for a recreated swapchain with `image_count`
    /// images. Call only after the device is idle; fences are kept.
    pub fn recreate_semaphores(&mut self, factory: &mut ResourceFactory, image_count: usize) -> VulkanResult<()> {
        for slot in &mut self.slots {
            let fresh = factory.create_semaphore()?;
            factory.destroy_semaphore(std::mem::replace(&mut slot.image_available, fresh))?;
        }
        for semaphore in self.render_finished.drain(..) {
            factory.destroy_semaphore(semaphore)?;
        }
        self.render_finished = create_semaphores(factory, image_count)?;
        log::debug!(
            "Frame sync semaphores recreated: {} slots, {} images",
            self.slots.len(),
            self.render_finished.len()
        );
        Ok(())
    }

    /// Acquire semaphores of every slot, in slot order
    pub fn image_available_semaphores(&self) -> Vec<SemaphoreHandle> {
        self.slots.iter().map(|slot| slot.image_available).collect()
    }

    /// Destroy every semaphore and fence
    pub fn release(&mut self, factory: &mut ResourceFactory) -> VulkanResult<()> {
        for slot in self.slots.drain(..) {
            factory.destroy_semaphore(slot.image_available)?;
            factory.destroy_fence(slot.in_flight)?;
        }
        for semaphore in self.render_finished.drain(..) {
            factory.destroy_semaphore(semaphore)?;
        }
        Ok(())
    }
}

fn create_semaphores(factory: &mut ResourceFactory, count: usize) -> VulkanResult<Vec<SemaphoreHandle>> {
    (0..count).map(|_| factory.create_semaphore()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GpuDevice, HeadlessDevice, ObjectKind};
    use std::sync::Arc;

    #[test]
    fn fences_start_signaled() {
        let device = Arc::new(HeadlessDevice::new());
        let mut factory = ResourceFactory::new(device.clone() as Arc<dyn GpuDevice>).unwrap();
        let sync = FrameSync::new(&mut factory, 2, 3).unwrap();

        let fence = factory.fence(sync.slot(1).unwrap().in_flight).unwrap();
        assert!(device.wait_for_fences(&[fence], u64::MAX).is_ok());
        assert!(sync.slot(2).is_err());
        assert!(sync.render_finished(2).is_ok());
        assert!(sync.render_finished(3).is_err());
    }

    #[test]
    fn image_semaphores_follow_swapchain() {
        let device = Arc::new(HeadlessDevice::new());
        let mut factory = ResourceFactory::new(device.clone() as Arc<dyn GpuDevice>).unwrap();
        let mut sync = FrameSync::new(&mut factory, 2, 3).unwrap();
        assert_eq!(device.live_count(ObjectKind::Semaphore), 5);
        let acquire_before = sync.image_available_semaphores();
        let fence_before = sync.slot(0).unwrap().in_flight;

        sync.recreate_semaphores(&mut factory, 4).unwrap();
        assert_eq!(device.live_count(ObjectKind::Semaphore), 6);
        assert!(sync.render_finished(3).is_ok());
        let acquire_after = sync.image_available_semaphores();
        assert!(acquire_after.iter().all(|s| !acquire_before.contains(s)));
        assert_eq!(sync.slot(0).unwrap().in_flight, fence_before);
        assert!(device.invalid_destroys().is_empty());

        sync.release(&mut factory).unwrap();
        assert_eq!(device.live_count(ObjectKind::Semaphore), 0);
        assert_eq!(device.live_count(ObjectKind::Fence), 0);
        factory.release();
    }
}
