// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// One slot per frame in flight; the slots live for the whole run and are
// not touched by swap-chain rebuilds.

use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Frames the CPU may queue ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
        };

        // Destroying null handles is a no-op, so a partial slot can be released as-is
        if let Err(e) = sync.create_handles(device) {
            sync.destroy(device);
            return Err(e).context("Failed to create frame synchronization objects");
        }

        Ok(sync)
    }

    fn create_handles(&mut self, device: &ash::Device) -> VkResult<()> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder()
            .flags(vk::FenceCreateFlags::SIGNALED); // first wait must not block

        unsafe {
            self.image_available = device.create_semaphore(&semaphore_info, None)?;
            self.render_finished = device.create_semaphore(&semaphore_info, None)?;
            self.in_flight_fence = device.create_fence(&fence_info, None)?;
        }
        Ok(())
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// All in-flight slots
pub struct FrameSynchronizer {
    slots: Vec<FrameSync>,
    device: Arc<VulkanDevice>,
}

impl FrameSynchronizer {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let mut synchronizer = Self {
            slots: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
            device: device.clone(),
        };

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            synchronizer.slots.push(FrameSync::new(&device.device)?);
        }

        Ok(synchronizer)
    }

    pub fn slot(&self, index: usize) -> &FrameSync {
        &self.slots[index % MAX_FRAMES_IN_FLIGHT]
    }
}

impl Drop for FrameSynchronizer {
    fn drop(&mut self) {
        for sync in &self.slots {
            sync.destroy(&self.device.device);
        }
    }
}
