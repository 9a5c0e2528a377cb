//! Render context
//!
//! The one place that owns the device, the resource factory and the
//! swapchain. It is built once at startup and passed by reference to
//! everything that records or submits GPU work.

use std::sync::Arc;

use ash::vk;

use crate::backend::{GpuDevice, QueueFamilyIndices, VulkanError, VulkanResult};
use crate::config::RendererConfig;
use crate::resources::ResourceFactory;
use crate::swapchain::{SwapchainManager, SwapchainSettings};

/// Device, factory and swapchain of one renderer
pub struct RenderContext {
    device: Arc<dyn GpuDevice>,
    factory: ResourceFactory,
    swapchain: SwapchainManager,
    config: RendererConfig,
    released: bool,
}

impl RenderContext {
    /// Validate `config`, create the factory and initialize the swapchain
    pub fn new(device: Arc<dyn GpuDevice>, config: RendererConfig) -> VulkanResult<Self> {
        config
            .validate()
            .map_err(|e| VulkanError::InitializationFailed(format!("invalid renderer config: {e}")))?;

        let mut factory = ResourceFactory::new(Arc::clone(&device))?;
        let mut swapchain = SwapchainManager::new(SwapchainSettings::from(&config));
        if let Err(e) = swapchain.initialize(device.as_ref()) {
            factory.release();
            return Err(e);
        }
        log::info!(
            "Render context ready: {}x{}, {} swapchain images, {} frames in flight",
            swapchain.extent().width,
            swapchain.extent().height,
            swapchain.image_count(),
            config.frames_in_flight
        );
        Ok(Self {
            device,
            factory,
            swapchain,
            config,
            released: false,
        })
    }

    /// Device seam
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    /// Queue families of the device
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.device.queue_families()
    }

    /// Resource factory
    pub fn factory(&self) -> &ResourceFactory {
        &self.factory
    }

    /// Resource factory, mutably
    pub fn factory_mut(&mut self) -> &mut ResourceFactory {
        &mut self.factory
    }

    /// Swapchain manager
    pub fn swapchain(&self) -> &SwapchainManager {
        &self.swapchain
    }

    /// Swapchain manager, mutably
    pub fn swapchain_mut(&mut self) -> &mut SwapchainManager {
        &mut self.swapchain
    }

    /// Factory and swapchain borrowed together
    pub fn parts_mut(&mut self) -> (&mut ResourceFactory, &mut SwapchainManager) {
        (&mut self.factory, &mut self.swapchain)
    }

    /// Configuration the context was built from
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Current swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Wait for the device, then destroy every factory resource and the swapchain
    pub fn release(&mut self) -> VulkanResult<()> {
        if self.released {
            return Ok(());
        }
        self.device.wait_idle()?;
        self.factory.release();
        self.swapchain.release(self.device.as_ref());
        self.released = true;
        log::info!("Render context released");
        Ok(())
    }

    /// Whether `release` ran
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        if !self.released {
            log::warn!("Render context dropped without release");
            if let Err(e) = self.release() {
                log::error!("Render context release failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessDevice, ObjectKind};

    #[test]
    fn creates_swapchain_and_releases_everything() {
        let device = Arc::new(HeadlessDevice::new());
        let mut context = RenderContext::new(device.clone(), RendererConfig::default()).unwrap();
        assert_eq!(context.extent(), vk::Extent2D { width: 800, height: 600 });
        assert_eq!(device.live_count(ObjectKind::Swapchain), 1);

        context.release().unwrap();
        context.release().unwrap();
        assert_eq!(device.live_object_count(), 0);
        assert!(device.invalid_destroys().is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let device = Arc::new(HeadlessDevice::new());
        let err = RenderContext::new(device.clone(), RendererConfig::default().with_frames_in_flight(0))
            .err()
            .unwrap();
        assert!(matches!(err, VulkanError::InitializationFailed(_)));
        assert_eq!(device.live_count(ObjectKind::Swapchain), 0);
    }
}
