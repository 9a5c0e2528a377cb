//! Swapchain manager
//!
//! Owns the presentable image chain, one view per image and the paired depth
//! buffer. The manager moves through
//! `Uninitialized → Initialized → (Acquired ⇄ Presented) → Released`; it is
//! recreated wholesale on resize and never resized in place.

mod policy;

pub use policy::{choose_image_count, choose_present_mode, choose_surface_format, choose_swap_extent, sharing_families};

use ash::vk;

use crate::backend::{GpuDevice, ImageDesc, ImageViewDesc, QueueType, SwapchainDesc, VulkanError, VulkanResult};
use crate::config::{PresentModePreference, RendererConfig};

/// Depth format paired with the swapchain; carries stencil for masked passes
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT_S8_UINT;

/// Lifecycle state of the swapchain manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    /// Nothing created yet
    Uninitialized,
    /// Created, no image acquired
    Initialized,
    /// An image is acquired and awaits presentation
    Acquired,
    /// The last acquired image was presented
    Presented,
    /// All objects destroyed
    Released,
}

/// Settings read once per initialization
#[derive(Debug, Clone, Copy)]
pub struct SwapchainSettings {
    /// Extent used when the surface leaves the choice to the application
    pub requested_extent: vk::Extent2D,
    /// Configured lower bound on image count
    pub minimum_image_count: u32,
    /// Preferred present mode
    pub present_mode: PresentModePreference,
}

impl From<&RendererConfig> for SwapchainSettings {
    fn from(config: &RendererConfig) -> Self {
        Self {
            requested_extent: vk::Extent2D {
                width: config.desired_resolution.0,
                height: config.desired_resolution.1,
            },
            minimum_image_count: config.minimum_image_count,
            present_mode: config.present_mode,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DepthBuffer {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

/// Presentable image chain with its depth buffer
pub struct SwapchainManager {
    settings: SwapchainSettings,
    state: SwapchainState,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: Option<DepthBuffer>,
    extent: vk::Extent2D,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    image_index: u32,
    suboptimal: bool,
}

impl SwapchainManager {
    /// Create an uninitialized manager
    pub fn new(settings: SwapchainSettings) -> Self {
        Self {
            settings,
            state: SwapchainState::Uninitialized,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            views: Vec::new(),
            depth: None,
            extent: vk::Extent2D::default(),
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            image_index: 0,
            suboptimal: false,
        }
    }

    /// Query the surface and create the swapchain, its views and the depth buffer
    pub fn initialize(&mut self, device: &dyn GpuDevice) -> VulkanResult<()> {
        if !matches!(self.state, SwapchainState::Uninitialized | SwapchainState::Released) {
            return Err(VulkanError::invalid(format!("initialize from {:?}", self.state)));
        }

        let capabilities = device.surface_capabilities()?;
        let extent = choose_swap_extent(&capabilities, self.settings.requested_extent);
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::invalid("surface has a zero-sized extent"));
        }
        let image_count = choose_image_count(&capabilities, self.settings.minimum_image_count);
        let format = choose_surface_format(&device.surface_formats()?)
            .ok_or_else(|| VulkanError::InitializationFailed("surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&device.surface_present_modes()?, self.settings.present_mode);

        let desc = SwapchainDesc {
            min_image_count: image_count,
            format,
            extent,
            present_mode,
            pre_transform: capabilities.current_transform,
            shared_queue_families: sharing_families(device.queue_families()),
            old_swapchain: vk::SwapchainKHR::null(),
        };
        let swapchain = device.create_swapchain(&desc)?;
        let mut views = Vec::new();
        let created = device
            .swapchain_images(swapchain)
            .and_then(|images| {
                create_image_views(device, &images, format.format, &mut views)?;
                Ok(images)
            })
            .and_then(|images| Ok((images, create_depth_buffer(device, extent)?)));
        let (images, depth) = match created {
            Ok(created) => created,
            Err(e) => {
                for view in views {
                    device.destroy_image_view(view);
                }
                device.destroy_swapchain(swapchain);
                log::error!("Swapchain creation failed: {}", e);
                return Err(e);
            }
        };

        log::info!(
            "Swapchain created: {}x{}, {} images (requested {}), {:?}, {:?}",
            extent.width,
            extent.height,
            images.len(),
            image_count,
            format.format,
            present_mode
        );

        self.swapchain = swapchain;
        self.images = images;
        self.views = views;
        self.depth = Some(depth);
        self.extent = extent;
        self.format = format;
        self.present_mode = present_mode;
        self.image_index = 0;
        self.suboptimal = false;
        self.state = SwapchainState::Initialized;
        Ok(())
    }

    /// Blocking acquire of the next image, signaling `image_available`.
    ///
    /// A suboptimal image counts as acquired; it is rendered and presented,
    /// and [`Self::present`] then asks for recreation.
    pub fn update_next_image_index(&mut self, device: &dyn GpuDevice, image_available: vk::Semaphore) -> VulkanResult<u32> {
        if !matches!(self.state, SwapchainState::Initialized | SwapchainState::Presented) {
            return Err(VulkanError::invalid(format!("acquire from {:?}", self.state)));
        }
        let (index, suboptimal) = device.acquire_next_image(self.swapchain, u64::MAX, image_available)?;
        if suboptimal && !self.suboptimal {
            log::debug!("Swapchain image {} acquired suboptimal", index);
        }
        log::trace!("Acquired swapchain image {}", index);
        self.suboptimal |= suboptimal;
        self.image_index = index;
        self.state = SwapchainState::Acquired;
        Ok(index)
    }

    /// Present the current image once `render_finished` signals.
    ///
    /// Reports [`VulkanError::SwapchainOutOfDate`] after presenting when the
    /// image was acquired suboptimal.
    pub fn present(&mut self, device: &dyn GpuDevice, render_finished: vk::Semaphore) -> VulkanResult<()> {
        if self.state != SwapchainState::Acquired {
            return Err(VulkanError::invalid(format!("present from {:?}", self.state)));
        }
        // The image is handed back to the presentation engine even when presenting reports out-of-date
        self.state = SwapchainState::Presented;
        device.queue_present(self.swapchain, self.image_index, &[render_finished])?;
        if self.suboptimal {
            return Err(VulkanError::SwapchainOutOfDate);
        }
        Ok(())
    }

    /// Whether an acquire reported the swapchain as suboptimal
    pub fn is_suboptimal(&self) -> bool {
        self.suboptimal
    }

    /// Destroy depth buffer, image views, then the swapchain
    pub fn release(&mut self, device: &dyn GpuDevice) {
        if matches!(self.state, SwapchainState::Uninitialized | SwapchainState::Released) {
            return;
        }
        if let Some(depth) = self.depth.take() {
            device.destroy_image_view(depth.view);
            device.destroy_image(depth.image);
            device.free_memory(depth.memory);
        }
        for view in self.views.drain(..) {
            device.destroy_image_view(view);
        }
        self.images.clear();
        device.destroy_swapchain(self.swapchain);
        self.swapchain = vk::SwapchainKHR::null();
        self.state = SwapchainState::Released;
        log::debug!("Swapchain released");
    }

    /// Wait for idle, release everything and initialize again at `requested_extent`
    pub fn recreate(&mut self, device: &dyn GpuDevice, requested_extent: vk::Extent2D) -> VulkanResult<()> {
        if self.state == SwapchainState::Uninitialized {
            return Err(VulkanError::invalid("recreate before initialize"));
        }
        device.wait_idle()?;
        device.queue_wait_idle(QueueType::Present)?;
        self.release(device);
        self.settings.requested_extent = requested_extent;
        self.initialize(device)
    }

    /// Current state
    pub fn state(&self) -> SwapchainState {
        self.state
    }

    /// Swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Swap extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Present mode in use
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Number of images in the chain
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Swapchain images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// One view per swapchain image
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.views
    }

    /// View of the paired depth buffer
    pub fn depth_view(&self) -> Option<vk::ImageView> {
        self.depth.map(|d| d.view)
    }

    /// Image index of the last acquire
    pub fn current_image_index(&self) -> u32 {
        self.image_index
    }
}

/// Push one color view per image into `views`; on failure `views` holds the
/// ones created so far
fn create_image_views(
    device: &dyn GpuDevice,
    images: &[vk::Image],
    format: vk::Format,
    views: &mut Vec<vk::ImageView>,
) -> VulkanResult<()> {
    views.reserve(images.len());
    for &image in images {
        views.push(device.create_image_view(&ImageViewDesc {
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            aspect: vk::ImageAspectFlags::COLOR,
            mip_levels: 1,
            array_layers: 1,
        })?);
    }
    Ok(())
}

fn create_depth_buffer(device: &dyn GpuDevice, extent: vk::Extent2D) -> VulkanResult<DepthBuffer> {
    let image = device.create_image(&ImageDesc {
        extent,
        format: DEPTH_FORMAT,
        mip_levels: 1,
        array_layers: 1,
        usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        flags: vk::ImageCreateFlags::empty(),
    })?;
    let memory = match device.allocate_memory(
        device.image_memory_requirements(image),
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    ) {
        Ok(memory) => memory,
        Err(e) => {
            device.destroy_image(image);
            return Err(e);
        }
    };
    let view = device.bind_image_memory(image, memory).and_then(|()| {
        device.create_image_view(&ImageViewDesc {
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: DEPTH_FORMAT,
            aspect: vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            mip_levels: 1,
            array_layers: 1,
        })
    });
    match view {
        Ok(view) => Ok(DepthBuffer { image, memory, view }),
        Err(e) => {
            device.destroy_image(image);
            device.free_memory(memory);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceCall, HeadlessDevice, ObjectKind, SimulatedSurface};
    use ash::vk::Handle;

    fn settings(width: u32, height: u32, minimum: u32) -> SwapchainSettings {
        SwapchainSettings {
            requested_extent: vk::Extent2D { width, height },
            minimum_image_count: minimum,
            present_mode: PresentModePreference::Mailbox,
        }
    }

    fn fixed_range_surface() -> SimulatedSurface {
        let fixed = vk::Extent2D { width: 800, height: 600 };
        let mut surface = SimulatedSurface::undefined_extent(fixed, fixed);
        surface.capabilities.min_image_count = 2;
        surface.capabilities.max_image_count = 0;
        surface
    }

    #[test]
    fn sentinel_surface_clamps_requested_resolution() {
        let device = HeadlessDevice::with_surface(fixed_range_surface());
        let mut swapchain = SwapchainManager::new(settings(1920, 1080, 3));
        swapchain.initialize(&device).unwrap();

        assert_eq!((swapchain.extent().width, swapchain.extent().height), (800, 600));
        assert_eq!(swapchain.image_count(), 3);
        assert_eq!(swapchain.image_views().len(), 3);
        assert!(swapchain.depth_view().is_some());
        assert_eq!(swapchain.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(device.last_swapchain_desc().unwrap().min_image_count, 3);
    }

    #[test]
    fn acquire_present_alternate() {
        let device = HeadlessDevice::new();
        let mut swapchain = SwapchainManager::new(settings(800, 600, 2));
        let semaphore = device.create_semaphore().unwrap();
        assert!(swapchain.update_next_image_index(&device, semaphore).is_err());

        swapchain.initialize(&device).unwrap();
        assert!(swapchain.present(&device, semaphore).is_err());
        assert_eq!(swapchain.update_next_image_index(&device, semaphore).unwrap(), 0);
        assert!(swapchain.update_next_image_index(&device, semaphore).is_err());
        swapchain.present(&device, semaphore).unwrap();
        assert_eq!(swapchain.state(), SwapchainState::Presented);
        assert_eq!(swapchain.update_next_image_index(&device, semaphore).unwrap(), 1);
        assert_eq!(swapchain.current_image_index(), 1);
    }

    #[test]
    fn release_destroys_depth_then_views_then_swapchain() {
        let device = HeadlessDevice::new();
        let mut swapchain = SwapchainManager::new(settings(800, 600, 2));
        swapchain.initialize(&device).unwrap();
        let depth_view = swapchain.depth_view().unwrap().as_raw();
        let views: Vec<u64> = swapchain.image_views().iter().map(|v| v.as_raw()).collect();
        let handle = swapchain.handle().as_raw();
        device.clear_calls();

        swapchain.release(&device);
        let destroyed: Vec<(ObjectKind, u64)> = device
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                DeviceCall::Destroyed(kind, raw) => Some((kind, raw)),
                _ => None,
            })
            .collect();

        assert_eq!(destroyed[0], (ObjectKind::ImageView, depth_view));
        assert_eq!(destroyed[1].0, ObjectKind::Image);
        assert_eq!(destroyed[2].0, ObjectKind::Memory);
        let view_positions: Vec<usize> = views
            .iter()
            .map(|v| destroyed.iter().position(|d| *d == (ObjectKind::ImageView, *v)).unwrap())
            .collect();
        let swapchain_position = destroyed
            .iter()
            .position(|d| *d == (ObjectKind::Swapchain, handle))
            .unwrap();
        assert!(view_positions.iter().all(|&p| p > 2 && p < swapchain_position));
        assert_eq!(swapchain_position, destroyed.len() - 1);
        assert_eq!(device.live_object_count(), 0);
        assert_eq!(swapchain.state(), SwapchainState::Released);
    }

    #[test]
    fn recreate_rebuilds_for_new_surface() {
        let device = HeadlessDevice::new();
        let mut swapchain = SwapchainManager::new(settings(800, 600, 2));
        swapchain.initialize(&device).unwrap();
        let old = swapchain.handle();

        device.set_surface(SimulatedSurface::fixed(1280, 720));
        swapchain.recreate(&device, vk::Extent2D { width: 1280, height: 720 }).unwrap();
        assert_ne!(swapchain.handle(), old);
        assert_eq!((swapchain.extent().width, swapchain.extent().height), (1280, 720));
        assert_eq!(swapchain.state(), SwapchainState::Initialized);
        assert!(device.invalid_destroys().is_empty());
    }

    #[test]
    fn failed_view_creation_destroys_partial_chain() {
        let device = HeadlessDevice::new();
        let mut swapchain = SwapchainManager::new(settings(800, 600, 3));
        device.fail_image_view_after(1);
        assert!(swapchain.initialize(&device).is_err());
        assert_eq!(swapchain.state(), SwapchainState::Uninitialized);
        assert_eq!(device.live_object_count(), 0);
        assert!(device.invalid_destroys().is_empty());

        swapchain.initialize(&device).unwrap();
        assert_eq!(swapchain.image_views().len(), swapchain.image_count());
    }

    #[test]
    fn failed_depth_view_destroys_color_views_and_depth_image() {
        let device = HeadlessDevice::new();
        let mut swapchain = SwapchainManager::new(settings(800, 600, 2));
        device.fail_image_view_after(2);
        assert!(swapchain.initialize(&device).is_err());
        assert_eq!(device.live_object_count(), 0);
        assert!(device.invalid_destroys().is_empty());
    }

    #[test]
    fn suboptimal_acquire_renders_then_reports_out_of_date() {
        let device = HeadlessDevice::new();
        let mut swapchain = SwapchainManager::new(settings(800, 600, 2));
        swapchain.initialize(&device).unwrap();
        let semaphore = device.create_semaphore().unwrap();
        device.fail_next_acquire(vk::Result::SUBOPTIMAL_KHR);

        assert_eq!(swapchain.update_next_image_index(&device, semaphore).unwrap(), 0);
        assert!(swapchain.is_suboptimal());
        assert!(matches!(
            swapchain.present(&device, semaphore),
            Err(VulkanError::SwapchainOutOfDate)
        ));
        assert!(device
            .calls()
            .iter()
            .any(|call| matches!(call, DeviceCall::Present { image_index: 0, .. })));

        swapchain.recreate(&device, vk::Extent2D { width: 800, height: 600 }).unwrap();
        assert!(!swapchain.is_suboptimal());
    }

    #[test]
    fn out_of_date_acquire_surfaces_as_error() {
        let device = HeadlessDevice::new();
        let mut swapchain = SwapchainManager::new(settings(800, 600, 2));
        swapchain.initialize(&device).unwrap();
        let semaphore = device.create_semaphore().unwrap();
        device.fail_next_acquire(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(matches!(
            swapchain.update_next_image_index(&device, semaphore),
            Err(VulkanError::SwapchainOutOfDate)
        ));
        assert_eq!(swapchain.state(), SwapchainState::Initialized);
    }
}
