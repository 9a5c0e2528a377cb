//! Window surface creation
//!
//! The core never talks to a window system directly. A [`SurfaceProvider`]
//! names the instance extensions the window system needs and creates the
//! `VkSurfaceKHR` once the instance exists.

use std::ffi::{CStr, CString};

use ash::{vk, Entry, Instance};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

use crate::backend::{VulkanError, VulkanResult};

/// Source of a presentation surface
pub trait SurfaceProvider {
    /// Instance extensions required to create the surface
    fn required_instance_extensions(&self) -> VulkanResult<Vec<CString>>;

    /// Create the surface for `instance`
    fn create_surface(&self, entry: &Entry, instance: &Instance) -> VulkanResult<vk::SurfaceKHR>;

    /// Current drawable size in pixels
    fn framebuffer_size(&self) -> (u32, u32);
}

/// Surface provider for any window exposing raw window handles
pub struct RawWindowSurface<'w, W> {
    window: &'w W,
    size: (u32, u32),
}

impl<'w, W> RawWindowSurface<'w, W>
where
    W: HasRawWindowHandle + HasRawDisplayHandle,
{
    /// Wrap a window whose drawable is `size` pixels
    pub fn new(window: &'w W, size: (u32, u32)) -> Self {
        Self { window, size }
    }
}

impl<W> SurfaceProvider for RawWindowSurface<'_, W>
where
    W: HasRawWindowHandle + HasRawDisplayHandle,
{
    fn required_instance_extensions(&self) -> VulkanResult<Vec<CString>> {
        let names = ash_window::enumerate_required_extensions(self.window.raw_display_handle())
            .map_err(VulkanError::Api)?;
        Ok(names
            .iter()
            .map(|&name| unsafe { CStr::from_ptr(name) }.to_owned())
            .collect())
    }

    fn create_surface(&self, entry: &Entry, instance: &Instance) -> VulkanResult<vk::SurfaceKHR> {
        unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.window.raw_display_handle(),
                self.window.raw_window_handle(),
                None,
            )
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to create surface: {e:?}")))
        }
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        self.size
    }
}
