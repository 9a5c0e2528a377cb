//! GLFW window and its Vulkan surface handshake

use std::ffi::CString;

use ash::{vk, Entry, Instance};
use render_core::backend::vulkan::SurfaceProvider;
use render_core::backend::{VulkanError, VulkanResult};
use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    #[error("GLFW initialization failed")]
    InitializationFailed,

    #[error("Window creation failed")]
    CreationFailed,
}

/// GLFW window created without a client API
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    pub fn new(title: &str, width: u32, height: u32) -> Result<Self, WindowError> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        // Vulkan, no OpenGL context
        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;
        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self { glfw, window, events })
    }

    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
    }

    /// Block until an event arrives, used while minimized
    pub fn wait_events(&mut self) {
        self.glfw.wait_events();
    }

    pub fn flush_events(&self) -> glfw::FlushedMessages<'_, (f64, glfw::WindowEvent)> {
        glfw::flush_messages(&self.events)
    }
}

impl SurfaceProvider for Window {
    fn required_instance_extensions(&self) -> VulkanResult<Vec<CString>> {
        let names = self
            .glfw
            .get_required_instance_extensions()
            .ok_or_else(|| VulkanError::InitializationFailed("GLFW reports no Vulkan support".to_string()))?;
        names
            .into_iter()
            .map(|name| {
                CString::new(name)
                    .map_err(|e| VulkanError::InitializationFailed(format!("Invalid extension name: {e}")))
            })
            .collect()
    }

    fn create_surface(&self, _entry: &Entry, instance: &Instance) -> VulkanResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance.handle(), std::ptr::null(), &mut surface);
        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(VulkanError::InitializationFailed(format!(
                "Failed to create Vulkan surface: {result:?}"
            )))
        }
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }
}
