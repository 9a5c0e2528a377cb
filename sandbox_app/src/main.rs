//! Sandbox: drives the standard stage table in a GLFW window
//!
//! Escape closes the window. Renderer settings are read from
//! `sandbox_app/sandbox.toml` when present. Run from the workspace root.

mod camera;
mod scene;
mod window;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use ash::vk;
use glfw::{Action, Key, WindowEvent};
use render_core::backend::vulkan::{AshDevice, SurfaceProvider};
use render_core::prelude::*;

use camera::OrbitCamera;
use scene::Scene;
use window::Window;

const CONFIG_PATH: &str = "sandbox_app/sandbox.toml";
const STATISTICS_INTERVAL_SECONDS: u64 = 5;

struct SandboxApp {
    window: Window,
    context: RenderContext,
    frames: FrameOrchestrator,
    scene: Scene,
    camera: OrbitCamera,
}

impl SandboxApp {
    fn new() -> Result<Self> {
        let mut config = RendererConfig::load_or_default(CONFIG_PATH).context("failed to read renderer config")?;
        let (width, height) = config.desired_resolution;
        let window = Window::new(&config.application_name, width, height)?;
        config.desired_resolution = window.framebuffer_size();

        let device: Arc<dyn GpuDevice> = Arc::new(AshDevice::new(&config, &window)?);
        let stages = standard_stages(&config);
        let shaders = ShaderLibrary::new(&config.shader_directory);
        let mut context = RenderContext::new(device, config)?;
        let frames = FrameOrchestrator::initialize(&mut context, &stages, shaders)?;
        log::info!("Execution order: {}", frames.execution_order().join(" -> "));

        let scene = Scene::build(&mut context)?;
        let extent = context.extent();
        Ok(Self {
            window,
            context,
            frames,
            scene,
            camera: OrbitCamera::new(extent.width as f32 / extent.height.max(1) as f32),
        })
    }

    fn run(&mut self) -> Result<()> {
        let start = Instant::now();
        let mut previous = 0.0_f32;
        let mut last_report = Instant::now();
        let mut resize_pending = false;

        while !self.window.should_close() {
            self.window.poll_events();
            let events: Vec<_> = self.window.flush_events().collect();
            for (_, event) in events {
                match event {
                    WindowEvent::Key(Key::Escape, _, Action::Press, _) => self.window.set_should_close(true),
                    WindowEvent::FramebufferSize(_, _) => resize_pending = true,
                    _ => {}
                }
            }

            if resize_pending {
                if !self.resize()? {
                    // Minimized; nothing to draw into
                    self.window.wait_events();
                    continue;
                }
                resize_pending = false;
            }

            let elapsed = start.elapsed().as_secs_f32();
            let delta = elapsed - previous;
            previous = elapsed;
            match self.render(elapsed, delta) {
                Ok(statistics) => {
                    if last_report.elapsed().as_secs() >= STATISTICS_INTERVAL_SECONDS {
                        log::info!("{statistics}");
                        last_report = Instant::now();
                    }
                }
                Err(VulkanError::SwapchainOutOfDate) => resize_pending = true,
                Err(e) => return Err(e).context("frame failed"),
            }
        }
        Ok(())
    }

    fn render(&mut self, elapsed: f32, delta: f32) -> VulkanResult<FrameStatistics> {
        let parameters = self.camera.frame_parameters(elapsed, delta);
        let eye = self.camera.position(elapsed);
        let forward = self.camera.forward(elapsed);
        let focus = self.camera.target;

        let Self { context, frames, scene, .. } = self;
        let scene: &Scene = scene;
        scene.begin_frame();
        std::thread::scope(|workers| {
            workers.spawn(move || scene.cull(eye, forward, focus));
            frames.render_frame(context, scene.producers(), scene.waits(), &parameters)
        })
    }

    /// Recreate the swapchain at the framebuffer size; false while minimized
    fn resize(&mut self) -> Result<bool> {
        let (width, height) = self.window.framebuffer_size();
        if width == 0 || height == 0 {
            return Ok(false);
        }
        self.frames.resize(&mut self.context, vk::Extent2D { width, height })?;
        let extent = self.context.extent();
        self.camera.set_viewport(extent.width, extent.height);
        Ok(true)
    }

    fn shutdown(mut self) -> Result<()> {
        self.scene.release(&mut self.context)?;
        self.frames.release(&mut self.context)?;
        Ok(())
    }
}

fn main() -> Result<()> {
    render_core::foundation::logging::init_with_level(log::LevelFilter::Info);
    log::info!("Starting render core sandbox");

    let mut app = SandboxApp::new()?;
    let result = app.run();
    if let Err(e) = &result {
        log::error!("Sandbox failed: {e:?}");
    }
    app.shutdown()?;
    result
}
