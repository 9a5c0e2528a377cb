//! Swapchain extent and image-count negotiation through the render context

mod common;

use std::sync::Arc;

use ash::vk;
use render_core::backend::SimulatedSurface;
use render_core::prelude::*;

/// Surface that leaves the extent open within 800x600 and has no image limit
fn unbounded_800x600() -> SimulatedSurface {
    let extent = vk::Extent2D { width: 800, height: 600 };
    let mut surface = SimulatedSurface::undefined_extent(extent, extent);
    surface.capabilities.min_image_count = 2;
    surface.capabilities.max_image_count = 0;
    surface
}

#[test]
fn test_undefined_extent_is_clamped_and_count_unbounded() {
    let device = Arc::new(HeadlessDevice::with_surface(unbounded_800x600()));
    let config = RendererConfig::new("negotiation").with_resolution(1920, 1080);
    let configured = config.minimum_image_count;
    let mut context = RenderContext::new(device.clone(), config).unwrap();

    assert_eq!(context.extent(), vk::Extent2D { width: 800, height: 600 });
    assert_eq!(context.swapchain().image_count() as u32, configured.max(2));
    let desc = device.last_swapchain_desc().unwrap();
    assert_eq!(desc.min_image_count, configured.max(2));
    assert_eq!(desc.extent, vk::Extent2D { width: 800, height: 600 });

    context.release().unwrap();
}

#[test]
fn test_configured_count_above_surface_minimum_is_kept() {
    let device = Arc::new(HeadlessDevice::with_surface(unbounded_800x600()));
    let config = RendererConfig::new("negotiation")
        .with_resolution(1920, 1080)
        .with_minimum_image_count(6);
    let mut context = RenderContext::new(device, config).unwrap();
    assert_eq!(context.swapchain().image_count(), 6);
    context.release().unwrap();
}

#[test]
fn test_surface_minimum_wins_over_low_configuration() {
    let device = Arc::new(HeadlessDevice::with_surface(unbounded_800x600()));
    let config = RendererConfig::new("negotiation").with_minimum_image_count(1);
    let mut context = RenderContext::new(device, config).unwrap();
    assert_eq!(context.swapchain().image_count(), 2);
    context.release().unwrap();
}

#[test]
fn test_resize_follows_new_surface_extent() {
    let (device, mut context, mut orchestrator) = common::standard_renderer(RendererConfig::default());
    orchestrator
        .render_frame(&mut context, &ProducerRegistry::new(), &WaitPoints::new(), &FrameParameters::default())
        .unwrap();

    device.set_surface(SimulatedSurface::fixed(1280, 720));
    orchestrator
        .resize(&mut context, vk::Extent2D { width: 1280, height: 720 })
        .unwrap();
    assert_eq!(context.extent(), vk::Extent2D { width: 1280, height: 720 });
    assert_eq!(
        orchestrator.pipeline("post_processing").unwrap().extent(),
        vk::Extent2D { width: 1280, height: 720 }
    );
    // Shadow maps keep their fixed resolution
    let shadow = orchestrator.pipeline("shadow_map_0").unwrap().extent();
    assert_eq!(shadow.width, context.config().shadow_map_resolution);

    orchestrator
        .render_frame(&mut context, &ProducerRegistry::new(), &WaitPoints::new(), &FrameParameters::default())
        .unwrap();
    orchestrator.release(&mut context).unwrap();
    assert_eq!(device.live_object_count(), 0);
}
