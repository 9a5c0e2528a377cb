//! Whole-frame behavior of the standard stage table on the headless device

mod common;

use std::sync::Arc;

use ash::vk;
use render_core::backend::{DeviceCall, ObjectKind, RecordedCommand, SimulatedSurface};
use render_core::commands::CommandBufferState;
use render_core::frame::FramePhase;
use render_core::prelude::*;

fn is_draw(command: &RecordedCommand) -> bool {
    matches!(command, RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. })
}

#[test]
fn test_standard_stages_execute_in_dependency_order() {
    let config = RendererConfig {
        shadow_map_slots: 2,
        ..RendererConfig::default()
    };
    let (_device, mut context, mut orchestrator) = common::standard_renderer(config);

    let order = orchestrator.execution_order();
    let position = |name: &str| order.iter().position(|n| *n == name).expect(name);
    assert!(position("shadow_map_0") < position("direct_lighting"));
    assert!(position("shadow_map_1") < position("direct_lighting"));
    assert!(position("terrain") < position("scene_features"));
    assert!(position("vegetation_depth") < position("vegetation_color"));
    assert!(position("denoise_horizontal") < position("denoise_vertical"));
    assert!(position("post_processing") < position("user_interface"));
    assert_eq!(order.last(), Some(&"user_interface"));

    orchestrator.release(&mut context).unwrap();
}

#[test]
fn test_empty_vegetation_records_nothing() {
    let (device, mut context, mut orchestrator) = common::standard_renderer(RendererConfig::default());
    let mut producers = ProducerRegistry::new();
    producers.register(ProducerKind::Vegetation, Arc::new(InstanceStore::new()));

    let stats = orchestrator
        .render_frame(&mut context, &producers, &WaitPoints::new(), &FrameParameters::default())
        .unwrap();

    for name in ["vegetation_depth", "vegetation_color"] {
        let pipeline = orchestrator.pipeline(name).unwrap();
        assert!(!pipeline.include_in_render(), "{name} should opt out");
        let secondary = pipeline.command_buffer(0).unwrap();
        assert_eq!(secondary.state(), CommandBufferState::Initial);
        assert!(device.recorded(secondary.handle()).is_empty());
    }
    // Only the fullscreen passes have work without producers
    assert_eq!(stats.pipelines_executed, 4);
    assert_eq!(stats.last_frame_draws, 4);

    let primary = orchestrator.primary(0).unwrap().handle();
    let executed: usize = device
        .recorded(primary)
        .iter()
        .filter(|c| matches!(c, RecordedCommand::ExecuteCommands(_)))
        .count();
    assert_eq!(executed, 4);

    orchestrator.release(&mut context).unwrap();
}

#[test]
fn test_cleared_visibility_runs_loop_without_draws() {
    let (device, mut context, mut orchestrator) = common::standard_renderer(RendererConfig::default());
    let buffer = common::vertex_buffer(&mut context, 36);
    let models = Arc::new(InstanceStore::new());
    models.replace(vec![
        InstanceRecord::new(buffer, 36).with_visibility(VisibilityFlags::empty()),
        InstanceRecord::new(buffer, 36).with_visibility(VisibilityFlags::empty()),
    ]);
    let mut producers = ProducerRegistry::new();
    producers.register(ProducerKind::Models, models);

    let stats = orchestrator
        .render_frame(&mut context, &producers, &WaitPoints::new(), &FrameParameters::default())
        .unwrap();

    let scene = orchestrator.pipeline("scene_features").unwrap();
    assert!(scene.include_in_render());
    let commands = device.recorded(scene.command_buffer(0).unwrap().handle());
    assert!(commands.iter().any(|c| matches!(c, RecordedCommand::BindPipeline(_))));
    assert!(!commands.iter().any(is_draw));
    // Both records are culled by scene_features and by the shadow map
    assert_eq!(stats.last_frame_culled, 4);

    orchestrator.release(&mut context).unwrap();
}

#[test]
fn test_visible_instances_are_drawn_per_view() {
    let (device, mut context, mut orchestrator) = common::standard_renderer(RendererConfig::default());
    let buffer = common::vertex_buffer(&mut context, 3);
    let models = Arc::new(InstanceStore::new());
    models.replace(vec![
        InstanceRecord::new(buffer, 3).with_visibility(VisibilityFlags::CAMERA),
        InstanceRecord::new(buffer, 3).with_visibility(VisibilityFlags::CAMERA | VisibilityFlags::SHADOW_MAP_0),
    ]);
    let mut producers = ProducerRegistry::new();
    producers.register(ProducerKind::Models, models);

    orchestrator
        .render_frame(&mut context, &producers, &WaitPoints::new(), &FrameParameters::default())
        .unwrap();

    let draws = |name: &str| {
        let pipeline = orchestrator.pipeline(name).unwrap();
        device
            .recorded(pipeline.command_buffer(0).unwrap().handle())
            .iter()
            .filter(|c| is_draw(c))
            .count()
    };
    assert_eq!(draws("scene_features"), 2);
    assert_eq!(draws("shadow_map_0"), 1);

    orchestrator.release(&mut context).unwrap();
}

#[test]
fn test_frames_rotate_slots_and_release_cleanly() {
    let (device, mut context, mut orchestrator) = common::standard_renderer(RendererConfig::default());
    let producers = ProducerRegistry::new();
    let waits = WaitPoints::new();

    for frame in 0..5_u64 {
        let stats = orchestrator
            .render_frame(&mut context, &producers, &waits, &FrameParameters::default())
            .unwrap();
        assert_eq!(stats.frames_rendered, frame + 1);
        assert_eq!(orchestrator.phase(), FramePhase::Idle);
    }
    assert_eq!(orchestrator.frame_slot(), 1);

    orchestrator.release(&mut context).unwrap();
    assert_eq!(device.live_object_count(), 0);
    assert!(device.invalid_destroys().is_empty());
}

#[test]
fn test_producer_waits_block_until_signaled() {
    let (_device, mut context, mut orchestrator) = common::standard_renderer(RendererConfig::default());
    let mut waits = WaitPoints::new();
    let culling = waits.register(ProducerTask::ModelCulling);
    let shadow_culling = waits.register(ProducerTask::ShadowCulling);

    let buffer = common::vertex_buffer(&mut context, 3);
    let models = Arc::new(InstanceStore::new());
    models.push(InstanceRecord::new(buffer, 3).with_visibility(VisibilityFlags::empty()));
    let mut producers = ProducerRegistry::new();
    producers.register(ProducerKind::Models, models.clone());

    // Culling publishes camera visibility only after the render thread started waiting
    let worker = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(20));
        models.update(|records| {
            for record in records.iter_mut() {
                record.visibility = VisibilityFlags::CAMERA;
            }
        });
        shadow_culling.signal();
        culling.signal();
    });

    let stats = orchestrator
        .render_frame(&mut context, &producers, &waits, &FrameParameters::default())
        .unwrap();
    worker.join().unwrap();

    // scene_features sees the culled result; the four fullscreen passes draw once each
    assert_eq!(stats.last_frame_draws, 5);
    assert_eq!(stats.pipelines_skipped, 4);
    assert!(waits.signal_for(ProducerTask::ModelCulling).unwrap().is_signaled());

    orchestrator.release(&mut context).unwrap();
}

/// Load ops of the render pass a pipeline begins this frame, after checking
/// the primary of `frame_slot` actually begins it
fn begun_load_ops(
    device: &HeadlessDevice,
    context: &RenderContext,
    orchestrator: &FrameOrchestrator,
    name: &str,
    frame_slot: usize,
) -> Vec<vk::AttachmentLoadOp> {
    let pipeline = orchestrator.pipeline(name).unwrap();
    let render_pass = context.factory().render_pass(pipeline.active_render_pass()).unwrap();
    let primary = orchestrator.primary(frame_slot).unwrap().handle();
    assert!(device.recorded(primary).iter().any(|c| matches!(
        c,
        RecordedCommand::BeginRenderPass { render_pass: begun, .. } if *begun == render_pass
    )));
    device
        .render_pass_desc(render_pass)
        .unwrap()
        .attachments
        .iter()
        .map(|a| a.load_op)
        .collect()
}

#[test]
fn test_first_executed_writer_clears_when_terrain_is_absent() {
    let (device, mut context, mut orchestrator) = common::standard_renderer(RendererConfig::default());
    let buffer = common::vertex_buffer(&mut context, 3);
    let models = Arc::new(InstanceStore::new());
    models.push(InstanceRecord::new(buffer, 3).with_visibility(VisibilityFlags::CAMERA));
    let mut producers = ProducerRegistry::new();
    producers.register(ProducerKind::Models, models);

    orchestrator
        .render_frame(&mut context, &producers, &WaitPoints::new(), &FrameParameters::default())
        .unwrap();
    assert!(!orchestrator.pipeline("terrain").unwrap().include_in_render());
    assert!(orchestrator.pipeline("scene_features").unwrap().include_in_render());
    // scene_features now writes Scene and SceneDepth first
    assert_eq!(
        begun_load_ops(&device, &context, &orchestrator, "scene_features", 0),
        vec![vk::AttachmentLoadOp::CLEAR, vk::AttachmentLoadOp::CLEAR]
    );
    assert!(!orchestrator.pending_clears().contains(&RenderTargetId::Scene));

    // With terrain back, terrain clears and scene_features draws on top
    let terrain = Arc::new(InstanceStore::new());
    terrain.push(InstanceRecord::new(buffer, 4).with_visibility(VisibilityFlags::CAMERA));
    producers.register(ProducerKind::Terrain, terrain);
    orchestrator
        .render_frame(&mut context, &producers, &WaitPoints::new(), &FrameParameters::default())
        .unwrap();
    assert_eq!(
        begun_load_ops(&device, &context, &orchestrator, "terrain", 1),
        vec![vk::AttachmentLoadOp::CLEAR, vk::AttachmentLoadOp::CLEAR]
    );
    assert_eq!(
        begun_load_ops(&device, &context, &orchestrator, "scene_features", 1),
        vec![vk::AttachmentLoadOp::LOAD, vk::AttachmentLoadOp::LOAD]
    );

    orchestrator.release(&mut context).unwrap();
    assert_eq!(device.live_object_count(), 0);
}

#[test]
fn test_out_of_date_present_then_resize_replaces_frame_semaphores() {
    let (device, mut context, mut orchestrator) = common::standard_renderer(RendererConfig::default());
    let producers = ProducerRegistry::new();
    let waits = WaitPoints::new();
    orchestrator
        .render_frame(&mut context, &producers, &waits, &FrameParameters::default())
        .unwrap();

    device.fail_next_present(vk::Result::ERROR_OUT_OF_DATE_KHR);
    let err = orchestrator
        .render_frame(&mut context, &producers, &waits, &FrameParameters::default())
        .unwrap_err();
    assert!(matches!(err, VulkanError::SwapchainOutOfDate));
    assert_eq!(orchestrator.phase(), FramePhase::Idle);

    let old_acquire: Vec<vk::Semaphore> = orchestrator
        .sync()
        .image_available_semaphores()
        .iter()
        .map(|&s| context.factory().semaphore(s).unwrap())
        .collect();
    let frames_in_flight = orchestrator.sync().frames_in_flight();
    let other_semaphores =
        device.live_count(ObjectKind::Semaphore) - frames_in_flight - context.swapchain().image_count();

    device.set_surface(SimulatedSurface::fixed(1024, 768));
    orchestrator
        .resize(&mut context, vk::Extent2D { width: 1024, height: 768 })
        .unwrap();
    assert_eq!(orchestrator.frame_slot(), 0);
    assert_eq!(
        device.live_count(ObjectKind::Semaphore),
        frames_in_flight + context.swapchain().image_count() + other_semaphores
    );
    let new_acquire: Vec<vk::Semaphore> = orchestrator
        .sync()
        .image_available_semaphores()
        .iter()
        .map(|&s| context.factory().semaphore(s).unwrap())
        .collect();
    assert!(new_acquire.iter().all(|s| !old_acquire.contains(s)));

    device.clear_calls();
    for _ in 0..frames_in_flight + 1 {
        orchestrator
            .render_frame(&mut context, &producers, &waits, &FrameParameters::default())
            .unwrap();
    }
    let calls = device.calls();
    let acquired: Vec<vk::Semaphore> = calls
        .iter()
        .filter_map(|call| match call {
            DeviceCall::Acquire { semaphore, .. } => Some(*semaphore),
            _ => None,
        })
        .collect();
    let waited: Vec<vk::Semaphore> = calls
        .iter()
        .filter_map(|call| match call {
            DeviceCall::Submit { wait_semaphores, .. } if !wait_semaphores.is_empty() => Some(wait_semaphores[0]),
            _ => None,
        })
        .collect();
    assert_eq!(acquired.len(), frames_in_flight + 1);
    assert!(acquired.iter().all(|s| new_acquire.contains(s)));
    assert_eq!(acquired, waited);

    orchestrator.release(&mut context).unwrap();
    assert_eq!(device.live_object_count(), 0);
    assert!(device.invalid_destroys().is_empty());
}
