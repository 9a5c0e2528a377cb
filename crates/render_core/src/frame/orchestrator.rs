//! Frame orchestrator
//!
//! Drives one frame as `pre_update → execute_pipelines → submit →
//! post_update`. Pipelines run in the order compiled by the render graph;
//! each one decides during `execute_pipelines` whether it contributes this
//! frame, and `submit` splices the contributions into the slot's primary
//! command buffer.
//!
//! Clears follow what actually runs: the first included writer of a target
//! starts it cleared, and a target no included pipeline writes is cleared in
//! the primary before the first render pass.

use std::collections::BTreeSet;
use std::sync::Arc;

use ash::vk;

use crate::backend::{QueueType, SamplerDesc, SubmitBatch, VulkanError, VulkanResult};
use crate::commands::{submit_single_use, CommandBuffer};
use crate::frame::{FrameParameters, FrameStatistics, FrameSync, GlobalTables, RenderContext};
use crate::graph::RenderGraph;
use crate::pipelines::{
    FrameInputs, PipelineDescriptor, PipelineSetup, RenderPipeline, RenderTargetId, RenderTargetRegistry,
    ShaderLibrary,
};
use crate::producers::{ProducerRegistry, WaitPoints};
use crate::resources::{CommandPoolHandle, ResourceFactory, SamplerHandle};

/// Position in the per-frame state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// Waiting for `pre_update`
    Idle,
    /// Image acquired, pipelines not executed yet
    Acquired,
    /// Secondaries recorded, primary not submitted
    Executed,
    /// Submitted, waiting for presentation
    Submitted,
    /// Released
    Released,
}

/// Owns every pipeline and the per-frame objects that tie them together
pub struct FrameOrchestrator {
    graph: RenderGraph,
    pipelines: Vec<RenderPipeline>,
    targets: RenderTargetRegistry,
    shaders: ShaderLibrary,
    globals: GlobalTables,
    target_sampler: SamplerHandle,
    command_pool: CommandPoolHandle,
    primaries: Vec<CommandBuffer>,
    sync: FrameSync,
    pending_clears: Vec<RenderTargetId>,
    frame_slot: usize,
    image_index: u32,
    phase: FramePhase,
    statistics: FrameStatistics,
}

impl FrameOrchestrator {
    /// Compile the graph, allocate its targets and build every pipeline.
    ///
    /// Offscreen targets are moved to their resting layouts once here, so
    /// a stage that skips a frame leaves its readers a valid image.
    pub fn initialize(
        context: &mut RenderContext,
        descriptors: &[PipelineDescriptor],
        mut shaders: ShaderLibrary,
    ) -> VulkanResult<Self> {
        let graph = RenderGraph::compile(descriptors)?;
        let frames_in_flight = context.config().frames_in_flight;
        let device = Arc::clone(context.device());
        let (factory, swapchain) = context.parts_mut();
        let extent = swapchain.extent();

        let mut targets = RenderTargetRegistry::new();
        for &index in graph.order() {
            let descriptor = &descriptors[index];
            for target in descriptor.writes() {
                if target != RenderTargetId::Swapchain {
                    targets.allocate(factory, target, descriptor.resolution, extent)?;
                }
            }
        }

        let command_pool =
            factory.create_command_pool(QueueType::Graphics, vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)?;
        let pool = factory.command_pool(command_pool)?;
        let ids: Vec<RenderTargetId> = targets.ids().collect();
        transition_to_resting(factory, &targets, pool, &ids)?;

        let target_sampler = factory.create_sampler(&SamplerDesc::default())?;
        let globals = GlobalTables::new(factory, frames_in_flight)?;

        let mut setup = PipelineSetup {
            swapchain,
            targets: &targets,
            shaders: &mut shaders,
            global_layout: globals.layout(),
            target_sampler,
            command_pool: pool,
            frames_in_flight,
        };
        let mut pipelines = Vec::with_capacity(graph.len());
        for &index in graph.order() {
            let pipeline =
                RenderPipeline::initialize(factory, &mut setup, descriptors[index].clone(), graph.first_writes(index))?;
            pipelines.push(pipeline);
        }

        let primaries = (0..frames_in_flight)
            .map(|_| CommandBuffer::allocate(device.as_ref(), pool, vk::CommandBufferLevel::PRIMARY))
            .collect::<VulkanResult<Vec<_>>>()?;
        let sync = FrameSync::new(factory, frames_in_flight, swapchain.image_count())?;

        log::info!(
            "Frame orchestrator initialized: {} pipelines, {} targets, {} shader modules",
            pipelines.len(),
            targets.len(),
            shaders.len()
        );
        Ok(Self {
            graph,
            pipelines,
            targets,
            shaders,
            globals,
            target_sampler,
            command_pool,
            primaries,
            sync,
            pending_clears: Vec::new(),
            frame_slot: 0,
            image_index: 0,
            phase: FramePhase::Idle,
            statistics: FrameStatistics::default(),
        })
    }

    /// Wait until the frame slot is free, then acquire the next image.
    ///
    /// The slot's fence is reset only after a successful acquire, so an
    /// out-of-date swapchain leaves the slot reusable after `resize`.
    pub fn pre_update(&mut self, context: &mut RenderContext) -> VulkanResult<u32> {
        self.expect_phase(FramePhase::Idle, "pre_update")?;
        let device = Arc::clone(context.device());
        let slot = self.sync.slot(self.frame_slot)?;
        let fence = context.factory().fence(slot.in_flight)?;
        let image_available = context.factory().semaphore(slot.image_available)?;

        device.wait_for_fences(&[fence], u64::MAX)?;
        let image_index = context
            .swapchain_mut()
            .update_next_image_index(device.as_ref(), image_available)?;
        device.reset_fences(&[fence])?;

        self.image_index = image_index;
        self.phase = FramePhase::Acquired;
        Ok(image_index)
    }

    /// Upload the frame's uniforms and let every pipeline record or opt out
    pub fn execute_pipelines(
        &mut self,
        context: &mut RenderContext,
        producers: &ProducerRegistry,
        waits: &WaitPoints,
        parameters: &FrameParameters,
    ) -> VulkanResult<()> {
        self.expect_phase(FramePhase::Acquired, "execute_pipelines")?;
        let uniforms = parameters.to_uniforms(context.extent());
        let global_table = self.globals.update(context.factory_mut(), self.frame_slot, &uniforms)?;
        let inputs = FrameInputs {
            frame_slot: self.frame_slot,
            image_index: self.image_index,
            global_table,
            producers,
            waits,
            parameters: parameters.push_parameters(),
        };

        self.statistics.begin_frame();
        for pipeline in &mut self.pipelines {
            let report = pipeline.execute(context.factory(), &inputs)?;
            if report.included {
                self.statistics.pipelines_executed += 1;
            } else {
                self.statistics.pipelines_skipped += 1;
            }
            self.statistics.last_frame_draws += report.draws;
            self.statistics.last_frame_culled += report.skipped;
        }

        let mut written = BTreeSet::new();
        for pipeline in self.pipelines.iter_mut().filter(|p| p.include_in_render()) {
            let fresh: Vec<RenderTargetId> = pipeline
                .descriptor()
                .writes()
                .into_iter()
                .filter(|&target| written.insert(target))
                .collect();
            pipeline.select_attachments(context.factory_mut(), &fresh)?;
        }
        self.pending_clears = self
            .graph
            .written_targets()
            .filter(|target| !written.contains(target))
            .collect();
        if !self.pending_clears.is_empty() {
            log::trace!("No included writer for {:?}; clearing them", self.pending_clears);
        }

        self.phase = FramePhase::Executed;
        Ok(())
    }

    /// Record the primary buffer from the included pipelines and submit it
    pub fn submit(&mut self, context: &RenderContext) -> VulkanResult<()> {
        self.expect_phase(FramePhase::Executed, "submit")?;
        let factory = context.factory();
        let device = Arc::clone(context.device());
        let slot = self.sync.slot(self.frame_slot)?;
        let primary = self
            .primaries
            .get_mut(self.frame_slot)
            .ok_or_else(|| VulkanError::not_found("primary command buffer", self.frame_slot))?;

        primary.reset(device.as_ref())?;
        primary.begin_primary(device.as_ref(), vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        let mut wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        for &target in &self.pending_clears {
            let (image, old_layout) = match target {
                RenderTargetId::Swapchain => {
                    // The clear is the first use of the acquired image
                    wait_stage |= vk::PipelineStageFlags::TRANSFER;
                    let image = context
                        .swapchain()
                        .images()
                        .get(self.image_index as usize)
                        .copied()
                        .ok_or_else(|| VulkanError::not_found("swapchain image", self.image_index))?;
                    (image, vk::ImageLayout::UNDEFINED)
                }
                other => (self.targets.image(factory, other)?, other.resting_layout()),
            };
            primary.clear_image(
                device.as_ref(),
                image,
                aspect_of(target),
                old_layout,
                target.resting_layout(),
                target.clear_value(),
            )?;
        }
        for pipeline in &mut self.pipelines {
            pipeline.record_into(factory, primary, self.frame_slot, self.image_index)?;
        }
        primary.end(device.as_ref())?;

        let wait_semaphores = [factory.semaphore(slot.image_available)?];
        let signal_semaphores = [factory.semaphore(self.sync.render_finished(self.image_index)?)?];
        let command_buffers = [primary.handle()];
        let batch = SubmitBatch {
            wait_semaphores: &wait_semaphores,
            wait_stages: &[wait_stage],
            command_buffers: &command_buffers,
            signal_semaphores: &signal_semaphores,
        };
        device.queue_submit(QueueType::Graphics, &[batch], factory.fence(slot.in_flight)?)?;
        primary.mark_submitted()?;

        self.statistics.frames_rendered += 1;
        self.phase = FramePhase::Submitted;
        Ok(())
    }

    /// Present the frame and advance to the next frame slot.
    ///
    /// The slot advances even when presentation reports an out-of-date
    /// swapchain; the caller then calls [`Self::resize`].
    pub fn post_update(&mut self, context: &mut RenderContext) -> VulkanResult<()> {
        self.expect_phase(FramePhase::Submitted, "post_update")?;
        let device = Arc::clone(context.device());
        let render_finished = context.factory().semaphore(self.sync.render_finished(self.image_index)?)?;
        let presented = context.swapchain_mut().present(device.as_ref(), render_finished);

        self.phase = FramePhase::Idle;
        self.frame_slot = (self.frame_slot + 1) % self.sync.frames_in_flight().max(1);
        presented
    }

    /// Run one whole frame and return its statistics
    pub fn render_frame(
        &mut self,
        context: &mut RenderContext,
        producers: &ProducerRegistry,
        waits: &WaitPoints,
        parameters: &FrameParameters,
    ) -> VulkanResult<FrameStatistics> {
        self.pre_update(context)?;
        self.execute_pipelines(context, producers, waits, parameters)?;
        self.submit(context)?;
        self.post_update(context)?;
        log::trace!("{}", self.statistics);
        Ok(self.statistics)
    }

    /// Recreate the swapchain and everything sized after it.
    ///
    /// Frame semaphores are replaced too, so a signal left pending by a failed
    /// acquire or present never reaches the next frame.
    pub fn resize(&mut self, context: &mut RenderContext, extent: vk::Extent2D) -> VulkanResult<()> {
        self.expect_phase(FramePhase::Idle, "resize")?;
        let device = Arc::clone(context.device());
        device.wait_idle()?;

        let (factory, swapchain) = context.parts_mut();
        swapchain.recreate(device.as_ref(), extent)?;
        let reallocated = self.targets.resize(factory, swapchain.extent())?;
        let pool = factory.command_pool(self.command_pool)?;
        transition_to_resting(factory, &self.targets, pool, &reallocated)?;
        self.sync.recreate_semaphores(factory, swapchain.image_count())?;
        for pipeline in &mut self.pipelines {
            pipeline.rebind_targets(factory, swapchain, &self.targets)?;
        }
        self.frame_slot = 0;

        log::info!(
            "Resized to {}x{} with {} swapchain images",
            swapchain.extent().width,
            swapchain.extent().height,
            swapchain.image_count()
        );
        Ok(())
    }

    /// Destroy pipelines, frame sync and targets, then release the context
    pub fn release(&mut self, context: &mut RenderContext) -> VulkanResult<()> {
        if self.phase == FramePhase::Released {
            return Ok(());
        }
        let device = Arc::clone(context.device());
        device.wait_idle()?;

        let factory = context.factory_mut();
        for pipeline in self.pipelines.drain(..) {
            pipeline.release(factory)?;
        }
        self.sync.release(factory)?;
        for primary in self.primaries.drain(..) {
            primary.free(device.as_ref());
        }
        self.globals.release(factory)?;
        factory.destroy_sampler(self.target_sampler)?;
        self.targets.release(factory)?;
        self.shaders.release(factory)?;
        factory.destroy_command_pool(self.command_pool)?;
        self.phase = FramePhase::Released;
        log::info!("Frame orchestrator released after {} frames", self.statistics.frames_rendered);

        context.release()
    }

    /// Compiled render graph
    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    /// Pipelines in execution order
    pub fn pipelines(&self) -> &[RenderPipeline] {
        &self.pipelines
    }

    /// Pipeline by stage name
    pub fn pipeline(&self, name: &str) -> Option<&RenderPipeline> {
        self.pipelines.iter().find(|p| p.name() == name)
    }

    /// Stage names in execution order
    pub fn execution_order(&self) -> Vec<&str> {
        self.pipelines.iter().map(RenderPipeline::name).collect()
    }

    /// Offscreen targets
    pub fn targets(&self) -> &RenderTargetRegistry {
        &self.targets
    }

    /// Statistics of the last frame
    pub fn statistics(&self) -> FrameStatistics {
        self.statistics
    }

    /// Current frame-in-flight slot
    pub fn frame_slot(&self) -> usize {
        self.frame_slot
    }

    /// Last acquired swapchain image
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Current phase
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Primary command buffer of a frame slot
    pub fn primary(&self, frame_slot: usize) -> Option<&CommandBuffer> {
        self.primaries.get(frame_slot)
    }

    /// Semaphores and fences of every frame slot
    pub fn sync(&self) -> &FrameSync {
        &self.sync
    }

    /// Targets the last executed frame clears because no included pipeline writes them
    pub fn pending_clears(&self) -> &[RenderTargetId] {
        &self.pending_clears
    }

    fn expect_phase(&self, expected: FramePhase, operation: &str) -> VulkanResult<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(VulkanError::invalid(format!("{operation} called in phase {:?}", self.phase)))
        }
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        if self.phase != FramePhase::Released {
            log::warn!("Frame orchestrator dropped without release; its resources go with the factory");
        }
    }
}

fn aspect_of(target: RenderTargetId) -> vk::ImageAspectFlags {
    match target.format() {
        Some(vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT) => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ if target.is_depth() => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Move fresh targets from undefined to their resting layout in one submission
fn transition_to_resting(
    factory: &ResourceFactory,
    targets: &RenderTargetRegistry,
    pool: vk::CommandPool,
    ids: &[RenderTargetId],
) -> VulkanResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let images = ids
        .iter()
        .map(|&id| Ok((targets.image(factory, id)?, aspect_of(id), id.resting_layout())))
        .collect::<VulkanResult<Vec<_>>>()?;
    let device = Arc::clone(factory.device());
    let device = device.as_ref();
    submit_single_use(device, pool, QueueType::Graphics, |cb| {
        for &(image, aspect, layout) in &images {
            cb.transition_image(device, image, aspect, vk::ImageLayout::UNDEFINED, layout, 1, 1)?;
        }
        Ok(())
    })?;
    log::debug!("Moved {} targets to their resting layouts", images.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceCall, HeadlessDevice, RecordedCommand};
    use crate::config::RendererConfig;
    use crate::pipelines::{minimal_spirv, PushLayout, ShaderSet};
    use crate::producers::{InstanceRecord, InstanceStore, ProducerKind, VisibilityFlags};
    use crate::resources::{BufferDesc, MemoryLocation};

    fn shaders() -> ShaderLibrary {
        let mut library = ShaderLibrary::new("missing");
        for name in ["fullscreen_vert.spv", "scene_vert.spv", "scene_frag.spv", "post_frag.spv"] {
            library.insert_source(name, minimal_spirv());
        }
        library
    }

    fn stages() -> Vec<PipelineDescriptor> {
        vec![
            PipelineDescriptor::fullscreen("post", "post_frag.spv", RenderTargetId::Swapchain)
                .with_reads(&[RenderTargetId::Scene]),
            PipelineDescriptor::instanced(
                "scene",
                ShaderSet::vertex_fragment("scene_vert.spv", "scene_frag.spv"),
                ProducerKind::Models,
                VisibilityFlags::CAMERA,
                PushLayout::ModelTransform,
            )
            .with_color_targets(&[RenderTargetId::Scene])
            .with_clear(),
        ]
    }

    fn setup() -> (Arc<HeadlessDevice>, RenderContext, FrameOrchestrator) {
        let device = Arc::new(HeadlessDevice::new());
        let mut context = RenderContext::new(device.clone(), RendererConfig::default()).unwrap();
        let orchestrator = FrameOrchestrator::initialize(&mut context, &stages(), shaders()).unwrap();
        (device, context, orchestrator)
    }

    #[test]
    fn pipelines_follow_compiled_order() {
        let (_device, mut context, mut orchestrator) = setup();
        assert_eq!(orchestrator.execution_order(), vec!["scene", "post"]);
        assert_eq!(orchestrator.targets().len(), 1);
        orchestrator.release(&mut context).unwrap();
    }

    #[test]
    fn phases_are_enforced() {
        let (_device, mut context, mut orchestrator) = setup();
        assert!(orchestrator.submit(&context).is_err());
        assert!(orchestrator.post_update(&mut context).is_err());
        orchestrator.pre_update(&mut context).unwrap();
        assert!(orchestrator.pre_update(&mut context).is_err());
        assert_eq!(orchestrator.phase(), FramePhase::Acquired);
        orchestrator.release(&mut context).unwrap();
    }

    #[test]
    fn skipped_scene_keeps_post_processing() {
        let (device, mut context, mut orchestrator) = setup();
        let stats = orchestrator
            .render_frame(&mut context, &ProducerRegistry::new(), &WaitPoints::new(), &FrameParameters::default())
            .unwrap();
        assert_eq!(stats.pipelines_skipped, 1);
        assert_eq!(stats.pipelines_executed, 1);
        assert_eq!(stats.last_frame_draws, 1);

        let primary = orchestrator.primary(0).unwrap().handle();
        let passes = device
            .recorded(primary)
            .iter()
            .filter(|c| matches!(c, RecordedCommand::BeginRenderPass { .. }))
            .count();
        assert_eq!(passes, 1);
        assert_eq!(orchestrator.frame_slot(), 1);
        orchestrator.release(&mut context).unwrap();
    }

    #[test]
    fn frame_submits_and_presents_with_semaphore_pair() {
        let (device, mut context, mut orchestrator) = setup();
        let store = Arc::new(InstanceStore::new());
        let buffer = context
            .factory_mut()
            .create_buffer(&BufferDesc {
                size: 96,
                usage: vk::BufferUsageFlags::VERTEX_BUFFER,
                location: MemoryLocation::HostVisible,
                initial_data: None,
            })
            .unwrap();
        store.push(InstanceRecord::new(buffer, 3).with_visibility(VisibilityFlags::CAMERA));
        let mut producers = ProducerRegistry::new();
        producers.register(ProducerKind::Models, store);
        device.clear_calls();

        let stats = orchestrator
            .render_frame(&mut context, &producers, &WaitPoints::new(), &FrameParameters::default())
            .unwrap();
        assert_eq!(stats.pipelines_executed, 2);
        assert_eq!(stats.last_frame_draws, 2);
        assert_eq!(stats.frames_rendered, 1);

        let calls = device.calls();
        let signaled = calls
            .iter()
            .find_map(|call| match call {
                DeviceCall::Submit { signal_semaphores, .. } => Some(signal_semaphores.clone()),
                _ => None,
            })
            .unwrap();
        let waited = calls
            .iter()
            .find_map(|call| match call {
                DeviceCall::Present { wait_semaphores, .. } => Some(wait_semaphores.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(signaled, waited);
        orchestrator.release(&mut context).unwrap();
    }

    #[test]
    fn out_of_date_acquire_recovers_through_resize() {
        let (device, mut context, mut orchestrator) = setup();
        device.fail_next_acquire(vk::Result::ERROR_OUT_OF_DATE_KHR);
        let err = orchestrator
            .render_frame(&mut context, &ProducerRegistry::new(), &WaitPoints::new(), &FrameParameters::default())
            .unwrap_err();
        assert!(matches!(err, VulkanError::SwapchainOutOfDate));
        assert_eq!(orchestrator.phase(), FramePhase::Idle);

        orchestrator
            .resize(&mut context, vk::Extent2D { width: 800, height: 600 })
            .unwrap();
        orchestrator
            .render_frame(&mut context, &ProducerRegistry::new(), &WaitPoints::new(), &FrameParameters::default())
            .unwrap();
        orchestrator.release(&mut context).unwrap();
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn target_without_included_writer_is_cleared_before_passes() {
        let (device, mut context, mut orchestrator) = setup();
        orchestrator
            .render_frame(&mut context, &ProducerRegistry::new(), &WaitPoints::new(), &FrameParameters::default())
            .unwrap();
        assert_eq!(orchestrator.pending_clears(), &[RenderTargetId::Scene]);

        let scene = orchestrator.targets().image(context.factory(), RenderTargetId::Scene).unwrap();
        let recorded = device.recorded(orchestrator.primary(0).unwrap().handle());
        let cleared = recorded
            .iter()
            .position(|c| *c == RecordedCommand::ClearColorImage(scene))
            .unwrap();
        let first_pass = recorded
            .iter()
            .position(|c| matches!(c, RecordedCommand::BeginRenderPass { .. }))
            .unwrap();
        assert!(cleared < first_pass);
        orchestrator.release(&mut context).unwrap();
    }

    #[test]
    fn suboptimal_acquire_still_renders_and_presents() {
        let (device, mut context, mut orchestrator) = setup();
        device.fail_next_acquire(vk::Result::SUBOPTIMAL_KHR);
        device.clear_calls();
        let err = orchestrator
            .render_frame(&mut context, &ProducerRegistry::new(), &WaitPoints::new(), &FrameParameters::default())
            .unwrap_err();
        assert!(matches!(err, VulkanError::SwapchainOutOfDate));

        let calls = device.calls();
        let acquired = calls
            .iter()
            .find_map(|call| match call {
                DeviceCall::Acquire { semaphore, .. } => Some(*semaphore),
                _ => None,
            })
            .unwrap();
        let waited = calls
            .iter()
            .find_map(|call| match call {
                DeviceCall::Submit { wait_semaphores, .. } => Some(wait_semaphores.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(waited, vec![acquired]);
        assert!(calls.iter().any(|call| matches!(call, DeviceCall::Present { .. })));
        assert_eq!(orchestrator.phase(), FramePhase::Idle);

        orchestrator
            .resize(&mut context, vk::Extent2D { width: 800, height: 600 })
            .unwrap();
        orchestrator
            .render_frame(&mut context, &ProducerRegistry::new(), &WaitPoints::new(), &FrameParameters::default())
            .unwrap();
        orchestrator.release(&mut context).unwrap();
        assert_eq!(device.live_object_count(), 0);
        assert!(device.invalid_destroys().is_empty());
    }

    #[test]
    fn release_destroys_everything_once() {
        let (device, mut context, mut orchestrator) = setup();
        for _ in 0..3 {
            orchestrator
                .render_frame(&mut context, &ProducerRegistry::new(), &WaitPoints::new(), &FrameParameters::default())
                .unwrap();
        }
        orchestrator.release(&mut context).unwrap();
        orchestrator.release(&mut context).unwrap();
        assert!(context.is_released());
        assert_eq!(device.live_object_count(), 0);
        assert!(device.invalid_destroys().is_empty());
    }
}
