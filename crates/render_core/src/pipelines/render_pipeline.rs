//! Render pipeline objects
//!
//! A [`RenderPipeline`] is one [`PipelineDescriptor`] turned into GPU objects:
//! render pass, framebuffers, layout, graphics pipeline and one secondary
//! command buffer per frame in flight. Each frame [`RenderPipeline::execute`]
//! either records the secondary for the current slot or opts out, and the
//! frame orchestrator splices included secondaries into its primary buffer.
//!
//! Which attachments start cleared depends on which pipelines ran earlier in
//! the same frame, so a pipeline keeps one render pass per combination it
//! has seen. The variants differ only in load operations and layouts, which
//! keeps them compatible with the framebuffers and secondaries built against
//! the compiled pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;

use crate::backend::{
    DepthState, FramebufferDesc, GpuDevice, GraphicsPipelineDesc, InheritanceInfo, PipelineStage, RenderPassDesc,
    StencilState, TableBinding, VulkanError, VulkanResult,
};
use crate::commands::{Command, CommandBuffer, ImageClear};
use crate::pipelines::{
    DrawPolicy, PipelineDescriptor, PushLayout, PushParameters, RenderTargetId, RenderTargetRegistry, ShaderLibrary,
    VertexInput,
};
use crate::producers::{InstanceRecord, ProducerRegistry, VisibilityFlags, WaitPoints};
use crate::resources::{
    FramebufferHandle, GraphicsPipelineHandle, PipelineLayoutHandle, RenderDataTableBinding, RenderDataTableHandle,
    RenderPassHandle, ResourceFactory, SamplerHandle, TableLayoutHandle,
};
use crate::swapchain::SwapchainManager;

/// Shared objects every pipeline is initialized against
pub struct PipelineSetup<'a> {
    /// Initialized swapchain
    pub swapchain: &'a SwapchainManager,
    /// Allocated offscreen targets
    pub targets: &'a RenderTargetRegistry,
    /// Shader module cache
    pub shaders: &'a mut ShaderLibrary,
    /// Layout of the global table bound at set 0
    pub global_layout: TableLayoutHandle,
    /// Sampler used for read targets
    pub target_sampler: SamplerHandle,
    /// Pool secondaries are allocated from; must allow individual reset
    pub command_pool: vk::CommandPool,
    /// Secondary command buffers to allocate
    pub frames_in_flight: usize,
}

/// Per-frame inputs to [`RenderPipeline::execute`]
pub struct FrameInputs<'a> {
    /// Frame-in-flight slot selecting the secondary command buffer
    pub frame_slot: usize,
    /// Acquired swapchain image
    pub image_index: u32,
    /// Global table for this frame slot, bound at set 0
    pub global_table: vk::DescriptorSet,
    /// Producers by kind
    pub producers: &'a ProducerRegistry,
    /// Completion signals of producer tasks
    pub waits: &'a WaitPoints,
    /// Frame-wide push constant inputs
    pub parameters: PushParameters,
}

/// Outcome of one [`RenderPipeline::execute`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecuteReport {
    /// Whether a secondary was recorded for this frame
    pub included: bool,
    /// Draw calls recorded
    pub draws: usize,
    /// Records skipped for visibility, instance count or filter
    pub skipped: usize,
}

/// One configured rendering stage
pub struct RenderPipeline {
    descriptor: PipelineDescriptor,
    first_writes: Vec<RenderTargetId>,
    render_pass: RenderPassHandle,
    render_passes: BTreeMap<u32, RenderPassHandle>,
    active_pass: RenderPassHandle,
    swapchain_format: vk::Format,
    framebuffers: Vec<FramebufferHandle>,
    layout: PipelineLayoutHandle,
    read_layout: Option<TableLayoutHandle>,
    read_table: Option<RenderDataTableHandle>,
    target_sampler: SamplerHandle,
    pipeline: GraphicsPipelineHandle,
    command_buffers: Vec<CommandBuffer>,
    clear_values: Vec<vk::ClearValue>,
    extent: vk::Extent2D,
    include_in_render: bool,
}

impl RenderPipeline {
    /// Create every GPU object the descriptor needs.
    ///
    /// `first_writes` lists the targets this pipeline writes first in the
    /// compiled order; the compiled render pass starts those from an undefined
    /// layout, cleared when the descriptor asks for it, and loads the rest.
    pub fn initialize(
        factory: &mut ResourceFactory,
        setup: &mut PipelineSetup<'_>,
        descriptor: PipelineDescriptor,
        first_writes: Vec<RenderTargetId>,
    ) -> VulkanResult<Self> {
        if descriptor.color_targets.is_empty() && descriptor.depth.is_none() {
            return Err(VulkanError::invalid(format!("pipeline {} has no attachments", descriptor.name)));
        }
        let device = Arc::clone(factory.device());

        let swapchain_format = setup.swapchain.format().format;
        let pass_desc = render_pass_desc(&descriptor, &first_writes, &first_writes, swapchain_format);
        let render_pass = factory.create_render_pass(&pass_desc)?;
        let mut render_passes = BTreeMap::new();
        render_passes.insert(fresh_mask(&descriptor, &first_writes), render_pass);
        let extent = descriptor.resolution.extent(setup.swapchain.extent());
        let framebuffers = create_framebuffers(factory, &descriptor, render_pass, setup.swapchain, setup.targets, extent)?;

        let (read_layout, read_table) = if descriptor.read_targets.is_empty() {
            (None, None)
        } else {
            let bindings: Vec<TableBinding> = (0..descriptor.read_targets.len())
                .map(|binding| TableBinding {
                    binding: binding as u32,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    count: 1,
                    stages: vk::ShaderStageFlags::FRAGMENT,
                })
                .collect();
            let layout = factory.create_table_layout(&bindings)?;
            let writes = read_bindings(&descriptor, setup.targets, setup.target_sampler)?;
            let table = factory.create_render_data_table(layout, &writes)?;
            (Some(layout), Some(table))
        };

        let mut set_layouts = vec![setup.global_layout];
        set_layouts.extend(read_layout);
        let push = descriptor.draw.push_layout();
        let push_ranges: Vec<vk::PushConstantRange> = push.range().into_iter().collect();
        let layout = factory.create_pipeline_layout(&set_layouts, &push_ranges)?;

        let mut stages = Vec::new();
        for (stage, name) in descriptor.shaders.stages() {
            let module = setup.shaders.module(factory, name)?;
            stages.push(PipelineStage {
                stage,
                module: factory.shader_module(module)?,
            });
        }
        if stages.is_empty() {
            return Err(VulkanError::invalid(format!("pipeline {} has no shader stages", descriptor.name)));
        }

        let pipeline = factory.create_graphics_pipeline(&GraphicsPipelineDesc {
            layout: factory.pipeline_layout(layout)?,
            render_pass: factory.render_pass(render_pass)?,
            subpass: 0,
            stages,
            vertex_bindings: descriptor.vertex_input.bindings(),
            vertex_attributes: descriptor.vertex_input.attributes(),
            topology: descriptor.topology.to_vk(),
            cull_mode: descriptor.cull.to_vk(),
            depth: depth_state(&descriptor),
            stencil: StencilState {
                test_enable: descriptor.stencil.enabled,
                ops: descriptor.stencil.to_vk(),
            },
            color_blend: vec![descriptor.blend.to_vk(); descriptor.color_targets.len()],
            patch_control_points: descriptor.patch_control_points,
        })?;

        let mut command_buffers = Vec::with_capacity(setup.frames_in_flight);
        for _ in 0..setup.frames_in_flight {
            command_buffers.push(CommandBuffer::allocate(
                device.as_ref(),
                setup.command_pool,
                vk::CommandBufferLevel::SECONDARY,
            )?);
        }

        log::info!(
            "Pipeline {} initialized: {} color targets, depth {:?}, {}x{}",
            descriptor.name,
            descriptor.color_targets.len(),
            descriptor.depth,
            extent.width,
            extent.height
        );

        Ok(Self {
            clear_values: clear_values(&descriptor),
            descriptor,
            first_writes,
            render_pass,
            render_passes,
            active_pass: render_pass,
            swapchain_format,
            framebuffers,
            layout,
            read_layout,
            read_table,
            target_sampler: setup.target_sampler,
            pipeline,
            command_buffers,
            extent,
            include_in_render: false,
        })
    }

    /// Record this frame's secondary, or opt out when the producer is empty
    pub fn execute(&mut self, factory: &ResourceFactory, inputs: &FrameInputs<'_>) -> VulkanResult<ExecuteReport> {
        let mut report = ExecuteReport::default();

        let producer = match self.descriptor.draw {
            DrawPolicy::FullscreenTriangle => None,
            DrawPolicy::Instances { producer, .. } => match inputs.producers.get(producer) {
                Some(source) if !source.is_empty() => Some(Arc::clone(source)),
                _ => {
                    log::trace!("Pipeline {} skipped: no {:?} instances", self.descriptor.name, producer);
                    self.include_in_render = false;
                    return Ok(report);
                }
            },
        };

        let device = Arc::clone(factory.device());
        let device = device.as_ref();
        let inheritance = InheritanceInfo {
            render_pass: factory.render_pass(self.render_pass)?,
            subpass: 0,
            framebuffer: factory.framebuffer(self.framebuffer_handle(inputs.image_index)?)?,
        };
        let layout = factory.pipeline_layout(self.layout)?;
        let pipeline = factory.graphics_pipeline(self.pipeline)?;
        let read_table = self.read_table.map(|t| factory.render_data_table(t)).transpose()?;

        let slot = inputs.frame_slot % self.command_buffers.len().max(1);
        let cb = self
            .command_buffers
            .get_mut(slot)
            .ok_or_else(|| VulkanError::invalid("pipeline has no command buffers"))?;
        cb.reset(device)?;
        cb.begin_secondary(
            device,
            vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE | vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            inheritance,
        )?;
        cb.bind_graphics_pipeline(device, pipeline)?;
        cb.set_viewport_and_scissor(device, self.extent)?;
        cb.bind_tables(device, layout, 0, &[inputs.global_table])?;
        if let Some(table) = read_table {
            cb.bind_tables(device, layout, 1, &[table])?;
        }

        inputs.waits.wait_all(&self.descriptor.waits);

        match (self.descriptor.draw, producer) {
            (DrawPolicy::Instances { view, filter, push, .. }, Some(producer)) => {
                let draw = RecordDraw {
                    device,
                    factory,
                    layout,
                    vertex_input: self.descriptor.vertex_input,
                    view,
                    push,
                    parameters: &inputs.parameters,
                };
                let mut failure = None;
                producer.for_each_record(&mut |record| {
                    if failure.is_some() {
                        return;
                    }
                    if !record.visible_to(view) || !filter.accepts(record) {
                        report.skipped += 1;
                        return;
                    }
                    match draw.record(cb, record) {
                        Ok(true) => report.draws += 1,
                        Ok(false) => report.skipped += 1,
                        Err(e) => failure = Some(e),
                    }
                });
                if let Some(e) = failure {
                    return Err(e);
                }
            }
            _ => {
                cb.draw(device, 3, 1)?;
                report.draws += 1;
            }
        }

        cb.end(device)?;
        self.include_in_render = true;
        report.included = true;
        log::trace!(
            "Pipeline {} recorded {} draws, skipped {}",
            self.descriptor.name,
            report.draws,
            report.skipped
        );
        Ok(report)
    }

    /// Choose this frame's render pass from `fresh`, the targets no earlier
    /// included pipeline wrote this frame.
    ///
    /// A fresh attachment starts undefined. It is cleared when the descriptor
    /// asks for a clear or when this pipeline expected an earlier writer, and
    /// left to be overwritten otherwise. Every other attachment is loaded.
    pub fn select_attachments(&mut self, factory: &mut ResourceFactory, fresh: &[RenderTargetId]) -> VulkanResult<()> {
        let mask = fresh_mask(&self.descriptor, fresh);
        self.active_pass = match self.render_passes.get(&mask) {
            Some(&pass) => pass,
            None => {
                let desc = render_pass_desc(&self.descriptor, &self.first_writes, fresh, self.swapchain_format);
                let pass = factory.create_render_pass(&desc)?;
                log::debug!(
                    "Pipeline {} added render pass for fresh attachments {:#b}",
                    self.descriptor.name,
                    mask
                );
                self.render_passes.insert(mask, pass);
                pass
            }
        };
        Ok(())
    }

    /// Splice this frame's secondary into `primary` inside the render pass
    /// picked by [`Self::select_attachments`]. Does nothing when the pipeline
    /// opted out.
    pub fn record_into(
        &mut self,
        factory: &ResourceFactory,
        primary: &mut CommandBuffer,
        frame_slot: usize,
        image_index: u32,
    ) -> VulkanResult<bool> {
        if !self.include_in_render {
            return Ok(false);
        }
        let device = Arc::clone(factory.device());
        let device = device.as_ref();
        let render_pass = factory.render_pass(self.active_pass)?;
        let framebuffer = factory.framebuffer(self.framebuffer_handle(image_index)?)?;
        let slot = frame_slot % self.command_buffers.len().max(1);
        let secondary = self
            .command_buffers
            .get_mut(slot)
            .ok_or_else(|| VulkanError::invalid("pipeline has no command buffers"))?;

        primary.begin_render_pass(
            device,
            render_pass,
            framebuffer,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            },
            &self.clear_values,
            vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
        )?;
        primary.execute_secondaries(device, &mut [secondary])?;
        primary.end_render_pass(device)?;
        Ok(true)
    }

    /// Recreate framebuffers and rewrite the read table after the swapchain
    /// or swapchain-sized targets were recreated
    pub fn rebind_targets(
        &mut self,
        factory: &mut ResourceFactory,
        swapchain: &SwapchainManager,
        targets: &RenderTargetRegistry,
    ) -> VulkanResult<()> {
        for framebuffer in self.framebuffers.drain(..) {
            factory.destroy_framebuffer(framebuffer)?;
        }
        self.extent = self.descriptor.resolution.extent(swapchain.extent());
        self.framebuffers = create_framebuffers(factory, &self.descriptor, self.render_pass, swapchain, targets, self.extent)?;
        if let Some(table) = self.read_table {
            let writes = read_bindings(&self.descriptor, targets, self.target_sampler)?;
            factory.update_render_data_table(table, &writes)?;
        }
        log::debug!(
            "Pipeline {} rebound at {}x{}",
            self.descriptor.name,
            self.extent.width,
            self.extent.height
        );
        Ok(())
    }

    /// Destroy every object this pipeline created
    pub fn release(self, factory: &mut ResourceFactory) -> VulkanResult<()> {
        let device = Arc::clone(factory.device());
        for command_buffer in self.command_buffers {
            command_buffer.free(device.as_ref());
        }
        factory.destroy_graphics_pipeline(self.pipeline)?;
        factory.destroy_pipeline_layout(self.layout)?;
        if let Some(table) = self.read_table {
            factory.destroy_render_data_table(table)?;
        }
        if let Some(layout) = self.read_layout {
            factory.destroy_table_layout(layout)?;
        }
        for framebuffer in self.framebuffers {
            factory.destroy_framebuffer(framebuffer)?;
        }
        for render_pass in self.render_passes.into_values() {
            factory.destroy_render_pass(render_pass)?;
        }
        log::debug!("Pipeline {} released", self.descriptor.name);
        Ok(())
    }

    /// Stage name
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Descriptor the pipeline was built from
    pub fn descriptor(&self) -> &PipelineDescriptor {
        &self.descriptor
    }

    /// Targets first written by this pipeline
    pub fn first_writes(&self) -> &[RenderTargetId] {
        &self.first_writes
    }

    /// Whether the last `execute` recorded a secondary
    pub fn include_in_render(&self) -> bool {
        self.include_in_render
    }

    /// Render extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Compiled render pass; framebuffers and secondaries are built against it
    pub fn render_pass(&self) -> RenderPassHandle {
        self.render_pass
    }

    /// Render pass the next `record_into` begins
    pub fn active_render_pass(&self) -> RenderPassHandle {
        self.active_pass
    }

    /// Number of render pass variants created so far
    pub fn render_pass_variants(&self) -> usize {
        self.render_passes.len()
    }

    /// Framebuffers, one per swapchain image when presenting
    pub fn framebuffers(&self) -> &[FramebufferHandle] {
        &self.framebuffers
    }

    /// Secondary command buffer of a frame slot
    pub fn command_buffer(&self, frame_slot: usize) -> Option<&CommandBuffer> {
        self.command_buffers.get(frame_slot)
    }

    fn framebuffer_handle(&self, image_index: u32) -> VulkanResult<FramebufferHandle> {
        let index = if self.descriptor.targets_swapchain() {
            image_index as usize
        } else {
            0
        };
        self.framebuffers
            .get(index)
            .copied()
            .ok_or_else(|| VulkanError::not_found("framebuffer", (self.descriptor.name.as_str(), image_index)))
    }
}

/// Borrowed state for recording one record's draw
struct RecordDraw<'a> {
    device: &'a dyn GpuDevice,
    factory: &'a ResourceFactory,
    layout: vk::PipelineLayout,
    vertex_input: VertexInput,
    view: VisibilityFlags,
    push: PushLayout,
    parameters: &'a PushParameters,
}

impl RecordDraw<'_> {
    /// Push constants, bind buffers and draw; `false` when the record was skipped
    fn record(&self, cb: &mut CommandBuffer, record: &InstanceRecord) -> VulkanResult<bool> {
        let device = self.device;
        match (self.vertex_input, record.instance_buffer) {
            (VertexInput::None, _) => {}
            (VertexInput::Mesh, _) => {
                let vertex = self.factory.buffer(record.vertex_buffer)?.raw;
                cb.bind_vertex_buffers(device, 0, &[vertex], &[record.vertex_offset])?;
            }
            (VertexInput::MeshInstanced, Some(instances)) => {
                let vertex = self.factory.buffer(record.vertex_buffer)?.raw;
                let instances = self.factory.buffer(instances)?.raw;
                cb.bind_vertex_buffers(
                    device,
                    0,
                    &[vertex, instances],
                    &[record.vertex_offset, record.instance_offset],
                )?;
            }
            (VertexInput::MeshInstanced, None) => {
                log::warn!("Instanced pipeline got a record without an instance buffer");
                return Ok(false);
            }
        }

        if let Some(bytes) = self.push.encode(record, self.view, self.parameters) {
            cb.record(
                device,
                Command::PushConstants {
                    layout: self.layout,
                    stages: self.push.stages(),
                    offset: 0,
                    data: &bytes,
                },
            )?;
        }

        match record.index_buffer {
            Some(indices) => {
                let indices = self.factory.buffer(indices)?.raw;
                cb.bind_index_buffer(device, indices, 0)?;
                cb.draw_indexed(device, record.index_count, record.instance_count, record.first_index, 0)?;
            }
            None => cb.draw(device, record.vertex_count, record.instance_count)?,
        }
        Ok(true)
    }
}

fn depth_state(descriptor: &PipelineDescriptor) -> DepthState {
    if descriptor.depth.is_none() {
        return DepthState {
            test_enable: false,
            write_enable: false,
            compare_op: vk::CompareOp::ALWAYS,
        };
    }
    DepthState {
        test_enable: descriptor.depth_state.test,
        write_enable: descriptor.depth_state.write,
        compare_op: descriptor.depth_state.compare.to_vk(),
    }
}

fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

/// How an attachment begins its render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachmentStart {
    /// Undefined contents cleared to the target's clear value
    Clear,
    /// Undefined contents the pipeline overwrites
    Discard,
    /// Earlier contents in the resting layout
    Load,
}

impl AttachmentStart {
    fn of(id: RenderTargetId, fresh: &[RenderTargetId], first_writes: &[RenderTargetId], clear: bool) -> Self {
        if !fresh.contains(&id) {
            Self::Load
        } else if clear || !first_writes.contains(&id) {
            Self::Clear
        } else {
            Self::Discard
        }
    }
}

/// Bit per attachment, colors first then depth, set when it is fresh
fn fresh_mask(descriptor: &PipelineDescriptor, fresh: &[RenderTargetId]) -> u32 {
    descriptor
        .color_targets
        .iter()
        .chain(descriptor.depth.iter())
        .enumerate()
        .filter(|(_, id)| fresh.contains(*id))
        .fold(0, |mask, (bit, _)| mask | (1_u32 << bit))
}

fn attachment(id: RenderTargetId, format: vk::Format, start: AttachmentStart) -> vk::AttachmentDescription {
    let load_op = match start {
        AttachmentStart::Clear => vk::AttachmentLoadOp::CLEAR,
        AttachmentStart::Discard => vk::AttachmentLoadOp::DONT_CARE,
        AttachmentStart::Load => vk::AttachmentLoadOp::LOAD,
    };
    let (stencil_load_op, stencil_store_op) = if has_stencil(format) {
        (load_op, vk::AttachmentStoreOp::STORE)
    } else {
        (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
    };
    vk::AttachmentDescription {
        flags: vk::AttachmentDescriptionFlags::empty(),
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op,
        stencil_store_op,
        initial_layout: match start {
            AttachmentStart::Load => id.resting_layout(),
            AttachmentStart::Clear | AttachmentStart::Discard => vk::ImageLayout::UNDEFINED,
        },
        final_layout: id.resting_layout(),
    }
}

fn render_pass_desc(
    descriptor: &PipelineDescriptor,
    first_writes: &[RenderTargetId],
    fresh: &[RenderTargetId],
    swapchain_format: vk::Format,
) -> RenderPassDesc {
    let start = |id| AttachmentStart::of(id, fresh, first_writes, descriptor.clear);
    let mut desc = RenderPassDesc::default();
    for &id in &descriptor.color_targets {
        let format = id.format().unwrap_or(swapchain_format);
        desc.color_references.push(vk::AttachmentReference {
            attachment: desc.attachments.len() as u32,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        });
        desc.attachments.push(attachment(id, format, start(id)));
    }
    if let Some(id) = descriptor.depth {
        let format = id.format().unwrap_or(vk::Format::D32_SFLOAT);
        desc.depth_reference = Some(vk::AttachmentReference {
            attachment: desc.attachments.len() as u32,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        });
        desc.attachments.push(attachment(id, format, start(id)));
    }

    let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let attachment_access = vk::AccessFlags::COLOR_ATTACHMENT_READ
        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    desc.dependencies = vec![
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: attachment_stages | vk::PipelineStageFlags::FRAGMENT_SHADER,
            dst_stage_mask: attachment_stages | vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_access_mask: attachment_access | vk::AccessFlags::SHADER_READ,
            dependency_flags: vk::DependencyFlags::empty(),
        },
        vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: attachment_stages,
            dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER | attachment_stages,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::SHADER_READ | attachment_access,
            dependency_flags: vk::DependencyFlags::empty(),
        },
    ];
    desc
}

fn clear_values(descriptor: &PipelineDescriptor) -> Vec<vk::ClearValue> {
    descriptor
        .color_targets
        .iter()
        .chain(descriptor.depth.iter())
        .map(|id| match id.clear_value() {
            ImageClear::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            ImageClear::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        })
        .collect()
}

fn attachment_views(
    descriptor: &PipelineDescriptor,
    swapchain_view: Option<vk::ImageView>,
    factory: &ResourceFactory,
    targets: &RenderTargetRegistry,
) -> VulkanResult<Vec<vk::ImageView>> {
    descriptor
        .color_targets
        .iter()
        .chain(descriptor.depth.iter())
        .map(|&id| match id {
            RenderTargetId::Swapchain => {
                swapchain_view.ok_or_else(|| VulkanError::invalid("swapchain has no image views"))
            }
            other => targets.view(factory, other),
        })
        .collect()
}

fn create_framebuffers(
    factory: &mut ResourceFactory,
    descriptor: &PipelineDescriptor,
    render_pass: RenderPassHandle,
    swapchain: &SwapchainManager,
    targets: &RenderTargetRegistry,
    extent: vk::Extent2D,
) -> VulkanResult<Vec<FramebufferHandle>> {
    let raw_pass = factory.render_pass(render_pass)?;
    let swapchain_views: Vec<Option<vk::ImageView>> = if descriptor.targets_swapchain() {
        swapchain.image_views().iter().copied().map(Some).collect()
    } else {
        vec![None]
    };
    let mut framebuffers = Vec::with_capacity(swapchain_views.len());
    for view in swapchain_views {
        let attachments = attachment_views(descriptor, view, factory, targets)?;
        framebuffers.push(factory.create_framebuffer(&FramebufferDesc {
            render_pass: raw_pass,
            attachments,
            extent,
        })?);
    }
    Ok(framebuffers)
}

fn read_bindings(
    descriptor: &PipelineDescriptor,
    targets: &RenderTargetRegistry,
    sampler: SamplerHandle,
) -> VulkanResult<Vec<RenderDataTableBinding>> {
    descriptor
        .read_targets
        .iter()
        .enumerate()
        .map(|(binding, &id)| targets.sampled_binding(id, binding as u32, sampler))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessDevice, ObjectKind, QueueType, RecordedCommand, SamplerDesc};
    use crate::pipelines::shaders::minimal_spirv;
    use crate::pipelines::{CompareOp, DepthConfig, Resolution, ShaderSet};
    use crate::producers::{InstanceStore, ProducerKind, RenderProducer};
    use crate::resources::{BufferDesc, BufferHandle, MemoryLocation};
    use crate::swapchain::SwapchainSettings;
    use crate::config::RendererConfig;

    struct Fixture {
        device: Arc<HeadlessDevice>,
        factory: ResourceFactory,
        swapchain: SwapchainManager,
        targets: RenderTargetRegistry,
        shaders: ShaderLibrary,
        global_layout: TableLayoutHandle,
        global_table: vk::DescriptorSet,
        sampler: SamplerHandle,
        pool: vk::CommandPool,
    }

    impl Fixture {
        fn new() -> Self {
            let device = Arc::new(HeadlessDevice::new());
            let mut factory = ResourceFactory::new(device.clone() as Arc<dyn GpuDevice>).unwrap();
            let mut swapchain = SwapchainManager::new(SwapchainSettings::from(&RendererConfig::default()));
            swapchain.initialize(device.as_ref()).unwrap();
            let mut targets = RenderTargetRegistry::new();
            for id in [RenderTargetId::Scene, RenderTargetId::SceneDepth] {
                targets
                    .allocate(&mut factory, id, Resolution::Swapchain, swapchain.extent())
                    .unwrap();
            }
            let mut shaders = ShaderLibrary::new("unused");
            for name in ["v.spv", "f.spv", "fullscreen_vert.spv", "post.spv"] {
                shaders.insert_source(name, minimal_spirv());
            }
            let global_layout = factory
                .create_table_layout(&[TableBinding {
                    binding: 0,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    count: 1,
                    stages: vk::ShaderStageFlags::ALL_GRAPHICS,
                }])
                .unwrap();
            let global = factory.create_render_data_table(global_layout, &[]).unwrap();
            let global_table = factory.render_data_table(global).unwrap();
            let sampler = factory.create_sampler(&SamplerDesc::default()).unwrap();
            let pool = device
                .create_command_pool(QueueType::Graphics, vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                .unwrap();
            Self {
                device,
                factory,
                swapchain,
                targets,
                shaders,
                global_layout,
                global_table,
                sampler,
                pool,
            }
        }

        fn pipeline(&mut self, descriptor: PipelineDescriptor, first_writes: Vec<RenderTargetId>) -> RenderPipeline {
            let mut setup = PipelineSetup {
                swapchain: &self.swapchain,
                targets: &self.targets,
                shaders: &mut self.shaders,
                global_layout: self.global_layout,
                target_sampler: self.sampler,
                command_pool: self.pool,
                frames_in_flight: 2,
            };
            RenderPipeline::initialize(&mut self.factory, &mut setup, descriptor, first_writes).unwrap()
        }

        fn vertex_buffer(&mut self) -> BufferHandle {
            self.factory
                .create_buffer(&BufferDesc {
                    size: 96,
                    usage: vk::BufferUsageFlags::VERTEX_BUFFER,
                    location: MemoryLocation::HostVisible,
                    initial_data: None,
                })
                .unwrap()
        }
    }

    fn scene_descriptor() -> PipelineDescriptor {
        PipelineDescriptor::instanced(
            "scene",
            ShaderSet::vertex_fragment("v.spv", "f.spv"),
            ProducerKind::Models,
            VisibilityFlags::CAMERA,
            PushLayout::ModelTransform,
        )
        .with_color_targets(&[RenderTargetId::Scene])
        .with_depth(RenderTargetId::SceneDepth, DepthConfig::read_write(CompareOp::Less))
        .with_clear()
    }

    fn inputs<'a>(fixture: &Fixture, producers: &'a ProducerRegistry, waits: &'a WaitPoints) -> FrameInputs<'a> {
        FrameInputs {
            frame_slot: 0,
            image_index: 0,
            global_table: fixture.global_table,
            producers,
            waits,
            parameters: PushParameters::default(),
        }
    }

    #[test]
    fn first_write_clears_from_undefined() {
        let descriptor = scene_descriptor();
        let first = [RenderTargetId::Scene, RenderTargetId::SceneDepth];
        let desc = render_pass_desc(&descriptor, &first, &first, vk::Format::B8G8R8A8_UNORM);
        let color = desc.attachments[0];
        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(color.final_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        let depth = desc.attachments[1];
        assert_eq!(depth.stencil_load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(depth.final_layout, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
        assert_eq!(desc.depth_reference.map(|r| r.attachment), Some(1));
    }

    #[test]
    fn later_writes_load_from_resting_layout() {
        let descriptor = PipelineDescriptor::fullscreen("ui", "post.spv", RenderTargetId::Swapchain);
        let desc = render_pass_desc(&descriptor, &[], &[], vk::Format::B8G8R8A8_UNORM);
        assert_eq!(desc.attachments[0].format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(desc.attachments[0].load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(desc.attachments[0].initial_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(desc.attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert!(desc.depth_reference.is_none());
    }

    #[test]
    fn fresh_later_writer_clears_even_without_clear_request() {
        let descriptor = PipelineDescriptor::fullscreen("overlay", "post.spv", RenderTargetId::Scene);
        let scene = [RenderTargetId::Scene];
        let overlay = render_pass_desc(&descriptor, &[], &scene, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(overlay.attachments[0].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(overlay.attachments[0].initial_layout, vk::ImageLayout::UNDEFINED);

        let first = render_pass_desc(&descriptor, &scene, &scene, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(first.attachments[0].load_op, vk::AttachmentLoadOp::DONT_CARE);
    }

    #[test]
    fn selecting_attachments_reuses_variants() {
        let mut fixture = Fixture::new();
        let mut pipeline = fixture.pipeline(scene_descriptor(), vec![]);
        let compiled = pipeline.render_pass();
        let fresh = [RenderTargetId::Scene, RenderTargetId::SceneDepth];

        pipeline.select_attachments(&mut fixture.factory, &fresh).unwrap();
        let cleared = pipeline.active_render_pass();
        assert_ne!(cleared, compiled);
        let raw = fixture.factory.render_pass(cleared).unwrap();
        let desc = fixture.device.render_pass_desc(raw).unwrap();
        assert!(desc
            .attachments
            .iter()
            .all(|a| a.load_op == vk::AttachmentLoadOp::CLEAR && a.initial_layout == vk::ImageLayout::UNDEFINED));

        pipeline.select_attachments(&mut fixture.factory, &[]).unwrap();
        assert_eq!(pipeline.active_render_pass(), compiled);
        pipeline.select_attachments(&mut fixture.factory, &fresh).unwrap();
        assert_eq!(pipeline.active_render_pass(), cleared);
        assert_eq!(pipeline.render_pass_variants(), 2);

        let before = fixture.device.live_count(ObjectKind::RenderPass);
        pipeline.release(&mut fixture.factory).unwrap();
        assert_eq!(fixture.device.live_count(ObjectKind::RenderPass), before - 2);
        assert!(fixture.device.invalid_destroys().is_empty());
    }

    #[test]
    fn swapchain_pipelines_get_one_framebuffer_per_image() {
        let mut fixture = Fixture::new();
        let pipeline = fixture.pipeline(
            PipelineDescriptor::fullscreen("post", "post.spv", RenderTargetId::Swapchain),
            vec![RenderTargetId::Swapchain],
        );
        assert_eq!(pipeline.framebuffers().len(), fixture.swapchain.image_count());
        let offscreen = fixture.pipeline(scene_descriptor(), vec![RenderTargetId::Scene]);
        assert_eq!(offscreen.framebuffers().len(), 1);
    }

    #[test]
    fn empty_producer_skips_without_recording() {
        let mut fixture = Fixture::new();
        let mut pipeline = fixture.pipeline(scene_descriptor(), vec![RenderTargetId::Scene]);
        let mut producers = ProducerRegistry::new();
        producers.register(ProducerKind::Models, Arc::new(InstanceStore::new()));
        let waits = WaitPoints::new();
        fixture.device.clear_calls();

        let report = pipeline.execute(&fixture.factory, &inputs(&fixture, &producers, &waits)).unwrap();
        assert_eq!(report, ExecuteReport::default());
        assert!(!pipeline.include_in_render());
        assert!(fixture.device.calls().is_empty());
    }

    #[test]
    fn records_one_draw_per_visible_record() {
        let mut fixture = Fixture::new();
        let mut pipeline = fixture.pipeline(scene_descriptor(), vec![RenderTargetId::Scene]);
        let vertices = fixture.vertex_buffer();
        let store = Arc::new(InstanceStore::new());
        store.replace(vec![
            InstanceRecord::new(vertices, 3),
            InstanceRecord::new(vertices, 3).with_visibility(VisibilityFlags::SHADOW_MAP_0),
            InstanceRecord::new(vertices, 6),
        ]);
        let mut producers = ProducerRegistry::new();
        producers.register(ProducerKind::Models, store.clone() as Arc<dyn RenderProducer>);
        let waits = WaitPoints::new();

        let report = pipeline.execute(&fixture.factory, &inputs(&fixture, &producers, &waits)).unwrap();
        assert_eq!(report.draws, 2);
        assert_eq!(report.skipped, 1);
        assert!(pipeline.include_in_render());

        let cb = pipeline.command_buffer(0).unwrap().handle();
        let recorded = fixture.device.recorded(cb);
        assert!(matches!(recorded[0], RecordedCommand::BindPipeline(_)));
        assert!(recorded
            .iter()
            .any(|c| matches!(c, RecordedCommand::BindDescriptorSets { first_set: 0, .. })));
        let draws: Vec<u32> = recorded
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Draw { vertex_count, .. } => Some(*vertex_count),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![3, 6]);
        let pushes = recorded
            .iter()
            .filter(|c| matches!(c, RecordedCommand::PushConstants { .. }))
            .count();
        assert_eq!(pushes, 2);
    }

    #[test]
    fn fullscreen_pass_draws_one_triangle() {
        let mut fixture = Fixture::new();
        let mut pipeline = fixture.pipeline(
            PipelineDescriptor::fullscreen("post", "post.spv", RenderTargetId::Swapchain).with_reads(&[RenderTargetId::Scene]),
            vec![RenderTargetId::Swapchain],
        );
        let producers = ProducerRegistry::new();
        let waits = WaitPoints::new();
        let report = pipeline.execute(&fixture.factory, &inputs(&fixture, &producers, &waits)).unwrap();
        assert_eq!(report.draws, 1);

        let recorded = fixture.device.recorded(pipeline.command_buffer(0).unwrap().handle());
        assert!(recorded
            .iter()
            .any(|c| matches!(c, RecordedCommand::BindDescriptorSets { first_set: 1, .. })));
        assert!(recorded.contains(&RecordedCommand::Draw {
            vertex_count: 3,
            instance_count: 1
        }));
    }

    #[test]
    fn release_destroys_everything_it_created() {
        let mut fixture = Fixture::new();
        let before = fixture.factory.total_tracked();
        let pipeline = fixture.pipeline(
            PipelineDescriptor::fullscreen("post", "post.spv", RenderTargetId::Swapchain).with_reads(&[RenderTargetId::Scene]),
            vec![RenderTargetId::Swapchain],
        );
        pipeline.release(&mut fixture.factory).unwrap();
        fixture.shaders.release(&mut fixture.factory).unwrap();
        assert_eq!(fixture.factory.total_tracked(), before);
    }
}
