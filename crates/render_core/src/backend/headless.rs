//! Recording GPU device
//!
//! [`HeadlessDevice`] implements [`GpuDevice`] without touching a GPU. Every
//! created object gets a unique fake handle, every call lands in an ordered log
//! and recorded commands are kept per command buffer, so tests can drive the
//! swapchain, factory, pipelines and orchestrator and then inspect what the
//! device would have seen.

use std::collections::{HashMap, HashSet};

use ash::vk::{self, Handle};
use parking_lot::Mutex;

use crate::backend::device::{
    DescriptorWrite, FramebufferDesc, GpuDevice, GraphicsPipelineDesc, ImageDesc, ImageViewDesc,
    InheritanceInfo, QueueFamilyIndices, QueueType, RenderPassDesc, SamplerDesc, SubmitBatch,
    SwapchainDesc, TableBinding,
};
use crate::backend::{VulkanError, VulkanResult};
use crate::commands::Command;

/// Kind of device object tracked by the headless device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// `vk::Buffer`
    Buffer,
    /// `vk::DeviceMemory`
    Memory,
    /// `vk::Image`
    Image,
    /// `vk::ImageView`
    ImageView,
    /// `vk::Sampler`
    Sampler,
    /// `vk::ShaderModule`
    ShaderModule,
    /// `vk::DescriptorSetLayout`
    DescriptorSetLayout,
    /// `vk::DescriptorPool`
    DescriptorPool,
    /// `vk::DescriptorSet`
    DescriptorSet,
    /// `vk::PipelineLayout`
    PipelineLayout,
    /// `vk::RenderPass`
    RenderPass,
    /// `vk::Framebuffer`
    Framebuffer,
    /// `vk::Pipeline`
    Pipeline,
    /// `vk::Fence`
    Fence,
    /// `vk::Semaphore`
    Semaphore,
    /// `vk::Event`
    Event,
    /// `vk::QueryPool`
    QueryPool,
    /// `vk::CommandPool`
    CommandPool,
    /// `vk::CommandBuffer`
    CommandBuffer,
    /// `vk::SwapchainKHR`
    Swapchain,
}

/// One entry of the device call log
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    /// An object was created
    Created(ObjectKind, u64),
    /// An object was destroyed
    Destroyed(ObjectKind, u64),
    /// Host data was written into memory
    WriteMemory {
        /// Destination memory
        memory: u64,
        /// Bytes written
        size: usize,
    },
    /// A descriptor set was updated
    UpdateDescriptorSet {
        /// Updated set
        set: u64,
        /// Writes applied
        writes: Vec<DescriptorWrite>,
    },
    /// Recording began
    BeginCommandBuffer {
        /// Command buffer
        buffer: u64,
        /// Whether inheritance info was supplied
        secondary: bool,
    },
    /// Recording ended
    EndCommandBuffer(u64),
    /// A command buffer was reset
    ResetCommandBuffer(u64),
    /// A queue submission
    Submit {
        /// Target queue
        queue: QueueType,
        /// All command buffers across batches
        command_buffers: Vec<vk::CommandBuffer>,
        /// All wait semaphores across batches
        wait_semaphores: Vec<vk::Semaphore>,
        /// All signal semaphores across batches
        signal_semaphores: Vec<vk::Semaphore>,
        /// Fence signaled on completion
        fence: vk::Fence,
    },
    /// Fences waited on
    WaitForFences(Vec<vk::Fence>),
    /// Fences reset
    ResetFences(Vec<vk::Fence>),
    /// A swapchain image was acquired
    Acquire {
        /// Acquired image
        image_index: u32,
        /// Semaphore signaled
        semaphore: vk::Semaphore,
    },
    /// A swapchain image was presented
    Present {
        /// Presented image
        image_index: u32,
        /// Semaphores waited on
        wait_semaphores: Vec<vk::Semaphore>,
    },
    /// Device idle wait
    WaitIdle,
    /// Queue idle wait
    QueueWaitIdle(QueueType),
}

/// Owned summary of a recorded [`Command`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// `vkCmdBeginRenderPass`
    BeginRenderPass {
        /// Render pass
        render_pass: vk::RenderPass,
        /// Framebuffer
        framebuffer: vk::Framebuffer,
        /// Subpass contents
        contents: vk::SubpassContents,
    },
    /// `vkCmdNextSubpass`
    NextSubpass,
    /// `vkCmdEndRenderPass`
    EndRenderPass,
    /// `vkCmdBindPipeline`
    BindPipeline(vk::Pipeline),
    /// `vkCmdBindDescriptorSets`
    BindDescriptorSets {
        /// First set index
        first_set: u32,
        /// Bound sets
        sets: Vec<vk::DescriptorSet>,
    },
    /// `vkCmdBindVertexBuffers`
    BindVertexBuffers {
        /// First binding
        first_binding: u32,
        /// Bound buffers
        buffers: Vec<vk::Buffer>,
    },
    /// `vkCmdBindIndexBuffer`
    BindIndexBuffer(vk::Buffer),
    /// `vkCmdPushConstants`
    PushConstants {
        /// Stages receiving the data
        stages: vk::ShaderStageFlags,
        /// Byte offset
        offset: u32,
        /// Pushed bytes
        data: Vec<u8>,
    },
    /// `vkCmdSetViewport`
    SetViewport,
    /// `vkCmdSetScissor`
    SetScissor,
    /// `vkCmdDraw`
    Draw {
        /// Vertices per instance
        vertex_count: u32,
        /// Instances
        instance_count: u32,
    },
    /// `vkCmdDrawIndexed`
    DrawIndexed {
        /// Indices per instance
        index_count: u32,
        /// Instances
        instance_count: u32,
    },
    /// `vkCmdDispatch`
    Dispatch([u32; 3]),
    /// `vkCmdTraceRaysKHR`
    TraceRays([u32; 3]),
    /// `vkCmdBuildAccelerationStructuresKHR`
    BuildAccelerationStructures(usize),
    /// `vkCmdCopyBuffer`
    CopyBuffer {
        /// Source
        src: vk::Buffer,
        /// Destination
        dst: vk::Buffer,
    },
    /// `vkCmdCopyBufferToImage`
    CopyBufferToImage {
        /// Destination image
        dst: vk::Image,
        /// Number of regions, one per mip level and layer
        regions: usize,
    },
    /// `vkCmdCopyImage`
    CopyImage,
    /// `vkCmdBlitImage`
    BlitImage,
    /// `vkCmdClearColorImage`
    ClearColorImage(vk::Image),
    /// `vkCmdClearDepthStencilImage`
    ClearDepthStencilImage(vk::Image),
    /// `vkCmdPipelineBarrier`
    PipelineBarrier {
        /// `(old, new)` layout of every image barrier
        image_transitions: Vec<(vk::ImageLayout, vk::ImageLayout)>,
    },
    /// `vkCmdSetEvent`
    SetEvent(vk::Event),
    /// `vkCmdResetEvent`
    ResetEvent(vk::Event),
    /// `vkCmdWaitEvents`
    WaitEvents(usize),
    /// `vkCmdExecuteCommands`
    ExecuteCommands(Vec<vk::CommandBuffer>),
    /// `vkCmdWriteTimestamp`
    WriteTimestamp {
        /// Query pool
        pool: vk::QueryPool,
        /// Query index
        query: u32,
    },
    /// `vkCmdResetQueryPool`
    ResetQueryPool(vk::QueryPool),
}

impl From<&Command<'_>> for RecordedCommand {
    fn from(command: &Command<'_>) -> Self {
        match *command {
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                contents,
                ..
            } => Self::BeginRenderPass {
                render_pass,
                framebuffer,
                contents,
            },
            Command::NextSubpass { .. } => Self::NextSubpass,
            Command::EndRenderPass => Self::EndRenderPass,
            Command::BindPipeline { pipeline, .. } => Self::BindPipeline(pipeline),
            Command::BindDescriptorSets { first_set, sets, .. } => Self::BindDescriptorSets {
                first_set,
                sets: sets.to_vec(),
            },
            Command::BindVertexBuffers {
                first_binding,
                buffers,
                ..
            } => Self::BindVertexBuffers {
                first_binding,
                buffers: buffers.to_vec(),
            },
            Command::BindIndexBuffer { buffer, .. } => Self::BindIndexBuffer(buffer),
            Command::PushConstants {
                stages,
                offset,
                data,
                ..
            } => Self::PushConstants {
                stages,
                offset,
                data: data.to_vec(),
            },
            Command::SetViewport(_) => Self::SetViewport,
            Command::SetScissor(_) => Self::SetScissor,
            Command::Draw {
                vertex_count,
                instance_count,
                ..
            } => Self::Draw {
                vertex_count,
                instance_count,
            },
            Command::DrawIndexed {
                index_count,
                instance_count,
                ..
            } => Self::DrawIndexed {
                index_count,
                instance_count,
            },
            Command::Dispatch { x, y, z } => Self::Dispatch([x, y, z]),
            Command::TraceRays {
                width,
                height,
                depth,
                ..
            } => Self::TraceRays([width, height, depth]),
            Command::BuildAccelerationStructures { infos, .. } => {
                Self::BuildAccelerationStructures(infos.len())
            }
            Command::CopyBuffer { src, dst, .. } => Self::CopyBuffer { src, dst },
            Command::CopyBufferToImage { dst, regions, .. } => Self::CopyBufferToImage {
                dst,
                regions: regions.len(),
            },
            Command::CopyImage { .. } => Self::CopyImage,
            Command::BlitImage { .. } => Self::BlitImage,
            Command::ClearColorImage { image, .. } => Self::ClearColorImage(image),
            Command::ClearDepthStencilImage { image, .. } => Self::ClearDepthStencilImage(image),
            Command::PipelineBarrier { image_barriers, .. } => Self::PipelineBarrier {
                image_transitions: image_barriers
                    .iter()
                    .map(|barrier| (barrier.old_layout, barrier.new_layout))
                    .collect(),
            },
            Command::SetEvent { event, .. } => Self::SetEvent(event),
            Command::ResetEvent { event, .. } => Self::ResetEvent(event),
            Command::WaitEvents { events, .. } => Self::WaitEvents(events.len()),
            Command::ExecuteCommands { command_buffers } => {
                Self::ExecuteCommands(command_buffers.to_vec())
            }
            Command::WriteTimestamp { pool, query, .. } => Self::WriteTimestamp { pool, query },
            Command::ResetQueryPool { pool, .. } => Self::ResetQueryPool(pool),
        }
    }
}

/// Simulated surface reported by the headless device
#[derive(Debug, Clone)]
pub struct SimulatedSurface {
    /// Capabilities returned by `surface_capabilities`
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Formats returned by `surface_formats`
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Present modes returned by `surface_present_modes`
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SimulatedSurface {
    /// Surface with a fixed current extent
    pub fn fixed(width: u32, height: u32) -> Self {
        let extent = vk::Extent2D { width, height };
        Self {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: extent,
                min_image_extent: extent,
                max_image_extent: extent,
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    /// Surface that leaves the extent to the application within `[min, max]`
    pub fn undefined_extent(min: vk::Extent2D, max: vk::Extent2D) -> Self {
        let mut surface = Self::fixed(min.width, min.height);
        surface.capabilities.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        surface.capabilities.min_image_extent = min;
        surface.capabilities.max_image_extent = max;
        surface
    }
}

impl Default for SimulatedSurface {
    fn default() -> Self {
        Self::fixed(800, 600)
    }
}

#[derive(Default)]
struct HeadlessState {
    next_handle: u64,
    calls: Vec<DeviceCall>,
    live: HashSet<(ObjectKind, u64)>,
    invalid_destroys: Vec<(ObjectKind, u64)>,
    recorded: HashMap<vk::CommandBuffer, Vec<RecordedCommand>>,
    swapchain_images: HashMap<vk::SwapchainKHR, Vec<vk::Image>>,
    next_image: HashMap<vk::SwapchainKHR, u32>,
    memory: HashMap<vk::DeviceMemory, Vec<u8>>,
    signaled_fences: HashSet<vk::Fence>,
    last_swapchain_desc: Option<SwapchainDesc>,
    render_passes: HashMap<vk::RenderPass, RenderPassDesc>,
    fail_next_acquire: Option<vk::Result>,
    fail_next_present: Option<vk::Result>,
    image_views_before_failure: Option<usize>,
}

impl HeadlessState {
    fn create(&mut self, kind: ObjectKind) -> u64 {
        self.next_handle += 1;
        let raw = self.next_handle;
        self.live.insert((kind, raw));
        self.calls.push(DeviceCall::Created(kind, raw));
        raw
    }

    fn destroy(&mut self, kind: ObjectKind, raw: u64) {
        if raw == 0 {
            return;
        }
        if !self.live.remove(&(kind, raw)) {
            self.invalid_destroys.push((kind, raw));
        }
        self.calls.push(DeviceCall::Destroyed(kind, raw));
    }
}

/// GPU device double that records instead of executing
pub struct HeadlessDevice {
    queue_families: QueueFamilyIndices,
    surface: Mutex<SimulatedSurface>,
    state: Mutex<HeadlessState>,
}

impl HeadlessDevice {
    /// Create a headless device with one queue family and an 800x600 surface
    pub fn new() -> Self {
        Self::with_surface(SimulatedSurface::default())
    }

    /// Create a headless device reporting the given surface
    pub fn with_surface(surface: SimulatedSurface) -> Self {
        Self {
            queue_families: QueueFamilyIndices {
                graphics: 0,
                present: 0,
                transfer: 0,
            },
            surface: Mutex::new(surface),
            state: Mutex::new(HeadlessState::default()),
        }
    }

    /// Use distinct queue families
    pub fn with_queue_families(mut self, queue_families: QueueFamilyIndices) -> Self {
        self.queue_families = queue_families;
        self
    }

    /// Replace the simulated surface, e.g. after a window resize
    pub fn set_surface(&self, surface: SimulatedSurface) {
        *self.surface.lock() = surface;
    }

    /// Make the next acquire fail with `result`. `SUBOPTIMAL_KHR` acquires
    /// the image and reports it as suboptimal.
    pub fn fail_next_acquire(&self, result: vk::Result) {
        self.state.lock().fail_next_acquire = Some(result);
    }

    /// Make the next present return `result` after waiting its semaphores
    pub fn fail_next_present(&self, result: vk::Result) {
        self.state.lock().fail_next_present = Some(result);
    }

    /// Let `count` more image views succeed, then fail the next one
    pub fn fail_image_view_after(&self, count: usize) {
        self.state.lock().image_views_before_failure = Some(count);
    }

    /// Description a live render pass was created from
    pub fn render_pass_desc(&self, render_pass: vk::RenderPass) -> Option<RenderPassDesc> {
        self.state.lock().render_passes.get(&render_pass).cloned()
    }

    /// Snapshot of the call log
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state.lock().calls.clone()
    }

    /// Clear the call log, keeping live object tracking
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Commands recorded into `buffer` since its last begin or reset
    pub fn recorded(&self, buffer: vk::CommandBuffer) -> Vec<RecordedCommand> {
        self.state
            .lock()
            .recorded
            .get(&buffer)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of objects created and not yet destroyed
    pub fn live_object_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Number of live objects of one kind
    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.state
            .lock()
            .live
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Destroy calls for objects that were not live
    pub fn invalid_destroys(&self) -> Vec<(ObjectKind, u64)> {
        self.state.lock().invalid_destroys.clone()
    }

    /// Bytes last written into a memory object
    pub fn memory_contents(&self, memory: vk::DeviceMemory) -> Option<Vec<u8>> {
        self.state.lock().memory.get(&memory).cloned()
    }

    /// Parameters of the most recently created swapchain
    pub fn last_swapchain_desc(&self) -> Option<SwapchainDesc> {
        self.state.lock().last_swapchain_desc.clone()
    }

    fn create<T: Handle>(&self, kind: ObjectKind) -> T {
        T::from_raw(self.state.lock().create(kind))
    }

    fn destroy<T: Handle>(&self, kind: ObjectKind, handle: T) {
        self.state.lock().destroy(kind, handle.as_raw());
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for HeadlessDevice {
    fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        self.state.lock().calls.push(DeviceCall::WaitIdle);
        Ok(())
    }

    fn queue_wait_idle(&self, queue: QueueType) -> VulkanResult<()> {
        self.state.lock().calls.push(DeviceCall::QueueWaitIdle(queue));
        Ok(())
    }

    fn create_buffer(&self, size: vk::DeviceSize, _usage: vk::BufferUsageFlags) -> VulkanResult<vk::Buffer> {
        if size == 0 {
            return Err(VulkanError::Api(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        Ok(self.create(ObjectKind::Buffer))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.destroy(ObjectKind::Buffer, buffer);
    }

    fn buffer_memory_requirements(&self, _buffer: vk::Buffer) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 256,
            alignment: 256,
            memory_type_bits: u32::MAX,
        }
    }

    fn allocate_memory(
        &self,
        requirements: vk::MemoryRequirements,
        _properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<vk::DeviceMemory> {
        if requirements.memory_type_bits == 0 {
            return Err(VulkanError::NoSuitableMemoryType);
        }
        Ok(self.create(ObjectKind::Memory))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.lock();
        state.memory.remove(&memory);
        state.destroy(ObjectKind::Memory, memory.as_raw());
    }

    fn bind_buffer_memory(&self, _buffer: vk::Buffer, _memory: vk::DeviceMemory) -> VulkanResult<()> {
        Ok(())
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let mut state = self.state.lock();
        if !state.live.contains(&(ObjectKind::Memory, memory.as_raw())) {
            return Err(VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        let offset = usize::try_from(offset).map_err(|_| VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        let contents = state.memory.entry(memory).or_default();
        if contents.len() < offset + data.len() {
            contents.resize(offset + data.len(), 0);
        }
        contents[offset..offset + data.len()].copy_from_slice(data);
        state.calls.push(DeviceCall::WriteMemory {
            memory: memory.as_raw(),
            size: data.len(),
        });
        Ok(())
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<vk::Image> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(VulkanError::Api(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        Ok(self.create(ObjectKind::Image))
    }

    fn destroy_image(&self, image: vk::Image) {
        self.destroy(ObjectKind::Image, image);
    }

    fn image_memory_requirements(&self, _image: vk::Image) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 4096,
            alignment: 256,
            memory_type_bits: u32::MAX,
        }
    }

    fn bind_image_memory(&self, _image: vk::Image, _memory: vk::DeviceMemory) -> VulkanResult<()> {
        Ok(())
    }

    fn create_image_view(&self, _desc: &ImageViewDesc) -> VulkanResult<vk::ImageView> {
        let mut state = self.state.lock();
        if let Some(remaining) = state.image_views_before_failure {
            state.image_views_before_failure = remaining.checked_sub(1);
            if remaining == 0 {
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
        }
        Ok(vk::ImageView::from_raw(state.create(ObjectKind::ImageView)))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy(ObjectKind::ImageView, view);
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        Ok(self.create(ObjectKind::Sampler))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.destroy(ObjectKind::Sampler, sampler);
    }

    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        if code.is_empty() {
            return Err(VulkanError::Api(vk::Result::ERROR_INVALID_SHADER_NV));
        }
        Ok(self.create(ObjectKind::ShaderModule))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy(ObjectKind::ShaderModule, module);
    }

    fn create_descriptor_set_layout(&self, _bindings: &[TableBinding]) -> VulkanResult<vk::DescriptorSetLayout> {
        Ok(self.create(ObjectKind::DescriptorSetLayout))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.destroy(ObjectKind::DescriptorSetLayout, layout);
    }

    fn create_descriptor_pool(
        &self,
        _sizes: &[vk::DescriptorPoolSize],
        _max_sets: u32,
    ) -> VulkanResult<vk::DescriptorPool> {
        Ok(self.create(ObjectKind::DescriptorPool))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.destroy(ObjectKind::DescriptorPool, pool);
    }

    fn allocate_descriptor_set(
        &self,
        _pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        Ok(self.create(ObjectKind::DescriptorSet))
    }

    fn free_descriptor_set(&self, _pool: vk::DescriptorPool, set: vk::DescriptorSet) -> VulkanResult<()> {
        self.destroy(ObjectKind::DescriptorSet, set);
        Ok(())
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        self.state.lock().calls.push(DeviceCall::UpdateDescriptorSet {
            set: set.as_raw(),
            writes: writes.to_vec(),
        });
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        Ok(self.create(ObjectKind::PipelineLayout))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy(ObjectKind::PipelineLayout, layout);
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass> {
        if desc.attachments.is_empty() {
            return Err(VulkanError::invalid("render pass without attachments"));
        }
        let mut state = self.state.lock();
        let render_pass = vk::RenderPass::from_raw(state.create(ObjectKind::RenderPass));
        state.render_passes.insert(render_pass, desc.clone());
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut state = self.state.lock();
        state.render_passes.remove(&render_pass);
        state.destroy(ObjectKind::RenderPass, render_pass.as_raw());
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> VulkanResult<vk::Framebuffer> {
        let live = self.state.lock().live.contains(&(ObjectKind::RenderPass, desc.render_pass.as_raw()));
        if !live {
            return Err(VulkanError::invalid("framebuffer references a destroyed render pass"));
        }
        Ok(self.create(ObjectKind::Framebuffer))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy(ObjectKind::Framebuffer, framebuffer);
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> VulkanResult<vk::Pipeline> {
        if desc.stages.is_empty() {
            return Err(VulkanError::invalid("graphics pipeline without shader stages"));
        }
        Ok(self.create(ObjectKind::Pipeline))
    }

    fn create_compute_pipeline(
        &self,
        _layout: vk::PipelineLayout,
        _module: vk::ShaderModule,
    ) -> VulkanResult<vk::Pipeline> {
        Ok(self.create(ObjectKind::Pipeline))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy(ObjectKind::Pipeline, pipeline);
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let fence: vk::Fence = self.create(ObjectKind::Fence);
        if signaled {
            self.state.lock().signaled_fences.insert(fence);
        }
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        state.signaled_fences.remove(&fence);
        state.destroy(ObjectKind::Fence, fence.as_raw());
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], _timeout: u64) -> VulkanResult<()> {
        let mut state = self.state.lock();
        if let Some(unsignaled) = fences.iter().find(|f| !state.signaled_fences.contains(*f)) {
            log::warn!("Headless wait on unsignaled fence {:?} would block forever", unsignaled);
            return Err(VulkanError::Api(vk::Result::TIMEOUT));
        }
        state.calls.push(DeviceCall::WaitForFences(fences.to_vec()));
        Ok(())
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> VulkanResult<()> {
        let mut state = self.state.lock();
        for fence in fences {
            state.signaled_fences.remove(fence);
        }
        state.calls.push(DeviceCall::ResetFences(fences.to_vec()));
        Ok(())
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        Ok(self.create(ObjectKind::Semaphore))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.destroy(ObjectKind::Semaphore, semaphore);
    }

    fn create_event(&self) -> VulkanResult<vk::Event> {
        Ok(self.create(ObjectKind::Event))
    }

    fn destroy_event(&self, event: vk::Event) {
        self.destroy(ObjectKind::Event, event);
    }

    fn create_query_pool(&self, _query_type: vk::QueryType, count: u32) -> VulkanResult<vk::QueryPool> {
        if count == 0 {
            return Err(VulkanError::invalid("query pool with zero queries"));
        }
        Ok(self.create(ObjectKind::QueryPool))
    }

    fn destroy_query_pool(&self, pool: vk::QueryPool) {
        self.destroy(ObjectKind::QueryPool, pool);
    }

    fn create_command_pool(
        &self,
        _queue: QueueType,
        _flags: vk::CommandPoolCreateFlags,
    ) -> VulkanResult<vk::CommandPool> {
        Ok(self.create(ObjectKind::CommandPool))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.destroy(ObjectKind::CommandPool, pool);
    }

    fn allocate_command_buffers(
        &self,
        _pool: vk::CommandPool,
        _level: vk::CommandBufferLevel,
        count: u32,
    ) -> VulkanResult<Vec<vk::CommandBuffer>> {
        Ok((0..count).map(|_| self.create(ObjectKind::CommandBuffer)).collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        // Recorded commands outlive the buffer so one-shot uploads stay inspectable
        for buffer in buffers {
            state.destroy(ObjectKind::CommandBuffer, buffer.as_raw());
        }
    }

    fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        _usage: vk::CommandBufferUsageFlags,
        inheritance: Option<&InheritanceInfo>,
    ) -> VulkanResult<()> {
        let mut state = self.state.lock();
        state.recorded.insert(buffer, Vec::new());
        state.calls.push(DeviceCall::BeginCommandBuffer {
            buffer: buffer.as_raw(),
            secondary: inheritance.is_some(),
        });
        Ok(())
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.state.lock().calls.push(DeviceCall::EndCommandBuffer(buffer.as_raw()));
        Ok(())
    }

    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let mut state = self.state.lock();
        state.recorded.remove(&buffer);
        state.calls.push(DeviceCall::ResetCommandBuffer(buffer.as_raw()));
        Ok(())
    }

    fn record(&self, buffer: vk::CommandBuffer, command: &Command<'_>) {
        self.state
            .lock()
            .recorded
            .entry(buffer)
            .or_default()
            .push(RecordedCommand::from(command));
    }

    fn queue_submit(&self, queue: QueueType, batches: &[SubmitBatch<'_>], fence: vk::Fence) -> VulkanResult<()> {
        let mut state = self.state.lock();
        if fence != vk::Fence::null() {
            state.signaled_fences.insert(fence);
        }
        state.calls.push(DeviceCall::Submit {
            queue,
            command_buffers: batches.iter().flat_map(|b| b.command_buffers.iter().copied()).collect(),
            wait_semaphores: batches.iter().flat_map(|b| b.wait_semaphores.iter().copied()).collect(),
            signal_semaphores: batches.iter().flat_map(|b| b.signal_semaphores.iter().copied()).collect(),
            fence,
        });
        Ok(())
    }

    fn surface_capabilities(&self) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.surface.lock().capabilities)
    }

    fn surface_formats(&self) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.surface.lock().formats.clone())
    }

    fn surface_present_modes(&self) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        Ok(self.surface.lock().present_modes.clone())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VulkanResult<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        let swapchain = vk::SwapchainKHR::from_raw(state.create(ObjectKind::Swapchain));
        // Swapchain images belong to the swapchain and are never destroyed individually
        let images: Vec<vk::Image> = (0..desc.min_image_count)
            .map(|_| {
                state.next_handle += 1;
                vk::Image::from_raw(state.next_handle)
            })
            .collect();
        state.swapchain_images.insert(swapchain, images);
        state.next_image.insert(swapchain, 0);
        state.last_swapchain_desc = Some(desc.clone());
        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        state.swapchain_images.remove(&swapchain);
        state.next_image.remove(&swapchain);
        state.destroy(ObjectKind::Swapchain, swapchain.as_raw());
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        self.state
            .lock()
            .swapchain_images
            .get(&swapchain)
            .cloned()
            .ok_or_else(|| VulkanError::not_found("swapchain", swapchain))
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VulkanResult<(u32, bool)> {
        let mut state = self.state.lock();
        let suboptimal = match state.fail_next_acquire.take() {
            None => false,
            Some(vk::Result::SUBOPTIMAL_KHR) => true,
            Some(result) => return Err(result.into()),
        };
        let count = state
            .swapchain_images
            .get(&swapchain)
            .map(|images| images.len() as u32)
            .ok_or_else(|| VulkanError::not_found("swapchain", swapchain))?;
        let next = state.next_image.entry(swapchain).or_insert(0);
        let image_index = *next;
        *next = (image_index + 1) % count.max(1);
        state.calls.push(DeviceCall::Acquire { image_index, semaphore });
        Ok((image_index, suboptimal))
    }

    fn queue_present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> VulkanResult<()> {
        let mut state = self.state.lock();
        state.calls.push(DeviceCall::Present {
            image_index,
            wait_semaphores: wait_semaphores.to_vec(),
        });
        match state.fail_next_present.take() {
            Some(result) => Err(result.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique_and_tracked() {
        let device = HeadlessDevice::new();
        let a = device.create_semaphore().unwrap();
        let b = device.create_semaphore().unwrap();
        assert_ne!(a, b);
        assert_eq!(device.live_count(ObjectKind::Semaphore), 2);

        device.destroy_semaphore(a);
        device.destroy_semaphore(a);
        assert_eq!(device.live_count(ObjectKind::Semaphore), 1);
        assert_eq!(device.invalid_destroys(), vec![(ObjectKind::Semaphore, a.as_raw())]);
    }

    #[test]
    fn acquire_cycles_through_images_and_can_fail() {
        let device = HeadlessDevice::new();
        let desc = SwapchainDesc {
            min_image_count: 3,
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D { width: 800, height: 600 },
            present_mode: vk::PresentModeKHR::FIFO,
            pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            shared_queue_families: Vec::new(),
            old_swapchain: vk::SwapchainKHR::null(),
        };
        let swapchain = device.create_swapchain(&desc).unwrap();
        let semaphore = device.create_semaphore().unwrap();
        let indices: Vec<u32> = (0..4)
            .map(|_| device.acquire_next_image(swapchain, u64::MAX, semaphore).unwrap().0)
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0]);

        device.fail_next_acquire(vk::Result::SUBOPTIMAL_KHR);
        assert_eq!(device.acquire_next_image(swapchain, u64::MAX, semaphore).unwrap(), (1, true));

        device.fail_next_acquire(vk::Result::ERROR_OUT_OF_DATE_KHR);
        let err = device.acquire_next_image(swapchain, u64::MAX, semaphore).unwrap_err();
        assert!(matches!(err, VulkanError::SwapchainOutOfDate));
    }

    #[test]
    fn image_view_failure_is_injected_once() {
        let device = HeadlessDevice::new();
        let desc = ImageViewDesc {
            image: vk::Image::from_raw(7),
            view_type: vk::ImageViewType::TYPE_2D,
            format: vk::Format::R8G8B8A8_UNORM,
            aspect: vk::ImageAspectFlags::COLOR,
            mip_levels: 1,
            array_layers: 1,
        };
        device.fail_image_view_after(1);
        assert!(device.create_image_view(&desc).is_ok());
        assert!(device.create_image_view(&desc).is_err());
        assert!(device.create_image_view(&desc).is_ok());
        assert_eq!(device.live_count(ObjectKind::ImageView), 2);
    }

    #[test]
    fn submit_signals_fence() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(false).unwrap();
        assert!(device.wait_for_fences(&[fence], 0).is_err());
        device.queue_submit(QueueType::Graphics, &[], fence).unwrap();
        assert!(device.wait_for_fences(&[fence], 0).is_ok());
    }
}
