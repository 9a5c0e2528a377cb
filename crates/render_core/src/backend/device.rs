//! GPU device abstraction
//!
//! [`GpuDevice`] is the fixed vocabulary of device, queue, surface and swapchain
//! calls the rest of the core is written against. The Vulkan implementation
//! lives in [`crate::backend::vulkan`]; [`crate::backend::headless`] provides a
//! recording implementation that needs no GPU.
//!
//! Parameter types are plain data in Vulkan terms so the seam adds no
//! translation layer of its own.

use ash::vk;

use crate::backend::VulkanResult;
use crate::commands::Command;

/// Queue a submission or wait targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    /// Graphics and compute work
    Graphics,
    /// Presentation to the surface
    Present,
    /// Uploads and copies
    Transfer,
}

/// Queue family indices chosen at device creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for graphics work
    pub graphics: u32,
    /// Family used for presentation
    pub present: u32,
    /// Family used for transfers; equals `graphics` when no dedicated family exists
    pub transfer: u32,
}

impl QueueFamilyIndices {
    /// Family index backing a queue type
    pub fn family(&self, queue: QueueType) -> u32 {
        match queue {
            QueueType::Graphics => self.graphics,
            QueueType::Present => self.present,
            QueueType::Transfer => self.transfer,
        }
    }
}

/// Image creation parameters
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Size of mip level 0
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Number of mip levels
    pub mip_levels: u32,
    /// Number of array layers (6 for cube maps)
    pub array_layers: u32,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Creation flags, e.g. `CUBE_COMPATIBLE`
    pub flags: vk::ImageCreateFlags,
}

/// Image view creation parameters
#[derive(Debug, Clone, Copy)]
pub struct ImageViewDesc {
    /// Image the view refers to
    pub image: vk::Image,
    /// View dimensionality
    pub view_type: vk::ImageViewType,
    /// View format
    pub format: vk::Format,
    /// Aspect seen through the view
    pub aspect: vk::ImageAspectFlags,
    /// Mip levels covered
    pub mip_levels: u32,
    /// Array layers covered
    pub array_layers: u32,
}

/// Sampler creation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    /// Magnification and minification filter
    pub filter: vk::Filter,
    /// Filtering between mip levels
    pub mipmap_mode: vk::SamplerMipmapMode,
    /// Addressing outside [0, 1]
    pub address_mode: vk::SamplerAddressMode,
    /// Maximum anisotropy, `None` to disable
    pub max_anisotropy: Option<f32>,
    /// Highest mip level that may be sampled
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_anisotropy: None,
            max_lod: vk::LOD_CLAMP_NONE,
        }
    }
}

/// One binding slot in a render-data table layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableBinding {
    /// Binding number in the shader
    pub binding: u32,
    /// Descriptor type
    pub descriptor_type: vk::DescriptorType,
    /// Number of descriptors in the slot
    pub count: u32,
    /// Shader stages that access the slot
    pub stages: vk::ShaderStageFlags,
}

/// A single descriptor write into a render-data table
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DescriptorWrite {
    /// Uniform buffer range
    UniformBuffer {
        /// Binding number
        binding: u32,
        /// Buffer handle
        buffer: vk::Buffer,
        /// Byte offset
        offset: vk::DeviceSize,
        /// Byte range
        range: vk::DeviceSize,
    },
    /// Storage buffer range
    StorageBuffer {
        /// Binding number
        binding: u32,
        /// Buffer handle
        buffer: vk::Buffer,
        /// Byte offset
        offset: vk::DeviceSize,
        /// Byte range
        range: vk::DeviceSize,
    },
    /// Sampled image with its sampler
    CombinedImageSampler {
        /// Binding number
        binding: u32,
        /// Image view
        view: vk::ImageView,
        /// Sampler
        sampler: vk::Sampler,
        /// Layout the image is in when sampled
        layout: vk::ImageLayout,
    },
    /// Storage image
    StorageImage {
        /// Binding number
        binding: u32,
        /// Image view
        view: vk::ImageView,
    },
}

/// Single-subpass render pass description
#[derive(Debug, Clone, Default)]
pub struct RenderPassDesc {
    /// Attachment descriptions, colors first then depth
    pub attachments: Vec<vk::AttachmentDescription>,
    /// Color attachment references for subpass 0
    pub color_references: Vec<vk::AttachmentReference>,
    /// Depth attachment reference for subpass 0
    pub depth_reference: Option<vk::AttachmentReference>,
    /// Subpass dependencies
    pub dependencies: Vec<vk::SubpassDependency>,
}

/// Framebuffer creation parameters
#[derive(Debug, Clone)]
pub struct FramebufferDesc {
    /// Compatible render pass
    pub render_pass: vk::RenderPass,
    /// Attachment views in render pass order
    pub attachments: Vec<vk::ImageView>,
    /// Framebuffer size
    pub extent: vk::Extent2D,
}

/// Shader stage of a graphics pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStage {
    /// Stage bit
    pub stage: vk::ShaderStageFlags,
    /// Module compiled for this stage, entry point `main`
    pub module: vk::ShaderModule,
}

/// Depth state of a graphics pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthState {
    /// Depth test enable
    pub test_enable: bool,
    /// Depth write enable
    pub write_enable: bool,
    /// Depth compare operator
    pub compare_op: vk::CompareOp,
}

/// Stencil state of a graphics pipeline, same for front and back faces
#[derive(Debug, Clone, Copy)]
pub struct StencilState {
    /// Stencil test enable
    pub test_enable: bool,
    /// Operators, compare operator and masks
    pub ops: vk::StencilOpState,
}

/// Graphics pipeline creation parameters
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    /// Pipeline layout
    pub layout: vk::PipelineLayout,
    /// Compatible render pass
    pub render_pass: vk::RenderPass,
    /// Subpass index
    pub subpass: u32,
    /// Active shader stages; unused stages are absent
    pub stages: Vec<PipelineStage>,
    /// Vertex buffer bindings
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    /// Vertex attributes
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Depth state
    pub depth: DepthState,
    /// Stencil state
    pub stencil: StencilState,
    /// One blend state per color attachment
    pub color_blend: Vec<vk::PipelineColorBlendAttachmentState>,
    /// Patch control points when tessellation stages are present
    pub patch_control_points: u32,
}

/// Swapchain creation parameters
#[derive(Debug, Clone)]
pub struct SwapchainDesc {
    /// Minimum number of images requested
    pub min_image_count: u32,
    /// Surface format
    pub format: vk::SurfaceFormatKHR,
    /// Image extent
    pub extent: vk::Extent2D,
    /// Present mode
    pub present_mode: vk::PresentModeKHR,
    /// Surface transform
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Queue families sharing the images; empty means exclusive ownership
    pub shared_queue_families: Vec<u32>,
    /// Swapchain being replaced, or null
    pub old_swapchain: vk::SwapchainKHR,
}

/// Inheritance context of a secondary command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InheritanceInfo {
    /// Render pass the secondary executes within
    pub render_pass: vk::RenderPass,
    /// Subpass index
    pub subpass: u32,
    /// Framebuffer, may be null when unknown
    pub framebuffer: vk::Framebuffer,
}

/// One batch of a queue submission
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitBatch<'a> {
    /// Semaphores waited on before execution
    pub wait_semaphores: &'a [vk::Semaphore],
    /// Stage each wait applies to
    pub wait_stages: &'a [vk::PipelineStageFlags],
    /// Primary command buffers to execute
    pub command_buffers: &'a [vk::CommandBuffer],
    /// Semaphores signaled on completion
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// Low-level GPU device operations used by the core.
///
/// Every call that can fail returns [`VulkanResult`]. Callers treat failures as
/// fatal and propagate them.
pub trait GpuDevice: Send + Sync {
    /// Queue family indices chosen at device creation
    fn queue_families(&self) -> QueueFamilyIndices;

    /// Block until the device is idle
    fn wait_idle(&self) -> VulkanResult<()>;

    /// Block until a queue is idle
    fn queue_wait_idle(&self, queue: QueueType) -> VulkanResult<()>;

    // === Memory and buffers ===

    /// Create a buffer without memory
    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<vk::Buffer>;

    /// Destroy a buffer
    fn destroy_buffer(&self, buffer: vk::Buffer);

    /// Memory requirements of a buffer
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;

    /// Allocate memory satisfying requirements and properties
    fn allocate_memory(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<vk::DeviceMemory>;

    /// Free device memory
    fn free_memory(&self, memory: vk::DeviceMemory);

    /// Bind buffer to memory at offset 0
    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VulkanResult<()>;

    /// Copy bytes into host-visible memory
    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()>;

    // === Images ===

    /// Create an image without memory
    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<vk::Image>;

    /// Destroy an image
    fn destroy_image(&self, image: vk::Image);

    /// Memory requirements of an image
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;

    /// Bind image to memory at offset 0
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VulkanResult<()>;

    /// Create an image view
    fn create_image_view(&self, desc: &ImageViewDesc) -> VulkanResult<vk::ImageView>;

    /// Destroy an image view
    fn destroy_image_view(&self, view: vk::ImageView);

    /// Create a sampler
    fn create_sampler(&self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler>;

    /// Destroy a sampler
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // === Shaders, tables and pipelines ===

    /// Create a shader module from SPIR-V words
    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule>;

    /// Destroy a shader module
    fn destroy_shader_module(&self, module: vk::ShaderModule);

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(&self, bindings: &[TableBinding]) -> VulkanResult<vk::DescriptorSetLayout>;

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    /// Create a descriptor pool that allows freeing individual sets
    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> VulkanResult<vk::DescriptorPool>;

    /// Destroy a descriptor pool and every set allocated from it
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    /// Allocate one descriptor set
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet>;

    /// Return a descriptor set to its pool
    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) -> VulkanResult<()>;

    /// Write descriptors into a set
    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]);

    /// Create a pipeline layout
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout>;

    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    /// Create a render pass
    fn create_render_pass(&self, desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass>;

    /// Destroy a render pass
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    /// Create a framebuffer
    fn create_framebuffer(&self, desc: &FramebufferDesc) -> VulkanResult<vk::Framebuffer>;

    /// Destroy a framebuffer
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    /// Create a graphics pipeline
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> VulkanResult<vk::Pipeline>;

    /// Create a compute pipeline
    fn create_compute_pipeline(
        &self,
        layout: vk::PipelineLayout,
        module: vk::ShaderModule,
    ) -> VulkanResult<vk::Pipeline>;

    /// Destroy a pipeline
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // === Synchronization ===

    /// Create a fence
    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence>;

    /// Destroy a fence
    fn destroy_fence(&self, fence: vk::Fence);

    /// Wait for fences to signal
    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> VulkanResult<()>;

    /// Reset fences to unsignaled
    fn reset_fences(&self, fences: &[vk::Fence]) -> VulkanResult<()>;

    /// Create a binary semaphore
    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore>;

    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Create an event
    fn create_event(&self) -> VulkanResult<vk::Event>;

    /// Destroy an event
    fn destroy_event(&self, event: vk::Event);

    /// Create a query pool
    fn create_query_pool(&self, query_type: vk::QueryType, count: u32) -> VulkanResult<vk::QueryPool>;

    /// Destroy a query pool
    fn destroy_query_pool(&self, pool: vk::QueryPool);

    // === Command buffers ===

    /// Create a command pool for a queue's family
    fn create_command_pool(
        &self,
        queue: QueueType,
        flags: vk::CommandPoolCreateFlags,
    ) -> VulkanResult<vk::CommandPool>;

    /// Destroy a command pool and its buffers
    fn destroy_command_pool(&self, pool: vk::CommandPool);

    /// Allocate command buffers
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> VulkanResult<Vec<vk::CommandBuffer>>;

    /// Free command buffers back to their pool
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);

    /// Begin recording; secondaries pass their inheritance context
    fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
        inheritance: Option<&InheritanceInfo>,
    ) -> VulkanResult<()>;

    /// Finish recording
    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Reset a command buffer to the initial state
    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Record one command
    fn record(&self, buffer: vk::CommandBuffer, command: &Command<'_>);

    // === Submission ===

    /// Submit batches to a queue, signaling `fence` (may be null) on completion
    fn queue_submit(&self, queue: QueueType, batches: &[SubmitBatch<'_>], fence: vk::Fence) -> VulkanResult<()>;

    // === Surface and swapchain ===

    /// Current surface capabilities
    fn surface_capabilities(&self) -> VulkanResult<vk::SurfaceCapabilitiesKHR>;

    /// Surface formats
    fn surface_formats(&self) -> VulkanResult<Vec<vk::SurfaceFormatKHR>>;

    /// Surface present modes
    fn surface_present_modes(&self) -> VulkanResult<Vec<vk::PresentModeKHR>>;

    /// Create a swapchain
    fn create_swapchain(&self, desc: &SwapchainDesc) -> VulkanResult<vk::SwapchainKHR>;

    /// Destroy a swapchain
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Images owned by a swapchain
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>>;

    /// Acquire the next image, signaling `semaphore`. Returns the image index
    /// and whether the swapchain is suboptimal; out-of-date is an error.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VulkanResult<(u32, bool)>;

    /// Present an image after `wait_semaphores` signal
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> VulkanResult<()>;
}
