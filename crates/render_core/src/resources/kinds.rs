//! Resource records owned by the factory
//!
//! Each record knows how to release its own device objects.

use ash::vk;

use crate::backend::GpuDevice;

/// A device object the factory can release
pub trait GpuResource {
    /// Destroy every device object owned by the record
    fn release(self, device: &dyn GpuDevice);
}

/// Where a buffer's memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// GPU-only memory, filled through a staging upload
    DeviceLocal,
    /// Host-visible, coherent memory written directly
    HostVisible,
}

impl MemoryLocation {
    /// Memory property flags for the location
    pub fn properties(self) -> vk::MemoryPropertyFlags {
        match self {
            Self::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Self::HostVisible => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        }
    }
}

/// Buffer with bound memory
#[derive(Debug, Clone, Copy)]
pub struct Buffer {
    /// Buffer handle
    pub raw: vk::Buffer,
    /// Bound memory
    pub memory: vk::DeviceMemory,
    /// Size in bytes
    pub size: vk::DeviceSize,
    /// Memory location
    pub location: MemoryLocation,
}

impl GpuResource for Buffer {
    fn release(self, device: &dyn GpuDevice) {
        device.destroy_buffer(self.raw);
        device.free_memory(self.memory);
    }
}

/// Image with bound memory and a default view
#[derive(Debug, Clone, Copy)]
pub struct Image {
    /// Image handle
    pub raw: vk::Image,
    /// Bound memory
    pub memory: vk::DeviceMemory,
    /// View over every mip level and layer, used as attachment
    pub view: vk::ImageView,
    /// View bound for sampling; differs from `view` only for depth-stencil formats
    pub sampled_view: vk::ImageView,
    /// Size of mip 0
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Mip levels
    pub mip_levels: u32,
    /// Array layers
    pub array_layers: u32,
}

impl GpuResource for Image {
    fn release(self, device: &dyn GpuDevice) {
        if self.sampled_view != self.view {
            device.destroy_image_view(self.sampled_view);
        }
        device.destroy_image_view(self.view);
        device.destroy_image(self.raw);
        device.free_memory(self.memory);
    }
}

/// Render-data table allocated from the factory pool
#[derive(Debug, Clone, Copy)]
pub struct RenderDataTable {
    /// Descriptor set
    pub set: vk::DescriptorSet,
    /// Layout it was allocated with
    pub layout: vk::DescriptorSetLayout,
    /// Owning pool
    pub pool: vk::DescriptorPool,
}

impl GpuResource for RenderDataTable {
    fn release(self, device: &dyn GpuDevice) {
        if let Err(e) = device.free_descriptor_set(self.pool, self.set) {
            log::warn!("Failed to free render-data table {:?}: {}", self.set, e);
        }
    }
}

macro_rules! simple_resource {
    ($(#[$doc:meta] $name:ident($raw:ty) => $destroy:ident;)*) => {
        $(
            #[$doc]
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $name(pub $raw);

            impl GpuResource for $name {
                fn release(self, device: &dyn GpuDevice) {
                    device.$destroy(self.0);
                }
            }
        )*
    };
}

simple_resource! {
    /// Sampler
    Sampler(vk::Sampler) => destroy_sampler;
    /// Shader module
    ShaderModule(vk::ShaderModule) => destroy_shader_module;
    /// Render-data table layout
    TableLayout(vk::DescriptorSetLayout) => destroy_descriptor_set_layout;
    /// Pipeline layout
    PipelineLayout(vk::PipelineLayout) => destroy_pipeline_layout;
    /// Render pass
    RenderPass(vk::RenderPass) => destroy_render_pass;
    /// Framebuffer
    Framebuffer(vk::Framebuffer) => destroy_framebuffer;
    /// Graphics or compute pipeline
    Pipeline(vk::Pipeline) => destroy_pipeline;
    /// Fence
    Fence(vk::Fence) => destroy_fence;
    /// Semaphore
    Semaphore(vk::Semaphore) => destroy_semaphore;
    /// Event
    Event(vk::Event) => destroy_event;
    /// Query pool
    QueryPool(vk::QueryPool) => destroy_query_pool;
    /// Command pool
    CommandPool(vk::CommandPool) => destroy_command_pool;
}
