//! GPU backend
//!
//! The [`GpuDevice`] seam, its Vulkan implementation and a headless recording
//! double used by tests.

pub mod device;
mod error;
pub mod headless;
pub mod vulkan;

pub use device::{
    DepthState, DescriptorWrite, FramebufferDesc, GpuDevice, GraphicsPipelineDesc, ImageDesc, ImageViewDesc,
    InheritanceInfo, PipelineStage, QueueFamilyIndices, QueueType, RenderPassDesc, SamplerDesc, StencilState,
    SubmitBatch, SwapchainDesc, TableBinding,
};
pub use error::{VulkanError, VulkanResult};
pub use headless::{DeviceCall, HeadlessDevice, ObjectKind, RecordedCommand, SimulatedSurface};
