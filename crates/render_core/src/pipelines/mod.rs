//! Render pipeline objects
//!
//! Stages are described by [`PipelineDescriptor`] values (see
//! [`standard_stages`]) and executed by the single [`RenderPipeline`] type.

mod descriptor;
mod push_constants;
mod render_pipeline;
mod shaders;
mod stages;
mod targets;
mod vertex;

pub use descriptor::{
    BlendFactor, BlendState, CompareOp, CullMode, DepthConfig, DrawPolicy, InstanceFilter, PipelineDescriptor,
    ShaderSet, StencilConfig, StencilOp, Topology,
};
pub use push_constants::{ModelTransformPush, PushLayout, PushParameters, ShadowCasterPush, VegetationWindPush};
pub use render_pipeline::{ExecuteReport, FrameInputs, PipelineSetup, RenderPipeline};
pub use shaders::ShaderLibrary;
#[cfg(test)]
pub(crate) use shaders::minimal_spirv;
pub use stages::{standard_stages, VEGETATION_STENCIL};
pub use targets::{RenderTargetId, RenderTargetRegistry, Resolution, TargetAllocation};
pub use vertex::{InstanceData, Vertex, VertexInput};
