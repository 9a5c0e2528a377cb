//! # Render Core
//!
//! Frame lifecycle and GPU resource/pipeline orchestration for a Vulkan
//! game engine.
//!
//! - **Device seam**: every GPU call goes through [`backend::GpuDevice`],
//!   implemented by [`backend::vulkan::AshDevice`] and the recording
//!   [`backend::HeadlessDevice`]
//! - **Swapchain**: surface negotiation, acquire and present
//! - **Resources**: a single factory owning every GPU object behind typed handles
//! - **Pipelines**: rendering stages described as data and ordered by a render graph
//! - **Frames**: acquire, execute, submit and present with frames in flight
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use render_core::prelude::*;
//!
//! fn run(device: Arc<dyn GpuDevice>) -> VulkanResult<()> {
//!     let config = RendererConfig::new("demo");
//!     let stages = standard_stages(&config);
//!     let shaders = ShaderLibrary::new(&config.shader_directory);
//!     let mut context = RenderContext::new(device, config)?;
//!     let mut frames = FrameOrchestrator::initialize(&mut context, &stages, shaders)?;
//!
//!     let producers = ProducerRegistry::new();
//!     let waits = WaitPoints::new();
//!     frames.render_frame(&mut context, &producers, &waits, &FrameParameters::default())?;
//!     frames.release(&mut context)
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::too_many_arguments,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::missing_errors_doc
)]

pub mod assets;
pub mod backend;
pub mod commands;
pub mod config;
pub mod foundation;
pub mod frame;
pub mod graph;
pub mod pipelines;
pub mod producers;
pub mod resources;
pub mod swapchain;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        backend::{GpuDevice, HeadlessDevice, VulkanError, VulkanResult},
        config::{Config, RendererConfig},
        frame::{FrameOrchestrator, FrameParameters, FrameStatistics, RenderContext},
        graph::{GraphError, RenderGraph},
        pipelines::{standard_stages, PipelineDescriptor, RenderTargetId, ShaderLibrary},
        producers::{
            InstanceRecord, InstanceStore, ProducerKind, ProducerRegistry, ProducerTask, RenderProducer,
            VisibilityFlags, WaitPoints,
        },
        resources::{BufferDesc, MemoryLocation, ResourceFactory},
    };
}
