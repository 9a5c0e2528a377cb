//! Frame lifecycle
//!
//! [`RenderContext`] owns the device, factory and swapchain;
//! [`FrameOrchestrator`] owns the pipelines and drives each frame.

mod context;
mod orchestrator;
mod statistics;
mod sync;
mod uniforms;

pub use context::RenderContext;
pub use orchestrator::{FrameOrchestrator, FramePhase};
pub use statistics::FrameStatistics;
pub use sync::{FrameSlot, FrameSync};
pub use uniforms::{FrameParameters, GlobalTables, GlobalUniforms};
