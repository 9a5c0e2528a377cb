//! GPU resource ownership
//!
//! [`ResourceFactory`] is the single owner of buffers, images, tables,
//! pipelines and synchronization objects. Callers hold typed handles; the
//! factory hands out the raw Vulkan objects behind them on request.

mod factory;
mod handles;
mod kinds;

pub use factory::{BufferDesc, RenderDataTableBinding, ResourceFactory, TextureDesc};
pub use handles::*;
pub use kinds::{Buffer, GpuResource, Image, MemoryLocation};
