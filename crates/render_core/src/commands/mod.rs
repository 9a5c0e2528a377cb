//! Command recording layer
//!
//! A fixed vocabulary of recordable operations ([`Command`]) and a
//! state-checked wrapper over one command buffer ([`CommandBuffer`]).
//! Commands are recorded in the order issued; nothing is buffered or reordered.

mod buffer;
mod single_use;
mod vocabulary;

pub use buffer::{CommandBuffer, CommandBufferState, ImageClear};
pub use single_use::submit_single_use;
pub use vocabulary::Command;
