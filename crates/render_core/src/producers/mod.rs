//! Producer-system interface consumed by render pipelines
//!
//! Producers expose a record count, their records in container order and the
//! completion signals of the tasks that write them.

mod producer;
mod record;
mod wait;

pub use producer::{InstanceStore, ProducerKind, ProducerRegistry, RenderProducer};
pub use record::{InstanceRecord, LevelOfDetail, MaterialType, VisibilityFlags};
pub use wait::{CompletionSignal, ProducerTask, WaitPoints};
