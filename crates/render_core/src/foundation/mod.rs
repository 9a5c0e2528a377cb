//! Foundation utilities shared by every layer of the core

pub mod collections;
pub mod hash;
pub mod logging;
