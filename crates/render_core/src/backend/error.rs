//! Vulkan error types

use ash::vk;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Resource with specified handle could not be found
    #[error("Resource not found: {kind} {handle}")]
    ResourceNotFound {
        /// Kind of resource that was looked up
        kind: &'static str,
        /// Debug rendering of the stale or unknown handle
        handle: String,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No physical device satisfies the requirements
    #[error("No suitable GPU found: {0}")]
    NoSuitableDevice(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Swapchain no longer matches the surface and must be recreated
    #[error("Swapchain out of date")]
    SwapchainOutOfDate,

    /// A required asset (shader, texture) could not be loaded
    #[error("Failed to load asset {path}: {reason}")]
    AssetLoad {
        /// Path or name of the asset
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// Render graph compilation failed
    #[error("Render graph error: {0}")]
    Graph(#[from] crate::graph::GraphError),
}

impl VulkanError {
    /// Shorthand for [`VulkanError::InvalidOperation`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`VulkanError::ResourceNotFound`]
    pub fn not_found(kind: &'static str, handle: impl std::fmt::Debug) -> Self {
        Self::ResourceNotFound {
            kind,
            handle: format!("{handle:?}"),
        }
    }
}

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR => Self::SwapchainOutOfDate,
            other => Self::Api(other),
        }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;
