//! Vulkan implementation of the device seam

mod ash_device;
mod instance;
mod logical_device;
mod physical_device;
mod surface;

pub use ash_device::AshDevice;
pub use instance::VulkanInstance;
pub use logical_device::{LogicalDevice, RayTracingLoaders};
pub use physical_device::{select_physical_device, DeviceCandidate, QueueFamilySupport};
pub use surface::{RawWindowSurface, SurfaceProvider};
