//! Physical device evaluation and selection
//!
//! Each enumerated device is reduced to a plain [`DeviceCandidate`] so the
//! selection policy can be exercised without a GPU.

use std::ffi::CStr;

use ash::extensions::khr::{AccelerationStructure, DeferredHostOperations, RayTracingPipeline, Surface, Swapchain};
use ash::{vk, Instance};

use crate::backend::{QueueFamilyIndices, VulkanError, VulkanResult};
use crate::config::DeviceRequirements;

/// Capabilities of one queue family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilySupport {
    /// Supports graphics work
    pub graphics: bool,
    /// Supports transfer work
    pub transfer: bool,
    /// Can present to the surface
    pub present: bool,
}

/// Plain description of a physical device
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    /// Device name
    pub name: String,
    /// Device type
    pub device_type: vk::PhysicalDeviceType,
    /// Geometry shader support
    pub geometry_shader: bool,
    /// Tessellation shader support
    pub tessellation_shader: bool,
    /// Anisotropic filtering support
    pub sampler_anisotropy: bool,
    /// Queue families in index order
    pub queue_families: Vec<QueueFamilySupport>,
    /// Swapchain extension available
    pub swapchain_extension: bool,
    /// Ray tracing extensions available
    pub ray_tracing_extensions: bool,
    /// Number of surface formats
    pub surface_format_count: usize,
    /// Number of surface present modes
    pub present_mode_count: usize,
}

impl DeviceCandidate {
    /// Pick graphics, present and transfer families.
    ///
    /// Transfer prefers a family without graphics and falls back to the
    /// graphics family.
    pub fn queue_family_indices(&self) -> Option<QueueFamilyIndices> {
        let position = |pred: fn(&QueueFamilySupport) -> bool| {
            self.queue_families
                .iter()
                .position(pred)
                .and_then(|i| u32::try_from(i).ok())
        };
        let graphics = position(|f| f.graphics)?;
        let present = position(|f| f.present)?;
        let transfer = position(|f| f.transfer && !f.graphics).unwrap_or(graphics);
        Some(QueueFamilyIndices {
            graphics,
            present,
            transfer,
        })
    }

    /// Why the device cannot be used, or `None` when it is suitable
    pub fn rejection(&self, requirements: &DeviceRequirements) -> Option<String> {
        if requirements.geometry_shader && !self.geometry_shader {
            return Some("no geometry shader support".to_string());
        }
        if requirements.tessellation_shader && !self.tessellation_shader {
            return Some("no tessellation shader support".to_string());
        }
        if requirements.sampler_anisotropy && !self.sampler_anisotropy {
            return Some("no sampler anisotropy".to_string());
        }
        if !self.swapchain_extension {
            return Some("swapchain extension missing".to_string());
        }
        if self.surface_format_count == 0 || self.present_mode_count == 0 {
            return Some("surface reports no formats or present modes".to_string());
        }
        if self.queue_family_indices().is_none() {
            return Some("missing graphics or present queue family".to_string());
        }
        None
    }

    /// Gather a candidate from a real physical device
    pub fn evaluate(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let features = unsafe { instance.get_physical_device_features(device) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut queue_families = Vec::with_capacity(families.len());
        for (index, family) in families.iter().enumerate() {
            let index = u32::try_from(index).map_err(|_| VulkanError::Api(vk::Result::ERROR_UNKNOWN))?;
            let present = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .map_err(VulkanError::Api)?
            };
            queue_families.push(QueueFamilySupport {
                graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                transfer: family.queue_flags.contains(vk::QueueFlags::TRANSFER),
                present,
            });
        }

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let has_extension = |required: &CStr| {
            extensions
                .iter()
                .any(|available| unsafe { CStr::from_ptr(available.extension_name.as_ptr()) } == required)
        };

        let surface_format_count = unsafe {
            surface_loader
                .get_physical_device_surface_formats(device, surface)
                .map_err(VulkanError::Api)?
                .len()
        };
        let present_mode_count = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(device, surface)
                .map_err(VulkanError::Api)?
                .len()
        };

        Ok(Self {
            name: unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned(),
            device_type: properties.device_type,
            geometry_shader: features.geometry_shader == vk::TRUE,
            tessellation_shader: features.tessellation_shader == vk::TRUE,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            queue_families,
            swapchain_extension: has_extension(Swapchain::name()),
            ray_tracing_extensions: has_extension(AccelerationStructure::name())
                && has_extension(RayTracingPipeline::name())
                && has_extension(DeferredHostOperations::name()),
            surface_format_count,
            present_mode_count,
        })
    }
}

/// Index of the first suitable candidate.
///
/// Enumeration order decides between several suitable devices.
pub fn select_physical_device(candidates: &[DeviceCandidate], requirements: &DeviceRequirements) -> VulkanResult<usize> {
    let mut reasons = Vec::new();
    for (index, candidate) in candidates.iter().enumerate() {
        match candidate.rejection(requirements) {
            None => {
                let suitable = candidates
                    .iter()
                    .skip(index + 1)
                    .filter(|c| c.rejection(requirements).is_none())
                    .count();
                if suitable > 0 {
                    log::info!(
                        "Selected GPU: {} ({:?}); {} other suitable device(s) ignored",
                        candidate.name,
                        candidate.device_type,
                        suitable
                    );
                } else {
                    log::info!("Selected GPU: {} ({:?})", candidate.name, candidate.device_type);
                }
                return Ok(index);
            }
            Some(reason) => {
                log::debug!("Rejected GPU {}: {}", candidate.name, reason);
                reasons.push(format!("{}: {}", candidate.name, reason));
            }
        }
    }

    if reasons.is_empty() {
        Err(VulkanError::NoSuitableDevice("no physical devices".to_string()))
    } else {
        Err(VulkanError::NoSuitableDevice(reasons.join("; ")))
    }
}
