//! Logical device and queues

use std::collections::BTreeSet;

use ash::extensions::khr::{AccelerationStructure, DeferredHostOperations, RayTracingPipeline, Swapchain};
use ash::{vk, Device, Instance};

use crate::backend::{QueueFamilyIndices, QueueType, VulkanError, VulkanResult};
use crate::config::DeviceRequirements;

/// Ray tracing extension loaders
pub struct RayTracingLoaders {
    /// `VK_KHR_acceleration_structure`
    pub acceleration_structure: AccelerationStructure,
    /// `VK_KHR_ray_tracing_pipeline`
    pub pipeline: RayTracingPipeline,
}

/// Logical device with its queues.
///
/// Destruction is left to the owner, which must wait for idle first.
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics queue
    pub graphics_queue: vk::Queue,
    /// Present queue
    pub present_queue: vk::Queue,
    /// Transfer queue
    pub transfer_queue: vk::Queue,
    /// Queue family indices
    pub families: QueueFamilyIndices,
    /// Swapchain extension loader
    pub swapchain_loader: Swapchain,
    /// Present when ray tracing was requested and supported
    pub ray_tracing: Option<RayTracingLoaders>,
}

impl LogicalDevice {
    /// Create a device with one queue per unique family
    pub fn new(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilyIndices,
        requirements: &DeviceRequirements,
        enable_ray_tracing: bool,
    ) -> VulkanResult<Self> {
        let unique_families: BTreeSet<u32> = [families.graphics, families.present, families.transfer]
            .into_iter()
            .collect();
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let mut extensions = vec![Swapchain::name().as_ptr()];
        if enable_ray_tracing {
            extensions.extend([
                AccelerationStructure::name().as_ptr(),
                RayTracingPipeline::name().as_ptr(),
                DeferredHostOperations::name().as_ptr(),
            ]);
        }

        let features = vk::PhysicalDeviceFeatures::builder()
            .geometry_shader(requirements.geometry_shader)
            .tessellation_shader(requirements.tessellation_shader)
            .sampler_anisotropy(requirements.sampler_anisotropy)
            .build();

        let mut address_features = vk::PhysicalDeviceBufferDeviceAddressFeatures::builder().buffer_device_address(true);
        let mut acceleration_features =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder().acceleration_structure(true);
        let mut pipeline_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::builder().ray_tracing_pipeline(true);

        let mut create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);
        if enable_ray_tracing {
            create_info = create_info
                .push_next(&mut address_features)
                .push_next(&mut acceleration_features)
                .push_next(&mut pipeline_features);
        }

        let device = unsafe {
            instance
                .create_device(physical_device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let (graphics_queue, present_queue, transfer_queue) = unsafe {
            (
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.present, 0),
                device.get_device_queue(families.transfer, 0),
            )
        };

        let swapchain_loader = Swapchain::new(instance, &device);
        let ray_tracing = enable_ray_tracing.then(|| RayTracingLoaders {
            acceleration_structure: AccelerationStructure::new(instance, &device),
            pipeline: RayTracingPipeline::new(instance, &device),
        });

        log::info!(
            "Logical device created: graphics family {}, present family {}, transfer family {}{}",
            families.graphics,
            families.present,
            families.transfer,
            if enable_ray_tracing { ", ray tracing enabled" } else { "" }
        );

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            transfer_queue,
            families,
            swapchain_loader,
            ray_tracing,
        })
    }

    /// Queue handle for a queue type
    pub fn queue(&self, queue: QueueType) -> vk::Queue {
        match queue {
            QueueType::Graphics => self.graphics_queue,
            QueueType::Present => self.present_queue,
            QueueType::Transfer => self.transfer_queue,
        }
    }
}
