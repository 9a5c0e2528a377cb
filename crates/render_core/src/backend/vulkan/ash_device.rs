//! [`GpuDevice`] implementation over `ash`

use std::ffi::CStr;

use ash::extensions::khr::Surface;
use ash::vk;
use parking_lot::Mutex;

use super::instance::VulkanInstance;
use super::logical_device::LogicalDevice;
use super::physical_device::{select_physical_device, DeviceCandidate};
use super::surface::SurfaceProvider;
use crate::backend::device::{
    DescriptorWrite, FramebufferDesc, GpuDevice, GraphicsPipelineDesc, ImageDesc, ImageViewDesc,
    InheritanceInfo, QueueFamilyIndices, QueueType, RenderPassDesc, SamplerDesc, SubmitBatch,
    SwapchainDesc, TableBinding,
};
use crate::backend::{VulkanError, VulkanResult};
use crate::commands::Command;
use crate::config::RendererConfig;

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Real Vulkan device: instance, surface, physical and logical device.
///
/// Dropping it waits for idle and destroys the device, the surface and the
/// instance in that order.
pub struct AshDevice {
    logical: LogicalDevice,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    device_name: String,
    // Serializes queue access; VkQueue requires external synchronization
    queue_lock: Mutex<()>,
    instance: VulkanInstance,
}

impl AshDevice {
    /// Create the instance, surface and device for `provider`'s window.
    ///
    /// Picks the first physical device meeting the configured requirements.
    pub fn new(config: &RendererConfig, provider: &dyn SurfaceProvider) -> VulkanResult<Self> {
        let extensions = provider.required_instance_extensions()?;
        let api_version = if config.ray_tracing {
            vk::API_VERSION_1_2
        } else {
            vk::API_VERSION_1_0
        };
        let instance = VulkanInstance::new(
            &config.application_name,
            &extensions,
            config.validation_enabled(),
            api_version,
        )?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = provider.create_surface(&instance.entry, &instance.instance)?;

        let physical_devices = unsafe {
            instance
                .instance
                .enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };
        let candidates = physical_devices
            .iter()
            .map(|&device| DeviceCandidate::evaluate(&instance.instance, device, &surface_loader, surface))
            .collect::<VulkanResult<Vec<_>>>()?;
        let index = select_physical_device(&candidates, &config.device_requirements)?;
        let candidate = &candidates[index];
        let physical_device = physical_devices[index];

        let families = candidate
            .queue_family_indices()
            .ok_or_else(|| VulkanError::NoSuitableDevice(candidate.name.clone()))?;
        let enable_ray_tracing = config.ray_tracing && candidate.ray_tracing_extensions;
        if config.ray_tracing && !enable_ray_tracing {
            log::warn!("Ray tracing requested but {} does not support it", candidate.name);
        }

        let logical = LogicalDevice::new(
            &instance.instance,
            physical_device,
            families,
            &config.device_requirements,
            enable_ray_tracing,
        )?;
        let memory_properties = unsafe { instance.instance.get_physical_device_memory_properties(physical_device) };

        Ok(Self {
            logical,
            physical_device,
            memory_properties,
            surface,
            surface_loader,
            device_name: candidate.name.clone(),
            queue_lock: Mutex::new(()),
            instance,
        })
    }

    /// Name of the selected physical device
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Whether ray tracing commands are available
    pub fn ray_tracing_enabled(&self) -> bool {
        self.logical.ray_tracing.is_some()
    }

    fn device(&self) -> &ash::Device {
        &self.logical.device
    }

    fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        (0..self.memory_properties.memory_type_count)
            .find(|&i| {
                (type_filter & (1 << i)) != 0
                    && self.memory_properties.memory_types[i as usize]
                        .property_flags
                        .contains(properties)
            })
            .ok_or(VulkanError::NoSuitableMemoryType)
    }
}

impl Drop for AshDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.logical.device.device_wait_idle();
            self.logical.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
        log::info!("Vulkan device destroyed");
    }
}

enum DescriptorInfo {
    Buffer([vk::DescriptorBufferInfo; 1]),
    Image([vk::DescriptorImageInfo; 1]),
}

impl GpuDevice for AshDevice {
    fn queue_families(&self) -> QueueFamilyIndices {
        self.logical.families
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        let _guard = self.queue_lock.lock();
        unsafe { self.device().device_wait_idle().map_err(VulkanError::Api) }
    }

    fn queue_wait_idle(&self, queue: QueueType) -> VulkanResult<()> {
        let _guard = self.queue_lock.lock();
        unsafe {
            self.device()
                .queue_wait_idle(self.logical.queue(queue))
                .map_err(VulkanError::Api)
        }
    }

    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<vk::Buffer> {
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        unsafe { self.device().create_buffer(&info, None).map_err(VulkanError::Api) }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device().destroy_buffer(buffer, None) }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device().get_buffer_memory_requirements(buffer) }
    }

    fn allocate_memory(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<vk::DeviceMemory> {
        let memory_type_index = self.find_memory_type(requirements.memory_type_bits, properties)?;
        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        unsafe { self.device().allocate_memory(&info, None).map_err(VulkanError::Api) }
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device().free_memory(memory, None) }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VulkanResult<()> {
        unsafe {
            self.device()
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(VulkanError::Api)
        }
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        unsafe {
            let ptr = self
                .device()
                .map_memory(memory, offset, data.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            self.device().unmap_memory(memory);
        }
        Ok(())
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<vk::Image> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .flags(desc.flags);
        unsafe { self.device().create_image(&info, None).map_err(VulkanError::Api) }
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device().destroy_image(image, None) }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device().get_image_memory_requirements(image) }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VulkanResult<()> {
        unsafe {
            self.device()
                .bind_image_memory(image, memory, 0)
                .map_err(VulkanError::Api)
        }
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> VulkanResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::builder()
            .image(desc.image)
            .view_type(desc.view_type)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: desc.array_layers,
            });
        unsafe { self.device().create_image_view(&info, None).map_err(VulkanError::Api) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device().destroy_image_view(view, None) }
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(desc.max_anisotropy.is_some())
            .max_anisotropy(desc.max_anisotropy.unwrap_or(1.0))
            .min_lod(0.0)
            .max_lod(desc.max_lod)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK);
        unsafe { self.device().create_sampler(&info, None).map_err(VulkanError::Api) }
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device().destroy_sampler(sampler, None) }
    }

    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::builder().code(code);
        unsafe { self.device().create_shader_module(&info, None).map_err(VulkanError::Api) }
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device().destroy_shader_module(module, None) }
    }

    fn create_descriptor_set_layout(&self, bindings: &[TableBinding]) -> VulkanResult<vk::DescriptorSetLayout> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stages)
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);
        unsafe {
            self.device()
                .create_descriptor_set_layout(&info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device().destroy_descriptor_set_layout(layout, None) }
    }

    fn create_descriptor_pool(
        &self,
        sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> VulkanResult<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .pool_sizes(sizes)
            .max_sets(max_sets);
        unsafe { self.device().create_descriptor_pool(&info, None).map_err(VulkanError::Api) }
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device().destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device().allocate_descriptor_sets(&info).map_err(VulkanError::Api)? };
        sets.into_iter()
            .next()
            .ok_or(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
    }

    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) -> VulkanResult<()> {
        unsafe {
            self.device()
                .free_descriptor_sets(pool, &[set])
                .map_err(VulkanError::Api)
        }
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        let infos: Vec<(u32, vk::DescriptorType, DescriptorInfo)> = writes
            .iter()
            .map(|write| match *write {
                DescriptorWrite::UniformBuffer {
                    binding,
                    buffer,
                    offset,
                    range,
                } => (
                    binding,
                    vk::DescriptorType::UNIFORM_BUFFER,
                    DescriptorInfo::Buffer([vk::DescriptorBufferInfo { buffer, offset, range }]),
                ),
                DescriptorWrite::StorageBuffer {
                    binding,
                    buffer,
                    offset,
                    range,
                } => (
                    binding,
                    vk::DescriptorType::STORAGE_BUFFER,
                    DescriptorInfo::Buffer([vk::DescriptorBufferInfo { buffer, offset, range }]),
                ),
                DescriptorWrite::CombinedImageSampler {
                    binding,
                    view,
                    sampler,
                    layout,
                } => (
                    binding,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    DescriptorInfo::Image([vk::DescriptorImageInfo {
                        sampler,
                        image_view: view,
                        image_layout: layout,
                    }]),
                ),
                DescriptorWrite::StorageImage { binding, view } => (
                    binding,
                    vk::DescriptorType::STORAGE_IMAGE,
                    DescriptorInfo::Image([vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: view,
                        image_layout: vk::ImageLayout::GENERAL,
                    }]),
                ),
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = infos
            .iter()
            .map(|(binding, descriptor_type, info)| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .dst_array_element(0)
                    .descriptor_type(*descriptor_type);
                match info {
                    DescriptorInfo::Buffer(buffer_info) => builder.buffer_info(buffer_info).build(),
                    DescriptorInfo::Image(image_info) => builder.image_info(image_info).build(),
                }
            })
            .collect();

        unsafe { self.device().update_descriptor_sets(&vk_writes, &[]) }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        let info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        unsafe { self.device().create_pipeline_layout(&info, None).map_err(VulkanError::Api) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device().destroy_pipeline_layout(layout, None) }
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass> {
        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&desc.color_references);
        if let Some(depth) = desc.depth_reference.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth);
        }
        let subpasses = [subpass.build()];
        let info = vk::RenderPassCreateInfo::builder()
            .attachments(&desc.attachments)
            .subpasses(&subpasses)
            .dependencies(&desc.dependencies);
        unsafe { self.device().create_render_pass(&info, None).map_err(VulkanError::Api) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device().destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> VulkanResult<vk::Framebuffer> {
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(desc.render_pass)
            .attachments(&desc.attachments)
            .width(desc.extent.width)
            .height(desc.extent.height)
            .layers(1);
        unsafe { self.device().create_framebuffer(&info, None).map_err(VulkanError::Api) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device().destroy_framebuffer(framebuffer, None) }
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> VulkanResult<vk::Pipeline> {
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = desc
            .stages
            .iter()
            .map(|stage| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage.stage)
                    .module(stage.module)
                    .name(ENTRY_POINT)
                    .build()
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&desc.vertex_bindings)
            .vertex_attribute_descriptions(&desc.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(desc.topology)
            .primitive_restart_enable(false);

        let tessellation = vk::PipelineTessellationStateCreateInfo::builder()
            .patch_control_points(desc.patch_control_points.max(1));

        // Viewport and scissor are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth.test_enable)
            .depth_write_enable(desc.depth.write_enable)
            .depth_compare_op(desc.depth.compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(desc.stencil.test_enable)
            .front(desc.stencil.ops)
            .back(desc.stencil.ops);

        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&desc.color_blend);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let mut info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout)
            .render_pass(desc.render_pass)
            .subpass(desc.subpass);
        if desc.patch_control_points > 0 {
            info = info.tessellation_state(&tessellation);
        }

        let pipelines = unsafe {
            self.device()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info.build()], None)
                .map_err(|(_, e)| VulkanError::Api(e))?
        };
        pipelines
            .into_iter()
            .next()
            .ok_or(VulkanError::Api(vk::Result::ERROR_UNKNOWN))
    }

    fn create_compute_pipeline(
        &self,
        layout: vk::PipelineLayout,
        module: vk::ShaderModule,
    ) -> VulkanResult<vk::Pipeline> {
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(ENTRY_POINT)
            .build();
        let info = vk::ComputePipelineCreateInfo::builder().stage(stage).layout(layout);
        let pipelines = unsafe {
            self.device()
                .create_compute_pipelines(vk::PipelineCache::null(), &[info.build()], None)
                .map_err(|(_, e)| VulkanError::Api(e))?
        };
        pipelines
            .into_iter()
            .next()
            .ok_or(VulkanError::Api(vk::Result::ERROR_UNKNOWN))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device().destroy_pipeline(pipeline, None) }
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device().create_fence(&info, None).map_err(VulkanError::Api) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device().destroy_fence(fence, None) }
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> VulkanResult<()> {
        unsafe {
            self.device()
                .wait_for_fences(fences, true, timeout)
                .map_err(VulkanError::Api)
        }
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> VulkanResult<()> {
        unsafe { self.device().reset_fences(fences).map_err(VulkanError::Api) }
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device().create_semaphore(&info, None).map_err(VulkanError::Api) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device().destroy_semaphore(semaphore, None) }
    }

    fn create_event(&self) -> VulkanResult<vk::Event> {
        let info = vk::EventCreateInfo::builder();
        unsafe { self.device().create_event(&info, None).map_err(VulkanError::Api) }
    }

    fn destroy_event(&self, event: vk::Event) {
        unsafe { self.device().destroy_event(event, None) }
    }

    fn create_query_pool(&self, query_type: vk::QueryType, count: u32) -> VulkanResult<vk::QueryPool> {
        let info = vk::QueryPoolCreateInfo::builder()
            .query_type(query_type)
            .query_count(count);
        unsafe { self.device().create_query_pool(&info, None).map_err(VulkanError::Api) }
    }

    fn destroy_query_pool(&self, pool: vk::QueryPool) {
        unsafe { self.device().destroy_query_pool(pool, None) }
    }

    fn create_command_pool(
        &self,
        queue: QueueType,
        flags: vk::CommandPoolCreateFlags,
    ) -> VulkanResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(flags)
            .queue_family_index(self.logical.families.family(queue));
        unsafe { self.device().create_command_pool(&info, None).map_err(VulkanError::Api) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device().destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(level)
            .command_buffer_count(count);
        unsafe { self.device().allocate_command_buffers(&info).map_err(VulkanError::Api) }
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device().free_command_buffers(pool, buffers) }
    }

    fn begin_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
        inheritance: Option<&InheritanceInfo>,
    ) -> VulkanResult<()> {
        let inheritance_info = inheritance.map(|info| {
            vk::CommandBufferInheritanceInfo::builder()
                .render_pass(info.render_pass)
                .subpass(info.subpass)
                .framebuffer(info.framebuffer)
                .build()
        });
        let mut begin_info = vk::CommandBufferBeginInfo::builder().flags(usage);
        if let Some(info) = inheritance_info.as_ref() {
            begin_info = begin_info.inheritance_info(info);
        }
        unsafe {
            self.device()
                .begin_command_buffer(buffer, &begin_info)
                .map_err(VulkanError::Api)
        }
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe { self.device().end_command_buffer(buffer).map_err(VulkanError::Api) }
    }

    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe {
            self.device()
                .reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)
        }
    }

    fn record(&self, cb: vk::CommandBuffer, command: &Command<'_>) {
        let device = self.device();
        unsafe {
            match *command {
                Command::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    render_area,
                    clear_values,
                    contents,
                } => {
                    let info = vk::RenderPassBeginInfo::builder()
                        .render_pass(render_pass)
                        .framebuffer(framebuffer)
                        .render_area(render_area)
                        .clear_values(clear_values);
                    device.cmd_begin_render_pass(cb, &info, contents);
                }
                Command::NextSubpass { contents } => device.cmd_next_subpass(cb, contents),
                Command::EndRenderPass => device.cmd_end_render_pass(cb),
                Command::BindPipeline { bind_point, pipeline } => device.cmd_bind_pipeline(cb, bind_point, pipeline),
                Command::BindDescriptorSets {
                    bind_point,
                    layout,
                    first_set,
                    sets,
                } => device.cmd_bind_descriptor_sets(cb, bind_point, layout, first_set, sets, &[]),
                Command::BindVertexBuffers {
                    first_binding,
                    buffers,
                    offsets,
                } => device.cmd_bind_vertex_buffers(cb, first_binding, buffers, offsets),
                Command::BindIndexBuffer {
                    buffer,
                    offset,
                    index_type,
                } => device.cmd_bind_index_buffer(cb, buffer, offset, index_type),
                Command::PushConstants {
                    layout,
                    stages,
                    offset,
                    data,
                } => device.cmd_push_constants(cb, layout, stages, offset, data),
                Command::SetViewport(viewport) => device.cmd_set_viewport(cb, 0, &[viewport]),
                Command::SetScissor(scissor) => device.cmd_set_scissor(cb, 0, &[scissor]),
                Command::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => device.cmd_draw(cb, vertex_count, instance_count, first_vertex, first_instance),
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                } => device.cmd_draw_indexed(cb, index_count, instance_count, first_index, vertex_offset, first_instance),
                Command::Dispatch { x, y, z } => device.cmd_dispatch(cb, x, y, z),
                Command::TraceRays {
                    raygen,
                    miss,
                    hit,
                    callable,
                    width,
                    height,
                    depth,
                } => match &self.logical.ray_tracing {
                    Some(rt) => rt
                        .pipeline
                        .cmd_trace_rays(cb, &raygen, &miss, &hit, &callable, width, height, depth),
                    None => log::error!("trace_rays recorded without ray tracing support"),
                },
                Command::BuildAccelerationStructures { infos, ranges } => match &self.logical.ray_tracing {
                    Some(rt) => rt
                        .acceleration_structure
                        .cmd_build_acceleration_structures(cb, infos, ranges),
                    None => log::error!("acceleration structure build recorded without ray tracing support"),
                },
                Command::CopyBuffer { src, dst, regions } => device.cmd_copy_buffer(cb, src, dst, regions),
                Command::CopyBufferToImage {
                    src,
                    dst,
                    layout,
                    regions,
                } => device.cmd_copy_buffer_to_image(cb, src, dst, layout, regions),
                Command::CopyImage {
                    src,
                    src_layout,
                    dst,
                    dst_layout,
                    regions,
                } => device.cmd_copy_image(cb, src, src_layout, dst, dst_layout, regions),
                Command::BlitImage {
                    src,
                    src_layout,
                    dst,
                    dst_layout,
                    regions,
                    filter,
                } => device.cmd_blit_image(cb, src, src_layout, dst, dst_layout, regions, filter),
                Command::ClearColorImage {
                    image,
                    layout,
                    color,
                    ranges,
                } => device.cmd_clear_color_image(cb, image, layout, &color, ranges),
                Command::ClearDepthStencilImage {
                    image,
                    layout,
                    value,
                    ranges,
                } => device.cmd_clear_depth_stencil_image(cb, image, layout, &value, ranges),
                Command::PipelineBarrier {
                    src_stage,
                    dst_stage,
                    memory_barriers,
                    image_barriers,
                } => device.cmd_pipeline_barrier(
                    cb,
                    src_stage,
                    dst_stage,
                    vk::DependencyFlags::empty(),
                    memory_barriers,
                    &[],
                    image_barriers,
                ),
                Command::SetEvent { event, stage } => device.cmd_set_event(cb, event, stage),
                Command::ResetEvent { event, stage } => device.cmd_reset_event(cb, event, stage),
                Command::WaitEvents {
                    events,
                    src_stage,
                    dst_stage,
                } => device.cmd_wait_events(cb, events, src_stage, dst_stage, &[], &[], &[]),
                Command::ExecuteCommands { command_buffers } => device.cmd_execute_commands(cb, command_buffers),
                Command::WriteTimestamp { stage, pool, query } => device.cmd_write_timestamp(cb, stage, pool, query),
                Command::ResetQueryPool {
                    pool,
                    first_query,
                    count,
                } => device.cmd_reset_query_pool(cb, pool, first_query, count),
            }
        }
    }

    fn queue_submit(&self, queue: QueueType, batches: &[SubmitBatch<'_>], fence: vk::Fence) -> VulkanResult<()> {
        let submits: Vec<vk::SubmitInfo> = batches
            .iter()
            .map(|batch| {
                vk::SubmitInfo::builder()
                    .wait_semaphores(batch.wait_semaphores)
                    .wait_dst_stage_mask(batch.wait_stages)
                    .command_buffers(batch.command_buffers)
                    .signal_semaphores(batch.signal_semaphores)
                    .build()
            })
            .collect();
        let _guard = self.queue_lock.lock();
        unsafe {
            self.device()
                .queue_submit(self.logical.queue(queue), &submits, fence)
                .map_err(VulkanError::Api)
        }
    }

    fn surface_capabilities(&self) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    fn surface_formats(&self) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    fn surface_present_modes(&self) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VulkanResult<vk::SwapchainKHR> {
        let sharing_mode = if desc.shared_queue_families.is_empty() {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        };
        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(desc.min_image_count)
            .image_format(desc.format.format)
            .image_color_space(desc.format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&desc.shared_queue_families)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(desc.old_swapchain);
        unsafe {
            self.logical
                .swapchain_loader
                .create_swapchain(&info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.logical.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        unsafe {
            self.logical
                .swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::Api)
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VulkanResult<(u32, bool)> {
        // A suboptimal image is still acquired and `semaphore` will signal
        let acquired = unsafe {
            self.logical
                .swapchain_loader
                .acquire_next_image(swapchain, timeout, semaphore, vk::Fence::null())?
        };
        Ok(acquired)
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> VulkanResult<()> {
        let swapchains = [swapchain];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        let _guard = self.queue_lock.lock();
        let suboptimal = unsafe {
            self.logical
                .swapchain_loader
                .queue_present(self.logical.present_queue, &info)?
        };
        if suboptimal {
            return Err(VulkanError::SwapchainOutOfDate);
        }
        Ok(())
    }
}
