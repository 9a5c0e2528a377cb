//! Resource factory
//!
//! Creates every GPU-resident object the renderer uses and keeps it in a
//! generation-checked pool until it is destroyed explicitly or the factory is
//! released at shutdown.

use std::path::Path;
use std::sync::Arc;

use ash::vk;

use crate::assets::TextureAsset;
use crate::backend::{
    DescriptorWrite, FramebufferDesc, GpuDevice, GraphicsPipelineDesc, ImageDesc, ImageViewDesc, QueueType,
    RenderPassDesc, SamplerDesc, TableBinding, VulkanError, VulkanResult,
};
use crate::commands::{submit_single_use, Command, CommandBuffer};
use crate::foundation::collections::{HandlePool, Key};
use crate::resources::handles::*;
use crate::resources::kinds::{
    Buffer, CommandPool, Event, Fence, Framebuffer, GpuResource, Image, MemoryLocation, Pipeline, PipelineLayout,
    QueryPool, RenderDataTable, RenderPass, Sampler, Semaphore, ShaderModule, TableLayout,
};

const MAX_TABLES: u32 = 256;

/// Buffer creation parameters
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    /// Size in bytes
    pub size: vk::DeviceSize,
    /// Usage flags; `TRANSFER_DST` is added for staged uploads
    pub usage: vk::BufferUsageFlags,
    /// Memory location
    pub location: MemoryLocation,
    /// Contents uploaded at creation
    pub initial_data: Option<&'a [u8]>,
}

/// Sampled texture creation parameters
#[derive(Debug, Clone, Copy)]
pub struct TextureDesc<'a> {
    /// Name used in logs
    pub name: &'a str,
    /// Size of mip 0
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Mip levels, each half the size of the previous one
    pub mip_levels: u32,
    /// Array layers; 6 for cube maps
    pub array_layers: u32,
    /// Tightly packed texels, layer-major then mip order
    pub data: &'a [u8],
}

/// A resource bound into a render-data table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderDataTableBinding {
    /// Whole buffer as uniform buffer
    UniformBuffer {
        /// Binding number
        binding: u32,
        /// Buffer
        buffer: BufferHandle,
    },
    /// Whole buffer as storage buffer
    StorageBuffer {
        /// Binding number
        binding: u32,
        /// Buffer
        buffer: BufferHandle,
    },
    /// 2D texture with sampler
    Texture {
        /// Binding number
        binding: u32,
        /// Texture
        texture: TextureHandle,
        /// Sampler
        sampler: SamplerHandle,
    },
    /// Cube map with sampler
    CubeMap {
        /// Binding number
        binding: u32,
        /// Cube map
        cube_map: CubeMapHandle,
        /// Sampler
        sampler: SamplerHandle,
    },
    /// Offscreen render target read by a later pass
    RenderTarget {
        /// Binding number
        binding: u32,
        /// Render target
        target: RenderTargetHandle,
        /// Sampler
        sampler: SamplerHandle,
    },
    /// Depth buffer read by a later pass
    DepthBuffer {
        /// Binding number
        binding: u32,
        /// Depth buffer
        depth: DepthBufferHandle,
        /// Sampler
        sampler: SamplerHandle,
    },
}

/// Creates, tracks and destroys GPU resources
pub struct ResourceFactory {
    device: Arc<dyn GpuDevice>,
    upload_queue: QueueType,
    descriptor_pool: vk::DescriptorPool,
    upload_pool: vk::CommandPool,
    released: bool,

    buffers: HandlePool<BufferHandle, Buffer>,
    textures: HandlePool<TextureHandle, Image>,
    cube_maps: HandlePool<CubeMapHandle, Image>,
    depth_buffers: HandlePool<DepthBufferHandle, Image>,
    render_targets: HandlePool<RenderTargetHandle, Image>,
    samplers: HandlePool<SamplerHandle, Sampler>,
    shader_modules: HandlePool<ShaderModuleHandle, ShaderModule>,
    table_layouts: HandlePool<TableLayoutHandle, TableLayout>,
    tables: HandlePool<RenderDataTableHandle, RenderDataTable>,
    pipeline_layouts: HandlePool<PipelineLayoutHandle, PipelineLayout>,
    render_passes: HandlePool<RenderPassHandle, RenderPass>,
    framebuffers: HandlePool<FramebufferHandle, Framebuffer>,
    graphics_pipelines: HandlePool<GraphicsPipelineHandle, Pipeline>,
    compute_pipelines: HandlePool<ComputePipelineHandle, Pipeline>,
    fences: HandlePool<FenceHandle, Fence>,
    semaphores: HandlePool<SemaphoreHandle, Semaphore>,
    events: HandlePool<EventHandle, Event>,
    query_pools: HandlePool<QueryPoolHandle, QueryPool>,
    command_pools: HandlePool<CommandPoolHandle, CommandPool>,
}

impl ResourceFactory {
    /// Create the factory with its descriptor pool and upload command pool
    pub fn new(device: Arc<dyn GpuDevice>) -> VulkanResult<Self> {
        let families = device.queue_families();
        // Uploads end in shader-stage barriers, which a transfer-only family cannot execute
        let upload_queue = if families.transfer == families.graphics {
            QueueType::Transfer
        } else {
            QueueType::Graphics
        };

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: MAX_TABLES,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: MAX_TABLES,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: MAX_TABLES * 4,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: MAX_TABLES / 4,
            },
        ];
        let descriptor_pool = device.create_descriptor_pool(&pool_sizes, MAX_TABLES)?;
        let upload_pool = match device.create_command_pool(
            upload_queue,
            vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ) {
            Ok(pool) => pool,
            Err(e) => {
                device.destroy_descriptor_pool(descriptor_pool);
                return Err(e);
            }
        };

        log::debug!("Resource factory created, uploads on {:?} queue", upload_queue);

        Ok(Self {
            device,
            upload_queue,
            descriptor_pool,
            upload_pool,
            released: false,
            buffers: HandlePool::new(),
            textures: HandlePool::new(),
            cube_maps: HandlePool::new(),
            depth_buffers: HandlePool::new(),
            render_targets: HandlePool::new(),
            samplers: HandlePool::new(),
            shader_modules: HandlePool::new(),
            table_layouts: HandlePool::new(),
            tables: HandlePool::new(),
            pipeline_layouts: HandlePool::new(),
            render_passes: HandlePool::new(),
            framebuffers: HandlePool::new(),
            graphics_pipelines: HandlePool::new(),
            compute_pipelines: HandlePool::new(),
            fences: HandlePool::new(),
            semaphores: HandlePool::new(),
            events: HandlePool::new(),
            query_pools: HandlePool::new(),
            command_pools: HandlePool::new(),
        })
    }

    /// Device every resource is created on
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    /// Queue uploads are submitted to
    pub fn upload_queue(&self) -> QueueType {
        self.upload_queue
    }

    // === Buffers ===

    /// Create a buffer, uploading `initial_data` if given.
    ///
    /// Host-visible buffers are written directly; device-local ones go through
    /// a staging buffer that is destroyed once the copy has executed.
    pub fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> VulkanResult<BufferHandle> {
        if let Some(data) = desc.initial_data {
            if data.len() as vk::DeviceSize > desc.size {
                return Err(VulkanError::invalid(format!(
                    "initial data of {} bytes exceeds buffer size {}",
                    data.len(),
                    desc.size
                )));
            }
        }

        let mut usage = desc.usage;
        if desc.location == MemoryLocation::DeviceLocal && desc.initial_data.is_some() {
            usage |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        let buffer = allocate_buffer(self.device.as_ref(), desc.size, usage, desc.location)?;

        if let Some(data) = desc.initial_data {
            if let Err(e) = self.write_buffer(&buffer, 0, data) {
                buffer.release(self.device.as_ref());
                return Err(e);
            }
        }

        let handle = self.buffers.insert(buffer);
        log::debug!(
            "Created buffer {:?}: {} bytes, {:?}, {:?}",
            handle,
            desc.size,
            desc.usage,
            desc.location
        );
        Ok(handle)
    }

    /// Overwrite part of a buffer
    pub fn update_buffer(&mut self, handle: BufferHandle, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let buffer = *self.buffer(handle)?;
        if offset + data.len() as vk::DeviceSize > buffer.size {
            return Err(VulkanError::invalid(format!(
                "update of {} bytes at {} overruns buffer of {} bytes",
                data.len(),
                offset,
                buffer.size
            )));
        }
        self.write_buffer(&buffer, offset, data)
    }

    fn write_buffer(&self, buffer: &Buffer, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        match buffer.location {
            MemoryLocation::HostVisible => self.device.write_memory(buffer.memory, offset, data),
            MemoryLocation::DeviceLocal => {
                let staging = self.create_staging(data)?;
                let dst = buffer.raw;
                let result = self.upload(|cb| {
                    let region = vk::BufferCopy {
                        src_offset: 0,
                        dst_offset: offset,
                        size: data.len() as vk::DeviceSize,
                    };
                    cb.record(
                        self.device.as_ref(),
                        Command::CopyBuffer {
                            src: staging.raw,
                            dst,
                            regions: &[region],
                        },
                    )
                });
                staging.release(self.device.as_ref());
                result
            }
        }
    }

    /// Buffer record
    pub fn buffer(&self, handle: BufferHandle) -> VulkanResult<&Buffer> {
        lookup(&self.buffers, handle, ResourceKind::Buffer)
    }

    /// Destroy a buffer and free its memory
    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> VulkanResult<()> {
        untrack(&mut self.buffers, handle, ResourceKind::Buffer, self.device.as_ref())
    }

    // === Images ===

    /// Create a sampled 2D texture and upload its texels.
    ///
    /// The upload records `UNDEFINED → TRANSFER_DST`, one copy region per mip
    /// level and layer, then `TRANSFER_DST → SHADER_READ_ONLY`.
    pub fn create_texture(&mut self, desc: &TextureDesc<'_>) -> VulkanResult<TextureHandle> {
        let image = self.create_uploaded_image(desc, vk::ImageCreateFlags::empty(), vk::ImageViewType::TYPE_2D_ARRAY)?;
        let handle = self.textures.insert(image);
        log::debug!(
            "Created texture {:?} '{}': {}x{}, {} mips, {} layers",
            handle,
            desc.name,
            desc.extent.width,
            desc.extent.height,
            desc.mip_levels,
            desc.array_layers
        );
        Ok(handle)
    }

    /// Create a texture from a persisted texture asset
    pub fn create_texture_from_asset(&mut self, asset: &TextureAsset) -> VulkanResult<TextureHandle> {
        let (width, height) = asset.extent();
        let data = asset.packed_texels();
        self.create_texture(&TextureDesc {
            name: &asset.header.name,
            extent: vk::Extent2D { width, height },
            format: vk::Format::R8G8B8A8_UNORM,
            mip_levels: asset.mip_level_count() as u32,
            array_layers: asset.layer_count() as u32,
            data: &data,
        })
    }

    /// Load a texture asset file and upload it
    pub fn load_texture(&mut self, path: impl AsRef<Path>) -> VulkanResult<TextureHandle> {
        let asset = TextureAsset::load(path.as_ref()).map_err(|e| VulkanError::AssetLoad {
            path: path.as_ref().display().to_string(),
            reason: e.to_string(),
        })?;
        self.create_texture_from_asset(&asset)
    }

    /// Texture record
    pub fn texture(&self, handle: TextureHandle) -> VulkanResult<&Image> {
        lookup(&self.textures, handle, ResourceKind::Texture)
    }

    /// Destroy a texture
    pub fn destroy_texture(&mut self, handle: TextureHandle) -> VulkanResult<()> {
        untrack(&mut self.textures, handle, ResourceKind::Texture, self.device.as_ref())
    }

    /// Create a cube map from six packed faces
    pub fn create_cube_map(&mut self, desc: &TextureDesc<'_>) -> VulkanResult<CubeMapHandle> {
        if desc.array_layers != 6 {
            return Err(VulkanError::invalid(format!(
                "cube map '{}' needs 6 layers, got {}",
                desc.name, desc.array_layers
            )));
        }
        let image = self.create_uploaded_image(desc, vk::ImageCreateFlags::CUBE_COMPATIBLE, vk::ImageViewType::CUBE)?;
        let handle = self.cube_maps.insert(image);
        log::debug!("Created cube map {:?} '{}'", handle, desc.name);
        Ok(handle)
    }

    /// Cube map record
    pub fn cube_map(&self, handle: CubeMapHandle) -> VulkanResult<&Image> {
        lookup(&self.cube_maps, handle, ResourceKind::CubeMap)
    }

    /// Destroy a cube map
    pub fn destroy_cube_map(&mut self, handle: CubeMapHandle) -> VulkanResult<()> {
        untrack(&mut self.cube_maps, handle, ResourceKind::CubeMap, self.device.as_ref())
    }

    fn create_uploaded_image(
        &self,
        desc: &TextureDesc<'_>,
        flags: vk::ImageCreateFlags,
        view_type: vk::ImageViewType,
    ) -> VulkanResult<Image> {
        if desc.mip_levels == 0 || desc.array_layers == 0 {
            return Err(VulkanError::invalid(format!("texture '{}' has no mips or layers", desc.name)));
        }
        let texel_size = bytes_per_texel(desc.format)
            .ok_or_else(|| VulkanError::invalid(format!("texture format {:?} cannot be uploaded", desc.format)))?;
        let regions = copy_regions(desc.extent, desc.mip_levels, desc.array_layers, texel_size);
        let expected = regions.last().map_or(0, |(offset, size, _)| offset + size);
        if desc.data.len() as vk::DeviceSize != expected {
            return Err(VulkanError::invalid(format!(
                "texture '{}' carries {} bytes, expected {}",
                desc.name,
                desc.data.len(),
                expected
            )));
        }

        let device = self.device.as_ref();
        let image = allocate_image(
            device,
            &ImageDesc {
                extent: desc.extent,
                format: desc.format,
                mip_levels: desc.mip_levels,
                array_layers: desc.array_layers,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                flags,
            },
            view_type,
            vk::ImageAspectFlags::COLOR,
        )?;

        let staging = match self.create_staging(desc.data) {
            Ok(staging) => staging,
            Err(e) => {
                image.release(device);
                return Err(e);
            }
        };
        let copies: Vec<vk::BufferImageCopy> = regions.into_iter().map(|(_, _, copy)| copy).collect();
        let result = self.upload(|cb| {
            cb.transition_image(
                device,
                image.raw,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                desc.mip_levels,
                desc.array_layers,
            )?;
            cb.copy_buffer_to_image(device, staging.raw, image.raw, &copies)?;
            cb.transition_image(
                device,
                image.raw,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                desc.mip_levels,
                desc.array_layers,
            )
        });
        staging.release(device);
        if let Err(e) = result {
            image.release(device);
            return Err(e);
        }
        Ok(image)
    }

    /// Create a depth buffer usable as attachment and sampled image
    pub fn create_depth_buffer(&mut self, extent: vk::Extent2D, format: vk::Format) -> VulkanResult<DepthBufferHandle> {
        let aspect = if has_stencil(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        };
        let device = self.device.as_ref();
        let mut image = allocate_image(
            device,
            &ImageDesc {
                extent,
                format,
                mip_levels: 1,
                array_layers: 1,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_DST,
                flags: vk::ImageCreateFlags::empty(),
            },
            vk::ImageViewType::TYPE_2D,
            aspect,
        )?;
        if has_stencil(format) {
            // Sampling reads a single aspect
            match device.create_image_view(&ImageViewDesc {
                image: image.raw,
                view_type: vk::ImageViewType::TYPE_2D,
                format,
                aspect: vk::ImageAspectFlags::DEPTH,
                mip_levels: 1,
                array_layers: 1,
            }) {
                Ok(view) => image.sampled_view = view,
                Err(e) => {
                    image.release(device);
                    return Err(e);
                }
            }
        }
        let handle = self.depth_buffers.insert(image);
        log::debug!(
            "Created depth buffer {:?}: {}x{} {:?}",
            handle,
            extent.width,
            extent.height,
            format
        );
        Ok(handle)
    }

    /// Depth buffer record
    pub fn depth_buffer(&self, handle: DepthBufferHandle) -> VulkanResult<&Image> {
        lookup(&self.depth_buffers, handle, ResourceKind::DepthBuffer)
    }

    /// Destroy a depth buffer
    pub fn destroy_depth_buffer(&mut self, handle: DepthBufferHandle) -> VulkanResult<()> {
        untrack(&mut self.depth_buffers, handle, ResourceKind::DepthBuffer, self.device.as_ref())
    }

    /// Create an offscreen color target that later passes can sample
    pub fn create_render_target(&mut self, extent: vk::Extent2D, format: vk::Format) -> VulkanResult<RenderTargetHandle> {
        let image = allocate_image(
            self.device.as_ref(),
            &ImageDesc {
                extent,
                format,
                mip_levels: 1,
                array_layers: 1,
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
                flags: vk::ImageCreateFlags::empty(),
            },
            vk::ImageViewType::TYPE_2D,
            vk::ImageAspectFlags::COLOR,
        )?;
        let handle = self.render_targets.insert(image);
        log::debug!(
            "Created render target {:?}: {}x{} {:?}",
            handle,
            extent.width,
            extent.height,
            format
        );
        Ok(handle)
    }

    /// Render target record
    pub fn render_target(&self, handle: RenderTargetHandle) -> VulkanResult<&Image> {
        lookup(&self.render_targets, handle, ResourceKind::RenderTarget)
    }

    /// Destroy a render target
    pub fn destroy_render_target(&mut self, handle: RenderTargetHandle) -> VulkanResult<()> {
        untrack(&mut self.render_targets, handle, ResourceKind::RenderTarget, self.device.as_ref())
    }

    /// Create a sampler
    pub fn create_sampler(&mut self, desc: &SamplerDesc) -> VulkanResult<SamplerHandle> {
        let sampler = self.device.create_sampler(desc)?;
        let handle = self.samplers.insert(Sampler(sampler));
        log::debug!("Created sampler {:?}: {:?}", handle, desc.filter);
        Ok(handle)
    }

    /// Raw sampler
    pub fn sampler(&self, handle: SamplerHandle) -> VulkanResult<vk::Sampler> {
        lookup(&self.samplers, handle, ResourceKind::Sampler).map(|s| s.0)
    }

    /// Destroy a sampler
    pub fn destroy_sampler(&mut self, handle: SamplerHandle) -> VulkanResult<()> {
        untrack(&mut self.samplers, handle, ResourceKind::Sampler, self.device.as_ref())
    }

    // === Shaders, tables and pipelines ===

    /// Create a shader module from SPIR-V bytes
    pub fn create_shader_module(&mut self, spirv: &[u8]) -> VulkanResult<ShaderModuleHandle> {
        let code = ash::util::read_spv(&mut std::io::Cursor::new(spirv)).map_err(|e| VulkanError::AssetLoad {
            path: "<memory>".to_string(),
            reason: e.to_string(),
        })?;
        let module = self.device.create_shader_module(&code)?;
        let handle = self.shader_modules.insert(ShaderModule(module));
        log::debug!("Created shader module {:?}: {} words", handle, code.len());
        Ok(handle)
    }

    /// Load a compiled shader from disk
    pub fn load_shader_module(&mut self, path: impl AsRef<Path>) -> VulkanResult<ShaderModuleHandle> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| VulkanError::AssetLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        self.create_shader_module(&bytes).map_err(|e| match e {
            VulkanError::AssetLoad { reason, .. } => VulkanError::AssetLoad {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Raw shader module
    pub fn shader_module(&self, handle: ShaderModuleHandle) -> VulkanResult<vk::ShaderModule> {
        lookup(&self.shader_modules, handle, ResourceKind::ShaderModule).map(|m| m.0)
    }

    /// Destroy a shader module
    pub fn destroy_shader_module(&mut self, handle: ShaderModuleHandle) -> VulkanResult<()> {
        untrack(&mut self.shader_modules, handle, ResourceKind::ShaderModule, self.device.as_ref())
    }

    /// Create a render-data table layout
    pub fn create_table_layout(&mut self, bindings: &[TableBinding]) -> VulkanResult<TableLayoutHandle> {
        let layout = self.device.create_descriptor_set_layout(bindings)?;
        let handle = self.table_layouts.insert(TableLayout(layout));
        log::debug!("Created render-data table layout {:?}: {} bindings", handle, bindings.len());
        Ok(handle)
    }

    /// Raw table layout
    pub fn table_layout(&self, handle: TableLayoutHandle) -> VulkanResult<vk::DescriptorSetLayout> {
        lookup(&self.table_layouts, handle, ResourceKind::TableLayout).map(|l| l.0)
    }

    /// Destroy a table layout
    pub fn destroy_table_layout(&mut self, handle: TableLayoutHandle) -> VulkanResult<()> {
        untrack(&mut self.table_layouts, handle, ResourceKind::TableLayout, self.device.as_ref())
    }

    /// Allocate a render-data table and write its bindings
    pub fn create_render_data_table(
        &mut self,
        layout: TableLayoutHandle,
        bindings: &[RenderDataTableBinding],
    ) -> VulkanResult<RenderDataTableHandle> {
        let raw_layout = self.table_layout(layout)?;
        let writes = self.resolve_bindings(bindings)?;
        let set = self.device.allocate_descriptor_set(self.descriptor_pool, raw_layout)?;
        self.device.update_descriptor_set(set, &writes);
        let handle = self.tables.insert(RenderDataTable {
            set,
            layout: raw_layout,
            pool: self.descriptor_pool,
        });
        log::debug!("Created render-data table {:?}: {} bindings", handle, bindings.len());
        Ok(handle)
    }

    /// Rewrite bindings of an existing table, e.g. after targets were recreated
    pub fn update_render_data_table(
        &mut self,
        handle: RenderDataTableHandle,
        bindings: &[RenderDataTableBinding],
    ) -> VulkanResult<()> {
        let set = self.render_data_table(handle)?;
        let writes = self.resolve_bindings(bindings)?;
        self.device.update_descriptor_set(set, &writes);
        Ok(())
    }

    /// Raw descriptor set of a table
    pub fn render_data_table(&self, handle: RenderDataTableHandle) -> VulkanResult<vk::DescriptorSet> {
        lookup(&self.tables, handle, ResourceKind::RenderDataTable).map(|t| t.set)
    }

    /// Return a table to the pool
    pub fn destroy_render_data_table(&mut self, handle: RenderDataTableHandle) -> VulkanResult<()> {
        untrack(&mut self.tables, handle, ResourceKind::RenderDataTable, self.device.as_ref())
    }

    fn resolve_bindings(&self, bindings: &[RenderDataTableBinding]) -> VulkanResult<Vec<DescriptorWrite>> {
        bindings
            .iter()
            .map(|binding| {
                Ok(match *binding {
                    RenderDataTableBinding::UniformBuffer { binding, buffer } => {
                        let buffer = self.buffer(buffer)?;
                        DescriptorWrite::UniformBuffer {
                            binding,
                            buffer: buffer.raw,
                            offset: 0,
                            range: buffer.size,
                        }
                    }
                    RenderDataTableBinding::StorageBuffer { binding, buffer } => {
                        let buffer = self.buffer(buffer)?;
                        DescriptorWrite::StorageBuffer {
                            binding,
                            buffer: buffer.raw,
                            offset: 0,
                            range: buffer.size,
                        }
                    }
                    RenderDataTableBinding::Texture {
                        binding,
                        texture,
                        sampler,
                    } => DescriptorWrite::CombinedImageSampler {
                        binding,
                        view: self.texture(texture)?.sampled_view,
                        sampler: self.sampler(sampler)?,
                        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    },
                    RenderDataTableBinding::CubeMap {
                        binding,
                        cube_map,
                        sampler,
                    } => DescriptorWrite::CombinedImageSampler {
                        binding,
                        view: self.cube_map(cube_map)?.sampled_view,
                        sampler: self.sampler(sampler)?,
                        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    },
                    RenderDataTableBinding::RenderTarget {
                        binding,
                        target,
                        sampler,
                    } => DescriptorWrite::CombinedImageSampler {
                        binding,
                        view: self.render_target(target)?.sampled_view,
                        sampler: self.sampler(sampler)?,
                        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    },
                    RenderDataTableBinding::DepthBuffer {
                        binding,
                        depth,
                        sampler,
                    } => DescriptorWrite::CombinedImageSampler {
                        binding,
                        view: self.depth_buffer(depth)?.sampled_view,
                        sampler: self.sampler(sampler)?,
                        layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                    },
                })
            })
            .collect()
    }

    /// Create a pipeline layout from table layouts in set order
    pub fn create_pipeline_layout(
        &mut self,
        tables: &[TableLayoutHandle],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<PipelineLayoutHandle> {
        let set_layouts = tables
            .iter()
            .map(|&table| self.table_layout(table))
            .collect::<VulkanResult<Vec<_>>>()?;
        let layout = self.device.create_pipeline_layout(&set_layouts, push_constant_ranges)?;
        let handle = self.pipeline_layouts.insert(PipelineLayout(layout));
        log::debug!(
            "Created pipeline layout {:?}: {} sets, {} push ranges",
            handle,
            set_layouts.len(),
            push_constant_ranges.len()
        );
        Ok(handle)
    }

    /// Raw pipeline layout
    pub fn pipeline_layout(&self, handle: PipelineLayoutHandle) -> VulkanResult<vk::PipelineLayout> {
        lookup(&self.pipeline_layouts, handle, ResourceKind::PipelineLayout).map(|l| l.0)
    }

    /// Destroy a pipeline layout
    pub fn destroy_pipeline_layout(&mut self, handle: PipelineLayoutHandle) -> VulkanResult<()> {
        untrack(&mut self.pipeline_layouts, handle, ResourceKind::PipelineLayout, self.device.as_ref())
    }

    /// Create a render pass
    pub fn create_render_pass(&mut self, desc: &RenderPassDesc) -> VulkanResult<RenderPassHandle> {
        let render_pass = self.device.create_render_pass(desc)?;
        let handle = self.render_passes.insert(RenderPass(render_pass));
        log::debug!("Created render pass {:?}: {} attachments", handle, desc.attachments.len());
        Ok(handle)
    }

    /// Raw render pass
    pub fn render_pass(&self, handle: RenderPassHandle) -> VulkanResult<vk::RenderPass> {
        lookup(&self.render_passes, handle, ResourceKind::RenderPass).map(|r| r.0)
    }

    /// Destroy a render pass
    pub fn destroy_render_pass(&mut self, handle: RenderPassHandle) -> VulkanResult<()> {
        untrack(&mut self.render_passes, handle, ResourceKind::RenderPass, self.device.as_ref())
    }

    /// Create a framebuffer; the render pass must already exist
    pub fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> VulkanResult<FramebufferHandle> {
        let framebuffer = self.device.create_framebuffer(desc)?;
        let handle = self.framebuffers.insert(Framebuffer(framebuffer));
        log::debug!(
            "Created framebuffer {:?}: {}x{}",
            handle,
            desc.extent.width,
            desc.extent.height
        );
        Ok(handle)
    }

    /// Raw framebuffer
    pub fn framebuffer(&self, handle: FramebufferHandle) -> VulkanResult<vk::Framebuffer> {
        lookup(&self.framebuffers, handle, ResourceKind::Framebuffer).map(|f| f.0)
    }

    /// Destroy a framebuffer
    pub fn destroy_framebuffer(&mut self, handle: FramebufferHandle) -> VulkanResult<()> {
        untrack(&mut self.framebuffers, handle, ResourceKind::Framebuffer, self.device.as_ref())
    }

    /// Create a graphics pipeline
    pub fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> VulkanResult<GraphicsPipelineHandle> {
        let pipeline = self.device.create_graphics_pipeline(desc)?;
        let handle = self.graphics_pipelines.insert(Pipeline(pipeline));
        log::debug!("Created graphics pipeline {:?}: {} stages", handle, desc.stages.len());
        Ok(handle)
    }

    /// Raw graphics pipeline
    pub fn graphics_pipeline(&self, handle: GraphicsPipelineHandle) -> VulkanResult<vk::Pipeline> {
        lookup(&self.graphics_pipelines, handle, ResourceKind::GraphicsPipeline).map(|p| p.0)
    }

    /// Destroy a graphics pipeline
    pub fn destroy_graphics_pipeline(&mut self, handle: GraphicsPipelineHandle) -> VulkanResult<()> {
        untrack(
            &mut self.graphics_pipelines,
            handle,
            ResourceKind::GraphicsPipeline,
            self.device.as_ref(),
        )
    }

    /// Create a compute pipeline
    pub fn create_compute_pipeline(
        &mut self,
        layout: PipelineLayoutHandle,
        shader: ShaderModuleHandle,
    ) -> VulkanResult<ComputePipelineHandle> {
        let pipeline = self
            .device
            .create_compute_pipeline(self.pipeline_layout(layout)?, self.shader_module(shader)?)?;
        let handle = self.compute_pipelines.insert(Pipeline(pipeline));
        log::debug!("Created compute pipeline {:?}", handle);
        Ok(handle)
    }

    /// Raw compute pipeline
    pub fn compute_pipeline(&self, handle: ComputePipelineHandle) -> VulkanResult<vk::Pipeline> {
        lookup(&self.compute_pipelines, handle, ResourceKind::ComputePipeline).map(|p| p.0)
    }

    /// Destroy a compute pipeline
    pub fn destroy_compute_pipeline(&mut self, handle: ComputePipelineHandle) -> VulkanResult<()> {
        untrack(
            &mut self.compute_pipelines,
            handle,
            ResourceKind::ComputePipeline,
            self.device.as_ref(),
        )
    }

    // === Synchronization and pools ===

    /// Create a fence
    pub fn create_fence(&mut self, signaled: bool) -> VulkanResult<FenceHandle> {
        let fence = self.device.create_fence(signaled)?;
        let handle = self.fences.insert(Fence(fence));
        log::debug!("Created fence {:?} (signaled: {})", handle, signaled);
        Ok(handle)
    }

    /// Raw fence
    pub fn fence(&self, handle: FenceHandle) -> VulkanResult<vk::Fence> {
        lookup(&self.fences, handle, ResourceKind::Fence).map(|f| f.0)
    }

    /// Destroy a fence
    pub fn destroy_fence(&mut self, handle: FenceHandle) -> VulkanResult<()> {
        untrack(&mut self.fences, handle, ResourceKind::Fence, self.device.as_ref())
    }

    /// Create a binary semaphore
    pub fn create_semaphore(&mut self) -> VulkanResult<SemaphoreHandle> {
        let semaphore = self.device.create_semaphore()?;
        let handle = self.semaphores.insert(Semaphore(semaphore));
        log::debug!("Created semaphore {:?}", handle);
        Ok(handle)
    }

    /// Raw semaphore
    pub fn semaphore(&self, handle: SemaphoreHandle) -> VulkanResult<vk::Semaphore> {
        lookup(&self.semaphores, handle, ResourceKind::Semaphore).map(|s| s.0)
    }

    /// Destroy a semaphore
    pub fn destroy_semaphore(&mut self, handle: SemaphoreHandle) -> VulkanResult<()> {
        untrack(&mut self.semaphores, handle, ResourceKind::Semaphore, self.device.as_ref())
    }

    /// Create an event
    pub fn create_event(&mut self) -> VulkanResult<EventHandle> {
        let event = self.device.create_event()?;
        let handle = self.events.insert(Event(event));
        log::debug!("Created event {:?}", handle);
        Ok(handle)
    }

    /// Raw event
    pub fn event(&self, handle: EventHandle) -> VulkanResult<vk::Event> {
        lookup(&self.events, handle, ResourceKind::Event).map(|e| e.0)
    }

    /// Destroy an event
    pub fn destroy_event(&mut self, handle: EventHandle) -> VulkanResult<()> {
        untrack(&mut self.events, handle, ResourceKind::Event, self.device.as_ref())
    }

    /// Create a query pool
    pub fn create_query_pool(&mut self, query_type: vk::QueryType, count: u32) -> VulkanResult<QueryPoolHandle> {
        let pool = self.device.create_query_pool(query_type, count)?;
        let handle = self.query_pools.insert(QueryPool(pool));
        log::debug!("Created query pool {:?}: {} {:?} queries", handle, count, query_type);
        Ok(handle)
    }

    /// Raw query pool
    pub fn query_pool(&self, handle: QueryPoolHandle) -> VulkanResult<vk::QueryPool> {
        lookup(&self.query_pools, handle, ResourceKind::QueryPool).map(|q| q.0)
    }

    /// Destroy a query pool
    pub fn destroy_query_pool(&mut self, handle: QueryPoolHandle) -> VulkanResult<()> {
        untrack(&mut self.query_pools, handle, ResourceKind::QueryPool, self.device.as_ref())
    }

    /// Create a command pool; its buffers are freed with it
    pub fn create_command_pool(
        &mut self,
        queue: QueueType,
        flags: vk::CommandPoolCreateFlags,
    ) -> VulkanResult<CommandPoolHandle> {
        let pool = self.device.create_command_pool(queue, flags)?;
        let handle = self.command_pools.insert(CommandPool(pool));
        log::debug!("Created command pool {:?} for {:?} queue", handle, queue);
        Ok(handle)
    }

    /// Raw command pool
    pub fn command_pool(&self, handle: CommandPoolHandle) -> VulkanResult<vk::CommandPool> {
        lookup(&self.command_pools, handle, ResourceKind::CommandPool).map(|p| p.0)
    }

    /// Destroy a command pool
    pub fn destroy_command_pool(&mut self, handle: CommandPoolHandle) -> VulkanResult<()> {
        untrack(&mut self.command_pools, handle, ResourceKind::CommandPool, self.device.as_ref())
    }

    // === Tracking ===

    /// Number of live resources of one kind
    pub fn tracked_count(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::Buffer => self.buffers.len(),
            ResourceKind::Texture => self.textures.len(),
            ResourceKind::CubeMap => self.cube_maps.len(),
            ResourceKind::DepthBuffer => self.depth_buffers.len(),
            ResourceKind::RenderTarget => self.render_targets.len(),
            ResourceKind::Sampler => self.samplers.len(),
            ResourceKind::ShaderModule => self.shader_modules.len(),
            ResourceKind::TableLayout => self.table_layouts.len(),
            ResourceKind::RenderDataTable => self.tables.len(),
            ResourceKind::PipelineLayout => self.pipeline_layouts.len(),
            ResourceKind::RenderPass => self.render_passes.len(),
            ResourceKind::Framebuffer => self.framebuffers.len(),
            ResourceKind::GraphicsPipeline => self.graphics_pipelines.len(),
            ResourceKind::ComputePipeline => self.compute_pipelines.len(),
            ResourceKind::Fence => self.fences.len(),
            ResourceKind::Semaphore => self.semaphores.len(),
            ResourceKind::Event => self.events.len(),
            ResourceKind::QueryPool => self.query_pools.len(),
            ResourceKind::CommandPool => self.command_pools.len(),
        }
    }

    /// Number of live resources across all kinds
    pub fn total_tracked(&self) -> usize {
        ResourceKind::RELEASE_ORDER
            .iter()
            .map(|&kind| self.tracked_count(kind))
            .sum()
    }

    /// Destroy every tracked resource, dependents first, then the factory's own pools.
    ///
    /// The caller must make sure the GPU no longer uses any of them.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        let total = self.total_tracked();
        for kind in ResourceKind::RELEASE_ORDER {
            self.release_kind(kind);
        }
        self.device.destroy_descriptor_pool(self.descriptor_pool);
        self.device.destroy_command_pool(self.upload_pool);
        self.released = true;
        log::info!("Resource factory released {} resources", total);
    }

    fn release_kind(&mut self, kind: ResourceKind) {
        let device = self.device.as_ref();
        match kind {
            ResourceKind::Buffer => drain_into(&mut self.buffers, device),
            ResourceKind::Texture => drain_into(&mut self.textures, device),
            ResourceKind::CubeMap => drain_into(&mut self.cube_maps, device),
            ResourceKind::DepthBuffer => drain_into(&mut self.depth_buffers, device),
            ResourceKind::RenderTarget => drain_into(&mut self.render_targets, device),
            ResourceKind::Sampler => drain_into(&mut self.samplers, device),
            ResourceKind::ShaderModule => drain_into(&mut self.shader_modules, device),
            ResourceKind::TableLayout => drain_into(&mut self.table_layouts, device),
            ResourceKind::RenderDataTable => drain_into(&mut self.tables, device),
            ResourceKind::PipelineLayout => drain_into(&mut self.pipeline_layouts, device),
            ResourceKind::RenderPass => drain_into(&mut self.render_passes, device),
            ResourceKind::Framebuffer => drain_into(&mut self.framebuffers, device),
            ResourceKind::GraphicsPipeline => drain_into(&mut self.graphics_pipelines, device),
            ResourceKind::ComputePipeline => drain_into(&mut self.compute_pipelines, device),
            ResourceKind::Fence => drain_into(&mut self.fences, device),
            ResourceKind::Semaphore => drain_into(&mut self.semaphores, device),
            ResourceKind::Event => drain_into(&mut self.events, device),
            ResourceKind::QueryPool => drain_into(&mut self.query_pools, device),
            ResourceKind::CommandPool => drain_into(&mut self.command_pools, device),
        }
    }

    // === Uploads ===

    fn create_staging(&self, data: &[u8]) -> VulkanResult<Buffer> {
        let device = self.device.as_ref();
        let staging = allocate_buffer(
            device,
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::HostVisible,
        )?;
        if let Err(e) = device.write_memory(staging.memory, 0, data) {
            staging.release(device);
            return Err(e);
        }
        Ok(staging)
    }

    fn upload<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&mut CommandBuffer) -> VulkanResult<()>,
    {
        submit_single_use(self.device.as_ref(), self.upload_pool, self.upload_queue, record)
    }
}

impl Drop for ResourceFactory {
    fn drop(&mut self) {
        if !self.released {
            log::warn!("Resource factory dropped without release, releasing now");
            self.release();
        }
    }
}

fn lookup<K: Key, T>(pool: &HandlePool<K, T>, handle: K, kind: ResourceKind) -> VulkanResult<&T> {
    pool.get(handle).ok_or_else(|| VulkanError::not_found(kind.name(), handle))
}

fn untrack<K: Key, T: GpuResource>(
    pool: &mut HandlePool<K, T>,
    handle: K,
    kind: ResourceKind,
    device: &dyn GpuDevice,
) -> VulkanResult<()> {
    let resource = pool
        .remove(handle)
        .ok_or_else(|| VulkanError::not_found(kind.name(), handle))?;
    resource.release(device);
    log::debug!("Destroyed {} {:?}", kind.name(), handle);
    Ok(())
}

fn drain_into<K: Key, T: GpuResource>(pool: &mut HandlePool<K, T>, device: &dyn GpuDevice) {
    for (_, resource) in pool.drain() {
        resource.release(device);
    }
}

fn allocate_buffer(
    device: &dyn GpuDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
) -> VulkanResult<Buffer> {
    let raw = device.create_buffer(size, usage)?;
    let requirements = device.buffer_memory_requirements(raw);
    let memory = match device.allocate_memory(requirements, location.properties()) {
        Ok(memory) => memory,
        Err(e) => {
            device.destroy_buffer(raw);
            return Err(e);
        }
    };
    let buffer = Buffer {
        raw,
        memory,
        size,
        location,
    };
    if let Err(e) = device.bind_buffer_memory(raw, memory) {
        buffer.release(device);
        return Err(e);
    }
    Ok(buffer)
}

fn allocate_image(
    device: &dyn GpuDevice,
    desc: &ImageDesc,
    view_type: vk::ImageViewType,
    aspect: vk::ImageAspectFlags,
) -> VulkanResult<Image> {
    let raw = device.create_image(desc)?;
    let requirements = device.image_memory_requirements(raw);
    let memory = match device.allocate_memory(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
        Ok(memory) => memory,
        Err(e) => {
            device.destroy_image(raw);
            return Err(e);
        }
    };
    let cleanup = |e: VulkanError| {
        device.destroy_image(raw);
        device.free_memory(memory);
        e
    };
    device.bind_image_memory(raw, memory).map_err(cleanup)?;
    let view = device
        .create_image_view(&ImageViewDesc {
            image: raw,
            view_type,
            format: desc.format,
            aspect,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
        })
        .map_err(cleanup)?;
    Ok(Image {
        raw,
        memory,
        view,
        sampled_view: view,
        extent: desc.extent,
        format: desc.format,
        mip_levels: desc.mip_levels,
        array_layers: desc.array_layers,
    })
}

/// `(offset, size, copy)` per layer and mip level, packed without padding
fn copy_regions(
    extent: vk::Extent2D,
    mip_levels: u32,
    array_layers: u32,
    texel_size: u32,
) -> Vec<(vk::DeviceSize, vk::DeviceSize, vk::BufferImageCopy)> {
    let mut regions = Vec::with_capacity((mip_levels * array_layers) as usize);
    let mut offset: vk::DeviceSize = 0;
    for layer in 0..array_layers {
        for mip in 0..mip_levels {
            let width = (extent.width >> mip).max(1);
            let height = (extent.height >> mip).max(1);
            let size = vk::DeviceSize::from(width) * vk::DeviceSize::from(height) * vk::DeviceSize::from(texel_size);
            let copy = vk::BufferImageCopy {
                buffer_offset: offset,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: mip,
                    base_array_layer: layer,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                },
            };
            regions.push((offset, size, copy));
            offset += size;
        }
    }
    regions
}

fn bytes_per_texel(format: vk::Format) -> Option<u32> {
    match format {
        vk::Format::R8_UNORM => Some(1),
        vk::Format::R8G8_UNORM => Some(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R32_SFLOAT => Some(4),
        vk::Format::R16G16B16A16_SFLOAT | vk::Format::R32G32_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::TextureMip;
    use crate::backend::{DeviceCall, HeadlessDevice, ObjectKind, RecordedCommand};
    use ash::vk::Handle;

    fn factory() -> (Arc<HeadlessDevice>, ResourceFactory) {
        let device = Arc::new(HeadlessDevice::new());
        let factory = ResourceFactory::new(device.clone()).unwrap();
        (device, factory)
    }

    fn upload_submits(device: &HeadlessDevice) -> Vec<vk::CommandBuffer> {
        device
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                DeviceCall::Submit {
                    queue: QueueType::Transfer,
                    command_buffers,
                    ..
                } => Some(command_buffers),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn create_then_destroy_leaves_tracking_unchanged() {
        let (_device, mut factory) = factory();
        let before = factory.total_tracked();

        let fence = factory.create_fence(true).unwrap();
        let semaphore = factory.create_semaphore().unwrap();
        let sampler = factory.create_sampler(&SamplerDesc::default()).unwrap();
        let target = factory
            .create_render_target(vk::Extent2D { width: 64, height: 64 }, vk::Format::R16G16B16A16_SFLOAT)
            .unwrap();
        assert_eq!(factory.total_tracked(), before + 4);

        factory.destroy_fence(fence).unwrap();
        factory.destroy_semaphore(semaphore).unwrap();
        factory.destroy_sampler(sampler).unwrap();
        factory.destroy_render_target(target).unwrap();
        assert_eq!(factory.total_tracked(), before);
    }

    #[test]
    fn stale_handles_are_not_found_and_not_aliased() {
        let (device, mut factory) = factory();
        let first = factory.create_semaphore().unwrap();
        factory.destroy_semaphore(first).unwrap();
        let second = factory.create_semaphore().unwrap();

        assert_ne!(first, second);
        assert!(matches!(
            factory.destroy_semaphore(first),
            Err(VulkanError::ResourceNotFound { kind: "semaphore", .. })
        ));
        assert!(factory.semaphore(first).is_err());
        assert!(factory.semaphore(second).is_ok());
        assert!(device.invalid_destroys().is_empty());
    }

    #[test]
    fn host_visible_buffer_is_written_directly() {
        let (device, mut factory) = factory();
        let handle = factory
            .create_buffer(&BufferDesc {
                size: 16,
                usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
                location: MemoryLocation::HostVisible,
                initial_data: Some(&[7; 16]),
            })
            .unwrap();
        let memory = factory.buffer(handle).unwrap().memory;
        assert_eq!(device.memory_contents(memory), Some(vec![7; 16]));
        assert!(upload_submits(&device).is_empty());

        factory.update_buffer(handle, 8, &[1; 8]).unwrap();
        let contents = device.memory_contents(memory).unwrap();
        assert_eq!(&contents[..8], &[7; 8]);
        assert_eq!(&contents[8..], &[1; 8]);
        assert!(factory.update_buffer(handle, 12, &[0; 8]).is_err());
    }

    #[test]
    fn device_local_buffer_goes_through_staging() {
        let (device, mut factory) = factory();
        let handle = factory
            .create_buffer(&BufferDesc {
                size: 64,
                usage: vk::BufferUsageFlags::VERTEX_BUFFER,
                location: MemoryLocation::DeviceLocal,
                initial_data: Some(&[3; 64]),
            })
            .unwrap();

        let submitted = upload_submits(&device);
        assert_eq!(submitted.len(), 1);
        let recorded = device.recorded(submitted[0]);
        let dst = factory.buffer(handle).unwrap().raw;
        assert!(matches!(recorded.as_slice(), [RecordedCommand::CopyBuffer { dst: d, .. }] if *d == dst));

        // Only the tracked buffer and its memory survive the upload
        assert_eq!(device.live_count(ObjectKind::Buffer), 1);
        assert_eq!(device.live_count(ObjectKind::Memory), 1);
    }

    #[test]
    fn texture_upload_transitions_copies_and_frees_staging() {
        let (device, mut factory) = factory();
        let asset = TextureAsset::new(
            "bark",
            vec![vec![
                TextureMip {
                    width: 4,
                    height: 4,
                    texels: vec![255; 64],
                },
                TextureMip {
                    width: 2,
                    height: 2,
                    texels: vec![128; 16],
                },
            ]],
        )
        .unwrap();
        let handle = factory.create_texture_from_asset(&asset).unwrap();
        let image = *factory.texture(handle).unwrap();
        assert_eq!(image.mip_levels, 2);

        let submitted = upload_submits(&device);
        assert_eq!(submitted.len(), 1);
        assert_eq!(
            device.recorded(submitted[0]),
            vec![
                RecordedCommand::PipelineBarrier {
                    image_transitions: vec![(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)],
                },
                RecordedCommand::CopyBufferToImage {
                    dst: image.raw,
                    regions: 2,
                },
                RecordedCommand::PipelineBarrier {
                    image_transitions: vec![(
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                    )],
                },
            ]
        );
        assert_eq!(device.live_count(ObjectKind::Buffer), 0);
        assert_eq!(device.live_count(ObjectKind::CommandBuffer), 0);
    }

    #[test]
    fn texture_with_wrong_byte_count_is_rejected() {
        let (device, mut factory) = factory();
        let result = factory.create_texture(&TextureDesc {
            name: "short",
            extent: vk::Extent2D { width: 4, height: 4 },
            format: vk::Format::R8G8B8A8_UNORM,
            mip_levels: 1,
            array_layers: 1,
            data: &[0; 10],
        });
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
        assert_eq!(device.live_count(ObjectKind::Image), 0);

        let cube = factory.create_cube_map(&TextureDesc {
            name: "sky",
            extent: vk::Extent2D { width: 1, height: 1 },
            format: vk::Format::R8G8B8A8_UNORM,
            mip_levels: 1,
            array_layers: 1,
            data: &[0; 4],
        });
        assert!(cube.is_err());
    }

    #[test]
    fn render_data_table_resolves_bindings() {
        let (device, mut factory) = factory();
        let layout = factory
            .create_table_layout(&[
                TableBinding {
                    binding: 0,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    count: 1,
                    stages: vk::ShaderStageFlags::ALL_GRAPHICS,
                },
                TableBinding {
                    binding: 1,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    count: 1,
                    stages: vk::ShaderStageFlags::FRAGMENT,
                },
            ])
            .unwrap();
        let buffer = factory
            .create_buffer(&BufferDesc {
                size: 128,
                usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
                location: MemoryLocation::HostVisible,
                initial_data: None,
            })
            .unwrap();
        let depth = factory
            .create_depth_buffer(vk::Extent2D { width: 32, height: 32 }, vk::Format::D32_SFLOAT_S8_UINT)
            .unwrap();
        let sampler = factory.create_sampler(&SamplerDesc::default()).unwrap();

        let table = factory
            .create_render_data_table(
                layout,
                &[
                    RenderDataTableBinding::UniformBuffer { binding: 0, buffer },
                    RenderDataTableBinding::DepthBuffer {
                        binding: 1,
                        depth,
                        sampler,
                    },
                ],
            )
            .unwrap();
        let set = factory.render_data_table(table).unwrap();
        let depth_image = *factory.depth_buffer(depth).unwrap();
        assert_ne!(depth_image.sampled_view, depth_image.view);

        let writes = device
            .calls()
            .into_iter()
            .find_map(|call| match call {
                DeviceCall::UpdateDescriptorSet { set: s, writes } if s == set.as_raw() => Some(writes),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            writes,
            vec![
                DescriptorWrite::UniformBuffer {
                    binding: 0,
                    buffer: factory.buffer(buffer).unwrap().raw,
                    offset: 0,
                    range: 128,
                },
                DescriptorWrite::CombinedImageSampler {
                    binding: 1,
                    view: depth_image.sampled_view,
                    sampler: factory.sampler(sampler).unwrap(),
                    layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
                },
            ]
        );

        factory.destroy_buffer(buffer).unwrap();
        assert!(factory
            .update_render_data_table(table, &[RenderDataTableBinding::UniformBuffer { binding: 0, buffer }])
            .is_err());
    }

    #[test]
    fn invalid_spirv_is_an_asset_error() {
        let (_device, mut factory) = factory();
        assert!(matches!(
            factory.create_shader_module(&[1, 2, 3]),
            Err(VulkanError::AssetLoad { .. })
        ));
        let words: Vec<u8> = [0x0723_0203_u32, 0x0001_0000].iter().flat_map(|w| w.to_le_bytes()).collect();
        assert!(factory.create_shader_module(&words).is_ok());
    }

    #[test]
    fn release_destroys_everything_in_dependency_order() {
        let (device, mut factory) = factory();
        let render_pass = factory
            .create_render_pass(&RenderPassDesc {
                attachments: vec![vk::AttachmentDescription::default()],
                ..RenderPassDesc::default()
            })
            .unwrap();
        let raw_pass = factory.render_pass(render_pass).unwrap();
        factory
            .create_framebuffer(&FramebufferDesc {
                render_pass: raw_pass,
                attachments: Vec::new(),
                extent: vk::Extent2D { width: 8, height: 8 },
            })
            .unwrap();
        factory.create_fence(false).unwrap();
        factory
            .create_command_pool(QueueType::Graphics, vk::CommandPoolCreateFlags::empty())
            .unwrap();
        factory.create_query_pool(vk::QueryType::TIMESTAMP, 4).unwrap();
        factory.create_event().unwrap();

        device.clear_calls();
        factory.release();
        assert_eq!(factory.total_tracked(), 0);
        assert_eq!(device.live_object_count(), 0);
        assert!(device.invalid_destroys().is_empty());

        let destroyed: Vec<ObjectKind> = device
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                DeviceCall::Destroyed(kind, _) => Some(kind),
                _ => None,
            })
            .collect();
        let position = |kind| destroyed.iter().position(|&k| k == kind).unwrap();
        assert!(position(ObjectKind::Framebuffer) < position(ObjectKind::RenderPass));
        assert!(position(ObjectKind::Fence) < position(ObjectKind::DescriptorPool));

        // Idempotent
        factory.release();
        assert!(device.invalid_destroys().is_empty());
    }
}
