//! Command buffer state machine
//!
//! [`CommandBuffer`] wraps one allocated buffer and enforces
//! Initial → Recording → Executable → Submitted → Initial. Violations return
//! [`VulkanError::InvalidOperation`] and never reach the device.

use ash::vk;
use bytemuck::Pod;

use crate::backend::{GpuDevice, InheritanceInfo, VulkanError, VulkanResult};
use crate::commands::Command;

/// Lifecycle state of a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    /// Allocated or reset, ready to begin
    Initial,
    /// Between begin and end
    Recording,
    /// Ended, ready to submit or execute
    Executable,
    /// Handed to a queue, or executed from a primary
    Submitted,
}

/// Value [`CommandBuffer::clear_image`] writes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageClear {
    /// RGBA color
    Color([f32; 4]),
    /// Depth and stencil
    DepthStencil {
        /// Depth value
        depth: f32,
        /// Stencil value
        stencil: u32,
    },
}

/// Render pass scope of the recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassScope {
    Outside,
    /// Begun by this buffer
    Owned { render_pass: vk::RenderPass, subpass: u32, contents: vk::SubpassContents },
    /// Inherited from the parent primary
    Inherited { render_pass: vk::RenderPass, subpass: u32 },
}

/// Command buffer with an explicit recording state
#[derive(Debug)]
pub struct CommandBuffer {
    raw: vk::CommandBuffer,
    pool: vk::CommandPool,
    level: vk::CommandBufferLevel,
    state: CommandBufferState,
    scope: PassScope,
    inheritance: Option<InheritanceInfo>,
}

impl CommandBuffer {
    /// Allocate one command buffer from `pool` at `level`
    pub fn allocate(
        device: &dyn GpuDevice,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
    ) -> VulkanResult<Self> {
        let raw = device
            .allocate_command_buffers(pool, level, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("no command buffer allocated".to_string()))?;
        Ok(Self {
            raw,
            pool,
            level,
            state: CommandBufferState::Initial,
            scope: PassScope::Outside,
            inheritance: None,
        })
    }

    /// Return the buffer to its pool
    pub fn free(self, device: &dyn GpuDevice) {
        device.free_command_buffers(self.pool, &[self.raw]);
    }

    /// Raw handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.raw
    }

    /// Allocation level
    pub fn level(&self) -> vk::CommandBufferLevel {
        self.level
    }

    /// Current state
    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Inheritance context of the last secondary begin
    pub fn inheritance(&self) -> Option<InheritanceInfo> {
        self.inheritance
    }

    /// Begin a primary buffer
    pub fn begin_primary(&mut self, device: &dyn GpuDevice, usage: vk::CommandBufferUsageFlags) -> VulkanResult<()> {
        if self.level != vk::CommandBufferLevel::PRIMARY {
            return Err(VulkanError::invalid("begin_primary on a secondary command buffer"));
        }
        self.expect_state(CommandBufferState::Initial, "begin")?;
        device.begin_command_buffer(self.raw, usage, None)?;
        self.state = CommandBufferState::Recording;
        self.scope = PassScope::Outside;
        self.inheritance = None;
        Ok(())
    }

    /// Begin a secondary buffer that continues `inheritance.render_pass`
    pub fn begin_secondary(
        &mut self,
        device: &dyn GpuDevice,
        usage: vk::CommandBufferUsageFlags,
        inheritance: InheritanceInfo,
    ) -> VulkanResult<()> {
        if self.level != vk::CommandBufferLevel::SECONDARY {
            return Err(VulkanError::invalid("begin_secondary on a primary command buffer"));
        }
        self.expect_state(CommandBufferState::Initial, "begin")?;
        device.begin_command_buffer(self.raw, usage, Some(&inheritance))?;
        self.state = CommandBufferState::Recording;
        self.scope = if usage.contains(vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE) {
            PassScope::Inherited {
                render_pass: inheritance.render_pass,
                subpass: inheritance.subpass,
            }
        } else {
            PassScope::Outside
        };
        self.inheritance = Some(inheritance);
        Ok(())
    }

    /// Finish recording
    pub fn end(&mut self, device: &dyn GpuDevice) -> VulkanResult<()> {
        self.expect_state(CommandBufferState::Recording, "end")?;
        if matches!(self.scope, PassScope::Owned { .. }) {
            return Err(VulkanError::invalid("end called inside an open render pass"));
        }
        device.end_command_buffer(self.raw)?;
        self.state = CommandBufferState::Executable;
        self.scope = PassScope::Outside;
        Ok(())
    }

    /// Return to the initial state for reuse
    pub fn reset(&mut self, device: &dyn GpuDevice) -> VulkanResult<()> {
        match self.state {
            CommandBufferState::Initial => Ok(()),
            CommandBufferState::Recording => Err(VulkanError::invalid("reset while recording")),
            CommandBufferState::Executable | CommandBufferState::Submitted => {
                device.reset_command_buffer(self.raw)?;
                self.state = CommandBufferState::Initial;
                self.scope = PassScope::Outside;
                Ok(())
            }
        }
    }

    /// Record that the buffer was handed to a queue or a primary
    pub fn mark_submitted(&mut self) -> VulkanResult<()> {
        self.expect_state(CommandBufferState::Executable, "submit")?;
        self.state = CommandBufferState::Submitted;
        Ok(())
    }

    /// Record a raw command, validating state and render pass scope
    pub fn record(&mut self, device: &dyn GpuDevice, command: Command<'_>) -> VulkanResult<()> {
        self.expect_state(CommandBufferState::Recording, "record")?;
        let inside = !matches!(self.scope, PassScope::Outside);
        if command.requires_render_pass() && !inside {
            return Err(VulkanError::invalid(format!("{command:?} outside a render pass")));
        }
        if command.forbidden_in_render_pass() && inside {
            return Err(VulkanError::invalid(format!("{command:?} inside a render pass")));
        }

        match command {
            Command::BeginRenderPass { render_pass, contents, .. } => {
                self.scope = PassScope::Owned {
                    render_pass,
                    subpass: 0,
                    contents,
                };
            }
            Command::NextSubpass { contents } => match &mut self.scope {
                PassScope::Owned {
                    subpass,
                    contents: current,
                    ..
                } => {
                    *subpass += 1;
                    *current = contents;
                }
                _ => return Err(VulkanError::invalid("next_subpass in an inherited render pass")),
            },
            Command::EndRenderPass => {
                if !matches!(self.scope, PassScope::Owned { .. }) {
                    return Err(VulkanError::invalid("end_render_pass in an inherited render pass"));
                }
                self.scope = PassScope::Outside;
            }
            Command::Draw { .. } | Command::DrawIndexed { .. } => {
                if matches!(
                    self.scope,
                    PassScope::Owned {
                        contents: vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
                        ..
                    }
                ) {
                    return Err(VulkanError::invalid("draw inline in a subpass reserved for secondaries"));
                }
            }
            _ => {}
        }

        device.record(self.raw, &command);
        Ok(())
    }

    // === Typed recording helpers ===

    /// Begin a render pass
    pub fn begin_render_pass(
        &mut self,
        device: &dyn GpuDevice,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
        contents: vk::SubpassContents,
    ) -> VulkanResult<()> {
        self.record(
            device,
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                render_area,
                clear_values,
                contents,
            },
        )
    }

    /// Advance to the next subpass
    pub fn next_subpass(&mut self, device: &dyn GpuDevice, contents: vk::SubpassContents) -> VulkanResult<()> {
        self.record(device, Command::NextSubpass { contents })
    }

    /// End the current render pass
    pub fn end_render_pass(&mut self, device: &dyn GpuDevice) -> VulkanResult<()> {
        self.record(device, Command::EndRenderPass)
    }

    /// Bind a graphics pipeline
    pub fn bind_graphics_pipeline(&mut self, device: &dyn GpuDevice, pipeline: vk::Pipeline) -> VulkanResult<()> {
        self.record(
            device,
            Command::BindPipeline {
                bind_point: vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            },
        )
    }

    /// Bind a compute pipeline
    pub fn bind_compute_pipeline(&mut self, device: &dyn GpuDevice, pipeline: vk::Pipeline) -> VulkanResult<()> {
        self.record(
            device,
            Command::BindPipeline {
                bind_point: vk::PipelineBindPoint::COMPUTE,
                pipeline,
            },
        )
    }

    /// Bind render-data tables for graphics
    pub fn bind_tables(
        &mut self,
        device: &dyn GpuDevice,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) -> VulkanResult<()> {
        self.record(
            device,
            Command::BindDescriptorSets {
                bind_point: vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                sets,
            },
        )
    }

    /// Bind vertex/instance buffers
    pub fn bind_vertex_buffers(
        &mut self,
        device: &dyn GpuDevice,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) -> VulkanResult<()> {
        if buffers.len() != offsets.len() {
            return Err(VulkanError::invalid("vertex buffer and offset counts differ"));
        }
        self.record(
            device,
            Command::BindVertexBuffers {
                first_binding,
                buffers,
                offsets,
            },
        )
    }

    /// Bind a 32-bit index buffer
    pub fn bind_index_buffer(
        &mut self,
        device: &dyn GpuDevice,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) -> VulkanResult<()> {
        self.record(
            device,
            Command::BindIndexBuffer {
                buffer,
                offset,
                index_type: vk::IndexType::UINT32,
            },
        )
    }

    /// Push a plain-data block at offset 0
    pub fn push_constants<T: Pod>(
        &mut self,
        device: &dyn GpuDevice,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        value: &T,
    ) -> VulkanResult<()> {
        self.record(
            device,
            Command::PushConstants {
                layout,
                stages,
                offset: 0,
                data: bytemuck::bytes_of(value),
            },
        )
    }

    /// Set viewport and scissor to cover `extent`
    pub fn set_viewport_and_scissor(&mut self, device: &dyn GpuDevice, extent: vk::Extent2D) -> VulkanResult<()> {
        self.record(
            device,
            Command::SetViewport(vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            }),
        )?;
        self.record(
            device,
            Command::SetScissor(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            }),
        )
    }

    /// Non-indexed draw
    pub fn draw(&mut self, device: &dyn GpuDevice, vertex_count: u32, instance_count: u32) -> VulkanResult<()> {
        self.record(
            device,
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex: 0,
                first_instance: 0,
            },
        )
    }

    /// Indexed draw
    pub fn draw_indexed(
        &mut self,
        device: &dyn GpuDevice,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) -> VulkanResult<()> {
        self.record(
            device,
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance: 0,
            },
        )
    }

    /// Compute dispatch
    pub fn dispatch(&mut self, device: &dyn GpuDevice, x: u32, y: u32, z: u32) -> VulkanResult<()> {
        self.record(device, Command::Dispatch { x, y, z })
    }

    /// Copy whole `size` bytes between buffers
    pub fn copy_buffer(
        &mut self,
        device: &dyn GpuDevice,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) -> VulkanResult<()> {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        self.record(
            device,
            Command::CopyBuffer {
                src,
                dst,
                regions: &[region],
            },
        )
    }

    /// Copy buffer regions into an image in `TRANSFER_DST_OPTIMAL`
    pub fn copy_buffer_to_image(
        &mut self,
        device: &dyn GpuDevice,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    ) -> VulkanResult<()> {
        self.record(
            device,
            Command::CopyBufferToImage {
                src,
                dst,
                layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            },
        )
    }

    /// Blit the full extent of mip 0 from `src` to `dst`
    pub fn blit_image(
        &mut self,
        device: &dyn GpuDevice,
        src: vk::Image,
        src_extent: vk::Extent2D,
        dst: vk::Image,
        dst_extent: vk::Extent2D,
    ) -> VulkanResult<()> {
        let layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let corner = |extent: vk::Extent2D| vk::Offset3D {
            x: i32::try_from(extent.width).unwrap_or(i32::MAX),
            y: i32::try_from(extent.height).unwrap_or(i32::MAX),
            z: 1,
        };
        let region = vk::ImageBlit {
            src_subresource: layers,
            src_offsets: [vk::Offset3D::default(), corner(src_extent)],
            dst_subresource: layers,
            dst_offsets: [vk::Offset3D::default(), corner(dst_extent)],
        };
        self.record(
            device,
            Command::BlitImage {
                src,
                src_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                dst_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions: &[region],
                filter: vk::Filter::LINEAR,
            },
        )
    }

    /// Transition every mip level and layer of a color or depth image
    pub fn transition_image(
        &mut self,
        device: &dyn GpuDevice,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        mip_levels: u32,
        array_layers: u32,
    ) -> VulkanResult<()> {
        let (src_access, src_stage) = layout_access(old_layout);
        let (dst_access, dst_stage) = layout_access(new_layout);
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: array_layers,
            })
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();
        self.record(
            device,
            Command::PipelineBarrier {
                src_stage,
                dst_stage,
                memory_barriers: &[],
                image_barriers: &[barrier],
            },
        )
    }

    /// Clear the first mip level and layer of an image outside a render pass.
    ///
    /// Moves the image from `old_layout` to transfer destination, clears it and
    /// leaves it in `final_layout`.
    pub fn clear_image(
        &mut self,
        device: &dyn GpuDevice,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        final_layout: vk::ImageLayout,
        value: ImageClear,
    ) -> VulkanResult<()> {
        let transfer = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        self.transition_image(device, image, aspect, old_layout, transfer, 1, 1)?;
        let ranges = [vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }];
        let command = match value {
            ImageClear::Color(float32) => Command::ClearColorImage {
                image,
                layout: transfer,
                color: vk::ClearColorValue { float32 },
                ranges: &ranges,
            },
            ImageClear::DepthStencil { depth, stencil } => Command::ClearDepthStencilImage {
                image,
                layout: transfer,
                value: vk::ClearDepthStencilValue { depth, stencil },
                ranges: &ranges,
            },
        };
        self.record(device, command)?;
        self.transition_image(device, image, aspect, transfer, final_layout, 1, 1)
    }

    /// Execute secondaries inside the current render pass.
    ///
    /// Each secondary must be executable and must have been begun for the same
    /// render pass and subpass.
    pub fn execute_secondaries(&mut self, device: &dyn GpuDevice, secondaries: &mut [&mut CommandBuffer]) -> VulkanResult<()> {
        let PassScope::Owned {
            render_pass,
            subpass,
            contents,
        } = self.scope
        else {
            return Err(VulkanError::invalid("execute_secondaries outside a render pass"));
        };
        if contents != vk::SubpassContents::SECONDARY_COMMAND_BUFFERS {
            return Err(VulkanError::invalid("subpass was begun with inline contents"));
        }
        for secondary in secondaries.iter() {
            if secondary.state != CommandBufferState::Executable {
                return Err(VulkanError::invalid(format!(
                    "secondary {:?} is {:?}",
                    secondary.raw, secondary.state
                )));
            }
            match secondary.inheritance {
                Some(info) if info.render_pass == render_pass && info.subpass == subpass => {}
                _ => {
                    return Err(VulkanError::invalid(format!(
                        "secondary {:?} was recorded for a different render pass",
                        secondary.raw
                    )))
                }
            }
        }

        let raws: Vec<vk::CommandBuffer> = secondaries.iter().map(|s| s.raw).collect();
        self.record(device, Command::ExecuteCommands { command_buffers: &raws })?;
        for secondary in secondaries.iter_mut() {
            secondary.state = CommandBufferState::Submitted;
        }
        Ok(())
    }

    /// Write a timestamp after `stage`
    pub fn write_timestamp(
        &mut self,
        device: &dyn GpuDevice,
        stage: vk::PipelineStageFlags,
        pool: vk::QueryPool,
        query: u32,
    ) -> VulkanResult<()> {
        self.record(device, Command::WriteTimestamp { stage, pool, query })
    }

    fn expect_state(&self, expected: CommandBufferState, operation: &str) -> VulkanResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(VulkanError::invalid(format!(
                "{operation} requires {expected:?}, command buffer is {:?}",
                self.state
            )))
        }
    }
}

/// Access mask and pipeline stage touching an image in `layout`
fn layout_access(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER)
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => (
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (vk::AccessFlags::empty(), vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessDevice, QueueType, RecordedCommand};
    use ash::vk::Handle;

    fn pool(device: &HeadlessDevice) -> vk::CommandPool {
        device
            .create_command_pool(QueueType::Graphics, vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .unwrap()
    }

    #[test]
    fn begin_end_reset_cycle() {
        let device = HeadlessDevice::new();
        let mut cb = CommandBuffer::allocate(&device, pool(&device), vk::CommandBufferLevel::PRIMARY).unwrap();
        assert_eq!(cb.state(), CommandBufferState::Initial);

        cb.begin_primary(&device, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT).unwrap();
        assert_eq!(cb.state(), CommandBufferState::Recording);
        cb.end(&device).unwrap();
        assert_eq!(cb.state(), CommandBufferState::Executable);
        cb.mark_submitted().unwrap();
        cb.reset(&device).unwrap();
        assert_eq!(cb.state(), CommandBufferState::Initial);
    }

    #[test]
    fn end_without_begin_is_rejected() {
        let device = HeadlessDevice::new();
        let mut cb = CommandBuffer::allocate(&device, pool(&device), vk::CommandBufferLevel::PRIMARY).unwrap();
        assert!(matches!(cb.end(&device), Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn double_begin_is_rejected() {
        let device = HeadlessDevice::new();
        let mut cb = CommandBuffer::allocate(&device, pool(&device), vk::CommandBufferLevel::PRIMARY).unwrap();
        cb.begin_primary(&device, vk::CommandBufferUsageFlags::empty()).unwrap();
        let err = cb.begin_primary(&device, vk::CommandBufferUsageFlags::empty()).unwrap_err();
        assert!(matches!(err, VulkanError::InvalidOperation { .. }));
        assert_eq!(cb.state(), CommandBufferState::Recording);
    }

    #[test]
    fn recording_outside_bracket_is_rejected() {
        let device = HeadlessDevice::new();
        let mut cb = CommandBuffer::allocate(&device, pool(&device), vk::CommandBufferLevel::PRIMARY).unwrap();
        assert!(cb.dispatch(&device, 1, 1, 1).is_err());
        assert!(device.recorded(cb.handle()).is_empty());
    }

    #[test]
    fn draw_requires_render_pass() {
        let device = HeadlessDevice::new();
        let mut cb = CommandBuffer::allocate(&device, pool(&device), vk::CommandBufferLevel::PRIMARY).unwrap();
        cb.begin_primary(&device, vk::CommandBufferUsageFlags::empty()).unwrap();
        assert!(cb.draw(&device, 3, 1).is_err());

        let render_pass = vk::RenderPass::from_raw(900);
        let area = vk::Rect2D::default();
        cb.begin_render_pass(&device, render_pass, vk::Framebuffer::from_raw(901), area, &[], vk::SubpassContents::INLINE)
            .unwrap();
        cb.draw(&device, 3, 1).unwrap();
        assert!(cb.end(&device).is_err());
        cb.end_render_pass(&device).unwrap();
        cb.end(&device).unwrap();

        let recorded = device.recorded(cb.handle());
        assert_eq!(recorded.len(), 3);
        assert_eq!(
            recorded[1],
            RecordedCommand::Draw {
                vertex_count: 3,
                instance_count: 1
            }
        );
    }

    #[test]
    fn secondaries_must_match_render_pass() {
        let device = HeadlessDevice::new();
        let pool = pool(&device);
        let render_pass = vk::RenderPass::from_raw(900);
        let other_pass = vk::RenderPass::from_raw(902);
        let framebuffer = vk::Framebuffer::from_raw(901);

        let mut good = CommandBuffer::allocate(&device, pool, vk::CommandBufferLevel::SECONDARY).unwrap();
        let mut bad = CommandBuffer::allocate(&device, pool, vk::CommandBufferLevel::SECONDARY).unwrap();
        for (cb, pass) in [(&mut good, render_pass), (&mut bad, other_pass)] {
            cb.begin_secondary(
                &device,
                vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE,
                InheritanceInfo {
                    render_pass: pass,
                    subpass: 0,
                    framebuffer,
                },
            )
            .unwrap();
            cb.draw(&device, 3, 1).unwrap();
            cb.end(&device).unwrap();
        }

        let mut primary = CommandBuffer::allocate(&device, pool, vk::CommandBufferLevel::PRIMARY).unwrap();
        primary.begin_primary(&device, vk::CommandBufferUsageFlags::empty()).unwrap();
        primary
            .begin_render_pass(
                &device,
                render_pass,
                framebuffer,
                vk::Rect2D::default(),
                &[],
                vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
            )
            .unwrap();
        assert!(primary.execute_secondaries(&device, &mut [&mut bad]).is_err());
        primary.execute_secondaries(&device, &mut [&mut good]).unwrap();
        assert_eq!(good.state(), CommandBufferState::Submitted);
        assert!(primary.draw(&device, 3, 1).is_err());
        primary.end_render_pass(&device).unwrap();
        primary.end(&device).unwrap();
    }

    #[test]
    fn clear_image_is_bracketed_by_transfer_transitions() {
        let device = HeadlessDevice::new();
        let image = vk::Image::from_raw(78);
        let mut cb = CommandBuffer::allocate(&device, pool(&device), vk::CommandBufferLevel::PRIMARY).unwrap();
        cb.begin_primary(&device, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT).unwrap();
        cb.clear_image(
            &device,
            image,
            vk::ImageAspectFlags::DEPTH,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            ImageClear::DepthStencil { depth: 1.0, stencil: 0 },
        )
        .unwrap();
        let transfer = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        let resting = vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL;
        assert_eq!(
            device.recorded(cb.handle()),
            vec![
                RecordedCommand::PipelineBarrier {
                    image_transitions: vec![(resting, transfer)]
                },
                RecordedCommand::ClearDepthStencilImage(image),
                RecordedCommand::PipelineBarrier {
                    image_transitions: vec![(transfer, resting)]
                },
            ]
        );
    }

    #[test]
    fn transition_records_layouts() {
        let device = HeadlessDevice::new();
        let mut cb = CommandBuffer::allocate(&device, pool(&device), vk::CommandBufferLevel::PRIMARY).unwrap();
        cb.begin_primary(&device, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT).unwrap();
        cb.transition_image(
            &device,
            vk::Image::from_raw(77),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            1,
            1,
        )
        .unwrap();
        assert_eq!(
            device.recorded(cb.handle()),
            vec![RecordedCommand::PipelineBarrier {
                image_transitions: vec![(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)]
            }]
        );
    }
}
