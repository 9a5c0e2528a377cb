//! Recordable command vocabulary

use std::fmt;

use ash::vk;

/// One recordable command.
///
/// Every variant maps to exactly one `vkCmd*` call. Slices borrow from the
/// caller for the duration of the `record` call only.
#[derive(Clone, Copy)]
pub enum Command<'a> {
    /// Begin a render pass
    BeginRenderPass {
        /// Render pass
        render_pass: vk::RenderPass,
        /// Framebuffer
        framebuffer: vk::Framebuffer,
        /// Render area
        render_area: vk::Rect2D,
        /// Clear values in attachment order
        clear_values: &'a [vk::ClearValue],
        /// Inline commands or secondary command buffers
        contents: vk::SubpassContents,
    },
    /// Advance to the next subpass
    NextSubpass {
        /// Contents of the next subpass
        contents: vk::SubpassContents,
    },
    /// End the current render pass
    EndRenderPass,
    /// Bind a pipeline
    BindPipeline {
        /// Graphics, compute or ray tracing
        bind_point: vk::PipelineBindPoint,
        /// Pipeline
        pipeline: vk::Pipeline,
    },
    /// Bind render-data tables
    BindDescriptorSets {
        /// Bind point
        bind_point: vk::PipelineBindPoint,
        /// Layout compatible with the sets
        layout: vk::PipelineLayout,
        /// Index of the first set
        first_set: u32,
        /// Sets to bind
        sets: &'a [vk::DescriptorSet],
    },
    /// Bind vertex or instance buffers
    BindVertexBuffers {
        /// First binding slot
        first_binding: u32,
        /// Buffers
        buffers: &'a [vk::Buffer],
        /// Byte offset per buffer
        offsets: &'a [vk::DeviceSize],
    },
    /// Bind an index buffer
    BindIndexBuffer {
        /// Buffer
        buffer: vk::Buffer,
        /// Byte offset
        offset: vk::DeviceSize,
        /// Index width
        index_type: vk::IndexType,
    },
    /// Update push constants
    PushConstants {
        /// Pipeline layout declaring the range
        layout: vk::PipelineLayout,
        /// Stages that read the range
        stages: vk::ShaderStageFlags,
        /// Byte offset into the range
        offset: u32,
        /// Bytes to push
        data: &'a [u8],
    },
    /// Set the dynamic viewport
    SetViewport(vk::Viewport),
    /// Set the dynamic scissor
    SetScissor(vk::Rect2D),
    /// Non-indexed draw
    Draw {
        /// Vertices per instance
        vertex_count: u32,
        /// Instances
        instance_count: u32,
        /// First vertex
        first_vertex: u32,
        /// First instance
        first_instance: u32,
    },
    /// Indexed draw
    DrawIndexed {
        /// Indices per instance
        index_count: u32,
        /// Instances
        instance_count: u32,
        /// First index
        first_index: u32,
        /// Added to each index
        vertex_offset: i32,
        /// First instance
        first_instance: u32,
    },
    /// Compute dispatch
    Dispatch {
        /// Groups in x
        x: u32,
        /// Groups in y
        y: u32,
        /// Groups in z
        z: u32,
    },
    /// Ray tracing dispatch
    TraceRays {
        /// Ray generation shader binding table region
        raygen: vk::StridedDeviceAddressRegionKHR,
        /// Miss region
        miss: vk::StridedDeviceAddressRegionKHR,
        /// Hit group region
        hit: vk::StridedDeviceAddressRegionKHR,
        /// Callable region
        callable: vk::StridedDeviceAddressRegionKHR,
        /// Launch width
        width: u32,
        /// Launch height
        height: u32,
        /// Launch depth
        depth: u32,
    },
    /// Build acceleration structures
    BuildAccelerationStructures {
        /// Geometry build descriptions
        infos: &'a [vk::AccelerationStructureBuildGeometryInfoKHR],
        /// Build ranges, one slice per info
        ranges: &'a [&'a [vk::AccelerationStructureBuildRangeInfoKHR]],
    },
    /// Buffer to buffer copy
    CopyBuffer {
        /// Source
        src: vk::Buffer,
        /// Destination
        dst: vk::Buffer,
        /// Regions
        regions: &'a [vk::BufferCopy],
    },
    /// Buffer to image copy
    CopyBufferToImage {
        /// Source buffer
        src: vk::Buffer,
        /// Destination image
        dst: vk::Image,
        /// Current layout of the destination
        layout: vk::ImageLayout,
        /// Regions
        regions: &'a [vk::BufferImageCopy],
    },
    /// Image to image copy
    CopyImage {
        /// Source image
        src: vk::Image,
        /// Source layout
        src_layout: vk::ImageLayout,
        /// Destination image
        dst: vk::Image,
        /// Destination layout
        dst_layout: vk::ImageLayout,
        /// Regions
        regions: &'a [vk::ImageCopy],
    },
    /// Scaled image copy
    BlitImage {
        /// Source image
        src: vk::Image,
        /// Source layout
        src_layout: vk::ImageLayout,
        /// Destination image
        dst: vk::Image,
        /// Destination layout
        dst_layout: vk::ImageLayout,
        /// Regions
        regions: &'a [vk::ImageBlit],
        /// Filter
        filter: vk::Filter,
    },
    /// Clear a color image outside a render pass
    ClearColorImage {
        /// Image
        image: vk::Image,
        /// Current layout, `TRANSFER_DST_OPTIMAL` or `GENERAL`
        layout: vk::ImageLayout,
        /// Clear color
        color: vk::ClearColorValue,
        /// Subresources to clear
        ranges: &'a [vk::ImageSubresourceRange],
    },
    /// Clear a depth/stencil image outside a render pass
    ClearDepthStencilImage {
        /// Image
        image: vk::Image,
        /// Current layout, `TRANSFER_DST_OPTIMAL` or `GENERAL`
        layout: vk::ImageLayout,
        /// Clear depth and stencil
        value: vk::ClearDepthStencilValue,
        /// Subresources to clear
        ranges: &'a [vk::ImageSubresourceRange],
    },
    /// Pipeline barrier
    PipelineBarrier {
        /// Source stages
        src_stage: vk::PipelineStageFlags,
        /// Destination stages
        dst_stage: vk::PipelineStageFlags,
        /// Global memory barriers
        memory_barriers: &'a [vk::MemoryBarrier],
        /// Image barriers
        image_barriers: &'a [vk::ImageMemoryBarrier],
    },
    /// Signal an event
    SetEvent {
        /// Event
        event: vk::Event,
        /// Stage at which it signals
        stage: vk::PipelineStageFlags,
    },
    /// Unsignal an event
    ResetEvent {
        /// Event
        event: vk::Event,
        /// Stage at which it resets
        stage: vk::PipelineStageFlags,
    },
    /// Wait for events
    WaitEvents {
        /// Events
        events: &'a [vk::Event],
        /// Source stages
        src_stage: vk::PipelineStageFlags,
        /// Destination stages
        dst_stage: vk::PipelineStageFlags,
    },
    /// Execute secondary command buffers
    ExecuteCommands {
        /// Secondary buffers in execution order
        command_buffers: &'a [vk::CommandBuffer],
    },
    /// Write a timestamp query
    WriteTimestamp {
        /// Stage after which the timestamp is taken
        stage: vk::PipelineStageFlags,
        /// Query pool
        pool: vk::QueryPool,
        /// Query index
        query: u32,
    },
    /// Reset queries before reuse
    ResetQueryPool {
        /// Query pool
        pool: vk::QueryPool,
        /// First query
        first_query: u32,
        /// Number of queries
        count: u32,
    },
}

impl Command<'_> {
    /// Whether the command is only valid inside a render pass
    pub fn requires_render_pass(&self) -> bool {
        matches!(
            self,
            Self::Draw { .. } | Self::DrawIndexed { .. } | Self::NextSubpass { .. } | Self::EndRenderPass
        )
    }

    /// Whether the command is only valid outside a render pass
    pub fn forbidden_in_render_pass(&self) -> bool {
        matches!(
            self,
            Self::BeginRenderPass { .. }
                | Self::Dispatch { .. }
                | Self::TraceRays { .. }
                | Self::BuildAccelerationStructures { .. }
                | Self::CopyBuffer { .. }
                | Self::CopyBufferToImage { .. }
                | Self::CopyImage { .. }
                | Self::BlitImage { .. }
                | Self::ClearColorImage { .. }
                | Self::ClearDepthStencilImage { .. }
                | Self::SetEvent { .. }
                | Self::ResetEvent { .. }
                | Self::ResetQueryPool { .. }
        )
    }
}

// `vk::ClearValue` and `vk::ClearColorValue` are unions without `Debug`, so
// slices and clear values are summarized.
impl fmt::Debug for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::BeginRenderPass {
                render_pass,
                framebuffer,
                render_area,
                clear_values,
                contents,
            } => f
                .debug_struct("BeginRenderPass")
                .field("render_pass", &render_pass)
                .field("framebuffer", &framebuffer)
                .field("render_area", &render_area)
                .field("clear_values", &clear_values.len())
                .field("contents", &contents)
                .finish(),
            Self::NextSubpass { contents } => f.debug_struct("NextSubpass").field("contents", &contents).finish(),
            Self::EndRenderPass => f.write_str("EndRenderPass"),
            Self::BindPipeline { bind_point, pipeline } => f
                .debug_struct("BindPipeline")
                .field("bind_point", &bind_point)
                .field("pipeline", &pipeline)
                .finish(),
            Self::BindDescriptorSets {
                bind_point,
                first_set,
                sets,
                ..
            } => f
                .debug_struct("BindDescriptorSets")
                .field("bind_point", &bind_point)
                .field("first_set", &first_set)
                .field("sets", &sets)
                .finish(),
            Self::BindVertexBuffers {
                first_binding, buffers, ..
            } => f
                .debug_struct("BindVertexBuffers")
                .field("first_binding", &first_binding)
                .field("buffers", &buffers)
                .finish(),
            Self::BindIndexBuffer {
                buffer, index_type, ..
            } => f
                .debug_struct("BindIndexBuffer")
                .field("buffer", &buffer)
                .field("index_type", &index_type)
                .finish(),
            Self::PushConstants {
                stages, offset, data, ..
            } => f
                .debug_struct("PushConstants")
                .field("stages", &stages)
                .field("offset", &offset)
                .field("bytes", &data.len())
                .finish(),
            Self::SetViewport(viewport) => f.debug_tuple("SetViewport").field(&viewport).finish(),
            Self::SetScissor(scissor) => f.debug_tuple("SetScissor").field(&scissor).finish(),
            Self::Draw {
                vertex_count,
                instance_count,
                ..
            } => f
                .debug_struct("Draw")
                .field("vertex_count", &vertex_count)
                .field("instance_count", &instance_count)
                .finish(),
            Self::DrawIndexed {
                index_count,
                instance_count,
                ..
            } => f
                .debug_struct("DrawIndexed")
                .field("index_count", &index_count)
                .field("instance_count", &instance_count)
                .finish(),
            Self::Dispatch { x, y, z } => f.debug_tuple("Dispatch").field(&[x, y, z]).finish(),
            Self::TraceRays {
                width, height, depth, ..
            } => f.debug_tuple("TraceRays").field(&[width, height, depth]).finish(),
            Self::BuildAccelerationStructures { infos, .. } => f
                .debug_struct("BuildAccelerationStructures")
                .field("builds", &infos.len())
                .finish(),
            Self::CopyBuffer { src, dst, regions } => f
                .debug_struct("CopyBuffer")
                .field("src", &src)
                .field("dst", &dst)
                .field("regions", &regions.len())
                .finish(),
            Self::CopyBufferToImage { src, dst, layout, regions } => f
                .debug_struct("CopyBufferToImage")
                .field("src", &src)
                .field("dst", &dst)
                .field("layout", &layout)
                .field("regions", &regions.len())
                .finish(),
            Self::CopyImage { src, dst, regions, .. } => f
                .debug_struct("CopyImage")
                .field("src", &src)
                .field("dst", &dst)
                .field("regions", &regions.len())
                .finish(),
            Self::BlitImage {
                src, dst, regions, filter, ..
            } => f
                .debug_struct("BlitImage")
                .field("src", &src)
                .field("dst", &dst)
                .field("regions", &regions.len())
                .field("filter", &filter)
                .finish(),
            Self::ClearColorImage {
                image, layout, ranges, ..
            } => f
                .debug_struct("ClearColorImage")
                .field("image", &image)
                .field("layout", &layout)
                .field("ranges", &ranges.len())
                .finish(),
            Self::ClearDepthStencilImage {
                image,
                layout,
                value,
                ranges,
            } => f
                .debug_struct("ClearDepthStencilImage")
                .field("image", &image)
                .field("layout", &layout)
                .field("value", &value)
                .field("ranges", &ranges.len())
                .finish(),
            Self::PipelineBarrier {
                src_stage,
                dst_stage,
                memory_barriers,
                image_barriers,
            } => f
                .debug_struct("PipelineBarrier")
                .field("src_stage", &src_stage)
                .field("dst_stage", &dst_stage)
                .field("memory_barriers", &memory_barriers.len())
                .field("image_barriers", &image_barriers.len())
                .finish(),
            Self::SetEvent { event, stage } => f
                .debug_struct("SetEvent")
                .field("event", &event)
                .field("stage", &stage)
                .finish(),
            Self::ResetEvent { event, stage } => f
                .debug_struct("ResetEvent")
                .field("event", &event)
                .field("stage", &stage)
                .finish(),
            Self::WaitEvents { events, .. } => f.debug_struct("WaitEvents").field("events", &events).finish(),
            Self::ExecuteCommands { command_buffers } => f
                .debug_struct("ExecuteCommands")
                .field("command_buffers", &command_buffers)
                .finish(),
            Self::WriteTimestamp { stage, pool, query } => f
                .debug_struct("WriteTimestamp")
                .field("stage", &stage)
                .field("pool", &pool)
                .field("query", &query)
                .finish(),
            Self::ResetQueryPool {
                pool,
                first_query,
                count,
            } => f
                .debug_struct("ResetQueryPool")
                .field("pool", &pool)
                .field("first_query", &first_query)
                .field("count", &count)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_summarizes_clear_values() {
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];
        let command = Command::BeginRenderPass {
            render_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
            render_area: vk::Rect2D::default(),
            clear_values: &clear_values,
            contents: vk::SubpassContents::INLINE,
        };
        let text = format!("{command:?}");
        assert!(text.starts_with("BeginRenderPass"));
        assert!(text.contains("clear_values: 2"));
        assert_eq!(format!("{:?}", Command::EndRenderPass), "EndRenderPass");
    }
}
