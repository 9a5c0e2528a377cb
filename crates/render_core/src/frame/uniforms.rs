//! Global per-frame uniforms bound at set 0 by every pipeline

use ash::vk;
use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Vector2, Vector3};

use crate::backend::{TableBinding, VulkanResult};
use crate::pipelines::PushParameters;
use crate::producers::VisibilityFlags;
use crate::resources::{
    BufferDesc, BufferHandle, MemoryLocation, RenderDataTableBinding, RenderDataTableHandle, ResourceFactory,
    TableLayoutHandle,
};

/// Camera, light and time data as laid out in the shaders' set 0 block
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GlobalUniforms {
    /// World to view
    pub view: [[f32; 4]; 4],
    /// View to clip
    pub projection: [[f32; 4]; 4],
    /// World to clip
    pub view_projection: [[f32; 4]; 4],
    /// World to light clip space per shadow-map slot
    pub shadow_view_projections: [[[f32; 4]; 4]; VisibilityFlags::SHADOW_MAP_SLOTS],
    /// Camera position in xyz
    pub camera_position: [f32; 4],
    /// Direction towards the sun in xyz
    pub light_direction: [f32; 4],
    /// Elapsed seconds, delta seconds, wind strength, unused
    pub time: [f32; 4],
    /// Wind direction in xy, render width and height in zw
    pub wind_and_viewport: [f32; 4],
}

/// What the application provides each frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameParameters {
    /// World to view
    pub view: Matrix4<f32>,
    /// View to clip
    pub projection: Matrix4<f32>,
    /// Camera position
    pub camera_position: Vector3<f32>,
    /// Direction towards the sun
    pub light_direction: Vector3<f32>,
    /// Light matrices, one per shadow-map slot
    pub shadow_view_projections: [Matrix4<f32>; VisibilityFlags::SHADOW_MAP_SLOTS],
    /// Seconds since start
    pub elapsed_seconds: f32,
    /// Seconds since the previous frame
    pub delta_seconds: f32,
    /// Ground-plane wind direction, normalized when uploaded
    pub wind_direction: Vector2<f32>,
    /// Wind strength
    pub wind_strength: f32,
}

impl Default for FrameParameters {
    fn default() -> Self {
        Self {
            view: Matrix4::identity(),
            projection: Matrix4::identity(),
            camera_position: Vector3::zeros(),
            light_direction: Vector3::new(0.0, 1.0, 0.0),
            shadow_view_projections: [Matrix4::identity(); VisibilityFlags::SHADOW_MAP_SLOTS],
            elapsed_seconds: 0.0,
            delta_seconds: 0.0,
            wind_direction: Vector2::new(1.0, 0.0),
            wind_strength: 0.0,
        }
    }
}

impl FrameParameters {
    /// Wind direction, or zero when none was given
    fn normalized_wind(&self) -> Vector2<f32> {
        self.wind_direction.try_normalize(f32::EPSILON).unwrap_or_else(Vector2::zeros)
    }

    /// Pack into the shader block for a render area of `extent`
    pub fn to_uniforms(&self, extent: vk::Extent2D) -> GlobalUniforms {
        let wind = self.normalized_wind();
        let mut shadow_view_projections = [[[0.0; 4]; 4]; VisibilityFlags::SHADOW_MAP_SLOTS];
        for (packed, matrix) in shadow_view_projections.iter_mut().zip(&self.shadow_view_projections) {
            *packed = (*matrix).into();
        }
        GlobalUniforms {
            view: self.view.into(),
            projection: self.projection.into(),
            view_projection: (self.projection * self.view).into(),
            shadow_view_projections,
            camera_position: self.camera_position.push(1.0).into(),
            light_direction: self
                .light_direction
                .try_normalize(f32::EPSILON)
                .unwrap_or_else(Vector3::y)
                .push(0.0)
                .into(),
            time: [self.elapsed_seconds, self.delta_seconds, self.wind_strength, 0.0],
            wind_and_viewport: [wind.x, wind.y, extent.width as f32, extent.height as f32],
        }
    }

    /// Frame-wide inputs to per-draw push constants
    pub fn push_parameters(&self) -> PushParameters {
        let wind = self.normalized_wind();
        PushParameters {
            elapsed_seconds: self.elapsed_seconds,
            wind_direction: [wind.x, wind.y],
            wind_strength: self.wind_strength,
        }
    }
}

/// One host-visible uniform buffer and table per frame slot
#[derive(Debug)]
pub struct GlobalTables {
    layout: TableLayoutHandle,
    buffers: Vec<BufferHandle>,
    tables: Vec<RenderDataTableHandle>,
}

impl GlobalTables {
    /// Create the set 0 layout and one buffer/table pair per frame slot
    pub fn new(factory: &mut ResourceFactory, frames_in_flight: usize) -> VulkanResult<Self> {
        let layout = factory.create_table_layout(&[TableBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            count: 1,
            stages: vk::ShaderStageFlags::ALL_GRAPHICS,
        }])?;
        let mut buffers = Vec::with_capacity(frames_in_flight);
        let mut tables = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            let buffer = factory.create_buffer(&BufferDesc {
                size: std::mem::size_of::<GlobalUniforms>() as vk::DeviceSize,
                usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
                location: MemoryLocation::HostVisible,
                initial_data: Some(bytemuck::bytes_of(&GlobalUniforms::zeroed())),
            })?;
            let table = factory.create_render_data_table(layout, &[RenderDataTableBinding::UniformBuffer { binding: 0, buffer }])?;
            buffers.push(buffer);
            tables.push(table);
        }
        Ok(Self { layout, buffers, tables })
    }

    /// Layout pipelines bind at set 0
    pub fn layout(&self) -> TableLayoutHandle {
        self.layout
    }

    /// Upload this frame's uniforms and return the slot's descriptor set
    pub fn update(
        &self,
        factory: &mut ResourceFactory,
        frame_slot: usize,
        uniforms: &GlobalUniforms,
    ) -> VulkanResult<vk::DescriptorSet> {
        let slot = frame_slot % self.buffers.len().max(1);
        let (Some(&buffer), Some(&table)) = (self.buffers.get(slot), self.tables.get(slot)) else {
            return Err(crate::backend::VulkanError::not_found("global table", frame_slot));
        };
        factory.update_buffer(buffer, 0, bytemuck::bytes_of(uniforms))?;
        factory.render_data_table(table)
    }

    /// Destroy tables, buffers and the layout
    pub fn release(&mut self, factory: &mut ResourceFactory) -> VulkanResult<()> {
        for table in self.tables.drain(..) {
            factory.destroy_render_data_table(table)?;
        }
        for buffer in self.buffers.drain(..) {
            factory.destroy_buffer(buffer)?;
        }
        factory.destroy_table_layout(self.layout)
    }
}
