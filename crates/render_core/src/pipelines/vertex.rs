//! Vertex input layouts

use ash::vk;
use bytemuck::{Pod, Zeroable};

/// Mesh vertex, binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Position in model space
    pub position: [f32; 3],
    /// Normal vector
    pub normal: [f32; 3],
    /// Texture coordinates
    pub tex_coord: [f32; 2],
}

impl Vertex {
    /// Create a vertex
    pub const fn new(position: [f32; 3], normal: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            tex_coord,
        }
    }
}

/// Per-instance data for instanced vegetation, binding 1
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    /// World position in xyz, uniform scale in w
    pub position_scale: [f32; 4],
    /// Yaw, bend stiffness, color variation, level-of-detail blend
    pub parameters: [f32; 4],
}

/// Vertex input a pipeline consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VertexInput {
    /// No vertex buffers; positions come from the vertex index
    #[default]
    None,
    /// [`Vertex`] at binding 0
    Mesh,
    /// [`Vertex`] at binding 0 and [`InstanceData`] at binding 1
    MeshInstanced,
}

impl VertexInput {
    /// Binding descriptions
    pub fn bindings(self) -> Vec<vk::VertexInputBindingDescription> {
        let vertex = vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        };
        let instance = vk::VertexInputBindingDescription {
            binding: 1,
            stride: std::mem::size_of::<InstanceData>() as u32,
            input_rate: vk::VertexInputRate::INSTANCE,
        };
        match self {
            Self::None => Vec::new(),
            Self::Mesh => vec![vertex],
            Self::MeshInstanced => vec![vertex, instance],
        }
    }

    /// Attribute descriptions; locations 0-2 per vertex, 3-4 per instance
    pub fn attributes(self) -> Vec<vk::VertexInputAttributeDescription> {
        let attribute = |binding, location, format, offset| vk::VertexInputAttributeDescription {
            binding,
            location,
            format,
            offset,
        };
        let mut attributes = match self {
            Self::None => return Vec::new(),
            Self::Mesh | Self::MeshInstanced => vec![
                attribute(0, 0, vk::Format::R32G32B32_SFLOAT, 0),
                attribute(0, 1, vk::Format::R32G32B32_SFLOAT, 12),
                attribute(0, 2, vk::Format::R32G32_SFLOAT, 24),
            ],
        };
        if self == Self::MeshInstanced {
            attributes.push(attribute(1, 3, vk::Format::R32G32B32A32_SFLOAT, 0));
            attributes.push(attribute(1, 4, vk::Format::R32G32B32A32_SFLOAT, 16));
        }
        attributes
    }

    /// Whether records must carry an instance buffer
    pub fn is_instanced(self) -> bool {
        self == Self::MeshInstanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_offsets_match_struct_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::size_of::<InstanceData>(), 32);

        let offsets: Vec<(u32, u32, u32)> = VertexInput::MeshInstanced
            .attributes()
            .iter()
            .map(|a| (a.binding, a.location, a.offset))
            .collect();
        assert_eq!(offsets, vec![(0, 0, 0), (0, 1, 12), (0, 2, 24), (1, 3, 0), (1, 4, 16)]);
    }

    #[test]
    fn fullscreen_passes_have_no_input() {
        assert!(VertexInput::None.bindings().is_empty());
        assert!(VertexInput::None.attributes().is_empty());
        assert_eq!(VertexInput::Mesh.bindings().len(), 1);
        assert_eq!(VertexInput::MeshInstanced.bindings()[1].input_rate, vk::VertexInputRate::INSTANCE);
    }
}
