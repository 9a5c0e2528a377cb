//! Per-draw push constant blocks
//!
//! Layouts are plain `#[repr(C)]` structs padded by hand to 16-byte rows so
//! they match the std430 blocks in the shaders.

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::producers::{InstanceRecord, LevelOfDetail, VisibilityFlags};

/// Model transform and material lookup
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ModelTransformPush {
    /// Model matrix, column-major
    pub model: [[f32; 4]; 4],
    /// Material table index
    pub material_index: u32,
    /// Texture table indices
    pub texture_indices: [u32; 3],
}

/// Vegetation transform, wind and material
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VegetationWindPush {
    /// Model matrix, column-major
    pub model: [[f32; 4]; 4],
    /// Wind direction xy, strength, elapsed seconds
    pub wind: [f32; 4],
    /// Material table index
    pub material_index: u32,
    /// Albedo texture index
    pub texture_index: u32,
    /// 0 full, 1 reduced, 2 billboard
    pub level_of_detail: u32,
    /// Row padding
    pub _padding: u32,
}

/// Shadow caster transform
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadowCasterPush {
    /// Model matrix, column-major
    pub model: [[f32; 4]; 4],
    /// Shadow-map slot selecting the light matrix
    pub shadow_slot: u32,
    /// Row padding
    pub _padding: [u32; 3],
}

/// Frame-wide inputs to push constants
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PushParameters {
    /// Seconds since start
    pub elapsed_seconds: f32,
    /// Normalized wind direction on the ground plane
    pub wind_direction: [f32; 2],
    /// Wind strength
    pub wind_strength: f32,
}

/// Push constant block a pipeline uses per draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushLayout {
    /// No push constants
    #[default]
    None,
    /// [`ModelTransformPush`]
    ModelTransform,
    /// [`VegetationWindPush`]
    VegetationWind,
    /// [`ShadowCasterPush`]
    ShadowCaster,
}

impl PushLayout {
    /// Size of the block in bytes
    pub fn size(self) -> u32 {
        let size = match self {
            Self::None => 0,
            Self::ModelTransform => std::mem::size_of::<ModelTransformPush>(),
            Self::VegetationWind => std::mem::size_of::<VegetationWindPush>(),
            Self::ShadowCaster => std::mem::size_of::<ShadowCasterPush>(),
        };
        size as u32
    }

    /// Stages reading the block
    pub fn stages(self) -> vk::ShaderStageFlags {
        match self {
            Self::None => vk::ShaderStageFlags::empty(),
            Self::ShadowCaster => vk::ShaderStageFlags::VERTEX,
            Self::ModelTransform => {
                vk::ShaderStageFlags::VERTEX
                    | vk::ShaderStageFlags::TESSELLATION_EVALUATION
                    | vk::ShaderStageFlags::FRAGMENT
            }
            Self::VegetationWind => vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        }
    }

    /// Range for the pipeline layout
    pub fn range(self) -> Option<vk::PushConstantRange> {
        (self != Self::None).then(|| vk::PushConstantRange {
            stage_flags: self.stages(),
            offset: 0,
            size: self.size(),
        })
    }

    /// Encode the block for one record; `None` when the layout is empty
    pub fn encode(self, record: &InstanceRecord, view: VisibilityFlags, parameters: &PushParameters) -> Option<Vec<u8>> {
        let model: [[f32; 4]; 4] = record.transform.into();
        let bytes = match self {
            Self::None => return None,
            Self::ModelTransform => bytemuck::bytes_of(&ModelTransformPush {
                model,
                material_index: record.material_index,
                texture_indices: [
                    record.texture_indices[0],
                    record.texture_indices[1],
                    record.texture_indices[2],
                ],
            })
            .to_vec(),
            Self::VegetationWind => bytemuck::bytes_of(&VegetationWindPush {
                model,
                wind: [
                    parameters.wind_direction[0],
                    parameters.wind_direction[1],
                    parameters.wind_strength,
                    parameters.elapsed_seconds,
                ],
                material_index: record.material_index,
                texture_index: record.texture_indices[0],
                level_of_detail: match record.level_of_detail {
                    LevelOfDetail::Full => 0,
                    LevelOfDetail::Reduced => 1,
                    LevelOfDetail::Billboard => 2,
                },
                _padding: 0,
            })
            .to_vec(),
            Self::ShadowCaster => bytemuck::bytes_of(&ShadowCasterPush {
                model,
                shadow_slot: shadow_slot(view),
                _padding: [0; 3],
            })
            .to_vec(),
        };
        Some(bytes)
    }
}

/// Slot index of the first shadow-map bit in `view`, 0 when there is none
fn shadow_slot(view: VisibilityFlags) -> u32 {
    (0..VisibilityFlags::SHADOW_MAP_SLOTS)
        .find(|&slot| VisibilityFlags::shadow_map(slot).is_some_and(|bit| view.contains(bit)))
        .map_or(0, |slot| slot as u32)
}
