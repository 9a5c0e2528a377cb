//! Per-instance render records

use bitflags::bitflags;
use nalgebra::Matrix4;

use crate::resources::BufferHandle;

bitflags! {
    /// Views an instance is visible to, written by culling
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VisibilityFlags: u32 {
        /// Main camera
        const CAMERA = 1 << 0;
        /// First shadow-map slot
        const SHADOW_MAP_0 = 1 << 1;
        /// Second shadow-map slot
        const SHADOW_MAP_1 = 1 << 2;
        /// Third shadow-map slot
        const SHADOW_MAP_2 = 1 << 3;
        /// Fourth shadow-map slot
        const SHADOW_MAP_3 = 1 << 4;
    }
}

impl VisibilityFlags {
    /// Number of shadow-map slots with a visibility bit
    pub const SHADOW_MAP_SLOTS: usize = 4;

    /// Bit for a shadow-map slot
    pub fn shadow_map(slot: usize) -> Option<Self> {
        match slot {
            0 => Some(Self::SHADOW_MAP_0),
            1 => Some(Self::SHADOW_MAP_1),
            2 => Some(Self::SHADOW_MAP_2),
            3 => Some(Self::SHADOW_MAP_3),
            _ => None,
        }
    }
}

/// Surface class of an instance's material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MaterialType {
    /// Fully opaque
    #[default]
    Opaque,
    /// Alpha-tested cutout, e.g. foliage
    Masked,
    /// Blended
    Transparent,
}

/// Level of detail chosen for an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LevelOfDetail {
    /// Full geometry
    #[default]
    Full,
    /// Simplified geometry
    Reduced,
    /// Camera-facing impostor
    Billboard,
}

/// Everything a pipeline needs to draw one batch
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    /// Model-to-world transform, column-major
    pub transform: Matrix4<f32>,
    /// Vertex buffer
    pub vertex_buffer: BufferHandle,
    /// Byte offset into the vertex buffer
    pub vertex_offset: u64,
    /// Vertices drawn when there is no index buffer
    pub vertex_count: u32,
    /// Index buffer, 32-bit indices
    pub index_buffer: Option<BufferHandle>,
    /// First index
    pub first_index: u32,
    /// Indices drawn
    pub index_count: u32,
    /// Per-instance data bound at vertex binding 1
    pub instance_buffer: Option<BufferHandle>,
    /// Byte offset into the instance buffer
    pub instance_offset: u64,
    /// Instances drawn; zero skips the batch
    pub instance_count: u32,
    /// Material table index
    pub material_index: u32,
    /// Texture table indices
    pub texture_indices: [u32; 4],
    /// Material class
    pub material_type: MaterialType,
    /// Level of detail
    pub level_of_detail: LevelOfDetail,
    /// Views the batch is visible to
    pub visibility: VisibilityFlags,
}

impl InstanceRecord {
    /// Single visible, non-indexed instance with identity transform
    pub fn new(vertex_buffer: BufferHandle, vertex_count: u32) -> Self {
        Self {
            transform: Matrix4::identity(),
            vertex_buffer,
            vertex_offset: 0,
            vertex_count,
            index_buffer: None,
            first_index: 0,
            index_count: 0,
            instance_buffer: None,
            instance_offset: 0,
            instance_count: 1,
            material_index: 0,
            texture_indices: [0; 4],
            material_type: MaterialType::Opaque,
            level_of_detail: LevelOfDetail::Full,
            visibility: VisibilityFlags::CAMERA,
        }
    }

    /// Use an index buffer
    pub fn with_indices(mut self, index_buffer: BufferHandle, index_count: u32) -> Self {
        self.index_buffer = Some(index_buffer);
        self.index_count = index_count;
        self
    }

    /// Draw `count` instances from a per-instance buffer
    pub fn with_instances(mut self, instance_buffer: BufferHandle, count: u32) -> Self {
        self.instance_buffer = Some(instance_buffer);
        self.instance_count = count;
        self
    }

    /// Set the transform
    pub fn with_transform(mut self, transform: Matrix4<f32>) -> Self {
        self.transform = transform;
        self
    }

    /// Set material class and level of detail
    pub fn with_material(mut self, material_type: MaterialType, level_of_detail: LevelOfDetail) -> Self {
        self.material_type = material_type;
        self.level_of_detail = level_of_detail;
        self
    }

    /// Set visibility
    pub fn with_visibility(mut self, visibility: VisibilityFlags) -> Self {
        self.visibility = visibility;
        self
    }

    /// Whether the batch draws anything for `view`
    pub fn visible_to(&self, view: VisibilityFlags) -> bool {
        self.instance_count > 0 && self.visibility.intersects(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_slots_map_to_distinct_bits() {
        let bits: Vec<_> = (0..VisibilityFlags::SHADOW_MAP_SLOTS)
            .filter_map(VisibilityFlags::shadow_map)
            .collect();
        assert_eq!(bits.len(), 4);
        assert!(bits.iter().all(|b| !b.intersects(VisibilityFlags::CAMERA)));
        assert!(VisibilityFlags::shadow_map(4).is_none());
    }

    #[test]
    fn zero_instances_or_cleared_bits_are_invisible() {
        let record = InstanceRecord::new(BufferHandle::default(), 3);
        assert!(record.visible_to(VisibilityFlags::CAMERA));
        assert!(!record.visible_to(VisibilityFlags::SHADOW_MAP_0));

        let cleared = record.clone().with_visibility(VisibilityFlags::empty());
        assert!(!cleared.visible_to(VisibilityFlags::CAMERA));

        let mut empty = record;
        empty.instance_count = 0;
        assert!(!empty.visible_to(VisibilityFlags::CAMERA));
    }
}
