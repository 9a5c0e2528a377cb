//! Pipeline descriptors
//!
//! Every rendering stage is one [`PipelineDescriptor`]: shaders, targets,
//! fixed-function state and the policy that turns producer records into draws.
//! Stages differ only in data; [`super::RenderPipeline`] is the one type that
//! executes them.

use ash::vk;

use crate::pipelines::{PushLayout, RenderTargetId, Resolution, VertexInput};
use crate::producers::{InstanceRecord, LevelOfDetail, MaterialType, ProducerKind, ProducerTask, VisibilityFlags};

/// Shader file names per stage, relative to the shader directory.
///
/// Unused stages are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderSet {
    /// Vertex stage
    pub vertex: Option<String>,
    /// Tessellation control stage
    pub tessellation_control: Option<String>,
    /// Tessellation evaluation stage
    pub tessellation_evaluation: Option<String>,
    /// Geometry stage
    pub geometry: Option<String>,
    /// Fragment stage
    pub fragment: Option<String>,
}

impl ShaderSet {
    /// Vertex and fragment stages
    pub fn vertex_fragment(vertex: &str, fragment: &str) -> Self {
        Self {
            vertex: Some(vertex.to_string()),
            fragment: Some(fragment.to_string()),
            ..Self::default()
        }
    }

    /// Vertex stage only, for depth-only passes
    pub fn vertex_only(vertex: &str) -> Self {
        Self {
            vertex: Some(vertex.to_string()),
            ..Self::default()
        }
    }

    /// Add tessellation control and evaluation stages
    pub fn with_tessellation(mut self, control: &str, evaluation: &str) -> Self {
        self.tessellation_control = Some(control.to_string());
        self.tessellation_evaluation = Some(evaluation.to_string());
        self
    }

    /// Add a geometry stage
    pub fn with_geometry(mut self, geometry: &str) -> Self {
        self.geometry = Some(geometry.to_string());
        self
    }

    /// Active stages in pipeline order
    pub fn stages(&self) -> Vec<(vk::ShaderStageFlags, &str)> {
        [
            (vk::ShaderStageFlags::VERTEX, &self.vertex),
            (vk::ShaderStageFlags::TESSELLATION_CONTROL, &self.tessellation_control),
            (vk::ShaderStageFlags::TESSELLATION_EVALUATION, &self.tessellation_evaluation),
            (vk::ShaderStageFlags::GEOMETRY, &self.geometry),
            (vk::ShaderStageFlags::FRAGMENT, &self.fragment),
        ]
        .into_iter()
        .filter_map(|(stage, name)| name.as_deref().map(|name| (stage, name)))
        .collect()
    }

    /// Union of active stage bits
    pub fn stage_flags(&self) -> vk::ShaderStageFlags {
        self.stages()
            .into_iter()
            .fold(vk::ShaderStageFlags::empty(), |flags, (stage, _)| flags | stage)
    }

    /// Whether tessellation stages are present
    pub fn has_tessellation(&self) -> bool {
        self.tessellation_control.is_some() && self.tessellation_evaluation.is_some()
    }
}

/// Face culling modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    /// No culling
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    #[default]
    Back,
}

impl CullMode {
    /// Vulkan cull flags
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            Self::None => vk::CullModeFlags::NONE,
            Self::Front => vk::CullModeFlags::FRONT,
            Self::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Depth and stencil comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareOp {
    /// Never passes
    Never,
    /// Passes when the new value is smaller
    #[default]
    Less,
    /// Passes on equality
    Equal,
    /// Passes when smaller or equal
    LessOrEqual,
    /// Passes when greater
    Greater,
    /// Always passes
    Always,
}

impl CompareOp {
    /// Vulkan compare operator
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            Self::Never => vk::CompareOp::NEVER,
            Self::Less => vk::CompareOp::LESS,
            Self::Equal => vk::CompareOp::EQUAL,
            Self::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            Self::Greater => vk::CompareOp::GREATER,
            Self::Always => vk::CompareOp::ALWAYS,
        }
    }
}

/// Stencil buffer update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StencilOp {
    /// Keep the current value
    #[default]
    Keep,
    /// Write zero
    Zero,
    /// Write the reference value
    Replace,
    /// Increment, clamped
    IncrementClamp,
    /// Decrement, clamped
    DecrementClamp,
    /// Bitwise invert
    Invert,
}

impl StencilOp {
    /// Vulkan stencil operator
    pub fn to_vk(self) -> vk::StencilOp {
        match self {
            Self::Keep => vk::StencilOp::KEEP,
            Self::Zero => vk::StencilOp::ZERO,
            Self::Replace => vk::StencilOp::REPLACE,
            Self::IncrementClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
            Self::DecrementClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
            Self::Invert => vk::StencilOp::INVERT,
        }
    }
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    /// 0
    Zero,
    /// 1
    One,
    /// Source alpha
    SrcAlpha,
    /// 1 - source alpha
    OneMinusSrcAlpha,
    /// Destination alpha
    DstAlpha,
    /// 1 - destination alpha
    OneMinusDstAlpha,
}

impl BlendFactor {
    /// Vulkan blend factor
    pub fn to_vk(self) -> vk::BlendFactor {
        match self {
            Self::Zero => vk::BlendFactor::ZERO,
            Self::One => vk::BlendFactor::ONE,
            Self::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            Self::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            Self::DstAlpha => vk::BlendFactor::DST_ALPHA,
            Self::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        }
    }
}

/// Blend enable and the four blend factors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    /// Blending on or off
    pub enabled: bool,
    /// Source color factor
    pub src_color: BlendFactor,
    /// Destination color factor
    pub dst_color: BlendFactor,
    /// Source alpha factor
    pub src_alpha: BlendFactor,
    /// Destination alpha factor
    pub dst_alpha: BlendFactor,
}

impl BlendState {
    /// Blending disabled
    pub const OPAQUE: Self = Self {
        enabled: false,
        src_color: BlendFactor::One,
        dst_color: BlendFactor::Zero,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::Zero,
    };

    /// Standard alpha blending
    pub const ALPHA: Self = Self {
        enabled: true,
        src_color: BlendFactor::SrcAlpha,
        dst_color: BlendFactor::OneMinusSrcAlpha,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::OneMinusSrcAlpha,
    };

    /// Attachment blend state writing all channels
    pub fn to_vk(self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::Bool32::from(self.enabled),
            src_color_blend_factor: self.src_color.to_vk(),
            dst_color_blend_factor: self.dst_color.to_vk(),
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: self.src_alpha.to_vk(),
            dst_alpha_blend_factor: self.dst_alpha.to_vk(),
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

impl Default for BlendState {
    fn default() -> Self {
        Self::OPAQUE
    }
}

/// Depth test configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthConfig {
    /// Depth test enable
    pub test: bool,
    /// Depth write enable
    pub write: bool,
    /// Compare operator
    pub compare: CompareOp,
}

impl DepthConfig {
    /// No depth test
    pub const DISABLED: Self = Self {
        test: false,
        write: false,
        compare: CompareOp::Always,
    };

    /// Test and write with the given operator
    pub const fn read_write(compare: CompareOp) -> Self {
        Self {
            test: true,
            write: true,
            compare,
        }
    }

    /// Test only
    pub const fn read_only(compare: CompareOp) -> Self {
        Self {
            test: true,
            write: false,
            compare,
        }
    }
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self::read_write(CompareOp::Less)
    }
}

/// Stencil test configuration, shared by front and back faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StencilConfig {
    /// Stencil test enable
    pub enabled: bool,
    /// Op when the stencil test fails
    pub fail: StencilOp,
    /// Op when both tests pass
    pub pass: StencilOp,
    /// Op when stencil passes and depth fails
    pub depth_fail: StencilOp,
    /// Compare operator
    pub compare: CompareOp,
    /// Compare mask
    pub compare_mask: u32,
    /// Write mask
    pub write_mask: u32,
    /// Reference value
    pub reference: u32,
}

impl StencilConfig {
    /// Write `reference` wherever a fragment passes
    pub fn replace(reference: u32) -> Self {
        Self {
            enabled: true,
            fail: StencilOp::Keep,
            pass: StencilOp::Replace,
            depth_fail: StencilOp::Keep,
            compare: CompareOp::Always,
            compare_mask: 0xFF,
            write_mask: 0xFF,
            reference,
        }
    }

    /// Whether the configuration can modify the stencil buffer
    pub fn writes(&self) -> bool {
        self.enabled
            && self.write_mask != 0
            && [self.fail, self.pass, self.depth_fail]
                .iter()
                .any(|op| *op != StencilOp::Keep)
    }

    /// Vulkan stencil op state
    pub fn to_vk(self) -> vk::StencilOpState {
        vk::StencilOpState {
            fail_op: self.fail.to_vk(),
            pass_op: self.pass.to_vk(),
            depth_fail_op: self.depth_fail.to_vk(),
            compare_op: self.compare.to_vk(),
            compare_mask: self.compare_mask,
            write_mask: self.write_mask,
            reference: self.reference,
        }
    }
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    /// Independent triangles
    #[default]
    TriangleList,
    /// Triangle strip
    TriangleStrip,
    /// Independent lines
    LineList,
    /// Points
    PointList,
    /// Tessellation patches
    PatchList,
}

impl Topology {
    /// Vulkan topology
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            Self::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Self::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            Self::LineList => vk::PrimitiveTopology::LINE_LIST,
            Self::PointList => vk::PrimitiveTopology::POINT_LIST,
            Self::PatchList => vk::PrimitiveTopology::PATCH_LIST,
        }
    }
}

/// Record filter applied on top of view visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstanceFilter {
    /// Only records with this material type
    pub material: Option<MaterialType>,
    /// Only records at this level of detail
    pub level_of_detail: Option<LevelOfDetail>,
}

impl InstanceFilter {
    /// Accept every record
    pub const ALL: Self = Self {
        material: None,
        level_of_detail: None,
    };

    /// Whether `record` passes the filter
    pub fn accepts(&self, record: &InstanceRecord) -> bool {
        self.material.map_or(true, |m| m == record.material_type)
            && self.level_of_detail.map_or(true, |l| l == record.level_of_detail)
    }
}

/// How a pipeline turns its inputs into draw calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawPolicy {
    /// One `draw(3, 1)` covering the target
    FullscreenTriangle,
    /// One draw per visible producer record, in container order
    Instances {
        /// Producer supplying records
        producer: ProducerKind,
        /// View whose visibility bit selects records
        view: VisibilityFlags,
        /// Additional record filter
        filter: InstanceFilter,
        /// Push constant block per draw
        push: PushLayout,
    },
}

impl DrawPolicy {
    /// Push layout used by the policy
    pub fn push_layout(&self) -> PushLayout {
        match self {
            Self::FullscreenTriangle => PushLayout::None,
            Self::Instances { push, .. } => *push,
        }
    }
}

/// Declarative configuration of one rendering stage
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDescriptor {
    /// Unique stage name
    pub name: String,
    /// Shader stages
    pub shaders: ShaderSet,
    /// Depth attachment
    pub depth: Option<RenderTargetId>,
    /// Color attachments in attachment order
    pub color_targets: Vec<RenderTargetId>,
    /// Targets sampled through the table at set 1, bound in list order from binding 0
    pub read_targets: Vec<RenderTargetId>,
    /// Vertex input
    pub vertex_input: VertexInput,
    /// Render resolution
    pub resolution: Resolution,
    /// Clear targets on their first write of the frame
    pub clear: bool,
    /// Blend state applied to every color attachment
    pub blend: BlendState,
    /// Face culling
    pub cull: CullMode,
    /// Depth test state
    pub depth_state: DepthConfig,
    /// Stencil test state
    pub stencil: StencilConfig,
    /// Primitive topology
    pub topology: Topology,
    /// Control points per patch when tessellating
    pub patch_control_points: u32,
    /// Draw policy
    pub draw: DrawPolicy,
    /// Producer tasks joined before records are read
    pub waits: Vec<ProducerTask>,
}

impl PipelineDescriptor {
    /// Fullscreen pass writing `target` with no depth
    pub fn fullscreen(name: &str, fragment: &str, target: RenderTargetId) -> Self {
        Self {
            name: name.to_string(),
            shaders: ShaderSet::vertex_fragment("fullscreen_vert.spv", fragment),
            depth: None,
            color_targets: vec![target],
            read_targets: Vec::new(),
            vertex_input: VertexInput::None,
            resolution: Resolution::Swapchain,
            clear: false,
            blend: BlendState::OPAQUE,
            cull: CullMode::None,
            depth_state: DepthConfig::DISABLED,
            stencil: StencilConfig::default(),
            topology: Topology::TriangleList,
            patch_control_points: 0,
            draw: DrawPolicy::FullscreenTriangle,
            waits: Vec::new(),
        }
    }

    /// Instanced geometry pass drawing `producer` records visible to `view`
    pub fn instanced(name: &str, shaders: ShaderSet, producer: ProducerKind, view: VisibilityFlags, push: PushLayout) -> Self {
        Self {
            name: name.to_string(),
            shaders,
            depth: None,
            color_targets: Vec::new(),
            read_targets: Vec::new(),
            vertex_input: VertexInput::Mesh,
            resolution: Resolution::Swapchain,
            clear: false,
            blend: BlendState::OPAQUE,
            cull: CullMode::Back,
            depth_state: DepthConfig::default(),
            stencil: StencilConfig::default(),
            topology: Topology::TriangleList,
            patch_control_points: 0,
            draw: DrawPolicy::Instances {
                producer,
                view,
                filter: InstanceFilter::ALL,
                push,
            },
            waits: Vec::new(),
        }
    }

    /// Set color attachments
    pub fn with_color_targets(mut self, targets: &[RenderTargetId]) -> Self {
        self.color_targets = targets.to_vec();
        self
    }

    /// Set the depth attachment and its state
    pub fn with_depth(mut self, depth: RenderTargetId, state: DepthConfig) -> Self {
        self.depth = Some(depth);
        self.depth_state = state;
        self
    }

    /// Set sampled targets
    pub fn with_reads(mut self, targets: &[RenderTargetId]) -> Self {
        self.read_targets = targets.to_vec();
        self
    }

    /// Set vertex input
    pub fn with_vertex_input(mut self, input: VertexInput) -> Self {
        self.vertex_input = input;
        self
    }

    /// Set resolution
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Clear on first write
    pub fn with_clear(mut self) -> Self {
        self.clear = true;
        self
    }

    /// Set blend state
    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = blend;
        self
    }

    /// Set cull mode
    pub fn with_cull(mut self, cull: CullMode) -> Self {
        self.cull = cull;
        self
    }

    /// Set stencil state
    pub fn with_stencil(mut self, stencil: StencilConfig) -> Self {
        self.stencil = stencil;
        self
    }

    /// Tessellate patches of `control_points`
    pub fn with_patches(mut self, control_points: u32) -> Self {
        self.topology = Topology::PatchList;
        self.patch_control_points = control_points;
        self
    }

    /// Restrict records further
    pub fn with_filter(mut self, filter: InstanceFilter) -> Self {
        if let DrawPolicy::Instances { filter: current, .. } = &mut self.draw {
            *current = filter;
        }
        self
    }

    /// Join these producer tasks before reading records
    pub fn with_waits(mut self, waits: &[ProducerTask]) -> Self {
        self.waits = waits.to_vec();
        self
    }

    /// Targets this pipeline writes
    pub fn writes(&self) -> Vec<RenderTargetId> {
        let mut writes = self.color_targets.clone();
        if let Some(depth) = self.depth {
            if self.depth_state.write || self.stencil.writes() {
                writes.push(depth);
            }
        }
        writes
    }

    /// Targets this pipeline reads without writing
    pub fn reads(&self) -> Vec<RenderTargetId> {
        let mut reads = self.read_targets.clone();
        if let Some(depth) = self.depth {
            if !self.depth_state.write && !self.stencil.writes() && !reads.contains(&depth) {
                reads.push(depth);
            }
        }
        reads
    }

    /// Whether a color attachment is the swapchain image
    pub fn targets_swapchain(&self) -> bool {
        self.color_targets.contains(&RenderTargetId::Swapchain)
    }

    /// Producer this pipeline draws from
    pub fn producer(&self) -> Option<ProducerKind> {
        match self.draw {
            DrawPolicy::FullscreenTriangle => None,
            DrawPolicy::Instances { producer, .. } => Some(producer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::BufferHandle;

    #[test]
    fn unused_shader_stages_are_skipped() {
        let shaders = ShaderSet::vertex_fragment("a.spv", "b.spv").with_tessellation("c.spv", "d.spv");
        let stages: Vec<vk::ShaderStageFlags> = shaders.stages().into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            stages,
            vec![
                vk::ShaderStageFlags::VERTEX,
                vk::ShaderStageFlags::TESSELLATION_CONTROL,
                vk::ShaderStageFlags::TESSELLATION_EVALUATION,
                vk::ShaderStageFlags::FRAGMENT,
            ]
        );
        assert!(shaders.has_tessellation());
        assert!(!ShaderSet::vertex_only("a.spv").has_tessellation());
    }

    #[test]
    fn depth_counts_as_read_when_not_written() {
        let shaders = ShaderSet::vertex_fragment("v.spv", "f.spv");
        let equal_test = PipelineDescriptor::instanced(
            "color",
            shaders.clone(),
            ProducerKind::Vegetation,
            VisibilityFlags::CAMERA,
            PushLayout::VegetationWind,
        )
        .with_color_targets(&[RenderTargetId::Scene])
        .with_depth(RenderTargetId::SceneDepth, DepthConfig::read_only(CompareOp::Equal));
        assert_eq!(equal_test.writes(), vec![RenderTargetId::Scene]);
        assert_eq!(equal_test.reads(), vec![RenderTargetId::SceneDepth]);

        let stencil_only = PipelineDescriptor::instanced(
            "mask",
            shaders,
            ProducerKind::Vegetation,
            VisibilityFlags::CAMERA,
            PushLayout::None,
        )
        .with_depth(RenderTargetId::SceneDepth, DepthConfig::read_only(CompareOp::Less))
        .with_stencil(StencilConfig::replace(1));
        assert_eq!(stencil_only.writes(), vec![RenderTargetId::SceneDepth]);
        assert!(stencil_only.reads().is_empty());
    }

    #[test]
    fn filter_matches_material_and_lod() {
        let filter = InstanceFilter {
            material: Some(MaterialType::Masked),
            level_of_detail: Some(LevelOfDetail::Full),
        };
        let record = InstanceRecord::new(BufferHandle::default(), 3);
        assert!(!filter.accepts(&record));
        let masked = record.clone().with_material(MaterialType::Masked, LevelOfDetail::Full);
        assert!(filter.accepts(&masked));
        assert!(InstanceFilter::ALL.accepts(&record));
    }

    #[test]
    fn alpha_blend_state_maps_factors() {
        let state = BlendState::ALPHA.to_vk();
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(state.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(BlendState::OPAQUE.to_vk().blend_enable, vk::FALSE);
    }
}
