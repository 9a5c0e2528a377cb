//! Standard stage table
//!
//! The engine's rendering stages as data. Order here is declaration order;
//! the render graph derives execution order from target reads and writes.

use crate::config::RendererConfig;
use crate::pipelines::{
    BlendState, CompareOp, CullMode, DepthConfig, InstanceFilter, PipelineDescriptor, PushLayout, RenderTargetId,
    Resolution, ShaderSet, StencilConfig, VertexInput,
};
use crate::producers::{LevelOfDetail, MaterialType, ProducerKind, ProducerTask, VisibilityFlags};

/// Stencil value written where vegetation covers the depth buffer
pub const VEGETATION_STENCIL: u32 = 1;

/// Every standard stage for `config`
pub fn standard_stages(config: &RendererConfig) -> Vec<PipelineDescriptor> {
    let mut stages = shadow_map_stages(config);
    stages.extend([
        terrain(),
        scene_features(),
        vegetation_depth(),
        vegetation_color(),
        direct_lighting(config.shadow_map_slots),
        PipelineDescriptor::fullscreen("denoise_horizontal", "denoise_horizontal_frag.spv", RenderTargetId::DenoisingIntermediate)
            .with_reads(&[RenderTargetId::Lighting]),
        PipelineDescriptor::fullscreen("denoise_vertical", "denoise_vertical_frag.spv", RenderTargetId::SceneDenoised)
            .with_reads(&[RenderTargetId::DenoisingIntermediate]),
        PipelineDescriptor::fullscreen("post_processing", "post_processing_frag.spv", RenderTargetId::Swapchain)
            .with_reads(&[RenderTargetId::SceneDenoised]),
        user_interface(),
    ]);
    stages
}

/// One depth-only pass per configured shadow-map slot
fn shadow_map_stages(config: &RendererConfig) -> Vec<PipelineDescriptor> {
    let slots = config.shadow_map_slots.min(VisibilityFlags::SHADOW_MAP_SLOTS as u32);
    (0..slots)
        .filter_map(|slot| {
            let view = VisibilityFlags::shadow_map(slot as usize)?;
            let target = RenderTargetId::ShadowMap(slot as u8);
            Some(
                PipelineDescriptor::instanced(
                    &format!("shadow_map_{slot}"),
                    ShaderSet::vertex_only("shadow_map_vert.spv"),
                    ProducerKind::Models,
                    view,
                    PushLayout::ShadowCaster,
                )
                .with_depth(target, DepthConfig::read_write(CompareOp::Less))
                .with_resolution(Resolution::Fixed {
                    width: config.shadow_map_resolution,
                    height: config.shadow_map_resolution,
                })
                .with_cull(CullMode::Front)
                .with_clear()
                .with_waits(&[ProducerTask::ModelCulling, ProducerTask::ShadowCulling]),
            )
        })
        .collect()
}

fn terrain() -> PipelineDescriptor {
    PipelineDescriptor::instanced(
        "terrain",
        ShaderSet::vertex_fragment("terrain_vert.spv", "terrain_frag.spv")
            .with_tessellation("terrain_tesc.spv", "terrain_tese.spv"),
        ProducerKind::Terrain,
        VisibilityFlags::CAMERA,
        PushLayout::ModelTransform,
    )
    .with_color_targets(&[RenderTargetId::Scene])
    .with_depth(RenderTargetId::SceneDepth, DepthConfig::read_write(CompareOp::Less))
    .with_patches(4)
    .with_clear()
    .with_waits(&[ProducerTask::TerrainCulling])
}

fn scene_features() -> PipelineDescriptor {
    PipelineDescriptor::instanced(
        "scene_features",
        ShaderSet::vertex_fragment("scene_features_vert.spv", "scene_features_frag.spv"),
        ProducerKind::Models,
        VisibilityFlags::CAMERA,
        PushLayout::ModelTransform,
    )
    .with_color_targets(&[RenderTargetId::Scene])
    .with_depth(RenderTargetId::SceneDepth, DepthConfig::read_write(CompareOp::Less))
    .with_clear()
    .with_waits(&[ProducerTask::ModelCulling])
}

/// Depth prepass for alpha-tested grass; tags covered pixels in stencil
fn vegetation_depth() -> PipelineDescriptor {
    PipelineDescriptor::instanced(
        "vegetation_depth",
        ShaderSet::vertex_fragment("vegetation_vert.spv", "vegetation_depth_frag.spv"),
        ProducerKind::Vegetation,
        VisibilityFlags::CAMERA,
        PushLayout::VegetationWind,
    )
    .with_vertex_input(VertexInput::MeshInstanced)
    .with_depth(RenderTargetId::SceneDepth, DepthConfig::read_write(CompareOp::Less))
    .with_stencil(StencilConfig::replace(VEGETATION_STENCIL))
    .with_cull(CullMode::None)
    .with_filter(InstanceFilter {
        material: Some(MaterialType::Masked),
        level_of_detail: Some(LevelOfDetail::Full),
    })
    .with_waits(&[ProducerTask::VegetationCulling, ProducerTask::VegetationLevelOfDetail])
}

/// Shades grass on exactly the fragments the depth prepass kept
fn vegetation_color() -> PipelineDescriptor {
    PipelineDescriptor::instanced(
        "vegetation_color",
        ShaderSet::vertex_fragment("vegetation_vert.spv", "vegetation_color_frag.spv"),
        ProducerKind::Vegetation,
        VisibilityFlags::CAMERA,
        PushLayout::VegetationWind,
    )
    .with_vertex_input(VertexInput::MeshInstanced)
    .with_color_targets(&[RenderTargetId::Scene])
    .with_depth(RenderTargetId::SceneDepth, DepthConfig::read_only(CompareOp::Equal))
    .with_cull(CullMode::None)
    .with_waits(&[ProducerTask::VegetationCulling, ProducerTask::VegetationLevelOfDetail])
}

fn direct_lighting(shadow_map_slots: u32) -> PipelineDescriptor {
    let mut reads = vec![RenderTargetId::Scene, RenderTargetId::SceneDepth];
    let slots = shadow_map_slots.min(VisibilityFlags::SHADOW_MAP_SLOTS as u32);
    reads.extend((0..slots).map(|slot| RenderTargetId::ShadowMap(slot as u8)));
    PipelineDescriptor::fullscreen("direct_lighting", "direct_lighting_frag.spv", RenderTargetId::Lighting).with_reads(&reads)
}

fn user_interface() -> PipelineDescriptor {
    PipelineDescriptor::instanced(
        "user_interface",
        ShaderSet::vertex_fragment("user_interface_vert.spv", "user_interface_frag.spv"),
        ProducerKind::UserInterface,
        VisibilityFlags::CAMERA,
        PushLayout::ModelTransform,
    )
    .with_color_targets(&[RenderTargetId::Swapchain])
    .with_blend(BlendState::ALPHA)
    .with_cull(CullMode::None)
    .with_waits(&[ProducerTask::UserInterfaceLayout])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::DrawPolicy;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique() {
        let config = RendererConfig {
            shadow_map_slots: 4,
            ..RendererConfig::default()
        };
        let stages = standard_stages(&config);
        let names: HashSet<&str> = stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.len(), stages.len());
        assert_eq!(stages.iter().filter(|s| s.name.starts_with("shadow_map_")).count(), 4);
    }

    #[test]
    fn shadow_maps_follow_config() {
        let config = RendererConfig {
            shadow_map_slots: 2,
            shadow_map_resolution: 1024,
            ..RendererConfig::default()
        };
        let stages = standard_stages(&config);
        let shadow = stages.iter().find(|s| s.name == "shadow_map_1").unwrap();
        assert_eq!(shadow.writes(), vec![RenderTargetId::ShadowMap(1)]);
        assert_eq!(shadow.resolution, Resolution::Fixed { width: 1024, height: 1024 });
        assert!(matches!(
            shadow.draw,
            DrawPolicy::Instances { view, .. } if view == VisibilityFlags::SHADOW_MAP_1
        ));

        let lighting = stages.iter().find(|s| s.name == "direct_lighting").unwrap();
        assert!(lighting.reads().contains(&RenderTargetId::ShadowMap(1)));
        assert!(!lighting.reads().contains(&RenderTargetId::ShadowMap(2)));
    }

    #[test]
    fn vegetation_color_tests_equal_without_writing_depth() {
        let color = vegetation_color();
        assert_eq!(color.depth_state.compare, CompareOp::Equal);
        assert!(!color.depth_state.write);
        assert_eq!(color.reads(), vec![RenderTargetId::SceneDepth]);
        assert!(vegetation_depth().writes().contains(&RenderTargetId::SceneDepth));
    }
}
