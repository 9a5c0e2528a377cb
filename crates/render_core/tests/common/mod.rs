//! Shared setup for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use ash::vk;
use render_core::prelude::*;

/// Every shader named by the standard stage table
pub const STANDARD_SHADERS: &[&str] = &[
    "fullscreen_vert.spv",
    "shadow_map_vert.spv",
    "terrain_vert.spv",
    "terrain_frag.spv",
    "terrain_tesc.spv",
    "terrain_tese.spv",
    "scene_features_vert.spv",
    "scene_features_frag.spv",
    "vegetation_vert.spv",
    "vegetation_depth_frag.spv",
    "vegetation_color_frag.spv",
    "direct_lighting_frag.spv",
    "denoise_horizontal_frag.spv",
    "denoise_vertical_frag.spv",
    "post_processing_frag.spv",
    "user_interface_vert.spv",
    "user_interface_frag.spv",
];

/// SPIR-V header with no instructions; the headless device only checks it is non-empty
pub fn spirv_stub() -> Vec<u8> {
    [0x0723_0203_u32, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect()
}

/// Shader library serving every standard shader from memory
pub fn standard_shaders() -> ShaderLibrary {
    let mut library = ShaderLibrary::new("does-not-exist");
    for name in STANDARD_SHADERS {
        library.insert_source(*name, spirv_stub());
    }
    library
}

/// Headless context and orchestrator running the standard stage table
pub fn standard_renderer(config: RendererConfig) -> (Arc<HeadlessDevice>, RenderContext, FrameOrchestrator) {
    render_core::foundation::logging::init_for_tests();
    let device = Arc::new(HeadlessDevice::new());
    let stages = standard_stages(&config);
    let mut context = RenderContext::new(device.clone(), config).expect("context");
    let orchestrator = FrameOrchestrator::initialize(&mut context, &stages, standard_shaders()).expect("orchestrator");
    (device, context, orchestrator)
}

/// Host-visible vertex buffer for `vertex_count` vertices of 32 bytes
pub fn vertex_buffer(context: &mut RenderContext, vertex_count: u32) -> render_core::resources::BufferHandle {
    context
        .factory_mut()
        .create_buffer(&BufferDesc {
            size: u64::from(vertex_count) * 32,
            usage: vk::BufferUsageFlags::VERTEX_BUFFER,
            location: MemoryLocation::HostVisible,
            initial_data: None,
        })
        .expect("vertex buffer")
}
