//! Typed, generation-checked resource handles

slotmap::new_key_type! {
    /// Buffer handle
    pub struct BufferHandle;
    /// Sampled 2D texture handle
    pub struct TextureHandle;
    /// Cube-map texture handle
    pub struct CubeMapHandle;
    /// Depth buffer handle
    pub struct DepthBufferHandle;
    /// Offscreen color render target handle
    pub struct RenderTargetHandle;
    /// Sampler handle
    pub struct SamplerHandle;
    /// Shader module handle
    pub struct ShaderModuleHandle;
    /// Render-data table layout handle
    pub struct TableLayoutHandle;
    /// Render-data table handle
    pub struct RenderDataTableHandle;
    /// Pipeline layout handle
    pub struct PipelineLayoutHandle;
    /// Render pass handle
    pub struct RenderPassHandle;
    /// Framebuffer handle
    pub struct FramebufferHandle;
    /// Graphics pipeline handle
    pub struct GraphicsPipelineHandle;
    /// Compute pipeline handle
    pub struct ComputePipelineHandle;
    /// Fence handle
    pub struct FenceHandle;
    /// Semaphore handle
    pub struct SemaphoreHandle;
    /// Event handle
    pub struct EventHandle;
    /// Query pool handle
    pub struct QueryPoolHandle;
    /// Command pool handle
    pub struct CommandPoolHandle;
}

/// Kind of resource tracked by the factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Buffers
    Buffer,
    /// 2D textures
    Texture,
    /// Cube maps
    CubeMap,
    /// Depth buffers
    DepthBuffer,
    /// Offscreen render targets
    RenderTarget,
    /// Samplers
    Sampler,
    /// Shader modules
    ShaderModule,
    /// Render-data table layouts
    TableLayout,
    /// Render-data tables
    RenderDataTable,
    /// Pipeline layouts
    PipelineLayout,
    /// Render passes
    RenderPass,
    /// Framebuffers
    Framebuffer,
    /// Graphics pipelines
    GraphicsPipeline,
    /// Compute pipelines
    ComputePipeline,
    /// Fences
    Fence,
    /// Semaphores
    Semaphore,
    /// Events
    Event,
    /// Query pools
    QueryPool,
    /// Command pools
    CommandPool,
}

impl ResourceKind {
    /// Teardown order: dependents before the objects they reference
    pub const RELEASE_ORDER: [ResourceKind; 19] = [
        Self::GraphicsPipeline,
        Self::ComputePipeline,
        Self::PipelineLayout,
        Self::Framebuffer,
        Self::RenderPass,
        Self::RenderDataTable,
        Self::TableLayout,
        Self::ShaderModule,
        Self::Sampler,
        Self::RenderTarget,
        Self::DepthBuffer,
        Self::CubeMap,
        Self::Texture,
        Self::Buffer,
        Self::QueryPool,
        Self::Event,
        Self::Semaphore,
        Self::Fence,
        Self::CommandPool,
    ];

    /// Lowercase name for logs and errors
    pub fn name(self) -> &'static str {
        match self {
            Self::Buffer => "buffer",
            Self::Texture => "texture",
            Self::CubeMap => "cube map",
            Self::DepthBuffer => "depth buffer",
            Self::RenderTarget => "render target",
            Self::Sampler => "sampler",
            Self::ShaderModule => "shader module",
            Self::TableLayout => "render-data table layout",
            Self::RenderDataTable => "render-data table",
            Self::PipelineLayout => "pipeline layout",
            Self::RenderPass => "render pass",
            Self::Framebuffer => "framebuffer",
            Self::GraphicsPipeline => "graphics pipeline",
            Self::ComputePipeline => "compute pipeline",
            Self::Fence => "fence",
            Self::Semaphore => "semaphore",
            Self::Event => "event",
            Self::QueryPool => "query pool",
            Self::CommandPool => "command pool",
        }
    }
}
