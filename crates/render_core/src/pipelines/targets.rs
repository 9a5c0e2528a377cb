//! Render target identifiers and their allocations

use std::collections::BTreeMap;
use std::fmt;

use ash::vk;

use crate::backend::{VulkanError, VulkanResult};
use crate::commands::ImageClear;
use crate::resources::{DepthBufferHandle, RenderDataTableBinding, RenderTargetHandle, ResourceFactory, SamplerHandle};

/// Logical render target written or read by pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderTargetId {
    /// Current swapchain image
    Swapchain,
    /// Scene color from geometry passes
    Scene,
    /// Scene depth and stencil
    SceneDepth,
    /// Shadow-map depth for one slot
    ShadowMap(u8),
    /// Lit scene before denoising
    Lighting,
    /// Output of the horizontal denoise pass
    DenoisingIntermediate,
    /// Output of the vertical denoise pass
    SceneDenoised,
}

impl RenderTargetId {
    /// Whether the target is a depth attachment
    pub fn is_depth(self) -> bool {
        matches!(self, Self::SceneDepth | Self::ShadowMap(_))
    }

    /// Format of offscreen targets; `None` for the swapchain
    pub fn format(self) -> Option<vk::Format> {
        match self {
            Self::Swapchain => None,
            Self::SceneDepth => Some(vk::Format::D32_SFLOAT_S8_UINT),
            Self::ShadowMap(_) => Some(vk::Format::D32_SFLOAT),
            Self::Scene | Self::Lighting | Self::DenoisingIntermediate | Self::SceneDenoised => {
                Some(vk::Format::R16G16B16A16_SFLOAT)
            }
        }
    }

    /// Value the target is cleared to: opaque black, or far depth with zero stencil
    pub fn clear_value(self) -> ImageClear {
        if self.is_depth() {
            ImageClear::DepthStencil { depth: 1.0, stencil: 0 }
        } else {
            ImageClear::Color([0.0, 0.0, 0.0, 1.0])
        }
    }

    /// Layout the target rests in between passes
    pub fn resting_layout(self) -> vk::ImageLayout {
        match self {
            Self::Swapchain => vk::ImageLayout::PRESENT_SRC_KHR,
            id if id.is_depth() => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            _ => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

impl fmt::Display for RenderTargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShadowMap(slot) => write!(f, "shadow_map_{slot}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Size a pipeline renders at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Follows the swapchain extent
    Swapchain,
    /// Fixed size, e.g. shadow maps
    Fixed {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
    },
}

impl Resolution {
    /// Concrete extent given the swapchain extent
    pub fn extent(self, swapchain: vk::Extent2D) -> vk::Extent2D {
        match self {
            Self::Swapchain => swapchain,
            Self::Fixed { width, height } => vk::Extent2D { width, height },
        }
    }
}

/// Factory allocation backing an offscreen target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAllocation {
    /// Color render target
    Color(RenderTargetHandle),
    /// Depth buffer
    Depth(DepthBufferHandle),
}

/// Offscreen targets by id
#[derive(Debug, Default)]
pub struct RenderTargetRegistry {
    targets: BTreeMap<RenderTargetId, (TargetAllocation, Resolution)>,
}

impl RenderTargetRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `id` at `resolution` unless it already exists
    pub fn allocate(
        &mut self,
        factory: &mut ResourceFactory,
        id: RenderTargetId,
        resolution: Resolution,
        swapchain_extent: vk::Extent2D,
    ) -> VulkanResult<TargetAllocation> {
        if let Some((allocation, _)) = self.targets.get(&id) {
            return Ok(*allocation);
        }
        let format = id
            .format()
            .ok_or_else(|| VulkanError::invalid("the swapchain is not an offscreen target"))?;
        let extent = resolution.extent(swapchain_extent);
        let allocation = if id.is_depth() {
            TargetAllocation::Depth(factory.create_depth_buffer(extent, format)?)
        } else {
            TargetAllocation::Color(factory.create_render_target(extent, format)?)
        };
        log::debug!("Allocated target {} at {}x{}", id, extent.width, extent.height);
        self.targets.insert(id, (allocation, resolution));
        Ok(allocation)
    }

    /// Allocation of a target
    pub fn get(&self, id: RenderTargetId) -> Option<TargetAllocation> {
        self.targets.get(&id).map(|(allocation, _)| *allocation)
    }

    /// Registered ids in order
    pub fn ids(&self) -> impl Iterator<Item = RenderTargetId> + '_ {
        self.targets.keys().copied()
    }

    /// Number of registered targets
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether no target is registered
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Attachment view of a target
    pub fn view(&self, factory: &ResourceFactory, id: RenderTargetId) -> VulkanResult<vk::ImageView> {
        Ok(match self.require(id)? {
            TargetAllocation::Color(handle) => factory.render_target(handle)?.view,
            TargetAllocation::Depth(handle) => factory.depth_buffer(handle)?.view,
        })
    }

    /// Raw image of a target
    pub fn image(&self, factory: &ResourceFactory, id: RenderTargetId) -> VulkanResult<vk::Image> {
        Ok(match self.require(id)? {
            TargetAllocation::Color(handle) => factory.render_target(handle)?.raw,
            TargetAllocation::Depth(handle) => factory.depth_buffer(handle)?.raw,
        })
    }

    /// Table binding sampling a target
    pub fn sampled_binding(
        &self,
        id: RenderTargetId,
        binding: u32,
        sampler: SamplerHandle,
    ) -> VulkanResult<RenderDataTableBinding> {
        Ok(match self.require(id)? {
            TargetAllocation::Color(target) => RenderDataTableBinding::RenderTarget {
                binding,
                target,
                sampler,
            },
            TargetAllocation::Depth(depth) => RenderDataTableBinding::DepthBuffer {
                binding,
                depth,
                sampler,
            },
        })
    }

    /// Destroy and reallocate every target that follows the swapchain extent,
    /// returning the reallocated ids
    pub fn resize(
        &mut self,
        factory: &mut ResourceFactory,
        swapchain_extent: vk::Extent2D,
    ) -> VulkanResult<Vec<RenderTargetId>> {
        let resized: Vec<RenderTargetId> = self
            .targets
            .iter()
            .filter(|(_, (_, resolution))| *resolution == Resolution::Swapchain)
            .map(|(id, _)| *id)
            .collect();
        for &id in &resized {
            if let Some((allocation, resolution)) = self.targets.remove(&id) {
                destroy(factory, allocation)?;
                self.allocate(factory, id, resolution, swapchain_extent)?;
            }
        }
        Ok(resized)
    }

    /// Destroy every target
    pub fn release(&mut self, factory: &mut ResourceFactory) -> VulkanResult<()> {
        for (_, (allocation, _)) in std::mem::take(&mut self.targets) {
            destroy(factory, allocation)?;
        }
        Ok(())
    }

    fn require(&self, id: RenderTargetId) -> VulkanResult<TargetAllocation> {
        self.get(id)
            .ok_or_else(|| VulkanError::not_found("render target", id))
    }
}

fn destroy(factory: &mut ResourceFactory, allocation: TargetAllocation) -> VulkanResult<()> {
    match allocation {
        TargetAllocation::Color(handle) => factory.destroy_render_target(handle),
        TargetAllocation::Depth(handle) => factory.destroy_depth_buffer(handle),
    }
}
