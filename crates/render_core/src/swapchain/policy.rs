//! Swapchain parameter selection
//!
//! Pure functions over surface capabilities, kept apart from the manager so
//! every boundary case can be tested without a device.

use ash::vk;

use crate::backend::QueueFamilyIndices;
use crate::config::PresentModePreference;

/// Swap extent for a surface.
///
/// Uses the surface's current extent unless it reports the `u32::MAX` sentinel,
/// in which case `requested` is clamped into `[min_image_extent, max_image_extent]`.
pub fn choose_swap_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: requested.width.clamp(min.width, max.width.max(min.width)),
        height: requested.height.clamp(min.height, max.height.max(min.height)),
    }
}

/// Number of swapchain images to request.
///
/// `max(configured_minimum, min_image_count)`, clamped to `max_image_count`
/// unless that is 0 (no upper bound).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, configured_minimum: u32) -> u32 {
    let count = configured_minimum.max(capabilities.min_image_count);
    if capabilities.max_image_count == 0 {
        count
    } else {
        count.min(capabilities.max_image_count)
    }
}

/// Prefer B8G8R8A8_UNORM with sRGB non-linear color space, else the first format
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// Configured present mode when offered, else FIFO
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], preference: PresentModePreference) -> vk::PresentModeKHR {
    let wanted = match preference {
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    };
    if modes.contains(&wanted) {
        wanted
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Queue families that share swapchain images; empty means exclusive
pub fn sharing_families(families: QueueFamilyIndices) -> Vec<u32> {
    if families.graphics == families.present {
        Vec::new()
    } else {
        vec![families.graphics, families.present]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_respects_bounds() {
        for cap_min in 1..5 {
            for cap_max in [0, 1, 2, 3, 4, 8] {
                if cap_max != 0 && cap_max < cap_min {
                    continue;
                }
                for configured in 0..10 {
                    let count = choose_image_count(&caps(cap_min, cap_max), configured);
                    let upper = if cap_max == 0 { u32::MAX } else { cap_max };
                    assert_eq!(count, configured.max(cap_min).min(upper));
                    assert!(count >= cap_min);
                }
            }
        }
    }

    #[test]
    fn configured_minimum_above_maximum_is_clamped() {
        assert_eq!(choose_image_count(&caps(2, 3), 5), 3);
        assert_eq!(choose_image_count(&caps(2, 0), 5), 5);
    }

    #[test]
    fn extent_is_clamped_when_surface_leaves_it_open() {
        let mut capabilities = caps(2, 0);
        capabilities.min_image_extent = vk::Extent2D { width: 640, height: 480 };
        capabilities.max_image_extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        for (w, h) in [(0, 0), (800, 600), (1920, 1080), (100, 2000)] {
            let extent = choose_swap_extent(&capabilities, vk::Extent2D { width: w, height: h });
            assert!((640..=1280).contains(&extent.width));
            assert!((480..=720).contains(&extent.height));
        }
        let inside = choose_swap_extent(&capabilities, vk::Extent2D { width: 800, height: 600 });
        assert_eq!((inside.width, inside.height), (800, 600));
    }

    #[test]
    fn definite_current_extent_wins() {
        let mut capabilities = caps(2, 0);
        capabilities.current_extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        let extent = choose_swap_extent(&capabilities, vk::Extent2D { width: 1, height: 1 });
        assert_eq!((extent.width, extent.height), (1024, 768));
    }

    #[test]
    fn sentinel_surface_clamps_to_fixed_range() {
        let mut capabilities = caps(2, 0);
        let fixed = vk::Extent2D { width: 800, height: 600 };
        capabilities.min_image_extent = fixed;
        capabilities.max_image_extent = fixed;
        let extent = choose_swap_extent(&capabilities, vk::Extent2D { width: 1920, height: 1080 });
        assert_eq!((extent.width, extent.height), (800, 600));
        assert_eq!(choose_image_count(&capabilities, 3), 3);
    }

    #[test]
    fn surface_format_prefers_bgra_unorm() {
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let bgra = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let format = |formats: &[vk::SurfaceFormatKHR]| choose_surface_format(formats).map(|f| f.format);
        assert_eq!(format(&[srgb, bgra]), Some(vk::Format::B8G8R8A8_UNORM));
        assert_eq!(format(&[srgb]), Some(vk::Format::R8G8B8A8_SRGB));
        assert_eq!(format(&[]), None);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes, PresentModePreference::Mailbox), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&modes, PresentModePreference::Immediate),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn distinct_families_share_images() {
        let same = QueueFamilyIndices {
            graphics: 0,
            present: 0,
            transfer: 0,
        };
        assert!(sharing_families(same).is_empty());
        let split = QueueFamilyIndices { present: 2, ..same };
        assert_eq!(sharing_families(split), vec![0, 2]);
    }
}
