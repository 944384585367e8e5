//! Swapchain negotiation
//!
//! Decides the surface format, present mode, extent, image count and sharing
//! mode from what the platform surface reports. Everything here is a pure
//! function of its inputs so the same surface state always yields the same
//! plan.

use ash::extensions::khr::Surface as SurfaceLoader;
use ash::vk;

use crate::vulkan::{QueueFamilies, VulkanError, VulkanResult};

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Everything the surface reports for one physical device
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    /// Image count, extent and transform limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format/color space pairs
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Query capabilities, formats and present modes of `surface`
    pub fn query(
        surface_loader: &SurfaceLoader,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VulkanResult<Self> {
        unsafe {
            let capabilities = surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)
                .map_err(VulkanError::Api)?;
            let formats = surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
                .map_err(VulkanError::Api)?;
            let present_modes = surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)
                .map_err(VulkanError::Api)?;

            Ok(Self {
                capabilities,
                formats,
                present_modes,
            })
        }
    }
}

/// Negotiated swapchain parameters
#[derive(Debug, Clone)]
pub struct SwapchainPlan {
    /// Image format and color space
    pub surface_format: vk::SurfaceFormatKHR,
    /// Presentation mode
    pub present_mode: vk::PresentModeKHR,
    /// Image size in pixels
    pub extent: vk::Extent2D,
    /// Minimum number of images requested
    pub image_count: u32,
    /// Exclusive, or concurrent when graphics and present families differ
    pub sharing_mode: vk::SharingMode,
    /// Families sharing the images; empty when exclusive
    pub queue_family_indices: Vec<u32>,
    /// Surface transform to apply
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    /// Negotiate parameters against the surface's reported support
    pub fn negotiate(
        support: &SurfaceSupport,
        window_extent: vk::Extent2D,
        queue_families: QueueFamilies,
    ) -> VulkanResult<Self> {
        let surface_format =
            choose_surface_format(&support.formats).ok_or(VulkanError::NoSurfaceFormats)?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, window_extent);
        let image_count = choose_image_count(&support.capabilities);

        let (sharing_mode, queue_family_indices) = if queue_families.is_split() {
            (
                vk::SharingMode::CONCURRENT,
                vec![queue_families.graphics, queue_families.present],
            )
        } else {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        };

        Ok(Self {
            surface_format,
            present_mode,
            extent,
            image_count,
            sharing_mode,
            queue_family_indices,
            pre_transform: support.capabilities.current_transform,
        })
    }
}

/// Prefer 8-bit BGRA sRGB with the sRGB non-linear color space, otherwise the
/// first reported format
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| {
            sf.format == vk::Format::B8G8R8A8_SRGB
                && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Prefer mailbox wherever it appears, otherwise FIFO which is always
/// supported
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Use the surface's extent unless it reports the `u32::MAX` sentinel, in
/// which case the window's framebuffer size is clamped to the surface limits
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count.saturating_add(1);
    if capabilities.max_image_count > 0 {
        image_count.min(capabilities.max_image_count)
    } else {
        image_count
    }
}

/// Features a format offers under `tiling`
pub fn tiling_features(
    properties: &vk::FormatProperties,
    tiling: vk::ImageTiling,
) -> vk::FormatFeatureFlags {
    match tiling {
        vk::ImageTiling::LINEAR => properties.linear_tiling_features,
        vk::ImageTiling::OPTIMAL => properties.optimal_tiling_features,
        _ => vk::FormatFeatureFlags::empty(),
    }
}

/// First candidate whose features under `tiling` contain all of `features`
pub fn find_supported_format<Q>(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    query: Q,
) -> VulkanResult<vk::Format>
where
    Q: Fn(vk::Format) -> vk::FormatProperties,
{
    candidates
        .iter()
        .copied()
        .find(|&format| tiling_features(&query(format), tiling).contains(features))
        .ok_or(VulkanError::NoSupportedFormat { tiling, features })
}

/// Most precise depth format usable as an optimally tiled depth attachment
pub fn find_depth_format<Q>(query: Q) -> VulkanResult<vk::Format>
where
    Q: Fn(vk::Format) -> vk::FormatProperties,
{
    find_supported_format(
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        query,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
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
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_prefers_bgra_srgb() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_falls_back_to_first_format() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_mailbox_chosen_regardless_of_position() {
        let modes = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);

        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_fifo_without_mailbox() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_sentinel_extent_uses_window_size() {
        let chosen = choose_extent(&capabilities(2, 3), extent(1920, 1080));
        assert_eq!((chosen.width, chosen.height), (1920, 1080));
    }

    #[test]
    fn test_sentinel_extent_clamped_to_limits() {
        let chosen = choose_extent(&capabilities(2, 3), extent(5000, 8000));
        assert_eq!((chosen.width, chosen.height), (4096, 4096));

        let mut caps = capabilities(2, 3);
        caps.min_image_extent = extent(64, 64);
        let chosen = choose_extent(&caps, extent(10, 100));
        assert_eq!((chosen.width, chosen.height), (64, 100));
    }

    #[test]
    fn test_surface_extent_used_directly() {
        let mut caps = capabilities(2, 3);
        caps.current_extent = extent(800, 600);

        let chosen = choose_extent(&caps, extent(1920, 1080));
        assert_eq!((chosen.width, chosen.height), (800, 600));
    }

    #[test]
    fn test_image_count() {
        assert_eq!(choose_image_count(&capabilities(2, 8)), 3);
        assert_eq!(choose_image_count(&capabilities(3, 3)), 3);
        assert_eq!(choose_image_count(&capabilities(2, 0)), 3);
    }

    #[test]
    fn test_find_supported_format_skips_unqualified_candidate() {
        let candidates = [vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT];
        let query = |format: vk::Format| {
            if format == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatProperties {
                    optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                        | vk::FormatFeatureFlags::SAMPLED_IMAGE,
                    ..Default::default()
                }
            } else {
                vk::FormatProperties {
                    linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                    ..Default::default()
                }
            }
        };

        let format = find_supported_format(
            &candidates,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            query,
        )
        .unwrap();
        assert_eq!(format, vk::Format::D24_UNORM_S8_UINT);

        let format = find_supported_format(
            &candidates,
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            query,
        )
        .unwrap();
        assert_eq!(format, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_find_supported_format_none_qualify() {
        let result = find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| vk::FormatProperties::default(),
        );
        assert!(matches!(result, Err(VulkanError::NoSupportedFormat { .. })));
    }

    #[test]
    fn test_depth_format_prefers_precision() {
        let all_depth = |_: vk::Format| vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };
        assert_eq!(find_depth_format(all_depth).unwrap(), vk::Format::D32_SFLOAT);

        let stencil_only = |format: vk::Format| vk::FormatProperties {
            optimal_tiling_features: if format == vk::Format::D32_SFLOAT {
                vk::FormatFeatureFlags::empty()
            } else {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            },
            ..Default::default()
        };
        assert_eq!(find_depth_format(stencil_only).unwrap(), vk::Format::D32_SFLOAT_S8_UINT);
    }

    #[test]
    fn test_negotiation_against_mock_surface() {
        let support = SurfaceSupport {
            capabilities: capabilities(2, 3),
            formats: vec![
                surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                surface_format(
                    vk::Format::R16G16B16A16_SFLOAT,
                    vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
                ),
                surface_format(
                    vk::Format::A2B10G10R10_UNORM_PACK32,
                    vk::ColorSpaceKHR::SRGB_NONLINEAR,
                ),
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };

        let plan = SwapchainPlan::negotiate(
            &support,
            extent(1280, 720),
            QueueFamilies { graphics: 0, present: 0 },
        )
        .unwrap();

        assert_eq!(plan.surface_format.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(plan.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(plan.image_count, 3);
        assert_eq!((plan.extent.width, plan.extent.height), (1280, 720));
        assert_eq!(plan.sharing_mode, vk::SharingMode::EXCLUSIVE);
        assert!(plan.queue_family_indices.is_empty());
    }

    #[test]
    fn test_image_count_clamped_to_max() {
        let support = SurfaceSupport {
            capabilities: capabilities(3, 3),
            formats: vec![surface_format(
                vk::Format::B8G8R8A8_UNORM,
                vk::ColorSpaceKHR::SRGB_NONLINEAR,
            )],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };

        let families = QueueFamilies { graphics: 0, present: 0 };
        let plan = SwapchainPlan::negotiate(&support, extent(640, 480), families).unwrap();
        assert_eq!(plan.image_count, 3);
        assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_split_queue_families_share_concurrently() {
        let support = SurfaceSupport {
            capabilities: capabilities(2, 0),
            formats: vec![surface_format(
                vk::Format::B8G8R8A8_SRGB,
                vk::ColorSpaceKHR::SRGB_NONLINEAR,
            )],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };

        let families = QueueFamilies { graphics: 0, present: 2 };
        let plan = SwapchainPlan::negotiate(&support, extent(640, 480), families).unwrap();
        assert_eq!(plan.sharing_mode, vk::SharingMode::CONCURRENT);
        assert_eq!(plan.queue_family_indices, vec![0, 2]);
    }

    #[test]
    fn test_empty_format_list_is_an_error() {
        let support = SurfaceSupport {
            capabilities: capabilities(2, 3),
            formats: Vec::new(),
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };

        let families = QueueFamilies { graphics: 0, present: 0 };
        let result = SwapchainPlan::negotiate(&support, extent(640, 480), families);
        assert!(matches!(result, Err(VulkanError::NoSurfaceFormats)));
    }

    #[test]
    fn test_repeated_negotiation_is_stable() {
        let support = SurfaceSupport {
            capabilities: capabilities(2, 4),
            formats: vec![surface_format(
                vk::Format::B8G8R8A8_SRGB,
                vk::ColorSpaceKHR::SRGB_NONLINEAR,
            )],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };
        let families = QueueFamilies { graphics: 1, present: 1 };

        let first = SwapchainPlan::negotiate(&support, extent(1024, 768), families).unwrap();
        let second = SwapchainPlan::negotiate(&support, extent(1024, 768), families).unwrap();

        assert_eq!(first.image_count, second.image_count);
        assert_eq!(first.surface_format.format, second.surface_format.format);
        assert_eq!(first.surface_format.color_space, second.surface_format.color_space);
        assert_eq!(first.present_mode, second.present_mode);
        assert_eq!(
            (first.extent.width, first.extent.height),
            (second.extent.width, second.extent.height)
        );
    }
}
