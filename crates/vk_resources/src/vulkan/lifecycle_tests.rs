//! Tests for the resource lifecycle API that need no live device

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ash::extensions::khr::Surface as SurfaceLoader;
    use ash::vk;

    use super::super::*;
    use crate::config::{Config, ResourceConfig};
    use crate::window::WindowExtentProvider;

    /// Device-dependent operations keep their expected signatures
    #[test]
    fn test_device_operations_exist() {
        let _create: fn(
            &Arc<GpuContext>,
            &SurfaceLoader,
            vk::SurfaceKHR,
            &dyn WindowExtentProvider,
            &ResourceConfig,
        ) -> VulkanResult<PresentationSurface> = PresentationSurface::create;

        let _recreate: fn(
            &mut PresentationSurface,
            &mut dyn WindowExtentProvider,
            vk::RenderPass,
        ) -> VulkanResult<()> = PresentationSurface::recreate;

        let _framebuffers: fn(&mut PresentationSurface, vk::RenderPass) -> VulkanResult<()> =
            PresentationSurface::create_framebuffers;

        let _cleanup: fn(&mut PresentationSurface) = PresentationSurface::cleanup;

        let _copy: fn(
            &TransferContext,
            &GpuBuffer,
            &GpuBuffer,
            vk::DeviceSize,
        ) -> VulkanResult<()> = TransferContext::copy_buffer;

        let _mips: fn(&mut GpuImage, &TransferContext) -> VulkanResult<()> =
            GpuImage::generate_mip_chain;

        let _texture: fn(
            &Arc<GpuContext>,
            &TransferContext,
            &[u8],
            u32,
            u32,
            &ResourceConfig,
        ) -> VulkanResult<Texture> = Texture::from_rgba8;

        let _vertices: fn(
            &Arc<GpuContext>,
            &TransferContext,
            &[[f32; 3]],
        ) -> VulkanResult<VertexBuffer> = VertexBuffer::new::<[f32; 3]>;
    }

    /// Resources may be handed to another thread once created
    #[test]
    fn test_resources_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<GpuContext>();
        assert_send_sync::<GpuBuffer>();
        assert_send_sync::<GpuImage>();
        assert_send_sync::<Framebuffer>();
    }

    /// The sample cap from config bounds what the device offers
    #[test]
    fn test_configured_sample_cap() {
        let config =
            ResourceConfig::from_str_with_format("resources.toml", "msaa_sample_cap = 4").unwrap();
        let counts = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4
            | vk::SampleCountFlags::TYPE_8;
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: counts,
            framebuffer_depth_sample_counts: counts,
            ..Default::default()
        };

        assert_eq!(
            max_usable_sample_count(&limits, config.msaa_sample_cap),
            vk::SampleCountFlags::TYPE_4
        );
        assert_eq!(
            max_usable_sample_count(&limits, ResourceConfig::default().msaa_sample_cap),
            vk::SampleCountFlags::TYPE_8
        );
    }

    /// A texture's whole upload path is legal in the layout state machine
    #[test]
    fn test_texture_upload_path_is_a_legal_layout_sequence() {
        let levels = mip_level_count(512, 512);
        let mut tracker = LayoutTracker::new(levels);

        transition_masks(ImageLayout::Undefined, ImageLayout::TransferDst).unwrap();
        tracker.set_range(0, levels, ImageLayout::TransferDst).unwrap();

        tracker.expect_range(0, 1, ImageLayout::TransferDst).unwrap();

        for command in mip_chain_commands(512, 512, levels) {
            if let MipCommand::Barrier { level, from, to } = command {
                tracker.expect_range(level, 1, from).unwrap();
                tracker.set_range(level, 1, to).unwrap();
            }
        }

        assert_eq!(tracker.mip_levels(), 10);
        assert_eq!(tracker.uniform(), Some(ImageLayout::ShaderReadOnly));
    }

    /// Two negotiations against an unchanged surface agree
    #[test]
    fn test_recreation_plan_is_stable_for_same_extent() {
        let support = SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 0,
                current_extent: vk::Extent2D { width: 1600, height: 900 },
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let families = QueueFamilies { graphics: 0, present: 0 };
        let window = vk::Extent2D { width: 1600, height: 900 };

        let plans: Vec<_> = (0..2)
            .map(|_| SwapchainPlan::negotiate(&support, window, families).unwrap())
            .collect();

        for plan in &plans {
            assert_eq!(plan.image_count, 3);
            assert_eq!(plan.surface_format.format, vk::Format::B8G8R8A8_SRGB);
            assert_eq!((plan.extent.width, plan.extent.height), (1600, 900));
        }
    }
}
