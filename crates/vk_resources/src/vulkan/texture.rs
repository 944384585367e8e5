//! Sampled textures
//!
//! A [`Texture`] is a device-local sRGB image with a full view and a sampler.
//! Pixel decoding happens upstream; textures are built from tightly packed
//! RGBA8 data.

use std::sync::Arc;

use ash::vk;

use crate::config::ResourceConfig;
use crate::vulkan::image::mip_level_count;
use crate::vulkan::{
    GpuBuffer, GpuContext, GpuImage, ImageDesc, ImageLayout, TransferContext, VulkanError,
    VulkanResult,
};

/// Format of every texture built from RGBA8 pixels
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Sampled image with its view and sampler
pub struct Texture {
    image: GpuImage,
    view: vk::ImageView,
    sampler: vk::Sampler,
}

impl Texture {
    /// Upload RGBA8 `pixels` into a device-local image, generate its mip
    /// chain and create a view and sampler for it.
    ///
    /// Blocks on each transfer. When anisotropic filtering is enabled in
    /// `config`, the device must have been created with the
    /// `sampler_anisotropy` feature.
    pub fn from_rgba8(
        context: &Arc<GpuContext>,
        transfer: &TransferContext,
        pixels: &[u8],
        width: u32,
        height: u32,
        config: &ResourceConfig,
    ) -> VulkanResult<Self> {
        validate_pixel_data(pixels.len(), width, height)?;

        let mip_levels = texture_mip_levels(width, height, config);
        let staging = GpuBuffer::staging_from_slice(context, pixels)?;

        let mut image = GpuImage::new(
            context,
            ImageDesc {
                width,
                height,
                mip_levels,
                samples: vk::SampleCountFlags::TYPE_1,
                format: TEXTURE_FORMAT,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::SAMPLED,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        image.transition_layout(
            transfer,
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
            mip_levels,
        )?;
        image.copy_buffer_to_image(transfer, &staging, width, height)?;
        drop(staging);

        if mip_levels > 1 {
            image.generate_mip_chain(transfer)?;
        } else {
            image.transition_layout(
                transfer,
                ImageLayout::TransferDst,
                ImageLayout::ShaderReadOnly,
                1,
            )?;
        }

        let view = image.create_view(vk::ImageAspectFlags::COLOR, mip_levels)?;
        let anisotropy = sampler_anisotropy(config, context.limits());
        let sampler = create_sampler(context.device(), anisotropy, mip_levels)?;

        log::info!(
            "Created {}x{} texture with {} mip levels (anisotropy: {:?})",
            width,
            height,
            mip_levels,
            anisotropy
        );

        Ok(Self {
            image,
            view,
            sampler,
        })
    }

    /// Get the underlying image
    pub const fn image(&self) -> &GpuImage {
        &self.image
    }

    /// Get the image view for descriptor set binding
    pub const fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Get the sampler for descriptor set binding
    pub const fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Number of mip levels
    pub const fn mip_levels(&self) -> u32 {
        self.image.mip_levels()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        // The image field drops after this, taking its view and memory with it.
        unsafe {
            self.image
                .context()
                .device()
                .destroy_sampler(self.sampler, None);
        }
    }
}

/// Levels a texture of this size gets under `config`
pub const fn texture_mip_levels(width: u32, height: u32, config: &ResourceConfig) -> u32 {
    if config.generate_mipmaps {
        mip_level_count(width, height)
    } else {
        1
    }
}

/// Maximum anisotropy for texture samplers, or `None` when disabled
pub fn sampler_anisotropy(
    config: &ResourceConfig,
    limits: &vk::PhysicalDeviceLimits,
) -> Option<f32> {
    (config.anisotropic_filtering && limits.max_sampler_anisotropy > 1.0)
        .then_some(limits.max_sampler_anisotropy)
}

fn validate_pixel_data(len: usize, width: u32, height: u32) -> VulkanResult<()> {
    let expected = u64::from(width) * u64::from(height) * 4;

    if width == 0 || height == 0 || len as u64 != expected {
        return Err(VulkanError::InvalidOperation {
            reason: format!(
                "{} bytes of pixel data for a {}x{} RGBA8 texture (expected {})",
                len, width, height, expected
            ),
        });
    }
    Ok(())
}

fn create_sampler(
    device: &ash::Device,
    anisotropy: Option<f32>,
    mip_levels: u32,
) -> VulkanResult<vk::Sampler> {
    let sampler_create_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(anisotropy.is_some())
        .max_anisotropy(anisotropy.unwrap_or(1.0))
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(mip_levels as f32);

    unsafe {
        device
            .create_sampler(&sampler_create_info, None)
            .map_err(|result| VulkanError::ObjectCreation {
                object: "sampler",
                result,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_length_must_match_extent() {
        assert!(validate_pixel_data(256 * 256 * 4, 256, 256).is_ok());
        assert!(validate_pixel_data(256 * 256 * 3, 256, 256).is_err());
        assert!(validate_pixel_data(0, 0, 0).is_err());
    }

    #[test]
    fn test_mip_levels_follow_config() {
        let mut config = ResourceConfig::default();
        assert_eq!(texture_mip_levels(512, 128, &config), 10);

        config.generate_mipmaps = false;
        assert_eq!(texture_mip_levels(512, 128, &config), 1);
    }

    #[test]
    fn test_anisotropy_uses_device_limit() {
        let limits = vk::PhysicalDeviceLimits {
            max_sampler_anisotropy: 16.0,
            ..Default::default()
        };
        let mut config = ResourceConfig::default();
        assert_eq!(sampler_anisotropy(&config, &limits), Some(16.0));

        config.anisotropic_filtering = false;
        assert_eq!(sampler_anisotropy(&config, &limits), None);

        let no_aniso = vk::PhysicalDeviceLimits {
            max_sampler_anisotropy: 1.0,
            ..Default::default()
        };
        assert_eq!(sampler_anisotropy(&ResourceConfig::default(), &no_aniso), None);
    }
}
