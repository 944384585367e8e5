//! Device images with tracked layouts
//!
//! A [`GpuImage`] owns its image object, its memory and at most one view.
//! Dropping it destroys the view, then the image, then frees the memory.

use std::sync::Arc;

use ash::vk;

use crate::vulkan::commands::ImageBarrier;
use crate::vulkan::layout::{
    barrier_aspect, blit_barrier_masks, transition_masks, ImageLayout, LayoutTracker,
};
use crate::vulkan::memory::allocate_image;
use crate::vulkan::swapchain::tiling_features;
use crate::vulkan::{GpuBuffer, GpuContext, TransferContext, VulkanError, VulkanResult};

/// Number of levels in a full mip chain: `floor(log2(max(w, h))) + 1`
pub const fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = if width > height { width } else { height };
    if largest == 0 {
        1
    } else {
        u32::BITS - largest.leading_zeros()
    }
}

/// Parameters for creating a 2D image
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Number of mip levels
    pub mip_levels: u32,
    /// Samples per pixel
    pub samples: vk::SampleCountFlags,
    /// Pixel format
    pub format: vk::Format,
    /// Memory tiling
    pub tiling: vk::ImageTiling,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
}

/// One step of mip-chain generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MipCommand {
    /// Move one level between layouts
    Barrier {
        /// Mip level affected
        level: u32,
        /// Layout the level is leaving
        from: ImageLayout,
        /// Layout the level is entering
        to: ImageLayout,
    },
    /// Downsample `src_level` into `dst_level`
    Blit {
        /// Level read from
        src_level: u32,
        /// Size of the level read from
        src_extent: (i32, i32),
        /// Level written to
        dst_level: u32,
        /// Size of the level written to
        dst_extent: (i32, i32),
    },
}

/// Commands that build a mip chain for an image whose levels are all in
/// `TransferDst` with level 0 holding the base image.
///
/// Each source level is moved to `TransferSrc`, blitted into the next level
/// at half size (floor, minimum 1), then moved to `ShaderReadOnly` right after
/// it has been read. The last level is moved to `ShaderReadOnly` at the end.
pub fn mip_chain_commands(width: u32, height: u32, mip_levels: u32) -> Vec<MipCommand> {
    if mip_levels == 0 {
        return Vec::new();
    }

    let mut commands = Vec::with_capacity(mip_levels as usize * 3);
    let mut mip_width = i32::try_from(width).unwrap_or(i32::MAX);
    let mut mip_height = i32::try_from(height).unwrap_or(i32::MAX);

    for level in 1..mip_levels {
        let next_width = (mip_width / 2).max(1);
        let next_height = (mip_height / 2).max(1);

        commands.push(MipCommand::Barrier {
            level: level - 1,
            from: ImageLayout::TransferDst,
            to: ImageLayout::TransferSrc,
        });
        commands.push(MipCommand::Blit {
            src_level: level - 1,
            src_extent: (mip_width, mip_height),
            dst_level: level,
            dst_extent: (next_width, next_height),
        });
        commands.push(MipCommand::Barrier {
            level: level - 1,
            from: ImageLayout::TransferSrc,
            to: ImageLayout::ShaderReadOnly,
        });

        mip_width = next_width;
        mip_height = next_height;
    }

    commands.push(MipCommand::Barrier {
        level: mip_levels - 1,
        from: ImageLayout::TransferDst,
        to: ImageLayout::ShaderReadOnly,
    });

    commands
}

/// Bytes per texel for uncompressed formats this layer uploads into
pub const fn texel_size(format: vk::Format) -> Option<u64> {
    match format {
        vk::Format::R8_UNORM | vk::Format::R8_SRGB => Some(1),
        vk::Format::R8G8_UNORM | vk::Format::R8G8_SRGB => Some(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT
        | vk::Format::D32_SFLOAT => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

/// Check that a buffer of `buffer_size` bytes holds a tightly packed
/// `width`x`height` region of `format`. Formats without a known texel size
/// are not checked.
pub fn check_copy_source(
    buffer_size: vk::DeviceSize,
    format: vk::Format,
    width: u32,
    height: u32,
) -> VulkanResult<()> {
    let Some(texel) = texel_size(format) else {
        return Ok(());
    };

    let required = u64::from(width) * u64::from(height) * texel;
    if buffer_size < required {
        return Err(VulkanError::InvalidOperation {
            reason: format!(
                "buffer of {} bytes is smaller than the {} bytes a {}x{} {:?} region needs",
                buffer_size, required, width, height, format
            ),
        });
    }
    Ok(())
}

/// Check that `format` can be a linear-filtered blit source with `tiling`
pub fn check_linear_blit(
    properties: &vk::FormatProperties,
    format: vk::Format,
    tiling: vk::ImageTiling,
) -> VulkanResult<()> {
    if tiling_features(properties, tiling)
        .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    {
        Ok(())
    } else {
        Err(VulkanError::BlitUnsupported { format })
    }
}

/// Check that an image described by `desc` can have its mip chain generated.
/// A single level needs no blit, so only multi-level images are checked.
pub fn check_mip_chain_support(
    properties: &vk::FormatProperties,
    desc: &ImageDesc,
) -> VulkanResult<()> {
    if desc.mip_levels > 1 {
        check_linear_blit(properties, desc.format, desc.tiling)
    } else {
        Ok(())
    }
}

/// Device image with its memory, optional view and per-level layouts
pub struct GpuImage {
    context: Arc<GpuContext>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: Option<vk::ImageView>,
    desc: ImageDesc,
    layouts: LayoutTracker,
}

impl GpuImage {
    /// Create a 2D image backed by memory with `properties`. All levels start
    /// in `Undefined`.
    pub fn new(
        context: &Arc<GpuContext>,
        desc: ImageDesc,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "Image {}x{} with {} mip levels is empty",
                    desc.width, desc.height, desc.mip_levels
                ),
            });
        }

        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(desc.samples);

        let (image, memory) = allocate_image(context, &create_info, properties)?;

        log::trace!(
            "Created {}x{} image ({:?}, {} mips, {:?})",
            desc.width,
            desc.height,
            desc.format,
            desc.mip_levels,
            desc.samples
        );

        Ok(Self {
            context: Arc::clone(context),
            image,
            memory,
            view: None,
            desc,
            layouts: LayoutTracker::new(desc.mip_levels),
        })
    }

    /// Create the image's view over mip levels `[0, mip_levels)` and one
    /// array layer
    pub fn create_view(
        &mut self,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
    ) -> VulkanResult<vk::ImageView> {
        if self.view.is_some() {
            return Err(VulkanError::InvalidOperation {
                reason: "Image already has a view".to_string(),
            });
        }
        if mip_levels == 0 || mip_levels > self.desc.mip_levels {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "View over {} mip levels of an image with {}",
                    mip_levels, self.desc.mip_levels
                ),
            });
        }

        let view = create_image_view(
            self.context.device(),
            self.image,
            self.desc.format,
            aspect,
            mip_levels,
        )?;
        self.view = Some(view);
        Ok(view)
    }

    /// Transition levels `[0, mip_levels)` from `from` to `to`.
    ///
    /// The levels must currently be in `from`, and the pair must be one of
    /// the recognized transitions.
    pub fn transition_layout(
        &mut self,
        transfer: &TransferContext,
        from: ImageLayout,
        to: ImageLayout,
        mip_levels: u32,
    ) -> VulkanResult<()> {
        let masks = transition_masks(from, to)?;
        self.layouts.expect_range(0, mip_levels, from)?;

        let barrier = ImageBarrier {
            image: self.image,
            aspect: barrier_aspect(self.desc.format, to),
            from,
            to,
            base_mip_level: 0,
            level_count: mip_levels,
            masks,
        };
        transfer.submit_one_shot(|cmd| cmd.image_barrier(&barrier))?;

        self.layouts.set_range(0, mip_levels, to)
    }

    /// Copy tightly packed pixels from `buffer` into mip level 0, which must
    /// be in `TransferDst`
    pub fn copy_buffer_to_image(
        &self,
        transfer: &TransferContext,
        buffer: &GpuBuffer,
        width: u32,
        height: u32,
    ) -> VulkanResult<()> {
        self.layouts.expect_range(0, 1, ImageLayout::TransferDst)?;

        if width > self.desc.width || height > self.desc.height {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "copy region {}x{} exceeds image {}x{}",
                    width, height, self.desc.width, self.desc.height
                ),
            });
        }
        check_copy_source(buffer.size(), self.desc.format, width, height)?;

        transfer.submit_one_shot(|cmd| {
            cmd.copy_buffer_to_image(buffer.handle(), self.image, width, height);
        })
    }

    /// Fill levels 1.. by successive linear blits from level 0, leaving every
    /// level in `ShaderReadOnly`.
    ///
    /// All levels must be in `TransferDst`. Images with more than one level
    /// also need a format that supports linear-filtered blits with the
    /// image's tiling.
    pub fn generate_mip_chain(&mut self, transfer: &TransferContext) -> VulkanResult<()> {
        let properties = self.context.format_properties(self.desc.format);
        check_mip_chain_support(&properties, &self.desc)?;

        self.layouts
            .expect_range(0, self.desc.mip_levels, ImageLayout::TransferDst)?;

        let commands = mip_chain_commands(self.desc.width, self.desc.height, self.desc.mip_levels);

        // Resolve every barrier before recording so a bad plan fails without
        // submitting anything.
        let mut barriers = Vec::with_capacity(commands.len());
        for command in &commands {
            if let MipCommand::Barrier { level, from, to } = *command {
                barriers.push(ImageBarrier {
                    image: self.image,
                    aspect: vk::ImageAspectFlags::COLOR,
                    from,
                    to,
                    base_mip_level: level,
                    level_count: 1,
                    masks: blit_barrier_masks(from, to)?,
                });
            }
        }

        let image = self.image;
        transfer.submit_one_shot(|cmd| {
            let mut barrier_iter = barriers.iter();
            for command in &commands {
                match *command {
                    MipCommand::Barrier { .. } => {
                        if let Some(barrier) = barrier_iter.next() {
                            cmd.image_barrier(barrier);
                        }
                    }
                    MipCommand::Blit {
                        src_level,
                        src_extent,
                        dst_level,
                        dst_extent,
                    } => cmd.blit_mip_level(image, src_level, src_extent, dst_level, dst_extent),
                }
            }
        })?;

        for barrier in &barriers {
            self.layouts
                .set_range(barrier.base_mip_level, 1, barrier.to)?;
        }

        log::debug!(
            "Generated {} mip levels for {}x{} image",
            self.desc.mip_levels,
            self.desc.width,
            self.desc.height
        );
        Ok(())
    }

    /// Get the shared device context
    pub const fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    /// Get image handle
    pub const fn handle(&self) -> vk::Image {
        self.image
    }

    /// Get backing memory handle
    pub const fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Get the view, if one has been created
    pub const fn view(&self) -> Option<vk::ImageView> {
        self.view
    }

    /// Width in pixels
    pub const fn width(&self) -> u32 {
        self.desc.width
    }

    /// Height in pixels
    pub const fn height(&self) -> u32 {
        self.desc.height
    }

    /// Number of mip levels
    pub const fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }

    /// Samples per pixel
    pub const fn samples(&self) -> vk::SampleCountFlags {
        self.desc.samples
    }

    /// Pixel format
    pub const fn format(&self) -> vk::Format {
        self.desc.format
    }

    /// Current layout of one mip level
    pub fn layout(&self, level: u32) -> Option<ImageLayout> {
        self.layouts.level(level)
    }

    /// Current layouts of all mip levels
    pub const fn layouts(&self) -> &LayoutTracker {
        &self.layouts
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            if let Some(view) = self.view.take() {
                device.destroy_image_view(view, None);
            }
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Create a 2D view over levels `[0, mip_levels)` of `image`
pub(crate) fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
) -> VulkanResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe {
        device
            .create_image_view(&create_info, None)
            .map_err(|result| VulkanError::ObjectCreation {
                object: "image view",
                result,
            })
    }
}
