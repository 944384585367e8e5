//! Image layout state machine
//!
//! Every [`GpuImage`](crate::vulkan::GpuImage) records the layout of each of
//! its mip levels. Layouts change only through recognized transitions, and
//! operations that depend on a layout check it instead of trusting the
//! caller.

use ash::vk;

use crate::vulkan::{VulkanError, VulkanResult};

/// Layouts an image moves through in this layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    /// Contents undefined, as created
    Undefined,
    /// Destination of copies and blits
    TransferDst,
    /// Source of blits during mip generation
    TransferSrc,
    /// Sampled from shaders
    ShaderReadOnly,
    /// Bound as a depth/stencil attachment
    DepthAttachment,
    /// Bound as a color attachment
    ColorAttachment,
}

impl ImageLayout {
    /// The matching Vulkan layout
    pub const fn to_vk(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Self::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::DepthAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Self::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }
    }
}

/// Access masks and pipeline stages for one layout barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierMasks {
    /// Accesses that must complete before the transition
    pub src_access: vk::AccessFlags,
    /// Accesses that wait for the transition
    pub dst_access: vk::AccessFlags,
    /// Stage the barrier waits on
    pub src_stage: vk::PipelineStageFlags,
    /// Stage that waits on the barrier
    pub dst_stage: vk::PipelineStageFlags,
}

/// Masks for a caller-requested layout transition.
///
/// Only three transitions are recognized: `Undefined -> TransferDst`,
/// `TransferDst -> ShaderReadOnly` and `Undefined -> DepthAttachment`.
/// Anything else is a programming error.
pub fn transition_masks(from: ImageLayout, to: ImageLayout) -> VulkanResult<BarrierMasks> {
    use ImageLayout::{DepthAttachment, ShaderReadOnly, TransferDst, Undefined};

    match (from, to) {
        (Undefined, TransferDst) => Ok(BarrierMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (TransferDst, ShaderReadOnly) => Ok(BarrierMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        (Undefined, DepthAttachment) => Ok(BarrierMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        }),
        _ => Err(VulkanError::UnsupportedLayoutTransition { from, to }),
    }
}

/// Masks for the barriers recorded while generating a mip chain. Adds the
/// blit-source hops to the caller-visible set.
pub(crate) fn blit_barrier_masks(from: ImageLayout, to: ImageLayout) -> VulkanResult<BarrierMasks> {
    use ImageLayout::{ShaderReadOnly, TransferDst, TransferSrc};

    match (from, to) {
        (TransferDst, TransferSrc) => Ok(BarrierMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::TRANSFER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (TransferSrc, ShaderReadOnly) => Ok(BarrierMasks {
            src_access: vk::AccessFlags::TRANSFER_READ,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }),
        _ => transition_masks(from, to),
    }
}

/// Whether a depth format also carries a stencil component
pub const fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
    )
}

/// Aspect a barrier into `layout` must cover for an image of `format`
pub fn barrier_aspect(format: vk::Format, layout: ImageLayout) -> vk::ImageAspectFlags {
    if layout == ImageLayout::DepthAttachment {
        if has_stencil_component(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Per-mip-level layout record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutTracker {
    levels: Vec<ImageLayout>,
}

impl LayoutTracker {
    /// Track `mip_levels` levels, all starting `Undefined`
    pub fn new(mip_levels: u32) -> Self {
        Self {
            levels: vec![ImageLayout::Undefined; mip_levels as usize],
        }
    }

    /// Number of tracked mip levels
    pub fn mip_levels(&self) -> u32 {
        u32::try_from(self.levels.len()).unwrap_or(u32::MAX)
    }

    /// Layout of one mip level
    pub fn level(&self, level: u32) -> Option<ImageLayout> {
        self.levels.get(level as usize).copied()
    }

    /// All levels' layouts, base level first
    pub fn levels(&self) -> &[ImageLayout] {
        &self.levels
    }

    /// The layout shared by every level, if they agree
    pub fn uniform(&self) -> Option<ImageLayout> {
        let first = *self.levels.first()?;
        self.levels.iter().all(|&l| l == first).then_some(first)
    }

    /// Check that levels `[base, base + count)` are all in `expected`
    pub fn expect_range(&self, base: u32, count: u32, expected: ImageLayout) -> VulkanResult<()> {
        self.check_range(base, count)?;
        for level in base..base + count {
            let actual = self.levels[level as usize];
            if actual != expected {
                return Err(VulkanError::LayoutMismatch {
                    level,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Record that levels `[base, base + count)` are now in `layout`
    pub fn set_range(&mut self, base: u32, count: u32, layout: ImageLayout) -> VulkanResult<()> {
        self.check_range(base, count)?;
        for slot in &mut self.levels[base as usize..(base + count) as usize] {
            *slot = layout;
        }
        Ok(())
    }

    fn check_range(&self, base: u32, count: u32) -> VulkanResult<()> {
        let end = base.checked_add(count);
        if count == 0 || end.map_or(true, |end| end > self.mip_levels()) {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "mip range {}..+{} outside image with {} levels",
                    base,
                    count,
                    self.mip_levels()
                ),
            });
        }
        Ok(())
    }
}
