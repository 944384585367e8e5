//! Framebuffer management
//!
//! Handles framebuffer creation and destruction following RAII principles

use std::sync::Arc;

use ash::vk;

use crate::vulkan::{GpuContext, VulkanError, VulkanResult};

/// Framebuffer wrapper with RAII cleanup
pub struct Framebuffer {
    context: Arc<GpuContext>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Create a single-layer framebuffer binding `attachments` in order
    pub fn new(
        context: &Arc<GpuContext>,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let framebuffer_create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe {
            context
                .device()
                .create_framebuffer(&framebuffer_create_info, None)
                .map_err(|result| VulkanError::ObjectCreation {
                    object: "framebuffer",
                    result,
                })?
        };

        Ok(Self {
            context: Arc::clone(context),
            framebuffer,
            extent,
        })
    }

    /// Get the framebuffer handle
    pub const fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Size the framebuffer was created with
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.context
                .device()
                .destroy_framebuffer(self.framebuffer, None);
        }
    }
}
