//! # Vulkan Resources
//!
//! The GPU-resident resource lifecycle layer of a Vulkan renderer.
//!
//! ## Features
//!
//! - **Presentation**: swapchain negotiation, per-image views, multisampled
//!   color/depth attachments, framebuffers and resize-driven recreation
//! - **Memory**: buffer and image allocation with explicit memory-type selection
//! - **Transfers**: one-shot command buffers for staged uploads, layout
//!   transitions and mip-chain generation
//! - **Assets**: textures, vertex buffers and index buffers built on the above
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vk_resources::prelude::*;
//!
//! fn upload(
//!     context: &Arc<GpuContext>,
//!     transfer: &TransferContext,
//!     pixels: &[u8],
//! ) -> VulkanResult<Texture> {
//!     let config = ResourceConfig::default();
//!     Texture::from_rgba8(context, transfer, pixels, 256, 256, &config)
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod vulkan;
pub mod window;

/// Common imports for renderer code
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, ResourceConfig},
        vulkan::{
            GpuBuffer, GpuContext, GpuImage, ImageDesc, ImageLayout, IndexBuffer,
            PresentationSurface, QueueFamilies, Texture, TransferContext, VertexBuffer,
            VulkanError, VulkanResult,
        },
        window::WindowExtentProvider,
    };
}
