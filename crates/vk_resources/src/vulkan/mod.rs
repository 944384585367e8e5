//! Vulkan resource layer
//!
//! Device-memory-backed buffers and images, one-shot transfers, and the
//! presentation surface. Every resource holds the shared [`GpuContext`] and
//! releases its objects when dropped.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod framebuffer;
pub mod image;
pub mod layout;
pub mod memory;
pub mod presentation;
pub mod swapchain;
pub mod texture;

mod lifecycle_tests;

pub use buffer::{GpuBuffer, IndexBuffer, VertexBuffer};
pub use commands::{ImageBarrier, OneShotCommands, TransferContext};
pub use context::{max_usable_sample_count, GpuContext, QueueFamilies, VulkanError, VulkanResult};
pub use framebuffer::Framebuffer;
pub use image::{mip_chain_commands, mip_level_count, GpuImage, ImageDesc, MipCommand};
pub use layout::{transition_masks, BarrierMasks, ImageLayout, LayoutTracker};
pub use memory::find_memory_type;
pub use presentation::{is_surface_invalidated, PresentationSurface};
pub use swapchain::{SurfaceSupport, SwapchainPlan, DEPTH_FORMAT_CANDIDATES};
pub use texture::Texture;
