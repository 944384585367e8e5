//! Vulkan session context and error types
//!
//! The instance, logical device and physical device are created by the
//! caller. [`GpuContext`] bundles the handles and the query results every
//! resource needs, and is shared through an `Arc` by all resources created in
//! one session so each of them can destroy itself without having the device
//! threaded through every call.

use std::sync::Arc;

use ash::{vk, Device, Instance};
use thiserror::Error;

use crate::vulkan::layout::ImageLayout;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// The API rejected creation of an object
    #[error("Failed to create {object}: {result:?}")]
    ObjectCreation {
        /// Kind of object being created
        object: &'static str,
        /// Result code returned by the API
        result: vk::Result,
    },

    /// Device memory allocation was rejected
    #[error("Failed to allocate {size} bytes of device memory: {result:?}")]
    MemoryAllocation {
        /// Number of bytes that were requested
        size: vk::DeviceSize,
        /// Result code returned by the API
        result: vk::Result,
    },

    /// No suitable memory type found for allocation
    #[error("No memory type in filter {type_filter:#b} has properties {properties:?}")]
    NoSuitableMemoryType {
        /// Memory type bits allowed by the object's requirements
        type_filter: u32,
        /// Property flags that were required
        properties: vk::MemoryPropertyFlags,
    },

    /// None of the candidate formats supports the required features
    #[error("No candidate format supports {features:?} with {tiling:?} tiling")]
    NoSupportedFormat {
        /// Tiling the format was queried for
        tiling: vk::ImageTiling,
        /// Feature flags that were required
        features: vk::FormatFeatureFlags,
    },

    /// The surface reported no formats at all
    #[error("Surface reported no supported formats")]
    NoSurfaceFormats,

    /// Layout transition outside the recognized set
    #[error("Unsupported layout transition: {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        /// Layout the image is leaving
        from: ImageLayout,
        /// Layout the image is entering
        to: ImageLayout,
    },

    /// An operation found a mip level in a different layout than it requires
    #[error("Mip level {level} is in {actual:?}, expected {expected:?}")]
    LayoutMismatch {
        /// Offending mip level
        level: u32,
        /// Layout the operation requires
        expected: ImageLayout,
        /// Layout the level is actually in
        actual: ImageLayout,
    },

    /// The format cannot be used as a linear-filtered blit source
    #[error("Format {format:?} does not support linear blitting")]
    BlitUnsupported {
        /// Image format that was checked
        format: vk::Format,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Graphics and presentation queue family indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Index of the graphics queue family
    pub graphics: u32,
    /// Index of the presentation queue family
    pub present: u32,
}

impl QueueFamilies {
    /// Whether graphics and presentation use different queue families
    pub const fn is_split(&self) -> bool {
        self.graphics != self.present
    }
}

/// Device handles and query results shared by all resources of a session
///
/// Does not destroy the device or instance; they belong to whoever created
/// them and must outlive every resource holding this context.
pub struct GpuContext {
    instance: Instance,
    device: Device,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue_families: QueueFamilies,
}

impl GpuContext {
    /// Capture the session's handles and cache the physical device queries
    pub fn new(
        instance: Instance,
        device: Device,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilies,
    ) -> Arc<Self> {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::debug!(
            "GpuContext created: {} memory types, graphics family {}, present family {}",
            memory_properties.memory_type_count,
            queue_families.graphics,
            queue_families.present
        );

        Arc::new(Self {
            instance,
            device,
            physical_device,
            properties,
            memory_properties,
            queue_families,
        })
    }

    /// Get the logical device
    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// Get the Vulkan instance
    pub const fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Get the physical device handle
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the device memory-type table
    pub const fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Get the device limits
    pub const fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.properties.limits
    }

    /// Get the graphics/present queue family indices
    pub const fn queue_families(&self) -> QueueFamilies {
        self.queue_families
    }

    /// Query the feature flags the device reports for a format
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// Highest sample count usable for both color and depth attachments,
    /// bounded by `cap`
    pub fn max_usable_sample_count(&self, cap: u32) -> vk::SampleCountFlags {
        max_usable_sample_count(self.limits(), cap)
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

const SAMPLE_COUNTS: [(vk::SampleCountFlags, u32); 7] = [
    (vk::SampleCountFlags::TYPE_64, 64),
    (vk::SampleCountFlags::TYPE_32, 32),
    (vk::SampleCountFlags::TYPE_16, 16),
    (vk::SampleCountFlags::TYPE_8, 8),
    (vk::SampleCountFlags::TYPE_4, 4),
    (vk::SampleCountFlags::TYPE_2, 2),
    (vk::SampleCountFlags::TYPE_1, 1),
];

/// Highest sample count present in both the framebuffer color and depth
/// limits and not above `cap`. Falls back to a single sample.
pub fn max_usable_sample_count(
    limits: &vk::PhysicalDeviceLimits,
    cap: u32,
) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;

    SAMPLE_COUNTS
        .iter()
        .find(|(flag, samples)| *samples <= cap && counts.contains(*flag))
        .map_or(vk::SampleCountFlags::TYPE_1, |(flag, _)| *flag)
}
