//! Tunables for GPU resource creation
//!
//! These only bound or toggle quality features. Surface format, present mode
//! and extent negotiation are not configurable.

use serde::{Deserialize, Serialize};

use super::Config;

/// Resource creation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Upper bound on the multisample count used for swapchain attachments.
    /// The device maximum is used when it is lower.
    pub msaa_sample_cap: u32,

    /// Use the device's maximum sampler anisotropy for textures
    pub anisotropic_filtering: bool,

    /// Generate a full mip chain for textures
    pub generate_mipmaps: bool,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            msaa_sample_cap: 64,
            anisotropic_filtering: true,
            generate_mipmaps: true,
        }
    }
}

impl Config for ResourceConfig {}
