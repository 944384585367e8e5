//! Foundation utilities shared by the resource layer

pub mod logging;
