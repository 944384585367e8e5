//! Logging utilities and structured logging support

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system
///
/// Safe to call more than once; later calls are ignored so tests can each
/// install the logger.
pub fn init() {
    let _ = env_logger::builder().is_test(cfg!(test)).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        info!("logger installed");
    }
}
