//! Logging utilities

pub use log::{debug, error, info, trace, warn};

/// Initialize logging with a default filter used when `RUST_LOG` is unset
pub fn init_with_level(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}
