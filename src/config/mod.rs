//! Configuration loading
//!
//! Information Hiding:
//! - Source layering (defaults, file, prefixed and flat environment) hidden
//! - Callers receive one immutable `Settings` value

mod settings;

pub use settings::{DatabaseConfig, LoggingConfig, ServerConfig, Settings, UpstreamConfig};
