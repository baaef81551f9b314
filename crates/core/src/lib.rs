//! Shared configuration for replybot.
//!
//! The only piece of this crate the rest of the workspace depends on is
//! [`config::AppConfig`], which doubles as the credential gate: it refuses to
//! load unless both Slack tokens are present and carry the right prefix.

pub mod config;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
