//! FlashKV Common - Shared types and utilities
//!
//! This crate provides configuration, error definitions, and key validation
//! used across all FlashKV components.

pub mod config;
pub mod error;
pub mod key;

pub use config::{Config, EngineConfig, ServerConfig};
pub use error::{Error, Result};
pub use key::{MAX_KEY_LEN, validate_key};

/// The value type stored by the engine.
///
/// Values are opaque to the engine and self-describing on disk: null,
/// booleans, integers, floats, text, sequences and string-keyed mappings.
pub type Value = serde_json::Value;
