//! Key validation
//!
//! Keys are opaque text, compared byte-wise. Validation happens at every
//! facade entry point, before any side effect.

use crate::error::{Error, Result};

/// Maximum key length in bytes
pub const MAX_KEY_LEN: usize = 256;

/// Validate a key: 1..=256 bytes
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(Error::InvalidKey { len: key.len() });
    }
    Ok(())
}
