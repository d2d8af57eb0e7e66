//! # Key/Value Type Definitions
//!
//! Validated keys and CAS-tagged values shared by the client and the
//! reference node.
//!
//! ## Design Principles
//!
//! 1. **Validate Once**: Keys are checked when built, so encoders can copy
//!    them onto the wire without further checks.
//! 2. **Text-Safe**: Keys never contain whitespace or control bytes, which
//!    keeps them usable on both the binary and the text protocol.
//! 3. **Cheap Clones**: Keys and values are `Bytes`, so replaying a frame or
//!    handing a value to a caller never copies the payload.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::KeyError;

/// Maximum key size in bytes.
pub const MAX_KEY_SIZE: usize = 250;

/// Relative expirations above this many seconds are absolute unix times.
pub const RELATIVE_EXPIRY_LIMIT: u32 = 60 * 60 * 24 * 30;

/// Cache key validated for wire use.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key(Bytes);

impl Key {
    /// Creates a key from raw bytes.
    ///
    /// # Errors
    /// Returns `KeyError` if the key is empty, longer than `MAX_KEY_SIZE`, or
    /// contains whitespace/control bytes.
    ///
    /// # Examples
    /// ```rust
    /// use memtls_common::{Key, KeyError};
    ///
    /// let key = Key::new(b"alpha").expect("valid key");
    /// assert_eq!(key.as_bytes(), b"alpha");
    /// assert_eq!(Key::new(b"with space"), Err(KeyError::InvalidByte));
    /// ```
    pub fn new(data: &[u8]) -> Result<Self, KeyError> {
        if data.is_empty() {
            return Err(KeyError::Empty);
        }
        if data.len() > MAX_KEY_SIZE {
            return Err(KeyError::TooLong);
        }
        if data.iter().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
            return Err(KeyError::InvalidByte);
        }
        Ok(Key(Bytes::copy_from_slice(data)))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Value returned together with its CAS token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasValue {
    pub cas: u64,
    pub value: Bytes,
}

/// Converts a protocol expiration into a time-to-live.
///
/// `0` means no expiry; values up to 30 days are relative seconds; larger
/// values are absolute unix timestamps (already-past timestamps yield
/// `Some(Duration::ZERO)`, i.e. expired on arrival).
pub fn expiry_to_ttl(exptime: u32) -> Option<Duration> {
    if exptime == 0 {
        return None;
    }
    if exptime <= RELATIVE_EXPIRY_LIMIT {
        return Some(Duration::from_secs(exptime as u64));
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    let deadline = Duration::from_secs(exptime as u64);
    Some(deadline.saturating_sub(now))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_keys() {
        assert_eq!(Key::new(b""), Err(KeyError::Empty));
        assert_eq!(Key::new(&[b'a'; MAX_KEY_SIZE + 1]), Err(KeyError::TooLong));
        assert_eq!(Key::new(b"key\n"), Err(KeyError::InvalidByte));
        assert!(Key::new(&[b'a'; MAX_KEY_SIZE]).is_ok());
    }

    #[test]
    fn expiry_conversion() {
        assert_eq!(expiry_to_ttl(0), None);
        assert_eq!(expiry_to_ttl(60), Some(Duration::from_secs(60)));
        // An absolute timestamp in 1970 is already in the past.
        assert_eq!(expiry_to_ttl(RELATIVE_EXPIRY_LIMIT + 1), Some(Duration::ZERO));
    }
}
