//! Request fingerprints.
//!
//! A [`Fingerprint`] identifies logically identical completion requests. It
//! keys both the response cache and the in-flight registry, so two requests
//! that would produce the same API body always collide, and two that differ
//! in any field never do (short of a digest collision, which is accepted as
//! identity).
//!
//! The request is first lowered to a `serde_json::Value`. Object keys in a
//! `serde_json::Map` are kept sorted, so the compact serialization is
//! canonical regardless of struct field order or how a caller assembled the
//! JSON. The canonical bytes are hashed with SHA-256 and truncated to 128
//! bits, which is stable across processes and platforms.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{CompletionRequest, MuninnError, Result};

/// 128-bit request digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// Fingerprint a completion request.
    pub fn of(request: &CompletionRequest) -> Result<Self> {
        Self::of_value(request)
    }

    /// Fingerprint any serializable value via its canonical JSON form.
    ///
    /// Values with no JSON form (e.g. maps with non-string keys) are
    /// rejected with [`MuninnError::InvalidInput`].
    pub fn of_value<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let canonical = serde_json::to_value(value).map_err(|e| {
            MuninnError::InvalidInput(format!("value has no canonical JSON form: {e}"))
        })?;
        Ok(Self::of_bytes(canonical.to_string().as_bytes()))
    }

    fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// First 16 hex characters, for log lines.
    pub fn short(&self) -> String {
        self.to_string()[..16].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}
