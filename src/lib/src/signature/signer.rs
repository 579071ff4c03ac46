use super::KeyMaterial;
use crate::error::PSError;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::*;
use pgp::ser::Serialize;
use std::fmt;

/// A detached binary OpenPGP signature over one entry's content.
#[derive(Clone, PartialEq, Eq)]
pub struct DetachedSignature {
    bytes: Vec<u8>,
}

impl DetachedSignature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        DetachedSignature { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// The metadata attached to the signed entry.
    pub fn metadata(&self) -> SignatureMetadata {
        SignatureMetadata {
            signature_base64: self.to_base64(),
        }
    }
}

impl fmt::Debug for DetachedSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DetachedSignature {{ {} bytes }}", self.bytes.len())
    }
}

/// Per-entry signature metadata, stored as the entry's zip comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureMetadata {
    pub signature_base64: String,
}

impl SignatureMetadata {
    /// Recover the binary signature from the stored base64 text.
    pub fn decode(&self) -> Result<DetachedSignature, PSError> {
        STANDARD
            .decode(self.signature_base64.as_bytes())
            .map(DetachedSignature::from_bytes)
            .map_err(|_| PSError::InvalidArgument)
    }
}

/// Something that can produce a detached signature for an archive entry.
pub trait EntrySigner {
    /// Sign the entire `content` of the entry at `path`.
    ///
    /// `content` must be the exact bytes that will be written to the output.
    fn sign_entry(&self, path: &str, content: &[u8]) -> Result<DetachedSignature, PSError>;
}

impl EntrySigner for KeyMaterial {
    fn sign_entry(&self, path: &str, content: &[u8]) -> Result<DetachedSignature, PSError> {
        let signing_error = |reason: String| PSError::SigningError {
            path: path.to_string(),
            reason,
        };
        let signature = self
            .sign_detached(path, content)
            .map_err(|e| signing_error(e.to_string()))?;
        let bytes = signature
            .to_bytes()
            .map_err(|e| signing_error(format!("unable to serialize signature: {}", e)))?;
        trace!("Signed '{}' ({} bytes)", path, content.len());
        Ok(DetachedSignature { bytes })
    }
}

impl<T: EntrySigner + ?Sized> EntrySigner for &T {
    fn sign_entry(&self, path: &str, content: &[u8]) -> Result<DetachedSignature, PSError> {
        (**self).sign_entry(path, content)
    }
}
