//! Payload signature verification.
//!
//! Signatures are ECDSA P-256 over the payload's SHA-256 digest, base64
//! encoded either as fixed-size `r || s` (64 bytes) or DER. The digest is
//! verified as a prehash, so a standard ECDSA-SHA256 signature of the
//! payload bytes verifies.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use tracing::debug;

use super::checksum::{file_digest, to_hex};
use super::error::{FetchError, FetchResult};
use super::progress::format_size;

/// Verifies payload signatures against a configured public key.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    key: VerifyingKey,
}

impl SignatureVerifier {
    /// Build from a base64-encoded SEC1 public key.
    pub fn from_base64(encoded: &str) -> FetchResult<Self> {
        let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
            FetchError::Configuration(format!("verification key is not valid base64: {}", e))
        })?;
        let key = VerifyingKey::from_sec1_bytes(&bytes).map_err(|e| {
            FetchError::Configuration(format!("verification key is not a P-256 key: {}", e))
        })?;
        Ok(Self { key })
    }

    /// Verify the file at `path` against a base64 signature.
    ///
    /// Every failure is an integrity error whose message carries the file
    /// size and computed digest.
    pub fn verify_file(&self, path: &Path, signature: Option<&str>) -> FetchResult<()> {
        let filename = display_name(path);
        let (digest, size) = file_digest(path)?;
        let digest_hex = to_hex(&digest);

        let fail = |what: String| FetchError::Integrity {
            filename: filename.clone(),
            reason: format!(
                "{} (size {} [{} bytes], digest {})",
                what,
                format_size(size as f64),
                size,
                digest_hex
            ),
        };

        let encoded = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| fail("payload is not signed".to_string()))?;
        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| fail(format!("signature is not valid base64: {}", e)))?;
        let signature = Signature::from_slice(&raw)
            .or_else(|_| Signature::from_der(&raw))
            .map_err(|e| fail(format!("malformed signature: {}", e)))?;

        self.key
            .verify_prehash(&digest, &signature)
            .map_err(|_| fail("signature does not match".to_string()))?;

        debug!(file = %filename, size, digest = %digest_hex, "Signature verified");
        Ok(())
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}
