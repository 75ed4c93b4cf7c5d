//! Repository descriptor signature verification.
//!
//! Three trust modes exist per repository. `none` skips verification.
//! `pubkey` verifies an ed25519 signature over the catalogue digest against
//! one PEM-encoded public key on disk. `fingerprint` trusts any embedded
//! key whose SHA-256 fingerprint appears in the trusted directory and not
//! in the revoked directory, then verifies the signature with that key.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::checksum::hash_bytes;
use crate::error::{PkgError, Result};

/// Signature policy of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignatureMode {
    /// No verification.
    #[default]
    None,
    /// Single PEM-encoded public key.
    Pubkey {
        /// Path of the PEM file.
        pubkey: PathBuf,
    },
    /// Trusted/revoked fingerprint directories.
    Fingerprint {
        /// Directory of files naming trusted SHA-256 key fingerprints.
        trusted: PathBuf,
        /// Directory of files naming revoked fingerprints.
        revoked: PathBuf,
    },
}

/// Signature material carried by a repository descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DescriptorSignature {
    /// Base64 ed25519 signature over the hex catalogue digest.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    /// Base64 raw 32-byte public key; fingerprint mode only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pubkey: String,
}

/// What: Decode a PEM-wrapped ed25519 public key.
///
/// Inputs:
/// - `pem`: `-----BEGIN PUBLIC KEY-----` wrapped base64 text, or bare
///   base64.
///
/// Output:
/// - The verifying key.
///
/// # Errors
///
/// Returns `PkgError::Corrupt` for malformed encodings or wrong key size.
fn decode_pem_key(pem: &str) -> Result<VerifyingKey> {
    let body: String = pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let raw = BASE64
        .decode(body.trim())
        .map_err(|e| PkgError::Corrupt(format!("public key: bad base64: {e}")))?;
    key_from_raw(&raw)
}

fn key_from_raw(raw: &[u8]) -> Result<VerifyingKey> {
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| PkgError::Corrupt(format!("public key: {} bytes, want 32", raw.len())))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| PkgError::Corrupt(format!("public key: {e}")))
}

fn decode_signature(b64: &str) -> Result<Signature> {
    let raw = BASE64
        .decode(b64.trim())
        .map_err(|e| PkgError::Corrupt(format!("signature: bad base64: {e}")))?;
    Signature::from_slice(&raw).map_err(|e| PkgError::Corrupt(format!("signature: {e}")))
}

/// What: Collect the fingerprints listed under a directory.
///
/// Inputs:
/// - `dir`: Directory of text files, one or more hex fingerprints per
///   file, one per line.
///
/// Output:
/// - Lowercased fingerprints; an absent directory yields the empty set.
///
/// # Errors
///
/// Returns `PkgError::Io` when the directory exists but cannot be read.
fn load_fingerprints(dir: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let content = fs::read_to_string(entry.path())?;
        for line in content.lines() {
            let line = line.trim();
            if !line.is_empty() && !line.starts_with('#') {
                out.push(line.to_ascii_lowercase());
            }
        }
    }
    Ok(out)
}

/// What: Verify a catalogue digest signature per repository policy.
///
/// Inputs:
/// - `mode`: Repository signature mode.
/// - `digest`: Hex catalogue digest the signature covers.
/// - `material`: Signature material from the descriptor.
///
/// Output:
/// - Unit when the policy is satisfied.
///
/// Details:
/// - Fingerprint mode hashes the embedded raw key; the fingerprint must be
///   listed as trusted and not revoked before the signature is checked.
///
/// # Errors
///
/// Returns `PkgError::Corrupt` for every verification failure; corrupt
/// data is never retried.
pub fn verify(mode: &SignatureMode, digest: &str, material: &DescriptorSignature) -> Result<()> {
    match mode {
        SignatureMode::None => Ok(()),
        SignatureMode::Pubkey { pubkey } => {
            let pem = fs::read_to_string(pubkey)?;
            let key = decode_pem_key(&pem)?;
            let signature = decode_signature(&material.signature)?;
            key.verify(digest.as_bytes(), &signature)
                .map_err(|_| PkgError::Corrupt("catalogue signature rejected".to_string()))
        }
        SignatureMode::Fingerprint { trusted, revoked } => {
            if material.pubkey.is_empty() {
                return Err(PkgError::Corrupt(
                    "descriptor carries no public key".to_string(),
                ));
            }
            let raw = BASE64
                .decode(material.pubkey.trim())
                .map_err(|e| PkgError::Corrupt(format!("embedded key: bad base64: {e}")))?;
            let fingerprint = hash_bytes(&raw);
            let trusted = load_fingerprints(trusted)?;
            let revoked = load_fingerprints(revoked)?;
            if revoked.contains(&fingerprint) {
                return Err(PkgError::Corrupt(format!(
                    "signing key fingerprint {fingerprint} is revoked"
                )));
            }
            if !trusted.contains(&fingerprint) {
                return Err(PkgError::Corrupt(format!(
                    "signing key fingerprint {fingerprint} is not trusted"
                )));
            }
            let key = key_from_raw(&raw)?;
            let signature = decode_signature(&material.signature)?;
            key.verify(digest.as_bytes(), &signature)
                .map_err(|_| PkgError::Corrupt("catalogue signature rejected".to_string()))
        }
    }
}
