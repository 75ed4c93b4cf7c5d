//! SHA-256 content addressing for files, symlinks, and manifests.
//!
//! Two text forms are used throughout the crate: the full 64-hex-character
//! digest (persisted in manifests and database rows) and a 10-character
//! prefix (cache-file naming and user display).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Number of hex characters kept in the short digest form.
pub const SHORT_DIGEST_LEN: usize = 10;

/// What: Hash a byte slice with SHA-256.
///
/// Inputs:
/// - `bytes`: Raw bytes to hash.
///
/// Output:
/// - Lowercase 64-hex-character digest string.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// What: Hash the raw contents of a regular file.
///
/// Inputs:
/// - `path`: File to read.
///
/// Output:
/// - Lowercase 64-hex-character digest of the file bytes.
///
/// Details:
/// - Streams through a buffered reader in 64 KiB chunks so large payload
///   files never need to fit in memory.
///
/// # Errors
///
/// Returns `PkgError::Io` if the file cannot be opened or read.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// What: Hash a symlink by its target string.
///
/// Inputs:
/// - `target`: The link target exactly as stored in the filesystem.
///
/// Output:
/// - Lowercase 64-hex-character digest of the target bytes.
///
/// Details:
/// - Symlink entries carry the checksum of the target string, not of any
///   file the link may point at.
#[must_use]
pub fn hash_symlink_target(target: &str) -> String {
    hash_bytes(target.as_bytes())
}

/// What: Derive the short digest prefix used for cache naming and display.
///
/// Inputs:
/// - `digest`: A full 64-hex-character digest.
///
/// Output:
/// - The first ten characters, or the whole string when shorter.
#[must_use]
pub fn short_digest(digest: &str) -> &str {
    if digest.len() > SHORT_DIGEST_LEN {
        &digest[..SHORT_DIGEST_LEN]
    } else {
        digest
    }
}

/// What: Validate that a string is a well-formed full digest.
///
/// Inputs:
/// - `digest`: Candidate digest string.
///
/// Output:
/// - `true` when the string is exactly 64 lowercase hex characters.
#[must_use]
pub fn is_valid_digest(digest: &str) -> bool {
    digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_bytes_known_vector() {
        // SHA-256 of the empty string
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn hash_file_matches_hash_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"hello package").unwrap();
        drop(f);
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"hello package"));
    }

    #[test]
    fn short_digest_takes_ten_chars() {
        let full = hash_bytes(b"abc");
        assert_eq!(short_digest(&full), "ba7816bf8f");
        assert_eq!(short_digest("ab"), "ab");
    }

    #[test]
    fn symlink_hash_uses_target_string() {
        assert_eq!(hash_symlink_target("abc"), hash_bytes(b"abc"));
    }

    #[test]
    fn digest_validation() {
        assert!(is_valid_digest(&hash_bytes(b"x")));
        assert!(!is_valid_digest("zz"));
        assert!(!is_valid_digest(&hash_bytes(b"x").to_uppercase()));
    }
}
