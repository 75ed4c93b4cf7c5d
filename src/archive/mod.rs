//! Package archive subsystem.
//!
//! Packages travel as POSIX pax archives, optionally passed through one of
//! four stream filters (gzip, bzip2, xz, zstd). The filter is chosen by the
//! caller on write and auto-detected from magic bytes on read. Metadata
//! entries (`+COMPACT_MANIFEST`, `+MANIFEST`, `+DESC`, `+DISPLAY`) lead the
//! archive in a fixed order so metadata-only readers can stop at the first
//! payload entry.

pub mod reader;
pub mod writer;

pub use reader::PackageReader;
pub use writer::{PackOptions, create_package};

use crate::error::{PkgError, Result};

/// Container/filter format of a package archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Raw pax, no filter.
    Tar,
    /// gzip filter.
    Gzip,
    /// bzip2 filter.
    Bzip2,
    /// xz filter.
    Xz,
    /// zstd filter.
    Zstd,
}

impl Default for Format {
    fn default() -> Self {
        Self::Zstd
    }
}

impl Format {
    /// Legacy file extension used for the compatibility symlink.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::Gzip => "tgz",
            Self::Bzip2 => "tbz",
            Self::Xz => "txz",
            Self::Zstd => "tzst",
        }
    }

    /// What: Detect the filter from the leading bytes of a file.
    ///
    /// Inputs:
    /// - `magic`: At least the first six bytes of the stream (shorter
    ///   slices fall back to raw tar).
    ///
    /// Output:
    /// - The detected format; raw tar when no filter signature matches.
    #[must_use]
    pub fn from_magic(magic: &[u8]) -> Self {
        if magic.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if magic.starts_with(b"BZh") {
            Self::Bzip2
        } else if magic.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Self::Xz
        } else if magic.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Self::Zstd
        } else {
            Self::Tar
        }
    }
}

/// Compression level policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    /// Per-format fastest level.
    Fast,
    /// Per-format best-known-good default.
    #[default]
    Default,
    /// Per-format strongest level.
    Best,
    /// Caller-chosen numeric level, validated against the format range.
    Explicit(i32),
}

impl Level {
    /// What: Resolve the policy to a concrete level for a format.
    ///
    /// Inputs:
    /// - `format`: Target filter.
    ///
    /// Output:
    /// - Concrete level inside the format's range (zstd 1..=19, the other
    ///   filters 1..=9).
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Config` when a level is requested for raw tar or
    /// an explicit level falls outside the format range.
    pub fn resolve(self, format: Format) -> Result<i32> {
        if format == Format::Tar {
            return match self {
                Self::Default => Ok(0),
                _ => Err(PkgError::Config(
                    "compression level is meaningless for raw tar".to_string(),
                )),
            };
        }
        let (min, max, default) = match format {
            Format::Zstd => (1, 19, 19),
            Format::Gzip | Format::Bzip2 | Format::Xz => (1, 9, 6),
            Format::Tar => unreachable!(),
        };
        match self {
            Self::Fast => Ok(min),
            Self::Best => Ok(max),
            Self::Default => Ok(default),
            Self::Explicit(level) => {
                if (min..=max).contains(&level) {
                    Ok(level)
                } else {
                    Err(PkgError::Config(format!(
                        "compression level {level} outside {min}..={max}"
                    )))
                }
            }
        }
    }
}

/// Archive entry name of the compact manifest.
pub const COMPACT_MANIFEST_NAME: &str = "+COMPACT_MANIFEST";
/// Archive entry name of the pretty manifest.
pub const MANIFEST_NAME: &str = "+MANIFEST";
/// Archive entry name of the long description.
pub const DESC_NAME: &str = "+DESC";
/// Archive entry name of the user-facing messages.
pub const DISPLAY_NAME: &str = "+DISPLAY";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_detection() {
        assert_eq!(Format::from_magic(&[0x1f, 0x8b, 0x08]), Format::Gzip);
        assert_eq!(Format::from_magic(b"BZh91AY"), Format::Bzip2);
        assert_eq!(
            Format::from_magic(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]),
            Format::Xz
        );
        assert_eq!(Format::from_magic(&[0x28, 0xb5, 0x2f, 0xfd, 0x00]), Format::Zstd);
        assert_eq!(Format::from_magic(b"ustar"), Format::Tar);
        assert_eq!(Format::from_magic(&[]), Format::Tar);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn level_resolution() {
        assert_eq!(Level::Fast.resolve(Format::Zstd).unwrap(), 1);
        assert_eq!(Level::Best.resolve(Format::Zstd).unwrap(), 19);
        assert_eq!(Level::Best.resolve(Format::Gzip).unwrap(), 9);
        assert_eq!(Level::Explicit(5).resolve(Format::Xz).unwrap(), 5);
        assert!(Level::Explicit(12).resolve(Format::Gzip).is_err());
        assert!(Level::Explicit(1).resolve(Format::Tar).is_err());
        assert!(Level::Default.resolve(Format::Tar).is_ok());
    }
}
