//! Package archive reading.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use xz2::read::XzDecoder;

use super::{COMPACT_MANIFEST_NAME, Format, MANIFEST_NAME};
use crate::error::{PkgError, Result};
use crate::manifest::{self, ParsedManifest};

/// Reader over a package archive with filter auto-detection.
#[derive(Debug)]
pub struct PackageReader {
    path: PathBuf,
    format: Format,
}

/// Boxed read stream after filter decoding.
type DecodedStream = Box<dyn Read>;

impl PackageReader {
    /// What: Open an archive and detect its filter from magic bytes.
    ///
    /// Inputs:
    /// - `path`: Archive file.
    ///
    /// Output:
    /// - A reader remembering the detected format.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Io` when the file cannot be opened or read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = File::open(&path)?;
        let mut magic = [0u8; 6];
        let n = file.read(&mut magic)?;
        let format = Format::from_magic(&magic[..n]);
        tracing::debug!(path = %path.display(), format = ?format, "opened package archive");
        Ok(Self { path, format })
    }

    /// Detected filter format.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Open a fresh decoded stream positioned at the first tar block.
    fn stream(&self) -> Result<tar::Archive<DecodedStream>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(0))?;
        let buffered = BufReader::new(file);
        let decoded: DecodedStream = match self.format {
            Format::Tar => Box::new(buffered),
            Format::Gzip => Box::new(GzDecoder::new(buffered)),
            Format::Bzip2 => Box::new(BzDecoder::new(buffered)),
            Format::Xz => Box::new(XzDecoder::new(buffered)),
            Format::Zstd => Box::new(zstd::stream::read::Decoder::new(buffered)?),
        };
        Ok(tar::Archive::new(decoded))
    }

    /// What: Read the manifest without touching payload entries.
    ///
    /// Inputs: None
    ///
    /// Output:
    /// - The parsed manifest (compact form preferred, pretty as fallback).
    ///
    /// Details:
    /// - Iteration stops at the first entry whose name does not start with
    ///   `+`; a well-formed archive places all metadata before any payload.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Corrupt` when no manifest entry precedes the
    /// payload, or any parse error from the manifest codec.
    pub fn read_manifest(&self) -> Result<ParsedManifest> {
        let mut archive = self.stream()?;
        let mut fallback: Option<String> = None;
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();
            if !name.starts_with('+') {
                break;
            }
            if name == COMPACT_MANIFEST_NAME || name == MANIFEST_NAME {
                let mut text = String::new();
                entry.read_to_string(&mut text)?;
                if name == COMPACT_MANIFEST_NAME {
                    return manifest::parse(&text);
                }
                fallback = Some(text);
            }
        }
        match fallback {
            Some(text) => manifest::parse(&text),
            None => Err(PkgError::Corrupt(format!(
                "{}: no manifest before payload",
                self.path.display()
            ))),
        }
    }

    /// What: Unpack payload entries under a destination root.
    ///
    /// Inputs:
    /// - `dest`: Directory receiving the repository-relative payload tree.
    ///
    /// Output:
    /// - Number of payload entries written.
    ///
    /// Details:
    /// - Metadata (`+…`) entries are skipped.
    /// - Entries are unpacked with `unpack_in`, which rejects path
    ///   traversal outside `dest`.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Io` for extraction failures and
    /// `PkgError::Corrupt` when an entry refuses to stay under `dest`.
    pub fn unpack_payload(&self, dest: &Path) -> Result<usize> {
        let mut archive = self.stream()?;
        let mut count = 0usize;
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();
            if name.starts_with('+') {
                continue;
            }
            if !entry.unpack_in(dest)? {
                return Err(PkgError::Corrupt(format!(
                    "{name}: refuses to unpack outside destination"
                )));
            }
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::writer::{PackOptions, create_package};
    use crate::types::{FileEntry, FileType, Package};
    use std::io::Write as _;

    #[allow(clippy::unwrap_used)]
    fn packed_sample(dir: &Path, format: Format) -> PathBuf {
        let mut pkg = Package::new("sample", "2.1");
        pkg.desc = "sample".to_string();
        std::fs::create_dir_all(dir.join("usr/local/share")).unwrap();
        let mut f = File::create(dir.join("usr/local/share/data.txt")).unwrap();
        f.write_all(b"payload bytes").unwrap();
        pkg.add_file(FileEntry {
            path: "/usr/local/share/data.txt".to_string(),
            sum: String::new(),
            uname: "root".to_string(),
            gname: "wheel".to_string(),
            perm: 0o644,
            fflags: 0,
            kind: FileType::Regular,
            link_target: None,
            config: false,
        })
        .unwrap();
        let opts = PackOptions {
            format,
            overwrite: true,
            ..PackOptions::default()
        };
        create_package(&pkg, dir, dir, &opts).unwrap()
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn metadata_read_stops_before_payload() {
        let dir = tempfile::tempdir().unwrap();
        for format in [Format::Tar, Format::Gzip, Format::Zstd] {
            let path = packed_sample(dir.path(), format);
            let reader = PackageReader::open(&path).unwrap();
            assert_eq!(reader.format(), format);
            let parsed = reader.read_manifest().unwrap();
            assert_eq!(parsed.package.name, "sample");
            assert_eq!(parsed.package.version, "2.1");
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn payload_unpacks_under_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = packed_sample(dir.path(), Format::Xz);
        let out = tempfile::tempdir().unwrap();
        let reader = PackageReader::open(&path).unwrap();
        let count = reader.unpack_payload(out.path()).unwrap();
        assert_eq!(count, 1);
        let data = std::fs::read_to_string(out.path().join("usr/local/share/data.txt")).unwrap();
        assert_eq!(data, "payload bytes");
    }
}
