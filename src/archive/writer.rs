//! Package archive creation.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bzip2::write::BzEncoder;
use flate2::write::GzEncoder;
use xz2::write::XzEncoder;

use super::{
    COMPACT_MANIFEST_NAME, DESC_NAME, DISPLAY_NAME, Format, Level, MANIFEST_NAME,
};
use crate::error::{PkgError, Result};
use crate::manifest;
use crate::types::{FileType, Package};

/// Options controlling one packing run.
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// Filter to apply; raw tar when `None`-equivalent `Format::Tar`.
    pub format: Format,
    /// Compression level policy.
    pub level: Level,
    /// Force every entry timestamp to this value. When unset, a parseable
    /// `SOURCE_DATE_EPOCH` environment variable is used instead.
    pub timestamp: Option<u64>,
    /// Replace an existing archive at the target path.
    pub overwrite: bool,
    /// Also create the legacy `<name>-<version>.<ext>` symlink.
    pub compat_symlink: bool,
}

/// Write adapter that owns whichever encoder the format selected.
enum FilterWriter<W: Write> {
    Raw(W),
    Gzip(GzEncoder<W>),
    Bzip2(BzEncoder<W>),
    Xz(XzEncoder<W>),
    Zstd(zstd::Encoder<'static, W>),
}

impl<W: Write> FilterWriter<W> {
    fn new(inner: W, format: Format, level: i32) -> Result<Self> {
        #[allow(clippy::cast_sign_loss)]
        let writer = match format {
            Format::Tar => Self::Raw(inner),
            Format::Gzip => Self::Gzip(GzEncoder::new(inner, flate2::Compression::new(level as u32))),
            Format::Bzip2 => Self::Bzip2(BzEncoder::new(inner, bzip2::Compression::new(level as u32))),
            Format::Xz => Self::Xz(XzEncoder::new(inner, level as u32)),
            Format::Zstd => Self::Zstd(zstd::Encoder::new(inner, level)?),
        };
        Ok(writer)
    }

    fn finish(self) -> io::Result<()> {
        match self {
            Self::Raw(mut w) => w.flush(),
            Self::Gzip(enc) => enc.finish().map(|_| ()),
            Self::Bzip2(enc) => enc.finish().map(|_| ()),
            Self::Xz(enc) => enc.finish().map(|_| ()),
            Self::Zstd(enc) => enc.finish().map(|_| ()),
        }
    }
}

impl<W: Write> Write for FilterWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Raw(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
            Self::Bzip2(w) => w.write(buf),
            Self::Xz(w) => w.write(buf),
            Self::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Raw(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
            Self::Bzip2(w) => w.flush(),
            Self::Xz(w) => w.flush(),
            Self::Zstd(w) => w.flush(),
        }
    }
}

/// What: Decide the forced entry timestamp for a packing run.
///
/// Inputs:
/// - `opts`: Packing options.
///
/// Output:
/// - The timestamp to force on every entry, or `None` to keep source file
///   times.
///
/// Details:
/// - An explicit option wins; otherwise `SOURCE_DATE_EPOCH` is consulted
///   and a malformed value is ignored with a warning, matching the
///   reproducible-builds convention.
fn effective_timestamp(opts: &PackOptions) -> Option<u64> {
    if opts.timestamp.is_some() {
        return opts.timestamp;
    }
    match std::env::var("SOURCE_DATE_EPOCH") {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(ts) => Some(ts),
            Err(_) => {
                tracing::warn!(value = %raw, "ignoring bad SOURCE_DATE_EPOCH");
                None
            }
        },
        Err(_) => None,
    }
}

/// Append one metadata blob with a `+`-prefixed name.
fn append_metadata<W: Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    body: &[u8],
    timestamp: Option<u64>,
) -> Result<()> {
    let mut header = tar::Header::new_ustar();
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mtime(timestamp.unwrap_or(0));
    builder.append_data(&mut header, name, body)?;
    Ok(())
}

/// What: Create a package archive from a manifest and a payload tree.
///
/// Inputs:
/// - `pkg`: Fully populated package; its `files` entries name the payload.
/// - `payload_root`: Directory the absolute file paths are resolved under.
/// - `dest_dir`: Directory receiving the archive.
/// - `opts`: Format, level, timestamp and overwrite policy.
///
/// Output:
/// - Path of the created `<name>-<version>.pkg` archive.
///
/// Details:
/// - Metadata entries are written first, in the fixed order
///   `+COMPACT_MANIFEST`, `+MANIFEST`, then `+DESC` and `+DISPLAY` when
///   non-empty, so metadata-only readers never touch the payload.
/// - Payload entry names are repository-relative (leading `/` stripped).
/// - With a forced timestamp every entry carries it, making output
///   byte-reproducible for equal inputs.
///
/// # Errors
///
/// Returns `PkgError::Io` with `AlreadyExists` when the target exists and
/// `overwrite` is false, `PkgError::Config` for a level on raw tar, and
/// `PkgError::Io` for filesystem failures.
pub fn create_package(
    pkg: &Package,
    payload_root: &Path,
    dest_dir: &Path,
    opts: &PackOptions,
) -> Result<PathBuf> {
    let level = opts.level.resolve(opts.format)?;
    let archive_path = dest_dir.join(format!("{}-{}.pkg", pkg.name, pkg.version));
    if !opts.overwrite && archive_path.exists() {
        return Err(PkgError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("refusing to overwrite {}", archive_path.display()),
        )));
    }
    let timestamp = effective_timestamp(opts);
    tracing::debug!(path = %archive_path.display(), format = ?opts.format, "packing");

    let file = File::create(&archive_path)?;
    let filter = FilterWriter::new(file, opts.format, level)?;
    let mut builder = tar::Builder::new(filter);
    builder.mode(tar::HeaderMode::Complete);

    let compact = manifest::emit_compact(pkg)?;
    let pretty = manifest::emit_pretty(pkg)?;
    append_metadata(&mut builder, COMPACT_MANIFEST_NAME, compact.as_bytes(), timestamp)?;
    append_metadata(&mut builder, MANIFEST_NAME, pretty.as_bytes(), timestamp)?;
    if !pkg.desc.is_empty() {
        append_metadata(&mut builder, DESC_NAME, pkg.desc.as_bytes(), timestamp)?;
    }
    if !pkg.messages.is_empty() {
        let display: String = pkg
            .messages
            .iter()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        append_metadata(&mut builder, DISPLAY_NAME, display.as_bytes(), timestamp)?;
    }

    for entry in &pkg.files {
        let rel = entry.path.trim_start_matches('/');
        match entry.kind {
            FileType::Regular => {
                let source = payload_root.join(rel);
                let mut f = File::open(&source)?;
                let meta = f.metadata()?;
                let mut header = tar::Header::new_ustar();
                header.set_size(meta.len());
                header.set_mode(if entry.perm == 0 { 0o644 } else { entry.perm });
                header.set_entry_type(tar::EntryType::Regular);
                if let Some(ts) = timestamp {
                    header.set_mtime(ts);
                } else {
                    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
                    header.set_mtime(
                        meta.modified()
                            .ok()
                            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                            .map_or(0, |d| d.as_secs()),
                    );
                }
                builder.append_data(&mut header, rel, &mut f)?;
            }
            FileType::Symlink => {
                let target = entry.link_target.as_deref().unwrap_or_default();
                let mut header = tar::Header::new_ustar();
                header.set_size(0);
                header.set_mode(0o755);
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_mtime(timestamp.unwrap_or(0));
                builder.append_link(&mut header, rel, target)?;
            }
            FileType::Directory => {
                let mut header = tar::Header::new_ustar();
                header.set_size(0);
                header.set_mode(if entry.perm == 0 { 0o755 } else { entry.perm });
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mtime(timestamp.unwrap_or(0));
                builder.append_data(&mut header, format!("{rel}/"), io::empty())?;
            }
        }
    }

    let filter = builder.into_inner()?;
    filter.finish()?;

    if opts.compat_symlink {
        let link = dest_dir.join(format!(
            "{}-{}.{}",
            pkg.name,
            pkg.version,
            opts.format.extension()
        ));
        #[cfg(unix)]
        {
            let _ = std::fs::remove_file(&link);
            std::os::unix::fs::symlink(&archive_path, &link)?;
        }
    }

    Ok(archive_path)
}
