//! Catalogue update flow.
//!
//! An update fetches the small signed descriptor, short-circuits when the
//! catalogue digest is unchanged, and otherwise fetches the catalogue to a
//! temporary path, verifies size, digest, and signature, imports the rows
//! into the repository database, and renames everything into place. A
//! partial fetch can never clobber the active catalogue.

use std::fs;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::fetcher::{FetchOutcome, Fetcher, fetch_with_retry};
use super::{RepoConfig, signature};
use crate::archive::Format;
use crate::checksum;
use crate::config::Config;
use crate::db::{codec, schema};
use crate::error::{PkgError, Result};
use crate::events::{Event, EventBus};
use crate::manifest;

/// The signed repository descriptor (`meta.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoDescriptor {
    /// Descriptor format version.
    pub version: u32,
    /// Packing of the catalogue file (informational; the importer detects
    /// compression from magic bytes).
    pub packing_format: String,
    /// Monotonic catalogue revision.
    pub revision: u64,
    /// Hex SHA-256 of the catalogue file.
    pub digest: String,
    /// Catalogue file name relative to the repository URL.
    pub filename: String,
    /// Catalogue file size in bytes; zero disables the size check.
    #[serde(default)]
    pub size: u64,
    /// Signature material per the repository's mode.
    #[serde(flatten, default)]
    pub signature: signature::DescriptorSignature,
}

/// Result of one update run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Digest unchanged; nothing was fetched.
    UpToDate,
    /// Catalogue replaced.
    Updated {
        /// Rows in the new catalogue.
        added: usize,
        /// Rows in the previous catalogue.
        removed: usize,
    },
}

/// On-disk paths of one repository's cached catalogue state.
struct RepoPaths {
    descriptor: PathBuf,
    catalogue: PathBuf,
    database: PathBuf,
}

fn repo_paths(config: &Config, name: &str) -> RepoPaths {
    RepoPaths {
        descriptor: config.db_dir.join(format!("repo-{name}.meta")),
        catalogue: config.db_dir.join(format!("repo-{name}.catalog")),
        database: config.repo_db_path(name),
    }
}

fn read_to_vec(outcome: FetchOutcome, what: &str) -> Result<Vec<u8>> {
    match outcome {
        FetchOutcome::Stream(mut stream) => {
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf)?;
            Ok(buf)
        }
        FetchOutcome::NotModified => Err(PkgError::Corrupt(format!(
            "{what}: unexpected not-modified answer"
        ))),
    }
}

/// What: Import a catalogue stream into the repository database.
///
/// Inputs:
/// - `file`: Open catalogue file positioned at the start.
/// - `db_path`: Destination SQLite file.
/// - `events`: Receives progress events.
///
/// Output:
/// - `(added, removed)` row counts.
///
/// Details:
/// - The stream is one compact manifest per line, optionally behind one of
///   the archive filters; compression is detected from magic bytes.
/// - The whole import is one transaction replacing the previous rows, so
///   readers never observe a half-imported catalogue.
///
/// # Errors
///
/// Returns `PkgError::Corrupt` for rows that fail to parse or validate.
fn import_catalogue(
    file: &mut fs::File,
    db_path: &PathBuf,
    events: &EventBus,
) -> Result<(usize, usize)> {
    let mut magic = [0u8; 6];
    let n = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;
    let format = Format::from_magic(&magic[..n]);
    let reader: Box<dyn Read> = match format {
        Format::Tar => Box::new(file.try_clone()?),
        Format::Gzip => Box::new(flate2::read::GzDecoder::new(file.try_clone()?)),
        Format::Bzip2 => Box::new(bzip2::read::BzDecoder::new(file.try_clone()?)),
        Format::Xz => Box::new(xz2::read::XzDecoder::new(file.try_clone()?)),
        Format::Zstd => Box::new(zstd::stream::read::Decoder::new(file.try_clone()?)?),
    };

    let mut conn = Connection::open(db_path)?;
    schema::init(&conn)?;
    let removed: usize = {
        let count: i64 = conn.query_row("SELECT count(*) FROM package", [], |row| row.get(0))?;
        usize::try_from(count).unwrap_or(0)
    };

    let tx = conn.transaction()?;
    tx.execute("DELETE FROM package", [])?;
    let mut added = 0usize;
    for line in BufReader::new(reader).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed = manifest::parse(&line)
            .map_err(|e| PkgError::Corrupt(format!("catalogue row {}: {e}", added + 1)))?;
        let mut pkg = parsed.package;
        pkg.validate_for_install()
            .map_err(|e| PkgError::Corrupt(format!("catalogue row {}: {e}", added + 1)))?;
        // Catalogue rows are keyed by name within a repository.
        pkg.uid = pkg.name.clone();
        if pkg.repopath.is_empty() {
            pkg.repopath = format!("All/{}-{}.pkg", pkg.name, pkg.version);
        }
        codec::insert_package(&tx, &pkg)?;
        added += 1;
        if added % 500 == 0 {
            events.emit(&Event::UpdateAdd {
                done: added,
                total: 0,
            });
        }
    }
    tx.commit()?;
    events.emit(&Event::UpdateAdd {
        done: added,
        total: added,
    });
    if removed > 0 {
        events.emit(&Event::UpdateRemove {
            done: removed,
            total: removed,
        });
    }
    Ok((added, removed))
}

/// What: Bring one repository's catalogue up to date.
///
/// Inputs:
/// - `repo`: Repository definition.
/// - `config`: Paths, retry policy.
/// - `fetcher`: Fetch provider.
/// - `events`: Receives `UP_TO_DATE`, fetch, and progress events.
///
/// Output:
/// - The update outcome.
///
/// Details:
/// - Verification order is size, digest, signature; the previous
///   catalogue, database, and descriptor are replaced only after all
///   three pass and the import committed.
///
/// # Errors
///
/// Returns `PkgError::Corrupt` for any integrity failure (never retried)
/// and transport errors from the fetcher after retries.
pub fn update(
    repo: &RepoConfig,
    config: &Config,
    fetcher: &dyn Fetcher,
    events: &EventBus,
) -> Result<UpdateOutcome> {
    fs::create_dir_all(&config.db_dir)?;
    let paths = repo_paths(config, &repo.name);

    let meta_url = repo.meta_url();
    events.emit(&Event::FetchBegin {
        url: meta_url.clone(),
    });
    let outcome = fetch_with_retry(
        fetcher,
        &meta_url,
        None,
        config.fetch_retry,
        config.fetch_timeout,
    )?;
    let descriptor_bytes = read_to_vec(outcome, "repository descriptor")?;
    events.emit(&Event::FetchFinished {
        url: meta_url.clone(),
    });
    let descriptor: RepoDescriptor = serde_json::from_slice(&descriptor_bytes)
        .map_err(|e| PkgError::Corrupt(format!("{meta_url}: {e}")))?;

    if let Ok(previous) = fs::read_to_string(&paths.descriptor)
        && let Ok(previous) = serde_json::from_str::<RepoDescriptor>(&previous)
        && previous.digest == descriptor.digest
    {
        events.emit(&Event::UpToDate {
            repo: repo.name.clone(),
        });
        return Ok(UpdateOutcome::UpToDate);
    }

    let catalogue_url = repo.object_url(&descriptor.filename);
    events.emit(&Event::FetchBegin {
        url: catalogue_url.clone(),
    });
    let outcome = fetch_with_retry(
        fetcher,
        &catalogue_url,
        None,
        config.fetch_retry,
        config.fetch_timeout,
    )?;
    let mut tmp = tempfile::NamedTempFile::new_in(&config.db_dir)?;
    match outcome {
        FetchOutcome::Stream(mut stream) => {
            io::copy(&mut stream, tmp.as_file_mut())?;
        }
        FetchOutcome::NotModified => {
            return Err(PkgError::Corrupt(format!(
                "{catalogue_url}: unexpected not-modified answer"
            )));
        }
    }
    tmp.as_file_mut().flush()?;
    events.emit(&Event::FetchFinished {
        url: catalogue_url.clone(),
    });

    let actual_size = tmp.as_file().metadata()?.len();
    if descriptor.size != 0 && actual_size != descriptor.size {
        return Err(PkgError::Corrupt(format!(
            "{}: size {actual_size}, descriptor says {}",
            descriptor.filename, descriptor.size
        )));
    }
    let actual_digest = checksum::hash_file(tmp.path())?;
    if actual_digest != descriptor.digest {
        return Err(PkgError::Corrupt(format!(
            "{}: digest mismatch",
            descriptor.filename
        )));
    }
    signature::verify(&repo.signature, &descriptor.digest, &descriptor.signature)?;

    tmp.as_file_mut().seek(SeekFrom::Start(0))?;
    let (added, removed) = import_catalogue(tmp.as_file_mut(), &paths.database, events)?;

    // All verified and imported: move the raw catalogue and descriptor
    // into place atomically.
    let (_file, tmp_path) = tmp.keep().map_err(|e| PkgError::Io(e.error))?;
    fs::rename(&tmp_path, &paths.catalogue)?;
    let descriptor_tmp = paths.descriptor.with_extension("meta.tmp");
    fs::write(&descriptor_tmp, serde_json::to_string_pretty(&descriptor)?)?;
    fs::rename(&descriptor_tmp, &paths.descriptor)?;

    tracing::debug!(repo = %repo.name, added, removed, "catalogue updated");
    Ok(UpdateOutcome::Updated { added, removed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::repo::{MockFetcher, RepoDb, SignatureMode};
    use crate::types::Package;

    fn sample_row(name: &str, version: &str) -> String {
        let mut pkg = Package::new(name, version);
        pkg.origin = format!("misc/{name}");
        pkg.comment = "c".to_string();
        pkg.desc = "d".to_string();
        pkg.maintainer = "m@example.org".to_string();
        pkg.www = "https://example.org".to_string();
        pkg.abi = "Unix:13:amd64".to_string();
        pkg.prefix = "/usr/local".to_string();
        #[allow(clippy::unwrap_used)]
        let line = manifest::emit_compact(&pkg).unwrap();
        line
    }

    fn descriptor_for(catalogue: &[u8]) -> RepoDescriptor {
        RepoDescriptor {
            version: 1,
            packing_format: "raw".to_string(),
            revision: 7,
            digest: checksum::hash_bytes(catalogue),
            filename: "packagesite.catalog".to_string(),
            size: catalogue.len() as u64,
            signature: signature::DescriptorSignature::default(),
        }
    }

    #[allow(clippy::unwrap_used)]
    fn test_setup(
        catalogue: &str,
    ) -> (tempfile::TempDir, Config, RepoConfig, MockFetcher) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.db_dir = dir.path().to_path_buf();
        let repo = RepoConfig {
            name: "main".to_string(),
            url: "https://pkg.example.org/main".to_string(),
            enabled: true,
            priority: 0,
            mirror: crate::repo::MirrorMode::None,
            signature: SignatureMode::None,
        };
        let descriptor = descriptor_for(catalogue.as_bytes());
        let fetcher = MockFetcher::new()
            .with_body(
                repo.meta_url(),
                serde_json::to_vec(&descriptor).unwrap(),
            )
            .with_body(
                repo.object_url(&descriptor.filename),
                catalogue.as_bytes().to_vec(),
            );
        (dir, config, repo, fetcher)
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn update_imports_rows_and_is_idempotent() {
        let catalogue = format!("{}\n{}\n", sample_row("zsh", "5.9"), sample_row("vim", "9.0"));
        let (_dir, config, repo, fetcher) = test_setup(&catalogue);
        let sink = CollectingSink::new();
        let mut bus = EventBus::new();
        bus.add_sink(Box::new(sink.clone()));

        let outcome = update(&repo, &config, &fetcher, &bus).unwrap();
        assert_eq!(outcome, UpdateOutcome::Updated { added: 2, removed: 0 });

        let db = RepoDb::open(&config, "main").unwrap();
        let zsh = db.get("zsh").unwrap().unwrap();
        assert_eq!(zsh.version, "5.9");
        assert_eq!(zsh.repopath, "All/zsh-5.9.pkg");

        // Second run with the unchanged digest short-circuits.
        let outcome = update(&repo, &config, &fetcher, &bus).unwrap();
        assert_eq!(outcome, UpdateOutcome::UpToDate);
        assert!(
            sink.events()
                .iter()
                .any(|e| matches!(e, Event::UpToDate { repo } if repo == "main"))
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn corrupt_catalogue_never_replaces_the_active_one() {
        let catalogue = format!("{}\n", sample_row("zsh", "5.9"));
        let (_dir, config, repo, _fetcher) = test_setup(&catalogue);
        let bus = EventBus::new();

        // Descriptor advertises a digest the body does not match.
        let mut bad_descriptor = descriptor_for(catalogue.as_bytes());
        bad_descriptor.digest = "00".repeat(32);
        let fetcher = MockFetcher::new()
            .with_body(repo.meta_url(), serde_json::to_vec(&bad_descriptor).unwrap())
            .with_body(
                repo.object_url(&bad_descriptor.filename),
                catalogue.as_bytes().to_vec(),
            );
        let err = update(&repo, &config, &fetcher, &bus);
        assert!(matches!(err, Err(PkgError::Corrupt(_))));
        assert!(!config.repo_db_path("main").exists());
        assert!(!config.db_dir.join("repo-main.catalog").exists());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn compressed_catalogues_are_detected() {
        let catalogue = format!("{}\n", sample_row("zsh", "5.9"));
        let compressed = {
            let mut enc =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(catalogue.as_bytes()).unwrap();
            enc.finish().unwrap()
        };
        let (_dir, config, repo, _): (tempfile::TempDir, Config, RepoConfig, MockFetcher) =
            test_setup(&catalogue);
        let descriptor = descriptor_for(&compressed);
        let fetcher = MockFetcher::new()
            .with_body(repo.meta_url(), serde_json::to_vec(&descriptor).unwrap())
            .with_body(repo.object_url(&descriptor.filename), compressed);
        let bus = EventBus::new();
        let outcome = update(&repo, &config, &fetcher, &bus).unwrap();
        assert_eq!(outcome, UpdateOutcome::Updated { added: 1, removed: 0 });
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn size_mismatch_is_corrupt() {
        let catalogue = format!("{}\n", sample_row("zsh", "5.9"));
        let (_dir, config, repo, _fetcher) = test_setup(&catalogue);
        let mut descriptor = descriptor_for(catalogue.as_bytes());
        descriptor.size = 3;
        let fetcher = MockFetcher::new()
            .with_body(repo.meta_url(), serde_json::to_vec(&descriptor).unwrap())
            .with_body(
                repo.object_url(&descriptor.filename),
                catalogue.as_bytes().to_vec(),
            );
        let err = update(&repo, &config, &fetcher, &EventBus::new());
        assert!(matches!(err, Err(PkgError::Corrupt(_))));
    }
}
