//! Fetched-artifact cache.
//!
//! Verified package archives live under
//! `<cache_dir>/<digest-prefix>/<name>-<version>.pkg`. Concurrent fetches
//! of the same artifact are serialized by writing to a temporary name and
//! renaming into place. `clean` removes entries no catalogue references
//! any more; with `AUTOCLEAN` the executor calls it after a successful
//! commit.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::checksum::{self, short_digest};
use crate::config::Config;
use crate::error::{PkgError, Result};
use crate::events::{Event, EventBus};
use crate::repo::{FetchOutcome, Fetcher, RepoConfig, RepoSet, fetch_with_retry};
use crate::types::{MatchExpr, Package};

/// What: Cache path of a package artifact.
///
/// Inputs:
/// - `config`: Supplies the cache root.
/// - `pkg`: Catalogue row with a recorded digest.
///
/// Output:
/// - `<cache_dir>/<digest-prefix>/<name>-<version>.pkg`; packages without
///   a digest land in a `nodigest` bucket.
#[must_use]
pub fn artifact_path(config: &Config, pkg: &Package) -> PathBuf {
    let bucket = if pkg.digest.is_empty() {
        "nodigest"
    } else {
        short_digest(&pkg.digest)
    };
    config
        .cache_dir
        .join(bucket)
        .join(format!("{}-{}.pkg", pkg.name, pkg.version))
}

/// What: Verify a cached artifact against catalogue facts.
///
/// Inputs:
/// - `path`: Cached file.
/// - `pkg`: Catalogue row carrying digest and size.
///
/// Output:
/// - Unit when size and digest both match.
///
/// # Errors
///
/// Returns `PkgError::Corrupt` on any mismatch.
pub fn verify_artifact(path: &Path, pkg: &Package) -> Result<()> {
    let meta = fs::metadata(path)?;
    if pkg.pkgsize != 0 && meta.len() != pkg.pkgsize {
        return Err(PkgError::Corrupt(format!(
            "{}: size {} but catalogue records {}",
            path.display(),
            meta.len(),
            pkg.pkgsize
        )));
    }
    if !pkg.digest.is_empty() {
        let actual = checksum::hash_file(path)?;
        if actual != pkg.digest {
            return Err(PkgError::Corrupt(format!(
                "{}: digest mismatch",
                path.display()
            )));
        }
    }
    Ok(())
}

/// What: Ensure a verified artifact is present in the cache.
///
/// Inputs:
/// - `repo`: Repository the package came from.
/// - `pkg`: Catalogue row naming `repopath`, digest, and size.
/// - `config`: Cache root and retry policy.
/// - `fetcher`: Fetch provider.
/// - `events`: Receives fetch begin/finish events.
///
/// Output:
/// - Path of the verified artifact.
///
/// Details:
/// - A cached file that passes verification is reused without touching
///   the network; a cached file that fails verification is discarded and
///   refetched once.
///
/// # Errors
///
/// Returns `PkgError::Corrupt` when the fetched bytes do not match the
/// catalogue facts, or transport errors after retries.
pub fn fetch_artifact(
    repo: &RepoConfig,
    pkg: &Package,
    config: &Config,
    fetcher: &dyn Fetcher,
    events: &EventBus,
) -> Result<PathBuf> {
    let dest = artifact_path(config, pkg);
    if dest.exists() {
        match verify_artifact(&dest, pkg) {
            Ok(()) => {
                tracing::debug!(path = %dest.display(), "artifact already cached");
                return Ok(dest);
            }
            Err(e) => {
                events.notice(format!(
                    "discarding stale cached artifact {}: {e}",
                    dest.display()
                ));
                fs::remove_file(&dest)?;
            }
        }
    }

    let parent = dest
        .parent()
        .ok_or_else(|| PkgError::Config("cache path has no parent".to_string()))?;
    fs::create_dir_all(parent)?;

    let url = repo.object_url(&pkg.repopath);
    events.emit(&Event::FetchBegin { url: url.clone() });
    let outcome = fetch_with_retry(fetcher, &url, None, config.fetch_retry, config.fetch_timeout)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    match outcome {
        FetchOutcome::Stream(mut stream) => {
            io::copy(&mut stream, tmp.as_file_mut())?;
        }
        FetchOutcome::NotModified => {
            return Err(PkgError::Corrupt(format!(
                "{url}: unexpected not-modified answer"
            )));
        }
    }
    tmp.as_file_mut().sync_all()?;
    events.emit(&Event::FetchFinished { url });

    verify_artifact(tmp.path(), pkg)?;
    let (_file, tmp_path) = tmp.keep().map_err(|e| PkgError::Io(e.error))?;
    fs::rename(&tmp_path, &dest)?;
    Ok(dest)
}

/// What: Remove cached artifacts no catalogue references.
///
/// Inputs:
/// - `config`: Cache root.
/// - `repos`: Open catalogue set defining what is still referenced.
/// - `events`: Receives one notice per removed file.
///
/// Output:
/// - Number of files removed.
///
/// Details:
/// - Empty digest-prefix directories are removed afterwards.
///
/// # Errors
///
/// Returns `PkgError::Io` when the cache directory cannot be walked.
pub fn clean(config: &Config, repos: &RepoSet, events: &EventBus) -> Result<usize> {
    if !config.cache_dir.is_dir() {
        return Ok(0);
    }
    let mut referenced = std::collections::BTreeSet::new();
    for (_repo, pkg) in repos.query(&MatchExpr::All, "")? {
        referenced.insert(artifact_path(config, &pkg));
    }

    let mut removed = 0usize;
    for bucket in fs::read_dir(&config.cache_dir)? {
        let bucket = bucket?.path();
        if !bucket.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&bucket)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "pkg") && !referenced.contains(&path) {
                events.notice(format!("removing stale cache entry {}", path.display()));
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        if fs::read_dir(&bucket)?.next().is_none() {
            let _ = fs::remove_dir(&bucket);
        }
    }
    Ok(removed)
}
