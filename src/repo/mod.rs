//! Remote catalogue cache (RCC).
//!
//! A read-mostly mirror of one or more remote catalogues. Repository
//! definitions are loaded from `REPOS_DIR` fragments; each repository's
//! imported catalogue lives in `<db_dir>/repo-<name>.sqlite` next to the
//! raw catalogue file and descriptor. Catalogue rows are never mutated by
//! install operations, only replaced wholesale by [`update`].

pub mod fetcher;
pub mod signature;
pub mod update;

pub use fetcher::{FetchOutcome, Fetcher, FileFetcher, MockFetcher, fetch_with_retry};
#[cfg(feature = "http")]
pub use fetcher::HttpFetcher;
pub use signature::{DescriptorSignature, SignatureMode};
pub use update::{RepoDescriptor, UpdateOutcome, update};

use std::collections::BTreeMap;
use std::fs;

use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::db::codec;
use crate::error::{PkgError, Result};
use crate::events::EventBus;
use crate::types::{MatchExpr, Package};

/// Mirror discovery mode. Carried for compatibility with repository
/// definitions; the fetch provider receives the base URL as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MirrorMode {
    /// Single base URL.
    #[default]
    None,
    /// DNS SRV discovery.
    Srv,
    /// HTTP mirror list.
    #[serde(rename = "http")]
    HttpList,
}

/// Definition of one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Repository name; also names the on-disk catalogue artifacts.
    #[serde(skip)]
    pub name: String,
    /// Base URL (`https://…`, `file:///…`).
    pub url: String,
    /// Disabled repositories are kept but never consulted.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher priority wins when several repositories provide a package.
    #[serde(default)]
    pub priority: i64,
    /// Mirror discovery mode.
    #[serde(default)]
    pub mirror: MirrorMode,
    /// Signature policy.
    #[serde(default)]
    pub signature: SignatureMode,
}

const fn default_enabled() -> bool {
    true
}

impl RepoConfig {
    /// URL of the repository descriptor.
    #[must_use]
    pub fn meta_url(&self) -> String {
        format!("{}/meta.json", self.url.trim_end_matches('/'))
    }

    /// URL of a repository-relative path.
    #[must_use]
    pub fn object_url(&self, repopath: &str) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            repopath.trim_start_matches('/')
        )
    }
}

/// Ordered set of repository definitions.
///
/// Iteration order is deterministic: priority descending, then name
/// ascending. Operations that need one definitive answer traverse this
/// order and take the first match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepoCollection {
    repos: Vec<RepoConfig>,
}

impl RepoCollection {
    /// What: Load repository definitions from the configured directories.
    ///
    /// Inputs:
    /// - `config`: Supplies `repos_dir`.
    ///
    /// Output:
    /// - The collection; a later directory redefining a name overrides the
    ///   earlier definition.
    ///
    /// Details:
    /// - Every `*.conf` file is a JSON object mapping repository names to
    ///   bodies. Unreadable files are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Parse` when a definition file contains invalid
    /// JSON.
    pub fn load(config: &Config) -> Result<Self> {
        let mut merged: BTreeMap<String, RepoConfig> = BTreeMap::new();
        for dir in &config.repos_dir {
            if !dir.is_dir() {
                continue;
            }
            let mut paths: Vec<_> = fs::read_dir(dir)?
                .filter_map(std::result::Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "conf"))
                .collect();
            paths.sort();
            for path in paths {
                let text = match fs::read_to_string(&path) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable repo file");
                        continue;
                    }
                };
                let parsed: BTreeMap<String, RepoConfig> = serde_json::from_str(&text)
                    .map_err(|e| {
                        PkgError::Parse(format!("{}: {e}", path.display()))
                    })?;
                for (name, mut repo) in parsed {
                    repo.name = name.clone();
                    merged.insert(name, repo);
                }
            }
        }
        let mut repos: Vec<RepoConfig> = merged.into_values().collect();
        repos.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(Self { repos })
    }

    /// Collection from explicit definitions; used by tests and embedders.
    #[must_use]
    pub fn from_configs(mut repos: Vec<RepoConfig>) -> Self {
        repos.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Self { repos }
    }

    /// All definitions in deterministic order.
    #[must_use]
    pub fn iter(&self) -> std::slice::Iter<'_, RepoConfig> {
        self.repos.iter()
    }

    /// Enabled definitions in deterministic order.
    pub fn enabled(&self) -> impl Iterator<Item = &RepoConfig> {
        self.repos.iter().filter(|r| r.enabled)
    }

    /// Look up a definition by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RepoConfig> {
        self.repos.iter().find(|r| r.name == name)
    }
}

/// Open catalogue database of one repository.
#[derive(Debug)]
pub struct RepoDb {
    /// Repository name.
    pub name: String,
    conn: Connection,
}

impl RepoDb {
    /// What: Open a repository catalogue read-only.
    ///
    /// Inputs:
    /// - `config`: Supplies the database path.
    /// - `name`: Repository name.
    ///
    /// Output:
    /// - The open catalogue.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::NotFound` when the repository has never been
    /// updated.
    pub fn open(config: &Config, name: &str) -> Result<Self> {
        let path = config.repo_db_path(name);
        if !path.exists() {
            return Err(PkgError::NotFound(format!(
                "catalogue of repository {name}; run an update first"
            )));
        }
        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self {
            name: name.to_string(),
            conn,
        })
    }

    /// Load a catalogue row by uid (package name).
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` on query failure.
    pub fn get(&self, uid: &str) -> Result<Option<Package>> {
        codec::load_package(&self.conn, uid)
    }

    /// Query catalogue rows by match expression, uid-ordered.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` on query failure.
    pub fn query(&self, expr: &MatchExpr) -> Result<Vec<Package>> {
        let mut out = Vec::new();
        for summary in codec::list_summaries(&self.conn)? {
            if expr.matches(&summary.name, &summary.origin)
                && let Some(pkg) = self.get(&summary.uid)?
            {
                out.push(pkg);
            }
        }
        Ok(out)
    }
}

/// The enabled repositories with open catalogues, in definition order.
#[derive(Debug)]
pub struct RepoSet {
    repos: Vec<(RepoConfig, RepoDb)>,
}

impl RepoSet {
    /// What: Open every enabled repository that has a catalogue.
    ///
    /// Inputs:
    /// - `config`: Paths and the ABI filter.
    /// - `collection`: Repository definitions.
    /// - `events`: Receives a notice per repository without a catalogue.
    ///
    /// Output:
    /// - The set, possibly empty.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` when an existing catalogue fails to open.
    pub fn open(
        config: &Config,
        collection: &RepoCollection,
        events: &EventBus,
    ) -> Result<Self> {
        let mut repos = Vec::new();
        for repo in collection.enabled() {
            match RepoDb::open(config, &repo.name) {
                Ok(db) => repos.push((repo.clone(), db)),
                Err(PkgError::NotFound(msg)) => {
                    events.notice(format!("skipping {msg}"));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Self { repos })
    }

    /// Set from pre-opened parts; used by tests.
    #[must_use]
    pub fn from_parts(repos: Vec<(RepoConfig, RepoDb)>) -> Self {
        Self { repos }
    }

    /// Whether the ABI of a candidate is acceptable for this host.
    fn abi_matches(config_abi: &str, pkg: &Package) -> bool {
        config_abi.is_empty() || pkg.abi.is_empty() || pkg.abi == "*" || pkg.abi == config_abi
    }

    /// What: Every candidate for a name, in repository order.
    ///
    /// Inputs:
    /// - `name`: Package name.
    /// - `abi`: Host ABI filter (empty accepts everything).
    ///
    /// Output:
    /// - `(repository, package)` pairs; first entry is the definitive
    ///   answer under the priority rule.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` on query failure.
    pub fn candidates(&self, name: &str, abi: &str) -> Result<Vec<(String, Package)>> {
        let mut out = Vec::new();
        for (repo, db) in &self.repos {
            if let Some(pkg) = db.get(name)?
                && Self::abi_matches(abi, &pkg)
            {
                out.push((repo.name.clone(), pkg));
            }
        }
        Ok(out)
    }

    /// What: The definitive candidate for a name.
    ///
    /// Inputs:
    /// - `name`: Package name.
    /// - `abi`: Host ABI filter.
    /// - `events`: Receives a notice when lower-priority repositories are
    ///   shadowed.
    ///
    /// Output:
    /// - First candidate in repository order, or `None`.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` on query failure.
    pub fn best(
        &self,
        name: &str,
        abi: &str,
        events: &EventBus,
    ) -> Result<Option<(String, Package)>> {
        let mut candidates = self.candidates(name, abi)?;
        if candidates.len() > 1 {
            let shadowed: Vec<String> =
                candidates[1..].iter().map(|(r, _)| r.clone()).collect();
            events.notice(format!(
                "{name}: using repository {}, shadowing {}",
                candidates[0].0,
                shadowed.join(", ")
            ));
        }
        Ok(if candidates.is_empty() {
            None
        } else {
            Some(candidates.remove(0))
        })
    }

    /// What: Query all catalogues, first repository winning per name.
    ///
    /// Inputs:
    /// - `expr`: Match expression.
    /// - `abi`: Host ABI filter.
    ///
    /// Output:
    /// - Deduplicated `(repository, package)` pairs in name order.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` on query failure.
    pub fn query(&self, expr: &MatchExpr, abi: &str) -> Result<Vec<(String, Package)>> {
        let mut seen: BTreeMap<String, (String, Package)> = BTreeMap::new();
        for (repo, db) in &self.repos {
            for pkg in db.query(expr)? {
                if Self::abi_matches(abi, &pkg) && !seen.contains_key(&pkg.name) {
                    seen.insert(pkg.name.clone(), (repo.name.clone(), pkg));
                }
            }
        }
        Ok(seen.into_values().collect())
    }

    /// Repository configs in set order.
    pub fn configs(&self) -> impl Iterator<Item = &RepoConfig> {
        self.repos.iter().map(|(repo, _)| repo)
    }
}
