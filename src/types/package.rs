//! Package value type and its owned collections.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{PkgError, Result};
use crate::types::dependency::DependencyEdge;

/// Filesystem entry kind recorded for a package file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Regular file, checksummed over its raw bytes.
    Regular,
    /// Symbolic link, checksummed over the link target string.
    Symlink,
    /// Directory entry carried in the file list of legacy manifests.
    Directory,
}

/// A single file owned by a package.
///
/// `path` is absolute and normalized (no `.` or `..` components); it is
/// unique within a package, and across packages a regular-file path may be
/// shared only between config-file variants during an upgrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Absolute normalized path.
    pub path: String,
    /// Hex SHA-256 of the file bytes at install time; empty for symlinks
    /// recorded by legacy manifests without target hashing.
    #[serde(default)]
    pub sum: String,
    /// Owning user name.
    #[serde(default)]
    pub uname: String,
    /// Owning group name.
    #[serde(default)]
    pub gname: String,
    /// POSIX mode bits.
    #[serde(default)]
    pub perm: u32,
    /// Opaque filesystem-flag bitmap; zero when unused.
    #[serde(default)]
    pub fflags: u64,
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: FileType,
    /// Link target, symlinks only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
    /// Config-file flag: install keeps divergent local content as
    /// `<path>.pkgnew`, uninstall preserves modified content as
    /// `<path>.pkgsave`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub config: bool,
}

/// A directory owned (or shared) by a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Absolute normalized path.
    pub path: String,
    /// POSIX mode bits.
    #[serde(default)]
    pub perm: u32,
    /// Owning user name.
    #[serde(default)]
    pub uname: String,
    /// Owning group name.
    #[serde(default)]
    pub gname: String,
    /// Delete only if empty at uninstall.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub try_remove: bool,
}

/// Lifecycle phase a script is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptKind {
    /// Before file materialization of an install.
    PreInstall,
    /// After file materialization of an install.
    PostInstall,
    /// Before file removal of a deinstall.
    PreDeinstall,
    /// After file removal of a deinstall.
    PostDeinstall,
    /// Before the old package is replaced during an upgrade.
    PreUpgrade,
    /// After the new package is in place during an upgrade.
    PostUpgrade,
}

impl ScriptKind {
    /// Phase argument passed to the script, matching the historical
    /// `set -- <name>-<version> <PHASE>` convention.
    #[must_use]
    pub const fn phase_arg(self) -> &'static str {
        match self {
            Self::PreInstall => "PRE-INSTALL",
            Self::PostInstall => "POST-INSTALL",
            Self::PreDeinstall => "DEINSTALL",
            Self::PostDeinstall => "POST-DEINSTALL",
            Self::PreUpgrade => "PRE-UPGRADE",
            Self::PostUpgrade => "POST-UPGRADE",
        }
    }

    /// Stable text form used in events and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreInstall => "pre-install",
            Self::PostInstall => "post-install",
            Self::PreDeinstall => "pre-deinstall",
            Self::PostDeinstall => "post-deinstall",
            Self::PreUpgrade => "pre-upgrade",
            Self::PostUpgrade => "post-upgrade",
        }
    }
}

/// Language a script body is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    /// POSIX shell, run through `/bin/sh`.
    Shell,
    /// Lua, run through the configured interpreter.
    Lua,
}

/// A package script. At most one per `(kind, language)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// Lifecycle phase.
    pub kind: ScriptKind,
    /// Script language.
    pub language: ScriptLanguage,
    /// Script body text.
    pub body: String,
}

/// When a package message is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// On every operation touching the package.
    Always,
    /// Only on fresh install.
    Install,
    /// Only on upgrade, optionally bounded by a version range.
    Upgrade,
    /// Only on removal.
    Remove,
}

/// A user-facing message attached to a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// When the message applies.
    pub kind: MessageKind,
    /// For upgrade messages: show only when upgrading from a version
    /// greater than or equal to this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    /// For upgrade messages: show only when upgrading from a version
    /// less than or equal to this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<String>,
    /// Message text.
    pub text: String,
}

/// A build-time option recorded on a package.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PackageOption {
    /// Effective value.
    pub value: String,
    /// Default value, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Human-readable description, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An installed or installable package and everything it owns.
///
/// A `Package` value owns all of its collections; cross-package references
/// (reverse dependencies, file ownership) are resolved by uid lookup
/// through the database handle, never by retained pointers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Package {
    /// Stable identifier: unique within the local database, unique per
    /// repository in catalogues.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Package name, `[A-Za-z0-9_.+-]+`.
    pub name: String,
    /// Version string, compared by `deps::compare_versions`.
    pub version: String,
    /// Human-readable category/port path. Informational.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin: String,
    /// One-line comment.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    /// Long description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
    /// Maintainer contact.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub maintainer: String,
    /// Upstream URL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub www: String,
    /// Platform ABI tag used for catalogue filtering.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub abi: String,
    /// Installation prefix.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    /// Unpacked on-disk size in bytes.
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub flatsize: u64,
    /// Size of the package archive in bytes; catalogue rows only.
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub pkgsize: u64,
    /// Digest of the canonical compact manifest.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
    /// Repository-relative path of the archive; catalogue rows only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repopath: String,
    /// True iff installed only to satisfy another package's dependency.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub automatic: bool,
    /// User lock: no plan may modify the package without `force_locked`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub locked: bool,
    /// Vital flag: deinstall requires explicit confirmation upstream.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub vital: bool,
    /// Unix timestamp of installation; local rows only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_installed: Option<u64>,
    /// Human-readable reason the package was installed, when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Dependency edges, unique by `(name, origin)`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<DependencyEdge>,
    /// Files in manifest emission order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileEntry>,
    /// Directories in manifest emission order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dirs: Vec<DirEntry>,
    /// Build options keyed by option name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, PackageOption>,
    /// Free-form annotations keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Category names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    /// License identifiers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub licenses: Vec<String>,
    /// Shared libraries required at runtime.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub shlibs_required: BTreeSet<String>,
    /// Shared libraries provided.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub shlibs_provided: BTreeSet<String>,
    /// Virtual provisions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,
    /// Virtual requirements.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    /// System users the package needs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    /// System groups the package needs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    /// Lifecycle scripts, at most one per `(kind, language)`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<Script>,
    /// User-facing messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    /// Explicit conflict declarations: glob patterns over uids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
}

/// Serde helper for skipping zero-valued sizes.
#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

impl Package {
    /// What: Create a package with identity fields only.
    ///
    /// Inputs:
    /// - `name`, `version`: Package identity.
    ///
    /// Output:
    /// - A package with `uid = name` and empty collections.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            uid: name.clone(),
            name,
            version: version.into(),
            ..Self::default()
        }
    }

    /// `name-version` display form used in events and reasons.
    #[must_use]
    pub fn name_version(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// What: Add a dependency edge, keeping `(name, origin)` unique.
    ///
    /// Inputs:
    /// - `dep`: Edge to add.
    ///
    /// Output:
    /// - `true` when the edge was added, `false` when an equal key existed.
    pub fn add_dep(&mut self, dep: DependencyEdge) -> bool {
        if self
            .deps
            .iter()
            .any(|d| d.name == dep.name && d.origin == dep.origin)
        {
            return false;
        }
        self.deps.push(dep);
        true
    }

    /// What: Add a file entry, keeping `path` unique within the package.
    ///
    /// Inputs:
    /// - `file`: Entry with an already-normalized path.
    ///
    /// Output:
    /// - Unit on success.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Conflict` when the path is already present.
    pub fn add_file(&mut self, file: FileEntry) -> Result<()> {
        if self.files.iter().any(|f| f.path == file.path) {
            return Err(PkgError::Conflict {
                path: file.path,
                owner: self.name_version(),
                claimer: self.name_version(),
            });
        }
        self.files.push(file);
        Ok(())
    }

    /// What: Attach a script, enforcing one per `(kind, language)`.
    ///
    /// Inputs:
    /// - `script`: Script to attach.
    ///
    /// Output:
    /// - Unit on success.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Parse` when a script for the same kind and
    /// language already exists.
    pub fn add_script(&mut self, script: Script) -> Result<()> {
        if self
            .scripts
            .iter()
            .any(|s| s.kind == script.kind && s.language == script.language)
        {
            return Err(PkgError::Parse(format!(
                "duplicate {} {} script for {}",
                script.kind.as_str(),
                match script.language {
                    ScriptLanguage::Shell => "shell",
                    ScriptLanguage::Lua => "lua",
                },
                self.name
            )));
        }
        self.scripts.push(script);
        Ok(())
    }

    /// Look up the script for a phase and language, if any.
    #[must_use]
    pub fn script(&self, kind: ScriptKind, language: ScriptLanguage) -> Option<&Script> {
        self.scripts
            .iter()
            .find(|s| s.kind == kind && s.language == language)
    }

    /// What: Validate the fields mandatory for installation.
    ///
    /// Inputs: None
    ///
    /// Output:
    /// - Unit when `name`, `version`, `origin`, `maintainer`, `prefix`,
    ///   `desc`, `comment`, `www` and `abi` are all present and the name
    ///   is well-formed.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Parse` naming the first missing or malformed
    /// field.
    pub fn validate_for_install(&self) -> Result<()> {
        if !is_valid_name(&self.name) {
            return Err(PkgError::Parse(format!(
                "invalid package name: {:?}",
                self.name
            )));
        }
        if self.version.is_empty() {
            return Err(PkgError::Parse(format!("{}: empty version", self.name)));
        }
        let mandatory = [
            ("origin", &self.origin),
            ("maintainer", &self.maintainer),
            ("prefix", &self.prefix),
            ("desc", &self.desc),
            ("comment", &self.comment),
            ("www", &self.www),
            ("abi", &self.abi),
        ];
        for (field, value) in mandatory {
            if value.is_empty() {
                return Err(PkgError::Parse(format!(
                    "{}: missing mandatory field {field}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// What: Check a package name against the allowed alphabet.
///
/// Inputs:
/// - `name`: Candidate name.
///
/// Output:
/// - `true` for a non-empty string over `[A-Za-z0-9_.+-]`.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'+' | b'-'))
}

/// What: Normalize an absolute path for storage in file entries.
///
/// Inputs:
/// - `path`: Raw path from a manifest or archive header.
///
/// Output:
/// - Normalized absolute path: single slashes, no `.` components, `..`
///   resolved against earlier components.
///
/// # Errors
///
/// Returns `PkgError::Parse` when the path is relative or `..` escapes the
/// root.
pub fn normalize_path(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(PkgError::Parse(format!("path is not absolute: {path}")));
    }
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(PkgError::Parse(format!("path escapes root: {path}")));
                }
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Ok("/".to_string());
    }
    Ok(format!("/{}", parts.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_alphabet() {
        assert!(is_valid_name("zstd"));
        assert!(is_valid_name("gcc12-c++"));
        assert!(is_valid_name("py39-sqlite3"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("bad name"));
        assert!(!is_valid_name("evil/pkg"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn path_normalization() {
        assert_eq!(normalize_path("/usr/local/bin/x").unwrap(), "/usr/local/bin/x");
        assert_eq!(normalize_path("/usr//local/./bin").unwrap(), "/usr/local/bin");
        assert_eq!(normalize_path("/usr/local/../bin").unwrap(), "/usr/bin");
        assert_eq!(normalize_path("/").unwrap(), "/");
        assert!(normalize_path("relative/path").is_err());
        assert!(normalize_path("/..").is_err());
        assert!(normalize_path("/a/../../b").is_err());
    }

    #[test]
    fn dep_uniqueness_by_name_and_origin() {
        let mut pkg = Package::new("a", "1.0");
        assert!(pkg.add_dep(DependencyEdge::any("b")));
        assert!(!pkg.add_dep(DependencyEdge::any("b")));
        let mut with_origin = DependencyEdge::any("b");
        with_origin.origin = Some("misc/b".to_string());
        assert!(pkg.add_dep(with_origin));
        assert_eq!(pkg.deps.len(), 2);
    }

    #[test]
    fn one_script_per_kind_and_language() {
        let mut pkg = Package::new("a", "1.0");
        let sh = Script {
            kind: ScriptKind::PreInstall,
            language: ScriptLanguage::Shell,
            body: "echo hi".to_string(),
        };
        assert!(pkg.add_script(sh.clone()).is_ok());
        assert!(pkg.add_script(sh.clone()).is_err());
        let lua = Script {
            language: ScriptLanguage::Lua,
            ..sh
        };
        assert!(pkg.add_script(lua).is_ok());
    }

    #[test]
    fn mandatory_field_validation() {
        let mut pkg = Package::new("hello", "1.2");
        assert!(pkg.validate_for_install().is_err());
        pkg.origin = "misc/hello".to_string();
        pkg.maintainer = "ports@example.org".to_string();
        pkg.prefix = "/usr/local".to_string();
        pkg.desc = "A test package".to_string();
        pkg.comment = "Test".to_string();
        pkg.www = "https://example.org".to_string();
        pkg.abi = "Unix:13:amd64".to_string();
        assert!(pkg.validate_for_install().is_ok());
    }

    #[test]
    fn file_paths_unique_within_package() {
        let mut pkg = Package::new("a", "1.0");
        let entry = FileEntry {
            path: "/usr/local/bin/a".to_string(),
            sum: String::new(),
            uname: "root".to_string(),
            gname: "wheel".to_string(),
            perm: 0o755,
            fflags: 0,
            kind: FileType::Regular,
            link_target: None,
            config: false,
        };
        assert!(pkg.add_file(entry.clone()).is_ok());
        assert!(pkg.add_file(entry).is_err());
    }
}
