//! Configuration for the package manager core.
//!
//! A single [`Config`] value carries every recognized knob. Values come
//! from defaults, then an optional key=value option set (CLI `-o`), then
//! environment variables; later sources win. Unknown keys warn, invalid
//! values fail with `PkgError::Config`.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PkgError, Result};

/// Recognized configuration, with defaults matching a stock installation.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// `PKG_DBDIR` — root of the local package database.
    pub db_dir: PathBuf,
    /// `PKG_CACHEDIR` — artifact cache root.
    pub cache_dir: PathBuf,
    /// `ABI` — platform ABI tag used for repository filtering.
    pub abi: String,
    /// `ASSUME_ALWAYS_YES` — answer every query with yes without asking.
    pub assume_always_yes: bool,
    /// `DEFAULT_ALWAYS_YES` — default queries to yes but still surface them.
    pub default_always_yes: bool,
    /// `REPO_AUTOUPDATE` — refresh catalogues before solving.
    pub repo_autoupdate: bool,
    /// `HANDLE_RC_SCRIPTS` — stop/start rc scripts around upgrades.
    pub handle_rc_scripts: bool,
    /// `AUTOCLEAN` — clean the artifact cache after a successful commit.
    pub autoclean: bool,
    /// `PERMISSIVE` — degrade file conflicts from errors to notices.
    pub permissive: bool,
    /// `CASE_SENSITIVE_MATCH` — name matching case sensitivity.
    pub case_sensitive_match: bool,
    /// `RUN_SCRIPTS` — execute package scripts.
    pub run_scripts: bool,
    /// `DEBUG_LEVEL` — 0..=4, higher is chattier.
    pub debug_level: u8,
    /// `FETCH_RETRY` — fetch attempts before giving up.
    pub fetch_retry: u32,
    /// `FETCH_TIMEOUT` — total time budget for one fetch.
    pub fetch_timeout: Duration,
    /// `UNSET_TIMESTAMP` — zero timestamps in created archives.
    pub unset_timestamp: bool,
    /// `REPOS_DIR` — directories scanned for repository definitions.
    pub repos_dir: Vec<PathBuf>,
    /// `PLUGINS_CONF_DIR` — plugin configuration directory. Recognized for
    /// compatibility; plugin loading itself lives outside the core.
    pub plugins_conf_dir: PathBuf,
    /// `PKG_ENABLE_PLUGINS` — whether the host process loads plugins.
    pub enable_plugins: bool,
    /// `PLUGINS` — plugin names for the host process.
    pub plugins: Vec<String>,
    /// `EVENT_PIPE` — path receiving JSON event lines, when set.
    pub event_pipe: Option<PathBuf>,
    /// `BACKUP_LIB_DIR` — where removed-but-still-needed shared libraries
    /// are preserved.
    pub backup_lib_dir: PathBuf,
    /// `SCRIPT_USER` — unprivileged user scripts drop to, when set.
    pub script_user: Option<String>,
    /// `LUA_INTERPRETER` — interpreter binary for lua scripts.
    pub lua_interpreter: PathBuf,
    /// `SCRIPT_TIMEOUT` — per-script wall-clock budget.
    pub script_timeout: Duration,
    /// `LOCK_WAIT_GRACE` — grace window before a stale lock is broken.
    pub lock_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_dir: PathBuf::from("/var/db/pkg"),
            cache_dir: PathBuf::from("/var/cache/pkg"),
            abi: String::new(),
            assume_always_yes: false,
            default_always_yes: false,
            repo_autoupdate: true,
            handle_rc_scripts: false,
            autoclean: false,
            permissive: false,
            case_sensitive_match: false,
            run_scripts: true,
            debug_level: 0,
            fetch_retry: 3,
            fetch_timeout: Duration::from_secs(30),
            unset_timestamp: false,
            repos_dir: vec![
                PathBuf::from("/etc/pkg"),
                PathBuf::from("/usr/local/etc/pkg/repos"),
            ],
            plugins_conf_dir: PathBuf::from("/usr/local/etc/pkg"),
            enable_plugins: false,
            plugins: Vec::new(),
            event_pipe: None,
            backup_lib_dir: PathBuf::from("/usr/local/lib/compat/pkg"),
            script_user: None,
            lua_interpreter: PathBuf::from("/usr/bin/lua"),
            script_timeout: Duration::from_secs(300),
            lock_grace: Duration::from_secs(5),
        }
    }
}

/// What: Parse a boolean option value.
///
/// Inputs:
/// - `key`: Option name, for the error message.
/// - `value`: Text to parse.
///
/// Output:
/// - The boolean.
///
/// Details:
/// - Accepts the historical spellings: yes/no, true/false, on/off, 1/0,
///   case-insensitive.
///
/// # Errors
///
/// Returns `PkgError::Config` for any other spelling.
fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Ok(true),
        "no" | "false" | "off" | "0" => Ok(false),
        _ => Err(PkgError::Config(format!("{key}: not a boolean: {value}"))),
    }
}

/// Split a list-valued option on commas, trimming entries.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// What: Apply one `KEY=VALUE` option string.
    ///
    /// Inputs:
    /// - `key`: Option name, upper-case as documented.
    /// - `value`: Text value.
    ///
    /// Output:
    /// - `true` when the key was recognized and applied; `false` when the
    ///   key is unknown (callers surface a notice).
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Config` when the key is recognized but the value
    /// does not parse.
    pub fn set(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "PKG_DBDIR" => self.db_dir = PathBuf::from(value),
            "PKG_CACHEDIR" => self.cache_dir = PathBuf::from(value),
            "ABI" => self.abi = value.to_string(),
            "ASSUME_ALWAYS_YES" => self.assume_always_yes = parse_bool(key, value)?,
            "DEFAULT_ALWAYS_YES" => self.default_always_yes = parse_bool(key, value)?,
            "REPO_AUTOUPDATE" => self.repo_autoupdate = parse_bool(key, value)?,
            "HANDLE_RC_SCRIPTS" => self.handle_rc_scripts = parse_bool(key, value)?,
            "AUTOCLEAN" => self.autoclean = parse_bool(key, value)?,
            "PERMISSIVE" => self.permissive = parse_bool(key, value)?,
            "CASE_SENSITIVE_MATCH" => self.case_sensitive_match = parse_bool(key, value)?,
            "RUN_SCRIPTS" => self.run_scripts = parse_bool(key, value)?,
            "DEBUG_LEVEL" => {
                self.debug_level = value
                    .parse()
                    .map_err(|_| PkgError::Config(format!("{key}: not an integer: {value}")))?;
            }
            "FETCH_RETRY" => {
                self.fetch_retry = value
                    .parse()
                    .map_err(|_| PkgError::Config(format!("{key}: not an integer: {value}")))?;
            }
            "FETCH_TIMEOUT" => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| PkgError::Config(format!("{key}: not an integer: {value}")))?;
                self.fetch_timeout = Duration::from_secs(secs);
            }
            "UNSET_TIMESTAMP" => self.unset_timestamp = parse_bool(key, value)?,
            "REPOS_DIR" => {
                self.repos_dir = parse_list(value).into_iter().map(PathBuf::from).collect();
            }
            "PLUGINS_CONF_DIR" => self.plugins_conf_dir = PathBuf::from(value),
            "PKG_ENABLE_PLUGINS" => self.enable_plugins = parse_bool(key, value)?,
            "PLUGINS" => self.plugins = parse_list(value),
            "EVENT_PIPE" => self.event_pipe = Some(PathBuf::from(value)),
            "BACKUP_LIB_DIR" => self.backup_lib_dir = PathBuf::from(value),
            "SCRIPT_USER" => self.script_user = Some(value.to_string()),
            "LUA_INTERPRETER" => self.lua_interpreter = PathBuf::from(value),
            "SCRIPT_TIMEOUT" => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| PkgError::Config(format!("{key}: not an integer: {value}")))?;
                self.script_timeout = Duration::from_secs(secs);
            }
            _ => {
                tracing::warn!(key = %key, "unknown configuration key");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// What: Overlay recognized environment variables.
    ///
    /// Inputs: None (reads the process environment)
    ///
    /// Output:
    /// - Unit; every recognized variable present in the environment has
    ///   been applied.
    ///
    /// Details:
    /// - Each §6 option key doubles as its environment variable name.
    /// - `SOURCE_DATE_EPOCH` is deliberately not handled here; the archive
    ///   writer consumes it directly at pack time.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Config` when a present variable fails to parse.
    pub fn apply_env(&mut self) -> Result<()> {
        const KEYS: &[&str] = &[
            "PKG_DBDIR",
            "PKG_CACHEDIR",
            "ABI",
            "ASSUME_ALWAYS_YES",
            "DEFAULT_ALWAYS_YES",
            "REPO_AUTOUPDATE",
            "HANDLE_RC_SCRIPTS",
            "AUTOCLEAN",
            "PERMISSIVE",
            "CASE_SENSITIVE_MATCH",
            "RUN_SCRIPTS",
            "DEBUG_LEVEL",
            "FETCH_RETRY",
            "FETCH_TIMEOUT",
            "UNSET_TIMESTAMP",
            "REPOS_DIR",
            "PLUGINS_CONF_DIR",
            "PKG_ENABLE_PLUGINS",
            "PLUGINS",
            "EVENT_PIPE",
            "BACKUP_LIB_DIR",
            "SCRIPT_USER",
            "LUA_INTERPRETER",
            "SCRIPT_TIMEOUT",
        ];
        for key in KEYS {
            if let Ok(value) = std::env::var(key) {
                self.set(key, &value)?;
            }
        }
        Ok(())
    }

    /// Path of the local package database file.
    #[must_use]
    pub fn local_db_path(&self) -> PathBuf {
        self.db_dir.join("local.sqlite")
    }

    /// Path of a repository catalogue database.
    #[must_use]
    pub fn repo_db_path(&self, repo_name: &str) -> PathBuf {
        self.db_dir.join(format!("repo-{repo_name}.sqlite"))
    }

    /// Path of the executor journal.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.db_dir.join(".pkg.journal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn set_recognized_keys() {
        let mut config = Config::default();
        assert!(config.set("PKG_DBDIR", "/tmp/db").unwrap());
        assert_eq!(config.db_dir, PathBuf::from("/tmp/db"));
        assert!(config.set("ASSUME_ALWAYS_YES", "yes").unwrap());
        assert!(config.assume_always_yes);
        assert!(config.set("FETCH_RETRY", "5").unwrap());
        assert_eq!(config.fetch_retry, 5);
        assert!(config.set("REPOS_DIR", "/a, /b").unwrap());
        assert_eq!(config.repos_dir, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn unknown_keys_are_not_fatal() {
        let mut config = Config::default();
        assert!(!config.set("NOT_A_KEY", "1").unwrap());
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let mut config = Config::default();
        assert!(matches!(
            config.set("PERMISSIVE", "maybe"),
            Err(PkgError::Config(_))
        ));
        assert!(matches!(
            config.set("DEBUG_LEVEL", "high"),
            Err(PkgError::Config(_))
        ));
    }

    #[test]
    fn boolean_spellings() {
        for s in ["yes", "TRUE", "On", "1"] {
            #[allow(clippy::unwrap_used)]
            let v = parse_bool("K", s).unwrap();
            assert!(v);
        }
        for s in ["no", "False", "OFF", "0"] {
            #[allow(clippy::unwrap_used)]
            let v = parse_bool("K", s).unwrap();
            assert!(!v);
        }
    }

    #[test]
    fn derived_paths() {
        let mut config = Config::default();
        config.db_dir = PathBuf::from("/db");
        assert_eq!(config.local_db_path(), PathBuf::from("/db/local.sqlite"));
        assert_eq!(
            config.repo_db_path("main"),
            PathBuf::from("/db/repo-main.sqlite")
        );
        assert_eq!(config.journal_path(), PathBuf::from("/db/.pkg.journal"));
    }
}
