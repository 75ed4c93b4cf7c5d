//! Local package database (LPDB).
//!
//! The authoritative record of installed packages, backed by SQLite at
//! `<db_dir>/local.sqlite`. Access is guarded by the lock protocol in
//! [`lock`]; every mutator runs inside a transaction and is retried once
//! at the transaction boundary before the error surfaces.

pub mod codec;
pub mod lock;
pub mod schema;

pub use codec::PackageSummary;
pub use lock::{DbLock, LockMode};

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Transaction, params};

use crate::config::Config;
use crate::error::{PkgError, Result};
use crate::events::EventBus;
use crate::types::{FileType, MatchExpr, Package};

/// Handle over the local package database.
#[derive(Debug)]
pub struct Pkgdb {
    conn: Connection,
    lock: DbLock,
    events: Arc<EventBus>,
    db_dir: PathBuf,
}

impl Pkgdb {
    /// What: Open the local database under a lock mode.
    ///
    /// Inputs:
    /// - `config`: Supplies `db_dir` and the stale-lock grace window.
    /// - `events`: Bus receiving lock-break notices.
    /// - `mode`: Requested lock mode.
    ///
    /// Output:
    /// - An open handle; schema is initialized when absent.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::LockBusy` when blocked, `PkgError::Io` or
    /// `PkgError::Db` for open failures.
    pub fn open(config: &Config, events: Arc<EventBus>, mode: LockMode) -> Result<Self> {
        std::fs::create_dir_all(&config.db_dir)?;
        let (db_lock, broken) =
            DbLock::acquire_with_report(&config.db_dir, mode, config.lock_grace)?;
        for pid in broken {
            events.notice(format!("broke stale database lock held by dead pid {pid}"));
        }
        let conn = Connection::open(config.local_db_path())?;
        schema::init(&conn)?;
        Ok(Self {
            conn,
            lock: db_lock,
            events,
            db_dir: config.db_dir.clone(),
        })
    }

    /// Currently held lock mode.
    #[must_use]
    pub const fn lock_mode(&self) -> LockMode {
        self.lock.mode()
    }

    /// Upgrade an `ADVISORY` lock to `EXCLUSIVE` (see [`DbLock::upgrade`]).
    ///
    /// # Errors
    ///
    /// Returns `PkgError::LockBusy` while other holders remain.
    pub fn upgrade_lock(&mut self) -> Result<()> {
        self.lock.upgrade()
    }

    /// Writes are refused without an `EXCLUSIVE` lock.
    fn require_exclusive(&self) -> Result<()> {
        if self.lock.mode() == LockMode::Exclusive {
            Ok(())
        } else {
            Err(PkgError::Config(
                "database writes require an EXCLUSIVE lock".to_string(),
            ))
        }
    }

    /// What: Run a closure inside a transaction, retrying once on DB error.
    ///
    /// Inputs:
    /// - `body`: Work against the open transaction.
    ///
    /// Output:
    /// - The closure result after a committed transaction.
    ///
    /// Details:
    /// - A `PkgError::Db` from the first attempt rolls back and retries
    ///   exactly once; every other error (and a second DB failure)
    ///   surfaces after rollback. No event other than the error is
    ///   emitted.
    fn with_tx<T>(&mut self, body: impl Fn(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut retried = false;
        loop {
            let tx = self.conn.transaction()?;
            match body(&tx) {
                Ok(value) => {
                    tx.commit()?;
                    return Ok(value);
                }
                Err(PkgError::Db(e)) if !retried => {
                    drop(tx);
                    tracing::warn!(error = %e, "transaction failed, retrying once");
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Load a full package by uid.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` on query failure.
    pub fn get(&self, uid: &str) -> Result<Option<Package>> {
        codec::load_package(&self.conn, uid)
    }

    /// Identity summaries of every installed package, uid-ordered.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` on query failure.
    pub fn summaries(&self) -> Result<Vec<PackageSummary>> {
        codec::list_summaries(&self.conn)
    }

    /// What: Query installed packages by match expression.
    ///
    /// Inputs:
    /// - `expr`: Name/origin match expression.
    ///
    /// Output:
    /// - Fully loaded packages in uid order.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` on query failure.
    pub fn query(&self, expr: &MatchExpr) -> Result<Vec<Package>> {
        let mut out = Vec::new();
        for summary in self.summaries()? {
            if expr.matches(&summary.name, &summary.origin)
                && let Some(pkg) = self.get(&summary.uid)?
            {
                out.push(pkg);
            }
        }
        Ok(out)
    }

    /// What: Find the installed package carrying a name.
    ///
    /// Inputs:
    /// - `name`: Exact package name.
    ///
    /// Output:
    /// - The package, or `None` when not installed.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` on query failure.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Package>> {
        let uid: Option<String> = self
            .conn
            .query_row(
                "SELECT uid FROM package WHERE name = ?1 ORDER BY uid LIMIT 1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match uid {
            Some(uid) => self.get(&uid),
            None => Ok(None),
        }
    }

    /// What: Answer "which package owns this file?".
    ///
    /// Inputs:
    /// - `path`: Absolute normalized path.
    ///
    /// Output:
    /// - Uids of owning packages; more than one only for config-file pairs.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` on query failure.
    pub fn which_owns(&self, path: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT package_uid FROM file WHERE path = ?1 ORDER BY package_uid")?;
        let rows = stmt.query_map(params![path], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// What: Uids of installed packages that depend on a name.
    ///
    /// Inputs:
    /// - `name`: Package name appearing on dependency edges.
    ///
    /// Output:
    /// - Uids in deterministic order.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` on query failure.
    pub fn reverse_deps(&self, name: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT package_uid FROM dep WHERE name = ?1 ORDER BY package_uid",
        )?;
        let rows = stmt.query_map(params![name], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// What: Uids of packages referencing a directory.
    ///
    /// Inputs:
    /// - `path`: Absolute normalized directory path.
    ///
    /// Output:
    /// - Uids in deterministic order; `try_remove` directories are only
    ///   deleted once this set is empty.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` on query failure.
    pub fn dir_owners(&self, path: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT package_uid FROM directory WHERE path = ?1 ORDER BY package_uid",
        )?;
        let rows = stmt.query_map(params![path], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Uids of packages providing a shared library.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` on query failure.
    pub fn shlib_providers(&self, lib: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT package_uid FROM shlib_provided WHERE libname = ?1 ORDER BY package_uid",
        )?;
        let rows = stmt.query_map(params![lib], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Uids of packages requiring a shared library.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` on query failure.
    pub fn shlib_requirers(&self, lib: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT package_uid FROM shlib_required WHERE libname = ?1 ORDER BY package_uid",
        )?;
        let rows = stmt.query_map(params![lib], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// What: Uids eligible for autoremoval.
    ///
    /// Inputs: None
    ///
    /// Output:
    /// - Uids of packages with `automatic = true` and an empty reverse-dep
    ///   set, in uid order.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` on query failure.
    pub fn autoremove_candidates(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT uid FROM package WHERE automatic = 1
               AND name NOT IN (SELECT name FROM dep)
             ORDER BY uid",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Mutators
    // ------------------------------------------------------------------

    /// What: Register a package and all of its collections.
    ///
    /// Inputs:
    /// - `pkg`: Validated package; `uid` must be set and unused.
    ///
    /// Output:
    /// - Unit; the package row and collections are committed.
    ///
    /// Details:
    /// - Cross-package file ownership is enforced here: a regular-file
    ///   path already owned by another package is a `Conflict` unless
    ///   both entries are config files.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Config` without an exclusive lock,
    /// `PkgError::Conflict` on file collisions, `PkgError::Db` otherwise.
    pub fn register(&mut self, pkg: &Package) -> Result<()> {
        self.require_exclusive()?;
        if pkg.uid.is_empty() {
            return Err(PkgError::Parse(format!("{}: empty uid", pkg.name)));
        }
        self.with_tx(|tx| {
            for file in &pkg.files {
                if file.kind != FileType::Regular {
                    continue;
                }
                let owner: Option<(String, bool)> = tx
                    .query_row(
                        "SELECT package_uid, config FROM file
                         WHERE path = ?1 AND package_uid != ?2 LIMIT 1",
                        params![file.path, pkg.uid],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                if let Some((owner_uid, owner_config)) = owner
                    && !(owner_config && file.config)
                {
                    return Err(PkgError::Conflict {
                        path: file.path.clone(),
                        owner: owner_uid,
                        claimer: pkg.uid.clone(),
                    });
                }
            }
            codec::insert_package(tx, pkg)
        })
    }

    /// What: Replace a package row with its upgraded successor.
    ///
    /// Inputs:
    /// - `old_uid`: Row being superseded.
    /// - `new_pkg`: Replacement package.
    ///
    /// Output:
    /// - Unit; deletion and insertion commit in the same transaction.
    ///
    /// Details:
    /// - Because the old row is gone before the new one is checked, the
    ///   pair never trips the cross-package file uniqueness rule on paths
    ///   they share.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::NotFound` when `old_uid` is absent,
    /// `PkgError::Conflict` when the new files collide with a third
    /// package.
    pub fn replace(&mut self, old_uid: &str, new_pkg: &Package) -> Result<()> {
        self.require_exclusive()?;
        if new_pkg.uid.is_empty() {
            return Err(PkgError::Parse(format!("{}: empty uid", new_pkg.name)));
        }
        self.with_tx(|tx| {
            let changed = tx.execute("DELETE FROM package WHERE uid = ?1", params![old_uid])?;
            if changed == 0 {
                return Err(PkgError::NotFound(old_uid.to_string()));
            }
            for file in &new_pkg.files {
                if file.kind != FileType::Regular {
                    continue;
                }
                let owner: Option<(String, bool)> = tx
                    .query_row(
                        "SELECT package_uid, config FROM file
                         WHERE path = ?1 AND package_uid != ?2 LIMIT 1",
                        params![file.path, new_pkg.uid],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                if let Some((owner_uid, owner_config)) = owner
                    && !(owner_config && file.config)
                {
                    return Err(PkgError::Conflict {
                        path: file.path.clone(),
                        owner: owner_uid,
                        claimer: new_pkg.uid.clone(),
                    });
                }
            }
            codec::insert_package(tx, new_pkg)
        })
    }

    /// What: Complete a registration by stamping the install time.
    ///
    /// Inputs:
    /// - `uid`: Registered package.
    /// - `time_installed`: Unix timestamp.
    ///
    /// Output:
    /// - Unit.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::NotFound` when the uid is absent.
    pub fn register_finale(&mut self, uid: &str, time_installed: u64) -> Result<()> {
        self.require_exclusive()?;
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE package SET time_installed = ?2 WHERE uid = ?1",
                params![uid, time_installed],
            )?;
            if changed == 0 {
                return Err(PkgError::NotFound(uid.to_string()));
            }
            Ok(())
        })
    }

    /// What: Remove a package row and everything it owns.
    ///
    /// Inputs:
    /// - `uid`: Package to remove.
    ///
    /// Output:
    /// - Unit; collection rows cascade.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::NotFound` when the uid is absent.
    pub fn deregister(&mut self, uid: &str) -> Result<()> {
        self.require_exclusive()?;
        self.with_tx(|tx| {
            let changed = tx.execute("DELETE FROM package WHERE uid = ?1", params![uid])?;
            if changed == 0 {
                return Err(PkgError::NotFound(uid.to_string()));
            }
            Ok(())
        })
    }

    /// Set or clear the automatic flag.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::NotFound` when the uid is absent.
    pub fn set_auto(&mut self, uid: &str, automatic: bool) -> Result<()> {
        self.set_flag(uid, "automatic", automatic)
    }

    /// Set or clear the user lock.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::NotFound` when the uid is absent.
    pub fn set_locked(&mut self, uid: &str, locked: bool) -> Result<()> {
        self.set_flag(uid, "locked", locked)
    }

    fn set_flag(&mut self, uid: &str, column: &str, value: bool) -> Result<()> {
        self.require_exclusive()?;
        let sql = format!("UPDATE package SET {column} = ?2 WHERE uid = ?1");
        self.with_tx(|tx| {
            let changed = tx.execute(&sql, params![uid, value])?;
            if changed == 0 {
                return Err(PkgError::NotFound(uid.to_string()));
            }
            Ok(())
        })
    }

    /// What: Set or delete an annotation.
    ///
    /// Inputs:
    /// - `uid`: Target package.
    /// - `key`: Annotation key.
    /// - `value`: New value, or `None` to delete.
    ///
    /// Output:
    /// - Unit.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::NotFound` when the uid is absent.
    pub fn set_annotation(&mut self, uid: &str, key: &str, value: Option<&str>) -> Result<()> {
        self.require_exclusive()?;
        self.with_tx(|tx| {
            let exists: Option<String> = tx
                .query_row(
                    "SELECT uid FROM package WHERE uid = ?1",
                    params![uid],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(PkgError::NotFound(uid.to_string()));
            }
            match value {
                Some(value) => {
                    tx.execute(
                        "INSERT INTO annotation (package_uid, key, value) VALUES (?1, ?2, ?3)
                         ON CONFLICT(package_uid, key) DO UPDATE SET value = excluded.value",
                        params![uid, key, value],
                    )?;
                }
                None => {
                    tx.execute(
                        "DELETE FROM annotation WHERE package_uid = ?1 AND key = ?2",
                        params![uid, key],
                    )?;
                }
            }
            Ok(())
        })
    }

    /// Change the recorded origin of a package.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::NotFound` when the uid is absent.
    pub fn set_origin(&mut self, uid: &str, origin: &str) -> Result<()> {
        self.require_exclusive()?;
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE package SET origin = ?2 WHERE uid = ?1",
                params![uid, origin],
            )?;
            if changed == 0 {
                return Err(PkgError::NotFound(uid.to_string()));
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Backup / restore
    // ------------------------------------------------------------------

    /// What: Stream a consistent snapshot of the database.
    ///
    /// Inputs:
    /// - `writer`: Destination byte stream.
    ///
    /// Output:
    /// - Number of bytes written.
    ///
    /// Details:
    /// - Uses the SQLite online backup API into a temporary file in the
    ///   database directory, then streams that file. A `READ` lock is
    ///   sufficient.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Db` or `PkgError::Io` on failure.
    pub fn dump(&self, writer: &mut dyn Write) -> Result<u64> {
        let tmp = tempfile::NamedTempFile::new_in(&self.db_dir)?;
        {
            let mut dst = Connection::open(tmp.path())?;
            let backup = rusqlite::backup::Backup::new(&self.conn, &mut dst)?;
            backup.run_to_completion(256, Duration::from_millis(2), None)?;
        }
        let mut file = File::open(tmp.path())?;
        Ok(io::copy(&mut file, writer)?)
    }

    /// What: Replace database contents from a snapshot stream.
    ///
    /// Inputs:
    /// - `reader`: Snapshot produced by [`Pkgdb::dump`].
    ///
    /// Output:
    /// - Unit; previous contents are overwritten.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Config` without an exclusive lock, otherwise
    /// `PkgError::Db`/`PkgError::Io`.
    pub fn load(&mut self, reader: &mut dyn Read) -> Result<()> {
        self.require_exclusive()?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.db_dir)?;
        io::copy(reader, tmp.as_file_mut())?;
        tmp.as_file_mut().sync_all()?;
        let src = Connection::open(tmp.path())?;
        let backup = rusqlite::backup::Backup::new(&src, &mut self.conn)?;
        backup.run_to_completion(256, Duration::from_millis(2), None)?;
        self.events.notice("database restored from snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileEntry;

    #[allow(clippy::unwrap_used)]
    fn test_db(dir: &std::path::Path, mode: LockMode) -> Pkgdb {
        let mut config = Config::default();
        config.db_dir = dir.to_path_buf();
        config.lock_grace = Duration::from_millis(10);
        Pkgdb::open(&config, Arc::new(EventBus::new()), mode).unwrap()
    }

    fn simple_pkg(name: &str, version: &str) -> Package {
        let mut pkg = Package::new(name, version);
        pkg.origin = format!("misc/{name}");
        pkg
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn writes_require_exclusive_lock() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut db = test_db(dir.path(), LockMode::Read);
            let err = db.register(&simple_pkg("a", "1.0"));
            assert!(matches!(err, Err(PkgError::Config(_))));
        }
        let mut db = test_db(dir.path(), LockMode::Exclusive);
        db.register(&simple_pkg("a", "1.0")).unwrap();
        assert!(db.get("a").unwrap().is_some());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn register_rejects_cross_package_file_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = test_db(dir.path(), LockMode::Exclusive);
        let entry = FileEntry {
            path: "/usr/local/bin/tool".to_string(),
            sum: "aa".repeat(32),
            uname: "root".to_string(),
            gname: "wheel".to_string(),
            perm: 0o755,
            fflags: 0,
            kind: FileType::Regular,
            link_target: None,
            config: false,
        };
        let mut p1 = simple_pkg("p1", "1.0");
        p1.add_file(entry.clone()).unwrap();
        db.register(&p1).unwrap();

        let mut p2 = simple_pkg("p2", "1.0");
        p2.add_file(entry.clone()).unwrap();
        match db.register(&p2) {
            Err(PkgError::Conflict { path, owner, claimer }) => {
                assert_eq!(path, "/usr/local/bin/tool");
                assert_eq!(owner, "p1");
                assert_eq!(claimer, "p2");
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
        // Nothing from p2 was committed.
        assert!(db.get("p2").unwrap().is_none());

        // Config-file pairs are exempt.
        let mut c1 = simple_pkg("c1", "1.0");
        let mut cfg_entry = entry.clone();
        cfg_entry.path = "/usr/local/etc/tool.conf".to_string();
        cfg_entry.config = true;
        c1.add_file(cfg_entry.clone()).unwrap();
        db.register(&c1).unwrap();
        let mut c2 = simple_pkg("c2", "1.0");
        c2.add_file(cfg_entry).unwrap();
        db.register(&c2).unwrap();
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn flags_annotations_and_origin() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = test_db(dir.path(), LockMode::Exclusive);
        db.register(&simple_pkg("a", "1.0")).unwrap();

        db.set_auto("a", true).unwrap();
        db.set_locked("a", true).unwrap();
        db.set_annotation("a", "repository", Some("main")).unwrap();
        db.set_origin("a", "devel/a").unwrap();

        let pkg = db.get("a").unwrap().unwrap();
        assert!(pkg.automatic);
        assert!(pkg.locked);
        assert_eq!(pkg.annotations.get("repository").map(String::as_str), Some("main"));
        assert_eq!(pkg.origin, "devel/a");

        db.set_annotation("a", "repository", None).unwrap();
        let pkg = db.get("a").unwrap().unwrap();
        assert!(pkg.annotations.is_empty());

        assert!(matches!(
            db.set_auto("missing", true),
            Err(PkgError::NotFound(_))
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn reverse_deps_and_autoremove() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = test_db(dir.path(), LockMode::Exclusive);
        let mut a = simple_pkg("a", "1.0");
        a.add_dep(crate::types::DependencyEdge::any("b"));
        db.register(&a).unwrap();
        let mut b = simple_pkg("b", "1.0");
        b.automatic = true;
        db.register(&b).unwrap();
        let mut orphan = simple_pkg("orphan", "1.0");
        orphan.automatic = true;
        db.register(&orphan).unwrap();

        assert_eq!(db.reverse_deps("b").unwrap(), vec!["a"]);
        assert_eq!(db.autoremove_candidates().unwrap(), vec!["orphan"]);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn dump_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = test_db(dir.path(), LockMode::Exclusive);
        db.register(&simple_pkg("keepme", "2.0")).unwrap();

        let mut snapshot = Vec::new();
        db.dump(&mut snapshot).unwrap();
        assert!(!snapshot.is_empty());

        db.deregister("keepme").unwrap();
        assert!(db.get("keepme").unwrap().is_none());

        db.load(&mut snapshot.as_slice()).unwrap();
        let pkg = db.get("keepme").unwrap().unwrap();
        assert_eq!(pkg.version, "2.0");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn query_by_expressions() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = test_db(dir.path(), LockMode::Exclusive);
        db.register(&simple_pkg("py39-foo", "1.0")).unwrap();
        db.register(&simple_pkg("py39-bar", "1.0")).unwrap();
        db.register(&simple_pkg("zsh", "5.9")).unwrap();

        let globbed = db.query(&MatchExpr::glob("py39-*").unwrap()).unwrap();
        assert_eq!(globbed.len(), 2);
        let exact = db.query(&MatchExpr::exact("ZSH", false)).unwrap();
        assert_eq!(exact.len(), 1);
        let origin = db
            .query(&MatchExpr::Origin("misc/zsh".to_string()))
            .unwrap();
        assert_eq!(origin.len(), 1);
    }
}
