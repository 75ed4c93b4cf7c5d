//! SQLite schema of the local package database.

use rusqlite::Connection;

use crate::error::Result;

/// Schema version recorded in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// DDL for a fresh database. Collection tables cascade from `package` so a
/// single row delete removes everything a package owns.
const DDL: &str = "
CREATE TABLE IF NOT EXISTS package (
    uid            TEXT PRIMARY KEY,
    name           TEXT NOT NULL,
    version        TEXT NOT NULL,
    origin         TEXT NOT NULL DEFAULT '',
    comment        TEXT NOT NULL DEFAULT '',
    desc           TEXT NOT NULL DEFAULT '',
    maintainer     TEXT NOT NULL DEFAULT '',
    www            TEXT NOT NULL DEFAULT '',
    abi            TEXT NOT NULL DEFAULT '',
    prefix         TEXT NOT NULL DEFAULT '',
    flatsize       INTEGER NOT NULL DEFAULT 0,
    pkgsize        INTEGER NOT NULL DEFAULT 0,
    repopath       TEXT NOT NULL DEFAULT '',
    automatic      INTEGER NOT NULL DEFAULT 0,
    locked         INTEGER NOT NULL DEFAULT 0,
    vital          INTEGER NOT NULL DEFAULT 0,
    time_installed INTEGER,
    digest         TEXT NOT NULL DEFAULT '',
    reason         TEXT
);
CREATE INDEX IF NOT EXISTS package_name_idx   ON package(name);
CREATE INDEX IF NOT EXISTS package_origin_idx ON package(origin);

CREATE TABLE IF NOT EXISTS file (
    package_uid TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    path        TEXT NOT NULL,
    sum         TEXT NOT NULL DEFAULT '',
    uname       TEXT NOT NULL DEFAULT '',
    gname       TEXT NOT NULL DEFAULT '',
    perm        INTEGER NOT NULL DEFAULT 0,
    fflags      INTEGER NOT NULL DEFAULT 0,
    type        TEXT NOT NULL,
    link_target TEXT,
    config      INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (package_uid, path)
);
CREATE INDEX IF NOT EXISTS file_path_idx ON file(path);

CREATE TABLE IF NOT EXISTS directory (
    package_uid TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    path        TEXT NOT NULL,
    perm        INTEGER NOT NULL DEFAULT 0,
    uname       TEXT NOT NULL DEFAULT '',
    gname       TEXT NOT NULL DEFAULT '',
    try_remove  INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (package_uid, path)
);
CREATE INDEX IF NOT EXISTS directory_path_idx ON directory(path);

CREATE TABLE IF NOT EXISTS dep (
    package_uid        TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    name               TEXT NOT NULL,
    origin             TEXT NOT NULL DEFAULT '',
    constraint_op      TEXT,
    constraint_version TEXT,
    PRIMARY KEY (package_uid, name, origin)
);
CREATE INDEX IF NOT EXISTS dep_name_idx ON dep(name);

CREATE TABLE IF NOT EXISTS option (
    package_uid   TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    key           TEXT NOT NULL,
    value         TEXT NOT NULL DEFAULT '',
    default_value TEXT,
    description   TEXT,
    PRIMARY KEY (package_uid, key)
);

CREATE TABLE IF NOT EXISTS annotation (
    package_uid TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (package_uid, key)
);

CREATE TABLE IF NOT EXISTS shlib_required (
    package_uid TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    libname     TEXT NOT NULL,
    PRIMARY KEY (package_uid, libname)
);
CREATE INDEX IF NOT EXISTS shlib_required_lib_idx ON shlib_required(libname);

CREATE TABLE IF NOT EXISTS shlib_provided (
    package_uid TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    libname     TEXT NOT NULL,
    PRIMARY KEY (package_uid, libname)
);
CREATE INDEX IF NOT EXISTS shlib_provided_lib_idx ON shlib_provided(libname);

CREATE TABLE IF NOT EXISTS category (
    package_uid TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    PRIMARY KEY (package_uid, name)
);

CREATE TABLE IF NOT EXISTS license (
    package_uid TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    PRIMARY KEY (package_uid, name)
);

CREATE TABLE IF NOT EXISTS provide (
    package_uid TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    PRIMARY KEY (package_uid, name)
);

CREATE TABLE IF NOT EXISTS require (
    package_uid TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    PRIMARY KEY (package_uid, name)
);

CREATE TABLE IF NOT EXISTS pkg_user (
    package_uid TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    PRIMARY KEY (package_uid, name)
);

CREATE TABLE IF NOT EXISTS pkg_group (
    package_uid TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    PRIMARY KEY (package_uid, name)
);

CREATE TABLE IF NOT EXISTS script (
    package_uid TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    kind        TEXT NOT NULL,
    language    TEXT NOT NULL,
    body        TEXT NOT NULL,
    PRIMARY KEY (package_uid, kind, language)
);

CREATE TABLE IF NOT EXISTS message (
    package_uid TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    ord         INTEGER NOT NULL,
    kind        TEXT NOT NULL,
    min_version TEXT,
    max_version TEXT,
    text        TEXT NOT NULL,
    PRIMARY KEY (package_uid, ord)
);

CREATE TABLE IF NOT EXISTS conflict (
    package_uid TEXT NOT NULL REFERENCES package(uid) ON DELETE CASCADE,
    pattern     TEXT NOT NULL,
    PRIMARY KEY (package_uid, pattern)
);
";

/// What: Initialize pragmas and schema on a fresh or existing connection.
///
/// Inputs:
/// - `conn`: Open SQLite connection.
///
/// Output:
/// - Unit; the connection has foreign keys on, durable synchronous mode,
///   and the full schema present.
///
/// Details:
/// - All DDL is idempotent; opening an already-initialized database is a
///   no-op apart from the pragmas.
///
/// # Errors
///
/// Returns `PkgError::Db` when SQLite rejects a statement.
pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;",
    )?;
    conn.execute_batch(DDL)?;
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version == 0 {
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
    }
    Ok(())
}
