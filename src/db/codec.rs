//! Row codec shared by the local database and repository catalogues.
//!
//! Both stores use the same schema, so one pair of insert/load routines
//! serves them. All routines operate on a caller-provided connection or
//! transaction; locking policy stays with the caller.

use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension, Transaction, params};

use crate::deps::{ConstraintOp, VersionConstraint};
use crate::error::{PkgError, Result};
use crate::types::{
    DependencyEdge, DirEntry, FileEntry, FileType, Message, MessageKind, Package, PackageOption,
    Script, ScriptKind, ScriptLanguage,
};

fn file_type_str(kind: FileType) -> &'static str {
    match kind {
        FileType::Regular => "regular",
        FileType::Symlink => "symlink",
        FileType::Directory => "directory",
    }
}

fn file_type_from(text: &str) -> Result<FileType> {
    match text {
        "regular" => Ok(FileType::Regular),
        "symlink" => Ok(FileType::Symlink),
        "directory" => Ok(FileType::Directory),
        other => Err(PkgError::Corrupt(format!("unknown file type: {other}"))),
    }
}

fn script_kind_from(text: &str) -> Result<ScriptKind> {
    match text {
        "pre-install" => Ok(ScriptKind::PreInstall),
        "post-install" => Ok(ScriptKind::PostInstall),
        "pre-deinstall" => Ok(ScriptKind::PreDeinstall),
        "post-deinstall" => Ok(ScriptKind::PostDeinstall),
        "pre-upgrade" => Ok(ScriptKind::PreUpgrade),
        "post-upgrade" => Ok(ScriptKind::PostUpgrade),
        other => Err(PkgError::Corrupt(format!("unknown script kind: {other}"))),
    }
}

fn language_str(language: ScriptLanguage) -> &'static str {
    match language {
        ScriptLanguage::Shell => "shell",
        ScriptLanguage::Lua => "lua",
    }
}

fn language_from(text: &str) -> Result<ScriptLanguage> {
    match text {
        "shell" => Ok(ScriptLanguage::Shell),
        "lua" => Ok(ScriptLanguage::Lua),
        other => Err(PkgError::Corrupt(format!("unknown script language: {other}"))),
    }
}

fn message_kind_str(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Always => "always",
        MessageKind::Install => "install",
        MessageKind::Upgrade => "upgrade",
        MessageKind::Remove => "remove",
    }
}

fn message_kind_from(text: &str) -> Result<MessageKind> {
    match text {
        "always" => Ok(MessageKind::Always),
        "install" => Ok(MessageKind::Install),
        "upgrade" => Ok(MessageKind::Upgrade),
        "remove" => Ok(MessageKind::Remove),
        other => Err(PkgError::Corrupt(format!("unknown message kind: {other}"))),
    }
}

fn constraint_op_from(text: &str) -> Result<ConstraintOp> {
    match text {
        "=" => Ok(ConstraintOp::Eq),
        "<" => Ok(ConstraintOp::Lt),
        "<=" => Ok(ConstraintOp::Le),
        ">" => Ok(ConstraintOp::Gt),
        ">=" => Ok(ConstraintOp::Ge),
        other => Err(PkgError::Corrupt(format!("unknown constraint op: {other}"))),
    }
}

/// What: Insert a package row and every collection it owns.
///
/// Inputs:
/// - `tx`: Open transaction; commit/rollback stays with the caller.
/// - `pkg`: Package to persist.
///
/// Output:
/// - Unit; all rows are written.
///
/// # Errors
///
/// Returns `PkgError::Db` on constraint violations (duplicate uid included).
pub fn insert_package(tx: &Transaction<'_>, pkg: &Package) -> Result<()> {
    tx.execute(
        "INSERT INTO package (uid, name, version, origin, comment, desc, maintainer, www, abi,
                              prefix, flatsize, pkgsize, repopath, automatic, locked, vital,
                              time_installed, digest, reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            pkg.uid,
            pkg.name,
            pkg.version,
            pkg.origin,
            pkg.comment,
            pkg.desc,
            pkg.maintainer,
            pkg.www,
            pkg.abi,
            pkg.prefix,
            pkg.flatsize,
            pkg.pkgsize,
            pkg.repopath,
            pkg.automatic,
            pkg.locked,
            pkg.vital,
            pkg.time_installed,
            pkg.digest,
            pkg.reason,
        ],
    )?;

    for f in &pkg.files {
        tx.execute(
            "INSERT INTO file (package_uid, path, sum, uname, gname, perm, fflags, type, link_target, config)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                pkg.uid,
                f.path,
                f.sum,
                f.uname,
                f.gname,
                f.perm,
                f.fflags,
                file_type_str(f.kind),
                f.link_target,
                f.config,
            ],
        )?;
    }
    for d in &pkg.dirs {
        tx.execute(
            "INSERT INTO directory (package_uid, path, perm, uname, gname, try_remove)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![pkg.uid, d.path, d.perm, d.uname, d.gname, d.try_remove],
        )?;
    }
    for dep in &pkg.deps {
        tx.execute(
            "INSERT INTO dep (package_uid, name, origin, constraint_op, constraint_version)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                pkg.uid,
                dep.name,
                dep.origin.clone().unwrap_or_default(),
                dep.version.as_ref().map(|c| c.op.to_string()),
                dep.version.as_ref().map(|c| c.version.clone()),
            ],
        )?;
    }
    for (key, option) in &pkg.options {
        tx.execute(
            "INSERT INTO option (package_uid, key, value, default_value, description)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![pkg.uid, key, option.value, option.default_value, option.description],
        )?;
    }
    for (key, value) in &pkg.annotations {
        tx.execute(
            "INSERT INTO annotation (package_uid, key, value) VALUES (?1, ?2, ?3)",
            params![pkg.uid, key, value],
        )?;
    }
    for lib in &pkg.shlibs_required {
        tx.execute(
            "INSERT INTO shlib_required (package_uid, libname) VALUES (?1, ?2)",
            params![pkg.uid, lib],
        )?;
    }
    for lib in &pkg.shlibs_provided {
        tx.execute(
            "INSERT INTO shlib_provided (package_uid, libname) VALUES (?1, ?2)",
            params![pkg.uid, lib],
        )?;
    }
    for (table, values) in [
        ("category", &pkg.categories),
        ("license", &pkg.licenses),
        ("provide", &pkg.provides),
        ("require", &pkg.requires),
        ("pkg_user", &pkg.users),
        ("pkg_group", &pkg.groups),
    ] {
        for value in values {
            tx.execute(
                &format!("INSERT INTO {table} (package_uid, name) VALUES (?1, ?2)"),
                params![pkg.uid, value],
            )?;
        }
    }
    for script in &pkg.scripts {
        tx.execute(
            "INSERT INTO script (package_uid, kind, language, body) VALUES (?1, ?2, ?3, ?4)",
            params![
                pkg.uid,
                script.kind.as_str(),
                language_str(script.language),
                script.body,
            ],
        )?;
    }
    for (ord, message) in pkg.messages.iter().enumerate() {
        tx.execute(
            "INSERT INTO message (package_uid, ord, kind, min_version, max_version, text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                pkg.uid,
                ord as i64,
                message_kind_str(message.kind),
                message.min_version,
                message.max_version,
                message.text,
            ],
        )?;
    }
    for pattern in &pkg.conflicts {
        tx.execute(
            "INSERT INTO conflict (package_uid, pattern) VALUES (?1, ?2)",
            params![pkg.uid, pattern],
        )?;
    }
    Ok(())
}

/// What: Load a full package by uid.
///
/// Inputs:
/// - `conn`: Connection over an initialized schema.
/// - `uid`: Package uid.
///
/// Output:
/// - The package with every collection populated, or `None`.
///
/// # Errors
///
/// Returns `PkgError::Db` on query failure and `PkgError::Corrupt` when a
/// stored enum value is unknown.
#[allow(clippy::too_many_lines)]
pub fn load_package(conn: &Connection, uid: &str) -> Result<Option<Package>> {
    let row = conn
        .query_row(
            "SELECT uid, name, version, origin, comment, desc, maintainer, www, abi, prefix,
                    flatsize, pkgsize, repopath, automatic, locked, vital, time_installed,
                    digest, reason
             FROM package WHERE uid = ?1",
            params![uid],
            |row| {
                Ok(Package {
                    uid: row.get(0)?,
                    name: row.get(1)?,
                    version: row.get(2)?,
                    origin: row.get(3)?,
                    comment: row.get(4)?,
                    desc: row.get(5)?,
                    maintainer: row.get(6)?,
                    www: row.get(7)?,
                    abi: row.get(8)?,
                    prefix: row.get(9)?,
                    flatsize: row.get(10)?,
                    pkgsize: row.get(11)?,
                    repopath: row.get(12)?,
                    automatic: row.get(13)?,
                    locked: row.get(14)?,
                    vital: row.get(15)?,
                    time_installed: row.get(16)?,
                    digest: row.get(17)?,
                    reason: row.get(18)?,
                    ..Package::default()
                })
            },
        )
        .optional()?;
    let Some(mut pkg) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT path, sum, uname, gname, perm, fflags, type, link_target, config
         FROM file WHERE package_uid = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![uid], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, u32>(4)?,
            row.get::<_, u64>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, Option<String>>(7)?,
            row.get::<_, bool>(8)?,
        ))
    })?;
    for row in rows {
        let (path, sum, uname, gname, perm, fflags, kind, link_target, config) = row?;
        pkg.files.push(FileEntry {
            path,
            sum,
            uname,
            gname,
            perm,
            fflags,
            kind: file_type_from(&kind)?,
            link_target,
            config,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT path, perm, uname, gname, try_remove
         FROM directory WHERE package_uid = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![uid], |row| {
        Ok(DirEntry {
            path: row.get(0)?,
            perm: row.get(1)?,
            uname: row.get(2)?,
            gname: row.get(3)?,
            try_remove: row.get(4)?,
        })
    })?;
    for row in rows {
        pkg.dirs.push(row?);
    }

    let mut stmt = conn.prepare(
        "SELECT name, origin, constraint_op, constraint_version
         FROM dep WHERE package_uid = ?1 ORDER BY name, origin",
    )?;
    let rows = stmt.query_map(params![uid], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
        ))
    })?;
    for row in rows {
        let (name, origin, op, version) = row?;
        let constraint = match (op, version) {
            (Some(op), Some(version)) => Some(VersionConstraint {
                op: constraint_op_from(&op)?,
                version,
            }),
            _ => None,
        };
        pkg.deps.push(DependencyEdge {
            name,
            origin: if origin.is_empty() { None } else { Some(origin) },
            version: constraint,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT key, value, default_value, description FROM option WHERE package_uid = ?1",
    )?;
    let rows = stmt.query_map(params![uid], |row| {
        Ok((
            row.get::<_, String>(0)?,
            PackageOption {
                value: row.get(1)?,
                default_value: row.get(2)?,
                description: row.get(3)?,
            },
        ))
    })?;
    let mut options = BTreeMap::new();
    for row in rows {
        let (key, option) = row?;
        options.insert(key, option);
    }
    pkg.options = options;

    let mut stmt =
        conn.prepare("SELECT key, value FROM annotation WHERE package_uid = ?1")?;
    let rows = stmt.query_map(params![uid], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (key, value) = row?;
        pkg.annotations.insert(key, value);
    }

    for (table, target) in [
        ("shlib_required", &mut pkg.shlibs_required),
        ("shlib_provided", &mut pkg.shlibs_provided),
    ] {
        let mut stmt =
            conn.prepare(&format!("SELECT libname FROM {table} WHERE package_uid = ?1"))?;
        let rows = stmt.query_map(params![uid], |row| row.get::<_, String>(0))?;
        for row in rows {
            target.insert(row?);
        }
    }

    for (table, target) in [
        ("category", &mut pkg.categories),
        ("license", &mut pkg.licenses),
        ("provide", &mut pkg.provides),
        ("require", &mut pkg.requires),
        ("pkg_user", &mut pkg.users),
        ("pkg_group", &mut pkg.groups),
    ] {
        let mut stmt = conn.prepare(&format!(
            "SELECT name FROM {table} WHERE package_uid = ?1 ORDER BY name"
        ))?;
        let rows = stmt.query_map(params![uid], |row| row.get::<_, String>(0))?;
        for row in rows {
            target.push(row?);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT kind, language, body FROM script WHERE package_uid = ?1 ORDER BY kind, language",
    )?;
    let rows = stmt.query_map(params![uid], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    for row in rows {
        let (kind, language, body) = row?;
        pkg.scripts.push(Script {
            kind: script_kind_from(&kind)?,
            language: language_from(&language)?,
            body,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT kind, min_version, max_version, text
         FROM message WHERE package_uid = ?1 ORDER BY ord",
    )?;
    let rows = stmt.query_map(params![uid], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;
    for row in rows {
        let (kind, min_version, max_version, text) = row?;
        pkg.messages.push(Message {
            kind: message_kind_from(&kind)?,
            min_version,
            max_version,
            text,
        });
    }

    let mut stmt =
        conn.prepare("SELECT pattern FROM conflict WHERE package_uid = ?1 ORDER BY pattern")?;
    let rows = stmt.query_map(params![uid], |row| row.get::<_, String>(0))?;
    for row in rows {
        pkg.conflicts.push(row?);
    }

    Ok(Some(pkg))
}

/// Identity summary of a stored package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSummary {
    /// Package uid.
    pub uid: String,
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: String,
    /// Package origin.
    pub origin: String,
}

/// What: List identity summaries of every stored package.
///
/// Inputs:
/// - `conn`: Connection over an initialized schema.
///
/// Output:
/// - Summaries ordered by uid for deterministic traversal.
///
/// # Errors
///
/// Returns `PkgError::Db` on query failure.
pub fn list_summaries(conn: &Connection) -> Result<Vec<PackageSummary>> {
    let mut stmt =
        conn.prepare("SELECT uid, name, version, origin FROM package ORDER BY uid")?;
    let rows = stmt.query_map([], |row| {
        Ok(PackageSummary {
            uid: row.get(0)?,
            name: row.get(1)?,
            version: row.get(2)?,
            origin: row.get(3)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::deps::ConstraintOp;

    #[allow(clippy::unwrap_used)]
    fn connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init(&conn).unwrap();
        conn
    }

    #[allow(clippy::unwrap_used)]
    fn rich_package() -> Package {
        let mut pkg = Package::new("rich", "3.4_2");
        pkg.origin = "devel/rich".to_string();
        pkg.comment = "Rich test package".to_string();
        pkg.desc = "Covers every collection".to_string();
        pkg.maintainer = "x@example.org".to_string();
        pkg.www = "https://example.org".to_string();
        pkg.abi = "Unix:13:amd64".to_string();
        pkg.prefix = "/usr/local".to_string();
        pkg.flatsize = 4096;
        pkg.automatic = true;
        pkg.add_dep(DependencyEdge {
            name: "base".to_string(),
            origin: Some("devel/base".to_string()),
            version: Some(VersionConstraint::new(ConstraintOp::Ge, "1.0")),
        });
        pkg.add_dep(DependencyEdge::any("zlib"));
        pkg.add_file(FileEntry {
            path: "/usr/local/lib/librich.so.3".to_string(),
            sum: "cd".repeat(32),
            uname: "root".to_string(),
            gname: "wheel".to_string(),
            perm: 0o644,
            fflags: 0,
            kind: FileType::Regular,
            link_target: None,
            config: false,
        })
        .unwrap();
        pkg.add_file(FileEntry {
            path: "/usr/local/lib/librich.so".to_string(),
            sum: String::new(),
            uname: "root".to_string(),
            gname: "wheel".to_string(),
            perm: 0o755,
            fflags: 0,
            kind: FileType::Symlink,
            link_target: Some("librich.so.3".to_string()),
            config: false,
        })
        .unwrap();
        pkg.dirs.push(DirEntry {
            path: "/usr/local/share/rich".to_string(),
            perm: 0o755,
            uname: "root".to_string(),
            gname: "wheel".to_string(),
            try_remove: true,
        });
        pkg.options.insert(
            "DOCS".to_string(),
            PackageOption {
                value: "on".to_string(),
                default_value: Some("on".to_string()),
                description: Some("Build documentation".to_string()),
            },
        );
        pkg.annotations
            .insert("repository".to_string(), "main".to_string());
        pkg.shlibs_provided.insert("librich.so.3".to_string());
        pkg.shlibs_required.insert("libc.so.7".to_string());
        pkg.categories.push("devel".to_string());
        pkg.licenses.push("BSD2CLAUSE".to_string());
        pkg.provides.push("rich-api-3".to_string());
        pkg.users.push("rich".to_string());
        pkg.groups.push("rich".to_string());
        pkg.add_script(Script {
            kind: ScriptKind::PostInstall,
            language: ScriptLanguage::Shell,
            body: "echo done".to_string(),
        })
        .unwrap();
        pkg.messages.push(Message {
            kind: MessageKind::Upgrade,
            min_version: Some("3.0".to_string()),
            max_version: None,
            text: "Reindex your data".to_string(),
        });
        pkg.conflicts.push("rich-legacy-*".to_string());
        pkg
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn insert_then_load_round_trips() {
        let mut conn = connection();
        let pkg = rich_package();
        let tx = conn.transaction().unwrap();
        insert_package(&tx, &pkg).unwrap();
        tx.commit().unwrap();
        let loaded = load_package(&conn, "rich").unwrap().unwrap();
        assert_eq!(loaded, pkg);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn duplicate_uid_is_a_db_error() {
        let mut conn = connection();
        let pkg = rich_package();
        let tx = conn.transaction().unwrap();
        insert_package(&tx, &pkg).unwrap();
        assert!(insert_package(&tx, &pkg).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn summaries_are_uid_ordered() {
        let mut conn = connection();
        for name in ["zeta", "alpha", "midl"] {
            let mut pkg = Package::new(name, "1.0");
            pkg.origin = format!("misc/{name}");
            let tx = conn.transaction().unwrap();
            insert_package(&tx, &pkg).unwrap();
            tx.commit().unwrap();
        }
        let names: Vec<String> = list_summaries(&conn)
            .unwrap()
            .into_iter()
            .map(|s| s.uid)
            .collect();
        assert_eq!(names, vec!["alpha", "midl", "zeta"]);
    }
}
