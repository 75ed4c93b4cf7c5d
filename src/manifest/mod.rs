//! Package manifest codec.
//!
//! Two surface forms exist: *compact* (single-line JSON, machine-friendly,
//! embedded as `+COMPACT_MANIFEST` in archives and hashed for the package
//! digest) and *pretty* (indented JSON, human-friendly, `+MANIFEST`).
//! The parser is lenient — unknown top-level keys are reported, not fatal —
//! while the emitter is strict: it only ever writes recognized fields, in a
//! stable order, so emission is reproducible and `parse(emit(pkg)) == pkg`.

use serde_json::Value;

use crate::checksum::hash_bytes;
use crate::error::{PkgError, Result};
use crate::types::Package;

/// Maximum nesting depth accepted from untrusted manifests.
///
/// Documents nested deeper are rejected as corrupt before any typed
/// deserialization happens.
pub const MAX_DEPTH: usize = 32;

/// Top-level keys the codec recognizes. Must stay in sync with the serde
/// field names of [`Package`].
const KNOWN_KEYS: &[&str] = &[
    "uid",
    "name",
    "version",
    "origin",
    "comment",
    "desc",
    "maintainer",
    "www",
    "abi",
    "prefix",
    "flatsize",
    "pkgsize",
    "digest",
    "repopath",
    "automatic",
    "locked",
    "vital",
    "time_installed",
    "reason",
    "deps",
    "files",
    "dirs",
    "options",
    "annotations",
    "categories",
    "licenses",
    "shlibs_required",
    "shlibs_provided",
    "provides",
    "requires",
    "users",
    "groups",
    "scripts",
    "messages",
    "conflicts",
];

/// Result of a lenient parse: the package plus any keys that were ignored.
#[derive(Debug)]
pub struct ParsedManifest {
    /// The decoded package.
    pub package: Package,
    /// Unknown top-level keys that were skipped. Callers surface these as
    /// NOTICE events.
    pub ignored_keys: Vec<String>,
}

/// What: Measure the nesting depth of a JSON document.
///
/// Inputs:
/// - `value`: Parsed document.
/// - `depth`: Depth of `value` itself (callers pass 1).
/// - `limit`: Maximum depth to tolerate.
///
/// Output:
/// - Unit when every node is at or under the limit.
///
/// # Errors
///
/// Returns `PkgError::Corrupt` as soon as a node exceeds the limit, without
/// walking the rest of the document.
fn check_depth(value: &Value, depth: usize, limit: usize) -> Result<()> {
    if depth > limit {
        return Err(PkgError::Corrupt(format!(
            "manifest nested deeper than {limit} levels"
        )));
    }
    match value {
        Value::Array(items) => {
            for item in items {
                check_depth(item, depth + 1, limit)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                check_depth(item, depth + 1, limit)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// What: Parse a manifest in either surface form.
///
/// Inputs:
/// - `text`: Compact or pretty manifest text.
///
/// Output:
/// - The decoded package and the list of ignored unknown keys.
///
/// Details:
/// - Depth is bounded by [`MAX_DEPTH`]; deeper documents are rejected as
///   corrupt before typed decoding.
/// - Unknown top-level keys are collected and skipped; nested unknown keys
///   inside recognized collections are silently dropped by serde.
///
/// # Errors
///
/// Returns `PkgError::Json` for malformed JSON, `PkgError::Corrupt` for
/// over-deep documents, and `PkgError::Parse` when the document is not an
/// object.
pub fn parse(text: &str) -> Result<ParsedManifest> {
    let value: Value = serde_json::from_str(text)?;
    check_depth(&value, 1, MAX_DEPTH)?;
    let Value::Object(ref map) = value else {
        return Err(PkgError::Parse("manifest is not an object".to_string()));
    };
    let ignored_keys: Vec<String> = map
        .keys()
        .filter(|k| !KNOWN_KEYS.contains(&k.as_str()))
        .cloned()
        .collect();
    for key in &ignored_keys {
        tracing::warn!(key = %key, "ignoring unknown manifest key");
    }
    let package: Package = serde_json::from_value(value)?;
    Ok(ParsedManifest {
        package,
        ignored_keys,
    })
}

/// What: Parse a manifest and validate the fields mandatory for install.
///
/// Inputs:
/// - `text`: Manifest text.
///
/// Output:
/// - The decoded, validated package with ignored keys.
///
/// # Errors
///
/// Everything [`parse`] returns, plus `PkgError::Parse` when a mandatory
/// field is missing.
pub fn parse_installable(text: &str) -> Result<ParsedManifest> {
    let parsed = parse(text)?;
    parsed.package.validate_for_install()?;
    Ok(parsed)
}

/// What: Emit the compact single-line form.
///
/// Inputs:
/// - `pkg`: Package to encode.
///
/// Output:
/// - One line of JSON, fields in declaration order, collections in their
///   stored order; byte-identical across runs for equal packages.
///
/// # Errors
///
/// Returns `PkgError::Json` if serialization fails.
pub fn emit_compact(pkg: &Package) -> Result<String> {
    Ok(serde_json::to_string(pkg)?)
}

/// What: Emit the pretty block form.
///
/// Inputs:
/// - `pkg`: Package to encode.
///
/// Output:
/// - Indented JSON with the same field order as the compact form.
///
/// # Errors
///
/// Returns `PkgError::Json` if serialization fails.
pub fn emit_pretty(pkg: &Package) -> Result<String> {
    Ok(serde_json::to_string_pretty(pkg)?)
}

/// What: Compute the package digest over the canonical compact manifest.
///
/// Inputs:
/// - `pkg`: Package to hash.
///
/// Output:
/// - Full 64-hex SHA-256 digest.
///
/// Details:
/// - Canonical form: keys sorted lexicographically at every level, no
///   insignificant whitespace. Round-tripping through `serde_json::Value`
///   yields exactly that, since its maps are ordered by key.
/// - The `digest` field itself is cleared before hashing so the digest is
///   stable regardless of whether a previous digest was recorded.
///
/// # Errors
///
/// Returns `PkgError::Json` if serialization fails.
pub fn digest(pkg: &Package) -> Result<String> {
    let mut stripped = pkg.clone();
    stripped.digest = String::new();
    let value = serde_json::to_value(&stripped)?;
    let canonical = serde_json::to_string(&value)?;
    Ok(hash_bytes(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::{ConstraintOp, VersionConstraint};
    use crate::types::{DependencyEdge, FileEntry, FileType, Script, ScriptKind, ScriptLanguage};

    #[allow(clippy::unwrap_used)]
    fn sample_package() -> Package {
        let mut pkg = Package::new("hello", "1.2");
        pkg.origin = "misc/hello".to_string();
        pkg.comment = "Sample package".to_string();
        pkg.desc = "A longer description".to_string();
        pkg.maintainer = "ports@example.org".to_string();
        pkg.www = "https://example.org/hello".to_string();
        pkg.abi = "Unix:13:amd64".to_string();
        pkg.prefix = "/usr/local".to_string();
        pkg.flatsize = 2048;
        pkg.add_dep(DependencyEdge {
            name: "libgreet".to_string(),
            origin: Some("devel/libgreet".to_string()),
            version: Some(VersionConstraint::new(ConstraintOp::Ge, "2.0")),
        });
        pkg.add_file(FileEntry {
            path: "/usr/local/bin/hello".to_string(),
            sum: "ab".repeat(32),
            uname: "root".to_string(),
            gname: "wheel".to_string(),
            perm: 0o755,
            fflags: 0,
            kind: FileType::Regular,
            link_target: None,
            config: false,
        })
        .unwrap();
        pkg.add_script(Script {
            kind: ScriptKind::PostInstall,
            language: ScriptLanguage::Shell,
            body: "echo installed".to_string(),
        })
        .unwrap();
        pkg.annotations
            .insert("repository".to_string(), "main".to_string());
        pkg
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn compact_round_trip() {
        let pkg = sample_package();
        let compact = emit_compact(&pkg).unwrap();
        assert!(!compact.contains('\n'));
        let parsed = parse(&compact).unwrap();
        assert!(parsed.ignored_keys.is_empty());
        assert_eq!(parsed.package, pkg);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn pretty_round_trip() {
        let pkg = sample_package();
        let pretty = emit_pretty(&pkg).unwrap();
        assert!(pretty.contains('\n'));
        let parsed = parse(&pretty).unwrap();
        assert_eq!(parsed.package, pkg);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn unknown_keys_are_reported_not_fatal() {
        let text = r#"{"name":"x","version":"1","plist_keywords":[],"weird":1}"#;
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.package.name, "x");
        let mut ignored = parsed.ignored_keys;
        ignored.sort();
        assert_eq!(ignored, vec!["plist_keywords", "weird"]);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn depth_bound_rejects_as_corrupt() {
        let mut text = String::from(r#"{"name":"x","version":"1","reason":"#);
        // reason expects a string, but depth is checked before typing.
        for _ in 0..40 {
            text.push('[');
        }
        for _ in 0..40 {
            text.push(']');
        }
        text.push('}');
        match parse(&text) {
            Err(PkgError::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn digest_is_stable_and_ignores_recorded_digest() {
        let mut pkg = sample_package();
        let first = digest(&pkg).unwrap();
        pkg.digest = first.clone();
        let second = digest(&pkg).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn emission_is_deterministic() {
        let pkg = sample_package();
        assert_eq!(emit_compact(&pkg).unwrap(), emit_compact(&pkg).unwrap());
    }

    #[test]
    fn mandatory_fields_enforced_for_install() {
        let text = r#"{"name":"x","version":"1"}"#;
        assert!(parse(text).is_ok());
        assert!(parse_installable(text).is_err());
    }
}
