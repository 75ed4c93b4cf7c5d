//! Dependency edges and match expressions.

use serde::{Deserialize, Serialize};

use crate::deps::VersionConstraint;
use crate::error::{PkgError, Result};

/// A dependency edge: `from_pkg --requires--> (name, constraint?, origin?)`.
///
/// Edges are unique per package by `(name, origin)`; an absent constraint
/// means any version satisfies the edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Required package name.
    pub name: String,
    /// Origin hint, informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Version constraint; `None` means "any".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionConstraint>,
}

impl DependencyEdge {
    /// Edge on a name with no origin hint and no version constraint.
    #[must_use]
    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: None,
            version: None,
        }
    }

    /// What: Check whether an available version satisfies this edge.
    ///
    /// Inputs:
    /// - `version`: Candidate version of the required package.
    ///
    /// Output:
    /// - `true` when no constraint is present or the constraint holds.
    #[must_use]
    pub fn satisfied_by(&self, version: &str) -> bool {
        self.version.as_ref().is_none_or(|c| c.satisfied_by(version))
    }
}

/// How a request selects packages.
///
/// Case sensitivity is decided at construction from the
/// `CASE_SENSITIVE_MATCH` configuration knob.
#[derive(Debug, Clone)]
pub enum MatchExpr {
    /// Every package.
    All,
    /// Exact name match.
    Exact {
        /// Name to match.
        name: String,
        /// Whether comparison is case-sensitive.
        case_sensitive: bool,
    },
    /// Shell glob over names.
    Glob(glob::Pattern),
    /// Regular expression over names.
    Regex(regex::Regex),
    /// Exact origin match.
    Origin(String),
}

impl MatchExpr {
    /// What: Build an exact-name expression.
    ///
    /// Inputs:
    /// - `name`: Name to match.
    /// - `case_sensitive`: From configuration.
    ///
    /// Output:
    /// - The expression.
    #[must_use]
    pub fn exact(name: impl Into<String>, case_sensitive: bool) -> Self {
        Self::Exact {
            name: name.into(),
            case_sensitive,
        }
    }

    /// What: Build a glob expression.
    ///
    /// Inputs:
    /// - `pattern`: Shell glob pattern over package names.
    ///
    /// Output:
    /// - The expression.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Parse` for a malformed pattern.
    pub fn glob(pattern: &str) -> Result<Self> {
        glob::Pattern::new(pattern)
            .map(Self::Glob)
            .map_err(|e| PkgError::Parse(format!("bad glob pattern {pattern:?}: {e}")))
    }

    /// What: Build a regular-expression expression.
    ///
    /// Inputs:
    /// - `pattern`: Regex over package names.
    /// - `case_sensitive`: From configuration; `false` compiles with `(?i)`.
    ///
    /// Output:
    /// - The expression.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Parse` for a malformed regex.
    pub fn regex(pattern: &str, case_sensitive: bool) -> Result<Self> {
        let source = if case_sensitive {
            pattern.to_string()
        } else {
            format!("(?i){pattern}")
        };
        regex::Regex::new(&source)
            .map(Self::Regex)
            .map_err(|e| PkgError::Parse(format!("bad regex {pattern:?}: {e}")))
    }

    /// What: Test a package against the expression.
    ///
    /// Inputs:
    /// - `name`: Package name.
    /// - `origin`: Package origin.
    ///
    /// Output:
    /// - `true` on match.
    #[must_use]
    pub fn matches(&self, name: &str, origin: &str) -> bool {
        match self {
            Self::All => true,
            Self::Exact {
                name: wanted,
                case_sensitive,
            } => {
                if *case_sensitive {
                    name == wanted
                } else {
                    name.eq_ignore_ascii_case(wanted)
                }
            }
            Self::Glob(pattern) => pattern.matches(name),
            Self::Regex(re) => re.is_match(name),
            Self::Origin(wanted) => origin == wanted,
        }
    }
}

impl std::fmt::Display for MatchExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("(all)"),
            Self::Exact { name, .. } => f.write_str(name),
            Self::Glob(pattern) => f.write_str(pattern.as_str()),
            Self::Regex(re) => f.write_str(re.as_str()),
            Self::Origin(origin) => f.write_str(origin),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::{ConstraintOp, VersionConstraint};

    #[test]
    fn edge_without_constraint_accepts_anything() {
        let edge = DependencyEdge::any("libfoo");
        assert!(edge.satisfied_by("0.0.1"));
        assert!(edge.satisfied_by("99"));
    }

    #[test]
    fn edge_with_constraint_filters() {
        let edge = DependencyEdge {
            name: "libfoo".to_string(),
            origin: None,
            version: Some(VersionConstraint::new(ConstraintOp::Ge, "2.0")),
        };
        assert!(edge.satisfied_by("2.0"));
        assert!(edge.satisfied_by("2.1"));
        assert!(!edge.satisfied_by("1.9"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn match_expressions() {
        assert!(MatchExpr::All.matches("anything", "misc/anything"));

        let exact = MatchExpr::exact("Hello", false);
        assert!(exact.matches("hello", ""));
        let exact_cs = MatchExpr::exact("Hello", true);
        assert!(!exact_cs.matches("hello", ""));

        let glob = MatchExpr::glob("py39-*").unwrap();
        assert!(glob.matches("py39-sqlite3", ""));
        assert!(!glob.matches("py38-sqlite3", ""));

        let re = MatchExpr::regex("^lib(foo|bar)$", true).unwrap();
        assert!(re.matches("libbar", ""));
        assert!(!re.matches("libbaz", ""));

        let origin = MatchExpr::Origin("shells/zsh".to_string());
        assert!(origin.matches("zsh", "shells/zsh"));
        assert!(!origin.matches("zsh", "shells/other"));
    }

    #[test]
    fn malformed_patterns_error() {
        assert!(MatchExpr::glob("[").is_err());
        assert!(MatchExpr::regex("(", true).is_err());
    }
}
