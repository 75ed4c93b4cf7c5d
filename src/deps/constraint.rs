//! Version constraints attached to dependency edges.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::version::compare_versions;
use crate::error::{PkgError, Result};

/// Comparison operator of a version constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstraintOp {
    /// Exactly equal.
    #[serde(rename = "=")]
    Eq,
    /// Strictly older.
    #[serde(rename = "<")]
    Lt,
    /// Older or equal.
    #[serde(rename = "<=")]
    Le,
    /// Strictly newer.
    #[serde(rename = ">")]
    Gt,
    /// Newer or equal.
    #[serde(rename = ">=")]
    Ge,
}

impl fmt::Display for ConstraintOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// A version constraint: operator plus reference version.
///
/// An absent constraint on a dependency edge means "any version".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionConstraint {
    /// Comparison operator.
    pub op: ConstraintOp,
    /// Reference version the operator compares against.
    pub version: String,
}

impl VersionConstraint {
    /// What: Build a constraint from an operator and version.
    ///
    /// Inputs:
    /// - `op`: Comparison operator.
    /// - `version`: Reference version string.
    ///
    /// Output:
    /// - The constraint value.
    #[must_use]
    pub fn new(op: ConstraintOp, version: impl Into<String>) -> Self {
        Self {
            op,
            version: version.into(),
        }
    }

    /// What: Parse a constraint from its text form, e.g. `">=1.2"`.
    ///
    /// Inputs:
    /// - `text`: Operator immediately followed by a version.
    ///
    /// Output:
    /// - The parsed constraint.
    ///
    /// Details:
    /// - Two-character operators are tried before their one-character
    ///   prefixes so `">="` never parses as `">"`.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::Parse` when no operator prefix is present or the
    /// version part is empty.
    pub fn parse(text: &str) -> Result<Self> {
        let (op, rest) = if let Some(rest) = text.strip_prefix(">=") {
            (ConstraintOp::Ge, rest)
        } else if let Some(rest) = text.strip_prefix("<=") {
            (ConstraintOp::Le, rest)
        } else if let Some(rest) = text.strip_prefix('>') {
            (ConstraintOp::Gt, rest)
        } else if let Some(rest) = text.strip_prefix('<') {
            (ConstraintOp::Lt, rest)
        } else if let Some(rest) = text.strip_prefix('=') {
            (ConstraintOp::Eq, rest)
        } else {
            return Err(PkgError::Parse(format!(
                "version constraint without operator: {text}"
            )));
        };
        if rest.is_empty() {
            return Err(PkgError::Parse(format!(
                "version constraint without version: {text}"
            )));
        }
        Ok(Self::new(op, rest))
    }

    /// What: Check whether a concrete version satisfies this constraint.
    ///
    /// Inputs:
    /// - `version`: Version string to test.
    ///
    /// Output:
    /// - `true` when the version stands in the required relation to the
    ///   reference version under the total order of `compare_versions`.
    #[must_use]
    pub fn satisfied_by(&self, version: &str) -> bool {
        let ord = compare_versions(version, &self.version);
        match self.op {
            ConstraintOp::Eq => ord == Ordering::Equal,
            ConstraintOp::Lt => ord == Ordering::Less,
            ConstraintOp::Le => matches!(ord, Ordering::Less | Ordering::Equal),
            ConstraintOp::Gt => ord == Ordering::Greater,
            ConstraintOp::Ge => matches!(ord, Ordering::Greater | Ordering::Equal),
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op, self.version)
    }
}
