//! Job planning and execution.
//!
//! A caller builds [`Request`]s, hands them to the [`Solver`] together
//! with database and catalogue handles, shows the resulting [`Plan`] to
//! the user, and passes it to the [`Executor`]. Plans and reports are
//! ephemeral; the executor journal makes interrupted plans resumable.

pub mod execute;
pub mod journal;
pub mod solve;

pub use execute::{ExecOptions, ExecReport, Executor};
pub use journal::{Journal, JournalRecord};
pub use solve::{Solver, SolverFlags, plan_id};

use crate::types::{MatchExpr, Package};

/// One user request against the package set.
#[derive(Debug, Clone)]
pub enum Request {
    /// Install (or upgrade to) matching catalogue packages.
    Install(MatchExpr),
    /// Remove matching installed packages.
    Remove(MatchExpr),
    /// Upgrade matching installed packages; `All` upgrades everything.
    Upgrade(MatchExpr),
    /// Fetch artifacts of matching catalogue packages without installing.
    Fetch(MatchExpr),
    /// Remove automatic packages nothing depends on any more.
    Autoremove,
}

/// One atomic operation of a plan.
#[derive(Debug, Clone)]
pub enum Step {
    /// Acquire and verify an artifact into the cache.
    Fetch {
        /// Catalogue row to fetch.
        pkg: Package,
        /// Source repository name.
        repo: String,
    },
    /// Fresh install.
    Install {
        /// Catalogue row to install.
        pkg: Package,
        /// Source repository name.
        repo: String,
        /// Mark the row automatic after install.
        automatic: bool,
        /// Why this step exists.
        reason: String,
    },
    /// Reinstall of the same version.
    Reinstall {
        /// Installed row being replaced.
        old: Package,
        /// Catalogue row to install.
        pkg: Package,
        /// Source repository name.
        repo: String,
        /// Why this step exists.
        reason: String,
    },
    /// Upgrade to a newer version.
    Upgrade {
        /// Installed row being superseded.
        old: Package,
        /// Catalogue row to install.
        new: Package,
        /// Source repository name.
        repo: String,
        /// Why this step exists.
        reason: String,
    },
    /// Downgrade to an older version (only with allow-downgrade).
    Downgrade {
        /// Installed row being superseded.
        old: Package,
        /// Catalogue row to install.
        new: Package,
        /// Source repository name.
        repo: String,
        /// Why this step exists.
        reason: String,
    },
    /// Removal of an installed package.
    Deinstall {
        /// Installed row being removed.
        pkg: Package,
        /// Why this step exists.
        reason: String,
    },
}

impl Step {
    /// Tie-break priority within the deterministic order:
    /// DEINSTALL < DOWNGRADE < UPGRADE < REINSTALL < INSTALL, with FETCH
    /// batched ahead of everything.
    #[must_use]
    pub const fn kind_priority(&self) -> u8 {
        match self {
            Self::Fetch { .. } => 0,
            Self::Deinstall { .. } => 1,
            Self::Downgrade { .. } => 2,
            Self::Upgrade { .. } => 3,
            Self::Reinstall { .. } => 4,
            Self::Install { .. } => 5,
        }
    }

    /// Stable kind tag for the journal and events.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::Install { .. } => "install",
            Self::Reinstall { .. } => "reinstall",
            Self::Upgrade { .. } => "upgrade",
            Self::Downgrade { .. } => "downgrade",
            Self::Deinstall { .. } => "deinstall",
        }
    }

    /// Uid the step operates on (the new row where two are involved).
    #[must_use]
    pub fn uid(&self) -> &str {
        match self {
            Self::Fetch { pkg, .. } | Self::Install { pkg, .. } | Self::Reinstall { pkg, .. } => {
                &pkg.uid
            }
            Self::Upgrade { new, .. } | Self::Downgrade { new, .. } => &new.uid,
            Self::Deinstall { pkg, .. } => &pkg.uid,
        }
    }

    /// Human-readable reason annotation, empty for fetch steps.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Fetch { .. } => "",
            Self::Install { reason, .. }
            | Self::Reinstall { reason, .. }
            | Self::Upgrade { reason, .. }
            | Self::Downgrade { reason, .. }
            | Self::Deinstall { reason, .. } => reason,
        }
    }

    /// One-line rendering for summaries and logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Fetch { pkg, repo } => {
                format!("FETCH {} from {repo}", pkg.name_version())
            }
            Self::Install { pkg, repo, reason, .. } => {
                format!("INSTALL {} from {repo} ({reason})", pkg.name_version())
            }
            Self::Reinstall { pkg, repo, reason, .. } => {
                format!("REINSTALL {} from {repo} ({reason})", pkg.name_version())
            }
            Self::Upgrade { old, new, reason, .. } => format!(
                "UPGRADE {} {} -> {} ({reason})",
                old.name, old.version, new.version
            ),
            Self::Downgrade { old, new, reason, .. } => format!(
                "DOWNGRADE {} {} -> {} ({reason})",
                old.name, old.version, new.version
            ),
            Self::Deinstall { pkg, reason } => {
                format!("DEINSTALL {} ({reason})", pkg.name_version())
            }
        }
    }
}

/// An ordered, conflict-free sequence of steps.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Steps in execution order.
    pub steps: Vec<Step>,
}

impl Plan {
    /// Whether the plan changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// One-line-per-step summary for display.
    #[must_use]
    pub fn summary(&self) -> String {
        self.steps
            .iter()
            .map(Step::describe)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
