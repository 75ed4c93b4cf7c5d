//! Convenient single-import surface.
//!
//! # Example
//!
//! ```no_run
//! use binpkg::prelude::*;
//!
//! # fn example() -> Result<()> {
//! let ctx = Context::init(Config::default())?;
//! let db = Pkgdb::open(&ctx.config, ctx.events(), LockMode::Read)?;
//! println!("{} packages installed", db.summaries()?.len());
//! # Ok(())
//! # }
//! ```

pub use crate::config::Config;
pub use crate::context::Context;
pub use crate::db::{LockMode, Pkgdb};
pub use crate::deps::{ConstraintOp, VersionConstraint, compare_versions};
pub use crate::error::{PkgError, Result};
pub use crate::events::{Event, EventBus, EventSink};
pub use crate::jobs::{Plan, Request, Step};
pub use crate::repo::{RepoCollection, RepoSet};
pub use crate::types::{DependencyEdge, MatchExpr, Package};
