//! Transactional core of a Unix binary package manager.
//!
//! This crate implements the full lifecycle of installed software
//! packages: the local package database of what is installed, the remote
//! catalogue cache of what is installable, a deterministic job planner
//! turning requests into ordered plans, and a crash-safe job executor
//! applying them. The CLI, auditing, and plugin host are separate
//! collaborators built on this API.
//!
//! # Examples
//!
//! ## Query the installed set
//!
//! ```no_run
//! use binpkg::prelude::*;
//!
//! # fn example() -> Result<()> {
//! let ctx = Context::init(Config::default())?;
//! let db = Pkgdb::open(&ctx.config, ctx.events(), LockMode::Read)?;
//! for pkg in db.query(&MatchExpr::glob("py39-*")?)? {
//!     println!("{} {}", pkg.name, pkg.version);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Plan and execute an install
//!
//! ```no_run
//! use binpkg::prelude::*;
//! use binpkg::jobs::{ExecOptions, Executor, Request, Solver, SolverFlags};
//!
//! # fn example() -> Result<()> {
//! let ctx = Context::init(Config::default())?;
//! let events = ctx.events();
//! let mut db = Pkgdb::open(&ctx.config, events.clone(), LockMode::Exclusive)?;
//! let repos = RepoSet::open(&ctx.config, &ctx.repos, &events)?;
//! let solver = Solver::new(&db, &repos, &ctx.config, &events, SolverFlags::default());
//! let plan = solver.solve(&[Request::Install(MatchExpr::exact("zsh", false))])?;
//! println!("{}", plan.summary());
//!
//! let fetcher = binpkg::repo::HttpFetcher::new(ctx.config.fetch_timeout)?;
//! let mut executor = Executor::new(
//!     &mut db, &repos, &ctx.config, events, &fetcher, ExecOptions::default(),
//! );
//! let report = executor.execute(&plan)?;
//! println!("{} steps done", report.done.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Refresh catalogues
//!
//! ```no_run
//! use binpkg::prelude::*;
//!
//! # fn example() -> Result<()> {
//! let ctx = Context::init(Config::default())?;
//! let fetcher = binpkg::repo::HttpFetcher::new(ctx.config.fetch_timeout)?;
//! let events = ctx.events();
//! for repo in ctx.repos.enabled() {
//!     binpkg::repo::update(repo, &ctx.config, &fetcher, &events)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod cache;
pub mod checksum;
pub mod config;
pub mod context;
pub mod db;
pub mod deps;
pub mod error;
pub mod events;
pub mod jobs;
pub mod manifest;
pub mod repo;
pub mod scripts;
pub mod types;

/// Prelude module for convenient imports.
///
/// Re-exports the handful of types nearly every caller needs, so a single
/// `use binpkg::prelude::*;` sets a file up.
pub mod prelude;

// Re-export commonly used types
pub use config::Config;
pub use context::Context;
pub use db::{LockMode, Pkgdb};
pub use error::{PkgError as Error, Result};
pub use events::{Event, EventBus, EventSink};
pub use jobs::{Plan, Request, Step};
pub use repo::{RepoCollection, RepoSet};
pub use types::{MatchExpr, Package};
