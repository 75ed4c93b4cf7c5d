//! Job executor.
//!
//! Applies a plan in order under an `EXCLUSIVE` database lock. Each
//! mutating step runs pre-scripts, materializes files through a staging
//! directory with atomic renames, writes database state in one
//! transaction, runs post-scripts, and reports shared-library breakage.
//! Step boundaries are journaled with fsync so an interrupted plan can be
//! resumed; cancellation is observed between steps only.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::journal::{Journal, JournalRecord, StepState};
use super::solve::plan_id;
use super::{Plan, Step};
use crate::archive::PackageReader;
use crate::cache;
use crate::checksum;
use crate::config::Config;
use crate::db::{LockMode, Pkgdb};
use crate::deps::compare_versions;
use crate::error::{PkgError, Result};
use crate::events::{Event, EventBus};
use crate::repo::{Fetcher, RepoConfig, RepoSet};
use crate::scripts::{self, Sandbox};
use crate::types::{FileEntry, FileType, Message, MessageKind, Package, ScriptKind};

/// Executor behavior options.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Root the absolute file paths are applied under. `/` in production;
    /// tests point it at a scratch directory.
    pub fs_root: PathBuf,
    /// Proceed on locked packages, surfacing a warning event per package.
    pub force_locked: bool,
    /// On a step failure, continue with steps whose inputs remain valid.
    pub keep_going: bool,
    /// Stage removed-but-still-needed shared libraries into the backup
    /// library directory under a synthetic `compat-libraries` package.
    pub backup_libs: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            fs_root: PathBuf::from("/"),
            force_locked: false,
            keep_going: false,
            backup_libs: true,
        }
    }
}

/// Outcome of an execution run.
#[derive(Debug, Default)]
pub struct ExecReport {
    /// Uids of completed steps, in execution order.
    pub done: Vec<String>,
    /// `(uid, error)` of failed or skipped steps.
    pub failed: Vec<(String, String)>,
    /// Whether a dirty journal remains for [`Executor::resume`].
    pub resumable: bool,
}

/// Undo log of one step's filesystem work.
#[derive(Debug, Default)]
struct StepRollback {
    /// Paths this step created; removed on rollback.
    created: Vec<PathBuf>,
    /// `(shadow_copy, original)` of files this step replaced; restored on
    /// rollback.
    shadows: Vec<(PathBuf, PathBuf)>,
}

impl StepRollback {
    fn undo(&self) {
        for path in self.created.iter().rev() {
            if let Err(e) = fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "rollback: remove failed");
            }
        }
        for (shadow, original) in self.shadows.iter().rev() {
            if let Err(e) = fs::copy(shadow, original) {
                tracing::warn!(path = %original.display(), error = %e, "rollback: restore failed");
            }
        }
    }
}

/// The job executor.
pub struct Executor<'a> {
    db: &'a mut Pkgdb,
    repos: &'a RepoSet,
    config: &'a Config,
    events: Arc<EventBus>,
    fetcher: &'a dyn Fetcher,
    sandbox: Box<dyn Sandbox>,
    cancel: Arc<AtomicBool>,
    opts: ExecOptions,
}

impl<'a> Executor<'a> {
    /// What: Build an executor.
    ///
    /// Inputs:
    /// - `db`: Local database holding an `EXCLUSIVE` lock.
    /// - `repos`: Catalogue set the plan's packages came from.
    /// - `config`: Paths and script policy.
    /// - `events`: Event bus.
    /// - `fetcher`: Fetch provider for FETCH steps.
    /// - `opts`: Execution options.
    ///
    /// Output:
    /// - The executor with the configured sandbox backend.
    pub fn new(
        db: &'a mut Pkgdb,
        repos: &'a RepoSet,
        config: &'a Config,
        events: Arc<EventBus>,
        fetcher: &'a dyn Fetcher,
        opts: ExecOptions,
    ) -> Self {
        let sandbox = scripts::default_sandbox(config);
        Self {
            db,
            repos,
            config,
            events,
            fetcher,
            sandbox,
            cancel: Arc::new(AtomicBool::new(false)),
            opts,
        }
    }

    /// Cooperative cancellation flag, checked between steps.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// What: Execute a plan from the beginning.
    ///
    /// Inputs:
    /// - `plan`: Plan from the solver.
    ///
    /// Output:
    /// - Report of completed and failed steps.
    ///
    /// # Errors
    ///
    /// Returns the first step error unless `keep_going` is set;
    /// `PkgError::Cancelled` at a cancellation point. The journal stays
    /// resumable in both cases.
    pub fn execute(&mut self, plan: &Plan) -> Result<ExecReport> {
        self.run(plan, None)
    }

    /// What: Resume an interrupted plan.
    ///
    /// Inputs:
    /// - `plan`: The same plan that was interrupted (validated against
    ///   the journaled fingerprint).
    ///
    /// Output:
    /// - Report covering the remaining steps.
    ///
    /// Details:
    /// - Completed steps are skipped; a step whose filesystem work
    ///   finished but whose database write did not commit is re-applied
    ///   (its materialization is idempotent); anything else re-runs.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::NotFound` when the journal does not belong to
    /// this plan, plus everything [`Executor::execute`] returns.
    pub fn resume(&mut self, plan: &Plan) -> Result<ExecReport> {
        let id = plan_id(plan);
        let states = Journal::dirty_state(&self.config.journal_path(), &id)?
            .ok_or_else(|| PkgError::NotFound(format!("resumable journal for plan {id}")))?;
        self.events
            .notice(format!("resuming interrupted plan {id}"));
        self.run(plan, Some(states))
    }

    #[allow(clippy::too_many_lines)]
    fn run(
        &mut self,
        plan: &Plan,
        resume: Option<std::collections::BTreeMap<usize, StepState>>,
    ) -> Result<ExecReport> {
        if self.db.lock_mode() != LockMode::Exclusive {
            return Err(PkgError::Config(
                "executor requires an EXCLUSIVE database lock".to_string(),
            ));
        }
        // Locked packages stop the whole plan up front unless forced.
        for step in &plan.steps {
            let locked = match step {
                Step::Reinstall { old, .. }
                | Step::Upgrade { old, .. }
                | Step::Downgrade { old, .. } => old.locked.then(|| old.name_version()),
                Step::Deinstall { pkg, .. } => pkg.locked.then(|| pkg.name_version()),
                Step::Fetch { .. } | Step::Install { .. } => None,
            };
            if let Some(name) = locked {
                if self.opts.force_locked {
                    self.events.emit(&Event::Locked { pkg: name });
                } else {
                    return Err(PkgError::Locked(name));
                }
            }
        }

        let id = plan_id(plan);
        let mut journal = Journal::open(&self.config.journal_path())?;
        if resume.is_none() {
            journal.append(&JournalRecord::PlanBegin {
                plan_id: id.clone(),
                steps: plan.steps.len(),
            })?;
        }

        let mut report = ExecReport::default();
        let mut failed_names: BTreeSet<String> = BTreeSet::new();
        for (index, step) in plan.steps.iter().enumerate() {
            match resume.as_ref().and_then(|states| states.get(&index)) {
                Some(StepState::Done) => {
                    report.done.push(step.uid().to_string());
                    continue;
                }
                Some(StepState::Failed) => {
                    report
                        .failed
                        .push((step.uid().to_string(), "failed before resume".to_string()));
                    continue;
                }
                // Begun or FilesDone: re-run; materialization is
                // idempotent and the database write never committed.
                Some(StepState::Begun | StepState::FilesDone) | None => {}
            }

            if self.cancel.load(Ordering::SeqCst) {
                self.events.notice("cancellation requested, stopping before next step");
                report.resumable = true;
                return Err(PkgError::Cancelled);
            }
            if self.depends_on_failed(step, &failed_names) {
                self.events.notice(format!(
                    "skipping {} because a dependency failed",
                    step.uid()
                ));
                report
                    .failed
                    .push((step.uid().to_string(), "dependency failed".to_string()));
                continue;
            }

            journal.append(&JournalRecord::StepBegin {
                index,
                kind: step.kind_name().to_string(),
                uid: step.uid().to_string(),
            })?;
            self.emit_step_begin(step);
            let outcome = self.run_step(step, index, &mut journal);
            match outcome {
                Ok(()) => {
                    journal.append(&JournalRecord::StepEnd { index, ok: true })?;
                    self.emit_step_end(step);
                    report.done.push(step.uid().to_string());
                }
                Err(e) => {
                    self.events.error(format!("{}: {e}", step.uid()));
                    journal.append(&JournalRecord::StepEnd { index, ok: false })?;
                    report.failed.push((step.uid().to_string(), e.to_string()));
                    if self.opts.keep_going {
                        if let Some(name) = step_package_name(step) {
                            failed_names.insert(name);
                        }
                    } else {
                        report.resumable = true;
                        return Err(e);
                    }
                }
            }
        }

        journal.append(&JournalRecord::PlanEnd { plan_id: id })?;
        journal.truncate()?;
        if self.config.autoclean {
            let removed = cache::clean(self.config, self.repos, &self.events)?;
            if removed > 0 {
                self.events
                    .notice(format!("autoclean removed {removed} cached artifacts"));
            }
        }
        Ok(report)
    }

    /// Whether a step's inputs include a package that already failed.
    fn depends_on_failed(&self, step: &Step, failed: &BTreeSet<String>) -> bool {
        if failed.is_empty() {
            return false;
        }
        let deps = match step {
            Step::Install { pkg, .. } | Step::Reinstall { pkg, .. } | Step::Fetch { pkg, .. } => {
                &pkg.deps
            }
            Step::Upgrade { new, .. } | Step::Downgrade { new, .. } => &new.deps,
            Step::Deinstall { pkg, .. } => &pkg.deps,
        };
        deps.iter().any(|d| failed.contains(&d.name))
    }

    fn emit_step_begin(&self, step: &Step) {
        let event = match step {
            Step::Fetch { .. } => return, // fetch events come from the cache layer
            Step::Install { pkg, .. } | Step::Reinstall { pkg, .. } => Event::InstallBegin {
                pkg: pkg.name_version(),
            },
            Step::Upgrade { old, new, .. } | Step::Downgrade { old, new, .. } => {
                Event::UpgradeBegin {
                    pkg: new.name.clone(),
                    old_version: old.version.clone(),
                    new_version: new.version.clone(),
                }
            }
            Step::Deinstall { pkg, .. } => Event::DeinstallBegin {
                pkg: pkg.name_version(),
            },
        };
        self.events.emit(&event);
    }

    fn emit_step_end(&self, step: &Step) {
        let event = match step {
            Step::Fetch { .. } => return,
            Step::Install { pkg, .. } | Step::Reinstall { pkg, .. } => Event::InstallFinished {
                pkg: pkg.name_version(),
            },
            Step::Upgrade { old, new, .. } | Step::Downgrade { old, new, .. } => {
                Event::UpgradeFinished {
                    pkg: new.name.clone(),
                    old_version: old.version.clone(),
                    new_version: new.version.clone(),
                }
            }
            Step::Deinstall { pkg, .. } => Event::DeinstallFinished {
                pkg: pkg.name_version(),
            },
        };
        self.events.emit(&event);
    }

    fn repo_config(&self, name: &str) -> Result<RepoConfig> {
        self.repos
            .configs()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| PkgError::NotFound(format!("repository {name}")))
    }

    fn run_step(&mut self, step: &Step, index: usize, journal: &mut Journal) -> Result<()> {
        match step {
            Step::Fetch { pkg, repo } => {
                let repo = self.repo_config(repo)?;
                cache::fetch_artifact(&repo, pkg, self.config, self.fetcher, &self.events)?;
                Ok(())
            }
            Step::Install {
                pkg,
                repo,
                automatic,
                ..
            } => self.install_like(None, pkg, repo, *automatic, index, journal),
            Step::Reinstall { old, pkg, repo, .. } => {
                self.install_like(Some(old), pkg, repo, old.automatic, index, journal)
            }
            Step::Upgrade { old, new, repo, .. } | Step::Downgrade { old, new, repo, .. } => {
                self.install_like(Some(old), new, repo, old.automatic, index, journal)
            }
            Step::Deinstall { pkg, .. } => self.deinstall(pkg, index, journal),
        }
    }

    /// Destination of an absolute package path under the filesystem root.
    fn dest_path(&self, path: &str) -> PathBuf {
        self.opts.fs_root.join(path.trim_start_matches('/'))
    }

    /// Place one staged entry at its destination via a same-directory
    /// temporary name and an atomic rename.
    fn place_file(
        &self,
        staged_root: &Path,
        entry: &FileEntry,
        rollback: &mut StepRollback,
        shadow_dir: &Path,
    ) -> Result<()> {
        let rel = entry.path.trim_start_matches('/');
        let dest = self.dest_path(&entry.path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        match entry.kind {
            FileType::Directory => {
                fs::create_dir_all(&dest)?;
                return Ok(());
            }
            FileType::Regular => {
                let staged = staged_root.join(rel);
                if !entry.sum.is_empty() {
                    let actual = checksum::hash_file(&staged)?;
                    if actual != entry.sum {
                        return Err(PkgError::Corrupt(format!(
                            "{}: payload digest mismatch",
                            entry.path
                        )));
                    }
                }
                if dest.exists() {
                    if entry.config {
                        let current = checksum::hash_file(&dest)?;
                        let incoming = checksum::hash_file(&staged)?;
                        if current != incoming {
                            // Keep local config; park the new one next to it.
                            let pkgnew = dest_with_suffix(&dest, ".pkgnew");
                            fs::copy(&staged, &pkgnew)?;
                            rollback.created.push(pkgnew.clone());
                            self.events.notice(format!(
                                "{} differs from packaged version, new file kept as {}",
                                entry.path,
                                pkgnew.display()
                            ));
                            return Ok(());
                        }
                    }
                    let shadow = shadow_dir.join(rel.replace('/', "_"));
                    fs::copy(&dest, &shadow)?;
                    rollback.shadows.push((shadow, dest.clone()));
                } else {
                    rollback.created.push(dest.clone());
                }
                let tmp = dest_with_suffix(&dest, ".pkgtmp");
                fs::copy(&staged, &tmp)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    if entry.perm != 0 {
                        fs::set_permissions(&tmp, fs::Permissions::from_mode(entry.perm))?;
                    }
                }
                fs::rename(&tmp, &dest)?;
            }
            FileType::Symlink => {
                let target = entry.link_target.clone().unwrap_or_default();
                let tmp = dest_with_suffix(&dest, ".pkgtmp");
                let _ = fs::remove_file(&tmp);
                #[cfg(unix)]
                std::os::unix::fs::symlink(&target, &tmp)?;
                if dest.exists() {
                    let _ = fs::remove_file(&dest);
                } else {
                    rollback.created.push(dest.clone());
                }
                fs::rename(&tmp, &dest)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn install_like(
        &mut self,
        old: Option<&Package>,
        new: &Package,
        repo: &str,
        automatic: bool,
        index: usize,
        journal: &mut Journal,
    ) -> Result<()> {
        let artifact = cache::artifact_path(self.config, new);
        if !artifact.exists() {
            return Err(PkgError::Corrupt(format!(
                "{}: artifact missing from cache, fetch step did not run",
                new.name_version()
            )));
        }
        cache::verify_artifact(&artifact, new)?;

        // Pre-scripts: upgrades run the old package's pre-upgrade, fresh
        // installs the new package's pre-install.
        match old {
            Some(old_pkg) => scripts::run_scripts(
                old_pkg,
                ScriptKind::PreUpgrade,
                self.config,
                self.sandbox.as_ref(),
                &self.events,
            )?,
            None => scripts::run_scripts(
                new,
                ScriptKind::PreInstall,
                self.config,
                self.sandbox.as_ref(),
                &self.events,
            )?,
        }

        // Materialize through staging.
        self.events.emit(&Event::ExtractBegin {
            pkg: new.name_version(),
        });
        let staging = tempfile::TempDir::with_prefix_in(".pkg-staging-", &self.config.db_dir)?;
        let reader = PackageReader::open(&artifact)?;
        reader.unpack_payload(staging.path())?;
        let shadow_dir = staging.path().join(".shadow");
        fs::create_dir_all(&shadow_dir)?;

        let mut rollback = StepRollback::default();
        let mut placed = 0u64;
        for entry in &new.files {
            if let Err(e) = self.place_file(staging.path(), entry, &mut rollback, &shadow_dir) {
                rollback.undo();
                return Err(e);
            }
            placed += 1;
            self.events.emit(&Event::ProgressTick {
                current: placed,
                total: new.files.len() as u64,
            });
        }
        for dir in &new.dirs {
            let dest = self.dest_path(&dir.path);
            if let Err(e) = fs::create_dir_all(&dest) {
                rollback.undo();
                return Err(PkgError::Io(e));
            }
        }
        // Remove files of the old package the new one does not rewrite.
        if let Some(old_pkg) = old {
            let kept: BTreeSet<&str> = new.files.iter().map(|f| f.path.as_str()).collect();
            let removed_libs: Vec<String> = old_pkg
                .shlibs_provided
                .difference(&new.shlibs_provided)
                .cloned()
                .collect();
            self.shlib_breakage(old_pkg, &removed_libs)?;
            for entry in &old_pkg.files {
                if kept.contains(entry.path.as_str()) {
                    continue;
                }
                self.remove_recorded_file(old_pkg, entry)?;
            }
        }
        self.events.emit(&Event::ExtractFinished {
            pkg: new.name_version(),
        });
        journal.append(&JournalRecord::FilesDone { index })?;

        // Database write: one transaction, old row out, new row in.
        let now = unix_now();
        let mut registered = new.clone();
        registered.uid = registered.name.clone();
        registered.automatic = automatic;
        registered.time_installed = Some(now);
        registered
            .annotations
            .insert("repository".to_string(), repo.to_string());
        let db_result = match old {
            Some(old_pkg) => self.db.replace(&old_pkg.uid, &registered),
            None => self.db.register(&registered),
        };
        if let Err(e) = db_result {
            rollback.undo();
            return Err(e);
        }
        self.db.register_finale(&registered.uid, now)?;

        // Post-scripts.
        match old {
            Some(_) => scripts::run_scripts(
                new,
                ScriptKind::PostUpgrade,
                self.config,
                self.sandbox.as_ref(),
                &self.events,
            )?,
            None => scripts::run_scripts(
                new,
                ScriptKind::PostInstall,
                self.config,
                self.sandbox.as_ref(),
                &self.events,
            )?,
        }

        let old_version = old.map(|p| p.version.as_str());
        self.show_messages(new, old_version);
        Ok(())
    }

    /// Remove one file recorded for an outgoing package, honoring the
    /// config-file preservation rule.
    fn remove_recorded_file(&self, owner: &Package, entry: &FileEntry) -> Result<()> {
        let dest = self.dest_path(&entry.path);
        if !dest.exists() && fs::symlink_metadata(&dest).is_err() {
            self.events.notice(format!(
                "{}: recorded file already absent",
                entry.path
            ));
            return Ok(());
        }
        if entry.kind == FileType::Regular && entry.config && !entry.sum.is_empty() {
            let current = checksum::hash_file(&dest)?;
            if current != entry.sum {
                let pkgsave = dest_with_suffix(&dest, ".pkgsave");
                fs::rename(&dest, &pkgsave)?;
                self.events.notice(format!(
                    "{} was modified by the user, preserved as {}",
                    entry.path,
                    pkgsave.display()
                ));
                return Ok(());
            }
        }
        if entry.kind == FileType::Directory {
            let _ = fs::remove_dir(&dest);
            return Ok(());
        }
        fs::remove_file(&dest)?;
        tracing::debug!(owner = %owner.name, path = %entry.path, "removed");
        Ok(())
    }

    fn deinstall(&mut self, pkg: &Package, index: usize, journal: &mut Journal) -> Result<()> {
        scripts::run_scripts(
            pkg,
            ScriptKind::PreDeinstall,
            self.config,
            self.sandbox.as_ref(),
            &self.events,
        )?;

        // Shared-library backup must happen while the files still exist.
        let provided: Vec<String> = pkg.shlibs_provided.iter().cloned().collect();
        self.shlib_breakage(pkg, &provided)?;

        let mut removed = 0u64;
        for entry in &pkg.files {
            self.remove_recorded_file(pkg, entry)?;
            removed += 1;
            self.events.emit(&Event::ProgressTick {
                current: removed,
                total: pkg.files.len() as u64,
            });
        }
        for dir in &pkg.dirs {
            let dest = self.dest_path(&dir.path);
            if !dir.try_remove {
                continue;
            }
            let other_owners: Vec<String> = self
                .db
                .dir_owners(&dir.path)?
                .into_iter()
                .filter(|uid| uid != &pkg.uid)
                .collect();
            if other_owners.is_empty() {
                // Deleted only when empty; a populated directory stays.
                let _ = fs::remove_dir(&dest);
            }
        }
        journal.append(&JournalRecord::FilesDone { index })?;

        self.db.deregister(&pkg.uid)?;

        scripts::run_scripts(
            pkg,
            ScriptKind::PostDeinstall,
            self.config,
            self.sandbox.as_ref(),
            &self.events,
        )?;
        self.show_removal_messages(pkg);
        Ok(())
    }

    /// What: Report and optionally shim shared-library breakage.
    ///
    /// Inputs:
    /// - `outgoing`: Package whose libraries disappear.
    /// - `removed_libs`: Libraries no longer provided after this step.
    ///
    /// Output:
    /// - Unit; for each library still required by an installed package
    ///   and provided by nothing else, an `ABI_BREAKAGE` warning is
    ///   emitted and, when enabled, the library file is copied into the
    ///   backup directory and registered under a timestamped
    ///   `compat-libraries` package.
    fn shlib_breakage(&mut self, outgoing: &Package, removed_libs: &[String]) -> Result<()> {
        for lib in removed_libs {
            let requirers: Vec<String> = self
                .db
                .shlib_requirers(lib)?
                .into_iter()
                .filter(|uid| uid != &outgoing.uid)
                .collect();
            if requirers.is_empty() {
                continue;
            }
            let other_providers: Vec<String> = self
                .db
                .shlib_providers(lib)?
                .into_iter()
                .filter(|uid| uid != &outgoing.uid)
                .collect();
            if !other_providers.is_empty() {
                continue;
            }
            self.events.emit(&Event::AbiBreakage {
                lib: lib.clone(),
                needed_by: requirers.join(", "),
            });
            if !self.opts.backup_libs {
                continue;
            }
            let Some(entry) = outgoing
                .files
                .iter()
                .find(|f| f.path.rsplit('/').next() == Some(lib.as_str()))
            else {
                continue;
            };
            let source = self.dest_path(&entry.path);
            if !source.exists() {
                continue;
            }
            let backup_dir = self
                .opts
                .fs_root
                .join(self.config.backup_lib_dir.strip_prefix("/").unwrap_or(&self.config.backup_lib_dir));
            fs::create_dir_all(&backup_dir)?;
            let backup_path = backup_dir.join(lib);
            fs::copy(&source, &backup_path)?;

            let now = unix_now();
            let mut compat = Package::new("compat-libraries", now.to_string());
            compat.uid = format!("compat-libraries-{now}-{lib}");
            compat.origin = "misc/compat-libraries".to_string();
            compat.comment = format!("backup copy of {lib}");
            compat.automatic = true;
            let backup_abs = format!(
                "{}/{lib}",
                self.config.backup_lib_dir.display()
            );
            let sum = checksum::hash_file(&backup_path)?;
            let file = FileEntry {
                path: backup_abs,
                sum,
                uname: "root".to_string(),
                gname: "wheel".to_string(),
                perm: 0o444,
                fflags: 0,
                kind: FileType::Regular,
                link_target: None,
                config: false,
            };
            let mut compat_pkg = compat;
            if compat_pkg.add_file(file).is_ok() {
                compat_pkg.shlibs_provided.insert(lib.clone());
                match self.db.register(&compat_pkg) {
                    Ok(()) => self.events.notice(format!(
                        "{lib} preserved in {}",
                        self.config.backup_lib_dir.display()
                    )),
                    Err(PkgError::Conflict { .. }) => self.events.notice(format!(
                        "{lib} already preserved by an earlier compat package"
                    )),
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Emit install/upgrade messages whose version window matches.
    fn show_messages(&self, pkg: &Package, upgraded_from: Option<&str>) {
        for message in &pkg.messages {
            let show = match (message.kind, upgraded_from) {
                (MessageKind::Always, _) => true,
                (MessageKind::Install, None) => true,
                (MessageKind::Upgrade, Some(old_version)) => message_in_window(message, old_version),
                _ => false,
            };
            if show {
                self.events.notice(message.text.clone());
            }
        }
    }

    fn show_removal_messages(&self, pkg: &Package) {
        for message in &pkg.messages {
            if matches!(message.kind, MessageKind::Always | MessageKind::Remove) {
                self.events.notice(message.text.clone());
            }
        }
    }
}

/// Name of the package a step concerns, for keep-going bookkeeping.
fn step_package_name(step: &Step) -> Option<String> {
    let name = match step {
        Step::Fetch { pkg, .. } | Step::Install { pkg, .. } | Step::Reinstall { pkg, .. } => {
            &pkg.name
        }
        Step::Upgrade { new, .. } | Step::Downgrade { new, .. } => &new.name,
        Step::Deinstall { pkg, .. } => &pkg.name,
    };
    Some(name.clone())
}

/// Whether an upgrade message's version window covers the old version.
fn message_in_window(message: &Message, old_version: &str) -> bool {
    if let Some(min) = &message.min_version
        && compare_versions(old_version, min) == std::cmp::Ordering::Less
    {
        return false;
    }
    if let Some(max) = &message.max_version
        && compare_versions(old_version, max) == std::cmp::Ordering::Greater
    {
        return false;
    }
    true
}

/// Sibling path with a suffix appended to the file name.
fn dest_with_suffix(dest: &Path, suffix: &str) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(suffix);
    dest.with_file_name(name)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
