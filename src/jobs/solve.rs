//! Job planner.
//!
//! Turns user requests plus current state (installed database, catalogue
//! set) into an ordered, conflict-free plan. Planning is deterministic:
//! equal inputs yield byte-for-byte equal plans. Every step carries a
//! human-readable reason.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;

use super::{Plan, Request, Step};
use crate::checksum;
use crate::config::Config;
use crate::db::Pkgdb;
use crate::deps::compare_versions;
use crate::error::{PkgError, Result};
use crate::events::{Event, EventBus};
use crate::repo::RepoSet;
use crate::types::{FileType, MatchExpr, Package};

/// Planner behavior flags, mirroring the request-level configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolverFlags {
    /// Reinstall same-version requests instead of skipping them, and
    /// break reverse dependencies on removal.
    pub force: bool,
    /// Removal takes dependent packages along instead of failing.
    pub recursive: bool,
    /// Plan without intending to execute. Does not change the plan.
    pub dry_run: bool,
    /// Permit downgrade steps.
    pub allow_downgrade: bool,
    /// Mark explicitly installed packages automatic.
    pub automatic: bool,
    /// Allow plans to touch locked packages, demoting the error to a
    /// warning event.
    pub force_locked: bool,
}

/// What one name is planned to undergo.
#[derive(Debug, Clone)]
enum Action {
    Install {
        new: Package,
        repo: String,
        automatic: bool,
        reason: String,
    },
    Reinstall {
        old: Package,
        new: Package,
        repo: String,
        reason: String,
    },
    Upgrade {
        old: Package,
        new: Package,
        repo: String,
        reason: String,
    },
    Downgrade {
        old: Package,
        new: Package,
        repo: String,
        reason: String,
    },
    Remove {
        old: Package,
        reason: String,
    },
    FetchOnly {
        new: Package,
        repo: String,
    },
}

impl Action {
    /// The package that will exist after the action, if any.
    const fn incoming(&self) -> Option<&Package> {
        match self {
            Self::Install { new, .. }
            | Self::Reinstall { new, .. }
            | Self::Upgrade { new, .. }
            | Self::Downgrade { new, .. }
            | Self::FetchOnly { new, .. } => Some(new),
            Self::Remove { .. } => None,
        }
    }

    /// The installed package the action replaces or removes, if any.
    const fn outgoing(&self) -> Option<&Package> {
        match self {
            Self::Reinstall { old, .. }
            | Self::Upgrade { old, .. }
            | Self::Downgrade { old, .. }
            | Self::Remove { old, .. } => Some(old),
            Self::Install { .. } | Self::FetchOnly { .. } => None,
        }
    }

    const fn mutates(&self) -> bool {
        !matches!(self, Self::FetchOnly { .. })
    }
}

/// The job planner.
pub struct Solver<'a> {
    db: &'a Pkgdb,
    repos: &'a RepoSet,
    config: &'a Config,
    events: &'a EventBus,
    flags: SolverFlags,
}

impl<'a> Solver<'a> {
    /// What: Build a planner over database and catalogue handles.
    ///
    /// Inputs:
    /// - `db`: Local database, opened under at least `ADVISORY`.
    /// - `repos`: Open catalogue set.
    /// - `config`: Supplies permissive/ABI knobs.
    /// - `events`: Receives notices, conflicts, lock warnings.
    /// - `flags`: Planner flags.
    ///
    /// Output:
    /// - The planner.
    #[must_use]
    pub const fn new(
        db: &'a Pkgdb,
        repos: &'a RepoSet,
        config: &'a Config,
        events: &'a EventBus,
        flags: SolverFlags,
    ) -> Self {
        Self {
            db,
            repos,
            config,
            events,
            flags,
        }
    }

    /// What: Produce an ordered plan for a set of requests.
    ///
    /// Inputs:
    /// - `requests`: User requests.
    ///
    /// Output:
    /// - The plan; empty when nothing needs doing.
    ///
    /// Details:
    /// - Phases: stage requested actions, close the dependency graph,
    ///   run the integrity (conflict) check, then order steps
    ///   topologically with the deterministic `(uid, kind)` tie-break
    ///   and batch FETCH steps first.
    ///
    /// # Errors
    ///
    /// Returns `PkgError::NotFound` for unmatched explicit requests,
    /// `PkgError::Locked` for locked targets without `force_locked`,
    /// `PkgError::DepUnsat`, `PkgError::Conflict`, or `PkgError::Cycle`
    /// per the failure taxonomy.
    pub fn solve(&self, requests: &[Request]) -> Result<Plan> {
        let mut actions: BTreeMap<String, Action> = BTreeMap::new();
        for request in requests {
            match request {
                Request::Install(expr) => self.stage_install(expr, &mut actions)?,
                Request::Remove(expr) => self.stage_remove(expr, &mut actions)?,
                Request::Upgrade(expr) => self.stage_upgrade(expr, &mut actions)?,
                Request::Fetch(expr) => self.stage_fetch(expr, &mut actions)?,
                Request::Autoremove => self.stage_autoremove(&mut actions)?,
            }
        }
        self.close_dependencies(&mut actions)?;
        self.integrity_check(&actions)?;
        self.order(actions)
    }

    /// Fail or warn on attempts to modify a locked package.
    fn check_modifiable(&self, pkg: &Package) -> Result<()> {
        if !pkg.locked {
            return Ok(());
        }
        if self.flags.force_locked {
            self.events.emit(&Event::Locked {
                pkg: pkg.name_version(),
            });
            Ok(())
        } else {
            Err(PkgError::Locked(pkg.name_version()))
        }
    }

    fn stage_install(
        &self,
        expr: &MatchExpr,
        actions: &mut BTreeMap<String, Action>,
    ) -> Result<()> {
        let candidates = self.repos.query(expr, &self.config.abi)?;
        if candidates.is_empty() {
            return Err(PkgError::NotFound(expr.to_string()));
        }
        for (repo, candidate) in candidates {
            let name = candidate.name.clone();
            if actions.contains_key(&name) {
                continue;
            }
            match self.db.find_by_name(&name)? {
                None => {
                    actions.insert(
                        name,
                        Action::Install {
                            new: candidate,
                            repo,
                            automatic: self.flags.automatic,
                            reason: "explicitly requested".to_string(),
                        },
                    );
                }
                Some(installed) => {
                    match compare_versions(&candidate.version, &installed.version) {
                        std::cmp::Ordering::Equal => {
                            if self.flags.force {
                                self.check_modifiable(&installed)?;
                                actions.insert(
                                    name,
                                    Action::Reinstall {
                                        old: installed,
                                        new: candidate,
                                        repo,
                                        reason: "forced reinstall".to_string(),
                                    },
                                );
                            } else {
                                self.events.notice(format!(
                                    "{} is already installed, skipping",
                                    installed.name_version()
                                ));
                            }
                        }
                        std::cmp::Ordering::Greater => {
                            self.check_modifiable(&installed)?;
                            let reason = format!(
                                "upgrade to requested {} (installed {})",
                                candidate.version, installed.version
                            );
                            actions.insert(
                                name,
                                Action::Upgrade {
                                    old: installed,
                                    new: candidate,
                                    repo,
                                    reason,
                                },
                            );
                        }
                        std::cmp::Ordering::Less => {
                            if self.flags.allow_downgrade {
                                self.check_modifiable(&installed)?;
                                let reason = format!(
                                    "downgrade to requested {} (installed {})",
                                    candidate.version, installed.version
                                );
                                actions.insert(
                                    name,
                                    Action::Downgrade {
                                        old: installed,
                                        new: candidate,
                                        repo,
                                        reason,
                                    },
                                );
                            } else {
                                self.events.notice(format!(
                                    "{}: installed {} is newer than candidate {}, skipping",
                                    name, installed.version, candidate.version
                                ));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn stage_remove(
        &self,
        expr: &MatchExpr,
        actions: &mut BTreeMap<String, Action>,
    ) -> Result<()> {
        let matched = self.db.query(expr)?;
        if matched.is_empty() {
            return Err(PkgError::NotFound(expr.to_string()));
        }
        for pkg in matched {
            self.stage_one_removal(pkg, "explicitly requested", actions)?;
        }
        // Pull in (or reject) dependents until the set is closed.
        loop {
            let removing: BTreeSet<String> = actions
                .iter()
                .filter(|(_, a)| matches!(a, Action::Remove { .. }))
                .map(|(name, _)| name.clone())
                .collect();
            let mut grew = false;
            for name in &removing {
                for rdep_uid in self.db.reverse_deps(name)? {
                    let Some(rdep) = self.db.get(&rdep_uid)? else {
                        continue;
                    };
                    if removing.contains(&rdep.name) || actions.contains_key(&rdep.name) {
                        continue;
                    }
                    if self.flags.recursive {
                        let reason = format!("depends on removed {name}");
                        self.stage_one_removal(rdep, &reason, actions)?;
                        grew = true;
                    } else if self.flags.force {
                        self.events.notice(format!(
                            "breaking dependency of {} on {name}",
                            rdep.name_version()
                        ));
                    } else {
                        return Err(PkgError::DepUnsat(format!(
                            "{name} is required by {}",
                            rdep.name_version()
                        )));
                    }
                }
            }
            if !grew {
                break;
            }
        }
        Ok(())
    }

    fn stage_one_removal(
        &self,
        pkg: Package,
        reason: &str,
        actions: &mut BTreeMap<String, Action>,
    ) -> Result<()> {
        self.check_modifiable(&pkg)?;
        if pkg.vital {
            self.events.notice(format!(
                "{} is vital; removal requires explicit confirmation",
                pkg.name_version()
            ));
        }
        actions.insert(
            pkg.name.clone(),
            Action::Remove {
                old: pkg,
                reason: reason.to_string(),
            },
        );
        Ok(())
    }

    fn stage_upgrade(
        &self,
        expr: &MatchExpr,
        actions: &mut BTreeMap<String, Action>,
    ) -> Result<()> {
        let explicit = !matches!(expr, MatchExpr::All);
        let matched = self.db.query(expr)?;
        if matched.is_empty() && explicit {
            return Err(PkgError::NotFound(expr.to_string()));
        }
        for installed in matched {
            if actions.contains_key(&installed.name) {
                continue;
            }
            let Some((repo, candidate)) =
                self.repos.best(&installed.name, &self.config.abi, self.events)?
            else {
                if explicit {
                    self.events.notice(format!(
                        "{}: no candidate in any repository",
                        installed.name
                    ));
                }
                continue;
            };
            match compare_versions(&candidate.version, &installed.version) {
                std::cmp::Ordering::Greater => {
                    self.check_modifiable(&installed)?;
                    let reason =
                        format!("new version {} in repository {repo}", candidate.version);
                    actions.insert(
                        installed.name.clone(),
                        Action::Upgrade {
                            old: installed,
                            new: candidate,
                            repo,
                            reason,
                        },
                    );
                }
                std::cmp::Ordering::Less if self.flags.allow_downgrade => {
                    self.check_modifiable(&installed)?;
                    let reason = format!(
                        "repository {repo} carries older {}, downgrade allowed",
                        candidate.version
                    );
                    actions.insert(
                        installed.name.clone(),
                        Action::Downgrade {
                            old: installed,
                            new: candidate,
                            repo,
                            reason,
                        },
                    );
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn stage_fetch(
        &self,
        expr: &MatchExpr,
        actions: &mut BTreeMap<String, Action>,
    ) -> Result<()> {
        let candidates = self.repos.query(expr, &self.config.abi)?;
        if candidates.is_empty() {
            return Err(PkgError::NotFound(expr.to_string()));
        }
        for (repo, candidate) in candidates {
            actions
                .entry(candidate.name.clone())
                .or_insert(Action::FetchOnly {
                    new: candidate,
                    repo,
                });
        }
        Ok(())
    }

    fn stage_autoremove(&self, actions: &mut BTreeMap<String, Action>) -> Result<()> {
        // Fixpoint: removing an orphan may orphan its own dependencies.
        loop {
            let removing: BTreeSet<String> = actions
                .iter()
                .filter(|(_, a)| matches!(a, Action::Remove { .. }))
                .map(|(name, _)| name.clone())
                .collect();
            let mut grew = false;
            for summary in self.db.summaries()? {
                if removing.contains(&summary.name) || actions.contains_key(&summary.name) {
                    continue;
                }
                let Some(pkg) = self.db.get(&summary.uid)? else {
                    continue;
                };
                if !pkg.automatic {
                    continue;
                }
                let mut needed = false;
                for rdep_uid in self.db.reverse_deps(&pkg.name)? {
                    if let Some(rdep) = self.db.get(&rdep_uid)?
                        && !removing.contains(&rdep.name)
                    {
                        needed = true;
                        break;
                    }
                }
                if !needed {
                    self.stage_one_removal(pkg, "orphaned by autoremove", actions)?;
                    grew = true;
                }
            }
            if !grew {
                return Ok(());
            }
        }
    }

    /// Close the dependency graph of everything being installed.
    fn close_dependencies(&self, actions: &mut BTreeMap<String, Action>) -> Result<()> {
        let mut worklist: Vec<String> = actions
            .iter()
            .filter(|(_, a)| a.mutates() && a.incoming().is_some())
            .map(|(name, _)| name.clone())
            .collect();
        while let Some(name) = worklist.pop() {
            let Some(action) = actions.get(&name) else {
                continue;
            };
            let Some(parent) = action.incoming().cloned() else {
                continue;
            };
            if !action.mutates() {
                continue;
            }
            for dep in &parent.deps {
                if let Some(existing) = actions.get(&dep.name) {
                    match existing {
                        Action::Remove { .. } => {
                            return Err(PkgError::DepUnsat(format!(
                                "{} requires {}, which is scheduled for removal",
                                parent.name_version(),
                                dep.name
                            )));
                        }
                        other => {
                            if let Some(incoming) = other.incoming()
                                && !dep.satisfied_by(&incoming.version)
                            {
                                return Err(PkgError::DepUnsat(format!(
                                    "{} requires {} {}, planned version is {}",
                                    parent.name_version(),
                                    dep.name,
                                    dep.version
                                        .as_ref()
                                        .map(ToString::to_string)
                                        .unwrap_or_default(),
                                    incoming.version
                                )));
                            }
                        }
                    }
                    continue;
                }
                if let Some(installed) = self.db.find_by_name(&dep.name)? {
                    if dep.satisfied_by(&installed.version) {
                        continue;
                    }
                    // The installed version no longer satisfies: upgrade it.
                    let Some((repo, candidate)) =
                        self.repos.best(&dep.name, &self.config.abi, self.events)?
                    else {
                        return Err(PkgError::DepUnsat(format!(
                            "{} requires {} {}, installed {} does not satisfy and no candidate exists",
                            parent.name_version(),
                            dep.name,
                            dep.version
                                .as_ref()
                                .map(ToString::to_string)
                                .unwrap_or_default(),
                            installed.version
                        )));
                    };
                    if !dep.satisfied_by(&candidate.version) {
                        return Err(PkgError::DepUnsat(format!(
                            "{} requires {} {}, best candidate is {}",
                            parent.name_version(),
                            dep.name,
                            dep.version
                                .as_ref()
                                .map(ToString::to_string)
                                .unwrap_or_default(),
                            candidate.version
                        )));
                    }
                    self.check_modifiable(&installed)?;
                    let reason = format!(
                        "required by {}; installed {} is insufficient",
                        parent.name_version(),
                        installed.version
                    );
                    actions.insert(
                        dep.name.clone(),
                        Action::Upgrade {
                            old: installed,
                            new: candidate,
                            repo,
                            reason,
                        },
                    );
                    worklist.push(dep.name.clone());
                } else {
                    let Some((repo, candidate)) =
                        self.repos.best(&dep.name, &self.config.abi, self.events)?
                    else {
                        return Err(PkgError::DepUnsat(format!(
                            "{} requires {}, not installed and not in any repository",
                            parent.name_version(),
                            dep.name
                        )));
                    };
                    if !dep.satisfied_by(&candidate.version) {
                        return Err(PkgError::DepUnsat(format!(
                            "{} requires {} {}, best candidate is {}",
                            parent.name_version(),
                            dep.name,
                            dep.version
                                .as_ref()
                                .map(ToString::to_string)
                                .unwrap_or_default(),
                            candidate.version
                        )));
                    }
                    let reason = format!("required by {}", parent.name_version());
                    actions.insert(
                        dep.name.clone(),
                        Action::Install {
                            new: candidate,
                            repo,
                            automatic: true,
                            reason,
                        },
                    );
                    worklist.push(dep.name.clone());
                }
            }
        }
        Ok(())
    }

    /// File-path and declared-conflict check across the final action set.
    fn integrity_check(&self, actions: &BTreeMap<String, Action>) -> Result<()> {
        self.events.emit(&Event::IntegrityCheckBegin);
        let removed_or_replaced: BTreeSet<String> = actions
            .values()
            .filter_map(|a| a.outgoing().map(|old| old.uid.clone()))
            .collect();

        let mut first_conflict: Option<PkgError> = None;
        let mut conflicting = 0usize;
        let mut claim_conflict =
            |path: &str, owner: &str, claimer: &str, events: &EventBus| {
                conflicting += 1;
                events.emit(&Event::Conflict {
                    path: path.to_string(),
                    owner: owner.to_string(),
                    claimer: claimer.to_string(),
                });
                if first_conflict.is_none() {
                    first_conflict = Some(PkgError::Conflict {
                        path: path.to_string(),
                        owner: owner.to_string(),
                        claimer: claimer.to_string(),
                    });
                }
            };

        let mut desired: BTreeMap<&str, (&Package, bool)> = BTreeMap::new();
        for action in actions.values() {
            if !action.mutates() {
                continue;
            }
            let Some(new) = action.incoming() else {
                continue;
            };
            for file in &new.files {
                if file.kind != FileType::Regular {
                    continue;
                }
                // Collision inside the plan itself.
                if let Some((other, other_config)) = desired.get(file.path.as_str()) {
                    if !(file.config && *other_config) {
                        claim_conflict(&file.path, &other.name_version(), &new.name_version(), self.events);
                    }
                    continue;
                }
                desired.insert(file.path.as_str(), (new, file.config));
                // Collision with an installed package that stays.
                for owner_uid in self.db.which_owns(&file.path)? {
                    if owner_uid == new.uid || removed_or_replaced.contains(&owner_uid) {
                        continue;
                    }
                    let owner_config = self
                        .db
                        .get(&owner_uid)?
                        .and_then(|owner| {
                            owner
                                .files
                                .iter()
                                .find(|f| f.path == file.path)
                                .map(|f| f.config)
                        })
                        .unwrap_or(false);
                    if !(file.config && owner_config) {
                        claim_conflict(&file.path, &owner_uid, &new.name_version(), self.events);
                    }
                }
            }
            // Declared conflicts against installed uids that stay.
            for pattern in &new.conflicts {
                let Ok(glob) = glob::Pattern::new(pattern) else {
                    continue;
                };
                for summary in self.db.summaries()? {
                    if removed_or_replaced.contains(&summary.uid) || summary.uid == new.uid {
                        continue;
                    }
                    if glob.matches(&summary.uid) {
                        claim_conflict(pattern, &summary.uid, &new.name_version(), self.events);
                    }
                }
            }
        }

        self.events
            .emit(&Event::IntegrityCheckFinished { conflicting });
        match first_conflict {
            Some(err) if !self.config.permissive => Err(err),
            Some(_) => {
                self.events
                    .notice("conflicts found, continuing per PERMISSIVE".to_string());
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Topological ordering with cycle handling and FETCH batching.
    #[allow(clippy::too_many_lines)]
    fn order(&self, actions: BTreeMap<String, Action>) -> Result<Plan> {
        // Node keys: "name" for ordinary actions; cycle-broken upgrades
        // split into "name\0del" and "name\0add".
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut index_of = BTreeMap::new();
        for name in actions.keys() {
            let idx = graph.add_node(name.clone());
            index_of.insert(name.clone(), idx);
        }
        for (name, action) in &actions {
            if !action.mutates() {
                continue;
            }
            match action {
                Action::Remove { old, .. } => {
                    // A removed dependent precedes its removed dependency.
                    for dep in &old.deps {
                        if let Some(Action::Remove { .. }) = actions.get(&dep.name) {
                            graph.add_edge(index_of[name], index_of[&dep.name], ());
                        }
                    }
                }
                _ => {
                    if let Some(new) = action.incoming() {
                        for dep in &new.deps {
                            if let Some(other) = actions.get(&dep.name)
                                && other.mutates()
                                && other.incoming().is_some()
                            {
                                // Dependency precedes dependent.
                                graph.add_edge(index_of[&dep.name], index_of[name], ());
                            }
                        }
                    }
                }
            }
        }

        // Cycle detection and break-up.
        let mut cycle_break: BTreeSet<String> = BTreeSet::new();
        for component in tarjan_scc(&graph) {
            if component.len() < 2 {
                continue;
            }
            let members: Vec<String> =
                component.iter().map(|idx| graph[*idx].clone()).collect();
            let all_upgrades = members
                .iter()
                .all(|name| matches!(actions.get(name), Some(Action::Upgrade { .. })));
            if !all_upgrades {
                return Err(PkgError::Cycle(members.join(" -> ")));
            }
            self.events.notice(format!(
                "breaking upgrade cycle: {}",
                members.join(", ")
            ));
            cycle_break.extend(members);
        }

        // Build the ordering universe: (sort_key, Step) nodes plus edges.
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
        struct Key {
            uid: String,
            priority: u8,
            phase: u8,
        }
        let mut steps: BTreeMap<Key, Step> = BTreeMap::new();
        let mut edges: BTreeMap<Key, BTreeSet<Key>> = BTreeMap::new(); // key -> successors
        let key_of = |name: &str, actions: &BTreeMap<String, Action>, phase: u8| -> Option<Key> {
            actions.get(name).map(|action| {
                let (uid, priority) = match action {
                    Action::Remove { old, .. } => (old.uid.clone(), 1),
                    Action::Downgrade { new, .. } => (new.uid.clone(), 2),
                    Action::Upgrade { new, .. } => (new.uid.clone(), 3),
                    Action::Reinstall { new, .. } => (new.uid.clone(), 4),
                    Action::Install { new, .. } | Action::FetchOnly { new, .. } => {
                        (new.uid.clone(), 5)
                    }
                };
                Key {
                    uid,
                    priority,
                    phase,
                }
            })
        };

        let mut fetches: Vec<Step> = Vec::new();
        let mut non_scc_upgrade_keys: Vec<Key> = Vec::new();
        for (name, action) in &actions {
            match action {
                Action::FetchOnly { new, repo } => {
                    fetches.push(Step::Fetch {
                        pkg: new.clone(),
                        repo: repo.clone(),
                    });
                }
                Action::Install {
                    new,
                    repo,
                    automatic,
                    reason,
                } => {
                    fetches.push(Step::Fetch {
                        pkg: new.clone(),
                        repo: repo.clone(),
                    });
                    #[allow(clippy::unwrap_used)]
                    let key = key_of(name, &actions, 1).unwrap();
                    steps.insert(
                        key,
                        Step::Install {
                            pkg: new.clone(),
                            repo: repo.clone(),
                            automatic: *automatic,
                            reason: reason.clone(),
                        },
                    );
                }
                Action::Reinstall {
                    old,
                    new,
                    repo,
                    reason,
                } => {
                    fetches.push(Step::Fetch {
                        pkg: new.clone(),
                        repo: repo.clone(),
                    });
                    #[allow(clippy::unwrap_used)]
                    let key = key_of(name, &actions, 1).unwrap();
                    steps.insert(
                        key,
                        Step::Reinstall {
                            old: old.clone(),
                            pkg: new.clone(),
                            repo: repo.clone(),
                            reason: reason.clone(),
                        },
                    );
                }
                Action::Upgrade {
                    old,
                    new,
                    repo,
                    reason,
                } => {
                    fetches.push(Step::Fetch {
                        pkg: new.clone(),
                        repo: repo.clone(),
                    });
                    if cycle_break.contains(name) {
                        // Deinstall first, reinstall later.
                        let del_key = Key {
                            uid: old.uid.clone(),
                            priority: 1,
                            phase: 0,
                        };
                        steps.insert(
                            del_key.clone(),
                            Step::Deinstall {
                                pkg: old.clone(),
                                reason: "dependency cycle break".to_string(),
                            },
                        );
                        let add_key = Key {
                            uid: new.uid.clone(),
                            priority: 5,
                            phase: 2,
                        };
                        steps.insert(
                            add_key.clone(),
                            Step::Install {
                                pkg: new.clone(),
                                repo: repo.clone(),
                                automatic: old.automatic,
                                reason: format!("{reason}; reinstalled after cycle break"),
                            },
                        );
                        edges.entry(del_key).or_default().insert(add_key);
                    } else {
                        #[allow(clippy::unwrap_used)]
                        let key = key_of(name, &actions, 1).unwrap();
                        non_scc_upgrade_keys.push(key.clone());
                        steps.insert(
                            key,
                            Step::Upgrade {
                                old: old.clone(),
                                new: new.clone(),
                                repo: repo.clone(),
                                reason: reason.clone(),
                            },
                        );
                    }
                }
                Action::Downgrade {
                    old,
                    new,
                    repo,
                    reason,
                } => {
                    fetches.push(Step::Fetch {
                        pkg: new.clone(),
                        repo: repo.clone(),
                    });
                    #[allow(clippy::unwrap_used)]
                    let key = key_of(name, &actions, 1).unwrap();
                    steps.insert(
                        key,
                        Step::Downgrade {
                            old: old.clone(),
                            new: new.clone(),
                            repo: repo.clone(),
                            reason: reason.clone(),
                        },
                    );
                }
                Action::Remove { old, reason } => {
                    #[allow(clippy::unwrap_used)]
                    let key = key_of(name, &actions, 1).unwrap();
                    steps.insert(
                        key,
                        Step::Deinstall {
                            pkg: old.clone(),
                            reason: reason.clone(),
                        },
                    );
                }
            }
        }

        // Cycle members still wait for their non-member dependencies;
        // intra-SCC edges are dropped (the whole component installs as a
        // batch).
        for name in &cycle_break {
            if let Some(Action::Upgrade { new, .. }) = actions.get(name) {
                let add_key = Key {
                    uid: new.uid.clone(),
                    priority: 5,
                    phase: 2,
                };
                for dep in &new.deps {
                    if cycle_break.contains(&dep.name) {
                        continue;
                    }
                    if let Some(other) = actions.get(&dep.name)
                        && other.mutates()
                        && other.incoming().is_some()
                        && let Some(from) = key_of(&dep.name, &actions, 1)
                    {
                        edges.entry(from).or_default().insert(add_key.clone());
                    }
                }
            }
        }

        // Dependency edges between ordinary (non-cycle-break) steps.
        for (name, action) in &actions {
            if !action.mutates() || cycle_break.contains(name) {
                continue;
            }
            match action {
                Action::Remove { old, .. } => {
                    for dep in &old.deps {
                        if let Some(Action::Remove { .. }) = actions.get(&dep.name)
                            && !cycle_break.contains(&dep.name)
                            && let (Some(from), Some(to)) = (
                                key_of(name, &actions, 1),
                                key_of(&dep.name, &actions, 1),
                            )
                        {
                            edges.entry(from).or_default().insert(to);
                        }
                    }
                }
                _ => {
                    if let Some(new) = action.incoming() {
                        for dep in &new.deps {
                            let Some(other) = actions.get(&dep.name) else {
                                continue;
                            };
                            if !other.mutates() || other.incoming().is_none() {
                                continue;
                            }
                            let to = key_of(name, &actions, 1);
                            let from = if cycle_break.contains(&dep.name) {
                                // Depend on the reinstalled half.
                                other.incoming().map(|new| Key {
                                    uid: new.uid.clone(),
                                    priority: 5,
                                    phase: 2,
                                })
                            } else {
                                key_of(&dep.name, &actions, 1)
                            };
                            if let (Some(from), Some(to)) = (from, to)
                                && from != to
                            {
                                edges.entry(from).or_default().insert(to);
                            }
                        }
                    }
                }
            }
        }
        // Cycle-break reinstalls run after every non-SCC upgrade.
        for name in &cycle_break {
            if let Some(Action::Upgrade { new, .. }) = actions.get(name) {
                let add_key = Key {
                    uid: new.uid.clone(),
                    priority: 5,
                    phase: 2,
                };
                for upgrade_key in &non_scc_upgrade_keys {
                    edges
                        .entry(upgrade_key.clone())
                        .or_default()
                        .insert(add_key.clone());
                }
            }
        }

        // Kahn's algorithm with a BTreeSet ready queue: the smallest
        // (uid, kind-priority) key always leaves first, making the order
        // deterministic.
        let mut indegree: BTreeMap<Key, usize> = steps.keys().map(|k| (k.clone(), 0)).collect();
        for successors in edges.values() {
            for succ in successors {
                if let Some(count) = indegree.get_mut(succ) {
                    *count += 1;
                }
            }
        }
        let mut ready: BTreeSet<Key> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(key, _)| key.clone())
            .collect();
        let mut ordered = Vec::with_capacity(steps.len());
        while let Some(key) = ready.iter().next().cloned() {
            ready.remove(&key);
            if let Some(successors) = edges.get(&key) {
                for succ in successors.clone() {
                    if let Some(count) = indegree.get_mut(&succ) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(succ);
                        }
                    }
                }
            }
            #[allow(clippy::unwrap_used)]
            ordered.push(steps.remove(&key).unwrap());
        }
        if !steps.is_empty() {
            let stuck: Vec<String> = steps.values().map(|s| s.uid().to_string()).collect();
            return Err(PkgError::Cycle(stuck.join(" -> ")));
        }

        // FETCH steps are batched first, deterministically by uid.
        fetches.sort_by(|a, b| a.uid().cmp(b.uid()));
        fetches.dedup_by(|a, b| a.uid() == b.uid());
        let mut plan_steps = fetches;
        plan_steps.extend(ordered);
        Ok(Plan { steps: plan_steps })
    }
}

/// What: Fingerprint a plan for the journal.
///
/// Inputs:
/// - `plan`: Plan to fingerprint.
///
/// Output:
/// - Short digest over the ordered step kinds and uids; equal plans get
///   equal ids.
#[must_use]
pub fn plan_id(plan: &Plan) -> String {
    let mut text = String::new();
    for step in &plan.steps {
        text.push_str(step.kind_name());
        text.push(' ');
        text.push_str(step.uid());
        text.push('\n');
    }
    checksum::short_digest(&checksum::hash_bytes(text.as_bytes())).to_string()
}
