//! Planner scenarios: requested sets against installed state and
//! catalogues.

#![allow(clippy::unwrap_used)]

mod common;

use binpkg::db::LockMode;
use binpkg::error::PkgError;
use binpkg::jobs::{Request, Solver, SolverFlags, Step};
use binpkg::types::MatchExpr;
use common::World;

fn solver_flags() -> SolverFlags {
    SolverFlags::default()
}

#[test]
fn fresh_install_without_deps() {
    let mut world = World::new();
    let hello = world.make_pkg("hello", "1.2", &[], &[("/usr/local/bin/hello", "hi")]);
    world.publish(&[(&hello, &[("/usr/local/bin/hello", "hi")])]);

    let db = world.db(LockMode::Advisory);
    let repos = world.repos();
    let solver = Solver::new(&db, &repos, &world.config, &world.events, solver_flags());
    let plan = solver
        .solve(&[Request::Install(MatchExpr::exact("hello", false))])
        .unwrap();

    let kinds: Vec<(&str, &str)> = plan
        .steps
        .iter()
        .map(|s| (s.kind_name(), s.uid()))
        .collect();
    assert_eq!(kinds, vec![("fetch", "hello"), ("install", "hello")]);
}

#[test]
fn chain_dependency_is_closed_and_ordered() {
    let mut world = World::new();
    let b = world.make_pkg("bdep", "1.0", &[], &[("/usr/local/lib/libb.so", "b")]);
    let a = world.make_pkg(
        "apkg",
        "1.0",
        &[("bdep", Some(">=1.0"))],
        &[("/usr/local/bin/a", "a")],
    );
    world.publish(&[
        (&a, &[("/usr/local/bin/a", "a")]),
        (&b, &[("/usr/local/lib/libb.so", "b")]),
    ]);

    let db = world.db(LockMode::Advisory);
    let repos = world.repos();
    let solver = Solver::new(&db, &repos, &world.config, &world.events, solver_flags());
    let plan = solver
        .solve(&[Request::Install(MatchExpr::exact("apkg", false))])
        .unwrap();

    let kinds: Vec<(&str, &str)> = plan
        .steps
        .iter()
        .map(|s| (s.kind_name(), s.uid()))
        .collect();
    // Fetches first, then B before A.
    assert_eq!(
        kinds,
        vec![
            ("fetch", "apkg"),
            ("fetch", "bdep"),
            ("install", "bdep"),
            ("install", "apkg"),
        ]
    );
    // The dependency carries an automatic marker and a reason.
    let auto = plan.steps.iter().any(|s| match s {
        Step::Install { pkg, automatic, reason, .. } => {
            pkg.name == "bdep" && *automatic && reason.contains("required by apkg-1.0")
        }
        _ => false,
    });
    assert!(auto);
}

#[test]
fn file_conflict_aborts_the_plan() {
    let mut world = World::new();
    let p2 = world.make_pkg("ptwo", "1.0", &[], &[("/usr/local/bin/tool", "two")]);
    world.publish(&[(&p2, &[("/usr/local/bin/tool", "two")])]);

    {
        let mut db = world.db(LockMode::Exclusive);
        let p1 = world.make_pkg("pone", "1.0", &[], &[("/usr/local/bin/tool", "one")]);
        db.register(&p1).unwrap();
    }

    let db = world.db(LockMode::Advisory);
    let repos = world.repos();
    let solver = Solver::new(&db, &repos, &world.config, &world.events, solver_flags());
    let err = solver.solve(&[Request::Install(MatchExpr::exact("ptwo", false))]);
    match err {
        Err(PkgError::Conflict { path, owner, claimer }) => {
            assert_eq!(path, "/usr/local/bin/tool");
            assert_eq!(owner, "pone");
            assert_eq!(claimer, "ptwo-1.0");
        }
        other => panic!("expected Conflict, got {other:?}"),
    }
    // A CONFLICT event was emitted exactly once.
    let conflicts = world
        .sink
        .events()
        .iter()
        .filter(|e| e.type_name() == "CONFLICT")
        .count();
    assert_eq!(conflicts, 1);
    // LPDB unchanged.
    assert_eq!(db.summaries().unwrap().len(), 1);
}

#[test]
fn permissive_demotes_conflicts() {
    let mut world = World::new();
    world.config.permissive = true;
    let p2 = world.make_pkg("ptwo", "1.0", &[], &[("/usr/local/bin/tool", "two")]);
    world.publish(&[(&p2, &[("/usr/local/bin/tool", "two")])]);
    {
        let mut db = world.db(LockMode::Exclusive);
        let p1 = world.make_pkg("pone", "1.0", &[], &[("/usr/local/bin/tool", "one")]);
        db.register(&p1).unwrap();
    }
    let db = world.db(LockMode::Advisory);
    let repos = world.repos();
    let solver = Solver::new(&db, &repos, &world.config, &world.events, solver_flags());
    let plan = solver
        .solve(&[Request::Install(MatchExpr::exact("ptwo", false))])
        .unwrap();
    assert!(!plan.is_empty());
}

#[test]
fn locked_packages_stop_plans_unless_forced() {
    let mut world = World::new();
    let zsh_new = world.make_pkg("zsh", "5.9", &[], &[("/usr/local/bin/zsh", "new")]);
    world.publish(&[(&zsh_new, &[("/usr/local/bin/zsh", "new")])]);
    {
        let mut db = world.db(LockMode::Exclusive);
        let zsh_old = world.make_pkg("zsh", "5.8", &[], &[("/usr/local/bin/zsh", "old")]);
        db.register(&zsh_old).unwrap();
        db.set_locked("zsh", true).unwrap();
    }

    let db = world.db(LockMode::Advisory);
    let repos = world.repos();
    let solver = Solver::new(&db, &repos, &world.config, &world.events, solver_flags());
    let err = solver.solve(&[Request::Upgrade(MatchExpr::exact("zsh", false))]);
    assert!(matches!(err, Err(PkgError::Locked(_))));

    let mut flags = solver_flags();
    flags.force_locked = true;
    let solver = Solver::new(&db, &repos, &world.config, &world.events, flags);
    let plan = solver
        .solve(&[Request::Upgrade(MatchExpr::exact("zsh", false))])
        .unwrap();
    assert_eq!(plan.steps.len(), 2);
    assert!(
        world
            .sink
            .events()
            .iter()
            .any(|e| e.type_name() == "LOCKED")
    );
}

#[test]
fn upgrade_all_picks_newer_versions_only() {
    let mut world = World::new();
    let lib_new = world.make_pkg("libfoo", "2.0", &[], &[("/usr/local/lib/libfoo.so.2", "v2")]);
    let same = world.make_pkg("same", "1.0", &[], &[("/usr/local/bin/same", "s")]);
    world.publish(&[
        (&lib_new, &[("/usr/local/lib/libfoo.so.2", "v2")]),
        (&same, &[("/usr/local/bin/same", "s")]),
    ]);
    {
        let mut db = world.db(LockMode::Exclusive);
        let lib_old =
            world.make_pkg("libfoo", "1.0", &[], &[("/usr/local/lib/libfoo.so.1", "v1")]);
        db.register(&lib_old).unwrap();
        let same_installed = world.make_pkg("same", "1.0", &[], &[("/usr/local/bin/same", "s")]);
        db.register(&same_installed).unwrap();
    }

    let db = world.db(LockMode::Advisory);
    let repos = world.repos();
    let solver = Solver::new(&db, &repos, &world.config, &world.events, solver_flags());
    let plan = solver.solve(&[Request::Upgrade(MatchExpr::All)]).unwrap();
    let kinds: Vec<(&str, &str)> = plan
        .steps
        .iter()
        .map(|s| (s.kind_name(), s.uid()))
        .collect();
    assert_eq!(kinds, vec![("fetch", "libfoo"), ("upgrade", "libfoo")]);
}

#[test]
fn downgrades_require_the_flag() {
    let mut world = World::new();
    let old = world.make_pkg("roll", "1.0", &[], &[("/usr/local/bin/roll", "old")]);
    world.publish(&[(&old, &[("/usr/local/bin/roll", "old")])]);
    {
        let mut db = world.db(LockMode::Exclusive);
        let newer = world.make_pkg("roll", "2.0", &[], &[("/usr/local/bin/roll", "new")]);
        db.register(&newer).unwrap();
    }
    let db = world.db(LockMode::Advisory);
    let repos = world.repos();

    let solver = Solver::new(&db, &repos, &world.config, &world.events, solver_flags());
    let plan = solver
        .solve(&[Request::Install(MatchExpr::exact("roll", false))])
        .unwrap();
    assert!(plan.is_empty());

    let mut flags = solver_flags();
    flags.allow_downgrade = true;
    let solver = Solver::new(&db, &repos, &world.config, &world.events, flags);
    let plan = solver
        .solve(&[Request::Install(MatchExpr::exact("roll", false))])
        .unwrap();
    assert_eq!(plan.steps[1].kind_name(), "downgrade");
}

#[test]
fn removal_respects_reverse_dependencies() {
    let mut world = World::new();
    {
        let mut db = world.db(LockMode::Exclusive);
        let base = world.make_pkg("base", "1.0", &[], &[("/usr/local/lib/base.so", "b")]);
        db.register(&base).unwrap();
        let app = world.make_pkg(
            "app",
            "1.0",
            &[("base", None)],
            &[("/usr/local/bin/app", "a")],
        );
        db.register(&app).unwrap();
    }
    let db = world.db(LockMode::Advisory);
    let repos = world.repos();

    let solver = Solver::new(&db, &repos, &world.config, &world.events, solver_flags());
    let err = solver.solve(&[Request::Remove(MatchExpr::exact("base", false))]);
    assert!(matches!(err, Err(PkgError::DepUnsat(_))));

    // Recursive removal takes the dependent along, dependent first.
    let mut flags = solver_flags();
    flags.recursive = true;
    let solver = Solver::new(&db, &repos, &world.config, &world.events, flags);
    let plan = solver
        .solve(&[Request::Remove(MatchExpr::exact("base", false))])
        .unwrap();
    let kinds: Vec<(&str, &str)> = plan
        .steps
        .iter()
        .map(|s| (s.kind_name(), s.uid()))
        .collect();
    assert_eq!(kinds, vec![("deinstall", "app"), ("deinstall", "base")]);
}

#[test]
fn autoremove_collects_orphans_transitively() {
    let mut world = World::new();
    {
        let mut db = world.db(LockMode::Exclusive);
        let leaf = world.make_pkg("leaf", "1.0", &[("mid", None)], &[]);
        db.register(&leaf).unwrap();
        let mid = world.make_pkg("mid", "1.0", &[("deep", None)], &[]);
        db.register(&mid).unwrap();
        db.set_auto("mid", true).unwrap();
        let deep = world.make_pkg("deep", "1.0", &[], &[]);
        db.register(&deep).unwrap();
        db.set_auto("deep", true).unwrap();
        // leaf is explicit; nothing is removable yet.
    }
    let db = world.db(LockMode::Advisory);
    let repos = world.repos();
    let solver = Solver::new(&db, &repos, &world.config, &world.events, solver_flags());
    let plan = solver.solve(&[Request::Autoremove]).unwrap();
    assert!(plan.is_empty());

    // Remove leaf and autoremove: mid then deep become orphans.
    let plan = solver
        .solve(&[
            Request::Remove(MatchExpr::exact("leaf", false)),
            Request::Autoremove,
        ])
        .unwrap();
    let kinds: Vec<(&str, &str)> = plan
        .steps
        .iter()
        .map(|s| (s.kind_name(), s.uid()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("deinstall", "leaf"),
            ("deinstall", "mid"),
            ("deinstall", "deep"),
        ]
    );
    for step in &plan.steps {
        if step.uid() != "leaf" {
            assert!(step.reason().contains("autoremove") || step.reason().contains("orphaned"));
        }
    }
}

#[test]
fn plans_are_deterministic() {
    let mut world = World::new();
    let files_c = [("/usr/local/lib/libc1.so", "c")];
    let c = world.make_pkg("clib", "1.0", &[], &files_c);
    let files_b = [("/usr/local/lib/libb1.so", "b")];
    let b = world.make_pkg("blib", "1.0", &[("clib", None)], &files_b);
    let files_a = [("/usr/local/bin/abin", "a")];
    let a = world.make_pkg("abin", "1.0", &[("blib", None), ("clib", None)], &files_a);
    world.publish(&[(&a, &files_a), (&b, &files_b), (&c, &files_c)]);

    let db = world.db(LockMode::Advisory);
    let repos = world.repos();
    let solver = Solver::new(&db, &repos, &world.config, &world.events, solver_flags());
    let requests = [Request::Install(MatchExpr::glob("*b*").unwrap())];
    let first = solver.solve(&requests).unwrap();
    let second = solver.solve(&requests).unwrap();
    assert_eq!(first.summary(), second.summary());
    assert!(!first.is_empty());
}

#[test]
fn fetch_requests_produce_fetch_only_plans() {
    let mut world = World::new();
    let files = [("/usr/local/bin/dl", "d")];
    let pkg = world.make_pkg("dlonly", "3.1", &[], &files);
    world.publish(&[(&pkg, &files)]);

    let db = world.db(LockMode::Advisory);
    let repos = world.repos();
    let solver = Solver::new(&db, &repos, &world.config, &world.events, solver_flags());
    let plan = solver
        .solve(&[Request::Fetch(MatchExpr::exact("dlonly", false))])
        .unwrap();
    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.steps[0].kind_name(), "fetch");
}
