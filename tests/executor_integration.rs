//! Executor scenarios: end-to-end plan application, crash resume,
//! config-file handling, shared-library backup.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use binpkg::cache;
use binpkg::db::LockMode;
use binpkg::error::PkgError;
use binpkg::jobs::{
    ExecOptions, Executor, Journal, JournalRecord, Request, Solver, SolverFlags, plan_id,
};
use binpkg::types::MatchExpr;
use common::World;

fn exec_opts(world: &World) -> ExecOptions {
    ExecOptions {
        fs_root: world.fs_root(),
        ..ExecOptions::default()
    }
}

#[test]
fn fresh_install_commits_files_and_db_row() {
    let mut world = World::new();
    let files = [("/usr/local/bin/hello", "#!/bin/sh\necho hello\n")];
    let hello = world.make_pkg("hello", "1.2", &[], &files);
    world.publish(&[(&hello, &files)]);

    let mut db = world.db(LockMode::Exclusive);
    let repos = world.repos();
    let solver = Solver::new(
        &db,
        &repos,
        &world.config,
        &world.events,
        SolverFlags::default(),
    );
    let plan = solver
        .solve(&[Request::Install(MatchExpr::exact("hello", false))])
        .unwrap();

    let opts = exec_opts(&world);
    let mut executor = Executor::new(
        &mut db,
        &repos,
        &world.config,
        Arc::clone(&world.events),
        &world.fetcher,
        opts,
    );
    let report = executor.execute(&plan).unwrap();
    assert_eq!(report.done.len(), 2);
    assert!(report.failed.is_empty());

    let on_disk = world.fs_root().join("usr/local/bin/hello");
    let content = std::fs::read(&on_disk).unwrap();
    assert_eq!(
        binpkg::checksum::hash_bytes(&content),
        hello.files[0].sum
    );
    let row = db.get("hello").unwrap().unwrap();
    assert!(!row.automatic);
    assert!(row.time_installed.is_some());
    assert_eq!(
        row.annotations.get("repository").map(String::as_str),
        Some("test")
    );

    // Event order: install begin before install finished.
    let types: Vec<&str> = world
        .sink
        .events()
        .iter()
        .map(binpkg::events::Event::type_name)
        .collect();
    let begin = types.iter().position(|t| *t == "INFO_INSTALL_BEGIN").unwrap();
    let end = types
        .iter()
        .position(|t| *t == "INFO_INSTALL_FINISHED")
        .unwrap();
    assert!(begin < end);

    // The journal is clean after a committed plan.
    assert!(
        Journal::dirty_state(&world.config.journal_path(), &plan_id(&plan))
            .unwrap()
            .is_none()
    );
}

#[test]
fn chain_install_marks_dependency_automatic() {
    let mut world = World::new();
    let files_b = [("/usr/local/lib/libb.so", "lib")];
    let b = world.make_pkg("bdep", "1.0", &[], &files_b);
    let files_a = [("/usr/local/bin/a", "bin")];
    let a = world.make_pkg("apkg", "1.0", &[("bdep", Some(">=1.0"))], &files_a);
    world.publish(&[(&a, &files_a), (&b, &files_b)]);

    let mut db = world.db(LockMode::Exclusive);
    let repos = world.repos();
    let solver = Solver::new(
        &db,
        &repos,
        &world.config,
        &world.events,
        SolverFlags::default(),
    );
    let plan = solver
        .solve(&[Request::Install(MatchExpr::exact("apkg", false))])
        .unwrap();
    let opts = exec_opts(&world);
    let mut executor = Executor::new(
        &mut db,
        &repos,
        &world.config,
        Arc::clone(&world.events),
        &world.fetcher,
        opts,
    );
    executor.execute(&plan).unwrap();

    assert!(db.get("bdep").unwrap().unwrap().automatic);
    assert!(!db.get("apkg").unwrap().unwrap().automatic);
}

#[test]
fn resume_after_crash_matches_uninterrupted_state() {
    let mut world = World::new();
    let files_a = [("/usr/local/bin/aone", "A")];
    let a = world.make_pkg("aone", "1.0", &[], &files_a);
    let files_b = [("/usr/local/bin/btwo", "B")];
    let b = world.make_pkg("btwo", "1.0", &[], &files_b);
    world.publish(&[(&a, &files_a), (&b, &files_b)]);

    let mut db = world.db(LockMode::Exclusive);
    let repos = world.repos();
    let solver = Solver::new(
        &db,
        &repos,
        &world.config,
        &world.events,
        SolverFlags::default(),
    );
    let plan = solver
        .solve(&[
            Request::Install(MatchExpr::exact("aone", false)),
            Request::Install(MatchExpr::exact("btwo", false)),
        ])
        .unwrap();
    // [fetch aone, fetch btwo, install aone, install btwo]
    assert_eq!(plan.steps.len(), 4);
    let id = plan_id(&plan);

    // Simulate the crash: fetches done, aone's files materialized, no DB
    // commit, process gone.
    for (_repo, pkg) in repos.candidates("aone", "").unwrap() {
        cache::fetch_artifact(&world.repo, &pkg, &world.config, &world.fetcher, &world.events)
            .unwrap();
    }
    for (_repo, pkg) in repos.candidates("btwo", "").unwrap() {
        cache::fetch_artifact(&world.repo, &pkg, &world.config, &world.fetcher, &world.events)
            .unwrap();
    }
    let dest = world.fs_root().join("usr/local/bin/aone");
    std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
    std::fs::write(&dest, "A").unwrap();
    let mut journal = Journal::open(&world.config.journal_path()).unwrap();
    journal
        .append(&JournalRecord::PlanBegin {
            plan_id: id.clone(),
            steps: plan.steps.len(),
        })
        .unwrap();
    for index in 0..2 {
        journal
            .append(&JournalRecord::StepBegin {
                index,
                kind: "fetch".to_string(),
                uid: plan.steps[index].uid().to_string(),
            })
            .unwrap();
        journal
            .append(&JournalRecord::StepEnd { index, ok: true })
            .unwrap();
    }
    journal
        .append(&JournalRecord::StepBegin {
            index: 2,
            kind: "install".to_string(),
            uid: "aone".to_string(),
        })
        .unwrap();
    journal.append(&JournalRecord::FilesDone { index: 2 }).unwrap();
    drop(journal);

    // Restart: the executor reconciles the journal and finishes.
    let opts = exec_opts(&world);
    let mut executor = Executor::new(
        &mut db,
        &repos,
        &world.config,
        Arc::clone(&world.events),
        &world.fetcher,
        opts,
    );
    let report = executor.resume(&plan).unwrap();
    assert_eq!(report.done.len(), 4);

    for (name, content) in [("aone", "A"), ("btwo", "B")] {
        let row = db.get(name).unwrap().unwrap();
        assert!(row.time_installed.is_some());
        let path = world.fs_root().join(format!("usr/local/bin/{name}"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), content);
    }
    assert!(
        Journal::dirty_state(&world.config.journal_path(), &id)
            .unwrap()
            .is_none()
    );
}

#[test]
fn config_files_are_preserved_across_upgrade_and_removal() {
    let mut world = World::new();
    let v1_files = [("/usr/local/etc/app.conf", "setting=1\n")];
    let mut v1 = world.make_pkg("app", "1.0", &[], &v1_files);
    v1.files[0].config = true;
    let v2_files = [("/usr/local/etc/app.conf", "setting=2\n")];
    let mut v2 = world.make_pkg("app", "2.0", &[], &v2_files);
    v2.files[0].config = true;
    // The catalogue holds one row per name, so publish v1 first and
    // republish v2 for the upgrade.
    world.publish(&[(&v1, &v1_files)]);
    let mut db = world.db(LockMode::Exclusive);
    {
        let repos = world.repos();
        let solver = Solver::new(
            &db,
            &repos,
            &world.config,
            &world.events,
            SolverFlags::default(),
        );
        let plan = solver
            .solve(&[Request::Install(MatchExpr::exact("app", false))])
            .unwrap();
        let opts = exec_opts(&world);
        let mut executor = Executor::new(
            &mut db,
            &repos,
            &world.config,
            Arc::clone(&world.events),
            &world.fetcher,
            opts,
        );
        executor.execute(&plan).unwrap();
    }

    let conf = world.fs_root().join("usr/local/etc/app.conf");
    // The user edits the config.
    std::fs::write(&conf, "setting=mine\n").unwrap();

    // Republish with only v2 and upgrade.
    world.publish(&[(&v2, &v2_files)]);
    let repos = world.repos();
    {
        let solver = Solver::new(
            &db,
            &repos,
            &world.config,
            &world.events,
            SolverFlags::default(),
        );
        let plan = solver.solve(&[Request::Upgrade(MatchExpr::All)]).unwrap();
        assert_eq!(plan.steps[1].kind_name(), "upgrade");
        let opts = exec_opts(&world);
        let mut executor = Executor::new(
            &mut db,
            &repos,
            &world.config,
            Arc::clone(&world.events),
            &world.fetcher,
            opts,
        );
        executor.execute(&plan).unwrap();
    }

    // Local edit kept; packaged version parked next to it.
    assert_eq!(std::fs::read_to_string(&conf).unwrap(), "setting=mine\n");
    let pkgnew = world.fs_root().join("usr/local/etc/app.conf.pkgnew");
    assert_eq!(std::fs::read_to_string(&pkgnew).unwrap(), "setting=2\n");

    // Removal preserves the modified file as .pkgsave.
    {
        let solver = Solver::new(
            &db,
            &repos,
            &world.config,
            &world.events,
            SolverFlags::default(),
        );
        let plan = solver
            .solve(&[Request::Remove(MatchExpr::exact("app", false))])
            .unwrap();
        let opts = exec_opts(&world);
        let mut executor = Executor::new(
            &mut db,
            &repos,
            &world.config,
            Arc::clone(&world.events),
            &world.fetcher,
            opts,
        );
        executor.execute(&plan).unwrap();
    }
    assert!(!conf.exists());
    let pkgsave = world.fs_root().join("usr/local/etc/app.conf.pkgsave");
    assert_eq!(
        std::fs::read_to_string(&pkgsave).unwrap(),
        "setting=mine\n"
    );
    assert!(db.get("app").unwrap().is_none());
}

#[test]
fn removed_but_needed_library_is_backed_up() {
    let mut world = World::new();
    let v2_files = [("/usr/local/lib/libfoo.so.2", "soname2")];
    let mut libfoo2 = world.make_pkg("libfoo", "2.0", &[], &v2_files);
    libfoo2.shlibs_provided.insert("libfoo.so.2".to_string());
    world.publish(&[(&libfoo2, &v2_files)]);

    let mut db = world.db(LockMode::Exclusive);
    {
        // Installed state: libfoo 1.0 provides the old soname, bar needs it.
        let mut libfoo1 =
            world.make_pkg("libfoo", "1.0", &[], &[("/usr/local/lib/libfoo.so.1", "soname1")]);
        libfoo1.shlibs_provided.insert("libfoo.so.1".to_string());
        db.register(&libfoo1).unwrap();
        let mut bar = world.make_pkg("bar", "1.0", &[("libfoo", None)], &[]);
        bar.shlibs_required.insert("libfoo.so.1".to_string());
        db.register(&bar).unwrap();
        let lib_path = world.fs_root().join("usr/local/lib/libfoo.so.1");
        std::fs::create_dir_all(lib_path.parent().unwrap()).unwrap();
        std::fs::write(&lib_path, "soname1").unwrap();
    }

    let repos = world.repos();
    let solver = Solver::new(
        &db,
        &repos,
        &world.config,
        &world.events,
        SolverFlags::default(),
    );
    let plan = solver.solve(&[Request::Upgrade(MatchExpr::All)]).unwrap();
    let opts = exec_opts(&world);
    let mut executor = Executor::new(
        &mut db,
        &repos,
        &world.config,
        Arc::clone(&world.events),
        &world.fetcher,
        opts,
    );
    executor.execute(&plan).unwrap();

    // Warning surfaced and shim staged.
    assert!(
        world
            .sink
            .events()
            .iter()
            .any(|e| e.type_name() == "ABI_BREAKAGE")
    );
    let backup = world
        .fs_root()
        .join("usr/local/lib/compat/pkg/libfoo.so.1");
    assert_eq!(std::fs::read_to_string(&backup).unwrap(), "soname1");
    let compat = db
        .query(&MatchExpr::exact("compat-libraries", true))
        .unwrap();
    assert_eq!(compat.len(), 1);
    assert!(compat[0].shlibs_provided.contains("libfoo.so.1"));
}

#[test]
fn keep_going_skips_dependents_of_failed_steps() {
    let mut world = World::new();
    let files_bad = [("/usr/local/bin/bad", "bad")];
    let bad = world.make_pkg("bad", "1.0", &[], &files_bad);
    let files_mid = [("/usr/local/bin/mid", "mid")];
    let mid = world.make_pkg("mid", "1.0", &[("bad", None)], &files_mid);
    let files_good = [("/usr/local/bin/good", "good")];
    let good = world.make_pkg("good", "1.0", &[], &files_good);
    world.publish(&[(&bad, &files_bad), (&mid, &files_mid), (&good, &files_good)]);

    let mut db = world.db(LockMode::Exclusive);
    let repos = world.repos();
    let solver = Solver::new(
        &db,
        &repos,
        &world.config,
        &world.events,
        SolverFlags::default(),
    );
    let plan = solver
        .solve(&[
            Request::Install(MatchExpr::exact("mid", false)),
            Request::Install(MatchExpr::exact("good", false)),
        ])
        .unwrap();

    // Sabotage: rebuild the fetcher without bad's artifact so its FETCH
    // step fails permanently. Archives rebuild byte-identically thanks to
    // the pinned timestamp.
    let mut fetcher = binpkg::repo::MockFetcher::new();
    for (pkg, files) in [(&mid, &files_mid), (&good, &files_good)] {
        let archive = world.build_archive(pkg, files);
        let url = world
            .repo
            .object_url(&format!("All/{}-{}.pkg", pkg.name, pkg.version));
        fetcher = fetcher.with_body(url, archive);
    }

    let opts = ExecOptions {
        fs_root: world.fs_root(),
        keep_going: true,
        ..ExecOptions::default()
    };
    let mut executor = Executor::new(
        &mut db,
        &repos,
        &world.config,
        Arc::clone(&world.events),
        &fetcher,
        opts,
    );
    let report = executor.execute(&plan).unwrap();

    // bad's fetch failed, mid was skipped, good installed.
    assert!(report.failed.iter().any(|(uid, _)| uid == "bad"));
    assert!(report.failed.iter().any(|(uid, _)| uid == "mid"));
    assert!(report.done.iter().any(|uid| uid == "good"));
    assert!(db.get("good").unwrap().is_some());
    assert!(db.get("mid").unwrap().is_none());
}

#[test]
fn cancellation_stops_between_steps() {
    let mut world = World::new();
    let files = [("/usr/local/bin/slow", "s")];
    let slow = world.make_pkg("slow", "1.0", &[], &files);
    world.publish(&[(&slow, &files)]);

    let mut db = world.db(LockMode::Exclusive);
    let repos = world.repos();
    let solver = Solver::new(
        &db,
        &repos,
        &world.config,
        &world.events,
        SolverFlags::default(),
    );
    let plan = solver
        .solve(&[Request::Install(MatchExpr::exact("slow", false))])
        .unwrap();
    let opts = exec_opts(&world);
    let mut executor = Executor::new(
        &mut db,
        &repos,
        &world.config,
        Arc::clone(&world.events),
        &world.fetcher,
        opts,
    );
    executor.cancel_flag().store(true, Ordering::SeqCst);
    let err = executor.execute(&plan);
    assert!(matches!(err, Err(PkgError::Cancelled)));
    assert!(db.get("slow").unwrap().is_none());
}
