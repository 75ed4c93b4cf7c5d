//! Shared harness for integration tests: a scratch world with a local
//! database, an artifact cache, one mock repository, and a filesystem
//! root to install into.

#![allow(dead_code, clippy::unwrap_used)]

use std::path::PathBuf;
use std::sync::Arc;

use binpkg::archive::{Format, Level, PackOptions, create_package};
use binpkg::checksum;
use binpkg::config::Config;
use binpkg::db::{LockMode, Pkgdb};
use binpkg::events::{CollectingSink, EventBus};
use binpkg::manifest;
use binpkg::repo::{
    MirrorMode, MockFetcher, RepoConfig, RepoDescriptor, RepoSet, SignatureMode, UpdateOutcome,
};
use binpkg::types::{DependencyEdge, FileEntry, FileType, Package};
use binpkg::deps::VersionConstraint;

/// A self-contained test installation.
pub struct World {
    pub dir: tempfile::TempDir,
    pub config: Config,
    pub events: Arc<EventBus>,
    pub sink: CollectingSink,
    pub repo: RepoConfig,
    pub fetcher: MockFetcher,
}

impl World {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.db_dir = dir.path().join("db");
        config.cache_dir = dir.path().join("cache");
        config.repos_dir = Vec::new();
        config.lock_grace = std::time::Duration::from_millis(50);
        std::fs::create_dir_all(&config.db_dir).unwrap();
        std::fs::create_dir_all(dir.path().join("root")).unwrap();

        let sink = CollectingSink::new();
        let mut bus = EventBus::new();
        bus.add_sink(Box::new(sink.clone()));

        let repo = RepoConfig {
            name: "test".to_string(),
            url: "https://pkg.test.example/latest".to_string(),
            enabled: true,
            priority: 0,
            mirror: MirrorMode::None,
            signature: SignatureMode::None,
        };

        Self {
            dir,
            config,
            events: Arc::new(bus),
            sink,
            repo,
            fetcher: MockFetcher::new(),
        }
    }

    /// Filesystem root plans are applied under.
    pub fn fs_root(&self) -> PathBuf {
        self.dir.path().join("root")
    }

    /// Open the local database under a lock mode.
    pub fn db(&self, mode: LockMode) -> Pkgdb {
        Pkgdb::open(&self.config, Arc::clone(&self.events), mode).unwrap()
    }

    /// Build a package with mandatory fields, dependencies, and payload
    /// file contents.
    pub fn make_pkg(
        &self,
        name: &str,
        version: &str,
        deps: &[(&str, Option<&str>)],
        files: &[(&str, &str)],
    ) -> Package {
        let mut pkg = Package::new(name, version);
        pkg.origin = format!("misc/{name}");
        pkg.comment = format!("{name} test package");
        pkg.desc = format!("The {name} package used by integration tests");
        pkg.maintainer = "tests@binpkg.example".to_string();
        pkg.www = "https://binpkg.example".to_string();
        pkg.abi = "Unix:13:amd64".to_string();
        pkg.prefix = "/usr/local".to_string();
        for (dep_name, constraint) in deps {
            pkg.add_dep(DependencyEdge {
                name: (*dep_name).to_string(),
                origin: Some(format!("misc/{dep_name}")),
                version: constraint.map(|c| VersionConstraint::parse(c).unwrap()),
            });
        }
        for (path, content) in files {
            pkg.add_file(FileEntry {
                path: (*path).to_string(),
                sum: checksum::hash_bytes(content.as_bytes()),
                uname: "root".to_string(),
                gname: "wheel".to_string(),
                perm: 0o644,
                fflags: 0,
                kind: FileType::Regular,
                link_target: None,
                config: false,
            })
            .unwrap();
            pkg.flatsize += content.len() as u64;
        }
        pkg
    }

    /// Build the archive for a package, returning its bytes. Payload
    /// contents must match the package's file entries.
    pub fn build_archive(&self, pkg: &Package, files: &[(&str, &str)]) -> Vec<u8> {
        let payload_root = self.dir.path().join("payload").join(&pkg.name);
        for (path, content) in files {
            let on_disk = payload_root.join(path.trim_start_matches('/'));
            std::fs::create_dir_all(on_disk.parent().unwrap()).unwrap();
            std::fs::write(&on_disk, content).unwrap();
        }
        let out_dir = self.dir.path().join("built");
        std::fs::create_dir_all(&out_dir).unwrap();
        let opts = PackOptions {
            format: Format::Gzip,
            level: Level::Fast,
            timestamp: Some(1_700_000_000),
            overwrite: true,
            compat_symlink: false,
        };
        let archive = create_package(pkg, &payload_root, &out_dir, &opts).unwrap();
        std::fs::read(archive).unwrap()
    }

    /// Publish packages (with payload contents) into the mock repository
    /// and import the catalogue.
    pub fn publish(&mut self, entries: &[(&Package, &[(&str, &str)])]) {
        let mut catalogue = String::new();
        let mut fetcher = std::mem::take(&mut self.fetcher);
        for (pkg, files) in entries {
            let archive = self.build_archive(pkg, files);
            let mut row = (*pkg).clone();
            row.repopath = format!("All/{}-{}.pkg", pkg.name, pkg.version);
            row.digest = checksum::hash_bytes(&archive);
            row.pkgsize = archive.len() as u64;
            fetcher = fetcher.with_body(self.repo.object_url(&row.repopath), archive);
            catalogue.push_str(&manifest::emit_compact(&row).unwrap());
            catalogue.push('\n');
        }
        let descriptor = RepoDescriptor {
            version: 1,
            packing_format: "raw".to_string(),
            revision: 1,
            digest: checksum::hash_bytes(catalogue.as_bytes()),
            filename: "packagesite.catalog".to_string(),
            size: catalogue.len() as u64,
            signature: binpkg::repo::DescriptorSignature::default(),
        };
        fetcher = fetcher
            .with_body(
                self.repo.meta_url(),
                serde_json::to_vec(&descriptor).unwrap(),
            )
            .with_body(
                self.repo.object_url(&descriptor.filename),
                catalogue.into_bytes(),
            );
        self.fetcher = fetcher;

        let outcome =
            binpkg::repo::update(&self.repo, &self.config, &self.fetcher, &self.events).unwrap();
        assert!(matches!(outcome, UpdateOutcome::Updated { .. }));
    }

    /// Open the catalogue set.
    pub fn repos(&self) -> RepoSet {
        let collection =
            binpkg::repo::RepoCollection::from_configs(vec![self.repo.clone()]);
        RepoSet::open(&self.config, &collection, &self.events).unwrap()
    }
}
