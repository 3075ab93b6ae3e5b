//! Change batching for watch mode
//!
//! Filesystem events land in a pending set; every [`ChangeDebouncer::tick`]
//! takes the whole set and hands it to the rebuild step. Removed sources
//! have their build output deleted right away, outside of any batch.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::build::Rebuild;
use crate::utils::fs::{is_file, is_ignored};

/// Filesystem event, reduced to what the debouncer cares about
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// Content changed
    Change,
    /// Created, renamed or moved
    Rename,
    Remove,
}

impl ChangeKind {
    /// Map a notify event kind; access and metadata noise yields `None`
    pub fn from_notify(kind: &notify::EventKind) -> Option<Self> {
        use notify::event::ModifyKind;
        use notify::EventKind;

        match kind {
            EventKind::Create(_) => Some(ChangeKind::Rename),
            EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Rename),
            EventKind::Modify(ModifyKind::Metadata(_)) => None,
            EventKind::Modify(_) => Some(ChangeKind::Change),
            EventKind::Remove(_) => Some(ChangeKind::Remove),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Change => write!(f, "change"),
            ChangeKind::Rename => write!(f, "rename"),
            ChangeKind::Remove => write!(f, "remove"),
        }
    }
}

/// A watched source tree and, optionally, the tree its build output mirrors into
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceRoot {
    pub src: PathBuf,
    pub out: Option<PathBuf>,
}

impl SourceRoot {
    pub fn new(src: impl Into<PathBuf>) -> Self {
        Self {
            src: src.into(),
            out: None,
        }
    }

    pub fn with_output(src: impl Into<PathBuf>, out: impl Into<PathBuf>) -> Self {
        Self {
            src: src.into(),
            out: Some(out.into()),
        }
    }

    /// `<pkg>/src -> <pkg>/build` for every package under `packages_dir`
    /// that has a `src` directory
    pub fn packages(packages_dir: &Path) -> Vec<SourceRoot> {
        let Ok(entries) = fs::read_dir(packages_dir) else {
            debug!("No packages under {}", packages_dir.display());
            return Vec::new();
        };

        let mut roots: Vec<_> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|pkg| pkg.join("src").is_dir())
            .map(|pkg| SourceRoot::with_output(pkg.join("src"), pkg.join("build")))
            .collect();
        roots.sort_by(|a, b| a.src.cmp(&b.src));
        roots
    }

    fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.src) && !is_ignored(&self.src, path)
    }

    fn artifact(&self, path: &Path) -> Option<PathBuf> {
        let relative = path.strip_prefix(&self.src).ok()?;
        Some(self.out.as_ref()?.join(relative))
    }
}

pub struct ChangeDebouncer {
    roots: Vec<SourceRoot>,
    pending: BTreeSet<PathBuf>,
    rebuild: Option<Box<dyn Rebuild>>,
}

impl ChangeDebouncer {
    pub fn new(roots: Vec<SourceRoot>) -> Self {
        Self {
            roots,
            pending: BTreeSet::new(),
            rebuild: None,
        }
    }

    pub fn with_rebuild(mut self, rebuild: Box<dyn Rebuild>) -> Self {
        self.rebuild = Some(rebuild);
        self
    }

    pub fn roots(&self) -> &[SourceRoot] {
        &self.roots
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn is_pending(&self, path: &Path) -> bool {
        self.pending.contains(path)
    }

    /// Record one event for `path`
    pub fn handle_event(&mut self, kind: ChangeKind, path: &Path) {
        let Some(root) = self.roots.iter().find(|r| r.contains(path)) else {
            return;
        };
        let exists = is_file(path);

        match kind {
            ChangeKind::Change | ChangeKind::Rename if exists => {
                if self.pending.insert(path.to_path_buf()) {
                    info!("-> {}: {}", kind, path.display());
                }
            }
            _ if !exists => {
                let Some(artifact) = root.artifact(path) else {
                    return;
                };
                match fs::remove_file(&artifact) {
                    Ok(()) => info!("{} (deleted)", artifact.display()),
                    Err(e) => debug!("Nothing to delete at {}: {}", artifact.display(), e),
                }
            }
            _ => {}
        }
    }

    /// Flush the pending set through the rebuild step.
    ///
    /// Returns the flushed batch, or `None` when nothing was pending. The set
    /// is swapped for a fresh one before the rebuild runs.
    pub fn tick(&mut self) -> Option<Vec<PathBuf>> {
        if self.pending.is_empty() {
            return None;
        }

        let batch: Vec<PathBuf> = std::mem::take(&mut self.pending).into_iter().collect();
        if let Some(rebuild) = self.rebuild.as_mut() {
            if let Err(e) = rebuild.rebuild(&batch) {
                warn!("Rebuild failed: {:#}", e);
            }
        }
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct RecordingRebuild {
        batches: Arc<Mutex<Vec<Vec<PathBuf>>>>,
        fail: bool,
    }

    impl Rebuild for RecordingRebuild {
        fn rebuild(&mut self, paths: &[PathBuf]) -> anyhow::Result<()> {
            self.batches.lock().push(paths.to_vec());
            if self.fail {
                anyhow::bail!("build exploded");
            }
            Ok(())
        }
    }

    struct Package {
        _dir: tempfile::TempDir,
        src: PathBuf,
        build: PathBuf,
    }

    fn package() -> Package {
        let dir = tempdir().unwrap();
        let src = dir.path().join("pkg/src");
        let build = dir.path().join("pkg/build");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&build).unwrap();
        Package {
            _dir: dir,
            src,
            build,
        }
    }

    fn debouncer(pkg: &Package, rebuild: &RecordingRebuild) -> ChangeDebouncer {
        ChangeDebouncer::new(vec![SourceRoot::with_output(&pkg.src, &pkg.build)])
            .with_rebuild(Box::new(rebuild.clone()))
    }

    #[test]
    fn test_repeated_changes_yield_one_entry() {
        let pkg = package();
        let file = pkg.src.join("a.js");
        fs::write(&file, "").unwrap();
        let mut debouncer = debouncer(&pkg, &RecordingRebuild::default());

        debouncer.handle_event(ChangeKind::Change, &file);
        debouncer.handle_event(ChangeKind::Rename, &file);
        debouncer.handle_event(ChangeKind::Change, &file);

        assert_eq!(debouncer.pending_len(), 1);
        assert!(debouncer.is_pending(&file));
    }

    #[test]
    fn test_removal_deletes_only_the_artifact() {
        let pkg = package();
        let kept = pkg.build.join("kept.js");
        let stale = pkg.build.join("gone.js");
        fs::write(&kept, "").unwrap();
        fs::write(&stale, "").unwrap();
        let mut debouncer = debouncer(&pkg, &RecordingRebuild::default());

        debouncer.handle_event(ChangeKind::Remove, &pkg.src.join("gone.js"));

        assert!(!stale.exists());
        assert!(kept.exists());
        assert_eq!(debouncer.pending_len(), 0);
    }

    #[test]
    fn test_change_for_vanished_file_deletes_artifact() {
        let pkg = package();
        fs::create_dir_all(pkg.build.join("lib")).unwrap();
        let stale = pkg.build.join("lib/old.js");
        fs::write(&stale, "").unwrap();
        let mut debouncer = debouncer(&pkg, &RecordingRebuild::default());

        debouncer.handle_event(ChangeKind::Rename, &pkg.src.join("lib/old.js"));
        assert!(!stale.exists());

        // Missing artifact: swallowed
        debouncer.handle_event(ChangeKind::Remove, &pkg.src.join("lib/never.js"));
        assert_eq!(debouncer.pending_len(), 0);
    }

    #[test]
    fn test_events_outside_roots_are_ignored() {
        let pkg = package();
        let outside = pkg.build.join("out.js");
        fs::write(&outside, "").unwrap();
        let hidden = pkg.src.join(".a.js.swp");
        fs::write(&hidden, "").unwrap();
        let mut debouncer = debouncer(&pkg, &RecordingRebuild::default());

        debouncer.handle_event(ChangeKind::Change, &outside);
        debouncer.handle_event(ChangeKind::Change, &hidden);
        assert_eq!(debouncer.pending_len(), 0);
    }

    #[test]
    fn test_tick_on_empty_set_is_a_noop() {
        let pkg = package();
        let rebuild = RecordingRebuild::default();
        let mut debouncer = debouncer(&pkg, &rebuild);

        assert_eq!(debouncer.tick(), None);
        assert!(rebuild.batches.lock().is_empty());
    }

    #[test]
    fn test_tick_flushes_into_a_fresh_set() {
        let pkg = package();
        let a = pkg.src.join("a.js");
        let b = pkg.src.join("b.js");
        fs::write(&a, "").unwrap();
        fs::write(&b, "").unwrap();
        let rebuild = RecordingRebuild::default();
        let mut debouncer = debouncer(&pkg, &rebuild);

        debouncer.handle_event(ChangeKind::Change, &b);
        debouncer.handle_event(ChangeKind::Change, &a);
        assert_eq!(debouncer.tick(), Some(vec![a.clone(), b.clone()]));
        assert_eq!(debouncer.pending_len(), 0);

        debouncer.handle_event(ChangeKind::Change, &a);
        assert_eq!(debouncer.tick(), Some(vec![a.clone()]));
        assert_eq!(debouncer.tick(), None);

        assert_eq!(*rebuild.batches.lock(), vec![vec![a.clone(), b], vec![a]]);
    }

    #[test]
    fn test_failed_rebuild_does_not_stop_ticks() {
        let pkg = package();
        let file = pkg.src.join("a.js");
        fs::write(&file, "").unwrap();
        let rebuild = RecordingRebuild {
            fail: true,
            ..Default::default()
        };
        let mut debouncer = debouncer(&pkg, &rebuild);

        debouncer.handle_event(ChangeKind::Change, &file);
        assert!(debouncer.tick().is_some());
        debouncer.handle_event(ChangeKind::Change, &file);
        assert!(debouncer.tick().is_some());
        assert_eq!(rebuild.batches.lock().len(), 2);
    }

    #[test]
    fn test_packages_roots() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("b/src")).unwrap();
        fs::create_dir_all(dir.path().join("a/src")).unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();

        let roots = SourceRoot::packages(dir.path());
        assert_eq!(
            roots,
            vec![
                SourceRoot::with_output(dir.path().join("a/src"), dir.path().join("a/build")),
                SourceRoot::with_output(dir.path().join("b/src"), dir.path().join("b/build")),
            ]
        );
        assert!(SourceRoot::packages(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn test_from_notify() {
        use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind, RenameMode};
        use notify::EventKind;

        assert_eq!(
            ChangeKind::from_notify(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(ChangeKind::Change)
        );
        assert_eq!(
            ChangeKind::from_notify(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))),
            Some(ChangeKind::Rename)
        );
        assert_eq!(
            ChangeKind::from_notify(&EventKind::Create(CreateKind::File)),
            Some(ChangeKind::Rename)
        );
        assert_eq!(
            ChangeKind::from_notify(&EventKind::Remove(RemoveKind::File)),
            Some(ChangeKind::Remove)
        );
        assert_eq!(
            ChangeKind::from_notify(&EventKind::Access(AccessKind::Any)),
            None
        );
    }
}
