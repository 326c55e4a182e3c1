//! The Watcher state machine: bootstrap, the event loop, and the
//! reconciliation logic that turns coarse kernel notifications into
//! semantic events.

mod entry;
pub mod facility;

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, trace, warn};
use nix::unistd::close;

use crate::event::Event;
use crate::ignore;

pub use entry::InodeId;
use entry::{DirEntry, Entry, FileEntry, InodeMap};
pub use facility::{Facility, NoteFlags, Notification};

/// Where a produced [`Event`] goes. Implemented by
/// [`Transport`](crate::transport::Transport); a recording test double is
/// used below for the reconciliation tests.
pub trait EventSink {
    fn emit(&mut self, event: Event) -> io::Result<()>;
}

/// Whether the event loop should stop. Implemented by
/// [`ControlReceiver`](crate::control::ControlReceiver).
pub trait ShutdownSignal {
    fn should_shutdown(&mut self) -> bool;
}

/// Maintains a live, inode-keyed model of a directory tree on top of a
/// [`Facility`], translating its coarse per-descriptor notifications into
/// semantic [`Event`]s.
pub struct Watcher<F: Facility> {
    facility: F,
    map: InodeMap,
    /// Side index from watched descriptor back to inode. The real
    /// kqueue(2) API lets a registration carry an arbitrary cookie (the
    /// inode, per spec), collapsing this into O(1) routing without a
    /// reverse lookup; the `kqueue` crate surfaces only the descriptor on
    /// each event, so this map plays the cookie's role instead.
    fd_index: HashMap<RawFd, InodeId>,
    root: PathBuf,
    root_inode: Option<InodeId>,
    /// Pending registration requests, flushed to the facility once per
    /// event-loop turn.
    pending: Vec<RawFd>,
}

impl<F: Facility> Watcher<F> {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, facility: F) -> Self {
        Watcher {
            facility,
            map: InodeMap::new(),
            fd_index: HashMap::new(),
            root: root.into(),
            root_inode: None,
            pending: Vec::new(),
        }
    }

    #[must_use]
    pub fn root_inode(&self) -> Option<InodeId> {
        self.root_inode
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.map.files()
    }

    #[must_use]
    pub fn dir_count(&self) -> usize {
        self.map.dirs()
    }

    #[must_use]
    pub fn is_watching(&self, inode: InodeId) -> bool {
        self.map.contains(inode)
    }

    fn enqueue_registration(&mut self, fd: RawFd) {
        self.pending.push(fd);
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        for fd in self.pending.drain(..) {
            self.facility.add(fd)?;
        }
        Ok(())
    }

    /// Recursively walks `path` depth-first, opening a descriptor per
    /// non-ignored file and directory and recording it in the InodeMap
    /// (spec.md §4.1, "Bootstrap").
    pub fn bootstrap(&mut self) -> io::Result<()> {
        let root = self.root.clone();
        let inode = self.walk_dir(&root)?;
        self.root_inode = Some(inode);
        // Registering interest as part of bootstrap, rather than waiting
        // for the first event-loop turn, means a facility is watching
        // every descriptor by the time `started` is emitted.
        self.flush_pending()?;
        debug!(
            "bootstrap complete: {} files, {} directories",
            self.file_count(),
            self.dir_count()
        );
        Ok(())
    }

    fn walk_dir(&mut self, path: &Path) -> io::Result<InodeId> {
        let file = fs::File::open(path)?;
        let inode = file.metadata()?.ino();
        let descriptor = file.into_raw_fd();
        self.enqueue_registration(descriptor);
        self.fd_index.insert(descriptor, inode);

        let mut files = std::collections::HashSet::new();
        let mut subdirs = Vec::new();

        for entry in fs::read_dir(path)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("failed to read an entry of {:?}: {}", path, e);
                    continue;
                }
            };
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(e) => {
                    warn!("failed to stat {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            if file_type.is_dir() {
                if ignore::ignore_dir(&name_str) {
                    trace!("ignoring directory {:?}", entry.path());
                    continue;
                }
                subdirs.push(entry.path());
            } else if file_type.is_file() {
                if ignore::ignore_file(&name_str) {
                    trace!("ignoring file {:?}", entry.path());
                    continue;
                }
                match self.register_file(&entry.path()) {
                    Ok(child_inode) => {
                        files.insert(child_inode);
                    }
                    Err(e) => warn!("failed to register file {:?}: {}", entry.path(), e),
                }
            }
        }

        let mut dirs = std::collections::HashSet::new();
        for subdir in subdirs {
            match self.walk_dir(&subdir) {
                Ok(child_inode) => {
                    dirs.insert(child_inode);
                }
                Err(e) => warn!("failed to register directory {:?}: {}", subdir, e),
            }
        }

        self.map.insert(
            inode,
            Entry::Dir(DirEntry {
                descriptor,
                path: path.to_path_buf(),
                files,
                dirs,
            }),
        );
        Ok(inode)
    }

    fn register_file(&mut self, path: &Path) -> io::Result<InodeId> {
        let file = fs::File::open(path)?;
        let inode = file.metadata()?.ino();
        let descriptor = file.into_raw_fd();
        self.enqueue_registration(descriptor);
        self.fd_index.insert(descriptor, inode);

        let name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        self.map.insert(
            inode,
            Entry::File(FileEntry {
                descriptor,
                name,
                parent,
            }),
        );
        Ok(inode)
    }

    /// Connects to the transport, emits `started`, then loops servicing
    /// notifications and the control channel until shutdown is requested
    /// (spec.md §4.1, "Event loop").
    pub fn run(
        &mut self,
        sink: &mut impl EventSink,
        shutdown: &mut impl ShutdownSignal,
    ) -> io::Result<()> {
        sink.emit(Event::started())?;

        loop {
            self.flush_pending()?;

            match self.facility.poll(Some(Duration::from_secs(1))) {
                Ok(Some(notification)) => self.handle_notification(notification, sink)?,
                Ok(None) => {}
                Err(e) => {
                    // A spurious wake or interrupted wait is retried on the
                    // next turn rather than treated as fatal.
                    warn!("notification facility wait failed, retrying: {}", e);
                }
            }

            if shutdown.should_shutdown() {
                break;
            }
        }

        self.teardown(sink)
    }

    fn handle_notification(
        &mut self,
        notification: impl Notification,
        sink: &mut impl EventSink,
    ) -> io::Result<()> {
        let descriptor = notification.descriptor();
        let inode = match self.fd_index.get(&descriptor) {
            Some(inode) => *inode,
            None => {
                trace!("notification for an untracked descriptor {}", descriptor);
                return Ok(());
            }
        };
        let flags = notification.flags();

        let is_dir = matches!(self.map.get(inode), Some(Entry::Dir(_)));
        if is_dir {
            self.handle_dir_event(inode, flags, sink)
        } else {
            self.handle_file_event(inode, flags, sink)
        }
    }

    fn handle_dir_event(
        &mut self,
        inode: InodeId,
        flags: NoteFlags,
        sink: &mut impl EventSink,
    ) -> io::Result<()> {
        if flags.delete {
            self.remove_entry(inode, sink)?;
            return Ok(());
        }

        if flags.rename && self.root_inode != Some(inode) {
            self.reconcile_dir_rename(inode, sink)?;
        }

        // The directory may have been removed by a `delete` flag carried
        // on this same notification batch; skip the write in that case
        // (spec.md §4.1).
        if flags.write && self.map.contains(inode) {
            self.reconcile_dir_contents(inode, sink)?;
        }

        if flags.attrib {
            trace!("attribute change on directory inode {}", inode);
        }

        Ok(())
    }

    fn handle_file_event(
        &mut self,
        inode: InodeId,
        flags: NoteFlags,
        sink: &mut impl EventSink,
    ) -> io::Result<()> {
        if flags.delete {
            self.remove_entry(inode, sink)?;
            return Ok(());
        }

        if flags.rename {
            let (path, descriptor) = {
                let file = self
                    .map
                    .get(inode)
                    .and_then(Entry::as_file)
                    .expect("routed to file handler");
                (file.path(), file.descriptor)
            };
            // The kernel keeps notifying on this descriptor regardless of
            // path, so the entry's name/parent are left stale here and
            // corrected lazily by the parent directory's next write
            // reconciliation (spec.md §4.1, §9).
            sink.emit(Event::rename_file(
                inode,
                path.to_string_lossy().into_owned(),
                descriptor,
            ))?;
        }

        if flags.write {
            let (name, descriptor) = {
                let file = self
                    .map
                    .get(inode)
                    .and_then(Entry::as_file)
                    .expect("routed to file handler");
                (file.name.to_string_lossy().into_owned(), file.descriptor)
            };
            sink.emit(Event::write(inode, name, descriptor))?;
        }

        if flags.attrib {
            trace!("attribute change on file inode {}", inode);
        }

        Ok(())
    }

    fn remove_entry(&mut self, inode: InodeId, sink: &mut impl EventSink) -> io::Result<()> {
        let entry = match self.map.remove(inode) {
            Some(entry) => entry,
            None => return Ok(()),
        };

        let descriptor = entry.descriptor();
        self.fd_index.remove(&descriptor);

        let name = match &entry {
            Entry::File(f) => f.name.to_string_lossy().into_owned(),
            Entry::Dir(d) => d.path.to_string_lossy().into_owned(),
        };

        if let Err(e) = close(descriptor) {
            warn!("failed to close descriptor {}: {}", descriptor, e);
        }

        sink.emit(Event::delete(inode, name))
    }

    /// Enumerates a directory's current children, diffs the observed
    /// inode sets against what is recorded, and emits `create_file` /
    /// `create_dir` for anything genuinely new (spec.md §4.1,
    /// "Directory-content reconciliation").
    fn reconcile_dir_contents(
        &mut self,
        inode: InodeId,
        sink: &mut impl EventSink,
    ) -> io::Result<()> {
        let dir_path = match self.map.get(inode).and_then(Entry::as_dir) {
            Some(dir) => dir.path.clone(),
            None => return Ok(()),
        };

        let entries = match fs::read_dir(&dir_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!("directory {:?} vanished before it could be rescanned", dir_path);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut observed_files = std::collections::HashSet::new();
        let mut observed_dirs = std::collections::HashSet::new();
        let mut new_files = Vec::new();
        let mut new_dirs = Vec::new();

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => continue,
            };
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            let child_path = entry.path();

            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(_) => continue,
            };

            if file_type.is_dir() {
                if ignore::ignore_dir(&name_str) {
                    continue;
                }
                // A plain stat is enough to learn the inode; no descriptor
                // is opened (and none can leak) unless this child turns
                // out to be genuinely new.
                let child_inode = match fs::metadata(&child_path) {
                    Ok(meta) => meta.ino(),
                    Err(_) => continue,
                };
                observed_dirs.insert(child_inode);
                if self.map.contains(child_inode) {
                    // Already known: bring its recorded path up to date in
                    // case it was renamed/moved under this same parent
                    // between reconciliations (spec.md §4.1, "update its
                    // recorded name/parent if changed").
                    self.update_dir_location(child_inode, &child_path);
                } else {
                    new_dirs.push(child_path);
                }
            } else if file_type.is_file() {
                if ignore::ignore_file(&name_str) {
                    continue;
                }
                let child_inode = match fs::metadata(&child_path) {
                    Ok(meta) => meta.ino(),
                    Err(_) => continue,
                };
                observed_files.insert(child_inode);
                if self.map.contains(child_inode) {
                    self.update_file_location(child_inode, &name, &dir_path);
                } else {
                    new_files.push(child_path);
                }
            }
        }

        for child_path in new_files {
            match self.register_file(&child_path) {
                Ok(child_inode) => {
                    let (name, descriptor) = {
                        let file = self.map.get(child_inode).and_then(Entry::as_file).unwrap();
                        (file.name.to_string_lossy().into_owned(), file.descriptor)
                    };
                    sink.emit(Event::create_file(child_inode, name, descriptor))?;
                }
                Err(e) => warn!("failed to register new file {:?}: {}", child_path, e),
            }
        }

        for child_path in new_dirs {
            match self.walk_dir(&child_path) {
                Ok(child_inode) => {
                    let (path, descriptor) = {
                        let dir = self.map.get(child_inode).and_then(Entry::as_dir).unwrap();
                        (dir.path.to_string_lossy().into_owned(), dir.descriptor)
                    };
                    sink.emit(Event::create_dir(child_inode, path, descriptor))?;
                }
                Err(e) => warn!("failed to register new directory {:?}: {}", child_path, e),
            }
        }

        if let Some(dir) = self.map.get_mut(inode).and_then(Entry::as_dir_mut) {
            // Children no longer observed are dropped from the child
            // sets; their own delete notification removes them from the
            // InodeMap independently.
            dir.files.retain(|i| observed_files.contains(i));
            dir.dirs.retain(|i| observed_dirs.contains(i));
            dir.files.extend(observed_files);
            dir.dirs.extend(observed_dirs);
        }

        Ok(())
    }

    /// Brings a known file's recorded name/parent up to date with what was
    /// just observed during reconciliation, mirroring
    /// `original_source/tangle/watcher.py`'s `update_file` (spec.md §4.1,
    /// "For each child inode already in InodeMap: update its recorded
    /// name/parent if changed").
    fn update_file_location(&mut self, inode: InodeId, name: &OsStr, parent: &Path) {
        if let Some(file) = self.map.get_mut(inode).and_then(Entry::as_file_mut) {
            if file.name != name || file.parent != parent {
                trace!(
                    "file inode {} location updated to {:?}",
                    inode,
                    parent.join(name)
                );
                file.name = name.to_os_string();
                file.parent = parent.to_path_buf();
            }
        }
    }

    /// Brings a known directory's recorded path up to date with what was
    /// just observed during reconciliation, rewriting every transitively
    /// recorded descendant to match, mirroring
    /// `original_source/tangle/watcher.py`'s `update_dir` (spec.md §4.1).
    fn update_dir_location(&mut self, inode: InodeId, new_path: &Path) {
        let old_path = match self.map.get(inode).and_then(Entry::as_dir) {
            Some(dir) if dir.path != new_path => dir.path.clone(),
            _ => return,
        };

        trace!("directory inode {} location updated to {:?}", inode, new_path);
        if let Some(dir) = self.map.get_mut(inode).and_then(Entry::as_dir_mut) {
            dir.path = new_path.to_path_buf();
        }
        self.map.rewrite_descendants(inode, &old_path, new_path);
    }

    /// Resolves a renamed directory's new basename by listing its parent
    /// and matching on inode, then rewrites every transitively recorded
    /// descendant path (spec.md §4.1, "Directory-rename reconciliation").
    fn reconcile_dir_rename(&mut self, inode: InodeId, sink: &mut impl EventSink) -> io::Result<()> {
        let (old_path, descriptor) = match self.map.get(inode).and_then(Entry::as_dir) {
            Some(dir) => (dir.path.clone(), dir.descriptor),
            None => return Ok(()),
        };

        let parent = old_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let new_path = match Self::find_by_inode(&parent, inode) {
            Some(path) => path,
            None => {
                warn!(
                    "could not resolve the new name of renamed directory inode {} under {:?}",
                    inode, parent
                );
                return Ok(());
            }
        };

        if let Some(dir) = self.map.get_mut(inode).and_then(Entry::as_dir_mut) {
            dir.path = new_path.clone();
        }
        self.map.rewrite_descendants(inode, &old_path, &new_path);

        sink.emit(Event::rename_dir(
            inode,
            new_path.to_string_lossy().into_owned(),
            descriptor,
        ))
    }

    fn find_by_inode(parent: &Path, inode: InodeId) -> Option<PathBuf> {
        let entries = fs::read_dir(parent).ok()?;
        for entry in entries.flatten() {
            if let Ok(meta) = entry.metadata() {
                if meta.ino() == inode {
                    return Some(entry.path());
                }
            }
        }
        None
    }

    fn teardown(&mut self, sink: &mut impl EventSink) -> io::Result<()> {
        let descriptors: Vec<RawFd> = self.map.iter().map(|(_, entry)| entry.descriptor()).collect();
        for descriptor in descriptors {
            if let Err(e) = close(descriptor) {
                warn!("failed to close descriptor {} during teardown: {}", descriptor, e);
            }
        }
        self.map = InodeMap::new();
        self.fd_index.clear();
        sink.emit(Event::stopped())
    }

    #[cfg(test)]
    pub(crate) fn reconcile_for_test(&mut self, inode: InodeId, sink: &mut impl EventSink) -> io::Result<()> {
        self.reconcile_dir_contents(inode, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::test::{ImmediateShutdown, RecordingSink, ShutdownAfter};
    use crate::watcher::facility::mock::MockFacility;
    use std::fs::{self as stdfs, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn bootstrap_records_every_non_ignored_file_and_directory() {
        let root = tempdir().unwrap();
        stdfs::create_dir(root.path().join("sub")).unwrap();
        File::create(root.path().join("a")).unwrap();
        File::create(root.path().join("sub").join("b")).unwrap();

        let mut watcher = Watcher::new(root.path(), MockFacility::new());
        watcher.bootstrap().unwrap();

        assert_eq!(watcher.file_count(), 2);
        assert_eq!(watcher.dir_count(), 1);
        assert!(watcher.root_inode().is_some());
    }

    #[test]
    fn bootstrap_skips_ignored_directories_and_files() {
        let root = tempdir().unwrap();
        stdfs::create_dir(root.path().join(".git")).unwrap();
        File::create(root.path().join(".git").join("HEAD")).unwrap();
        File::create(root.path().join(".#lockfile")).unwrap();
        File::create(root.path().join("kept")).unwrap();

        let mut watcher = Watcher::new(root.path(), MockFacility::new());
        watcher.bootstrap().unwrap();

        assert_eq!(watcher.file_count(), 1);
        assert_eq!(watcher.dir_count(), 0);
    }

    #[test]
    fn reconciliation_emits_create_events_for_new_children() {
        let root = tempdir().unwrap();
        let mut watcher = Watcher::new(root.path(), MockFacility::new());
        watcher.bootstrap().unwrap();
        let root_inode = watcher.root_inode().unwrap();

        File::create(root.path().join("a")).unwrap();
        stdfs::create_dir(root.path().join("sub")).unwrap();

        let mut sink = RecordingSink::default();
        watcher.reconcile_for_test(root_inode, &mut sink).unwrap();

        assert_eq!(sink.events.len(), 2);
        assert!(sink.events.iter().any(|e| e.kind == EventKind::CreateFile && e.name == "a"));
        assert!(sink.events.iter().any(|e| e.kind == EventKind::CreateDir));
        assert_eq!(watcher.file_count(), 1);
        assert_eq!(watcher.dir_count(), 1);
    }

    #[test]
    fn idempotent_rescan_emits_nothing_the_second_time() {
        let root = tempdir().unwrap();
        File::create(root.path().join("a")).unwrap();

        let mut watcher = Watcher::new(root.path(), MockFacility::new());
        watcher.bootstrap().unwrap();
        let root_inode = watcher.root_inode().unwrap();

        let mut sink = RecordingSink::default();
        watcher.reconcile_for_test(root_inode, &mut sink).unwrap();
        assert!(sink.events.is_empty());
        assert_eq!(watcher.file_count(), 1);
    }

    #[test]
    fn run_emits_started_then_stopped_with_no_notifications() {
        let root = tempdir().unwrap();
        let mut watcher = Watcher::new(root.path(), MockFacility::new());
        watcher.bootstrap().unwrap();

        let mut sink = RecordingSink::default();
        watcher.run(&mut sink, &mut ImmediateShutdown).unwrap();

        assert_eq!(sink.events.len(), 2);
        assert_eq!(sink.events[0].kind, EventKind::Started);
        assert_eq!(sink.events[1].kind, EventKind::Stopped);
    }

    #[test]
    fn write_notification_on_file_emits_write_event() {
        let root = tempdir().unwrap();
        let file_path = root.path().join("a");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "hello").unwrap();

        let mock = MockFacility::new();
        let mut watcher = Watcher::new(root.path(), mock.clone());
        watcher.bootstrap().unwrap();

        let file_inode = stdfs::metadata(&file_path).unwrap().ino();
        let descriptor = match watcher.map.get(file_inode).unwrap() {
            Entry::File(f) => f.descriptor,
            Entry::Dir(_) => panic!("expected a file entry"),
        };
        mock.simulate_write(descriptor);

        let mut sink = RecordingSink::default();
        watcher.run(&mut sink, &mut ImmediateShutdown).unwrap();

        assert!(sink
            .events
            .iter()
            .any(|e| e.kind == EventKind::Write && e.inode == Some(file_inode)));
    }

    #[test]
    fn delete_notification_removes_entry_and_emits_delete() {
        let root = tempdir().unwrap();
        let file_path = root.path().join("a");
        File::create(&file_path).unwrap();

        let mock = MockFacility::new();
        let mut watcher = Watcher::new(root.path(), mock.clone());
        watcher.bootstrap().unwrap();

        let file_inode = stdfs::metadata(&file_path).unwrap().ino();
        let descriptor = match watcher.map.get(file_inode).unwrap() {
            Entry::File(f) => f.descriptor,
            Entry::Dir(_) => panic!("expected a file entry"),
        };
        mock.simulate_delete(descriptor);

        let mut sink = RecordingSink::default();
        watcher.run(&mut sink, &mut ImmediateShutdown).unwrap();

        assert!(sink.events.iter().any(|e| e.kind == EventKind::Delete));
        assert!(!watcher.is_watching(file_inode));
    }

    #[test]
    fn in_place_file_rename_is_corrected_by_the_next_reconciliation() {
        let root = tempdir().unwrap();
        let before_path = root.path().join("before");
        File::create(&before_path).unwrap();

        let mock = MockFacility::new();
        let mut watcher = Watcher::new(root.path(), mock.clone());
        watcher.bootstrap().unwrap();
        let root_inode = watcher.root_inode().unwrap();

        let file_inode = stdfs::metadata(&before_path).unwrap().ino();
        let file_fd = match watcher.map.get(file_inode).unwrap() {
            Entry::File(f) => f.descriptor,
            Entry::Dir(_) => panic!("expected a file entry"),
        };
        let root_fd = match watcher.map.get(root_inode).unwrap() {
            Entry::Dir(d) => d.descriptor,
            Entry::File(_) => panic!("expected a dir entry"),
        };

        stdfs::rename(&before_path, root.path().join("after")).unwrap();

        // The file's own rename notification still reads the stale recorded
        // path (spec.md §4.1/§9's deferred-correction policy); the parent
        // directory's next write reconciliation is what corrects it, which
        // a later notification on the same file then observes.
        mock.simulate_rename(file_fd);
        mock.simulate_write(root_fd);
        mock.simulate_write(file_fd);

        let mut sink = RecordingSink::default();
        watcher.run(&mut sink, &mut ShutdownAfter(3)).unwrap();

        let rename_event = sink
            .events
            .iter()
            .find(|e| e.kind == EventKind::RenameFile)
            .expect("expected a rename_file event");
        assert!(rename_event.name.ends_with("before"));

        let write_event = sink
            .events
            .iter()
            .find(|e| e.kind == EventKind::Write)
            .expect("expected a write event after reconciliation corrected the name");
        assert_eq!(write_event.name, "after");
    }

    #[test]
    fn cross_directory_file_move_is_corrected_by_destination_reconciliation() {
        let root = tempdir().unwrap();
        stdfs::create_dir(root.path().join("sub")).unwrap();
        let original_path = root.path().join("tango");
        File::create(&original_path).unwrap();

        let mock = MockFacility::new();
        let mut watcher = Watcher::new(root.path(), mock.clone());
        watcher.bootstrap().unwrap();

        let file_inode = stdfs::metadata(&original_path).unwrap().ino();
        let sub_inode = stdfs::metadata(root.path().join("sub")).unwrap().ino();

        let file_fd = match watcher.map.get(file_inode).unwrap() {
            Entry::File(f) => f.descriptor,
            Entry::Dir(_) => panic!("expected a file entry"),
        };
        let sub_fd = match watcher.map.get(sub_inode).unwrap() {
            Entry::Dir(d) => d.descriptor,
            Entry::File(_) => panic!("expected a dir entry"),
        };

        stdfs::rename(&original_path, root.path().join("sub").join("tango")).unwrap();

        mock.simulate_rename(file_fd);
        mock.simulate_write(sub_fd);

        let mut sink = RecordingSink::default();
        watcher.run(&mut sink, &mut ShutdownAfter(2)).unwrap();

        let first_rename = sink
            .events
            .iter()
            .find(|e| e.kind == EventKind::RenameFile)
            .expect("expected a rename_file event for the move");
        assert!(first_rename.name.ends_with("tango"));
        assert!(!first_rename.name.contains("sub"));

        let parent = match watcher.map.get(file_inode).unwrap() {
            Entry::File(f) => f.parent.clone(),
            Entry::Dir(_) => panic!("expected a file entry"),
        };
        assert_eq!(parent, root.path().join("sub"));
    }

    #[test]
    fn directory_rename_rewrites_itself_and_its_descendants() {
        let root = tempdir().unwrap();
        let sub_path = root.path().join("before");
        stdfs::create_dir(&sub_path).unwrap();
        File::create(sub_path.join("child")).unwrap();

        let mock = MockFacility::new();
        let mut watcher = Watcher::new(root.path(), mock.clone());
        watcher.bootstrap().unwrap();

        let sub_inode = stdfs::metadata(&sub_path).unwrap().ino();
        let child_inode = stdfs::metadata(sub_path.join("child")).unwrap().ino();
        let sub_fd = match watcher.map.get(sub_inode).unwrap() {
            Entry::Dir(d) => d.descriptor,
            Entry::File(_) => panic!("expected a dir entry"),
        };

        let new_sub_path = root.path().join("after");
        stdfs::rename(&sub_path, &new_sub_path).unwrap();
        mock.simulate_rename(sub_fd);

        let mut sink = RecordingSink::default();
        watcher.run(&mut sink, &mut ImmediateShutdown).unwrap();

        let rename_event = sink
            .events
            .iter()
            .find(|e| e.kind == EventKind::RenameDir)
            .expect("expected a rename_dir event");
        assert_eq!(rename_event.name, new_sub_path.to_string_lossy().into_owned());

        let child_parent = match watcher.map.get(child_inode).unwrap() {
            Entry::File(f) => f.parent.clone(),
            Entry::Dir(_) => panic!("expected a file entry"),
        };
        assert_eq!(child_parent, new_sub_path);
    }
}
