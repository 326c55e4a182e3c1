//! The Watcher's authoritative inode-keyed state table (spec.md §3).

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

/// Integer identity of an on-disk object within the watched filesystem.
///
/// Inode reuse across the lifetime of one [`Watcher`](super::Watcher) run is
/// assumed not to occur (spec.md §3, §9).
pub type InodeId = u64;

/// One watched regular file.
#[derive(Debug)]
pub(crate) struct FileEntry {
    pub(crate) descriptor: RawFd,
    pub(crate) name: OsString,
    pub(crate) parent: PathBuf,
}

impl FileEntry {
    /// The full path this entry currently resolves to.
    pub(crate) fn path(&self) -> PathBuf {
        self.parent.join(&self.name)
    }
}

/// One watched directory.
#[derive(Debug)]
pub(crate) struct DirEntry {
    pub(crate) descriptor: RawFd,
    pub(crate) path: PathBuf,
    pub(crate) files: HashSet<InodeId>,
    pub(crate) dirs: HashSet<InodeId>,
}

/// A tagged union of the two kinds of entry the [`InodeMap`] holds.
///
/// Kept as a two-arm sum type rather than a trait object or inheritance
/// hierarchy, per spec.md §9 ("Union of FileEntry and DirEntry").
#[derive(Debug)]
pub(crate) enum Entry {
    File(FileEntry),
    Dir(DirEntry),
}

impl Entry {
    pub(crate) fn descriptor(&self) -> RawFd {
        match self {
            Entry::File(f) => f.descriptor,
            Entry::Dir(d) => d.descriptor,
        }
    }

    pub(crate) fn as_file(&self) -> Option<&FileEntry> {
        match self {
            Entry::File(f) => Some(f),
            Entry::Dir(_) => None,
        }
    }

    pub(crate) fn as_file_mut(&mut self) -> Option<&mut FileEntry> {
        match self {
            Entry::File(f) => Some(f),
            Entry::Dir(_) => None,
        }
    }

    pub(crate) fn as_dir(&self) -> Option<&DirEntry> {
        match self {
            Entry::Dir(d) => Some(d),
            Entry::File(_) => None,
        }
    }

    pub(crate) fn as_dir_mut(&mut self) -> Option<&mut DirEntry> {
        match self {
            Entry::Dir(d) => Some(d),
            Entry::File(_) => None,
        }
    }
}

/// The single source of truth for everything the [`Watcher`](super::Watcher)
/// knows: a mapping from [`InodeId`] to [`Entry`].
///
/// Insertion/iteration order is irrelevant (spec.md §3).
#[derive(Debug, Default)]
pub(crate) struct InodeMap {
    entries: HashMap<InodeId, Entry>,
}

impl InodeMap {
    pub(crate) fn new() -> Self {
        InodeMap {
            entries: HashMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn contains(&self, inode: InodeId) -> bool {
        self.entries.contains_key(&inode)
    }

    pub(crate) fn get(&self, inode: InodeId) -> Option<&Entry> {
        self.entries.get(&inode)
    }

    pub(crate) fn get_mut(&mut self, inode: InodeId) -> Option<&mut Entry> {
        self.entries.get_mut(&inode)
    }

    pub(crate) fn insert(&mut self, inode: InodeId, entry: Entry) {
        self.entries.insert(inode, entry);
    }

    pub(crate) fn remove(&mut self, inode: InodeId) -> Option<Entry> {
        self.entries.remove(&inode)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&InodeId, &Entry)> {
        self.entries.iter()
    }

    pub(crate) fn files(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, Entry::File(_)))
            .count()
    }

    pub(crate) fn dirs(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, Entry::Dir(_)))
            .count()
    }

    /// Rewrite `old_prefix` to `new_prefix` across every transitively
    /// recorded descendant of `dir_inode`, maintaining the §3 invariant
    /// that descendant paths stay consistent with their parent's current
    /// path after a directory rename.
    pub(crate) fn rewrite_descendants(
        &mut self,
        dir_inode: InodeId,
        old_prefix: &Path,
        new_prefix: &Path,
    ) {
        let (child_files, child_dirs) = match self.entries.get(&dir_inode).and_then(Entry::as_dir) {
            Some(dir) => (
                dir.files.iter().copied().collect::<Vec<_>>(),
                dir.dirs.iter().copied().collect::<Vec<_>>(),
            ),
            None => return,
        };

        for file_inode in child_files {
            if let Some(file) = self
                .entries
                .get_mut(&file_inode)
                .and_then(Entry::as_file_mut)
            {
                if let Ok(suffix) = file.parent.strip_prefix(old_prefix) {
                    file.parent = new_prefix.join(suffix);
                }
            }
        }

        for sub_inode in child_dirs {
            if let Some(sub_dir) = self.entries.get_mut(&sub_inode).and_then(Entry::as_dir_mut) {
                if let Ok(suffix) = sub_dir.path.strip_prefix(old_prefix) {
                    sub_dir.path = new_prefix.join(suffix);
                }
            }
            self.rewrite_descendants(sub_inode, old_prefix, new_prefix);
        }
    }
}
