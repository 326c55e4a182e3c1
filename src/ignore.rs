//! Ignore policy for the [`Watcher`](crate::watcher::Watcher).
//!
//! Applied at bootstrap and on every subsequent directory-content
//! reconciliation (spec.md §4.1).

/// Directory basenames that are never walked into or watched.
const IGNORE_DIRS: &[&str] = &[".git", "CVS", ".svn", ".hg"];

/// File basename prefixes that are never watched.
const IGNORE_FILE_PREFIXES: &[&str] = &[".#"];

/// Whether a directory with this basename should be skipped entirely.
#[must_use]
pub fn ignore_dir(name: &str) -> bool {
    IGNORE_DIRS.contains(&name)
}

/// Whether a file with this basename should be skipped.
#[must_use]
pub fn ignore_file(name: &str) -> bool {
    IGNORE_FILE_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}
