//! A thin, facility-agnostic boundary over the kernel notification source the
//! [`Watcher`](super::Watcher) polls.
//!
//! Generalizes the teacher crate's single-flag (`NOTE_WRITE`-only)
//! watcher trait into one that carries the full set of `NOTE_*` sub-flags
//! this crate reconciles against (spec.md §4.1).

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub mod kqueue;
pub mod mock;

/// The sub-flags a single notification can carry, collapsed from whatever
/// bitmask the underlying facility reports.
///
/// BSD's `EVFILT_VNODE` can set more than one `NOTE_*` bit in a single
/// event, so this is a small struct of booleans rather than an enum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoteFlags {
    pub write: bool,
    pub delete: bool,
    pub rename: bool,
    pub attrib: bool,
}

impl NoteFlags {
    #[must_use]
    pub fn is_empty(self) -> bool {
        !(self.write || self.delete || self.rename || self.attrib)
    }
}

/// One notification delivered by a [`Facility`], identifying the watched
/// descriptor it concerns and which sub-flags fired.
pub trait Notification {
    fn descriptor(&self) -> RawFd;
    fn flags(&self) -> NoteFlags;
}

/// The kernel (or, in tests, simulated) notification source.
///
/// A descriptor added via [`Facility::add`] is watched until it is closed;
/// there is no explicit remove — BSD kqueue drops interest in a vnode the
/// moment its last descriptor is closed, so the [`Watcher`](super::Watcher)
/// deregisters simply by dropping the `RawFd` it owns.
pub trait Facility {
    type Notification: Notification;

    /// Begin watching `fd` for renames, writes, deletes and attribute
    /// changes.
    fn add(&mut self, fd: RawFd) -> io::Result<()>;

    /// Wait for the next notification.
    ///
    /// `timeout` of `None` blocks indefinitely; `Some(Duration::ZERO)` polls
    /// without blocking, used for the non-blocking shutdown check in the
    /// event loop.
    fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Option<Self::Notification>>;
}
