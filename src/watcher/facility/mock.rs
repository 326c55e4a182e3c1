//! An in-memory stand-in for [`super::kqueue::KqueueFacility`], driven by
//! `simulate_*` calls from tests instead of the kernel.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

use super::{Facility, NoteFlags, Notification};

#[derive(Debug, Clone, Copy)]
pub struct MockNotification {
    descriptor: RawFd,
    flags: NoteFlags,
}

impl Notification for MockNotification {
    fn descriptor(&self) -> RawFd {
        self.descriptor
    }

    fn flags(&self) -> NoteFlags {
        self.flags
    }
}

#[derive(Default)]
struct Inner {
    watched: Vec<RawFd>,
    queue: VecDeque<MockNotification>,
}

/// Cloning a [`MockFacility`] shares the same underlying state, so a test
/// can hold one handle to drive `simulate_*` calls and hand another to the
/// [`Watcher`](crate::watcher::Watcher) under test.
#[derive(Clone, Default)]
pub struct MockFacility {
    inner: Rc<RefCell<Inner>>,
}

impl MockFacility {
    pub fn new() -> Self {
        MockFacility::default()
    }

    fn push(&self, fd: RawFd, flags: NoteFlags) {
        let mut inner = self.inner.borrow_mut();
        assert!(
            inner.watched.contains(&fd),
            "simulated notification for an fd that was never added: {}",
            fd
        );
        inner.queue.push_back(MockNotification {
            descriptor: fd,
            flags,
        });
    }

    pub fn simulate_write(&self, fd: RawFd) {
        self.push(
            fd,
            NoteFlags {
                write: true,
                ..NoteFlags::default()
            },
        );
    }

    pub fn simulate_delete(&self, fd: RawFd) {
        self.push(
            fd,
            NoteFlags {
                delete: true,
                ..NoteFlags::default()
            },
        );
    }

    pub fn simulate_rename(&self, fd: RawFd) {
        self.push(
            fd,
            NoteFlags {
                rename: true,
                ..NoteFlags::default()
            },
        );
    }

    pub fn simulate_attrib(&self, fd: RawFd) {
        self.push(
            fd,
            NoteFlags {
                attrib: true,
                ..NoteFlags::default()
            },
        );
    }

    pub fn is_watching(&self, fd: RawFd) -> bool {
        self.inner.borrow().watched.contains(&fd)
    }
}

impl Facility for MockFacility {
    type Notification = MockNotification;

    fn add(&mut self, fd: RawFd) -> io::Result<()> {
        let mut inner = self.inner.borrow_mut();
        assert!(!inner.watched.contains(&fd), "fd {} already watched", fd);
        inner.watched.push(fd);
        Ok(())
    }

    fn poll(&mut self, _timeout: Option<Duration>) -> io::Result<Option<Self::Notification>> {
        Ok(self.inner.borrow_mut().queue.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_simulated_notifications_in_order() {
        let mut facility = MockFacility::new();
        facility.add(3).unwrap();
        facility.simulate_write(3);
        facility.simulate_rename(3);

        let first = facility.poll(None).unwrap().unwrap();
        assert_eq!(first.descriptor(), 3);
        assert!(first.flags().write);

        let second = facility.poll(None).unwrap().unwrap();
        assert!(second.flags().rename);

        assert!(facility.poll(None).unwrap().is_none());
    }

    #[test]
    #[should_panic]
    fn simulating_on_unwatched_fd_panics() {
        let facility = MockFacility::new();
        facility.simulate_write(7);
    }
}
