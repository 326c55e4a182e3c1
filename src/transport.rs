//! Length-delimited event framing over a Unix-domain stream socket, with
//! out-of-band descriptor passing via `SCM_RIGHTS` ancillary data (spec.md
//! §4.2).

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::os::unix::net::UnixStream;
use std::os::unix::prelude::AsRawFd;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use nix::sys::socket::{
    recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags,
};
use nix::sys::stat::fstat;
use nix::sys::uio::IoVec;

use crate::event::Event;
use crate::watcher::{EventSink, InodeId};

/// Domain errors specific to this transport, as opposed to the generic
/// `io::Error`s that already cover socket/syscall failures. A hand-rolled
/// enum with manual `Display`/`Error` impls, matching
/// `database::OpenError`'s shape rather than a derive macro.
#[derive(Debug)]
pub enum TransportError {
    /// The descriptor spliced in via `SCM_RIGHTS` belongs to a different
    /// inode than the event it arrived alongside claims (spec.md §7,
    /// "Consumer-side inode mismatch on receive" — a fatal assertion).
    InodeMismatch {
        /// The inode the event claimed.
        expected: Option<InodeId>,
        /// The inode the received descriptor actually resolves to.
        actual: InodeId,
    },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportError::InodeMismatch { expected, actual } => write!(
                f,
                "received descriptor's inode {} does not match event inode {:?} (framing/ordering corruption)",
                actual, expected
            ),
        }
    }
}

impl std::error::Error for TransportError {}

/// How long the Watcher keeps retrying a connection attempt before giving
/// up (spec.md §4.2, "~60 seconds").
const CONNECT_DEADLINE: Duration = Duration::from_secs(60);
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Largest framed event body this transport will allocate a receive
/// buffer for. Generous relative to a JSON-encoded [`Event`], which is a
/// handful of scalar fields.
const MAX_FRAME_LEN: u32 = 64 * 1024;

/// A connected stream socket plus the framing/ancillary-data machinery
/// layered over it.
pub struct Transport {
    stream: UnixStream,
}

impl Transport {
    /// Sets (or clears) a timeout on receive calls, letting a caller come
    /// up for air between messages to check a shutdown signal — the same
    /// role the Watcher's facility poll timeout plays (spec.md §5,
    /// "Suspension points").
    ///
    /// # Errors
    ///
    /// Propagates any `io::Error` from the underlying socket option call.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    /// Connects to `address` as client, retrying with a short periodic
    /// interval for up to [`CONNECT_DEADLINE`] (spec.md §4.2).
    pub fn connect(address: impl AsRef<Path>) -> io::Result<Self> {
        let address = address.as_ref();
        let deadline = Instant::now() + CONNECT_DEADLINE;

        loop {
            match UnixStream::connect(address) {
                Ok(stream) => {
                    debug!("connected to {:?}", address);
                    return Ok(Transport { stream });
                }
                Err(e) if Instant::now() < deadline => {
                    trace!("connect to {:?} failed ({}), retrying", address, e);
                    thread::sleep(CONNECT_RETRY_INTERVAL);
                }
                Err(e) => {
                    warn!("giving up connecting to {:?} after {:?}: {}", address, CONNECT_DEADLINE, e);
                    return Err(e);
                }
            }
        }
    }

    /// Wraps an already-accepted connection (the EventConsumer side).
    #[must_use]
    pub fn from_stream(stream: UnixStream) -> Self {
        Transport { stream }
    }

    /// Frames and sends one event as a single message. If the event's kind
    /// carries a descriptor, it is duplicated across the socket as
    /// `SCM_RIGHTS` ancillary data, atomically with the framed bytes
    /// (spec.md §4.2, §9).
    pub fn send(&mut self, event: &Event) -> io::Result<()> {
        let body = serde_json::to_vec(event)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if body.len() > MAX_FRAME_LEN as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("event frame of {} bytes exceeds the {} byte limit", body.len(), MAX_FRAME_LEN),
            ));
        }

        let len = (body.len() as u32).to_be_bytes();
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&len);
        frame.extend_from_slice(&body);

        let iov = [IoVec::from_slice(&frame)];

        let fds;
        let cmsgs: Vec<ControlMessage> = if let Some(descriptor) = event.descriptor.filter(|_| event.kind.carries_descriptor()) {
            fds = [descriptor];
            vec![ControlMessage::ScmRights(&fds)]
        } else {
            Vec::new()
        };

        // A single sendmsg call per event; partial-send resumption is a
        // known hardening gap (spec.md §9, "Open questions").
        sendmsg(self.stream.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)?;
        Ok(())
    }

    /// Receives one framed event in a single `recvmsg` call, splicing in
    /// the ancillary descriptor (if any) from the same call and
    /// validating it against the event's inode (spec.md §4.2, §8
    /// "Ancillary-data invariant").
    ///
    /// The length header and ancillary descriptor must be read together:
    /// `SCM_RIGHTS` data is attached to the specific `recvmsg` call that
    /// consumes the bytes the peer's `sendmsg` produced it alongside, so
    /// reading the frame body with a plain `read` first would discard it.
    pub fn recv(&mut self) -> io::Result<Option<Event>> {
        let mut buf = vec![0u8; 4 + MAX_FRAME_LEN as usize];
        let mut iov = [IoVec::from_mut_slice(&mut buf)];
        let mut cmsg_buf = nix::cmsg_space!([RawFd; 1]);

        let msg = recvmsg(self.stream.as_raw_fd(), &iov, Some(&mut cmsg_buf), MsgFlags::empty())?;

        if msg.bytes == 0 {
            return Ok(None);
        }
        if msg.bytes < 4 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "short frame: missing length header",
            ));
        }

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if 4 + len > msg.bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame shorter than its announced length",
            ));
        }

        let mut event: Event = serde_json::from_slice(&buf[4..4 + len])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if event.kind.carries_descriptor() {
            for cmsg in msg.cmsgs() {
                if let ControlMessageOwned::ScmRights(fds) = cmsg {
                    if let Some(descriptor) = fds.into_iter().next() {
                        self.validate_descriptor(&event, descriptor)?;
                        event.descriptor = Some(descriptor);
                    }
                }
            }
        }

        Ok(Some(event))
    }

    fn validate_descriptor(&self, event: &Event, descriptor: RawFd) -> io::Result<()> {
        let stat = fstat(descriptor).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let expected = event.inode;
        let actual = stat.st_ino as InodeId;
        if expected != Some(actual) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                TransportError::InodeMismatch { expected, actual },
            ));
        }
        Ok(())
    }
}

impl EventSink for Transport {
    fn emit(&mut self, event: Event) -> io::Result<()> {
        self.send(&event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use std::io::Write;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn recv_times_out_with_no_pending_message() {
        let (_a, b) = UnixStream::pair().unwrap();
        let mut receiver = Transport::from_stream(b);
        receiver.set_read_timeout(Some(Duration::from_millis(50))).unwrap();

        let err = receiver.recv().expect_err("expected a timeout error");
        assert!(matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));
    }

    #[test]
    fn round_trips_an_event_without_a_descriptor() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut sender = Transport::from_stream(a);
        let mut receiver = Transport::from_stream(b);

        sender.send(&Event::delete(7, "gone".to_string())).unwrap();
        let received = receiver.recv().unwrap().unwrap();

        assert!(received.eq_ignoring_descriptor(&Event::delete(7, "gone".to_string())));
        assert_eq!(received.descriptor, None);
    }

    #[test]
    fn round_trips_an_event_carrying_a_descriptor() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file(), "payload").unwrap();
        let inode = std::fs::metadata(tmp.path()).unwrap().ino();

        let (a, b) = UnixStream::pair().unwrap();
        let mut sender = Transport::from_stream(a);
        let mut receiver = Transport::from_stream(b);

        let descriptor = tmp.as_file().as_raw_fd();
        sender
            .send(&Event::write(inode, "payload".to_string(), descriptor))
            .unwrap();

        let received = receiver.recv().unwrap().unwrap();
        assert_eq!(received.inode, Some(inode));
        assert!(received.descriptor.is_some());
    }

    #[test]
    fn recv_rejects_a_descriptor_whose_inode_does_not_match_the_event() {
        let tmp_a = tempfile::NamedTempFile::new().unwrap();
        let tmp_b = tempfile::NamedTempFile::new().unwrap();
        let wrong_inode = std::fs::metadata(tmp_b.path()).unwrap().ino();

        let (a, b) = UnixStream::pair().unwrap();
        let mut sender = Transport::from_stream(a);
        let mut receiver = Transport::from_stream(b);

        // Claims `wrong_inode` but actually attaches `tmp_a`'s descriptor.
        let event = Event::write(wrong_inode, "mismatched".to_string(), tmp_a.as_file().as_raw_fd());
        sender.send(&event).unwrap();

        let err = receiver.recv().expect_err("expected an inode mismatch error");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("does not match event inode"));
    }

    #[test]
    fn transport_error_message_reports_expected_and_actual_inodes() {
        let err = TransportError::InodeMismatch {
            expected: Some(7),
            actual: 9,
        };
        assert_eq!(
            err.to_string(),
            "received descriptor's inode 9 does not match event inode Some(7) (framing/ordering corruption)"
        );
    }
}
