//! The EventConsumer's transport-facing contract: accept the Watcher's
//! connection, deframe events, and hand any received descriptor to a
//! short-lived worker.
//!
//! spec.md §1 places the consumer's downstream business logic out of scope
//! ("treated as external collaborators"); this module implements only the
//! boundary described in spec.md §2 and §5 — accepting the connection and
//! dispatching received descriptors to detached workers that own them.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use crate::event::Event;
use crate::transport::Transport;
use crate::watcher::ShutdownSignal;

/// How often the receive loop comes up for air to check the shutdown
/// control channel, mirroring the Watcher's ~1s facility timeout (spec.md
/// §5, "Suspension points").
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How often the pre-connection accept loop re-checks for shutdown.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Binds `address`, accepts a single peer connection, and services it until
/// the peer disconnects or `shutdown` fires.
///
/// # Errors
///
/// Propagates `io::Error`s from binding the socket or a fatal transport
/// failure (spec.md §7, "Consumer-side inode mismatch on receive" and
/// general transport errors are both fatal to this loop).
pub fn run(address: impl AsRef<Path>, shutdown: &mut impl ShutdownSignal) -> io::Result<()> {
    let address = address.as_ref();
    // Best-effort: a stale socket file from a previous unclean run should
    // not stop this one from binding.
    let _ = std::fs::remove_file(address);

    let listener = UnixListener::bind(address)?;
    listener.set_nonblocking(true)?;
    info!("listening on {:?}", address);

    let stream = match accept_with_shutdown(&listener, shutdown)? {
        Some(stream) => stream,
        None => {
            debug!("shutdown requested before a peer connected");
            return Ok(());
        }
    };

    let mut transport = Transport::from_stream(stream);
    transport.set_read_timeout(Some(POLL_INTERVAL))?;

    loop {
        match transport.recv() {
            Ok(None) => {
                debug!("peer closed the connection");
                break;
            }
            Ok(Some(event)) => handle_event(event),
            Err(e) if is_timeout(&e) => {}
            Err(e) => {
                error!("transport receive failed: {}", e);
                return Err(e);
            }
        }

        if shutdown.should_shutdown() {
            debug!("consumer shutting down");
            break;
        }
    }

    Ok(())
}

fn accept_with_shutdown(
    listener: &UnixListener,
    shutdown: &mut impl ShutdownSignal,
) -> io::Result<Option<UnixStream>> {
    loop {
        match listener.accept() {
            Ok((stream, _addr)) => return Ok(Some(stream)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }

        if shutdown.should_shutdown() {
            return Ok(None);
        }

        thread::sleep(ACCEPT_POLL_INTERVAL);
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Dispatches one received event. Events carrying a descriptor are handed
/// off to a detached worker thread that owns it exclusively from here on
/// (spec.md §5, "Shared-resource policy").
fn handle_event(event: Event) {
    trace!("received {}", event);

    if let Some(descriptor) = event.descriptor.filter(|_| event.kind.carries_descriptor()) {
        thread::spawn(move || count_bytes(descriptor));
    }
}

/// Reads and counts the bytes available on a received descriptor. Standing
/// in for whatever real downstream business logic a consumer would run
/// (spec.md §1 places that logic out of scope); this crate's job is only to
/// demonstrate the descriptor can be read without racing a subsequent
/// rename or unlink on the path (spec.md §9).
fn count_bytes(descriptor: RawFd) {
    // The kernel duplicated this descriptor into our table atomically with
    // message delivery (spec.md §9); this thread is its sole owner.
    let mut file = unsafe { File::from_raw_fd(descriptor) };
    let mut buf = [0u8; 4096];
    let mut total = 0usize;
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) => {
                warn!("error reading from a received descriptor: {}", e);
                break;
            }
        }
    }
    debug!("read {} bytes from a received descriptor", total);
}
