//! The shutdown control channel between the Supervisor and its children
//! (spec.md §5, "Cancellation and timeout").
//!
//! Rust has no built-in equivalent to Python's `multiprocessing.Queue`, so
//! this crate repurposes each child's piped stdin as a one-shot control
//! channel: the Supervisor writes a single `shutdown` line, and the child
//! polls its own stdin non-blockingly once per event-loop iteration,
//! exactly where spec.md §5 says a process "polls its control queue
//! non-blockingly".

use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::process::{ChildStdin, Stdin};

use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::watcher::ShutdownSignal;

/// The sentinel line the Supervisor writes to request shutdown.
const SHUTDOWN_SENTINEL: &[u8] = b"shutdown\n";

/// Parent-side handle: writes the shutdown sentinel to a child's stdin.
pub struct ControlSender {
    stdin: ChildStdin,
}

impl ControlSender {
    /// Wraps a child's piped stdin handle.
    #[must_use]
    pub fn new(stdin: ChildStdin) -> Self {
        ControlSender { stdin }
    }

    /// Sends the `shutdown` sentinel (spec.md §5).
    ///
    /// # Errors
    ///
    /// Propagates any `io::Error` writing to the child's stdin, e.g. if the
    /// child has already exited and closed its read end.
    pub fn shutdown(&mut self) -> io::Result<()> {
        self.stdin.write_all(SHUTDOWN_SENTINEL)
    }
}

/// Child-side handle: non-blockingly polls its own stdin for the shutdown
/// sentinel or end-of-input.
pub struct ControlReceiver {
    stdin: Stdin,
    shutdown_seen: bool,
}

impl ControlReceiver {
    /// Puts this process's stdin into non-blocking mode and returns a
    /// receiver over it.
    ///
    /// # Errors
    ///
    /// Propagates any `io::Error` from the underlying `fcntl` call.
    pub fn new() -> io::Result<Self> {
        let stdin = io::stdin();
        set_nonblocking(stdin.as_raw_fd())?;
        Ok(ControlReceiver {
            stdin,
            shutdown_seen: false,
        })
    }
}

impl ShutdownSignal for ControlReceiver {
    fn should_shutdown(&mut self) -> bool {
        if self.shutdown_seen {
            return true;
        }

        let mut buf = [0u8; 64];
        match self.stdin.read(&mut buf) {
            // Either the sentinel arrived, or the Supervisor closed its
            // write end (end-of-input, spec.md §6) — both mean shutdown.
            Ok(_) => self.shutdown_seen = true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(_) => {}
        }
        self.shutdown_seen
    }
}

fn set_nonblocking(fd: std::os::unix::io::RawFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(to_io_error)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(to_io_error)?;
    Ok(())
}

fn to_io_error(e: nix::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    #[test]
    fn sender_writes_the_shutdown_sentinel() {
        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("spawn cat");

        let stdin = child.stdin.take().expect("piped stdin");
        let mut sender = ControlSender::new(stdin);
        sender.shutdown().expect("write sentinel");

        drop(sender);
        let output = child.wait_with_output().expect("wait for cat");
        assert_eq!(output.stdout, SHUTDOWN_SENTINEL);
    }
}
