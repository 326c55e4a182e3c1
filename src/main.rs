// main.rs
#[macro_use]
extern crate log;

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use structopt::StructOpt;

use vnotify::consumer;
use vnotify::control::{ControlReceiver, ControlSender};
use vnotify::transport::Transport;
use vnotify::watcher::facility::kqueue::KqueueFacility;
use vnotify::watcher::{ShutdownSignal, Watcher};

/// The `vnotify` Supervisor CLI (spec.md §6).
#[derive(StructOpt)]
struct Args {
    /// Root path to watch.
    #[structopt(default_value = ".", parse(from_os_str))]
    root: PathBuf,

    /// Rendezvous socket path for the Watcher/EventConsumer transport.
    // Mirrors `vnotify::DEFAULT_SOCKET_PATH`; structopt's `default_value`
    // must be a literal, so it is spelled out again here.
    #[structopt(long, default_value = ".sock", parse(from_os_str))]
    socket: PathBuf,

    /// Internal process role, undocumented: the Supervisor re-execs itself
    /// with this flag to start each child process (SPEC_FULL.md §4.3).
    #[structopt(long, hidden = true)]
    internal_role: Option<Role>,
}

#[derive(Clone, Copy)]
enum Role {
    Watcher,
    Consumer,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Watcher => "watcher",
            Role::Consumer => "consumer",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "watcher" => Ok(Role::Watcher),
            "consumer" => Ok(Role::Consumer),
            _ => Err(format!("unrecognised role: {}", s)),
        }
    }
}

fn main() {
    env_logger::init();

    let args = Args::from_args();

    let result = match args.internal_role {
        Some(Role::Watcher) => run_watcher(&args.root, &args.socket),
        Some(Role::Consumer) => run_consumer(&args.socket),
        None => run_supervisor(&args.root, &args.socket),
    };

    if let Err(e) = result {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

/// The Watcher's own process entry point: bootstrap the tree, connect
/// outward to the transport, and run the event loop until the Supervisor's
/// control pipe says to stop (spec.md §4.1).
fn run_watcher(root: &Path, socket: &Path) -> io::Result<()> {
    let facility = KqueueFacility::new()?;
    let mut watcher = Watcher::new(root.to_path_buf(), facility);
    watcher.bootstrap()?;

    let mut transport = Transport::connect(socket)?;
    let mut control = ControlReceiver::new()?;

    watcher.run(&mut transport, &mut control)
}

/// The EventConsumer's own process entry point: accept the Watcher's
/// connection and service it (spec.md §2, §4.2).
fn run_consumer(socket: &Path) -> io::Result<()> {
    let mut control = ControlReceiver::new()?;
    consumer::run(socket, &mut control)
}

/// Spawns the Watcher and EventConsumer as independent child processes,
/// waits for a graceful-exit trigger, then signals both to shut down and
/// joins them (spec.md §4.3).
fn run_supervisor(root: &Path, socket: &Path) -> io::Result<()> {
    let exe = std::env::current_exe()?;

    let mut watcher_child = spawn_child(&exe, root, socket, Role::Watcher)?;
    let mut consumer_child = spawn_child(&exe, root, socket, Role::Consumer)?;

    let watcher_stdin = watcher_child
        .stdin
        .take()
        .expect("child spawned with piped stdin");
    let consumer_stdin = consumer_child
        .stdin
        .take()
        .expect("child spawned with piped stdin");
    let mut watcher_control = ControlSender::new(watcher_stdin);
    let mut consumer_control = ControlSender::new(consumer_stdin);

    wait_for_exit_trigger()?;

    info!("shutdown triggered, signalling children");
    if let Err(e) = watcher_control.shutdown() {
        warn!("failed to signal watcher shutdown: {}", e);
    }
    if let Err(e) = consumer_control.shutdown() {
        warn!("failed to signal consumer shutdown: {}", e);
    }

    let watcher_status = watcher_child.wait()?;
    let consumer_status = consumer_child.wait()?;
    debug!("watcher exited: {:?}", watcher_status);
    debug!("consumer exited: {:?}", consumer_status);

    if socket.exists() {
        if let Err(e) = std::fs::remove_file(socket) {
            warn!("failed to remove rendezvous socket {:?}: {}", socket, e);
        }
    }

    Ok(())
}

fn spawn_child(exe: &Path, root: &Path, socket: &Path, role: Role) -> io::Result<Child> {
    Command::new(exe)
        .arg(root)
        .arg("--socket")
        .arg(socket)
        .arg("--internal-role")
        .arg(role.as_str())
        .stdin(Stdio::piped())
        .spawn()
}

/// Blocks until either `SIGINT` arrives or the Supervisor's own stdin
/// produces a shutdown trigger (end-of-input, per spec.md §6).
fn wait_for_exit_trigger() -> io::Result<()> {
    let mut own_stdin = ControlReceiver::new()?;

    let sigint = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&sigint))
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    loop {
        if sigint.load(Ordering::Relaxed) {
            info!("received SIGINT");
            return Ok(());
        }
        if own_stdin.should_shutdown() {
            info!("end of input on stdin");
            return Ok(());
        }
        thread::sleep(Duration::from_millis(200));
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn default_socket_literal_matches_the_library_constant() {
        assert_eq!(".sock", vnotify::DEFAULT_SOCKET_PATH);
    }

    #[test]
    fn role_round_trips_through_its_str_form() {
        use super::Role;
        use std::str::FromStr;

        assert!(matches!(Role::from_str("watcher"), Ok(Role::Watcher)));
        assert!(matches!(Role::from_str("consumer"), Ok(Role::Consumer)));
        assert!(Role::from_str("bogus").is_err());
        assert_eq!(Role::Watcher.as_str(), "watcher");
        assert_eq!(Role::Consumer.as_str(), "consumer");
    }
}
