// src/test.rs
//! Shared helpers for this crate's unit tests, playing the same role
//! `connec-monitoring-rs`'s own `src/test.rs` plays there.

use std::io;

use crate::event::Event;
use crate::watcher::{EventSink, ShutdownSignal};

/// A convenient alias to use `?` in tests.
///
/// There is a blanket `impl From<E: Error> for Box<dyn Error>`, meaning anything that implements
/// [`std::error::Error`] can be propagated using `?`.
pub type Result = std::result::Result<(), Box<dyn std::error::Error>>;

/// A [`ShutdownSignal`] that requests shutdown on its very first poll.
pub struct ImmediateShutdown;

impl ShutdownSignal for ImmediateShutdown {
    fn should_shutdown(&mut self) -> bool {
        true
    }
}

/// A [`ShutdownSignal`] that stays alive for `n` polls before requesting
/// shutdown, letting a test drive more than one queued notification through
/// a single `Watcher::run` call.
pub struct ShutdownAfter(pub usize);

impl ShutdownSignal for ShutdownAfter {
    fn should_shutdown(&mut self) -> bool {
        if self.0 == 0 {
            return true;
        }
        self.0 -= 1;
        false
    }
}

/// An [`EventSink`] that records every emitted [`Event`] in memory, for
/// assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<Event>,
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: Event) -> io::Result<()> {
        self.events.push(event);
        Ok(())
    }
}
