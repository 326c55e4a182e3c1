//! The wire-level record emitted by the [`Watcher`](crate::watcher::Watcher)
//! and consumed across the [`Transport`](crate::transport::Transport).
//!
//! Events are tagged records carrying an inode, a timestamp, a name whose
//! meaning varies by [`EventKind`] (see the table in the crate's top-level
//! spec), and an optional file descriptor that never travels in the
//! serialized payload — it is passed out-of-band as ancillary data by the
//! transport and stitched back on at the receiving end.

use std::fmt;
use std::os::unix::io::RawFd;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::{self, Deserialize, Deserializer, Visitor};
use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::watcher::InodeId;

/// The kind of change an [`Event`] describes.
///
/// The numeric discriminants match `tangle.events.EventType` in the Python
/// implementation this crate's wire format is descended from, so that the
/// small-integer type tag on the wire is not an arbitrary choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A new file appeared in a watched directory.
    CreateFile,
    /// A new directory appeared in a watched directory (and is now itself watched).
    CreateDir,
    /// A write occurred on a watched file.
    Write,
    /// A watched file or directory was deleted.
    Delete,
    /// A watched file was renamed (in place or across directories).
    RenameFile,
    /// A watched directory (and, transitively, its descendants) was renamed.
    RenameDir,
    /// The watcher has finished bootstrapping and is live.
    Started,
    /// The watcher has torn down and is about to exit.
    Stopped,
    /// Sentinel used on the control channel, never emitted on the wire
    /// (kept here so the full `EventType` set from spec.md §3 has one
    /// Rust type).
    Shutdown,
}

impl EventKind {
    fn tag(self) -> u8 {
        match self {
            EventKind::CreateFile => 0,
            EventKind::CreateDir => 1,
            EventKind::Write => 2,
            EventKind::Delete => 3,
            EventKind::RenameFile => 4,
            EventKind::RenameDir => 5,
            EventKind::Started => 9,
            EventKind::Stopped => 10,
            EventKind::Shutdown => 69,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => EventKind::CreateFile,
            1 => EventKind::CreateDir,
            2 => EventKind::Write,
            3 => EventKind::Delete,
            4 => EventKind::RenameFile,
            5 => EventKind::RenameDir,
            9 => EventKind::Started,
            10 => EventKind::Stopped,
            69 => EventKind::Shutdown,
            _ => return None,
        })
    }

    /// Whether events of this kind carry a duplicated descriptor as
    /// ancillary data alongside the framed bytes (spec.md §4.2/§6).
    #[must_use]
    pub fn carries_descriptor(self) -> bool {
        matches!(
            self,
            EventKind::CreateFile | EventKind::Write | EventKind::RenameFile | EventKind::RenameDir
        )
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.tag())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TagVisitor;

        impl<'de> Visitor<'de> for TagVisitor {
            type Value = EventKind;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a small integer event type tag")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<EventKind, E> {
                u8::try_from(value)
                    .ok()
                    .and_then(EventKind::from_tag)
                    .ok_or_else(|| de::Error::custom(format!("unrecognised event type tag {}", value)))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<EventKind, E> {
                u8::try_from(value)
                    .ok()
                    .and_then(EventKind::from_tag)
                    .ok_or_else(|| de::Error::custom(format!("unrecognised event type tag {}", value)))
            }

            fn visit_u8<E: de::Error>(self, value: u8) -> Result<EventKind, E> {
                EventKind::from_tag(value)
                    .ok_or_else(|| de::Error::custom(format!("unrecognised event type tag {}", value)))
            }
        }

        deserializer.deserialize_any(TagVisitor)
    }
}

/// A semantic filesystem-change event, as produced by the
/// [`Watcher`](crate::watcher::Watcher) and framed by the
/// [`Transport`](crate::transport::Transport).
///
/// `descriptor` never round-trips through serialization (see
/// [`EventKind::carries_descriptor`] and the transport's ancillary-data
/// handling) — it is always `None` immediately after deserializing, and is
/// set by the transport once the paired `SCM_RIGHTS` descriptor has been
/// received and sanity-checked.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// The inode this event concerns, or `None` for the inode-less
    /// `started`/`stopped`/`shutdown` kinds.
    pub inode: Option<InodeId>,
    /// Seconds since the Unix epoch, as an `f64` per spec.md §6.
    pub time: f64,
    /// Meaning depends on `kind` — see the name-field table in spec.md §6.
    pub name: String,
    /// The real file descriptor, present only after the transport has
    /// spliced in the out-of-band `SCM_RIGHTS` payload.
    pub descriptor: Option<RawFd>,
}

impl Event {
    fn now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Compare two events ignoring the out-of-band `descriptor` field,
    /// which never participates in wire equality (spec.md §8,
    /// "Event round-trip").
    #[must_use]
    pub fn eq_ignoring_descriptor(&self, other: &Event) -> bool {
        self.kind == other.kind
            && self.inode == other.inode
            && (self.time - other.time).abs() < f64::EPSILON
            && self.name == other.name
    }

    /// The watcher has finished bootstrapping and is live.
    #[must_use]
    pub fn started() -> Self {
        Event {
            kind: EventKind::Started,
            inode: None,
            time: Self::now(),
            name: String::new(),
            descriptor: None,
        }
    }

    /// The watcher has torn down and is about to exit.
    #[must_use]
    pub fn stopped() -> Self {
        Event {
            kind: EventKind::Stopped,
            inode: None,
            time: Self::now(),
            name: String::new(),
            descriptor: None,
        }
    }

    /// A new file appeared; `name` is its basename.
    #[must_use]
    pub fn create_file(inode: InodeId, name: String, descriptor: RawFd) -> Self {
        Event {
            kind: EventKind::CreateFile,
            inode: Some(inode),
            time: Self::now(),
            name,
            descriptor: Some(descriptor),
        }
    }

    /// A new directory appeared; `name` is its recorded path.
    #[must_use]
    pub fn create_dir(inode: InodeId, name: String, descriptor: RawFd) -> Self {
        Event {
            kind: EventKind::CreateDir,
            inode: Some(inode),
            time: Self::now(),
            name,
            descriptor: Some(descriptor),
        }
    }

    /// A write occurred; `name` is the file's basename.
    #[must_use]
    pub fn write(inode: InodeId, name: String, descriptor: RawFd) -> Self {
        Event {
            kind: EventKind::Write,
            inode: Some(inode),
            time: Self::now(),
            name,
            descriptor: Some(descriptor),
        }
    }

    /// A file or directory was deleted; `name` is a basename for files, the
    /// last recorded path for directories.
    #[must_use]
    pub fn delete(inode: InodeId, name: String) -> Self {
        Event {
            kind: EventKind::Delete,
            inode: Some(inode),
            time: Self::now(),
            name,
            descriptor: None,
        }
    }

    /// A file was renamed; `name` is its new full path.
    #[must_use]
    pub fn rename_file(inode: InodeId, name: String, descriptor: RawFd) -> Self {
        Event {
            kind: EventKind::RenameFile,
            inode: Some(inode),
            time: Self::now(),
            name,
            descriptor: Some(descriptor),
        }
    }

    /// A directory was renamed; `name` is its new full path.
    #[must_use]
    pub fn rename_dir(inode: InodeId, name: String, descriptor: RawFd) -> Self {
        Event {
            kind: EventKind::RenameDir,
            inode: Some(inode),
            time: Self::now(),
            name,
            descriptor: Some(descriptor),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?}(inode={:?}, name={:?})",
            self.kind, self.inode, self.name
        )
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Event", 5)?;
        state.serialize_field("type", &self.kind)?;
        state.serialize_field("inode", &self.inode.map(|i| i as i64).unwrap_or(-1))?;
        state.serialize_field("time", &self.time)?;
        state.serialize_field("name", &self.name)?;
        // The descriptor slot is sentinel-null on the wire; the real
        // descriptor travels as ancillary data (spec.md §6).
        state.serialize_field("fd", &Option::<RawFd>::None)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "type")]
            kind: EventKind,
            inode: i64,
            time: f64,
            name: String,
            #[serde(rename = "fd")]
            #[allow(dead_code)]
            fd: Option<RawFd>,
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(Event {
            kind: raw.kind,
            inode: if raw.inode < 0 {
                None
            } else {
                Some(raw.inode as InodeId)
            },
            time: raw.time,
            name: raw.name,
            descriptor: None,
        })
    }
}
