//! Events and the bounded event stack
//!
//! Event ids form a closed set: a handful of reserved control ids used by the
//! dispatcher itself, followed by the ids a program defines. Control ids that
//! describe tree links never travel through the stack; they only ever sit in
//! trail slots.

use crate::error::KernelError;
use std::fmt;

/// Identifier of an event class.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u8);

impl EventId {
    /// Inert trail marker.
    pub const NONE: EventId = EventId(0);
    /// Wildcard: matches every event. Also the id of the gate-reset pass.
    pub const ANY: EventId = EventId(1);
    /// The boot instant.
    pub const INIT: EventId = EventId(2);
    /// Down-link into a nested organism.
    pub const ORG_DOWN: EventId = EventId(3);
    /// Up-link back to the parent organism.
    pub const ORG_UP: EventId = EventId(4);
    /// Down-link whose subtree is paused.
    pub const ORG_DOWN_PAUSED: EventId = EventId(5);
    /// Awaited by finalizers; run when a clear walk passes them.
    pub const CLEAR: EventId = EventId(6);
    /// Wall-clock tick.
    pub const WCLOCK: EventId = EventId(7);
    /// Asynchronous tick.
    pub const ASYNC: EventId = EventId(8);

    /// First id available to programs.
    pub const FIRST_USER: u8 = 9;
    /// Number of ids available to programs.
    pub const USER_CAPACITY: usize = (u8::MAX - Self::FIRST_USER) as usize + 1;

    /// The `index`-th program event, if it fits in the id space.
    pub const fn user(index: u8) -> Option<EventId> {
        match Self::FIRST_USER.checked_add(index) {
            Some(raw) => Some(EventId(raw)),
            None => None,
        }
    }

    pub const fn from_raw(raw: u8) -> EventId {
        EventId(raw)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Index of a program event, `None` for reserved ids.
    pub fn user_index(self) -> Option<u8> {
        self.0.checked_sub(Self::FIRST_USER)
    }

    pub fn is_reserved(self) -> bool {
        self.0 < Self::FIRST_USER
    }

    /// Ids that encode organism links rather than awaits.
    pub fn is_link(self) -> bool {
        matches!(self, Self::ORG_DOWN | Self::ORG_UP | Self::ORG_DOWN_PAUSED)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::NONE => "NONE",
            Self::ANY => "ANY",
            Self::INIT => "INIT",
            Self::ORG_DOWN => "ORG_DOWN",
            Self::ORG_UP => "ORG_UP",
            Self::ORG_DOWN_PAUSED => "ORG_DOWN_PAUSED",
            Self::CLEAR => "CLEAR",
            Self::WCLOCK => "WCLOCK",
            Self::ASYNC => "ASYNC",
            _ => return write!(f, "Event({})", self.0 - Self::FIRST_USER),
        };
        f.write_str(name)
    }
}

/// Data carried by an event. Which variant is meaningful depends on the id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Payload {
    #[default]
    Empty,
    /// Opaque host reference (handle, index or address).
    Handle(usize),
    Int(i32),
    /// Signed time delta in microseconds (wall-clock ticks).
    Delta(i32),
}

impl Payload {
    pub fn as_int(self) -> Option<i32> {
        match self {
            Payload::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_handle(self) -> Option<usize> {
        match self {
            Payload::Handle(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_delta(self) -> Option<i32> {
        match self {
            Payload::Delta(dt) => Some(dt),
            _ => None,
        }
    }
}

/// One stack entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    pub payload: Payload,
}

impl Event {
    pub fn new(id: EventId, payload: Payload) -> Self {
        Self { id, payload }
    }

    pub fn bare(id: EventId) -> Self {
        Self::new(id, Payload::Empty)
    }
}

/// Bounded LIFO of pending events.
///
/// Depth counts from 1: with nothing pushed the running frame is at depth 1.
/// A push that would take the depth to the configured bound fails with
/// [`KernelError::StackOverflow`]; the dispatcher treats that as fatal.
pub struct EventStack {
    frames: Vec<Event>,
    max_depth: u8,
}

impl EventStack {
    pub fn new(max_depth: u8) -> Self {
        Self {
            frames: Vec::with_capacity(max_depth as usize),
            max_depth,
        }
    }

    /// Depth of the frame that will run next.
    pub fn depth(&self) -> u8 {
        // push() keeps len + 1 < max_depth <= u8::MAX
        (self.frames.len() + 1) as u8
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    pub fn push(&mut self, event: Event) -> Result<(), KernelError> {
        if self.depth() >= self.max_depth {
            return Err(KernelError::StackOverflow {
                max: self.max_depth,
                event: event.id,
            });
        }
        self.frames.push(event);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.frames.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
