//! Trails - the scheduling records the dispatcher walks
//!
//! A trail is one suspended point of sequential execution: what it awaits,
//! where it resumes and at which stack depth it is allowed to wake. Slots
//! that link organisms together reuse the same record with a link id in
//! `event` and the target in `link`.

use crate::event::EventId;
use crate::org::OrgId;
use std::fmt;

/// Resume point of a trail; the program maps it to a code body.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Label(u16);

impl Label {
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl From<u16> for Label {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Stack depth at which an armed trail may wake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Gate {
    /// Not eligible at any depth (inert trails).
    #[default]
    Idle,
    /// Only while the stack is at exactly this depth.
    Depth(u8),
    /// At whatever depth the traversal reaches it.
    Any,
}

impl Gate {
    pub fn admits(self, depth: u8) -> bool {
        match self {
            Gate::Idle => false,
            Gate::Depth(d) => d == depth,
            Gate::Any => true,
        }
    }
}

/// Target of a link slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum Link {
    #[default]
    None,
    /// Down-link: the first organism of the chain spliced here, or the next
    /// sibling when the slot is an organism tail.
    Child(OrgId),
    /// Up-link: continue in `org` at slot `resume`.
    Parent { org: OrgId, resume: usize },
}

/// One trail slot.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Trail {
    pub(crate) event: EventId,
    pub(crate) label: Label,
    pub(crate) gate: Gate,
    /// Remaining microseconds while awaiting `WCLOCK`.
    pub(crate) timer: i32,
    pub(crate) link: Link,
}

impl Trail {
    pub fn event(&self) -> EventId {
        self.event
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn gate(&self) -> Gate {
        self.gate
    }

    /// Remaining time of an armed timer.
    pub fn timer(&self) -> Option<i32> {
        (self.event == EventId::WCLOCK).then_some(self.timer)
    }

    pub fn is_inert(&self) -> bool {
        self.event == EventId::NONE
    }

    pub fn is_link(&self) -> bool {
        self.event.is_link()
    }

    /// Armed with an await (real class, wildcard, timer or finalizer).
    pub fn is_armed(&self) -> bool {
        !self.is_inert() && !self.is_link()
    }

    /// Whether this trail wakes for `event` at `depth`.
    pub fn matches(&self, event: EventId, depth: u8) -> bool {
        (self.event == EventId::ANY || self.event == event) && self.gate.admits(depth)
    }

    pub(crate) fn arm(&mut self, event: EventId, label: Label, gate: Gate) {
        self.event = event;
        self.label = label;
        self.gate = gate;
    }

    /// Back to inert. The label is kept for diagnostics.
    pub(crate) fn clear(&mut self) {
        self.event = EventId::NONE;
        self.gate = Gate::Idle;
    }

    pub(crate) fn set_link(&mut self, event: EventId, link: Link) {
        self.event = event;
        self.gate = Gate::Idle;
        self.link = link;
    }

    pub(crate) fn unlink(&mut self) {
        self.event = EventId::NONE;
        self.gate = Gate::Idle;
        self.link = Link::None;
    }
}

impl fmt::Debug for Trail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.link {
            Link::Child(org) => write!(f, "Trail({:?} -> {:?})", self.event, org),
            Link::Parent { org, resume } => {
                write!(f, "Trail({:?} -> {:?}[{}])", self.event, org, resume)
            }
            Link::None if self.event == EventId::WCLOCK => write!(
                f,
                "Trail(WCLOCK {}us {:?} {:?})",
                self.timer, self.label, self.gate
            ),
            Link::None => write!(f, "Trail({:?} {:?} {:?})", self.event, self.label, self.gate),
        }
    }
}
