//! Host callbacks
//!
//! The kernel never talks to the outside world directly. Everything it
//! reports goes through a [`Host`]; every method has a no-op default so a
//! host only implements what it cares about.

use crate::event::{EventId, Payload};

pub trait Host {
    /// The minimum pending deadline changed (microseconds from the last tick).
    fn on_wclock(&mut self, _min: i32) {}

    /// Whether the program wants more asynchronous ticks.
    fn on_async(&mut self, _more: bool) {}

    /// A body emitted an output event.
    fn on_output(&mut self, _event: EventId, _payload: Payload) {}

    /// The program terminated with `code`.
    fn on_end(&mut self, _code: i32) {}

    /// External input is waiting to be delivered.
    fn input_pending(&self) -> bool {
        false
    }
}

/// Host that ignores every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullHost;

impl Host for NullHost {}

/// Records every notification, in order. Handy for drivers that poll.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordingHost {
    pub deadlines: Vec<i32>,
    pub outputs: Vec<(EventId, Payload)>,
    pub async_more: Option<bool>,
    pub ended: Option<i32>,
    pub pending: bool,
}

impl Host for RecordingHost {
    fn on_wclock(&mut self, min: i32) {
        self.deadlines.push(min);
    }

    fn on_async(&mut self, more: bool) {
        self.async_more = Some(more);
    }

    fn on_output(&mut self, event: EventId, payload: Payload) {
        self.outputs.push((event, payload));
    }

    fn on_end(&mut self, code: i32) {
        self.ended = Some(code);
    }

    fn input_pending(&self) -> bool {
        self.pending
    }
}
