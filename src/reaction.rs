//! Reaction - what a running body can see and do
//!
//! A [`Reaction`] is handed to every body the dispatcher runs. It exposes
//! the event being handled and the position of the body in the tree, and
//! it is the only way a body can arm trails, raise events, pause or cancel
//! subtrees and manage organisms. Slot arguments always refer to the
//! organism the body runs in.

use crate::error::KernelError;
use crate::event::{Event, EventId, EventStack, Payload};
use crate::host::Host;
use crate::org::{ClearLog, Cursor, OrgId, OrgSpec, Site, Tree};
use crate::trail::{Gate, Label, Trail};
use crate::wclock::WallClock;
use std::ops::Range;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Mode {
    Body,
    /// Running because a clear walk passed a `CLEAR` trail.
    Finalizer,
}

/// Side effects the dispatcher settles once the body returns.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    /// The body raised at least one event; the pass is abandoned.
    pub raised: bool,
    /// The body killed its own organism; traversal continues here.
    pub resume_at: Option<Cursor>,
    pub cleared: ClearLog,
    pub end: Option<i32>,
    pub async_more: Option<bool>,
    /// Fatal error seen by the body, even if it swallowed the `Err`.
    pub fatal: Option<KernelError>,
}

pub struct Reaction<'k> {
    tree: &'k mut Tree,
    stack: &'k mut EventStack,
    wclock: &'k mut WallClock,
    host: &'k mut dyn Host,
    effects: &'k mut Effects,
    site: Site,
    event: Event,
    depth: u8,
    mode: Mode,
}

impl<'k> Reaction<'k> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        tree: &'k mut Tree,
        stack: &'k mut EventStack,
        wclock: &'k mut WallClock,
        host: &'k mut dyn Host,
        effects: &'k mut Effects,
        site: Site,
        event: Event,
        depth: u8,
        mode: Mode,
    ) -> Self {
        Self {
            tree,
            stack,
            wclock,
            host,
            effects,
            site,
            event,
            depth,
            mode,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Event this body woke up for.
    pub fn event(&self) -> EventId {
        self.event.id
    }

    pub fn payload(&self) -> Payload {
        self.event.payload
    }

    /// Stack depth the body runs at.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn org(&self) -> OrgId {
        self.site.cursor.org
    }

    pub fn slot(&self) -> usize {
        self.site.cursor.slot
    }

    pub fn label(&self) -> Label {
        self.site.label
    }

    pub fn site(&self) -> Site {
        self.site
    }

    /// How late the current wall-clock tick is, in microseconds.
    pub fn lateness(&self) -> i32 {
        self.wclock.lateness()
    }

    pub fn input_pending(&self) -> bool {
        self.host.input_pending()
    }

    pub fn is_finalizer(&self) -> bool {
        self.mode == Mode::Finalizer
    }

    /// Snapshot of one slot of this organism.
    pub fn trail(&mut self, slot: usize) -> Result<Trail, KernelError> {
        let snapshot = self.tree.trail(self.here(slot)).copied();
        self.record(snapshot)
    }

    // ========================================================================
    // Arming
    // ========================================================================

    /// Resume at `label` when `event` (or anything, for `ANY`) is next
    /// handled at the following stack depth.
    pub fn await_event(
        &mut self,
        slot: usize,
        event: EventId,
        label: impl Into<Label>,
    ) -> Result<(), KernelError> {
        match event {
            EventId::NONE | EventId::INIT | EventId::CLEAR | EventId::WCLOCK => {
                return Err(KernelError::ReservedEvent { id: event })
            }
            e if e.is_link() => return Err(KernelError::ReservedEvent { id: event }),
            _ => {}
        }
        let gate = self.next_depth();
        self.arm(slot, event, label.into(), gate)
    }

    /// Resume at `label` once the events raised by this body have been
    /// handled, still inside the current reaction. Pair with [`emit`].
    ///
    /// [`emit`]: Reaction::emit
    pub fn resume_after(&mut self, slot: usize, label: impl Into<Label>) -> Result<(), KernelError> {
        let gate = Gate::Depth(self.depth);
        self.arm(slot, EventId::ANY, label.into(), gate)
    }

    /// Resume at `label` after `us` microseconds, minus the lateness of
    /// the current tick.
    pub fn await_timer(
        &mut self,
        slot: usize,
        us: i32,
        label: impl Into<Label>,
    ) -> Result<(), KernelError> {
        let gate = self.next_depth();
        self.arm(slot, EventId::WCLOCK, label.into(), gate)?;
        let (remaining, notify) = self.wclock.arm(us);
        let at = self.here(slot);
        self.tree.trail_mut(at)?.timer = remaining;
        if let Some(min) = notify {
            self.host.on_wclock(min);
        }
        Ok(())
    }

    /// Run `label` when a clear walk passes this slot.
    pub fn finalize(&mut self, slot: usize, label: impl Into<Label>) -> Result<(), KernelError> {
        self.arm(slot, EventId::CLEAR, label.into(), Gate::Any)
    }

    fn next_depth(&self) -> Gate {
        Gate::Depth(self.depth.saturating_add(1))
    }

    fn arm(&mut self, slot: usize, event: EventId, label: Label, gate: Gate) -> Result<(), KernelError> {
        self.forbid("await")?;
        let at = self.here(slot);
        let armed = arm_trail(&mut *self.tree, at, event, label, gate);
        self.record(armed)
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Raise an internal event. It is handled to completion, together with
    /// anything else this body raises (most recent first), before the
    /// current event resumes.
    pub fn emit(&mut self, event: EventId, payload: Payload) -> Result<(), KernelError> {
        self.forbid("emit")?;
        if event.is_reserved() {
            return Err(KernelError::ReservedEvent { id: event });
        }
        if !self.effects.raised {
            let current = self.event;
            self.push(current)?;
            self.effects.raised = true;
        }
        self.push(Event::new(event, payload))
    }

    fn push(&mut self, event: Event) -> Result<(), KernelError> {
        let pushed = self.stack.push(event);
        self.record(pushed)
    }

    /// Hand an output event to the host.
    pub fn output(&mut self, event: EventId, payload: Payload) {
        self.host.on_output(event, payload);
    }

    /// Tell the host whether more asynchronous ticks are wanted.
    pub fn request_async(&mut self, more: bool) {
        self.effects.async_more = Some(more);
        self.host.on_async(more);
    }

    /// End the program once this body returns.
    pub fn terminate(&mut self, code: i32) {
        self.effects.end = Some(code);
    }

    // ========================================================================
    // Pause / clear
    // ========================================================================

    /// Suspend every organism linked inside `range`. Their trails keep their
    /// state and their timers stop counting.
    pub fn pause(&mut self, range: Range<usize>) -> Result<(), KernelError> {
        self.forbid("pause")?;
        let org = self.org();
        let paused = self.tree.pause_range(org, range, true).map(drop);
        self.record(paused)
    }

    /// Undo [`pause`](Reaction::pause) and put the frozen timers back into
    /// the deadline computation.
    pub fn resume(&mut self, range: Range<usize>) -> Result<(), KernelError> {
        self.forbid("resume")?;
        let org = self.org();
        let resumed = self.tree.pause_range(org, range, false);
        for first in self.record(resumed)? {
            let timers = self.tree.active_timers(first, org);
            for remaining in self.record(timers)? {
                if self.wclock.lower(remaining) {
                    self.host.on_wclock(remaining);
                }
            }
        }
        Ok(())
    }

    /// Terminate every trail in `range`, including whole nested organisms.
    /// Finalizers passed on the way run after this body returns.
    pub fn clear(&mut self, range: Range<usize>) -> Result<(), KernelError> {
        self.forbid("clear")?;
        let org = self.org();
        let log = self.tree.clear_range(org, range);
        let log = self.record(log)?;
        self.effects.cleared.absorb(log);
        Ok(())
    }

    // ========================================================================
    // Organisms
    // ========================================================================

    /// Create an organism under `slot`. Its entry trail runs the next time a
    /// pass reaches it.
    pub fn spawn(&mut self, slot: usize, spec: OrgSpec) -> Result<OrgId, KernelError> {
        self.forbid("spawn")?;
        let parent = self.here(slot);
        let id = self.tree.spawn(&spec, parent);
        let id = self.record(id)?;
        tracing::debug!(org = ?id, parent = ?parent.org, slot, "organism spawned");
        Ok(id)
    }

    /// Terminate `org` and its whole subtree. Dynamic organisms created with
    /// `free_on_exit` go back to the arena; others are kept for a restart.
    pub fn kill(&mut self, org: OrgId) -> Result<(), KernelError> {
        self.forbid("kill")?;
        let killed = self.terminate_org(org, false);
        self.record(killed)
    }

    /// Like [`kill`](Reaction::kill), but always releases `org`.
    pub fn free(&mut self, org: OrgId) -> Result<(), KernelError> {
        self.forbid("free")?;
        let freed = self.terminate_org(org, true);
        self.record(freed)
    }

    /// Bring a killed, retained organism back to life. Organisms it had
    /// created before are released.
    pub fn restart(&mut self, org: OrgId) -> Result<(), KernelError> {
        self.forbid("restart")?;
        let restarted = self.tree.restart(org);
        self.record(restarted)
    }

    /// Only the running organism itself or organisms nested inside it may
    /// be terminated.
    fn terminate_org(&mut self, org: OrgId, release: bool) -> Result<(), KernelError> {
        let here = self.org();
        if org.is_root() {
            return Err(KernelError::NotInScope { org, from: here });
        }
        let target = self.tree.get(org)?;
        if org != here && !self.tree.is_ancestor(here, org) {
            return Err(KernelError::NotInScope { org, from: here });
        }
        let release = release || target.kind().free_on_exit();
        if target.is_linked() {
            let len = target.user_len();
            let log = self.tree.clear_range(org, 0..len)?;
            let successor = self.tree.unlink(org)?;
            if org == here {
                self.effects.resume_at = Some(successor);
            }
            self.effects.cleared.absorb(log);
            tracing::debug!(?org, "organism killed");
        }
        if release {
            self.effects.cleared.releases.push(org);
        }
        Ok(())
    }

    fn here(&self, slot: usize) -> Cursor {
        Cursor::new(self.org(), slot)
    }

    /// Fatal errors poison the kernel even when the body drops the `Err`.
    fn record<T>(&mut self, result: Result<T, KernelError>) -> Result<T, KernelError> {
        if let Err(err) = &result {
            if err.is_fatal() {
                self.effects.fatal.get_or_insert_with(|| err.clone());
            }
        }
        result
    }

    fn forbid(&self, op: &'static str) -> Result<(), KernelError> {
        match self.mode {
            Mode::Finalizer => Err(KernelError::ForbiddenInFinalizer { op }),
            Mode::Body => Ok(()),
        }
    }
}

/// Arm a program slot, refusing link slots and, in debug builds, slots
/// that are still armed.
fn arm_trail(tree: &mut Tree, at: Cursor, event: EventId, label: Label, gate: Gate) -> Result<(), KernelError> {
    let slot = at.slot;
    let trail = tree.user_trail_mut(at)?;
    if trail.is_link() {
        return Err(KernelError::SlotInUse {
            org: at.org,
            slot,
        });
    }
    if cfg!(debug_assertions) && trail.is_armed() {
        return Err(KernelError::AlreadyArmed {
            org: at.org,
            slot,
        });
    }
    trail.arm(event, label, gate);
    Ok(())
}
