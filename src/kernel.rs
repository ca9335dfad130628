//! Kernel - the reactive dispatcher
//!
//! Owns the organism tree, the event stack and the wall clock, and drives
//! one reactive instant per driver call:
//!
//! - `init` runs the boot instant (no reset pass).
//! - Every other input is pushed, then a reset pass over the tree raises
//!   the gate of every armed trail to `Any`, then the stack is drained
//!   depth-first. Each popped event gets one full pass starting from the
//!   root.
//! - A body that raises abandons its pass once it returns; the event it was
//!   handling stays on the stack underneath and resumes after the raised
//!   ones, most recent first.
//!
//! Errors escaping an instant poison the kernel: the tree may be half
//! updated, so every later call fails with the same diagnostic.

use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::event::{Event, EventId, EventStack, Payload};
use crate::host::{Host, NullHost};
use crate::org::{Cursor, OrgId, Organism, Site, Tree};
use crate::program::Program;
use crate::reaction::{Effects, Mode, Reaction};
use crate::trail::{Gate, Label, Link, Trail};
use crate::wclock::WallClock;
use tracing::{debug, error, info, trace, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
enum State {
    Fresh,
    Running,
    Ended(i32),
    Failed {
        site: Option<Site>,
        cause: KernelError,
    },
}

/// How a pass continues after a body returned.
enum Flow {
    Next,
    Jump(Cursor),
    Abandon,
}

pub struct Kernel<P: Program, H: Host = NullHost> {
    program: P,
    host: H,
    config: KernelConfig,
    tree: Tree,
    stack: EventStack,
    wclock: WallClock,
    state: State,
    last_site: Option<Site>,
    async_pending: bool,
}

impl<P: Program> Kernel<P> {
    /// Kernel with default limits and no host.
    pub fn with_program(program: P) -> Result<Self, KernelError> {
        Self::new(program, NullHost, KernelConfig::default())
    }
}

impl<P: Program, H: Host> Kernel<P, H> {
    pub fn new(program: P, host: H, config: KernelConfig) -> Result<Self, KernelError> {
        config.validate()?;
        Ok(Self {
            program,
            host,
            tree: Tree::new(config.max_organisms),
            stack: EventStack::new(config.max_stack),
            wclock: WallClock::new(),
            state: State::Fresh,
            last_site: None,
            async_pending: false,
            config,
        })
    }

    // ========================================================================
    // Driver entry points
    // ========================================================================

    /// Build the root organism and run the boot instant.
    pub fn init(&mut self) -> Result<(), KernelError> {
        match &self.state {
            State::Fresh => {}
            State::Failed { .. } => return Err(self.poisoned()),
            _ => return Err(KernelError::AlreadyStarted),
        }
        let root = self.program.root();
        self.tree.install_root(&root)?;
        self.state = State::Running;
        info!(
            trails = root.trails(),
            max_stack = self.config.max_stack,
            max_organisms = self.config.max_organisms,
            "kernel started"
        );
        self.instant(Event::bare(EventId::INIT))
    }

    /// Deliver one external event.
    pub fn raise_event(&mut self, id: EventId, payload: Payload) -> Result<(), KernelError> {
        if id.is_reserved() {
            return Err(KernelError::ReservedEvent { id });
        }
        if !self.accepting("event")? {
            return Ok(());
        }
        self.instant(Event::new(id, payload))
    }

    /// Advance the wall clock by `dt` microseconds and fire what expired.
    /// Returns the new minimum pending deadline.
    pub fn tick_timer(&mut self, dt: i32) -> Result<Option<i32>, KernelError> {
        if !self.accepting("wclock")? {
            return Ok(None);
        }
        self.wclock.begin_tick(dt);
        let result = self.instant(Event::new(EventId::WCLOCK, Payload::Delta(dt)));
        let next = self.wclock.end_tick();
        result?;
        if self.state != State::Running {
            return Ok(None);
        }
        if let Some(min) = next {
            self.host.on_wclock(min);
        }
        Ok(next)
    }

    /// Run one asynchronous tick.
    pub fn raise_async(&mut self) -> Result<(), KernelError> {
        if !self.accepting("async")? {
            return Ok(());
        }
        self.async_pending = false;
        self.instant(Event::bare(EventId::ASYNC))
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Smallest pending timer, relative to the last tick.
    pub fn next_deadline(&self) -> Option<i32> {
        match self.state {
            State::Running => self.wclock.minimum(),
            _ => None,
        }
    }

    /// The program asked for more asynchronous ticks.
    pub fn async_pending(&self) -> bool {
        self.state == State::Running && self.async_pending
    }

    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }

    /// Exit code, once the program has terminated.
    pub fn ended(&self) -> Option<i32> {
        match self.state {
            State::Ended(code) => Some(code),
            _ => None,
        }
    }

    /// Error that poisoned the kernel.
    pub fn failure(&self) -> Option<&KernelError> {
        match &self.state {
            State::Failed { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Last body executed.
    pub fn last_site(&self) -> Option<Site> {
        self.last_site
    }

    pub fn trails(&self, org: OrgId) -> Result<&[Trail], KernelError> {
        Ok(self.tree.get(org)?.trails())
    }

    pub fn organism(&self, org: OrgId) -> Result<&Organism, KernelError> {
        self.tree.get(org)
    }

    /// Nested organisms currently allocated.
    pub fn live_organisms(&self) -> usize {
        self.tree.live()
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn program(&self) -> &P {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut P {
        &mut self.program
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn accepting(&self, input: &'static str) -> Result<bool, KernelError> {
        match &self.state {
            State::Running => Ok(true),
            State::Fresh => Err(KernelError::NotStarted),
            State::Ended(code) => {
                warn!(input, code, "program already ended, input ignored");
                Ok(false)
            }
            State::Failed { .. } => Err(self.poisoned()),
        }
    }

    fn poisoned(&self) -> KernelError {
        match &self.state {
            State::Failed { site, cause } => KernelError::Poisoned {
                site: *site,
                cause: Box::new(cause.clone()),
            },
            _ => KernelError::NotStarted,
        }
    }

    fn instant(&mut self, event: Event) -> Result<(), KernelError> {
        debug!(event = ?event.id, payload = ?event.payload, "instant");
        match self.go(event) {
            Ok(()) => {
                if self.state == State::Running && self.tree.root_idle() {
                    self.finish(0);
                }
                Ok(())
            }
            Err(cause) => {
                error!(
                    site = ?self.last_site,
                    kind = cause.as_label(),
                    error = %cause,
                    "fatal error, kernel poisoned"
                );
                self.stack.clear();
                self.state = State::Failed {
                    site: self.last_site,
                    cause: cause.clone(),
                };
                Err(cause)
            }
        }
    }

    fn finish(&mut self, code: i32) {
        info!(code, "program terminated");
        self.stack.clear();
        self.state = State::Ended(code);
        self.host.on_end(code);
    }

    fn go(&mut self, event: Event) -> Result<(), KernelError> {
        let mut current = if event.id == EventId::INIT {
            event
        } else {
            self.stack.push(event)?;
            Event::bare(EventId::ANY)
        };

        loop {
            let depth = self.stack.depth();
            debug!(event = ?current.id, depth, "pass");
            self.pass(current, depth)?;
            if self.state != State::Running {
                return Ok(());
            }
            match self.stack.pop() {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }
    }

    /// One walk over the whole tree for `event` at `depth`.
    fn pass(&mut self, event: Event, depth: u8) -> Result<(), KernelError> {
        let mut at = Cursor::new(OrgId::ROOT, 0);
        loop {
            if at.org.is_root() && at.slot >= self.tree.root_len() {
                return Ok(());
            }
            let trail = *self.tree.trail(at)?;
            if self.config.trace_trails {
                trace!(org = ?at.org, slot = at.slot, ?trail, "visit");
            }

            match (trail.event, trail.link) {
                (EventId::ORG_DOWN, Link::Child(child)) => {
                    at = Cursor::new(child, 0);
                    continue;
                }
                (EventId::ORG_UP, Link::Parent { org, resume }) => {
                    at = Cursor::new(org, resume);
                    continue;
                }
                _ => {}
            }

            if !trail.matches(event.id, depth) {
                if event.id == EventId::ANY && trail.is_armed() {
                    self.tree.trail_mut(at)?.gate = Gate::Any;
                }
                at.slot += 1;
                continue;
            }

            if trail.event == EventId::WCLOCK && !self.timer_expired(at, event, depth)? {
                at.slot += 1;
                continue;
            }

            self.tree.trail_mut(at)?.clear();
            match self.react(at, trail.label, event, depth)? {
                Flow::Next => at.slot += 1,
                Flow::Jump(next) => at = next,
                Flow::Abandon => return Ok(()),
            }
        }
    }

    /// Expiry check for a timer trail woken by a tick. A timer that keeps
    /// waiting stays armed for the next instant only.
    fn timer_expired(&mut self, at: Cursor, event: Event, depth: u8) -> Result<bool, KernelError> {
        let dt = event.payload.as_delta().unwrap_or(0);
        let trail = self.tree.trail_mut(at)?;
        let mut remaining = trail.timer;
        let fired = self.wclock.expired(&mut remaining, dt);
        trail.timer = remaining;
        if !fired {
            trail.gate = Gate::Depth(depth.saturating_add(1));
        }
        Ok(fired)
    }

    fn react(&mut self, at: Cursor, label: Label, event: Event, depth: u8) -> Result<Flow, KernelError> {
        let site = Site { cursor: at, label };
        let mut effects = self.run_body(site, event, depth, Mode::Body)?;

        for fin in std::mem::take(&mut effects.cleared.finalizers) {
            let fx = self.run_body(fin, Event::bare(EventId::CLEAR), depth, Mode::Finalizer)?;
            if let Some(code) = fx.end {
                effects.end.get_or_insert(code);
            }
        }
        if !effects.cleared.unlinked.is_empty() {
            debug!(orgs = ?effects.cleared.unlinked, "organisms terminated");
        }
        for org in std::mem::take(&mut effects.cleared.releases) {
            if self.tree.contains(org) {
                self.tree.release(org)?;
                debug!(?org, "organism released");
            }
        }

        if let Some(code) = effects.end {
            self.finish(code);
            return Ok(Flow::Abandon);
        }
        if effects.raised {
            return Ok(Flow::Abandon);
        }
        Ok(match effects.resume_at {
            Some(next) => Flow::Jump(next),
            None => Flow::Next,
        })
    }

    fn run_body(&mut self, site: Site, event: Event, depth: u8, mode: Mode) -> Result<Effects, KernelError> {
        self.last_site = Some(site);
        if self.config.trace_trails {
            trace!(%site, ?mode, event = ?event.id, depth, "run");
        }
        let mut effects = Effects::default();
        let mut rx = Reaction::new(
            &mut self.tree,
            &mut self.stack,
            &mut self.wclock,
            &mut self.host,
            &mut effects,
            site,
            event,
            depth,
            mode,
        );
        self.program.run(site.label, &mut rx)?;
        if let Some(fatal) = effects.fatal.take() {
            return Err(fatal);
        }
        if let Some(more) = effects.async_more {
            self.async_pending = more;
        }
        Ok(effects)
    }
}
