//! Engine - realtime and offline driver loops
//!
//! The runner owns a kernel and plays the host side of the protocol: it
//! boots the program, feeds it scheduled inputs, advances the wall clock to
//! the next deadline and keeps asynchronous ticks flowing.
//! - Offline: logical time only moves when stepped, faster than realtime.
//! - Realtime: logical time follows the wall clock; spin_sleep bridges the
//!   gaps between deadlines.
//!
//! Times are microseconds since `start`.

use crate::error::KernelError;
use crate::event::{EventId, Payload};
use crate::host::{Host, NullHost};
use crate::kernel::Kernel;
use crate::pq::MinPq;
use crate::program::Program;
use crate::wclock;
use spin_sleep::SpinSleeper;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Scheduler execution mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerMode {
    Realtime,
    Offline,
}

/// Configuration for a runner.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub mode: SchedulerMode,
    /// Raised right after the boot instant, if set.
    pub start_event: Option<EventId>,
    /// Asynchronous ticks per `run_async` call.
    pub async_budget: usize,
    /// Upper bound on driver steps per call, against programs that keep
    /// re-arming zero-length timers.
    pub max_steps: usize,
    /// Time dilation for realtime mode.
    pub rate: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mode: SchedulerMode::Offline,
            start_event: None,
            async_budget: 10_000,
            max_steps: 200_000,
            rate: 1.0,
        }
    }
}

/// Handle of a scheduled input, for cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InputId(u64);

struct ScheduledInput {
    event: EventId,
    payload: Payload,
}

pub struct Runner<P: Program, H: Host = NullHost> {
    kernel: Kernel<P, H>,
    config: RunnerConfig,
    inputs: MinPq<ScheduledInput>,
    seq: u64,
    /// Offline clock.
    offline_now: i64,
    /// Logical time the kernel's wall clock was last advanced to.
    clock: i64,
    sleeper: SpinSleeper,
    wall_anchor: Instant,
}

impl<P: Program, H: Host> Runner<P, H> {
    pub fn new(kernel: Kernel<P, H>, config: RunnerConfig) -> Self {
        let rate = if config.rate.is_finite() && config.rate > 0.0 {
            config.rate
        } else {
            1.0
        };
        Self {
            kernel,
            config: RunnerConfig { rate, ..config },
            inputs: MinPq::new(),
            seq: 0,
            offline_now: 0,
            clock: 0,
            sleeper: SpinSleeper::default(),
            wall_anchor: Instant::now(),
        }
    }

    pub fn kernel(&self) -> &Kernel<P, H> {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut Kernel<P, H> {
        &mut self.kernel
    }

    pub fn mode(&self) -> SchedulerMode {
        self.config.mode
    }

    /// Current logical time.
    pub fn now(&self) -> i64 {
        match self.config.mode {
            SchedulerMode::Offline => self.offline_now,
            SchedulerMode::Realtime => {
                let wall = self.wall_anchor.elapsed().as_micros() as f64;
                (wall * self.config.rate) as i64
            }
        }
    }

    /// Boot the program and raise the start event, if configured.
    pub fn start(&mut self) -> Result<(), KernelError> {
        self.wall_anchor = Instant::now();
        self.kernel.init()?;
        if let Some(start) = self.config.start_event {
            if self.kernel.is_running() {
                self.kernel.raise_event(start, Payload::Empty)?;
            }
        }
        Ok(())
    }

    /// Deliver `event` at logical time `at`.
    pub fn schedule(&mut self, at: i64, event: EventId, payload: Payload) -> Result<InputId, KernelError> {
        if event.is_reserved() {
            return Err(KernelError::ReservedEvent { id: event });
        }
        let id = self.seq;
        self.seq += 1;
        self.inputs.add(id, at, id, ScheduledInput { event, payload });
        trace!(at, ?event, "input scheduled");
        Ok(InputId(id))
    }

    /// Drop a scheduled input. False if it was already delivered.
    pub fn cancel(&mut self, id: InputId) -> bool {
        self.inputs.remove(id.0).is_some()
    }

    pub fn pending_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Earliest logical time something is due: a timer or an input.
    pub fn next_due(&mut self) -> Option<i64> {
        let timer = self
            .kernel
            .next_deadline()
            .map(|min| self.clock + i64::from(min.max(0)));
        let input = self.inputs.peek_deadline();
        match (timer, input) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Process everything due up to `target`, in time order.
    pub fn advance_to(&mut self, target: i64) -> Result<(), KernelError> {
        let mut steps = 0;
        while self.kernel.is_running() {
            let Some(next) = self.next_due().filter(|&t| t <= target) else {
                break;
            };
            // realtime ticks carry the real elapsed time so late timers
            // see their lateness
            let at = match self.config.mode {
                SchedulerMode::Offline => {
                    self.offline_now = self.offline_now.max(next);
                    next
                }
                SchedulerMode::Realtime => target,
            };
            self.advance_clock(at)?;
            while self.kernel.is_running() {
                let Some((_, _, input)) = self.inputs.pop_due(at) else {
                    break;
                };
                self.kernel.raise_event(input.event, input.payload)?;
            }

            steps += 1;
            if steps > self.config.max_steps {
                return Err(KernelError::StepLimit {
                    limit: self.config.max_steps,
                });
            }
        }
        if self.config.mode == SchedulerMode::Offline {
            self.offline_now = self.offline_now.max(target);
        }
        Ok(())
    }

    /// Tick the kernel's clock up to `t` if any timer can notice.
    fn advance_clock(&mut self, t: i64) -> Result<(), KernelError> {
        if let Some(min) = self.kernel.next_deadline() {
            let dt = (t - self.clock).max(0);
            if dt > 0 || min <= 0 {
                let dt = i32::try_from(dt).unwrap_or(wclock::INACTIVE - 1);
                trace!(at = t, dt, "wclock tick");
                self.kernel.tick_timer(dt)?;
            }
        }
        self.clock = t;
        Ok(())
    }

    /// Step offline time by `dt` microseconds.
    pub fn step(&mut self, dt: i64) -> Result<(), KernelError> {
        let target = self.now() + dt.max(0);
        self.advance_to(target)
    }

    /// Run asynchronous ticks while the program asks for them.
    pub fn run_async(&mut self) -> Result<usize, KernelError> {
        let mut ticks = 0;
        while self.kernel.async_pending() && ticks < self.config.async_budget {
            self.kernel.raise_async()?;
            ticks += 1;
        }
        if ticks > 0 {
            debug!(ticks, "async ticks");
        }
        Ok(ticks)
    }

    /// Drive the program until it terminates or nothing can wake it again.
    /// Returns the exit code if it terminated.
    pub fn run_until_end(&mut self) -> Result<Option<i32>, KernelError> {
        let mut steps = 0;
        while self.kernel.is_running() {
            steps += 1;
            if steps > self.config.max_steps {
                return Err(KernelError::StepLimit {
                    limit: self.config.max_steps,
                });
            }

            if self.kernel.async_pending() {
                self.kernel.raise_async()?;
                continue;
            }

            match self.config.mode {
                SchedulerMode::Offline => match self.next_due() {
                    Some(next) => self.advance_to(next)?,
                    None => break,
                },
                SchedulerMode::Realtime => {
                    let now = self.now();
                    self.advance_to(now)?;
                    let Some(next) = self.next_due() else {
                        break;
                    };
                    let wait = (next - self.now()).max(0) as f64 / self.config.rate;
                    if wait > 0.0 {
                        self.sleeper.sleep(Duration::from_micros(wait as u64));
                    }
                }
            }
        }
        let code = self.kernel.ended();
        info!(?code, now = self.now(), "runner stopped");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingHost;
    use crate::kernel::Kernel;
    use crate::org::OrgSpec;
    use crate::program::BodyTable;
    use crate::config::KernelConfig;

    fn ev(i: u8) -> EventId {
        EventId::user(i).unwrap()
    }

    /// Outputs `Int(n)` every 100ms, three times, then ends with 7.
    fn blinker() -> BodyTable {
        let mut count = 0;
        BodyTable::new(OrgSpec::new(1, 0u16))
            .on(0u16, |rx| rx.await_timer(0, 100_000, 1u16))
            .on(1u16, move |rx| {
                count += 1;
                rx.output(ev(0), Payload::Int(count));
                if count == 3 {
                    rx.terminate(7);
                    Ok(())
                } else {
                    rx.await_timer(0, 100_000, 1u16)
                }
            })
    }

    fn runner(program: BodyTable, config: RunnerConfig) -> Runner<BodyTable, RecordingHost> {
        let kernel = Kernel::new(program, RecordingHost::default(), KernelConfig::default()).unwrap();
        Runner::new(kernel, config)
    }

    #[test]
    fn test_offline_timers_fire_on_step() {
        let mut r = runner(blinker(), RunnerConfig::default());
        r.start().unwrap();
        assert!(r.kernel().host().outputs.is_empty());

        r.step(99_999).unwrap();
        assert!(r.kernel().host().outputs.is_empty());

        r.step(1).unwrap();
        assert_eq!(r.kernel().host().outputs, vec![(ev(0), Payload::Int(1))]);
        assert_eq!(r.now(), 100_000);

        r.step(250_000).unwrap();
        assert_eq!(r.kernel().host().outputs.len(), 3);
        assert_eq!(r.kernel().ended(), Some(7));
        assert_eq!(r.kernel().host().ended, Some(7));
    }

    #[test]
    fn test_offline_run_until_end() {
        let mut r = runner(blinker(), RunnerConfig::default());
        r.start().unwrap();
        assert_eq!(r.run_until_end().unwrap(), Some(7));
        assert_eq!(r.now(), 300_000);
    }

    #[test]
    fn test_scheduled_inputs_and_cancel() {
        let program = BodyTable::new(OrgSpec::new(1, 0u16))
            .on(0u16, |rx| rx.await_event(0, ev(1), 1u16))
            .on(1u16, |rx| {
                rx.output(ev(2), rx.payload());
                rx.await_event(0, ev(1), 1u16)
            });
        let mut r = runner(program, RunnerConfig::default());
        r.start().unwrap();

        r.schedule(50, ev(1), Payload::Int(1)).unwrap();
        let dropped = r.schedule(60, ev(1), Payload::Int(2)).unwrap();
        r.schedule(70, ev(1), Payload::Int(3)).unwrap();
        assert!(r.cancel(dropped));
        assert!(!r.cancel(dropped));
        assert!(r.schedule(80, EventId::WCLOCK, Payload::Empty).is_err());

        r.advance_to(100).unwrap();
        assert_eq!(
            r.kernel().host().outputs,
            vec![(ev(2), Payload::Int(1)), (ev(2), Payload::Int(3))]
        );
        assert_eq!(r.pending_inputs(), 0);
    }

    #[test]
    fn test_input_between_ticks_keeps_timer_on_schedule() {
        let program = BodyTable::new(OrgSpec::new(2, 0u16))
            .on(0u16, |rx| {
                rx.await_timer(0, 1_000, 1u16)?;
                rx.await_event(1, ev(1), 2u16)
            })
            .on(1u16, |rx| {
                rx.output(ev(0), Payload::Int(rx.lateness()));
                Ok(())
            })
            .on(2u16, |rx| rx.await_event(1, ev(1), 2u16));
        let mut r = runner(program, RunnerConfig::default());
        r.start().unwrap();
        r.schedule(400, ev(1), Payload::Empty).unwrap();

        r.advance_to(999).unwrap();
        assert!(r.kernel().host().outputs.is_empty());
        assert_eq!(r.kernel().next_deadline(), Some(600));

        r.advance_to(1_000).unwrap();
        assert_eq!(r.kernel().host().outputs, vec![(ev(0), Payload::Int(0))]);
    }

    #[test]
    fn test_async_loop_until_done() {
        let mut left = 5;
        let program = BodyTable::new(OrgSpec::new(1, 0u16))
            .on(0u16, |rx| {
                rx.request_async(true);
                rx.await_event(0, EventId::ASYNC, 1u16)
            })
            .on(1u16, move |rx| {
                left -= 1;
                if left == 0 {
                    rx.terminate(0);
                    return Ok(());
                }
                rx.request_async(true);
                rx.await_event(0, EventId::ASYNC, 1u16)
            });
        let mut r = runner(program, RunnerConfig::default());
        r.start().unwrap();
        assert_eq!(r.run_until_end().unwrap(), Some(0));
        assert!(!r.kernel().async_pending());
    }

    #[test]
    fn test_step_limit_guards_zero_timers() {
        let program = BodyTable::new(OrgSpec::new(1, 0u16))
            .on(0u16, |rx| rx.await_timer(0, 0, 0u16));
        let mut r = runner(
            program,
            RunnerConfig {
                max_steps: 50,
                ..Default::default()
            },
        );
        r.start().unwrap();
        assert_eq!(
            r.advance_to(10).unwrap_err(),
            KernelError::StepLimit { limit: 50 }
        );
    }

    #[test]
    fn test_realtime_blink() {
        let mut r = runner(
            blinker(),
            RunnerConfig {
                mode: SchedulerMode::Realtime,
                rate: 100.0,
                ..Default::default()
            },
        );
        r.start().unwrap();
        assert_eq!(r.run_until_end().unwrap(), Some(7));
        let outputs: Vec<_> = r
            .kernel()
            .host()
            .outputs
            .iter()
            .map(|(_, p)| p.as_int())
            .collect();
        assert_eq!(outputs, vec![Some(1), Some(2), Some(3)]);
    }
}
