//! Blink Demo
//!
//! A blinker organism toggles an LED output on a wall-clock timer. A button
//! input pauses and resumes it; once it has blinked enough times it raises
//! an internal `Done` event and the root cancels it, which runs its
//! finalizer (LED off) before the program terminates.
//!
//! Usage:
//!   cargo run --bin blink -- --blinks 4 --period-ms 250 --realtime
//!
//! Set `RUST_LOG=ceu_kernel=debug` to watch the dispatcher.

use ceu_kernel::{
    EventId, Events, Host, Kernel, KernelConfig, KernelError, Label, Labels, OrgSpec, Payload,
    Program, Reaction, Runner, RunnerConfig, SchedulerMode,
};
use std::env;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Labels)]
enum L {
    Boot,
    Button,
    Done,
    BlinkerBoot,
    Tick,
    LedOff,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Events)]
enum E {
    Button,
    Done,
    Led,
}

// root slots
const BLINKER: usize = 1;
const BUTTON: usize = 2;
const DONE: usize = 3;

struct Blink {
    blinks: u32,
    period_us: i32,
    toggles: u32,
    led: bool,
    paused: bool,
}

impl Blink {
    fn set_led(&mut self, rx: &mut Reaction<'_>, on: bool) {
        self.led = on;
        rx.output(E::Led.into(), Payload::Int(i32::from(on)));
    }
}

impl Program for Blink {
    fn root(&self) -> OrgSpec {
        OrgSpec::new(4, L::Boot)
    }

    fn run(&mut self, label: Label, rx: &mut Reaction<'_>) -> Result<(), KernelError> {
        match L::try_from(label)? {
            L::Boot => {
                rx.spawn(BLINKER, OrgSpec::new(2, L::BlinkerBoot))?;
                rx.await_event(BUTTON, E::Button.into(), L::Button)?;
                rx.await_event(DONE, E::Done.into(), L::Done)?;
            }
            L::Button => {
                self.paused = !self.paused;
                if self.paused {
                    rx.pause(BLINKER..BLINKER + 1)?;
                } else {
                    rx.resume(BLINKER..BLINKER + 1)?;
                }
                tracing::info!(paused = self.paused, "button");
                rx.await_event(BUTTON, E::Button.into(), L::Button)?;
            }
            L::Done => {
                rx.clear(BLINKER..BLINKER + 1)?;
                rx.terminate(0);
            }
            L::BlinkerBoot => {
                rx.finalize(1, L::LedOff)?;
                rx.await_timer(0, self.period_us, L::Tick)?;
            }
            L::Tick => {
                let on = !self.led;
                self.set_led(rx, on);
                self.toggles += 1;
                if self.toggles >= self.blinks * 2 {
                    rx.emit(E::Done.into(), Payload::Empty)?;
                } else {
                    rx.await_timer(0, self.period_us, L::Tick)?;
                }
            }
            L::LedOff => self.set_led(rx, false),
        }
        Ok(())
    }
}

/// Prints what the program drives.
struct Console;

impl Host for Console {
    fn on_output(&mut self, event: EventId, payload: Payload) {
        if let (Ok(E::Led), Some(level)) = (E::try_from(event), payload.as_int()) {
            println!("LED {}", if level != 0 { "on" } else { "off" });
        }
    }

    fn on_end(&mut self, code: i32) {
        println!("program ended ({code})");
    }
}

fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args: Vec<String> = env::args().collect();
    let mut blinks = 3;
    let mut period_ms = 250;
    let mut realtime = false;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--blinks" if i + 1 < args.len() => {
                blinks = args[i + 1].parse().unwrap_or(blinks);
                i += 1;
            }
            "--period-ms" if i + 1 < args.len() => {
                period_ms = args[i + 1].parse().unwrap_or(period_ms);
                i += 1;
            }
            "--realtime" => realtime = true,
            other => eprintln!("ignoring argument {other}"),
        }
        i += 1;
    }

    let period_us: i32 = period_ms * 1_000;
    let program = Blink {
        blinks,
        period_us,
        toggles: 0,
        led: false,
        paused: false,
    };

    let kernel = match Kernel::new(program, Console, KernelConfig::default()) {
        Ok(kernel) => kernel,
        Err(e) => {
            eprintln!("bad configuration: {e}");
            std::process::exit(2);
        }
    };
    let mode = if realtime {
        SchedulerMode::Realtime
    } else {
        SchedulerMode::Offline
    };
    let mut runner = Runner::new(
        kernel,
        RunnerConfig {
            mode,
            ..Default::default()
        },
    );

    // press the button during the second blink, press again a period and
    // a half later
    let period = i64::from(period_us);
    let presses = [period * 3 + period / 2, period * 5];
    let run = runner.start().and_then(|()| {
        for at in presses {
            runner.schedule(at, EventId::from(E::Button), Payload::Empty)?;
        }
        runner.run_until_end()
    });

    match run {
        Ok(code) => {
            tracing::info!(?code, elapsed_us = runner.now(), "done");
            std::process::exit(code.unwrap_or(0));
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
