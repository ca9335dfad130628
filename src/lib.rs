//! Céu Reactive Kernel
//!
//! The execution core of a synchronous reactive runtime:
//! - Trails grouped into a tree of organisms, walked in one flattened order
//!   without recursion
//! - Deterministic broadcast: every instant runs to a fixed point before
//!   control returns to the driver
//! - Nested events handled depth-first on a bounded stack (LIFO)
//! - Structured cancellation and pause of whole subtrees
//! - Wall-clock timers with lateness compensation
//! - Dual driver modes: realtime (spin_sleep) and offline (stepping API)

// lets the derives name `::ceu_kernel` from inside this crate too
extern crate self as ceu_kernel;

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod host;
pub mod kernel;
pub mod org;
pub mod pq;
pub mod program;
pub mod reaction;
pub mod trail;
pub mod wclock;


pub use ceu_macros::{Events, Labels};
pub use config::KernelConfig;
pub use engine::{InputId, Runner, RunnerConfig, SchedulerMode};
pub use error::KernelError;
pub use event::{Event, EventId, Payload};
pub use host::{Host, NullHost, RecordingHost};
pub use kernel::Kernel;
pub use org::{ClassId, Cursor, OrgId, OrgKind, OrgSpec, Organism, Site};
pub use program::{BodyTable, Program};
pub use reaction::Reaction;
pub use trail::{Gate, Label, Trail};
