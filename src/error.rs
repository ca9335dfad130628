//! Kernel errors
//!
//! Everything the dispatcher or a body can fail with. Fatal variants poison
//! the kernel; the rest are reported to the caller and leave it usable.

use crate::event::EventId;
use crate::org::{OrgId, Site};
use crate::trail::Label;
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("event stack overflow (max depth {max}) while raising {event:?}")]
    StackOverflow { max: u8, event: EventId },

    #[error("trail {slot} out of bounds for {org:?} ({len} slots)")]
    TrailOutOfBounds { org: OrgId, slot: usize, len: usize },

    #[error("organism arena exhausted ({capacity} slots)")]
    ArenaExhausted { capacity: usize },

    #[error("stale organism handle {org:?}")]
    StaleOrganism { org: OrgId },

    #[error("trail {slot} of {org:?} is already armed")]
    AlreadyArmed { org: OrgId, slot: usize },

    #[error("trail {slot} of {org:?} cannot hold a link")]
    SlotInUse { org: OrgId, slot: usize },

    #[error("reserved event id {id:?} cannot be raised")]
    ReservedEvent { id: EventId },

    #[error("{org:?} is not inside the scope of {from:?}")]
    NotInScope { org: OrgId, from: OrgId },

    #[error("`{op}` is not allowed inside a finalizer")]
    ForbiddenInFinalizer { op: &'static str },

    #[error("kernel not started")]
    NotStarted,

    #[error("kernel already started")]
    AlreadyStarted,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no body for label {label:?}")]
    UnknownLabel { label: Label },

    #[error("{id:?} is not an event of this program")]
    UnknownEvent { id: EventId },

    #[error("step limit of {limit} reached")]
    StepLimit { limit: usize },

    #[error("kernel poisoned at {}: {cause}", site_text(.site))]
    Poisoned {
        site: Option<Site>,
        cause: Box<KernelError>,
    },
}

fn site_text(site: &Option<Site>) -> String {
    match site {
        Some(site) => site.to_string(),
        None => "<boot>".into(),
    }
}

impl KernelError {
    /// Short stable label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            KernelError::StackOverflow { .. } => "stack_overflow",
            KernelError::TrailOutOfBounds { .. } => "trail_out_of_bounds",
            KernelError::ArenaExhausted { .. } => "arena_exhausted",
            KernelError::StaleOrganism { .. } => "stale_organism",
            KernelError::AlreadyArmed { .. } => "already_armed",
            KernelError::SlotInUse { .. } => "slot_in_use",
            KernelError::ReservedEvent { .. } => "reserved_event",
            KernelError::NotInScope { .. } => "not_in_scope",
            KernelError::ForbiddenInFinalizer { .. } => "forbidden_in_finalizer",
            KernelError::NotStarted => "not_started",
            KernelError::AlreadyStarted => "already_started",
            KernelError::InvalidConfig(_) => "invalid_config",
            KernelError::UnknownLabel { .. } => "unknown_label",
            KernelError::UnknownEvent { .. } => "unknown_event",
            KernelError::StepLimit { .. } => "step_limit",
            KernelError::Poisoned { .. } => "poisoned",
        }
    }

    /// Capacity and bounds violations. These poison the kernel even when a
    /// body drops the `Err`; anything else only does once it escapes the
    /// body.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KernelError::StackOverflow { .. }
                | KernelError::TrailOutOfBounds { .. }
                | KernelError::ArenaExhausted { .. }
                | KernelError::Poisoned { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::org::Cursor;

    #[test]
    fn test_labels_are_stable() {
        let e = KernelError::StackOverflow {
            max: 4,
            event: EventId::user(0).unwrap(),
        };
        assert_eq!(e.as_label(), "stack_overflow");
        assert!(e.is_fatal());
        assert!(!KernelError::NotStarted.is_fatal());
    }

    #[test]
    fn test_poisoned_message_carries_site() {
        let site = Site {
            cursor: Cursor {
                org: OrgId::ROOT,
                slot: 2,
            },
            label: Label::new(7),
        };
        let e = KernelError::Poisoned {
            site: Some(site),
            cause: Box::new(KernelError::ArenaExhausted { capacity: 1 }),
        };
        let msg = e.to_string();
        assert!(msg.contains("L7"), "{msg}");
        assert!(msg.contains("arena exhausted"), "{msg}");
    }
}
