//! The contract between the kernel and the code it dispatches to
//!
//! A compiled program is a root organism shape plus one body per label.
//! Bodies run to completion; everything they do to the tree goes through
//! the [`Reaction`] they are handed.

use crate::error::KernelError;
use crate::org::OrgSpec;
use crate::reaction::Reaction;
use crate::trail::Label;
use std::collections::HashMap;

pub trait Program {
    /// Shape of the root organism. Its first trail runs on `init`.
    fn root(&self) -> OrgSpec;

    /// Run the body for `label`.
    fn run(&mut self, label: Label, rx: &mut Reaction<'_>) -> Result<(), KernelError>;
}

type Body = Box<dyn FnMut(&mut Reaction<'_>) -> Result<(), KernelError>>;

/// A program assembled from closures, one per label.
///
/// ```ignore
/// let program = BodyTable::new(OrgSpec::new(2, 0))
///     .on(0, |rx| rx.await_event(1, KEY, 1u16))
///     .on(1, |rx| {
///         rx.output(LED, Payload::Int(1));
///         Ok(())
///     });
/// ```
pub struct BodyTable {
    root: OrgSpec,
    bodies: HashMap<Label, Body>,
}

impl BodyTable {
    pub fn new(root: OrgSpec) -> Self {
        Self {
            root,
            bodies: HashMap::new(),
        }
    }

    pub fn on<F>(mut self, label: impl Into<Label>, body: F) -> Self
    where
        F: FnMut(&mut Reaction<'_>) -> Result<(), KernelError> + 'static,
    {
        self.insert(label, body);
        self
    }

    pub fn insert<F>(&mut self, label: impl Into<Label>, body: F)
    where
        F: FnMut(&mut Reaction<'_>) -> Result<(), KernelError> + 'static,
    {
        self.bodies.insert(label.into(), Box::new(body));
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

impl Program for BodyTable {
    fn root(&self) -> OrgSpec {
        self.root.clone()
    }

    fn run(&mut self, label: Label, rx: &mut Reaction<'_>) -> Result<(), KernelError> {
        match self.bodies.get_mut(&label) {
            Some(body) => body(rx),
            None => Err(KernelError::UnknownLabel { label }),
        }
    }
}
