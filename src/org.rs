//! Organisms and the arena that links them into one traversal order
//!
//! Every organism owns a fixed run of trail slots. A nested organism is
//! spliced into its parent at a down-link slot and carries one extra tail
//! slot of its own: an up-link back to the parent (resuming one past the
//! down-link) or, when several organisms hang off the same parent slot, a
//! down-link to the next sibling. Walking slots and following those links
//! visits the whole tree in pre-order without recursion.

use crate::error::KernelError;
use crate::event::EventId;
use crate::trail::{Gate, Label, Link, Trail};
use std::fmt;
use std::ops::Range;

/// Generational handle into the organism arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrgId {
    index: u16,
    generation: u32,
}

impl OrgId {
    pub const ROOT: OrgId = OrgId {
        index: 0,
        generation: 0,
    };

    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Debug for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("Org(root)")
        } else {
            write!(f, "Org({}v{})", self.index, self.generation)
        }
    }
}

/// Class tag a program attaches to organisms of the same kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClassId(pub u16);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrgKind {
    /// Declared in the program text. Retained after termination so it can
    /// be restarted; released together with its parent.
    Static,
    /// Created on demand.
    Dynamic { free_on_exit: bool },
}

impl OrgKind {
    pub fn free_on_exit(self) -> bool {
        matches!(self, OrgKind::Dynamic { free_on_exit: true })
    }
}

/// Shape of an organism to install.
#[derive(Clone, Debug)]
pub struct OrgSpec {
    trails: usize,
    entry: Label,
    class: Option<ClassId>,
    kind: OrgKind,
}

impl OrgSpec {
    /// An organism with `trails` program slots whose first slot starts at
    /// `entry`.
    pub fn new(trails: usize, entry: impl Into<Label>) -> Self {
        Self {
            trails,
            entry: entry.into(),
            class: None,
            kind: OrgKind::Static,
        }
    }

    pub fn class(mut self, class: ClassId) -> Self {
        self.class = Some(class);
        self
    }

    pub fn dynamic(mut self, free_on_exit: bool) -> Self {
        self.kind = OrgKind::Dynamic { free_on_exit };
        self
    }

    pub fn trails(&self) -> usize {
        self.trails
    }

    pub fn entry(&self) -> Label {
        self.entry
    }

    pub fn kind(&self) -> OrgKind {
        self.kind
    }
}

/// Position of the traversal: an organism and one of its slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    pub org: OrgId,
    pub slot: usize,
}

impl Cursor {
    pub fn new(org: OrgId, slot: usize) -> Self {
        Self { org, slot }
    }
}

/// Where a body ran; kept for fatal diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Site {
    pub cursor: Cursor,
    pub label: Label,
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} slot {} {:?}",
            self.cursor.org, self.cursor.slot, self.label
        )
    }
}

#[derive(Debug)]
pub struct Organism {
    trails: Vec<Trail>,
    parent: Option<Cursor>,
    class: Option<ClassId>,
    kind: OrgKind,
    entry: Label,
    linked: bool,
}

impl Organism {
    fn new(spec: &OrgSpec, parent: Option<Cursor>) -> Self {
        let tail = usize::from(parent.is_some());
        let mut org = Self {
            trails: vec![Trail::default(); spec.trails + tail],
            parent,
            class: spec.class,
            kind: spec.kind,
            entry: spec.entry,
            linked: false,
        };
        org.reset();
        org
    }

    /// Entry trail armed on the wildcard, everything else inert, tail
    /// pointing back at the parent.
    fn reset(&mut self) {
        self.trails.fill(Trail::default());
        self.trails[0].arm(EventId::ANY, self.entry, Gate::Any);
        if let (Some(parent), Some(tail)) = (self.parent, self.tail()) {
            self.trails[tail].set_link(
                EventId::ORG_UP,
                Link::Parent {
                    org: parent.org,
                    resume: parent.slot + 1,
                },
            );
        }
    }

    /// Number of slots bodies may use.
    pub fn user_len(&self) -> usize {
        match self.parent {
            Some(_) => self.trails.len() - 1,
            None => self.trails.len(),
        }
    }

    pub(crate) fn tail(&self) -> Option<usize> {
        self.parent.map(|_| self.trails.len() - 1)
    }

    pub fn trails(&self) -> &[Trail] {
        &self.trails
    }

    /// Parent slot this organism hangs off; `None` for the root.
    pub fn parent(&self) -> Option<Cursor> {
        self.parent
    }

    pub fn class(&self) -> Option<ClassId> {
        self.class
    }

    pub fn kind(&self) -> OrgKind {
        self.kind
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

/// What a clear walk left behind for the dispatcher.
#[derive(Debug, Default)]
pub(crate) struct ClearLog {
    /// Finalizers passed by the walk, in traversal order.
    pub finalizers: Vec<Site>,
    /// Organisms the walk left, in traversal order.
    pub unlinked: Vec<OrgId>,
    /// Unlinked organisms that must go back to the arena.
    pub releases: Vec<OrgId>,
}

impl ClearLog {
    pub fn absorb(&mut self, other: ClearLog) {
        self.finalizers.extend(other.finalizers);
        self.unlinked.extend(other.unlinked);
        self.releases.extend(other.releases);
    }
}

struct Entry {
    generation: u32,
    org: Option<Organism>,
}

/// Fixed-capacity arena holding the root and every nested organism.
pub(crate) struct Tree {
    entries: Vec<Entry>,
    free: Vec<u16>,
    capacity: usize,
}

impl Tree {
    /// `capacity` counts nested organisms; the root always has its own
    /// entry.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity + 1),
            free: Vec::new(),
            capacity,
        }
    }

    pub fn install_root(&mut self, spec: &OrgSpec) -> Result<OrgId, KernelError> {
        if spec.trails == 0 {
            return Err(KernelError::InvalidConfig(
                "root organism needs at least one trail".into(),
            ));
        }
        if !self.entries.is_empty() {
            return Err(KernelError::AlreadyStarted);
        }
        let mut root = Organism::new(spec, None);
        root.linked = true;
        self.entries.push(Entry {
            generation: 0,
            org: Some(root),
        });
        Ok(OrgId::ROOT)
    }

    pub fn get(&self, id: OrgId) -> Result<&Organism, KernelError> {
        self.entries
            .get(id.index())
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.org.as_ref())
            .ok_or(KernelError::StaleOrganism { org: id })
    }

    pub fn get_mut(&mut self, id: OrgId) -> Result<&mut Organism, KernelError> {
        self.entries
            .get_mut(id.index())
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.org.as_mut())
            .ok_or(KernelError::StaleOrganism { org: id })
    }

    pub fn contains(&self, id: OrgId) -> bool {
        self.get(id).is_ok()
    }

    /// Nested organisms currently held by the arena.
    pub fn live(&self) -> usize {
        self.entries
            .iter()
            .skip(1)
            .filter(|e| e.org.is_some())
            .count()
    }

    pub fn trail(&self, at: Cursor) -> Result<&Trail, KernelError> {
        let org = self.get(at.org)?;
        org.trails.get(at.slot).ok_or(KernelError::TrailOutOfBounds {
            org: at.org,
            slot: at.slot,
            len: org.trails.len(),
        })
    }

    pub fn trail_mut(&mut self, at: Cursor) -> Result<&mut Trail, KernelError> {
        let org = self.get_mut(at.org)?;
        let len = org.trails.len();
        org.trails.get_mut(at.slot).ok_or(KernelError::TrailOutOfBounds {
            org: at.org,
            slot: at.slot,
            len,
        })
    }

    /// A program slot of `org`; tails are not addressable by bodies.
    pub fn user_trail_mut(&mut self, at: Cursor) -> Result<&mut Trail, KernelError> {
        let len = self.get(at.org)?.user_len();
        if at.slot >= len {
            return Err(KernelError::TrailOutOfBounds {
                org: at.org,
                slot: at.slot,
                len,
            });
        }
        self.trail_mut(at)
    }

    fn check_range(&self, org: OrgId, range: &Range<usize>) -> Result<(), KernelError> {
        let len = self.get(org)?.user_len();
        if range.start > range.end || range.end > len {
            return Err(KernelError::TrailOutOfBounds {
                org,
                slot: range.end.max(range.start),
                len,
            });
        }
        Ok(())
    }

    pub fn root_len(&self) -> usize {
        self.entries
            .first()
            .and_then(|e| e.org.as_ref())
            .map_or(0, |o| o.trails.len())
    }

    /// No root slot is armed or linked.
    pub fn root_idle(&self) -> bool {
        self.get(OrgId::ROOT)
            .map(|root| root.trails.iter().all(Trail::is_inert))
            .unwrap_or(true)
    }

    /// `ancestor` encloses `org` (strictly).
    pub fn is_ancestor(&self, ancestor: OrgId, org: OrgId) -> bool {
        let mut current = org;
        while let Ok(o) = self.get(current) {
            match o.parent {
                Some(p) if p.org == ancestor => return true,
                Some(p) => current = p.org,
                None => return false,
            }
        }
        false
    }

    // ========================================================================
    // Linking
    // ========================================================================

    /// Allocate an organism and splice it under `parent`.
    pub fn spawn(&mut self, spec: &OrgSpec, parent: Cursor) -> Result<OrgId, KernelError> {
        if spec.trails == 0 {
            return Err(KernelError::InvalidConfig(
                "organism needs at least one trail".into(),
            ));
        }
        self.user_trail_mut(parent)?;
        let splice = self.find_splice(parent)?;

        let index = match self.free.pop() {
            Some(index) => index,
            None if self.entries.len() <= self.capacity => {
                let index = u16::try_from(self.entries.len()).map_err(|_| {
                    KernelError::ArenaExhausted {
                        capacity: self.capacity,
                    }
                })?;
                self.entries.push(Entry {
                    generation: 0,
                    org: None,
                });
                index
            }
            None => {
                return Err(KernelError::ArenaExhausted {
                    capacity: self.capacity,
                })
            }
        };
        let entry = &mut self.entries[index as usize];
        let id = OrgId {
            index,
            generation: entry.generation,
        };
        entry.org = Some(Organism::new(spec, Some(parent)));
        self.splice_in(splice, id)?;
        Ok(id)
    }

    /// Re-initialise a retained organism and splice it back under the slot
    /// it was created at. Organisms created by its previous run are released.
    pub fn restart(&mut self, id: OrgId) -> Result<(), KernelError> {
        let org = self.get(id)?;
        let parent = match org.parent {
            Some(p) if !org.linked => p,
            Some(_) => return Err(KernelError::AlreadyArmed { org: id, slot: 0 }),
            None => return Err(KernelError::AlreadyStarted),
        };
        for child in self.children_of(id) {
            self.release(child)?;
        }
        self.get_mut(id)?.reset();
        let splice = self.find_splice(parent)?;
        self.splice_in(splice, id)
    }

    /// Organisms whose parent slot belongs to `id`.
    fn children_of(&self, id: OrgId) -> Vec<OrgId> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.org
                    .as_ref()
                    .and_then(|o| o.parent)
                    .is_some_and(|p| p.org == id)
            })
            .map(|(index, e)| OrgId {
                index: index as u16,
                generation: e.generation,
            })
            .collect()
    }

    /// Slot where a new organism under `parent` gets linked: the parent
    /// slot itself when empty, otherwise the tail of the last sibling.
    fn find_splice(&self, parent: Cursor) -> Result<Cursor, KernelError> {
        let mut at = parent;
        loop {
            let trail = self.trail(at)?;
            match (trail.event, trail.link) {
                (EventId::NONE, _) => return Ok(at),
                (EventId::ORG_UP, Link::Parent { org, .. }) if org == parent.org => {
                    return Ok(at)
                }
                (EventId::ORG_DOWN | EventId::ORG_DOWN_PAUSED, Link::Child(next)) => {
                    let tail = self.get(next)?.tail().ok_or(KernelError::SlotInUse {
                        org: at.org,
                        slot: at.slot,
                    })?;
                    at = Cursor::new(next, tail);
                }
                _ => {
                    return Err(KernelError::SlotInUse {
                        org: parent.org,
                        slot: parent.slot,
                    })
                }
            }
        }
    }

    fn splice_in(&mut self, at: Cursor, id: OrgId) -> Result<(), KernelError> {
        // an up-link found here already lives on in the newcomer's tail
        self.trail_mut(at)?
            .set_link(EventId::ORG_DOWN, Link::Child(id));
        self.get_mut(id)?.linked = true;
        Ok(())
    }

    /// Take `id` out of its parent chain. Returns where traversal continues
    /// in place of the removed organism.
    pub fn unlink(&mut self, id: OrgId) -> Result<Cursor, KernelError> {
        let org = self.get(id)?;
        let (parent, tail) = match (org.parent, org.tail()) {
            (Some(p), Some(t)) if org.linked => (p, t),
            _ => return Err(KernelError::StaleOrganism { org: id }),
        };
        let tail_trail = org.trails[tail];

        let mut pred = parent;
        loop {
            let trail = self.trail(pred)?;
            match (trail.event, trail.link) {
                (EventId::ORG_DOWN | EventId::ORG_DOWN_PAUSED, Link::Child(next)) if next == id => {
                    break
                }
                (EventId::ORG_DOWN | EventId::ORG_DOWN_PAUSED, Link::Child(next)) => {
                    let t = self.get(next)?.tail().ok_or(KernelError::StaleOrganism { org: id })?;
                    pred = Cursor::new(next, t);
                }
                _ => return Err(KernelError::StaleOrganism { org: id }),
            }
        }

        let successor = match tail_trail.link {
            Link::Child(next) => {
                self.trail_mut(pred)?.link = Link::Child(next);
                Cursor::new(next, 0)
            }
            Link::Parent { org, resume } => {
                let trail = self.trail_mut(pred)?;
                if pred == parent {
                    trail.unlink();
                } else {
                    trail.set_link(EventId::ORG_UP, tail_trail.link);
                }
                Cursor::new(org, resume)
            }
            Link::None => return Err(KernelError::StaleOrganism { org: id }),
        };

        let org = self.get_mut(id)?;
        org.trails[tail].unlink();
        org.linked = false;
        Ok(successor)
    }

    /// Return `id` and every organism created under it to the arena.
    pub fn release(&mut self, id: OrgId) -> Result<(), KernelError> {
        if id.is_root() {
            return Err(KernelError::NotInScope {
                org: id,
                from: id,
            });
        }
        self.get(id)?;
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(entry) = self.entries.get_mut(id.index()) else {
                continue;
            };
            if entry.generation != id.generation || entry.org.take().is_none() {
                continue;
            }
            entry.generation = entry.generation.wrapping_add(1);
            self.free.push(id.index);
            pending.extend(self.children_of(id));
        }
        Ok(())
    }

    // ========================================================================
    // Range walks
    // ========================================================================

    /// Clear `range` of `scope` in traversal order, descending into nested
    /// organisms (paused or not) and leaving every slot inert.
    pub fn clear_range(&mut self, scope: OrgId, range: Range<usize>) -> Result<ClearLog, KernelError> {
        self.check_range(scope, &range)?;
        let mut log = ClearLog::default();
        let mut at = Cursor::new(scope, range.start);

        loop {
            if at.org == scope && at.slot >= range.end {
                return Ok(log);
            }
            let org = self.get(at.org)?;
            let leaving = org.tail() == Some(at.slot);
            let free_on_exit = org.kind.free_on_exit();
            let trail = self.trail_mut(at)?;

            if leaving {
                let link = trail.link;
                trail.unlink();
                self.get_mut(at.org)?.linked = false;
                log.unlinked.push(at.org);
                if free_on_exit {
                    log.releases.push(at.org);
                }
                at = match link {
                    Link::Child(next) => Cursor::new(next, 0),
                    Link::Parent { org, resume } => Cursor::new(org, resume),
                    Link::None => {
                        return Err(KernelError::StaleOrganism { org: at.org })
                    }
                };
                continue;
            }

            match (trail.event, trail.link) {
                (EventId::ORG_DOWN | EventId::ORG_DOWN_PAUSED, Link::Child(child)) => {
                    trail.unlink();
                    at = Cursor::new(child, 0);
                    continue;
                }
                (EventId::CLEAR, _) => {
                    log.finalizers.push(Site {
                        cursor: at,
                        label: trail.label,
                    });
                    trail.clear();
                }
                _ => trail.clear(),
            }
            at.slot += 1;
        }
    }

    /// Pause or resume the down-links inside `range` of `org`. Returns the
    /// first organism of every chain that was resumed.
    pub fn pause_range(
        &mut self,
        org: OrgId,
        range: Range<usize>,
        paused: bool,
    ) -> Result<Vec<OrgId>, KernelError> {
        self.check_range(org, &range)?;
        let mut resumed = Vec::new();
        for slot in range {
            let trail = self.trail_mut(Cursor::new(org, slot))?;
            match (trail.event, paused) {
                (EventId::ORG_DOWN, true) => trail.event = EventId::ORG_DOWN_PAUSED,
                (EventId::ORG_DOWN_PAUSED, false) => {
                    trail.event = EventId::ORG_DOWN;
                    if let Link::Child(child) = trail.link {
                        resumed.push(child);
                    }
                }
                _ => {}
            }
        }
        Ok(resumed)
    }

    /// Remaining time of every armed timer reachable from `first`, skipping
    /// subtrees that are still paused. Stops when the chain climbs back
    /// into `parent`.
    pub fn active_timers(&self, first: OrgId, parent: OrgId) -> Result<Vec<i32>, KernelError> {
        let mut timers = Vec::new();
        let mut at = Cursor::new(first, 0);
        loop {
            let trail = self.trail(at)?;
            match (trail.event, trail.link) {
                (EventId::ORG_DOWN, Link::Child(child)) => {
                    at = Cursor::new(child, 0);
                    continue;
                }
                (EventId::ORG_UP, Link::Parent { org, resume }) => {
                    if org == parent {
                        return Ok(timers);
                    }
                    at = Cursor::new(org, resume);
                    continue;
                }
                (EventId::WCLOCK, _) => timers.push(trail.timer),
                _ => {}
            }
            at.slot += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_root(trails: usize) -> Tree {
        let mut tree = Tree::new(8);
        tree.install_root(&OrgSpec::new(trails, Label::new(0))).unwrap();
        tree
    }

    /// Visit order of (org, slot) as a plain pass would walk it.
    fn walk(tree: &Tree) -> Vec<(OrgId, usize)> {
        let mut seen = Vec::new();
        let mut at = Cursor::new(OrgId::ROOT, 0);
        while !(at.org == OrgId::ROOT && at.slot >= tree.root_len()) {
            let trail = tree.trail(at).unwrap();
            match (trail.event, trail.link) {
                (EventId::ORG_DOWN, Link::Child(c)) => {
                    at = Cursor::new(c, 0);
                    continue;
                }
                (EventId::ORG_UP, Link::Parent { org, resume }) => {
                    at = Cursor::new(org, resume);
                    continue;
                }
                (EventId::ORG_DOWN_PAUSED, _) => {}
                _ => seen.push((at.org, at.slot)),
            }
            at.slot += 1;
        }
        seen
    }

    #[test]
    fn test_root_entry_armed_on_wildcard() {
        let tree = tree_with_root(3);
        let root = tree.get(OrgId::ROOT).unwrap();
        assert_eq!(root.user_len(), 3);
        assert_eq!(root.trails()[0].event(), EventId::ANY);
        assert_eq!(root.trails()[0].gate(), Gate::Any);
        assert!(root.trails()[1].is_inert());
        assert!(!tree.root_idle());
    }

    #[test]
    fn test_spawn_links_down_and_up() {
        let mut tree = tree_with_root(3);
        let child = tree
            .spawn(&OrgSpec::new(2, Label::new(5)), Cursor::new(OrgId::ROOT, 1))
            .unwrap();

        let down = tree.trail(Cursor::new(OrgId::ROOT, 1)).unwrap();
        assert_eq!(down.event(), EventId::ORG_DOWN);
        assert_eq!(down.link, Link::Child(child));

        let org = tree.get(child).unwrap();
        assert_eq!(org.user_len(), 2);
        assert_eq!(org.trails().len(), 3);
        assert_eq!(
            org.trails()[2].link,
            Link::Parent {
                org: OrgId::ROOT,
                resume: 2
            }
        );
        assert!(org.is_linked());

        assert_eq!(
            walk(&tree),
            vec![
                (OrgId::ROOT, 0),
                (child, 0),
                (child, 1),
                (OrgId::ROOT, 2)
            ]
        );
    }

    #[test]
    fn test_siblings_chain_in_creation_order() {
        let mut tree = tree_with_root(2);
        let at = Cursor::new(OrgId::ROOT, 1);
        let a = tree.spawn(&OrgSpec::new(1, Label::new(1)), at).unwrap();
        let b = tree.spawn(&OrgSpec::new(1, Label::new(1)), at).unwrap();
        let c = tree.spawn(&OrgSpec::new(1, Label::new(1)), at).unwrap();

        assert_eq!(
            walk(&tree),
            vec![(OrgId::ROOT, 0), (a, 0), (b, 0), (c, 0)]
        );

        // unlink the middle one: a's tail now points at c
        let next = tree.unlink(b).unwrap();
        assert_eq!(next, Cursor::new(c, 0));
        assert_eq!(walk(&tree), vec![(OrgId::ROOT, 0), (a, 0), (c, 0)]);

        // unlink the last: a's tail climbs back up
        let next = tree.unlink(c).unwrap();
        assert_eq!(next, Cursor::new(OrgId::ROOT, 2));
        assert_eq!(walk(&tree), vec![(OrgId::ROOT, 0), (a, 0)]);

        // unlink the only one: parent slot goes inert
        tree.unlink(a).unwrap();
        assert!(tree.trail(at).unwrap().is_inert());
        assert_eq!(walk(&tree), vec![(OrgId::ROOT, 0), (OrgId::ROOT, 1)]);
    }

    #[test]
    fn test_spawn_on_armed_slot_is_rejected() {
        let mut tree = tree_with_root(2);
        let err = tree
            .spawn(&OrgSpec::new(1, Label::new(1)), Cursor::new(OrgId::ROOT, 0))
            .unwrap_err();
        assert_eq!(
            err,
            KernelError::SlotInUse {
                org: OrgId::ROOT,
                slot: 0
            }
        );
    }

    #[test]
    fn test_arena_capacity_and_generations() {
        let mut tree = Tree::new(1);
        tree.install_root(&OrgSpec::new(2, Label::new(0))).unwrap();
        let at = Cursor::new(OrgId::ROOT, 1);
        let a = tree.spawn(&OrgSpec::new(1, Label::new(1)).dynamic(true), at).unwrap();
        let err = tree.spawn(&OrgSpec::new(1, Label::new(1)), at).unwrap_err();
        assert_eq!(err, KernelError::ArenaExhausted { capacity: 1 });

        tree.unlink(a).unwrap();
        tree.release(a).unwrap();
        assert!(!tree.contains(a));
        assert_eq!(tree.get(a).unwrap_err(), KernelError::StaleOrganism { org: a });

        let b = tree.spawn(&OrgSpec::new(1, Label::new(1)), at).unwrap();
        assert_eq!(b.index(), a.index());
        assert_ne!(b.generation(), a.generation());
        assert_eq!(tree.live(), 1);
    }

    #[test]
    fn test_clear_descends_and_stops_at_end() {
        let mut tree = tree_with_root(4);
        let child = tree
            .spawn(
                &OrgSpec::new(2, Label::new(1)).dynamic(true),
                Cursor::new(OrgId::ROOT, 1),
            )
            .unwrap();
        let grandchild = tree
            .spawn(&OrgSpec::new(1, Label::new(2)), Cursor::new(child, 1))
            .unwrap();
        tree.trail_mut(Cursor::new(OrgId::ROOT, 3))
            .unwrap()
            .arm(EventId::ANY, Label::new(9), Gate::Any);
        tree.trail_mut(Cursor::new(child, 0))
            .unwrap()
            .arm(EventId::CLEAR, Label::new(7), Gate::Any);

        let log = tree.clear_range(OrgId::ROOT, 1..3).unwrap();

        assert_eq!(log.unlinked, vec![grandchild, child]);
        assert_eq!(log.releases, vec![child]);
        assert_eq!(log.finalizers.len(), 1);
        assert_eq!(log.finalizers[0].label, Label::new(7));
        assert!(tree.trail(Cursor::new(OrgId::ROOT, 1)).unwrap().is_inert());
        // slot 3 lies past the end of the range
        assert!(tree.trail(Cursor::new(OrgId::ROOT, 3)).unwrap().is_armed());
        assert!(!tree.get(child).unwrap().is_linked());
    }

    #[test]
    fn test_pause_skips_subtree_and_resume_finds_timers() {
        let mut tree = tree_with_root(2);
        let child = tree
            .spawn(&OrgSpec::new(2, Label::new(1)), Cursor::new(OrgId::ROOT, 1))
            .unwrap();
        let t = tree.trail_mut(Cursor::new(child, 1)).unwrap();
        t.arm(EventId::WCLOCK, Label::new(3), Gate::Any);
        t.timer = 250;

        let resumed = tree.pause_range(OrgId::ROOT, 0..2, true).unwrap();
        assert!(resumed.is_empty());
        assert_eq!(walk(&tree), vec![(OrgId::ROOT, 0)]);

        let resumed = tree.pause_range(OrgId::ROOT, 0..2, false).unwrap();
        assert_eq!(resumed, vec![child]);
        assert_eq!(tree.active_timers(child, OrgId::ROOT).unwrap(), vec![250]);
        assert_eq!(walk(&tree).len(), 3);
    }

    #[test]
    fn test_release_takes_retained_children_along() {
        let mut tree = tree_with_root(2);
        let parent = tree
            .spawn(
                &OrgSpec::new(2, Label::new(1)).dynamic(false),
                Cursor::new(OrgId::ROOT, 1),
            )
            .unwrap();
        let inner = tree
            .spawn(&OrgSpec::new(1, Label::new(2)), Cursor::new(parent, 1))
            .unwrap();
        tree.clear_range(parent, 0..2).unwrap();
        assert!(tree.contains(inner));

        tree.unlink(parent).unwrap();
        tree.release(parent).unwrap();
        assert!(!tree.contains(parent));
        assert!(!tree.contains(inner));
        assert_eq!(tree.live(), 0);
    }

    #[test]
    fn test_restart_relinks_under_recorded_slot() {
        let mut tree = tree_with_root(2);
        let org = tree
            .spawn(&OrgSpec::new(1, Label::new(4)), Cursor::new(OrgId::ROOT, 1))
            .unwrap();
        tree.unlink(org).unwrap();
        assert!(tree.trail(Cursor::new(OrgId::ROOT, 1)).unwrap().is_inert());

        tree.restart(org).unwrap();
        assert!(tree.get(org).unwrap().is_linked());
        assert_eq!(tree.get(org).unwrap().trails()[0].event(), EventId::ANY);
        assert_eq!(
            tree.trail(Cursor::new(OrgId::ROOT, 1)).unwrap().link,
            Link::Child(org)
        );
        assert!(matches!(
            tree.restart(org),
            Err(KernelError::AlreadyArmed { .. })
        ));
    }

    #[test]
    fn test_restart_releases_previous_children() {
        let mut tree = tree_with_root(2);
        let org = tree
            .spawn(&OrgSpec::new(2, Label::new(1)), Cursor::new(OrgId::ROOT, 1))
            .unwrap();
        let inner = tree
            .spawn(&OrgSpec::new(1, Label::new(2)), Cursor::new(org, 1))
            .unwrap();
        let log = tree.clear_range(org, 0..2).unwrap();
        assert_eq!(log.unlinked, vec![inner]);
        tree.unlink(org).unwrap();
        assert_eq!(tree.live(), 2);

        tree.restart(org).unwrap();
        assert!(tree.contains(org));
        assert!(!tree.contains(inner));
        assert_eq!(tree.live(), 1);
        assert!(tree.get(org).unwrap().trails()[1].is_inert());
    }

    #[test]
    fn test_ancestry() {
        let mut tree = tree_with_root(2);
        let a = tree
            .spawn(&OrgSpec::new(2, Label::new(1)), Cursor::new(OrgId::ROOT, 1))
            .unwrap();
        let b = tree
            .spawn(&OrgSpec::new(1, Label::new(1)), Cursor::new(a, 1))
            .unwrap();
        assert!(tree.is_ancestor(OrgId::ROOT, b));
        assert!(tree.is_ancestor(a, b));
        assert!(!tree.is_ancestor(b, a));
        assert!(!tree.is_ancestor(b, b));
    }
}
