//! Per-state storage: a segmented vector whose entries never move once
//! created, and the `StateInfo` record every engine shares.

use crate::solver::mdp::StateId;
use crate::solver::value::EngineValue;

const BASE_SEGMENT: usize = 512;

/// Dense vector growing by segment appends. Segment `k` holds
/// `BASE_SEGMENT << k` entries, so growth never relocates existing entries
/// and the total number of segments stays logarithmic.
#[derive(Debug)]
pub struct SegmentedVec<T> {
    segments: Vec<Vec<T>>,
    len: usize,
}

impl<T> SegmentedVec<T> {
    pub fn new() -> SegmentedVec<T> {
        SegmentedVec {
            segments: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn locate(index: usize) -> (usize, usize) {
        let block = index / BASE_SEGMENT + 1;
        let seg = (usize::BITS - 1 - block.leading_zeros()) as usize;
        let offset = index - BASE_SEGMENT * ((1 << seg) - 1);
        (seg, offset)
    }

    pub fn push(&mut self, value: T) {
        let (seg, _) = Self::locate(self.len);
        if seg == self.segments.len() {
            self.segments.push(Vec::with_capacity(BASE_SEGMENT << seg));
        }
        self.segments[seg].push(value);
        self.len += 1;
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        let (seg, off) = Self::locate(index);
        Some(&self.segments[seg][off])
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.len {
            return None;
        }
        let (seg, off) = Self::locate(index);
        Some(&mut self.segments[seg][off])
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.segments.iter().flat_map(|s| s.iter())
    }
}

impl<T: Default> SegmentedVec<T> {
    /// Grows with default entries until `index` is valid.
    pub fn ensure(&mut self, index: usize) -> &mut T {
        while self.len <= index {
            self.push(T::default());
        }
        self.get_mut(index).unwrap()
    }
}

/// `SegmentedVec` keyed by `StateId`, absent entries read as default.
#[derive(Debug)]
pub struct PerStateStorage<T> {
    entries: SegmentedVec<T>,
}

impl<T: Default + Clone> PerStateStorage<T> {
    pub fn new() -> PerStateStorage<T> {
        PerStateStorage {
            entries: SegmentedVec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&mut self, id: StateId) -> &mut T {
        self.entries.ensure(id.index())
    }

    pub fn get(&self, id: StateId) -> Option<&T> {
        self.entries.get(id.index())
    }

    pub fn value_or_default(&self, id: StateId) -> T {
        self.get(id).cloned().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries = SegmentedVec::new();
    }
}

// Status tag layout, three bits plus a scratch mark bit used by the
// AO-family engines for successor deduplication.
const STATUS_MASK: u8 = 7;
const INITIALIZED: u8 = 1;
const DEAD: u8 = 2;
const GOAL: u8 = 4;
const FRINGE: u8 = 5;
const MARK: u8 = 8;
const BACKED_UP: u8 = 16;

/// Record kept for every discovered state: current value, lifecycle tag,
/// termination cost, and the greedy action when the solve stores a policy.
#[derive(Debug, Clone)]
pub struct StateInfo<V, A> {
    pub value: V,
    flags: u8,
    pub termination_cost: f64,
    policy: Option<A>,
}

impl<V: EngineValue, A> Default for StateInfo<V, A> {
    fn default() -> StateInfo<V, A> {
        StateInfo {
            value: V::from_value(0.0),
            flags: 0,
            termination_cost: 0.0,
            policy: None,
        }
    }
}

impl<V: EngineValue, A: Clone + PartialEq> StateInfo<V, A> {
    pub fn is_value_initialized(&self) -> bool {
        self.flags & STATUS_MASK != 0
    }

    pub fn is_dead_end(&self) -> bool {
        self.flags & STATUS_MASK == DEAD
    }

    pub fn is_goal(&self) -> bool {
        self.flags & STATUS_MASK == GOAL
    }

    pub fn is_terminal(&self) -> bool {
        self.is_dead_end() || self.is_goal()
    }

    pub fn is_on_fringe(&self) -> bool {
        self.flags & STATUS_MASK == FRINGE
    }

    pub fn set_goal(&mut self) {
        debug_assert!(!self.is_value_initialized());
        self.flags = (self.flags & !STATUS_MASK) | GOAL;
    }

    pub fn set_on_fringe(&mut self) {
        debug_assert!(!self.is_value_initialized());
        self.flags = (self.flags & !STATUS_MASK) | FRINGE;
    }

    /// Permanent: a dead end never leaves that status again.
    pub fn set_dead_end(&mut self) {
        debug_assert!(!self.is_goal() && !self.is_dead_end());
        self.flags = (self.flags & !STATUS_MASK) | DEAD;
        self.policy = None;
    }

    pub fn removed_from_fringe(&mut self) {
        debug_assert!(self.is_value_initialized() && !self.is_terminal());
        self.flags = (self.flags & !STATUS_MASK) | INITIALIZED;
    }

    pub fn mark(&mut self) {
        self.flags |= MARK;
    }

    pub fn unmark(&mut self) {
        self.flags &= !MARK;
    }

    pub fn is_marked(&self) -> bool {
        self.flags & MARK != 0
    }

    /// First-backup flag, for the distinct backed-up-states counter.
    pub fn note_backed_up(&mut self) -> bool {
        let first = self.flags & BACKED_UP == 0;
        self.flags |= BACKED_UP;
        first
    }

    pub fn get_policy(&self) -> Option<&A> {
        self.policy.as_ref()
    }

    pub fn clear_policy(&mut self) {
        self.policy = None;
    }

    /// Stores the action and reports whether it differs from the previous one.
    pub fn update_policy(&mut self, action: A) -> bool {
        if self.policy.as_ref() == Some(&action) {
            return false;
        }
        self.policy = Some(action);
        true
    }
}
