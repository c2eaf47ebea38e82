//! The abstract MDP interface the solver core runs on: dense state ids,
//! successor distributions and the `Mdp` trait every concrete model
//! (grounded task, explicit model, quotient) implements.

use std::fmt;

use rand::Rng;

use crate::solver::value::is_approx_equal;

/// Dense state identifier handed out by a model's state registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u32);

impl StateId {
    /// Sentinel that is never stored in any table.
    pub const UNDEFINED: StateId = StateId(u32::MAX);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for StateId {
    fn from(i: usize) -> StateId {
        StateId(i as u32)
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of a ground operator within its model. Doubles as the action type
/// of both input models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperatorId(pub usize);

/// Actions that expose a stable numeric identity, for id-based tie-breaking.
pub trait ActionIndex {
    fn action_index(&self) -> usize;
}

impl ActionIndex for OperatorId {
    fn action_index(&self) -> usize {
        self.0
    }
}

/// Ordered list of `(element, probability)` pairs with unique elements and
/// probabilities in `(0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution<T> {
    pairs: Vec<(T, f64)>,
}

impl<T: PartialEq> Distribution<T> {
    pub fn new() -> Distribution<T> {
        Distribution { pairs: Vec::new() }
    }

    pub fn from_pairs(pairs: Vec<(T, f64)>) -> Distribution<T> {
        let mut d = Distribution::new();
        for (t, p) in pairs {
            d.add_probability(t, p);
        }
        d
    }

    /// Adds probability mass, merging with an existing entry for the same
    /// element. Zero-mass entries are dropped.
    pub fn add_probability(&mut self, element: T, p: f64) {
        debug_assert!(!p.is_nan() && p >= 0.0);
        if p <= 0.0 {
            return;
        }
        for (e, q) in self.pairs.iter_mut() {
            if *e == element {
                *q += p;
                return;
            }
        }
        self.pairs.push((element, p));
    }

    pub fn iter(&self) -> std::slice::Iter<(T, f64)> {
        self.pairs.iter()
    }

    pub fn support(&self) -> impl Iterator<Item = &T> {
        self.pairs.iter().map(|(t, _)| t)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn is_dirac(&self) -> bool {
        self.pairs.len() == 1
    }

    pub fn total_mass(&self) -> f64 {
        self.pairs.iter().map(|(_, p)| p).sum()
    }

    pub fn probability_of(&self, element: &T) -> f64 {
        self.pairs
            .iter()
            .find(|(e, _)| e == element)
            .map_or(0.0, |(_, p)| *p)
    }

    /// Samples an element proportionally to its probability.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> &T {
        debug_assert!(!self.pairs.is_empty());
        let total = self.total_mass();
        let mut roll = rng.gen_range(0.0..total);
        for (t, p) in self.pairs.iter() {
            if roll < *p {
                return t;
            }
            roll -= p;
        }
        &self.pairs.last().unwrap().0
    }

    /// Checks that the mass sums to one within `eps`.
    pub fn is_normalized(&self, eps: f64) -> bool {
        is_approx_equal(self.total_mass(), 1.0, eps)
    }
}

impl<'a, T> IntoIterator for &'a Distribution<T> {
    type Item = &'a (T, f64);
    type IntoIter = std::slice::Iter<'a, (T, f64)>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}

/// An action together with its successor distribution.
#[derive(Debug, Clone)]
pub struct Transition<A> {
    pub action: A,
    pub successors: Distribution<StateId>,
}

impl<A> Transition<A> {
    pub fn new(action: A, successors: Distribution<StateId>) -> Transition<A> {
        Transition { action, successors }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TerminationInfo {
    pub is_goal: bool,
    pub non_goal_cost: f64,
}

/// An implicit MDP. Lookups register states lazily, hence the `&mut self`
/// receivers; ids are stable for the lifetime of one solve.
pub trait Mdp {
    type State: Clone;
    type Action: Clone + PartialEq + fmt::Debug;

    /// Registers the state on first contact and returns its id; idempotent.
    fn state_id(&mut self, state: &Self::State) -> StateId;

    /// Inverse of `state_id`.
    fn state(&self, id: StateId) -> Self::State;

    /// Number of states registered so far.
    fn num_states(&self) -> usize;

    fn applicable_actions(&mut self, id: StateId) -> Vec<Self::Action>;

    /// Successor distribution of an applicable action. Successor ids are
    /// registered as a side effect.
    fn transition(&mut self, id: StateId, action: &Self::Action) -> Distribution<StateId>;

    fn all_transitions(&mut self, id: StateId) -> Vec<Transition<Self::Action>> {
        self.applicable_actions(id)
            .into_iter()
            .map(|a| {
                let successors = self.transition(id, &a);
                Transition::new(a, successors)
            })
            .collect()
    }

    fn termination_info(&mut self, id: StateId) -> TerminationInfo;

    /// Non-negative cost of applying `action` in the state.
    fn action_cost(&mut self, id: StateId, action: &Self::Action) -> f64;
}

impl<M: Mdp> Mdp for &mut M {
    type State = M::State;
    type Action = M::Action;

    fn state_id(&mut self, state: &Self::State) -> StateId {
        (**self).state_id(state)
    }

    fn state(&self, id: StateId) -> Self::State {
        (**self).state(id)
    }

    fn num_states(&self) -> usize {
        (**self).num_states()
    }

    fn applicable_actions(&mut self, id: StateId) -> Vec<Self::Action> {
        (**self).applicable_actions(id)
    }

    fn transition(&mut self, id: StateId, action: &Self::Action) -> Distribution<StateId> {
        (**self).transition(id, action)
    }

    fn all_transitions(&mut self, id: StateId) -> Vec<Transition<Self::Action>> {
        (**self).all_transitions(id)
    }

    fn termination_info(&mut self, id: StateId) -> TerminationInfo {
        (**self).termination_info(id)
    }

    fn action_cost(&mut self, id: StateId, action: &Self::Action) -> f64 {
        (**self).action_cost(id, action)
    }
}
