//! Quotient MDP: presents a partition of another MDP's states as a single
//! collapsed state space. Engines run on it exactly as on the base MDP.
//!
//! Representation: one integer per underlying state. The high bit flags
//! membership in a non-trivial class, the low bits hold the representative
//! id. Classes can be built incrementally on top of earlier ones, which is
//! what FRET does round after round.

use std::collections::HashMap;
use std::fmt;

use crate::solver::mdp::{ActionIndex, Distribution, Mdp, StateId, TerminationInfo};

const FLAG: u32 = 1 << 31;
const MASK: u32 = FLAG - 1;

/// A base-level action addressed through the member state it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotientAction<A> {
    pub state_id: StateId,
    pub action: A,
}

impl<A: ActionIndex> ActionIndex for QuotientAction<A> {
    fn action_index(&self) -> usize {
        self.action.action_index()
    }
}

impl<A: fmt::Display> fmt::Display for QuotientAction<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.action)
    }
}

#[derive(Debug, Clone)]
struct MemberEntry<A> {
    state_id: StateId,
    outer: Vec<A>,
    inner: Vec<A>,
}

/// Member list of one non-trivial class, keyed by the representative id.
#[derive(Debug, Clone)]
struct QuotientInformation<A> {
    members: Vec<MemberEntry<A>>,
}

pub struct QuotientMdp<M: Mdp> {
    base: M,
    quotient_ids: Vec<u32>,
    classes: HashMap<u32, QuotientInformation<M::Action>>,
}

impl<M: Mdp> QuotientMdp<M> {
    pub fn new(base: M) -> QuotientMdp<M> {
        QuotientMdp {
            base,
            quotient_ids: Vec::new(),
            classes: HashMap::new(),
        }
    }

    pub fn base(&self) -> &M {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut M {
        &mut self.base
    }

    pub fn into_inner(self) -> M {
        self.base
    }

    /// Maps a base (or stale quotient) id to its current class
    /// representative. Ids outside the table are their own representatives.
    pub fn translate(&self, id: StateId) -> StateId {
        match self.quotient_ids.get(id.index()) {
            Some(q) => StateId(q & MASK),
            None => id,
        }
    }

    pub fn is_class_representative(&self, id: StateId) -> bool {
        self.classes.contains_key(&id.0)
    }

    /// Base-level members of the class of `id` (just `id` when trivial).
    pub fn members_of(&self, id: StateId) -> Vec<StateId> {
        match self.classes.get(&self.translate(id).0) {
            Some(info) => info.members.iter().map(|m| m.state_id).collect(),
            None => vec![id],
        }
    }

    fn ensure_ids(&mut self, upto: usize) {
        while self.quotient_ids.len() < upto {
            self.quotient_ids.push(self.quotient_ids.len() as u32);
        }
    }

    /// Collapses `members` (current quotient-level ids) into one class
    /// represented by `repr`. `inner` lists, per base member state, the
    /// base actions pruned from planning; every other action of the member
    /// stays outer. Existing classes among the members are merged.
    pub fn build_quotient(
        &mut self,
        members: &[StateId],
        repr: StateId,
        inner: &[(StateId, Vec<M::Action>)],
    ) {
        debug_assert!(members.contains(&repr));
        let inner_of = |state: StateId| -> Vec<M::Action> {
            inner
                .iter()
                .find(|(s, _)| *s == state)
                .map(|(_, a)| a.clone())
                .unwrap_or_default()
        };

        let mut entries: Vec<MemberEntry<M::Action>> = Vec::new();
        for m in members {
            match self.classes.remove(&m.0) {
                Some(old) => {
                    for mut entry in old.members {
                        let pruned = inner_of(entry.state_id);
                        entry.outer.retain(|a| !pruned.contains(a));
                        entry.inner.extend(pruned);
                        entries.push(entry);
                    }
                }
                None => {
                    let pruned = inner_of(*m);
                    let all = self.base.applicable_actions(*m);
                    let outer = all
                        .iter()
                        .filter(|a| !pruned.contains(a))
                        .cloned()
                        .collect();
                    entries.push(MemberEntry {
                        state_id: *m,
                        outer,
                        inner: pruned,
                    });
                }
            }
        }

        let max_index = entries
            .iter()
            .map(|e| e.state_id.index())
            .max()
            .unwrap_or(0);
        self.ensure_ids(max_index + 1);
        for entry in &entries {
            self.quotient_ids[entry.state_id.index()] = FLAG | repr.0;
        }
        self.classes
            .insert(repr.0, QuotientInformation { members: entries });
    }

    /// Collapses the given states into a closed sink class: every action of
    /// every member is pruned. Used for the dead and probability-one classes
    /// of interval iteration.
    pub fn build_quotient_closed(&mut self, members: &[StateId], repr: StateId) {
        let base_members: Vec<StateId> = members
            .iter()
            .flat_map(|m| self.members_of(*m))
            .collect();
        let mut inner = Vec::with_capacity(base_members.len());
        for s in base_members {
            let actions = self.base.applicable_actions(s);
            inner.push((s, actions));
        }
        self.build_quotient(members, repr, &inner);
    }

    /// Number of members across all non-trivial classes.
    pub fn collapsed_state_count(&self) -> usize {
        self.classes.values().map(|c| c.members.len()).sum()
    }
}

impl<M: Mdp> Mdp for QuotientMdp<M> {
    type State = M::State;
    type Action = QuotientAction<M::Action>;

    fn state_id(&mut self, state: &M::State) -> StateId {
        let id = self.base.state_id(state);
        self.translate(id)
    }

    fn state(&self, id: StateId) -> M::State {
        self.base.state(id)
    }

    fn num_states(&self) -> usize {
        self.base.num_states()
    }

    fn applicable_actions(&mut self, id: StateId) -> Vec<QuotientAction<M::Action>> {
        match self.classes.get(&id.0) {
            Some(info) => info
                .members
                .iter()
                .flat_map(|m| {
                    m.outer.iter().map(move |a| QuotientAction {
                        state_id: m.state_id,
                        action: a.clone(),
                    })
                })
                .collect(),
            None => self
                .base
                .applicable_actions(id)
                .into_iter()
                .map(|a| QuotientAction {
                    state_id: id,
                    action: a,
                })
                .collect(),
        }
    }

    fn transition(
        &mut self,
        _id: StateId,
        action: &QuotientAction<M::Action>,
    ) -> Distribution<StateId> {
        let base_dist = self.base.transition(action.state_id, &action.action);
        let mut dist = Distribution::new();
        for (succ, p) in base_dist.iter() {
            dist.add_probability(self.translate(*succ), *p);
        }
        dist
    }

    fn termination_info(&mut self, id: StateId) -> TerminationInfo {
        if let Some(info) = self.classes.get(&id.0) {
            let members: Vec<StateId> = info.members.iter().map(|m| m.state_id).collect();
            for m in members {
                let t = self.base.termination_info(m);
                if t.is_goal {
                    return t;
                }
            }
        }
        self.base.termination_info(id)
    }

    fn action_cost(&mut self, _id: StateId, action: &QuotientAction<M::Action>) -> f64 {
        self.base.action_cost(action.state_id, &action.action)
    }
}
