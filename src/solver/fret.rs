//! FRET (find, revise, eliminate traps): runs an inner heuristic-search
//! engine on a quotient MDP, finds end components of the greedy graph, and
//! collapses them until the greedy graph is trap-free.

use std::marker::PhantomData;

use crate::solver::base::{HeuristicSearchBase, HeuristicSearchEngine};
use crate::solver::end_components::{find_mecs, EcdStatistics, ExploredFragment};
use crate::solver::error::SolverError;
use crate::solver::mdp::{Mdp, StateId, Transition};
use crate::solver::quotient::{QuotientAction, QuotientMdp};
use crate::solver::report::ProgressReport;
use crate::solver::timer::CountdownTimer;
use crate::solver::value::{EngineValue, Interval};

/// Which action set spans the trap-finding graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FretMode {
    /// All actions whose Q-value ties the optimum (FRET-V).
    ValueGreedy,
    /// Only the stored policy action (FRET-pi).
    Policy,
}

#[derive(Debug, Default, Clone)]
pub struct FretStatistics {
    pub rounds: u64,
    pub traps_found: u64,
    pub trap_states: u64,
}

impl FretStatistics {
    pub fn print(&self) {
        log::info!(
            "fret rounds: {}, traps: {} over {} states",
            self.rounds,
            self.traps_found,
            self.trap_states
        );
    }
}

pub struct Fret<M, V, E>
where
    M: Mdp,
    V: EngineValue,
    E: HeuristicSearchEngine<QuotientMdp<M>, V>,
{
    inner: E,
    mode: FretMode,
    pub fret_statistics: FretStatistics,
    _marker: PhantomData<(M, V)>,
}

impl<M, V, E> Fret<M, V, E>
where
    M: Mdp,
    V: EngineValue,
    E: HeuristicSearchEngine<QuotientMdp<M>, V>,
{
    pub fn new(inner: E, mode: FretMode) -> Fret<M, V, E> {
        Fret {
            inner,
            mode,
            fret_statistics: FretStatistics::default(),
            _marker: PhantomData,
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    fn greedy_transitions(
        &mut self,
        mdp: &mut QuotientMdp<M>,
        id: StateId,
    ) -> Vec<Transition<QuotientAction<M::Action>>> {
        match self.mode {
            FretMode::Policy => match self.inner.base().get_greedy_action(id) {
                None => Vec::new(),
                Some(a) => {
                    let successors = mdp.transition(id, &a);
                    vec![Transition::new(a, successors)]
                }
            },
            FretMode::ValueGreedy => {
                let mut greedy = Vec::new();
                self.inner
                    .base_mut()
                    .bellman_update_with_greedy(mdp, id, &mut greedy);
                greedy
            }
        }
    }

    /// Explores the greedy restriction reachable from `initial` and returns
    /// the trap components: members with the greedy actions trapped inside.
    #[allow(clippy::type_complexity)]
    fn find_traps(
        &mut self,
        mdp: &mut QuotientMdp<M>,
        initial: StateId,
        timer: &CountdownTimer,
    ) -> Result<Vec<(Vec<StateId>, Vec<(StateId, Vec<M::Action>)>)>, SolverError> {
        let mut fragment: ExploredFragment<QuotientAction<M::Action>> = ExploredFragment {
            states: Vec::new(),
            index_of: Default::default(),
            goals: Vec::new(),
            actions: Vec::new(),
            supports: Vec::new(),
            costs: Vec::new(),
        };
        let mut stack: Vec<usize> = Vec::new();

        let discover = |fragment: &mut ExploredFragment<QuotientAction<M::Action>>,
                        stack: &mut Vec<usize>,
                        terminal: bool,
                        id: StateId|
         -> usize {
            if let Some(i) = fragment.index_of.get(&id) {
                return *i;
            }
            let i = fragment.states.len();
            fragment.states.push(id);
            fragment.index_of.insert(id, i);
            // terminal states are excluded from components, like goals
            fragment.goals.push(terminal);
            fragment.actions.push(Vec::new());
            fragment.supports.push(Vec::new());
            fragment.costs.push(Vec::new());
            stack.push(i);
            i
        };

        let init_terminal = self.inner.base().is_terminal(initial);
        discover(&mut fragment, &mut stack, init_terminal, initial);
        while let Some(i) = stack.pop() {
            timer.check()?;
            if fragment.goals[i] {
                continue;
            }
            let id = fragment.states[i];
            for t in self.greedy_transitions(mdp, id) {
                let mut support = Vec::with_capacity(t.successors.len());
                for (succ, _) in t.successors.iter() {
                    let terminal = self.inner.base().is_terminal(*succ);
                    support.push(discover(&mut fragment, &mut stack, terminal, *succ));
                }
                fragment.supports[i].push(support);
                fragment.costs[i].push(0.0);
                fragment.actions[i].push(t.action);
            }
        }

        let mut scratch = EcdStatistics::default();
        let mecs = find_mecs(&fragment, None, &mut scratch, timer)?;
        let mut traps = Vec::new();
        for mec in mecs {
            let members: Vec<StateId> = mec
                .members
                .iter()
                .map(|(i, _)| fragment.states[*i])
                .collect();
            let mut inner: Vec<(StateId, Vec<M::Action>)> = Vec::new();
            for (i, inner_actions) in &mec.members {
                for a in inner_actions {
                    let qa = &fragment.actions[*i][*a];
                    match inner.iter_mut().find(|(s, _)| *s == qa.state_id) {
                        Some((_, list)) => list.push(qa.action.clone()),
                        None => inner.push((qa.state_id, vec![qa.action.clone()])),
                    }
                }
            }
            traps.push((members, inner));
        }
        Ok(traps)
    }
}

impl<M, V, E> HeuristicSearchEngine<QuotientMdp<M>, V> for Fret<M, V, E>
where
    M: Mdp,
    V: EngineValue,
    E: HeuristicSearchEngine<QuotientMdp<M>, V>,
{
    fn solve(
        &mut self,
        mdp: &mut QuotientMdp<M>,
        initial: StateId,
        timer: &CountdownTimer,
        report: &mut ProgressReport,
    ) -> Result<Interval, SolverError> {
        loop {
            timer.check()?;
            let init = mdp.translate(initial);
            self.fret_statistics.rounds += 1;
            let bounds = self.inner.solve(mdp, init, timer, report)?;

            let traps = self.find_traps(mdp, init, timer)?;
            if traps.is_empty() {
                return Ok(bounds);
            }
            for (members, inner) in traps {
                self.fret_statistics.traps_found += 1;
                self.fret_statistics.trap_states += members.len() as u64;
                let repr = members[0];
                mdp.build_quotient(&members, repr, &inner);
                // the stored action of the representative may now be inner
                self.inner.base_mut().clear_policy(mdp.translate(repr));
            }
            self.inner.reset_search_state();
        }
    }

    fn base(&self) -> &HeuristicSearchBase<QuotientMdp<M>, V> {
        self.inner.base()
    }

    fn base_mut(&mut self) -> &mut HeuristicSearchBase<QuotientMdp<M>, V> {
        self.inner.base_mut()
    }

    fn policy_root(&self, mdp: &QuotientMdp<M>, initial: StateId) -> StateId {
        mdp.translate(initial)
    }

    fn reset_search_state(&mut self) {
        self.inner.reset_search_state();
    }

    fn print_statistics(&self) {
        self.inner.print_statistics();
        self.fret_statistics.print();
    }
}
