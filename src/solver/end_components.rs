//! Maximal end-component decomposition: iterated SCC refinement with action
//! pruning, producing the quotient system the convergence-sensitive engines
//! run on.

use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::Graph;

use crate::solver::error::SolverError;
use crate::solver::mdp::{Mdp, StateId};
use crate::solver::quotient::QuotientMdp;
use crate::solver::timer::CountdownTimer;

#[derive(Debug, Default, Clone)]
pub struct EcdStatistics {
    pub scc_passes: u64,
    pub mecs: u64,
    pub collapsed_states: u64,
    pub pruned_actions: u64,
}

impl EcdStatistics {
    pub fn print(&self) {
        log::info!(
            "mec decomposition: {} scc passes, {} mecs over {} states, {} actions pruned",
            self.scc_passes,
            self.mecs,
            self.collapsed_states,
            self.pruned_actions
        );
    }
}

/// The reachable fragment of an MDP, frozen into local indices. Goal states
/// are kept but not expanded.
pub struct ExploredFragment<A> {
    pub states: Vec<StateId>,
    pub index_of: HashMap<StateId, usize>,
    pub goals: Vec<bool>,
    /// Per local state, the applicable actions.
    pub actions: Vec<Vec<A>>,
    /// Per local state and action, the successor support in local indices.
    pub supports: Vec<Vec<Vec<usize>>>,
    /// Per local state and action, the action cost.
    pub costs: Vec<Vec<f64>>,
}

pub fn explore_fragment<M: Mdp>(
    mdp: &mut M,
    initial: StateId,
    timer: &CountdownTimer,
) -> Result<ExploredFragment<M::Action>, SolverError> {
    let mut fragment = ExploredFragment {
        states: Vec::new(),
        index_of: HashMap::new(),
        goals: Vec::new(),
        actions: Vec::new(),
        supports: Vec::new(),
        costs: Vec::new(),
    };
    let mut stack: Vec<usize> = Vec::new();

    let discover = |fragment: &mut ExploredFragment<M::Action>,
                        stack: &mut Vec<usize>,
                        mdp: &mut M,
                        id: StateId|
     -> usize {
        if let Some(i) = fragment.index_of.get(&id) {
            return *i;
        }
        let i = fragment.states.len();
        fragment.states.push(id);
        fragment.index_of.insert(id, i);
        fragment.goals.push(mdp.termination_info(id).is_goal);
        fragment.actions.push(Vec::new());
        fragment.supports.push(Vec::new());
        fragment.costs.push(Vec::new());
        stack.push(i);
        i
    };

    discover(&mut fragment, &mut stack, mdp, initial);
    while let Some(i) = stack.pop() {
        timer.check()?;
        if fragment.goals[i] {
            continue;
        }
        let id = fragment.states[i];
        for t in mdp.all_transitions(id) {
            let cost = mdp.action_cost(id, &t.action);
            let mut support = Vec::with_capacity(t.successors.len());
            for (succ, _) in t.successors.iter() {
                support.push(discover(&mut fragment, &mut stack, mdp, *succ));
            }
            fragment.supports[i].push(support);
            fragment.costs[i].push(cost);
            fragment.actions[i].push(t.action);
        }
    }
    Ok(fragment)
}

/// One maximal end-component: member local indices with the indices of their
/// inner actions (those whose support stays inside the component).
#[derive(Debug)]
pub struct Mec {
    pub members: Vec<(usize, Vec<usize>)>,
}

/// MEC decomposition over an explored fragment. `candidate` restricts which
/// actions may end up inner (everything else is outer from the start); pass
/// `None` to admit all actions.
pub fn find_mecs<A>(
    fragment: &ExploredFragment<A>,
    candidate: Option<&[Vec<bool>]>,
    statistics: &mut EcdStatistics,
    timer: &CountdownTimer,
) -> Result<Vec<Mec>, SolverError> {
    let n = fragment.states.len();
    let mut retained: Vec<Vec<bool>> = match candidate {
        Some(mask) => mask.to_vec(),
        None => fragment
            .actions
            .iter()
            .map(|acts| vec![true; acts.len()])
            .collect(),
    };
    // goal states are terminal and never belong to a component
    let mut worklist: Vec<Vec<usize>> =
        vec![(0..n).filter(|i| !fragment.goals[*i]).collect()];
    let mut mecs: Vec<Mec> = Vec::new();

    while let Some(set) = worklist.pop() {
        timer.check()?;
        if set.is_empty() {
            continue;
        }
        let mut in_set = vec![false; n];
        for i in &set {
            in_set[*i] = true;
        }
        // prune actions escaping the candidate set, then decompose
        for i in &set {
            for (a, support) in fragment.supports[*i].iter().enumerate() {
                if retained[*i][a] && !support.iter().all(|s| in_set[*s]) {
                    retained[*i][a] = false;
                    statistics.pruned_actions += 1;
                }
            }
        }
        let mut graph: Graph<usize, ()> = Graph::new();
        let mut node_of = HashMap::new();
        for i in &set {
            node_of.insert(*i, graph.add_node(*i));
        }
        for i in &set {
            for (a, support) in fragment.supports[*i].iter().enumerate() {
                if !retained[*i][a] {
                    continue;
                }
                for s in support {
                    graph.update_edge(node_of[i], node_of[s], ());
                }
            }
        }
        statistics.scc_passes += 1;
        let sccs = tarjan_scc(&graph);
        if sccs.len() == 1 && sccs[0].len() == set.len() {
            // stable: the whole candidate is one strongly connected piece
            let members: Vec<(usize, Vec<usize>)> = set
                .iter()
                .map(|i| {
                    let inner: Vec<usize> = (0..fragment.supports[*i].len())
                        .filter(|a| retained[*i][*a])
                        .collect();
                    (*i, inner)
                })
                .collect();
            let nontrivial = set.len() > 1
                || members
                    .iter()
                    .any(|(i, inner)| {
                        inner
                            .iter()
                            .any(|a| fragment.supports[*i][*a].iter().all(|s| *s == *i))
                    });
            if nontrivial {
                statistics.mecs += 1;
                statistics.collapsed_states += set.len() as u64;
                mecs.push(Mec { members });
            }
            continue;
        }
        for scc in sccs {
            worklist.push(scc.into_iter().map(|n| graph[n]).collect());
        }
    }
    // deterministic output order
    mecs.sort_by_key(|m| m.members.iter().map(|(i, _)| *i).min());
    Ok(mecs)
}

/// Explores the reachable fragment, decomposes it into MECs and collapses
/// each one into a quotient of the given MDP. With `zero_cost_inner_only`,
/// only zero-cost actions can be inner (the SSP trap regime); costly actions
/// always stay outer.
pub fn build_quotient_system<M: Mdp>(
    mdp: M,
    initial: StateId,
    zero_cost_inner_only: bool,
    timer: &CountdownTimer,
) -> Result<(QuotientMdp<M>, EcdStatistics), SolverError> {
    let mut quotient = QuotientMdp::new(mdp);
    let mut statistics = EcdStatistics::default();
    let fragment = explore_fragment(quotient.base_mut(), initial, timer)?;
    let candidate: Option<Vec<Vec<bool>>> = if zero_cost_inner_only {
        Some(
            fragment
                .costs
                .iter()
                .map(|costs| costs.iter().map(|c| *c == 0.0).collect())
                .collect(),
        )
    } else {
        None
    };
    let mecs = find_mecs(&fragment, candidate.as_deref(), &mut statistics, timer)?;
    for mec in mecs {
        let members: Vec<StateId> = mec
            .members
            .iter()
            .map(|(i, _)| fragment.states[*i])
            .collect();
        let inner: Vec<(StateId, Vec<M::Action>)> = mec
            .members
            .iter()
            .map(|(i, inner)| {
                (
                    fragment.states[*i],
                    inner
                        .iter()
                        .map(|a| fragment.actions[*i][*a].clone())
                        .collect(),
                )
            })
            .collect();
        let repr = members[0];
        quotient.build_quotient(&members, repr, &inner);
    }
    Ok((quotient, statistics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explicit::ExplicitMdp;
    use crate::solver::value::INFINITE;

    fn fragment_of(mdp: &mut ExplicitMdp) -> ExploredFragment<crate::solver::mdp::OperatorId> {
        let init = mdp.initial_id();
        explore_fragment(mdp, init, &CountdownTimer::unlimited()).unwrap()
    }

    #[test]
    fn fragment_covers_reachable_states_only() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[2],
            &[
                (0, "a", 1.0, &[(1, 1.0)]),
                (1, "b", 1.0, &[(2, 1.0)]),
                (7, "unreachable", 1.0, &[(0, 1.0)]),
            ],
            INFINITE,
        );
        let f = fragment_of(&mut mdp);
        assert_eq!(f.states.len(), 3);
        assert!(f.goals.iter().filter(|g| **g).count() == 1);
    }

    #[test]
    fn two_state_loop_is_a_mec() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[],
            &[
                (0, "fwd", 0.0, &[(1, 1.0)]),
                (1, "back", 0.0, &[(0, 1.0)]),
            ],
            INFINITE,
        );
        let f = fragment_of(&mut mdp);
        let mut stats = EcdStatistics::default();
        let mecs = find_mecs(&f, None, &mut stats, &CountdownTimer::unlimited()).unwrap();
        assert_eq!(mecs.len(), 1);
        assert_eq!(mecs[0].members.len(), 2);
        // both actions are inner
        assert!(mecs[0].members.iter().all(|(_, inner)| inner.len() == 1));
    }

    #[test]
    fn escaping_action_is_not_inner() {
        // {s0, s1} looks like a loop, but s1's only action
        // can escape to the goal, so there is no end component
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[2],
            &[
                (0, "a", 1.0, &[(0, 0.5), (1, 0.5)]),
                (1, "b", 1.0, &[(0, 0.5), (2, 0.5)]),
            ],
            INFINITE,
        );
        let f = fragment_of(&mut mdp);
        let mut stats = EcdStatistics::default();
        let mecs = find_mecs(&f, None, &mut stats, &CountdownTimer::unlimited()).unwrap();
        assert!(mecs.is_empty());
        assert!(stats.pruned_actions >= 1);
    }

    #[test]
    fn self_loop_singleton_is_a_mec() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[1],
            &[
                (0, "stay", 0.0, &[(0, 1.0)]),
                (0, "go", 1.0, &[(1, 1.0)]),
            ],
            INFINITE,
        );
        let f = fragment_of(&mut mdp);
        let mut stats = EcdStatistics::default();
        let mecs = find_mecs(&f, None, &mut stats, &CountdownTimer::unlimited()).unwrap();
        assert_eq!(mecs.len(), 1);
        let (state, inner) = &mecs[0].members[0];
        assert_eq!(f.states[*state], mdp.state_id(&0));
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn zero_cost_restriction_keeps_costly_loops_out() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[],
            &[
                (0, "fwd", 1.0, &[(1, 1.0)]),
                (1, "back", 1.0, &[(0, 1.0)]),
            ],
            INFINITE,
        );
        let init = mdp.initial_id();
        let (quotient, stats) =
            build_quotient_system(mdp, init, true, &CountdownTimer::unlimited()).unwrap();
        assert_eq!(stats.mecs, 0);
        assert_eq!(quotient.translate(init), init);
    }

    #[test]
    fn quotient_collapses_the_loop() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[2],
            &[
                (0, "fwd", 0.0, &[(1, 1.0)]),
                (1, "back", 0.0, &[(0, 1.0)]),
                (1, "exit", 1.0, &[(2, 1.0)]),
            ],
            INFINITE,
        );
        let init = mdp.initial_id();
        let (mut quotient, stats) =
            build_quotient_system(mdp, init, true, &CountdownTimer::unlimited()).unwrap();
        assert_eq!(stats.mecs, 1);
        assert_eq!(stats.collapsed_states, 2);
        let repr = quotient.translate(init);
        // the collapsed class only offers the escaping action
        let actions = quotient.applicable_actions(repr);
        assert_eq!(actions.len(), 1);
        let base_action = &actions[0];
        let dist = quotient.transition(repr, base_action);
        assert!(dist.is_dirac());
    }
}
