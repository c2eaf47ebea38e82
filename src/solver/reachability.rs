//! Qualitative reachability analysis: splits the reachable fragment into
//! dead states (no policy reaches a goal with positive probability), states
//! with a policy reaching a goal with certainty, and the rest.

use std::collections::VecDeque;

use crate::solver::end_components::explore_fragment;
use crate::solver::error::SolverError;
use crate::solver::mdp::{Mdp, StateId};
use crate::solver::timer::CountdownTimer;

#[derive(Debug, Default)]
pub struct QualitativeResult {
    pub dead: Vec<StateId>,
    pub one: Vec<StateId>,
    pub maybe: Vec<StateId>,
}

/// Runs the analysis from `initial`. The result is expressed in the id
/// space of the given MDP; interval iteration runs this on the MEC
/// quotient, where the certainty closure below is exact.
pub fn qualitative_reachability<M: Mdp>(
    mdp: &mut M,
    initial: StateId,
    timer: &CountdownTimer,
) -> Result<QualitativeResult, SolverError> {
    let fragment = explore_fragment(mdp, initial, timer)?;
    let n = fragment.states.len();

    // reverse adjacency over the plain edge relation, and per (state,
    // action) the predecessors listing for the certainty worklist
    let mut rev_edges: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut rev_by_action: Vec<Vec<(usize, usize)>> = vec![Vec::new(); n];
    for i in 0..n {
        for (a, support) in fragment.supports[i].iter().enumerate() {
            for s in support {
                rev_edges[*s].push(i);
                rev_by_action[*s].push((i, a));
            }
        }
    }

    // dead: complement of backward reachability from the goal states
    let mut alive = vec![false; n];
    let mut queue: VecDeque<usize> = VecDeque::new();
    for i in 0..n {
        if fragment.goals[i] {
            alive[i] = true;
            queue.push_back(i);
        }
    }
    while let Some(i) = queue.pop_front() {
        timer.check()?;
        for p in &rev_edges[i] {
            if !alive[*p] {
                alive[*p] = true;
                queue.push_back(*p);
            }
        }
    }

    // one: least fixed point of "some action whose entire support is one",
    // seeded with the goals; counters track unresolved successors
    let mut remaining: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            fragment.supports[i]
                .iter()
                .map(|support| support.len())
                .collect()
        })
        .collect();
    let mut one = vec![false; n];
    let mut worklist: VecDeque<usize> = VecDeque::new();
    for i in 0..n {
        if fragment.goals[i] {
            one[i] = true;
            worklist.push_back(i);
        }
    }
    while let Some(i) = worklist.pop_front() {
        timer.check()?;
        for (p, a) in &rev_by_action[i] {
            if one[*p] {
                continue;
            }
            remaining[*p][*a] -= 1;
            if remaining[*p][*a] == 0 {
                one[*p] = true;
                worklist.push_back(*p);
            }
        }
    }

    let mut result = QualitativeResult::default();
    for i in 0..n {
        let id = fragment.states[i];
        if !alive[i] {
            result.dead.push(id);
        } else if one[i] {
            result.one.push(id);
        } else {
            result.maybe.push(id);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explicit::ExplicitMdp;
    use crate::solver::value::INFINITE;

    fn classify(mdp: &mut ExplicitMdp) -> QualitativeResult {
        let init = mdp.initial_id();
        qualitative_reachability(mdp, init, &CountdownTimer::unlimited()).unwrap()
    }

    #[test]
    fn goal_is_one_and_unconnected_branch_is_dead() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[2],
            &[
                (0, "good", 1.0, &[(2, 1.0)]),
                (0, "bad", 1.0, &[(1, 1.0)]),
                // state 1 has no outgoing transitions: a trap
            ],
            INFINITE,
        );
        let r = classify(&mut mdp);
        let s1 = mdp.state_id(&1);
        let s2 = mdp.state_id(&2);
        assert!(r.dead.contains(&s1));
        assert!(r.one.contains(&s2));
        // state 0 reaches the goal with certainty through "good"
        let s0 = mdp.state_id(&0);
        assert!(r.one.contains(&s0));
    }

    #[test]
    fn chance_of_failure_keeps_a_state_maybe() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[1],
            &[(0, "try", 1.0, &[(1, 0.5), (2, 0.5)])],
            INFINITE,
        );
        let r = classify(&mut mdp);
        let s0 = mdp.state_id(&0);
        let s2 = mdp.state_id(&2);
        assert!(r.maybe.contains(&s0));
        assert!(r.dead.contains(&s2));
    }

    #[test]
    fn all_dead_when_no_goal_reachable() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[9],
            &[(0, "loop", 1.0, &[(0, 1.0)])],
            INFINITE,
        );
        let r = classify(&mut mdp);
        assert_eq!(r.dead.len(), 1);
        assert!(r.one.is_empty() && r.maybe.is_empty());
    }

    #[test]
    fn certainty_needs_full_support_inside_one() {
        // the retry loop: support {0, 2} never lies fully inside one, so
        // state 0 stays out of the certainty closure even though it reaches
        // the goal almost surely
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[2],
            &[(0, "retry", 1.0, &[(0, 0.5), (2, 0.5)])],
            INFINITE,
        );
        let r = classify(&mut mdp);
        let s0 = mdp.state_id(&0);
        assert!(r.maybe.contains(&s0));
    }
}
