//! Policy output: walks the stored greedy policy over the reachable
//! fragment and renders one line per state, plus sampled execution
//! trajectories of bounded length.

use std::collections::HashSet;
use std::io::{self, Write};

use crate::solver::base::HeuristicSearchBase;
use crate::solver::mdp::{Mdp, StateId};
use crate::solver::sampler::SuccessorSampler;
use crate::solver::value::EngineValue;

/// Depth-first walk along the stored policy from the initial state,
/// returning `(state, action)` rows in visit order.
pub fn collect_policy<M: Mdp, V: EngineValue>(
    mdp: &mut M,
    base: &HeuristicSearchBase<M, V>,
    initial: StateId,
) -> Vec<(StateId, M::Action)> {
    let mut rows: Vec<(StateId, M::Action)> = Vec::new();
    let mut visited: HashSet<StateId> = HashSet::new();
    let mut stack = vec![initial];
    visited.insert(initial);
    while let Some(id) = stack.pop() {
        if base.is_terminal(id) {
            continue;
        }
        let action = match base.get_greedy_action(id) {
            Some(a) => a,
            None => continue,
        };
        let successors = mdp.transition(id, &action);
        rows.push((id, action));
        for (succ, _) in successors.iter() {
            if visited.insert(*succ) {
                stack.push(*succ);
            }
        }
    }
    rows
}

/// `<pretty-printed-state> : <operator-name>` per row, then the cost line.
pub fn write_policy(
    out: &mut dyn Write,
    rows: &[(String, String)],
    cost: f64,
    unit_cost: bool,
) -> io::Result<()> {
    for (state, operator) in rows {
        writeln!(out, "{} : {}", state, operator)?;
    }
    writeln!(
        out,
        "; cost = {} ({})",
        cost,
        if unit_cost { "unit-cost" } else { "general-cost" }
    )
}

/// One sampled execution of the stored policy, capped at `max_len` steps.
pub fn sample_trajectory<M: Mdp, V: EngineValue>(
    mdp: &mut M,
    base: &HeuristicSearchBase<M, V>,
    sampler: &mut dyn SuccessorSampler<M::Action>,
    initial: StateId,
    max_len: usize,
) -> Vec<(StateId, M::Action)> {
    let mut rows = Vec::new();
    let mut current = initial;
    while rows.len() < max_len {
        if base.is_terminal(current) {
            break;
        }
        let action = match base.get_greedy_action(current) {
            Some(a) => a,
            None => break,
        };
        let successors = mdp.transition(current, &action);
        rows.push((current, action.clone()));
        current = sampler.sample(current, &action, &successors, base.bounds_view());
    }
    rows
}
