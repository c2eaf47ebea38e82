//! Exhaustive AO*: expands tip states from an open list, tracks per-state
//! solved markers and unsolved-successor counters, and propagates value
//! changes and solved labels along parent back-pointers. Assumes the state
//! space reachable through non-self-loop transitions is acyclic.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::solver::base::{HeuristicSearchBase, HeuristicSearchEngine};
use crate::solver::error::SolverError;
use crate::solver::mdp::{Mdp, StateId};
use crate::solver::open_list::OpenList;
use crate::solver::report::ProgressReport;
use crate::solver::store::PerStateStorage;
use crate::solver::timer::CountdownTimer;
use crate::solver::value::{EngineValue, Interval};

#[derive(Debug, Default, Clone)]
struct AoLocal {
    expanded: bool,
    solved: bool,
    dead: bool,
    alive: bool,
    update_order: u32,
    unsolved: u32,
    parents: Vec<StateId>,
}

#[derive(Debug, Default, Clone)]
pub struct AoStatistics {
    pub iterations: u64,
    pub backpropagations: u64,
}

impl AoStatistics {
    pub fn print(&self) {
        log::info!(
            "iterations: {}, backpropagations: {}",
            self.iterations,
            self.backpropagations
        );
    }
}

pub struct ExhaustiveAoStar<M: Mdp, V: EngineValue> {
    base: HeuristicSearchBase<M, V>,
    open: OpenList,
    locals: PerStateStorage<AoLocal>,
    propagation_queue: BinaryHeap<Reverse<(u32, u32)>>,
    pub ao_statistics: AoStatistics,
}

impl<M: Mdp, V: EngineValue> ExhaustiveAoStar<M, V> {
    pub fn new(base: HeuristicSearchBase<M, V>, open: OpenList) -> ExhaustiveAoStar<M, V> {
        ExhaustiveAoStar {
            base,
            open,
            locals: PerStateStorage::new(),
            propagation_queue: BinaryHeap::new(),
            ao_statistics: AoStatistics::default(),
        }
    }

    fn is_solved(&self, id: StateId) -> bool {
        self.base.is_terminal(id)
            || self.locals.get(id).map_or(false, |l| l.solved)
    }

    fn is_dead(&self, id: StateId) -> bool {
        self.base.is_dead_end(id) || self.locals.get(id).map_or(false, |l| l.dead)
    }

    fn enqueue_propagation(&mut self, id: StateId) {
        let order = self.locals.entry(id).update_order;
        self.propagation_queue.push(Reverse((order, id.0)));
    }

    fn push_parents(&mut self, id: StateId) {
        let parents = self.locals.entry(id).parents.clone();
        for p in parents {
            if !self.locals.entry(p).solved {
                self.enqueue_propagation(p);
            }
        }
    }

    /// Marks a state solved and notifies its parents: their unsolved
    /// counters drop, live children raise the alive flag, and each parent
    /// is queued for a propagation update.
    fn mark_solved(&mut self, id: StateId, dead: bool) {
        let parents = {
            let l = self.locals.entry(id);
            if l.solved {
                return;
            }
            l.solved = true;
            l.dead = dead;
            std::mem::take(&mut l.parents)
        };
        for p in parents {
            let queue = {
                let pl = self.locals.entry(p);
                if pl.solved {
                    continue;
                }
                pl.unsolved = pl.unsolved.saturating_sub(1);
                if !dead {
                    pl.alive = true;
                }
                true
            };
            if queue {
                self.enqueue_propagation(p);
            }
        }
    }

    /// Raises ancestor update orders above their descendants'.
    fn backpropagate_update_order(&mut self, start: StateId) {
        let mut worklist = vec![start];
        while let Some(id) = worklist.pop() {
            let (order, parents) = {
                let l = self.locals.entry(id);
                (l.update_order, l.parents.clone())
            };
            for p in parents {
                let pl = self.locals.entry(p);
                if pl.update_order <= order {
                    pl.update_order = order + 1;
                    worklist.push(p);
                }
            }
        }
    }

    /// Processes queued updates bottom-up (smallest update order first):
    /// re-runs the Bellman update, marks states whose last successor got
    /// solved, and keeps pushing changes toward the ancestors.
    fn propagate(&mut self, mdp: &mut M, timer: &CountdownTimer) -> Result<(), SolverError> {
        while let Some(Reverse((_, raw))) = self.propagation_queue.pop() {
            timer.check()?;
            let id = StateId(raw);
            if self.locals.entry(id).solved {
                continue;
            }
            self.ao_statistics.backpropagations += 1;
            let res = self.base.bellman_policy_update(mdp, id);
            // a state promoted to a dead end mid-search is solved on the spot
            if self.base.is_terminal(id) {
                let dead = self.base.is_dead_end(id);
                self.mark_solved(id, dead);
                continue;
            }
            if self.locals.entry(id).unsolved == 0 {
                let dead = !self.locals.entry(id).alive;
                self.mark_solved(id, dead);
            } else if res.value_changed {
                self.push_parents(id);
            }
        }
        Ok(())
    }

    fn step(&mut self, mdp: &mut M, timer: &CountdownTimer) -> Result<(), SolverError> {
        let id = match self.open.pop() {
            Some(id) => id,
            None => return Ok(()),
        };
        // only unexpanded tip states are processed
        if self.is_solved(id) || self.locals.entry(id).expanded {
            return Ok(());
        }
        self.ao_statistics.iterations += 1;

        let res = self.base.bellman_policy_update(mdp, id);
        if self.base.is_terminal(id) {
            let dead = self.base.is_dead_end(id);
            self.mark_solved(id, dead);
            return self.propagate(mdp, timer);
        }
        self.locals.entry(id).expanded = true;

        let transitions = mdp.all_transitions(id);
        let mut unsolved = 0u32;
        let mut alive = 0u32;
        let mut min_succ_order = u32::MAX;
        let mut marked: Vec<StateId> = Vec::new();
        for t in &transitions {
            for (succ, _) in t.successors.iter() {
                // self-loop mass is already folded into the Bellman update
                if *succ == id || self.base.is_marked(*succ) {
                    continue;
                }
                self.base.mark(*succ);
                marked.push(*succ);
                if self.is_solved(*succ) {
                    if !self.is_dead(*succ) {
                        alive += 1;
                    }
                } else {
                    let succ_local = self.locals.entry(*succ);
                    succ_local.parents.push(id);
                    min_succ_order = min_succ_order.min(succ_local.update_order);
                    unsolved += 1;
                    let order = succ_local.update_order;
                    self.open.push(*succ, order as f64);
                }
            }
        }
        for s in marked {
            self.base.unmark(s);
        }

        self.locals.entry(id).alive = alive > 0;
        if unsolved == 0 {
            let dead = alive == 0;
            self.mark_solved(id, dead);
            self.propagate(mdp, timer)?;
        } else {
            {
                let l = self.locals.entry(id);
                l.unsolved = unsolved;
                l.update_order = min_succ_order.saturating_add(1);
            }
            self.backpropagate_update_order(id);
            if res.value_changed {
                self.push_parents(id);
                self.propagate(mdp, timer)?;
            }
        }
        Ok(())
    }
}

impl<M: Mdp, V: EngineValue> HeuristicSearchEngine<M, V> for ExhaustiveAoStar<M, V> {
    fn solve(
        &mut self,
        mdp: &mut M,
        initial: StateId,
        timer: &CountdownTimer,
        report: &mut ProgressReport,
    ) -> Result<Interval, SolverError> {
        self.base.initialize_report(mdp, initial, report);
        if self.base.is_terminal(initial) {
            return Ok(self.base.lookup_bounds(initial));
        }
        self.open.push(initial, 0.0);
        while !self.locals.entry(initial).solved {
            timer.check()?;
            if self.open.is_empty() {
                // state space exhausted without solving the initial state
                return Err(SolverError::ProvenUnsolvable);
            }
            self.step(mdp, timer)?;
            report.print(&[
                ("v", self.base.lookup_value(initial)),
                ("iterations", self.ao_statistics.iterations as f64),
            ]);
        }
        Ok(self.base.lookup_bounds(initial))
    }

    fn base(&self) -> &HeuristicSearchBase<M, V> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut HeuristicSearchBase<M, V> {
        &mut self.base
    }

    fn reset_search_state(&mut self) {
        self.locals.clear();
        self.open.clear();
        self.propagation_queue.clear();
    }

    fn print_statistics(&self) {
        self.base.print_statistics();
        self.ao_statistics.print();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explicit::ExplicitMdp;
    use crate::solver::evaluator::BlindEvaluator;
    use crate::solver::picker::{ArbitraryPicker, StablePicker};
    use crate::solver::value::{is_approx_equal, Objective, DEFAULT_EPSILON, INFINITE};

    fn engine(store_policy: bool) -> ExhaustiveAoStar<ExplicitMdp, f64> {
        ExhaustiveAoStar::new(
            HeuristicSearchBase::new(
                Objective::MinCost,
                DEFAULT_EPSILON,
                store_policy,
                Box::new(BlindEvaluator::new(Objective::MinCost)),
                Box::new(ArbitraryPicker),
            ),
            OpenList::fifo(),
        )
    }

    fn solve(
        engine: &mut ExhaustiveAoStar<ExplicitMdp, f64>,
        mdp: &mut ExplicitMdp,
    ) -> Result<Interval, SolverError> {
        let init = mdp.initial_id();
        engine.solve(
            mdp,
            init,
            &CountdownTimer::unlimited(),
            &mut ProgressReport::disabled(),
        )
    }

    #[test]
    fn two_state_ssp() {
        let mut mdp =
            ExplicitMdp::from_parts(0, &[1], &[(0, "a", 1.0, &[(1, 1.0)])], 1000.0);
        let mut e = engine(true);
        let bounds = solve(&mut e, &mut mdp).unwrap();
        assert!(is_approx_equal(bounds.lower, 1.0, 1e-9));
        assert_eq!(e.ao_statistics.iterations, 1);
    }

    #[test]
    fn self_loop_geometric_series() {
        // expected cost 2 through the half-chance loop
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[1],
            &[(0, "a", 1.0, &[(0, 0.5), (1, 0.5)])],
            1000.0,
        );
        let mut e = engine(true);
        let bounds = solve(&mut e, &mut mdp).unwrap();
        assert!(is_approx_equal(bounds.lower, 2.0, 1e-9));
    }

    #[test]
    fn dead_end_propagates_termination_cost() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[2],
            &[(0, "a", 1.0, &[(1, 1.0)])],
            1000.0,
        );
        let mut e = engine(true);
        let bounds = solve(&mut e, &mut mdp).unwrap();
        assert!(is_approx_equal(bounds.lower, 1001.0, 1e-9));
        let s1 = mdp.state_id(&1);
        assert!(e.base().is_dead_end(s1));
        assert_eq!(e.base().lookup_value(s1), 1000.0);
    }

    #[test]
    fn branching_dag_takes_the_cheaper_path() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[3],
            &[
                (0, "left", 1.0, &[(1, 1.0)]),
                (0, "right", 1.0, &[(2, 1.0)]),
                (1, "l2", 5.0, &[(3, 1.0)]),
                (2, "r2", 1.0, &[(3, 1.0)]),
            ],
            INFINITE,
        );
        let mut e = engine(true);
        let bounds = solve(&mut e, &mut mdp).unwrap();
        assert!(is_approx_equal(bounds.lower, 2.0, 1e-9));
        let s0 = mdp.initial_id();
        let action = e.base().get_greedy_action(s0).unwrap();
        assert_eq!(mdp.action_name(&action), "right");
    }

    #[test]
    fn stochastic_branching_weighs_both_outcomes() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[3],
            &[
                (0, "go", 1.0, &[(1, 0.5), (2, 0.5)]),
                (1, "cheap", 1.0, &[(3, 1.0)]),
                (2, "dear", 3.0, &[(3, 1.0)]),
            ],
            INFINITE,
        );
        let mut e = engine(false);
        let bounds = solve(&mut e, &mut mdp).unwrap();
        assert!(is_approx_equal(bounds.lower, 3.0, 1e-9));
    }

    #[test]
    fn stable_picker_keeps_its_choice_between_runs() {
        // both actions have equal Q-values
        let transitions: &[(u32, &str, f64, &[(u32, f64)])] = &[
            (0, "a", 1.0, &[(1, 1.0)]),
            (0, "b", 1.0, &[(1, 1.0)]),
        ];
        let mut mdp = ExplicitMdp::from_parts(0, &[1], transitions, 1000.0);
        let mut e = ExhaustiveAoStar::new(
            HeuristicSearchBase::new(
                Objective::MinCost,
                DEFAULT_EPSILON,
                true,
                Box::new(BlindEvaluator::new(Objective::MinCost)),
                Box::new(StablePicker),
            ),
            OpenList::fifo(),
        );
        solve(&mut e, &mut mdp).unwrap();
        let s0 = mdp.initial_id();
        let first = e.base().get_greedy_action(s0).unwrap();
        assert_eq!(mdp.action_name(&first), "a");
        // updating again must retain the stored action
        e.base_mut().bellman_policy_update(&mut mdp, s0);
        let second = e.base().get_greedy_action(s0).unwrap();
        assert_eq!(first, second);
        assert_eq!(e.base().statistics.policy_updates, 1);
    }

    #[test]
    fn unreachable_goal_exhausts_the_space() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[9],
            &[(0, "a", 1.0, &[(1, 1.0)])],
            INFINITE,
        );
        let mut e = engine(false);
        // s1 is a dead end, s0's only action has infinite Q, the Bellman
        // update promotes both: the initial state solves as dead
        let res = solve(&mut e, &mut mdp);
        match res {
            Ok(bounds) => assert_eq!(bounds.lower, INFINITE),
            Err(SolverError::ProvenUnsolvable) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn reset_clears_engine_local_state() {
        let mut mdp =
            ExplicitMdp::from_parts(0, &[1], &[(0, "a", 1.0, &[(1, 1.0)])], 1000.0);
        let mut e = engine(true);
        solve(&mut e, &mut mdp).unwrap();
        e.reset_search_state();
        // values survive the reset, solved markers do not
        let s0 = mdp.initial_id();
        assert!(is_approx_equal(e.base().lookup_value(s0), 1.0, 1e-9));
        let bounds = solve(&mut e, &mut mdp).unwrap();
        assert!(is_approx_equal(bounds.lower, 1.0, 1e-9));
    }
}
