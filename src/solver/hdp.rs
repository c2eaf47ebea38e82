//! HDP: labelled depth-first search over the greedy policy graph. The DFS
//! keeps the current branch on a Tarjan stack; back edges flag potential
//! traps, and solved-marking happens per strongly connected component in
//! post-order, once the whole component is consistent.

use crate::solver::base::{HeuristicSearchBase, HeuristicSearchEngine};
use crate::solver::error::SolverError;
use crate::solver::mdp::{Mdp, StateId};
use crate::solver::report::ProgressReport;
use crate::solver::store::PerStateStorage;
use crate::solver::timer::CountdownTimer;
use crate::solver::value::{EngineValue, Interval};

#[derive(Debug, Default, Clone)]
struct HdpLocal {
    solved: bool,
    stamp: u32,
    index: u32,
    lowlink: u32,
    onstack: bool,
}

#[derive(Debug, Default, Clone)]
pub struct HdpStatistics {
    pub rounds: u64,
    pub back_edges: u64,
    pub solved_components: u64,
}

impl HdpStatistics {
    pub fn print(&self) {
        log::info!(
            "rounds: {}, back edges: {}, solved components: {}",
            self.rounds,
            self.back_edges,
            self.solved_components
        );
    }
}

struct Frame {
    id: StateId,
    children: Vec<StateId>,
    next: usize,
    flag: bool,
}

pub struct Hdp<M: Mdp, V: EngineValue> {
    base: HeuristicSearchBase<M, V>,
    locals: PerStateStorage<HdpLocal>,
    epoch: u32,
    pub hdp_statistics: HdpStatistics,
}

impl<M: Mdp, V: EngineValue> Hdp<M, V> {
    pub fn new(base: HeuristicSearchBase<M, V>) -> Hdp<M, V> {
        debug_assert!(base.stores_policy());
        Hdp {
            base,
            locals: PerStateStorage::new(),
            epoch: 0,
            hdp_statistics: HdpStatistics::default(),
        }
    }

    fn open_frame(
        &mut self,
        mdp: &mut M,
        id: StateId,
        counter: &mut u32,
        tarjan_stack: &mut Vec<StateId>,
        any_change: &mut bool,
    ) -> Frame {
        {
            let l = self.locals.entry(id);
            l.stamp = self.epoch;
            l.index = *counter;
            l.lowlink = *counter;
            l.onstack = true;
        }
        *counter += 1;
        tarjan_stack.push(id);

        let res = self.base.bellman_policy_update(mdp, id);
        if res.value_changed {
            // inconsistent: cut the branch here, revisit next round
            *any_change = true;
            return Frame {
                id,
                children: Vec::new(),
                next: 0,
                flag: false,
            };
        }
        let children = match res.greedy {
            None => Vec::new(),
            Some(t) => t
                .successors
                .support()
                .filter(|s| **s != id)
                .copied()
                .collect(),
        };
        Frame {
            id,
            children,
            next: 0,
            flag: true,
        }
    }

    fn dfs_round(
        &mut self,
        mdp: &mut M,
        initial: StateId,
        timer: &CountdownTimer,
    ) -> Result<bool, SolverError> {
        self.epoch += 1;
        self.hdp_statistics.rounds += 1;
        let mut counter: u32 = 1;
        let mut tarjan_stack: Vec<StateId> = Vec::new();
        let mut frames: Vec<Frame> = Vec::new();
        let mut any_change = false;

        let root =
            self.open_frame(mdp, initial, &mut counter, &mut tarjan_stack, &mut any_change);
        frames.push(root);

        while !frames.is_empty() {
            timer.check()?;
            let frame = frames.last_mut().unwrap();
            if frame.next < frame.children.len() {
                let child = frame.children[frame.next];
                frame.next += 1;
                if self.base.is_terminal(child) {
                    continue;
                }
                let child_local = self.locals.entry(child).clone();
                if child_local.solved {
                    continue;
                }
                if child_local.stamp == self.epoch {
                    if child_local.onstack {
                        // back edge onto the current branch: a potential trap
                        self.hdp_statistics.back_edges += 1;
                        let frame = frames.last_mut().unwrap();
                        let id = frame.id;
                        let low = self.locals.entry(id).lowlink.min(child_local.index);
                        self.locals.entry(id).lowlink = low;
                    } else {
                        // completed but unconverged component below
                        frames.last_mut().unwrap().flag = false;
                    }
                    continue;
                }
                let child_frame =
                    self.open_frame(mdp, child, &mut counter, &mut tarjan_stack, &mut any_change);
                frames.push(child_frame);
                continue;
            }

            // post-order: close the frame
            let frame = frames.pop().unwrap();
            let (my_index, my_lowlink) = {
                let l = self.locals.entry(frame.id);
                (l.index, l.lowlink)
            };
            let flag = frame.flag;
            if my_lowlink == my_index {
                // root of a strongly connected component
                let mut members = Vec::new();
                loop {
                    let s = tarjan_stack.pop().unwrap();
                    self.locals.entry(s).onstack = false;
                    members.push(s);
                    if s == frame.id {
                        break;
                    }
                }
                if flag {
                    self.hdp_statistics.solved_components += 1;
                    for s in &members {
                        self.locals.entry(*s).solved = true;
                    }
                } else {
                    for s in &members {
                        if self.base.bellman_policy_update(mdp, *s).value_changed {
                            any_change = true;
                        }
                    }
                }
            }
            if let Some(parent) = frames.last_mut() {
                parent.flag &= flag;
                let parent_id = parent.id;
                let parent_low = self.locals.entry(parent_id).lowlink.min(my_lowlink);
                self.locals.entry(parent_id).lowlink = parent_low;
            }
        }
        Ok(any_change)
    }
}

impl<M: Mdp, V: EngineValue> HeuristicSearchEngine<M, V> for Hdp<M, V> {
    fn solve(
        &mut self,
        mdp: &mut M,
        initial: StateId,
        timer: &CountdownTimer,
        report: &mut ProgressReport,
    ) -> Result<Interval, SolverError> {
        self.base.initialize_report(mdp, initial, report);
        loop {
            timer.check()?;
            if self.base.is_terminal(initial) || self.locals.value_or_default(initial).solved {
                return Ok(self.base.lookup_bounds(initial));
            }
            let changed = self.dfs_round(mdp, initial, timer)?;
            report.print(&[
                ("v", self.base.lookup_value(initial)),
                ("rounds", self.hdp_statistics.rounds as f64),
            ]);
            if !changed && self.locals.value_or_default(initial).solved {
                return Ok(self.base.lookup_bounds(initial));
            }
        }
    }

    fn base(&self) -> &HeuristicSearchBase<M, V> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut HeuristicSearchBase<M, V> {
        &mut self.base
    }

    fn reset_search_state(&mut self) {
        self.locals.clear();
        self.epoch = 0;
    }

    fn print_statistics(&self) {
        self.base.print_statistics();
        self.hdp_statistics.print();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explicit::ExplicitMdp;
    use crate::solver::evaluator::BlindEvaluator;
    use crate::solver::picker::ArbitraryPicker;
    use crate::solver::value::{is_approx_equal, Objective, DEFAULT_EPSILON, INFINITE};

    fn engine() -> Hdp<ExplicitMdp, f64> {
        Hdp::new(HeuristicSearchBase::new(
            Objective::MinCost,
            DEFAULT_EPSILON,
            true,
            Box::new(BlindEvaluator::new(Objective::MinCost)),
            Box::new(ArbitraryPicker),
        ))
    }

    fn solve(e: &mut Hdp<ExplicitMdp, f64>, mdp: &mut ExplicitMdp) -> Interval {
        let init = mdp.initial_id();
        e.solve(
            mdp,
            init,
            &CountdownTimer::unlimited(),
            &mut ProgressReport::disabled(),
        )
        .unwrap()
    }

    #[test]
    fn straight_line_is_solved_in_one_descent() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[2],
            &[
                (0, "a", 1.0, &[(1, 1.0)]),
                (1, "b", 1.0, &[(2, 1.0)]),
            ],
            INFINITE,
        );
        let mut e = engine();
        let bounds = solve(&mut e, &mut mdp);
        assert!(is_approx_equal(bounds.lower, 2.0, 1e-9));
        assert!(e.hdp_statistics.solved_components >= 1);
    }

    #[test]
    fn cycle_in_the_greedy_graph_is_detected_and_converged() {
        // greedy graph initially contains the 0 -> 1 -> 0 loop
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[2],
            &[
                (0, "risk", 1.0, &[(1, 0.5), (2, 0.5)]),
                (1, "back", 1.0, &[(0, 1.0)]),
            ],
            INFINITE,
        );
        let mut e = engine();
        let bounds = solve(&mut e, &mut mdp);
        // V(0) = 1 + 0.5 (1 + V(0)) => 3
        assert!(is_approx_equal(bounds.lower, 3.0, 1e-4));
        assert!(e.hdp_statistics.back_edges > 0);
    }

    #[test]
    fn choices_settle_on_the_optimal_action() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[3],
            &[
                (0, "gamble", 1.0, &[(1, 0.9), (3, 0.1)]),
                (0, "safe", 4.0, &[(3, 1.0)]),
                (1, "recover", 1.0, &[(0, 1.0)]),
            ],
            INFINITE,
        );
        let mut e = engine();
        let bounds = solve(&mut e, &mut mdp);
        // gambling loops: expected cost 1 + 0.9 (1 + V(0)); solving the
        // equation against "safe" keeps "safe" optimal at cost 4
        assert!(is_approx_equal(bounds.lower, 4.0, 1e-4));
        let s0 = mdp.initial_id();
        let action = e.base().get_greedy_action(s0).unwrap();
        assert_eq!(mdp.action_name(&action), "safe");
    }

    #[test]
    fn solved_marks_stick_across_solves() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[1],
            &[(0, "a", 1.0, &[(1, 1.0)])],
            INFINITE,
        );
        let mut e = engine();
        solve(&mut e, &mut mdp);
        let rounds = e.hdp_statistics.rounds;
        // the initial state is already marked solved: no further rounds
        solve(&mut e, &mut mdp);
        assert_eq!(e.hdp_statistics.rounds, rounds);
    }
}
