//! LAO* and its depth-first variant iLAO*: expand the tips of the current
//! greedy policy graph, back up along the DFS post-order, repeat until the
//! policy graph is closed and the values are stable.

use crate::solver::base::{HeuristicSearchBase, HeuristicSearchEngine};
use crate::solver::error::SolverError;
use crate::solver::mdp::{Mdp, StateId};
use crate::solver::report::ProgressReport;
use crate::solver::store::PerStateStorage;
use crate::solver::timer::CountdownTimer;
use crate::solver::value::{EngineValue, Interval};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaoVariant {
    /// Expand the policy tips found by the DFS, then back up the envelope.
    Lao,
    /// Expand tips while descending and back up in post-order (iLAO*).
    ILao,
}

#[derive(Debug, Default, Clone)]
struct LaoLocal {
    expanded: bool,
    stamp: u32,
}

#[derive(Debug, Default, Clone)]
pub struct LaoStatistics {
    pub iterations: u64,
    pub expansions: u64,
}

impl LaoStatistics {
    pub fn print(&self) {
        log::info!(
            "iterations: {}, expansions: {}",
            self.iterations,
            self.expansions
        );
    }
}

pub struct LaoStar<M: Mdp, V: EngineValue> {
    base: HeuristicSearchBase<M, V>,
    variant: LaoVariant,
    locals: PerStateStorage<LaoLocal>,
    epoch: u32,
    pub lao_statistics: LaoStatistics,
}

struct Frame {
    id: StateId,
    children: Vec<StateId>,
    next: usize,
}

impl<M: Mdp, V: EngineValue> LaoStar<M, V> {
    pub fn new(base: HeuristicSearchBase<M, V>, variant: LaoVariant) -> LaoStar<M, V> {
        debug_assert!(base.stores_policy());
        LaoStar {
            base,
            variant,
            locals: PerStateStorage::new(),
            epoch: 0,
            lao_statistics: LaoStatistics::default(),
        }
    }

    fn greedy_successors(&mut self, mdp: &mut M, id: StateId) -> Vec<StateId> {
        match self.base.get_greedy_action(id) {
            None => Vec::new(),
            Some(a) => mdp
                .transition(id, &a)
                .support()
                .filter(|s| **s != id)
                .copied()
                .collect(),
        }
    }

    fn expand(&mut self, mdp: &mut M, id: StateId) -> Vec<StateId> {
        self.lao_statistics.expansions += 1;
        self.locals.entry(id).expanded = true;
        let res = self.base.bellman_policy_update(mdp, id);
        match res.greedy {
            None => Vec::new(),
            Some(t) => t.successors.support().filter(|s| **s != id).copied().collect(),
        }
    }

    /// One find-expand-backup round. Returns whether the greedy envelope had
    /// unexpanded tips or any backed-up value changed.
    fn round(&mut self, mdp: &mut M, initial: StateId, timer: &CountdownTimer)
        -> Result<bool, SolverError>
    {
        self.epoch += 1;
        let epoch = self.epoch;
        let mut postorder: Vec<StateId> = Vec::new();
        let mut tips: Vec<StateId> = Vec::new();
        let mut frames: Vec<Frame> = Vec::new();

        self.locals.entry(initial).stamp = epoch;
        if !self.base.is_terminal(initial) {
            if self.locals.entry(initial).expanded {
                let children = self.greedy_successors(mdp, initial);
                frames.push(Frame { id: initial, children, next: 0 });
            } else if self.variant == LaoVariant::ILao {
                let children = self.expand(mdp, initial);
                frames.push(Frame { id: initial, children, next: 0 });
            } else {
                tips.push(initial);
            }
        }

        while let Some(frame) = frames.last_mut() {
            timer.check()?;
            if frame.next == frame.children.len() {
                postorder.push(frame.id);
                frames.pop();
                continue;
            }
            let child = frame.children[frame.next];
            frame.next += 1;
            if self.locals.entry(child).stamp == epoch || self.base.is_terminal(child) {
                continue;
            }
            self.locals.entry(child).stamp = epoch;
            if self.locals.entry(child).expanded {
                let children = self.greedy_successors(mdp, child);
                frames.push(Frame { id: child, children, next: 0 });
            } else if self.variant == LaoVariant::ILao {
                let children = self.expand(mdp, child);
                frames.push(Frame { id: child, children, next: 0 });
            } else {
                tips.push(child);
            }
        }

        let had_tips = !tips.is_empty();
        for tip in tips {
            timer.check()?;
            self.expand(mdp, tip);
            postorder.push(tip);
        }

        // children-first backup over the envelope; a policy switch re-opens
        // the envelope even when the value is stable
        let mut changed = false;
        for id in &postorder {
            timer.check()?;
            let res = self.base.bellman_policy_update(mdp, *id);
            changed |= res.value_changed || res.policy_changed;
        }
        Ok(had_tips || changed)
    }
}

impl<M: Mdp, V: EngineValue> HeuristicSearchEngine<M, V> for LaoStar<M, V> {
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
            if self.base.is_terminal(initial) {
                return Ok(self.base.lookup_bounds(initial));
            }
            self.lao_statistics.iterations += 1;
            let in_flux = self.round(mdp, initial, timer)?;
            report.print(&[
                ("v", self.base.lookup_value(initial)),
                ("iterations", self.lao_statistics.iterations as f64),
            ]);
            if !in_flux {
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
        self.lao_statistics.print();
    }
}
