//! The heuristic-search base: owns the state-info store, the heuristic and
//! the policy picker, and provides the Bellman update primitive every engine
//! drives.

use crate::solver::error::SolverError;
use crate::solver::evaluator::Evaluator;
use crate::solver::mdp::{Mdp, StateId, Transition};
use crate::solver::picker::{PolicyPicker, StateBounds};
use crate::solver::report::ProgressReport;
use crate::solver::store::{PerStateStorage, StateInfo};
use crate::solver::timer::CountdownTimer;
use crate::solver::value::{
    is_approx_equal, is_approx_greater, is_approx_less, EngineValue, Interval, Objective,
    INFINITE,
};

/// Search statistics, kept by the base and printed at finalization.
#[derive(Debug, Default, Clone)]
pub struct Statistics {
    pub backups: u64,
    pub backed_up_states: u64,
    pub evaluated_states: u64,
    pub pruned_states: u64,
    pub goal_states: u64,
    pub terminal_states: u64,
    pub self_loop_states: u64,
    pub value_changes: u64,
    pub policy_updates: u64,
    pub initial_state_estimate: f64,
    pub initial_state_terminal: bool,
}

impl Statistics {
    pub fn print(&self) {
        log::info!(
            "initial state estimate: {} (terminal: {})",
            self.initial_state_estimate,
            self.initial_state_terminal
        );
        log::info!(
            "evaluated states: {}, pruned: {}, goal: {}, terminal: {}, self-loop: {}",
            self.evaluated_states,
            self.pruned_states,
            self.goal_states,
            self.terminal_states,
            self.self_loop_states
        );
        log::info!(
            "backups: {} over {} states, value changes: {}, policy updates: {}",
            self.backups,
            self.backed_up_states,
            self.value_changes,
            self.policy_updates
        );
    }
}

/// Outcome of a policy-tracking Bellman update.
#[derive(Debug)]
pub struct UpdateResult<A> {
    pub value_changed: bool,
    pub policy_changed: bool,
    pub greedy: Option<Transition<A>>,
}

/// The state-info store, with the bounds view pickers and samplers consume.
pub struct StateInfos<V, A> {
    infos: PerStateStorage<StateInfo<V, A>>,
    objective: Objective,
}

impl<V: EngineValue, A: Clone + PartialEq> StateBounds for StateInfos<V, A> {
    fn bounds(&self, id: StateId) -> Interval {
        match self.infos.get(id) {
            None => match self.objective {
                Objective::MinCost => Interval::new(0.0, INFINITE),
                Objective::MaxProb => Interval::new(0.0, 1.0),
            },
            Some(info) => {
                let b = info.value.bounds();
                if V::TWO_SIDED || info.is_terminal() {
                    return b;
                }
                // scalar regime: only one side of the bound is known
                match self.objective {
                    Objective::MinCost => Interval::new(b.lower, INFINITE),
                    Objective::MaxProb => Interval::new(0.0, b.upper),
                }
            }
        }
    }
}

pub struct HeuristicSearchBase<M: Mdp, V: EngineValue> {
    objective: Objective,
    epsilon: f64,
    store_policy: bool,
    state_infos: StateInfos<V, M::Action>,
    evaluator: Box<dyn Evaluator<M::State>>,
    picker: Box<dyn PolicyPicker<M::Action>>,
    pub statistics: Statistics,
}

impl<M: Mdp, V: EngineValue> HeuristicSearchBase<M, V> {
    pub fn new(
        objective: Objective,
        epsilon: f64,
        store_policy: bool,
        evaluator: Box<dyn Evaluator<M::State>>,
        picker: Box<dyn PolicyPicker<M::Action>>,
    ) -> HeuristicSearchBase<M, V> {
        HeuristicSearchBase {
            objective,
            epsilon,
            store_policy,
            state_infos: StateInfos {
                infos: PerStateStorage::new(),
                objective,
            },
            evaluator,
            picker,
            statistics: Statistics::default(),
        }
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn stores_policy(&self) -> bool {
        self.store_policy
    }

    pub fn bounds_view(&self) -> &dyn StateBounds {
        &self.state_infos
    }

    /// Current value in the optimistic direction of the objective.
    pub fn lookup_value(&self, id: StateId) -> f64 {
        match self.state_infos.infos.get(id) {
            Some(info) => self.objective.optimistic_bound(&info.value),
            None => self.objective.optimistic_bound(&V::from_bounds(
                0.0,
                match self.objective {
                    Objective::MinCost => INFINITE,
                    Objective::MaxProb => 1.0,
                },
                self.objective,
            )),
        }
    }

    pub fn lookup_bounds(&self, id: StateId) -> Interval {
        self.state_infos.bounds(id)
    }

    pub fn value_of(&self, id: StateId) -> V {
        self.state_infos
            .infos
            .get(id)
            .map(|i| i.value)
            .unwrap_or_else(|| V::from_value(0.0))
    }

    pub fn was_visited(&self, id: StateId) -> bool {
        self.state_infos
            .infos
            .get(id)
            .map_or(false, |i| i.is_value_initialized())
    }

    pub fn is_terminal(&self, id: StateId) -> bool {
        self.state_infos
            .infos
            .get(id)
            .map_or(false, |i| i.is_terminal())
    }

    pub fn is_dead_end(&self, id: StateId) -> bool {
        self.state_infos
            .infos
            .get(id)
            .map_or(false, |i| i.is_dead_end())
    }

    pub fn is_goal(&self, id: StateId) -> bool {
        self.state_infos.infos.get(id).map_or(false, |i| i.is_goal())
    }

    pub fn is_on_fringe(&self, id: StateId) -> bool {
        self.state_infos
            .infos
            .get(id)
            .map_or(false, |i| i.is_on_fringe())
    }

    pub fn get_greedy_action(&self, id: StateId) -> Option<M::Action> {
        self.state_infos
            .infos
            .get(id)
            .and_then(|i| i.get_policy().cloned())
    }

    pub fn clear_policy(&mut self, id: StateId) {
        self.state_infos.infos.entry(id).clear_policy();
    }

    /// Successor-deduplication scratch bit (AO family).
    pub fn mark(&mut self, id: StateId) {
        self.state_infos.infos.entry(id).mark();
    }

    pub fn unmark(&mut self, id: StateId) {
        self.state_infos.infos.entry(id).unmark();
    }

    pub fn is_marked(&self, id: StateId) -> bool {
        self.state_infos
            .infos
            .get(id)
            .map_or(false, |i| i.is_marked())
    }

    /// First contact with a state: resolves its termination status, runs the
    /// heuristic and places it on the fringe or directly in a terminal
    /// status.
    pub fn ensure_initialized(&mut self, mdp: &mut M, id: StateId) {
        if self
            .state_infos
            .infos
            .entry(id)
            .is_value_initialized()
        {
            return;
        }
        self.statistics.evaluated_states += 1;
        let term = mdp.termination_info(id);
        if term.is_goal {
            let value = self.objective.goal_value();
            let info = self.state_infos.infos.entry(id);
            info.termination_cost = value;
            info.value = V::from_value(value);
            info.set_goal();
            self.statistics.goal_states += 1;
            self.statistics.terminal_states += 1;
            return;
        }
        let state = mdp.state(id);
        let est = self.evaluator.evaluate(&state);
        let info = self.state_infos.infos.entry(id);
        info.termination_cost = term.non_goal_cost;
        info.value = V::from_bounds(est.lower, est.upper, self.objective);
        if est.terminal {
            info.set_dead_end();
            self.statistics.pruned_states += 1;
            self.statistics.terminal_states += 1;
        } else {
            info.set_on_fringe();
        }
    }

    /// A freshly backed-up bound may only move in the admissible direction
    /// for the active objective (non-decreasing lower bound for expected
    /// cost, non-increasing upper bound for goal probability); anything else
    /// means the heuristic was not admissible. Disabled in release builds.
    fn debug_check_admissible(&self, old: &V, new: &V) {
        if V::TWO_SIDED {
            // the interval merge itself asserts both endpoints
            return;
        }
        match self.objective {
            Objective::MinCost => debug_assert!(
                !is_approx_less(new.lower(), old.lower(), self.epsilon),
                "lower bound moved backwards: {} -> {}",
                old.lower(),
                new.lower()
            ),
            Objective::MaxProb => debug_assert!(
                !is_approx_greater(new.upper(), old.upper(), self.epsilon),
                "upper bound moved backwards: {} -> {}",
                old.upper(),
                new.upper()
            ),
        }
    }

    /// Q-value of one transition, with the self-loop mass folded into the
    /// linear equation. `None` marks a pure self-loop.
    fn normalized_q(
        &mut self,
        mdp: &mut M,
        id: StateId,
        t: &Transition<M::Action>,
    ) -> Option<V> {
        let cost = if self.objective.uses_action_cost() {
            mdp.action_cost(id, &t.action)
        } else {
            0.0
        };
        let mut q = V::from_value(cost);
        let mut self_loop_mass = 0.0;
        for (succ, p) in t.successors.iter() {
            if *succ == id {
                self_loop_mass += *p;
                continue;
            }
            self.ensure_initialized(mdp, *succ);
            let v = self.state_infos.infos.get(*succ).unwrap().value;
            q.add_weighted(*p, v);
        }
        if self_loop_mass > 0.0 {
            if self_loop_mass >= 1.0 - self.epsilon {
                return None;
            }
            q = q.divide_by(1.0 - self_loop_mass);
        }
        Some(q.clamp_overflow())
    }

    /// The Bellman update. Returns the change flag and, when requested, the
    /// set of greedy transitions (Q within tolerance of the optimum).
    fn compute_update(
        &mut self,
        mdp: &mut M,
        id: StateId,
        collect_greedy: bool,
    ) -> (bool, Vec<Transition<M::Action>>) {
        self.ensure_initialized(mdp, id);
        if self.state_infos.infos.entry(id).is_terminal() {
            return (false, Vec::new());
        }
        self.statistics.backups += 1;
        {
            let info = self.state_infos.infos.entry(id);
            if info.is_on_fringe() {
                info.removed_from_fringe();
            }
            if info.note_backed_up() {
                self.statistics.backed_up_states += 1;
            }
        }

        let transitions = mdp.all_transitions(id);
        let mut qs: Vec<(Transition<M::Action>, V)> = Vec::with_capacity(transitions.len());
        let mut best: Option<V> = None;
        let mut had_pure_self_loop = false;
        for t in transitions {
            match self.normalized_q(mdp, id, &t) {
                None => had_pure_self_loop = true,
                Some(q) => {
                    match best.as_mut() {
                        None => best = Some(q),
                        Some(b) => b.combine_best(q, self.objective),
                    }
                    qs.push((t, q));
                }
            }
        }

        let best = match best {
            Some(b) => b,
            None => {
                // nothing usable: promote to dead end
                if had_pure_self_loop {
                    self.statistics.self_loop_states += 1;
                }
                return (self.promote_dead_end(id), Vec::new());
            }
        };

        let optimistic = self.objective.optimistic_bound(&best);
        if self.objective.proves_dead(optimistic) {
            return (self.promote_dead_end(id), Vec::new());
        }

        let greedy = if collect_greedy {
            qs.into_iter()
                .filter(|(_, q)| {
                    is_approx_equal(
                        self.objective.optimistic_bound(q),
                        optimistic,
                        self.epsilon,
                    )
                })
                .map(|(t, _)| t)
                .collect()
        } else {
            Vec::new()
        };

        {
            let old = self.state_infos.infos.entry(id).value;
            self.debug_check_admissible(&old, &best);
        }
        let changed = self.state_infos.infos.entry(id).value.update(best, self.epsilon);
        if changed {
            self.statistics.value_changes += 1;
        }
        (changed, greedy)
    }

    fn promote_dead_end(&mut self, id: StateId) -> bool {
        let eps = self.epsilon;
        let (old, dead_value) = {
            let info = self.state_infos.infos.entry(id);
            (info.value, V::from_value(info.termination_cost))
        };
        self.debug_check_admissible(&old, &dead_value);
        let info = self.state_infos.infos.entry(id);
        let changed = info.value.update(dead_value, eps);
        if !info.is_dead_end() {
            info.set_dead_end();
            self.statistics.terminal_states += 1;
        }
        if changed {
            self.statistics.value_changes += 1;
        }
        changed
    }

    /// Bellman update without policy bookkeeping.
    pub fn bellman_update(&mut self, mdp: &mut M, id: StateId) -> bool {
        self.compute_update(mdp, id, false).0
    }

    /// Bellman update that also outputs every greedy transition.
    pub fn bellman_update_with_greedy(
        &mut self,
        mdp: &mut M,
        id: StateId,
        greedy: &mut Vec<Transition<M::Action>>,
    ) -> bool {
        let (changed, g) = self.compute_update(mdp, id, true);
        *greedy = g;
        changed
    }

    /// Bellman update that re-selects the greedy action through the picker
    /// and stores it when the solve keeps a policy.
    pub fn bellman_policy_update(&mut self, mdp: &mut M, id: StateId) -> UpdateResult<M::Action> {
        let (value_changed, mut greedy) = self.compute_update(mdp, id, true);
        if greedy.is_empty() {
            return UpdateResult {
                value_changed,
                policy_changed: false,
                greedy: None,
            };
        }
        let previous = self.get_greedy_action(id);
        let idx = self
            .picker
            .pick(previous.as_ref(), &greedy, &self.state_infos);
        let chosen = greedy.swap_remove(idx);
        let policy_changed = if self.store_policy {
            let changed = self
                .state_infos
                .infos
                .entry(id)
                .update_policy(chosen.action.clone());
            if changed {
                self.statistics.policy_updates += 1;
            }
            changed
        } else {
            false
        };
        UpdateResult {
            value_changed,
            policy_changed,
            greedy: Some(chosen),
        }
    }

    pub fn initialize_report(
        &mut self,
        mdp: &mut M,
        initial: StateId,
        report: &mut ProgressReport,
    ) {
        self.ensure_initialized(mdp, initial);
        let info = self.state_infos.infos.entry(initial);
        let estimate = match self.objective {
            Objective::MinCost => info.value.lower(),
            Objective::MaxProb => info.value.upper(),
        };
        let terminal = info.is_terminal();
        self.statistics.initial_state_estimate = estimate;
        self.statistics.initial_state_terminal = terminal;
        log::debug!("initial state estimate: {}", estimate);
        report.print(&[("v", estimate)]);
    }

    pub fn print_statistics(&self) {
        self.statistics.print();
    }
}

/// Common engine surface: solve from an initial state under a countdown
/// timer, expose the base for bound lookups, and support the state reset
/// FRET needs between trap-elimination rounds.
pub trait HeuristicSearchEngine<M: Mdp, V: EngineValue> {
    fn solve(
        &mut self,
        mdp: &mut M,
        initial: StateId,
        timer: &CountdownTimer,
        report: &mut ProgressReport,
    ) -> Result<Interval, SolverError>;

    fn base(&self) -> &HeuristicSearchBase<M, V>;

    fn base_mut(&mut self) -> &mut HeuristicSearchBase<M, V>;

    /// The state policy extraction starts from; engines that rewrite the
    /// state space (FRET) map the initial state to its representative.
    fn policy_root(&self, _mdp: &M, initial: StateId) -> StateId {
        initial
    }

    fn reset_search_state(&mut self) {}

    fn print_statistics(&self) {
        self.base().print_statistics();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explicit::ExplicitMdp;
    use crate::solver::evaluator::BlindEvaluator;
    use crate::solver::picker::ArbitraryPicker;
    use crate::solver::value::DEFAULT_EPSILON;

    fn ssp_base(mdp: &ExplicitMdp) -> HeuristicSearchBase<ExplicitMdp, f64> {
        let _ = mdp;
        HeuristicSearchBase::new(
            Objective::MinCost,
            DEFAULT_EPSILON,
            true,
            Box::new(BlindEvaluator::new(Objective::MinCost)),
            Box::new(ArbitraryPicker),
        )
    }

    #[test]
    fn goal_states_initialize_terminal_with_value_zero() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[1],
            &[(0, "go", 1.0, &[(1, 1.0)])],
            1000.0,
        );
        let mut base = ssp_base(&mdp);
        let goal = mdp.register(1);
        base.ensure_initialized(&mut mdp, goal);
        assert!(base.is_goal(goal));
        assert_eq!(base.lookup_value(goal), 0.0);
        assert_eq!(base.statistics.goal_states, 1);
    }

    #[test]
    fn update_backs_off_fringe_and_counts() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[1],
            &[(0, "go", 1.0, &[(1, 1.0)])],
            1000.0,
        );
        let mut base = ssp_base(&mdp);
        let s0 = mdp.register(0);
        base.ensure_initialized(&mut mdp, s0);
        assert!(base.is_on_fringe(s0));
        let changed = base.bellman_update(&mut mdp, s0);
        assert!(changed);
        assert!(!base.is_on_fringe(s0));
        assert_eq!(base.lookup_value(s0), 1.0);
        assert_eq!(base.statistics.backups, 1);
        assert_eq!(base.statistics.backed_up_states, 1);
    }

    #[test]
    fn self_loop_mass_is_normalized() {
        // cost 1, loop back with 0.5 -> expected cost 2
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[1],
            &[(0, "flip", 1.0, &[(0, 0.5), (1, 0.5)])],
            1000.0,
        );
        let mut base = ssp_base(&mdp);
        let s0 = mdp.register(0);
        base.bellman_update(&mut mdp, s0);
        assert!(is_approx_equal(base.lookup_value(s0), 2.0, 1e-9));
    }

    #[test]
    fn pure_self_loop_state_becomes_dead_end() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[1],
            &[(0, "spin", 1.0, &[(0, 1.0)])],
            1000.0,
        );
        let mut base = ssp_base(&mdp);
        let s0 = mdp.register(0);
        base.bellman_update(&mut mdp, s0);
        assert!(base.is_dead_end(s0));
        assert_eq!(base.lookup_value(s0), 1000.0);
        assert_eq!(base.statistics.self_loop_states, 1);
    }

    #[test]
    fn stateless_state_is_dead_with_termination_cost() {
        // s1 has no actions and is not a goal
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[2],
            &[(0, "go", 1.0, &[(1, 1.0)])],
            1000.0,
        );
        let mut base = ssp_base(&mdp);
        let s0 = mdp.register(0);
        let s1 = mdp.register(1);
        base.bellman_update(&mut mdp, s1);
        assert!(base.is_dead_end(s1));
        assert_eq!(base.lookup_value(s1), 1000.0);
        // s0 inherits the dead-end value plus its own cost
        base.bellman_update(&mut mdp, s0);
        assert!(is_approx_equal(base.lookup_value(s0), 1001.0, 1e-9));
        assert!(!base.is_dead_end(s0));
    }

    #[test]
    fn infinite_cost_promotes_to_dead_end() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[2],
            &[(0, "go", 1.0, &[(1, 1.0)])],
            INFINITE,
        );
        let mut base = ssp_base(&mdp);
        let s0 = mdp.register(0);
        let s1 = mdp.register(1);
        base.bellman_update(&mut mdp, s1);
        assert!(base.is_dead_end(s1));
        base.bellman_update(&mut mdp, s0);
        // the only action has infinite Q; the state is proven dead
        assert!(base.is_dead_end(s0));
        assert_eq!(base.lookup_value(s0), INFINITE);
    }

    #[test]
    fn policy_update_reports_action_changes() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[1],
            &[
                (0, "slow", 2.0, &[(1, 1.0)]),
                (0, "fast", 1.0, &[(1, 1.0)]),
            ],
            1000.0,
        );
        let mut base = ssp_base(&mdp);
        let s0 = mdp.register(0);
        let r = base.bellman_policy_update(&mut mdp, s0);
        assert!(r.value_changed && r.policy_changed);
        let greedy = base.get_greedy_action(s0).unwrap();
        assert_eq!(mdp.action_name(&greedy), "fast");
        // repeating the update changes nothing
        let r2 = base.bellman_policy_update(&mut mdp, s0);
        assert!(!r2.value_changed && !r2.policy_changed);
    }

    #[test]
    fn maxprob_update_uses_probability_mass() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[1],
            &[(0, "try", 1.0, &[(1, 0.3), (2, 0.7)])],
            0.0,
        );
        let mut base: HeuristicSearchBase<ExplicitMdp, f64> = HeuristicSearchBase::new(
            Objective::MaxProb,
            DEFAULT_EPSILON,
            false,
            Box::new(BlindEvaluator::new(Objective::MaxProb)),
            Box::new(ArbitraryPicker),
        );
        let s0 = mdp.register(0);
        let s2 = mdp.register(2);
        // converge the child first: no actions, not a goal -> probability 0
        base.bellman_update(&mut mdp, s2);
        assert!(base.is_dead_end(s2));
        assert_eq!(base.lookup_value(s2), 0.0);
        base.bellman_update(&mut mdp, s0);
        assert!(is_approx_equal(base.lookup_value(s0), 0.3, 1e-9));
    }
}
