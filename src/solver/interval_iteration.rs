//! Interval iteration: MEC quotient, qualitative classification, then
//! topological value iteration in the interval regime until the two bounds
//! meet. Delivers anytime two-sided bounds for every reachable state.

use crate::solver::base::{HeuristicSearchBase, HeuristicSearchEngine, Statistics};
use crate::solver::end_components::{build_quotient_system, EcdStatistics};
use crate::solver::error::SolverError;
use crate::solver::evaluator::Evaluator;
use crate::solver::mdp::{Mdp, StateId};
use crate::solver::picker::ArbitraryPicker;
use crate::solver::reachability::qualitative_reachability;
use crate::solver::report::ProgressReport;
use crate::solver::timer::CountdownTimer;
use crate::solver::topological_vi::{TopologicalVi, TviStatistics};
use crate::solver::value::{Interval, Objective};

pub struct IntervalIterationOutcome {
    pub bounds: Interval,
    /// Final interval of every registered base state, indexed by state id.
    pub values: Vec<Interval>,
    pub dead: Vec<StateId>,
    pub one: Vec<StateId>,
    pub proven_unsolvable: bool,
    pub statistics: Statistics,
    pub ecd_statistics: EcdStatistics,
    pub tvi_statistics: TviStatistics,
}

impl IntervalIterationOutcome {
    pub fn print_statistics(&self) {
        self.statistics.print();
        self.tvi_statistics.print();
        self.ecd_statistics.print();
    }
}

/// Runs interval iteration from `initial`. For MaxProb, `extract_one`
/// additionally collapses the certainty class; SSP collapses only dead
/// states and restricts end components to zero-cost actions.
pub fn interval_iteration<M: Mdp>(
    mdp: &mut M,
    initial: StateId,
    objective: Objective,
    epsilon: f64,
    evaluator: Box<dyn Evaluator<M::State>>,
    extract_one: bool,
    timer: &CountdownTimer,
    report: &mut ProgressReport,
) -> Result<IntervalIterationOutcome, SolverError> {
    let zero_cost_inner_only = objective == Objective::MinCost;
    let (mut quotient, ecd_statistics) =
        build_quotient_system(mdp, initial, zero_cost_inner_only, timer)?;

    let q_init = quotient.translate(initial);
    let qr = qualitative_reachability(&mut quotient, q_init, timer)?;

    let dead: Vec<StateId> = qr
        .dead
        .iter()
        .flat_map(|s| quotient.members_of(*s))
        .collect();
    let one: Vec<StateId> = qr
        .one
        .iter()
        .flat_map(|s| quotient.members_of(*s))
        .collect();

    if !qr.dead.is_empty() {
        quotient.build_quotient_closed(&qr.dead, qr.dead[0]);
    }
    if extract_one && !qr.one.is_empty() {
        quotient.build_quotient_closed(&qr.one, qr.one[0]);
    }
    let q_init = quotient.translate(q_init);
    let proven_unsolvable = !qr.dead.is_empty() && quotient.translate(initial) == qr.dead[0];

    let base = HeuristicSearchBase::new(
        objective,
        epsilon,
        false,
        evaluator,
        Box::new(ArbitraryPicker),
    );
    let mut vi: TopologicalVi<_, Interval> = TopologicalVi::new(base);
    let bounds = vi.solve(&mut quotient, q_init, timer, report)?;

    // every original state inherits the interval of its class
    let num_states = quotient.base().num_states();
    let mut values = Vec::with_capacity(num_states);
    for i in 0..num_states {
        let repr = quotient.translate(StateId::from(i));
        values.push(vi.base().lookup_bounds(repr));
    }

    Ok(IntervalIterationOutcome {
        bounds,
        values,
        dead,
        one,
        proven_unsolvable,
        statistics: vi.base().statistics.clone(),
        ecd_statistics,
        tvi_statistics: vi.tvi_statistics.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explicit::ExplicitMdp;
    use crate::solver::evaluator::BlindEvaluator;
    use crate::solver::value::{is_approx_equal, DEFAULT_EPSILON, INFINITE};

    fn run(
        mdp: &mut ExplicitMdp,
        objective: Objective,
        extract_one: bool,
    ) -> IntervalIterationOutcome {
        let init = mdp.initial_id();
        interval_iteration(
            mdp,
            init,
            objective,
            DEFAULT_EPSILON,
            Box::new(BlindEvaluator::new(objective)),
            extract_one,
            &CountdownTimer::unlimited(),
            &mut ProgressReport::disabled(),
        )
        .unwrap()
    }

    #[test]
    fn maxprob_end_component_converges_to_one() {
        // plain value iteration cycles forever between s0 and s1; the
        // quotient pipeline proves probability one for both
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[2],
            &[
                (0, "a", 1.0, &[(0, 0.5), (1, 0.5)]),
                (1, "b", 1.0, &[(0, 0.5), (2, 0.5)]),
            ],
            0.0,
        );
        let outcome = run(&mut mdp, Objective::MaxProb, true);
        assert!(is_approx_equal(outcome.bounds.lower, 1.0, 1e-4));
        assert!(is_approx_equal(outcome.bounds.upper, 1.0, 1e-4));
        let s1 = mdp.state_id(&1);
        let v1 = outcome.values[s1.index()];
        assert!(is_approx_equal(v1.lower, 1.0, 1e-4));
        assert!(!outcome.proven_unsolvable);
    }

    #[test]
    fn maxprob_with_failure_branch() {
        // reach the goal with 0.5 per attempt but fall into a trap otherwise
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[1],
            &[(0, "try", 1.0, &[(1, 0.5), (2, 0.5)])],
            0.0,
        );
        let outcome = run(&mut mdp, Objective::MaxProb, true);
        assert!(is_approx_equal(outcome.bounds.lower, 0.5, 1e-4));
        assert!(is_approx_equal(outcome.bounds.upper, 0.5, 1e-4));
        let s2 = mdp.state_id(&2);
        assert!(outcome.dead.contains(&s2));
    }

    #[test]
    fn ssp_intervals_collapse_on_proper_chains() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[2],
            &[
                (0, "a", 1.5, &[(1, 1.0)]),
                (1, "b", 0.5, &[(2, 1.0)]),
            ],
            INFINITE,
        );
        let outcome = run(&mut mdp, Objective::MinCost, false);
        assert!(is_approx_equal(outcome.bounds.lower, 2.0, 1e-4));
        assert!(is_approx_equal(outcome.bounds.upper, 2.0, 1e-4));
    }

    #[test]
    fn ssp_zero_cost_loop_is_collapsed() {
        // a zero-cost two-state loop with a costly exit would stall plain
        // value iteration at the loop value; the quotient removes it
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[2],
            &[
                (0, "spin", 0.0, &[(1, 1.0)]),
                (1, "spin_back", 0.0, &[(0, 1.0)]),
                (1, "exit", 3.0, &[(2, 1.0)]),
            ],
            INFINITE,
        );
        let outcome = run(&mut mdp, Objective::MinCost, false);
        assert!(is_approx_equal(outcome.bounds.lower, 3.0, 1e-4));
        assert_eq!(outcome.ecd_statistics.mecs, 1);
    }

    #[test]
    fn dead_initial_state_is_proven_unsolvable() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[5],
            &[(0, "loop", 1.0, &[(0, 1.0)])],
            0.0,
        );
        let outcome = run(&mut mdp, Objective::MaxProb, true);
        assert!(outcome.proven_unsolvable);
        assert!(is_approx_equal(outcome.bounds.upper, 0.0, 1e-9));
    }

    #[test]
    fn quotient_value_matches_direct_interval_iteration() {
        use crate::solver::base::HeuristicSearchBase;
        use crate::solver::end_components::build_quotient_system;
        use crate::solver::picker::ArbitraryPicker;
        use crate::solver::topological_vi::TopologicalVi;

        let build = || {
            ExplicitMdp::from_parts(
                0,
                &[2],
                &[
                    (0, "spin", 0.0, &[(1, 1.0)]),
                    (1, "spin_back", 0.0, &[(0, 1.0)]),
                    (1, "exit", 3.0, &[(2, 1.0)]),
                ],
                INFINITE,
            )
        };

        // scalar topological VI on the hand-built quotient
        let mut mdp = build();
        let init = mdp.initial_id();
        let (mut quotient, _) =
            build_quotient_system(mdp, init, true, &CountdownTimer::unlimited()).unwrap();
        let q_init = quotient.translate(init);
        let mut vi: TopologicalVi<_, f64> = TopologicalVi::new(HeuristicSearchBase::new(
            Objective::MinCost,
            DEFAULT_EPSILON,
            false,
            Box::new(BlindEvaluator::new(Objective::MinCost)),
            Box::new(ArbitraryPicker),
        ));
        let direct = vi
            .solve(
                &mut quotient,
                q_init,
                &CountdownTimer::unlimited(),
                &mut ProgressReport::disabled(),
            )
            .unwrap();

        // interval iteration on the original agrees at the representative
        let mut original = build();
        let outcome = run(&mut original, Objective::MinCost, false);
        assert!(is_approx_equal(direct.lower, outcome.bounds.lower, 1e-4));
    }

    #[test]
    fn intervals_are_wellformed_everywhere() {
        let mut mdp = ExplicitMdp::from_parts(
            0,
            &[3],
            &[
                (0, "x", 1.0, &[(1, 0.5), (2, 0.5)]),
                (1, "y", 1.0, &[(3, 1.0)]),
                (2, "z", 1.0, &[(3, 0.5), (0, 0.5)]),
            ],
            0.0,
        );
        let outcome = run(&mut mdp, Objective::MaxProb, true);
        for v in &outcome.values {
            assert!(v.lower <= v.upper + 1e-9);
            assert!(v.lower >= -1e-9 && v.upper <= 1.0 + 1e-9);
        }
    }
}
