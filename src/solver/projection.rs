//! Pattern projections: perfect ranking of task states under a pattern, the
//! abstract MDP induced by projected operators, and the table-backed
//! evaluator a solved projection provides. Pattern collection generation is
//! outside this crate; a single pattern is built and solved here.

use crate::solver::base::{HeuristicSearchBase, HeuristicSearchEngine};
use crate::solver::error::SolverError;
use crate::solver::evaluator::{BlindEvaluator, Estimate, Evaluator};
use crate::solver::mdp::{Distribution, Mdp, OperatorId, StateId, TerminationInfo};
use crate::solver::picker::ArbitraryPicker;
use crate::solver::report::ProgressReport;
use crate::solver::timer::CountdownTimer;
use crate::solver::topological_vi::TopologicalVi;
use crate::solver::value::{Interval, Objective, INFINITE};
use crate::task::{GroundedTask, TaskState};

const MAX_ABSTRACT_STATES: usize = 1 << 22;

/// Perfect hash over the values of a pattern (a sorted set of variables).
pub struct ProjectionRanker {
    pattern: Vec<usize>,
    sizes: Vec<usize>,
    multipliers: Vec<usize>,
    size: usize,
}

impl ProjectionRanker {
    pub fn new(task: &GroundedTask, pattern: &[usize]) -> Result<ProjectionRanker, SolverError> {
        let mut pattern: Vec<usize> = pattern.to_vec();
        pattern.sort_unstable();
        pattern.dedup();
        if pattern.is_empty() {
            return Err(SolverError::InvalidConfiguration(
                "empty pattern".to_string(),
            ));
        }
        let mut sizes = Vec::with_capacity(pattern.len());
        for var in &pattern {
            match task.variables.get(*var) {
                None => {
                    return Err(SolverError::InvalidConfiguration(format!(
                        "pattern variable {} outside the task",
                        var
                    )))
                }
                Some(v) => sizes.push(v.domain.len()),
            }
        }
        let mut multipliers = Vec::with_capacity(pattern.len());
        let mut size: usize = 1;
        for s in &sizes {
            multipliers.push(size);
            size = size.checked_mul(*s).unwrap_or(usize::MAX);
            if size > MAX_ABSTRACT_STATES {
                return Err(SolverError::InvalidConfiguration(format!(
                    "pattern spans more than {} abstract states",
                    MAX_ABSTRACT_STATES
                )));
            }
        }
        Ok(ProjectionRanker {
            pattern,
            sizes,
            multipliers,
            size,
        })
    }

    pub fn pattern(&self) -> &[usize] {
        &self.pattern
    }

    pub fn num_abstract_states(&self) -> usize {
        self.size
    }

    /// Ranks a full task state.
    pub fn rank(&self, state: &[u16]) -> usize {
        self.pattern
            .iter()
            .zip(self.multipliers.iter())
            .map(|(var, m)| state[*var] as usize * m)
            .sum()
    }

    /// Inverse: pattern-local values of an abstract rank.
    pub fn unrank(&self, rank: usize) -> Vec<u16> {
        debug_assert!(rank < self.size);
        let mut values = Vec::with_capacity(self.pattern.len());
        let mut rest = rank;
        for s in &self.sizes {
            values.push((rest % s) as u16);
            rest /= s;
        }
        values
    }

    fn local_index(&self, var: usize) -> Option<usize> {
        self.pattern.iter().position(|v| *v == var)
    }
}

#[derive(Debug, Clone)]
pub struct AbstractOutcome {
    pub probability: f64,
    pub effects: Vec<(usize, u16)>,
}

/// A ground operator restricted to the pattern variables.
#[derive(Debug, Clone)]
pub struct AbstractOperator {
    pub source: usize,
    pub cost: f64,
    pub precondition: Vec<(usize, u16)>,
    pub outcomes: Vec<AbstractOutcome>,
}

fn project_operators(task: &GroundedTask, ranker: &ProjectionRanker) -> Vec<AbstractOperator> {
    let mut result = Vec::new();
    for (i, op) in task.operators.iter().enumerate() {
        let precondition: Vec<(usize, u16)> = op
            .precondition
            .iter()
            .filter_map(|f| ranker.local_index(f.var).map(|l| (l, f.val)))
            .collect();
        let mut outcomes: Vec<AbstractOutcome> = Vec::new();
        for outcome in &op.outcomes {
            let mut effects: Vec<(usize, u16)> = outcome
                .effects
                .iter()
                .filter_map(|e| ranker.local_index(e.var).map(|l| (l, e.val)))
                .collect();
            effects.sort_unstable();
            match outcomes.iter_mut().find(|o| o.effects == effects) {
                Some(o) => o.probability += outcome.probability,
                None => outcomes.push(AbstractOutcome {
                    probability: outcome.probability,
                    effects,
                }),
            }
        }
        // operators without any effect on the pattern are identities
        if outcomes.iter().all(|o| o.effects.is_empty()) {
            continue;
        }
        result.push(AbstractOperator {
            source: i,
            cost: op.cost,
            precondition,
            outcomes,
        });
    }
    result
}

/// The abstract state space of a projection. Ranks double as state ids, so
/// the registry is the identity.
pub struct ProjectedMdp {
    ranker: ProjectionRanker,
    operators: Vec<AbstractOperator>,
    goal: Vec<(usize, u16)>,
    non_goal_cost: f64,
}

impl ProjectedMdp {
    pub fn new(
        task: &GroundedTask,
        ranker: ProjectionRanker,
        non_goal_cost: f64,
    ) -> ProjectedMdp {
        let operators = project_operators(task, &ranker);
        let goal: Vec<(usize, u16)> = task
            .goal
            .iter()
            .filter_map(|f| ranker.local_index(f.var).map(|l| (l, f.val)))
            .collect();
        ProjectedMdp {
            ranker,
            operators,
            goal,
            non_goal_cost,
        }
    }

    pub fn ranker(&self) -> &ProjectionRanker {
        &self.ranker
    }

    fn matches(assignment: &[(usize, u16)], local: &[u16]) -> bool {
        assignment.iter().all(|(var, val)| local[*var] == *val)
    }
}

impl Mdp for ProjectedMdp {
    type State = usize;
    type Action = OperatorId;

    fn state_id(&mut self, state: &usize) -> StateId {
        StateId::from(*state)
    }

    fn state(&self, id: StateId) -> usize {
        id.index()
    }

    fn num_states(&self) -> usize {
        self.ranker.size
    }

    fn applicable_actions(&mut self, id: StateId) -> Vec<OperatorId> {
        let local = self.ranker.unrank(id.index());
        self.operators
            .iter()
            .enumerate()
            .filter(|(_, op)| Self::matches(&op.precondition, &local))
            .map(|(i, _)| OperatorId(i))
            .collect()
    }

    fn transition(&mut self, id: StateId, action: &OperatorId) -> Distribution<StateId> {
        let local = self.ranker.unrank(id.index());
        let mut dist = Distribution::new();
        for outcome in &self.operators[action.0].outcomes {
            let mut succ = local.clone();
            for (var, val) in &outcome.effects {
                succ[*var] = *val;
            }
            let mut rank = 0usize;
            for (i, v) in succ.iter().enumerate() {
                rank += *v as usize * self.ranker.multipliers[i];
            }
            dist.add_probability(StateId::from(rank), outcome.probability);
        }
        dist
    }

    fn termination_info(&mut self, id: StateId) -> TerminationInfo {
        let local = self.ranker.unrank(id.index());
        TerminationInfo {
            is_goal: Self::matches(&self.goal, &local),
            non_goal_cost: self.non_goal_cost,
        }
    }

    fn action_cost(&mut self, _id: StateId, action: &OperatorId) -> f64 {
        self.operators[action.0].cost
    }
}

/// Evaluator backed by a solved projection table. Admissible on the side
/// that abstraction preserves: lower bounds for expected cost, upper bounds
/// for goal probability.
pub struct PdbEvaluator {
    ranker: ProjectionRanker,
    table: Vec<Interval>,
    objective: Objective,
    dead_value: f64,
}

impl PdbEvaluator {
    pub fn table(&self) -> &[Interval] {
        &self.table
    }
}

impl Evaluator<TaskState> for PdbEvaluator {
    fn evaluate(&self, state: &TaskState) -> Estimate {
        let entry = self.table[self.ranker.rank(state)];
        match self.objective {
            Objective::MinCost => {
                if !entry.lower.is_finite() {
                    Estimate::terminal(self.dead_value)
                } else {
                    Estimate::open(entry.lower, INFINITE)
                }
            }
            Objective::MaxProb => {
                if entry.upper <= 0.0 {
                    Estimate::terminal(0.0)
                } else {
                    Estimate::open(0.0, entry.upper)
                }
            }
        }
    }
}

/// Builds and solves the abstract MDP of one pattern with topological value
/// iteration, covering every abstract state.
pub fn build_pdb(
    task: &GroundedTask,
    pattern: &[usize],
    objective: Objective,
    non_goal_cost: f64,
    epsilon: f64,
    timer: &CountdownTimer,
) -> Result<PdbEvaluator, SolverError> {
    let ranker = ProjectionRanker::new(task, pattern)?;
    let table_ranker = ProjectionRanker::new(task, pattern)?;
    let mut mdp = ProjectedMdp::new(task, ranker, non_goal_cost);
    let base: HeuristicSearchBase<ProjectedMdp, Interval> = HeuristicSearchBase::new(
        objective,
        epsilon,
        false,
        Box::new(BlindEvaluator::new(objective)),
        Box::new(ArbitraryPicker),
    );
    let mut vi = TopologicalVi::new(base);
    let mut report = ProgressReport::disabled();
    for rank in 0..mdp.num_states() {
        let id = StateId::from(rank);
        if vi.base().was_visited(id) {
            continue;
        }
        vi.solve(&mut mdp, id, timer, &mut report)?;
    }
    let table: Vec<Interval> = (0..mdp.num_states())
        .map(|rank| vi.base().lookup_bounds(StateId::from(rank)))
        .collect();
    Ok(PdbEvaluator {
        ranker: table_ranker,
        table,
        objective,
        dead_value: non_goal_cost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Effect, Fact, Operator, Outcome, Variable};

    fn two_var_task() -> GroundedTask {
        // move a token across two cells, then latch a switch
        GroundedTask {
            variables: vec![
                Variable {
                    name: "pos".to_string(),
                    domain: vec!["left".to_string(), "right".to_string()],
                },
                Variable {
                    name: "switch".to_string(),
                    domain: vec!["off".to_string(), "on".to_string()],
                },
            ],
            initial: vec![0, 0],
            goal: vec![Fact { var: 0, val: 1 }, Fact { var: 1, val: 1 }],
            operators: vec![
                Operator {
                    name: "move".to_string(),
                    cost: 1.0,
                    precondition: vec![Fact { var: 0, val: 0 }],
                    outcomes: vec![Outcome {
                        probability: 1.0,
                        effects: vec![Effect {
                            var: 0,
                            val: 1,
                            condition: vec![],
                        }],
                    }],
                },
                Operator {
                    name: "latch".to_string(),
                    cost: 2.0,
                    precondition: vec![Fact { var: 0, val: 1 }],
                    outcomes: vec![Outcome {
                        probability: 1.0,
                        effects: vec![Effect {
                            var: 1,
                            val: 1,
                            condition: vec![],
                        }],
                    }],
                },
            ],
            axioms: vec![],
        }
    }

    #[test]
    fn ranking_round_trips() {
        let task = two_var_task();
        let ranker = ProjectionRanker::new(&task, &[1, 0]).unwrap();
        assert_eq!(ranker.num_abstract_states(), 4);
        for rank in 0..4 {
            let local = ranker.unrank(rank);
            let mut full = vec![0u16; 2];
            for (i, var) in ranker.pattern().iter().enumerate() {
                full[*var] = local[i];
            }
            assert_eq!(ranker.rank(&full), rank);
        }
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        let task = two_var_task();
        assert!(ProjectionRanker::new(&task, &[]).is_err());
        assert!(ProjectionRanker::new(&task, &[5]).is_err());
    }

    #[test]
    fn identity_operators_are_dropped() {
        let task = two_var_task();
        let ranker = ProjectionRanker::new(&task, &[1]).unwrap();
        let ops = project_operators(&task, &ranker);
        // only "latch" touches the switch
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].source, 1);
        // its precondition on pos projects away
        assert!(ops[0].precondition.is_empty());
    }

    #[test]
    fn pdb_lower_bounds_are_admissible() {
        let task = two_var_task();
        let pdb = build_pdb(
            &task,
            &[1],
            Objective::MinCost,
            INFINITE,
            1e-5,
            &CountdownTimer::unlimited(),
        )
        .unwrap();
        // true optimal cost from the initial state is 3 (move + latch);
        // the projection sees only the latch
        let est = pdb.evaluate(&vec![0, 0]);
        assert!(!est.terminal);
        assert!(est.lower <= 3.0 + 1e-9);
        assert!(est.lower >= 2.0 - 1e-9);
        // abstract goal states evaluate to zero
        let goal_est = pdb.evaluate(&vec![0, 1]);
        assert_eq!(goal_est.lower, 0.0);
    }

    #[test]
    fn pdb_detects_abstract_dead_ends() {
        let mut task = two_var_task();
        // make the switch impossible to latch
        task.operators.remove(1);
        let pdb = build_pdb(
            &task,
            &[1],
            Objective::MinCost,
            INFINITE,
            1e-5,
            &CountdownTimer::unlimited(),
        )
        .unwrap();
        let est = pdb.evaluate(&vec![0, 0]);
        assert!(est.terminal);
    }

    #[test]
    fn maxprob_pdb_upper_bounds() {
        let mut task = two_var_task();
        // latching only succeeds half the time, otherwise the switch breaks
        task.variables[1].domain.push("broken".to_string());
        task.operators[1].outcomes = vec![
            Outcome {
                probability: 0.5,
                effects: vec![Effect {
                    var: 1,
                    val: 1,
                    condition: vec![],
                }],
            },
            Outcome {
                probability: 0.5,
                effects: vec![Effect {
                    var: 1,
                    val: 2,
                    condition: vec![],
                }],
            },
        ];
        let pdb = build_pdb(
            &task,
            &[1],
            Objective::MaxProb,
            0.0,
            1e-5,
            &CountdownTimer::unlimited(),
        )
        .unwrap();
        let est = pdb.evaluate(&vec![0, 0]);
        assert!(!est.terminal);
        assert!(est.upper <= 1.0 && est.upper >= 0.5 - 1e-6);
    }
}
