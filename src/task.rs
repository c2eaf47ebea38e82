//! Grounded, factored planning task: variables with finite domains,
//! probabilistic operators with outcomes, and a conjunctive goal. Read from
//! JSON and presented to the solver core through the `Mdp` trait.

use std::collections::HashMap;
use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use itertools::Itertools;
use serde::Deserialize;

use crate::solver::error::SolverError;
use crate::solver::evaluator::DeadEndDetector;
use crate::solver::mdp::{Distribution, Mdp, OperatorId, StateId, TerminationInfo};
use crate::solver::value::is_approx_equal;

#[derive(Debug, Deserialize, Clone)]
pub struct Variable {
    pub name: String,
    pub domain: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct Fact {
    pub var: usize,
    pub val: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Effect {
    pub var: usize,
    pub val: u16,
    #[serde(default)]
    pub condition: Vec<Fact>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Outcome {
    pub probability: f64,
    #[serde(default)]
    pub effects: Vec<Effect>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Operator {
    pub name: String,
    #[serde(default = "default_cost")]
    pub cost: f64,
    #[serde(default)]
    pub precondition: Vec<Fact>,
    pub outcomes: Vec<Outcome>,
}

fn default_cost() -> f64 {
    1.0
}

/// Derived-predicate rule. Representable in the input so that tasks using
/// them are detected and rejected rather than silently misread.
#[derive(Debug, Deserialize, Clone)]
pub struct Axiom {
    pub head: Fact,
    #[serde(default)]
    pub body: Vec<Fact>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GroundedTask {
    pub variables: Vec<Variable>,
    pub initial: Vec<u16>,
    pub goal: Vec<Fact>,
    pub operators: Vec<Operator>,
    #[serde(default)]
    pub axioms: Vec<Axiom>,
}

pub fn read_task_json<P: AsRef<Path>>(path: P) -> Result<GroundedTask, Box<dyn Error>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let u = serde_json::from_reader(reader)?;
    Ok(u)
}

impl GroundedTask {
    fn check_fact(&self, fact: &Fact, what: &str) -> Result<(), SolverError> {
        let domain = self
            .variables
            .get(fact.var)
            .map(|v| v.domain.len())
            .unwrap_or(0);
        if fact.var >= self.variables.len() || fact.val as usize >= domain {
            return Err(SolverError::InvalidConfiguration(format!(
                "{} references variable {} value {} outside the task",
                what, fact.var, fact.val
            )));
        }
        Ok(())
    }

    /// Structural validation, run once at load time before any search.
    pub fn validate(&self, eps: f64) -> Result<(), SolverError> {
        if !self.axioms.is_empty() {
            return Err(SolverError::Unsupported("axioms".to_string()));
        }
        if self.initial.len() != self.variables.len() {
            return Err(SolverError::InvalidConfiguration(format!(
                "initial state assigns {} of {} variables",
                self.initial.len(),
                self.variables.len()
            )));
        }
        for (var, val) in self.initial.iter().enumerate() {
            self.check_fact(&Fact { var, val: *val }, "initial state")?;
        }
        for fact in &self.goal {
            self.check_fact(fact, "goal")?;
        }
        for op in &self.operators {
            if op.cost.is_nan() || op.cost < 0.0 {
                return Err(SolverError::InvalidConfiguration(format!(
                    "operator {} has negative cost",
                    op.name
                )));
            }
            for fact in &op.precondition {
                self.check_fact(fact, &op.name)?;
            }
            let mut mass = 0.0;
            for outcome in &op.outcomes {
                if outcome.probability.is_nan()
                    || outcome.probability <= 0.0
                    || outcome.probability > 1.0
                {
                    return Err(SolverError::InvalidConfiguration(format!(
                        "operator {} has outcome probability {}",
                        op.name, outcome.probability
                    )));
                }
                mass += outcome.probability;
                for effect in &outcome.effects {
                    self.check_fact(
                        &Fact {
                            var: effect.var,
                            val: effect.val,
                        },
                        &op.name,
                    )?;
                    if !effect.condition.is_empty() {
                        return Err(SolverError::Unsupported(format!(
                            "conditional effects (operator {})",
                            op.name
                        )));
                    }
                }
            }
            if !is_approx_equal(mass, 1.0, eps.max(1e-6)) {
                return Err(SolverError::InvalidConfiguration(format!(
                    "operator {} outcome probabilities sum to {}",
                    op.name, mass
                )));
            }
        }
        Ok(())
    }

    pub fn unit_cost(&self) -> bool {
        self.operators.iter().all(|op| op.cost == 1.0)
    }

    pub fn holds(condition: &[Fact], state: &[u16]) -> bool {
        condition.iter().all(|f| state[f.var] == f.val)
    }
}

pub type TaskState = Vec<u16>;

/// The grounded task behind the `Mdp` interface, with the dense state
/// registry handing out ids on first contact.
pub struct GroundedMdp {
    task: GroundedTask,
    non_goal_cost: f64,
    ids: HashMap<TaskState, StateId>,
    states: Vec<TaskState>,
}

impl GroundedMdp {
    pub fn new(task: GroundedTask, non_goal_cost: f64) -> GroundedMdp {
        GroundedMdp {
            task,
            non_goal_cost,
            ids: HashMap::new(),
            states: Vec::new(),
        }
    }

    pub fn task(&self) -> &GroundedTask {
        &self.task
    }

    pub fn initial_id(&mut self) -> StateId {
        let initial = self.task.initial.clone();
        self.state_id(&initial)
    }

    pub fn operator_name(&self, op: &OperatorId) -> &str {
        &self.task.operators[op.0].name
    }

    /// `var=value` rendering in variable order.
    pub fn format_state(&self, id: StateId) -> String {
        let state = &self.states[id.index()];
        state
            .iter()
            .enumerate()
            .map(|(var, val)| {
                format!(
                    "{}={}",
                    self.task.variables[var].name,
                    self.task.variables[var].domain[*val as usize]
                )
            })
            .join(", ")
    }
}

impl Mdp for GroundedMdp {
    type State = TaskState;
    type Action = OperatorId;

    fn state_id(&mut self, state: &TaskState) -> StateId {
        if let Some(id) = self.ids.get(state) {
            return *id;
        }
        let id = StateId::from(self.states.len());
        self.states.push(state.clone());
        self.ids.insert(state.clone(), id);
        id
    }

    fn state(&self, id: StateId) -> TaskState {
        self.states[id.index()].clone()
    }

    fn num_states(&self) -> usize {
        self.states.len()
    }

    fn applicable_actions(&mut self, id: StateId) -> Vec<OperatorId> {
        let state = &self.states[id.index()];
        self.task
            .operators
            .iter()
            .enumerate()
            .filter(|(_, op)| GroundedTask::holds(&op.precondition, state))
            .map(|(i, _)| OperatorId(i))
            .collect()
    }

    fn transition(&mut self, id: StateId, action: &OperatorId) -> Distribution<StateId> {
        let state = self.states[id.index()].clone();
        let outcomes = self.task.operators[action.0].outcomes.clone();
        let mut dist = Distribution::new();
        for outcome in outcomes {
            let mut succ = state.clone();
            for effect in &outcome.effects {
                succ[effect.var] = effect.val;
            }
            let succ_id = self.state_id(&succ);
            dist.add_probability(succ_id, outcome.probability);
        }
        dist
    }

    fn termination_info(&mut self, id: StateId) -> TerminationInfo {
        let state = &self.states[id.index()];
        TerminationInfo {
            is_goal: GroundedTask::holds(&self.task.goal, state),
            non_goal_cost: self.non_goal_cost,
        }
    }

    fn action_cost(&mut self, _id: StateId, action: &OperatorId) -> f64 {
        self.task.operators[action.0].cost
    }
}

/// All-outcomes delete-relaxation reachability: a state is declared dead
/// when even the relaxed task cannot reach the goal from it. Reliable, so
/// it can back the dead-end pruning evaluator.
pub struct RelaxedReachability {
    task: GroundedTask,
}

impl RelaxedReachability {
    pub fn new(task: GroundedTask) -> RelaxedReachability {
        RelaxedReachability { task }
    }
}

impl DeadEndDetector<TaskState> for RelaxedReachability {
    fn is_dead_end(&self, state: &TaskState) -> bool {
        let mut reached: Vec<Vec<bool>> = self
            .task
            .variables
            .iter()
            .map(|v| vec![false; v.domain.len()])
            .collect();
        for (var, val) in state.iter().enumerate() {
            reached[var][*val as usize] = true;
        }
        let relaxed_holds = |reached: &[Vec<bool>], cond: &[Fact]| {
            cond.iter().all(|f| reached[f.var][f.val as usize])
        };
        let mut applied = vec![false; self.task.operators.len()];
        loop {
            let mut progress = false;
            for (i, op) in self.task.operators.iter().enumerate() {
                if applied[i] || !relaxed_holds(&reached, &op.precondition) {
                    continue;
                }
                applied[i] = true;
                for outcome in &op.outcomes {
                    for effect in &outcome.effects {
                        if !reached[effect.var][effect.val as usize] {
                            reached[effect.var][effect.val as usize] = true;
                            progress = true;
                        }
                    }
                }
                progress = true;
            }
            if !progress {
                break;
            }
        }
        !relaxed_holds(&reached, &self.task.goal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin_task() -> GroundedTask {
        // one coin: flip it until it shows heads
        GroundedTask {
            variables: vec![Variable {
                name: "coin".to_string(),
                domain: vec!["tails".to_string(), "heads".to_string()],
            }],
            initial: vec![0],
            goal: vec![Fact { var: 0, val: 1 }],
            operators: vec![Operator {
                name: "flip".to_string(),
                cost: 1.0,
                precondition: vec![Fact { var: 0, val: 0 }],
                outcomes: vec![
                    Outcome {
                        probability: 0.5,
                        effects: vec![Effect {
                            var: 0,
                            val: 1,
                            condition: vec![],
                        }],
                    },
                    Outcome {
                        probability: 0.5,
                        effects: vec![],
                    },
                ],
            }],
            axioms: vec![],
        }
    }

    #[test]
    fn validation_accepts_the_coin_task() {
        assert!(coin_task().validate(1e-5).is_ok());
    }

    #[test]
    fn validation_rejects_bad_probabilities() {
        let mut task = coin_task();
        task.operators[0].outcomes[0].probability = 0.6;
        assert!(matches!(
            task.validate(1e-5),
            Err(SolverError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn validation_rejects_conditional_effects() {
        let mut task = coin_task();
        task.operators[0].outcomes[0].effects[0]
            .condition
            .push(Fact { var: 0, val: 0 });
        assert!(matches!(
            task.validate(1e-5),
            Err(SolverError::Unsupported(_))
        ));
    }

    #[test]
    fn validation_rejects_axioms() {
        let mut task = coin_task();
        task.axioms.push(Axiom {
            head: Fact { var: 0, val: 1 },
            body: vec![Fact { var: 0, val: 0 }],
        });
        assert_eq!(
            task.validate(1e-5),
            Err(SolverError::Unsupported("axioms".to_string()))
        );
    }

    #[test]
    fn axioms_deserialize_and_are_detected() {
        let raw = r#"{
            "variables": [{"name": "v", "domain": ["a", "b"]}],
            "initial": [0],
            "goal": [{"var": 0, "val": 1}],
            "operators": [],
            "axioms": [{"head": {"var": 0, "val": 1}, "body": []}]
        }"#;
        let task: GroundedTask = serde_json::from_str(raw).unwrap();
        assert_eq!(task.axioms.len(), 1);
        assert!(matches!(
            task.validate(1e-5),
            Err(SolverError::Unsupported(_))
        ));
    }

    #[test]
    fn validation_rejects_out_of_domain_facts() {
        let mut task = coin_task();
        task.goal.push(Fact { var: 0, val: 7 });
        assert!(matches!(
            task.validate(1e-5),
            Err(SolverError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn transitions_merge_identity_outcomes() {
        let mut mdp = GroundedMdp::new(coin_task(), 1000.0);
        let init = mdp.initial_id();
        let ops = mdp.applicable_actions(init);
        assert_eq!(ops.len(), 1);
        let dist = mdp.transition(init, &ops[0]);
        // heads with 0.5, stay tails with 0.5 (the self state)
        assert_eq!(dist.len(), 2);
        assert!(dist.is_normalized(1e-9));
        assert_eq!(dist.probability_of(&init), 0.5);
    }

    #[test]
    fn goal_detection_and_registry() {
        let mut mdp = GroundedMdp::new(coin_task(), 1000.0);
        let init = mdp.initial_id();
        assert!(!mdp.termination_info(init).is_goal);
        let heads = mdp.state_id(&vec![1]);
        assert!(mdp.termination_info(heads).is_goal);
        assert_eq!(mdp.state_id(&vec![1]), heads);
        assert_eq!(mdp.num_states(), 2);
    }

    #[test]
    fn state_formatting_uses_names() {
        let mut mdp = GroundedMdp::new(coin_task(), 1000.0);
        let init = mdp.initial_id();
        assert_eq!(mdp.format_state(init), "coin=tails");
    }

    #[test]
    fn relaxed_reachability_detects_dead_states() {
        // a second variable that bricks the coin when set
        let mut task = coin_task();
        task.variables.push(Variable {
            name: "bricked".to_string(),
            domain: vec!["no".to_string(), "yes".to_string()],
        });
        task.initial.push(0);
        task.operators[0].precondition.push(Fact { var: 1, val: 0 });
        let detector = RelaxedReachability::new(task);
        assert!(!detector.is_dead_end(&vec![0, 0]));
        // once bricked, flip is inapplicable even under relaxation
        assert!(detector.is_dead_end(&vec![0, 1]));
        // already at the goal: not dead
        assert!(!detector.is_dead_end(&vec![1, 1]));
    }
}
