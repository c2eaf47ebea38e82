//! Explicit, flat MDP model: states are plain labels, transitions are listed
//! one by one. Loaded from JSON or built programmatically; the test suites
//! and benchmarks use it as their workhorse model.

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;

use crate::solver::error::SolverError;
use crate::solver::mdp::{Distribution, Mdp, OperatorId, StateId, TerminationInfo};
use crate::solver::value::{is_approx_equal, INFINITE};

#[derive(Debug, Deserialize, Clone)]
pub struct TransitionPair {
    pub s: u32,
    pub p: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExplicitTransition {
    pub s: u32,
    pub a: String,
    #[serde(default = "default_cost")]
    pub cost: f64,
    pub s_prime: Vec<TransitionPair>,
}

fn default_cost() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExplicitModel {
    #[serde(default)]
    pub states: Vec<u32>,
    pub initial: u32,
    pub goal: Vec<u32>,
    pub transitions: Vec<ExplicitTransition>,
    #[serde(default)]
    pub non_goal_cost: Option<f64>,
}

pub fn read_explicit_json<P: AsRef<Path>>(path: P) -> Result<ExplicitModel, Box<dyn Error>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let u = serde_json::from_reader(reader)?;
    Ok(u)
}

/// The explicit model as an implicit-interface MDP. Labels are registered
/// into dense ids on first contact, like any other model.
pub struct ExplicitMdp {
    initial: u32,
    goal: HashSet<u32>,
    non_goal_cost: f64,
    names: Vec<String>,
    costs: Vec<f64>,
    outcomes: Vec<Vec<(u32, f64)>>,
    by_source: HashMap<u32, Vec<usize>>,
    ids: HashMap<u32, StateId>,
    labels: Vec<u32>,
}

impl ExplicitMdp {
    pub fn new(model: ExplicitModel) -> Result<ExplicitMdp, SolverError> {
        let mut names = Vec::with_capacity(model.transitions.len());
        let mut costs = Vec::with_capacity(model.transitions.len());
        let mut outcomes = Vec::with_capacity(model.transitions.len());
        let mut by_source: HashMap<u32, Vec<usize>> = HashMap::new();
        for (i, t) in model.transitions.iter().enumerate() {
            if t.cost.is_nan() || t.cost < 0.0 {
                return Err(SolverError::InvalidConfiguration(format!(
                    "transition {} of state {} has negative cost",
                    t.a, t.s
                )));
            }
            let mut mass = 0.0;
            for pair in t.s_prime.iter() {
                if pair.p.is_nan() || pair.p <= 0.0 || pair.p > 1.0 {
                    return Err(SolverError::InvalidConfiguration(format!(
                        "transition {} of state {} has probability {}",
                        t.a, t.s, pair.p
                    )));
                }
                mass += pair.p;
            }
            if !is_approx_equal(mass, 1.0, 1e-6) {
                return Err(SolverError::InvalidConfiguration(format!(
                    "transition {} of state {} has total mass {}",
                    t.a, t.s, mass
                )));
            }
            names.push(t.a.clone());
            costs.push(t.cost);
            outcomes.push(t.s_prime.iter().map(|p| (p.s, p.p)).collect());
            by_source.entry(t.s).or_default().push(i);
        }
        Ok(ExplicitMdp {
            initial: model.initial,
            goal: model.goal.into_iter().collect(),
            non_goal_cost: model.non_goal_cost.unwrap_or(INFINITE),
            names,
            costs,
            outcomes,
            by_source,
            ids: HashMap::new(),
            labels: Vec::new(),
        })
    }

    /// Test and benchmark convenience; panics on a malformed model.
    pub fn from_parts(
        initial: u32,
        goals: &[u32],
        transitions: &[(u32, &str, f64, &[(u32, f64)])],
        non_goal_cost: f64,
    ) -> ExplicitMdp {
        let model = ExplicitModel {
            states: Vec::new(),
            initial,
            goal: goals.to_vec(),
            transitions: transitions
                .iter()
                .map(|(s, a, cost, pairs)| ExplicitTransition {
                    s: *s,
                    a: (*a).to_string(),
                    cost: *cost,
                    s_prime: pairs
                        .iter()
                        .map(|(succ, p)| TransitionPair { s: *succ, p: *p })
                        .collect(),
                })
                .collect(),
            non_goal_cost: Some(non_goal_cost),
        };
        ExplicitMdp::new(model).unwrap()
    }

    pub fn register(&mut self, label: u32) -> StateId {
        if let Some(id) = self.ids.get(&label) {
            return *id;
        }
        let id = StateId::from(self.labels.len());
        self.labels.push(label);
        self.ids.insert(label, id);
        id
    }

    pub fn initial_id(&mut self) -> StateId {
        let initial = self.initial;
        self.register(initial)
    }

    pub fn action_name(&self, op: &OperatorId) -> &str {
        &self.names[op.0]
    }

    pub fn label(&self, id: StateId) -> u32 {
        self.labels[id.index()]
    }
}

impl Mdp for ExplicitMdp {
    type State = u32;
    type Action = OperatorId;

    fn state_id(&mut self, state: &u32) -> StateId {
        self.register(*state)
    }

    fn state(&self, id: StateId) -> u32 {
        self.labels[id.index()]
    }

    fn num_states(&self) -> usize {
        self.labels.len()
    }

    fn applicable_actions(&mut self, id: StateId) -> Vec<OperatorId> {
        let label = self.labels[id.index()];
        self.by_source
            .get(&label)
            .map(|ops| ops.iter().map(|i| OperatorId(*i)).collect())
            .unwrap_or_default()
    }

    fn transition(&mut self, _id: StateId, action: &OperatorId) -> Distribution<StateId> {
        let pairs = self.outcomes[action.0].clone();
        let mut dist = Distribution::new();
        for (succ, p) in pairs {
            let succ_id = self.register(succ);
            dist.add_probability(succ_id, p);
        }
        dist
    }

    fn termination_info(&mut self, id: StateId) -> TerminationInfo {
        let label = self.labels[id.index()];
        TerminationInfo {
            is_goal: self.goal.contains(&label),
            non_goal_cost: self.non_goal_cost,
        }
    }

    fn action_cost(&mut self, _id: StateId, action: &OperatorId) -> f64 {
        self.costs[action.0]
    }
}
