//! Configuration structs and the factory registry: every pluggable piece
//! (engine, heuristic, picker, sampler, open list) is named here, parsed
//! from the command line, and instantiated through one of the `make_*`
//! functions.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::solver::error::SolverError;
use crate::solver::mdp::ActionIndex;
use crate::solver::open_list::OpenList;
use crate::solver::picker::{
    ArbitraryPicker, OperatorIdPicker, PolicyPicker, StablePicker, ValueGapPicker,
};
use crate::solver::sampler::{
    MostLikelySampler, RandomSampler, SuccessorSampler, UniformSampler, VBiasedSampler,
    VGapSampler,
};
use crate::solver::value::{Objective, DEFAULT_EPSILON, INFINITE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineKind {
    Ao,
    Lao,
    ILao,
    Hdp,
    Tvi,
    Ivi,
    FretV,
    FretPi,
    IDual,
}

impl FromStr for EngineKind {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<EngineKind, SolverError> {
        match s {
            "ao" => Ok(EngineKind::Ao),
            "lao" => Ok(EngineKind::Lao),
            "ilao" => Ok(EngineKind::ILao),
            "hdp" => Ok(EngineKind::Hdp),
            "tvi" => Ok(EngineKind::Tvi),
            "ivi" => Ok(EngineKind::Ivi),
            "fret_v" => Ok(EngineKind::FretV),
            "fret_pi" => Ok(EngineKind::FretPi),
            "idual" => Ok(EngineKind::IDual),
            other => Err(SolverError::InvalidConfiguration(format!(
                "unknown engine {}",
                other
            ))),
        }
    }
}

impl FromStr for Objective {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Objective, SolverError> {
        match s {
            "ssp" => Ok(Objective::MinCost),
            "maxprob" => Ok(Objective::MaxProb),
            other => Err(SolverError::InvalidConfiguration(format!(
                "unknown objective {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeuristicKind {
    Blind,
    DeadEnd,
    Pdb(Vec<usize>),
}

impl FromStr for HeuristicKind {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<HeuristicKind, SolverError> {
        if s == "blind" {
            return Ok(HeuristicKind::Blind);
        }
        if s == "deadend" {
            return Ok(HeuristicKind::DeadEnd);
        }
        if let Some(rest) = s.strip_prefix("pdb:") {
            let vars: Result<Vec<usize>, _> =
                rest.split(',').map(|v| v.trim().parse::<usize>()).collect();
            return match vars {
                Ok(vars) if !vars.is_empty() => Ok(HeuristicKind::Pdb(vars)),
                _ => Err(SolverError::InvalidConfiguration(format!(
                    "malformed pattern {}",
                    s
                ))),
            };
        }
        Err(SolverError::InvalidConfiguration(format!(
            "unknown heuristic {}",
            s
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerKind {
    Arbitrary,
    Stable,
    OperatorId,
    ValueGap,
}

impl FromStr for PickerKind {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<PickerKind, SolverError> {
        match s {
            "arbitrary" => Ok(PickerKind::Arbitrary),
            "stable" => Ok(PickerKind::Stable),
            "operator_id" => Ok(PickerKind::OperatorId),
            "value_gap" => Ok(PickerKind::ValueGap),
            other => Err(SolverError::InvalidConfiguration(format!(
                "unknown policy picker {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    Uniform,
    Random,
    MostLikely,
    VBiased,
    VGap,
}

impl FromStr for SamplerKind {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<SamplerKind, SolverError> {
        match s {
            "uniform" => Ok(SamplerKind::Uniform),
            "random" => Ok(SamplerKind::Random),
            "most_likely" => Ok(SamplerKind::MostLikely),
            "vbiased" => Ok(SamplerKind::VBiased),
            "vgap" => Ok(SamplerKind::VGap),
            other => Err(SolverError::InvalidConfiguration(format!(
                "unknown successor sampler {}",
                other
            ))),
        }
    }
}

/// Scalar keeps a single admissible bound per state, Interval both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRegime {
    Scalar,
    Interval,
}

impl FromStr for ValueRegime {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<ValueRegime, SolverError> {
        match s {
            "scalar" => Ok(ValueRegime::Scalar),
            "interval" => Ok(ValueRegime::Interval),
            other => Err(SolverError::InvalidConfiguration(format!(
                "unknown value regime {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenListKind {
    Fifo,
    Lifo,
    Priority,
}

impl FromStr for OpenListKind {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<OpenListKind, SolverError> {
        match s {
            "fifo" => Ok(OpenListKind::Fifo),
            "lifo" => Ok(OpenListKind::Lifo),
            "priority" => Ok(OpenListKind::Priority),
            other => Err(SolverError::InvalidConfiguration(format!(
                "unknown open list {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolverConfig {
    pub engine: EngineKind,
    pub objective: Objective,
    pub regime: ValueRegime,
    pub heuristic: HeuristicKind,
    pub picker: PickerKind,
    pub sampler: SamplerKind,
    pub open_list: OpenListKind,
    pub epsilon: f64,
    pub time_limit: Option<Duration>,
    pub seed: u64,
    pub non_goal_cost: f64,
    pub report_interval: f64,
    pub policy_file: Option<PathBuf>,
    pub trajectories: usize,
    pub trajectory_length: usize,
    pub store_policy: bool,
}

impl Default for SolverConfig {
    fn default() -> SolverConfig {
        SolverConfig {
            engine: EngineKind::ILao,
            objective: Objective::MinCost,
            regime: ValueRegime::Scalar,
            heuristic: HeuristicKind::Blind,
            picker: PickerKind::Arbitrary,
            sampler: SamplerKind::Random,
            open_list: OpenListKind::Fifo,
            epsilon: DEFAULT_EPSILON,
            time_limit: None,
            seed: 0,
            non_goal_cost: INFINITE,
            report_interval: 0.0,
            policy_file: None,
            trajectories: 0,
            trajectory_length: 100,
            store_policy: true,
        }
    }
}

impl SolverConfig {
    /// Rejected before any search begins.
    pub fn validate(&self) -> Result<(), SolverError> {
        if self.engine == EngineKind::IDual {
            return Err(SolverError::Unsupported(
                "the idual engine needs an LP backend".to_string(),
            ));
        }
        if self.regime == ValueRegime::Interval
            && !matches!(self.engine, EngineKind::Tvi | EngineKind::Ivi)
        {
            return Err(SolverError::InvalidConfiguration(format!(
                "the interval regime is supported by tvi and ivi, not {:?}",
                self.engine
            )));
        }
        if !(self.epsilon > 0.0) {
            return Err(SolverError::InvalidConfiguration(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        if self.non_goal_cost.is_nan() || self.non_goal_cost < 0.0 {
            return Err(SolverError::InvalidConfiguration(
                "non-goal termination cost must be non-negative".to_string(),
            ));
        }
        if self.trajectories > 0 && self.trajectory_length == 0 {
            return Err(SolverError::InvalidConfiguration(
                "trajectory length must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The termination cost handed to the models: MaxProb always stops with
    /// probability zero.
    pub fn model_non_goal_cost(&self) -> f64 {
        match self.objective {
            Objective::MinCost => self.non_goal_cost,
            Objective::MaxProb => 0.0,
        }
    }
}

pub fn make_picker<A>(kind: PickerKind) -> Box<dyn PolicyPicker<A>>
where
    A: ActionIndex + Clone + PartialEq + 'static,
{
    match kind {
        PickerKind::Arbitrary => Box::new(ArbitraryPicker),
        PickerKind::Stable => Box::new(StablePicker),
        PickerKind::OperatorId => Box::new(OperatorIdPicker),
        PickerKind::ValueGap => Box::new(ValueGapPicker {
            prefer_large_gaps: true,
        }),
    }
}

pub fn make_sampler<A: 'static>(kind: SamplerKind, seed: u64) -> Box<dyn SuccessorSampler<A>> {
    match kind {
        SamplerKind::Uniform => Box::new(UniformSampler::new(seed)),
        SamplerKind::Random => Box::new(RandomSampler::new(seed)),
        SamplerKind::MostLikely => Box::new(MostLikelySampler),
        SamplerKind::VBiased => Box::new(VBiasedSampler::new(seed)),
        SamplerKind::VGap => Box::new(VGapSampler::new(seed)),
    }
}

pub fn make_open_list(kind: OpenListKind) -> OpenList {
    match kind {
        OpenListKind::Fifo => OpenList::fifo(),
        OpenListKind::Lifo => OpenList::lifo(),
        OpenListKind::Priority => OpenList::priority(),
    }
}
