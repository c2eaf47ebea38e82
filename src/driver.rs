//! Solve driver: builds the model and the configured engine, runs the
//! search under the time budget, prints statistics, and writes the policy
//! and trajectory files.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use crate::explicit::{ExplicitMdp, ExplicitModel};
use crate::solver::ao_star::ExhaustiveAoStar;
use crate::solver::base::{HeuristicSearchBase, HeuristicSearchEngine};
use crate::solver::config::{
    make_open_list, make_picker, make_sampler, EngineKind, HeuristicKind, SolverConfig,
    ValueRegime,
};
use crate::solver::error::SolverError;
use crate::solver::evaluator::{BlindEvaluator, DeadEndPruningEvaluator, Evaluator};
use crate::solver::fret::{Fret, FretMode};
use crate::solver::hdp::Hdp;
use crate::solver::interval_iteration::interval_iteration;
use crate::solver::lao_star::{LaoStar, LaoVariant};
use crate::solver::mdp::{Mdp, OperatorId, StateId};
use crate::solver::policy_output::{collect_policy, sample_trajectory, write_policy};
use crate::solver::projection::build_pdb;
use crate::solver::quotient::{QuotientAction, QuotientMdp};
use crate::solver::report::ProgressReport;
use crate::solver::timer::CountdownTimer;
use crate::solver::topological_vi::TopologicalVi;
use crate::solver::value::{EngineValue, Interval, Objective};
use crate::task::{GroundedMdp, GroundedTask, RelaxedReachability, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Solved,
    TimedOut,
    Unsolvable,
    SearchUnsolvable,
}

#[derive(Debug)]
pub struct SolveReport {
    pub status: SolveStatus,
    pub bounds: Interval,
    pub objective: Objective,
}

/// Rows ready for printing: pretty state and operator name.
type NamedRows = Vec<(String, String)>;

fn progress(cfg: &SolverConfig) -> ProgressReport {
    ProgressReport::new(cfg.report_interval, cfg.report_interval > 0.0)
}

/// Runs one heuristic-search engine and gathers the policy rows and sampled
/// trajectories while the model is still borrowed.
fn run_engine<M, V, E>(
    engine: &mut E,
    mdp: &mut M,
    initial: StateId,
    cfg: &SolverConfig,
) -> Result<
    (
        SolveStatus,
        Interval,
        Vec<(StateId, M::Action)>,
        Vec<Vec<(StateId, M::Action)>>,
    ),
    SolverError,
>
where
    M: Mdp,
    M::Action: 'static,
    V: EngineValue,
    E: HeuristicSearchEngine<M, V>,
{
    let timer = CountdownTimer::new(cfg.time_limit);
    let mut report = progress(cfg);
    let (status, bounds) = match engine.solve(mdp, initial, &timer, &mut report) {
        Ok(bounds) => {
            let optimistic = cfg.objective.optimistic_bound(&bounds);
            if cfg.objective.proves_dead(optimistic) {
                (SolveStatus::SearchUnsolvable, bounds)
            } else {
                (SolveStatus::Solved, bounds)
            }
        }
        Err(SolverError::Timeout) => {
            log::warn!("time limit reached, reporting unsound partial bounds");
            (SolveStatus::TimedOut, engine.base().lookup_bounds(initial))
        }
        Err(SolverError::ProvenUnsolvable) => {
            (SolveStatus::Unsolvable, engine.base().lookup_bounds(initial))
        }
        Err(e) => return Err(e),
    };
    engine.print_statistics();

    let mut rows = Vec::new();
    let mut trajectories = Vec::new();
    if status == SolveStatus::Solved && engine.base().stores_policy() {
        let root = engine.policy_root(mdp, initial);
        rows = collect_policy(mdp, engine.base(), root);
        for i in 0..cfg.trajectories {
            let mut sampler = make_sampler::<M::Action>(cfg.sampler, cfg.seed.wrapping_add(i as u64));
            trajectories.push(sample_trajectory(
                mdp,
                engine.base(),
                sampler.as_mut(),
                root,
                cfg.trajectory_length,
            ));
        }
    }
    Ok((status, bounds, rows, trajectories))
}

fn write_outputs(
    cfg: &SolverConfig,
    rows: &NamedRows,
    trajectories: &[NamedRows],
    cost: f64,
    unit_cost: bool,
) -> Result<(), SolverError> {
    let io_err =
        |e: std::io::Error| SolverError::InvalidConfiguration(format!("policy output: {}", e));
    if let Some(path) = &cfg.policy_file {
        let mut out = BufWriter::new(File::create(path).map_err(io_err)?);
        write_policy(&mut out, rows, cost, unit_cost).map_err(io_err)?;
        log::info!("policy written to {}", path.display());
    }
    for (i, t) in trajectories.iter().enumerate() {
        let path = PathBuf::from(format!("trajectory_{}.plan", i));
        let mut out = BufWriter::new(File::create(&path).map_err(io_err)?);
        write_policy(&mut out, t, cost, unit_cost).map_err(io_err)?;
    }
    Ok(())
}

fn grounded_evaluator(
    cfg: &SolverConfig,
    task: &GroundedTask,
) -> Result<Box<dyn Evaluator<TaskState>>, SolverError> {
    match &cfg.heuristic {
        HeuristicKind::Blind => Ok(Box::new(BlindEvaluator::new(cfg.objective))),
        HeuristicKind::DeadEnd => Ok(Box::new(DeadEndPruningEvaluator::new(
            Box::new(RelaxedReachability::new(task.clone())),
            cfg.model_non_goal_cost(),
            cfg.objective,
        ))),
        HeuristicKind::Pdb(pattern) => {
            let timer = CountdownTimer::new(cfg.time_limit);
            let pdb = build_pdb(
                task,
                pattern,
                cfg.objective,
                cfg.model_non_goal_cost(),
                cfg.epsilon,
                &timer,
            )?;
            Ok(Box::new(pdb))
        }
    }
}

/// Solves a grounded task end to end.
pub fn solve_grounded(cfg: &SolverConfig, task: GroundedTask) -> Result<SolveReport, SolverError> {
    cfg.validate()?;
    task.validate(cfg.epsilon)?;
    let unit_cost = task.unit_cost();
    let evaluator = grounded_evaluator(cfg, &task)?;
    let mut mdp = GroundedMdp::new(task, cfg.model_non_goal_cost());
    let initial = mdp.initial_id();

    let (status, bounds, op_rows, op_trajectories) =
        dispatch(cfg, &mut mdp, initial, evaluator)?;

    let named = |rows: &[(StateId, usize)]| -> NamedRows {
        rows.iter()
            .map(|(id, op)| {
                (
                    mdp.format_state(*id),
                    mdp.task().operators[*op].name.clone(),
                )
            })
            .collect()
    };
    let rows = named(&op_rows);
    let trajectories: Vec<NamedRows> =
        op_trajectories.iter().map(|t| named(t)).collect();
    let cost = cfg.objective.optimistic_bound(&bounds);
    write_outputs(cfg, &rows, &trajectories, cost, unit_cost)?;

    Ok(SolveReport {
        status,
        bounds,
        objective: cfg.objective,
    })
}

/// Solves an explicit MDP model end to end. Only the blind heuristic is
/// model-independent.
pub fn solve_explicit(cfg: &SolverConfig, model: ExplicitModel) -> Result<SolveReport, SolverError> {
    cfg.validate()?;
    if cfg.heuristic != HeuristicKind::Blind {
        return Err(SolverError::InvalidConfiguration(
            "explicit models support only the blind heuristic".to_string(),
        ));
    }
    let mut model = model;
    model.non_goal_cost = Some(
        model
            .non_goal_cost
            .unwrap_or_else(|| cfg.model_non_goal_cost()),
    );
    if cfg.objective == Objective::MaxProb {
        model.non_goal_cost = Some(0.0);
    }
    let mut mdp = ExplicitMdp::new(model)?;
    let initial = mdp.initial_id();
    let evaluator: Box<dyn Evaluator<u32>> = Box::new(BlindEvaluator::new(cfg.objective));

    let (status, bounds, op_rows, op_trajectories) =
        dispatch(cfg, &mut mdp, initial, evaluator)?;

    let named = |rows: &[(StateId, usize)]| -> NamedRows {
        rows.iter()
            .map(|(id, op)| {
                (
                    mdp.label(*id).to_string(),
                    mdp.action_name(&OperatorId(*op)).to_string(),
                )
            })
            .collect()
    };
    let rows = named(&op_rows);
    let trajectories: Vec<NamedRows> =
        op_trajectories.iter().map(|t| named(t)).collect();
    let cost = cfg.objective.optimistic_bound(&bounds);
    write_outputs(cfg, &rows, &trajectories, cost, false)?;

    Ok(SolveReport {
        status,
        bounds,
        objective: cfg.objective,
    })
}

/// Engine dispatch over any model whose action is an operator id. Returns
/// rows and trajectories with actions flattened to operator indices.
#[allow(clippy::type_complexity)]
fn dispatch<M>(
    cfg: &SolverConfig,
    mdp: &mut M,
    initial: StateId,
    evaluator: Box<dyn Evaluator<M::State>>,
) -> Result<
    (
        SolveStatus,
        Interval,
        Vec<(StateId, usize)>,
        Vec<Vec<(StateId, usize)>>,
    ),
    SolverError,
>
where
    M: Mdp<Action = OperatorId>,
{
    // the DFS-driven engines always need a stored policy to walk
    let store_policy = cfg.store_policy
        || matches!(
            cfg.engine,
            EngineKind::Lao
                | EngineKind::ILao
                | EngineKind::Hdp
                | EngineKind::FretV
                | EngineKind::FretPi
        );
    let scalar_base = |evaluator: Box<dyn Evaluator<M::State>>| -> HeuristicSearchBase<M, f64> {
        HeuristicSearchBase::new(
            cfg.objective,
            cfg.epsilon,
            store_policy,
            evaluator,
            make_picker::<OperatorId>(cfg.picker),
        )
    };
    let flat = |rows: Vec<(StateId, OperatorId)>| -> Vec<(StateId, usize)> {
        rows.into_iter().map(|(s, a)| (s, a.0)).collect()
    };
    let flat_q = |rows: Vec<(StateId, QuotientAction<OperatorId>)>| -> Vec<(StateId, usize)> {
        rows.into_iter().map(|(s, qa)| (s, qa.action.0)).collect()
    };

    match cfg.engine {
        EngineKind::Ao => {
            let mut engine =
                ExhaustiveAoStar::new(scalar_base(evaluator), make_open_list(cfg.open_list));
            let (status, bounds, rows, trajectories) =
                run_engine(&mut engine, mdp, initial, cfg)?;
            Ok((
                status,
                bounds,
                flat(rows),
                trajectories.into_iter().map(flat).collect(),
            ))
        }
        EngineKind::Lao | EngineKind::ILao => {
            let variant = if cfg.engine == EngineKind::Lao {
                LaoVariant::Lao
            } else {
                LaoVariant::ILao
            };
            let mut engine = LaoStar::new(scalar_base(evaluator), variant);
            let (status, bounds, rows, trajectories) =
                run_engine(&mut engine, mdp, initial, cfg)?;
            Ok((
                status,
                bounds,
                flat(rows),
                trajectories.into_iter().map(flat).collect(),
            ))
        }
        EngineKind::Hdp => {
            let mut engine = Hdp::new(scalar_base(evaluator));
            let (status, bounds, rows, trajectories) =
                run_engine(&mut engine, mdp, initial, cfg)?;
            Ok((
                status,
                bounds,
                flat(rows),
                trajectories.into_iter().map(flat).collect(),
            ))
        }
        EngineKind::Tvi => {
            if cfg.regime == ValueRegime::Interval {
                let base: HeuristicSearchBase<M, Interval> = HeuristicSearchBase::new(
                    cfg.objective,
                    cfg.epsilon,
                    store_policy,
                    evaluator,
                    make_picker::<OperatorId>(cfg.picker),
                );
                let mut engine = TopologicalVi::new(base);
                let (status, bounds, rows, trajectories) =
                    run_engine(&mut engine, mdp, initial, cfg)?;
                return Ok((
                    status,
                    bounds,
                    flat(rows),
                    trajectories.into_iter().map(flat).collect(),
                ));
            }
            let mut engine = TopologicalVi::new(scalar_base(evaluator));
            let (status, bounds, rows, trajectories) =
                run_engine(&mut engine, mdp, initial, cfg)?;
            Ok((
                status,
                bounds,
                flat(rows),
                trajectories.into_iter().map(flat).collect(),
            ))
        }
        EngineKind::Ivi => {
            let timer = CountdownTimer::new(cfg.time_limit);
            let mut report = progress(cfg);
            let extract_one = cfg.objective == Objective::MaxProb;
            match interval_iteration(
                mdp,
                initial,
                cfg.objective,
                cfg.epsilon,
                evaluator,
                extract_one,
                &timer,
                &mut report,
            ) {
                Ok(outcome) => {
                    outcome.print_statistics();
                    if cfg.policy_file.is_some() {
                        log::warn!("interval iteration does not produce a policy");
                    }
                    let status = if outcome.proven_unsolvable {
                        SolveStatus::Unsolvable
                    } else {
                        SolveStatus::Solved
                    };
                    Ok((status, outcome.bounds, Vec::new(), Vec::new()))
                }
                Err(SolverError::Timeout) => {
                    log::warn!("time limit reached before interval iteration converged");
                    let bounds = match cfg.objective {
                        Objective::MinCost => Interval::new(0.0, crate::solver::value::INFINITE),
                        Objective::MaxProb => Interval::new(0.0, 1.0),
                    };
                    Ok((SolveStatus::TimedOut, bounds, Vec::new(), Vec::new()))
                }
                Err(e) => Err(e),
            }
        }
        EngineKind::FretV | EngineKind::FretPi => {
            let mode = if cfg.engine == EngineKind::FretV {
                FretMode::ValueGreedy
            } else {
                FretMode::Policy
            };
            let quotient_base: HeuristicSearchBase<QuotientMdp<&mut M>, f64> =
                HeuristicSearchBase::new(
                    cfg.objective,
                    cfg.epsilon,
                    true,
                    evaluator,
                    make_picker::<QuotientAction<OperatorId>>(cfg.picker),
                );
            let inner = LaoStar::new(quotient_base, LaoVariant::ILao);
            let mut engine = Fret::new(inner, mode);
            let mut quotient = QuotientMdp::new(&mut *mdp);
            let (status, bounds, rows, trajectories) =
                run_engine(&mut engine, &mut quotient, initial, cfg)?;
            Ok((
                status,
                bounds,
                flat_q(rows),
                trajectories.into_iter().map(flat_q).collect(),
            ))
        }
        EngineKind::IDual => Err(SolverError::Unsupported(
            "the idual engine needs an LP backend".to_string(),
        )),
    }
}
