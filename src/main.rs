use clap::clap_app;

use sspp::driver::{solve_explicit, solve_grounded, SolveStatus};
use sspp::explicit::read_explicit_json;
use sspp::solver::config::SolverConfig;
use sspp::task::read_task_json;
use sspp::{ExitCode, SolverError};

fn main() {
    env_logger::init();
    let code = run();
    std::process::exit(code.code());
}

fn error_exit(err: &SolverError) -> ExitCode {
    match err {
        SolverError::Timeout => ExitCode::OutOfTime,
        SolverError::ProvenUnsolvable => ExitCode::Unsolvable,
        SolverError::Unsupported(_) => ExitCode::UnsupportedFeature,
        SolverError::InvalidConfiguration(_) => ExitCode::InvalidConfiguration,
    }
}

fn run() -> ExitCode {
    let matches = clap_app!(sspp =>
        (version: "0.1")
        (about: "Heuristic-search solver for stochastic shortest-path and MaxProb MDPs")
        (@arg TASK: --task [PATH] "Grounded task, JSON: variables with finite \
         domains, an initial assignment, a conjunctive goal and probabilistic \
         operators with outcomes")
        (@arg MDP: --mdp [PATH] "Explicit MDP, JSON: states, initial, goal \
         set and transitions with successor probability pairs")
        (@arg ENGINE: --engine [NAME] default_value("ilao")
            "ao | lao | ilao | hdp | tvi | ivi | fret_v | fret_pi | idual")
        (@arg OBJECTIVE: --objective [NAME] default_value("ssp") "ssp | maxprob")
        (@arg REGIME: --regime [NAME] default_value("scalar") "scalar | interval")
        (@arg HEURISTIC: --heuristic [NAME] default_value("blind")
            "blind | deadend | pdb:<v1,v2,...>")
        (@arg PICKER: --picker [NAME] default_value("arbitrary")
            "arbitrary | stable | operator_id | value_gap")
        (@arg SAMPLER: --sampler [NAME] default_value("random")
            "uniform | random | most_likely | vbiased | vgap")
        (@arg OPEN_LIST: --("open-list") [NAME] default_value("fifo")
            "fifo | lifo | priority")
        (@arg EPSILON: --epsilon [F] default_value("0.00001") "Convergence tolerance")
        (@arg TIME_LIMIT: --("time-limit") [SECONDS] "Time budget in seconds")
        (@arg SEED: --seed [N] default_value("0") "RNG seed")
        (@arg NON_GOAL_COST: --("non-goal-cost") [F]
            "SSP cost of giving up in a non-goal state (default: infinity)")
        (@arg REPORT: --("report-interval") [F] default_value("0")
            "Minimum value change between progress lines, 0 disables")
        (@arg POLICY: --("policy-file") [PATH] "Write the computed policy here")
        (@arg TRAJECTORIES: --trajectories [N] default_value("0")
            "Number of sampled trajectory files")
        (@arg TRAJ_LEN: --("trajectory-length") [N] default_value("100")
            "Length cap per sampled trajectory")
        (@arg NO_POLICY: --("no-policy") "Do not store a greedy policy")
    )
    .get_matches();

    let mut cfg = SolverConfig::default();

    macro_rules! parse_named {
        ($name:expr, $field:expr) => {
            match matches.value_of($name).unwrap().parse() {
                Ok(v) => $field = v,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::InvalidConfiguration;
                }
            }
        };
    }
    macro_rules! parse_plain {
        ($name:expr, $field:expr, $ty:ty) => {
            if let Some(raw) = matches.value_of($name) {
                match raw.parse::<$ty>() {
                    Ok(v) => $field = v,
                    Err(_) => {
                        eprintln!("invalid value for {}: {}", $name, raw);
                        return ExitCode::InvalidConfiguration;
                    }
                }
            }
        };
    }

    parse_named!("ENGINE", cfg.engine);
    parse_named!("OBJECTIVE", cfg.objective);
    parse_named!("REGIME", cfg.regime);
    parse_named!("HEURISTIC", cfg.heuristic);
    parse_named!("PICKER", cfg.picker);
    parse_named!("SAMPLER", cfg.sampler);
    parse_named!("OPEN_LIST", cfg.open_list);
    parse_plain!("EPSILON", cfg.epsilon, f64);
    parse_plain!("SEED", cfg.seed, u64);
    parse_plain!("NON_GOAL_COST", cfg.non_goal_cost, f64);
    parse_plain!("REPORT", cfg.report_interval, f64);
    parse_plain!("TRAJECTORIES", cfg.trajectories, usize);
    parse_plain!("TRAJ_LEN", cfg.trajectory_length, usize);
    if let Some(raw) = matches.value_of("TIME_LIMIT") {
        match raw.parse::<f64>() {
            Ok(secs) if secs > 0.0 => {
                cfg.time_limit = Some(std::time::Duration::from_secs_f64(secs))
            }
            _ => {
                eprintln!("invalid time limit: {}", raw);
                return ExitCode::InvalidConfiguration;
            }
        }
    }
    cfg.policy_file = matches.value_of("POLICY").map(Into::into);
    cfg.store_policy = !matches.is_present("NO_POLICY");

    let task_path = matches.value_of("TASK");
    let mdp_path = matches.value_of("MDP");
    let result = match (task_path, mdp_path) {
        (Some(path), None) => match read_task_json(path) {
            Ok(task) => solve_grounded(&cfg, task),
            Err(e) => {
                eprintln!("error reading task {}: {}", path, e);
                return ExitCode::InvalidConfiguration;
            }
        },
        (None, Some(path)) => match read_explicit_json(path) {
            Ok(model) => solve_explicit(&cfg, model),
            Err(e) => {
                eprintln!("error reading model {}: {}", path, e);
                return ExitCode::InvalidConfiguration;
            }
        },
        _ => {
            eprintln!("exactly one of --task and --mdp must be given");
            return ExitCode::InvalidConfiguration;
        }
    };

    match result {
        Ok(report) => {
            println!(
                "{}: [{}, {}]",
                report.objective, report.bounds.lower, report.bounds.upper
            );
            match report.status {
                SolveStatus::Solved => {
                    println!("solution found");
                    ExitCode::Success
                }
                SolveStatus::TimedOut => {
                    println!("out of time, bounds are partial");
                    ExitCode::OutOfTime
                }
                SolveStatus::Unsolvable => {
                    println!("task proven unsolvable");
                    ExitCode::Unsolvable
                }
                SolveStatus::SearchUnsolvable => {
                    println!("search proved the task unsolvable");
                    ExitCode::SearchUnsolvable
                }
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            error_exit(&e)
        }
    }
}
