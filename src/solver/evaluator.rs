//! Heuristic evaluators: map a state to an initial value estimate and a
//! terminal flag.

use crate::solver::value::{Objective, INFINITE};

/// Result of evaluating a state. When `terminal` is set, the bounds are the
/// exact termination value and the state is marked dead immediately.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub terminal: bool,
    pub lower: f64,
    pub upper: f64,
}

impl Estimate {
    pub fn open(lower: f64, upper: f64) -> Estimate {
        Estimate {
            terminal: false,
            lower,
            upper,
        }
    }

    pub fn terminal(value: f64) -> Estimate {
        Estimate {
            terminal: true,
            lower: value,
            upper: value,
        }
    }
}

pub trait Evaluator<S> {
    fn evaluate(&self, state: &S) -> Estimate;
}

/// The uninformed baseline: `[0, inf]` for expected cost, `[0, 1]` for goal
/// probability. Admissible for every task.
pub struct BlindEvaluator {
    objective: Objective,
}

impl BlindEvaluator {
    pub fn new(objective: Objective) -> BlindEvaluator {
        BlindEvaluator { objective }
    }
}

impl<S> Evaluator<S> for BlindEvaluator {
    fn evaluate(&self, _state: &S) -> Estimate {
        match self.objective {
            Objective::MinCost => Estimate::open(0.0, INFINITE),
            Objective::MaxProb => Estimate::open(0.0, 1.0),
        }
    }
}

/// Decides whether a state provably cannot reach a goal.
pub trait DeadEndDetector<S> {
    fn is_dead_end(&self, state: &S) -> bool;
}

/// Wraps a dead-end detector: detected states are reported terminal with
/// the configured dead-end value, everything else gets the blind estimate.
pub struct DeadEndPruningEvaluator<S> {
    detector: Box<dyn DeadEndDetector<S>>,
    dead_end_value: f64,
    objective: Objective,
}

impl<S> DeadEndPruningEvaluator<S> {
    pub fn new(
        detector: Box<dyn DeadEndDetector<S>>,
        dead_end_value: f64,
        objective: Objective,
    ) -> DeadEndPruningEvaluator<S> {
        DeadEndPruningEvaluator {
            detector,
            dead_end_value,
            objective,
        }
    }
}

impl<S> Evaluator<S> for DeadEndPruningEvaluator<S> {
    fn evaluate(&self, state: &S) -> Estimate {
        if self.detector.is_dead_end(state) {
            let value = match self.objective {
                Objective::MinCost => self.dead_end_value,
                Objective::MaxProb => 0.0,
            };
            return Estimate::terminal(value);
        }
        match self.objective {
            Objective::MinCost => Estimate::open(0.0, INFINITE),
            Objective::MaxProb => Estimate::open(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EvenIsDead;

    impl DeadEndDetector<u32> for EvenIsDead {
        fn is_dead_end(&self, state: &u32) -> bool {
            state % 2 == 0
        }
    }

    #[test]
    fn blind_bounds_per_objective() {
        let ssp = BlindEvaluator::new(Objective::MinCost);
        let est = Evaluator::<u32>::evaluate(&ssp, &7);
        assert!(!est.terminal);
        assert_eq!(est.lower, 0.0);
        assert_eq!(est.upper, INFINITE);

        let mp = BlindEvaluator::new(Objective::MaxProb);
        let est = Evaluator::<u32>::evaluate(&mp, &7);
        assert_eq!((est.lower, est.upper), (0.0, 1.0));
    }

    #[test]
    fn pruning_reports_detected_states_terminal() {
        let eval =
            DeadEndPruningEvaluator::new(Box::new(EvenIsDead), 1000.0, Objective::MinCost);
        let dead = eval.evaluate(&4);
        assert!(dead.terminal);
        assert_eq!(dead.lower, 1000.0);
        let live = eval.evaluate(&3);
        assert!(!live.terminal);
    }

    #[test]
    fn pruning_dead_value_is_zero_for_maxprob() {
        let eval = DeadEndPruningEvaluator::new(Box::new(EvenIsDead), 0.0, Objective::MaxProb);
        let dead = eval.evaluate(&2);
        assert!(dead.terminal);
        assert_eq!(dead.upper, 0.0);
    }
}
