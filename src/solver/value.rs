//! Value algebra shared by every engine: scalar bounds, intervals and the
//! approximate comparisons all convergence tests go through.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign};

/// Cost of an unsolvable state.
pub const INFINITE: f64 = f64::INFINITY;

/// Values above this threshold are promoted to `INFINITE` instead of being
/// propagated further.
pub const FINITE_MAX: f64 = 1e15;

/// Default comparison tolerance.
pub const DEFAULT_EPSILON: f64 = 1e-5;

pub fn is_approx_equal(a: f64, b: f64, eps: f64) -> bool {
    if a == b {
        // covers both endpoints being infinite
        return true;
    }
    (a - b).abs() <= eps
}

pub fn is_approx_less(a: f64, b: f64, eps: f64) -> bool {
    a + eps < b
}

pub fn is_approx_greater(a: f64, b: f64, eps: f64) -> bool {
    a > b + eps
}

/// Optimization direction of the solve.
///
/// `MinCost` minimises expected cost to the goal (SSP), `MaxProb` maximises
/// the probability of ever reaching the goal. Everything downstream that
/// depends on the direction (greedy selection, goal values, dead-end proofs)
/// matches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    MinCost,
    MaxProb,
}

impl Objective {
    /// Value of a goal state.
    pub fn goal_value(self) -> f64 {
        match self {
            Objective::MinCost => 0.0,
            Objective::MaxProb => 1.0,
        }
    }

    /// Whether action costs enter the Q-value.
    pub fn uses_action_cost(self) -> bool {
        match self {
            Objective::MinCost => true,
            Objective::MaxProb => false,
        }
    }

    /// True iff `a` is strictly better than `b` in this direction.
    pub fn is_better(self, a: f64, b: f64, eps: f64) -> bool {
        match self {
            Objective::MinCost => is_approx_less(a, b, eps),
            Objective::MaxProb => is_approx_greater(a, b, eps),
        }
    }

    /// The bound a greedy comparison looks at: the optimistic side.
    pub fn optimistic_bound<V: EngineValue>(self, v: &V) -> f64 {
        match self {
            Objective::MinCost => v.lower(),
            Objective::MaxProb => v.upper(),
        }
    }

    /// True iff the optimistic bound already proves the state dead.
    pub fn proves_dead(self, optimistic: f64) -> bool {
        match self {
            Objective::MinCost => !optimistic.is_finite(),
            Objective::MaxProb => optimistic <= 0.0,
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Objective::MinCost => write!(f, "expected cost"),
            Objective::MaxProb => write!(f, "goal probability"),
        }
    }
}

/// Two-sided value bound with `lower <= upper`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

impl Interval {
    pub fn new(lower: f64, upper: f64) -> Interval {
        Interval { lower, upper }
    }

    pub fn degenerate(v: f64) -> Interval {
        Interval { lower: v, upper: v }
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn scaled(self, p: f64) -> Interval {
        Interval::new(self.lower * p, self.upper * p)
    }
}

impl Add for Interval {
    type Output = Interval;

    fn add(self, rhs: Interval) -> Interval {
        Interval::new(self.lower + rhs.lower, self.upper + rhs.upper)
    }
}

impl AddAssign for Interval {
    fn add_assign(&mut self, rhs: Interval) {
        self.lower += rhs.lower;
        self.upper += rhs.upper;
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

/// The value type a solver instance runs on. `f64` is the scalar regime
/// (a single admissible bound), `Interval` the two-sided regime. Engines are
/// generic over this so the hot path has no branching on the regime.
pub trait EngineValue: Copy + fmt::Debug + PartialEq {
    /// Whether both bounds are tracked (the interval regime).
    const TWO_SIDED: bool;

    fn from_value(v: f64) -> Self;

    /// Builds the initial value from heuristic bounds. The scalar regime
    /// keeps the admissible side for the given objective.
    fn from_bounds(lower: f64, upper: f64, objective: Objective) -> Self;

    fn lower(&self) -> f64;
    fn upper(&self) -> f64;

    /// `self += p * v`
    fn add_weighted(&mut self, p: f64, v: Self);

    fn add_scalar(self, c: f64) -> Self;

    /// Renormalization after removing a self-loop of mass `p_stay`.
    fn divide_by(self, denom: f64) -> Self;

    /// Componentwise best of `self` and `q` in the given direction.
    fn combine_best(&mut self, q: Self, objective: Objective);

    /// Merges a freshly computed value into the stored one and reports
    /// whether anything moved by more than `eps`. The interval regime merges
    /// monotonically (lower never decreases, upper never increases).
    fn update(&mut self, new: Self, eps: f64) -> bool;

    /// Promotes overflowing values to `INFINITE`.
    fn clamp_overflow(self) -> Self;

    fn bounds(&self) -> Interval {
        Interval::new(self.lower(), self.upper())
    }

    fn converged(&self, eps: f64) -> bool;
}

impl EngineValue for f64 {
    const TWO_SIDED: bool = false;

    fn from_value(v: f64) -> f64 {
        v
    }

    fn from_bounds(lower: f64, upper: f64, objective: Objective) -> f64 {
        match objective {
            Objective::MinCost => lower,
            Objective::MaxProb => upper,
        }
    }

    fn lower(&self) -> f64 {
        *self
    }

    fn upper(&self) -> f64 {
        *self
    }

    fn add_weighted(&mut self, p: f64, v: f64) {
        *self += p * v;
    }

    fn add_scalar(self, c: f64) -> f64 {
        self + c
    }

    fn divide_by(self, denom: f64) -> f64 {
        self / denom
    }

    fn combine_best(&mut self, q: f64, objective: Objective) {
        match objective {
            Objective::MinCost => *self = self.min(q),
            Objective::MaxProb => *self = self.max(q),
        }
    }

    fn update(&mut self, new: f64, eps: f64) -> bool {
        let changed = !is_approx_equal(*self, new, eps);
        *self = new;
        changed
    }

    fn clamp_overflow(self) -> f64 {
        if self > FINITE_MAX {
            INFINITE
        } else {
            self
        }
    }

    fn converged(&self, _eps: f64) -> bool {
        true
    }
}

impl EngineValue for Interval {
    const TWO_SIDED: bool = true;

    fn from_value(v: f64) -> Interval {
        Interval::degenerate(v)
    }

    fn from_bounds(lower: f64, upper: f64, _objective: Objective) -> Interval {
        Interval::new(lower, upper)
    }

    fn lower(&self) -> f64 {
        self.lower
    }

    fn upper(&self) -> f64 {
        self.upper
    }

    fn add_weighted(&mut self, p: f64, v: Interval) {
        self.lower += p * v.lower;
        self.upper += p * v.upper;
    }

    fn add_scalar(self, c: f64) -> Interval {
        Interval::new(self.lower + c, self.upper + c)
    }

    fn divide_by(self, denom: f64) -> Interval {
        Interval::new(self.lower / denom, self.upper / denom)
    }

    fn combine_best(&mut self, q: Interval, objective: Objective) {
        // the endpoints propagate independently
        match objective {
            Objective::MinCost => {
                self.lower = self.lower.min(q.lower);
                self.upper = self.upper.min(q.upper);
            }
            Objective::MaxProb => {
                self.lower = self.lower.max(q.lower);
                self.upper = self.upper.max(q.upper);
            }
        }
    }

    fn update(&mut self, new: Interval, eps: f64) -> bool {
        // both endpoints must move toward each other; a backed-up bound
        // regressing beyond tolerance means the heuristic was inadmissible
        debug_assert!(
            !is_approx_less(new.lower, self.lower, eps),
            "lower bound moved backwards: {} -> {}",
            self.lower,
            new.lower
        );
        debug_assert!(
            !is_approx_greater(new.upper, self.upper, eps),
            "upper bound moved backwards: {} -> {}",
            self.upper,
            new.upper
        );
        let lower = self.lower.max(new.lower);
        let upper = self.upper.min(new.upper);
        let changed = is_approx_greater(lower, self.lower, eps)
            || is_approx_less(upper, self.upper, eps);
        self.lower = lower;
        self.upper = upper;
        debug_assert!(!is_approx_less(self.upper, self.lower, eps));
        changed
    }

    fn clamp_overflow(self) -> Interval {
        Interval::new(
            if self.lower > FINITE_MAX { INFINITE } else { self.lower },
            if self.upper > FINITE_MAX { INFINITE } else { self.upper },
        )
    }

    fn converged(&self, eps: f64) -> bool {
        self.width() <= eps
    }
}

/// Total order on non-NaN floats, used for heap keys and argmin selection.
#[derive(PartialOrd, PartialEq, Debug, Clone, Copy)]
pub struct NonNan(f64);

impl NonNan {
    pub fn new(val: f64) -> Option<NonNan> {
        if val.is_nan() {
            None
        } else {
            Some(NonNan(val))
        }
    }

    pub fn inner(self) -> f64 {
        self.0
    }
}

impl Eq for NonNan {}

impl Ord for NonNan {
    fn cmp(&self, other: &NonNan) -> Ordering {
        self.partial_cmp(other).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approx_comparisons_respect_tolerance() {
        assert!(is_approx_equal(1.0, 1.0 + 1e-7, 1e-5));
        assert!(!is_approx_equal(1.0, 1.1, 1e-5));
        assert!(is_approx_equal(INFINITE, INFINITE, 1e-5));
        assert!(is_approx_less(1.0, 1.1, 1e-5));
        assert!(!is_approx_less(1.0, 1.0 + 1e-7, 1e-5));
    }

    #[test]
    fn interval_update_is_monotone() {
        let mut v = Interval::new(0.0, 10.0);
        assert!(v.update(Interval::new(2.0, 8.0), 1e-5));
        assert_eq!(v, Interval::new(2.0, 8.0));
        // a regression within tolerance is treated as unchanged and must
        // not widen the stored interval
        assert!(!v.update(Interval::new(2.0 - 1e-7, 8.0 + 1e-7), 1e-5));
        assert_eq!(v, Interval::new(2.0, 8.0));
    }

    #[test]
    #[should_panic(expected = "lower bound moved backwards")]
    #[cfg(debug_assertions)]
    fn interval_update_rejects_regressing_bounds() {
        let mut v = Interval::new(2.0, 8.0);
        v.update(Interval::new(1.0, 9.0), 1e-5);
    }

    #[test]
    fn scalar_update_reports_changes() {
        let mut v = 3.0_f64;
        assert!(!v.update(3.0 + 1e-8, 1e-5));
        assert!(v.update(4.0, 1e-5));
        assert_eq!(v, 4.0);
    }

    #[test]
    fn combine_best_follows_direction() {
        let mut q = 4.0_f64;
        q.combine_best(2.0, Objective::MinCost);
        assert_eq!(q, 2.0);
        q.combine_best(3.0, Objective::MaxProb);
        assert_eq!(q, 3.0);

        let mut i = Interval::new(0.2, 0.6);
        i.combine_best(Interval::new(0.4, 0.5), Objective::MaxProb);
        assert_eq!(i, Interval::new(0.4, 0.6));
    }

    #[test]
    fn overflow_is_promoted_to_infinity() {
        assert_eq!((2.0 * FINITE_MAX).clamp_overflow(), INFINITE);
        assert_eq!(17.0_f64.clamp_overflow(), 17.0);
    }

    #[test]
    fn dead_proofs() {
        assert!(Objective::MinCost.proves_dead(INFINITE));
        assert!(!Objective::MinCost.proves_dead(1000.0));
        assert!(Objective::MaxProb.proves_dead(0.0));
        assert!(!Objective::MaxProb.proves_dead(0.25));
    }

    #[test]
    fn nonnan_orders_floats() {
        let mut v: Vec<NonNan> = [0.3, 0.1, 0.2]
            .iter()
            .map(|x| NonNan::new(*x).unwrap())
            .collect();
        v.sort();
        assert_eq!(v[0].inner(), 0.1);
        assert!(NonNan::new(f64::NAN).is_none());
    }
}
