//! Tie-breaking among greedy actions.

use crate::solver::mdp::{ActionIndex, StateId, Transition};
use crate::solver::value::Interval;

/// Read access to the current value bounds of a state, as far as the value
/// regime knows them. Implemented by the state-info store.
pub trait StateBounds {
    fn bounds(&self, id: StateId) -> Interval;
}

/// Picks one transition out of the greedy set. `previous` is the action
/// stored by the last update, if any; the returned index is into `greedy`.
pub trait PolicyPicker<A> {
    fn pick(
        &mut self,
        previous: Option<&A>,
        greedy: &[Transition<A>],
        bounds: &dyn StateBounds,
    ) -> usize;
}

/// First greedy transition in enumeration order.
pub struct ArbitraryPicker;

impl<A> PolicyPicker<A> for ArbitraryPicker {
    fn pick(
        &mut self,
        _previous: Option<&A>,
        _greedy: &[Transition<A>],
        _bounds: &dyn StateBounds,
    ) -> usize {
        0
    }
}

/// Keeps the previously stored action while it is still greedy, otherwise
/// falls back to the first greedy entry.
pub struct StablePicker;

impl<A: PartialEq> PolicyPicker<A> for StablePicker {
    fn pick(
        &mut self,
        previous: Option<&A>,
        greedy: &[Transition<A>],
        _bounds: &dyn StateBounds,
    ) -> usize {
        if let Some(prev) = previous {
            if let Some(i) = greedy.iter().position(|t| t.action == *prev) {
                return i;
            }
        }
        0
    }
}

/// Lowest underlying operator id wins.
pub struct OperatorIdPicker;

impl<A: ActionIndex> PolicyPicker<A> for OperatorIdPicker {
    fn pick(
        &mut self,
        _previous: Option<&A>,
        greedy: &[Transition<A>],
        _bounds: &dyn StateBounds,
    ) -> usize {
        let mut best = 0;
        for (i, t) in greedy.iter().enumerate().skip(1) {
            if t.action.action_index() < greedy[best].action.action_index() {
                best = i;
            }
        }
        best
    }
}

/// Picks by the probability-weighted bound gap of the successor
/// distribution. Meaningful in the interval regime only.
pub struct ValueGapPicker {
    pub prefer_large_gaps: bool,
}

impl ValueGapPicker {
    fn gap_score<A>(t: &Transition<A>, bounds: &dyn StateBounds) -> f64 {
        let mut score = 0.0;
        for (succ, p) in t.successors.iter() {
            let b = bounds.bounds(*succ);
            let width = b.upper - b.lower;
            score += p * if width.is_finite() { width } else { 1.0 };
        }
        score
    }
}

impl<A> PolicyPicker<A> for ValueGapPicker {
    fn pick(
        &mut self,
        _previous: Option<&A>,
        greedy: &[Transition<A>],
        bounds: &dyn StateBounds,
    ) -> usize {
        let mut best = 0;
        let mut best_score = Self::gap_score(&greedy[0], bounds);
        for (i, t) in greedy.iter().enumerate().skip(1) {
            let score = Self::gap_score(t, bounds);
            let better = if self.prefer_large_gaps {
                score > best_score
            } else {
                score < best_score
            };
            if better {
                best = i;
                best_score = score;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::mdp::{Distribution, OperatorId};

    struct FixedBounds(Vec<Interval>);

    impl StateBounds for FixedBounds {
        fn bounds(&self, id: StateId) -> Interval {
            self.0[id.index()]
        }
    }

    fn transition(op: usize, succs: &[(u32, f64)]) -> Transition<OperatorId> {
        Transition::new(
            OperatorId(op),
            Distribution::from_pairs(succs.iter().map(|(s, p)| (StateId(*s), *p)).collect()),
        )
    }

    fn no_bounds() -> FixedBounds {
        FixedBounds(vec![Interval::degenerate(0.0); 8])
    }

    #[test]
    fn stable_keeps_previous_action_when_still_greedy() {
        let greedy = vec![transition(2, &[(0, 1.0)]), transition(7, &[(1, 1.0)])];
        let mut picker = StablePicker;
        let prev = OperatorId(7);
        assert_eq!(picker.pick(Some(&prev), &greedy, &no_bounds()), 1);
        let gone = OperatorId(9);
        assert_eq!(picker.pick(Some(&gone), &greedy, &no_bounds()), 0);
        assert_eq!(picker.pick(None, &greedy, &no_bounds()), 0);
    }

    #[test]
    fn operator_id_picks_lowest() {
        let greedy = vec![
            transition(5, &[(0, 1.0)]),
            transition(1, &[(1, 1.0)]),
            transition(3, &[(2, 1.0)]),
        ];
        let mut picker = OperatorIdPicker;
        assert_eq!(picker.pick(None, &greedy, &no_bounds()), 1);
    }

    #[test]
    fn value_gap_weighs_successor_widths() {
        let bounds = FixedBounds(vec![
            Interval::new(0.0, 1.0),
            Interval::new(0.0, 0.1),
            Interval::new(0.0, 0.5),
        ]);
        let greedy = vec![
            transition(0, &[(0, 0.5), (1, 0.5)]), // score 0.55
            transition(1, &[(2, 1.0)]),           // score 0.5
        ];
        let mut large = ValueGapPicker {
            prefer_large_gaps: true,
        };
        assert_eq!(large.pick(None, &greedy, &bounds), 0);
        let mut small = ValueGapPicker {
            prefer_large_gaps: false,
        };
        assert_eq!(small.pick(None, &greedy, &bounds), 1);
    }
}
