//! Successor sampling strategies. Every sampler draws from the engine-level
//! RNG it was constructed with, so a fixed seed reproduces the trace.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;

use crate::solver::mdp::{Distribution, StateId};
use crate::solver::picker::StateBounds;
use crate::solver::value::FINITE_MAX;

/// Chooses one successor out of a transition's distribution.
pub trait SuccessorSampler<A> {
    fn sample(
        &mut self,
        source: StateId,
        action: &A,
        successors: &Distribution<StateId>,
        bounds: &dyn StateBounds,
    ) -> StateId;
}

/// Uniform over the support, ignoring probabilities.
pub struct UniformSampler {
    rng: StdRng,
}

impl UniformSampler {
    pub fn new(seed: u64) -> UniformSampler {
        UniformSampler {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<A> SuccessorSampler<A> for UniformSampler {
    fn sample(
        &mut self,
        _source: StateId,
        _action: &A,
        successors: &Distribution<StateId>,
        _bounds: &dyn StateBounds,
    ) -> StateId {
        let support: Vec<StateId> = successors.support().copied().collect();
        *support.choose(&mut self.rng).unwrap()
    }
}

/// Weighted by transition probability.
pub struct RandomSampler {
    rng: StdRng,
}

impl RandomSampler {
    pub fn new(seed: u64) -> RandomSampler {
        RandomSampler {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<A> SuccessorSampler<A> for RandomSampler {
    fn sample(
        &mut self,
        _source: StateId,
        _action: &A,
        successors: &Distribution<StateId>,
        _bounds: &dyn StateBounds,
    ) -> StateId {
        *successors.sample(&mut self.rng)
    }
}

/// Deterministic: the successor with the highest probability, first one on
/// ties.
pub struct MostLikelySampler;

impl<A> SuccessorSampler<A> for MostLikelySampler {
    fn sample(
        &mut self,
        _source: StateId,
        _action: &A,
        successors: &Distribution<StateId>,
        _bounds: &dyn StateBounds,
    ) -> StateId {
        let mut best: Option<(StateId, f64)> = None;
        for (succ, p) in successors.iter() {
            match best {
                Some((_, q)) if *p <= q => {}
                _ => best = Some((*succ, *p)),
            }
        }
        best.unwrap().0
    }
}

fn weighted_pick(rng: &mut StdRng, entries: &[(StateId, f64)]) -> Option<StateId> {
    let total: f64 = entries.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return None;
    }
    let mut roll = rng.gen_range(0.0..total);
    for (s, w) in entries {
        if roll < *w {
            return Some(*s);
        }
        roll -= w;
    }
    entries.last().map(|(s, _)| *s)
}

/// Weighted by probability times the successor's value estimate; falls back
/// to probability weighting when every weight vanishes.
pub struct VBiasedSampler {
    rng: StdRng,
}

impl VBiasedSampler {
    pub fn new(seed: u64) -> VBiasedSampler {
        VBiasedSampler {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<A> SuccessorSampler<A> for VBiasedSampler {
    fn sample(
        &mut self,
        _source: StateId,
        _action: &A,
        successors: &Distribution<StateId>,
        bounds: &dyn StateBounds,
    ) -> StateId {
        let entries: Vec<(StateId, f64)> = successors
            .iter()
            .map(|(succ, p)| {
                let b = bounds.bounds(*succ);
                let value = if b.upper.is_finite() {
                    (b.lower + b.upper) / 2.0
                } else if b.lower.is_finite() {
                    b.lower
                } else {
                    FINITE_MAX
                };
                (*succ, p * value.max(0.0))
            })
            .collect();
        match weighted_pick(&mut self.rng, &entries) {
            Some(s) => s,
            None => *successors.sample(&mut self.rng),
        }
    }
}

/// Weighted by probability times the successor's bound gap; successors whose
/// interval already collapsed are never drawn unless all have collapsed.
pub struct VGapSampler {
    rng: StdRng,
}

impl VGapSampler {
    pub fn new(seed: u64) -> VGapSampler {
        VGapSampler {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<A> SuccessorSampler<A> for VGapSampler {
    fn sample(
        &mut self,
        _source: StateId,
        _action: &A,
        successors: &Distribution<StateId>,
        bounds: &dyn StateBounds,
    ) -> StateId {
        let entries: Vec<(StateId, f64)> = successors
            .iter()
            .map(|(succ, p)| {
                let b = bounds.bounds(*succ);
                let width = b.upper - b.lower;
                (*succ, p * if width.is_finite() { width } else { 1.0 })
            })
            .collect();
        match weighted_pick(&mut self.rng, &entries) {
            Some(s) => s,
            None => *successors.sample(&mut self.rng),
        }
    }
}
