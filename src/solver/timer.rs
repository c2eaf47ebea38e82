//! Cooperative countdown timer threaded through every long-running loop.

use std::time::{Duration, Instant};

use crate::solver::error::SolverError;

#[derive(Debug, Clone)]
pub struct CountdownTimer {
    deadline: Option<Instant>,
}

impl CountdownTimer {
    pub fn new(limit: Option<Duration>) -> CountdownTimer {
        CountdownTimer {
            deadline: limit.map(|d| Instant::now() + d),
        }
    }

    pub fn unlimited() -> CountdownTimer {
        CountdownTimer { deadline: None }
    }

    pub fn is_expired(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Checked at iteration boundaries; `Err(Timeout)` unwinds out of the
    /// engine.
    pub fn check(&self) -> Result<(), SolverError> {
        if self.is_expired() {
            Err(SolverError::Timeout)
        } else {
            Ok(())
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}
