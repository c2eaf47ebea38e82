//! Heuristic-search solver for stochastic shortest-path and MaxProb MDPs
//! over grounded, factored planning tasks.
//!
//! The crate splits into the task-facing models (`task`, `explicit`), the
//! generic solver core (`solver`), and the end-to-end driver used by the
//! command line (`driver`).

pub mod driver;
pub mod explicit;
pub mod solver;
pub mod task;

pub use crate::solver::error::{ExitCode, SolverError};
pub use crate::solver::value::{Interval, Objective};
