use crate::linear::Direction;
use num_complex::Complex64;
use thiserror::Error;

/// Errors raised while building a grid model, solving it or linearizing it.
///
/// None of these are retried internally. Convergence failures carry the last
/// iterate so that callers can decide how to retry (relaxed tolerance,
/// different initial point, reduced injection).
#[derive(Error, Debug)]
pub enum GridError {
    /// Malformed or inconsistent network description.
    #[error("topology error: {0}")]
    Topology(String),

    /// The power flow iteration did not reach the tolerance within the
    /// iteration cap.
    #[error("power flow did not converge in {iterations} iterations (last change {change:e})")]
    Convergence {
        iterations: usize,
        change: f64,
        voltage: Vec<Complex64>,
    },

    /// Singular Jacobian (or otherwise unusable operating point).
    /// `column` names the injection direction and node-phase column being
    /// solved when the failure happened.
    #[error(
        "linearization error at operating point after {iterations} iterations{}: {reason}",
        column_label(.column)
    )]
    Linearization {
        iterations: usize,
        column: Option<(Direction, usize)>,
        reason: String,
    },

    /// Injection vector does not fit the grid model.
    #[error("invalid injection: {0}")]
    Injection(String),

    #[error("invalid options: {0}")]
    Options(String),

    /// Failure reported by the sparse matrix or linear solver libraries.
    #[error("solver error: {0}")]
    Solver(String),
}

pub type GridResult<T> = Result<T, GridError>;

impl From<anyhow::Error> for GridError {
    fn from(err: anyhow::Error) -> Self {
        GridError::Solver(err.to_string())
    }
}

impl From<String> for GridError {
    fn from(s: String) -> Self {
        GridError::Solver(s)
    }
}

impl GridError {
    pub(crate) fn topology(msg: impl Into<String>) -> Self {
        GridError::Topology(msg.into())
    }

    /// Iteration count attached to a convergence or linearization failure.
    pub fn iterations(&self) -> Option<usize> {
        match self {
            GridError::Convergence { iterations, .. }
            | GridError::Linearization { iterations, .. } => Some(*iterations),
            _ => None,
        }
    }
}

fn column_label(column: &Option<(Direction, usize)>) -> String {
    match column {
        Some((dir, k)) => format!(" ({} column {})", dir, k),
        None => String::new(),
    }
}
