use crate::error::GridResult;
use crate::fixed_point::FixedPoint;
use crate::flows::OperatingPoint;
use crate::model::GridModel;
use crate::newton::Newton;
use crate::options::{Alg, PowerFlowOptions};
use crate::sbus::Injection;

use spsolve::FactorSolver;

/// Sparse LU factors of a real matrix.
pub type Factors = rlu::LU<f64>;

/// Sparse linear solver that factors a matrix once and reuses the factors
/// for any number of right-hand sides. Implemented by `spsolve::rlu::RLU`.
pub trait LinearSolver: FactorSolver<usize, f64, Factors> {}

impl<T: FactorSolver<usize, f64, Factors>> LinearSolver for T {}

/// A power flow backend: computes the operating point of `model` for one
/// injection. Calls are independent of each other.
pub trait PowerFlow {
    fn solve(&self, model: &GridModel, injection: &Injection) -> GridResult<OperatingPoint>;
}

/// Receives the convergence measure after every iteration.
pub trait ProgressMonitor {
    fn update(&self, i: usize, change: f64);
}

/// Writes iteration progress to the log at debug level.
pub struct LogProgress {}

impl ProgressMonitor for LogProgress {
    fn update(&self, i: usize, change: f64) {
        if i == 1 {
            log::debug!(" it    max relative voltage change");
            log::debug!("----  -----------------------------");
        }
        log::debug!("{:3}        {:10.3e}", i, change);
    }
}

/// Power flow backend selected by `PowerFlowOptions::algorithm`.
pub enum Backend<S> {
    FixedPoint(FixedPoint<S>),
    Newton(Newton<S>),
}

impl<S: LinearSolver> Backend<S> {
    pub fn from_options(options: PowerFlowOptions, solver: S) -> Self {
        match options.algorithm {
            Alg::FixedPoint => Backend::FixedPoint(FixedPoint::new(options, solver)),
            Alg::Newton => Backend::Newton(Newton::new(options, solver)),
        }
    }
}

impl<S: LinearSolver> PowerFlow for Backend<S> {
    fn solve(&self, model: &GridModel, injection: &Injection) -> GridResult<OperatingPoint> {
        match self {
            Backend::FixedPoint(pf) => pf.solve(model, injection),
            Backend::Newton(pf) => pf.solve(model, injection),
        }
    }
}
