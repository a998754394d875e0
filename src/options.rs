use crate::math::{max_magnitude_change, max_relative_change};
use clap::ValueEnum;
use num_complex::Complex64;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Power flow algorithm.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Alg {
    /// Fixed-point (Z-bus current injection) iteration.
    #[default]
    FixedPoint,
    /// Newton's method (current balance, cartesian).
    Newton,
}

/// Quantity compared with the tolerance after every iteration.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Criterion {
    /// Largest complex voltage change of any node-phase divided by its
    /// no-load voltage magnitude. Dimensionless.
    #[default]
    Relative,
    /// Largest voltage magnitude change of any node-phase, in the voltage
    /// unit of the grid.
    Magnitude,
}

/// Power flow options.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(default, build_fn(validate = "Self::validate"))]
pub struct PowerFlowOptions {
    /// Power flow algorithm.
    pub algorithm: Alg,

    /// Termination tolerance on the largest voltage change per iteration,
    /// measured as given by `criterion`. Default value is 1e-10.
    pub tolerance: f64,

    /// Convergence measure. Default is relative to the no-load voltage,
    /// which makes the tolerance independent of the grid's voltage unit.
    pub criterion: Criterion,

    /// Maximum number of iterations. Default value is 100.
    pub max_iterations: usize,
}

impl Default for PowerFlowOptions {
    fn default() -> Self {
        Self {
            algorithm: Alg::FixedPoint,
            tolerance: 1e-10,
            criterion: Criterion::Relative,
            max_iterations: 100,
        }
    }
}

impl PowerFlowOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(tol) = self.tolerance {
            if !(tol.is_finite() && tol > 0.0) {
                return Err(format!("tolerance must be positive, got {}", tol));
            }
        }
        if let Some(0) = self.max_iterations {
            return Err("max_iterations must be at least 1".to_string());
        }
        Ok(())
    }
}

impl PowerFlowOptions {
    pub fn builder() -> PowerFlowOptionsBuilder {
        PowerFlowOptionsBuilder::default()
    }

    /// Voltage change between two iterates of the non-source node-phases,
    /// `w` being their no-load voltage.
    pub fn change(&self, v: &[Complex64], v_prev: &[Complex64], w: &[Complex64]) -> f64 {
        match self.criterion {
            Criterion::Relative => max_relative_change(v, v_prev, w),
            Criterion::Magnitude => max_magnitude_change(v, v_prev),
        }
    }
}
