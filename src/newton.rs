use crate::debug::format_polar_vec;
use crate::error::{GridError, GridResult};
use crate::flows::OperatingPoint;
use crate::jac::{make_jac, CartesianLu};
use crate::math::norm_inf;
use crate::model::GridModel;
use crate::options::PowerFlowOptions;
use crate::sbus::{current_injection, Injection};
use crate::traits::{LinearSolver, LogProgress, PowerFlow, ProgressMonitor};

use num_complex::Complex64;
use std::iter::zip;

/// Solves power flow using full Newton's method (current/cartesian).
///
/// Solves for the non-source node-phase voltages using a full
/// Newton-Raphson method on the nodal current balance
///
/// ```text
///     F(V) = Ybus * V - I(V)
/// ```
///
/// in cartesian coordinates. Iteration starts at the no-load voltage and
/// stops on the same voltage change criterion as the fixed-point solver.
/// A structurally singular Jacobian is reported as an error.
///
/// Returns the final complex voltages, a flag which indicates whether it
/// converged or not, the number of iterations performed and the last
/// relative change.
pub fn newtonpf_i_cart(
    model: &GridModel,
    injection: &Injection,
    solver: &dyn LinearSolver,
    options: &PowerFlowOptions,
    progress: Option<&dyn ProgressMonitor>,
) -> GridResult<(Vec<Complex64>, bool, usize, f64)> {
    injection.check(model)?;

    let tol = options.tolerance;
    let max_it = options.max_iterations;

    let w = model.no_load_voltage();
    let l = model.non_source();
    let mut v = w.to_vec();

    if l.is_empty() {
        log::info!("Grid has no non-source node-phases, nothing to solve.");
        return Ok((v, true, 0, 0.0));
    }
    let w_l: Vec<Complex64> = l.iter().map(|&k| w[k]).collect();

    let mut converged = false;
    let mut i = 0;
    let mut change = f64::INFINITY;

    // do Newton iterations
    while !converged && i < max_it {
        // update iteration counter
        i += 1;

        // evaluate F(x)
        let i_bus = model.y_bus() * &v;
        let i_inj = current_injection(model, injection, &v);
        let mis: Vec<Complex64> = zip(&i_bus, &i_inj)
            .map(|(i_bus, i_inj)| i_bus - i_inj)
            .collect();
        let neg_f: Vec<Complex64> = l.iter().map(|&k| -mis[k]).collect();
        log::trace!(
            "max mismatch {:e}",
            norm_inf(&neg_f.iter().map(|f| f.norm()).collect::<Vec<f64>>()).unwrap_or(0.0)
        );

        // evaluate Jacobian and compute update step
        let jac = make_jac(model, &v, injection)?;
        let dx = match CartesianLu::factor(&jac, solver)?.solve(&neg_f) {
            Ok(dx) => dx,
            Err(err) => {
                log::info!("Newton's method power flow diverged at iteration {}: {}", i, err);
                change = f64::INFINITY;
                break;
            }
        };

        // update voltage
        let v_l_prev: Vec<Complex64> = l.iter().map(|&k| v[k]).collect();
        for (&k, dx) in zip(l, &dx) {
            v[k] += *dx;
        }
        let v_l: Vec<Complex64> = l.iter().map(|&k| v[k]).collect();
        change = options.change(&v_l, &v_l_prev, &w_l);

        if let Some(pm) = progress {
            pm.update(i, change);
        }
        log::trace!("V{} = {}", i, format_polar_vec(&v));

        if change < tol {
            converged = true;
            log::info!(
                "Newton's method power flow (current balance, cartesian) converged in {} iterations.",
                i
            );
        }
    }

    if !converged {
        log::info!(
            "Newton's method power flow (current balance, cartesian) did not converge in {} iterations.",
            i
        );
    }

    Ok((v, converged, i, change))
}

/// Newton-Raphson power flow backend.
pub struct Newton<S> {
    pub options: PowerFlowOptions,
    pub solver: S,
}

impl<S: LinearSolver> Newton<S> {
    pub fn new(options: PowerFlowOptions, solver: S) -> Self {
        Self { options, solver }
    }
}

impl<S: LinearSolver> PowerFlow for Newton<S> {
    fn solve(&self, model: &GridModel, injection: &Injection) -> GridResult<OperatingPoint> {
        let progress = LogProgress {};
        let (v, converged, iterations, change) = newtonpf_i_cart(
            model,
            injection,
            &self.solver,
            &self.options,
            Some(&progress),
        )?;
        if !converged {
            return Err(GridError::Convergence {
                iterations,
                change,
                voltage: v,
            });
        }
        Ok(OperatingPoint::new(model, injection, v, converged, iterations))
    }
}
