use crate::debug::{format_polar_vec, format_rect_vec};
use crate::error::{GridError, GridResult};
use crate::flows::OperatingPoint;
use crate::jac::CartesianLu;
use crate::model::GridModel;
use crate::options::PowerFlowOptions;
use crate::sbus::{current_injection, Injection};
use crate::traits::{LinearSolver, LogProgress, PowerFlow, ProgressMonitor};

use num_complex::Complex64;

/// Solves power flow using the fixed-point (Z-bus current injection)
/// iteration.
///
/// Starting from the no-load voltage `w`, the non-source voltages are
/// updated with
///
/// ```text
///     V_L = w_L + inv(Y_LL) * I_L(V)
/// ```
///
/// where `I(V)` is the nodal current injection of the wye and delta powers.
/// Source voltages stay fixed and `Y_LL` is factored once. Iteration stops
/// once the voltage change measured by `options.criterion` falls below the
/// tolerance.
///
/// Returns the final complex voltages, a flag which indicates whether it
/// converged or not, the number of iterations performed and the last
/// relative change.
pub fn fixed_point_pf(
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
    log::trace!("Sy = {}", format_rect_vec(&injection.wye));
    log::trace!("Sd = {}", format_rect_vec(&injection.delta));

    let y_ll = CartesianLu::factor(model.y_ll_cartesian(), solver)?;

    let mut converged = false;
    let mut i = 0;
    let mut change = f64::INFINITY;

    while !converged && i < max_it {
        // update iteration counter
        i += 1;

        let i_inj = current_injection(model, injection, &v);
        let i_l: Vec<Complex64> = l.iter().map(|&k| i_inj[k]).collect();
        let dv = match y_ll.solve(&i_l) {
            Ok(dv) => dv,
            Err(err) => {
                log::info!("Fixed-point power flow diverged at iteration {}: {}", i, err);
                change = f64::INFINITY;
                break;
            }
        };
        let v_l: Vec<Complex64> = w_l.iter().zip(&dv).map(|(w, dv)| w + dv).collect();

        let v_l_prev: Vec<Complex64> = l.iter().map(|&k| v[k]).collect();
        change = options.change(&v_l, &v_l_prev, &w_l);
        for (&k, v_k) in l.iter().zip(v_l) {
            v[k] = v_k;
        }

        if let Some(pm) = progress {
            pm.update(i, change);
        }
        log::trace!("V{} = {}", i, format_polar_vec(&v));

        if change < tol {
            converged = true;
            log::info!("Fixed-point power flow converged in {} iterations.", i);
        }
    }

    if !converged {
        log::info!(
            "Fixed-point power flow did not converge in {} iterations.",
            i
        );
    }

    Ok((v, converged, i, change))
}

/// Fixed-point power flow backend.
pub struct FixedPoint<S> {
    pub options: PowerFlowOptions,
    pub solver: S,
}

impl<S: LinearSolver> FixedPoint<S> {
    pub fn new(options: PowerFlowOptions, solver: S) -> Self {
        Self { options, solver }
    }
}

impl<S: LinearSolver> PowerFlow for FixedPoint<S> {
    fn solve(&self, model: &GridModel, injection: &Injection) -> GridResult<OperatingPoint> {
        let progress = LogProgress {};
        let (v, converged, iterations, change) = fixed_point_pf(
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
