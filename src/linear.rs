use crate::dense::Mat;
use crate::error::{GridError, GridResult};
use crate::flows::OperatingPoint;
use crate::jac::{make_jac, CartesianLu};
use crate::math::{div_or_zero, J};
use crate::model::GridModel;
use crate::sbus::Injection;
use crate::traits::LinearSolver;

use num_complex::Complex64;
use num_traits::Zero;
use std::fmt;
use std::iter::zip;
use std::ops::{Add, Mul};

/// Kind of injection a sensitivity column refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    WyeActive,
    WyeReactive,
    DeltaActive,
    DeltaReactive,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::WyeActive,
        Direction::WyeReactive,
        Direction::DeltaActive,
        Direction::DeltaReactive,
    ];
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::WyeActive => "wye active",
            Direction::WyeReactive => "wye reactive",
            Direction::DeltaActive => "delta active",
            Direction::DeltaReactive => "delta reactive",
        };
        write!(f, "{}", s)
    }
}

/// Derivatives of one quantity w.r.t. wye and delta active/reactive power
/// injection. Every matrix has one column per node-phase; delta columns are
/// indexed by the delta row of `GridModel::delta_pairs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensitivity<T: Default + Clone> {
    pub wye_active: Mat<T>,
    pub wye_reactive: Mat<T>,
    pub delta_active: Mat<T>,
    pub delta_reactive: Mat<T>,
}

impl<T> Sensitivity<T>
where
    T: Default + Copy + Zero + Add<Output = T> + Mul<f64, Output = T>,
{
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            wye_active: Mat::zeros(rows, cols),
            wye_reactive: Mat::zeros(rows, cols),
            delta_active: Mat::zeros(rows, cols),
            delta_reactive: Mat::zeros(rows, cols),
        }
    }

    pub fn rows(&self) -> usize {
        self.wye_active.rows()
    }

    pub fn part(&self, dir: Direction) -> &Mat<T> {
        match dir {
            Direction::WyeActive => &self.wye_active,
            Direction::WyeReactive => &self.wye_reactive,
            Direction::DeltaActive => &self.delta_active,
            Direction::DeltaReactive => &self.delta_reactive,
        }
    }

    fn part_mut(&mut self, dir: Direction) -> &mut Mat<T> {
        match dir {
            Direction::WyeActive => &mut self.wye_active,
            Direction::WyeReactive => &mut self.wye_reactive,
            Direction::DeltaActive => &mut self.delta_active,
            Direction::DeltaReactive => &mut self.delta_reactive,
        }
    }

    /// First-order change of the quantity for an injection change `ds`.
    pub fn apply(&self, ds: &Injection) -> Vec<T> {
        let mut out = vec![T::zero(); self.rows()];
        for dir in Direction::ALL {
            let x: Vec<f64> = match dir {
                Direction::WyeActive => ds.wye.iter().map(|s| s.re).collect(),
                Direction::WyeReactive => ds.wye.iter().map(|s| s.im).collect(),
                Direction::DeltaActive => ds.delta.iter().map(|s| s.re).collect(),
                Direction::DeltaReactive => ds.delta.iter().map(|s| s.im).collect(),
            };
            let m = self.part(dir);
            for (r, o) in out.iter_mut().enumerate() {
                *o = zip(m.row(r), &x).fold(*o, |acc, (&d, &x)| acc + d * x);
            }
        }
        out
    }

    /// Projects the sensitivities onto the active and reactive demand of
    /// each load of `model`.
    pub fn by_load(&self, model: &GridModel) -> LoadSensitivity<T> {
        let inc = model.load_entries();
        let n_loads = model.load_count();
        let mut active = Mat::zeros(self.rows(), n_loads);
        let mut reactive = Mat::zeros(self.rows(), n_loads);
        for j in 0..n_loads {
            // demand is negative injection
            let columns = inc.wye[j]
                .iter()
                .map(|&(i, w)| (i, -w, Direction::WyeActive, Direction::WyeReactive))
                .chain(
                    inc.delta[j]
                        .iter()
                        .map(|&(i, w)| (i, -w, Direction::DeltaActive, Direction::DeltaReactive)),
                );
            for (i, w, d_p, d_q) in columns {
                for r in 0..self.rows() {
                    active.set(r, j, active.get(r, j) + self.part(d_p).get(r, i) * w);
                    reactive.set(r, j, reactive.get(r, j) + self.part(d_q).get(r, i) * w);
                }
            }
        }
        LoadSensitivity { active, reactive }
    }
}

/// Derivatives of one quantity w.r.t. the active and reactive demand of
/// each load (one column per load).
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSensitivity<T: Default + Clone> {
    pub active: Mat<T>,
    pub reactive: Mat<T>,
}

/// First-order model of the grid around an operating point.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    /// Complex node-phase voltage (N rows).
    pub voltage: Sensitivity<Complex64>,
    /// Node-phase voltage magnitude (N rows).
    pub voltage_magnitude: Sensitivity<f64>,
    /// Squared magnitude of the from-end branch-phase power (Bp rows).
    pub branch_power_from: Sensitivity<f64>,
    /// Squared magnitude of the to-end branch-phase power (Bp rows).
    pub branch_power_to: Sensitivity<f64>,
    /// Magnitude of the from-end branch-phase power (Bp rows). Zero where
    /// the branch-phase carries no power.
    pub branch_power_magnitude_from: Sensitivity<f64>,
    /// Magnitude of the to-end branch-phase power (Bp rows).
    pub branch_power_magnitude_to: Sensitivity<f64>,
    /// Total active power loss (1 row).
    pub loss_active: Sensitivity<f64>,
    /// Total reactive power loss (1 row).
    pub loss_reactive: Sensitivity<f64>,
}

/// `LinearModel` expressed per load demand.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadLinearModel {
    pub voltage: LoadSensitivity<Complex64>,
    pub voltage_magnitude: LoadSensitivity<f64>,
    pub branch_power_from: LoadSensitivity<f64>,
    pub branch_power_to: LoadSensitivity<f64>,
    pub branch_power_magnitude_from: LoadSensitivity<f64>,
    pub branch_power_magnitude_to: LoadSensitivity<f64>,
    pub loss_active: LoadSensitivity<f64>,
    pub loss_reactive: LoadSensitivity<f64>,
}

impl LinearModel {
    pub fn by_load(&self, model: &GridModel) -> LoadLinearModel {
        LoadLinearModel {
            voltage: self.voltage.by_load(model),
            voltage_magnitude: self.voltage_magnitude.by_load(model),
            branch_power_from: self.branch_power_from.by_load(model),
            branch_power_to: self.branch_power_to.by_load(model),
            branch_power_magnitude_from: self.branch_power_magnitude_from.by_load(model),
            branch_power_magnitude_to: self.branch_power_magnitude_to.by_load(model),
            loss_active: self.loss_active.by_load(model),
            loss_reactive: self.loss_reactive.by_load(model),
        }
    }

    pub fn predict_voltage(&self, op: &OperatingPoint, injection: &Injection) -> Vec<Complex64> {
        let dv = self.voltage.apply(&delta(injection, &op.injection));
        zip(&op.voltage, dv).map(|(v, dv)| v + dv).collect()
    }

    pub fn predict_voltage_magnitude(&self, op: &OperatingPoint, injection: &Injection) -> Vec<f64> {
        let d = self.voltage_magnitude.apply(&delta(injection, &op.injection));
        zip(op.voltage_magnitude(), d).map(|(v, d)| v + d).collect()
    }

    pub fn predict_branch_power_from(&self, op: &OperatingPoint, injection: &Injection) -> Vec<f64> {
        let d = self.branch_power_from.apply(&delta(injection, &op.injection));
        zip(op.branch_power_from_squared(), d)
            .map(|(s, d)| s + d)
            .collect()
    }

    pub fn predict_branch_power_to(&self, op: &OperatingPoint, injection: &Injection) -> Vec<f64> {
        let d = self.branch_power_to.apply(&delta(injection, &op.injection));
        zip(op.branch_power_to_squared(), d)
            .map(|(s, d)| s + d)
            .collect()
    }

    pub fn predict_branch_power_magnitude_from(
        &self,
        op: &OperatingPoint,
        injection: &Injection,
    ) -> Vec<f64> {
        let d = self
            .branch_power_magnitude_from
            .apply(&delta(injection, &op.injection));
        zip(&op.branch_power_from, d).map(|(s, d)| s.norm() + d).collect()
    }

    pub fn predict_branch_power_magnitude_to(
        &self,
        op: &OperatingPoint,
        injection: &Injection,
    ) -> Vec<f64> {
        let d = self
            .branch_power_magnitude_to
            .apply(&delta(injection, &op.injection));
        zip(&op.branch_power_to, d).map(|(s, d)| s.norm() + d).collect()
    }

    /// Total complex loss.
    pub fn predict_loss(&self, op: &OperatingPoint, injection: &Injection) -> Complex64 {
        let ds = delta(injection, &op.injection);
        let p = self.loss_active.apply(&ds)[0];
        let q = self.loss_reactive.apply(&ds)[0];
        op.total_loss() + Complex64::new(p, q)
    }
}

fn delta(s: &Injection, s0: &Injection) -> Injection {
    s.plus(&s0.scaled(-1.0))
}

/// Linearizes the grid around a converged operating point.
///
/// Differentiates the current balance `F(V, S) = Ybus * V - I(V, S) = 0`
/// implicitly: every power injection direction `s` gives
///
/// ```text
///     dV_L = -inv(J) * dF/ds
/// ```
///
/// with `J` the cartesian Jacobian over the non-source node-phases. Source
/// voltages are fixed, so their rows are zero. Voltage magnitude, branch
/// power and loss sensitivities follow from `dV` by the chain rule.
pub fn linearize(
    model: &GridModel,
    op: &OperatingPoint,
    solver: &dyn LinearSolver,
) -> GridResult<LinearModel> {
    if !op.converged {
        return Err(linearization_error(
            op,
            None,
            "operating point is not a converged power flow solution",
        ));
    }
    op.injection.check(model)?;
    let n = model.node_phase_count();
    let nb = model.branch_phase_count();
    if op.voltage.len() != n {
        return Err(linearization_error(
            op,
            None,
            format!("expected {} voltages, got {}", n, op.voltage.len()),
        ));
    }

    let v = &op.voltage;
    let l = model.non_source();
    let mut pos = vec![None; n];
    for (j, &k) in l.iter().enumerate() {
        pos[k] = Some(j);
    }

    let jac = make_jac(model, v, &op.injection)
        .map_err(|err| linearization_error(op, None, err.to_string()))?;
    let lu = CartesianLu::factor(&jac, solver)
        .map_err(|err| linearization_error(op, None, format!("singular Jacobian: {}", err)))?;

    let i_f = model.y_from() * v;
    let i_t = model.y_to() * v;
    let (s_f, s_t) = (&op.branch_power_from, &op.branch_power_to);

    let mut lin = LinearModel {
        voltage: Sensitivity::zeros(n, n),
        voltage_magnitude: Sensitivity::zeros(n, n),
        branch_power_from: Sensitivity::zeros(nb, n),
        branch_power_to: Sensitivity::zeros(nb, n),
        branch_power_magnitude_from: Sensitivity::zeros(nb, n),
        branch_power_magnitude_to: Sensitivity::zeros(nb, n),
        loss_active: Sensitivity::zeros(1, n),
        loss_reactive: Sensitivity::zeros(1, n),
    };

    let zero = Complex64::default();
    for dir in Direction::ALL {
        for k in 0..n {
            let mut rhs = vec![zero; l.len()];
            for (i, d) in injection_derivative(model, v, dir, k) {
                if let Some(j) = pos[i] {
                    rhs[j] -= d;
                }
            }
            if rhs.iter().all(|r| *r == zero) {
                continue;
            }

            let dv_l = lu.solve(&rhs).map_err(|err| {
                linearization_error(op, Some((dir, k)), format!("singular Jacobian: {}", err))
            })?;
            let mut dv = vec![zero; n];
            for (&i, d) in zip(l, dv_l) {
                dv[i] = d;
            }

            // |V|
            let d_vm: Vec<f64> = zip(v, &dv)
                .map(|(v, dv)| magnitude_derivative(*v, *dv))
                .collect();

            // branch power
            let di_f = model.y_from() * &dv;
            let di_t = model.y_to() * &dv;
            let mut d_sf2 = vec![0.0; nb];
            let mut d_st2 = vec![0.0; nb];
            let mut d_sf_mag = vec![0.0; nb];
            let mut d_st_mag = vec![0.0; nb];
            let mut d_loss = zero;
            for (b, bp) in model.branch_phases().iter().enumerate() {
                let d_sf = dv[bp.from] * i_f[b].conj() + v[bp.from] * di_f[b].conj();
                let d_st = -(dv[bp.to] * i_t[b].conj() + v[bp.to] * di_t[b].conj());
                d_sf2[b] = 2.0 * (s_f[b].conj() * d_sf).re;
                d_st2[b] = 2.0 * (s_t[b].conj() * d_st).re;
                d_sf_mag[b] = magnitude_derivative(s_f[b], d_sf);
                d_st_mag[b] = magnitude_derivative(s_t[b], d_st);
                d_loss += d_sf - d_st;
            }

            lin.voltage.part_mut(dir).set_col(k, &dv);
            lin.voltage_magnitude.part_mut(dir).set_col(k, &d_vm);
            lin.branch_power_from.part_mut(dir).set_col(k, &d_sf2);
            lin.branch_power_to.part_mut(dir).set_col(k, &d_st2);
            lin.branch_power_magnitude_from.part_mut(dir).set_col(k, &d_sf_mag);
            lin.branch_power_magnitude_to.part_mut(dir).set_col(k, &d_st_mag);
            lin.loss_active.part_mut(dir).set(0, k, d_loss.re);
            lin.loss_reactive.part_mut(dir).set(0, k, d_loss.im);
        }
    }
    log::debug!(
        "linearized '{}' around operating point with {} node-phases",
        model.name(),
        n
    );

    Ok(lin)
}

fn linearization_error(
    op: &OperatingPoint,
    column: Option<(Direction, usize)>,
    reason: impl Into<String>,
) -> GridError {
    GridError::Linearization {
        iterations: op.iterations,
        column,
        reason: reason.into(),
    }
}

// d|z| for a change dz; zero where z vanishes
fn magnitude_derivative(z: Complex64, dz: Complex64) -> f64 {
    match z.norm() {
        m if m > 0.0 => (z.conj() * dz).re / m,
        _ => 0.0,
    }
}

// Non-zero entries of dF/ds for injection `dir` at column `k`.
fn injection_derivative(
    model: &GridModel,
    v: &[Complex64],
    dir: Direction,
    k: usize,
) -> Vec<(usize, Complex64)> {
    let one = Complex64::new(1.0, 0.0);
    match dir {
        Direction::WyeActive => vec![(k, -div_or_zero(one, v[k].conj()))],
        Direction::WyeReactive => vec![(k, J * div_or_zero(one, v[k].conj()))],
        Direction::DeltaActive | Direction::DeltaReactive => match model.delta_pairs()[k] {
            Some((p, q)) => {
                let u = div_or_zero(one, (v[p] - v[q]).conj());
                let d = if dir == Direction::DeltaActive { -u } else { J * u };
                vec![(p, d), (q, -d)]
            }
            None => Vec::new(),
        },
    }
}
