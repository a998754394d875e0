use crate::model::GridModel;
use crate::sbus::Injection;
use num_complex::Complex64;

/// Solution of one power flow: voltages and branch flows for one
/// injection vector.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatingPoint {
    /// Injection the point was solved for.
    pub injection: Injection,
    /// Complex voltage per node-phase.
    pub voltage: Vec<Complex64>,
    /// Complex power entering each branch-phase at its from end.
    pub branch_power_from: Vec<Complex64>,
    /// Complex power leaving each branch-phase at its to end.
    pub branch_power_to: Vec<Complex64>,
    pub converged: bool,
    pub iterations: usize,
}

impl OperatingPoint {
    /// Derives branch flows algebraically from a voltage solution.
    pub fn new(
        model: &GridModel,
        injection: &Injection,
        voltage: Vec<Complex64>,
        converged: bool,
        iterations: usize,
    ) -> Self {
        let (branch_power_from, branch_power_to) = branch_power(model, &voltage);
        OperatingPoint {
            injection: injection.clone(),
            voltage,
            branch_power_from,
            branch_power_to,
            converged,
            iterations,
        }
    }

    pub fn voltage_magnitude(&self) -> Vec<f64> {
        self.voltage.iter().map(|v| v.norm()).collect()
    }

    /// Voltage magnitude divided by each node's nominal voltage.
    pub fn voltage_magnitude_per_unit(&self, model: &GridModel) -> Vec<f64> {
        self.voltage
            .iter()
            .zip(model.nominal_voltage())
            .map(|(v, v_nom)| v.norm() / v_nom.norm())
            .collect()
    }

    /// Complex loss per branch-phase.
    pub fn branch_loss(&self) -> Vec<Complex64> {
        self.branch_power_from
            .iter()
            .zip(&self.branch_power_to)
            .map(|(f, t)| f - t)
            .collect()
    }

    /// Total complex loss of the grid.
    pub fn total_loss(&self) -> Complex64 {
        self.branch_loss().iter().sum()
    }

    /// Squared magnitude of the from-end branch power.
    pub fn branch_power_from_squared(&self) -> Vec<f64> {
        self.branch_power_from.iter().map(|s| s.norm_sqr()).collect()
    }

    /// Squared magnitude of the to-end branch power.
    pub fn branch_power_to_squared(&self) -> Vec<f64> {
        self.branch_power_to.iter().map(|s| s.norm_sqr()).collect()
    }
}

/// Computes complex power entering every branch-phase at its from end and
/// leaving it at its to end.
pub fn branch_power(model: &GridModel, v: &[Complex64]) -> (Vec<Complex64>, Vec<Complex64>) {
    let v = v.to_vec();
    let i_fr_bus = model.y_from() * &v;
    let i_to_bus = model.y_to() * &v;

    let mut s_f = Vec::with_capacity(model.branch_phase_count());
    let mut s_t = Vec::with_capacity(model.branch_phase_count());
    for (i, bp) in model.branch_phases().iter().enumerate() {
        s_f.push(v[bp.from] * i_fr_bus[i].conj()); // complex power at "from" end
        s_t.push(-(v[bp.to] * i_to_bus[i].conj())); // complex power out of "to" end
    }
    (s_f, s_t)
}
