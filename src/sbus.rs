use crate::error::GridError;
use crate::model::GridModel;
use num_complex::Complex64;

/// Nodal complex power injection (generation minus load), indexed by
/// node-phase.
///
/// `wye` is phase-to-ground power at each node-phase. `delta` is
/// phase-to-phase power on the delta pair carried by each node-phase row
/// (see `GridModel::delta_pairs`); it must be zero on rows without a pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Injection {
    pub wye: Vec<Complex64>,
    pub delta: Vec<Complex64>,
}

impl Injection {
    pub fn zeros(n: usize) -> Self {
        Self {
            wye: vec![Complex64::default(); n],
            delta: vec![Complex64::default(); n],
        }
    }

    pub fn wye(wye: Vec<Complex64>) -> Self {
        let n = wye.len();
        Self {
            wye,
            delta: vec![Complex64::default(); n],
        }
    }

    pub fn len(&self) -> usize {
        self.wye.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wye.is_empty()
    }

    /// Injection multiplied by a scalar factor.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            wye: self.wye.iter().map(|s| *s * factor).collect(),
            delta: self.delta.iter().map(|s| *s * factor).collect(),
        }
    }

    /// Element-wise sum of two injections.
    pub fn plus(&self, other: &Injection) -> Self {
        Self {
            wye: self.wye.iter().zip(&other.wye).map(|(a, b)| a + b).collect(),
            delta: self
                .delta
                .iter()
                .zip(&other.delta)
                .map(|(a, b)| a + b)
                .collect(),
        }
    }

    /// Sum of all wye and delta injections.
    pub fn total(&self) -> Complex64 {
        self.wye.iter().chain(self.delta.iter()).sum()
    }

    /// Builds the injection resulting from the grid's loads, with
    /// per-load scaling factors (typically one time step of a profile).
    ///
    /// Loads carry demand, so the injection is its negative.
    pub fn from_loads(model: &GridModel, scale: &[f64]) -> Result<Self, GridError> {
        let demand = model.load_power(scale)?;
        let n = model.node_phase_count();
        let mut s = Injection::zeros(n);

        let inc = model.load_entries();
        for (j, sd) in demand.iter().enumerate() {
            for &(i, w) in &inc.wye[j] {
                s.wye[i] -= *sd * w;
            }
            for &(i, w) in &inc.delta[j] {
                s.delta[i] -= *sd * w;
            }
        }
        Ok(s)
    }

    /// Checks dimensions against `model` and that delta power only sits on
    /// rows with a delta pair.
    pub fn check(&self, model: &GridModel) -> Result<(), GridError> {
        let n = model.node_phase_count();
        if self.wye.len() != n || self.delta.len() != n {
            return Err(GridError::Injection(format!(
                "expected {} node-phases, got {} wye and {} delta entries",
                n,
                self.wye.len(),
                self.delta.len()
            )));
        }
        for (m, pair) in model.delta_pairs().iter().enumerate() {
            if pair.is_none() && self.delta[m] != Complex64::default() {
                return Err(GridError::Injection(format!(
                    "delta power on node-phase {} which has no delta pair",
                    m
                )));
            }
        }
        if self
            .wye
            .iter()
            .chain(self.delta.iter())
            .any(|s| !(s.re.is_finite() && s.im.is_finite()))
        {
            return Err(GridError::Injection("non-finite power".to_string()));
        }
        Ok(())
    }
}

/// Nodal current injection `conj(S_wye ./ V) + H' * conj(S_delta ./ (H * V))`
/// at voltage `v`.
pub fn current_injection(
    model: &GridModel,
    s: &Injection,
    v: &[Complex64],
) -> Vec<Complex64> {
    let mut i_inj: Vec<Complex64> = s
        .wye
        .iter()
        .zip(v)
        .map(|(s, v)| crate::math::div_or_zero(*s, *v).conj())
        .collect();

    for (m, pair) in model.delta_pairs().iter().enumerate() {
        if let Some((p, q)) = *pair {
            let i_d = crate::math::div_or_zero(s.delta[m], v[p] - v[q]).conj();
            i_inj[p] += i_d;
            i_inj[q] -= i_d;
        }
    }
    i_inj
}
