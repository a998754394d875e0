use crate::dense::Mat;
use crate::error::GridError;
use crate::index::BranchPhase;
use crate::jac::CartesianLu;
use crate::topology::{BranchData, BranchKind};
use crate::traits::LinearSolver;
use num_complex::Complex64;
use sparsetools::coo::Coo;
use sparsetools::csr::CSR;

/// Per-branch primitive admittance blocks.
///
/// ```text
///      | If |   | Yff  Yft |   | Vf |
///      |    | = |          | * |    |
///      | It |   | Ytf  Ytt |   | Vt |
/// ```
///
/// where `If` and `It` are the currents entering the branch at each end.
pub struct Primitive {
    pub y_ff: Mat<Complex64>,
    pub y_ft: Mat<Complex64>,
    pub y_tf: Mat<Complex64>,
    pub y_tt: Mat<Complex64>,
}

/// Inverts the series impedance `Z = R + jX` of a line, solving the real
/// form `[R -X; X R]` for each unit column.
fn series_admittance(
    resistance: &[Vec<f64>],
    reactance: &[Vec<f64>],
    solver: &dyn LinearSolver,
) -> Result<Mat<Complex64>, GridError> {
    let k = resistance.len();
    let rows: Vec<Vec<f64>> = (0..2 * k)
        .map(|i| {
            (0..2 * k)
                .map(|j| match (i < k, j < k) {
                    (true, true) => resistance[i][j],
                    (true, false) => -reactance[i][j - k],
                    (false, true) => reactance[i - k][j],
                    (false, false) => resistance[i - k][j - k],
                })
                .collect()
        })
        .collect();
    let z = Coo::<usize, f64>::from_dense(&rows).to_csc();
    let lu = CartesianLu::factor(&z, solver)?;

    let mut y_s = Mat::<Complex64>::zeros(k, k);
    let mut e = vec![Complex64::default(); k];
    for j in 0..k {
        e[j] = Complex64::new(1.0, 0.0);
        y_s.set_col(j, &lu.solve(&e)?);
        e[j] = Complex64::default();
    }
    Ok(y_s)
}

/// Computes the primitive admittance blocks of a line or transformer.
pub fn branch_primitive(br: &BranchData, solver: &dyn LinearSolver) -> Result<Primitive, GridError> {
    let k = br.phases.len();
    match &br.kind {
        BranchKind::Line {
            resistance,
            reactance,
            susceptance,
        } => {
            let y_s = series_admittance(resistance, reactance, solver).map_err(|err| {
                GridError::topology(format!(
                    "line '{}' has a singular impedance matrix: {}",
                    br.name, err
                ))
            })?;

            // line charging, half at each end
            let mut y_tt = y_s.clone();
            if let Some(b) = susceptance {
                for i in 0..k {
                    for j in 0..k {
                        y_tt.set(i, j, y_tt.get(i, j) + Complex64::new(0.0, b[i][j] / 2.0));
                    }
                }
            }
            let y_ft = y_s.map(|y| -y);
            Ok(Primitive {
                y_ff: y_tt.clone(),
                y_ft: y_ft.clone(),
                y_tf: y_ft,
                y_tt,
            })
        }
        BranchKind::Transformer {
            resistance,
            reactance,
            tap,
        } => {
            let z = Complex64::new(*resistance, *reactance);
            if z == Complex64::default() {
                return Err(GridError::topology(format!(
                    "transformer '{}' has zero impedance",
                    br.name
                )));
            }
            if *tap <= 0.0 {
                return Err(GridError::topology(format!(
                    "transformer '{}' has non-positive tap ratio",
                    br.name
                )));
            }
            let y_s = Complex64::new(1.0, 0.0) / z;
            let t = *tap;

            let diag = |y: Complex64| {
                let mut m = Mat::<Complex64>::zeros(k, k);
                (0..k).for_each(|i| m.set(i, i, y));
                m
            };
            Ok(Primitive {
                y_ff: diag(y_s / (t * t)),
                y_ft: diag(-y_s / t),
                y_tf: diag(-y_s / t),
                y_tt: diag(y_s),
            })
        }
    }
}

/// Builds the nodal admittance matrix and the branch admittance matrices.
///
/// `branch_phases` lists every branch-phase in row order; the rows of one
/// branch are contiguous and follow the order of its phase list. `Yf * V`
/// gives the current entering each branch-phase at its from end and
/// `Yt * V` at its to end.
pub fn make_ybus(
    n_node_phases: usize,
    primitives: &[Primitive],
    branch_phases: &[BranchPhase],
) -> (
    CSR<usize, Complex64>,
    CSR<usize, Complex64>,
    CSR<usize, Complex64>,
) {
    let (nn, nl) = (n_node_phases, branch_phases.len());

    let mut y_bus = Coo::with_size(nn, nn);
    let mut y_f = Coo::with_size(nl, nn);
    let mut y_t = Coo::with_size(nl, nn);

    let mut row = 0;
    for prim in primitives {
        let rows = &branch_phases[row..row + prim.y_ff.rows()];
        for (i, bp_i) in rows.iter().enumerate() {
            for (j, bp_j) in rows.iter().enumerate() {
                let (y_ff, y_ft) = (prim.y_ff.get(i, j), prim.y_ft.get(i, j));
                let (y_tf, y_tt) = (prim.y_tf.get(i, j), prim.y_tt.get(i, j));

                y_f.push(row + i, bp_j.from, y_ff);
                y_f.push(row + i, bp_j.to, y_ft);

                y_t.push(row + i, bp_j.from, y_tf);
                y_t.push(row + i, bp_j.to, y_tt);

                y_bus.push(bp_i.from, bp_j.from, y_ff);
                y_bus.push(bp_i.from, bp_j.to, y_ft);
                y_bus.push(bp_i.to, bp_j.from, y_tf);
                y_bus.push(bp_i.to, bp_j.to, y_tt);
            }
        }
        row += rows.len();
    }

    (y_bus.to_csr(), y_f.to_csr(), y_t.to_csr())
}
