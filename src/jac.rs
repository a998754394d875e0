use crate::d_imis_dv::d_imis_dv;
use crate::error::{GridError, GridResult};
use crate::model::GridModel;
use crate::sbus::Injection;
use crate::traits::{Factors, LinearSolver};

use num_complex::Complex64;
use petgraph::algo::maximum_matching;
use petgraph::graph::{NodeIndex, UnGraph};
use sparsetools::coo::Coo;
use sparsetools::csc::CSC;
use sparsetools::csr::{CCSR, CSR};

/// Forms the real Jacobian of the current mismatch w.r.t. the real and
/// imaginary parts of the non-source voltages.
///
/// ```text
///     J = [ real(dImis_dVr(L, L))  real(dImis_dVi(L, L)) ;
///           imag(dImis_dVr(L, L))  imag(dImis_dVi(L, L)) ]
/// ```
///
/// Rows are `[Re; Im]` of the mismatch, columns `[dVr; dVi]`.
pub fn make_jac(
    model: &GridModel,
    v: &[Complex64],
    s: &Injection,
) -> GridResult<CSC<usize, f64>> {
    let (d_imis_dvr, d_imis_dvi) = d_imis_dv(model.y_bus(), v, s, model.delta_pairs())?;
    cartesian_jac(&d_imis_dvr, &d_imis_dvi, model.non_source())
}

pub(crate) fn cartesian_jac(
    d_dvr: &CSR<usize, Complex64>,
    d_dvi: &CSR<usize, Complex64>,
    rows: &[usize],
) -> GridResult<CSC<usize, f64>> {
    if rows.is_empty() {
        return Ok(Coo::<usize, f64>::with_size(0, 0).to_csc());
    }
    let d_dvr = d_dvr.select(Some(rows), Some(rows))?;
    let d_dvi = d_dvi.select(Some(rows), Some(rows))?;

    let j11 = d_dvr.real();
    let j12 = d_dvi.real();
    let j21 = d_dvr.imag();
    let j22 = d_dvi.imag();

    let jac = Coo::compose([
        [&j11.to_coo(), &j12.to_coo()],
        [&j21.to_coo(), &j22.to_coo()],
    ])?
    .to_csc();

    Ok(jac)
}

/// Sparse LU factors of a real cartesian system, reused for every
/// right-hand side.
pub(crate) struct CartesianLu<'a> {
    solver: &'a dyn LinearSolver,
    factors: Option<Factors>,
    n: usize,
}

impl<'a> CartesianLu<'a> {
    /// Factors the square matrix `a`. Structurally singular matrices are
    /// rejected before factorization.
    pub fn factor(a: &CSC<usize, f64>, solver: &'a dyn LinearSolver) -> GridResult<Self> {
        let n = a.cols();
        if a.rows() != n {
            return Err(GridError::Solver(format!(
                "matrix is {} x {}, expected square",
                a.rows(),
                n
            )));
        }
        let factors = if n == 0 {
            None
        } else {
            check_structural_rank(a)?;
            Some(solver.factor(n, a.rowidx(), a.colptr(), a.values())?)
        };
        Ok(Self { solver, factors, n })
    }

    /// Solves `A * [x_r; x_i] = [Re(rhs); Im(rhs)]` and returns `x_r + j x_i`.
    pub fn solve(&self, rhs: &[Complex64]) -> GridResult<Vec<Complex64>> {
        let m = rhs.len();
        if 2 * m != self.n {
            return Err(GridError::Solver(format!(
                "right-hand side has {} rows, expected {}",
                2 * m,
                self.n
            )));
        }
        let mut x: Vec<f64> = rhs
            .iter()
            .map(|r| r.re)
            .chain(rhs.iter().map(|r| r.im))
            .collect();
        if let Some(factors) = &self.factors {
            self.solver.solve(factors, &mut x, false)?;
        }
        if x.iter().any(|x| !x.is_finite()) {
            return Err(GridError::Solver("solution is not finite".to_string()));
        }

        Ok((0..m).map(|i| Complex64::new(x[i], x[m + i])).collect())
    }
}

// A square matrix is structurally nonsingular iff the bipartite graph of
// its non-zero entries has a perfect row/column matching.
fn check_structural_rank(a: &CSC<usize, f64>) -> GridResult<()> {
    let n = a.cols();
    let (rowidx, colptr, values) = (a.rowidx(), a.colptr(), a.values());
    let entries = move |j: usize| {
        (colptr[j]..colptr[j + 1])
            .filter(move |&p| values[p] != 0.0)
            .map(move |p| rowidx[p])
    };

    let mut row_used = vec![false; n];
    let mut full_diagonal = true;
    for j in 0..n {
        let mut any = false;
        let mut diagonal = false;
        for i in entries(j) {
            any = true;
            diagonal |= i == j;
            row_used[i] = true;
        }
        if !any {
            return Err(GridError::Solver(format!(
                "matrix is structurally singular: column {} is empty",
                j
            )));
        }
        full_diagonal &= diagonal;
    }
    if let Some(i) = row_used.iter().position(|used| !used) {
        return Err(GridError::Solver(format!(
            "matrix is structurally singular: row {} is empty",
            i
        )));
    }
    if full_diagonal {
        return Ok(());
    }

    // rows are nodes 0..n, columns n..2n
    let mut graph = UnGraph::<(), ()>::with_capacity(2 * n, a.nnz());
    for _ in 0..2 * n {
        graph.add_node(());
    }
    for j in 0..n {
        for i in entries(j) {
            graph.add_edge(NodeIndex::new(i), NodeIndex::new(n + j), ());
        }
    }
    let matched = maximum_matching(&graph).len();
    if matched < n {
        return Err(GridError::Solver(format!(
            "matrix is structurally singular: structural rank {} of {}",
            matched, n
        )));
    }
    Ok(())
}
