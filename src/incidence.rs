use crate::error::GridError;
use crate::index::{BranchPhase, NodePhaseIndex};
use crate::phase::{delta_pair, delta_row, Phase};
use crate::topology::{Connection, LoadData};
use sparsetools::coo::Coo;
use sparsetools::csr::CSR;

/// Node-phase x node matrix with a one where a node-phase belongs to a node.
pub fn make_node_incidence(index: &NodePhaseIndex, n_nodes: usize) -> CSR<usize, f64> {
    let mut c = Coo::with_size(index.len(), n_nodes);
    for (i, np) in index.entries().iter().enumerate() {
        c.push(i, np.node, 1.0);
    }
    c.to_csr()
}

/// Branch-phase x node-phase connection matrices for the from and to ends.
pub fn make_branch_incidence(
    branch_phases: &[BranchPhase],
    n_node_phases: usize,
) -> (CSR<usize, f64>, CSR<usize, f64>) {
    let mut c_f = Coo::with_size(branch_phases.len(), n_node_phases);
    let mut c_t = Coo::with_size(branch_phases.len(), n_node_phases);
    for (i, bp) in branch_phases.iter().enumerate() {
        c_f.push(i, bp.from, 1.0);
        c_t.push(i, bp.to, 1.0);
    }
    (c_f.to_csr(), c_t.to_csr())
}

/// Node-phase pairs `(p, q)` forming the line-to-line voltage `Vp - Vq` of
/// each delta row. Rows without a pair are `None`.
pub fn make_delta_pairs(
    index: &NodePhaseIndex,
    node_phases: &[Vec<Phase>],
) -> Vec<Option<(usize, usize)>> {
    index
        .entries()
        .iter()
        .map(|np| {
            let phases = &node_phases[np.node];
            delta_pair(phases, np.phase).and_then(|(p, q)| {
                let ip = index.of(np.node, p)?;
                let iq = index.of(np.node, q)?;
                Some((ip, iq))
            })
        })
        .collect()
}

/// Delta transformation matrix `H` such that `(H * V)[m]` is the
/// line-to-line voltage of delta row `m`.
pub fn make_delta_transformation(pairs: &[Option<(usize, usize)>]) -> CSR<usize, f64> {
    let n = pairs.len();
    let mut h = Coo::with_size(n, n);
    for (m, pair) in pairs.iter().enumerate() {
        if let Some((p, q)) = pair {
            h.push(m, *p, 1.0);
            h.push(m, *q, -1.0);
        }
    }
    h.to_csr()
}

/// Sparse columns of the load incidence matrices: for each load, the
/// `(row, weight)` entries of its wye and delta columns.
#[derive(Debug, Clone, Default)]
pub struct LoadIncidence {
    pub wye: Vec<Vec<(usize, f64)>>,
    pub delta: Vec<Vec<(usize, f64)>>,
}

impl LoadIncidence {
    pub fn build(
        loads: &[LoadData],
        index: &NodePhaseIndex,
        node_number: impl Fn(&str) -> Option<usize>,
        node_phases: &[Vec<Phase>],
    ) -> Result<Self, GridError> {
        let mut inc = LoadIncidence::default();
        for ld in loads {
            let node = node_number(&ld.node).ok_or_else(|| {
                GridError::topology(format!(
                    "load '{}' references unknown node '{}'",
                    ld.name, ld.node
                ))
            })?;
            let phases = &node_phases[node];
            if let Some(p) = ld.phases.iter().find(|p| !phases.contains(p)) {
                return Err(GridError::topology(format!(
                    "load '{}' uses phase {} which node '{}' does not have",
                    ld.name, p, ld.node
                )));
            }

            let mut wye = Vec::new();
            let mut delta = Vec::new();
            match ld.connection {
                Connection::Wye => {
                    let w = 1.0 / ld.phases.len() as f64;
                    for &p in &ld.phases {
                        // phase presence was checked above
                        if let Some(i) = index.of(node, p) {
                            wye.push((i, w));
                        }
                    }
                }
                Connection::Delta => {
                    let rows = delta_rows(&ld.phases, phases).ok_or_else(|| {
                        GridError::topology(format!(
                            "delta load '{}' needs at least two phases",
                            ld.name
                        ))
                    })?;
                    let w = 1.0 / rows.len() as f64;
                    for p in rows {
                        if let Some(i) = index.of(node, p) {
                            delta.push((i, w));
                        }
                    }
                }
            }
            inc.wye.push(wye);
            inc.delta.push(delta);
        }
        Ok(inc)
    }

    pub fn to_csr(&self, n_node_phases: usize) -> (CSR<usize, f64>, CSR<usize, f64>) {
        let to_csr = |cols: &[Vec<(usize, f64)>]| {
            let mut c = Coo::with_size(n_node_phases, cols.len());
            for (j, col) in cols.iter().enumerate() {
                for &(i, w) in col {
                    c.push(i, j, w);
                }
            }
            c.to_csr()
        };
        (to_csr(&self.wye), to_csr(&self.delta))
    }
}

// Delta-pair rows spanned by a delta load on `load_phases`.
fn delta_rows(load_phases: &[Phase], node_phases: &[Phase]) -> Option<Vec<Phase>> {
    match load_phases.len() {
        3 => Some(vec![Phase::A, Phase::B, Phase::C]),
        2 => delta_row(node_phases, load_phases[0], load_phases[1]).map(|p| vec![p]),
        _ => None,
    }
}
