use crate::d_imis_dv::d_imis_dv;
use crate::error::{GridError, GridResult};
use crate::incidence::{
    make_branch_incidence, make_delta_pairs, make_delta_transformation, make_node_incidence,
    LoadIncidence,
};
use crate::index::{BranchPhase, NodePhaseIndex};
use crate::jac::{cartesian_jac, CartesianLu};
use crate::phase::Phase;
use crate::sbus::Injection;
use crate::topology::{check_phases, check_square, BranchKind, GridDefinition, NodeData};
use crate::traits::LinearSolver;
use crate::ybus::{branch_primitive, make_ybus};

use num_complex::Complex64;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::Bfs;
use sparsetools::csc::CSC;
use sparsetools::csr::CSR;
use spsolve::rlu::RLU;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

/// Algebraic model of one grid: admittance, incidence and load incidence
/// matrices plus the node-phase/branch-phase index tables.
///
/// Immutable once built and shared by reference across any number of
/// power flow and linearization calls.
pub struct GridModel {
    name: String,
    fingerprint: u64,

    definition: GridDefinition,
    node_numbers: HashMap<String, usize>,
    index: NodePhaseIndex,
    branch_phases: Vec<BranchPhase>,

    source: Vec<usize>,
    non_source: Vec<usize>,
    no_load_voltage: Vec<Complex64>,

    y_bus: CSR<usize, Complex64>,
    y_from: CSR<usize, Complex64>,
    y_to: CSR<usize, Complex64>,
    // [Re; Im] form of Y restricted to non-source node-phases
    y_ll: CSC<usize, f64>,

    node_incidence: CSR<usize, f64>,
    branch_incidence_from: CSR<usize, f64>,
    branch_incidence_to: CSR<usize, f64>,
    delta_transformation: CSR<usize, f64>,
    delta_pairs: Vec<Option<(usize, usize)>>,
    load_incidence_wye: CSR<usize, f64>,
    load_incidence_delta: CSR<usize, f64>,
    load_entries: LoadIncidence,
}

impl GridModel {
    /// Builds the grid model using the default sparse LU solver for the
    /// line admittances and the no-load voltage.
    pub fn build(def: &GridDefinition) -> GridResult<Self> {
        Self::build_with(def, &RLU::default())
    }

    pub fn build_with(def: &GridDefinition, solver: &dyn LinearSolver) -> GridResult<Self> {
        let mut def = def.clone();

        // nodes
        let mut node_numbers = HashMap::new();
        for (i, nd) in def.nodes.iter_mut().enumerate() {
            check_phases(&format!("node '{}'", nd.name), &nd.phases).map_err(GridError::Topology)?;
            if !(nd.voltage.is_finite() && nd.voltage > 0.0) {
                return Err(GridError::topology(format!(
                    "node '{}' has invalid nominal voltage",
                    nd.name
                )));
            }
            nd.phases.sort();
            if node_numbers.insert(nd.name.clone(), i).is_some() {
                return Err(GridError::topology(format!("duplicate node '{}'", nd.name)));
            }
        }
        if !def.nodes.iter().any(|nd| nd.source) {
            return Err(GridError::topology("grid has no source node"));
        }
        let index = NodePhaseIndex::new(
            def.nodes
                .iter()
                .map(|nd| (nd.name.as_str(), nd.phases.as_slice())),
        );
        let n = index.len();
        let node_phases: Vec<Vec<Phase>> = def.nodes.iter().map(|nd| nd.phases.clone()).collect();

        // branches
        let mut names = HashSet::new();
        let mut branch_phases = Vec::new();
        let mut primitives = Vec::with_capacity(def.branches.len());
        for (b, br) in def.branches.iter().enumerate() {
            if !names.insert(br.name.as_str()) {
                return Err(GridError::topology(format!("duplicate branch '{}'", br.name)));
            }
            let what = format!("branch '{}'", br.name);
            check_phases(&what, &br.phases).map_err(GridError::Topology)?;
            let end = |name: &str| {
                node_numbers.get(name).copied().ok_or_else(|| {
                    GridError::topology(format!("{} references unknown node '{}'", what, name))
                })
            };
            let (f, t) = (end(&br.from)?, end(&br.to)?);
            if f == t {
                return Err(GridError::topology(format!("{} is a self loop", what)));
            }
            if let BranchKind::Line {
                resistance,
                reactance,
                susceptance,
            } = &br.kind
            {
                let k = br.phases.len();
                check_square(&format!("{} resistance", what), resistance, k)
                    .map_err(GridError::Topology)?;
                check_square(&format!("{} reactance", what), reactance, k)
                    .map_err(GridError::Topology)?;
                if let Some(b) = susceptance {
                    check_square(&format!("{} susceptance", what), b, k)
                        .map_err(GridError::Topology)?;
                }
            }
            for &p in &br.phases {
                let (from, to) = match (index.of(f, p), index.of(t, p)) {
                    (Some(from), Some(to)) => (from, to),
                    _ => {
                        return Err(GridError::topology(format!(
                            "{} phase {} is missing on '{}' or '{}'",
                            what, p, br.from, br.to
                        )))
                    }
                };
                branch_phases.push(BranchPhase {
                    branch: b,
                    phase: p,
                    from,
                    to,
                });
            }
            primitives.push(branch_primitive(br, solver)?);
        }

        let (source, non_source) = check_islands(&def.nodes, &index, &branch_phases)?;
        let v0: Vec<Complex64> = source
            .iter()
            .map(|&i| {
                let np = index.entries()[i];
                np.phase.phasor(def.nodes[np.node].voltage)
            })
            .collect();

        let (y_bus, y_from, y_to) = make_ybus(n, &primitives, &branch_phases);

        let node_incidence = make_node_incidence(&index, def.nodes.len());
        let (branch_incidence_from, branch_incidence_to) =
            make_branch_incidence(&branch_phases, n);
        let delta_pairs = make_delta_pairs(&index, &node_phases);
        let delta_transformation = make_delta_transformation(&delta_pairs);

        names.clear();
        for ld in &def.loads {
            if !names.insert(ld.name.as_str()) {
                return Err(GridError::topology(format!("duplicate load '{}'", ld.name)));
            }
            check_phases(&format!("load '{}'", ld.name), &ld.phases).map_err(GridError::Topology)?;
        }
        let load_entries = LoadIncidence::build(
            &def.loads,
            &index,
            |name| node_numbers.get(name).copied(),
            &node_phases,
        )?;
        let (load_incidence_wye, load_incidence_delta) = load_entries.to_csr(n);

        // Y in cartesian form, restricted to the non-source node-phases.
        let zero = vec![Complex64::default(); n];
        let (d_dvr, d_dvi) = d_imis_dv(&y_bus, &zero, &Injection::zeros(n), &delta_pairs)?;
        let y_ll = cartesian_jac(&d_dvr, &d_dvi, &non_source)?;

        // no-load voltage: Y_LL * w = -Y_L0 * V0
        let mut no_load_voltage = vec![Complex64::default(); n];
        for (&i, &v) in source.iter().zip(&v0) {
            no_load_voltage[i] = v;
        }
        if !non_source.is_empty() {
            let y_l0 = y_bus.select(Some(&non_source), Some(&source))?;
            let rhs: Vec<Complex64> = (&y_l0 * &v0).iter().map(|i| -i).collect();
            let w = CartesianLu::factor(&y_ll, solver)
                .and_then(|lu| lu.solve(&rhs))
                .map_err(|e| GridError::topology(format!("admittance matrix is singular: {}", e)))?;
            for (&i, v) in non_source.iter().zip(w) {
                no_load_voltage[i] = v;
            }
        }

        let fingerprint = {
            let mut hasher = DefaultHasher::new();
            serde_json::to_string(&def)
                .map_err(|e| GridError::topology(e.to_string()))?
                .hash(&mut hasher);
            hasher.finish()
        };
        log::debug!(
            "grid '{}': {} nodes, {} node-phases, {} branch-phases, {} loads",
            def.name,
            def.nodes.len(),
            n,
            branch_phases.len(),
            def.loads.len()
        );

        Ok(GridModel {
            name: def.name.clone(),
            fingerprint,
            definition: def,
            node_numbers,
            index,
            branch_phases,
            source,
            non_source,
            no_load_voltage,
            y_bus,
            y_from,
            y_to,
            y_ll,
            node_incidence,
            branch_incidence_from,
            branch_incidence_to,
            delta_transformation,
            delta_pairs,
            load_incidence_wye,
            load_incidence_delta,
            load_entries,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hash of the grid definition, identifying the topology in caches.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn definition(&self) -> &GridDefinition {
        &self.definition
    }

    pub fn node_phase_count(&self) -> usize {
        self.index.len()
    }

    pub fn branch_phase_count(&self) -> usize {
        self.branch_phases.len()
    }

    pub fn load_count(&self) -> usize {
        self.definition.loads.len()
    }

    pub fn node_phases(&self) -> &NodePhaseIndex {
        &self.index
    }

    pub fn branch_phases(&self) -> &[BranchPhase] {
        &self.branch_phases
    }

    /// Node-phase index of `(node name, phase)`.
    pub fn node_phase(&self, name: &str, phase: Phase) -> Option<usize> {
        self.index.get(name, phase)
    }

    /// Branch-phase index of `(branch name, phase)`.
    pub fn branch_phase(&self, name: &str, phase: Phase) -> Option<usize> {
        let b = self
            .definition
            .branches
            .iter()
            .position(|br| br.name == name)?;
        self.branch_phases
            .iter()
            .position(|bp| bp.branch == b && bp.phase == phase)
    }

    pub fn node_number(&self, name: &str) -> Option<usize> {
        self.node_numbers.get(name).copied()
    }

    /// Label `node.phase` of a node-phase, for reports.
    pub fn node_phase_label(&self, i: usize) -> String {
        let np = self.index.entries()[i];
        format!("{}.{}", self.definition.nodes[np.node].name, np.phase)
    }

    /// Label `branch.phase` of a branch-phase, for reports.
    pub fn branch_phase_label(&self, i: usize) -> String {
        let bp = self.branch_phases[i];
        format!("{}.{}", self.definition.branches[bp.branch].name, bp.phase)
    }

    /// Source (fixed voltage) node-phases.
    pub fn source(&self) -> &[usize] {
        &self.source
    }

    /// Node-phases whose voltage is solved for.
    pub fn non_source(&self) -> &[usize] {
        &self.non_source
    }

    /// Voltage of the unloaded grid, `-inv(Y_LL) * Y_L0 * V0` with the
    /// source voltage in place.
    pub fn no_load_voltage(&self) -> &[Complex64] {
        &self.no_load_voltage
    }

    /// Nominal phase voltage of every node-phase (nominal magnitude at the
    /// nominal phase angle).
    pub fn nominal_voltage(&self) -> Vec<Complex64> {
        self.index
            .entries()
            .iter()
            .map(|np| np.phase.phasor(self.definition.nodes[np.node].voltage))
            .collect()
    }

    pub fn y_bus(&self) -> &CSR<usize, Complex64> {
        &self.y_bus
    }

    pub fn y_from(&self) -> &CSR<usize, Complex64> {
        &self.y_from
    }

    pub fn y_to(&self) -> &CSR<usize, Complex64> {
        &self.y_to
    }

    pub(crate) fn y_ll_cartesian(&self) -> &CSC<usize, f64> {
        &self.y_ll
    }

    pub fn node_incidence(&self) -> &CSR<usize, f64> {
        &self.node_incidence
    }

    pub fn branch_incidence_from(&self) -> &CSR<usize, f64> {
        &self.branch_incidence_from
    }

    pub fn branch_incidence_to(&self) -> &CSR<usize, f64> {
        &self.branch_incidence_to
    }

    pub fn delta_transformation(&self) -> &CSR<usize, f64> {
        &self.delta_transformation
    }

    pub fn delta_pairs(&self) -> &[Option<(usize, usize)>] {
        &self.delta_pairs
    }

    pub fn load_incidence_wye(&self) -> &CSR<usize, f64> {
        &self.load_incidence_wye
    }

    pub fn load_incidence_delta(&self) -> &CSR<usize, f64> {
        &self.load_incidence_delta
    }

    pub(crate) fn load_entries(&self) -> &LoadIncidence {
        &self.load_entries
    }

    /// Complex load demand after applying per-load scaling. An empty
    /// `scale` means nominal demand.
    pub fn load_power(&self, scale: &[f64]) -> GridResult<Vec<Complex64>> {
        let loads = &self.definition.loads;
        if !scale.is_empty() && scale.len() != loads.len() {
            return Err(GridError::Injection(format!(
                "expected {} load scaling factors, got {}",
                loads.len(),
                scale.len()
            )));
        }
        Ok(loads
            .iter()
            .enumerate()
            .map(|(j, ld)| {
                let k = scale.get(j).copied().unwrap_or(1.0);
                Complex64::new(ld.active_power * k, ld.reactive_power * k)
            })
            .collect())
    }
}

// Splits node-phases into source and non-source sets and checks that every
// node-phase is reached from exactly one source node.
fn check_islands(
    nodes: &[NodeData],
    index: &NodePhaseIndex,
    branch_phases: &[BranchPhase],
) -> GridResult<(Vec<usize>, Vec<usize>)> {
    let n = index.len();
    let mut graph = UnGraph::<(), ()>::with_capacity(n, branch_phases.len());
    for _ in 0..n {
        graph.add_node(());
    }
    for bp in branch_phases {
        graph.add_edge(NodeIndex::new(bp.from), NodeIndex::new(bp.to), ());
    }

    let mut owner: Vec<Option<usize>> = vec![None; n];
    for (s, nd) in nodes.iter().enumerate().filter(|(_, nd)| nd.source) {
        for start in index.of_node(s) {
            let mut bfs = Bfs::new(&graph, NodeIndex::new(start));
            while let Some(nx) = bfs.next(&graph) {
                let i = nx.index();
                match owner[i] {
                    Some(o) if o != s => {
                        return Err(GridError::topology(format!(
                            "source nodes '{}' and '{}' share an island",
                            nodes[o].name, nd.name
                        )))
                    }
                    _ => owner[i] = Some(s),
                }
            }
        }
    }

    if let Some(i) = owner.iter().position(|o| o.is_none()) {
        let np = index.entries()[i];
        return Err(GridError::topology(format!(
            "node '{}' phase {} is not connected to any source",
            nodes[np.node].name, np.phase
        )));
    }

    let is_source = |i: &usize| nodes[index.entries()[*i].node].source;
    let source = (0..n).filter(is_source).collect();
    let non_source = (0..n).filter(|i| !is_source(i)).collect();
    Ok((source, non_source))
}
