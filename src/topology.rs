use crate::phase::Phase;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Physical description of a distribution grid.
///
/// This is the materialized form of whatever data source the scenario comes
/// from; `GridModel::build` turns it into the algebraic model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridDefinition {
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<NodeData>,
    #[serde(default)]
    pub branches: Vec<BranchData>,
    #[serde(default)]
    pub loads: Vec<LoadData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub name: String,
    pub phases: Vec<Phase>,
    /// Nominal line-to-ground voltage magnitude.
    pub voltage: f64,
    /// Source (slack) node with fixed voltage.
    #[serde(default)]
    pub source: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchData {
    pub name: String,
    pub from: String,
    pub to: String,
    pub phases: Vec<Phase>,
    #[serde(flatten)]
    pub kind: BranchKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BranchKind {
    /// Multi-conductor line section. Matrices are k x k for k phases,
    /// row-major, in the order of the branch phase list.
    Line {
        resistance: Vec<Vec<f64>>,
        reactance: Vec<Vec<f64>>,
        /// Total shunt susceptance, split equally between both ends.
        #[serde(default)]
        susceptance: Option<Vec<Vec<f64>>>,
    },
    /// Grounded wye-wye transformer bank with identical per-phase series
    /// impedance (referred to the to side) and off-nominal ratio on the
    /// from side.
    Transformer {
        resistance: f64,
        reactance: f64,
        #[serde(default = "default_tap")]
        tap: f64,
    },
}

fn default_tap() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connection {
    Wye,
    Delta,
}

/// Flexible or fixed load. Power is nominal demand (positive = consumption)
/// summed over all phases; generators use negative demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadData {
    pub name: String,
    pub node: String,
    pub phases: Vec<Phase>,
    pub connection: Connection,
    pub active_power: f64,
    #[serde(default)]
    pub reactive_power: f64,
}

impl NodeData {
    pub fn new(name: &str, phases: &[Phase], voltage: f64) -> Self {
        Self {
            name: name.to_string(),
            phases: phases.to_vec(),
            voltage,
            source: false,
        }
    }

    pub fn source(name: &str, phases: &[Phase], voltage: f64) -> Self {
        Self {
            source: true,
            ..Self::new(name, phases, voltage)
        }
    }
}

impl BranchData {
    /// Single- or multi-phase line with uncoupled, identical phase impedance.
    pub fn line(name: &str, from: &str, to: &str, phases: &[Phase], r: f64, x: f64) -> Self {
        let k = phases.len();
        let diag = |v: f64| -> Vec<Vec<f64>> {
            (0..k)
                .map(|i| (0..k).map(|j| if i == j { v } else { 0.0 }).collect())
                .collect()
        };
        Self {
            name: name.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            phases: phases.to_vec(),
            kind: BranchKind::Line {
                resistance: diag(r),
                reactance: diag(x),
                susceptance: None,
            },
        }
    }

    pub fn transformer(
        name: &str,
        from: &str,
        to: &str,
        phases: &[Phase],
        r: f64,
        x: f64,
        tap: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            phases: phases.to_vec(),
            kind: BranchKind::Transformer {
                resistance: r,
                reactance: x,
                tap,
            },
        }
    }
}

impl LoadData {
    pub fn new(name: &str, node: &str, phases: &[Phase], connection: Connection, p: f64, q: f64) -> Self {
        Self {
            name: name.to_string(),
            node: node.to_string(),
            phases: phases.to_vec(),
            connection,
            active_power: p,
            reactive_power: q,
        }
    }
}

/// Checks that a phase list is non-empty and free of duplicates.
pub(crate) fn check_phases(what: &str, phases: &[Phase]) -> Result<(), String> {
    if phases.is_empty() {
        return Err(format!("{} has no phases", what));
    }
    let unique: HashSet<&Phase> = phases.iter().collect();
    if unique.len() != phases.len() {
        return Err(format!("{} lists a phase more than once", what));
    }
    Ok(())
}

/// Checks that a row-major matrix is `k x k`.
pub(crate) fn check_square(what: &str, m: &[Vec<f64>], k: usize) -> Result<(), String> {
    if m.len() != k || m.iter().any(|row| row.len() != k) {
        return Err(format!(
            "{} must be a {} x {} matrix to match its phases",
            what, k, k
        ));
    }
    Ok(())
}
