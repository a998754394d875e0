use crate::phase::Phase;
use std::collections::HashMap;

/// One phase of one node. Its position in `NodePhaseIndex::entries` is the
/// row/column used by every node-phase indexed matrix and vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePhase {
    pub node: usize,
    pub phase: Phase,
}

/// One phase of one branch, with the node-phase indices of both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchPhase {
    pub branch: usize,
    pub phase: Phase,
    pub from: usize,
    pub to: usize,
}

/// Arena of node-phases with a `(node name, phase)` lookup table.
#[derive(Debug, Clone, Default)]
pub struct NodePhaseIndex {
    entries: Vec<NodePhase>,
    lookup: HashMap<(String, Phase), usize>,
    // first node-phase of each node
    offsets: Vec<usize>,
}

impl NodePhaseIndex {
    /// Enumerates node-phases node by node, phases in the given order.
    pub fn new<'a>(nodes: impl Iterator<Item = (&'a str, &'a [Phase])>) -> Self {
        let mut index = NodePhaseIndex::default();
        for (n, (name, phases)) in nodes.enumerate() {
            index.offsets.push(index.entries.len());
            for &phase in phases {
                index
                    .lookup
                    .insert((name.to_string(), phase), index.entries.len());
                index.entries.push(NodePhase { node: n, phase });
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[NodePhase] {
        &self.entries
    }

    pub fn get(&self, name: &str, phase: Phase) -> Option<usize> {
        self.lookup.get(&(name.to_string(), phase)).copied()
    }

    /// Node-phase index of `phase` on node number `node`.
    pub fn of(&self, node: usize, phase: Phase) -> Option<usize> {
        let start = *self.offsets.get(node)?;
        let end = self
            .offsets
            .get(node + 1)
            .copied()
            .unwrap_or(self.entries.len());
        (start..end).find(|&i| self.entries[i].phase == phase)
    }

    /// All node-phase indices of node number `node`.
    pub fn of_node(&self, node: usize) -> std::ops::Range<usize> {
        let start = self.offsets[node];
        let end = self
            .offsets
            .get(node + 1)
            .copied()
            .unwrap_or(self.entries.len());
        start..end
    }
}
