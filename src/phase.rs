use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Conductor phase of a node or branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    A,
    B,
    C,
}

impl Phase {
    /// Nominal angle of the phase voltage in degrees.
    pub fn angle(&self) -> f64 {
        match self {
            Phase::A => 0.0,
            Phase::B => -120.0,
            Phase::C => 120.0,
        }
    }

    /// Nominal phase voltage with the given line-to-ground magnitude.
    pub fn phasor(&self, magnitude: f64) -> Complex64 {
        Complex64::from_polar(magnitude, self.angle().to_radians())
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::A => "a",
            Phase::B => "b",
            Phase::C => "c",
        };
        f.write_str(s)
    }
}

/// Returns the phase whose delta-pair row carries the line-to-line
/// quantity between `p` and `q` on a node with `node_phases`.
///
/// On a three-phase node the pairs are AB, BC and CA, indexed by their first
/// phase. On a two-phase node the single pair sits on the first phase.
/// Single-phase nodes have no pair.
pub fn delta_row(node_phases: &[Phase], p: Phase, q: Phase) -> Option<Phase> {
    if p == q || !node_phases.contains(&p) || !node_phases.contains(&q) {
        return None;
    }
    let (lo, hi) = if p < q { (p, q) } else { (q, p) };
    match node_phases.len() {
        3 => match (lo, hi) {
            (Phase::A, Phase::B) => Some(Phase::A),
            (Phase::B, Phase::C) => Some(Phase::B),
            (Phase::A, Phase::C) => Some(Phase::C),
            _ => None,
        },
        2 => Some(lo),
        _ => None,
    }
}

/// The pair `(p, q)` whose line-to-line voltage `Vp - Vq` forms the delta
/// row of phase `row` on a node with `node_phases`.
pub fn delta_pair(node_phases: &[Phase], row: Phase) -> Option<(Phase, Phase)> {
    match node_phases.len() {
        3 => Some(match row {
            Phase::A => (Phase::A, Phase::B),
            Phase::B => (Phase::B, Phase::C),
            Phase::C => (Phase::C, Phase::A),
        }),
        2 if node_phases[0] == row => Some((node_phases[0], node_phases[1])),
        _ => None,
    }
}
