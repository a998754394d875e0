mod cache;
mod d_imis_dv;
mod error;
mod fixed_point;
mod flows;
mod incidence;
mod index;
mod linear;
mod model;
mod newton;
mod options;
mod phase;
mod sbus;
mod topology;
mod traits;
mod ybus;

pub mod batch;
pub mod debug;
pub mod dense;
mod jac;
pub mod math;

pub use cache::*;
pub use d_imis_dv::*;
pub use error::*;
pub use fixed_point::*;
pub use flows::*;
pub use incidence::*;
pub use index::*;
pub use jac::*;
pub use linear::*;
pub use model::*;
pub use newton::*;
pub use options::*;
pub use phase::*;
pub use sbus::*;
pub use topology::*;
pub use traits::*;
pub use ybus::*;

#[cfg(test)]
mod tests;
