//! Crate-level error type.
//!
//! Numerical failures inside a single element (degenerate geometry, a
//! rank-deficient patch system) are local and repaired in place per the
//! propagation policy: the owning loop logs them and treats the element's
//! contribution as zero. They are modeled here as `Result` only so the
//! per-quadrature-point helper has a normal way to signal "skip this point"
//! to its caller; none of these variants are meant to escape a functional's
//! public entry point.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReconError>;

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("degenerate geometry in element {element}: det(J) = {det_j} at a quadrature point")]
    DegenerateGeometry { element: i32, det_j: f64 },

    #[error(
        "rank-deficient patch reconstruction in element {element}: effective rank {rank} of {unknowns} enrichment unknowns (tolerance {tolerance})"
    )]
    RankDeficient {
        element: i32,
        rank: usize,
        unknowns: usize,
        tolerance: f64,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required collaborator was missing. Rust's borrow checker makes a
    /// null forest or constitutive model unrepresentable through the
    /// `&dyn Trait` references this crate takes, so nothing in this crate
    /// constructs this variant; it exists so the error type still documents
    /// the one fatal condition the original contract names.
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),
}
