//! Patch-wise least-squares reconstruction and goal-oriented error
//! estimation for octree/quadtree finite-element forests.
//!
//! The crate is organized leaf-first: [`lagrange`] and [`enrichment`]
//! (interpolation and enrichment bases), [`jacobian`] (geometric mapping),
//! [`nodal_deriv`] (nodal-derivative projection), [`patch_recon`] (the
//! per-element least-squares solve), [`refined_field`] (stitching the
//! reconstruction onto a refined mesh), and [`functionals`] (the four
//! goal-oriented consumers built on top of all of the above). [`collab`]
//! declares the external collaborator traits every component above borrows
//! through, and [`grid_forest`] is a structured-mesh `Forest` used to
//! exercise and test the crate end to end.

pub mod collab;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod functionals;
pub mod gauss;
pub mod grid_forest;
pub mod jacobian;
pub mod knots;
pub mod lagrange;
pub mod nodal_deriv;
pub mod patch_recon;
pub mod refined_field;

pub use collab::{Comm, DependentNodeTable, ElementCollaborator, Forest, NodalVector, NodeId, SerialComm};
pub use config::ReconConfig;
pub use error::{ReconError, Result};
