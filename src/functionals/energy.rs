//! C6.1 — strain-energy error estimator.
//!
//! Reconstructs the refined field and asks the element collaborator for
//! potential energy; `|Pe|` is the per-element indicator, summed globally.


use crate::collab::{Comm, ElementCollaborator, Forest, NodalVector};
use crate::error::Result;
use crate::refined_field::add_refined_solution;
use crate::ReconConfig;

/// `strain_energy_error(forest, forest_refined, U) -> (total, per_element)`.
pub fn strain_energy_error(
    forest: &dyn Forest,
    forest_refined: &dyn Forest,
    comm: &dyn Comm,
    u: &NodalVector,
    elem_collab: &dyn ElementCollaborator,
    config: &ReconConfig,
) -> Result<(f64, Vec<f64>)> {
    let vars = elem_collab.vars_per_node();
    let uref = add_refined_solution(forest, forest_refined, comm, u, None, vars, false, config)?;

    let mut per_element = vec![0.0; forest.num_elements()];
    for e in 0..forest.num_elements() {
        let nodes = forest_refined.element_nodes(e);
        let xpts = forest_refined.element_points(e);
        let vals = uref.get_values(nodes);
        let (te, pe) = elem_collab.compute_energies(e, xpts, &vals);
        let _ = te;
        if !pe.is_finite() {
            eprintln!("Warning: non-finite potential energy at element {e}, treating as zero");
            continue;
        }
        per_element[e] = pe.abs();
    }

    let local_total: f64 = per_element.iter().sum();
    let total = comm.allreduce_sum(local_total);
    Ok((total, per_element))
}
