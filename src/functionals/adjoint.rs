//! C6.2 — adjoint-weighted residual error estimator.
//!
//! `addLocalizedError` deposits a nodal-distributed error contribution per
//! element; the global correction is the raw sum of every deposited value,
//! while the per-element indicator only looks at the element's corner
//! nodes (the outermost ones on the refined mesh), matching the source's
//! "sum at corners, times 1/4 or 1/8" recipe.

use crate::collab::{Comm, ElementCollaborator, Forest, NodalVector};

/// Local indices, within one refined element's node list, of the corners:
/// every per-axis local index is either `0` or `order - 1`.
fn corner_indices(order: usize, dim: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let axis_vals: Vec<usize> = vec![0, order - 1];
    if dim == 2 {
        for &j in &axis_vals {
            for &i in &axis_vals {
                out.push(i + j * order);
            }
        }
    } else {
        for &k in &axis_vals {
            for &j in &axis_vals {
                for &i in &axis_vals {
                    out.push(i + j * order + k * order * order);
                }
            }
        }
    }
    out
}

/// `adjoint_error_estimate(forest_refined, Uref, psi_refined) -> (total_error, correction)`.
pub fn adjoint_error_estimate(
    forest_refined: &dyn Forest,
    comm: &dyn Comm,
    uref: &NodalVector,
    psi_refined: &NodalVector,
    elem_collab: &dyn ElementCollaborator,
) -> (f64, f64) {
    let vars = elem_collab.vars_per_node();
    let dim = forest_refined.dim();
    let order = forest_refined.order();
    let corners = corner_indices(order, dim);
    let corner_weight = if dim == 2 { 0.25 } else { 0.125 };

    let mut err = NodalVector::new(
        &forest_refined.independent_node_ids(),
        vars,
        forest_refined.dependent_nodes().clone(),
    );

    let mut local_correction = 0.0;
    for e in 0..forest_refined.num_elements() {
        let nodes = forest_refined.element_nodes(e);
        let xpts = forest_refined.element_points(e);
        let psi_elem = psi_refined.get_values(nodes);
        let uref_elem = uref.get_values(nodes);

        let mut errbuf = vec![0.0; nodes.len() * vars];
        elem_collab.add_localized_error(e, &mut errbuf, &psi_elem, xpts, &uref_elem);
        local_correction += errbuf.iter().sum::<f64>();
        err.add_values(nodes, &errbuf);
    }
    err.finalize();
    err.distribute();
    let correction = comm.allreduce_sum(local_correction);

    let mut local_total = 0.0;
    for e in 0..forest_refined.num_elements() {
        let nodes = forest_refined.element_nodes(e);
        let mut elem_sum = 0.0;
        for &ci in &corners {
            elem_sum += err.get_values(&[nodes[ci]]).iter().sum::<f64>();
        }
        local_total += elem_sum.abs() * corner_weight;
    }
    let total_error = comm.allreduce_sum(local_total);

    (total_error, correction)
}
