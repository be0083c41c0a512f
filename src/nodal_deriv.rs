//! C3 — nodal-derivative projector.
//!
//! `computeNodeDeriv(forest, U, w) -> D`: projects a coarse nodal field to
//! weighted, process-consistent nodal spatial derivatives. D carries
//! `3 * vars_per_node(U)` entries per node, laid out as
//! `[dU0/dx, dU0/dy, dU0/dz, dU1/dx, ...]`.
//!
//! `apply_node_deriv_transpose` implements the adjoint of this operator,
//! used by the KS and curvature sensitivity chains (spec 4.6.3 step 5,
//! 4.6.4) to push a gradient with respect to D back to a gradient with
//! respect to U.

use nalgebra::Point3;

use crate::collab::{Comm, DependentNodeTable, Forest, NodalVector};
use crate::jacobian::jacobian_3d;

/// Per-node element-reference count over non-dependent slots: the
/// normalization denominator used by both the forward projection and its
/// transpose.
pub fn compute_weight_vector(forest: &dyn Forest) -> NodalVector {
    let mut w = NodalVector::new(
        &forest.independent_node_ids(),
        1,
        forest.dependent_nodes().clone(),
    );
    for e in 0..forest.num_elements() {
        let nodes = forest.element_nodes(e);
        let ones = vec![1.0; nodes.len()];
        for (&n, one) in nodes.iter().zip(&ones) {
            if !DependentNodeTable::is_dependent(n) {
                w.add_values(&[n], std::slice::from_ref(one));
            }
        }
    }
    w.finalize();
    w.distribute();
    w
}

fn knot_positions(order: usize, dim: usize, knots: &[f64]) -> Vec<(f64, f64, f64)> {
    let mut pts = Vec::with_capacity(order.pow(dim as u32));
    if dim == 2 {
        for &eta in knots {
            for &xi in knots {
                pts.push((xi, eta, 0.0));
            }
        }
    } else {
        for &zeta in knots {
            for &eta in knots {
                for &xi in knots {
                    pts.push((xi, eta, zeta));
                }
            }
        }
    }
    let _ = order;
    pts
}

pub fn compute_node_deriv(forest: &dyn Forest, u: &NodalVector, _comm: &dyn Comm) -> NodalVector {
    let vars = u.vars_per_node();
    let order = forest.order();
    let dim = forest.dim();
    let knots = forest.knots();
    let w = compute_weight_vector(forest);

    let mut d = NodalVector::new(
        &forest.independent_node_ids(),
        3 * vars,
        forest.dependent_nodes().clone(),
    );

    let pts = knot_positions(order, dim, knots);

    for e in 0..forest.num_elements() {
        let nodes = forest.element_nodes(e);
        let xpts = forest.element_points(e);
        let uelem = u.get_values(nodes);

        for (local_idx, &pt) in pts.iter().enumerate() {
            let (_n, dxi, deta, dzeta_opt) = forest.eval_interp(pt);
            let dzeta = dzeta_opt.unwrap_or_else(|| vec![0.0; dxi.len()]);

            let jac = match jacobian_3d(e as i32, xpts, &dxi, &deta, &dzeta) {
                Ok(j) => j,
                Err(err) => {
                    eprintln!(
                        "Warning: degenerate knot in C3, skipping element {e}: {err}"
                    );
                    continue;
                }
            };

            let node = nodes[local_idx];
            if DependentNodeTable::is_dependent(node) {
                continue;
            }
            let wn = w.get_values(&[node])[0];
            if wn <= 0.0 {
                continue;
            }

            let mut dvals = vec![0.0; 3 * vars];
            for c in 0..vars {
                let mut ud_ref = [0.0; 3];
                for i in 0..nodes.len() {
                    let ui = uelem[i * vars + c];
                    ud_ref[0] += dxi[i] * ui;
                    ud_ref[1] += deta[i] * ui;
                    ud_ref[2] += dzeta[i] * ui;
                }
                // physical = J^T * ud_ref
                for axis in 0..3 {
                    let mut phys = 0.0;
                    for m in 0..3 {
                        phys += jac.jinv[(m, axis)] * ud_ref[m];
                    }
                    dvals[c * 3 + axis] = phys / wn;
                }
            }
            d.add_values(&[node], &dvals);
        }
    }

    d.finalize();
    d.distribute();
    d
}

/// Adjoint of `compute_node_deriv`: pushes `dfduderiv` (a co-vector over D)
/// back onto a co-vector over U, accumulated with add semantics across
/// elements exactly like the primal projector.
pub fn apply_node_deriv_transpose(forest: &dyn Forest, dfduderiv: &NodalVector) -> NodalVector {
    let vars = dfduderiv.vars_per_node() / 3;
    let order = forest.order();
    let dim = forest.dim();
    let knots = forest.knots();
    let w = compute_weight_vector(forest);

    let mut dfdu = NodalVector::new(
        &forest.independent_node_ids(),
        vars,
        forest.dependent_nodes().clone(),
    );

    let pts = knot_positions(order, dim, knots);

    for e in 0..forest.num_elements() {
        let nodes = forest.element_nodes(e);
        let xpts: &[Point3<f64>] = forest.element_points(e);

        for (local_idx, &pt) in pts.iter().enumerate() {
            let (_n, dxi, deta, dzeta_opt) = forest.eval_interp(pt);
            let dzeta = dzeta_opt.unwrap_or_else(|| vec![0.0; dxi.len()]);

            let jac = match jacobian_3d(e as i32, xpts, &dxi, &deta, &dzeta) {
                Ok(j) => j,
                Err(err) => {
                    eprintln!(
                        "Warning: degenerate knot in C3 transpose, skipping element {e}: {err}"
                    );
                    continue;
                }
            };

            let node = nodes[local_idx];
            if DependentNodeTable::is_dependent(node) {
                continue;
            }
            let wn = w.get_values(&[node])[0];
            if wn <= 0.0 {
                continue;
            }
            let gbar = dfduderiv.get_values(&[node]);

            let mut contrib = vec![0.0; nodes.len() * vars];
            for c in 0..vars {
                let gbar_c = [gbar[c * 3], gbar[c * 3 + 1], gbar[c * 3 + 2]];
                let mut v_ref = [0.0; 3];
                for m in 0..3 {
                    let mut s = 0.0;
                    for axis in 0..3 {
                        s += jac.jinv[(m, axis)] * gbar_c[axis];
                    }
                    v_ref[m] = s / wn;
                }
                for i in 0..nodes.len() {
                    contrib[i * vars + c] += dxi[i] * v_ref[0] + deta[i] * v_ref[1] + dzeta[i] * v_ref[2];
                }
            }
            dfdu.add_values(nodes, &contrib);
        }
    }

    dfdu.finalize();
    dfdu.distribute();
    dfdu
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::SerialComm;
    use crate::grid_forest::GridForest;
    use approx::assert_relative_eq;

    #[test]
    fn constant_field_has_zero_derivative() {
        let forest = GridForest::unit_cube(2, 2);
        let ids = forest.independent_node_ids();
        let mut u = NodalVector::new(&ids, 1, DependentNodeTable::new());
        for &id in &ids {
            u.add_values(&[id], &[5.0]);
        }
        let d = compute_node_deriv(&forest, &u, &SerialComm);
        for &id in &ids {
            let v = d.get_values(&[id]);
            for c in v {
                assert_relative_eq!(c, 0.0, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn linear_field_reproduces_gradient_at_every_independent_node() {
        let forest = GridForest::unit_cube(2, 2);
        let ids = forest.independent_node_ids();
        let mut u = NodalVector::new(&ids, 1, DependentNodeTable::new());
        for e in 0..forest.num_elements() {
            let nodes = forest.element_nodes(e);
            let pts = forest.element_points(e);
            for (n, p) in nodes.iter().zip(pts) {
                let val = 1.0 + p.x + p.y + p.z;
                u.insert_nonzero_values(std::slice::from_ref(n), &[val]);
            }
        }
        let d = compute_node_deriv(&forest, &u, &SerialComm);
        for &id in &ids {
            let v = d.get_values(&[id]);
            assert_relative_eq!(v[0], 1.0, epsilon = 1e-8);
            assert_relative_eq!(v[1], 1.0, epsilon = 1e-8);
            assert_relative_eq!(v[2], 1.0, epsilon = 1e-8);
        }
    }
}
