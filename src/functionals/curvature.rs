//! C6.4 — curvature-based design-field constraint.
//!
//! Per element, an 8-corner-node stencil is least-squares fit by a 20-term
//! tri-quadratic-plus-cross polynomial against the 8 nodal design values
//! and their 24 nodal gradient components (32 equations, 20 unknowns).
//! Gaussian and mean curvature of the fitted surface are extracted at the
//! element centroid and combined into an induced-exponential aggregate,
//! the same two-stage max-then-weighted-sum shape as the KS functional in
//! [`super::ks`].
//!
//! Sensitivity here is computed by central finite difference against
//! [`ReconConfig::fd_step`] rather than an analytic reverse-mode chain
//! through the cofactor/curvature formulas: that chain is a straightforward
//! but very long application of the product and quotient rules to
//! `kappa_max`/`kappa_min`, and the finite-difference path already backed
//! by `fd_step` (spec 4.7.3) gives the same caller-facing contract at a
//! fraction of the implementation risk. See DESIGN.md.

use nalgebra::{DMatrix, Point3};
use crate::collab::{Comm, Forest, NodalVector};
use crate::config::central_difference;
use crate::error::Result;
use crate::nodal_deriv::compute_node_deriv;
use crate::ReconConfig;

/// Exponent triples `(a, b, c)` for the 20-term basis `x^a y^b z^c`.
const TERMS: [(i32, i32, i32); 20] = [
    (0, 0, 0),
    (1, 0, 0),
    (0, 1, 0),
    (0, 0, 1),
    (2, 0, 0),
    (0, 2, 0),
    (0, 0, 2),
    (1, 1, 0),
    (0, 1, 1),
    (1, 0, 1),
    (2, 1, 0),
    (2, 0, 1),
    (1, 2, 0),
    (0, 2, 1),
    (1, 0, 2),
    (0, 1, 2),
    (1, 1, 1),
    (2, 2, 0),
    (0, 2, 2),
    (2, 0, 2),
];

fn powi_nonneg(x: f64, p: i32) -> f64 {
    if p == 0 {
        1.0
    } else {
        x.powi(p)
    }
}

fn monomial(term: (i32, i32, i32), x: f64, y: f64, z: f64) -> f64 {
    powi_nonneg(x, term.0) * powi_nonneg(y, term.1) * powi_nonneg(z, term.2)
}

fn monomial_d(term: (i32, i32, i32), axis: usize, x: f64, y: f64, z: f64) -> f64 {
    let (a, b, c) = term;
    match axis {
        0 => {
            if a == 0 {
                0.0
            } else {
                a as f64 * powi_nonneg(x, a - 1) * powi_nonneg(y, b) * powi_nonneg(z, c)
            }
        }
        1 => {
            if b == 0 {
                0.0
            } else {
                b as f64 * powi_nonneg(x, a) * powi_nonneg(y, b - 1) * powi_nonneg(z, c)
            }
        }
        _ => {
            if c == 0 {
                0.0
            } else {
                c as f64 * powi_nonneg(x, a) * powi_nonneg(y, b) * powi_nonneg(z, c - 1)
            }
        }
    }
}

fn monomial_dd(term: (i32, i32, i32), axis_i: usize, axis_j: usize, x: f64, y: f64, z: f64) -> f64 {
    let (a, b, c) = term;
    let mut exps = [a, b, c];
    let mut coeff = 1.0;
    for &axis in &[axis_i, axis_j] {
        if exps[axis] == 0 {
            return 0.0;
        }
        coeff *= exps[axis] as f64;
        exps[axis] -= 1;
    }
    coeff * powi_nonneg(x, exps[0]) * powi_nonneg(y, exps[1]) * powi_nonneg(z, exps[2])
}

struct PolyFit {
    coeffs: DMatrix<f64>,
}

impl PolyFit {
    fn value(&self, p: (f64, f64, f64)) -> f64 {
        TERMS.iter().enumerate().map(|(i, &t)| self.coeffs[(i, 0)] * monomial(t, p.0, p.1, p.2)).sum()
    }

    fn gradient(&self, p: (f64, f64, f64)) -> [f64; 3] {
        let mut g = [0.0; 3];
        for (i, &t) in TERMS.iter().enumerate() {
            for axis in 0..3 {
                g[axis] += self.coeffs[(i, 0)] * monomial_d(t, axis, p.0, p.1, p.2);
            }
        }
        g
    }

    fn hessian(&self, p: (f64, f64, f64)) -> nalgebra::Matrix3<f64> {
        let mut h = nalgebra::Matrix3::<f64>::zeros();
        for (i, &t) in TERMS.iter().enumerate() {
            for axis_i in 0..3 {
                for axis_j in 0..3 {
                    h[(axis_i, axis_j)] += self.coeffs[(i, 0)] * monomial_dd(t, axis_i, axis_j, p.0, p.1, p.2);
                }
            }
        }
        h
    }
}

/// Fits the 20-term basis against 8 corner values + 24 corner gradient
/// components, all expressed relative to the element centroid so the
/// polynomial coefficients stay well-scaled.
fn fit_patch(centroid: Point3<f64>, corner_pts: &[Point3<f64>; 8], corner_vals: &[f64; 8], corner_grads: &[[f64; 3]; 8]) -> PolyFit {
    let mut a = DMatrix::<f64>::zeros(32, 20);
    let mut b = DMatrix::<f64>::zeros(32, 1);

    for (i, &p) in corner_pts.iter().enumerate() {
        let rel = (p.x - centroid.x, p.y - centroid.y, p.z - centroid.z);
        for (j, &t) in TERMS.iter().enumerate() {
            a[(i, j)] = monomial(t, rel.0, rel.1, rel.2);
        }
        b[(i, 0)] = corner_vals[i];

        for axis in 0..3 {
            let row = 8 + i * 3 + axis;
            for (j, &t) in TERMS.iter().enumerate() {
                a[(row, j)] = monomial_d(t, axis, rel.0, rel.1, rel.2);
            }
            b[(row, 0)] = corner_grads[i][axis];
        }
    }

    let svd = a.svd(true, true);
    let max_sv = svd.singular_values.iter().cloned().fold(0.0_f64, f64::max);
    let tol = f64::EPSILON * 32.0 * max_sv;
    let coeffs = svd.solve(&b, tol).unwrap_or_else(|_| DMatrix::zeros(20, 1));
    PolyFit { coeffs }
}

/// Gaussian curvature `kappa_G`, mean curvature `kappa_M`, and the
/// principal curvatures derived from them.
pub fn curvature_descriptors(g: [f64; 3], h: nalgebra::Matrix3<f64>) -> (f64, f64, f64, f64) {
    let gv = nalgebra::Vector3::new(g[0], g[1], g[2]);
    let gnorm2 = gv.dot(&gv);
    let gnorm = gnorm2.sqrt();

    // cofactor matrix of a symmetric 3x3 (= adjugate, since symmetric).
    let cof = nalgebra::Matrix3::new(
        h[(1, 1)] * h[(2, 2)] - h[(1, 2)] * h[(2, 1)],
        -(h[(1, 0)] * h[(2, 2)] - h[(1, 2)] * h[(2, 0)]),
        h[(1, 0)] * h[(2, 1)] - h[(1, 1)] * h[(2, 0)],
        -(h[(0, 1)] * h[(2, 2)] - h[(0, 2)] * h[(2, 1)]),
        h[(0, 0)] * h[(2, 2)] - h[(0, 2)] * h[(2, 0)],
        -(h[(0, 0)] * h[(2, 1)] - h[(0, 1)] * h[(2, 0)]),
        h[(0, 1)] * h[(1, 2)] - h[(0, 2)] * h[(1, 1)],
        -(h[(0, 0)] * h[(1, 2)] - h[(0, 2)] * h[(1, 0)]),
        h[(0, 0)] * h[(1, 1)] - h[(0, 1)] * h[(1, 0)],
    );

    let kappa_g = (gv.transpose() * cof * gv)[(0, 0)] / gnorm2.powi(2);
    let kappa_m = 0.5 * ((gv.transpose() * h * gv)[(0, 0)] - gnorm2 * h.trace()) / gnorm.powi(3);

    let disc = (kappa_m * kappa_m - kappa_g).max(0.0).sqrt();
    let kappa_max = kappa_m.abs() + disc;
    let kappa_min = kappa_m.abs() - disc;
    (kappa_g, kappa_m, kappa_max, kappa_min)
}

fn indicator(x: f64) -> f64 {
    1.0 - 16.0 * (x - 0.5).powi(4)
}

fn per_element_cost(k: f64, x_centroid: f64, kappa_max: f64, kappa_min: f64) -> f64 {
    indicator(x_centroid) * (kappa_max + (1.0 + (k * (kappa_min - kappa_max)).exp()).ln() / k)
}

fn corner_indices_3d(order: usize) -> [usize; 8] {
    let lo = 0;
    let hi = order - 1;
    let idx = |i: usize, j: usize, l: usize| i + j * order + l * order * order;
    [
        idx(lo, lo, lo),
        idx(hi, lo, lo),
        idx(lo, hi, lo),
        idx(hi, hi, lo),
        idx(lo, lo, hi),
        idx(hi, lo, hi),
        idx(lo, hi, hi),
        idx(hi, hi, hi),
    ]
}

/// Fits the per-element polynomial patch and returns `(x_centroid,
/// kappa_g, kappa_m, kappa_max, kappa_min)` at the element centroid.
/// Exposed beyond this module so callers (and tests) can inspect the raw
/// curvature descriptors rather than only the aggregated cost.
pub fn element_curvature_descriptors(
    forest: &dyn Forest,
    x: &NodalVector,
    dx: &NodalVector,
    elem: usize,
) -> (f64, f64, f64, f64, f64) {
    let order = forest.order();
    let corners = corner_indices_3d(order);
    let nodes = forest.element_nodes(elem);
    let pts = forest.element_points(elem);

    let mut corner_pts = [Point3::origin(); 8];
    let mut corner_vals = [0.0; 8];
    let mut corner_grads = [[0.0; 3]; 8];
    let mut centroid = Point3::origin();
    for (slot, &ci) in corners.iter().enumerate() {
        corner_pts[slot] = pts[ci];
        corner_vals[slot] = x.get_values(&[nodes[ci]])[0];
        let g = dx.get_values(&[nodes[ci]]);
        corner_grads[slot] = [g[0], g[1], g[2]];
        centroid.coords += pts[ci].coords;
    }
    centroid.coords /= 8.0;

    let fit = fit_patch(centroid, &corner_pts, &corner_vals, &corner_grads);
    let g = fit.gradient((0.0, 0.0, 0.0));
    let h = fit.hessian((0.0, 0.0, 0.0));
    let (kg, km, kappa_max, kappa_min) = curvature_descriptors(g, h);
    let x_centroid = fit.value((0.0, 0.0, 0.0));
    (x_centroid, kg, km, kappa_max, kappa_min)
}

fn element_cost(forest: &dyn Forest, x: &NodalVector, dx: &NodalVector, k: f64, elem: usize) -> f64 {
    let (x_centroid, _kg, _km, kappa_max, kappa_min) =
        element_curvature_descriptors(forest, x, dx, elem);
    per_element_cost(k, x_centroid, kappa_max, kappa_min)
}

/// Induced-exponential curvature aggregate over a design field `x`.
pub fn curvature_aggregate(forest: &dyn Forest, comm: &dyn Comm, x: &NodalVector, config: &ReconConfig) -> Result<f64> {
    let k = config.ks_weight()?;
    let dx = compute_node_deriv(forest, x, comm);

    let mut costs = vec![0.0; forest.num_elements()];
    for e in 0..forest.num_elements() {
        costs[e] = element_cost(forest, x, &dx, k, e);
    }
    let local_max = costs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let r_max = comm.allreduce_max(local_max);

    let mut num_local = 0.0;
    let mut den_local = 0.0;
    for &r in &costs {
        let w = (k * (r - r_max)).exp();
        num_local += r * w;
        den_local += w;
    }
    let num = comm.allreduce_sum(num_local);
    let den = comm.allreduce_sum(den_local);
    Ok(num / den)
}

/// Finite-difference sensitivity of the aggregate with respect to one
/// nodal design value, holding every other nodal value fixed.
pub fn curvature_sensitivity_fd(forest: &dyn Forest, comm: &dyn Comm, x: &NodalVector, node: crate::collab::NodeId, config: &ReconConfig) -> Result<f64> {
    let base = x.get_values(&[node])[0];
    let step = config.fd_step;
    let eval_at = |v: f64| -> f64 {
        let mut perturbed = x.clone();
        perturbed.insert_nonzero_values(&[node], &[v]);
        curvature_aggregate(forest, comm, &perturbed, config).unwrap_or(f64::NAN)
    };
    Ok(central_difference(eval_at, base, step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{DependentNodeTable, SerialComm};
    use crate::grid_forest::GridForest;
    use approx::assert_relative_eq;

    /// For a radial field `x(p) = c*(r0 - r)` with `r = |p|`, the fitted
    /// level-set curvature at radius `r` is exactly `kappa_max = kappa_min
    /// = 1/r`, independent of `c` and `r0` — a sphere of radius `r` has
    /// principal curvatures `1/r` everywhere. At `r=1` that is exactly 1,
    /// so this pins `curvature_descriptors` down analytically before
    /// trusting it against a discretized field.
    #[test]
    fn curvature_descriptors_match_analytic_unit_sphere_value() {
        let g = [-0.5, 0.0, 0.0];
        let h = nalgebra::Matrix3::new(
            0.0, 0.0, 0.0,
            0.0, -0.5, 0.0,
            0.0, 0.0, -0.5,
        );
        let (_kg, _km, kappa_max, kappa_min) = curvature_descriptors(g, h);
        assert_relative_eq!(kappa_max, 1.0, epsilon = 1e-10);
        assert_relative_eq!(kappa_min, 1.0, epsilon = 1e-10);
    }

    /// S7 — curvature on a synthetic sphere. A single small element
    /// centered exactly on the unit-radius shell, sampling the radial
    /// field `x = 0.5*(1 - r)`, should read `kappa_max`/`kappa_min` close
    /// to 1 once fit through the patch polynomial.
    #[test]
    fn sphere_design_field_gives_curvature_near_unity_at_transition_band() {
        let forest = GridForest::new(2, 1, Point3::new(0.9, -0.1, -0.1), Point3::new(0.2, 0.2, 0.2));
        let ids = forest.independent_node_ids();
        let mut x = NodalVector::new(&ids, 1, DependentNodeTable::new());
        for e in 0..forest.num_elements() {
            let nodes = forest.element_nodes(e);
            let pts = forest.element_points(e);
            for (n, p) in nodes.iter().zip(pts) {
                let r = (p.x * p.x + p.y * p.y + p.z * p.z).sqrt();
                x.insert_nonzero_values(std::slice::from_ref(n), &[0.5 * (1.0 - r)]);
            }
        }

        let config = ReconConfig::default().with_ks_weight(20.0);
        let value = curvature_aggregate(&forest, &SerialComm, &x, &config).unwrap();
        assert!(value.is_finite());

        let dx = compute_node_deriv(&forest, &x, &SerialComm);
        let (_xc, _kg, _km, kappa_max, kappa_min) =
            element_curvature_descriptors(&forest, &x, &dx, 0);
        assert_relative_eq!(kappa_max, 1.0, epsilon = 0.15);
        assert_relative_eq!(kappa_min, 1.0, epsilon = 0.15);
    }

    #[test]
    fn indicator_vanishes_away_from_transition_band() {
        assert_relative_eq!(indicator(0.5), 1.0, epsilon = 1e-12);
        assert!(indicator(0.0) < 0.0);
        assert!(indicator(1.0) < 0.0);
    }
}
