//! C4 — patch reconstruction.
//!
//! `compute_elem_recon(Xpts, Uelem, Delem) -> ubar`: solves the per-element
//! weighted least-squares system for the enrichment coefficients that best
//! reproduce the prescribed nodal derivatives `Delem` (as produced by C3)
//! on top of the coarse interpolant of `Uelem`.
//!
//! The knot positions used to build the system coincide exactly with the
//! element's coarse nodal positions, so the row at knot index `i` reads its
//! prescribed derivative directly from `Delem[i]` without reinterpolation.

use nalgebra::{DMatrix, Point3};

use crate::enrichment::{enrichment_count, eval_enrichment};
use crate::error::{ReconError, Result};
use crate::jacobian::{jacobian_2d_shell, jacobian_3d};
use crate::knots::wvals;
use crate::lagrange::{tensor_basis_2d, tensor_basis_3d};
use crate::ReconConfig;

/// `((ix, iy, iz), (xi, eta, zeta))` for every tensor-product knot of an
/// element of the given order, in the same `i + j*p (+ k*p*p)` order that
/// `lagrange::tensor_basis_*` and element connectivity both assume. `iz`/
/// `zeta` are `0` in 2D.
fn knot_grid(order: usize, dim: usize, knots: &[f64]) -> Vec<((usize, usize, usize), (f64, f64, f64))> {
    let mut grid = Vec::with_capacity(order.pow(dim as u32));
    let kz = if dim == 3 { order } else { 1 };
    for iz in 0..kz {
        let zeta = if dim == 3 { knots[iz] } else { 0.0 };
        for iy in 0..order {
            for ix in 0..order {
                grid.push(((ix, iy, iz), (knots[ix], knots[iy], zeta)));
            }
        }
    }
    grid
}

fn solve_least_squares(
    element: i32,
    a: DMatrix<f64>,
    b: DMatrix<f64>,
    config: &ReconConfig,
) -> Result<DMatrix<f64>> {
    let nenrich = a.ncols();
    let nrows = a.nrows();
    let svd = a.svd(true, true);
    let max_sv = svd.singular_values.iter().cloned().fold(0.0_f64, f64::max);
    let tol = if config.svd_tolerance < 0.0 {
        f64::EPSILON * (nrows.max(nenrich) as f64) * max_sv
    } else {
        config.svd_tolerance
    };
    let rank = svd.singular_values.iter().filter(|&&s| s > tol).count();
    svd.solve(&b, tol).map_err(|_| ReconError::RankDeficient {
        element,
        rank,
        unknowns: nenrich,
        tolerance: tol,
    })
}

/// 3D patch reconstruction: `neq = 3 * order^3` rows in global (x,y,z).
pub fn compute_elem_recon_3d(
    element: i32,
    order: usize,
    knots: &[f64],
    xpts: &[Point3<f64>],
    uelem: &[f64],
    delem: &[f64],
    vars_per_node: usize,
    config: &ReconConfig,
) -> Result<DMatrix<f64>> {
    let wv = wvals(order)?;
    let nenrich = enrichment_count(order, 3)?;
    let grid = knot_grid(order, 3, knots);
    let neq = 3 * grid.len();

    let mut a = DMatrix::<f64>::zeros(neq, nenrich);
    let mut b = DMatrix::<f64>::zeros(neq, vars_per_node);

    for (row_block, &((ix, iy, iz), (xi, eta, zeta))) in grid.iter().enumerate() {
        let weight = wv[ix] * wv[iy] * wv[iz];
        let (_n, dxi_c, deta_c, dzeta_c) = tensor_basis_3d(knots, xi, eta, zeta);
        let jac = jacobian_3d(element, xpts, &dxi_c, &deta_c, &dzeta_c)?;
        let enr = eval_enrichment(order, 3, (xi, eta, zeta), knots)?;
        let dzeta_enr = enr.dzeta.as_ref().expect("3D enrichment carries dzeta");

        for v in 0..vars_per_node {
            let mut ud_ref = [0.0; 3];
            for i in 0..dxi_c.len() {
                let ui = uelem[i * vars_per_node + v];
                ud_ref[0] += dxi_c[i] * ui;
                ud_ref[1] += deta_c[i] * ui;
                ud_ref[2] += dzeta_c[i] * ui;
            }
            for axis in 0..3 {
                let mut phys_u = 0.0;
                for m in 0..3 {
                    phys_u += jac.jinv[(m, axis)] * ud_ref[m];
                }
                let dprescribed = delem[row_block * 3 * vars_per_node + v * 3 + axis];
                b[(row_block * 3 + axis, v)] = weight * (dprescribed - phys_u);
            }
        }

        for e in 0..nenrich {
            let dref = [enr.dxi[e], enr.deta[e], dzeta_enr[e]];
            for axis in 0..3 {
                let mut phys_e = 0.0;
                for m in 0..3 {
                    phys_e += jac.jinv[(m, axis)] * dref[m];
                }
                a[(row_block * 3 + axis, e)] = weight * phys_e;
            }
        }
    }

    solve_least_squares(element, a, b, config)
}

/// Rebuilds the C4 system's operator-level objects without solving: the
/// enrichment matrix `A`, the coarse analog `Ac` (physical gradients of the
/// coarse basis instead of the enrichment basis, same row layout), and the
/// per-row weight. Used only by the KS sensitivity chain (spec 4.6.3 step
/// 2), which needs `dubar/dU` and `dubar/dUderiv` without ever solving for
/// `ubar` itself here.
pub(crate) fn build_operator_3d(
    element: i32,
    order: usize,
    knots: &[f64],
    xpts: &[Point3<f64>],
) -> Result<(DMatrix<f64>, DMatrix<f64>, Vec<f64>)> {
    let wv = wvals(order)?;
    let nenrich = enrichment_count(order, 3)?;
    let grid = knot_grid(order, 3, knots);
    let coarse_count = grid.len();
    let neq = 3 * coarse_count;

    let mut a = DMatrix::<f64>::zeros(neq, nenrich);
    let mut ac = DMatrix::<f64>::zeros(neq, coarse_count);
    let mut weight_per_row = vec![0.0; neq];

    for (row_block, &((ix, iy, iz), (xi, eta, zeta))) in grid.iter().enumerate() {
        let weight = wv[ix] * wv[iy] * wv[iz];
        let (_n, dxi_c, deta_c, dzeta_c) = tensor_basis_3d(knots, xi, eta, zeta);
        let jac = jacobian_3d(element, xpts, &dxi_c, &deta_c, &dzeta_c)?;
        let enr = eval_enrichment(order, 3, (xi, eta, zeta), knots)?;
        let dzeta_enr = enr.dzeta.as_ref().expect("3D enrichment carries dzeta");

        for axis in 0..3 {
            weight_per_row[row_block * 3 + axis] = weight;
        }

        for i in 0..coarse_count {
            let dref = [dxi_c[i], deta_c[i], dzeta_c[i]];
            for axis in 0..3 {
                let mut phys = 0.0;
                for m in 0..3 {
                    phys += jac.jinv[(m, axis)] * dref[m];
                }
                ac[(row_block * 3 + axis, i)] = weight * phys;
            }
        }

        for e in 0..nenrich {
            let dref = [enr.dxi[e], enr.deta[e], dzeta_enr[e]];
            for axis in 0..3 {
                let mut phys_e = 0.0;
                for m in 0..3 {
                    phys_e += jac.jinv[(m, axis)] * dref[m];
                }
                a[(row_block * 3 + axis, e)] = weight * phys_e;
            }
        }
    }

    Ok((a, ac, weight_per_row))
}

/// 2D-shell patch reconstruction embedded in 3D space: `neq = 2 * order^2`
/// rows expressed in the element's local `(d1, d2)` frame.
pub fn compute_elem_recon_shell(
    element: i32,
    order: usize,
    knots: &[f64],
    xpts: &[Point3<f64>],
    uelem: &[f64],
    delem: &[f64],
    vars_per_node: usize,
    config: &ReconConfig,
) -> Result<DMatrix<f64>> {
    let wv = wvals(order)?;
    let nenrich = enrichment_count(order, 2)?;
    let grid = knot_grid(order, 2, knots);
    let neq = 2 * grid.len();

    let mut a = DMatrix::<f64>::zeros(neq, nenrich);
    let mut b = DMatrix::<f64>::zeros(neq, vars_per_node);

    for (row_block, &((ix, iy, _iz), (xi, eta, _zeta))) in grid.iter().enumerate() {
        let weight = wv[ix] * wv[iy];
        let (_n, dxi_c, deta_c) = tensor_basis_2d(knots, xi, eta);
        let jac = jacobian_2d_shell(element, xpts, &dxi_c, &deta_c)?;
        let enr = eval_enrichment(order, 2, (xi, eta, 0.0), knots)?;

        for v in 0..vars_per_node {
            let mut ud_ref = [0.0; 2];
            for i in 0..dxi_c.len() {
                let ui = uelem[i * vars_per_node + v];
                ud_ref[0] += dxi_c[i] * ui;
                ud_ref[1] += deta_c[i] * ui;
            }
            let ud_ref3 = [ud_ref[0], ud_ref[1], 0.0];
            let mut phys_u = [0.0; 3];
            for axis in 0..3 {
                for m in 0..3 {
                    phys_u[axis] += jac.jinv[(m, axis)] * ud_ref3[m];
                }
            }
            let phys_u_vec = nalgebra::Vector3::new(phys_u[0], phys_u[1], phys_u[2]);
            let row_d1 = phys_u_vec.dot(&jac.d1);
            let row_d2 = phys_u_vec.dot(&jac.d2);

            let base = row_block * 3 * vars_per_node + v * 3;
            let dp = nalgebra::Vector3::new(delem[base], delem[base + 1], delem[base + 2]);
            let dp_d1 = dp.dot(&jac.d1);
            let dp_d2 = dp.dot(&jac.d2);

            b[(row_block * 2, v)] = weight * (dp_d1 - row_d1);
            b[(row_block * 2 + 1, v)] = weight * (dp_d2 - row_d2);
        }

        for e in 0..nenrich {
            let dref3 = [enr.dxi[e], enr.deta[e], 0.0];
            let mut phys_e = [0.0; 3];
            for axis in 0..3 {
                for m in 0..3 {
                    phys_e[axis] += jac.jinv[(m, axis)] * dref3[m];
                }
            }
            let phys_e_vec = nalgebra::Vector3::new(phys_e[0], phys_e[1], phys_e[2]);
            a[(row_block * 2, e)] = weight * phys_e_vec.dot(&jac.d1);
            a[(row_block * 2 + 1, e)] = weight * phys_e_vec.dot(&jac.d2);
        }
    }

    solve_least_squares(element, a, b, config)
}
