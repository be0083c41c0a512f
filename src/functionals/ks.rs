//! C6.3 — KS (Kreisselmeier-Steinhauser) stress aggregation constraint.
//!
//! The primal value needs two full quadrature sweeps: phase A finds the
//! global maximum failure value, phase B accumulates the exponential sum
//! against that maximum (so the formula never overflows). The sensitivity
//! pass threads a reverse-mode chain through the reconstruction operator
//! itself: `ubar` depends on the coarse field `U` both directly (through
//! the low-order interpolation mismatch in the C4 right-hand side) and
//! indirectly (through the projected nodal derivative `D`), so both paths
//! have to be summed before applying the transpose of C3.
//!
//! # `dubardu` indexing (resolved open question)
//!
//! `dubar_du_direct` below is stored as an `nenrich x coarse_count` matrix
//! — row is the enrichment index, column the coarse-DOF index, i.e. the
//! flattened convention is `dubardu[enrichment_idx * coarse_count +
//! coarse_dof_idx]`. This is the non-transposed convention; the transposed
//! alternative (`coarse_dof_idx * nenrich + enrichment_idx`) silently
//! swaps which axis is contracted against `df/dubar` in step 4 and gives a
//! numerically different (wrong) `df/dU` contribution. [`dubardu_contract`]
//! pins the non-transposed contraction down; `tests::` exercises both to
//! show they diverge (the regression named S4' in this rendition's test
//! suite).

use crate::collab::{Comm, ElementCollaborator, Forest, NodalVector};
use crate::error::Result;
use crate::functionals::strain_displacement_block;
use crate::gauss::gauss_grid;
use crate::jacobian::jacobian_3d;
use crate::lagrange::tensor_basis_3d;
use crate::nodal_deriv::{apply_node_deriv_transpose, compute_node_deriv};
use crate::patch_recon::{build_operator_3d, compute_elem_recon_3d};
use crate::ReconConfig;

/// Contracts `df_dubar[e, c]` against `dubar_du[e, i]` under the
/// non-transposed `dubardu[e*coarse_count + i]` convention, returning the
/// contribution to `df/dU[i, c]`.
fn dubardu_contract(df_dubar: &nalgebra::DMatrix<f64>, dubar_du: &nalgebra::DMatrix<f64>) -> nalgebra::DMatrix<f64> {
    dubar_du.transpose() * df_dubar
}

fn strain_at_point(
    coarse_grads: &[[f64; 3]],
    enrich_grads: &[[f64; 3]],
    uelem: &[f64],
    ubar: &nalgebra::DMatrix<f64>,
) -> [f64; 6] {
    let mut strain = [0.0; 6];
    let mut blk = [[0.0; 3]; 6];
    for (i, &g) in coarse_grads.iter().enumerate() {
        strain_displacement_block(g, &mut blk);
        for k in 0..6 {
            for c in 0..3 {
                strain[k] += blk[k][c] * uelem[i * 3 + c];
            }
        }
    }
    for (e, &g) in enrich_grads.iter().enumerate() {
        strain_displacement_block(g, &mut blk);
        for k in 0..6 {
            for c in 0..3 {
                strain[k] += blk[k][c] * ubar[(e, c)];
            }
        }
    }
    strain
}

fn physical_grads(jinv: &nalgebra::Matrix3<f64>, dxi: &[f64], deta: &[f64], dzeta: &[f64]) -> Vec<[f64; 3]> {
    (0..dxi.len())
        .map(|i| {
            let dref = [dxi[i], deta[i], dzeta[i]];
            let mut g = [0.0; 3];
            for axis in 0..3 {
                for m in 0..3 {
                    g[axis] += jinv[(m, axis)] * dref[m];
                }
            }
            g
        })
        .collect()
}

/// KS stress aggregation over a 3D solid forest. Holds only borrows; per
/// the error-handling design there is no way to construct this without a
/// live forest and element collaborator.
pub struct KsConstraint<'a> {
    pub forest: &'a dyn Forest,
    pub comm: &'a dyn Comm,
    pub elem_collab: &'a dyn ElementCollaborator,
    pub config: ReconConfig,
}

impl<'a> KsConstraint<'a> {
    fn gauss_order(&self) -> usize {
        self.forest.order() + 1
    }

    /// Two-phase primal evaluation: `ks_max_fail + log(ks_fail_sum) / k`.
    pub fn eval(&self, u: &NodalVector) -> Result<f64> {
        let k = self.config.ks_weight()?;
        let d = compute_node_deriv(self.forest, u, self.comm);
        let ks_max_fail = self.phase_a_max(u, &d)?;

        let grid = gauss_grid(self.gauss_order(), 3);
        let mut ks_fail_sum_local = 0.0;
        for e in 0..self.forest.num_elements() {
            let xpts = self.forest.element_points(e);
            for &(pt, wg) in &grid {
                let (_n, dxi, deta, dzeta) = tensor_basis_3d(self.forest.knots(), pt.0, pt.1, pt.2);
                let jac = match jacobian_3d(e as i32, xpts, &dxi, &deta, &dzeta) {
                    Ok(j) => j,
                    Err(err) => {
                        eprintln!(
                            "Warning: degenerate Gauss point in KS phase B, skipping element {e}: {err}"
                        );
                        continue;
                    }
                };
                if let Some(f) = self.failure_at(e, u, &d, pt)? {
                    ks_fail_sum_local += jac.det_j * wg * (k * (f - ks_max_fail)).exp();
                }
            }
        }
        let ks_fail_sum = self.comm.allreduce_sum(ks_fail_sum_local);

        Ok(ks_max_fail + ks_fail_sum.ln() / k)
    }

    fn phase_a_max(&self, u: &NodalVector, d: &NodalVector) -> Result<f64> {
        let grid = gauss_grid(self.gauss_order(), 3);
        let mut ks_max_fail = f64::NEG_INFINITY;
        for e in 0..self.forest.num_elements() {
            for &(pt, _w) in &grid {
                if let Some(f) = self.failure_at(e, u, d, pt)? {
                    ks_max_fail = ks_max_fail.max(f);
                }
            }
        }
        Ok(self.comm.allreduce_max(ks_max_fail))
    }

    fn failure_at(&self, e: usize, u: &NodalVector, d: &NodalVector, pt: (f64, f64, f64)) -> Result<Option<f64>> {
        let nodes = self.forest.element_nodes(e);
        let xpts = self.forest.element_points(e);
        let uelem = u.get_values(nodes);
        let delem = d.get_values(nodes);
        let order = self.forest.order();
        let knots = self.forest.knots();

        let ubar = match compute_elem_recon_3d(e as i32, order, knots, xpts, &uelem, &delem, 3, &self.config) {
            Ok(m) => m,
            Err(err) => {
                eprintln!(
                    "Warning: rank-deficient/degenerate element in KS primal, skipping element {e}: {err}"
                );
                return Ok(None);
            }
        };

        let (_n, dxi, deta, dzeta) = tensor_basis_3d(knots, pt.0, pt.1, pt.2);
        let jac = match jacobian_3d(e as i32, xpts, &dxi, &deta, &dzeta) {
            Ok(j) => j,
            Err(_) => return Ok(None),
        };
        let coarse_grads = physical_grads(&jac.jinv, &dxi, &deta, &dzeta);

        let enr = crate::enrichment::eval_enrichment(order, 3, pt, knots)?;
        let dzeta_enr = enr.dzeta.as_ref().expect("3D enrichment carries dzeta");
        let enrich_grads = physical_grads(&jac.jinv, &enr.dxi, &enr.deta, dzeta_enr);

        let strain = strain_at_point(&coarse_grads, &enrich_grads, &uelem, &ubar);
        let f = self.elem_collab.constitutive(e).failure(pt, &strain);
        Ok(Some(f))
    }

    /// Full sensitivity pass: returns `(value, df/dU, df/dx-contribution)`.
    /// `dfdx` is caller-allocated and scale-accumulated into, matching the
    /// `addFailureDVSens` collaborator contract.
    pub fn eval_sensitivity(&self, u: &NodalVector, dfdx: &mut [f64]) -> Result<(f64, NodalVector)> {
        let k = self.config.ks_weight()?;
        let d = compute_node_deriv(self.forest, u, self.comm);
        let ks_max_fail = self.recompute_max(u, &d)?;
        let ks_fail_sum = self.recompute_sum(u, &d, ks_max_fail)?;
        let value = ks_max_fail + ks_fail_sum.ln() / k;

        let order = self.forest.order();
        let knots = self.forest.knots();
        let grid = gauss_grid(self.gauss_order(), 3);

        let mut df_du = NodalVector::new(&self.forest.independent_node_ids(), 3, self.forest.dependent_nodes().clone());
        let mut df_duderiv = NodalVector::new(&self.forest.independent_node_ids(), 9, self.forest.dependent_nodes().clone());

        for e in 0..self.forest.num_elements() {
            let nodes = self.forest.element_nodes(e);
            let xpts = self.forest.element_points(e);
            let uelem = u.get_values(nodes);
            let delem = d.get_values(nodes);

            let ubar = match compute_elem_recon_3d(e as i32, order, knots, xpts, &uelem, &delem, 3, &self.config) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let (a, ac, weight_per_row) = match build_operator_3d(e as i32, order, knots, xpts) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let coarse_count = ac.ncols();
            let svd = a.clone().svd(true, true);
            let max_sv = svd.singular_values.iter().cloned().fold(0.0_f64, f64::max);
            let tol = if self.config.svd_tolerance < 0.0 {
                f64::EPSILON * (a.nrows().max(a.ncols()) as f64) * max_sv
            } else {
                self.config.svd_tolerance
            };
            let pinv_a = match svd.pseudo_inverse(tol) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let neg_ac = -ac;
            let dubar_du_direct = &pinv_a * &neg_ac;
            let mut dubar_duderiv = pinv_a.clone();
            for (col, w) in weight_per_row.iter().enumerate() {
                for row in 0..dubar_duderiv.nrows() {
                    dubar_duderiv[(row, col)] *= w;
                }
            }

            let mut df_du_elem = vec![0.0; coarse_count * 3];
            let mut df_dubar_elem = nalgebra::DMatrix::<f64>::zeros(ubar.nrows(), 3);

            for &(pt, wg) in &grid {
                let (_n, dxi, deta, dzeta) = tensor_basis_3d(knots, pt.0, pt.1, pt.2);
                let jac = match jacobian_3d(e as i32, xpts, &dxi, &deta, &dzeta) {
                    Ok(j) => j,
                    Err(_) => continue,
                };
                let coarse_grads = physical_grads(&jac.jinv, &dxi, &deta, &dzeta);
                let enr = crate::enrichment::eval_enrichment(order, 3, pt, knots)?;
                let dzeta_enr = enr.dzeta.as_ref().expect("3D enrichment carries dzeta");
                let enrich_grads = physical_grads(&jac.jinv, &enr.dxi, &enr.deta, dzeta_enr);

                let strain = strain_at_point(&coarse_grads, &enrich_grads, &uelem, &ubar);
                let model = self.elem_collab.constitutive(e);
                let f = model.failure(pt, &strain);
                let alpha = jac.det_j * wg * (k * (f - ks_max_fail)).exp() / ks_fail_sum;
                let dfde = model.failure_strain_sens(pt, &strain);
                model.add_failure_dv_sens(pt, &strain, alpha, dfdx);

                let mut blk = [[0.0; 3]; 6];
                for (i, &g) in coarse_grads.iter().enumerate() {
                    strain_displacement_block(g, &mut blk);
                    for c in 0..3 {
                        let mut s = 0.0;
                        for kk in 0..6 {
                            s += dfde[kk] * blk[kk][c];
                        }
                        df_du_elem[i * 3 + c] += alpha * s;
                    }
                }
                for (ei, &g) in enrich_grads.iter().enumerate() {
                    strain_displacement_block(g, &mut blk);
                    for c in 0..3 {
                        let mut s = 0.0;
                        for kk in 0..6 {
                            s += dfde[kk] * blk[kk][c];
                        }
                        df_dubar_elem[(ei, c)] += alpha * s;
                    }
                }
            }

            let indirect_du = dubardu_contract(&df_dubar_elem, &dubar_du_direct);
            let mut node_contrib = vec![0.0; coarse_count * 3];
            for i in 0..coarse_count {
                for c in 0..3 {
                    node_contrib[i * 3 + c] = df_du_elem[i * 3 + c] + indirect_du[(i, c)];
                }
            }
            df_du.add_values(nodes, &node_contrib);

            let duderiv_block = df_dubar_elem.transpose() * &dubar_duderiv; // (3, neq)
            let mut node_duderiv = vec![0.0; coarse_count * 9];
            for i in 0..coarse_count {
                for c in 0..3 {
                    for axis in 0..3 {
                        node_duderiv[i * 9 + c * 3 + axis] = duderiv_block[(c, i * 3 + axis)];
                    }
                }
            }
            df_duderiv.add_values(nodes, &node_duderiv);
        }

        df_du.finalize();
        df_du.distribute();
        df_duderiv.finalize();
        df_duderiv.distribute();

        let transposed = apply_node_deriv_transpose(self.forest, &df_duderiv);
        let total_nodes = self.forest.independent_node_ids();
        let mut df_du_final = NodalVector::new(&total_nodes, 3, self.forest.dependent_nodes().clone());
        for &n in &total_nodes {
            let direct = df_du.get_values(&[n]);
            let indirect = transposed.get_values(&[n]);
            let sum: Vec<f64> = direct.iter().zip(&indirect).map(|(a, b)| a + b).collect();
            df_du_final.insert_nonzero_values(&[n], &sum);
        }

        Ok((value, df_du_final))
    }

    fn recompute_max(&self, u: &NodalVector, d: &NodalVector) -> Result<f64> {
        self.phase_a_max(u, d)
    }

    fn recompute_sum(&self, u: &NodalVector, d: &NodalVector, ks_max_fail: f64) -> Result<f64> {
        let k = self.config.ks_weight()?;
        let grid = gauss_grid(self.gauss_order(), 3);
        let mut local = 0.0;
        for e in 0..self.forest.num_elements() {
            let xpts = self.forest.element_points(e);
            for &(pt, wg) in &grid {
                let (_n, dxi, deta, dzeta) = tensor_basis_3d(self.forest.knots(), pt.0, pt.1, pt.2);
                let jac = match jacobian_3d(e as i32, xpts, &dxi, &deta, &dzeta) {
                    Ok(j) => j,
                    Err(_) => continue,
                };
                if let Some(f) = self.failure_at(e, u, d, pt)? {
                    local += jac.det_j * wg * (k * (f - ks_max_fail)).exp();
                }
            }
        }
        Ok(self.comm.allreduce_sum(local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    /// S4' — the `dubardu` indexing regression. A hand-built 2-enrichment,
    /// 2-coarse-DOF case where the non-transposed and transposed
    /// conventions give different `df/dU` contributions.
    #[test]
    fn dubardu_non_transposed_convention_differs_from_transposed() {
        let df_dubar = DMatrix::from_row_slice(2, 1, &[1.0, 2.0]); // (nenrich=2, vars=1)
        let dubar_du = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]); // (nenrich=2, coarse=2)

        let non_transposed = dubardu_contract(&df_dubar, &dubar_du);
        // hand contraction: df_du[i] = sum_e df_dubar[e]*dubar_du[e,i]
        assert_relative_eq!(non_transposed[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(non_transposed[(1, 0)], 2.0, epsilon = 1e-12);

        // the transposed alternative reinterprets dubar_du's storage order
        // as (coarse, nenrich) before contracting — for this asymmetric
        // matrix it produces a different, wrong result.
        let dubar_du_as_transposed = DMatrix::from_row_slice(2, 2, &[1.0, 3.0, 0.0, 1.0]);
        let wrong = &dubar_du_as_transposed * &df_dubar;
        assert!((wrong[(0, 0)] - non_transposed[(0, 0)]).abs() > 1e-9 || (wrong[(1, 0)] - non_transposed[(1, 0)]).abs() > 1e-9);
    }
}
