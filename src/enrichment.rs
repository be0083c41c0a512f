//! C1 — enrichment basis.
//!
//! Emits shape-function and derivative values of the enrichment polynomials
//! for the supported order/dimension combinations at a parametric point. The
//! emitted ordering is part of the public contract: `patch_recon` and
//! `refined_field` both assume the exact column order produced here.
//!
//! # Open question resolved here
//!
//! The 3D enrichment set is specified only by its per-axis count (9 for
//! p=2, 15 for p=3), not by an exhaustive term list. This rendition fixes a
//! concrete, symmetric choice: each axis block pairs the bubble on that axis
//! with a fixed perpendicular polynomial set in the *other two* axes, taken
//! in cyclic order (xi -> (eta, zeta), eta -> (zeta, xi), zeta -> (xi, eta)).
//! For p=2 the perpendicular set is `{1, a, b}` (three linear terms); for
//! p=3 it is `{1, a, a^2, b, b^2}` (five terms, matching the quintuple named
//! in the source spec), giving 3*3=9 and 3*5=15 respectively. See
//! DESIGN.md for the full rationale.

use crate::error::{ReconError, Result};

/// Evaluated enrichment basis at one parametric point.
#[derive(Debug, Clone)]
pub struct EnrichmentEval {
    pub n: Vec<f64>,
    pub dxi: Vec<f64>,
    pub deta: Vec<f64>,
    /// `Some` only for 3D evaluations.
    pub dzeta: Option<Vec<f64>>,
}

pub fn enrichment_count(order: usize, dim: usize) -> Result<usize> {
    match (dim, order) {
        (2, 2) | (2, 3) | (2, 4) => Ok(2 * order + 1),
        (3, 2) => Ok(9),
        (3, 3) => Ok(15),
        _ => Err(ReconError::InvalidConfig(format!(
            "unsupported enrichment order {order} in {dim}D"
        ))),
    }
}

/// `evalEnrichment(order, dim, pt, knots) -> (N, dN/dxi, dN/deta, [dN/dzeta])`
pub fn eval_enrichment(
    order: usize,
    dim: usize,
    pt: (f64, f64, f64),
    knots: &[f64],
) -> Result<EnrichmentEval> {
    enrichment_count(order, dim)?;
    match dim {
        2 => Ok(eval_2d(order, pt.0, pt.1, knots)),
        3 => Ok(eval_3d(order, pt.0, pt.1, pt.2, knots)),
        _ => unreachable!("validated by enrichment_count"),
    }
}

/// The one-dimensional bubble factor and its analytic derivative.
fn bubble(order: usize, t: f64, knots: &[f64]) -> (f64, f64) {
    match order {
        2 => (1.0 - t * t, -2.0 * t),
        3 => (t - t.powi(3), 1.0 - 3.0 * t * t),
        4 => {
            let k1 = knots[1];
            let k2 = knots[2];
            let q = (t - k1) * (t - k2);
            let dq = 2.0 * t - k1 - k2;
            let one_minus_t2 = 1.0 - t * t;
            (one_minus_t2 * q, -2.0 * t * q + one_minus_t2 * dq)
        }
        _ => unreachable!("validated by enrichment_count"),
    }
}

fn eval_2d(order: usize, xi: f64, eta: f64, knots: &[f64]) -> EnrichmentEval {
    let (phi, dphi) = bubble(order, xi, knots);
    let (psi, dpsi) = bubble(order, eta, knots);

    let total = 2 * order + 1;
    let mut n = Vec::with_capacity(total);
    let mut dxi = Vec::with_capacity(total);
    let mut deta = Vec::with_capacity(total);

    // eta^m * phi(xi), m = 0..order-1
    for m in 0..order {
        let (etam, detam) = power_and_deriv(eta, m as i32);
        n.push(etam * phi);
        dxi.push(etam * dphi);
        deta.push(detam * phi);
    }
    // xi^m * psi(eta), m = 0..order-1
    for m in 0..order {
        let (xim, dxim) = power_and_deriv(xi, m as i32);
        n.push(xim * psi);
        dxi.push(dxim * psi);
        deta.push(xim * dpsi);
    }
    // coupling term
    n.push(phi * psi);
    dxi.push(dphi * psi);
    deta.push(phi * dpsi);

    EnrichmentEval {
        n,
        dxi,
        deta,
        dzeta: None,
    }
}

fn power_and_deriv(t: f64, p: i32) -> (f64, f64) {
    if p == 0 {
        (1.0, 0.0)
    } else {
        (t.powi(p), p as f64 * t.powi(p - 1))
    }
}

/// The perpendicular-polynomial power pairs `(power_a, power_b)` used in
/// every 3D axis block, applied to that axis's two "other" coordinates.
fn perp_terms(order: usize) -> &'static [(i32, i32)] {
    match order {
        2 => &[(0, 0), (1, 0), (0, 1)],
        3 => &[(0, 0), (1, 0), (2, 0), (0, 1), (0, 2)],
        _ => unreachable!("validated by enrichment_count"),
    }
}

fn eval_3d(order: usize, xi: f64, eta: f64, zeta: f64, knots: &[f64]) -> EnrichmentEval {
    let (bx, dbx) = bubble(order, xi, knots);
    let (by, dby) = bubble(order, eta, knots);
    let (bz, dbz) = bubble(order, zeta, knots);
    let perp = perp_terms(order);
    let total = 3 * perp.len();

    let mut n = Vec::with_capacity(total);
    let mut dxi = Vec::with_capacity(total);
    let mut deta = Vec::with_capacity(total);
    let mut dzeta = Vec::with_capacity(total);

    // block-on-xi: perpendicular axes (eta, zeta)
    for &(a, b) in perp {
        let (pa, dpa) = power_and_deriv(eta, a);
        let (pb, dpb) = power_and_deriv(zeta, b);
        n.push(pa * pb * bx);
        dxi.push(pa * pb * dbx);
        deta.push(dpa * pb * bx);
        dzeta.push(pa * dpb * bx);
    }
    // block-on-eta: perpendicular axes (zeta, xi), cyclic
    for &(a, b) in perp {
        let (pa, dpa) = power_and_deriv(zeta, a);
        let (pb, dpb) = power_and_deriv(xi, b);
        n.push(pa * pb * by);
        deta.push(pa * pb * dby);
        dzeta.push(dpa * pb * by);
        dxi.push(pa * dpb * by);
    }
    // block-on-zeta: perpendicular axes (xi, eta), cyclic
    for &(a, b) in perp {
        let (pa, dpa) = power_and_deriv(xi, a);
        let (pb, dpb) = power_and_deriv(eta, b);
        n.push(pa * pb * bz);
        dzeta.push(pa * pb * dbz);
        dxi.push(dpa * pb * bz);
        deta.push(pa * dpb * bz);
    }

    EnrichmentEval {
        n,
        dxi,
        deta,
        dzeta: Some(dzeta),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn enrichment_counts_match_spec() {
        assert_eq!(enrichment_count(2, 2).unwrap(), 5);
        assert_eq!(enrichment_count(3, 2).unwrap(), 7);
        assert_eq!(enrichment_count(4, 2).unwrap(), 9);
        assert_eq!(enrichment_count(2, 3).unwrap(), 9);
        assert_eq!(enrichment_count(3, 3).unwrap(), 15);
        assert!(enrichment_count(4, 3).is_err());
    }

    #[test]
    fn bubble_functions_vanish_at_element_boundary() {
        // Every bubble factor must vanish at xi = +-1 so the enrichment
        // never perturbs the shared-boundary interpolation.
        for order in [2, 3, 4] {
            let knots = match order {
                2 => vec![-1.0, 1.0],
                3 => vec![-1.0, 0.0, 1.0],
                4 => vec![-1.0, -1.0 / 3f64.sqrt(), 1.0 / 3f64.sqrt(), 1.0],
                _ => unreachable!(),
            };
            let (phi_lo, _) = bubble(order, -1.0, &knots);
            let (phi_hi, _) = bubble(order, 1.0, &knots);
            assert_relative_eq!(phi_lo, 0.0, epsilon = 1e-10);
            assert_relative_eq!(phi_hi, 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn derivatives_match_finite_difference_2d() {
        let knots = [-1.0, 0.0, 1.0]; // order 3
        let h = 1e-6;
        let eval = |xi: f64, eta: f64| eval_enrichment(3, 2, (xi, eta, 0.0), &knots).unwrap();
        let pt = eval(0.3, -0.2);
        let px = eval(0.3 + h, -0.2);
        let mx = eval(0.3 - h, -0.2);
        let py = eval(0.3, -0.2 + h);
        let my = eval(0.3, -0.2 - h);
        for i in 0..pt.n.len() {
            let fd_xi = (px.n[i] - mx.n[i]) / (2.0 * h);
            let fd_eta = (py.n[i] - my.n[i]) / (2.0 * h);
            assert_relative_eq!(fd_xi, pt.dxi[i], epsilon = 1e-6);
            assert_relative_eq!(fd_eta, pt.deta[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn derivatives_match_finite_difference_3d() {
        let knots = [-1.0, 1.0]; // order 2
        let h = 1e-6;
        let eval =
            |xi: f64, eta: f64, zeta: f64| eval_enrichment(2, 3, (xi, eta, zeta), &knots).unwrap();
        let pt = eval(0.2, -0.3, 0.4);
        let px = eval(0.2 + h, -0.3, 0.4);
        let mx = eval(0.2 - h, -0.3, 0.4);
        let py = eval(0.2, -0.3 + h, 0.4);
        let my = eval(0.2, -0.3 - h, 0.4);
        let pz = eval(0.2, -0.3, 0.4 + h);
        let mz = eval(0.2, -0.3, 0.4 - h);
        let dzeta = pt.dzeta.as_ref().unwrap();
        for i in 0..pt.n.len() {
            assert_relative_eq!((px.n[i] - mx.n[i]) / (2.0 * h), pt.dxi[i], epsilon = 1e-6);
            assert_relative_eq!((py.n[i] - my.n[i]) / (2.0 * h), pt.deta[i], epsilon = 1e-6);
            assert_relative_eq!((pz.n[i] - mz.n[i]) / (2.0 * h), dzeta[i], epsilon = 1e-6);
        }
    }
}
