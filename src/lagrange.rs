//! One-dimensional Lagrange basis and its tensor-product extension.
//!
//! This is the coarse-mesh interpolation basis: the default implementation
//! behind `Forest::eval_interp`. Node ordering within an element follows the
//! tensor-product convention `i + j*p (+ k*p*p)` for local axis indices
//! `(i, j, k)`, which every component in this crate (C2-C6) assumes when it
//! walks an element's node list.

/// Lagrange basis values and derivatives at `t`, one entry per knot.
pub fn lagrange_1d(knots: &[f64], t: f64) -> (Vec<f64>, Vec<f64>) {
    let p = knots.len();
    let mut n = vec![0.0; p];
    let mut dn = vec![0.0; p];

    for i in 0..p {
        let mut prod = 1.0;
        for j in 0..p {
            if j != i {
                prod *= (t - knots[j]) / (knots[i] - knots[j]);
            }
        }
        n[i] = prod;

        let mut dsum = 0.0;
        for j in 0..p {
            if j == i {
                continue;
            }
            let mut term = 1.0 / (knots[i] - knots[j]);
            for k in 0..p {
                if k == i || k == j {
                    continue;
                }
                term *= (t - knots[k]) / (knots[i] - knots[k]);
            }
            dsum += term;
        }
        dn[i] = dsum;
    }

    (n, dn)
}

pub fn tensor_basis_2d(knots: &[f64], xi: f64, eta: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let (nx, dnx) = lagrange_1d(knots, xi);
    let (ny, dny) = lagrange_1d(knots, eta);
    let p = knots.len();
    let mut n = vec![0.0; p * p];
    let mut dxi = vec![0.0; p * p];
    let mut deta = vec![0.0; p * p];

    for j in 0..p {
        for i in 0..p {
            let idx = i + j * p;
            n[idx] = nx[i] * ny[j];
            dxi[idx] = dnx[i] * ny[j];
            deta[idx] = nx[i] * dny[j];
        }
    }
    (n, dxi, deta)
}

pub fn tensor_basis_3d(
    knots: &[f64],
    xi: f64,
    eta: f64,
    zeta: f64,
) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
    let (nx, dnx) = lagrange_1d(knots, xi);
    let (ny, dny) = lagrange_1d(knots, eta);
    let (nz, dnz) = lagrange_1d(knots, zeta);
    let p = knots.len();
    let mut n = vec![0.0; p * p * p];
    let mut dxi = vec![0.0; p * p * p];
    let mut deta = vec![0.0; p * p * p];
    let mut dzeta = vec![0.0; p * p * p];

    for k in 0..p {
        for j in 0..p {
            for i in 0..p {
                let idx = i + j * p + k * p * p;
                n[idx] = nx[i] * ny[j] * nz[k];
                dxi[idx] = dnx[i] * ny[j] * nz[k];
                deta[idx] = nx[i] * dny[j] * nz[k];
                dzeta[idx] = nx[i] * ny[j] * dnz[k];
            }
        }
    }
    (n, dxi, deta, dzeta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn order2_basis_partitions_unity() {
        let knots = [-1.0, 1.0];
        let (n, _) = lagrange_1d(&knots, 0.3);
        assert_relative_eq!(n.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn order3_basis_reproduces_nodal_values() {
        let knots = [-1.0, 0.0, 1.0];
        for (idx, &k) in knots.iter().enumerate() {
            let (n, _) = lagrange_1d(&knots, k);
            for (j, &nj) in n.iter().enumerate() {
                let expected = if j == idx { 1.0 } else { 0.0 };
                assert_relative_eq!(nj, expected, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn tensor_2d_partitions_unity_and_matches_derivative_by_fd() {
        let knots = [-1.0, 0.0, 1.0];
        let (n, dxi, _deta) = tensor_basis_2d(&knots, 0.2, -0.4);
        assert_relative_eq!(n.iter().sum::<f64>(), 1.0, epsilon = 1e-12);

        let h = 1e-6;
        let (n_plus, _, _) = tensor_basis_2d(&knots, 0.2 + h, -0.4);
        let (n_minus, _, _) = tensor_basis_2d(&knots, 0.2 - h, -0.4);
        for i in 0..n.len() {
            let fd = (n_plus[i] - n_minus[i]) / (2.0 * h);
            assert_relative_eq!(fd, dxi[i], epsilon = 1e-6);
        }
    }
}
