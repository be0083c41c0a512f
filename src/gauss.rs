//! Gauss-Legendre quadrature tables for the `p+1` rule used by the KS and
//! curvature functionals (spec 4.6.3-4.6.4). Only the orders the supported
//! mesh orders {2,3,4} actually need (n = 3,4,5) are provided.

/// `(points, weights)` on `[-1, 1]` for an `n`-point Gauss-Legendre rule.
pub fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    match n {
        3 => {
            let a = (3.0_f64 / 5.0).sqrt();
            (vec![-a, 0.0, a], vec![5.0 / 9.0, 8.0 / 9.0, 5.0 / 9.0])
        }
        4 => {
            let s = (6.0_f64 / 5.0).sqrt();
            let p1 = ((3.0 - 2.0 * s) / 7.0).sqrt();
            let p2 = ((3.0 + 2.0 * s) / 7.0).sqrt();
            let w1 = (18.0 + 30.0_f64.sqrt()) / 36.0;
            let w2 = (18.0 - 30.0_f64.sqrt()) / 36.0;
            (vec![-p2, -p1, p1, p2], vec![w2, w1, w1, w2])
        }
        5 => {
            let s = (10.0_f64 / 7.0).sqrt();
            let p1 = (5.0 - 2.0 * s).sqrt() / 3.0;
            let p2 = (5.0 + 2.0 * s).sqrt() / 3.0;
            let r = 70.0_f64.sqrt();
            let w1 = (322.0 + 13.0 * r) / 900.0;
            let w2 = (322.0 - 13.0 * r) / 900.0;
            (vec![-p2, -p1, 0.0, p1, p2], vec![w2, w1, 128.0 / 225.0, w1, w2])
        }
        _ => panic!("unsupported Gauss-Legendre order {n}"),
    }
}

/// Tensor-product quadrature points and combined weights over a `dim`-cube.
pub fn gauss_grid(n: usize, dim: usize) -> Vec<((f64, f64, f64), f64)> {
    let (pts, w) = gauss_legendre(n);
    let mut grid = Vec::with_capacity(n.pow(dim as u32));
    if dim == 2 {
        for (iy, &eta) in pts.iter().enumerate() {
            for (ix, &xi) in pts.iter().enumerate() {
                grid.push(((xi, eta, 0.0), w[ix] * w[iy]));
            }
        }
    } else {
        for (iz, &zeta) in pts.iter().enumerate() {
            for (iy, &eta) in pts.iter().enumerate() {
                for (ix, &xi) in pts.iter().enumerate() {
                    grid.push(((xi, eta, zeta), w[ix] * w[iy] * w[iz]));
                }
            }
        }
    }
    grid
}
