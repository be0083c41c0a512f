//! C2 — jacobian kernel.
//!
//! From element node coordinates and shape-function derivatives, produces
//! the geometric transformation matrix and its inverse. A degenerate
//! element (det(J) <= 0) is never fatal: the caller logs it and treats the
//! contribution as zero, per the error-handling policy in the spec.

use nalgebra::{Matrix3, Point3, Vector3};

use crate::error::{ReconError, Result};

#[derive(Debug, Clone)]
pub struct Jacobian3D {
    pub xd: Matrix3<f64>,
    pub jinv: Matrix3<f64>,
    pub det_j: f64,
}

/// `jacobian(Xpts, dN) -> (Xd, J, detJ)` for a fully 3D element.
pub fn jacobian_3d(
    element: i32,
    xpts: &[Point3<f64>],
    dn_dxi: &[f64],
    dn_deta: &[f64],
    dn_dzeta: &[f64],
) -> Result<Jacobian3D> {
    let mut xd = Matrix3::<f64>::zeros();
    for i in 0..xpts.len() {
        let p = xpts[i];
        xd[(0, 0)] += dn_dxi[i] * p.x;
        xd[(0, 1)] += dn_dxi[i] * p.y;
        xd[(0, 2)] += dn_dxi[i] * p.z;
        xd[(1, 0)] += dn_deta[i] * p.x;
        xd[(1, 1)] += dn_deta[i] * p.y;
        xd[(1, 2)] += dn_deta[i] * p.z;
        xd[(2, 0)] += dn_dzeta[i] * p.x;
        xd[(2, 1)] += dn_dzeta[i] * p.y;
        xd[(2, 2)] += dn_dzeta[i] * p.z;
    }

    let det_j = xd.determinant();
    if det_j <= 0.0 {
        return Err(ReconError::DegenerateGeometry { element, det_j });
    }
    let jinv = xd
        .try_inverse()
        .ok_or(ReconError::DegenerateGeometry { element, det_j })?;

    Ok(Jacobian3D { xd, jinv, det_j })
}

#[derive(Debug, Clone)]
pub struct Jacobian2DShell {
    pub xd: Matrix3<f64>,
    pub jinv: Matrix3<f64>,
    pub det_j: f64,
    /// In-plane local frame used by the least-squares rows in C4.
    pub d1: Vector3<f64>,
    pub d2: Vector3<f64>,
    pub normal: Vector3<f64>,
}

/// `jacobian` specialization for 2D-shell elements embedded in 3D space.
pub fn jacobian_2d_shell(
    element: i32,
    xpts: &[Point3<f64>],
    dn_da: &[f64],
    dn_db: &[f64],
) -> Result<Jacobian2DShell> {
    let mut xd0 = Vector3::<f64>::zeros();
    let mut xd1 = Vector3::<f64>::zeros();
    for i in 0..xpts.len() {
        let p = xpts[i].coords;
        xd0 += dn_da[i] * p;
        xd1 += dn_db[i] * p;
    }

    let normal_raw = xd0.cross(&xd1);
    let normal_norm = normal_raw.norm();
    if normal_norm <= 0.0 {
        return Err(ReconError::DegenerateGeometry {
            element,
            det_j: 0.0,
        });
    }
    let normal = normal_raw / normal_norm;

    let mut xd = Matrix3::<f64>::zeros();
    xd.set_row(0, &xd0.transpose());
    xd.set_row(1, &xd1.transpose());
    xd.set_row(2, &normal.transpose());

    let det_j = xd.determinant();
    if det_j <= 0.0 {
        return Err(ReconError::DegenerateGeometry { element, det_j });
    }
    let jinv = xd
        .try_inverse()
        .ok_or(ReconError::DegenerateGeometry { element, det_j })?;

    let d1 = xd0 / xd0.norm();
    let d2 = normal.cross(&d1);

    Ok(Jacobian2DShell {
        xd,
        jinv,
        det_j,
        d1,
        d2,
        normal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn unit_cube_jacobian_is_half_identity() {
        // Reference element [-1,1]^3 mapped affinely to [0,1]^3: dx/dxi = 0.5 I.
        let xpts = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(0.0, 1.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
        ];
        // Trilinear shape derivatives at the centroid (xi=eta=zeta=0).
        let (n_count, dxi, deta, dzeta) = crate::lagrange::tensor_basis_3d(&[-1.0, 1.0], 0.0, 0.0, 0.0);
        assert_eq!(n_count.len(), 8);
        let jac = jacobian_3d(1, &xpts, &dxi, &deta, &dzeta).unwrap();
        assert_relative_eq!(jac.det_j, 0.125, epsilon = 1e-10);
        assert_relative_eq!(jac.jinv[(0, 0)], 2.0, epsilon = 1e-10);
    }

    #[test]
    fn degenerate_element_is_reported_not_fatal_to_caller() {
        let xpts = vec![Point3::new(0.0, 0.0, 0.0); 8];
        let (_, dxi, deta, dzeta) = crate::lagrange::tensor_basis_3d(&[-1.0, 1.0], 0.0, 0.0, 0.0);
        let result = jacobian_3d(2, &xpts, &dxi, &deta, &dzeta);
        assert!(matches!(result, Err(ReconError::DegenerateGeometry { element: 2, .. })));
    }
}
