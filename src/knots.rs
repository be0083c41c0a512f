//! Per-order interpolation knot and quadrature-weight tables (spec section 3).

use crate::error::{ReconError, Result};

/// Default interpolation knots for a supported mesh order. `knots[0] = -1`,
/// `knots[p-1] = 1` always. The two interior knots for p=4 are placed at the
/// Gauss-Lobatto points `+-1/sqrt(5)`; the spec only constrains the
/// endpoints, so this is this rendition's concrete choice.
pub fn default_knots(order: usize) -> Result<Vec<f64>> {
    match order {
        2 => Ok(vec![-1.0, 1.0]),
        3 => Ok(vec![-1.0, 0.0, 1.0]),
        4 => {
            let k = 1.0 / 5f64.sqrt();
            Ok(vec![-1.0, -k, k, 1.0])
        }
        _ => Err(ReconError::InvalidConfig(format!(
            "unsupported mesh order {order}"
        ))),
    }
}

/// Trapezoidal-style least-squares weights associated with each knot.
pub fn wvals(order: usize) -> Result<&'static [f64]> {
    match order {
        2 => Ok(&[1.0, 1.0]),
        3 => Ok(&[0.5, 1.0, 0.5]),
        4 => Ok(&[0.5, 1.0, 1.0, 0.5]),
        _ => Err(ReconError::InvalidConfig(format!(
            "unsupported mesh order {order}"
        ))),
    }
}
