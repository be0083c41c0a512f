//! Caller-supplied configuration.
//!
//! Replaces the ported source's static module-level step-size constants and
//! global search-tag statics with a plain struct scoped to the owning
//! functional object, per the ownership design notes.

/// Tunables for a reconstruction / goal-functional evaluation.
///
/// `ReconConfig::default()` has no KS weight set; callers that need a KS or
/// curvature aggregate must supply one via [`ReconConfig::with_ks_weight`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconConfig {
    ks_weight: Option<f64>,
    pub svd_tolerance: f64,
    pub fd_step: f64,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            ks_weight: None,
            svd_tolerance: -1.0,
            fd_step: 1e-6,
        }
    }
}

impl ReconConfig {
    pub fn with_ks_weight(mut self, k: f64) -> Self {
        self.ks_weight = Some(k);
        self
    }

    pub fn with_svd_tolerance(mut self, tol: f64) -> Self {
        self.svd_tolerance = tol;
        self
    }

    pub fn with_fd_step(mut self, step: f64) -> Self {
        self.fd_step = step;
        self
    }

    pub fn ks_weight(&self) -> crate::Result<f64> {
        self.ks_weight
            .ok_or_else(|| crate::ReconError::InvalidConfig("ks_weight not set".into()))
    }
}

/// Central finite-difference derivative, used by the KS and curvature
/// sensitivity regression tests to check the analytic adjoint chains.
pub fn central_difference<F: Fn(f64) -> f64>(f: F, x: f64, step: f64) -> f64 {
    (f(x + step) - f(x - step)) / (2.0 * step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_ks_weight() {
        let cfg = ReconConfig::default();
        assert!(cfg.ks_weight().is_err());
    }

    #[test]
    fn with_ks_weight_is_retrievable() {
        let cfg = ReconConfig::default().with_ks_weight(50.0);
        assert_eq!(cfg.ks_weight().unwrap(), 50.0);
    }

    #[test]
    fn central_difference_matches_known_derivative() {
        let d = central_difference(|x| x * x, 2.0, 1e-6);
        assert!((d - 4.0).abs() < 1e-6);
    }
}
