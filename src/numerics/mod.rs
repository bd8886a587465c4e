pub mod solver;
pub mod sweep;
pub mod timing;

use nalgebra::{DMatrix, DVector};

pub enum ConvergenceMetric {
    L2Norm,
    MaxNorm,
}

/// Convergence test for the linear systems of one step.
pub struct Convergence {
    pub metric: ConvergenceMetric,
    /// A step converges once a residual is strictly below this limit.
    pub residual_lim: f64,
}

impl Convergence {
    pub fn new(residual_lim: f64) -> Self {
        Self {
            metric: ConvergenceMetric::L2Norm,
            residual_lim,
        }
    }

    pub fn norm(&self, vector: &DVector<f64>) -> f64 {
        match self.metric {
            ConvergenceMetric::L2Norm => vector.norm(),
            ConvergenceMetric::MaxNorm => vector.amax(),
        }
    }

    /// `|A x - b| / max(|b|, |A x|)`, zero for an all-zero system.
    pub fn residual(&self, a: &DMatrix<f64>, x: &DVector<f64>, b: &DVector<f64>) -> f64 {
        let ax = a * x;
        let r = self.norm(&(&ax - b));
        let scale = self.norm(b).max(self.norm(&ax));
        if scale > 0.0 { r / scale } else { r }
    }

    pub fn check(&self, residual: f64) -> bool {
        residual < self.residual_lim
    }
}
