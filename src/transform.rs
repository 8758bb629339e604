//! Search-space reparameterization of the AR blocks.
//!
//! The optimizer moves over unconstrained values. Each value x maps to a
//! partial autocorrelation r = x / sqrt(1 + x^2) in (-1, 1), and the
//! Durbin-Levinson recursion turns those into AR coefficients, so every
//! search point is stationary. All other blocks pass through unchanged.
//!
//! A non-seasonal AR block with excluded lags is searched directly: the
//! partial-autocorrelation map does not keep excluded lags at zero.

use std::ops::Range;

use tracing::warn;

use crate::types::ModelSpec;

/// One Durbin-Levinson update: a[k] = refl, a[j] -= refl * a[k-1-j] for j < k.
pub(crate) fn levinson_step(a: &mut [f64], k: usize, refl: f64) {
    let prev: Vec<f64> = a[..k].to_vec();
    a[k] = refl;
    for j in 0..k {
        a[j] = prev[j] - refl * prev[k - 1 - j];
    }
}

/// Unconstrained values -> stationary AR coefficients.
pub fn constrain_stationary(unconstrained: &[f64]) -> Vec<f64> {
    let mut phi = vec![0.0; unconstrained.len()];
    for (k, &x) in unconstrained.iter().enumerate() {
        levinson_step(&mut phi, k, x / (1.0 + x * x).sqrt());
    }
    phi
}

/// Inverse of `constrain_stationary`; `None` when `phi` is not stationary.
pub fn unconstrain_stationary(phi: &[f64]) -> Option<Vec<f64>> {
    let n = phi.len();
    let mut a = phi.to_vec();
    let mut out = vec![0.0; n];
    for k in (0..n).rev() {
        let r = a[k];
        if !(r.abs() < 1.0) {
            return None;
        }
        let denom = 1.0 - r * r;
        out[k] = r / denom.sqrt();
        let prev: Vec<f64> = (0..k).map(|j| (a[j] + r * a[k - 1 - j]) / denom).collect();
        a[..k].copy_from_slice(&prev);
    }
    out.iter().all(|x| x.is_finite()).then_some(out)
}

/// Where the transformed blocks sit in the flat coefficient vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpace {
    ar: Option<Range<usize>>,
    sar: Option<Range<usize>>,
}

impl SearchSpace {
    pub fn new(spec: &ModelSpec) -> Self {
        let ar_start = usize::from(spec.intercept);
        let n_ar = spec.n_ar();
        let sar_start = ar_start + n_ar;
        let pp = spec.order.pp;
        Self {
            ar: (n_ar > 0 && spec.ar_mask.iter().all(|&m| m)).then(|| ar_start..ar_start + n_ar),
            sar: (pp > 0).then(|| sar_start..sar_start + pp),
        }
    }

    fn blocks(&self) -> impl Iterator<Item = &Range<usize>> {
        self.ar.iter().chain(self.sar.iter())
    }

    /// Search point -> model coefficients.
    pub fn to_coefficients(&self, x: &[f64]) -> Vec<f64> {
        let mut out = x.to_vec();
        for block in self.blocks() {
            let phi = constrain_stationary(&x[block.clone()]);
            out[block.clone()].copy_from_slice(&phi);
        }
        out
    }

    /// Model coefficients -> search point. A non-stationary block starts
    /// from zero.
    pub fn to_search(&self, coeffs: &[f64]) -> Vec<f64> {
        let mut out = coeffs.to_vec();
        for block in self.blocks() {
            match unconstrain_stationary(&coeffs[block.clone()]) {
                Some(u) => out[block.clone()].copy_from_slice(&u),
                None => {
                    warn!(block = ?block, "non-stationary start values, searching from zero");
                    out[block.clone()].iter_mut().for_each(|c| *c = 0.0);
                }
            }
        }
        out
    }
}
