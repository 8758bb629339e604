//! MA invertibility correction by reciprocal-root reflection.
//!
//! A root rho of theta(z) inside the unit circle is replaced by 1/conj(rho).
//! The spectral density changes only by the constant |rho|^2, which the
//! concentrated innovation variance absorbs, so the likelihood is unchanged.

use nalgebra::Complex;
use tracing::debug;

use crate::error::{ArimaError, Result};
use crate::params::ArimaParams;
use crate::polynomial::poly_roots;
use crate::types::ModelSpec;

/// Roots closer to the unit circle than this are left alone.
const UNIT_CIRCLE_TOL: f64 = 1e-9;

/// Reflect the inside-circle roots of `1 + c_1 z + ... + c_q z^q`.
///
/// Returns `Ok(None)` when the polynomial is already invertible.
pub fn reflect_ma_roots(coeffs: &[f64]) -> Result<Option<Vec<f64>>> {
    if coeffs.is_empty() {
        return Ok(None);
    }
    let mut poly = Vec::with_capacity(coeffs.len() + 1);
    poly.push(1.0);
    poly.extend_from_slice(coeffs);

    let roots = poly_roots(&poly)
        .map_err(|_| ArimaError::MaOutOfBounds("root computation failed".into()))?;

    for r in &roots {
        if !r.re.is_finite() || !r.im.is_finite() || r.norm() < f64::EPSILON {
            return Err(ArimaError::MaOutOfBounds(format!(
                "degenerate root {} + {}i",
                r.re, r.im
            )));
        }
    }
    if roots.iter().all(|r| r.norm() >= 1.0 - UNIT_CIRCLE_TOL) {
        return Ok(None);
    }

    let reflected: Vec<Complex<f64>> = roots
        .iter()
        .map(|&r| {
            if r.norm() < 1.0 - UNIT_CIRCLE_TOL {
                Complex::new(1.0, 0.0) / r.conj()
            } else {
                r
            }
        })
        .collect();

    // Rebuild prod (1 - z/rho) with unit constant term.
    let mut expanded = vec![Complex::new(1.0, 0.0)];
    for rho in &reflected {
        let factor = -Complex::new(1.0, 0.0) / rho;
        let mut next = vec![Complex::new(0.0, 0.0); expanded.len() + 1];
        for (i, &c) in expanded.iter().enumerate() {
            next[i] += c;
            next[i + 1] += c * factor;
        }
        expanded = next;
    }

    let mut out = vec![0.0; coeffs.len()];
    for (slot, c) in out.iter_mut().zip(expanded.iter().skip(1)) {
        *slot = c.re;
    }
    if out.iter().any(|c| !c.is_finite()) {
        return Err(ArimaError::MaOutOfBounds(
            "reflected polynomial is not finite".into(),
        ));
    }
    Ok(Some(out))
}

/// Excluded lags must stay within this of zero after reflection.
const EXCLUDED_LAG_TOL: f64 = 1e-10;

/// Apply the correction to both MA polynomials in place.
///
/// With excluded MA lags the full-length polynomial is reflected, and the
/// result is kept only when the excluded lags stay at zero. Returns true
/// when any coefficient changed.
pub fn enforce_invertibility(params: &mut ArimaParams, spec: &ModelSpec) -> Result<bool> {
    let mut changed = false;

    if spec.order.q > 0 {
        if spec.ma_mask.iter().all(|&m| m) {
            if let Some(fixed) = reflect_ma_roots(&params.ma)? {
                params.ma = fixed;
                changed = true;
            }
        } else if let Some(fixed) = reflect_ma_roots(&params.full_ma(spec))? {
            let fills_excluded = fixed
                .iter()
                .zip(spec.ma_mask.iter())
                .any(|(c, &m)| !m && c.abs() > EXCLUDED_LAG_TOL);
            if fills_excluded {
                debug!("MA reflection would fill excluded lags, leaving coefficients as given");
            } else {
                params.set_full_ma(&fixed, spec);
                changed = true;
            }
        }
    }

    if spec.order.qq > 0 {
        if let Some(fixed) = reflect_ma_roots(&params.sma)? {
            params.sma = fixed;
            changed = true;
        }
    }

    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArimaOrder;

    #[test]
    fn test_ma1_reflects_to_reciprocal() {
        // 1 + 2z has root -0.5; reflected root -2 gives 1 + 0.5z
        let fixed = reflect_ma_roots(&[2.0]).unwrap().unwrap();
        assert!((fixed[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_invertible_polynomial_untouched() {
        assert_eq!(reflect_ma_roots(&[0.4, 0.2]).unwrap(), None);
        assert_eq!(reflect_ma_roots(&[]).unwrap(), None);
    }

    #[test]
    fn test_ma2_mixed_roots() {
        // (1 + 2z)(1 + 0.25z) = 1 + 2.25z + 0.5z^2 -> (1 + 0.5z)(1 + 0.25z)
        let fixed = reflect_ma_roots(&[2.25, 0.5]).unwrap().unwrap();
        assert!((fixed[0] - 0.75).abs() < 1e-10);
        assert!((fixed[1] - 0.125).abs() < 1e-10);
    }

    #[test]
    fn test_correction_is_idempotent() {
        let spec = ModelSpec::new(ArimaOrder::new(0, 0, 2, 0, 0, 1, 4)).with_intercept(false);
        let mut once = ArimaParams::from_flat(&[2.5, 1.0, 1.8], &spec).unwrap();
        assert!(enforce_invertibility(&mut once, &spec).unwrap());

        let mut twice = once.clone();
        let changed = enforce_invertibility(&mut twice, &spec).unwrap();
        assert!(!changed);
        assert_eq!(once, twice);

        let ma = reflect_ma_roots(&once.ma).unwrap();
        assert!(ma.is_none());
    }

    #[test]
    fn test_complex_pair_reflection_stays_real() {
        // roots of 1 + 0z + 4z^2 are +-0.5i
        let fixed = reflect_ma_roots(&[0.0, 4.0]).unwrap().unwrap();
        assert!(fixed[0].abs() < 1e-12);
        assert!((fixed[1] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_masked_ma_reflected_when_excluded_lags_stay_zero() {
        // 1 + 4z^2 -> 1 + 0.25z^2: lag 1 stays excluded
        let spec = ModelSpec::new(ArimaOrder::arma(0, 2))
            .with_intercept(false)
            .with_ma_lags(&[2]);
        let mut params = ArimaParams::from_flat(&[4.0], &spec).unwrap();
        assert!(enforce_invertibility(&mut params, &spec).unwrap());
        assert_eq!(params.ma.len(), 1);
        assert!((params.ma[0] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_masked_ma_kept_when_reflection_fills_excluded_lag() {
        // 1 + 2z + 0.5z^3 reflects to a polynomial with a nonzero z^2 term
        let spec = ModelSpec::new(ArimaOrder::arma(0, 3))
            .with_intercept(false)
            .with_ma_lags(&[1, 3]);
        let mut params = ArimaParams::from_flat(&[2.0, 0.5], &spec).unwrap();
        assert!(!enforce_invertibility(&mut params, &spec).unwrap());
        assert_eq!(params.ma, vec![2.0, 0.5]);
    }
}
