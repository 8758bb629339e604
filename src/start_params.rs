//! Starting coefficients for the likelihood search.
//!
//! Works on the stationary (differenced, internally scaled) series:
//! 1. Regression coefficients by least squares on `[1, x_t]`
//! 2. AR coefficients by Burg, falling back to Yule-Walker
//! 3. MA coefficients from AR residuals by the innovations algorithm
//! 4. Seasonal terms from autocovariances at seasonal lags
//!
//! Excluded lags are dropped, and the AR part is shrunk toward zero until it
//! is stationary, so the search always starts from a defined likelihood.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::data::WorkingSample;
use crate::error::{ArimaError, Result};
use crate::params::ArimaParams;
use crate::polynomial::{differencing_poly, poly_roots, reduced_ar};
use crate::transform::levinson_step;
use crate::types::ModelSpec;

/// Sample autocovariance at lag k (divisor n).
fn autocovariance(y: &[f64], k: usize) -> f64 {
    let n = y.len();
    if k >= n {
        return 0.0;
    }
    let mean = y.iter().sum::<f64>() / n as f64;
    (0..n - k)
        .map(|i| (y[i] - mean) * (y[i + k] - mean))
        .sum::<f64>()
        / n as f64
}

/// AR coefficients by Burg's method.
///
/// Minimizes forward plus backward prediction error directly on the data; every
/// reflection coefficient has modulus below one, so the fit is stationary.
fn burg_ar(y: &[f64], p: usize) -> Option<Vec<f64>> {
    if p == 0 {
        return Some(vec![]);
    }
    let n = y.len();
    if n <= p {
        return None;
    }

    let mean = y.iter().sum::<f64>() / n as f64;
    let mut ef: Vec<f64> = y.iter().map(|&v| v - mean).collect();
    let mut eb = ef.clone();
    let mut a = vec![0.0; p];

    for k in 0..p {
        let (num, den) = ((k + 1)..n).fold((0.0, 0.0), |(num, den), t| {
            (
                num + ef[t] * eb[t - 1],
                den + ef[t] * ef[t] + eb[t - 1] * eb[t - 1],
            )
        });
        if den.abs() < 1e-15 {
            return None;
        }
        let refl = 2.0 * num / den;
        if refl.abs() >= 1.0 {
            return None;
        }
        levinson_step(&mut a, k, refl);

        // backwards so eb[t - 1] is still the previous stage's value
        for t in ((k + 1)..n).rev() {
            let f = ef[t];
            ef[t] = f - refl * eb[t - 1];
            eb[t] = eb[t - 1] - refl * f;
        }
    }
    Some(a)
}

/// Yule-Walker solve by Levinson-Durbin from gamma(0), ..., gamma(p).
///
/// The gammas may be taken at seasonal lags (gamma[k] at lag k*s).
fn yule_walker_from_acov(gammas: &[f64], p: usize) -> Option<Vec<f64>> {
    if p == 0 {
        return Some(vec![]);
    }
    if gammas.len() <= p || gammas[0].abs() < 1e-15 {
        return None;
    }
    let mut phi = vec![0.0; p];
    let mut var = gammas[0];
    for k in 0..p {
        if var.abs() < 1e-15 {
            return None;
        }
        let num = gammas[k + 1] - (0..k).map(|j| phi[j] * gammas[k - j]).sum::<f64>();
        let refl = num / var;
        levinson_step(&mut phi, k, refl);
        var *= 1.0 - refl * refl;
    }
    Some(phi)
}

fn yule_walker(y: &[f64], p: usize) -> Option<Vec<f64>> {
    if y.len() <= p {
        return None;
    }
    let gammas: Vec<f64> = (0..=p).map(|k| autocovariance(y, k)).collect();
    yule_walker_from_acov(&gammas, p)
}

/// MA(m) coefficients from gamma(0), ..., gamma(m) by the innovations
/// algorithm, clamped to (-0.99, 0.99).
fn innovations_ma(gamma: &[f64], m: usize) -> Vec<f64> {
    if m == 0 || gamma.len() <= m || gamma[0].abs() < 1e-15 {
        return vec![0.0; m];
    }
    // theta[i][i - 1 - k] is the weight of innovation k in the step-i predictor
    let mut theta = vec![vec![0.0; m]; m + 1];
    let mut v = vec![0.0; m + 1];
    v[0] = gamma[0];

    for i in 1..=m {
        for k in 0..i {
            let mut sum = gamma[i - k];
            for j in 0..k {
                sum -= theta[k][k - 1 - j] * theta[i][i - 1 - j] * v[j];
            }
            theta[i][i - 1 - k] = if v[k].abs() > 1e-15 { sum / v[k] } else { 0.0 };
        }
        v[i] = (gamma[0] - (0..i).map(|j| theta[i][i - 1 - j].powi(2) * v[j]).sum::<f64>()).max(1e-15);
    }
    theta[m].iter().map(|c| c.clamp(-0.99, 0.99)).collect()
}

fn estimate_ma_from_residuals(residuals: &[f64], q: usize) -> Vec<f64> {
    if residuals.len() <= q {
        return vec![0.0; q];
    }
    let gamma: Vec<f64> = (0..=q).map(|k| autocovariance(residuals, k)).collect();
    innovations_ma(&gamma, q)
}

/// Seasonal MA from autocovariances at lags 0, s, ..., Q*s of the full series.
fn estimate_seasonal_ma(residuals: &[f64], qq: usize, s: usize) -> Vec<f64> {
    if s == 0 || residuals.len() <= qq * s {
        return vec![0.0; qq];
    }
    let gamma: Vec<f64> = (0..=qq).map(|k| autocovariance(residuals, k * s)).collect();
    innovations_ma(&gamma, qq)
}

/// Residuals of y_t - sum_j c_j y_{t - (j+1)*stride}.
fn lag_residuals(y: &[f64], coeffs: &[f64], stride: usize) -> Vec<f64> {
    let start = coeffs.len() * stride;
    if coeffs.is_empty() || stride == 0 {
        return y.to_vec();
    }
    if y.len() <= start {
        return vec![];
    }
    (start..y.len())
        .map(|t| {
            y[t] - coeffs
                .iter()
                .enumerate()
                .map(|(j, c)| c * y[t - (j + 1) * stride])
                .sum::<f64>()
        })
        .collect()
}

/// Per-regressor slope cov(y, x_j) / var(x_j); used when the joint
/// least-squares system is singular.
fn estimate_exog_coeffs(endog: &[f64], exog: &[Vec<f64>]) -> Vec<f64> {
    let n = endog.len();
    if n == 0 {
        return vec![0.0; exog.len()];
    }
    let y_mean = endog.iter().sum::<f64>() / n as f64;
    exog.iter()
        .map(|col| {
            let x_mean = col.iter().sum::<f64>() / n as f64;
            let (cov, var_x) = col.iter().zip(endog.iter()).fold((0.0, 0.0), |(c, v), (x, y)| {
                let dx = x - x_mean;
                (c + (y - y_mean) * dx, v + dx * dx)
            });
            if var_x.abs() < 1e-15 {
                0.0
            } else {
                cov / var_x
            }
        })
        .collect()
}

/// Regression of `w` on the rows of `x` by normal equations.
///
/// Returns `None` when the cross-product matrix is singular.
fn least_squares(w: &[f64], x: &[Vec<f64>]) -> Option<Vec<f64>> {
    let n = w.len();
    let k = x.first().map_or(0, |r| r.len());
    if k == 0 || n <= k {
        return None;
    }
    let xm = DMatrix::from_fn(n, k, |t, j| x[t][j]);
    let wv = DVector::from_column_slice(w);
    let xtx = xm.transpose() * &xm;
    let xtw = xm.transpose() * wv;
    xtx.cholesky().map(|c| c.solve(&xtw).iter().copied().collect())
}

/// Stationary series the starting values are computed from, with the regressor
/// rows that go with it. Periods that are missing (or whose difference touches
/// a missing level) are dropped.
fn stationary_series(sample: &WorkingSample, spec: &ModelSpec) -> (Vec<f64>, Vec<Vec<f64>>) {
    let w: Vec<f64> = if sample.levels_form {
        let order = &spec.order;
        let delta = differencing_poly(order.d, order.dd, order.s);
        let mut levels = sample.presample.clone();
        levels.extend_from_slice(&sample.obs);
        let offset = sample.presample.len();
        (0..sample.len())
            .map(|t| {
                delta
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| **c != 0.0)
                    .map(|(j, c)| c * levels[offset + t - j])
                    .sum()
            })
            .collect()
    } else {
        sample.obs.clone()
    };

    let mut series = Vec::with_capacity(w.len());
    let mut rows = Vec::with_capacity(w.len());
    for (t, v) in w.iter().enumerate() {
        if v.is_finite() {
            series.push(*v);
            rows.push(sample.regressors[t].clone());
        }
    }
    (series, rows)
}

fn keep_included(full: &[f64], mask: &[bool]) -> Vec<f64> {
    full.iter()
        .zip(mask.iter())
        .filter(|(_, m)| **m)
        .map(|(&c, _)| c)
        .collect()
}

fn is_stationary(params: &ArimaParams, spec: &ModelSpec) -> bool {
    match poly_roots(&reduced_ar(params, spec)) {
        Ok(roots) => roots.iter().all(|r| r.norm() > 1.0 + 1e-6),
        Err(_) => false,
    }
}

/// Compute starting coefficients in the internal scale of `sample`.
///
/// Returns a flat vector in the layout of `ArimaParams::from_flat`:
/// `[intercept? | ar(included) | sar | ma(included) | sma | exog]`
pub fn compute_start_params(sample: &WorkingSample, spec: &ModelSpec) -> Result<Vec<f64>> {
    let order = &spec.order;
    let (p, q, pp, qq, s) = (order.p, order.q, order.pp, order.qq, order.s);
    let k = spec.n_exog();

    let (w, rows) = stationary_series(sample, spec);

    let mut params = ArimaParams {
        intercept: spec.intercept.then_some(0.0),
        ar: vec![0.0; spec.n_ar()],
        sar: vec![0.0; pp],
        ma: vec![0.0; spec.n_ma()],
        sma: vec![0.0; qq],
        exog: vec![0.0; k],
    };

    if w.len() < 3 {
        debug!(n = w.len(), "series too short for start values, using zeros");
        return Ok(params.to_flat());
    }

    // Regression part: intercept column only when the model has one
    let design: Vec<Vec<f64>> = rows
        .iter()
        .map(|r| {
            if spec.intercept {
                r.clone()
            } else {
                r[1..].to_vec()
            }
        })
        .collect();
    let beta = if design.first().map_or(0, |r| r.len()) > 0 {
        least_squares(&w, &design).unwrap_or_else(|| {
            let mut b = Vec::with_capacity(k + 1);
            if spec.intercept {
                b.push(w.iter().sum::<f64>() / w.len() as f64);
            }
            let cols: Vec<Vec<f64>> = (1..=k).map(|j| rows.iter().map(|r| r[j]).collect()).collect();
            b.extend(estimate_exog_coeffs(&w, &cols));
            b
        })
    } else {
        Vec::new()
    };
    let mut beta_iter = beta.iter().copied();
    if spec.intercept {
        params.intercept = beta_iter.next();
    }
    params.exog = beta_iter.collect();
    if params.exog.len() != k {
        return Err(ArimaError::DataError(format!(
            "failed to build start values: expected {} regression coefficients, got {}",
            k,
            params.exog.len()
        )));
    }

    let design_coeffs = params.design_coeffs();
    let u: Vec<f64> = w
        .iter()
        .zip(rows.iter())
        .map(|(v, r)| v - r.iter().zip(design_coeffs.iter()).map(|(a, b)| a * b).sum::<f64>())
        .collect();

    // AR coefficients (Burg primary, Yule-Walker fallback)
    let ar_full = burg_ar(&u, p)
        .or_else(|| yule_walker(&u, p))
        .unwrap_or_else(|| vec![0.0; p]);
    params.ar = keep_included(&ar_full, &spec.ar_mask);

    // MA coefficients from AR residuals
    let residuals = lag_residuals(&u, &params.full_ar(spec), 1);
    let ma_full = estimate_ma_from_residuals(&residuals, q);
    params.ma = keep_included(&ma_full, &spec.ma_mask);

    // Seasonal AR via Yule-Walker on autocovariances at lags 0, s, ..., P*s
    if pp > 0 && s > 0 && u.len() > pp * s {
        let seasonal_gammas: Vec<f64> = (0..=pp).map(|j| autocovariance(&u, j * s)).collect();
        params.sar = yule_walker_from_acov(&seasonal_gammas, pp).unwrap_or_else(|| vec![0.0; pp]);
    }

    if qq > 0 && s > 0 {
        let sar_resid = if pp > 0 {
            lag_residuals(&residuals, &params.sar, s)
        } else {
            residuals
        };
        params.sma = estimate_seasonal_ma(&sar_resid, qq, s);
    }

    let mut shrink = 0;
    while !is_stationary(&params, spec) {
        if shrink == 20 {
            params.ar.iter_mut().for_each(|c| *c = 0.0);
            params.sar.iter_mut().for_each(|c| *c = 0.0);
            break;
        }
        params.ar.iter_mut().for_each(|c| *c *= 0.8);
        params.sar.iter_mut().for_each(|c| *c *= 0.8);
        shrink += 1;
    }
    if shrink > 0 {
        debug!(shrink, "shrunk AR start values toward stationarity");
    }

    let flat = params.to_flat();
    if flat.iter().any(|c| !c.is_finite()) {
        return Err(ArimaError::DataError(format!(
            "failed to build start values: non-finite entries {:?}",
            flat
        )));
    }
    Ok(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::simulate_arima;
    use crate::types::ArimaOrder;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn sample_for(y: &[f64], spec: &ModelSpec) -> WorkingSample {
        WorkingSample::build(y, None, spec, false).unwrap()
    }

    fn noise(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.sample::<f64, _>(StandardNormal)).collect()
    }

    fn ar_path(phi: &[f64], n: usize, seed: u64) -> Vec<f64> {
        let spec = ModelSpec::new(ArimaOrder::arma(phi.len(), 0)).with_intercept(false);
        let mut rng = StdRng::seed_from_u64(seed);
        simulate_arima(&spec, phi, 1.0, n, 100, None, &mut rng).unwrap()
    }

    #[test]
    fn test_burg_ar1() {
        let y = ar_path(&[0.7], 500, 42);
        let ar = burg_ar(&y, 1).unwrap();
        assert!((ar[0] - 0.7).abs() < 0.15, "Burg AR(1) estimate too far: {}", ar[0]);
    }

    #[test]
    fn test_burg_high_order_near_unit_root() {
        let y = ar_path(&[0.95], 200, 123);
        assert!(burg_ar(&y, 8).is_some());
    }

    #[test]
    fn test_yule_walker_matches_burg_roughly() {
        let y = ar_path(&[0.5, -0.3], 2000, 9);
        let yw = yule_walker(&y, 2).unwrap();
        let bg = burg_ar(&y, 2).unwrap();
        for (a, b) in yw.iter().zip(bg.iter()) {
            assert!((a - b).abs() < 0.05);
        }
        assert!((yw[0] - 0.5).abs() < 0.1);
        assert!((yw[1] + 0.3).abs() < 0.1);
    }

    #[test]
    fn test_innovations_ma1_from_exact_acov() {
        // MA(1) with theta = 0.5: gamma0 = 1.25, gamma1 = 0.5; m = 1 gives gamma1/gamma0
        let ma = innovations_ma(&[1.25, 0.5], 1);
        assert!((ma[0] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_lag_residuals_seasonal_stride() {
        let y = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(lag_residuals(&y, &[1.0], 2), vec![2.0, 2.0, 2.0, 2.0]);
        assert_eq!(lag_residuals(&y, &[], 1), y);
    }

    #[test]
    fn test_start_params_length_ar1_with_intercept() {
        let spec = ModelSpec::new(ArimaOrder::arma(1, 0));
        let y: Vec<f64> = (0..100).map(|i| 3.0 + (i as f64).sin()).collect();
        let params = compute_start_params(&sample_for(&y, &spec), &spec).unwrap();
        assert_eq!(params.len(), 2); // const + ar(1)
        assert!((params[0] - 3.0).abs() < 0.2);
    }

    #[test]
    fn test_start_params_length_sarima() {
        let spec = ModelSpec::new(ArimaOrder::new(1, 1, 1, 1, 1, 1, 12)).with_intercept(false);
        let y: Vec<f64> = (0..300)
            .map(|i| (i as f64 * 0.1).sin() + (i as f64 * 0.01).cos())
            .collect();
        let params = compute_start_params(&sample_for(&y, &spec), &spec).unwrap();
        assert_eq!(params.len(), 4); // ar + sar + ma + sma
        assert!(params.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_masked_lags_are_dropped() {
        let spec = ModelSpec::new(ArimaOrder::arma(4, 0))
            .with_intercept(false)
            .with_ar_lags(&[1, 4]);
        let y = noise(300, 7);
        let params = compute_start_params(&sample_for(&y, &spec), &spec).unwrap();
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_fallback_short_series() {
        let spec = ModelSpec::new(ArimaOrder::arima(1, 1, 1)).with_intercept(false);
        let y = vec![1.0, 2.0, 4.0];
        let params = compute_start_params(&sample_for(&y, &spec), &spec).unwrap();
        assert_eq!(params, vec![0.0, 0.0]);
    }

    #[test]
    fn test_regression_start_recovers_slope() {
        let spec = ModelSpec::new(ArimaOrder::arma(0, 0)).with_regressors(&["x"]);
        let x: Vec<f64> = (0..200).map(|i| (i as f64 * 0.3).cos()).collect();
        let noise = noise(200, 11);
        let y: Vec<f64> = (0..200).map(|t| 1.5 + 2.0 * x[t] + 0.1 * noise[t]).collect();
        let cols = vec![x];
        let sample = WorkingSample::build(&y, Some(cols.as_slice()), &spec, false).unwrap();
        let params = compute_start_params(&sample, &spec).unwrap();
        assert!((params[0] - 1.5).abs() < 0.05);
        assert!((params[1] - 2.0).abs() < 0.05);
    }

    #[test]
    fn test_start_values_with_gaps_in_levels_form() {
        let spec = ModelSpec::new(ArimaOrder::arima(1, 1, 0))
            .with_intercept(false)
            .with_missing(true);
        let mut y: Vec<f64> = noise(200, 3)
            .iter()
            .scan(0.0, |acc, e| {
                *acc += e;
                Some(*acc)
            })
            .collect();
        y[50] = f64::NAN;
        y[120] = f64::NAN;
        let sample = sample_for(&y, &spec);
        assert!(sample.levels_form);
        let params = compute_start_params(&sample, &spec).unwrap();
        assert_eq!(params.len(), 1);
        assert!(params[0].abs() < 1.0);
    }

    #[test]
    fn test_start_values_are_stationary() {
        let spec = ModelSpec::new(ArimaOrder::arma(2, 0)).with_intercept(false);
        let y: Vec<f64> = (0..200).map(|i| (i as f64 * 0.05).sin()).collect();
        let flat = compute_start_params(&sample_for(&y, &spec), &spec).unwrap();
        let params = ArimaParams::from_flat(&flat, &spec).unwrap();
        assert!(is_stationary(&params, &spec));
    }
}
