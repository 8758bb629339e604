use nalgebra::{DMatrix, DVector};

use crate::data::WorkingSample;
use crate::error::{ArimaError, Result};
use crate::state_space::StateSpace;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Output of one filter pass.
#[derive(Debug, Clone)]
pub struct FilterOutput {
    /// Exact Gaussian log-likelihood with the innovation variance concentrated out.
    pub loglike: f64,
    /// Concentrated innovation variance: sum(e_t^2 / f_t) / n_valid.
    pub sigma2: f64,
    /// One-step prediction errors e_t; NaN where the observation is missing.
    pub innovations: Vec<f64>,
    /// Scale-free prediction error variances f_t; NaN where missing.
    pub variances: Vec<f64>,
    pub n_valid: usize,
    /// Period from which the gain was held fixed, if the filter reached steady state.
    pub steady_from: Option<usize>,
}

impl FilterOutput {
    /// Log-likelihood divided by the number of valid observations.
    pub fn average_loglike(&self) -> f64 {
        self.loglike / self.n_valid as f64
    }

    /// Per-period log-density terms at a fixed innovation variance; zero at missing periods.
    ///
    /// At `sigma2 = self.sigma2` they sum to `self.loglike`.
    pub fn contributions(&self, sigma2: f64) -> Vec<f64> {
        self.innovations
            .iter()
            .zip(self.variances.iter())
            .map(|(&e, &f)| {
                if e.is_finite() {
                    let v = sigma2 * f;
                    -0.5 * (LN_2PI + v.ln()) - 0.5 * e * e / v
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// e_t / sqrt(sigma2 * f_t); NaN where missing.
    pub fn standardized_residuals(&self) -> Vec<f64> {
        self.innovations
            .iter()
            .zip(self.variances.iter())
            .map(|(&e, &f)| e / (self.sigma2 * f).sqrt())
            .collect()
    }
}

/// Run the Kalman filter over the working sample.
///
/// Per period: OBSERVE (e_t = y_t - A'x_t - H'a, f_t = H'PH), UPDATE
/// (Joseph form), PREDICT (a = Fa + l A'x_t, P = FPF' + Q). Missing periods
/// skip OBSERVE/UPDATE. Once the predicted covariance stops moving by more
/// than `steady_tol`, the gain is frozen until the next missing period.
///
/// A non-positive or non-finite f_t fails the pass with
/// `NonPositiveVariance`; callers treat that as a rejected trial point.
///
///   sigma2_hat = (1/n) * sum(e_t^2 / f_t)
///   loglike = -n/2 * ln(2pi) - n/2 * ln(sigma2_hat) - n/2 - 0.5 * sum(ln f_t)
pub fn kalman_filter(ss: &StateSpace, sample: &WorkingSample, steady_tol: f64) -> Result<FilterOutput> {
    if sample.is_empty() {
        return Err(ArimaError::DataError("empty sample".into()));
    }
    let n = sample.len();
    let k = ss.dimension();
    let (s0, p0) = ss.initial_state();

    let mut a: DVector<f64> = s0.clone();
    let mut p: DMatrix<f64> = p0.clone();

    let f_mat = &ss.transition;
    let h = &ss.design;
    let q = &ss.state_cov;
    let eye = DMatrix::<f64>::identity(k, k);
    let levels = ss.is_levels_form();

    let mut innovations = Vec::with_capacity(n);
    let mut variances = Vec::with_capacity(n);
    let mut sum_log_f = 0.0;
    let mut sum_e2_f = 0.0;
    let mut n_valid = 0usize;

    let mut steady: Option<(f64, DVector<f64>)> = None;
    let mut steady_from = None;

    for t in 0..n {
        let xb = ss.regression_mean(&sample.regressors[t]);
        let mut gain_this_step: Option<(f64, DVector<f64>)> = None;
        let p_pred = if steady.is_none() && !sample.missing[t] {
            Some(p.clone())
        } else {
            None
        };

        if sample.missing[t] {
            innovations.push(f64::NAN);
            variances.push(f64::NAN);
            steady = None;
        } else {
            let e = sample.obs[t] - xb - h.dot(&a);
            let f_t = match &steady {
                Some((f_t, gain)) => {
                    a.axpy(e, gain, 1.0);
                    *f_t
                }
                None => {
                    let ph = &p * h;
                    let f_t = h.dot(&ph);
                    if !(f_t.is_finite() && f_t > 0.0) {
                        return Err(ArimaError::NonPositiveVariance { t });
                    }
                    let gain = ph / f_t;
                    a.axpy(e, &gain, 1.0);
                    let i_kh = &eye - &gain * h.transpose();
                    p = &i_kh * &p * i_kh.transpose();
                    gain_this_step = Some((f_t, gain));
                    f_t
                }
            };

            innovations.push(e);
            variances.push(f_t);
            sum_log_f += f_t.ln();
            sum_e2_f += e * e / f_t;
            n_valid += 1;
        }

        // Predict
        a = f_mat * &a;
        if levels {
            a.axpy(xb, &ss.intercept_loading, 1.0);
        }
        if steady.is_none() {
            let p_next = f_mat * &p * f_mat.transpose() + q;
            if let (Some(step), Some(prev_pred)) = (gain_this_step, p_pred) {
                if (&p_next - &prev_pred).amax() < steady_tol {
                    steady = Some(step);
                    steady_from.get_or_insert(t + 1);
                }
            }
            p = p_next;
        }
    }

    if n_valid == 0 {
        return Err(ArimaError::DataError("no valid observations in sample".into()));
    }

    let nv = n_valid as f64;
    let sigma2 = sum_e2_f / nv;
    let sigma2_safe = sigma2.max(1e-300);
    let loglike = -0.5 * nv * LN_2PI - 0.5 * nv * sigma2_safe.ln() - 0.5 * nv - 0.5 * sum_log_f;

    Ok(FilterOutput {
        loglike,
        sigma2,
        innovations,
        variances,
        n_valid,
        steady_from,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ArimaParams;
    use crate::types::{ArimaOrder, ModelSpec};

    fn build(spec: &ModelSpec, y: &[f64], flat: &[f64]) -> (StateSpace, WorkingSample) {
        let sample = WorkingSample::build(y, None, spec, false).unwrap();
        let mut ss = StateSpace::new(spec, &sample, 4).unwrap();
        ss.rewrite(&ArimaParams::from_flat(flat, spec).unwrap(), spec)
            .unwrap();
        (ss, sample)
    }

    #[test]
    fn test_innovations_length_and_contributions_sum() {
        let y: Vec<f64> = (0..50).map(|t| ((t * 7 % 11) as f64) - 5.0).collect();
        let spec = ModelSpec::new(ArimaOrder::arma(1, 1)).with_intercept(false);
        let (ss, sample) = build(&spec, &y, &[0.4, 0.2]);
        let out = kalman_filter(&ss, &sample, 1e-12).unwrap();
        assert_eq!(out.innovations.len(), 50);
        assert_eq!(out.n_valid, 50);
        let total: f64 = out.contributions(out.sigma2).iter().sum();
        assert!((total - out.loglike).abs() < 1e-8 * out.loglike.abs());
    }

    #[test]
    fn test_steady_state_matches_full_recursion() {
        let y: Vec<f64> = (0..120).map(|t| (t as f64 * 0.37).sin() * 2.0).collect();
        let spec = ModelSpec::new(ArimaOrder::arma(2, 1)).with_intercept(false);
        let (ss, sample) = build(&spec, &y, &[0.5, -0.2, 0.3]);
        let fast = kalman_filter(&ss, &sample, 1e-12).unwrap();
        let full = kalman_filter(&ss, &sample, 0.0).unwrap();
        assert!(fast.steady_from.is_some());
        assert!(full.steady_from.is_none());
        assert!((fast.loglike - full.loglike).abs() < 1e-9);
        assert!((fast.sigma2 - full.sigma2).abs() < 1e-10);
    }

    #[test]
    fn test_ar1_gap_closed_form() {
        let phi: f64 = 0.6;
        let mut y = vec![0.3, -0.8, 1.1, 0.4, -0.2, 0.9, 1.5, -0.6];
        y[3] = f64::NAN;
        let spec = ModelSpec::new(ArimaOrder::arma(1, 0))
            .with_intercept(false)
            .with_missing(true);
        let (ss, sample) = build(&spec, &y, &[phi]);
        let out = kalman_filter(&ss, &sample, 1e-12).unwrap();

        let mut s = (1.0 - phi * phi) * y[0] * y[0];
        for t in 1..y.len() {
            if t == 3 {
                continue;
            }
            if t == 4 {
                let e = y[4] - phi * phi * y[2];
                s += e * e / (1.0 + phi * phi);
            } else {
                let e = y[t] - phi * y[t - 1];
                s += e * e;
            }
        }
        let n = 7.0;
        let sum_log_f = -(1.0 - phi * phi).ln() + (1.0 + phi * phi).ln();
        let sigma2 = s / n;
        let expected = -0.5 * n * (LN_2PI + sigma2.ln() + 1.0) - 0.5 * sum_log_f;

        assert_eq!(out.n_valid, 7);
        assert!(out.innovations[3].is_nan());
        assert!((out.variances[4] - (1.0 + phi * phi)).abs() < 1e-12);
        assert!((out.loglike - expected).abs() < 1e-10);
    }

    #[test]
    fn test_zero_design_fails_with_nonpositive_variance() {
        let y = vec![1.0, 2.0, 0.5, -1.0];
        let spec = ModelSpec::new(ArimaOrder::arma(1, 0)).with_intercept(false);
        let (mut ss, sample) = build(&spec, &y, &[0.5]);
        ss.design.fill(0.0);
        let err = kalman_filter(&ss, &sample, 1e-12).unwrap_err();
        assert_eq!(err, ArimaError::NonPositiveVariance { t: 0 });
    }

    #[test]
    fn test_empty_sample_rejected() {
        let spec = ModelSpec::new(ArimaOrder::arma(1, 0)).with_intercept(false);
        let (ss, mut sample) = build(&spec, &[1.0, 2.0, 0.5], &[0.5]);
        sample.obs.clear();
        sample.missing.clear();
        assert!(sample.is_empty());
        let err = kalman_filter(&ss, &sample, 1e-12).unwrap_err();
        assert_eq!(err, ArimaError::DataError("empty sample".into()));
    }
}
