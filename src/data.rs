//! Working sample: sample range, missing flags, regressor rows and scaling.

use crate::error::{ArimaError, Result};
use crate::params::ArimaParams;
use crate::polynomial::differencing_poly;
use crate::types::ModelSpec;

/// Affine rescaling applied to the dependent variable before optimization.
///
/// Internally the model sees `(y - shift) / scale`, so the intercept maps to
/// `(mu - shift) / scale` and regression coefficients to `beta / scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub shift: f64,
    pub scale: f64,
}

impl Scaling {
    pub fn identity() -> Self {
        Self {
            shift: 0.0,
            scale: 1.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.shift == 0.0 && self.scale == 1.0
    }

    /// Map user-scale coefficients into the internal scale.
    pub fn to_internal(&self, params: &ArimaParams) -> ArimaParams {
        let mut out = params.clone();
        out.intercept = params.intercept.map(|mu| (mu - self.shift) / self.scale);
        out.exog = params.exog.iter().map(|b| b / self.scale).collect();
        out
    }

    /// Map internal coefficients back to the scale of the data.
    pub fn to_external(&self, params: &ArimaParams) -> ArimaParams {
        let mut out = params.clone();
        out.intercept = params.intercept.map(|mu| mu * self.scale + self.shift);
        out.exog = params.exog.iter().map(|b| b * self.scale).collect();
        out
    }

    /// Log-likelihood of the unscaled data given the internal one.
    pub fn unscale_loglike(&self, loglike: f64, n_valid: usize) -> f64 {
        loglike - n_valid as f64 * self.scale.ln()
    }
}

/// Observations handed to the Kalman filter for one run.
#[derive(Debug, Clone)]
pub struct WorkingSample {
    /// First and last observation index (inclusive) in the caller's series.
    pub t1: usize,
    pub t2: usize,
    /// Filter input: the differenced series (plain form) or levels
    /// (levels form), internally scaled; NaN where missing.
    pub obs: Vec<f64>,
    /// Unscaled levels over the sample, for fitted values.
    pub levels: Vec<f64>,
    /// Rows `x_t = [1, x_1t, ..., x_kt]`.
    pub regressors: Vec<Vec<f64>>,
    pub missing: Vec<bool>,
    /// Scaled levels of the d + s*D observations preceding `t1` (levels form).
    pub presample: Vec<f64>,
    pub levels_form: bool,
    pub scaling: Scaling,
}

impl WorkingSample {
    /// Build the working sample from the full series.
    ///
    /// `exog` is column-major: `exog[j][t]` for regressor j at time t.
    /// The levels form is chosen when missing values are tolerated and the
    /// model differences; otherwise the series is differenced up front.
    pub fn build(
        y: &[f64],
        exog: Option<&[Vec<f64>]>,
        spec: &ModelSpec,
        standardize: bool,
    ) -> Result<Self> {
        let order = &spec.order;
        let n_diff = order.k_states_diff();
        let k = spec.n_exog();

        let exog_cols: &[Vec<f64>] = exog.unwrap_or(&[]);
        if exog_cols.len() != k {
            return Err(ArimaError::DataError(format!(
                "expected {} regressor columns, got {}",
                k,
                exog_cols.len()
            )));
        }
        for (j, col) in exog_cols.iter().enumerate() {
            if col.len() != y.len() {
                return Err(ArimaError::DataError(format!(
                    "regressor {} has {} rows but y has {} observations",
                    spec.regressors[j],
                    col.len(),
                    y.len()
                )));
            }
        }

        let (t1, t2) = resolve_sample(y, spec)?;
        if t1 < n_diff {
            return Err(ArimaError::DataError(format!(
                "sample start {} leaves fewer than {} presample observations for differencing",
                t1, n_diff
            )));
        }

        let has_missing = y[t1..=t2].iter().any(|v| !v.is_finite());
        if has_missing && !spec.allow_missing {
            return Err(ArimaError::DataError(
                "missing values inside the sample range".into(),
            ));
        }
        let levels_form = has_missing && n_diff > 0;

        if y[t1 - n_diff..t1].iter().any(|v| !v.is_finite()) {
            return Err(ArimaError::DataError(
                "missing values in the presample needed for differencing".into(),
            ));
        }

        let mut regressors = Vec::with_capacity(t2 - t1 + 1);
        for t in t1..=t2 {
            let mut row = Vec::with_capacity(k + 1);
            row.push(1.0);
            for col in exog_cols {
                if !col[t].is_finite() {
                    return Err(ArimaError::DataError(format!(
                        "non-finite regressor value at t={}",
                        t
                    )));
                }
                row.push(col[t]);
            }
            regressors.push(row);
        }

        let levels = y[t1..=t2].to_vec();
        let raw_obs: Vec<f64> = if levels_form || n_diff == 0 {
            levels.clone()
        } else {
            let delta = differencing_poly(order.d, order.dd, order.s);
            (t1..=t2)
                .map(|t| delta.iter().enumerate().map(|(j, c)| c * y[t - j]).sum())
                .collect()
        };
        let missing: Vec<bool> = raw_obs.iter().map(|v| !v.is_finite()).collect();
        if missing.iter().all(|&m| m) {
            return Err(ArimaError::DataError("no valid observations in sample".into()));
        }

        let scaling = if standardize {
            choose_scaling(&raw_obs, spec.intercept && n_diff == 0)
        } else {
            Scaling::identity()
        };

        let obs = raw_obs
            .iter()
            .map(|&v| {
                if v.is_finite() {
                    (v - scaling.shift) / scaling.scale
                } else {
                    f64::NAN
                }
            })
            .collect();
        let presample = if levels_form {
            y[t1 - n_diff..t1]
                .iter()
                .map(|v| v / scaling.scale)
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            t1,
            t2,
            obs,
            levels,
            regressors,
            missing,
            presample,
            levels_form,
            scaling,
        })
    }

    pub fn len(&self) -> usize {
        self.obs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obs.is_empty()
    }

    pub fn n_valid(&self) -> usize {
        self.missing.iter().filter(|&&m| !m).count()
    }
}

/// Explicit sample, or the span from the first to the last finite
/// observation shifted forward by the differencing presample.
fn resolve_sample(y: &[f64], spec: &ModelSpec) -> Result<(usize, usize)> {
    let n_diff = spec.order.k_states_diff();
    match spec.sample {
        Some((t1, t2)) => {
            if t1 > t2 {
                return Err(ArimaError::InvalidSpec(format!(
                    "sample start {} is after sample end {}",
                    t1, t2
                )));
            }
            if t2 >= y.len() {
                return Err(ArimaError::DataError(format!(
                    "sample end {} beyond series length {}",
                    t2,
                    y.len()
                )));
            }
            Ok((t1, t2))
        }
        None => {
            let first = y.iter().position(|v| v.is_finite());
            let last = y.iter().rposition(|v| v.is_finite());
            match (first, last) {
                (Some(f), Some(l)) if f + n_diff <= l => Ok((f + n_diff, l)),
                _ => Err(ArimaError::DataError(
                    "not enough observations for the differencing order".into(),
                )),
            }
        }
    }
}

fn choose_scaling(values: &[f64], center: bool) -> Scaling {
    let valid: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let n = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / n;
    let var = valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let sd = var.sqrt();
    Scaling {
        shift: if center { mean } else { 0.0 },
        scale: if sd.is_finite() && sd > 1e-12 { sd } else { 1.0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArimaOrder;

    #[test]
    fn test_plain_differenced_sample() {
        let y = vec![1.0, 3.0, 6.0, 10.0, 15.0];
        let spec = ModelSpec::new(ArimaOrder::arima(0, 1, 0)).with_intercept(false);
        let s = WorkingSample::build(&y, None, &spec, false).unwrap();
        assert_eq!((s.t1, s.t2), (1, 4));
        assert_eq!(s.obs, vec![2.0, 3.0, 4.0, 5.0]);
        assert!(!s.levels_form);
        assert_eq!(s.n_valid(), 4);
    }

    #[test]
    fn test_seasonal_difference_sample() {
        let y: Vec<f64> = (0..10).map(|t| (t * t) as f64).collect();
        let spec = ModelSpec::new(ArimaOrder::new(0, 1, 0, 0, 1, 0, 4)).with_intercept(false);
        let s = WorkingSample::build(&y, None, &spec, false).unwrap();
        assert_eq!(s.t1, 5);
        // (1-L)(1-L^4) t^2 = 8 for every t
        assert!(s.obs.iter().all(|&v| (v - 8.0).abs() < 1e-12));
    }

    #[test]
    fn test_missing_rejected_unless_allowed() {
        let y = vec![1.0, 2.0, f64::NAN, 4.0, 5.0];
        let spec = ModelSpec::new(ArimaOrder::arma(1, 0));
        assert!(matches!(
            WorkingSample::build(&y, None, &spec, true),
            Err(ArimaError::DataError(_))
        ));

        let spec = spec.with_missing(true);
        let s = WorkingSample::build(&y, None, &spec, true).unwrap();
        assert!(!s.levels_form);
        assert_eq!(s.missing, vec![false, false, true, false, false]);
        assert_eq!(s.n_valid(), 4);
    }

    #[test]
    fn test_missing_with_differencing_uses_levels_form() {
        let y = vec![1.0, 2.0, 4.0, f64::NAN, 9.0, 11.0];
        let spec = ModelSpec::new(ArimaOrder::arima(1, 1, 0)).with_missing(true);
        let s = WorkingSample::build(&y, None, &spec, false).unwrap();
        assert!(s.levels_form);
        assert_eq!(s.presample, vec![1.0]);
        assert_eq!(s.obs.len(), 5);
        assert!(s.missing[2]);
    }

    #[test]
    fn test_scaling_centers_only_without_differencing() {
        let y = vec![10.0, 12.0, 14.0, 12.0, 10.0, 8.0];
        let spec = ModelSpec::new(ArimaOrder::arma(1, 0));
        let s = WorkingSample::build(&y, None, &spec, true).unwrap();
        assert!((s.scaling.shift - 11.0).abs() < 1e-12);
        let mean: f64 = s.obs.iter().sum::<f64>() / s.obs.len() as f64;
        assert!(mean.abs() < 1e-12);

        let spec = ModelSpec::new(ArimaOrder::arima(1, 1, 0));
        let s = WorkingSample::build(&y, None, &spec, true).unwrap();
        assert_eq!(s.scaling.shift, 0.0);
    }

    #[test]
    fn test_scaling_parameter_roundtrip() {
        let spec = ModelSpec::new(ArimaOrder::arma(1, 0)).with_regressors(&["x"]);
        let params = ArimaParams::from_flat(&[5.0, 0.5, 2.0], &spec).unwrap();
        let scaling = Scaling {
            shift: 3.0,
            scale: 4.0,
        };
        let internal = scaling.to_internal(&params);
        assert_eq!(internal.intercept, Some(0.5));
        assert_eq!(internal.exog, vec![0.5]);
        assert_eq!(internal.ar, vec![0.5]);
        assert_eq!(scaling.to_external(&internal), params);
    }

    #[test]
    fn test_regressor_validation() {
        let y = vec![1.0, 2.0, 3.0, 4.0];
        let spec = ModelSpec::new(ArimaOrder::arma(1, 0)).with_regressors(&["x"]);
        let short = vec![vec![1.0, 2.0]];
        assert!(WorkingSample::build(&y, Some(&short), &spec, true).is_err());
        assert!(WorkingSample::build(&y, None, &spec, true).is_err());

        let x = vec![vec![0.5, 1.5, 2.5, 3.5]];
        let s = WorkingSample::build(&y, Some(&x), &spec, true).unwrap();
        assert_eq!(s.regressors[2], vec![1.0, 2.5]);
    }

    #[test]
    fn test_explicit_sample_range() {
        let y: Vec<f64> = (0..20).map(|t| t as f64).collect();
        let spec = ModelSpec::new(ArimaOrder::arima(1, 1, 0)).with_sample(5, 14);
        let s = WorkingSample::build(&y, None, &spec, false).unwrap();
        assert_eq!(s.len(), 10);
        assert_eq!(s.levels[0], 5.0);

        let spec = ModelSpec::new(ArimaOrder::arima(1, 1, 0)).with_sample(0, 14);
        assert!(WorkingSample::build(&y, None, &spec, false).is_err());
    }
}
