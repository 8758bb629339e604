//! Rayon-based parallel estimation over many series.
//!
//! Every series gets its own working sample, state-space system and
//! optimizer run; nothing is shared between tasks except read-only inputs.

use rayon::prelude::*;

use crate::error::{ArimaError, Result};
use crate::optimizer::{self, loglike_at};
use crate::types::{EstimationResult, FitOptions, ModelSpec};

/// Regressors for series `i`; a count mismatch fails every series.
fn series_exog(
    exog_list: Option<&[Vec<Vec<f64>>]>,
    i: usize,
    n_series: usize,
) -> Result<Option<&[Vec<f64>]>> {
    match exog_list {
        None => Ok(None),
        Some(el) if el.len() != n_series => Err(ArimaError::DataError(format!(
            "{} regressor sets for {} series",
            el.len(),
            n_series
        ))),
        Some(el) => Ok(Some(&el[i][..])),
    }
}

/// Log-likelihood of several series at the same coefficients, in parallel.
///
/// If `exog_list` is provided, `exog_list[i]` is the column-major regressor
/// matrix for `series[i]`.
pub fn batch_loglike(
    series: &[Vec<f64>],
    spec: &ModelSpec,
    coefficients: &[f64],
    exog_list: Option<&[Vec<Vec<f64>>]>,
    opts: &FitOptions,
) -> Vec<Result<f64>> {
    series
        .par_iter()
        .enumerate()
        .map(|(i, y)| {
            let exog = series_exog(exog_list, i, series.len())?;
            loglike_at(y, exog, spec, coefficients, opts)
        })
        .collect()
}

/// Fit the same model to several series independently, in parallel.
pub fn batch_fit(
    series: &[Vec<f64>],
    spec: &ModelSpec,
    exog_list: Option<&[Vec<Vec<f64>>]>,
    opts: &FitOptions,
) -> Vec<Result<EstimationResult>> {
    series
        .par_iter()
        .enumerate()
        .map(|(i, y)| {
            let exog = series_exog(exog_list, i, series.len())?;
            optimizer::fit(y, exog, spec, None, opts)
        })
        .collect()
}
