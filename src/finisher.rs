//! Post-estimation: undo scaling, covariance, roots, residuals.

use tracing::debug;

use crate::covariance::estimate_covariance;
use crate::data::WorkingSample;
use crate::error::{ArimaError, Result};
use crate::invertibility::enforce_invertibility;
use crate::optimizer::{LikelihoodObjective, Minimum};
use crate::params::ArimaParams;
use crate::polynomial::model_roots;
use crate::types::{information_criteria, EstimationResult, FitOptions, ModelSpec};

/// Materialize the estimation result from converged internal coefficients.
///
/// The final coefficients get the MA correction and are mapped back to the
/// data's scale; one filter pass on the unscaled data then supplies the
/// log-likelihood, residuals and the objective for the covariance.
pub fn finish(
    y: &[f64],
    exog: Option<&[Vec<f64>]>,
    spec: &ModelSpec,
    internal: &WorkingSample,
    minimum: &Minimum,
    opts: &FitOptions,
) -> Result<EstimationResult> {
    let mut params = ArimaParams::from_flat(&minimum.coefficients, spec)?;
    if enforce_invertibility(&mut params, spec)? {
        debug!("final MA coefficients reflected to the invertible region");
    }
    let external = internal.scaling.to_external(&params);
    let coefficients = external.to_flat();

    let sample = if internal.scaling.is_identity() {
        internal.clone()
    } else {
        WorkingSample::build(y, exog, spec, false)?
    };
    let objective = LikelihoodObjective::new(spec, &sample, opts)?.unweighted();
    let out = objective.filter(&coefficients).map_err(|e| {
        ArimaError::OptimizationFailed(format!(
            "likelihood undefined for the unscaled system: {}",
            e
        ))
    })?;

    let internal_ll = -minimum.cost / weight_of(internal, opts);
    debug!(
        loglike = out.loglike,
        rescaled = internal.scaling.unscale_loglike(internal_ll, out.n_valid),
        "unscaled filter pass"
    );

    let (covariance, covariance_method) = estimate_covariance(
        &objective,
        &coefficients,
        out.sigma2,
        opts.covariance,
        opts.hessian_required,
    )?;
    if covariance_method != opts.covariance {
        debug!(
            requested = opts.covariance.as_str(),
            used = covariance_method.as_str(),
            "covariance fallback recorded"
        );
    }

    let roots = model_roots(&external, spec)?;
    let n_obs = out.n_valid;
    let (aic, bic, hqc) = information_criteria(out.loglike, spec.n_coeffs() + 1, n_obs);

    let standardized_residuals = out.standardized_residuals();
    let fitted = sample
        .levels
        .iter()
        .zip(out.innovations.iter())
        .map(|(y, e)| y - e)
        .collect();

    Ok(EstimationResult {
        coefficients,
        names: spec.coefficient_names(),
        covariance,
        covariance_method,
        residuals: out.innovations,
        standardized_residuals,
        fitted,
        sigma2: out.sigma2,
        loglike: out.loglike,
        aic,
        bic,
        hqc,
        n_obs,
        sample: (sample.t1, sample.t2),
        roots,
        iterations: minimum.iterations,
        gradient_evals: minimum.gradient_evals,
        method: minimum.method.clone(),
    })
}

fn weight_of(sample: &WorkingSample, opts: &FitOptions) -> f64 {
    let n = sample.n_valid();
    if n > opts.average_threshold {
        1.0 / n as f64
    } else {
        1.0
    }
}
