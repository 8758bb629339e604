//! Coefficient covariance: Hessian, outer product of gradients, QML sandwich.
//!
//! Fallbacks:
//! - Hessian fails -> OPG, unless the Hessian is required
//! - OPG fails -> Hessian
//! - QML with a failed Hessian -> OPG; with a failed OPG -> Hessian
//!
//! Only both estimators failing is fatal.

use nalgebra::DMatrix;
use tracing::{debug, warn};

use crate::error::{ArimaError, Result};
use crate::optimizer::LikelihoodObjective;
use crate::types::CovarianceMethod;

/// Smallest accepted reciprocal condition number of an information matrix.
const RCOND_MIN: f64 = 1e-12;

/// Inverse of a symmetric positive definite information matrix, or `None`
/// when it is indefinite or too ill-conditioned to invert.
fn invert_information(info: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let sym = (info + info.transpose()) * 0.5;
    let eig = sym.clone().symmetric_eigenvalues();
    let (lo, hi) = (eig.min(), eig.max());
    if !(lo > 0.0 && hi.is_finite()) || lo / hi < RCOND_MIN {
        debug!(min_eigenvalue = lo, max_eigenvalue = hi, "information matrix rejected");
        return None;
    }
    sym.cholesky().map(|c| c.inverse())
}

/// Inverse of minus the numerical Hessian of the log-likelihood.
pub fn hessian_inverse(objective: &LikelihoodObjective<'_>, coeffs: &[f64]) -> Result<DMatrix<f64>> {
    let hess = objective
        .numdiff()
        .hessian(|x| objective.loglike(x), coeffs)
        .map_err(|e| {
            debug!(error = %e, "Hessian evaluation failed");
            ArimaError::HessianSingular
        })?;
    invert_information(&(-hess)).ok_or(ArimaError::HessianSingular)
}

/// G'G, where row t of G is the gradient of period t's log-density at a
/// fixed innovation variance.
pub fn opg_matrix(
    objective: &LikelihoodObjective<'_>,
    coeffs: &[f64],
    sigma2: f64,
) -> Result<DMatrix<f64>> {
    let g = objective
        .numdiff()
        .jacobian(|x| objective.contributions(x, sigma2), coeffs)
        .map_err(|e| ArimaError::CovarianceFailed(format!("score contributions: {}", e)))?;
    Ok(g.transpose() * g)
}

fn opg_inverse(objective: &LikelihoodObjective<'_>, coeffs: &[f64], sigma2: f64) -> Result<DMatrix<f64>> {
    let opg = opg_matrix(objective, coeffs, sigma2)?;
    invert_information(&opg).ok_or_else(|| {
        ArimaError::CovarianceFailed("outer product of gradients is ill-conditioned".into())
    })
}

/// Covariance of the coefficients at the optimum, and the method that
/// actually produced it.
///
/// `objective` must be unweighted and in the data's own scale.
pub fn estimate_covariance(
    objective: &LikelihoodObjective<'_>,
    coeffs: &[f64],
    sigma2: f64,
    method: CovarianceMethod,
    hessian_required: bool,
) -> Result<(DMatrix<f64>, CovarianceMethod)> {
    if coeffs.is_empty() {
        return Ok((DMatrix::zeros(0, 0), method));
    }

    match method {
        CovarianceMethod::Hessian => match hessian_inverse(objective, coeffs) {
            Ok(cov) => Ok((cov, CovarianceMethod::Hessian)),
            Err(e) if hessian_required => Err(e),
            Err(e) => {
                warn!(error = %e, "Hessian covariance failed, falling back to OPG");
                let cov = opg_inverse(objective, coeffs, sigma2).map_err(both_failed)?;
                Ok((cov, CovarianceMethod::Opg))
            }
        },
        CovarianceMethod::Opg => match opg_inverse(objective, coeffs, sigma2) {
            Ok(cov) => Ok((cov, CovarianceMethod::Opg)),
            Err(e) => {
                warn!(error = %e, "OPG covariance failed, falling back to Hessian");
                let cov = hessian_inverse(objective, coeffs).map_err(both_failed)?;
                Ok((cov, CovarianceMethod::Hessian))
            }
        },
        CovarianceMethod::Qml => {
            let h_inv = match hessian_inverse(objective, coeffs) {
                Ok(h) => h,
                Err(e) if hessian_required => return Err(e),
                Err(e) => {
                    warn!(error = %e, "QML needs the Hessian, falling back to OPG");
                    let cov = opg_inverse(objective, coeffs, sigma2).map_err(both_failed)?;
                    return Ok((cov, CovarianceMethod::Opg));
                }
            };
            match opg_matrix(objective, coeffs, sigma2) {
                Ok(opg) => {
                    let sandwich = &h_inv * opg * &h_inv;
                    Ok(((&sandwich + sandwich.transpose()) * 0.5, CovarianceMethod::Qml))
                }
                Err(e) => {
                    warn!(error = %e, "QML score contributions failed, falling back to Hessian");
                    Ok((h_inv, CovarianceMethod::Hessian))
                }
            }
        }
    }
}

fn both_failed(e: ArimaError) -> ArimaError {
    ArimaError::CovarianceFailed(format!("Hessian and OPG both failed: {}", e))
}
