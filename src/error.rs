use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArimaError {
    #[error("invalid model specification: {0}")]
    InvalidSpec(String),

    #[error("parameter length mismatch: expected {expected}, got {got}")]
    ParamLengthMismatch { expected: usize, got: usize },

    #[error("duplicate regressor: {0}")]
    DuplicateRegressor(String),

    #[error("data error: {0}")]
    DataError(String),

    #[error("Lyapunov solve for the initial state covariance is singular (near unit root)")]
    SingularLyapunov,

    #[error("non-positive prediction error variance at t={t}")]
    NonPositiveVariance { t: usize },

    #[error("MA polynomial out of bounds: {0}")]
    MaOutOfBounds(String),

    #[error("Hessian is singular or not negative definite")]
    HessianSingular,

    #[error("covariance estimation failed: {0}")]
    CovarianceFailed(String),

    #[error("optimizer did not converge after {iterations} iterations (best loglike {loglike})")]
    NotConverged {
        iterations: u64,
        loglike: f64,
        coefficients: Vec<f64>,
    },

    #[error("optimization failed: {0}")]
    OptimizationFailed(String),
}

pub type Result<T> = std::result::Result<T, ArimaError>;
