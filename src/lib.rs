//! Exact maximum-likelihood estimation of seasonal ARIMA models with
//! regressors, evaluated through a Kalman filter on a Hamilton-form state
//! space.
//!
//! ```no_run
//! use sarimax_mle::{fit, ArimaOrder, FitOptions, ModelSpec};
//!
//! let y: Vec<f64> = (0..200).map(|t| (t as f64 * 0.3).sin()).collect();
//! let spec = ModelSpec::new(ArimaOrder::arma(1, 1));
//! let res = fit(&y, None, &spec, None, &FitOptions::default()).unwrap();
//! println!("{:?} loglike={}", res.coefficients, res.loglike);
//! ```

pub mod batch;
pub mod covariance;
pub mod data;
pub mod error;
pub mod finisher;
pub mod invertibility;
pub mod kalman;
pub mod numdiff;
pub mod optimizer;
pub mod params;
pub mod polynomial;
pub mod simulate;
pub mod start_params;
pub mod state_space;
pub mod transform;
pub mod types;

pub use batch::{batch_fit, batch_loglike};
pub use error::{ArimaError, Result};
pub use numdiff::NumDiff;
pub use optimizer::{fit, loglike_at};
pub use params::ArimaParams;
pub use polynomial::{LagPolynomial, PolyRoots};
pub use simulate::simulate_arima;
pub use types::{
    ArimaOrder, CovarianceMethod, EstimationResult, FitOptions, ModelSpec, OptimizerKind,
};
