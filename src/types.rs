use std::collections::HashSet;

use nalgebra::DMatrix;

use crate::error::{ArimaError, Result};
use crate::numdiff::NumDiff;
use crate::polynomial::PolyRoots;

/// Seasonal ARIMA lag order (p,d,q)(P,D,Q)_s.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArimaOrder {
    pub p: usize,  // AR order
    pub d: usize,  // differencing order
    pub q: usize,  // MA order
    pub pp: usize, // seasonal AR order (P)
    pub dd: usize, // seasonal differencing order (D)
    pub qq: usize, // seasonal MA order (Q)
    pub s: usize,  // seasonal period
}

impl ArimaOrder {
    pub fn new(p: usize, d: usize, q: usize, pp: usize, dd: usize, qq: usize, s: usize) -> Self {
        Self { p, d, q, pp, dd, qq, s }
    }

    /// Non-seasonal ARMA(p,q) without differencing.
    pub fn arma(p: usize, q: usize) -> Self {
        Self::new(p, 0, q, 0, 0, 0, 0)
    }

    /// Non-seasonal ARIMA(p,d,q).
    pub fn arima(p: usize, d: usize, q: usize) -> Self {
        Self::new(p, d, q, 0, 0, 0, 0)
    }

    /// Extended AR order: p + s*P
    pub fn k_ar(&self) -> usize {
        self.p + self.s * self.pp
    }

    /// Extended MA order: q + s*Q
    pub fn k_ma(&self) -> usize {
        self.q + self.s * self.qq
    }

    /// ARMA block dimension: max(k_ar, k_ma + 1)
    pub fn k_order(&self) -> usize {
        std::cmp::max(self.k_ar(), self.k_ma() + 1)
    }

    /// Lagged-level cells: d + s*D
    pub fn k_states_diff(&self) -> usize {
        self.d + self.s * self.dd
    }

    /// State dimension of the levels-augmented representation.
    pub fn k_states(&self) -> usize {
        self.k_order() + self.k_states_diff()
    }

    pub fn is_seasonal(&self) -> bool {
        self.pp > 0 || self.dd > 0 || self.qq > 0
    }
}

/// Model descriptor: lag structure, regressors, sample and option flags.
///
/// Built once per run and only read afterwards. Lag masks are explicit
/// fields so every routine that needs them receives them through the spec.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub order: ArimaOrder,
    /// `ar_mask[i]` is true when non-seasonal AR lag i+1 is estimated.
    pub ar_mask: Vec<bool>,
    /// `ma_mask[i]` is true when non-seasonal MA lag i+1 is estimated.
    pub ma_mask: Vec<bool>,
    pub intercept: bool,
    pub regressors: Vec<String>,
    /// Inclusive observation range `[t1, t2]`; defaults to the whole series.
    pub sample: Option<(usize, usize)>,
    pub allow_missing: bool,
}

impl ModelSpec {
    pub fn new(order: ArimaOrder) -> Self {
        Self {
            ar_mask: vec![true; order.p],
            ma_mask: vec![true; order.q],
            order,
            intercept: true,
            regressors: Vec::new(),
            sample: None,
            allow_missing: false,
        }
    }

    pub fn with_intercept(mut self, intercept: bool) -> Self {
        self.intercept = intercept;
        self
    }

    /// Restrict the non-seasonal AR lags to `lags` (1-based, each <= p).
    pub fn with_ar_lags(mut self, lags: &[usize]) -> Self {
        self.ar_mask = lag_mask(self.order.p, lags);
        self
    }

    /// Restrict the non-seasonal MA lags to `lags` (1-based, each <= q).
    pub fn with_ma_lags(mut self, lags: &[usize]) -> Self {
        self.ma_mask = lag_mask(self.order.q, lags);
        self
    }

    pub fn with_regressors<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.regressors = names.iter().map(|n| n.as_ref().to_string()).collect();
        self
    }

    pub fn with_sample(mut self, t1: usize, t2: usize) -> Self {
        self.sample = Some((t1, t2));
        self
    }

    pub fn with_missing(mut self, allow_missing: bool) -> Self {
        self.allow_missing = allow_missing;
        self
    }

    /// Number of estimated non-seasonal AR coefficients.
    pub fn n_ar(&self) -> usize {
        self.ar_mask.iter().filter(|&&m| m).count()
    }

    /// Number of estimated non-seasonal MA coefficients.
    pub fn n_ma(&self) -> usize {
        self.ma_mask.iter().filter(|&&m| m).count()
    }

    pub fn n_exog(&self) -> usize {
        self.regressors.len()
    }

    /// Length nc of the coefficient vector.
    pub fn n_coeffs(&self) -> usize {
        usize::from(self.intercept)
            + self.n_ar()
            + self.order.pp
            + self.n_ma()
            + self.order.qq
            + self.n_exog()
    }

    /// Coefficient labels in vector order.
    pub fn coefficient_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.n_coeffs());
        if self.intercept {
            names.push("const".to_string());
        }
        for (i, _) in self.ar_mask.iter().enumerate().filter(|(_, &m)| m) {
            names.push(format!("phi_{}", i + 1));
        }
        for i in 0..self.order.pp {
            names.push(format!("Phi_{}", i + 1));
        }
        for (i, _) in self.ma_mask.iter().enumerate().filter(|(_, &m)| m) {
            names.push(format!("theta_{}", i + 1));
        }
        for i in 0..self.order.qq {
            names.push(format!("Theta_{}", i + 1));
        }
        names.extend(self.regressors.iter().cloned());
        names
    }

    /// Check structural consistency before any estimation state exists.
    pub fn validate(&self) -> Result<()> {
        let order = &self.order;
        if order.is_seasonal() && order.s < 2 {
            return Err(ArimaError::InvalidSpec(format!(
                "seasonal terms require a period s >= 2, got s={}",
                order.s
            )));
        }
        if self.ar_mask.len() != order.p || self.ma_mask.len() != order.q {
            return Err(ArimaError::InvalidSpec(format!(
                "lag masks ({}, {}) do not match orders p={}, q={}",
                self.ar_mask.len(),
                self.ma_mask.len(),
                order.p,
                order.q
            )));
        }
        if order.p > 0 && self.n_ar() == 0 {
            return Err(ArimaError::InvalidSpec(
                "AR order declared but every lag is excluded".into(),
            ));
        }
        if order.q > 0 && self.n_ma() == 0 {
            return Err(ArimaError::InvalidSpec(
                "MA order declared but every lag is excluded".into(),
            ));
        }
        let mut seen = HashSet::new();
        for name in &self.regressors {
            if name == "const" {
                return Err(ArimaError::DuplicateRegressor(format!(
                    "{} (use the intercept flag)",
                    name
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(ArimaError::DuplicateRegressor(name.clone()));
            }
        }
        if let Some((t1, t2)) = self.sample {
            if t1 > t2 {
                return Err(ArimaError::InvalidSpec(format!(
                    "sample start {} is after sample end {}",
                    t1, t2
                )));
            }
        }
        Ok(())
    }
}

/// Lags outside `1..=order` leave the mask too short or invalid; `validate`
/// reports them.
fn lag_mask(order: usize, lags: &[usize]) -> Vec<bool> {
    if lags.iter().any(|&l| l == 0 || l > order) {
        return Vec::new();
    }
    let mut mask = vec![false; order];
    for &l in lags {
        mask[l - 1] = true;
    }
    mask
}

/// Nonlinear optimizer driving the likelihood search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    Lbfgs,
    NewtonRaphson,
}

/// Coefficient covariance estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovarianceMethod {
    Hessian,
    Opg,
    Qml,
}

impl CovarianceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CovarianceMethod::Hessian => "hessian",
            CovarianceMethod::Opg => "opg",
            CovarianceMethod::Qml => "qml",
        }
    }
}

/// Estimation options.
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub optimizer: OptimizerKind,
    pub max_iter: u64,
    /// Relative function-change tolerance.
    pub tolerance: f64,
    pub lbfgs_memory: usize,
    pub covariance: CovarianceMethod,
    /// Fail instead of falling back to OPG when the Hessian is singular.
    pub hessian_required: bool,
    pub numdiff: NumDiff,
    /// Center and scale the series before optimization.
    pub standardize: bool,
    /// Above this many valid observations the objective is the average log-likelihood.
    pub average_threshold: usize,
    /// ARMA block size above which the Lyapunov equation is solved half-vectorized.
    pub lyapunov_condense_above: usize,
    /// Max-abs change in the predicted covariance below which the filter goes steady.
    pub steady_state_tol: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::Lbfgs,
            max_iter: 500,
            tolerance: 1e-9,
            lbfgs_memory: 10,
            covariance: CovarianceMethod::Hessian,
            hessian_required: false,
            numdiff: NumDiff::default(),
            standardize: true,
            average_threshold: 5000,
            lyapunov_condense_above: 4,
            steady_state_tol: 1e-12,
        }
    }
}

impl FitOptions {
    pub fn with_optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_max_iter(mut self, max_iter: u64) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_covariance(mut self, covariance: CovarianceMethod) -> Self {
        self.covariance = covariance;
        self
    }

    pub fn with_hessian_required(mut self, required: bool) -> Self {
        self.hessian_required = required;
        self
    }

    pub fn with_numdiff(mut self, numdiff: NumDiff) -> Self {
        self.numdiff = numdiff;
        self
    }

    pub fn with_standardize(mut self, standardize: bool) -> Self {
        self.standardize = standardize;
        self
    }
}

/// Result of a converged fit.
#[derive(Debug, Clone)]
pub struct EstimationResult {
    pub coefficients: Vec<f64>,
    pub names: Vec<String>,
    pub covariance: DMatrix<f64>,
    /// Estimator that actually produced `covariance` (after any fallback).
    pub covariance_method: CovarianceMethod,
    /// One-step prediction errors over the sample; NaN at missing periods.
    pub residuals: Vec<f64>,
    pub standardized_residuals: Vec<f64>,
    pub fitted: Vec<f64>,
    pub sigma2: f64,
    pub loglike: f64,
    pub aic: f64,
    pub bic: f64,
    pub hqc: f64,
    /// Valid (non-missing) observations in the sample.
    pub n_obs: usize,
    pub sample: (usize, usize),
    pub roots: Vec<PolyRoots>,
    pub iterations: u64,
    pub gradient_evals: u64,
    pub method: String,
}

impl EstimationResult {
    pub fn std_errors(&self) -> Vec<f64> {
        (0..self.covariance.nrows())
            .map(|i| self.covariance[(i, i)].max(0.0).sqrt())
            .collect()
    }

    /// Look up a coefficient by label.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.coefficients[i])
    }
}

/// AIC, BIC and Hannan-Quinn; `k` counts the innovation variance.
pub fn information_criteria(loglike: f64, k: usize, n: usize) -> (f64, f64, f64) {
    let k = k as f64;
    let n = n as f64;
    let aic = -2.0 * loglike + 2.0 * k;
    let bic = -2.0 * loglike + k * n.ln();
    let hqc = -2.0 * loglike + 2.0 * k * n.ln().ln();
    (aic, bic, hqc)
}
