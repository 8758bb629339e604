//! Likelihood driver: objective over the coefficient vector and the search.
//!
//! This module provides:
//! - `LikelihoodObjective`: coefficients -> exact log-likelihood, with the MA
//!   invertibility correction applied before every filter pass
//! - argmin wiring for L-BFGS (Nelder-Mead fallback) and a step-halving
//!   Newton-Raphson solver, both searching over `SearchSpace` so that AR
//!   trial points stay stationary
//! - `fit()` and `loglike_at()`: the entry points

use std::cell::{Cell, RefCell};

use argmin::core::{
    CostFunction, Error, Executor, Gradient, Hessian, IterState, Problem, Solver, State,
    TerminationReason, TerminationStatus, KV,
};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

use crate::data::WorkingSample;
use crate::error::{ArimaError, Result};
use crate::finisher::finish;
use crate::invertibility::enforce_invertibility;
use crate::kalman::{kalman_filter, FilterOutput};
use crate::numdiff::NumDiff;
use crate::params::ArimaParams;
use crate::start_params::compute_start_params;
use crate::state_space::StateSpace;
use crate::transform::SearchSpace;
use crate::types::{EstimationResult, FitOptions, ModelSpec, OptimizerKind};

/// Cost handed to the optimizer for a rejected trial point.
const PENALTY: f64 = f64::MAX / 2.0;

/// Gradient-norm stopping threshold for L-BFGS.
const GRAD_TOL: f64 = 1e-5;

// ---------------------------------------------------------------------------
// Objective
// ---------------------------------------------------------------------------

/// Coefficients -> log-likelihood for one model and one working sample.
///
/// Owns the state-space system for the run; every evaluation rewrites it in
/// place. Coefficients are in the internal scale of `sample`.
pub struct LikelihoodObjective<'a> {
    spec: &'a ModelSpec,
    sample: &'a WorkingSample,
    system: RefCell<StateSpace>,
    steady_tol: f64,
    numdiff: NumDiff,
    /// 1/n for long samples (average log-likelihood), 1 otherwise.
    weight: f64,
    rejected: Cell<u64>,
}

impl<'a> LikelihoodObjective<'a> {
    pub fn new(spec: &'a ModelSpec, sample: &'a WorkingSample, opts: &FitOptions) -> Result<Self> {
        let system = StateSpace::new(spec, sample, opts.lyapunov_condense_above)?;
        let n = sample.n_valid();
        let weight = if n > opts.average_threshold {
            1.0 / n as f64
        } else {
            1.0
        };
        Ok(Self {
            spec,
            sample,
            system: RefCell::new(system),
            steady_tol: opts.steady_state_tol,
            numdiff: opts.numdiff,
            weight,
            rejected: Cell::new(0),
        })
    }

    /// Same objective on the plain log-likelihood scale.
    pub fn unweighted(mut self) -> Self {
        self.weight = 1.0;
        self
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn spec(&self) -> &ModelSpec {
        self.spec
    }

    pub fn sample(&self) -> &WorkingSample {
        self.sample
    }

    pub fn numdiff(&self) -> &NumDiff {
        &self.numdiff
    }

    /// Trial points rejected so far.
    pub fn rejected(&self) -> u64 {
        self.rejected.get()
    }

    /// Full filter pass at `coeffs` after the MA correction.
    pub fn filter(&self, coeffs: &[f64]) -> Result<FilterOutput> {
        let mut params = ArimaParams::from_flat(coeffs, self.spec)?;
        enforce_invertibility(&mut params, self.spec)?;
        let mut system = self.system.borrow_mut();
        system.rewrite(&params, self.spec)?;
        kalman_filter(&system, self.sample, self.steady_tol)
    }

    pub fn loglike(&self, coeffs: &[f64]) -> Result<f64> {
        Ok(self.filter(coeffs)?.loglike)
    }

    /// Weighted negative log-likelihood.
    pub fn cost(&self, coeffs: &[f64]) -> Result<f64> {
        let ll = self.loglike(coeffs)?;
        if !ll.is_finite() {
            return Err(ArimaError::OptimizationFailed(format!(
                "non-finite log-likelihood {}",
                ll
            )));
        }
        Ok(-self.weight * ll)
    }

    /// Per-period log-density terms at a fixed innovation variance.
    pub fn contributions(&self, coeffs: &[f64], sigma2: f64) -> Result<Vec<f64>> {
        Ok(self.filter(coeffs)?.contributions(sigma2))
    }
}

/// Exposes a `LikelihoodObjective` to argmin as a minimization problem over
/// search-space points.
///
/// Trial-point failures become `PENALTY`, never argmin errors.
struct LikelihoodProblem<'o, 'a> {
    objective: &'o LikelihoodObjective<'a>,
    space: &'o SearchSpace,
}

impl LikelihoodProblem<'_, '_> {
    fn search_cost(&self, x: &[f64]) -> Result<f64> {
        self.objective.cost(&self.space.to_coefficients(x))
    }
}

impl CostFunction for LikelihoodProblem<'_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Vec<f64>) -> std::result::Result<f64, Error> {
        match self.search_cost(param) {
            Ok(c) => Ok(c),
            Err(e) => {
                self.objective.rejected.set(self.objective.rejected.get() + 1);
                debug!(error = %e, "rejected trial point");
                Ok(PENALTY)
            }
        }
    }
}

impl Gradient for LikelihoodProblem<'_, '_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Vec<f64>) -> std::result::Result<Vec<f64>, Error> {
        Ok(self.objective.numdiff.gradient(|x| self.search_cost(x), param)?)
    }
}

impl Hessian for LikelihoodProblem<'_, '_> {
    type Param = Vec<f64>;
    type Hessian = DMatrix<f64>;

    fn hessian(&self, param: &Vec<f64>) -> std::result::Result<DMatrix<f64>, Error> {
        Ok(self.objective.numdiff.hessian(|x| self.search_cost(x), param)?)
    }
}

// ---------------------------------------------------------------------------
// Newton-Raphson
// ---------------------------------------------------------------------------

type NewtonState = IterState<Vec<f64>, Vec<f64>, (), DMatrix<f64>, (), f64>;

/// Newton-Raphson on numerical derivatives with step halving.
///
/// An indefinite Hessian is regularized by a growing ridge; if that fails
/// the step falls back to the gradient direction.
#[derive(Debug, Clone)]
pub struct NewtonRaphson {
    tol: f64,
    max_halvings: usize,
    status: TerminationStatus,
}

impl NewtonRaphson {
    pub fn new(tol: f64) -> Self {
        Self {
            tol,
            max_halvings: 30,
            status: TerminationStatus::NotTerminated,
        }
    }
}

fn newton_direction(h: &DMatrix<f64>, g: &DVector<f64>) -> DVector<f64> {
    let n = g.len();
    let scale = (0..n).map(|i| h[(i, i)].abs()).fold(0.0, f64::max).max(1e-8);
    let mut ridge = 0.0;
    for _ in 0..12 {
        let m = h + DMatrix::<f64>::identity(n, n) * ridge;
        if let Some(chol) = m.cholesky() {
            return chol.solve(g);
        }
        ridge = if ridge == 0.0 { 1e-8 * scale } else { ridge * 10.0 };
    }
    g / scale
}

impl<O> Solver<O, NewtonState> for NewtonRaphson
where
    O: CostFunction<Param = Vec<f64>, Output = f64>
        + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>
        + Hessian<Param = Vec<f64>, Hessian = DMatrix<f64>>,
{
    const NAME: &'static str = "Newton-Raphson";

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        state: NewtonState,
    ) -> std::result::Result<(NewtonState, Option<KV>), Error> {
        let x = state
            .get_param()
            .ok_or_else(|| Error::msg("Newton-Raphson needs an initial parameter vector"))?
            .clone();
        let cost = problem.cost(&x)?;
        Ok((state.param(x).cost(cost), None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        mut state: NewtonState,
    ) -> std::result::Result<(NewtonState, Option<KV>), Error> {
        let x = state
            .take_param()
            .ok_or_else(|| Error::msg("Newton-Raphson lost its parameter vector"))?;
        let f0 = state.get_cost();
        let g = problem.gradient(&x)?;
        let gv = DVector::from_column_slice(&g);
        let h = match problem.hessian(&x) {
            Ok(h) => h,
            Err(e) => {
                debug!(error = %e, "Hessian unavailable, taking a gradient step");
                DMatrix::identity(x.len(), x.len())
            }
        };
        let dir = newton_direction(&h, &gv);

        let mut step = 1.0;
        for _ in 0..=self.max_halvings {
            let trial: Vec<f64> = x.iter().zip(dir.iter()).map(|(xi, di)| xi - step * di).collect();
            let c = problem.cost(&trial)?;
            if c < f0 {
                if (f0 - c).abs() <= self.tol * f0.abs().max(1.0) {
                    self.status = TerminationStatus::Terminated(TerminationReason::SolverConverged);
                }
                return Ok((state.param(trial).cost(c).gradient(g).hessian(h), None));
            }
            step *= 0.5;
        }

        // No descent along the Newton direction: stationary up to noise, or stuck
        let gnorm = gv.norm();
        self.status = if gnorm <= self.tol.sqrt() * f0.abs().max(1.0) {
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        } else {
            TerminationStatus::Terminated(TerminationReason::SolverExit(
                "step halving found no descent".to_string(),
            ))
        };
        Ok((state.param(x).cost(f0).gradient(g).hessian(h), None))
    }

    fn terminate(&mut self, _state: &NewtonState) -> TerminationStatus {
        self.status.clone()
    }
}

// ---------------------------------------------------------------------------
// Runners
// ---------------------------------------------------------------------------

/// Outcome of the search. Runners report search-space points; `minimize`
/// maps them back to internal coefficients.
#[derive(Debug, Clone)]
pub struct Minimum {
    pub coefficients: Vec<f64>,
    pub cost: f64,
    pub iterations: u64,
    pub gradient_evals: u64,
    pub converged: bool,
    pub method: String,
}

fn is_converged(reason: Option<&TerminationReason>) -> bool {
    matches!(
        reason,
        Some(TerminationReason::SolverConverged) | Some(TerminationReason::TargetCostReached)
    )
}

fn run_lbfgs(
    objective: &LikelihoodObjective<'_>,
    space: &SearchSpace,
    init_params: Vec<f64>,
    tol_cost: f64,
    opts: &FitOptions,
) -> std::result::Result<Minimum, String> {
    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, opts.lbfgs_memory)
        .with_tolerance_grad(GRAD_TOL)
        .map_err(|e| e.to_string())?
        .with_tolerance_cost(tol_cost)
        .map_err(|e| e.to_string())?;

    let result = Executor::new(LikelihoodProblem { objective, space }, solver)
        .configure(
            |state: IterState<Vec<f64>, Vec<f64>, (), (), (), f64>| {
                state.param(init_params).max_iters(opts.max_iter)
            },
        )
        .run()
        .map_err(|e| format!("L-BFGS failed: {}", e))?;

    let state = result.state();
    let best_param = state
        .get_best_param()
        .ok_or("L-BFGS: no best parameter found")?
        .clone();
    let best_cost = state.get_best_cost();
    if !best_cost.is_finite() || best_cost >= PENALTY {
        return Err("L-BFGS: no feasible point found".to_string());
    }
    // line search or gradient failure: argmin reports it as a solver exit
    if let Some(TerminationReason::SolverExit(msg)) = state.get_termination_reason() {
        return Err(format!("L-BFGS stopped after {} iterations: {}", state.get_iter(), msg));
    }
    Ok(Minimum {
        coefficients: best_param,
        cost: best_cost,
        iterations: state.get_iter(),
        gradient_evals: state.get_func_counts().get("gradient_count").copied().unwrap_or(0),
        converged: is_converged(state.get_termination_reason()),
        method: "lbfgs".to_string(),
    })
}

fn run_nelder_mead(
    objective: &LikelihoodObjective<'_>,
    space: &SearchSpace,
    init_params: Vec<f64>,
    sd_tol: f64,
    opts: &FitOptions,
) -> std::result::Result<Minimum, String> {
    let n = init_params.len();

    // n+1 vertices: the start plus a 5% move along each axis
    let mut simplex = vec![init_params.clone()];
    for i in 0..n {
        let mut vertex = init_params.clone();
        vertex[i] += if vertex[i].abs() > 1e-8 {
            vertex[i] * 0.05
        } else {
            0.00025
        };
        simplex.push(vertex);
    }

    let solver = NelderMead::new(simplex)
        .with_sd_tolerance(sd_tol)
        .map_err(|e| e.to_string())?;

    let result = Executor::new(LikelihoodProblem { objective, space }, solver)
        .configure(|state: IterState<Vec<f64>, (), (), (), (), f64>| state.max_iters(opts.max_iter))
        .run()
        .map_err(|e| format!("Nelder-Mead failed: {}", e))?;

    let state = result.state();
    let best_param = state
        .get_best_param()
        .ok_or("Nelder-Mead: no best parameter found")?
        .clone();
    Ok(Minimum {
        coefficients: best_param,
        cost: state.get_best_cost(),
        iterations: state.get_iter(),
        gradient_evals: 0,
        converged: is_converged(state.get_termination_reason()),
        method: "nelder-mead".to_string(),
    })
}

fn run_newton_raphson(
    objective: &LikelihoodObjective<'_>,
    space: &SearchSpace,
    init_params: Vec<f64>,
    opts: &FitOptions,
) -> std::result::Result<Minimum, String> {
    let result = Executor::new(LikelihoodProblem { objective, space }, NewtonRaphson::new(opts.tolerance))
        .configure(|state: NewtonState| state.param(init_params).max_iters(opts.max_iter))
        .run()
        .map_err(|e| format!("Newton-Raphson failed: {}", e))?;

    let state = result.state();
    let best_param = state
        .get_best_param()
        .ok_or("Newton-Raphson: no best parameter found")?
        .clone();
    Ok(Minimum {
        coefficients: best_param,
        cost: state.get_best_cost(),
        iterations: state.get_iter(),
        gradient_evals: state.get_func_counts().get("gradient_count").copied().unwrap_or(0),
        converged: is_converged(state.get_termination_reason()),
        method: "newton-raphson".to_string(),
    })
}

/// Run the configured optimizer from `x0` (internal coefficients).
pub fn minimize(
    objective: &LikelihoodObjective<'_>,
    x0: Vec<f64>,
    opts: &FitOptions,
) -> Result<Minimum> {
    let f0 = objective.cost(&x0)?;
    let tol_cost = opts.tolerance * f0.abs().max(1.0);
    let space = SearchSpace::new(objective.spec());
    let u0 = space.to_search(&x0);

    let mut minimum = match opts.optimizer {
        OptimizerKind::Lbfgs => match run_lbfgs(objective, &space, u0.clone(), tol_cost, opts) {
            Ok(m) => m,
            Err(reason) => {
                warn!(%reason, "L-BFGS failed, retrying with Nelder-Mead");
                let mut m = run_nelder_mead(objective, &space, u0, tol_cost.max(1e-10), opts)
                    .map_err(ArimaError::OptimizationFailed)?;
                m.method = "nelder-mead (fallback)".to_string();
                m
            }
        },
        OptimizerKind::NewtonRaphson => run_newton_raphson(objective, &space, u0, opts)
            .map_err(ArimaError::OptimizationFailed)?,
    };
    minimum.coefficients = space.to_coefficients(&minimum.coefficients);
    Ok(minimum)
}

/// Make sure the search starts where the likelihood is defined.
///
/// Falls back to zero ARMA coefficients (keeping intercept and regression
/// coefficients), which always give a defined likelihood.
fn feasible_start(
    objective: &LikelihoodObjective<'_>,
    x0: Vec<f64>,
    spec: &ModelSpec,
) -> Result<Vec<f64>> {
    match objective.cost(&x0) {
        Ok(_) => Ok(x0),
        Err(e) => {
            warn!(error = %e, "likelihood undefined at start values, restarting from white noise");
            let mut params = ArimaParams::from_flat(&x0, spec)?;
            params.ar.iter_mut().for_each(|c| *c = 0.0);
            params.sar.iter_mut().for_each(|c| *c = 0.0);
            params.ma.iter_mut().for_each(|c| *c = 0.0);
            params.sma.iter_mut().for_each(|c| *c = 0.0);
            let flat = params.to_flat();
            objective.cost(&flat).map_err(|e| {
                ArimaError::OptimizationFailed(format!("no feasible start values: {}", e))
            })?;
            Ok(flat)
        }
    }
}

/// Coefficients for a `NotConverged` report: MA-corrected when the
/// correction succeeds, as reached otherwise.
fn reported_params(coeffs: &[f64], spec: &ModelSpec) -> Result<ArimaParams> {
    let mut params = ArimaParams::from_flat(coeffs, spec)?;
    let raw = params.clone();
    if let Err(e) = enforce_invertibility(&mut params, spec) {
        debug!(error = %e, "reporting uncorrected MA coefficients");
        return Ok(raw);
    }
    Ok(params)
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Exact log-likelihood of `y` at user-scale coefficients.
///
/// The MA correction is applied first, as during estimation.
pub fn loglike_at(
    y: &[f64],
    exog: Option<&[Vec<f64>]>,
    spec: &ModelSpec,
    coefficients: &[f64],
    opts: &FitOptions,
) -> Result<f64> {
    spec.validate()?;
    ArimaParams::from_flat(coefficients, spec)?;
    let sample = WorkingSample::build(y, exog, spec, false)?;
    let objective = LikelihoodObjective::new(spec, &sample, opts)?.unweighted();
    objective.loglike(coefficients)
}

/// Estimate the model by exact maximum likelihood.
///
/// # Arguments
/// * `y` - Dependent variable over the whole series; the sample range comes from `spec`
/// * `exog` - Regressor columns, column-major: `exog[j][t]`
/// * `spec` - Model specification
/// * `start` - Optional initial coefficients in the layout of `ModelSpec::coefficient_names`
/// * `opts` - Estimation options
///
/// Non-convergence is an error carrying the best point reached.
#[tracing::instrument(skip_all)]
pub fn fit(
    y: &[f64],
    exog: Option<&[Vec<f64>]>,
    spec: &ModelSpec,
    start: Option<&[f64]>,
    opts: &FitOptions,
) -> Result<EstimationResult> {
    spec.validate()?;
    let nc = spec.n_coeffs();
    if let Some(s) = start {
        if s.len() != nc {
            return Err(ArimaError::ParamLengthMismatch {
                expected: nc,
                got: s.len(),
            });
        }
    }

    let sample = WorkingSample::build(y, exog, spec, opts.standardize)?;
    let n_valid = sample.n_valid();
    if n_valid <= nc {
        return Err(ArimaError::DataError(format!(
            "not enough observations: {} valid for {} coefficients",
            n_valid, nc
        )));
    }

    let x0 = match start {
        Some(s) => sample
            .scaling
            .to_internal(&ArimaParams::from_flat(s, spec)?)
            .to_flat(),
        None => compute_start_params(&sample, spec)?,
    };
    debug!(
        n_obs = n_valid,
        n_coeffs = nc,
        levels_form = sample.levels_form,
        shift = sample.scaling.shift,
        scale = sample.scaling.scale,
        "starting estimation"
    );

    let objective = LikelihoodObjective::new(spec, &sample, opts)?;
    let x0 = feasible_start(&objective, x0, spec)?;

    let minimum = if nc == 0 {
        Minimum {
            cost: objective.cost(&x0)?,
            coefficients: x0,
            iterations: 0,
            gradient_evals: 0,
            converged: true,
            method: "none".to_string(),
        }
    } else {
        minimize(&objective, x0, opts)?
    };
    debug!(
        rejected = objective.rejected(),
        iterations = minimum.iterations,
        method = %minimum.method,
        "search finished"
    );

    if !minimum.converged {
        let params = reported_params(&minimum.coefficients, spec)?;
        let loglike = objective
            .loglike(&params.to_flat())
            .map(|ll| sample.scaling.unscale_loglike(ll, n_valid))
            .unwrap_or(f64::NAN);
        warn!(iterations = minimum.iterations, loglike, "optimizer did not converge");
        return Err(ArimaError::NotConverged {
            iterations: minimum.iterations,
            loglike,
            coefficients: sample.scaling.to_external(&params).to_flat(),
        });
    }

    let result = finish(y, exog, spec, &sample, &minimum, opts)?;
    info!(
        method = %result.method,
        iterations = result.iterations,
        loglike = result.loglike,
        covariance = result.covariance_method.as_str(),
        "estimation complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::simulate_arima;
    use crate::types::ArimaOrder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ar1_series(phi: f64, n: usize) -> Vec<f64> {
        let spec = ModelSpec::new(ArimaOrder::arma(1, 0)).with_intercept(false);
        let mut rng = StdRng::seed_from_u64(2024);
        simulate_arima(&spec, &[phi], 1.0, n, 100, None, &mut rng).unwrap()
    }

    #[test]
    fn test_penalty_for_explosive_ar() {
        // excluded lags keep the AR block untransformed, so 1.5 reaches the filter
        let spec = ModelSpec::new(ArimaOrder::arma(2, 0))
            .with_intercept(false)
            .with_ar_lags(&[2]);
        let y = ar1_series(0.5, 100);
        let sample = WorkingSample::build(&y, None, &spec, false).unwrap();
        let objective = LikelihoodObjective::new(&spec, &sample, &FitOptions::default()).unwrap();
        let space = SearchSpace::new(&spec);
        let problem = LikelihoodProblem {
            objective: &objective,
            space: &space,
        };
        assert_eq!(problem.cost(&vec![1.5]).unwrap(), PENALTY);
        assert_eq!(objective.rejected(), 1);
        assert!(problem.cost(&vec![0.5]).unwrap() < PENALTY);
    }

    #[test]
    fn test_search_points_never_explosive() {
        let spec = ModelSpec::new(ArimaOrder::arma(2, 0)).with_intercept(false);
        let y = ar1_series(0.5, 100);
        let sample = WorkingSample::build(&y, None, &spec, false).unwrap();
        let objective = LikelihoodObjective::new(&spec, &sample, &FitOptions::default()).unwrap();
        let space = SearchSpace::new(&spec);
        let problem = LikelihoodProblem {
            objective: &objective,
            space: &space,
        };
        for x in [vec![3.0, 3.0], vec![-4.0, 2.5], vec![1.5, -3.0]] {
            assert!(problem.cost(&x).unwrap() < PENALTY);
            let g = problem.gradient(&x).unwrap();
            assert!(g.iter().all(|v| v.is_finite()));
        }
        assert_eq!(objective.rejected(), 0);
    }

    #[test]
    fn test_reported_params_fall_back_to_raw() {
        let spec = ModelSpec::new(ArimaOrder::arma(0, 1)).with_intercept(false);
        assert_eq!(reported_params(&[2.0], &spec).unwrap().ma, vec![0.5]);
        // a degenerate root makes the correction fail
        let params = reported_params(&[f64::INFINITY], &spec).unwrap();
        assert_eq!(params.ma, vec![f64::INFINITY]);
    }

    #[test]
    fn test_objective_uses_corrected_ma() {
        // theta = 2 and theta = 0.5 have the same likelihood once sigma2 is concentrated
        let spec = ModelSpec::new(ArimaOrder::arma(0, 1)).with_intercept(false);
        let y = ar1_series(0.3, 150);
        let sample = WorkingSample::build(&y, None, &spec, false).unwrap();
        let objective = LikelihoodObjective::new(&spec, &sample, &FitOptions::default()).unwrap();
        let a = objective.loglike(&[2.0]).unwrap();
        let b = objective.loglike(&[0.5]).unwrap();
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn test_averaging_above_threshold() {
        let spec = ModelSpec::new(ArimaOrder::arma(1, 0)).with_intercept(false);
        let y = ar1_series(0.5, 300);
        let sample = WorkingSample::build(&y, None, &spec, false).unwrap();
        let mut opts = FitOptions::default();
        opts.average_threshold = 100;
        let objective = LikelihoodObjective::new(&spec, &sample, &opts).unwrap();
        let ll = objective.loglike(&[0.4]).unwrap();
        let cost = objective.cost(&[0.4]).unwrap();
        assert!((cost + ll / 300.0).abs() < 1e-12);
    }

    #[test]
    fn test_newton_direction_regularizes_indefinite() {
        let h = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
        let g = DVector::from_vec(vec![1.0, 1.0]);
        let d = newton_direction(&h, &g);
        // a descent direction for the cost: g'd > 0 (we step along -d)
        assert!(g.dot(&d) > 0.0);
    }

    #[test]
    fn test_lbfgs_and_newton_agree() {
        let spec = ModelSpec::new(ArimaOrder::arma(1, 0));
        let y: Vec<f64> = ar1_series(0.6, 400).iter().map(|v| v + 3.0).collect();
        let lbfgs = fit(&y, None, &spec, None, &FitOptions::default()).unwrap();
        let newton = fit(
            &y,
            None,
            &spec,
            None,
            &FitOptions::default().with_optimizer(OptimizerKind::NewtonRaphson),
        )
        .unwrap();
        assert_eq!(newton.method, "newton-raphson");
        for (a, b) in lbfgs.coefficients.iter().zip(newton.coefficients.iter()) {
            assert!((a - b).abs() < 1e-3, "{} vs {}", a, b);
        }
        assert!((lbfgs.loglike - newton.loglike).abs() < 1e-4);
    }

    #[test]
    fn test_start_length_checked_before_work() {
        let spec = ModelSpec::new(ArimaOrder::arma(1, 1));
        let y = ar1_series(0.5, 100);
        let err = fit(&y, None, &spec, Some(&[0.0, 0.1]), &FitOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ArimaError::ParamLengthMismatch {
                expected: 3,
                got: 2
            }
        );
    }

    #[test]
    fn test_iteration_cap_reports_not_converged() {
        let spec = ModelSpec::new(ArimaOrder::arma(1, 1)).with_intercept(false);
        let y = ar1_series(0.8, 300);
        let opts = FitOptions::default().with_max_iter(1).with_tolerance(1e-15);
        match fit(&y, None, &spec, Some(&[0.0, 0.0]), &opts) {
            Err(ArimaError::NotConverged {
                iterations,
                coefficients,
                loglike,
            }) => {
                assert_eq!(iterations, 1);
                assert_eq!(coefficients.len(), 2);
                assert!(loglike.is_finite());
            }
            other => panic!("expected NotConverged, got {:?}", other.map(|r| r.coefficients)),
        }
    }
}
