use nalgebra::{DMatrix, DVector};

use crate::data::WorkingSample;
use crate::error::{ArimaError, Result};
use crate::params::ArimaParams;
use crate::polynomial::{reduced_ar, reduced_ma};
use crate::types::ModelSpec;

/// Which state vector the filter runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateForm {
    /// ARMA block only; the filter sees the differenced series.
    Plain,
    /// ARMA block followed by `n_diff` cells of lagged (partially
    /// differenced) levels; the filter sees levels and tolerates gaps.
    LevelsAugmented { n_diff: usize },
}

/// Hamilton-form state space for a seasonal ARIMA with regressors.
///
/// State equation:  s_{t+1} = F * s_t + l * (A' x_t) + e_1 * eps_{t+1}
/// Observation:     y_t     = A' x_t + H' * s_t
///
/// The ARMA block has AR coefficients in the first row of F and MA
/// coefficients in H. Q = e_1 e_1' because the innovation variance is
/// concentrated out of the likelihood. `l` is zero in the plain form.
#[derive(Debug, Clone)]
pub struct StateSpace {
    pub form: StateForm,
    /// ARMA block dimension r = max(k_ar, k_ma + 1).
    pub k_order: usize,
    pub k_states: usize,
    pub transition: DMatrix<f64>,    // F: k_states x k_states
    pub design: DVector<f64>,        // H: k_states
    pub state_cov: DMatrix<f64>,     // Q: k_states x k_states
    pub obs_coeffs: DVector<f64>,    // A: k_exog + 1
    pub intercept_loading: DVector<f64>,
    pub initial_state: DVector<f64>, // S0
    pub initial_cov: DMatrix<f64>,   // P0
    condense_above: usize,
}

impl StateSpace {
    /// Allocate the system at its run-long dimension and load the fixed
    /// structural entries. Coefficient-dependent entries are filled by `rewrite`.
    pub fn new(spec: &ModelSpec, sample: &WorkingSample, condense_above: usize) -> Result<Self> {
        let order = &spec.order;
        let r = order.k_order();
        let n_diff = order.k_states_diff();
        let form = if sample.levels_form {
            StateForm::LevelsAugmented { n_diff }
        } else {
            StateForm::Plain
        };
        let k_states = match form {
            StateForm::Plain => r,
            StateForm::LevelsAugmented { n_diff } => r + n_diff,
        };

        let mut transition = DMatrix::<f64>::zeros(k_states, k_states);
        let mut design = DVector::<f64>::zeros(k_states);
        let mut state_cov = DMatrix::<f64>::zeros(k_states, k_states);
        let mut intercept_loading = DVector::<f64>::zeros(k_states);
        let mut initial_state = DVector::<f64>::zeros(k_states);

        // ARMA companion shift
        for i in 1..r {
            transition[(i, i - 1)] = 1.0;
        }
        design[0] = 1.0;
        state_cov[(0, 0)] = 1.0;

        if let StateForm::LevelsAugmented { n_diff } = form {
            if sample.presample.len() != n_diff {
                return Err(ArimaError::DataError(format!(
                    "levels form needs {} presample values, got {}",
                    n_diff,
                    sample.presample.len()
                )));
            }
            let (d, dd, s) = (order.d, order.dd, order.s);
            let last_of_layer = |l: usize| r + d + l * s + s - 1;

            // Regular cells: cell i holds the i-th difference of y_{t-1}.
            for i in 0..d {
                let row = r + i;
                for j in i..d {
                    transition[(row, r + j)] = 1.0;
                }
                for l in 0..dd {
                    transition[(row, last_of_layer(l))] = 1.0;
                }
                intercept_loading[row] = 1.0;
                design[row] = 1.0;
            }
            // Seasonal layers: cyclic blocks of s lagged values.
            for l in 0..dd {
                let base = r + d + l * s;
                for l2 in l..dd {
                    transition[(base, last_of_layer(l2))] = 1.0;
                }
                for c in 1..s {
                    transition[(base + c, base + c - 1)] = 1.0;
                }
                intercept_loading[base] = 1.0;
                design[last_of_layer(l)] = 1.0;
            }

            let cells = initial_cells(&sample.presample, d, dd, s);
            for (i, v) in cells.into_iter().enumerate() {
                initial_state[r + i] = v;
            }
        }

        Ok(Self {
            form,
            k_order: r,
            k_states,
            transition,
            design,
            state_cov,
            obs_coeffs: DVector::zeros(spec.n_exog() + 1),
            intercept_loading,
            initial_state,
            initial_cov: DMatrix::zeros(k_states, k_states),
            condense_above,
        })
    }

    /// Load a coefficient vector: AR row of F, MA entries of H (and the
    /// MA row copies under levels augmentation), A and P0.
    pub fn rewrite(&mut self, params: &ArimaParams, spec: &ModelSpec) -> Result<()> {
        let r = self.k_order;
        let red_ar = reduced_ar(params, spec);
        let red_ma = reduced_ma(params, spec);

        for j in 0..r {
            self.transition[(0, j)] = red_ar.get(j + 1).map_or(0.0, |c| -c);
        }
        for j in 1..r {
            self.design[j] = red_ma.get(j).copied().unwrap_or(0.0);
        }

        if let StateForm::LevelsAugmented { .. } = self.form {
            for row in r..self.k_states {
                if self.intercept_loading[row] != 0.0 {
                    for j in 0..r {
                        self.transition[(row, j)] = self.design[j];
                    }
                }
            }
        }

        let a = params.design_coeffs();
        if a.len() != self.obs_coeffs.len() {
            return Err(ArimaError::ParamLengthMismatch {
                expected: self.obs_coeffs.len() - 1,
                got: a.len() - 1,
            });
        }
        self.obs_coeffs.copy_from_slice(&a);

        let p_arma = if red_ar.len() <= 1 || red_ar[1..].iter().all(|&c| c == 0.0) {
            DMatrix::identity(r, r)
        } else {
            let f = self.transition.view((0, 0), (r, r)).into_owned();
            let q = self.state_cov.view((0, 0), (r, r)).into_owned();
            solve_lyapunov(&f, &q, self.condense_above)?
        };
        self.initial_cov.fill(0.0);
        self.initial_cov.view_mut((0, 0), (r, r)).copy_from(&p_arma);
        Ok(())
    }

    /// Initial state mean S0 and covariance P0.
    pub fn initial_state(&self) -> (&DVector<f64>, &DMatrix<f64>) {
        (&self.initial_state, &self.initial_cov)
    }

    pub fn dimension(&self) -> usize {
        self.k_states
    }

    pub fn is_levels_form(&self) -> bool {
        matches!(self.form, StateForm::LevelsAugmented { .. })
    }

    /// A' x_t for one regressor row.
    pub fn regression_mean(&self, x_t: &[f64]) -> f64 {
        self.obs_coeffs
            .iter()
            .zip(x_t.iter())
            .map(|(a, x)| a * x)
            .sum()
    }
}

/// Solve P = F P F' + Q for the stationary state covariance.
///
/// Up to `condense_above` the r^2 x r^2 Kronecker system is solved directly;
/// beyond it only the r(r+1)/2 upper-triangle unknowns are kept.
pub fn solve_lyapunov(f: &DMatrix<f64>, q: &DMatrix<f64>, condense_above: usize) -> Result<DMatrix<f64>> {
    let r = f.nrows();
    let p = if r > condense_above {
        solve_lyapunov_condensed(f, q)?
    } else {
        solve_lyapunov_full(f, q)?
    };

    for i in 0..r {
        let v = p[(i, i)];
        if !v.is_finite() || v < 0.0 {
            return Err(ArimaError::SingularLyapunov);
        }
    }
    Ok(p)
}

fn solve_lyapunov_full(f: &DMatrix<f64>, q: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let r = f.nrows();
    let m = DMatrix::<f64>::identity(r * r, r * r) - f.kronecker(f);
    let vec_q = DVector::from_column_slice(q.as_slice());
    let vec_p = m.lu().solve(&vec_q).ok_or(ArimaError::SingularLyapunov)?;
    let p = DMatrix::from_column_slice(r, r, vec_p.as_slice());
    Ok((&p + p.transpose()) * 0.5)
}

fn solve_lyapunov_condensed(f: &DMatrix<f64>, q: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let r = f.nrows();
    let m = r * (r + 1) / 2;
    // Row-major upper triangle index of (i, j), i <= j.
    let idx = |i: usize, j: usize| -> usize {
        let (a, b) = if i <= j { (i, j) } else { (j, i) };
        a * r - a * (a + 1) / 2 + b
    };

    let mut sys = DMatrix::<f64>::identity(m, m);
    let mut rhs = DVector::<f64>::zeros(m);
    for i in 0..r {
        for j in i..r {
            let row = idx(i, j);
            rhs[row] = q[(i, j)];
            for k in 0..r {
                let fik = f[(i, k)];
                if fik == 0.0 {
                    continue;
                }
                for l in 0..r {
                    let fjl = f[(j, l)];
                    if fjl != 0.0 {
                        sys[(row, idx(k, l))] -= fik * fjl;
                    }
                }
            }
        }
    }

    let sol = sys.lu().solve(&rhs).ok_or(ArimaError::SingularLyapunov)?;
    let mut p = DMatrix::<f64>::zeros(r, r);
    for i in 0..r {
        for j in i..r {
            p[(i, j)] = sol[idx(i, j)];
            p[(j, i)] = sol[idx(i, j)];
        }
    }
    Ok(p)
}

/// Initial lagged-level cells from the d + s*D presample levels.
///
/// Regular cell i holds the i-th difference of the last presample value;
/// seasonal layer l, cell c holds the d-th regular and l-th seasonal
/// difference of the value c+1 periods before the sample.
fn initial_cells(presample: &[f64], d: usize, dd: usize, s: usize) -> Vec<f64> {
    let n = presample.len();
    let mut cells = Vec::with_capacity(n);
    if n == 0 {
        return cells;
    }

    let mut series = presample.to_vec();
    for _ in 0..d {
        cells.push(series[n - 1]);
        series = lag_difference(&series, 1);
    }
    for _ in 0..dd {
        for c in 0..s {
            cells.push(series[n - 1 - c]);
        }
        series = lag_difference(&series, s);
    }
    cells
}

/// `v[t] - v[t-lag]`, NaN where the lag reaches before the start.
fn lag_difference(v: &[f64], lag: usize) -> Vec<f64> {
    (0..v.len())
        .map(|t| if t >= lag { v[t] - v[t - lag] } else { f64::NAN })
        .collect()
}
