//! Gaussian sample paths from a seasonal ARIMA with regressors.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{ArimaError, Result};
use crate::params::ArimaParams;
use crate::polynomial::{differencing_poly, reduced_ar, reduced_ma};
use crate::types::ModelSpec;

/// Draw one path of length `n` from the model in `spec` at `coefficients`.
///
/// The differenced series is `w_t = mu + x_t'beta + u_t` with `u_t` ARMA
/// driven by N(0, sigma^2) shocks, then integrated `d` and `D` times from
/// zero levels. The first `burn_in` draws are discarded. `exog` is
/// column-major and must cover the `n` returned periods.
pub fn simulate_arima<R: Rng>(
    spec: &ModelSpec,
    coefficients: &[f64],
    sigma: f64,
    n: usize,
    burn_in: usize,
    exog: Option<&[Vec<f64>]>,
    rng: &mut R,
) -> Result<Vec<f64>> {
    spec.validate()?;
    let params = ArimaParams::from_flat(coefficients, spec)?;
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(ArimaError::InvalidSpec(format!(
            "innovation standard deviation must be positive, got {}",
            sigma
        )));
    }
    let cols: &[Vec<f64>] = exog.unwrap_or(&[]);
    if cols.len() != spec.n_exog() || cols.iter().any(|c| c.len() < n) {
        return Err(ArimaError::DataError(format!(
            "simulation needs {} regressor columns of length {}",
            spec.n_exog(),
            n
        )));
    }

    let ar = reduced_ar(&params, spec);
    let ma = reduced_ma(&params, spec);
    let delta = differencing_poly(spec.order.d, spec.order.dd, spec.order.s);
    let mu = params.intercept.unwrap_or(0.0);

    let normal = Normal::new(0.0, sigma)
        .map_err(|e| ArimaError::InvalidSpec(format!("bad innovation distribution: {}", e)))?;

    let total = burn_in + n;
    let eps: Vec<f64> = (0..total).map(|_| normal.sample(rng)).collect();
    let mut u = vec![0.0; total];
    let mut y = vec![0.0; total];

    for t in 0..total {
        let mut val = eps[t];
        for (j, c) in ar.iter().enumerate().skip(1) {
            if t >= j {
                val -= c * u[t - j];
            }
        }
        for (j, c) in ma.iter().enumerate().skip(1) {
            if t >= j {
                val += c * eps[t - j];
            }
        }
        u[t] = val;

        let mut w = mu + val;
        if t >= burn_in {
            let row = t - burn_in;
            w += cols
                .iter()
                .zip(params.exog.iter())
                .map(|(col, b)| b * col[row])
                .sum::<f64>();
        }

        // delta(L) y_t = w_t
        let mut level = w;
        for (j, c) in delta.iter().enumerate().skip(1) {
            if t >= j {
                level -= c * y[t - j];
            }
        }
        y[t] = level;
    }

    Ok(y.split_off(burn_in))
}
