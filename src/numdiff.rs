//! Finite-difference derivatives of the log-likelihood.
//!
//! Steps are relative: h = step * max(|x_i|, 1), floored at `min_step`.
//! Central differences are used throughout; when one side of a central
//! difference cannot be evaluated the one-sided formula on the other side
//! is used instead.

use nalgebra::DMatrix;

use crate::error::{ArimaError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumDiff {
    /// Relative step for gradients and per-period Jacobians.
    pub gradient_step: f64,
    /// Relative step for second derivatives.
    pub hessian_step: f64,
    pub min_step: f64,
}

impl Default for NumDiff {
    fn default() -> Self {
        Self {
            gradient_step: 1e-6,
            hessian_step: 1e-4,
            min_step: 1e-8,
        }
    }
}

impl NumDiff {
    fn step(&self, x: f64, rel: f64) -> f64 {
        (rel * x.abs().max(1.0)).max(self.min_step)
    }

    /// Gradient of a scalar function.
    pub fn gradient<F>(&self, f: F, x: &[f64]) -> Result<Vec<f64>>
    where
        F: Fn(&[f64]) -> Result<f64>,
    {
        let n = x.len();
        let mut grad = vec![0.0; n];
        let mut work = x.to_vec();
        let mut f0: Option<f64> = None;

        for i in 0..n {
            let h = self.step(x[i], self.gradient_step);
            work[i] = x[i] + h;
            let fp = finite(f(&work));
            work[i] = x[i] - h;
            let fm = finite(f(&work));
            work[i] = x[i];

            grad[i] = match (fp, fm) {
                (Some(fp), Some(fm)) => (fp - fm) / (2.0 * h),
                (Some(fp), None) => (fp - center(&mut f0, &f, x)?) / h,
                (None, Some(fm)) => (center(&mut f0, &f, x)? - fm) / h,
                (None, None) => {
                    return Err(ArimaError::OptimizationFailed(format!(
                        "cannot differentiate along coordinate {}",
                        i
                    )))
                }
            };
        }
        Ok(grad)
    }

    /// Jacobian of a vector function; row t is d f_t / d x.
    pub fn jacobian<F>(&self, f: F, x: &[f64]) -> Result<DMatrix<f64>>
    where
        F: Fn(&[f64]) -> Result<Vec<f64>>,
    {
        let n = x.len();
        let mut work = x.to_vec();
        let mut base: Option<Vec<f64>> = None;
        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(n);

        for i in 0..n {
            let h = self.step(x[i], self.gradient_step);
            work[i] = x[i] + h;
            let fp = finite_vec(f(&work));
            work[i] = x[i] - h;
            let fm = finite_vec(f(&work));
            work[i] = x[i];

            let col: Vec<f64> = match (fp, fm) {
                (Some(fp), Some(fm)) => fp
                    .iter()
                    .zip(fm.iter())
                    .map(|(a, b)| (a - b) / (2.0 * h))
                    .collect(),
                (Some(fp), None) => {
                    let f0 = center_vec(&mut base, &f, x)?;
                    fp.iter().zip(f0.iter()).map(|(a, b)| (a - b) / h).collect()
                }
                (None, Some(fm)) => {
                    let f0 = center_vec(&mut base, &f, x)?;
                    f0.iter().zip(fm.iter()).map(|(a, b)| (a - b) / h).collect()
                }
                (None, None) => {
                    return Err(ArimaError::OptimizationFailed(format!(
                        "cannot differentiate along coordinate {}",
                        i
                    )))
                }
            };
            columns.push(col);
        }

        let rows = columns.first().map_or(0, |c| c.len());
        if columns.iter().any(|c| c.len() != rows) {
            return Err(ArimaError::OptimizationFailed(
                "inconsistent contribution lengths".into(),
            ));
        }
        Ok(DMatrix::from_fn(rows, n, |t, i| columns[i][t]))
    }

    /// Symmetric Hessian of a scalar function.
    pub fn hessian<F>(&self, f: F, x: &[f64]) -> Result<DMatrix<f64>>
    where
        F: Fn(&[f64]) -> Result<f64>,
    {
        let n = x.len();
        let f0 = f(x)?;
        let steps: Vec<f64> = x.iter().map(|&v| self.step(v, self.hessian_step)).collect();
        let mut work = x.to_vec();
        let mut hess = DMatrix::zeros(n, n);

        let eval = |work: &[f64]| -> Result<f64> {
            let v = f(work)?;
            if v.is_finite() {
                Ok(v)
            } else {
                Err(ArimaError::HessianSingular)
            }
        };

        for i in 0..n {
            let hi = steps[i];
            work[i] = x[i] + hi;
            let fp = eval(&work[..])?;
            work[i] = x[i] - hi;
            let fm = eval(&work[..])?;
            work[i] = x[i];
            hess[(i, i)] = (fp - 2.0 * f0 + fm) / (hi * hi);

            for j in 0..i {
                let hj = steps[j];
                let corner = |si: f64, sj: f64, work: &mut Vec<f64>| -> Result<f64> {
                    work[i] = x[i] + si * hi;
                    work[j] = x[j] + sj * hj;
                    let v = eval(&work[..]);
                    work[i] = x[i];
                    work[j] = x[j];
                    v
                };
                let fpp = corner(1.0, 1.0, &mut work)?;
                let fpm = corner(1.0, -1.0, &mut work)?;
                let fmp = corner(-1.0, 1.0, &mut work)?;
                let fmm = corner(-1.0, -1.0, &mut work)?;
                let v = (fpp - fpm - fmp + fmm) / (4.0 * hi * hj);
                hess[(i, j)] = v;
                hess[(j, i)] = v;
            }
        }
        Ok(hess)
    }
}

fn finite(v: Result<f64>) -> Option<f64> {
    v.ok().filter(|x| x.is_finite())
}

fn finite_vec(v: Result<Vec<f64>>) -> Option<Vec<f64>> {
    v.ok().filter(|xs| xs.iter().all(|x| x.is_finite()))
}

fn center<F>(cache: &mut Option<f64>, f: &F, x: &[f64]) -> Result<f64>
where
    F: Fn(&[f64]) -> Result<f64>,
{
    if let Some(v) = cache {
        return Ok(*v);
    }
    let v = f(x)?;
    *cache = Some(v);
    Ok(v)
}

fn center_vec<F>(cache: &mut Option<Vec<f64>>, f: &F, x: &[f64]) -> Result<Vec<f64>>
where
    F: Fn(&[f64]) -> Result<Vec<f64>>,
{
    if let Some(v) = cache {
        return Ok(v.clone());
    }
    let v = f(x)?;
    *cache = Some(v.clone());
    Ok(v)
}
