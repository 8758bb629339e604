use crate::error::{ArimaError, Result};
use crate::types::ModelSpec;

/// Unpacked coefficient vector.
///
/// Layout (flat vector order):
/// `[intercept? | ar(masked) | sar(P) | ma(masked) | sma(Q) | exog(k)]`
///
/// `ar` and `ma` hold only the estimated lags; `full_ar`/`full_ma` expand
/// them back to length p/q with zeros at excluded lags.
#[derive(Debug, Clone, PartialEq)]
pub struct ArimaParams {
    pub intercept: Option<f64>,
    pub ar: Vec<f64>,
    pub sar: Vec<f64>,
    pub ma: Vec<f64>,
    pub sma: Vec<f64>,
    pub exog: Vec<f64>,
}

impl ArimaParams {
    /// Unpack a flat coefficient vector into blocks.
    pub fn from_flat(flat: &[f64], spec: &ModelSpec) -> Result<Self> {
        let expected = spec.n_coeffs();
        if flat.len() != expected {
            return Err(ArimaError::ParamLengthMismatch {
                expected,
                got: flat.len(),
            });
        }

        let mut i = 0;
        let intercept = if spec.intercept {
            i += 1;
            Some(flat[0])
        } else {
            None
        };
        let n_ar = spec.n_ar();
        let ar = flat[i..i + n_ar].to_vec();
        i += n_ar;
        let sar = flat[i..i + spec.order.pp].to_vec();
        i += spec.order.pp;
        let n_ma = spec.n_ma();
        let ma = flat[i..i + n_ma].to_vec();
        i += n_ma;
        let sma = flat[i..i + spec.order.qq].to_vec();
        i += spec.order.qq;
        let exog = flat[i..].to_vec();

        Ok(Self {
            intercept,
            ar,
            sar,
            ma,
            sma,
            exog,
        })
    }

    /// Pack blocks back into a flat vector.
    pub fn to_flat(&self) -> Vec<f64> {
        let mut v = Vec::new();
        v.extend(self.intercept);
        v.extend(&self.ar);
        v.extend(&self.sar);
        v.extend(&self.ma);
        v.extend(&self.sma);
        v.extend(&self.exog);
        v
    }

    /// Non-seasonal AR coefficients for lags 1..=p, zero at excluded lags.
    pub fn full_ar(&self, spec: &ModelSpec) -> Vec<f64> {
        expand_masked(&self.ar, &spec.ar_mask)
    }

    /// Non-seasonal MA coefficients for lags 1..=q, zero at excluded lags.
    pub fn full_ma(&self, spec: &ModelSpec) -> Vec<f64> {
        expand_masked(&self.ma, &spec.ma_mask)
    }

    /// Write full-length non-seasonal MA coefficients back into the masked block.
    pub fn set_full_ma(&mut self, full: &[f64], spec: &ModelSpec) {
        self.ma = full
            .iter()
            .zip(spec.ma_mask.iter())
            .filter(|(_, &m)| m)
            .map(|(&c, _)| c)
            .collect();
    }

    /// Design coefficients `A = [mu, beta_1, ..., beta_k]`, zero intercept when absent.
    pub fn design_coeffs(&self) -> Vec<f64> {
        let mut a = Vec::with_capacity(self.exog.len() + 1);
        a.push(self.intercept.unwrap_or(0.0));
        a.extend(&self.exog);
        a
    }
}

fn expand_masked(coeffs: &[f64], mask: &[bool]) -> Vec<f64> {
    let mut it = coeffs.iter();
    mask.iter()
        .map(|&m| if m { it.next().copied().unwrap_or(0.0) } else { 0.0 })
        .collect()
}
