use nalgebra::linalg::Schur;
use nalgebra::{Complex, DMatrix};

use crate::error::{ArimaError, Result};
use crate::params::ArimaParams;
use crate::types::ModelSpec;

/// Polynomial multiplication (convolution): c[k] = sum_i a[i]*b[k-i].
pub fn polymul(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return vec![];
    }
    let mut r = vec![0.0; a.len() + b.len() - 1];
    for (i, &ai) in a.iter().enumerate() {
        for (j, &bj) in b.iter().enumerate() {
            r[i + j] += ai * bj;
        }
    }
    r
}

/// AR polynomial: 1 - phi_1*L - phi_2*L^2 - ...
/// `coeffs` = [phi_1, phi_2, ...], `max_lag` = p.
pub fn make_ar_poly(coeffs: &[f64], max_lag: usize) -> Vec<f64> {
    let mut p = vec![0.0; max_lag + 1];
    p[0] = 1.0;
    for (i, &c) in coeffs.iter().take(max_lag).enumerate() {
        p[i + 1] = -c;
    }
    p
}

/// Seasonal AR polynomial: 1 - Phi_1*L^s - Phi_2*L^(2s) - ...
pub fn make_seasonal_ar_poly(coeffs: &[f64], s: usize) -> Vec<f64> {
    if coeffs.is_empty() {
        return vec![1.0];
    }
    let mut p = vec![0.0; coeffs.len() * s + 1];
    p[0] = 1.0;
    for (i, &c) in coeffs.iter().enumerate() {
        p[(i + 1) * s] = -c;
    }
    p
}

/// MA polynomial: 1 + theta_1*L + theta_2*L^2 + ...
pub fn make_ma_poly(coeffs: &[f64], max_lag: usize) -> Vec<f64> {
    let mut p = vec![0.0; max_lag + 1];
    p[0] = 1.0;
    for (i, &c) in coeffs.iter().take(max_lag).enumerate() {
        p[i + 1] = c;
    }
    p
}

/// Seasonal MA polynomial: 1 + Theta_1*L^s + Theta_2*L^(2s) + ...
pub fn make_seasonal_ma_poly(coeffs: &[f64], s: usize) -> Vec<f64> {
    if coeffs.is_empty() {
        return vec![1.0];
    }
    let mut p = vec![0.0; coeffs.len() * s + 1];
    p[0] = 1.0;
    for (i, &c) in coeffs.iter().enumerate() {
        p[(i + 1) * s] = c;
    }
    p
}

/// Combined AR polynomial = (non-seasonal AR) x (seasonal AR), excluded lags zero.
pub fn reduced_ar(params: &ArimaParams, spec: &ModelSpec) -> Vec<f64> {
    polymul(
        &make_ar_poly(&params.full_ar(spec), spec.order.p),
        &make_seasonal_ar_poly(&params.sar, spec.order.s),
    )
}

/// Combined MA polynomial = (non-seasonal MA) x (seasonal MA), excluded lags zero.
pub fn reduced_ma(params: &ArimaParams, spec: &ModelSpec) -> Vec<f64> {
    polymul(
        &make_ma_poly(&params.full_ma(spec), spec.order.q),
        &make_seasonal_ma_poly(&params.sma, spec.order.s),
    )
}

/// Differencing operator (1 - L)^d (1 - L^s)^D.
pub fn differencing_poly(d: usize, dd: usize, s: usize) -> Vec<f64> {
    let mut poly = vec![1.0];
    for _ in 0..d {
        poly = polymul(&poly, &[1.0, -1.0]);
    }
    for _ in 0..dd {
        let mut seasonal = vec![0.0; s + 1];
        seasonal[0] = 1.0;
        seasonal[s] = -1.0;
        poly = polymul(&poly, &seasonal);
    }
    poly
}

/// Which lag polynomial a set of roots belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagPolynomial {
    Ar,
    SeasonalAr,
    Ma,
    SeasonalMa,
}

/// Roots of one lag polynomial. Seasonal polynomials are solved in z^s.
#[derive(Debug, Clone)]
pub struct PolyRoots {
    pub kind: LagPolynomial,
    pub roots: Vec<Complex<f64>>,
}

impl PolyRoots {
    pub fn moduli(&self) -> Vec<f64> {
        self.roots.iter().map(|r| r.norm()).collect()
    }

    /// Stationarity (AR) or invertibility (MA) holds when every root is outside the unit circle.
    pub fn outside_unit_circle(&self) -> bool {
        self.roots.iter().all(|r| r.norm() > 1.0)
    }
}

/// Roots of `c[0] + c[1] z + ... + c[n] z^n` via companion-matrix eigenvalues.
///
/// Trailing zero coefficients lower the degree; a constant polynomial has no roots.
pub fn poly_roots(coeffs: &[f64]) -> Result<Vec<Complex<f64>>> {
    let degree = match coeffs.iter().rposition(|&c| c != 0.0) {
        Some(n) => n,
        None => return Ok(vec![]),
    };
    if degree == 0 {
        return Ok(vec![]);
    }
    let lead = coeffs[degree];
    if degree == 1 {
        return Ok(vec![Complex::new(-coeffs[0] / lead, 0.0)]);
    }

    // Companion of the monic polynomial: first row holds -c[n-1-j]/c[n].
    let mut companion = DMatrix::<f64>::zeros(degree, degree);
    for j in 0..degree {
        companion[(0, j)] = -coeffs[degree - 1 - j] / lead;
    }
    for i in 1..degree {
        companion[(i, i - 1)] = 1.0;
    }

    let schur = Schur::try_new(companion, f64::EPSILON, 1000 + 100 * degree).ok_or_else(|| {
        ArimaError::DataError("polynomial root iteration did not converge".into())
    })?;
    Ok(schur.complex_eigenvalues().iter().copied().collect())
}

/// Roots of each lag polynomial present in the model.
pub fn model_roots(params: &ArimaParams, spec: &ModelSpec) -> Result<Vec<PolyRoots>> {
    let mut out = Vec::new();
    if spec.order.p > 0 {
        out.push(PolyRoots {
            kind: LagPolynomial::Ar,
            roots: poly_roots(&make_ar_poly(&params.full_ar(spec), spec.order.p))?,
        });
    }
    if spec.order.pp > 0 {
        out.push(PolyRoots {
            kind: LagPolynomial::SeasonalAr,
            roots: poly_roots(&make_ar_poly(&params.sar, spec.order.pp))?,
        });
    }
    if spec.order.q > 0 {
        out.push(PolyRoots {
            kind: LagPolynomial::Ma,
            roots: poly_roots(&make_ma_poly(&params.full_ma(spec), spec.order.q))?,
        });
    }
    if spec.order.qq > 0 {
        out.push(PolyRoots {
            kind: LagPolynomial::SeasonalMa,
            roots: poly_roots(&make_ma_poly(&params.sma, spec.order.qq))?,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArimaOrder;

    fn sorted_moduli(roots: &[Complex<f64>]) -> Vec<f64> {
        let mut m: Vec<f64> = roots.iter().map(|r| r.norm()).collect();
        m.sort_by(|a, b| a.partial_cmp(b).unwrap());
        m
    }

    #[test]
    fn test_polymul_basic() {
        // (1 + 2x)(1 + 3x) = 1 + 5x + 6x^2
        let r = polymul(&[1.0, 2.0], &[1.0, 3.0]);
        assert_eq!(r.len(), 3);
        assert!((r[0] - 1.0).abs() < 1e-10);
        assert!((r[1] - 5.0).abs() < 1e-10);
        assert!((r[2] - 6.0).abs() < 1e-10);
    }

    #[test]
    fn test_polymul_empty() {
        let empty: Vec<f64> = vec![];
        assert_eq!(polymul(&[], &[1.0, 2.0]), empty);
        assert_eq!(polymul(&[1.0], &[]), empty);
    }

    #[test]
    fn test_make_ar_poly() {
        // AR(2): phi=[0.5, -0.3] -> [1, -0.5, 0.3]
        let p = make_ar_poly(&[0.5, -0.3], 2);
        assert_eq!(p, vec![1.0, -0.5, 0.3]);
    }

    #[test]
    fn test_seasonal_ar_poly() {
        let p = make_seasonal_ar_poly(&[0.3], 12);
        assert_eq!(p.len(), 13);
        assert!((p[12] + 0.3).abs() < 1e-10);
        assert!(p[1..12].iter().all(|&c| c == 0.0));
    }

    #[test]
    fn test_reduced_ar_sarima() {
        // (1 - 0.5L)(1 - 0.3L^12) = 1 - 0.5L - 0.3L^12 + 0.15L^13
        let spec = ModelSpec::new(ArimaOrder::new(1, 0, 0, 1, 0, 0, 12)).with_intercept(false);
        let params = ArimaParams::from_flat(&[0.5, 0.3], &spec).unwrap();
        let r = reduced_ar(&params, &spec);
        assert_eq!(r.len(), 14);
        assert!((r[1] + 0.5).abs() < 1e-10);
        assert!((r[12] + 0.3).abs() < 1e-10);
        assert!((r[13] - 0.15).abs() < 1e-10);
    }

    #[test]
    fn test_reduced_ma_with_mask() {
        // theta_2 only: (1 + 0.4L^2)(1 + 0.5L^4)
        let spec = ModelSpec::new(ArimaOrder::new(0, 0, 2, 0, 0, 1, 4))
            .with_intercept(false)
            .with_ma_lags(&[2]);
        let params = ArimaParams::from_flat(&[0.4, 0.5], &spec).unwrap();
        let r = reduced_ma(&params, &spec);
        assert_eq!(r, vec![1.0, 0.0, 0.4, 0.0, 0.5, 0.0, 0.2]);
    }

    #[test]
    fn test_differencing_poly() {
        assert_eq!(differencing_poly(0, 0, 0), vec![1.0]);
        assert_eq!(differencing_poly(2, 0, 0), vec![1.0, -2.0, 1.0]);
        // (1 - L)(1 - L^4) = 1 - L - L^4 + L^5
        assert_eq!(
            differencing_poly(1, 1, 4),
            vec![1.0, -1.0, 0.0, 0.0, -1.0, 1.0]
        );
    }

    #[test]
    fn test_poly_roots_linear_and_quadratic() {
        // 1 - 0.5z -> z = 2
        let r = poly_roots(&[1.0, -0.5]).unwrap();
        assert_eq!(r.len(), 1);
        assert!((r[0].re - 2.0).abs() < 1e-12);

        // (1 - 0.5z)(1 - 0.25z) = 1 - 0.75z + 0.125z^2 -> roots 2, 4
        let r = poly_roots(&[1.0, -0.75, 0.125]).unwrap();
        let m = sorted_moduli(&r);
        assert!((m[0] - 2.0).abs() < 1e-9);
        assert!((m[1] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_poly_roots_complex_pair() {
        // 1 + z^2 / 4 -> z = +-2i
        let r = poly_roots(&[1.0, 0.0, 0.25]).unwrap();
        assert_eq!(r.len(), 2);
        for root in &r {
            assert!(root.re.abs() < 1e-9);
            assert!((root.im.abs() - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_poly_roots_trailing_zero_degree() {
        assert!(poly_roots(&[1.0, 0.0, 0.0]).unwrap().is_empty());
        assert_eq!(poly_roots(&[1.0, -0.5, 0.0]).unwrap().len(), 1);
    }

    #[test]
    fn test_model_roots_kinds() {
        let spec = ModelSpec::new(ArimaOrder::new(1, 0, 1, 1, 0, 0, 4)).with_intercept(false);
        let params = ArimaParams::from_flat(&[0.5, 0.25, 0.4], &spec).unwrap();
        let roots = model_roots(&params, &spec).unwrap();
        let kinds: Vec<LagPolynomial> = roots.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![LagPolynomial::Ar, LagPolynomial::SeasonalAr, LagPolynomial::Ma]
        );
        assert!((roots[0].moduli()[0] - 2.0).abs() < 1e-12);
        assert!((roots[1].moduli()[0] - 4.0).abs() < 1e-12);
        assert!((roots[2].moduli()[0] - 2.5).abs() < 1e-12);
        assert!(roots.iter().all(|r| r.outside_unit_circle()));
    }
}
