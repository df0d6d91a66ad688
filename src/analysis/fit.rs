//! Weighted least-squares polynomial fits, used to extrapolate observables
//! in a parameter such as the time step (`Dtau -> 0`).

use nalgebra::{DMatrix, DVector};

use super::stats::Estimate;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitPoint {
    pub x: f64,
    pub y: f64,
    /// Standard error of `y`.
    pub error: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialFit {
    /// Coefficients, constant term first.
    pub coefficients: DVector<f64>,
    pub errors: DVector<f64>,
    /// Zero when the fit has no degrees of freedom.
    pub chi2_per_dof: f64,
}

impl PolynomialFit {
    /// Value and error of the fit at `x = 0`.
    pub fn intercept(&self) -> Estimate {
        Estimate {
            mean: self.coefficients[0],
            error: self.errors[0],
        }
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * x + c)
    }
}

/// Fit `y = sum_k c_k x^k` for `k = 0..=degree`.
///
/// Points are weighted by `1 / error^2`. If any error is zero the fit is
/// unweighted and the coefficient errors are scaled by the residual
/// variance instead.
pub fn polynomial_fit(points: &[FitPoint], degree: usize) -> Result<PolynomialFit> {
    let n_coef = degree + 1;
    if points.len() < n_coef {
        return Err(Error::InvalidConfig(format!(
            "a degree {} fit needs at least {} points, got {}",
            degree,
            n_coef,
            points.len()
        )));
    }

    let weighted = points.iter().all(|p| p.error > 0.0);
    let sigma: Vec<f64> = points
        .iter()
        .map(|p| if weighted { p.error } else { 1.0 })
        .collect();

    let design = DMatrix::from_fn(points.len(), n_coef, |i, k| points[i].x.powi(k as i32) / sigma[i]);
    let rhs = DVector::from_fn(points.len(), |i, _| points[i].y / sigma[i]);

    let normal = design.transpose() * &design;
    let covariance = normal
        .try_inverse()
        .ok_or_else(|| Error::InvalidConfig("fit is singular, x values are not distinct enough".to_string()))?;
    let coefficients = &covariance * design.transpose() * &rhs;

    let residual = &design * &coefficients - &rhs;
    let chi2 = residual.norm_squared();
    let dof = points.len() - n_coef;
    let chi2_per_dof = if dof > 0 { chi2 / dof as f64 } else { 0.0 };

    let scale = if weighted { 1.0 } else { chi2_per_dof };
    let errors = DVector::from_fn(n_coef, |k, _| (covariance[(k, k)] * scale).sqrt());

    Ok(PolynomialFit {
        coefficients,
        errors,
        chi2_per_dof,
    })
}
