//! Bin statistics: plain and jackknife error bars, skipping and rebinning.
//!
//! Samples are stored as matrices with one row per bin and one column per
//! observable component, so every estimate is computed element-wise.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use tracing::warn;

use crate::io::NamelistFile;
use crate::params::ParamValue;

/// Mean with its standard error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Estimate {
    pub mean: f64,
    pub error: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMethod {
    /// Standard deviation of the bin values divided by sqrt(N).
    #[default]
    Plain,
    /// Sign-reweighted ratio `<O s> / <s>` with jackknife error bars.
    Jackknife,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisOptions {
    /// Leading bins dropped before averaging.
    pub n_skip: usize,
    /// Number of consecutive bins merged into one.
    pub n_rebin: usize,
    pub method: ErrorMethod,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            n_skip: 0,
            n_rebin: 1,
            method: ErrorMethod::Plain,
        }
    }
}

impl AnalysisOptions {
    /// Options from the `N_skip` and `N_rebin` keys of a parameter file;
    /// missing keys keep the defaults.
    pub fn from_parameters(file: &NamelistFile) -> Self {
        let read = |key: &str| {
            file.get(key)
                .and_then(ParamValue::as_i64)
                .map(|v| v.max(0) as usize)
        };
        let defaults = Self::default();
        Self {
            n_skip: read("N_skip").unwrap_or(defaults.n_skip),
            n_rebin: read("N_rebin").unwrap_or(defaults.n_rebin).max(1),
            method: defaults.method,
        }
    }
}

/// Mean and standard error of a sample. `None` for an empty sample.
pub fn mean_and_error(samples: &[f64]) -> Option<Estimate> {
    if samples.is_empty() {
        return None;
    }
    let m = DMatrix::from_column_slice(samples.len(), 1, samples);
    column_estimates(&m).into_iter().next()
}

/// Plain estimates for every column of `samples`.
///
/// The error is the sample standard deviation (N - 1 in the denominator)
/// divided by sqrt(N); a single row gives zero error.
pub fn column_estimates(samples: &DMatrix<f64>) -> Vec<Estimate> {
    let n = samples.nrows();
    if n == 1 {
        warn!("only one bin available, error bars are set to zero");
    }
    samples
        .column_iter()
        .map(|col| {
            let mean = col.mean();
            let error = if n > 1 {
                let var = col.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
                (var / n as f64).sqrt()
            } else {
                0.0
            };
            Estimate { mean, error }
        })
        .collect()
}

/// Jackknife estimates of `<O s> / <s>` per column, where `values` holds
/// the sign-normalized bin averages `O` and `signs` the bin signs `s`.
///
/// `None` if the summed sign, or the sum with any single bin left out,
/// is zero.
pub fn jackknife_ratio(values: &DMatrix<f64>, signs: &DVector<f64>) -> Option<Vec<Estimate>> {
    let n = values.nrows();
    let sign_total = signs.sum();
    if sign_total == 0.0 || (n > 1 && signs.iter().any(|s| sign_total - s == 0.0)) {
        return None;
    }

    let estimates = values
        .column_iter()
        .map(|col| {
            let weighted = col.component_mul(signs);
            let total = weighted.sum();
            let mean = total / sign_total;
            if n < 2 {
                return Estimate { mean, error: 0.0 };
            }
            let leave_one_out: Vec<f64> = (0..n)
                .map(|i| (total - weighted[i]) / (sign_total - signs[i]))
                .collect();
            let jk_mean = leave_one_out.iter().sum::<f64>() / n as f64;
            let var = leave_one_out.iter().map(|x| (x - jk_mean).powi(2)).sum::<f64>()
                * (n - 1) as f64
                / n as f64;
            Estimate { mean, error: var.sqrt() }
        })
        .collect();
    Some(estimates)
}

/// Average groups of `n_rebin` consecutive rows. A trailing incomplete
/// group is dropped.
pub fn rebin(samples: &DMatrix<f64>, n_rebin: usize) -> DMatrix<f64> {
    if n_rebin <= 1 {
        return samples.clone();
    }
    let rows = samples.nrows() / n_rebin;
    DMatrix::from_fn(rows, samples.ncols(), |i, j| {
        samples.rows(i * n_rebin, n_rebin).column(j).mean()
    })
}

/// Drop the first `n_skip` rows.
pub fn skip(samples: &DMatrix<f64>, n_skip: usize) -> DMatrix<f64> {
    let n_skip = n_skip.min(samples.nrows());
    samples.rows(n_skip, samples.nrows() - n_skip).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    #[test]
    fn test_mean_and_error_three_bins() {
        let est = mean_and_error(&[-2.10, -2.09, -2.11]).unwrap();
        assert_relative_eq!(est.mean, -2.10, epsilon = 1e-12);
        // stddev = 0.01, error = 0.01 / sqrt(3)
        assert_relative_eq!(est.error, 0.01 / 3f64.sqrt(), epsilon = 1e-12);
        assert!(est.error.is_finite() && est.error > 0.0);
    }

    #[test]
    fn test_empty_and_single_sample() {
        assert!(mean_and_error(&[]).is_none());
        let est = mean_and_error(&[1.5]).unwrap();
        assert_eq!(est, Estimate { mean: 1.5, error: 0.0 });
    }

    #[test]
    fn test_column_estimates_are_elementwise() {
        let m = DMatrix::from_row_slice(3, 2, &[1.0, 10.0, 2.0, 20.0, 3.0, 30.0]);
        let est = column_estimates(&m);
        assert_relative_eq!(est[0].mean, 2.0);
        assert_relative_eq!(est[1].mean, 20.0);
        assert_relative_eq!(est[1].error, 10.0 * est[0].error, epsilon = 1e-12);
    }

    #[test]
    fn test_rebin_and_skip() {
        let m = DMatrix::from_column_slice(5, 1, &[1.0, 3.0, 5.0, 7.0, 9.0]);
        let r = rebin(&m, 2);
        assert_eq!(r.nrows(), 2);
        assert_relative_eq!(r[(0, 0)], 2.0);
        assert_relative_eq!(r[(1, 0)], 6.0);

        let s = skip(&m, 2);
        assert_eq!(s.nrows(), 3);
        assert_relative_eq!(s[(0, 0)], 5.0);
        assert_eq!(skip(&m, 10).nrows(), 0);
    }

    #[test]
    fn test_jackknife_matches_plain_for_unit_sign() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let normal = Normal::new(-1.3, 0.2).unwrap();
        let samples: Vec<f64> = (0..40).map(|_| normal.sample(&mut rng)).collect();
        let values = DMatrix::from_column_slice(samples.len(), 1, &samples);
        let signs = DVector::from_element(samples.len(), 1.0);

        let plain = column_estimates(&values)[0];
        let jack = jackknife_ratio(&values, &signs).unwrap()[0];
        assert_relative_eq!(plain.mean, jack.mean, epsilon = 1e-12);
        assert_relative_eq!(plain.error, jack.error, epsilon = 1e-10);
    }

    #[test]
    fn test_jackknife_reweights_by_sign() {
        let values = DMatrix::from_column_slice(2, 1, &[1.0, 3.0]);
        let signs = DVector::from_column_slice(&[1.0, 0.5]);
        let est = jackknife_ratio(&values, &signs).unwrap()[0];
        // (1*1 + 3*0.5) / 1.5
        assert_relative_eq!(est.mean, 2.5 / 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_jackknife_rejects_vanishing_leave_one_out_sign() {
        let values = DMatrix::from_column_slice(2, 1, &[1.0, 3.0]);
        assert!(jackknife_ratio(&values, &DVector::from_column_slice(&[1.0, 0.0])).is_none());
        assert!(jackknife_ratio(&values, &DVector::from_column_slice(&[1.0, -1.0])).is_none());
        assert!(jackknife_ratio(&values, &DVector::from_column_slice(&[1.0, 0.5])).is_some());
    }
}
