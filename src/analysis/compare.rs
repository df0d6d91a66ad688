//! Element-wise comparison of two runs, e.g. a reference build of the
//! engine against a test build.

use std::path::Path;

use tracing::warn;

use super::aggregate::{Aggregator, ObservableSummary};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { rtol: 1e-5, atol: 1e-8 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub name: String,
    pub matches: bool,
    /// Largest absolute difference of the means, `None` if the shapes differ
    /// or the observable is missing from the test run.
    pub max_abs_diff: Option<f64>,
}

/// `|a - b| <= atol + rtol * |b|` for every component of the means.
pub fn all_close(a: &ObservableSummary, b: &ObservableSummary, tol: Tolerance) -> bool {
    a.shape == b.shape
        && a.mean.iter().zip(b.mean.iter()).all(|(x, y)| {
            (x.re - y.re).abs() <= tol.atol + tol.rtol * y.re.abs()
                && (x.im - y.im).abs() <= tol.atol + tol.rtol * y.im.abs()
        })
}

fn max_abs_diff(a: &ObservableSummary, b: &ObservableSummary) -> Option<f64> {
    (a.shape == b.shape).then(|| {
        a.mean
            .iter()
            .zip(b.mean.iter())
            .map(|(x, y)| (x - y).norm())
            .fold(0.0, f64::max)
    })
}

/// Compare every observable of `reference` with the same observable in `test`.
pub fn compare_directories(
    reference: &Path,
    test: &Path,
    aggregator: &Aggregator,
    tol: Tolerance,
) -> Result<Vec<Comparison>> {
    let ref_obs = aggregator.summarize_all(reference)?;
    let test_names: Vec<String> = aggregator.list(test)?.names().map(str::to_string).collect();

    let mut out = Vec::with_capacity(ref_obs.len());
    for (name, r) in &ref_obs {
        if !test_names.contains(name) {
            warn!("{} missing in {}", name, test.display());
            out.push(Comparison {
                name: name.clone(),
                matches: false,
                max_abs_diff: None,
            });
            continue;
        }
        let t = aggregator.observable(test, name)?;
        out.push(Comparison {
            name: name.clone(),
            matches: all_close(&t, r, tol),
            max_abs_diff: max_abs_diff(&t, r),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_compare_directories() {
        let reference = tempdir().unwrap();
        let test = tempdir().unwrap();
        fs::write(reference.path().join("Ener_scal"), "2 1.0 1.0\n2 2.0 1.0\n").unwrap();
        fs::write(test.path().join("Ener_scal"), "2 1.0 1.0\n2 2.0 1.0\n").unwrap();
        fs::write(reference.path().join("Kin_scal"), "2 1.0 1.0\n").unwrap();
        fs::write(test.path().join("Kin_scal"), "2 1.1 1.0\n").unwrap();
        fs::write(reference.path().join("Pot_scal"), "2 1.0 1.0\n").unwrap();

        let result = compare_directories(reference.path(), test.path(), &Aggregator::default(), Tolerance::default())
            .unwrap();
        assert_eq!(result.len(), 3);
        assert!(result[0].matches);
        assert_eq!(result[0].max_abs_diff, Some(0.0));
        assert!(!result[1].matches);
        assert!((result[1].max_abs_diff.unwrap() - 0.1).abs() < 1e-12);
        assert!(!result[2].matches);
        assert_eq!(result[2].max_abs_diff, None);
    }
}
