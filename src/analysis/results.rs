//! Results written by the engine's own analysis program.
//!
//! `ana.out` leaves one text file per observable next to the bins:
//!
//! ```text
//!  Effective number of bins, and bins:     10     10
//!
//!  OBS :    1     -0.290738E+00    0.121591E-02
//!
//!  OBS :    2      0.100000E+01    0.000000E+00
//! ```
//!
//! for `*_scalJ`, where the last line is the average sign, and blocks of a
//! coordinate line followed by `n_orb^2` lines `orb1 orb2 re err_re im err_im`
//! for `*_eqJK` (momentum space) and `*_eqJR` (real space).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use super::stats::Estimate;
use crate::error::{Error, Result};
use crate::params::value::parse_real;

/// Scalar observable with one estimate per component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineScalar {
    pub values: Vec<Estimate>,
    pub sign: Estimate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Space {
    Momentum,
    Real,
}

/// Equal-time correlation over a set of lattice or momentum points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineCorrelation {
    pub space: Space,
    pub n_orb: usize,
    pub coords: Vec<[f64; 2]>,
    /// Real parts, indexed by `(point, orb1, orb2)` with `orb2` fastest.
    pub re: Vec<Estimate>,
    pub im: Vec<Estimate>,
}

impl EngineCorrelation {
    pub fn n_points(&self) -> usize {
        self.coords.len()
    }

    /// Real and imaginary estimate of one element.
    pub fn value(&self, point: usize, orb1: usize, orb2: usize) -> Option<(Estimate, Estimate)> {
        if point >= self.n_points() || orb1 >= self.n_orb || orb2 >= self.n_orb {
            return None;
        }
        let i = (point * self.n_orb + orb1) * self.n_orb + orb2;
        Some((self.re[i], self.im[i]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EngineResult {
    Scalar(EngineScalar),
    Correlation(EngineCorrelation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultKind {
    Scalar,
    Correlation(Space),
}

fn result_kind(name: &str) -> Option<ResultKind> {
    if name.ends_with("_scalJ") {
        Some(ResultKind::Scalar)
    } else if name.ends_with("_eqJK") {
        Some(ResultKind::Correlation(Space::Momentum))
    } else if name.ends_with("_eqJR") {
        Some(ResultKind::Correlation(Space::Real))
    } else {
        None
    }
}

/// Every engine result file in `dir`, keyed by file name.
pub fn read_engine_results(dir: &Path) -> Result<BTreeMap<String, EngineResult>> {
    let mut results = BTreeMap::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if result_kind(&name).is_none() || !entry.path().is_file() {
            continue;
        }
        let result = read_engine_result(dir, &name)?;
        results.insert(name, result);
    }
    debug!("{} engine results in {}", results.len(), dir.display());
    Ok(results)
}

/// One engine result file, e.g. `Ener_scalJ` or `SpinZ_eqJK`.
pub fn read_engine_result(dir: &Path, name: &str) -> Result<EngineResult> {
    let kind = result_kind(name).ok_or_else(|| {
        Error::InvalidConfig(format!("{} is not an engine result file", name))
    })?;
    let path = dir.join(name);
    let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    match kind {
        ResultKind::Scalar => parse_scalar_result(&text, &path).map(EngineResult::Scalar),
        ResultKind::Correlation(space) => parse_correlation_result(&text, space, &path).map(EngineResult::Correlation),
    }
}

/// Lines up to the last non-blank one.
fn content_lines(text: &str) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().collect();
    let end = lines.iter().rposition(|l| !l.trim().is_empty()).map_or(0, |i| i + 1);
    lines[..end].to_vec()
}

fn number(token: &str, line_no: usize, path: &Path) -> Result<f64> {
    parse_real(token).ok_or_else(|| Error::malformed(path, format!("line {}: bad number {:?}", line_no + 1, token)))
}

fn numbers(line: &str, line_no: usize, path: &Path) -> Result<Vec<f64>> {
    line.split_whitespace().map(|t| number(t, line_no, path)).collect()
}

/// Last two numbers of a line, as mean and error.
fn trailing_estimate(line: &str, line_no: usize, path: &Path) -> Result<Estimate> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        [.., mean, error] => Ok(Estimate {
            mean: number(mean, line_no, path)?,
            error: number(error, line_no, path)?,
        }),
        _ => Err(Error::malformed(path, format!("line {}: expected mean and error", line_no + 1))),
    }
}

/// Two header lines, then every second line holds one component; the last
/// line holds the sign.
pub fn parse_scalar_result(text: &str, path: &Path) -> Result<EngineScalar> {
    let lines = content_lines(text);
    if lines.len() < 5 {
        return Err(Error::malformed(path, "expected a header, observable lines and a sign line"));
    }
    let n_obs = (lines.len() - 2) / 2;
    let values = (0..n_obs)
        .map(|i| trailing_estimate(lines[2 * i + 2], 2 * i + 2, path))
        .collect::<Result<Vec<_>>>()?;
    let last = lines.len() - 1;
    let sign = trailing_estimate(lines[last], last, path)?;
    Ok(EngineScalar { values, sign })
}

/// Blocks of one coordinate line and `n_orb^2` value lines. The block
/// length is found from the second coordinate line.
pub fn parse_correlation_result(text: &str, space: Space, path: &Path) -> Result<EngineCorrelation> {
    let lines = content_lines(text);
    if lines.is_empty() {
        return Err(Error::malformed(path, "no data"));
    }
    let block = (1..lines.len())
        .find(|&i| lines[i].split_whitespace().count() == 2)
        .unwrap_or(lines.len());
    let n_orb = (1..block).find(|n| n * n >= block - 1).unwrap_or(0);
    if n_orb == 0 || n_orb * n_orb != block - 1 {
        return Err(Error::malformed(
            path,
            format!("{} value lines per point is not a square number of orbitals", block - 1),
        ));
    }
    if lines.len() % block != 0 {
        return Err(Error::malformed(
            path,
            format!("truncated: {} lines do not split into blocks of {}", lines.len(), block),
        ));
    }

    let n_points = lines.len() / block;
    let mut coords = Vec::with_capacity(n_points);
    let mut re = Vec::with_capacity(n_points * n_orb * n_orb);
    let mut im = Vec::with_capacity(n_points * n_orb * n_orb);
    for start in (0..lines.len()).step_by(block) {
        match numbers(lines[start], start, path)?.as_slice() {
            [x, y] => coords.push([*x, *y]),
            _ => return Err(Error::malformed(path, format!("line {}: expected two coordinates", start + 1))),
        }
        for line_no in start + 1..start + block {
            let tokens: Vec<&str> = lines[line_no].split_whitespace().collect();
            if tokens.len() != 6 {
                return Err(Error::malformed(
                    path,
                    format!("line {}: expected orbitals and four values, found {} fields", line_no + 1, tokens.len()),
                ));
            }
            let v = tokens[2..]
                .iter()
                .map(|t| number(t, line_no, path))
                .collect::<Result<Vec<_>>>()?;
            re.push(Estimate { mean: v[0], error: v[1] });
            im.push(Estimate { mean: v[2], error: v[3] });
        }
    }

    Ok(EngineCorrelation {
        space,
        n_orb,
        coords,
        re,
        im,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    const ENER_SCALJ: &str = " Effective number of bins, and bins:           10          10

 OBS :    1     -0.290738E+00    0.121591E-02

 OBS :    2      0.512000D+01    0.300000E-01

 OBS :    3      0.100000E+01    0.000000E+00
";

    // two momenta, one orbital
    const SPINZ_EQJK: &str = "  0.000000E+00  0.000000E+00
   1   1  0.250000E+00  0.100000E-01  0.000000E+00  0.000000E+00
  0.314159E+01  0.000000E+00
   1   1  0.750000E+00  0.200000E-01  0.100000E-02  0.500000E-03
";

    // one point, two orbitals
    const GREEN_EQJR: &str = "  0.0 0.0
 1 1 0.5 0.01 0.0 0.0
 1 2 0.1 0.02 0.0 0.0
 2 1 0.2 0.03 0.0 0.0
 2 2 0.6 0.04 0.0 0.0
";

    #[test]
    fn test_scalar_result_layout() {
        let r = parse_scalar_result(ENER_SCALJ, Path::new("Ener_scalJ")).unwrap();
        assert_eq!(r.values.len(), 2);
        assert_relative_eq!(r.values[0].mean, -0.290738);
        assert_relative_eq!(r.values[0].error, 0.00121591);
        assert_relative_eq!(r.values[1].mean, 5.12);
        assert_relative_eq!(r.sign.mean, 1.0);
        assert_relative_eq!(r.sign.error, 0.0);

        // trailing blank lines do not shift the layout
        let padded = format!("{}\n\n", ENER_SCALJ);
        assert_eq!(parse_scalar_result(&padded, Path::new("Ener_scalJ")).unwrap(), r);
    }

    #[test]
    fn test_scalar_result_rejects_bad_text() {
        let path = Path::new("Ener_scalJ");
        assert!(matches!(
            parse_scalar_result(" Effective number of bins\n", path),
            Err(Error::MalformedOutput { .. })
        ));
        let bad = ENER_SCALJ.replace("-0.290738E+00", "garbage");
        assert!(matches!(parse_scalar_result(&bad, path), Err(Error::MalformedOutput { .. })));
    }

    #[test]
    fn test_correlation_result_blocks() {
        let r = parse_correlation_result(SPINZ_EQJK, Space::Momentum, Path::new("SpinZ_eqJK")).unwrap();
        assert_eq!(r.n_orb, 1);
        assert_eq!(r.n_points(), 2);
        assert_relative_eq!(r.coords[1][0], 3.14159);
        let (re, im) = r.value(1, 0, 0).unwrap();
        assert_relative_eq!(re.mean, 0.75);
        assert_relative_eq!(re.error, 0.02);
        assert_relative_eq!(im.mean, 0.001);
        assert!(r.value(2, 0, 0).is_none());

        let r = parse_correlation_result(GREEN_EQJR, Space::Real, Path::new("Green_eqJR")).unwrap();
        assert_eq!(r.n_orb, 2);
        assert_eq!(r.n_points(), 1);
        assert_relative_eq!(r.value(0, 1, 0).unwrap().0.mean, 0.2);
        assert_relative_eq!(r.value(0, 1, 1).unwrap().0.error, 0.04);
    }

    #[test]
    fn test_correlation_result_rejects_bad_blocks() {
        let path = Path::new("SpinZ_eqJK");
        // second block cut short
        let truncated: String = SPINZ_EQJK.lines().take(3).map(|l| format!("{}\n", l)).collect();
        assert!(matches!(
            parse_correlation_result(&truncated, Space::Momentum, path),
            Err(Error::MalformedOutput { .. })
        ));
        // three value lines per point
        let text = "0 0\n1 1 1 0 0 0\n1 2 1 0 0 0\n2 1 1 0 0 0\n1 0\n";
        assert!(matches!(
            parse_correlation_result(text, Space::Real, path),
            Err(Error::MalformedOutput { .. })
        ));
        let text = "0 0\n1 1 1 0 0\n";
        assert!(matches!(
            parse_correlation_result(text, Space::Real, path),
            Err(Error::MalformedOutput { .. })
        ));
        assert!(matches!(
            parse_correlation_result("\n", Space::Real, path),
            Err(Error::MalformedOutput { .. })
        ));
    }

    #[test]
    fn test_read_engine_results_picks_result_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Ener_scalJ"), ENER_SCALJ).unwrap();
        fs::write(dir.path().join("SpinZ_eqJK"), SPINZ_EQJK).unwrap();
        fs::write(dir.path().join("Green_eqJR"), GREEN_EQJR).unwrap();
        fs::write(dir.path().join("Ener_scal"), "2 1.0 1.0\n").unwrap();
        fs::write(dir.path().join("parameters"), "").unwrap();

        let results = read_engine_results(dir.path()).unwrap();
        let names: Vec<&str> = results.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["Ener_scalJ", "Green_eqJR", "SpinZ_eqJK"]);
        match &results["SpinZ_eqJK"] {
            EngineResult::Correlation(c) => assert_eq!(c.space, Space::Momentum),
            other => panic!("unexpected {:?}", other),
        }
        match &results["Ener_scalJ"] {
            EngineResult::Scalar(s) => assert_eq!(s.values.len(), 2),
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            read_engine_result(dir.path(), "Ener_scal"),
            Err(Error::InvalidConfig(_))
        ));
        fs::write(dir.path().join("Kin_scalJ"), "header\n").unwrap();
        assert!(matches!(
            read_engine_results(dir.path()),
            Err(Error::MalformedOutput { .. })
        ));
    }
}
