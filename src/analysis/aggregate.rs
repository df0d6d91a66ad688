//! Observable aggregation: turn the bin files of a run directory into
//! means and error bars.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use nalgebra::{Complex, DMatrix, DVector};
use serde::Serialize;
use tracing::{debug, info};

use super::stats::{column_estimates, jackknife_ratio, rebin, skip, AnalysisOptions, ErrorMethod, Estimate};
use crate::error::{Error, Result};
use crate::io::{read_parameters, parse_lattice_bins, parse_scalar_bins, LatticeBin, LatticeShape, ScalarBin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ObservableKind {
    Scalar,
    EqualTime,
    TimeDisplaced,
}

impl ObservableKind {
    pub const ALL: [ObservableKind; 3] = [
        ObservableKind::Scalar,
        ObservableKind::EqualTime,
        ObservableKind::TimeDisplaced,
    ];

    /// File name suffix of the bin file.
    pub fn suffix(&self) -> &'static str {
        match self {
            ObservableKind::Scalar => "_scal",
            ObservableKind::EqualTime => "_eq",
            ObservableKind::TimeDisplaced => "_tau",
        }
    }

    /// Kind of a bin file, or `None` if the name is not a bin file.
    pub fn of_file(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| name.len() > k.suffix().len() && name.ends_with(k.suffix()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ObservableId {
    /// Bin file name, e.g. `Ener_scal`.
    pub name: String,
    pub kind: ObservableKind,
}

/// Observables found in a run directory, sorted by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservableList {
    entries: Vec<ObservableId>,
}

impl ObservableList {
    pub fn iter(&self) -> std::slice::Iter<'_, ObservableId> {
        self.entries.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|o| o.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for ObservableList {
    type Item = ObservableId;
    type IntoIter = std::vec::IntoIter<ObservableId>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a ObservableList {
    type Item = &'a ObservableId;
    type IntoIter = std::slice::Iter<'a, ObservableId>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Scan `dir` for bin files. Other files are ignored.
pub fn list_observables(dir: &Path) -> Result<ObservableList> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        if !entry.path().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if let Some(kind) = ObservableKind::of_file(&name) {
            entries.push(ObservableId { name, kind });
        }
    }
    entries.sort();
    Ok(ObservableList { entries })
}

/// Lattice metadata carried along with correlation functions.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeInfo {
    pub shape: LatticeShape,
    pub dtau: f64,
    pub coords: Vec<[f64; 2]>,
    /// Mean of the per-orbital background.
    pub background: DVector<Complex<f64>>,
}

/// Mean and error of every component of one observable.
///
/// The real and imaginary parts are estimated independently; `error`
/// stores the error of the real part in `re` and of the imaginary part
/// in `im`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservableSummary {
    pub name: String,
    pub kind: ObservableKind,
    /// Bins entering the estimate, after skipping and rebinning.
    pub n_bins: usize,
    /// `[n_values]` for scalars, `[n_cells, n_tau, n_orb, n_orb]` otherwise.
    pub shape: Vec<usize>,
    pub mean: DVector<Complex<f64>>,
    pub error: DVector<Complex<f64>>,
    pub sign: Estimate,
    pub lattice: Option<LatticeInfo>,
}

impl ObservableSummary {
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn real(&self, i: usize) -> Option<Estimate> {
        Some(Estimate {
            mean: self.mean.get(i)?.re,
            error: self.error.get(i)?.re,
        })
    }

    pub fn imag(&self, i: usize) -> Option<Estimate> {
        Some(Estimate {
            mean: self.mean.get(i)?.im,
            error: self.error.get(i)?.im,
        })
    }

    /// Plain serializable form.
    pub fn report(&self) -> SummaryReport {
        SummaryReport {
            name: self.name.clone(),
            kind: self.kind,
            n_bins: self.n_bins,
            shape: self.shape.clone(),
            sign: self.sign,
            mean: self.mean.iter().map(|z| [z.re, z.im]).collect(),
            error: self.error.iter().map(|z| [z.re, z.im]).collect(),
            dtau: self.lattice.as_ref().map(|l| l.dtau),
            coords: self.lattice.as_ref().map(|l| l.coords.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub name: String,
    pub kind: ObservableKind,
    pub n_bins: usize,
    pub shape: Vec<usize>,
    pub sign: Estimate,
    pub mean: Vec<[f64; 2]>,
    pub error: Vec<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtau: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coords: Option<Vec<[f64; 2]>>,
}

enum Bins {
    Scalar(Vec<ScalarBin>),
    Lattice(Vec<LatticeBin>),
}

impl Bins {
    /// Read the bins of `name` in `dir`. A missing file has no bins.
    fn read(dir: &Path, name: &str, kind: ObservableKind) -> Result<Bins> {
        let path = dir.join(name);
        let text = if path.exists() {
            fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?
        } else {
            String::new()
        };
        Ok(match kind {
            ObservableKind::Scalar => Bins::Scalar(parse_scalar_bins(&text, &path)?),
            ObservableKind::EqualTime | ObservableKind::TimeDisplaced => {
                Bins::Lattice(parse_lattice_bins(&text, &path)?)
            }
        })
    }

    fn len(&self) -> usize {
        match self {
            Bins::Scalar(b) => b.len(),
            Bins::Lattice(b) => b.len(),
        }
    }

    /// Append bins read from `source`, which must have the same shape.
    fn append(&mut self, other: Bins, source: &Path) -> Result<()> {
        match (self, other) {
            (Bins::Scalar(a), Bins::Scalar(b)) => {
                if let (Some(x), Some(y)) = (a.first(), b.first()) {
                    if x.values.len() != y.values.len() {
                        return Err(Error::malformed(
                            source,
                            format!("{} values per bin, previous runs have {}", y.values.len(), x.values.len()),
                        ));
                    }
                }
                a.extend(b);
            }
            (Bins::Lattice(a), Bins::Lattice(b)) => {
                if let (Some(x), Some(y)) = (a.first(), b.first()) {
                    if x.shape != y.shape {
                        return Err(Error::malformed(
                            source,
                            format!("shape {:?} differs from previous runs {:?}", y.shape, x.shape),
                        ));
                    }
                }
                a.extend(b);
            }
            _ => return Err(Error::malformed(source, "observable kinds differ between runs")),
        }
        Ok(())
    }
}

/// Computes observable summaries with fixed analysis options.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    options: AnalysisOptions,
}

impl Aggregator {
    pub fn new(options: AnalysisOptions) -> Self {
        Self { options }
    }

    /// Aggregator using the `N_skip` and `N_rebin` stored in the parameter
    /// file of `dir`, or the default options when there is none.
    pub fn for_directory(dir: &Path) -> Result<Self> {
        let options = read_parameters(dir)?
            .as_ref()
            .map(AnalysisOptions::from_parameters)
            .unwrap_or_default();
        Ok(Self::new(options))
    }

    pub fn options(&self) -> AnalysisOptions {
        self.options
    }

    pub fn list(&self, dir: &Path) -> Result<ObservableList> {
        list_observables(dir)
    }

    /// Summaries of the observables `names` (bin file names) in `dir`.
    pub fn summarize<S: AsRef<str>>(&self, dir: &Path, names: &[S]) -> Result<BTreeMap<String, ObservableSummary>> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.observable(dir, name).map(|s| (name.to_string(), s))
            })
            .collect()
    }

    /// Summaries of every observable found in `dir`.
    pub fn summarize_all(&self, dir: &Path) -> Result<BTreeMap<String, ObservableSummary>> {
        let names: Vec<String> = list_observables(dir)?.names().map(str::to_string).collect();
        self.summarize(dir, &names)
    }

    pub fn observable(&self, dir: &Path, name: &str) -> Result<ObservableSummary> {
        let kind = kind_of(name)?;
        let bins = Bins::read(dir, name, kind)?;
        debug!("{}: {} bins in {}", name, bins.len(), dir.display());
        self.compute(name, kind, bins, &dir.join(name))
    }

    /// Pool the bins of `name` from several run directories into one summary.
    pub fn combine<P: AsRef<Path>>(&self, dirs: &[P], name: &str) -> Result<ObservableSummary> {
        let kind = kind_of(name)?;
        let mut pooled: Option<Bins> = None;
        for dir in dirs {
            let dir = dir.as_ref();
            let bins = Bins::read(dir, name, kind)?;
            match pooled.as_mut() {
                Some(p) => p.append(bins, &dir.join(name))?,
                None => pooled = Some(bins),
            }
        }
        let first = dirs.first().map(|d| d.as_ref().to_path_buf()).unwrap_or_default();
        let pooled = pooled.ok_or_else(|| Error::EmptyResult {
            dir: first.clone(),
            observable: name.to_string(),
        })?;
        info!("{}: pooled {} bins from {} directories", name, pooled.len(), dirs.len());
        self.compute(name, kind, pooled, &first.join(name))
    }

    fn compute(&self, name: &str, kind: ObservableKind, bins: Bins, path: &Path) -> Result<ObservableSummary> {
        let empty = || Error::EmptyResult {
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            observable: name.to_string(),
        };

        let (values, signs, lattice_meta) = match &bins {
            Bins::Scalar(b) => {
                let n_vals = b.first().map(|x| x.values.len()).unwrap_or(0);
                let values = complex_matrix(b.len(), n_vals, |i, j| b[i].values[j]);
                let signs = DMatrix::from_fn(b.len(), 1, |i, _| b[i].sign);
                (values, signs, None)
            }
            Bins::Lattice(b) => {
                let n_vals = b.first().map(|x| x.values.len()).unwrap_or(0);
                let n_orb = b.first().map(|x| x.background.len()).unwrap_or(0);
                let values = complex_matrix(b.len(), n_vals, |i, j| b[i].values[j]);
                let signs = DMatrix::from_fn(b.len(), 1, |i, _| b[i].sign);
                let background = complex_matrix(b.len(), n_orb, |i, j| b[i].background[j]);
                let meta = b.first().map(|x| (x.shape, x.dtau, x.coords.clone()));
                (values, signs, meta.map(|m| (m, background)))
            }
        };

        let prepare = |m: &DMatrix<f64>| rebin(&skip(m, self.options.n_skip), self.options.n_rebin);
        let (re, im) = (prepare(&values.0), prepare(&values.1));
        let signs = prepare(&signs);
        if re.nrows() == 0 {
            return Err(empty());
        }
        let sign_column = signs.column(0).into_owned();

        let (mean, error) = self.estimate(path, &re, &im, &sign_column)?;
        let sign = column_estimates(&signs)[0];

        let (shape, lattice) = match lattice_meta {
            None => (vec![mean.len()], None),
            Some(((shape, dtau, coords), background)) => {
                let (bg_re, bg_im) = (prepare(&background.0), prepare(&background.1));
                let (bg_mean, _) = self.estimate(path, &bg_re, &bg_im, &sign_column)?;
                (
                    vec![shape.n_cells, shape.n_tau, shape.n_orb, shape.n_orb],
                    Some(LatticeInfo {
                        shape,
                        dtau,
                        coords,
                        background: bg_mean,
                    }),
                )
            }
        };

        Ok(ObservableSummary {
            name: name.to_string(),
            kind,
            n_bins: re.nrows(),
            shape,
            mean,
            error,
            sign,
            lattice,
        })
    }

    fn estimate(
        &self,
        path: &Path,
        re: &DMatrix<f64>,
        im: &DMatrix<f64>,
        signs: &DVector<f64>,
    ) -> Result<(DVector<Complex<f64>>, DVector<Complex<f64>>)> {
        let (est_re, est_im) = match self.options.method {
            ErrorMethod::Plain => (column_estimates(re), column_estimates(im)),
            ErrorMethod::Jackknife => jackknife_ratio(re, signs)
                .zip(jackknife_ratio(im, signs))
                .ok_or_else(|| Error::malformed(path, "sign sum vanishes, jackknife ratio undefined"))?,
        };
        let mean = DVector::from_iterator(
            est_re.len(),
            est_re.iter().zip(&est_im).map(|(r, i)| Complex::new(r.mean, i.mean)),
        );
        let error = DVector::from_iterator(
            est_re.len(),
            est_re.iter().zip(&est_im).map(|(r, i)| Complex::new(r.error, i.error)),
        );
        Ok((mean, error))
    }
}

/// Split complex samples into real and imaginary matrices.
fn complex_matrix(
    rows: usize,
    cols: usize,
    f: impl Fn(usize, usize) -> Complex<f64>,
) -> (DMatrix<f64>, DMatrix<f64>) {
    (
        DMatrix::from_fn(rows, cols, |i, j| f(i, j).re),
        DMatrix::from_fn(rows, cols, |i, j| f(i, j).im),
    )
}

fn kind_of(name: &str) -> Result<ObservableKind> {
    ObservableKind::of_file(name)
        .ok_or_else(|| Error::InvalidConfig(format!("{} is not a bin file name (_scal, _eq or _tau)", name)))
}

/// Summaries of `names` in `dir` with default analysis options.
pub fn summarize<S: AsRef<str>>(dir: &Path, names: &[S]) -> Result<BTreeMap<String, ObservableSummary>> {
    Aggregator::default().summarize(dir, names)
}

/// Pool one observable over several directories with default options.
pub fn combine<P: AsRef<Path>>(dirs: &[P], name: &str) -> Result<ObservableSummary> {
    Aggregator::default().combine(dirs, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, text: &str) {
        fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn test_list_observables_skips_unknown_files() {
        let dir = tempdir().unwrap();
        write(dir.path(), "Ener_scal", "");
        write(dir.path(), "Green_eq", "");
        write(dir.path(), "Green_tau", "");
        write(dir.path(), "Ener_scalJ", "");
        write(dir.path(), "parameters", "");
        write(dir.path(), "_scal", "");
        fs::create_dir(dir.path().join("Temp_0_scal")).unwrap();

        let list = list_observables(dir.path()).unwrap();
        let names: Vec<&str> = list.names().collect();
        assert_eq!(names, vec!["Ener_scal", "Green_eq", "Green_tau"]);
        // restartable
        assert_eq!(list.iter().count(), 3);
        assert_eq!(list.iter().next().unwrap().kind, ObservableKind::Scalar);
    }

    #[test]
    fn test_summarize_scalar_mean_and_error() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "Ener_scal",
            "2 (-2.10,0.0) 1.0\n2 (-2.09,0.0) 1.0\n2 (-2.11,0.0) 1.0\n",
        );
        let result = summarize(dir.path(), &["Ener_scal"]).unwrap();
        let ener = &result["Ener_scal"];
        assert_eq!(ener.n_bins, 3);
        assert_eq!(ener.shape, vec![1]);
        let est = ener.real(0).unwrap();
        assert_relative_eq!(est.mean, -2.10, epsilon = 1e-12);
        assert!(est.error.is_finite() && est.error > 0.0);
        assert_relative_eq!(est.error, 0.01 / 3f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(ener.sign.mean, 1.0);
    }

    #[test]
    fn test_empty_file_is_empty_result() {
        let dir = tempdir().unwrap();
        write(dir.path(), "Ener_scal", "\n");
        assert!(matches!(
            summarize(dir.path(), &["Ener_scal"]),
            Err(Error::EmptyResult { .. })
        ));
        assert!(matches!(
            summarize(dir.path(), &["Kin_scal"]),
            Err(Error::EmptyResult { .. })
        ));
    }

    #[test]
    fn test_skip_leaves_no_bins() {
        let dir = tempdir().unwrap();
        write(dir.path(), "Ener_scal", "2 1.0 1.0\n");
        let agg = Aggregator::new(AnalysisOptions {
            n_skip: 1,
            ..AnalysisOptions::default()
        });
        assert!(matches!(
            agg.observable(dir.path(), "Ener_scal"),
            Err(Error::EmptyResult { .. })
        ));
    }

    #[test]
    fn test_summarize_is_idempotent() {
        let dir = tempdir().unwrap();
        write(dir.path(), "Kin_scal", "3 (1.0,0.1) 2.0 1.0\n3 (1.2,0.0) 2.5 0.9\n");
        let a = Aggregator::default().summarize_all(dir.path()).unwrap();
        let b = Aggregator::default().summarize_all(dir.path()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a["Kin_scal"].len(), 2);
        assert_relative_eq!(a["Kin_scal"].imag(0).unwrap().mean, 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_lattice_summary_is_elementwise() {
        let dir = tempdir().unwrap();
        let text = "\
1.0 1 2 1 0.1
(0.5,0)
0.0 0.0
(1.0,0)
1.0 0.0
(3.0,0)
1.0 1 2 1 0.1
(0.7,0)
0.0 0.0
(2.0,0)
1.0 0.0
(5.0,0)
";
        write(dir.path(), "Den_eq", text);
        let s = Aggregator::default().observable(dir.path(), "Den_eq").unwrap();
        assert_eq!(s.kind, ObservableKind::EqualTime);
        assert_eq!(s.shape, vec![2, 1, 1, 1]);
        assert_relative_eq!(s.real(0).unwrap().mean, 1.5);
        assert_relative_eq!(s.real(1).unwrap().mean, 4.0);
        assert_relative_eq!(s.real(1).unwrap().error, 2.0 * s.real(0).unwrap().error, epsilon = 1e-12);
        let lattice = s.lattice.as_ref().unwrap();
        assert_relative_eq!(lattice.background[0].re, 0.6, epsilon = 1e-12);
        assert_eq!(lattice.coords, vec![[0.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_lattice_shape_change_is_malformed() {
        let dir = tempdir().unwrap();
        let text = "1.0 1 1 1 0.1\n(0.5,0)\n0.0 0.0\n(1.0,0)\n1.0 2 1 1 0.1\n(0.5,0) (0.5,0)\n0.0 0.0\n4*(1.0,0)\n";
        write(dir.path(), "Den_eq", text);
        assert!(matches!(
            Aggregator::default().observable(dir.path(), "Den_eq"),
            Err(Error::MalformedOutput { .. })
        ));
    }

    #[test]
    fn test_combine_pools_directories() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        write(a.path(), "Ener_scal", "2 1.0 1.0\n2 2.0 1.0\n");
        write(b.path(), "Ener_scal", "2 3.0 1.0\n2 4.0 1.0\n");
        let s = combine(&[a.path(), b.path()], "Ener_scal").unwrap();
        assert_eq!(s.n_bins, 4);
        assert_relative_eq!(s.real(0).unwrap().mean, 2.5);

        write(b.path(), "Ener_scal", "3 3.0 4.0 1.0\n");
        assert!(matches!(
            combine(&[a.path(), b.path()], "Ener_scal"),
            Err(Error::MalformedOutput { .. })
        ));
    }

    #[test]
    fn test_unrecognized_name_is_rejected() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            summarize(dir.path(), &["parameters"]),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_jackknife_with_one_signed_bin_is_malformed() {
        let dir = tempdir().unwrap();
        write(dir.path(), "Ener_scal", "2 1.0 1.0\n2 2.0 0.0\n");
        let agg = Aggregator::new(AnalysisOptions {
            method: ErrorMethod::Jackknife,
            ..AnalysisOptions::default()
        });
        assert!(matches!(
            agg.observable(dir.path(), "Ener_scal"),
            Err(Error::MalformedOutput { .. })
        ));
        // plain errors do not divide by the sign
        assert!(Aggregator::default().observable(dir.path(), "Ener_scal").is_ok());
    }

    #[test]
    fn test_aggregator_for_directory_reads_stored_options() {
        let dir = tempdir().unwrap();
        write(dir.path(), "Ener_scal", "2 1.0 1.0\n2 2.0 1.0\n2 3.0 1.0\n2 4.0 1.0\n2 5.0 1.0\n");

        let plain = Aggregator::for_directory(dir.path()).unwrap();
        assert_eq!(plain.options(), AnalysisOptions::default());
        assert_relative_eq!(plain.observable(dir.path(), "Ener_scal").unwrap().real(0).unwrap().mean, 3.0);

        write(dir.path(), "parameters", "&VAR_errors\nN_skip = 1  !\nN_rebin = 2  !\n/\n");
        let agg = Aggregator::for_directory(dir.path()).unwrap();
        assert_eq!(agg.options().n_skip, 1);
        assert_eq!(agg.options().n_rebin, 2);
        let s = agg.observable(dir.path(), "Ener_scal").unwrap();
        assert_eq!(s.n_bins, 2);
        // (2+3)/2 and (4+5)/2
        assert_relative_eq!(s.real(0).unwrap().mean, 3.5, epsilon = 1e-12);
    }
}
