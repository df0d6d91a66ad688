//! Run directories: naming, parameter comparison and the fresh/resume
//! decision.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::io::{count_scalar_bins, read_parameters, write_parameters};
use crate::params::{identity_differences, Defaults, Hamiltonian, ParamValue, ParameterSet, Parameters};

/// What the engine will do in a prepared directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// No bins yet; the engine starts from scratch.
    Fresh,
    /// Bins exist under identical parameters; the engine appends.
    Resume { completed_bins: usize },
    /// The requested total is already reached; nothing to run.
    UpToDate { completed_bins: usize },
}

/// State of a run directory with respect to a parameter set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Absent,
    Fresh,
    Resumable { completed_bins: usize },
    /// Stored parameters differ. Terminal until an operator intervenes.
    Conflicted { differences: Vec<String> },
}

/// How the `Nbin` key of a request is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinTarget {
    /// `Nbin` more bins on every run.
    #[default]
    Append,
    /// `Nbin` bins in total.
    Total,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub dir: PathBuf,
    pub action: Action,
    /// Parameters as written to the directory.
    pub parameters: Parameters,
}

/// Creates and validates run directories below `root`.
#[derive(Debug, Clone)]
pub struct RunDirectoryManager {
    root: PathBuf,
    defaults: Defaults,
}

impl RunDirectoryManager {
    pub fn new(root: impl Into<PathBuf>, defaults: Defaults) -> Self {
        Self {
            root: root.into(),
            defaults,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    pub fn resolve(&self, ham: Hamiltonian, set: &ParameterSet) -> Result<Parameters> {
        Parameters::resolve(&self.defaults, ham, set)
    }

    /// Directory name for a run, e.g. `Hubbard_L1=4_L2=1_Dtau=0.05_Beta=1.0`.
    ///
    /// Only model keys whose value differs from the default contribute, in
    /// the order of the default tables. More than one set names a parallel
    /// tempering run after its first member.
    pub fn directory_name(&self, ham: Hamiltonian, sets: &[ParameterSet]) -> Result<String> {
        let first = sets
            .first()
            .ok_or_else(|| Error::InvalidConfig("no parameter set given".to_string()))?;
        let params = self.resolve(ham, first)?;

        let mut name = if sets.len() > 1 {
            format!("temper_{}", ham)
        } else {
            ham.to_string()
        };
        for namelist in self.defaults.model_namelists_for(ham)? {
            for default in &namelist.entries {
                let Some(value) = params.get(&default.name) else {
                    continue;
                };
                if value.same_value(&default.value) {
                    continue;
                }
                let part = match default.name.as_str() {
                    "Model" if value.same_value(&ParamValue::from(ham.name())) => continue,
                    "Model" | "Lattice_type" => bare(value),
                    key => {
                        let key = match key.get(..4) {
                            Some(prefix) if prefix.eq_ignore_ascii_case("ham_") => &key[4..],
                            _ => key,
                        };
                        format!("{}={}", key, bare(value))
                    }
                };
                name.push('_');
                name.push_str(&part);
            }
        }
        Ok(name)
    }

    /// Compare `dir` with `params` without touching it.
    pub fn inspect(&self, dir: &Path, params: &Parameters) -> Result<RunState> {
        if !dir.exists() {
            return Ok(RunState::Absent);
        }
        let completed = completed_bins(dir)?;
        let has_output = completed > 0 || has_configurations(dir)?;

        let Some(stored) = read_parameters(dir)? else {
            if has_output {
                return Ok(RunState::Conflicted {
                    differences: vec!["parameter file missing next to existing output".to_string()],
                });
            }
            return Ok(RunState::Fresh);
        };

        let differences = identity_differences(&stored.identity(), &params.identity());
        if !differences.is_empty() {
            return Ok(RunState::Conflicted { differences });
        }
        if has_output {
            Ok(RunState::Resumable {
                completed_bins: completed,
            })
        } else {
            Ok(RunState::Fresh)
        }
    }

    /// Prepare `<root>/<directory_name>` for `set`, appending bins.
    pub fn prepare(&self, ham: Hamiltonian, set: &ParameterSet) -> Result<Prepared> {
        let params = self.resolve(ham, set)?;
        let dir = self
            .root
            .join(self.directory_name(ham, std::slice::from_ref(set))?);
        self.prepare_in(&dir, params, BinTarget::Append)
    }

    /// Prepare `dir` for `params`.
    ///
    /// Creates the directory and writes the parameter file. A directory
    /// whose stored parameters differ is left untouched and reported as
    /// [`Error::ConfigConflict`].
    pub fn prepare_in(&self, dir: &Path, mut params: Parameters, target: BinTarget) -> Result<Prepared> {
        info!("Prepare directory \"{}\" for Monte Carlo run.", dir.display());
        let action = match self.inspect(dir, &params)? {
            RunState::Conflicted { differences } => {
                warn!("{} holds bins for other parameters", dir.display());
                return Err(Error::ConfigConflict {
                    dir: dir.to_path_buf(),
                    differences,
                });
            }
            RunState::Absent => {
                info!("Create new directory.");
                fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
                Action::Fresh
            }
            RunState::Fresh => Action::Fresh,
            RunState::Resumable { completed_bins } => {
                info!("Resuming previous run with {} bins.", completed_bins);
                match target {
                    BinTarget::Append => Action::Resume { completed_bins },
                    BinTarget::Total => {
                        let requested = params.requested_bins();
                        if completed_bins >= requested {
                            info!("{} of {} bins done, nothing to run", completed_bins, requested);
                            return Ok(Prepared {
                                dir: dir.to_path_buf(),
                                action: Action::UpToDate { completed_bins },
                                parameters: params,
                            });
                        }
                        params.set("Nbin", (requested - completed_bins) as i64)?;
                        Action::Resume { completed_bins }
                    }
                }
            }
        };

        write_parameters(dir, &params)?;
        debug!("{:?} in {}", action, dir.display());
        Ok(Prepared {
            dir: dir.to_path_buf(),
            action,
            parameters: params,
        })
    }
}

fn bare(value: &ParamValue) -> String {
    match value {
        ParamValue::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Bins already written to `dir`, read from the first scalar bin file.
pub fn completed_bins(dir: &Path) -> Result<usize> {
    let mut scal: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| Error::io(dir, e))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.len() > 5 && n.ends_with("_scal"))
                    .unwrap_or(false)
        })
        .collect();
    scal.sort();
    match scal.first() {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
            Ok(count_scalar_bins(&text))
        }
        None => Ok(0),
    }
}

/// Whether the engine left configurations to continue from.
pub fn has_configurations(dir: &Path) -> Result<bool> {
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("confout_") || name.starts_with("confin_") {
            return Ok(true);
        }
    }
    Ok(false)
}
