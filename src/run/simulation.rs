//! One simulation: directory preparation, staging, engine run and analysis.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use super::directory::{Action, BinTarget, Prepared, RunDirectoryManager};
use super::engine::{invoke, run_process, EngineConfig, ProcessOutcome};
use crate::analysis::{list_observables, read_engine_results, Aggregator, EngineResult, ObservableSummary};
use crate::error::{Error, Result};
use crate::io::PARAMETER_FILE;
use crate::params::{Defaults, Hamiltonian, ParameterSet};

/// Where a simulation lives and how its bins are counted.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOptions {
    /// Directory holding all run directories.
    pub sim_root: PathBuf,
    /// Explicit run directory name; derived from the parameters if `None`.
    pub sim_dir: Option<PathBuf>,
    pub target: BinTarget,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            sim_root: PathBuf::from("ALF_data"),
            sim_dir: None,
            target: BinTarget::Append,
        }
    }
}

/// Outcome of [`Simulation::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub dir: PathBuf,
    /// Prepared directories; for tempering the top directory comes first.
    pub prepared: Vec<Prepared>,
    /// `None` when every directory was already up to date.
    pub outcome: Option<ProcessOutcome>,
}

/// A Hamiltonian with one parameter set, or several for parallel tempering.
#[derive(Debug, Clone)]
pub struct Simulation {
    hamiltonian: Hamiltonian,
    sets: Vec<ParameterSet>,
    engine: EngineConfig,
    target: BinTarget,
    manager: RunDirectoryManager,
    dir: PathBuf,
}

impl Simulation {
    pub fn new(ham: Hamiltonian, sets: Vec<ParameterSet>, engine: EngineConfig, options: SimulationOptions) -> Result<Self> {
        Self::with_defaults(ham, sets, engine, options, Defaults::standard())
    }

    /// Validate the request up front: every set must resolve against
    /// `defaults` and the engine settings must fit the run.
    pub fn with_defaults(
        ham: Hamiltonian,
        sets: Vec<ParameterSet>,
        engine: EngineConfig,
        options: SimulationOptions,
        defaults: Defaults,
    ) -> Result<Self> {
        if sets.is_empty() {
            return Err(Error::InvalidConfig("no parameter set given".to_string()));
        }
        engine.validate(sets.len() > 1)?;

        let manager = RunDirectoryManager::new(&options.sim_root, defaults);
        for set in &sets {
            manager.resolve(ham, set)?;
        }
        let name = match &options.sim_dir {
            Some(dir) => dir.clone(),
            None => PathBuf::from(manager.directory_name(ham, &sets)?),
        };
        let dir = options.sim_root.join(name);

        Ok(Self {
            hamiltonian: ham,
            sets,
            engine,
            target: options.target,
            manager,
            dir,
        })
    }

    pub fn hamiltonian(&self) -> Hamiltonian {
        self.hamiltonian
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn is_tempering(&self) -> bool {
        self.sets.len() > 1
    }

    /// Directories holding bins: `Temp_<i>` for tempering, else the run
    /// directory itself.
    pub fn run_directories(&self) -> Vec<PathBuf> {
        if self.is_tempering() {
            (0..self.sets.len())
                .map(|i| self.dir.join(format!("Temp_{}", i)))
                .collect()
        } else {
            vec![self.dir.clone()]
        }
    }

    pub fn prepare(&self) -> Result<Vec<Prepared>> {
        let mut prepared = Vec::with_capacity(self.sets.len() + 1);
        if self.is_tempering() {
            let top = self.manager.resolve(self.hamiltonian, &self.sets[0])?;
            prepared.push(self.manager.prepare_in(&self.dir, top, self.target)?);
        }
        for (dir, set) in self.run_directories().iter().zip(&self.sets) {
            let params = self.manager.resolve(self.hamiltonian, set)?;
            prepared.push(self.manager.prepare_in(dir, params, self.target)?);
        }
        Ok(prepared)
    }

    /// Put a seeds file in place and hand the last configurations back to
    /// the engine.
    pub fn stage(&self, prepared: &[Prepared]) -> Result<()> {
        for p in prepared {
            self.write_seeds(&p.dir)?;
            out_to_in(&p.dir)?;
        }
        Ok(())
    }

    /// Prepare, stage and run the engine once.
    ///
    /// A failed engine run is returned as [`Error::Execution`].
    pub fn run(&self) -> Result<RunReport> {
        let prepared = self.prepare()?;
        let members = if self.is_tempering() { &prepared[1..] } else { &prepared[..] };
        if members
            .iter()
            .all(|p| matches!(p.action, Action::UpToDate { .. }))
        {
            info!("{} is up to date", self.dir.display());
            return Ok(RunReport {
                dir: self.dir.clone(),
                prepared,
                outcome: None,
            });
        }

        self.stage(&prepared)?;
        let outcome = invoke(
            &self.dir,
            &self.engine.executable(),
            self.engine.mpi.as_ref(),
            &self.engine.process_env(),
        )?;
        if !outcome.success() {
            if let Ok(text) = fs::read_to_string(self.dir.join(PARAMETER_FILE)) {
                warn!("parameters:\n{}", text);
            }
        }
        let outcome = outcome.check()?;
        Ok(RunReport {
            dir: self.dir.clone(),
            prepared,
            outcome: Some(outcome),
        })
    }

    /// Run the engine's own analysis program on every bin file.
    pub fn engine_analysis(&self) -> Result<Vec<ProcessOutcome>> {
        let exe = self.engine.analysis_executable();
        let env = self.engine.process_env().with_var("OMP_NUM_THREADS", "1");
        let mut outcomes = Vec::new();
        for dir in self.run_directories() {
            if self.engine.hdf5 {
                outcomes.push(run_process(&dir, &exe, &[], None, &env)?.check()?);
                continue;
            }
            let mut observables: Vec<_> = list_observables(&dir)?.into_iter().collect();
            observables.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
            for obs in observables {
                info!("Analysing {}", obs.name);
                outcomes.push(run_process(&dir, &exe, &[obs.name.as_str()], None, &env)?.check()?);
            }
        }
        Ok(outcomes)
    }

    /// Results left by [`Simulation::engine_analysis`], per run directory.
    pub fn engine_results(&self) -> Result<BTreeMap<PathBuf, BTreeMap<String, EngineResult>>> {
        self.run_directories()
            .into_iter()
            .map(|dir| read_engine_results(&dir).map(|r| (dir, r)))
            .collect()
    }

    /// Summaries per run directory; all observables when `names` is empty.
    pub fn summarize<S: AsRef<str>>(
        &self,
        aggregator: &Aggregator,
        names: &[S],
    ) -> Result<BTreeMap<PathBuf, BTreeMap<String, ObservableSummary>>> {
        self.run_directories()
            .into_iter()
            .map(|dir| {
                let summary = if names.is_empty() {
                    aggregator.summarize_all(&dir)?
                } else {
                    aggregator.summarize(&dir, names)?
                };
                Ok((dir, summary))
            })
            .collect()
    }

    /// Copy the engine's seeds file into `dir`, or generate one if the
    /// engine ships none. An existing file is kept.
    fn write_seeds(&self, dir: &Path) -> Result<()> {
        let target = dir.join("seeds");
        if target.exists() {
            return Ok(());
        }
        let template = self.engine.seeds_template();
        if template.is_file() {
            debug!("copy {} to {}", template.display(), target.display());
            fs::copy(&template, &target).map_err(|e| Error::io(&template, e))?;
            return Ok(());
        }

        let n = self.engine.mpi.as_ref().map(|m| m.n_mpi).unwrap_or(1).max(1);
        let seeds = generate_seeds(n, self.engine.seed);
        debug!("write {} generated seeds to {}", n, target.display());
        fs::write(&target, seeds).map_err(|e| Error::io(&target, e))
    }
}

/// One positive seed per line.
fn generate_seeds(n: usize, seed: Option<u64>) -> String {
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    (0..n)
        .map(|_| format!("{}\n", rng.gen_range(1..i32::MAX)))
        .collect()
}

/// Rename `confout_*` to `confin_*` so the engine continues from the
/// configurations of the previous run.
pub fn out_to_in(dir: &Path) -> Result<usize> {
    let mut renamed = 0;
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(rest) = name.strip_prefix("confout_") {
            let to = dir.join(format!("confin_{}", rest));
            debug!("mv {} {}", name, to.display());
            fs::rename(entry.path(), &to).map_err(|e| Error::io(&to, e))?;
            renamed += 1;
        }
    }
    Ok(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::MpiConfig;
    use tempfile::tempdir;

    fn options(root: &Path) -> SimulationOptions {
        SimulationOptions {
            sim_root: root.to_path_buf(),
            ..SimulationOptions::default()
        }
    }

    #[test]
    fn test_out_to_in() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("confout_0"), "a").unwrap();
        fs::write(dir.path().join("confout_1.h5"), "b").unwrap();
        fs::write(dir.path().join("confin_7"), "old").unwrap();
        assert_eq!(out_to_in(dir.path()).unwrap(), 2);
        assert!(dir.path().join("confin_0").is_file());
        assert!(dir.path().join("confin_1.h5").is_file());
        assert!(!dir.path().join("confout_0").exists());
    }

    #[test]
    fn test_generated_seeds_are_reproducible() {
        let a = generate_seeds(4, Some(42));
        assert_eq!(a, generate_seeds(4, Some(42)));
        assert_eq!(a.lines().count(), 4);
        assert!(a.lines().all(|l| l.parse::<i32>().unwrap() > 0));
    }

    #[test]
    fn test_tempering_requires_mpi() {
        let root = tempdir().unwrap();
        let sets = vec![
            ParameterSet::new().with("ham_U", 6.0),
            ParameterSet::new().with("ham_U", 8.0),
        ];
        let err = Simulation::new(Hamiltonian::Hubbard, sets.clone(), EngineConfig::default(), options(root.path()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let mut engine = EngineConfig::default();
        engine.mpi = Some(MpiConfig::new(2));
        let sim = Simulation::new(Hamiltonian::Hubbard, sets, engine, options(root.path())).unwrap();
        assert!(sim.is_tempering());
        assert!(sim.directory().ends_with("temper_Hubbard_U=6.0"));

        let prepared = sim.prepare().unwrap();
        assert_eq!(prepared.len(), 3);
        assert!(sim.directory().join("Temp_1").join("parameters").is_file());

        sim.stage(&prepared).unwrap();
        let seeds = fs::read_to_string(sim.directory().join("Temp_0").join("seeds")).unwrap();
        assert_eq!(seeds.lines().count(), 2);
    }

    #[test]
    fn test_unknown_parameter_is_rejected_early() {
        let root = tempdir().unwrap();
        let err = Simulation::new(
            Hamiltonian::Hubbard,
            vec![ParameterSet::new().with("ham_Jk", 1.0)],
            EngineConfig::default(),
            options(root.path()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownParameter { .. }));
        assert!(!root.path().join("Hubbard_Jk=1.0").exists());
    }

    #[test]
    fn test_explicit_sim_dir() {
        let root = tempdir().unwrap();
        let opts = SimulationOptions {
            sim_dir: Some(PathBuf::from("my_run")),
            ..options(root.path())
        };
        let sim = Simulation::new(Hamiltonian::Hubbard, vec![ParameterSet::new()], EngineConfig::default(), opts).unwrap();
        assert_eq!(sim.directory(), root.path().join("my_run"));
        assert_eq!(sim.run_directories(), vec![root.path().join("my_run")]);
    }
}
