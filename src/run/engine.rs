//! Engine configuration and subprocess invocation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Machine {
    #[default]
    Gnu,
    Intel,
    Pgi,
    SupermucNg,
    Juwels,
}

impl Machine {
    pub fn name(&self) -> &'static str {
        match self {
            Machine::Gnu => "GNU",
            Machine::Intel => "INTEL",
            Machine::Pgi => "PGI",
            Machine::SupermucNg => "SUPERMUC-NG",
            Machine::Juwels => "JUWELS",
        }
    }
}

impl FromStr for Machine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [Machine::Gnu, Machine::Intel, Machine::Pgi, Machine::SupermucNg, Machine::Juwels]
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidConfig(format!("illegal value machine={}", s)))
    }
}

/// Stabilization scheme compiled into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stab {
    Stab1,
    Stab2,
    Stab3,
    Log,
}

impl Stab {
    pub fn name(&self) -> &'static str {
        match self {
            Stab::Stab1 => "STAB1",
            Stab::Stab2 => "STAB2",
            Stab::Stab3 => "STAB3",
            Stab::Log => "LOG",
        }
    }
}

impl FromStr for Stab {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [Stab::Stab1, Stab::Stab2, Stab::Stab3, Stab::Log]
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidConfig(format!("illegal value stab={}", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpiConfig {
    pub n_mpi: usize,
    pub mpiexec: String,
}

impl MpiConfig {
    pub fn new(n_mpi: usize) -> Self {
        Self {
            n_mpi,
            mpiexec: "mpiexec".to_string(),
        }
    }
}

/// How to launch the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the compiled engine.
    pub alf_dir: PathBuf,
    pub machine: Machine,
    pub stab: Option<Stab>,
    pub mpi: Option<MpiConfig>,
    /// OpenMP threads per process.
    pub n_omp: usize,
    pub devel: bool,
    pub hdf5: bool,
    /// Seed for generated seeds files; `None` draws from the OS.
    pub seed: Option<u64>,
    /// Environment captured from the configure script. Replaces the
    /// inherited environment of the engine process when set.
    #[serde(skip)]
    pub environment: Option<BTreeMap<String, String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alf_dir: PathBuf::from("./ALF"),
            machine: Machine::Gnu,
            stab: None,
            mpi: None,
            n_omp: 1,
            devel: false,
            hdf5: false,
            seed: None,
            environment: None,
        }
    }
}

impl EngineConfig {
    pub fn new(alf_dir: impl Into<PathBuf>) -> Self {
        Self {
            alf_dir: alf_dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self, tempering: bool) -> Result<()> {
        if tempering && self.mpi.is_none() {
            return Err(Error::InvalidConfig("parallel tempering requires MPI".to_string()));
        }
        if let Some(mpi) = &self.mpi {
            if mpi.n_mpi == 0 {
                return Err(Error::InvalidConfig("you have to specify n_mpi if you use MPI".to_string()));
            }
        }
        if self.n_omp == 0 {
            return Err(Error::InvalidConfig("n_omp must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Argument of the engine's configure script, e.g. `GNU STAB2 MPI NO-INTERACTIVE`.
    pub fn config_string(&self, tempering: bool) -> String {
        let mut parts = vec![self.machine.name()];
        if let Some(stab) = self.stab {
            parts.push(stab.name());
        }
        parts.push(if self.mpi.is_some() { "MPI" } else { "NOMPI" });
        if tempering {
            parts.push("TEMPERING");
        }
        if self.devel {
            parts.push("DEVEL");
        }
        if self.hdf5 {
            parts.push("HDF5");
        }
        parts.push("NO-INTERACTIVE");
        parts.join(" ")
    }

    pub fn executable(&self) -> PathBuf {
        self.alf_dir.join("Prog").join("ALF.out")
    }

    pub fn analysis_executable(&self) -> PathBuf {
        let name = if self.hdf5 { "ana_hdf5.out" } else { "ana.out" };
        self.alf_dir.join("Analysis").join(name)
    }

    /// Seeds file shipped with the engine, if any.
    pub fn seeds_template(&self) -> PathBuf {
        self.alf_dir
            .join("Scripts_and_Parameters_files")
            .join("Start")
            .join("seeds")
    }

    /// Source the configure script and keep the resulting environment for
    /// engine runs.
    pub fn load_environment(&mut self, tempering: bool) -> Result<()> {
        let config = self.config_string(tempering);
        let script = format!(". ./configure.sh {} || exit 1 && env", config);
        info!("sourcing configure.sh {} in {}", config, self.alf_dir.display());
        let output = Command::new("bash")
            .arg("-c")
            .arg(&script)
            .current_dir(&self.alf_dir)
            .output()
            .map_err(|e| Error::io(&self.alf_dir, e))?;
        if !output.status.success() {
            return Err(Error::Execution {
                program: "configure.sh".to_string(),
                dir: self.alf_dir.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        self.environment = Some(parse_environment(&String::from_utf8_lossy(&output.stdout)));
        Ok(())
    }

    /// Environment for the engine process.
    pub fn process_env(&self) -> ProcessEnv {
        ProcessEnv {
            base: self.environment.clone(),
            vars: BTreeMap::from([("OMP_NUM_THREADS".to_string(), self.n_omp.to_string())]),
        }
    }
}

/// Parse `env` output into variables. Exported shell functions and lines
/// without `=` are skipped.
pub fn parse_environment(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter(|line| !line.starts_with("BASH_FUNC"))
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| !key.is_empty() && !key.contains(char::is_whitespace))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Environment handed to a child process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessEnv {
    /// Full environment; `None` inherits the caller's.
    pub base: Option<BTreeMap<String, String>>,
    /// Variables set on top of the base.
    pub vars: BTreeMap<String, String>,
}

impl ProcessEnv {
    pub fn inherit() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Success,
    /// Non-zero exit code.
    Failed(i32),
    /// Terminated by a signal; the run directory stays resumable.
    Interrupted(Option<i32>),
}

/// Result of a finished subprocess.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub program: String,
    pub dir: PathBuf,
    pub exit: ExitKind,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit == ExitKind::Success
    }

    pub fn interrupted(&self) -> bool {
        matches!(self.exit, ExitKind::Interrupted(_))
    }

    /// Turn any unsuccessful exit into [`Error::Execution`].
    pub fn check(self) -> Result<ProcessOutcome> {
        let code = match self.exit {
            ExitKind::Success => return Ok(self),
            ExitKind::Failed(code) => Some(code),
            ExitKind::Interrupted(_) => None,
        };
        Err(Error::Execution {
            program: self.program,
            dir: self.dir,
            code,
            stderr: self.stderr,
        })
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit {
            ExitKind::Success => write!(f, "{} finished", self.program),
            ExitKind::Failed(code) => write!(f, "{} exited with code {}", self.program, code),
            ExitKind::Interrupted(Some(sig)) => write!(f, "{} interrupted by signal {}", self.program, sig),
            ExitKind::Interrupted(None) => write!(f, "{} interrupted", self.program),
        }
    }
}

/// Run the engine in `dir` and wait for it to exit.
///
/// With `mpi` the executable is launched as `<mpiexec> -n <n_mpi> <exe>`.
/// Output is captured; a failed exit is returned as an outcome, not an error.
pub fn invoke(dir: &Path, executable: &Path, mpi: Option<&MpiConfig>, env: &ProcessEnv) -> Result<ProcessOutcome> {
    run_process(dir, executable, &[], mpi, env)
}

pub(crate) fn run_process(
    dir: &Path,
    executable: &Path,
    args: &[&str],
    mpi: Option<&MpiConfig>,
    env: &ProcessEnv,
) -> Result<ProcessOutcome> {
    let mut command = match mpi {
        Some(mpi) => {
            let mut c = Command::new(&mpi.mpiexec);
            c.arg("-n").arg(mpi.n_mpi.to_string()).arg(executable);
            c
        }
        None => Command::new(executable),
    };
    command.args(args).current_dir(dir);
    if let Some(base) = &env.base {
        command.env_clear().envs(base);
    }
    command.envs(&env.vars);

    info!("Run {} in {}", executable.display(), dir.display());
    let output = command.output().map_err(|e| Error::io(executable, e))?;

    let exit = match output.status.code() {
        Some(0) => ExitKind::Success,
        Some(code) => ExitKind::Failed(code),
        None => ExitKind::Interrupted(signal_of(&output.status)),
    };
    let outcome = ProcessOutcome {
        program: executable.display().to_string(),
        dir: dir.to_path_buf(),
        exit,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if outcome.success() {
        debug!("{}", outcome);
    } else {
        warn!("{}", outcome);
    }
    Ok(outcome)
}

#[cfg(unix)]
fn signal_of(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_string() {
        let mut cfg = EngineConfig::new("/opt/ALF");
        assert_eq!(cfg.config_string(false), "GNU NOMPI NO-INTERACTIVE");

        cfg.machine = "intel".parse().unwrap();
        cfg.stab = Some("stab2".parse().unwrap());
        cfg.mpi = Some(MpiConfig::new(4));
        cfg.devel = true;
        cfg.hdf5 = true;
        assert_eq!(
            cfg.config_string(true),
            "INTEL STAB2 MPI TEMPERING DEVEL HDF5 NO-INTERACTIVE"
        );
        assert_eq!(cfg.executable(), PathBuf::from("/opt/ALF/Prog/ALF.out"));
        assert_eq!(cfg.analysis_executable(), PathBuf::from("/opt/ALF/Analysis/ana_hdf5.out"));
    }

    #[test]
    fn test_validation() {
        let mut cfg = EngineConfig::default();
        assert!(cfg.validate(false).is_ok());
        assert!(matches!(cfg.validate(true), Err(Error::InvalidConfig(_))));
        cfg.mpi = Some(MpiConfig::new(0));
        assert!(cfg.validate(false).is_err());
        assert!("CRAY".parse::<Machine>().is_err());
        assert!("STAB4".parse::<Stab>().is_err());
    }

    #[test]
    fn test_parse_environment() {
        let env = parse_environment("PATH=/usr/bin\nBASH_FUNC_module%%=() {  eval\n}\nFOO=a=b\nnoise\n");
        assert_eq!(env.len(), 2);
        assert_eq!(env["PATH"], "/usr/bin");
        assert_eq!(env["FOO"], "a=b");
    }

    #[test]
    fn test_outcome_check() {
        let outcome = ProcessOutcome {
            program: "ALF.out".to_string(),
            dir: PathBuf::from("run"),
            exit: ExitKind::Failed(3),
            stdout: String::new(),
            stderr: "boom".to_string(),
        };
        match outcome.check() {
            Err(Error::Execution { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_invoke_captures_exit_code() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("engine.sh");
        std::fs::write(&exe, "#!/bin/sh\necho \"threads=$OMP_NUM_THREADS\"\necho oops >&2\nexit 2\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let env = ProcessEnv::inherit().with_var("OMP_NUM_THREADS", "3");
        let outcome = invoke(dir.path(), &exe, None, &env).unwrap();
        assert_eq!(outcome.exit, ExitKind::Failed(2));
        assert_eq!(outcome.stdout.trim(), "threads=3");
        assert_eq!(outcome.stderr.trim(), "oops");
        assert!(!outcome.interrupted());
    }
}
