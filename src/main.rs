use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use alf_driver::analysis::{
    compare_directories, polynomial_fit, read_engine_results, AnalysisOptions, Aggregator, ErrorMethod, FitPoint, ObservableKind,
    ObservableSummary, Tolerance,
};
use alf_driver::io::{read_batch, read_parameters, BatchEntry};
use alf_driver::params::{Hamiltonian, ParamValue};
use alf_driver::run::{BinTarget, EngineConfig, Machine, MpiConfig, Simulation, SimulationOptions, Stab};

#[derive(Parser, Debug)]
#[command(version, about = "Prepare, run and analyse ALF simulations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every simulation listed in a batch file
    Run(RunArgs),
    /// Mean and error of the observables in a run directory
    Summarize(SummarizeArgs),
    /// Print the results written by the engine's analysis program
    Results(ResultsArgs),
    /// Compare the observables of two run directories
    Compare(CompareArgs),
    /// Fit an observable against a parameter over several run directories
    Extrapolate(ExtrapolateArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Batch file, one parameter mapping per line
    batch: PathBuf,

    #[arg(long, env = "ALF_DIR", default_value = "./ALF")]
    alf_dir: PathBuf,

    #[arg(long, default_value = "Hubbard")]
    ham_name: Hamiltonian,

    #[arg(long, default_value = "GNU")]
    machine: Machine,

    #[arg(long)]
    stab: Option<Stab>,

    #[arg(long)]
    mpi: bool,

    #[arg(long)]
    n_mpi: Option<usize>,

    #[arg(long, default_value = "mpiexec")]
    mpiexec: String,

    #[arg(long, default_value_t = 1)]
    n_omp: usize,

    #[arg(long)]
    devel: bool,

    #[arg(long)]
    hdf5: bool,

    #[arg(long, default_value = "ALF_data")]
    sim_root: PathBuf,

    /// Whether Nbin counts new bins per run or bins in total
    #[arg(long, value_enum, default_value_t = Bins::Append)]
    bins: Bins,

    /// Source configure.sh and run the engine in the resulting environment
    #[arg(long)]
    configure: bool,

    /// Seed for generated seeds files
    #[arg(long)]
    seed: Option<u64>,

    /// Prepare the run directories without starting the engine
    #[arg(long)]
    dry_run: bool,

    /// Also run the engine's analysis program after each run
    #[arg(long)]
    analysis: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Bins {
    Append,
    Total,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum Format {
    Text,
    Yaml,
}

#[derive(Args, Debug)]
struct SummarizeArgs {
    dir: PathBuf,

    /// Bin file to summarize; all observables if omitted
    #[arg(long = "obs")]
    observables: Vec<String>,

    #[arg(long)]
    skip: Option<usize>,

    #[arg(long)]
    rebin: Option<usize>,

    /// Sign-reweighted jackknife errors
    #[arg(long)]
    jackknife: bool,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Args, Debug)]
struct ResultsArgs {
    dir: PathBuf,
}

#[derive(Args, Debug)]
struct CompareArgs {
    reference: PathBuf,
    test: PathBuf,

    #[arg(long, default_value_t = 1e-5)]
    rtol: f64,

    #[arg(long, default_value_t = 1e-8)]
    atol: f64,
}

#[derive(Args, Debug)]
struct ExtrapolateArgs {
    /// Bin file of the observable, e.g. Ener_scal
    #[arg(long)]
    obs: String,

    /// Parameter the observable is fitted against, e.g. Dtau
    #[arg(long)]
    param: String,

    /// Fit against param^power
    #[arg(long, default_value_t = 1.0)]
    power: f64,

    #[arg(long, default_value_t = 1)]
    degree: usize,

    /// Component of the observable
    #[arg(long, default_value_t = 0)]
    component: usize,

    #[arg(required = true)]
    dirs: Vec<PathBuf>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let ok = match cli.command {
        Command::Run(args) => run_batch(&args)?,
        Command::Summarize(args) => summarize(&args)?,
        Command::Results(args) => results(&args)?,
        Command::Compare(args) => compare(&args)?,
        Command::Extrapolate(args) => extrapolate(&args)?,
    };
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn run_batch(args: &RunArgs) -> Result<bool> {
    let entries = read_batch(&args.batch)
        .with_context(|| format!("failed to read batch file {}", args.batch.display()))?;
    info!("{} simulations in {}", entries.len(), args.batch.display());

    let mut failures = 0;
    for entry in &entries {
        if let Err(e) = run_entry(args, entry) {
            error!("line {}: {:#}", entry.line, e);
            failures += 1;
        }
    }
    if failures > 0 {
        warn!("{} of {} simulations failed", failures, entries.len());
    }
    Ok(failures == 0)
}

fn engine_config(args: &RunArgs, tempering: bool) -> Result<EngineConfig> {
    let mpi = (args.mpi || tempering).then(|| MpiConfig {
        n_mpi: args.n_mpi.unwrap_or(0),
        mpiexec: args.mpiexec.clone(),
    });
    let mut engine = EngineConfig {
        alf_dir: args.alf_dir.clone(),
        machine: args.machine,
        stab: args.stab,
        mpi,
        n_omp: args.n_omp,
        devel: args.devel,
        hdf5: args.hdf5,
        seed: args.seed,
        environment: None,
    };
    if args.configure {
        engine
            .load_environment(tempering)
            .context("failed to source configure.sh")?;
    }
    Ok(engine)
}

fn run_entry(args: &RunArgs, entry: &BatchEntry) -> Result<()> {
    let ham = entry.hamiltonian.unwrap_or(args.ham_name);
    let engine = engine_config(args, entry.is_tempering())?;
    let options = SimulationOptions {
        sim_root: args.sim_root.clone(),
        sim_dir: None,
        target: match args.bins {
            Bins::Append => BinTarget::Append,
            Bins::Total => BinTarget::Total,
        },
    };
    let sim = Simulation::new(ham, entry.sets.clone(), engine, options)?;

    if args.dry_run {
        for p in sim.prepare()? {
            info!("{}: {:?}", p.dir.display(), p.action);
        }
        return Ok(());
    }

    let report = sim
        .run()
        .with_context(|| format!("simulation in {} failed", sim.directory().display()))?;
    match &report.outcome {
        Some(outcome) => info!("{}", outcome),
        None => info!("{}: nothing to run", report.dir.display()),
    }
    if args.analysis {
        sim.engine_analysis().context("engine analysis failed")?;
    }

    for dir in sim.run_directories() {
        let aggregator = Aggregator::for_directory(&dir)?;
        let names: Vec<String> = aggregator
            .list(&dir)?
            .iter()
            .filter(|o| o.kind == ObservableKind::Scalar)
            .map(|o| o.name.clone())
            .collect();
        println!("{}", dir.display());
        for summary in aggregator.summarize(&dir, &names)?.values() {
            print_summary(summary);
        }
    }
    Ok(())
}

fn summarize(args: &SummarizeArgs) -> Result<bool> {
    let mut options = Aggregator::for_directory(&args.dir)?.options();
    if let Some(n) = args.skip {
        options.n_skip = n;
    }
    if let Some(n) = args.rebin {
        options.n_rebin = n.max(1);
    }
    if args.jackknife {
        options.method = ErrorMethod::Jackknife;
    }

    let aggregator = Aggregator::new(options);
    let summaries = if args.observables.is_empty() {
        aggregator.summarize_all(&args.dir)?
    } else {
        aggregator.summarize(&args.dir, &args.observables)?
    };

    match args.format {
        Format::Text => summaries.values().for_each(print_summary),
        Format::Yaml => {
            let reports: BTreeMap<_, _> = summaries.iter().map(|(k, v)| (k, v.report())).collect();
            print!("{}", serde_yaml::to_string(&reports)?);
        }
    }
    Ok(true)
}

fn print_summary(s: &ObservableSummary) {
    println!(
        "{} ({} bins, sign {:.6} +/- {:.6})",
        s.name, s.n_bins, s.sign.mean, s.sign.error
    );
    if s.kind == ObservableKind::Scalar {
        for i in 0..s.len() {
            if let Some(re) = s.real(i) {
                println!("  [{}] {:.8} +/- {:.8}", i, re.mean, re.error);
            }
        }
    } else {
        println!("  shape {:?}, {} components", s.shape, s.len());
    }
}

fn results(args: &ResultsArgs) -> Result<bool> {
    let results = read_engine_results(&args.dir)?;
    if results.is_empty() {
        warn!("no engine results in {}, run with --analysis first", args.dir.display());
    }
    print!("{}", serde_yaml::to_string(&results)?);
    Ok(true)
}

fn compare(args: &CompareArgs) -> Result<bool> {
    let tol = Tolerance {
        rtol: args.rtol,
        atol: args.atol,
    };
    let aggregator = Aggregator::for_directory(&args.reference)?;
    let results = compare_directories(&args.reference, &args.test, &aggregator, tol)?;

    let mut ok = true;
    for r in &results {
        let diff = r
            .max_abs_diff
            .map(|d| format!("{:.3e}", d))
            .unwrap_or_else(|| "n/a".to_string());
        println!("{:<24} {:<6} {}", r.name, if r.matches { "ok" } else { "FAIL" }, diff);
        ok &= r.matches;
    }
    Ok(ok)
}

fn extrapolate(args: &ExtrapolateArgs) -> Result<bool> {
    let mut points = Vec::with_capacity(args.dirs.len());
    for dir in &args.dirs {
        let stored = read_parameters(dir)?
            .with_context(|| format!("no parameter file in {}", dir.display()))?;
        let x = stored
            .get(&args.param)
            .and_then(ParamValue::as_f64)
            .with_context(|| format!("{} has no numeric parameter {}", dir.display(), args.param))?;
        let summary = Aggregator::new(AnalysisOptions::from_parameters(&stored)).observable(dir, &args.obs)?;
        let estimate = summary
            .real(args.component)
            .with_context(|| format!("{} has no component {}", args.obs, args.component))?;
        points.push(FitPoint {
            x: x.powf(args.power),
            y: estimate.mean,
            error: estimate.error,
        });
    }

    let fit = polynomial_fit(&points, args.degree)?;
    for p in &points {
        println!("{:.6e} {:.8} +/- {:.8}", p.x, p.y, p.error);
    }
    for (k, (c, e)) in fit.coefficients.iter().zip(fit.errors.iter()).enumerate() {
        println!("c{} = {:.8} +/- {:.8}", k, c, e);
    }
    println!("chi2/dof = {:.4}", fit.chi2_per_dof);
    let intercept = fit.intercept();
    println!("{} at {} -> 0: {:.8} +/- {:.8}", args.obs, args.param, intercept.mean, intercept.error);
    Ok(true)
}
