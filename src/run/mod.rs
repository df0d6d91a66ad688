//! Run module - run directories, engine invocation and simulation lifecycle.

mod directory;
mod engine;
mod simulation;

pub use directory::{completed_bins, has_configurations, Action, BinTarget, Prepared, RunDirectoryManager, RunState};
pub use engine::{invoke, parse_environment, EngineConfig, ExitKind, Machine, MpiConfig, ProcessEnv, ProcessOutcome, Stab};
pub use simulation::{out_to_in, RunReport, Simulation, SimulationOptions};
