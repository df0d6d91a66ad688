//! ALF driver - run directories, engine invocation and bin analysis for the
//! ALF auxiliary-field quantum Monte Carlo engine.
//!
//! The engine itself is an external program. This crate writes its
//! parameter files, decides whether a run starts fresh or continues an
//! earlier one, launches it, and turns the bin files it leaves behind into
//! means with error bars.

pub mod error;
pub mod params;
pub mod io;
pub mod run;
pub mod analysis;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use params::{Defaults, Hamiltonian, ParamValue, ParameterSet, Parameters};
pub use io::{read_batch, BatchEntry, NamelistFile};
pub use run::{invoke, Action, BinTarget, EngineConfig, MpiConfig, Prepared, ProcessOutcome, RunDirectoryManager, RunState, Simulation, SimulationOptions};
pub use analysis::{list_observables, read_engine_results, summarize, AnalysisOptions, Aggregator, EngineResult, Estimate, ObservableId, ObservableList, ObservableSummary};
