//! Analysis module - bin statistics, observable summaries, engine results
//! and fits.

mod stats;
mod aggregate;
mod fit;
mod compare;
mod results;

pub use stats::{mean_and_error, column_estimates, jackknife_ratio, rebin, skip, AnalysisOptions, ErrorMethod, Estimate};
pub use aggregate::{list_observables, summarize, combine, Aggregator, LatticeInfo, ObservableId, ObservableKind, ObservableList, ObservableSummary, SummaryReport};
pub use fit::{polynomial_fit, FitPoint, PolynomialFit};
pub use compare::{all_close, compare_directories, Comparison, Tolerance};
pub use results::{read_engine_result, read_engine_results, parse_correlation_result, parse_scalar_result, EngineCorrelation, EngineResult, EngineScalar, Space};
