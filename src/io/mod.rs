//! IO module - parameter files, batch files and engine bin output.

mod namelist;
mod batch;
mod bins;

pub use namelist::{render, read_parameters, write_parameters, NamelistFile, NamelistGroup, PARAMETER_FILE};
pub use batch::{read_batch, parse_batch, BatchEntry};
pub use bins::{parse_scalar_bins, parse_lattice_bins, count_scalar_bins, ScalarBin, LatticeBin, LatticeShape};
