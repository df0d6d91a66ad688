//! Params module - parameter values, default tables and run identity.

pub mod value;
mod defaults;
mod set;

pub use value::ParamValue;
pub use defaults::{Defaults, Entry, Namelist, Hamiltonian, RUN_LENGTH_KEYS, POST_PROCESSING_NAMELIST, HAM_NAME_NAMELIST};
pub use set::{ParameterSet, Parameters, identity_differences};
