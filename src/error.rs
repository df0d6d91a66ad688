//! Errors raised while preparing, running and analysing simulations.
//!
//! # Error Categories
//!
//! - **Configuration**: [`Error::ConfigConflict`], [`Error::UnknownParameter`],
//!   [`Error::InvalidParameter`], [`Error::InvalidConfig`]
//! - **Engine**: [`Error::Execution`]
//! - **Output**: [`Error::MalformedOutput`], [`Error::EmptyResult`]
//!
//! None of these are retried. Recovery is always an operator action: remove
//! or rename a run directory, fix the parameters, or run again.

use std::path::PathBuf;

use thiserror::Error;

/// Crate result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The run directory already holds bins produced under other parameters.
    ///
    /// `differences` lists `key: stored -> requested` for every mismatching
    /// key (`<missing>` when a key exists on one side only).
    #[error("parameters stored in {} differ from the requested ones: {}", dir.display(), differences.join(", "))]
    ConfigConflict {
        dir: PathBuf,
        differences: Vec<String>,
    },

    /// The engine process exited unsuccessfully.
    #[error("{program} failed in {} (exit code {code:?}): {stderr}", dir.display())]
    Execution {
        program: String,
        dir: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    /// A bin file is truncated, unparsable or changes shape between bins.
    #[error("malformed output in {}: {message}", path.display())]
    MalformedOutput { path: PathBuf, message: String },

    /// No bins are left for an observable after skipping.
    #[error("no bins available for observable {observable} in {}", dir.display())]
    EmptyResult { dir: PathBuf, observable: String },

    /// A parameter name is not defined for the chosen Hamiltonian.
    #[error("parameter {name} is not defined for hamiltonian {hamiltonian}")]
    UnknownParameter { name: String, hamiltonian: String },

    /// A parameter value does not have the type of its default.
    #[error("invalid value for parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    /// Engine or analysis settings are inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A batch entry or stored file could not be parsed.
    #[error("parse error in {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::MalformedOutput {
            path: path.into(),
            message: message.into(),
        }
    }
}
