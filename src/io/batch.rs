//! Batch files for the command-line driver.
//!
//! One simulation per line, written as a JSON object or YAML flow mapping:
//!
//! ```text
//! # comment
//! {"L1": 4, "L2": 1, "Beta": 1.0, "Dtau": 0.05}
//! [{"Beta": 1.0}, {"Beta": 2.0}]
//! stop
//! ```
//!
//! A list of mappings requests a parallel tempering run. A `ham_name` key
//! selects a Hamiltonian for that line only. Reading stops at `stop`.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::params::{Hamiltonian, ParamValue, ParameterSet};

#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    /// 1-based line number in the batch file.
    pub line: usize,
    pub hamiltonian: Option<Hamiltonian>,
    pub sets: Vec<ParameterSet>,
}

impl BatchEntry {
    pub fn is_tempering(&self) -> bool {
        self.sets.len() > 1
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchLine {
    Single(ParameterSet),
    Tempering(Vec<ParameterSet>),
}

pub fn read_batch(path: &Path) -> Result<Vec<BatchEntry>> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_batch(&text, path)
}

pub fn parse_batch(text: &str, path: &Path) -> Result<Vec<BatchEntry>> {
    let mut entries = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line == "stop" {
            break;
        }

        let parse_err = |message: String| Error::Parse {
            path: path.to_path_buf(),
            message: format!("line {}: {}", idx + 1, message),
        };

        let mut sets = match serde_yaml::from_str::<BatchLine>(line) {
            Ok(BatchLine::Single(set)) => vec![set],
            Ok(BatchLine::Tempering(sets)) => sets,
            Err(e) => return Err(parse_err(e.to_string())),
        };
        if sets.is_empty() {
            return Err(parse_err("empty parameter list".to_string()));
        }

        let mut hamiltonian = None;
        for set in sets.iter_mut() {
            match set.remove("ham_name") {
                Some(ParamValue::Str(name)) => {
                    let ham = name.parse::<Hamiltonian>().map_err(|e| parse_err(e.to_string()))?;
                    if hamiltonian.is_some_and(|h| h != ham) {
                        return Err(parse_err("conflicting ham_name values".to_string()));
                    }
                    hamiltonian = Some(ham);
                }
                Some(other) => return Err(parse_err(format!("ham_name must be a string, got {}", other))),
                None => {}
            }
        }

        entries.push(BatchEntry {
            line: idx + 1,
            hamiltonian,
            sets,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch_lines() {
        let text = r#"
# sweep in beta
{"L1": 4, "L2": 1, "Beta": 1.0, "Dtau": 0.05}
{L1: 6, ham_name: Kondo}

[{"Beta": 1.0}, {"Beta": 2.0}]
stop
{"L1": 8}
"#;
        let entries = parse_batch(text, Path::new("Sims")).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].line, 3);
        assert_eq!(entries[0].sets[0].get("dtau"), Some(&ParamValue::Float(0.05)));
        assert_eq!(entries[1].hamiltonian, Some(Hamiltonian::Kondo));
        assert!(entries[1].sets[0].get("ham_name").is_none());
        assert!(entries[2].is_tempering());
        assert_eq!(entries[2].sets.len(), 2);
    }

    #[test]
    fn test_parse_batch_reports_line() {
        let err = parse_batch("{\"L1\": 4}\n{L1: [1, 2]}\n", Path::new("Sims")).unwrap_err();
        match err {
            Error::Parse { message, .. } => assert!(message.starts_with("line 2:"), "{}", message),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
