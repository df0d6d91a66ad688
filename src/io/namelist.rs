//! Reading and writing the engine's `parameters` file.
//!
//! The file is a sequence of Fortran namelist groups:
//!
//! ```text
//! &VAR_Lattice
//! L1 = 4  ! Linear size
//! Lattice_type = "Square"  !
//! /
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::params::{Parameters, ParamValue, RUN_LENGTH_KEYS, POST_PROCESSING_NAMELIST};

/// Name of the parameter file inside a run directory.
pub const PARAMETER_FILE: &str = "parameters";

/// Render all namelists of `params` in engine format.
pub fn render(params: &Parameters) -> String {
    let mut out = String::new();
    for namelist in params.namelists() {
        out.push_str(&format!("&{}\n", namelist.name));
        for entry in &namelist.entries {
            out.push_str(&format!(
                "{} = {}  ! {}\n",
                entry.name,
                entry.value.to_namelist(),
                entry.doc
            ));
        }
        out.push_str("/\n\n");
    }
    out
}

/// Write `params` to `<dir>/parameters`, replacing any previous file.
pub fn write_parameters(dir: &Path, params: &Parameters) -> Result<PathBuf> {
    let path = dir.join(PARAMETER_FILE);
    fs::write(&path, render(params)).map_err(|e| Error::io(&path, e))?;
    debug!("wrote {}", path.display());
    Ok(path)
}

/// Read `<dir>/parameters` if it exists.
pub fn read_parameters(dir: &Path) -> Result<Option<NamelistFile>> {
    let path = dir.join(PARAMETER_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    NamelistFile::parse(&text, &path).map(Some)
}

/// One parsed namelist group.
#[derive(Debug, Clone, PartialEq)]
pub struct NamelistGroup {
    pub name: String,
    pub values: Vec<(String, ParamValue)>,
}

/// Parsed content of a namelist file, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamelistFile {
    pub groups: Vec<NamelistGroup>,
}

impl NamelistFile {
    /// Parse namelist text. `path` is only used for error messages.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let parse_err = |line_no: usize, message: String| Error::Parse {
            path: path.to_path_buf(),
            message: format!("line {}: {}", line_no + 1, message),
        };

        let mut groups = Vec::new();
        let mut current: Option<NamelistGroup> = None;

        for (line_no, raw) in text.lines().enumerate() {
            let mut line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix('&') {
                if current.is_some() {
                    return Err(parse_err(line_no, "group opened before the previous one was closed".into()));
                }
                let mut parts = rest.splitn(2, char::is_whitespace);
                let name = parts.next().unwrap_or_default().to_string();
                if name.is_empty() {
                    return Err(parse_err(line_no, "missing group name".into()));
                }
                current = Some(NamelistGroup {
                    name,
                    values: Vec::new(),
                });
                line = parts.next().unwrap_or_default().trim();
                if line.is_empty() {
                    continue;
                }
            }

            let closes = line.ends_with('/');
            if closes {
                line = line[..line.len() - 1].trim();
            }

            if !line.is_empty() {
                let group = current
                    .as_mut()
                    .ok_or_else(|| parse_err(line_no, "assignment outside of a namelist group".into()))?;
                for assignment in split_assignments(line) {
                    let (key, literal) = assignment
                        .split_once('=')
                        .ok_or_else(|| parse_err(line_no, format!("expected key = value, found {:?}", assignment)))?;
                    let value = ParamValue::parse_namelist(literal)
                        .ok_or_else(|| parse_err(line_no, format!("unparsable value {:?}", literal.trim())))?;
                    group.values.push((key.trim().to_string(), value));
                }
            }

            if closes {
                let group = current
                    .take()
                    .ok_or_else(|| parse_err(line_no, "'/' without an open group".into()))?;
                groups.push(group);
            }
        }

        if let Some(group) = current {
            return Err(Error::Parse {
                path: path.to_path_buf(),
                message: format!("namelist {} is not terminated", group.name),
            });
        }

        Ok(Self { groups })
    }

    pub fn group(&self, name: &str) -> Option<&NamelistGroup> {
        self.groups.iter().find(|g| g.name.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.groups
            .iter()
            .flat_map(|g| g.values.iter())
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Same canonical form as [`Parameters::identity`].
    pub fn identity(&self) -> BTreeMap<String, ParamValue> {
        self.groups
            .iter()
            .filter(|g| !g.name.eq_ignore_ascii_case(POST_PROCESSING_NAMELIST))
            .flat_map(|g| g.values.iter())
            .filter(|(k, _)| !RUN_LENGTH_KEYS.iter().any(|r| r.eq_ignore_ascii_case(k)))
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect()
    }
}

fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (None, '"') | (None, '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '!') => return &line[..i],
            _ => {}
        }
    }
    line
}

fn split_assignments(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (None, '"') | (None, '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, ',') => {
                parts.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&line[start..]);
    parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{Defaults, Hamiltonian, ParameterSet};

    fn params(set: ParameterSet) -> Parameters {
        Parameters::resolve(&Defaults::standard(), Hamiltonian::Hubbard, &set).unwrap()
    }

    #[test]
    fn test_render_format() {
        let text = render(&params(ParameterSet::new().with("L1", 4).with("Dtau", 0.05)));
        assert!(text.starts_with("&VAR_Lattice\nL1 = 4  ! \n"));
        assert!(text.contains("Dtau = 0.05d0  ! \n"));
        assert!(text.contains("Lattice_type = \"Square\"  ! \n"));
        assert!(text.contains("Checkerboard = .T.  ! \n"));
        assert!(text.contains("&VAR_ham_name\nham_name = \"Hubbard\"  ! Name of Hamiltonian\n/\n\n"));
    }

    #[test]
    fn test_rendered_file_has_same_identity() {
        let p = params(ParameterSet::new().with("L1", 4).with("beta", 1.0).with("Mz", false));
        let parsed = NamelistFile::parse(&render(&p), Path::new("parameters")).unwrap();
        assert_eq!(parsed.identity(), p.identity());
        assert_eq!(parsed.groups.len(), p.namelists().len());
    }

    #[test]
    fn test_parse_tolerates_formatting() {
        let text = "\
! leading comment
&VAR_Lattice  L1 = 4, L2=1   ! trailing
  Lattice_type = 'Square' /
&VAR_QMC
 Nbin=10
 Ltau = 0
 CPU_MAX = 0.0D+00
/
";
        let file = NamelistFile::parse(text, Path::new("p")).unwrap();
        assert_eq!(file.groups.len(), 2);
        assert_eq!(file.get("l2"), Some(&ParamValue::Int(1)));
        assert_eq!(file.get("lattice_type"), Some(&ParamValue::from("Square")));
        assert_eq!(file.get("CPU_MAX"), Some(&ParamValue::Float(0.0)));
        let id = file.identity();
        assert!(id.contains_key("ltau"));
        assert!(!id.contains_key("nbin"));
        assert!(!id.contains_key("cpu_max"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(NamelistFile::parse("L1 = 4\n", Path::new("p")).is_err());
        assert!(NamelistFile::parse("&VAR_Lattice\nL1 = 4\n", Path::new("p")).is_err());
        assert!(NamelistFile::parse("&VAR_Lattice\nL1 = four\n/\n", Path::new("p")).is_err());
    }

    #[test]
    fn test_comment_inside_string_is_kept() {
        assert_eq!(strip_comment("a = \"x!y\" ! c"), "a = \"x!y\" ");
        assert_eq!(split_assignments("a = 1, b = 'c,d'"), vec!["a = 1", "b = 'c,d'"]);
    }
}
