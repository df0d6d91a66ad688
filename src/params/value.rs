//! Scalar parameter values and their Fortran namelist representation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single parameter value.
///
/// Deserializes from plain YAML/JSON scalars: `true`, `4`, `0.05`, `"Square"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "logical",
            ParamValue::Int(_) => "integer",
            ParamValue::Float(_) => "real",
            ParamValue::Str(_) => "string",
        }
    }

    /// Render the value the way the engine's namelist reader expects it.
    pub fn to_namelist(&self) -> String {
        match self {
            ParamValue::Bool(true) => ".T.".to_string(),
            ParamValue::Bool(false) => ".F.".to_string(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(x) => {
                // Debug output is the shortest round-tripping form and keeps
                // a decimal point or exponent, unlike Display.
                let repr = format!("{:?}", x);
                if repr.contains('e') {
                    repr.replace('e', "d")
                } else {
                    format!("{}d0", repr)
                }
            }
            ParamValue::Str(s) => format!("\"{}\"", s),
        }
    }

    /// Parse a namelist value literal. Returns `None` for anything that is
    /// not a logical, integer, real or quoted string.
    pub fn parse_namelist(literal: &str) -> Option<ParamValue> {
        let s = literal.trim();
        if s.is_empty() {
            return None;
        }

        if let Some(b) = parse_logical(s) {
            return Some(ParamValue::Bool(b));
        }

        let quoted = (s.starts_with('"') && s.ends_with('"'))
            || (s.starts_with('\'') && s.ends_with('\''));
        if quoted && s.len() >= 2 {
            return Some(ParamValue::Str(s[1..s.len() - 1].to_string()));
        }

        if let Ok(i) = s.parse::<i64>() {
            return Some(ParamValue::Int(i));
        }

        parse_real(s).map(ParamValue::Float)
    }

    /// Convert `self` to the type of `default`, promoting integers to reals.
    pub fn coerce_to(&self, default: &ParamValue) -> Option<ParamValue> {
        match (self, default) {
            (ParamValue::Bool(_), ParamValue::Bool(_))
            | (ParamValue::Int(_), ParamValue::Int(_))
            | (ParamValue::Float(_), ParamValue::Float(_))
            | (ParamValue::Str(_), ParamValue::Str(_)) => Some(self.clone()),
            (ParamValue::Int(i), ParamValue::Float(_)) => Some(ParamValue::Float(*i as f64)),
            _ => None,
        }
    }

    /// Equality after canonicalization: integers and reals compare
    /// numerically, strings compare case-sensitively.
    pub fn same_value(&self, other: &ParamValue) -> bool {
        match (self, other) {
            (ParamValue::Int(a), ParamValue::Float(b)) | (ParamValue::Float(b), ParamValue::Int(a)) => {
                (*a as f64) == *b
            }
            _ => self == other,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{:?}", x),
            ParamValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<i32> for ParamValue {
    fn from(i: i32) -> Self {
        ParamValue::Int(i64::from(i))
    }
}

impl From<f64> for ParamValue {
    fn from(x: f64) -> Self {
        ParamValue::Float(x)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

fn parse_logical(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        ".t." | ".true." | "t" => Some(true),
        ".f." | ".false." | "f" => Some(false),
        _ => None,
    }
}

/// Parse a real literal with any of the `e`, `E`, `d`, `D` exponent markers.
pub(crate) fn parse_real(s: &str) -> Option<f64> {
    let normalized: String = s
        .chars()
        .map(|c| if c == 'd' || c == 'D' { 'e' } else { c })
        .collect();
    normalized.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namelist_rendering() {
        assert_eq!(ParamValue::Bool(true).to_namelist(), ".T.");
        assert_eq!(ParamValue::Bool(false).to_namelist(), ".F.");
        assert_eq!(ParamValue::Int(-1).to_namelist(), "-1");
        assert_eq!(ParamValue::Float(0.05).to_namelist(), "0.05d0");
        assert_eq!(ParamValue::Float(1.0).to_namelist(), "1.0d0");
        assert_eq!(ParamValue::Float(1e-10).to_namelist(), "1d-10");
        assert_eq!(ParamValue::from("Square").to_namelist(), "\"Square\"");
    }

    #[test]
    fn test_namelist_parsing() {
        assert_eq!(ParamValue::parse_namelist(".T."), Some(ParamValue::Bool(true)));
        assert_eq!(ParamValue::parse_namelist(".false."), Some(ParamValue::Bool(false)));
        assert_eq!(ParamValue::parse_namelist(" 12 "), Some(ParamValue::Int(12)));
        assert_eq!(ParamValue::parse_namelist("0.05d0"), Some(ParamValue::Float(0.05)));
        assert_eq!(ParamValue::parse_namelist("1.5D-3"), Some(ParamValue::Float(1.5e-3)));
        assert_eq!(ParamValue::parse_namelist("'abc'"), Some(ParamValue::from("abc")));
        assert_eq!(ParamValue::parse_namelist("abc"), None);
        assert_eq!(ParamValue::parse_namelist(""), None);
    }

    #[test]
    fn test_rendering_survives_reparse() {
        for v in [0.1, 5.0, -10.0, 1.0 / 3.0, 2.5e-7, 1e20] {
            let text = ParamValue::Float(v).to_namelist();
            assert_eq!(ParamValue::parse_namelist(&text), Some(ParamValue::Float(v)), "{}", text);
        }
    }

    #[test]
    fn test_coercion() {
        let real = ParamValue::Float(0.0);
        assert_eq!(ParamValue::Int(4).coerce_to(&real), Some(ParamValue::Float(4.0)));
        assert_eq!(ParamValue::Float(4.5).coerce_to(&ParamValue::Int(0)), None);
        assert_eq!(ParamValue::Bool(true).coerce_to(&real), None);
        assert!(ParamValue::Int(2).same_value(&ParamValue::Float(2.0)));
        assert!(!ParamValue::from("a").same_value(&ParamValue::from("A")));
    }

    #[test]
    fn test_untagged_deserialization() {
        let v: Vec<ParamValue> = serde_yaml::from_str("[true, 4, 0.5, Square]").unwrap();
        assert_eq!(
            v,
            vec![
                ParamValue::Bool(true),
                ParamValue::Int(4),
                ParamValue::Float(0.5),
                ParamValue::from("Square"),
            ]
        );
    }
}
