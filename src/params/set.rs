//! User parameter overrides and their resolution against the defaults.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::defaults::{Defaults, Entry, Hamiltonian, Namelist, HAM_NAME_NAMELIST, POST_PROCESSING_NAMELIST};
use super::value::ParamValue;
use crate::error::{Error, Result};

/// Ordered parameter overrides, as given by the user.
///
/// Keys are matched case-insensitively. Inserting an existing key replaces
/// its value in place, so the first spelling and position win.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    entries: Vec<(String, ParamValue)>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<ParamValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        let idx = self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        Some(self.entries.remove(idx).1)
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<ParamValue>> FromIterator<(K, V)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = ParameterSet::new();
        for (k, v) in iter {
            set.insert(k.as_ref(), v);
        }
        set
    }
}

impl Serialize for ParameterSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct ParameterSetVisitor;

impl<'de> Visitor<'de> for ParameterSetVisitor {
    type Value = ParameterSet;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a mapping from parameter names to scalar values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<ParameterSet, A::Error> {
        let mut set = ParameterSet::new();
        while let Some((key, value)) = access.next_entry::<String, ParamValue>()? {
            set.insert(&key, value);
        }
        Ok(set)
    }
}

impl<'de> Deserialize<'de> for ParameterSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(ParameterSetVisitor)
    }
}

/// Complete namelist content for one run: defaults merged with overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    hamiltonian: Hamiltonian,
    namelists: Vec<Namelist>,
}

impl Parameters {
    /// Merge `set` into the defaults of `ham`.
    ///
    /// Every key must exist for `ham` and carry the type of its default;
    /// integers are accepted for real-valued keys.
    pub fn resolve(defaults: &Defaults, ham: Hamiltonian, set: &ParameterSet) -> Result<Self> {
        let mut namelists = defaults.for_hamiltonian(ham)?;

        for (key, value) in set.iter() {
            let entry = namelists
                .iter_mut()
                .find_map(|n| n.get_mut(key))
                .ok_or_else(|| Error::UnknownParameter {
                    name: key.to_string(),
                    hamiltonian: ham.to_string(),
                })?;
            entry.value = value.coerce_to(&entry.value).ok_or_else(|| Error::InvalidParameter {
                name: key.to_string(),
                message: format!("expected {}, got {} {}", entry.value.type_name(), value.type_name(), value),
            })?;
        }

        namelists.push(Namelist {
            name: HAM_NAME_NAMELIST.to_string(),
            entries: vec![Entry {
                name: "ham_name".to_string(),
                value: ParamValue::from(ham.name()),
                doc: "Name of Hamiltonian".to_string(),
            }],
        });

        Ok(Self {
            hamiltonian: ham,
            namelists,
        })
    }

    pub fn hamiltonian(&self) -> Hamiltonian {
        self.hamiltonian
    }

    pub fn namelists(&self) -> &[Namelist] {
        &self.namelists
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.namelists
            .iter()
            .find_map(|n| n.get(key))
            .map(|e| &e.value)
    }

    /// Overwrite an existing key, keeping the type of its current value.
    pub fn set(&mut self, key: &str, value: impl Into<ParamValue>) -> Result<()> {
        let value = value.into();
        let entry = self
            .namelists
            .iter_mut()
            .find_map(|n| n.get_mut(key))
            .ok_or_else(|| Error::UnknownParameter {
                name: key.to_string(),
                hamiltonian: self.hamiltonian.to_string(),
            })?;
        entry.value = value.coerce_to(&entry.value).ok_or_else(|| Error::InvalidParameter {
            name: key.to_string(),
            message: format!("expected {}, got {}", entry.value.type_name(), value.type_name()),
        })?;
        Ok(())
    }

    /// Number of bins the engine is asked to produce.
    pub fn requested_bins(&self) -> usize {
        self.get("Nbin")
            .and_then(ParamValue::as_i64)
            .map(|n| n.max(0) as usize)
            .unwrap_or(0)
    }

    /// Canonical content that decides whether two runs may share bins:
    /// lower-cased keys of every namelist except the post-processing one,
    /// without the run-length keys.
    pub fn identity(&self) -> BTreeMap<String, ParamValue> {
        self.namelists
            .iter()
            .filter(|n| n.name != POST_PROCESSING_NAMELIST)
            .flat_map(|n| n.entries.iter())
            .filter(|e| !e.is_run_length())
            .map(|e| (e.name.to_ascii_lowercase(), e.value.clone()))
            .collect()
    }
}

/// Keys whose values differ between two identities, formatted as
/// `key: stored -> requested`.
pub fn identity_differences(
    stored: &BTreeMap<String, ParamValue>,
    requested: &BTreeMap<String, ParamValue>,
) -> Vec<String> {
    let mut diffs = Vec::new();
    for (key, req) in requested {
        match stored.get(key) {
            Some(old) if old.same_value(req) => {}
            Some(old) => diffs.push(format!("{}: {} -> {}", key, old, req)),
            None => diffs.push(format!("{}: <missing> -> {}", key, req)),
        }
    }
    for (key, old) in stored {
        if !requested.contains_key(key) {
            diffs.push(format!("{}: {} -> <missing>", key, old));
        }
    }
    diffs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hubbard(set: &ParameterSet) -> Result<Parameters> {
        Parameters::resolve(&Defaults::standard(), Hamiltonian::Hubbard, set)
    }

    #[test]
    fn test_resolve_merges_defaults() {
        let set = ParameterSet::new().with("l1", 4).with("beta", 1.0);
        let params = hubbard(&set).unwrap();
        assert_eq!(params.get("L1"), Some(&ParamValue::Int(4)));
        assert_eq!(params.get("Beta"), Some(&ParamValue::Float(1.0)));
        assert_eq!(params.get("L2"), Some(&ParamValue::Int(6)));
        assert_eq!(params.get("ham_name"), Some(&ParamValue::from("Hubbard")));
    }

    #[test]
    fn test_resolve_promotes_integers() {
        let params = hubbard(&ParameterSet::new().with("Dtau", 1)).unwrap();
        assert_eq!(params.get("dtau"), Some(&ParamValue::Float(1.0)));
    }

    #[test]
    fn test_resolve_rejects_unknown_and_mistyped() {
        let err = hubbard(&ParameterSet::new().with("ham_JK", 1.0)).unwrap_err();
        assert!(matches!(err, Error::UnknownParameter { .. }));

        let err = hubbard(&ParameterSet::new().with("L1", 4.5)).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    #[test]
    fn test_identity_ignores_run_length_and_errors() {
        let a = hubbard(&ParameterSet::new().with("Nbin", 10).with("N_skip", 3)).unwrap();
        let b = hubbard(&ParameterSet::new().with("Nbin", 60)).unwrap();
        assert_eq!(a.identity(), b.identity());

        let c = hubbard(&ParameterSet::new().with("Nsweep", 20)).unwrap();
        let diffs = identity_differences(&a.identity(), &c.identity());
        assert_eq!(diffs, vec!["nsweep: 100 -> 20".to_string()]);
    }

    #[test]
    fn test_insert_is_case_insensitive() {
        let mut set = ParameterSet::new().with("Beta", 1.0);
        set.insert("BETA", 2.0);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("beta"), Some(&ParamValue::Float(2.0)));
        assert_eq!(set.iter().next().unwrap().0, "Beta");
    }

    #[test]
    fn test_deserialize_keeps_order() {
        let set: ParameterSet = serde_yaml::from_str(r#"{"L2": 1, "L1": 4, "Model": "Hubbard"}"#).unwrap();
        let keys: Vec<&str> = set.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["L2", "L1", "Model"]);
    }
}
