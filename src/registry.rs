//! Algorithm registry
//!
//! An explicit table from algorithm name to constructor and default
//! hyperparameters. It is built once at startup, usually with
//! [`Registry::with_builtin`], and only read afterwards.

use crate::algorithms::{Als, Fma, Knn, Knn2, Sgd, Sgd2, Svd, SvdKnn, Zero};
use crate::core::{RecommendationAlgorithm, Result, ZeroError};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A single hyperparameter value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(u64),
    Float(f64),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
        }
    }
}

impl FromStr for ParamValue {
    type Err = ZeroError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "true" => Ok(ParamValue::Bool(true)),
            "false" => Ok(ParamValue::Bool(false)),
            _ => s
                .parse::<u64>()
                .map(ParamValue::Int)
                .or_else(|_| s.parse::<f64>().map(ParamValue::Float))
                .map_err(|_| ZeroError::ParseError(format!("Invalid hyperparameter value: {s}"))),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<usize> for ParamValue {
    fn from(value: usize) -> Self {
        ParamValue::Int(value as u64)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

/// Named hyperparameters handed to an algorithm constructor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters(BTreeMap<String, ParamValue>);

impl Hyperparameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion
    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ParamValue)> {
        self.0.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `self` overridden by every entry of `overrides`
    pub fn merged(&self, overrides: &Hyperparameters) -> Hyperparameters {
        let mut merged = self.clone();
        for (name, value) in overrides.iter() {
            merged.set(name, value);
        }
        merged
    }

    /// Parse a `name=value` assignment
    pub fn parse_assignment(assignment: &str) -> Result<(String, ParamValue)> {
        let (name, value) = assignment.split_once('=').ok_or_else(|| {
            ZeroError::ParseError(format!("Expected name=value, got: {assignment}"))
        })?;
        Ok((name.trim().to_string(), value.parse()?))
    }

    pub fn usize_or(&self, name: &str, default: usize) -> Result<usize> {
        match self.get(name) {
            None => Ok(default),
            Some(ParamValue::Int(i)) => Ok(i as usize),
            Some(ParamValue::Float(x)) if x >= 0.0 && x.fract() == 0.0 => Ok(x as usize),
            Some(other) => Err(invalid(name, other, "a non-negative integer")),
        }
    }

    pub fn u64_or(&self, name: &str, default: u64) -> Result<u64> {
        match self.get(name) {
            None => Ok(default),
            Some(ParamValue::Int(i)) => Ok(i),
            Some(other) => Err(invalid(name, other, "a non-negative integer")),
        }
    }

    pub fn f64_or(&self, name: &str, default: f64) -> Result<f64> {
        match self.get(name) {
            None => Ok(default),
            Some(ParamValue::Float(x)) => Ok(x),
            Some(ParamValue::Int(i)) => Ok(i as f64),
            Some(other) => Err(invalid(name, other, "a number")),
        }
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool> {
        match self.get(name) {
            None => Ok(default),
            Some(ParamValue::Bool(b)) => Ok(b),
            Some(other) => Err(invalid(name, other, "true or false")),
        }
    }
}

fn invalid(name: &str, value: ParamValue, expected: &str) -> ZeroError {
    ZeroError::InvalidParameter(format!("{name}={value}, expected {expected}"))
}

/// Builds a boxed model from hyperparameters
pub type Constructor = fn(&Hyperparameters) -> Result<Box<dyn RecommendationAlgorithm>>;

struct Entry {
    constructor: Constructor,
    defaults: Hyperparameters,
}

/// Name → (constructor, default hyperparameters) table
#[derive(Default)]
pub struct Registry {
    entries: BTreeMap<String, Entry>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every algorithm shipped with the crate
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        let builtin: [(&str, Constructor, Hyperparameters); 9] = [
            ("als", Als::from_params, Als::default_params()),
            ("sgd", Sgd::from_params, Sgd::default_params()),
            ("sgd2", Sgd2::from_params, Sgd2::default_params()),
            ("svd", Svd::from_params, Svd::default_params()),
            ("svdknn", SvdKnn::from_params, SvdKnn::default_params()),
            ("knn", Knn::from_params, Knn::default_params()),
            ("knn2", Knn2::from_params, Knn2::default_params()),
            ("fma", Fma::from_params, Fma::default_params()),
            ("zero", Zero::from_params, Hyperparameters::new()),
        ];
        for (name, constructor, defaults) in builtin {
            registry.entries.insert(
                name.to_string(),
                Entry {
                    constructor,
                    defaults,
                },
            );
        }
        debug!(
            "Recommendation algorithm registry initialized, {} algorithms available",
            registry.len()
        );
        registry
    }

    /// Register an algorithm; registering a name twice is an error
    pub fn register(
        &mut self,
        name: &str,
        constructor: Constructor,
        defaults: Hyperparameters,
    ) -> Result<()> {
        if self.entries.contains_key(name) {
            return Err(ZeroError::DuplicateAlgorithm(name.to_string()));
        }
        self.entries.insert(
            name.to_string(),
            Entry {
                constructor,
                defaults,
            },
        );
        debug!("Registered {name} as a recommendation algorithm");
        Ok(())
    }

    /// Build a model with its default hyperparameters
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn RecommendationAlgorithm>> {
        self.instantiate_with(name, &Hyperparameters::new())
    }

    /// Build a model with `overrides` merged over its defaults
    ///
    /// Override names that the algorithm does not declare are rejected.
    pub fn instantiate_with(
        &self,
        name: &str,
        overrides: &Hyperparameters,
    ) -> Result<Box<dyn RecommendationAlgorithm>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ZeroError::UnknownAlgorithm(name.to_string()))?;
        if let Some((unknown, _)) = overrides.iter().find(|(k, _)| !entry.defaults.contains(k)) {
            return Err(ZeroError::InvalidParameter(format!(
                "unknown hyperparameter {unknown} for algorithm {name}"
            )));
        }
        (entry.constructor)(&entry.defaults.merged(overrides))
    }

    /// Default hyperparameters of a registered algorithm
    pub fn defaults(&self, name: &str) -> Option<&Hyperparameters> {
        self.entries.get(name).map(|e| &e.defaults)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn list_available(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
