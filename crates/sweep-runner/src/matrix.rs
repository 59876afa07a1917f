use crate::error::SweepError;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// Field name under which a run's timing is recorded. No parameter may use it.
pub const TIME_FIELD: &str = "time";

/// Named parameters with their candidate values, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterMatrix {
    params: Vec<(String, Vec<i64>)>,
}

impl ParameterMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter(mut self, name: &str, values: Vec<i64>) -> Self {
        self.params.push((name.to_string(), values));
        self
    }

    pub fn parameters(&self) -> impl Iterator<Item = (&str, &[i64])> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(k, _)| k.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.iter().any(|(k, _)| k == name)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Number of configurations the matrix expands to.
    pub fn combination_count(&self) -> usize {
        self.params.iter().map(|(_, v)| v.len()).product()
    }

    /// Rejects matrices that cannot produce a meaningful sweep.
    pub fn validate(&self) -> Result<(), SweepError> {
        let mut seen = BTreeSet::new();
        for (name, values) in &self.params {
            if name == TIME_FIELD {
                return Err(SweepError::ReservedParameter(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(SweepError::DuplicateParameter(name.clone()));
            }
            if values.is_empty() {
                return Err(SweepError::EmptyCandidates(name.clone()));
            }
        }
        Ok(())
    }

    /// Every combination of one value per parameter, last-declared parameter
    /// varying fastest. Calling this again restarts the sequence.
    pub fn combinations(&self) -> Combinations<'_> {
        let cursor = if self.params.iter().any(|(_, v)| v.is_empty()) {
            None
        } else {
            Some(vec![0; self.params.len()])
        };
        Combinations {
            matrix: self,
            cursor,
            remaining: self.combination_count(),
        }
    }
}

pub struct Combinations<'a> {
    matrix: &'a ParameterMatrix,
    cursor: Option<Vec<usize>>,
    remaining: usize,
}

impl Iterator for Combinations<'_> {
    type Item = RunConfig;

    fn next(&mut self) -> Option<RunConfig> {
        let cursor = self.cursor.as_mut()?;
        let values = self
            .matrix
            .params
            .iter()
            .zip(cursor.iter())
            .map(|((name, candidates), &i)| (name.clone(), candidates[i]))
            .collect();

        let mut exhausted = true;
        for pos in (0..cursor.len()).rev() {
            cursor[pos] += 1;
            if cursor[pos] < self.matrix.params[pos].1.len() {
                exhausted = false;
                break;
            }
            cursor[pos] = 0;
        }
        if exhausted {
            self.cursor = None;
        }
        self.remaining = self.remaining.saturating_sub(1);
        Some(RunConfig { values })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Combinations<'_> {}

impl Serialize for ParameterMatrix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.params.len()))?;
        for (name, values) in &self.params {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ParameterMatrix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MatrixVisitor;

        impl<'de> Visitor<'de> for MatrixVisitor {
            type Value = ParameterMatrix;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of parameter names to integer lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut params = Vec::new();
                while let Some((name, values)) = access.next_entry::<String, Vec<i64>>()? {
                    params.push((name, values));
                }
                Ok(ParameterMatrix { params })
            }
        }

        deserializer.deserialize_map(MatrixVisitor)
    }
}

/// One concrete value per parameter. Field order follows the matrix that
/// produced it; equality across orderings goes through `config_identity`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunConfig {
    values: Vec<(String, i64)>,
}

impl RunConfig {
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        Self {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.values.iter().find(|(k, _)| k == name).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn insert(&mut self, name: String, value: i64) -> bool {
        if self.get(&name).is_some() {
            return false;
        }
        self.values.push((name, value));
        true
    }
}

impl fmt::Display for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self
            .values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>();
        f.write_str(&parts.join(" "))
    }
}

impl Serialize for RunConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RunConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ConfigVisitor;

        impl<'de> Visitor<'de> for ConfigVisitor {
            type Value = RunConfig;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of parameter names to integers")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut config = RunConfig::default();
                while let Some((name, value)) = access.next_entry::<String, i64>()? {
                    if !config.insert(name.clone(), value) {
                        return Err(de::Error::custom(format!("duplicate parameter '{}'", name)));
                    }
                }
                Ok(config)
            }
        }

        deserializer.deserialize_map(ConfigVisitor)
    }
}
