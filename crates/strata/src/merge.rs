//! merge strategies
//!
//! A [MergeStrategy] combines the values found for one key in several places (hierarchy layers or
//! locations) into a single value. Candidates are given in priority order: earlier candidates win
//! over later ones.
//!
//! | name     | behaviour                                                             |
//! |----------|-----------------------------------------------------------------------|
//! | `first`  | first found value, later candidates are not evaluated                 |
//! | `unique` | concatenation of all found arrays (scalars count as one element), deduplicated |
//! | `hash`   | union of all found objects, earlier keys win                          |
//! | `deep`   | recursive union of objects, arrays are merged uniquely                |
use crate::error::{ConfigError, LookupError};
use crate::invocation::Invocation;
use crate::value::{Map, Value};

/// Options for the `deep` strategy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeepOptions {
    /// Values (or array elements) starting with this prefix remove data of lower priority
    pub knockout_prefix: Option<String>,
    /// Deep merge objects found at the same position in merged arrays
    pub merge_hash_arrays: bool,
    /// Sort arrays after merging
    pub sort_merged_arrays: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MergeStrategy {
    #[default]
    First,
    Unique,
    Hash,
    Deep(DeepOptions),
}

impl MergeStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            MergeStrategy::First => "first",
            MergeStrategy::Unique => "unique",
            MergeStrategy::Hash => "hash",
            MergeStrategy::Deep(_) => "deep",
        }
    }

    /// Strategy by name, `options` only matter for `deep`
    pub fn from_name(name: &str, options: Option<&Map>) -> Result<Self, ConfigError> {
        match name {
            "first" => Ok(MergeStrategy::First),
            "unique" => Ok(MergeStrategy::Unique),
            "hash" => Ok(MergeStrategy::Hash),
            "deep" => DeepOptions::from_map(options).map(MergeStrategy::Deep),
            other => Err(ConfigError::UnknownMergeStrategy(other.to_string())),
        }
    }

    /// Strategy from a `merge` value: either a name or an object with a `strategy` entry
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        match value {
            Value::String(name) => Self::from_name(name, None),
            Value::Object(map) => {
                let Some(name) = map.get("strategy").and_then(Value::as_str) else {
                    return Err(ConfigError::InvalidMergeOptions(
                        "missing 'strategy'".to_string(),
                    ));
                };
                let mut options = map.clone();
                options.shift_remove("strategy");
                Self::from_name(name, Some(&options))
            }
            other => Err(ConfigError::InvalidMergeOptions(format!(
                "expected string or object, got {}",
                other.type_name()
            ))),
        }
    }

    /// Merge the values `produce` yields for each candidate
    ///
    /// Candidates for which `produce` returns `None` are skipped. Returns `None` if no candidate
    /// produced a value.
    pub fn merge_lookup<T, I, F>(
        &self,
        candidates: I,
        invocation: &mut Invocation,
        mut produce: F,
    ) -> Result<Option<Value>, LookupError>
    where
        I: IntoIterator<Item = T>,
        F: FnMut(&mut Invocation, T) -> Result<Option<Value>, LookupError>,
    {
        invocation.with_merge(self, |invocation| {
            if let MergeStrategy::First = self {
                for candidate in candidates {
                    if let Some(value) = produce(invocation, candidate)? {
                        invocation.report_merge_result(&value);
                        return Ok(Some(value));
                    }
                }
                return Ok(None);
            }

            let mut found = Vec::new();
            for candidate in candidates {
                if let Some(value) = produce(invocation, candidate)? {
                    found.push(value);
                }
            }

            let merged = self.merge_found(found)?;
            if let Some(merged) = &merged {
                invocation.report_merge_result(merged);
            }
            Ok(merged)
        })
    }

    fn merge_found(&self, found: Vec<Value>) -> Result<Option<Value>, LookupError> {
        if found.is_empty() {
            return Ok(None);
        }

        let merged = match self {
            MergeStrategy::First => found.into_iter().next(),
            MergeStrategy::Unique => {
                let mut elements = Vec::new();
                for value in found {
                    match value {
                        Value::Array(array) => elements.extend(array),
                        other => elements.push(other),
                    }
                }
                Some(Value::Array(unique(elements)))
            }
            MergeStrategy::Hash => {
                let mut result = Map::new();
                for value in found {
                    for (key, value) in self.expect_object(value)? {
                        result.entry(key).or_insert(value);
                    }
                }
                Some(Value::Object(result))
            }
            MergeStrategy::Deep(options) => {
                let mut maps = Vec::with_capacity(found.len());
                for value in found {
                    maps.push(self.expect_object(value)?);
                }
                let mut maps = maps.into_iter();
                let mut result = maps.next().unwrap_or_default();
                for lower in maps {
                    result = options.merge_maps(result, lower);
                }
                Some(Value::Object(result))
            }
        };
        Ok(merged)
    }

    fn expect_object(&self, value: Value) -> Result<Map, LookupError> {
        match value {
            Value::Object(map) => Ok(map),
            other => Err(LookupError::MergeTypeMismatch {
                strategy: self.name(),
                found: other.type_name(),
            }),
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl DeepOptions {
    fn from_map(options: Option<&Map>) -> Result<Self, ConfigError> {
        let mut deep = DeepOptions::default();
        let Some(options) = options else {
            return Ok(deep);
        };

        for (name, value) in options {
            match (name.as_str(), value) {
                ("knockout_prefix", Value::String(prefix)) if !prefix.is_empty() => {
                    deep.knockout_prefix = Some(prefix.clone())
                }
                ("knockout_prefix", Value::Null) => deep.knockout_prefix = None,
                ("merge_hash_arrays", Value::Boolean(b)) => deep.merge_hash_arrays = *b,
                ("sort_merged_arrays", Value::Boolean(b)) => deep.sort_merged_arrays = *b,
                ("knockout_prefix" | "merge_hash_arrays" | "sort_merged_arrays", other) => {
                    return Err(ConfigError::InvalidMergeOptions(format!(
                        "'{name}' does not accept {}",
                        other.type_name()
                    )))
                }
                (unknown, _) => tracing::warn!(option = unknown, "ignoring unknown deep merge option"),
            }
        }
        Ok(deep)
    }

    fn is_knockout(&self, value: &Value) -> bool {
        matches!((&self.knockout_prefix, value), (Some(prefix), Value::String(s)) if s == prefix)
    }

    /// The element an array entry such as `--wheel` removes
    fn knocked_out_element(&self, value: &Value) -> Option<Value> {
        let prefix = self.knockout_prefix.as_deref()?;
        match value {
            Value::String(s) => s
                .strip_prefix(prefix)
                .filter(|rest| !rest.is_empty())
                .map(Value::from),
            _ => None,
        }
    }

    /// Merge `lower` into `higher`
    fn merge_maps(&self, higher: Map, mut lower: Map) -> Map {
        let mut result = Map::with_capacity(higher.len() + lower.len());
        for (key, value) in higher {
            if self.is_knockout(&value) {
                lower.shift_remove(&key);
                continue;
            }
            let merged = match lower.shift_remove(&key) {
                Some(lower_value) => self.merge_values(value, lower_value),
                None => self.without_knockouts(value),
            };
            result.insert(key, merged);
        }
        for (key, value) in lower {
            result.entry(key).or_insert(value);
        }
        result
    }

    fn merge_values(&self, higher: Value, lower: Value) -> Value {
        match (higher, lower) {
            (Value::Object(higher), Value::Object(lower)) => {
                Value::Object(self.merge_maps(higher, lower))
            }
            (Value::Array(higher), Value::Array(lower)) => Value::Array(self.merge_arrays(higher, lower)),
            (higher, _) => self.without_knockouts(higher),
        }
    }

    /// Drop the knockout markers of a higher value that had nothing below it to remove
    fn without_knockouts(&self, value: Value) -> Value {
        if self.knockout_prefix.is_none() {
            return value;
        }
        match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .filter(|(_, value)| !self.is_knockout(value))
                    .map(|(key, value)| (key, self.without_knockouts(value)))
                    .collect(),
            ),
            Value::Array(array) => Value::Array(
                array
                    .into_iter()
                    .filter(|element| self.knocked_out_element(element).is_none())
                    .map(|element| self.without_knockouts(element))
                    .collect(),
            ),
            other => other,
        }
    }

    fn merge_arrays(&self, higher: Vec<Value>, lower: Vec<Value>) -> Vec<Value> {
        let mut knocked_out = Vec::new();
        let mut result = Vec::with_capacity(higher.len() + lower.len());
        for value in higher {
            match self.knocked_out_element(&value) {
                Some(target) => knocked_out.push(target),
                None => result.push(value),
            }
        }

        let lower = lower.into_iter().filter(|value| !knocked_out.contains(value));
        if self.merge_hash_arrays {
            // objects at the same position are merged, everything else is appended
            let mut rest = Vec::new();
            for (index, lower_value) in lower.enumerate() {
                match (result.get_mut(index), lower_value) {
                    (Some(Value::Object(slot)), Value::Object(lower_map)) => {
                        let higher_map = std::mem::take(slot);
                        *slot = self.merge_maps(higher_map, lower_map);
                    }
                    (_, lower_value) => rest.push(lower_value),
                }
            }
            result.extend(rest);
        } else {
            result.extend(lower);
        }
        let mut result = unique(result);

        if self.sort_merged_arrays {
            result.sort_by(compare);
        }
        result
    }
}

/// Remove duplicates, keeping the first occurrence
fn unique(values: Vec<Value>) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::with_capacity(values.len());
    for value in values {
        if !result.contains(&value) {
            result.push(value);
        }
    }
    result
}

fn compare(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    match (a, b) {
        (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
        (Value::Integer(a), Value::Decimal(b)) => (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal),
        (Value::Decimal(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal),
        (Value::Decimal(a), Value::Decimal(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
        (a, b) => a
            .type_name()
            .cmp(b.type_name())
            .then_with(|| a.to_string().cmp(&b.to_string())),
    }
}
