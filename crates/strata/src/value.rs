//! value representation
//!
//! Looked-up data is modelled with the following data types
//! - null
//! - boolean (true/false)
//! - integer (signed, i64)
//! - decimal (f64)
//! - string (utf-8)
//! - array ("list" of values)
//! - object (order-preserving "map"/"dictionary", where the key is of type string)
//! - sensitive (any of the above, marked so that it is never rendered)
//!
//! Absence of a value is not a [Value]. The engine uses `Option<Value>` so that "not found" and
//! "found but null" stay distinguishable.
use serde::{
    ser::{SerializeMap, SerializeSeq},
    Serializer,
};

/// Ordered mapping used for objects
pub type Map = indexmap::IndexMap<String, Value>;

/// Text rendered in place of a sensitive value
pub const REDACTED: &str = "Sensitive [value redacted]";

/// All possible value types
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    String(String),
    Array(Vec<Value>),
    Object(Map),
    Sensitive(Box<Value>),
}

impl Value {
    /// Name of the value type as used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Sensitive(_) => "sensitive",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_sensitive(&self) -> bool {
        matches!(self, Value::Sensitive(_))
    }

    /// Wrap this value in the sensitive marker unless it already is one
    pub fn into_sensitive(self) -> Value {
        match self {
            sensitive @ Value::Sensitive(_) => sensitive,
            other => Value::Sensitive(Box::new(other)),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) => f.write_str(s),
            Value::Sensitive(_) => f.write_str(REDACTED),
            Value::Array(_) | Value::Object(_) => {
                let rendered = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
                f.write_str(&rendered)
            }
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Decimal(value)
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Self::Object(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

impl From<serde_yaml::Value> for Value {
    fn from(value: serde_yaml::Value) -> Self {
        use serde_yaml::Value as Yaml;

        match value {
            Yaml::Null => Value::Null,
            Yaml::Bool(b) => b.into(),
            Yaml::Number(n) => match n.as_i64() {
                Some(int) => Value::Integer(int),
                // u64 beyond i64::MAX ends up here as well
                None => Value::Decimal(n.as_f64().unwrap_or(f64::NAN)),
            },
            Yaml::String(s) => s.into(),
            Yaml::Sequence(seq) => Value::Array(seq.into_iter().map(Into::into).collect()),
            Yaml::Mapping(mapping) => Value::Object(
                mapping
                    .into_iter()
                    .map(|(k, v)| (yaml_key(k), v.into()))
                    .collect(),
            ),
            Yaml::Tagged(tagged) => tagged.value.into(),
        }
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match value {
            Json::Null => Value::Null,
            Json::Bool(b) => b.into(),
            Json::Number(n) => match n.as_i64() {
                Some(int) => Value::Integer(int),
                None => Value::Decimal(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => s.into(),
            Json::Array(array) => Value::Array(array.into_iter().map(Into::into).collect()),
            Json::Object(object) => {
                Value::Object(object.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl serde::ser::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Boolean(value) => serializer.serialize_bool(*value),
            Value::Integer(value) => serializer.serialize_i64(*value),
            Value::Decimal(value) => serializer.serialize_f64(*value),
            Value::String(value) => serializer.serialize_str(value),
            Value::Sensitive(_) => serializer.serialize_str(REDACTED),
            Value::Array(value) => {
                let mut ser = serializer.serialize_seq(Some(value.len()))?;
                for element in value {
                    ser.serialize_element(element)?;
                }
                ser.end()
            }
            Value::Object(value) => {
                let mut ser = serializer.serialize_map(Some(value.len()))?;
                for (element_key, element_value) in value {
                    ser.serialize_entry(element_key, element_value)?;
                }
                ser.end()
            }
        }
    }
}

impl<'de> serde::de::Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        serde_yaml::Value::deserialize(deserializer).map(Into::into)
    }
}

/// Build a [Value::Object] from key/value pairs
///
/// ```
/// # use strata::object;
/// let value = object! { "a" => 1, "b" => "two" };
/// assert_eq!(value.as_object().map(|m| m.len()), Some(2));
/// ```
#[macro_export]
macro_rules! object {
    {} => { $crate::value::Value::Object($crate::value::Map::new()) };
    { $($key:expr => $value:expr),+ $(,)? } => {{
        let mut map = $crate::value::Map::new();
        $(
            map.insert($key.to_string(), $crate::value::Value::from($value));
        )+
        $crate::value::Value::Object(map)
    }};
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn from_yaml_keeps_order_and_stringifies_keys() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("b: 1\na: [x, 2]\n3: true").unwrap();
        let value = Value::from(yaml);

        let map = value.as_object().unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["b", "a", "3"]);
        assert_eq!(map["a"], Value::from(vec![Value::from("x"), Value::from(2)]));
    }

    #[test]
    fn sensitive_is_never_rendered() {
        let value = Value::from("hunter2").into_sensitive();
        assert_eq!(value.to_string(), REDACTED);
        assert_eq!(serde_json::to_string(&value).unwrap(), format!("\"{REDACTED}\""));
        // wrapping twice keeps a single layer
        assert_eq!(value.clone().into_sensitive(), value);
    }

    #[test]
    fn display_renders_containers_as_json() {
        let value = object! { "a" => vec![1, 2] };
        assert_eq!(value.to_string(), r#"{"a":[1,2]}"#);
    }
}
