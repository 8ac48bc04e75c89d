//! `convert_to` support
//!
//! `lookup_options` may ask for the looked up value to be converted:
//!
//! ```yaml
//! lookup_options:
//!   db_password:
//!     convert_to: Sensitive
//!   port:
//!     convert_to: [Integer, 16]
//! ```
//!
//! The first element names the target type, further elements are passed to the conversion.
use crate::error::ConfigError;
use crate::value::{Map, Value};

/// Type grammar used for `convert_to`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dialect {
    #[default]
    Standard,
}

impl Dialect {
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "standard" => Ok(Dialect::Standard),
            other => Err(ConfigError::UnknownDialect(other.to_string())),
        }
    }

    pub fn parse_type(&self, name: &str) -> Result<ValueType, ConfigError> {
        match (self, name.trim()) {
            (Dialect::Standard, "Sensitive") => Ok(ValueType::Sensitive),
            (Dialect::Standard, "String") => Ok(ValueType::String),
            (Dialect::Standard, "Integer") => Ok(ValueType::Integer),
            (Dialect::Standard, "Float") => Ok(ValueType::Float),
            (Dialect::Standard, "Boolean") => Ok(ValueType::Boolean),
            (Dialect::Standard, "Array") => Ok(ValueType::Array),
            (_, other) => Err(ConfigError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Sensitive,
    String,
    Integer,
    Float,
    Boolean,
    Array,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueType::Sensitive => "Sensitive",
            ValueType::String => "String",
            ValueType::Integer => "Integer",
            ValueType::Float => "Float",
            ValueType::Boolean => "Boolean",
            ValueType::Array => "Array",
        };
        f.write_str(name)
    }
}

/// A requested conversion, parsed from `lookup_options`
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub target: ValueType,
    pub args: Vec<Value>,
}

impl Conversion {
    /// Read the `convert_to` entry of a key's lookup options
    pub fn from_lookup_options(dialect: Dialect, options: &Map) -> Result<Option<Self>, ConfigError> {
        let Some(convert_to) = options.get("convert_to") else {
            return Ok(None);
        };

        let (name, args) = match convert_to {
            Value::String(name) => (name.as_str(), Vec::new()),
            Value::Array(array) => match array.split_first() {
                Some((Value::String(name), args)) => (name.as_str(), args.to_vec()),
                // an empty list asks for nothing
                None => return Ok(None),
                Some((other, _)) => return Err(ConfigError::UnknownType(other.to_string())),
            },
            other => return Err(ConfigError::UnknownType(other.to_string())),
        };

        Ok(Some(Self {
            target: dialect.parse_type(name)?,
            args,
        }))
    }

    pub fn is_sensitive(&self) -> bool {
        self.target == ValueType::Sensitive
    }

    /// Construct an instance of the target type from `value`
    pub fn apply(&self, value: Value) -> Result<Value, ConfigError> {
        if let Value::Sensitive(inner) = value {
            return self.apply(*inner).map(Value::into_sensitive);
        }

        let failed = |value: &Value| ConfigError::Conversion {
            target: self.target.to_string(),
            found: value.type_name().to_string(),
        };

        match self.target {
            ValueType::Sensitive => Ok(value.into_sensitive()),
            ValueType::String => Ok(match value {
                Value::String(s) => Value::String(s),
                other => Value::String(other.to_string()),
            }),
            ValueType::Integer => match &value {
                Value::Integer(_) => Ok(value),
                Value::Decimal(d) if d.is_finite() => Ok(Value::Integer(d.trunc() as i64)),
                Value::Boolean(b) => Ok(Value::Integer(i64::from(*b))),
                Value::String(s) => {
                    let radix = match self.args.first() {
                        Some(Value::Integer(radix @ 2..=36)) => *radix as u32,
                        Some(other) => return Err(failed(other)),
                        None => 10,
                    };
                    let digits = s.trim();
                    let digits = match radix {
                        16 => digits.trim_start_matches("0x").trim_start_matches("0X"),
                        8 => digits.trim_start_matches("0o"),
                        2 => digits.trim_start_matches("0b"),
                        _ => digits,
                    };
                    i64::from_str_radix(digits, radix)
                        .map(Value::Integer)
                        .map_err(|_| failed(&value))
                }
                _ => Err(failed(&value)),
            },
            ValueType::Float => match &value {
                Value::Decimal(_) => Ok(value),
                Value::Integer(i) => Ok(Value::Decimal(*i as f64)),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Decimal)
                    .map_err(|_| failed(&value)),
                _ => Err(failed(&value)),
            },
            ValueType::Boolean => match &value {
                Value::Boolean(_) => Ok(value),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" => Ok(Value::Boolean(true)),
                    "false" | "no" => Ok(Value::Boolean(false)),
                    _ => Err(failed(&value)),
                },
                Value::Integer(0) => Ok(Value::Boolean(false)),
                Value::Integer(1) => Ok(Value::Boolean(true)),
                _ => Err(failed(&value)),
            },
            ValueType::Array => Ok(match value {
                Value::Array(array) => Value::Array(array),
                Value::Object(map) => Value::Array(
                    map.into_iter()
                        .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
                        .collect(),
                ),
                other => Value::Array(vec![other]),
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object;
    use pretty_assertions::assert_eq;

    fn conversion(convert_to: Value) -> Conversion {
        let options = object! { "convert_to" => convert_to };
        Conversion::from_lookup_options(Dialect::Standard, options.as_object().unwrap())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn parse_convert_to() {
        assert!(conversion(Value::from("Sensitive")).is_sensitive());

        let hex = conversion(Value::from(vec![Value::from("Integer"), Value::from(16)]));
        assert_eq!(hex.target, ValueType::Integer);
        assert_eq!(hex.args, vec![Value::from(16)]);

        let options = object! { "convert_to" => "Bogus" };
        assert!(matches!(
            Conversion::from_lookup_options(Dialect::Standard, options.as_object().unwrap()),
            Err(ConfigError::UnknownType(_))
        ));
        assert_eq!(
            Conversion::from_lookup_options(Dialect::Standard, &Map::new()).unwrap(),
            None
        );
    }

    #[test]
    fn conversions() {
        let hex = conversion(Value::from(vec![Value::from("Integer"), Value::from(16)]));
        assert_eq!(hex.apply(Value::from("0xff")).unwrap(), Value::from(255));

        let float = conversion(Value::from("Float"));
        assert_eq!(float.apply(Value::from(2)).unwrap(), Value::from(2.0));

        let boolean = conversion(Value::from("Boolean"));
        assert_eq!(boolean.apply(Value::from("Yes")).unwrap(), Value::from(true));
        assert!(boolean.apply(Value::from("maybe")).is_err());

        let string = conversion(Value::from("String"));
        assert_eq!(string.apply(Value::from(42)).unwrap(), Value::from("42"));

        let array = conversion(Value::from("Array"));
        assert_eq!(array.apply(Value::from(1)).unwrap(), Value::from(vec![1]));
    }

    #[test]
    fn conversion_keeps_sensitive_marker() {
        let integer = conversion(Value::from("Integer"));
        assert_eq!(
            integer.apply(Value::from("7").into_sensitive()).unwrap(),
            Value::from(7).into_sensitive()
        );
    }

    #[test]
    fn unknown_dialect() {
        assert!(matches!(
            Dialect::from_name("pcore"),
            Err(ConfigError::UnknownDialect(_))
        ));
    }
}
