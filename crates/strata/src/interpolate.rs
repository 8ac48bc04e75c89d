//! string interpolation
//!
//! Strings found in data may embed expressions of the form `%{...}`:
//!
//! | expression            | result                                                      |
//! |-----------------------|-------------------------------------------------------------|
//! | `%{var}`, `%{::var}`  | scope variable, `%{var.field[0]}` digs into it              |
//! | `%{scope('var')}`     | scope variable                                              |
//! | `%{lookup('key')}`    | value of another key (`hiera` is an alias)                  |
//! | `%{alias('key')}`     | value of another key with its type kept, must be the entire string |
//! | `%{literal('text')}`  | `text`                                                      |
//! | `%{}`                 | empty string                                                |
//!
//! Missing variables and keys interpolate to the empty string. Key lookups go through
//! [Invocation::lookup] and therefore take part in recursion detection.
use crate::error::LookupError;
use crate::invocation::Invocation;
use crate::key::Key;
use crate::lookup::LookupOptions;
use crate::value::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Lookup,
    Alias,
    Literal,
    Scope,
}

#[derive(Debug, PartialEq, Eq)]
enum Expression<'a> {
    Empty,
    Variable(&'a str),
    Call { method: Method, argument: &'a str },
}

pub(crate) fn interpolate(
    ic: &mut Invocation,
    value: Value,
    allow_methods: bool,
) -> Result<Value, LookupError> {
    match value {
        Value::String(text) => interpolate_string(ic, text, allow_methods),
        Value::Array(items) => items
            .into_iter()
            .map(|item| interpolate(ic, item, allow_methods))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut interpolated = Map::with_capacity(map.len());
            for (key, value) in map {
                let source = key.clone();
                let key = match interpolate_string(ic, key, allow_methods)? {
                    Value::String(key) => key,
                    Value::Sensitive(_) => {
                        return Err(LookupError::interpolation(
                            source,
                            "a sensitive value cannot be used as a key",
                        ))
                    }
                    other => other.to_string(),
                };
                let value = interpolate(ic, value, allow_methods)?;
                // the first of two keys interpolating to the same name wins
                interpolated.entry(key).or_insert(value);
            }
            Ok(Value::Object(interpolated))
        }
        Value::Sensitive(inner) => ic
            .do_redacted(|ic| interpolate(ic, *inner, allow_methods))
            .map(Value::into_sensitive),
        other => Ok(other),
    }
}

fn interpolate_string(ic: &mut Invocation, text: String, allow_methods: bool) -> Result<Value, LookupError> {
    if !text.contains("%{") {
        return Ok(Value::String(text));
    }

    let whole = text.starts_with("%{") && text.find('}') == Some(text.len() - 1);
    let mut out = String::with_capacity(text.len());
    let mut sensitive = false;
    let mut rest = text.as_str();

    while let Some(start) = rest.find("%{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(LookupError::interpolation(text.as_str(), "unterminated expression"));
        };
        let source = &after[..end];
        rest = &after[end + 1..];

        let expression = parse_expression(source)?;
        tracing::trace!(?expression, "interpolating");
        if let Expression::Call { method, .. } = expression {
            if !allow_methods {
                return Err(LookupError::interpolation(
                    source,
                    "interpolation using method syntax is not allowed in this context",
                ));
            }
            if method == Method::Alias && !whole {
                return Err(LookupError::interpolation(
                    source,
                    "'alias' can only be used when the expression is the entire string",
                ));
            }
        }

        let resolved = ic.with_interpolation(source, |ic| resolve(ic, &expression))?;
        if let Expression::Call {
            method: Method::Alias,
            ..
        } = expression
        {
            return Ok(resolved.unwrap_or(Value::Null));
        }

        match resolved {
            Some(Value::Sensitive(inner)) => {
                sensitive = true;
                out.push_str(&inner.to_string());
            }
            Some(value) => out.push_str(&value.to_string()),
            None => {}
        }
    }
    out.push_str(rest);

    let out = Value::String(out);
    Ok(if sensitive { out.into_sensitive() } else { out })
}

fn parse_expression(source: &str) -> Result<Expression<'_>, LookupError> {
    let expression = source.trim();
    if expression.is_empty() {
        return Ok(Expression::Empty);
    }

    let Some(open) = expression.find('(') else {
        return Ok(Expression::Variable(expression));
    };
    let Some(arguments) = expression[open + 1..].strip_suffix(')') else {
        return Err(LookupError::interpolation(source, "unterminated method call"));
    };

    let method = match expression[..open].trim() {
        "lookup" | "hiera" => Method::Lookup,
        "alias" => Method::Alias,
        "literal" => Method::Literal,
        "scope" => Method::Scope,
        other => {
            return Err(LookupError::interpolation(
                source,
                format!("unknown interpolation method '{other}'"),
            ))
        }
    };

    let arguments = arguments.trim();
    let argument = ['\'', '"']
        .iter()
        .find_map(|quote| arguments.strip_prefix(*quote)?.strip_suffix(*quote))
        .filter(|_| arguments.len() >= 2)
        .ok_or_else(|| LookupError::interpolation(source, "expected a single quoted argument"))?;

    Ok(Expression::Call { method, argument })
}

fn resolve(ic: &mut Invocation, expression: &Expression<'_>) -> Result<Option<Value>, LookupError> {
    match *expression {
        Expression::Empty => Ok(None),
        Expression::Variable(name)
        | Expression::Call {
            method: Method::Scope,
            argument: name,
        } => variable(ic, name),
        Expression::Call {
            method: Method::Literal,
            argument,
        } => Ok(Some(Value::from(argument))),
        Expression::Call {
            method: Method::Lookup | Method::Alias,
            argument,
        } => {
            let key = Key::parse(argument)?;
            ic.with_sub_lookup(&key, |ic| ic.lookup(&key, &LookupOptions::default()))
        }
    }
}

fn variable(ic: &mut Invocation, name: &str) -> Result<Option<Value>, LookupError> {
    let name = name.strip_prefix("::").unwrap_or(name);
    let key = Key::parse(name)?;
    let Some(value) = ic.scope().get(key.root()).cloned() else {
        return Ok(None);
    };
    Ok(key.dig(ic, value))
}
