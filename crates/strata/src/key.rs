//! lookup keys
//!
//! A [Key] is the parsed form of a lookup request such as `users.alice.groups[0]`. The first
//! segment (the *root*) names the key that is searched for in the hierarchy. The remaining
//! segments are used to dig into the found value.
//!
//! Syntax:
//! - segments are separated by `.`
//! - `[n]` indexes into an array
//! - a segment consisting only of digits (after the root) is an index as well
//! - a segment may be quoted with `'` or `"` to include `.` or `[` in a name
use crate::invocation::Invocation;
use crate::value::Value;

/// Name of the reserved root key holding per-key options
pub const LOOKUP_OPTIONS: &str = "lookup_options";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Field(name) => f.write_str(name),
            Segment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Immutable, parsed lookup key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    source: String,
    root: String,
    path: Vec<Segment>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("key '{0}' is empty or has an empty segment")]
    EmptySegment(String),
    #[error("key '{key}' has an unexpected '{found}' at position {position}")]
    UnexpectedCharacter {
        key: String,
        found: char,
        position: usize,
    },
    #[error("key '{0}' has an unterminated quote or bracket")]
    Unterminated(String),
    #[error("key '{key}' has an invalid index '{index}'")]
    InvalidIndex { key: String, index: String },
}

impl Key {
    pub fn parse(source: &str) -> Result<Self, KeyError> {
        let empty = || KeyError::EmptySegment(source.to_string());
        let unexpected = |position: usize, found: char| KeyError::UnexpectedCharacter {
            key: source.to_string(),
            found,
            position,
        };

        let mut segments: Vec<Segment> = Vec::new();
        let mut chars = source.char_indices().peekable();
        // at the start of the key or right after a '.'
        let mut expect_segment = true;

        while let Some((position, c)) = chars.next() {
            match c {
                '.' => {
                    if expect_segment {
                        return Err(empty());
                    }
                    expect_segment = true;
                }
                '[' => {
                    if expect_segment {
                        return Err(unexpected(position, c));
                    }
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some((_, ']')) => break,
                            Some((_, d)) => digits.push(d),
                            None => return Err(KeyError::Unterminated(source.to_string())),
                        }
                    }
                    let index = digits.trim().parse::<usize>().map_err(|_| KeyError::InvalidIndex {
                        key: source.to_string(),
                        index: digits.clone(),
                    })?;
                    segments.push(Segment::Index(index));
                }
                '\'' | '"' => {
                    if !expect_segment {
                        return Err(unexpected(position, c));
                    }
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, q)) if q == c => break,
                            Some((_, other)) => name.push(other),
                            None => return Err(KeyError::Unterminated(source.to_string())),
                        }
                    }
                    if name.is_empty() {
                        return Err(empty());
                    }
                    segments.push(Segment::Field(name));
                    expect_segment = false;
                }
                _ => {
                    if !expect_segment {
                        return Err(unexpected(position, c));
                    }
                    let mut name = String::from(c);
                    while let Some(&(_, next)) = chars.peek() {
                        if next == '.' || next == '[' {
                            break;
                        }
                        name.push(next);
                        chars.next();
                    }
                    let is_index = !segments.is_empty() && name.bytes().all(|b| b.is_ascii_digit());
                    match name.parse::<usize>() {
                        Ok(index) if is_index => segments.push(Segment::Index(index)),
                        _ => segments.push(Segment::Field(name)),
                    }
                    expect_segment = false;
                }
            }
        }

        if expect_segment {
            return Err(empty());
        }

        let mut segments = segments.into_iter();
        let Some(Segment::Field(root)) = segments.next() else {
            return Err(empty());
        };

        Ok(Self {
            source: source.to_string(),
            root,
            path: segments.collect(),
        })
    }

    /// A key without path segments, no parsing involved
    pub(crate) fn from_root(root: &str) -> Self {
        Self {
            source: root.to_string(),
            root: root.to_string(),
            path: Vec::new(),
        }
    }

    /// The name searched for in the hierarchy
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Segments used to dig into the found value
    pub fn path(&self) -> &[Segment] {
        &self.path
    }

    /// The string this key was parsed from
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_lookup_options(&self) -> bool {
        self.root == LOOKUP_OPTIONS
    }

    /// Walk the path segments of this key into `value`
    ///
    /// Indexing into a non-container, a missing field or an out-of-range index yields `None`.
    pub fn dig(&self, invocation: &mut Invocation, value: Value) -> Option<Value> {
        dig_path(invocation, value, &self.path)
    }
}

fn dig_path(invocation: &mut Invocation, value: Value, path: &[Segment]) -> Option<Value> {
    let Some((segment, rest)) = path.split_first() else {
        return Some(value);
    };

    if let Value::Sensitive(inner) = value {
        return dig_path(invocation, *inner, path).map(Value::into_sensitive);
    }

    invocation.with_segment(segment, |invocation| {
        let next = match (segment, value) {
            (Segment::Field(name), Value::Object(mut map)) => map.swap_remove(name),
            (Segment::Index(index), Value::Array(mut array)) if *index < array.len() => {
                Some(array.swap_remove(*index))
            }
            _ => None,
        };

        match next {
            Some(next) => dig_path(invocation, next, rest),
            None => {
                invocation.report_not_found(segment);
                None
            }
        }
    })
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for Key {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Key::parse(s)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object;
    use crate::session::{Session, SessionOptions};
    use pretty_assertions::assert_eq;

    fn field(name: &str) -> Segment {
        Segment::Field(name.to_string())
    }

    #[test]
    fn parse_dotted_and_indexed() {
        let key = Key::parse("a.b[1].c").unwrap();
        assert_eq!(key.root(), "a");
        assert_eq!(key.path(), &[field("b"), Segment::Index(1), field("c")]);
        assert_eq!(key.source(), "a.b[1].c");
    }

    #[test]
    fn numeric_segments_after_root_are_indices() {
        let key = Key::parse("list.0").unwrap();
        assert_eq!(key.path(), &[Segment::Index(0)]);

        let key = Key::parse("42").unwrap();
        assert_eq!(key.root(), "42");
    }

    #[test]
    fn quoted_segments() {
        let key = Key::parse(r#"'a.b'."c[d]""#).unwrap();
        assert_eq!(key.root(), "a.b");
        assert_eq!(key.path(), &[field("c[d]")]);
    }

    #[test]
    fn lookup_options_is_syntactically_legal() {
        assert!(Key::parse("lookup_options").unwrap().is_lookup_options());
    }

    #[test]
    fn invalid_keys() {
        assert!(matches!(Key::parse(""), Err(KeyError::EmptySegment(_))));
        assert!(matches!(Key::parse("a..b"), Err(KeyError::EmptySegment(_))));
        assert!(matches!(Key::parse("a."), Err(KeyError::EmptySegment(_))));
        assert!(matches!(Key::parse("[1]"), Err(KeyError::UnexpectedCharacter { .. })));
        assert!(matches!(Key::parse("a[1"), Err(KeyError::Unterminated(_))));
        assert!(matches!(Key::parse("a[x]"), Err(KeyError::InvalidIndex { .. })));
        assert!(matches!(Key::parse("a.'b"), Err(KeyError::Unterminated(_))));
        assert!(matches!(Key::parse("''"), Err(KeyError::EmptySegment(_))));
    }

    #[test]
    fn dig_into_found_value() {
        let session = Session::new(SessionOptions::default()).unwrap();
        let mut invocation = session.invocation(None, None);

        let found = object! { "b" => vec![10, 20, 30] };
        let key = Key::parse("a.b[1]").unwrap();
        assert_eq!(key.dig(&mut invocation, found.clone()), Some(Value::Integer(20)));

        let missing = Key::parse("a.c").unwrap();
        assert_eq!(missing.dig(&mut invocation, found.clone()), None);

        let out_of_range = Key::parse("a.b[3]").unwrap();
        assert_eq!(out_of_range.dig(&mut invocation, found.clone()), None);

        let into_scalar = Key::parse("a.b[0].x").unwrap();
        assert_eq!(into_scalar.dig(&mut invocation, found), None);
    }

    #[test]
    fn dig_keeps_sensitive_marker() {
        let session = Session::new(SessionOptions::default()).unwrap();
        let mut invocation = session.invocation(None, None);

        let found = object! { "password" => "secret" }.into_sensitive();
        let key = Key::parse("db.password").unwrap();
        assert_eq!(
            key.dig(&mut invocation, found),
            Some(Value::from("secret").into_sensitive())
        );
    }
}
