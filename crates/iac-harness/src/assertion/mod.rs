//! Declarative assertions over output documents.
//!
//! An [`AssertionExpression`] is a path into an
//! [`OutputDocument`](crate::output::OutputDocument), a [`Check`] and a
//! human-readable description. Expressions are data: the
//! [`AssertionEngine`] evaluates them without knowing anything about the
//! module under test.

mod engine;

pub use engine::{AssertionEngine, AssertionOutcome, AssertionReport, AssertionResult};

use crate::output::OutputValue;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// One step of an [`OutputPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Map key (or, first, an output name).
    Key(String),
    /// List index.
    Index(usize),
}

/// Errors parsing an output path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path must start with an output name")]
    MissingOutputName,

    #[error("empty key at position {0}")]
    EmptyKey(usize),

    #[error("unterminated '[' at position {0}")]
    UnterminatedBracket(usize),

    #[error("invalid index '{index}' at position {position}")]
    InvalidIndex { index: String, position: usize },

    #[error("unexpected '{found}' at position {position}")]
    UnexpectedChar { found: char, position: usize },
}

/// Parsed path into an output document.
///
/// Grammar: an output name followed by `.key`, `[n]` or `["quoted key"]`
/// steps, e.g. `subnets[0].self_link` or `labels["app.kubernetes.io/name"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPath {
    segments: Vec<PathSegment>,
}

impl OutputPath {
    /// Parse a path expression.
    ///
    /// # Errors
    ///
    /// Returns a [`PathError`] describing the first malformed position.
    pub fn parse(text: &str) -> Result<Self, PathError> {
        if text.trim().is_empty() {
            return Err(PathError::Empty);
        }

        let mut segments = Vec::new();
        let mut chars = text.char_indices().peekable();
        let mut expect_key = true;

        while let Some(&(position, c)) = chars.peek() {
            match c {
                '[' => {
                    if segments.is_empty() {
                        return Err(PathError::MissingOutputName);
                    }
                    if expect_key {
                        return Err(PathError::EmptyKey(position));
                    }
                    chars.next();
                    segments.push(parse_bracket(&mut chars, position)?);
                    expect_key = false;
                }
                '.' => {
                    if expect_key {
                        return Err(PathError::EmptyKey(position));
                    }
                    chars.next();
                    expect_key = true;
                    if chars.peek().is_none() {
                        return Err(PathError::EmptyKey(position + 1));
                    }
                }
                ']' | '"' => {
                    return Err(PathError::UnexpectedChar { found: c, position });
                }
                _ => {
                    if !expect_key {
                        return Err(PathError::UnexpectedChar { found: c, position });
                    }
                    let mut key = String::new();
                    while let Some(&(_, c)) = chars.peek() {
                        if matches!(c, '.' | '[' | ']' | '"') {
                            break;
                        }
                        key.push(c);
                        chars.next();
                    }
                    segments.push(PathSegment::Key(key));
                    expect_key = false;
                }
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// The output name the path starts at.
    pub fn output_name(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSegment::Key(name)) => Some(name),
            _ => None,
        }
    }
}

fn parse_bracket(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    open: usize,
) -> Result<PathSegment, PathError> {
    if let Some(&(_, '"')) = chars.peek() {
        chars.next();
        let mut key = String::new();
        loop {
            match chars.next() {
                Some((_, '\\')) => match chars.next() {
                    Some((_, c)) => key.push(c),
                    None => return Err(PathError::UnterminatedBracket(open)),
                },
                Some((_, '"')) => break,
                Some((_, c)) => key.push(c),
                None => return Err(PathError::UnterminatedBracket(open)),
            }
        }
        return match chars.next() {
            Some((_, ']')) => Ok(PathSegment::Key(key)),
            Some((position, found)) => Err(PathError::UnexpectedChar { found, position }),
            None => Err(PathError::UnterminatedBracket(open)),
        };
    }

    let mut index = String::new();
    loop {
        match chars.next() {
            Some((_, ']')) => break,
            Some((_, c)) => index.push(c),
            None => return Err(PathError::UnterminatedBracket(open)),
        }
    }
    index
        .trim()
        .parse::<usize>()
        .map(PathSegment::Index)
        .map_err(|_| PathError::InvalidIndex {
            index,
            position: open + 1,
        })
}

impl fmt::Display for OutputPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if key.contains(['.', '[', ']', '"']) => {
                    write!(f, "[\"{}\"]", key.replace('\\', "\\\\").replace('"', "\\\""))?;
                }
                PathSegment::Key(key) if i == 0 => f.write_str(key)?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// Caller-supplied check function.
pub type CustomCheck = Arc<dyn Fn(&OutputValue) -> bool + Send + Sync>;

/// Comparison applied to a resolved value.
#[derive(Clone)]
pub enum Predicate {
    /// Not null, `""`, `[]` or `{}`.
    NotEmpty,
    Empty,
    StartsWith(String),
    EndsWith(String),
    /// Substring for strings, element equality for lists, key for maps.
    Contains(OutputValue),
    Matches(Regex),
    LengthEquals(usize),
    GreaterThan(f64),
    LessThan(f64),
    Custom { name: String, check: CustomCheck },
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl Predicate {
    /// Short description of what the predicate expects.
    pub fn describe(&self) -> String {
        match self {
            Predicate::NotEmpty => "not empty".to_string(),
            Predicate::Empty => "empty".to_string(),
            Predicate::StartsWith(prefix) => format!("starts with {prefix:?}"),
            Predicate::EndsWith(suffix) => format!("ends with {suffix:?}"),
            Predicate::Contains(item) => format!("contains {item}"),
            Predicate::Matches(re) => format!("matches /{}/", re.as_str()),
            Predicate::LengthEquals(n) => format!("length {n}"),
            Predicate::GreaterThan(n) => format!("> {n}"),
            Predicate::LessThan(n) => format!("< {n}"),
            Predicate::Custom { name, .. } => name.clone(),
        }
    }

    /// Apply the predicate. `Err` carries the mismatch reason.
    pub fn test(&self, value: &OutputValue) -> Result<(), String> {
        let holds = match self {
            Predicate::NotEmpty => !value.is_empty(),
            Predicate::Empty => value.is_empty(),
            Predicate::StartsWith(prefix) => {
                string_operand(value, self)?.starts_with(prefix.as_str())
            }
            Predicate::EndsWith(suffix) => string_operand(value, self)?.ends_with(suffix.as_str()),
            Predicate::Contains(item) => match (value, item) {
                (OutputValue::String(s), OutputValue::String(needle)) => s.contains(needle.as_str()),
                (OutputValue::List(items), _) => items.contains(item),
                (OutputValue::Map(entries), OutputValue::String(key)) => entries.contains_key(key),
                _ => return Err(type_mismatch(self, value)),
            },
            Predicate::Matches(re) => re.is_match(string_operand(value, self)?),
            Predicate::LengthEquals(n) => match value.len() {
                Some(len) => len == *n,
                None => return Err(type_mismatch(self, value)),
            },
            Predicate::GreaterThan(bound) => number_operand(value, self)? > *bound,
            Predicate::LessThan(bound) => number_operand(value, self)? < *bound,
            Predicate::Custom { check, .. } => check(value),
        };

        if holds {
            Ok(())
        } else {
            Err(format!("expected {}, got {value}", self.describe()))
        }
    }
}

fn string_operand<'a>(value: &'a OutputValue, predicate: &Predicate) -> Result<&'a str, String> {
    value.as_str().ok_or_else(|| type_mismatch(predicate, value))
}

fn number_operand(value: &OutputValue, predicate: &Predicate) -> Result<f64, String> {
    value.as_f64().ok_or_else(|| type_mismatch(predicate, value))
}

fn type_mismatch(predicate: &Predicate, value: &OutputValue) -> String {
    format!(
        "cannot check '{}' against a {} value",
        predicate.describe(),
        value.type_name()
    )
}

/// What an expression requires of the value at its path.
#[derive(Debug, Clone)]
pub enum Check {
    Equals(OutputValue),
    Predicate(Predicate),
    /// The path resolves.
    Exists,
    /// The path does not resolve.
    Absent,
}

impl Check {
    /// Description of the expected value, for reports.
    pub fn expected(&self) -> String {
        match self {
            Check::Equals(value) => format!("== {value}"),
            Check::Predicate(predicate) => predicate.describe(),
            Check::Exists => "exists".to_string(),
            Check::Absent => "absent".to_string(),
        }
    }
}

/// A declarative check against an output document.
#[derive(Debug, Clone)]
pub struct AssertionExpression {
    pub path: String,
    pub check: Check,
    pub description: String,
}

impl AssertionExpression {
    pub fn new(path: impl Into<String>, check: Check, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            check,
            description: description.into(),
        }
    }

    /// Value at `path` equals `expected`.
    pub fn equals(
        path: impl Into<String>,
        expected: impl Into<OutputValue>,
        description: impl Into<String>,
    ) -> Self {
        Self::new(path, Check::Equals(expected.into()), description)
    }

    /// Value at `path` is present and not empty.
    pub fn not_empty(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self::predicate(path, Predicate::NotEmpty, description)
    }

    pub fn exists(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(path, Check::Exists, description)
    }

    pub fn absent(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(path, Check::Absent, description)
    }

    pub fn predicate(
        path: impl Into<String>,
        predicate: Predicate,
        description: impl Into<String>,
    ) -> Self {
        Self::new(path, Check::Predicate(predicate), description)
    }

    /// Value at `path` is a string matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns the regex error if `pattern` does not compile.
    pub fn matches(
        path: impl Into<String>,
        pattern: &str,
        description: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self::predicate(
            path,
            Predicate::Matches(Regex::new(pattern)?),
            description,
        ))
    }

    /// Value at `path` satisfies a caller-supplied function.
    pub fn custom<F>(
        path: impl Into<String>,
        name: impl Into<String>,
        check: F,
        description: impl Into<String>,
    ) -> Self
    where
        F: Fn(&OutputValue) -> bool + Send + Sync + 'static,
    {
        Self::predicate(
            path,
            Predicate::Custom {
                name: name.into(),
                check: Arc::new(check),
            },
            description,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_parse_simple_and_nested_paths() {
        let path = OutputPath::parse("vpc_id").unwrap();
        assert_eq!(path.segments(), &[PathSegment::Key("vpc_id".into())]);

        let path = OutputPath::parse("subnets[0].self_link").unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("subnets".into()),
                PathSegment::Index(0),
                PathSegment::Key("self_link".into()),
            ]
        );
        assert_eq!(path.output_name(), Some("subnets"));
    }

    #[test]
    fn test_parse_quoted_keys() {
        let path = OutputPath::parse(r#"labels["app.kubernetes.io/name"]"#).unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("labels".into()),
                PathSegment::Key("app.kubernetes.io/name".into()),
            ]
        );
        assert_eq!(path.to_string(), r#"labels["app.kubernetes.io/name"]"#);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(OutputPath::parse(""), Err(PathError::Empty));
        assert_eq!(OutputPath::parse("[0]"), Err(PathError::MissingOutputName));
        assert_eq!(OutputPath::parse("a..b"), Err(PathError::EmptyKey(2)));
        assert_eq!(OutputPath::parse("a."), Err(PathError::EmptyKey(2)));
        assert_eq!(OutputPath::parse("a[0"), Err(PathError::UnterminatedBracket(1)));
        assert!(matches!(
            OutputPath::parse("a[x]"),
            Err(PathError::InvalidIndex { .. })
        ));
        assert!(matches!(
            OutputPath::parse("a[0]b"),
            Err(PathError::UnexpectedChar { found: 'b', .. })
        ));
    }

    #[test]
    fn test_path_display_round_trips() {
        for text in ["vpc_id", "subnets[0].self_link", "a.b[2][3].c"] {
            assert_eq!(OutputPath::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_string_predicates() {
        let value = OutputValue::from("projects/p/global/networks/vpc-1");
        assert!(Predicate::StartsWith("projects/".into()).test(&value).is_ok());
        assert!(Predicate::EndsWith("vpc-1".into()).test(&value).is_ok());
        assert!(Predicate::Contains("global".into()).test(&value).is_ok());
        assert!(Predicate::Matches(Regex::new(r"vpc-\d+$").unwrap())
            .test(&value)
            .is_ok());

        let err = Predicate::StartsWith("zones/".into()).test(&value).unwrap_err();
        assert!(err.contains("starts with"));
    }

    #[test]
    fn test_collection_predicates() {
        let list = OutputValue::from(vec!["a", "b"]);
        assert!(Predicate::LengthEquals(2).test(&list).is_ok());
        assert!(Predicate::Contains("b".into()).test(&list).is_ok());
        assert!(Predicate::Contains("z".into()).test(&list).is_err());

        let mut entries = BTreeMap::new();
        entries.insert("env".to_string(), OutputValue::from("test"));
        let map = OutputValue::Map(entries);
        assert!(Predicate::Contains("env".into()).test(&map).is_ok());
        assert!(Predicate::NotEmpty.test(&map).is_ok());
        assert!(Predicate::Empty.test(&OutputValue::List(vec![])).is_ok());
    }

    #[test]
    fn test_numeric_predicates_and_type_mismatch() {
        let count = OutputValue::from(3);
        assert!(Predicate::GreaterThan(2.0).test(&count).is_ok());
        assert!(Predicate::LessThan(3.0).test(&count).is_err());

        let err = Predicate::GreaterThan(1.0)
            .test(&OutputValue::from("3"))
            .unwrap_err();
        assert!(err.contains("string value"));
        assert!(Predicate::LengthEquals(1).test(&count).is_err());
    }

    #[test]
    fn test_custom_predicate() {
        let expr = AssertionExpression::custom(
            "port",
            "is a privileged port",
            |v| v.as_f64().is_some_and(|n| n < 1024.0),
            "port is privileged",
        );
        let Check::Predicate(predicate) = &expr.check else {
            unreachable!("custom builds a predicate");
        };
        assert!(predicate.test(&OutputValue::from(443)).is_ok());
        assert!(predicate.test(&OutputValue::from(8080)).is_err());
        assert_eq!(expr.check.expected(), "is a privileged port");
    }

    #[test]
    fn test_matches_constructor_rejects_bad_regex() {
        assert!(AssertionExpression::matches("x", "(", "bad").is_err());
        assert!(AssertionExpression::matches("x", "^vpc-", "ok").is_ok());
    }
}
