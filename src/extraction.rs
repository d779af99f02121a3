//! Path-based field extraction from nested source records.
//!
//! Mapping tables address source fields with a small path language that is
//! parsed once into a [`FieldPath`] and then evaluated against any number of
//! raw records. Evaluation never fails: a structural mismatch anywhere along
//! the path simply yields `None`, so one mapping table can be shared by
//! sources with very different shapes.

use serde_json::Value as JsonValue;
use std::fmt;

use crate::entity::FieldValue;

/// Represents a parsed path to a field in a nested record
///
/// # Examples
///
/// - `First_Name` - top-level key
/// - `Owner.name` - nested key
/// - `emails[0].email` - fixed array index
/// - `phone_numbers[*].number` - every element of an array
/// - `location.split(', ')[1]` - second comma-separated token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    /// The raw path string
    pub raw: String,
    /// Parsed path segments
    pub segments: Vec<PathSegment>,
}

/// A segment in a field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// A named key in a map
    Key(String),
    /// A fixed array index (e.g. `[0]`)
    Index(usize),
    /// Projection over every array element (`[*]`)
    Wildcard,
    /// `split('<delimiter>')[index]` applied to a string value
    SplitIndex { delimiter: String, index: usize },
}

/// Error raised when a path expression in a mapping table cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParseError {
    pub path: String,
    pub reason: String,
}

impl fmt::Display for PathParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid field path '{}': {}", self.path, self.reason)
    }
}

impl std::error::Error for PathParseError {}

impl FieldPath {
    /// Parse a path expression
    ///
    /// # Example
    ///
    /// ```
    /// use crm_unify::extraction::{FieldPath, PathSegment};
    ///
    /// let path = FieldPath::parse("emails[*].email").unwrap();
    /// assert_eq!(path.segments.len(), 3);
    /// assert_eq!(path.segments[1], PathSegment::Wildcard);
    /// ```
    pub fn parse(path: &str) -> Result<Self, PathParseError> {
        let raw = path.trim();
        let body = raw.strip_prefix("$.").unwrap_or(raw);
        let segments = PathParser::new(raw, body).parse()?;

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Parse a path after removing a table prefix such as `Contacts.`
    pub fn parse_with_prefix(path: &str, prefix: Option<&str>) -> Result<Self, PathParseError> {
        let trimmed = path.trim();
        match prefix {
            Some(prefix) if !prefix.is_empty() => {
                Self::parse(trimmed.strip_prefix(prefix).unwrap_or(trimmed))
            }
            _ => Self::parse(trimmed),
        }
    }

    /// Evaluate this path against a record.
    ///
    /// Returns `None` when any segment is missing or of the wrong shape, and
    /// when the final value is null, a blank string or an empty array.
    pub fn resolve(&self, record: &JsonValue) -> Option<JsonValue> {
        resolve_segments(record, &self.segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn is_empty_json(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn resolve_segments(value: &JsonValue, segments: &[PathSegment]) -> Option<JsonValue> {
    let Some((head, rest)) = segments.split_first() else {
        return if is_empty_json(value) {
            None
        } else {
            Some(value.clone())
        };
    };

    match head {
        PathSegment::Key(key) => value
            .as_object()?
            .get(key)
            .and_then(|next| resolve_segments(next, rest)),
        PathSegment::Index(index) => value
            .as_array()?
            .get(*index)
            .and_then(|next| resolve_segments(next, rest)),
        PathSegment::Wildcard => {
            let collected: Vec<JsonValue> = value
                .as_array()?
                .iter()
                .filter_map(|item| resolve_segments(item, rest))
                .collect();
            if collected.is_empty() {
                None
            } else {
                Some(JsonValue::Array(collected))
            }
        }
        PathSegment::SplitIndex { delimiter, index } => {
            let text = match value {
                JsonValue::String(s) => s.clone(),
                JsonValue::Number(n) => n.to_string(),
                _ => return None,
            };
            let token = text.split(delimiter.as_str()).nth(*index)?;
            resolve_segments(&JsonValue::String(token.to_string()), rest)
        }
    }
}

/// Hand-rolled scanner for the path grammar. Split delimiters may contain
/// dots, so the input cannot simply be split on `.`.
struct PathParser<'a> {
    raw: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> PathParser<'a> {
    fn new(raw: &'a str, body: &str) -> Self {
        Self {
            raw,
            chars: body.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> PathParseError {
        PathParseError {
            path: self.raw.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expect(&mut self, expected: char) -> Result<(), PathParseError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(self.error(format!(
                "expected '{}' at position {}, found '{}'",
                expected, self.pos, c
            ))),
            None => Err(self.error(format!("expected '{}' at end of path", expected))),
        }
    }

    fn parse(mut self) -> Result<Vec<PathSegment>, PathParseError> {
        if self.chars.is_empty() {
            return Err(self.error("path is empty"));
        }

        let mut segments = Vec::new();
        let mut key = String::new();
        // A key must follow the start of the path and every dot
        let mut expect_key = true;

        while let Some(c) = self.peek() {
            match c {
                '.' => {
                    if !key.is_empty() {
                        segments.push(PathSegment::Key(std::mem::take(&mut key)));
                    } else if expect_key {
                        return Err(self.error(format!("empty segment at position {}", self.pos)));
                    }
                    self.pos += 1;
                    expect_key = true;
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(PathSegment::Key(std::mem::take(&mut key)));
                    } else if expect_key && !segments.is_empty() {
                        return Err(self.error(format!("empty segment at position {}", self.pos)));
                    }
                    segments.push(self.parse_bracket()?);
                    expect_key = false;
                }
                '(' => {
                    if key != "split" {
                        return Err(self.error(format!("unknown operator '{}'", key)));
                    }
                    key.clear();
                    segments.push(self.parse_split()?);
                    expect_key = false;
                }
                _ => {
                    key.push(c);
                    self.pos += 1;
                    expect_key = false;
                }
            }
        }

        if !key.is_empty() {
            segments.push(PathSegment::Key(key));
        } else if expect_key {
            return Err(self.error("path ends with '.'"));
        }

        Ok(segments)
    }

    fn parse_bracket(&mut self) -> Result<PathSegment, PathParseError> {
        self.expect('[')?;
        let mut inner = String::new();
        loop {
            match self.peek() {
                Some(']') => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    inner.push(c);
                    self.pos += 1;
                }
                None => return Err(self.error("unterminated '['")),
            }
        }

        let inner = inner.trim();
        if inner == "*" {
            return Ok(PathSegment::Wildcard);
        }
        inner
            .parse::<usize>()
            .map(PathSegment::Index)
            .map_err(|_| self.error(format!("invalid index '{}'", inner)))
    }

    fn parse_split(&mut self) -> Result<PathSegment, PathParseError> {
        self.expect('(')?;
        let quote = match self.peek() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("split delimiter must be quoted")),
        };
        self.pos += 1;

        let mut delimiter = String::new();
        loop {
            match self.peek() {
                Some(c) if c == quote => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    delimiter.push(c);
                    self.pos += 1;
                }
                None => return Err(self.error("unterminated split delimiter")),
            }
        }
        if delimiter.is_empty() {
            return Err(self.error("split delimiter is empty"));
        }
        self.expect(')')?;

        match self.parse_bracket()? {
            PathSegment::Index(index) => Ok(PathSegment::SplitIndex { delimiter, index }),
            _ => Err(self.error("split requires a numeric index")),
        }
    }
}

/// Trait for types that can extract values by field path
///
/// Implemented for `serde_json::Value`, which is how every raw CRM export
/// is held in memory.
pub trait Extractor {
    /// Extract a value at the given field path
    ///
    /// Returns `Some(value)` if the path resolves to a non-empty value
    fn extract(&self, path: &FieldPath) -> Option<FieldValue>;

    /// Extract a value rendered as text (lists collapse to their first item)
    fn extract_text(&self, path: &FieldPath) -> Option<String> {
        self.extract(path).and_then(|v| v.into_scalar().to_text())
    }

    /// Extract a value and parse it to a specific type
    fn extract_as<T>(&self, path: &FieldPath) -> Option<T>
    where
        T: std::str::FromStr,
    {
        self.extract_text(path).and_then(|s| s.parse().ok())
    }
}

impl Extractor for JsonValue {
    fn extract(&self, path: &FieldPath) -> Option<FieldValue> {
        path.resolve(self).map(FieldValue::from)
    }
}
