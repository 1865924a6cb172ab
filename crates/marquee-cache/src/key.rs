//! Composite query keys and prefix matching.
//!
//! # Purpose
//! A [`QueryKey`] names one cached result set, e.g. `["users", {page: 1}]`.
//! Keys are ordered lists of [`KeySegment`]s. Two keys are equal when every
//! segment is deeply equal; a key matches a shorter filter key when its
//! leading segments equal the filter's segments.
//!
//! # Normalization
//! Map segments are stored in a `BTreeMap`, so `{page, search}` and
//! `{search, page}` are the same segment and hash identically. Floats are not
//! representable: they have no total equality and would make key identity
//! depend on rounding.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One segment of a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySegment {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<KeySegment>),
    Map(BTreeMap<String, KeySegment>),
}

impl KeySegment {
    /// Build a map segment from `(name, value)` pairs.
    ///
    /// ```
    /// use marquee_cache::KeySegment;
    ///
    /// let a = KeySegment::map([("page", KeySegment::Int(1)), ("search", "x".into())]);
    /// let b = KeySegment::map([("search", "x".into()), ("page", KeySegment::Int(1))]);
    /// assert_eq!(a, b);
    /// ```
    pub fn map<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, KeySegment)>,
        K: Into<String>,
    {
        KeySegment::Map(
            fields
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }
}

impl From<&str> for KeySegment {
    fn from(value: &str) -> Self {
        KeySegment::Str(value.to_string())
    }
}

impl From<String> for KeySegment {
    fn from(value: String) -> Self {
        KeySegment::Str(value)
    }
}

impl From<&String> for KeySegment {
    fn from(value: &String) -> Self {
        KeySegment::Str(value.clone())
    }
}

impl From<i64> for KeySegment {
    fn from(value: i64) -> Self {
        KeySegment::Int(value)
    }
}

impl From<i32> for KeySegment {
    fn from(value: i32) -> Self {
        KeySegment::Int(value.into())
    }
}

impl From<u32> for KeySegment {
    fn from(value: u32) -> Self {
        KeySegment::Int(value.into())
    }
}

impl From<bool> for KeySegment {
    fn from(value: bool) -> Self {
        KeySegment::Bool(value)
    }
}

impl<T: Into<KeySegment>> From<Option<T>> for KeySegment {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(KeySegment::Null)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("floating point value {0} cannot be used in a query key")]
    Float(String),
    #[error("integer {0} does not fit in a query key segment")]
    IntegerOverflow(String),
}

impl TryFrom<serde_json::Value> for KeySegment {
    type Error = KeyError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;
        Ok(match value {
            Value::Null => KeySegment::Null,
            Value::Bool(value) => KeySegment::Bool(value),
            Value::Number(number) => match number.as_i64() {
                Some(value) => KeySegment::Int(value),
                None if number.is_f64() => return Err(KeyError::Float(number.to_string())),
                None => return Err(KeyError::IntegerOverflow(number.to_string())),
            },
            Value::String(value) => KeySegment::Str(value),
            Value::Array(items) => KeySegment::List(
                items
                    .into_iter()
                    .map(KeySegment::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(fields) => KeySegment::Map(
                fields
                    .into_iter()
                    .map(|(name, value)| Ok((name, KeySegment::try_from(value)?)))
                    .collect::<Result<_, KeyError>>()?,
            ),
        })
    }
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySegment::Null => f.write_str("null"),
            KeySegment::Bool(value) => write!(f, "{value}"),
            KeySegment::Int(value) => write!(f, "{value}"),
            KeySegment::Str(value) => write!(f, "{value:?}"),
            KeySegment::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            KeySegment::Map(fields) => {
                f.write_str("{")?;
                for (idx, (name, value)) in fields.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{name:?}:{value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Ordered, composite identifier of one cached result set.
///
/// ```
/// use marquee_cache::{KeySegment, QueryKey};
///
/// let page = QueryKey::new(["newspapers"]).push(KeySegment::map([("page", KeySegment::Int(2))]));
/// assert!(page.matches(&QueryKey::new(["newspapers"])));
/// assert!(!page.matches(&QueryKey::new(["users"])));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<KeySegment>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The empty key. As a filter it matches every key.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn push(mut self, segment: impl Into<KeySegment>) -> Self {
        self.0.push(segment.into());
        self
    }

    pub fn segments(&self) -> &[KeySegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when this key starts with every segment of `filter`.
    pub fn matches(&self, filter: &QueryKey) -> bool {
        filter.0.len() <= self.0.len()
            && self
                .0
                .iter()
                .zip(filter.0.iter())
                .all(|(segment, wanted)| segment == wanted)
    }
}

impl From<Vec<KeySegment>> for QueryKey {
    fn from(segments: Vec<KeySegment>) -> Self {
        Self(segments)
    }
}

impl TryFrom<serde_json::Value> for QueryKey {
    type Error = KeyError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Array(items) => Ok(Self(
                items
                    .into_iter()
                    .map(KeySegment::try_from)
                    .collect::<Result<_, _>>()?,
            )),
            other => Ok(Self(vec![KeySegment::try_from(other)?])),
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", KeySegment::List(self.0.clone()))
    }
}
