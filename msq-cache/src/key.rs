//! Structured query keys and the matchers used to invalidate them.
//!
//! A key is an ordered list of segments, e.g. `["purchases", "list",
//! {"status": "pending"}]`. Filter objects are stored as canonical JSON so
//! two keys built from equal filters hash identically.

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeySegment {
    Str(String),
    Int(i64),
    /// Canonical JSON text of a filter object or array.
    Json(String),
}

impl KeySegment {
    pub fn to_json(&self) -> Value {
        match self {
            KeySegment::Str(s) => Value::String(s.clone()),
            KeySegment::Int(i) => Value::from(*i),
            KeySegment::Json(raw) => serde_json::from_str(raw).unwrap_or(Value::Null),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeySegment::Str(s) => Some(s),
            _ => None,
        }
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
        KeySegment::Int(i64::from(value))
    }
}

impl From<u32> for KeySegment {
    fn from(value: u32) -> Self {
        KeySegment::Int(i64::from(value))
    }
}

impl From<Value> for KeySegment {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => KeySegment::Str(s),
            Value::Number(n) if n.is_i64() => KeySegment::Int(n.as_i64().unwrap_or_default()),
            // serde_json's default Map is ordered, so this is canonical
            other => KeySegment::Json(other.to_string()),
        }
    }
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySegment::Str(s) => write!(f, "{:?}", s),
            KeySegment::Int(i) => write!(f, "{}", i),
            KeySegment::Json(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_segments(segments: Vec<KeySegment>) -> Self {
        Self(segments)
    }

    /// Builder-style append.
    pub fn with(mut self, segment: impl Into<KeySegment>) -> Self {
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

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn contains(&self, segment: &KeySegment) -> bool {
        self.0.contains(segment)
    }

    /// True if `sequence` appears as consecutive segments anywhere in the key.
    pub fn contains_sequence(&self, sequence: &[KeySegment]) -> bool {
        if sequence.is_empty() {
            return true;
        }
        self.0.windows(sequence.len()).any(|window| window == sequence)
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.0.iter().map(KeySegment::to_json).collect())
    }

    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(Self(items.into_iter().map(KeySegment::from).collect())),
            _ => None,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", segment)?;
        }
        f.write_str("]")
    }
}

/// Build a [`QueryKey`] from heterogeneous segments.
///
/// ```ignore
/// let key = query_key!["boq", 42];
/// ```
#[macro_export]
macro_rules! query_key {
    ($($segment:expr),* $(,)?) => {
        $crate::QueryKey::from_segments(vec![$($crate::KeySegment::from($segment)),*])
    };
}

/// Selects which cache entries an invalidation touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMatcher {
    Exact(QueryKey),
    Prefix(QueryKey),
    Contains(KeySegment),
    Sequence(Vec<KeySegment>),
    All,
}

impl KeyMatcher {
    pub fn exact(key: QueryKey) -> Self {
        Self::Exact(key)
    }

    pub fn prefix(key: QueryKey) -> Self {
        Self::Prefix(key)
    }

    pub fn contains(segment: impl Into<KeySegment>) -> Self {
        Self::Contains(segment.into())
    }

    pub fn sequence<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<KeySegment>,
    {
        Self::Sequence(segments.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            KeyMatcher::Exact(exact) => key == exact,
            KeyMatcher::Prefix(prefix) => key.starts_with(prefix),
            KeyMatcher::Contains(segment) => key.contains(segment),
            KeyMatcher::Sequence(sequence) => key.contains_sequence(sequence),
            KeyMatcher::All => true,
        }
    }
}

impl fmt::Display for KeyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMatcher::Exact(key) => write!(f, "exact {}", key),
            KeyMatcher::Prefix(key) => write!(f, "prefix {}", key),
            KeyMatcher::Contains(segment) => write!(f, "contains {}", segment),
            KeyMatcher::Sequence(sequence) => {
                write!(f, "sequence {}", QueryKey::from_segments(sequence.clone()))
            }
            KeyMatcher::All => f.write_str("all"),
        }
    }
}
