//! Canonical key paths.
//!
//! A key path arrives either as a dotted string (`"user.name"`) or as an
//! ordered list of segments (`["user", "name"]`, numeric segments allowed).
//! Both are normalized once into a [`KeyPath`], an immutable sequence of
//! string segments; nothing below the public boundary re-splits strings.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Ordered sequence of string segments addressing a location in the tree.
///
/// Equality and hashing are structural over the segments, so `["a.b"]` and
/// `["a", "b"]` are different paths.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawKeyPath", into = "Vec<String>")]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    /// The empty path, addressing the head slot itself.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self(segments.into_iter().map(|s| s.to_string()).collect())
    }

    /// Parse a dotted path. The empty string is the empty path.
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::root();
        }
        Self(dotted.split('.').map(str::to_owned).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Path of the enclosing component, or `None` for the empty path.
    pub fn parent(&self) -> Option<KeyPath> {
        self.0
            .split_last()
            .map(|(_, parent)| KeyPath(parent.to_vec()))
    }

    pub fn child(&self, segment: impl Into<String>) -> KeyPath {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        KeyPath(segments)
    }

    pub fn starts_with(&self, prefix: &KeyPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn into_segments(self) -> Vec<String> {
        self.0
    }

    /// Read a key path out of a decoded message field: a dotted string or an
    /// array of strings and numbers.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(dotted) => Ok(KeyPath::parse(dotted)),
            Value::Array(segments) => segments
                .iter()
                .map(|segment| match segment {
                    Value::String(text) => Ok(text.clone()),
                    Value::Number(number) => Ok(number.to_string()),
                    other => Err(Error::InvalidKeyPath(format!(
                        "segment {other} is neither a string nor a number"
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(KeyPath),
            other => Err(Error::InvalidKeyPath(format!(
                "expected a string or an array, got {other}"
            ))),
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl Borrow<[String]> for KeyPath {
    fn borrow(&self) -> &[String] {
        &self.0
    }
}

impl AsRef<[String]> for KeyPath {
    fn as_ref(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for KeyPath {
    fn from(dotted: &str) -> Self {
        KeyPath::parse(dotted)
    }
}

impl From<String> for KeyPath {
    fn from(dotted: String) -> Self {
        KeyPath::parse(&dotted)
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(segments: Vec<String>) -> Self {
        KeyPath(segments)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(segments: Vec<&str>) -> Self {
        KeyPath::from_segments(segments)
    }
}

impl From<&[&str]> for KeyPath {
    fn from(segments: &[&str]) -> Self {
        KeyPath::from_segments(segments)
    }
}

impl<const N: usize> From<[&str; N]> for KeyPath {
    fn from(segments: [&str; N]) -> Self {
        KeyPath::from_segments(segments)
    }
}

impl From<&KeyPath> for KeyPath {
    fn from(path: &KeyPath) -> Self {
        path.clone()
    }
}

impl From<KeyPath> for Vec<String> {
    fn from(path: KeyPath) -> Self {
        path.0
    }
}

/// Wire forms accepted when deserializing a key path.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawKeyPath {
    Dotted(String),
    Segments(Vec<RawSegment>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSegment {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawKeyPath> for KeyPath {
    fn from(raw: RawKeyPath) -> Self {
        match raw {
            RawKeyPath::Dotted(dotted) => KeyPath::parse(&dotted),
            RawKeyPath::Segments(segments) => KeyPath(
                segments
                    .into_iter()
                    .map(|segment| match segment {
                        RawSegment::Text(text) => text,
                        RawSegment::Number(number) => number.to_string(),
                    })
                    .collect(),
            ),
        }
    }
}
