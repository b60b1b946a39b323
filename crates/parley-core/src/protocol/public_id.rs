//! Namespaced component identifiers (`author/name:version`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ParleyError, Result};

/// Identifier of a protocol or other namespaced component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicId {
    author: String,
    name: String,
    version: String,
}

impl PublicId {
    pub fn new(author: &str, name: &str, version: &str) -> Result<Self> {
        if !is_simple_name(author) {
            return Err(ParleyError::Malformed(format!("invalid author: {author:?}")));
        }
        if !is_simple_name(name) {
            return Err(ParleyError::Malformed(format!("invalid name: {name:?}")));
        }
        if version.is_empty() || version.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(ParleyError::Malformed(format!("invalid version: {version:?}")));
        }
        Ok(Self {
            author: author.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    /// For compile-time constants known to be well formed.
    pub(crate) fn from_static(author: &'static str, name: &'static str, version: &'static str) -> Self {
        Self {
            author: author.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// True if `s` is a well-formed `author/name:version` string.
    pub fn is_public_id(s: &str) -> bool {
        s.parse::<PublicId>().is_ok()
    }
}

fn is_simple_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl FromStr for PublicId {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self> {
        let (author, rest) = s
            .split_once('/')
            .ok_or_else(|| ParleyError::Malformed(format!("public id missing '/': {s:?}")))?;
        let (name, version) = rest
            .split_once(':')
            .ok_or_else(|| ParleyError::Malformed(format!("public id missing ':': {s:?}")))?;
        PublicId::new(author, name, version)
    }
}

impl fmt::Display for PublicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.author, self.name, self.version)
    }
}

impl Serialize for PublicId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Protocol identifiers are public ids.
pub type ProtocolId = PublicId;
