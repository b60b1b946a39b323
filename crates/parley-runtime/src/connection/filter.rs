//! Per-connection protocol restrictions.
//!
//! Entries are full public ids (`author/name:version`) or wildcards
//! (`author/*`, `author/name:*`).

use parley_core::error::{ParleyError, Result};
use parley_core::protocol::{ProtocolId, PublicId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolRule {
    Exact(ProtocolId),
    /// `author/name:*`
    AnyVersion { author: String, name: String },
    /// `author/*`
    AnyName { author: String },
}

impl ProtocolRule {
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some(author) = raw.strip_suffix("/*") {
            // validate the author half through a dummy id
            PublicId::new(author, "x", "0")
                .map_err(|_| ParleyError::Config(format!("invalid protocol rule: {raw}")))?;
            return Ok(ProtocolRule::AnyName {
                author: author.to_string(),
            });
        }
        if let Some(prefix) = raw.strip_suffix(":*") {
            let id: PublicId = format!("{prefix}:0")
                .parse()
                .map_err(|_| ParleyError::Config(format!("invalid protocol rule: {raw}")))?;
            return Ok(ProtocolRule::AnyVersion {
                author: id.author().to_string(),
                name: id.name().to_string(),
            });
        }
        raw.parse()
            .map(ProtocolRule::Exact)
            .map_err(|_| ParleyError::Config(format!("invalid protocol rule: {raw}")))
    }

    pub fn matches(&self, id: &ProtocolId) -> bool {
        match self {
            ProtocolRule::Exact(p) => p == id,
            ProtocolRule::AnyVersion { author, name } => id.author() == author && id.name() == name,
            ProtocolRule::AnyName { author } => id.author() == author,
        }
    }
}

/// Restricted-to and excluded protocol sets. An empty restriction list
/// allows everything not excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolFilter {
    restricted_to: Vec<ProtocolRule>,
    excluded: Vec<ProtocolRule>,
}

impl ProtocolFilter {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn compile(restricted_to: &[String], excluded: &[String]) -> Result<Self> {
        Ok(Self {
            restricted_to: compile_rules(restricted_to)?,
            excluded: compile_rules(excluded)?,
        })
    }

    pub fn is_allowed(&self, id: &ProtocolId) -> bool {
        if self.excluded.iter().any(|r| r.matches(id)) {
            return false;
        }
        self.restricted_to.is_empty() || self.restricted_to.iter().any(|r| r.matches(id))
    }
}

fn compile_rules(raw: &[String]) -> Result<Vec<ProtocolRule>> {
    raw.iter().map(|s| ProtocolRule::parse(s)).collect()
}
