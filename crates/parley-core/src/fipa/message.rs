//! FIPA message content: performatives, queries and descriptions.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParleyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FipaPerformative {
    Cfp,
    Propose,
    Accept,
    AcceptWInform,
    Decline,
    End,
    Inform,
    MatchAccept,
    MatchAcceptWInform,
}

impl FipaPerformative {
    pub const ALL: [FipaPerformative; 9] = [
        FipaPerformative::Cfp,
        FipaPerformative::Propose,
        FipaPerformative::Accept,
        FipaPerformative::AcceptWInform,
        FipaPerformative::Decline,
        FipaPerformative::End,
        FipaPerformative::Inform,
        FipaPerformative::MatchAccept,
        FipaPerformative::MatchAcceptWInform,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FipaPerformative::Cfp => "cfp",
            FipaPerformative::Propose => "propose",
            FipaPerformative::Accept => "accept",
            FipaPerformative::AcceptWInform => "accept_w_inform",
            FipaPerformative::Decline => "decline",
            FipaPerformative::End => "end",
            FipaPerformative::Inform => "inform",
            FipaPerformative::MatchAccept => "match_accept",
            FipaPerformative::MatchAcceptWInform => "match_accept_w_inform",
        }
    }
}

impl fmt::Display for FipaPerformative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FipaPerformative {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FipaPerformative::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ParleyError::Malformed(format!("unknown fipa performative: {s:?}")))
    }
}

/// Attribute value in descriptions and constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    fn partial_cmp_value(&self, other: &AttributeValue) -> Option<Ordering> {
        use AttributeValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a.partial_cmp(b),
            (Int(a), Int(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (String(a), String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    GtEq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Constraint {
    pub attribute: String,
    pub relation: Relation,
    pub value: AttributeValue,
}

impl Constraint {
    pub fn new(attribute: impl Into<String>, relation: Relation, value: impl Into<AttributeValue>) -> Self {
        Self {
            attribute: attribute.into(),
            relation,
            value: value.into(),
        }
    }

    /// A missing attribute or incomparable types never match.
    pub fn matches(&self, description: &Description) -> bool {
        let Some(actual) = description.values.get(&self.attribute) else {
            return false;
        };
        let Some(ord) = actual.partial_cmp_value(&self.value) else {
            return false;
        };
        match self.relation {
            Relation::Eq => ord == Ordering::Equal,
            Relation::NotEq => ord != Ordering::Equal,
            Relation::Lt => ord == Ordering::Less,
            Relation::LtEq => ord != Ordering::Greater,
            Relation::Gt => ord == Ordering::Greater,
            Relation::GtEq => ord != Ordering::Less,
        }
    }
}

/// Conjunction of constraints carried by a cfp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query {
    pub constraints: Vec<Constraint>,
}

impl Query {
    pub fn new(constraints: Vec<Constraint>) -> Self {
        Self { constraints }
    }

    pub fn matches(&self, description: &Description) -> bool {
        self.constraints.iter().all(|c| c.matches(description))
    }
}

/// Attribute map carried by a proposal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Description {
    pub values: BTreeMap<String, AttributeValue>,
}

impl Description {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.values.insert(attribute.into(), value.into());
        self
    }
}

pub type Info = BTreeMap<String, String>;

/// FIPA content, one variant per performative.
#[derive(Debug, Clone, PartialEq)]
pub enum FipaBody {
    Cfp { query: Query },
    Propose { proposal: Description },
    Accept,
    AcceptWInform { info: Info },
    Decline,
    End,
    Inform { info: Info },
    MatchAccept,
    MatchAcceptWInform { info: Info },
}

impl FipaBody {
    pub fn performative(&self) -> FipaPerformative {
        match self {
            FipaBody::Cfp { .. } => FipaPerformative::Cfp,
            FipaBody::Propose { .. } => FipaPerformative::Propose,
            FipaBody::Accept => FipaPerformative::Accept,
            FipaBody::AcceptWInform { .. } => FipaPerformative::AcceptWInform,
            FipaBody::Decline => FipaPerformative::Decline,
            FipaBody::End => FipaPerformative::End,
            FipaBody::Inform { .. } => FipaPerformative::Inform,
            FipaBody::MatchAccept => FipaPerformative::MatchAccept,
            FipaBody::MatchAcceptWInform { .. } => FipaPerformative::MatchAcceptWInform,
        }
    }
}
