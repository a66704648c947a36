//! Structured identifiers
//!
//! Every entity id is a human-grepable string with a fixed shape, so a
//! grep through the event logs is self-describing:
//!
//!   agent config  operator:poem_generator:v2
//!   agent         operator:poem_generator[1]:v2
//!   task config   task:poem_generation:v1
//!   task run      task:poem_generation[3]:v1
//!
//! All id types round-trip through `Display`/`FromStr` and serialize as
//! plain strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Worker kind. Supervisors drive the control plane; operators execute runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Supervisor,
    Operator,
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supervisor => write!(f, "supervisor"),
            Self::Operator => write!(f, "operator"),
        }
    }
}

impl FromStr for AgentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supervisor" => Ok(Self::Supervisor),
            "operator" => Ok(Self::Operator),
            other => Err(Error::InvalidId(format!("unknown agent kind '{other}'"))),
        }
    }
}

/// Task kind. A single kind exists today; the keying mirrors agents so the
/// two registries stay structurally identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Task,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task")
    }
}

impl FromStr for TaskKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            other => Err(Error::InvalidId(format!("unknown task kind '{other}'"))),
        }
    }
}

/// `{kind}:{type}:v{version}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct AgentConfigId {
    pub kind: AgentKind,
    pub type_name: String,
    pub version: u32,
}

impl AgentConfigId {
    pub fn new(kind: AgentKind, type_name: impl Into<String>, version: u32) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            version,
        }
    }
}

impl fmt::Display for AgentConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:v{}", self.kind, self.type_name, self.version)
    }
}

impl FromStr for AgentConfigId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, type_name, version) = split_config_id(s)?;
        Ok(Self {
            kind: kind.parse()?,
            type_name,
            version,
        })
    }
}

/// `{kind}:{type}[n]:v{version}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct AgentId {
    pub kind: AgentKind,
    pub type_name: String,
    pub num: u32,
    pub version: u32,
}

impl AgentId {
    pub fn new(kind: AgentKind, type_name: impl Into<String>, num: u32, version: u32) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            num,
            version,
        }
    }

    /// The config this instance was materialized from.
    pub fn config_id(&self) -> AgentConfigId {
        AgentConfigId::new(self.kind, self.type_name.clone(), self.version)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}[{}]:v{}",
            self.kind, self.type_name, self.num, self.version
        )
    }
}

impl FromStr for AgentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, type_name, num, version) = split_instance_id(s)?;
        Ok(Self {
            kind: kind.parse()?,
            type_name,
            num,
            version,
        })
    }
}

/// `task:{type}:v{version}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TaskConfigId {
    pub kind: TaskKind,
    pub type_name: String,
    pub version: u32,
}

impl TaskConfigId {
    pub fn new(kind: TaskKind, type_name: impl Into<String>, version: u32) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            version,
        }
    }
}

impl fmt::Display for TaskConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:v{}", self.kind, self.type_name, self.version)
    }
}

impl FromStr for TaskConfigId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, type_name, version) = split_config_id(s)?;
        Ok(Self {
            kind: kind.parse()?,
            type_name,
            version,
        })
    }
}

/// `task:{type}[n]:v{version}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TaskRunId {
    pub kind: TaskKind,
    pub type_name: String,
    pub num: u32,
    pub version: u32,
}

impl TaskRunId {
    pub fn new(kind: TaskKind, type_name: impl Into<String>, num: u32, version: u32) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            num,
            version,
        }
    }

    pub fn config_id(&self) -> TaskConfigId {
        TaskConfigId::new(self.kind, self.type_name.clone(), self.version)
    }
}

impl fmt::Display for TaskRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}[{}]:v{}",
            self.kind, self.type_name, self.num, self.version
        )
    }
}

impl FromStr for TaskRunId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, type_name, num, version) = split_instance_id(s)?;
        Ok(Self {
            kind: kind.parse()?,
            type_name,
            num,
            version,
        })
    }
}

macro_rules! string_conversions {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for String {
                fn from(id: $ty) -> String {
                    id.to_string()
                }
            }

            impl TryFrom<String> for $ty {
                type Error = Error;

                fn try_from(s: String) -> Result<Self, Error> {
                    s.parse()
                }
            }
        )*
    };
}

string_conversions!(AgentConfigId, AgentId, TaskConfigId, TaskRunId);

/// Split `{kind}:{type}:v{version}` into its parts.
fn split_config_id(s: &str) -> Result<(&str, String, u32), Error> {
    let mut parts = s.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(kind), Some(type_name), Some(version)) if !type_name.is_empty() => {
            Ok((kind, type_name.to_string(), parse_version(s, version)?))
        }
        _ => Err(Error::InvalidId(format!(
            "'{s}' is not of the form kind:type:vN"
        ))),
    }
}

/// Split `{kind}:{type}[n]:v{version}` into its parts.
fn split_instance_id(s: &str) -> Result<(&str, String, u32, u32), Error> {
    let mut parts = s.splitn(3, ':');
    let (kind, middle, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(kind), Some(middle), Some(version)) => (kind, middle, version),
        _ => {
            return Err(Error::InvalidId(format!(
                "'{s}' is not of the form kind:type[n]:vN"
            )))
        }
    };

    let (type_name, num) = middle
        .strip_suffix(']')
        .and_then(|m| m.split_once('['))
        .ok_or_else(|| Error::InvalidId(format!("'{s}' is missing an instance number")))?;
    if type_name.is_empty() {
        return Err(Error::InvalidId(format!("'{s}' has an empty type label")));
    }
    let num: u32 = num
        .parse()
        .map_err(|_| Error::InvalidId(format!("'{s}' has a non-numeric instance number")))?;

    Ok((kind, type_name.to_string(), num, parse_version(s, version)?))
}

fn parse_version(id: &str, segment: &str) -> Result<u32, Error> {
    segment
        .strip_prefix('v')
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::InvalidId(format!("'{id}' has a malformed version segment")))
}
