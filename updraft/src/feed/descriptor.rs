//! Task descriptors as read from a feed.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::task::{TaskError, TaskResult};

/// Where a task sits in the execution sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Placement {
    /// Runs at its feed position.
    #[default]
    Anchored,
    /// Pinned to the start of the whole sequence.
    AtStart,
    /// Pinned to the end of the whole sequence.
    AtEnd,
    /// Runs immediately before the named anchored task.
    Before(String),
    /// Runs immediately after the named anchored task.
    After(String),
}

impl Placement {
    pub fn is_anchored(&self) -> bool {
        matches!(self, Placement::Anchored)
    }

    /// Target named by a `Before`/`After` placement.
    pub fn target(&self) -> Option<&str> {
        match self {
            Placement::Before(target) | Placement::After(target) => Some(target),
            _ => None,
        }
    }
}

/// How a condition contributes to the update decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Combinator {
    /// Update when the condition holds.
    #[default]
    Or,
    /// Update when the condition does not hold.
    OrNot,
}

impl FromStr for Combinator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "or" => Ok(Combinator::Or),
            "or-not" | "ornot" | "not" => Ok(Combinator::OrNot),
            other => Err(format!("unknown condition combinator '{}'", other)),
        }
    }
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Combinator::Or => write!(f, "or"),
            Combinator::OrNot => write!(f, "or-not"),
        }
    }
}

/// One condition entry attached to a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionDescriptor {
    pub kind: String,
    pub combinator: Combinator,
    pub fields: BTreeMap<String, String>,
}

impl ConditionDescriptor {
    pub fn new(kind: impl Into<String>, combinator: Combinator) -> Self {
        Self {
            kind: kind.into(),
            combinator,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        non_blank(self.fields.get(name))
    }

    pub fn require(&self, name: &str) -> TaskResult<&str> {
        self.field(name).ok_or_else(|| {
            TaskError::Configuration(format!(
                "{} condition is missing required field '{}'",
                self.kind, name
            ))
        })
    }
}

/// An alias plus named fields, validated when the task is materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub alias: String,
    pub fields: BTreeMap<String, String>,
    pub placement: Placement,
    pub conditions: Vec<ConditionDescriptor>,
}

impl TaskDescriptor {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            fields: BTreeMap::new(),
            placement: Placement::Anchored,
            conditions: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_condition(mut self, condition: ConditionDescriptor) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Field value, treating blank values as absent.
    pub fn field(&self, name: &str) -> Option<&str> {
        non_blank(self.fields.get(name))
    }

    pub fn require(&self, name: &str) -> TaskResult<&str> {
        self.field(name).ok_or_else(|| {
            TaskError::Configuration(format!(
                "{} task is missing required field '{}'",
                self.alias, name
            ))
        })
    }

    /// Parse an optional field, rejecting values that do not parse.
    pub fn parse_field<T: FromStr>(&self, name: &str) -> TaskResult<Option<T>> {
        self.field(name)
            .map(|raw| {
                raw.parse::<T>().map_err(|_| {
                    TaskError::Configuration(format!(
                        "{} task has invalid value '{}' for field '{}'",
                        self.alias, raw, name
                    ))
                })
            })
            .transpose()
    }

    /// Boolean field accepting `true/false`, `yes/no` and `1/0`.
    pub fn flag(&self, name: &str, default: bool) -> TaskResult<bool> {
        let Some(raw) = self.field(name) else {
            return Ok(default);
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(TaskError::Configuration(format!(
                "{} task has invalid flag '{}' for field '{}'",
                self.alias, raw, name
            ))),
        }
    }

    /// Name used by `before`/`after` placements to refer to this task.
    pub fn target_key(&self) -> Option<&str> {
        self.field("localPath").or_else(|| self.field("name"))
    }
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}
