//! JSON feed encoding.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use super::descriptor::{Combinator, ConditionDescriptor, Placement, TaskDescriptor};
use super::{Feed, FeedError, FeedReader};

/// Reads feeds in the JSON encoding:
///
/// ```text
/// { "baseUrl": "...",
///   "tasks": [ { "alias": "...", "fields": {...},
///                "placement": { "when": "before", "target": "..." },
///                "conditions": [ { "kind": "...", "type": "or-not", "fields": {...} } ] } ] }
/// ```
///
/// Field values may be strings, numbers or booleans; all are kept as text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFeedReader;

impl JsonFeedReader {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFeed {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    alias: String,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
    #[serde(default)]
    placement: Option<RawPlacement>,
    #[serde(default)]
    conditions: Vec<RawCondition>,
}

#[derive(Debug, Deserialize)]
struct RawPlacement {
    when: String,
    #[serde(default)]
    target: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCondition {
    kind: String,
    #[serde(default, rename = "type")]
    combinator: Option<String>,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
}

impl FeedReader for JsonFeedReader {
    fn read(&self, text: &str) -> Result<Feed, FeedError> {
        let raw: RawFeed = serde_json::from_str(text)?;

        let tasks = raw
            .tasks
            .into_iter()
            .enumerate()
            .map(|(index, task)| convert_task(index, task))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Feed {
            base_url: raw.base_url.filter(|url| !url.trim().is_empty()),
            tasks,
        })
    }
}

fn convert_task(index: usize, raw: RawTask) -> Result<TaskDescriptor, FeedError> {
    let alias = raw.alias.trim().to_string();
    if alias.is_empty() {
        return Err(FeedError::malformed(index, "task alias is empty"));
    }

    let placement = match raw.placement {
        Some(placement) => convert_placement(index, placement)?,
        None => Placement::Anchored,
    };

    let conditions = raw
        .conditions
        .into_iter()
        .map(|condition| {
            let combinator = condition
                .combinator
                .as_deref()
                .unwrap_or_default()
                .parse::<Combinator>()
                .map_err(|reason: String| FeedError::malformed(index, reason))?;
            Ok(ConditionDescriptor {
                kind: condition.kind.trim().to_string(),
                combinator,
                fields: scalar_fields(index, condition.fields)?,
            })
        })
        .collect::<Result<Vec<_>, FeedError>>()?;

    Ok(TaskDescriptor {
        alias,
        fields: scalar_fields(index, raw.fields)?,
        placement,
        conditions,
    })
}

fn convert_placement(index: usize, raw: RawPlacement) -> Result<Placement, FeedError> {
    let target = raw
        .target
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    let when = raw.when.trim().to_ascii_lowercase().replace('-', "_");

    match (when.as_str(), target) {
        ("" | "anchored", _) => Ok(Placement::Anchored),
        ("at_start" | "start", _) => Ok(Placement::AtStart),
        ("at_end" | "end", _) => Ok(Placement::AtEnd),
        ("before", Some(target)) => Ok(Placement::Before(target)),
        ("after", Some(target)) => Ok(Placement::After(target)),
        ("before" | "after", None) => Err(FeedError::malformed(
            index,
            format!("'{}' placement needs a target", when),
        )),
        (other, _) => Err(FeedError::malformed(
            index,
            format!("unknown placement '{}'", other),
        )),
    }
}

fn scalar_fields(
    index: usize,
    fields: BTreeMap<String, Value>,
) -> Result<BTreeMap<String, String>, FeedError> {
    let mut out = BTreeMap::new();
    for (name, value) in fields {
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s,
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(FeedError::malformed(
                    index,
                    format!("field '{}' must be a scalar value", name),
                ))
            }
        };
        out.insert(name, text);
    }
    Ok(out)
}
