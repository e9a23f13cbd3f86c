//! Update feed model, decoding and ordering.
//!
//! A feed is an optional base URL plus an ordered list of task descriptors.
//! The [`FeedReader`] trait decodes feed text; [`JsonFeedReader`] is the
//! built-in encoding. [`plan`] arranges descriptors into execution order.

mod descriptor;
mod json;
mod order;

use thiserror::Error;

pub use descriptor::{Combinator, ConditionDescriptor, Placement, TaskDescriptor};
pub use json::JsonFeedReader;
pub use order::{order_tasks, plan, TaskGroup, TaskPlan};

/// A decoded feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feed {
    /// Base for relative payload URLs. Defaults to the feed URL.
    pub base_url: Option<String>,
    /// Task descriptors in feed order.
    pub tasks: Vec<TaskDescriptor>,
}

/// Errors raised while decoding or ordering a feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed is not valid JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("malformed task #{index} in feed: {reason}")]
    Malformed { index: usize, reason: String },

    #[error("task '{alias}' is placed relative to '{target}', which is not an anchored task")]
    UnknownTarget { alias: String, target: String },
}

impl FeedError {
    pub(crate) fn malformed(index: usize, reason: impl Into<String>) -> Self {
        FeedError::Malformed {
            index,
            reason: reason.into(),
        }
    }
}

/// Decodes feed text into a [`Feed`].
pub trait FeedReader: Send + Sync {
    fn read(&self, text: &str) -> Result<Feed, FeedError>;
}
