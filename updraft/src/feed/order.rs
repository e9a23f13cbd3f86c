//! Execution ordering for feed tasks.
//!
//! Anchored tasks keep their feed order. `before`/`after` tasks are grouped
//! around the anchor they name, and `at_start`/`at_end` tasks are pinned to
//! the ends of the whole sequence.

use super::descriptor::{Placement, TaskDescriptor};
use super::FeedError;

/// An anchored task with its ancillary tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGroup<T> {
    pub before: Vec<T>,
    pub anchor: T,
    pub after: Vec<T>,
}

impl<T> TaskGroup<T> {
    fn new(anchor: T) -> Self {
        Self {
            before: Vec::new(),
            anchor,
            after: Vec::new(),
        }
    }

    /// Convert every task, stopping at the first failure.
    pub fn try_map<U, E>(self, f: &mut impl FnMut(T) -> Result<U, E>) -> Result<TaskGroup<U>, E> {
        Ok(TaskGroup {
            before: self.before.into_iter().map(&mut *f).collect::<Result<_, _>>()?,
            anchor: f(self.anchor)?,
            after: self.after.into_iter().map(&mut *f).collect::<Result<_, _>>()?,
        })
    }
}

/// Tasks arranged for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPlan<T> {
    pub at_start: Vec<T>,
    pub groups: Vec<TaskGroup<T>>,
    pub at_end: Vec<T>,
}

impl<T> TaskPlan<T> {
    /// Flatten into execution order.
    pub fn flatten(self) -> Vec<T> {
        let mut out = self.at_start;
        for group in self.groups {
            out.extend(group.before);
            out.push(group.anchor);
            out.extend(group.after);
        }
        out.extend(self.at_end);
        out
    }

    /// Convert every task in execution order, stopping at the first failure.
    pub fn try_map<U, E>(self, mut f: impl FnMut(T) -> Result<U, E>) -> Result<TaskPlan<U>, E> {
        let at_start = self
            .at_start
            .into_iter()
            .map(&mut f)
            .collect::<Result<_, _>>()?;
        let groups = self
            .groups
            .into_iter()
            .map(|group| group.try_map(&mut f))
            .collect::<Result<_, _>>()?;
        let at_end = self.at_end.into_iter().map(&mut f).collect::<Result<_, _>>()?;
        Ok(TaskPlan {
            at_start,
            groups,
            at_end,
        })
    }

    /// Number of anchored tasks.
    pub fn anchor_count(&self) -> usize {
        self.groups.len()
    }
}

/// Arrange descriptors into a plan.
///
/// A placement target matches the first anchored task whose `localPath`
/// (or, failing that, `name`) equals it.
pub fn plan(tasks: Vec<TaskDescriptor>) -> Result<TaskPlan<TaskDescriptor>, FeedError> {
    let mut at_start = Vec::new();
    let mut at_end = Vec::new();
    let mut groups: Vec<TaskGroup<TaskDescriptor>> = Vec::new();
    let mut ancillary = Vec::new();

    for task in tasks {
        match task.placement {
            Placement::Anchored => groups.push(TaskGroup::new(task)),
            Placement::AtStart => at_start.push(task),
            Placement::AtEnd => at_end.push(task),
            Placement::Before(_) | Placement::After(_) => ancillary.push(task),
        }
    }

    for task in ancillary {
        let target = task.placement.target().unwrap_or_default().to_string();
        let group = groups
            .iter_mut()
            .find(|group| group.anchor.target_key() == Some(target.as_str()))
            .ok_or_else(|| FeedError::UnknownTarget {
                alias: task.alias.clone(),
                target: target.clone(),
            })?;
        match task.placement {
            Placement::Before(_) => group.before.push(task),
            _ => group.after.push(task),
        }
    }

    Ok(TaskPlan {
        at_start,
        groups,
        at_end,
    })
}

/// Order descriptors for execution.
pub fn order_tasks(tasks: Vec<TaskDescriptor>) -> Result<Vec<TaskDescriptor>, FeedError> {
    plan(tasks).map(TaskPlan::flatten)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchored(path: &str) -> TaskDescriptor {
        TaskDescriptor::new("fileUpdate").with_field("localPath", path)
    }

    fn placed(label: &str, placement: Placement) -> TaskDescriptor {
        TaskDescriptor::new("stopProcess")
            .with_field("label", label)
            .with_placement(placement)
    }

    fn labels(tasks: &[TaskDescriptor]) -> Vec<String> {
        tasks
            .iter()
            .map(|t| {
                t.field("label")
                    .or_else(|| t.field("localPath"))
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn test_before_and_after_surround_target() {
        let tasks = vec![
            placed("a-after", Placement::After("x".into())),
            anchored("w"),
            anchored("x"),
            placed("a-before", Placement::Before("x".into())),
            anchored("y"),
        ];
        let ordered = order_tasks(tasks).unwrap();
        assert_eq!(labels(&ordered), ["w", "a-before", "x", "a-after", "y"]);
    }

    #[test]
    fn test_pinned_tasks_go_to_the_ends() {
        let tasks = vec![
            anchored("a"),
            placed("end", Placement::AtEnd),
            anchored("b"),
            placed("start", Placement::AtStart),
        ];
        let ordered = order_tasks(tasks).unwrap();
        assert_eq!(labels(&ordered), ["start", "a", "b", "end"]);
    }

    #[test]
    fn test_target_falls_back_to_name() {
        let tasks = vec![
            TaskDescriptor::new("startProcess").with_field("name", "app.exe"),
            placed("pre", Placement::Before("app.exe".into())),
        ];
        let ordered = order_tasks(tasks).unwrap();
        assert_eq!(ordered[0].field("label"), Some("pre"));
    }

    #[test]
    fn test_unknown_target_is_rejected() {
        let tasks = vec![anchored("a"), placed("p", Placement::After("missing".into()))];
        let err = order_tasks(tasks).unwrap_err();
        assert!(matches!(err, FeedError::UnknownTarget { ref target, .. } if target == "missing"));
    }

    #[test]
    fn test_placed_task_cannot_target_another_placed_task() {
        let tasks = vec![
            anchored("a"),
            placed("p", Placement::AtEnd).with_field("localPath", "p"),
            placed("q", Placement::Before("p".into())),
        ];
        assert!(order_tasks(tasks).is_err());
    }

    #[test]
    fn test_try_map_visits_in_execution_order() {
        let tasks = vec![
            anchored("a"),
            placed("end", Placement::AtEnd),
            placed("pre", Placement::Before("a".into())),
            placed("start", Placement::AtStart),
        ];
        let mut seen = Vec::new();
        let mapped = plan(tasks)
            .unwrap()
            .try_map(|task| {
                let label = labels(std::slice::from_ref(&task)).remove(0);
                seen.push(label.clone());
                Ok::<_, ()>(label)
            })
            .unwrap();
        assert_eq!(seen, ["start", "pre", "a", "end"]);
        assert_eq!(mapped.flatten(), seen);
    }

    #[test]
    fn test_try_map_stops_at_first_error() {
        let tasks = vec![anchored("a"), anchored("b"), anchored("c")];
        let mut calls = 0;
        let result = plan(tasks).unwrap().try_map(|task| {
            calls += 1;
            if task.field("localPath") == Some("b") {
                Err("b")
            } else {
                Ok(task)
            }
        });
        assert_eq!(result.unwrap_err(), "b");
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_plan_counts_anchors() {
        let tasks = vec![
            anchored("a"),
            placed("p", Placement::Before("a".into())),
            anchored("b"),
            placed("s", Placement::AtStart),
        ];
        assert_eq!(plan(tasks).unwrap().anchor_count(), 2);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_ordering_preserves_every_task(
                kinds in proptest::collection::vec(0u8..5, 1..30)
            ) {
                // First task is always an anchor named "t0" so targets resolve.
                let mut tasks = vec![anchored("t0")];
                for (i, kind) in kinds.iter().enumerate() {
                    let label = format!("p{}", i);
                    let task = match kind {
                        0 => anchored(&format!("t{}", i + 1)),
                        1 => placed(&label, Placement::AtStart),
                        2 => placed(&label, Placement::AtEnd),
                        3 => placed(&label, Placement::Before("t0".into())),
                        _ => placed(&label, Placement::After("t0".into())),
                    };
                    tasks.push(task);
                }
                let total = tasks.len();
                let starts = kinds.iter().filter(|k| **k == 1).count();
                let ends = kinds.iter().filter(|k| **k == 2).count();

                let ordered = order_tasks(tasks).unwrap();
                prop_assert_eq!(ordered.len(), total);
                for task in &ordered[..starts] {
                    prop_assert_eq!(&task.placement, &Placement::AtStart);
                }
                for task in &ordered[total - ends..] {
                    prop_assert_eq!(&task.placement, &Placement::AtEnd);
                }

                // Anchors keep their relative feed order.
                let anchors: Vec<String> = ordered
                    .iter()
                    .filter(|t| t.placement.is_anchored())
                    .map(|t| t.field("localPath").unwrap_or_default().to_string())
                    .collect();
                let mut expected = anchors.clone();
                expected.sort_by_key(|name| name[1..].parse::<usize>().unwrap_or(0));
                prop_assert_eq!(anchors, expected);
            }
        }
    }
}
