use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use crate::models::{Scope, Task, TaskId};

/// All recurring tasks sharing one recurrence root, sorted by due date.
#[derive(Debug, Clone)]
pub struct LineageGroup<'a> {
    /// Lineage key: the root task id.
    pub key: TaskId,
    /// Members ordered ascending by due date.
    pub members: Vec<&'a Task>,
}

impl<'a> LineageGroup<'a> {
    /// The representative task shown for the whole lineage: the earliest
    /// member, treated as "next due".
    pub fn next_due(&self) -> &'a Task {
        self.members[0]
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.members.iter().filter(|t| t.completed).count()
    }
}

/// Problems found in a set of tasks that break lineage invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineageViolation {
    DuplicateDueDate { lineage: TaskId, day: NaiveDate },
}

/// Recurring tasks belonging to the lineage `key`.
pub fn lineage_members<'a>(tasks: &'a [Task], key: &TaskId) -> Vec<&'a Task> {
    tasks
        .iter()
        .filter(|t| t.lineage_key() == Some(key))
        .collect()
}

/// Ids touched by a mutation of `id` under `scope`.
///
/// `AllFuture` reaches the target and every member of its lineage due on or
/// after the target. Earlier members are never included. Returns an empty
/// list when `id` is unknown.
pub fn scope_targets(tasks: &[Task], id: &TaskId, scope: Scope) -> Vec<TaskId> {
    let Some(target) = tasks.iter().find(|t| &t.id == id) else {
        return Vec::new();
    };
    let key = match (scope, target.lineage_key()) {
        (Scope::AllFuture, Some(key)) => key,
        _ => return vec![target.id.clone()],
    };
    let pivot = target.due_date;
    let mut ids: Vec<TaskId> = lineage_members(tasks, key)
        .into_iter()
        .filter(|t| t.id != target.id && t.due_date >= pivot)
        .map(|t| t.id.clone())
        .collect();
    ids.insert(0, target.id.clone());
    ids
}

/// Partitions recurring tasks into lineage groups, one per root.
///
/// Groups come back ordered by their next due date.
pub fn group_recurring(tasks: &[Task]) -> Vec<LineageGroup<'_>> {
    let mut by_key: HashMap<&TaskId, Vec<&Task>> = HashMap::new();
    for task in tasks {
        if let Some(key) = task.lineage_key() {
            by_key.entry(key).or_default().push(task);
        }
    }

    let mut groups: Vec<LineageGroup<'_>> = by_key
        .into_iter()
        .map(|(key, mut members)| {
            members.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));
            LineageGroup {
                key: key.clone(),
                members,
            }
        })
        .collect();
    groups.sort_by(|a, b| {
        a.next_due()
            .due_date
            .cmp(&b.next_due().due_date)
            .then_with(|| a.key.cmp(&b.key))
    });
    groups
}

/// Checks that no lineage schedules two members on the same day.
pub fn check_lineages(tasks: &[Task]) -> Vec<LineageViolation> {
    let mut violations = Vec::new();
    for group in group_recurring(tasks) {
        let mut seen: BTreeMap<NaiveDate, usize> = BTreeMap::new();
        for member in &group.members {
            *seen.entry(member.due_date.day()).or_default() += 1;
        }
        for (day, count) in seen {
            if count > 1 {
                violations.push(LineageViolation::DuplicateDueDate {
                    lineage: group.key.clone(),
                    day,
                });
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{parse_day, DueDate, Frequency, Schedule, DEFAULT_XP_REWARD};

    fn task(id: &str, due: &str, parent: Option<&str>) -> Task {
        Task {
            id: TaskId::from(id),
            title: id.to_string(),
            description: None,
            completed: false,
            due_date: DueDate::on(parse_day(due).unwrap()),
            xp_reward: DEFAULT_XP_REWARD,
            is_habit: false,
            schedule: Schedule::Recurring {
                frequency: Frequency::Daily,
                end_date: None,
                parent: parent.map(TaskId::from),
            },
        }
    }

    #[test]
    fn groups_by_parent_and_picks_earliest() {
        let mut plain = task("x", "2024-01-01", None);
        plain.schedule = Schedule::Simple;
        let tasks = vec![
            task("c2", "2024-03-03", Some("r")),
            task("r", "2024-03-01", None),
            plain,
            task("c1", "2024-03-02", Some("r")),
            task("s", "2024-02-01", None),
        ];
        let groups = group_recurring(&tasks);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, TaskId::from("s"));
        assert_eq!(groups[1].next_due().id, TaskId::from("r"));
        let ids: Vec<&str> = groups[1].members.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["r", "c1", "c2"]);
    }

    #[test]
    fn all_future_scope_skips_past_members() {
        let tasks = vec![
            task("r", "2024-03-01", None),
            task("c1", "2024-03-02", Some("r")),
            task("c2", "2024-03-03", Some("r")),
        ];
        let ids = scope_targets(&tasks, &TaskId::from("c1"), Scope::AllFuture);
        assert_eq!(ids, vec![TaskId::from("c1"), TaskId::from("c2")]);
        let single = scope_targets(&tasks, &TaskId::from("c1"), Scope::ThisInstance);
        assert_eq!(single, vec![TaskId::from("c1")]);
        assert!(scope_targets(&tasks, &TaskId::from("nope"), Scope::AllFuture).is_empty());
    }

    #[test]
    fn duplicate_due_dates_are_reported() {
        let tasks = vec![task("r", "2024-03-01", None), task("c1", "2024-03-01", Some("r"))];
        let v = check_lineages(&tasks);
        assert_eq!(v.len(), 1);
        assert!(matches!(&v[0], LineageViolation::DuplicateDueDate { lineage, .. } if lineage.as_str() == "r"));
    }
}
