use std::io::{self, Write};

use chrono::{Local, NaiveDate};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};

use crate::api::TaskApi;
use crate::models::{parse_day, DueDate, Frequency, ModelError, NewTask, Scope, Task, TaskId, TaskUpdate};
use crate::store::{StoreError, TaskStore};

/// Fields accepted by `add`, as typed on the command line.
#[derive(Debug, Default)]
pub struct AddArgs {
    pub title: String,
    pub due: String,
    pub description: Option<String>,
    pub xp: Option<u32>,
    pub habit: bool,
    pub recur: Option<String>,
    pub until: Option<String>,
}

/// Fields accepted by `edit`. `None` leaves the field alone.
#[derive(Debug, Default)]
pub struct EditArgs {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due: Option<String>,
    pub xp: Option<u32>,
    pub recur: Option<String>,
    pub until: Option<String>,
    pub all_future: bool,
}

impl AddArgs {
    pub fn into_new_task(self) -> Result<NewTask, StoreError> {
        let due: DueDate = self.due.parse()?;
        let mut new = NewTask::new(self.title, due);
        if let Some(d) = self.description {
            new = new.description(d);
        }
        if let Some(xp) = self.xp {
            new = new.xp(xp);
        }
        if self.habit {
            new = new.habit();
        }
        match (self.recur, self.until) {
            (Some(freq), until) => {
                let frequency: Frequency = freq.parse()?;
                let end = until.as_deref().map(parse_day).transpose()?;
                new = new.recurring(frequency, end);
            }
            (None, Some(_)) => {
                return Err(ModelError::MissingFrequency.into());
            }
            (None, None) => {}
        }
        Ok(new)
    }
}

impl EditArgs {
    pub fn into_update(self) -> Result<(TaskUpdate, Scope), StoreError> {
        let update = TaskUpdate {
            title: self.title,
            description: self.description,
            due_date: self.due.as_deref().map(str::parse::<DueDate>).transpose()?,
            xp_reward: self.xp,
            frequency: self.recur.as_deref().map(str::parse::<Frequency>).transpose()?,
            recurring_end_date: self.until.as_deref().map(parse_day).transpose()?,
            ..TaskUpdate::default()
        };
        Ok((update, Scope::from_flag(self.all_future)))
    }
}

/// Prints and clears pending notices; errors go to stderr. Returns how many
/// errors were printed.
pub fn flush_notices<A: TaskApi>(store: &mut TaskStore<A>) -> usize {
    let mut errors = 0;
    for notice in store.notifier_mut().drain() {
        if notice.is_error() {
            errors += 1;
            eprintln!("{notice}");
        } else {
            println!("{notice}");
        }
    }
    errors
}

/// Adds a new task. Recurring tasks are expanded by the backend.
pub async fn cmd_add<A: TaskApi>(store: &mut TaskStore<A>, args: AddArgs) -> Result<(), StoreError> {
    let new = args.into_new_task()?;
    let created = store.add_task(new).await?;
    match created.frequency() {
        Some(freq) => {
            let instances = store
                .recurring_groups()
                .iter()
                .find(|g| g.key == created.id)
                .map_or(1, |g| g.len());
            println!(
                "Task added (id = {}), repeats {} with {} scheduled instances",
                created.id, freq, instances
            );
        }
        None => println!("Task added (id = {})", created.id),
    }
    Ok(())
}

/// Lists tasks, all of them or those of one day.
///
/// By default, hides completed tasks unless `all` is true.
pub async fn cmd_list<A: TaskApi>(store: &mut TaskStore<A>, date: Option<NaiveDate>, all: bool) -> Result<(), StoreError> {
    store.fetch_tasks(date).await?;
    let mut tasks: Vec<&Task> = match date {
        Some(day) => store.get_tasks_for_date(day),
        None => store.tasks().iter().collect(),
    };
    if !all {
        tasks.retain(|t| !t.completed);
    }
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }
    tasks.sort_by(|a, b| a.due_date.cmp(&b.due_date));
    println!("{}", task_table(&tasks));
    Ok(())
}

pub async fn cmd_today<A: TaskApi>(store: &mut TaskStore<A>, all: bool) -> Result<(), StoreError> {
    cmd_list(store, Some(Local::now().date_naive()), all).await
}

/// Lists one row per recurrence lineage.
pub async fn cmd_recurring<A: TaskApi>(store: &mut TaskStore<A>) -> Result<(), StoreError> {
    store.fetch_tasks(None).await?;
    let groups = store.recurring_groups();
    if groups.is_empty() {
        println!("No recurring tasks.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Next ID").add_attribute(Attribute::Bold),
            Cell::new("Title").add_attribute(Attribute::Bold),
            Cell::new("Repeats").add_attribute(Attribute::Bold),
            Cell::new("Next Due").add_attribute(Attribute::Bold),
            Cell::new("Until").add_attribute(Attribute::Bold),
            Cell::new("Done").add_attribute(Attribute::Bold),
        ]);
    for group in groups {
        let next = group.next_due();
        table.add_row(vec![
            Cell::new(&next.id),
            Cell::new(next.display_title()),
            Cell::new(next.frequency().map(|f| f.to_string()).unwrap_or_default()),
            Cell::new(next.due_date),
            Cell::new(
                next.recurring_end_date()
                    .map_or_else(|| "forever".to_string(), |d| d.to_string()),
            ),
            Cell::new(format!("{}/{}", group.completed_count(), group.len())),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Toggles completion of one task instance.
pub async fn cmd_complete<A: TaskApi>(store: &mut TaskStore<A>, id: TaskId) -> Result<(), StoreError> {
    store.fetch_tasks(None).await?;
    let task = store.toggle_completed(&id).await?;
    if !task.completed {
        println!("Task {} marked as open again.", task.id);
    }
    Ok(())
}

/// Edits a task. The scope is announced before anything is sent.
pub async fn cmd_edit<A: TaskApi>(store: &mut TaskStore<A>, id: TaskId, args: EditArgs) -> Result<(), StoreError> {
    let (update, scope) = args.into_update()?;
    if update.is_empty() {
        println!("Nothing to change.");
        return Ok(());
    }
    store.fetch_tasks(None).await?;
    println!("Updating task {id}: {scope}");
    store.update_task(&id, update, scope).await?;
    println!("Task {id} updated.");
    Ok(())
}

/// Deletes a task after confirmation, or without asking when `force` is set.
pub async fn cmd_remove<A: TaskApi>(store: &mut TaskStore<A>, id: TaskId, all_future: bool, force: bool) -> Result<(), StoreError> {
    store.fetch_tasks(None).await?;
    let scope = Scope::from_flag(all_future);
    let title = match store.get(&id) {
        Some(t) => t.title.clone(),
        None => return Err(StoreError::UnknownTask(id)),
    };
    if !force && !confirm(&format!("Delete \"{title}\" ({scope})?")) {
        println!("Aborted.");
        return Ok(());
    }
    store.remove_task(&id, scope).await?;
    Ok(())
}

fn confirm(question: &str) -> bool {
    print!("{question} [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    input.trim().eq_ignore_ascii_case("y")
}

fn task_table(tasks: &[&Task]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").add_attribute(Attribute::Bold),
            Cell::new("Title").add_attribute(Attribute::Bold),
            Cell::new("Due").add_attribute(Attribute::Bold),
            Cell::new("Repeats").add_attribute(Attribute::Bold),
            Cell::new("XP").add_attribute(Attribute::Bold),
            Cell::new("Status").add_attribute(Attribute::Bold),
        ]);

    let today = Local::now().date_naive();
    for t in tasks {
        let overdue = !t.completed && t.due_date.day() < today;
        let status = if t.completed { "Done" } else { "Pending" };
        let status_color = if t.completed { Color::Green } else { Color::Yellow };
        table.add_row(vec![
            Cell::new(&t.id),
            Cell::new(t.display_title()),
            Cell::new(t.due_date).fg(if overdue { Color::Red } else { Color::Reset }),
            Cell::new(t.frequency().map(|f| f.to_string()).unwrap_or_default()),
            Cell::new(t.xp_reward),
            Cell::new(status).fg(status_color),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_args_build_recurring_task() {
        let new = AddArgs {
            title: "Meditate".into(),
            due: "2024-03-01".into(),
            habit: true,
            recur: Some("Daily".into()),
            until: Some("2024-03-10".into()),
            ..AddArgs::default()
        }
        .into_new_task()
        .unwrap();
        let rec = new.recurrence.unwrap();
        assert_eq!(rec.frequency, Frequency::Daily);
        assert_eq!(rec.end_date, Some(parse_day("2024-03-10").unwrap()));
        assert!(new.is_habit);
    }

    #[test]
    fn until_without_frequency_is_rejected() {
        let res = AddArgs {
            title: "x".into(),
            due: "2024-03-01".into(),
            until: Some("2024-03-10".into()),
            ..AddArgs::default()
        }
        .into_new_task();
        assert!(matches!(res, Err(StoreError::Validation(_))));
    }

    #[test]
    fn edit_args_carry_scope() {
        let (update, scope) = EditArgs {
            title: Some("Walk".into()),
            all_future: true,
            ..EditArgs::default()
        }
        .into_update()
        .unwrap();
        assert_eq!(update, TaskUpdate::title("Walk"));
        assert_eq!(scope, Scope::AllFuture);
    }

    #[test]
    fn bad_due_date_is_a_validation_error() {
        let res = EditArgs {
            due: Some("03/01/2024".into()),
            ..EditArgs::default()
        }
        .into_update();
        assert!(matches!(res, Err(StoreError::Validation(_))));
    }
}
