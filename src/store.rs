//! Client-side task store.
//!
//! The store owns the in-memory task list and reconciles it with whatever the
//! injected [`TaskApi`] answers. Every mutation goes to the API first; a
//! failure leaves local state as it was (or rolls back the optimistic insert)
//! and raises an error toast.

use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::api::{ApiError, TaskApi};
use crate::lineage::{check_lineages, group_recurring, scope_targets, LineageGroup, LineageViolation};
use crate::models::{ModelError, NewTask, Scope, Task, TaskId, TaskUpdate};
use crate::notify::{Notice, Notifier};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(#[from] ModelError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("task {0} not found")]
    UnknownTask(TaskId),
}

/// Progress of the first fetch. Later failures keep the cached tasks and
/// stay `Loaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Loading,
    Loaded,
    Failed,
}

pub struct TaskStore<A> {
    api: A,
    tasks: Vec<Task>,
    notifier: Notifier,
    /// Day the last successful fetch was scoped to, `None` for everything.
    filter: Option<NaiveDate>,
    load_state: LoadState,
}

impl<A: TaskApi> TaskStore<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            tasks: Vec::new(),
            notifier: Notifier::default(),
            filter: None,
            load_state: LoadState::Loading,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    /// False until a fetch succeeded.
    pub fn has_loaded(&self) -> bool {
        self.load_state == LoadState::Loaded
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn notifier_mut(&mut self) -> &mut Notifier {
        &mut self.notifier
    }

    /// Tasks due on `date`, by calendar day, earliest first.
    pub fn get_tasks_for_date(&self, date: NaiveDate) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.iter().filter(|t| t.due_date.is_on(date)).collect();
        tasks.sort_by(|a, b| a.due_date.cmp(&b.due_date));
        tasks
    }

    /// One group per recurrence lineage, ordered by next due date.
    pub fn recurring_groups(&self) -> Vec<LineageGroup<'_>> {
        group_recurring(&self.tasks)
    }

    /// Replaces local state with the server's view, optionally limited to one
    /// day. On failure the cached tasks stay visible.
    pub async fn fetch_tasks(&mut self, date: Option<NaiveDate>) -> Result<(), StoreError> {
        match self.api.list(date).await {
            Ok(tasks) => {
                for violation in check_lineages(&tasks) {
                    let LineageViolation::DuplicateDueDate { lineage, day } = violation;
                    warn!(%lineage, %day, "lineage has more than one instance due on the same day");
                }
                self.tasks = tasks;
                self.filter = date;
                self.load_state = LoadState::Loaded;
                Ok(())
            }
            Err(e) => {
                error!("Failed to fetch tasks: {}", e);
                if self.load_state == LoadState::Loading {
                    self.load_state = LoadState::Failed;
                }
                self.notifier.error(format!("Could not load tasks: {e}"));
                Err(e.into())
            }
        }
    }

    /// Creates a task. The task shows up immediately under a provisional id
    /// and is swapped for the server's copy once confirmed.
    pub async fn add_task(&mut self, new: NewTask) -> Result<Task, StoreError> {
        if let Err(e) = new.validate() {
            self.notifier.error(format!("Could not add task: {e}"));
            return Err(e.into());
        }

        let provisional = new.clone().into_task(TaskId::provisional());
        let temp_id = provisional.id.clone();
        self.tasks.push(provisional);

        match self.api.create(&new).await {
            Ok(created) => {
                info!(id = %created.id, title = %created.title, "task created");
                if let Some(slot) = self.tasks.iter_mut().find(|t| t.id == temp_id) {
                    *slot = created.clone();
                }
                if created.is_recurring() {
                    // instances are generated server-side
                    let filter = self.filter;
                    if self.fetch_tasks(filter).await.is_err() {
                        warn!(id = %created.id, "created recurring task but could not load its instances");
                    }
                }
                Ok(created)
            }
            Err(e) => {
                self.tasks.retain(|t| t.id != temp_id);
                error!("Failed to create task: {}", e);
                self.notifier.error(format!("Could not add \"{}\": {e}", new.title.trim()));
                Err(e.into())
            }
        }
    }

    /// Updates a task, or the task and its future instances.
    ///
    /// The scope is forwarded to the API, which applies it authoritatively;
    /// the local copy mirrors the same policy so the view is consistent
    /// without a re-fetch.
    pub async fn update_task(&mut self, id: &TaskId, update: TaskUpdate, scope: Scope) -> Result<Task, StoreError> {
        let Some(current) = self.get(id) else {
            self.notifier.error(format!("Task {id} no longer exists"));
            return Err(StoreError::UnknownTask(id.clone()));
        };
        if let Err(e) = update.validate_for(current) {
            let msg = format!("Could not save \"{}\": {e}", current.title);
            self.notifier.error(msg);
            return Err(e.into());
        }
        if update.is_empty() {
            return Ok(current.clone());
        }
        let title = current.title.clone();

        match self.api.update(id, &update, scope).await {
            Ok(updated) => {
                let targets = scope_targets(&self.tasks, id, scope);
                let propagated = update.propagated();
                for task in self.tasks.iter_mut() {
                    if &task.id == id {
                        *task = updated.clone();
                    } else if targets.contains(&task.id) {
                        propagated.apply_to(task);
                    }
                }
                info!(%id, affected = targets.len(), all_future = scope.is_all_future(), "task updated");
                Ok(updated)
            }
            Err(e) => {
                error!("Failed to update task {}: {}", id, e);
                self.notifier.error(format!("Could not save \"{title}\": {e}"));
                Err(e.into())
            }
        }
    }

    /// Deletes a task, or the task and its future instances. Earlier
    /// instances are never touched.
    pub async fn remove_task(&mut self, id: &TaskId, scope: Scope) -> Result<usize, StoreError> {
        let Some(current) = self.get(id) else {
            self.notifier.error(format!("Task {id} no longer exists"));
            return Err(StoreError::UnknownTask(id.clone()));
        };
        let title = current.title.clone();

        match self.api.delete(id, scope).await {
            Ok(()) => {
                let targets = scope_targets(&self.tasks, id, scope);
                self.tasks.retain(|t| !targets.contains(&t.id));
                info!(%id, removed = targets.len(), "task deleted");
                let msg = match targets.len() {
                    1 => format!("Deleted \"{title}\""),
                    n => format!("Deleted \"{title}\" and {} later instances", n - 1),
                };
                self.notifier.info(msg);
                Ok(targets.len())
            }
            Err(e) => {
                error!("Failed to delete task {}: {}", id, e);
                self.notifier.error(format!("Could not delete \"{title}\": {e}"));
                Err(e.into())
            }
        }
    }

    /// Flips completion of a single instance. Only an open-to-done
    /// transition raises the completion notice.
    pub async fn toggle_completed(&mut self, id: &TaskId) -> Result<Task, StoreError> {
        let was_completed = match self.get(id) {
            Some(task) => task.completed,
            None => {
                self.notifier.error(format!("Task {id} no longer exists"));
                return Err(StoreError::UnknownTask(id.clone()));
            }
        };
        let updated = self
            .update_task(id, TaskUpdate::completed(!was_completed), Scope::ThisInstance)
            .await?;
        if !was_completed && updated.completed {
            self.notifier.push(Notice::Completed {
                title: updated.display_title(),
                xp: updated.xp_reward,
            });
        }
        Ok(updated)
    }
}
