//! In-process task backend persisted to a JSON file.
//!
//! Implements the server side of the task API contract: ids, recurrence
//! expansion and the scoped update/delete policy.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ApiError, TaskApi};
use crate::lineage::{lineage_members, scope_targets};
use crate::models::{Frequency, NewTask, Schedule, Scope, Task, TaskId, TaskUpdate};

/// Days past today that recurring tasks without an end date are kept
/// expanded through.
pub const DEFAULT_HORIZON_DAYS: u32 = 90;

// Upper bound on instances generated in one go, whatever the end date.
const MAX_INSTANCES: u32 = 1000;

/// How far an open-ended series has been expanded: instances exist for the
/// first `generated` steps after `anchor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Expansion {
    anchor: NaiveDate,
    frequency: Frequency,
    generated: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalState {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    tasks: Vec<Task>,
    /// Open-ended series by lineage key.
    #[serde(default)]
    open_series: BTreeMap<String, Expansion>,
}

impl LocalState {
    fn mint_id(&mut self) -> TaskId {
        self.next_id += 1;
        TaskId::new(self.next_id.to_string())
    }

    /// Extends every open-ended series through `until`. Returns the number
    /// of instances added.
    fn top_up(&mut self, until: NaiveDate) -> usize {
        let keys: Vec<String> = self.open_series.keys().cloned().collect();
        keys.iter().map(|key| self.extend_series(key, until)).sum()
    }

    /// Generates the instances of series `key` due on or before `until`.
    ///
    /// Only steps past the recorded mark are generated, so an instance that
    /// was deleted is never brought back. The newest member serves as the
    /// template. A series that gained an end date or lost all its members is
    /// forgotten.
    fn extend_series(&mut self, key: &str, until: NaiveDate) -> usize {
        let Some(mut mark) = self.open_series.remove(key) else {
            return 0;
        };
        let lineage = TaskId::new(key);
        let members = lineage_members(&self.tasks, &lineage);
        let Some(template) = members.iter().max_by_key(|t| t.due_date).map(|t| (*t).clone()) else {
            return 0;
        };
        let Some(frequency) = template.frequency() else {
            return 0;
        };
        if template.recurring_end_date().is_some() {
            return 0;
        }
        let taken: HashSet<NaiveDate> = members.iter().map(|t| t.due_date.day()).collect();
        if frequency != mark.frequency {
            mark = Expansion {
                anchor: template.due_date.day(),
                frequency,
                generated: 0,
            };
        }

        let mut added = Vec::new();
        while added.len() < MAX_INSTANCES as usize {
            let Some(day) = frequency.nth(mark.anchor, mark.generated + 1) else {
                break;
            };
            if day > until {
                break;
            }
            mark.generated += 1;
            if taken.contains(&day) {
                continue;
            }
            let mut instance = template.clone();
            instance.id = self.mint_id();
            instance.completed = false;
            instance.due_date = template.due_date.with_day(day);
            if let Schedule::Recurring { parent, .. } = &mut instance.schedule {
                *parent = Some(lineage.clone());
            }
            added.push(instance);
        }

        let count = added.len();
        if count > 0 {
            debug!(lineage = key, added = count, through = %until, "extended open-ended series");
        }
        self.tasks.extend(added);
        self.open_series.insert(key.to_string(), mark);
        count
    }
}

/// Task backend living in this process.
#[derive(Debug)]
pub struct LocalTaskApi {
    path: Option<PathBuf>,
    horizon_days: u32,
    /// Fixed "today", `None` for the local calendar day.
    today: Option<NaiveDate>,
    state: Mutex<LocalState>,
}

impl LocalTaskApi {
    /// A backend that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            horizon_days: DEFAULT_HORIZON_DAYS,
            today: None,
            state: Mutex::new(LocalState::default()),
        }
    }

    /// Opens (or starts) the task file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ApiError> {
        let path = path.into();
        let state = load_state(&path)?;
        debug!(path = %path.display(), tasks = state.tasks.len(), "opened local task file");
        Ok(Self {
            path: Some(path),
            horizon_days: DEFAULT_HORIZON_DAYS,
            today: None,
            state: Mutex::new(state),
        })
    }

    pub fn with_horizon(mut self, days: u32) -> Self {
        self.horizon_days = days;
        self
    }

    /// Pins the day open-ended series are expanded from.
    pub fn with_today(mut self, day: NaiveDate) -> Self {
        self.today = Some(day);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Last day open-ended series reach when expanded from `from`.
    fn horizon_end(&self, from: NaiveDate) -> NaiveDate {
        from.checked_add_signed(Duration::days(i64::from(self.horizon_days)))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Copy of every stored task, in storage order.
    pub fn snapshot(&self) -> Result<Vec<Task>, ApiError> {
        Ok(self.lock()?.tasks.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, LocalState>, ApiError> {
        self.state
            .lock()
            .map_err(|_| ApiError::Storage("task state lock poisoned".to_string()))
    }

    fn persist(&self, state: &LocalState) -> Result<(), ApiError> {
        match &self.path {
            Some(path) => save_state(path, state),
            None => Ok(()),
        }
    }
}

/// Days the instances of a bounded `root` fall on, excluding the root's own
/// day. Open-ended roots have none here; they grow through
/// [`LocalState::extend_series`].
fn occurrence_days(root: &Task) -> Vec<NaiveDate> {
    let (Some(frequency), Some(last)) = (root.frequency(), root.recurring_end_date()) else {
        return Vec::new();
    };
    let start = root.due_date.day();

    let mut days = Vec::new();
    for n in 1..=MAX_INSTANCES {
        match frequency.nth(start, n) {
            Some(day) if day <= last => days.push(day),
            _ => break,
        }
    }
    days
}

#[async_trait]
impl TaskApi for LocalTaskApi {
    async fn list(&self, date: Option<NaiveDate>) -> Result<Vec<Task>, ApiError> {
        let mut state = self.lock()?;
        let added = state.top_up(self.horizon_end(self.today()));
        if added > 0 {
            self.persist(&state)?;
        }
        let mut tasks: Vec<Task> = state
            .tasks
            .iter()
            .filter(|t| date.map_or(true, |d| t.due_date.is_on(d)))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.due_date.cmp(&b.due_date));
        Ok(tasks)
    }

    async fn create(&self, new: &NewTask) -> Result<Task, ApiError> {
        new.validate().map_err(|e| ApiError::Rejected(e.to_string()))?;
        let mut state = self.lock()?;

        let root = new.clone().into_task(state.mint_id());
        let days = occurrence_days(&root);
        let mut created = Vec::with_capacity(days.len() + 1);
        created.push(root.clone());
        for day in &days {
            let mut instance = root.clone();
            instance.id = state.mint_id();
            instance.due_date = root.due_date.with_day(*day);
            if let Schedule::Recurring { parent, .. } = &mut instance.schedule {
                *parent = Some(root.id.clone());
            }
            created.push(instance);
        }
        state.tasks.extend(created);
        let mut instances = days.len();
        if let (Some(frequency), None) = (root.frequency(), root.recurring_end_date()) {
            let start = root.due_date.day();
            let mark = Expansion {
                anchor: start,
                frequency,
                generated: 0,
            };
            state.open_series.insert(root.id.to_string(), mark);
            instances = state.extend_series(root.id.as_str(), self.horizon_end(start.max(self.today())));
        }
        self.persist(&state)?;

        info!(id = %root.id, instances, "created task");
        Ok(root)
    }

    async fn update(&self, id: &TaskId, update: &TaskUpdate, scope: Scope) -> Result<Task, ApiError> {
        let mut state = self.lock()?;

        let target = state
            .tasks
            .iter()
            .find(|t| &t.id == id)
            .ok_or_else(|| ApiError::NotFound(id.clone()))?;
        update
            .validate_for(target)
            .map_err(|e| ApiError::Rejected(e.to_string()))?;
        if let (Some(due), Some(key)) = (update.due_date, target.lineage_key()) {
            let clash = lineage_members(&state.tasks, key)
                .into_iter()
                .any(|t| &t.id != id && t.due_date.is_on(due.day()));
            if clash {
                return Err(ApiError::Rejected(format!(
                    "another instance of this task is already due on {}",
                    due.day()
                )));
            }
        }

        let targets = scope_targets(&state.tasks, id, scope);
        let propagated = update.propagated();
        let mut updated = None;
        for task in state.tasks.iter_mut() {
            if &task.id == id {
                update.apply_to(task);
                updated = Some(task.clone());
            } else if targets.contains(&task.id) {
                propagated.apply_to(task);
            }
        }
        self.persist(&state)?;

        info!(%id, affected = targets.len(), all_future = scope.is_all_future(), "updated task");
        updated.ok_or_else(|| ApiError::NotFound(id.clone()))
    }

    async fn delete(&self, id: &TaskId, scope: Scope) -> Result<(), ApiError> {
        let mut state = self.lock()?;
        let targets = scope_targets(&state.tasks, id, scope);
        if targets.is_empty() {
            return Err(ApiError::NotFound(id.clone()));
        }
        if scope.is_all_future() {
            let key = state
                .tasks
                .iter()
                .find(|t| &t.id == id)
                .and_then(|t| t.lineage_key())
                .map(|k| k.to_string());
            if let Some(key) = key {
                if state.open_series.remove(&key).is_some() {
                    debug!(lineage = %key, "open-ended series ended");
                }
            }
        }
        state.tasks.retain(|t| !targets.contains(&t.id));
        self.persist(&state)?;

        info!(%id, removed = targets.len(), all_future = scope.is_all_future(), "deleted task");
        Ok(())
    }
}

/// Loads the task file. A missing file is an empty store.
fn load_state(path: &Path) -> Result<LocalState, ApiError> {
    if !path.exists() {
        return Ok(LocalState::default());
    }
    let mut f = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| storage_error(path, e))?;
    let mut s = String::new();
    f.read_to_string(&mut s).map_err(|e| storage_error(path, e))?;
    if s.trim().is_empty() {
        return Ok(LocalState::default());
    }
    let mut state: LocalState = serde_json::from_str(&s)
        .map_err(|e| ApiError::Storage(format!("{}: {e}", path.display())))?;
    // never reuse an id, even if next_id went missing from the file
    let highest = state
        .tasks
        .iter()
        .filter_map(|t| t.id.as_str().parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    state.next_id = state.next_id.max(highest);
    Ok(state)
}

/// Overwrites the task file with `state`.
fn save_state(path: &Path, state: &LocalState) -> Result<(), ApiError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| storage_error(dir, e))?;
        }
    }
    let s = serde_json::to_string_pretty(state).map_err(|e| ApiError::Storage(e.to_string()))?;
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| storage_error(path, e))?;
    f.write_all(s.as_bytes()).map_err(|e| storage_error(path, e))?;
    Ok(())
}

fn storage_error(path: &Path, e: std::io::Error) -> ApiError {
    ApiError::Storage(format!("{}: {e}", path.display()))
}
