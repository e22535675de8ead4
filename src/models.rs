use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Default XP granted for completing a task.
pub const DEFAULT_XP_REWARD: u32 = 10;

const PROVISIONAL_PREFIX: &str = "temp-";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("xp reward must be positive")]
    ZeroXp,
    #[error("recurring task is missing a frequency")]
    MissingFrequency,
    #[error("recurrence end date {end} is before due date {due}")]
    EndBeforeDue { due: NaiveDate, end: NaiveDate },
    #[error("unknown frequency '{0}' (expected daily, weekly, biweekly or monthly)")]
    UnknownFrequency(String),
    #[error("invalid date '{0}': use YYYY-MM-DD")]
    InvalidDate(String),
    #[error("task {0} is not recurring")]
    NotRecurring(TaskId),
    #[error("task record has no id")]
    MissingId,
}

/// Identifier of a task.
///
/// Ids are assigned by the server. While a create is in flight the client
/// holds a provisional id prefixed with `temp-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a client-side id for a task the server has not confirmed yet.
    pub fn provisional() -> Self {
        Self(format!("{PROVISIONAL_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// Some backends hand out numeric ids.
impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => TaskId(s),
            Raw::Number(n) => TaskId(n.to_string()),
        })
    }
}

/// How often a recurring task repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

impl Frequency {
    /// The `n`-th occurrence counted from `start` (`n = 0` is `start` itself).
    ///
    /// Monthly steps are computed from `start` rather than chained, so a task
    /// anchored on the 31st lands on the last day of short months without
    /// drifting afterwards.
    pub fn nth(self, start: NaiveDate, n: u32) -> Option<NaiveDate> {
        match self {
            Frequency::Daily => start.checked_add_signed(Duration::days(i64::from(n))),
            Frequency::Weekly => start.checked_add_signed(Duration::weeks(i64::from(n))),
            Frequency::Biweekly => start.checked_add_signed(Duration::weeks(2 * i64::from(n))),
            Frequency::Monthly => start.checked_add_months(Months::new(n)),
        }
    }

    /// The occurrence following `date`.
    pub fn advance(self, date: NaiveDate) -> Option<NaiveDate> {
        self.nth(date, 1)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "biweekly" => Ok(Frequency::Biweekly),
            "monthly" => Ok(Frequency::Monthly),
            _ => Err(ModelError::UnknownFrequency(s.to_string())),
        }
    }
}

/// The day a task is scheduled for, with an optional time-of-day.
///
/// Servers send either a bare `YYYY-MM-DD` or a full timestamp. Day-level
/// queries only ever look at [`DueDate::day`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DueDate(NaiveDateTime);

impl DueDate {
    pub fn on(day: NaiveDate) -> Self {
        Self(day.and_time(NaiveTime::MIN))
    }

    pub fn at(when: NaiveDateTime) -> Self {
        Self(when)
    }

    pub fn day(&self) -> NaiveDate {
        self.0.date()
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.0
    }

    /// Same calendar day, ignoring the time component.
    pub fn is_on(&self, day: NaiveDate) -> bool {
        self.day() == day
    }

    /// Moves the due date to another day, keeping the time-of-day.
    pub fn with_day(&self, day: NaiveDate) -> Self {
        Self(day.and_time(self.0.time()))
    }
}

impl From<NaiveDate> for DueDate {
    fn from(day: NaiveDate) -> Self {
        DueDate::on(day)
    }
}

impl fmt::Display for DueDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.time() == NaiveTime::MIN {
            write!(f, "{}", self.0.format("%Y-%m-%d"))
        } else {
            write!(f, "{}", self.0.format("%Y-%m-%dT%H:%M:%S"))
        }
    }
}

impl FromStr for DueDate {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(DueDate::on(day));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(DueDate(dt));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(DueDate(dt.naive_utc()));
        }
        Err(ModelError::InvalidDate(s.to_string()))
    }
}

impl Serialize for DueDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DueDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parses a `YYYY-MM-DD` argument.
pub fn parse_day(s: &str) -> Result<NaiveDate, ModelError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| ModelError::InvalidDate(s.to_string()))
}

/// Recurrence settings requested when creating a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recurrence {
    pub frequency: Frequency,
    /// Last day an instance may fall on. `None` repeats indefinitely.
    pub end_date: Option<NaiveDate>,
}

/// Whether a task stands alone or belongs to a recurrence lineage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Simple,
    Recurring {
        frequency: Frequency,
        end_date: Option<NaiveDate>,
        /// Originating task. Absent on the lineage root itself.
        parent: Option<TaskId>,
    },
}

/// A task as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TaskRecord", into = "TaskRecord")]
pub struct Task {
    /// Unique identifier for the task.
    pub id: TaskId,
    /// Display title. Never empty for tasks created through this crate.
    pub title: String,
    /// Optional longer description.
    pub description: Option<String>,
    /// Whether the task has been completed.
    pub completed: bool,
    /// Day (and optionally time) the task is scheduled for.
    pub due_date: DueDate,
    /// XP granted on completion.
    pub xp_reward: u32,
    /// Marks the task as part of a habit.
    pub is_habit: bool,
    /// Recurrence information.
    pub schedule: Schedule,
}

impl Task {
    pub fn is_recurring(&self) -> bool {
        matches!(self.schedule, Schedule::Recurring { .. })
    }

    pub fn frequency(&self) -> Option<Frequency> {
        match &self.schedule {
            Schedule::Recurring { frequency, .. } => Some(*frequency),
            Schedule::Simple => None,
        }
    }

    pub fn recurring_end_date(&self) -> Option<NaiveDate> {
        match &self.schedule {
            Schedule::Recurring { end_date, .. } => *end_date,
            Schedule::Simple => None,
        }
    }

    pub fn parent_task_id(&self) -> Option<&TaskId> {
        match &self.schedule {
            Schedule::Recurring { parent, .. } => parent.as_ref(),
            Schedule::Simple => None,
        }
    }

    /// A recurring task with no parent reference.
    pub fn is_lineage_root(&self) -> bool {
        matches!(self.schedule, Schedule::Recurring { parent: None, .. })
    }

    /// Key shared by every member of a recurrence lineage: the parent id when
    /// present, the task's own id otherwise. `None` for non-recurring tasks.
    pub fn lineage_key(&self) -> Option<&TaskId> {
        match &self.schedule {
            Schedule::Recurring { parent, .. } => Some(parent.as_ref().unwrap_or(&self.id)),
            Schedule::Simple => None,
        }
    }

    /// Title with a habit suffix, e.g. `Meditate (daily habit)`.
    pub fn display_title(&self) -> String {
        match (self.is_habit, self.frequency()) {
            (true, Some(freq)) => format!("{} ({} habit)", self.title, freq),
            (true, None) => format!("{} (habit)", self.title),
            (false, _) => self.title.clone(),
        }
    }
}

/// Flat wire shape of a task as exchanged with the task API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,
    /// Mongo primary key. Wins over `id` when a server sends both.
    #[serde(default, rename = "_id", skip_serializing)]
    pub mongo_id: Option<TaskId>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub completed: bool,
    pub due_date: DueDate,
    #[serde(default = "default_xp_reward")]
    pub xp_reward: u32,
    #[serde(default)]
    pub is_habit: bool,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_end_date: Option<DueDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<TaskId>,
}

fn default_xp_reward() -> u32 {
    DEFAULT_XP_REWARD
}

impl TryFrom<TaskRecord> for Task {
    type Error = ModelError;

    fn try_from(rec: TaskRecord) -> Result<Self, Self::Error> {
        // frequency and end date mean nothing without isRecurring
        let schedule = if rec.is_recurring {
            Schedule::Recurring {
                frequency: rec.frequency.ok_or(ModelError::MissingFrequency)?,
                end_date: rec.recurring_end_date.map(|d| d.day()),
                parent: rec.parent_task_id,
            }
        } else {
            Schedule::Simple
        };
        Ok(Task {
            id: rec.mongo_id.or(rec.id).ok_or(ModelError::MissingId)?,
            title: rec.title,
            description: rec.description,
            completed: rec.completed,
            due_date: rec.due_date,
            xp_reward: rec.xp_reward,
            is_habit: rec.is_habit,
            schedule,
        })
    }
}

impl From<Task> for TaskRecord {
    fn from(task: Task) -> Self {
        let (is_recurring, frequency, recurring_end_date, parent_task_id) = match task.schedule {
            Schedule::Simple => (false, None, None, None),
            Schedule::Recurring {
                frequency,
                end_date,
                parent,
            } => (true, Some(frequency), end_date.map(DueDate::on), parent),
        };
        TaskRecord {
            id: Some(task.id),
            mongo_id: None,
            title: task.title,
            description: task.description,
            completed: task.completed,
            due_date: task.due_date,
            xp_reward: task.xp_reward,
            is_habit: task.is_habit,
            is_recurring,
            frequency,
            recurring_end_date,
            parent_task_id,
        }
    }
}

/// Data needed to create a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "NewTaskRecord")]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub due_date: DueDate,
    pub xp_reward: u32,
    pub is_habit: bool,
    pub recurrence: Option<Recurrence>,
}

impl NewTask {
    pub fn new(title: impl Into<String>, due_date: impl Into<DueDate>) -> Self {
        Self {
            title: title.into(),
            description: None,
            due_date: due_date.into(),
            xp_reward: DEFAULT_XP_REWARD,
            is_habit: false,
            recurrence: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn xp(mut self, xp_reward: u32) -> Self {
        self.xp_reward = xp_reward;
        self
    }

    pub fn habit(mut self) -> Self {
        self.is_habit = true;
        self
    }

    pub fn recurring(mut self, frequency: Frequency, end_date: Option<NaiveDate>) -> Self {
        self.recurrence = Some(Recurrence {
            frequency,
            end_date,
        });
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.title.trim().is_empty() {
            return Err(ModelError::EmptyTitle);
        }
        if self.xp_reward == 0 {
            return Err(ModelError::ZeroXp);
        }
        if let Some(Recurrence {
            end_date: Some(end), ..
        }) = self.recurrence
        {
            let due = self.due_date.day();
            if end < due {
                return Err(ModelError::EndBeforeDue { due, end });
            }
        }
        Ok(())
    }

    /// The task this request would produce once the server assigns `id`.
    pub fn into_task(self, id: TaskId) -> Task {
        let schedule = match self.recurrence {
            Some(r) => Schedule::Recurring {
                frequency: r.frequency,
                end_date: r.end_date,
                parent: None,
            },
            None => Schedule::Simple,
        };
        Task {
            id,
            title: self.title.trim().to_string(),
            description: self.description,
            completed: false,
            due_date: self.due_date,
            xp_reward: self.xp_reward,
            is_habit: self.is_habit,
            schedule,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewTaskRecord {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    due_date: DueDate,
    xp_reward: u32,
    is_habit: bool,
    is_recurring: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency: Option<Frequency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recurring_end_date: Option<NaiveDate>,
}

impl From<NewTask> for NewTaskRecord {
    fn from(new: NewTask) -> Self {
        NewTaskRecord {
            title: new.title,
            description: new.description,
            due_date: new.due_date,
            xp_reward: new.xp_reward,
            is_habit: new.is_habit,
            is_recurring: new.recurrence.is_some(),
            frequency: new.recurrence.map(|r| r.frequency),
            recurring_end_date: new.recurrence.and_then(|r| r.end_date),
        }
    }
}

/// Partial update of a task. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DueDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xp_reward: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_habit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_end_date: Option<NaiveDate>,
}

impl TaskUpdate {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn touches_recurrence(&self) -> bool {
        self.frequency.is_some() || self.recurring_end_date.is_some()
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if matches!(&self.title, Some(t) if t.trim().is_empty()) {
            return Err(ModelError::EmptyTitle);
        }
        if self.xp_reward == Some(0) {
            return Err(ModelError::ZeroXp);
        }
        Ok(())
    }

    /// [`validate`](Self::validate) plus the checks that need the task being
    /// edited. Recurrence fields only apply to recurring tasks, and a new end
    /// date may not fall before the instance's due date.
    pub fn validate_for(&self, task: &Task) -> Result<(), ModelError> {
        self.validate()?;
        if self.touches_recurrence() && !task.is_recurring() {
            return Err(ModelError::NotRecurring(task.id.clone()));
        }
        if let Some(end) = self.recurring_end_date {
            let due = self.due_date.unwrap_or(task.due_date).day();
            if end < due {
                return Err(ModelError::EndBeforeDue { due, end });
            }
        }
        Ok(())
    }

    /// Fields copied to the other future instances of a lineage. Due date and
    /// completion belong to a single occurrence and never propagate.
    pub fn propagated(&self) -> TaskUpdate {
        TaskUpdate {
            due_date: None,
            completed: None,
            ..self.clone()
        }
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            task.description = Some(description.clone());
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(due) = self.due_date {
            task.due_date = due;
        }
        if let Some(xp) = self.xp_reward {
            task.xp_reward = xp;
        }
        if let Some(habit) = self.is_habit {
            task.is_habit = habit;
        }
        if let Schedule::Recurring {
            frequency,
            end_date,
            ..
        } = &mut task.schedule
        {
            if let Some(f) = self.frequency {
                *frequency = f;
            }
            if let Some(end) = self.recurring_end_date {
                *end_date = Some(end);
            }
        }
    }
}

/// Reach of an update or delete within a recurrence lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    ThisInstance,
    /// The target and every lineage member due on or after it.
    AllFuture,
}

impl Scope {
    pub fn from_flag(all_future: bool) -> Self {
        if all_future {
            Scope::AllFuture
        } else {
            Scope::ThisInstance
        }
    }

    pub fn is_all_future(self) -> bool {
        self == Scope::AllFuture
    }

    pub fn toggled(self) -> Self {
        match self {
            Scope::ThisInstance => Scope::AllFuture,
            Scope::AllFuture => Scope::ThisInstance,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::ThisInstance => f.write_str("this instance only"),
            Scope::AllFuture => f.write_str("this and all future instances"),
        }
    }
}
