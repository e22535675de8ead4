use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use pretty_assertions::assert_eq;

use habitquest::api::{ApiError, LocalTaskApi, TaskApi};
use habitquest::lineage::check_lineages;
use habitquest::models::{parse_day, DueDate, Frequency, ModelError, NewTask, Scope, Task, TaskId, TaskRecord, TaskUpdate};
use habitquest::notify::Notice;
use habitquest::store::{LoadState, StoreError, TaskStore};

fn day(s: &str) -> NaiveDate {
    parse_day(s).unwrap()
}

/// Lists `tasks` but refuses every mutation.
struct FailingApi {
    tasks: Vec<Task>,
}

#[async_trait]
impl TaskApi for FailingApi {
    async fn list(&self, _date: Option<NaiveDate>) -> Result<Vec<Task>, ApiError> {
        Ok(self.tasks.clone())
    }

    async fn create(&self, _task: &NewTask) -> Result<Task, ApiError> {
        Err(ApiError::Transport("connection refused".into()))
    }

    async fn update(&self, _id: &TaskId, _update: &TaskUpdate, _scope: Scope) -> Result<Task, ApiError> {
        Err(ApiError::Http {
            status: 500,
            body: "boom".into(),
        })
    }

    async fn delete(&self, _id: &TaskId, _scope: Scope) -> Result<(), ApiError> {
        Err(ApiError::Timeout)
    }
}

/// A store over the in-memory backend holding a daily series on three
/// consecutive days.
async fn three_day_series(title: &str) -> (TaskStore<LocalTaskApi>, [TaskId; 3]) {
    let mut store = TaskStore::new(LocalTaskApi::in_memory());
    store
        .add_task(NewTask::new(title, day("2024-03-01")).recurring(Frequency::Daily, Some(day("2024-03-03"))))
        .await
        .unwrap();
    store.fetch_tasks(None).await.unwrap();
    let ids: Vec<TaskId> = store.tasks().iter().map(|t| t.id.clone()).collect();
    assert_eq!(ids.len(), 3);
    (store, [ids[0].clone(), ids[1].clone(), ids[2].clone()])
}

fn errors(store: &TaskStore<impl TaskApi>) -> usize {
    store.notifier().len()
}

#[tokio::test]
async fn failed_create_rolls_back() {
    let mut store = TaskStore::new(FailingApi { tasks: vec![] });
    let res = store.add_task(NewTask::new("Walk", day("2024-03-01"))).await;

    assert!(matches!(res, Err(StoreError::Api(ApiError::Transport(_)))));
    assert!(store.tasks().is_empty());
    assert!(store.notifier().latest().unwrap().notice.is_error());
}

#[tokio::test]
async fn created_task_replaces_provisional_entry() {
    let mut store = TaskStore::new(LocalTaskApi::in_memory());
    let created = store.add_task(NewTask::new("Walk", day("2024-03-01"))).await.unwrap();

    assert_eq!(store.tasks().len(), 1);
    assert_eq!(store.tasks()[0].id, created.id);
    assert!(!created.id.is_provisional());
}

#[tokio::test]
async fn invalid_task_is_never_sent() {
    let mut store = TaskStore::new(FailingApi { tasks: vec![] });
    let res = store.add_task(NewTask::new("   ", day("2024-03-01"))).await;

    assert!(matches!(res, Err(StoreError::Validation(_))));
    assert!(store.tasks().is_empty());
    assert_eq!(errors(&store), 1);
}

#[tokio::test]
async fn delete_all_future_keeps_earlier_instances() {
    let (mut store, [d1, d2, d3]) = three_day_series("Stretch").await;

    let removed = store.remove_task(&d2, Scope::AllFuture).await.unwrap();
    assert_eq!(removed, 2);

    let left: Vec<&TaskId> = store.tasks().iter().map(|t| &t.id).collect();
    assert_eq!(left, vec![&d1]);
    let server: Vec<TaskId> = store.api().snapshot().unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(server, vec![d1]);
    assert!(store.get(&d3).is_none());
}

#[tokio::test]
async fn delete_single_instance_leaves_siblings() {
    let (mut store, [d1, d2, d3]) = three_day_series("Stretch").await;

    assert_eq!(store.remove_task(&d2, Scope::ThisInstance).await.unwrap(), 1);
    let left: Vec<&TaskId> = store.tasks().iter().map(|t| &t.id).collect();
    assert_eq!(left, vec![&d1, &d3]);
    assert_eq!(
        store.notifier().latest().unwrap().notice,
        Notice::Info("Deleted \"Stretch\"".into())
    );
}

#[tokio::test]
async fn update_all_future_leaves_earlier_instances_alone() {
    let (mut store, [d1, d2, d3]) = three_day_series("Stretch").await;

    store
        .update_task(&d2, TaskUpdate::title("Yoga"), Scope::AllFuture)
        .await
        .unwrap();

    let title = |id: &TaskId| store.get(id).unwrap().title.clone();
    assert_eq!(title(&d1), "Stretch");
    assert_eq!(title(&d2), "Yoga");
    assert_eq!(title(&d3), "Yoga");

    // local mirror agrees with the backend
    store.fetch_tasks(None).await.unwrap();
    assert_eq!(store.get(&d1).unwrap().title, "Stretch");
    assert_eq!(store.get(&d3).unwrap().title, "Yoga");
}

#[tokio::test]
async fn update_this_instance_only() {
    let (mut store, [d1, d2, d3]) = three_day_series("Stretch").await;

    let updated = store
        .update_task(&d2, TaskUpdate::title("Rest day"), Scope::ThisInstance)
        .await
        .unwrap();
    assert_eq!(updated.title, "Rest day");
    assert_eq!(store.get(&d1).unwrap().title, "Stretch");
    assert_eq!(store.get(&d3).unwrap().title, "Stretch");
}

#[tokio::test]
async fn all_future_update_does_not_move_due_dates() {
    let (mut store, [_, d2, d3]) = three_day_series("Stretch").await;
    let update = TaskUpdate {
        due_date: Some(DueDate::on(day("2024-03-10"))),
        xp_reward: Some(30),
        ..TaskUpdate::default()
    };

    store.update_task(&d2, update, Scope::AllFuture).await.unwrap();

    let third = store.get(&d3).unwrap();
    assert!(third.due_date.is_on(day("2024-03-03")));
    assert_eq!(third.xp_reward, 30);
    assert!(store.get(&d2).unwrap().due_date.is_on(day("2024-03-10")));
}

#[tokio::test]
async fn tasks_for_date_ignore_time_of_day() {
    let mut store = TaskStore::new(LocalTaskApi::in_memory());
    let evening = day("2024-03-01").and_hms_opt(18, 30, 0).unwrap();
    store.add_task(NewTask::new("Call mum", DueDate::at(evening))).await.unwrap();
    store.add_task(NewTask::new("Shop", day("2024-03-01"))).await.unwrap();
    store.add_task(NewTask::new("Dentist", day("2024-03-02"))).await.unwrap();

    let titles: Vec<&str> = store
        .get_tasks_for_date(day("2024-03-01"))
        .into_iter()
        .map(|t| t.title.as_str())
        .collect();
    assert_eq!(titles, vec!["Shop", "Call mum"]);
    assert!(store.get_tasks_for_date(day("2024-03-03")).is_empty());
}

#[tokio::test]
async fn daily_habit_has_one_instance_per_day() {
    let mut store = TaskStore::new(LocalTaskApi::in_memory().with_today(day("2024-03-01")));
    let root = store
        .add_task(NewTask::new("Meditate", day("2024-03-01")).habit().recurring(Frequency::Daily, None))
        .await
        .unwrap();

    store.fetch_tasks(Some(day("2024-03-02"))).await.unwrap();
    let today = store.get_tasks_for_date(day("2024-03-02"));
    assert_eq!(today.len(), 1);
    assert_eq!(today[0].parent_task_id(), Some(&root.id));
    assert_eq!(today[0].display_title(), "Meditate (daily habit)");
}

#[tokio::test]
async fn created_series_has_no_duplicate_days() {
    let mut store = TaskStore::new(LocalTaskApi::in_memory());
    store
        .add_task(NewTask::new("Water plants", day("2024-01-31")).recurring(Frequency::Monthly, Some(day("2024-12-31"))))
        .await
        .unwrap();

    assert_eq!(store.tasks().len(), 12);
    assert!(check_lineages(store.tasks()).is_empty());
    assert_eq!(store.recurring_groups().len(), 1);
}

#[tokio::test]
async fn moving_instance_onto_sibling_day_is_rejected() {
    let (mut store, [d1, d2, _]) = three_day_series("Stretch").await;
    let before = store.tasks().to_vec();
    let update = TaskUpdate {
        due_date: Some(DueDate::on(day("2024-03-01"))),
        ..TaskUpdate::default()
    };

    let res = store.update_task(&d2, update, Scope::ThisInstance).await;
    assert!(matches!(res, Err(StoreError::Api(ApiError::Rejected(_)))));
    assert_eq!(store.tasks(), before.as_slice());
    assert!(store.get(&d1).unwrap().due_date.is_on(day("2024-03-01")));
}

#[tokio::test]
async fn completion_notice_fires_once() {
    let mut store = TaskStore::new(LocalTaskApi::in_memory());
    let task = store.add_task(NewTask::new("Read", day("2024-03-01")).xp(25)).await.unwrap();

    let done = store.toggle_completed(&task.id).await.unwrap();
    assert!(done.completed);
    let reopened = store.toggle_completed(&task.id).await.unwrap();
    assert!(!reopened.completed);

    let completions: Vec<Notice> = store
        .notifier_mut()
        .drain()
        .into_iter()
        .filter(|n| matches!(n, Notice::Completed { .. }))
        .collect();
    assert_eq!(
        completions,
        vec![Notice::Completed {
            title: "Read".into(),
            xp: 25
        }]
    );
}

#[tokio::test]
async fn failed_mutations_leave_state_untouched() {
    let (seeded, [d1, d2, _]) = three_day_series("Stretch").await;
    let tasks = seeded.tasks().to_vec();
    let mut store = TaskStore::new(FailingApi { tasks: tasks.clone() });
    store.fetch_tasks(None).await.unwrap();

    let res = store.update_task(&d2, TaskUpdate::title("Yoga"), Scope::AllFuture).await;
    assert!(matches!(res, Err(StoreError::Api(_))));
    let res = store.remove_task(&d1, Scope::AllFuture).await;
    assert!(matches!(res, Err(StoreError::Api(ApiError::Timeout))));
    let res = store.toggle_completed(&d1).await;
    assert!(res.is_err());

    assert_eq!(store.tasks(), tasks.as_slice());
    assert_eq!(errors(&store), 3);
    assert!(store.notifier_mut().drain().iter().all(Notice::is_error));
}

#[tokio::test]
async fn unknown_task_is_reported() {
    let mut store = TaskStore::new(LocalTaskApi::in_memory());
    let res = store.remove_task(&TaskId::from("42"), Scope::ThisInstance).await;
    assert!(matches!(res, Err(StoreError::UnknownTask(_))));
    assert_eq!(errors(&store), 1);
}

#[tokio::test]
async fn fetch_failure_keeps_cached_tasks() {
    struct Offline;

    #[async_trait]
    impl TaskApi for Offline {
        async fn list(&self, _date: Option<NaiveDate>) -> Result<Vec<Task>, ApiError> {
            Err(ApiError::Timeout)
        }
        async fn create(&self, _task: &NewTask) -> Result<Task, ApiError> {
            Err(ApiError::Timeout)
        }
        async fn update(&self, _id: &TaskId, _u: &TaskUpdate, _s: Scope) -> Result<Task, ApiError> {
            Err(ApiError::Timeout)
        }
        async fn delete(&self, _id: &TaskId, _s: Scope) -> Result<(), ApiError> {
            Err(ApiError::Timeout)
        }
    }

    let mut store = TaskStore::new(Offline);
    assert_eq!(store.load_state(), LoadState::Loading);
    assert!(store.fetch_tasks(None).await.is_err());
    assert!(!store.has_loaded());
    assert_eq!(store.load_state(), LoadState::Failed);
    assert!(store.notifier().latest().unwrap().notice.is_error());
}

/// Local backend whose `list` fails while `online` is false.
struct Flaky {
    online: AtomicBool,
    inner: LocalTaskApi,
}

#[async_trait]
impl TaskApi for Flaky {
    async fn list(&self, date: Option<NaiveDate>) -> Result<Vec<Task>, ApiError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(ApiError::Timeout);
        }
        self.inner.list(date).await
    }
    async fn create(&self, task: &NewTask) -> Result<Task, ApiError> {
        self.inner.create(task).await
    }
    async fn update(&self, id: &TaskId, update: &TaskUpdate, scope: Scope) -> Result<Task, ApiError> {
        self.inner.update(id, update, scope).await
    }
    async fn delete(&self, id: &TaskId, scope: Scope) -> Result<(), ApiError> {
        self.inner.delete(id, scope).await
    }
}

#[tokio::test]
async fn retry_after_failed_first_load() {
    let mut store = TaskStore::new(Flaky {
        online: AtomicBool::new(false),
        inner: LocalTaskApi::in_memory(),
    });
    assert!(store.fetch_tasks(None).await.is_err());
    assert_eq!(store.load_state(), LoadState::Failed);

    store.api().online.store(true, Ordering::SeqCst);
    store.fetch_tasks(None).await.unwrap();
    assert_eq!(store.load_state(), LoadState::Loaded);

    // later failures keep showing the cached tasks
    store.api().online.store(false, Ordering::SeqCst);
    assert!(store.fetch_tasks(None).await.is_err());
    assert_eq!(store.load_state(), LoadState::Loaded);
}

#[tokio::test]
async fn end_date_before_instance_is_rejected_locally() {
    let (mut store, [_, d2, _]) = three_day_series("Stretch").await;
    let before = store.tasks().to_vec();
    let update = TaskUpdate {
        recurring_end_date: Some(day("2024-03-01")),
        ..TaskUpdate::default()
    };

    let res = store.update_task(&d2, update, Scope::AllFuture).await;
    assert!(matches!(
        res,
        Err(StoreError::Validation(ModelError::EndBeforeDue { .. }))
    ));
    assert_eq!(store.tasks(), before.as_slice());
    assert_eq!(errors(&store), 1);
}

#[test]
fn flat_records_without_recurrence_flag_are_one_off() {
    let rec: TaskRecord = serde_json::from_value(serde_json::json!({
        "_id": "7",
        "title": "Taxes",
        "dueDate": "2024-04-15",
        "isRecurring": false,
        "frequency": "monthly",
        "recurringEndDate": "2024-12-31"
    }))
    .unwrap();
    let task = Task::try_from(rec).unwrap();

    assert!(!task.is_recurring());
    assert_eq!(task.frequency(), None);
    assert_eq!(task.recurring_end_date(), None);
    assert_eq!(task.xp_reward, 10);
}
