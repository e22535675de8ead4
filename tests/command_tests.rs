use std::path::{Path, PathBuf};

use habitquest::api::LocalTaskApi;
use habitquest::commands::*;
use habitquest::models::{parse_day, Task, TaskId};
use habitquest::store::{StoreError, TaskStore};

/// Runs `f` against a store backed by a fresh task file in a temp dir.
async fn with_test_db<F, Fut>(f: F)
where
    F: FnOnce(TaskStore<LocalTaskApi>, PathBuf) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("tasks.json");
    let store = TaskStore::new(LocalTaskApi::open(&db_path).unwrap());
    f(store, db_path).await;
}

fn load_tasks(path: &Path) -> Vec<Task> {
    LocalTaskApi::open(path).unwrap().snapshot().unwrap()
}

fn add(title: &str, due: &str) -> AddArgs {
    AddArgs {
        title: title.into(),
        due: due.into(),
        ..AddArgs::default()
    }
}

#[tokio::test]
async fn test_add_and_list() {
    with_test_db(|mut store, path| async move {
        let args = AddArgs {
            description: Some("chapter 3".into()),
            xp: Some(15),
            ..add("Read", "2025-12-01")
        };
        cmd_add(&mut store, args).await.unwrap();
        cmd_list(&mut store, None, true).await.unwrap();

        let tasks = load_tasks(&path);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Read");
        assert_eq!(tasks[0].description.as_deref(), Some("chapter 3"));
        assert_eq!(tasks[0].xp_reward, 15);
    })
    .await;
}

#[tokio::test]
async fn test_complete_task() {
    with_test_db(|mut store, path| async move {
        cmd_add(&mut store, add("Task to complete", "2025-12-01")).await.unwrap();
        let id = load_tasks(&path)[0].id.clone();

        cmd_complete(&mut store, id.clone()).await.unwrap();
        assert!(load_tasks(&path)[0].completed);
        flush_notices(&mut store);

        // completing again reopens
        cmd_complete(&mut store, id).await.unwrap();
        assert!(!load_tasks(&path)[0].completed);
    })
    .await;
}

#[tokio::test]
async fn test_recurrence() {
    with_test_db(|mut store, path| async move {
        let args = AddArgs {
            recur: Some("weekly".into()),
            until: Some("2025-12-29".into()),
            habit: true,
            ..add("Long run", "2025-12-01")
        };
        cmd_add(&mut store, args).await.unwrap();

        let tasks = load_tasks(&path);
        assert_eq!(tasks.len(), 5);
        let root = &tasks[0].id;
        assert!(tasks[1..].iter().all(|t| t.parent_task_id() == Some(root)));
        assert!(tasks.iter().all(|t| t.is_habit));
        cmd_recurring(&mut store).await.unwrap();
    })
    .await;
}

#[tokio::test]
async fn test_edit_all_future() {
    with_test_db(|mut store, path| async move {
        let args = AddArgs {
            recur: Some("daily".into()),
            until: Some("2025-12-03".into()),
            ..add("Stretch", "2025-12-01")
        };
        cmd_add(&mut store, args).await.unwrap();
        let ids: Vec<TaskId> = load_tasks(&path).into_iter().map(|t| t.id).collect();

        let edit = EditArgs {
            title: Some("Yoga".into()),
            all_future: true,
            ..EditArgs::default()
        };
        cmd_edit(&mut store, ids[1].clone(), edit).await.unwrap();

        let titles: Vec<String> = load_tasks(&path).into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["Stretch", "Yoga", "Yoga"]);
    })
    .await;
}

#[tokio::test]
async fn test_edit_rejects_recurrence_on_one_off() {
    with_test_db(|mut store, path| async move {
        cmd_add(&mut store, add("Dentist", "2025-12-01")).await.unwrap();
        let id = load_tasks(&path)[0].id.clone();

        let edit = EditArgs {
            recur: Some("weekly".into()),
            ..EditArgs::default()
        };
        let res = cmd_edit(&mut store, id, edit).await;
        assert!(matches!(res, Err(StoreError::Validation(_))));
        assert_eq!(flush_notices(&mut store), 1);
        assert!(!load_tasks(&path)[0].is_recurring());
    })
    .await;
}

#[tokio::test]
async fn test_remove_all_future() {
    with_test_db(|mut store, path| async move {
        let args = AddArgs {
            recur: Some("daily".into()),
            until: Some("2025-12-05".into()),
            ..add("Journal", "2025-12-01")
        };
        cmd_add(&mut store, args).await.unwrap();
        let third = load_tasks(&path)[2].id.clone();

        cmd_remove(&mut store, third, true, true).await.unwrap();

        let days: Vec<_> = load_tasks(&path).iter().map(|t| t.due_date.day()).collect();
        assert_eq!(days, vec![parse_day("2025-12-01").unwrap(), parse_day("2025-12-02").unwrap()]);
    })
    .await;
}

#[tokio::test]
async fn test_remove_unknown_task() {
    with_test_db(|mut store, _path| async move {
        let res = cmd_remove(&mut store, TaskId::from("404"), false, true).await;
        assert!(matches!(res, Err(StoreError::UnknownTask(_))));
    })
    .await;
}

#[tokio::test]
async fn test_list_by_date() {
    with_test_db(|mut store, _path| async move {
        cmd_add(&mut store, add("Early", "2025-12-01")).await.unwrap();
        cmd_add(&mut store, add("Late", "2025-12-02")).await.unwrap();

        cmd_list(&mut store, Some(parse_day("2025-12-02").unwrap()), false).await.unwrap();
        let titles: Vec<&str> = store.tasks().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Late"]);
    })
    .await;
}
