//! The task API seam: everything the store needs from a backend.

pub mod http;
pub mod local;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;

use crate::config::{Backend, Config};
use crate::models::{NewTask, Scope, Task, TaskId, TaskUpdate};

pub use http::HttpTaskApi;
pub use local::LocalTaskApi;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error("invalid api url '{0}'")]
    InvalidUrl(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl ApiError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// Envelope every task endpoint answers with.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Unwraps the payload, treating `success: false` or a missing payload as
    /// a rejection.
    pub fn into_data(self) -> Result<T, ApiError> {
        if !self.success {
            return Err(ApiError::Rejected(
                self.message.unwrap_or_else(|| "server reported failure".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| ApiError::Malformed("response has no data".to_string()))
    }

    /// For endpoints that only acknowledge.
    pub fn into_ack(self) -> Result<(), ApiError> {
        if self.success {
            Ok(())
        } else {
            Err(ApiError::Rejected(
                self.message.unwrap_or_else(|| "server reported failure".to_string()),
            ))
        }
    }
}

/// Remote (or local) task collection.
///
/// Recurrence expansion and the scoped update/delete policy are the
/// implementor's job; callers only forward the [`Scope`].
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// All tasks, or only those due on `date`.
    async fn list(&self, date: Option<NaiveDate>) -> Result<Vec<Task>, ApiError>;
    /// Creates a task. Recurring tasks are expanded into instances.
    async fn create(&self, task: &NewTask) -> Result<Task, ApiError>;
    async fn update(&self, id: &TaskId, update: &TaskUpdate, scope: Scope) -> Result<Task, ApiError>;
    async fn delete(&self, id: &TaskId, scope: Scope) -> Result<(), ApiError>;
}

#[async_trait]
impl<T: TaskApi + ?Sized> TaskApi for Box<T> {
    async fn list(&self, date: Option<NaiveDate>) -> Result<Vec<Task>, ApiError> {
        (**self).list(date).await
    }

    async fn create(&self, task: &NewTask) -> Result<Task, ApiError> {
        (**self).create(task).await
    }

    async fn update(&self, id: &TaskId, update: &TaskUpdate, scope: Scope) -> Result<Task, ApiError> {
        (**self).update(id, update, scope).await
    }

    async fn delete(&self, id: &TaskId, scope: Scope) -> Result<(), ApiError> {
        (**self).delete(id, scope).await
    }
}

/// Builds the backend selected by `config`.
pub fn from_config(config: &Config) -> Result<Box<dyn TaskApi>, ApiError> {
    Ok(match config.backend {
        Backend::Remote => Box::new(HttpTaskApi::from_config(config)?),
        Backend::Local => {
            Box::new(LocalTaskApi::open(config.local_db_path())?.with_horizon(config.expansion_horizon_days))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_envelope_is_rejected() {
        let env: ApiResponse<Vec<Task>> =
            serde_json::from_str(r#"{"success": false, "message": "nope"}"#).unwrap();
        assert!(matches!(env.into_data(), Err(ApiError::Rejected(m)) if m == "nope"));
    }

    #[test]
    fn ack_without_data_is_fine() {
        let env: ApiResponse<serde_json::Value> = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(env.into_ack().is_ok());
    }

    #[test]
    fn retry_only_transient() {
        assert!(ApiError::Timeout.should_retry());
        assert!(ApiError::Http { status: 503, body: String::new() }.should_retry());
        assert!(!ApiError::Http { status: 400, body: String::new() }.should_retry());
        assert!(!ApiError::Rejected("x".into()).should_retry());
    }

    #[tokio::test]
    async fn local_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            db_path: Some(dir.path().join("tasks.json")),
            ..Config::default()
        };
        let api = from_config(&config).unwrap();
        assert!(api.list(None).await.unwrap().is_empty());
    }

    #[test]
    fn remote_backend_rejects_bad_url() {
        let config = Config {
            backend: Backend::Remote,
            api_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(matches!(from_config(&config), Err(ApiError::InvalidUrl(_))));
    }
}
