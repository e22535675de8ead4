//! Client for the HabitQuest task REST API.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::{ApiError, ApiResponse, TaskApi};
use crate::config::Config;
use crate::models::{NewTask, Scope, Task, TaskId, TaskUpdate};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody<'a> {
    #[serde(flatten)]
    update: &'a TaskUpdate,
    update_all_instances: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteBody {
    delete_all_instances: bool,
}

/// Task API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTaskApi {
    http: Client,
    base: Url,
    token: Option<String>,
}

impl HttpTaskApi {
    pub fn new(base_url: &str, timeout: Duration, token: Option<String>) -> Result<Self, ApiError> {
        // a trailing slash keeps `join` from dropping the last path segment
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base = Url::parse(&normalized).map_err(|_| ApiError::InvalidUrl(base_url.to_string()))?;
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("habitquest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self { http, base, token })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(
            &config.api_url,
            Duration::from_secs(config.request_timeout_secs),
            config.token.clone(),
        )
    }

    fn tasks_url(&self, date: Option<NaiveDate>) -> Result<Url, ApiError> {
        let mut url = self
            .base
            .join("api/tasks")
            .map_err(|_| ApiError::InvalidUrl(self.base.to_string()))?;
        if let Some(date) = date {
            url.query_pairs_mut()
                .append_pair("date", &date.format("%Y-%m-%d").to_string());
        }
        Ok(url)
    }

    fn task_url(&self, id: &TaskId) -> Result<Url, ApiError> {
        let mut url = self.tasks_url(None)?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base.to_string()))?
            .push(id.as_str());
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<ApiResponse<T>, ApiError> {
        let req = match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        let res = req.send().await.map_err(map_reqwest_error)?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = res.bytes().await.map_err(map_reqwest_error)?;
        decode_envelope(&bytes)
    }

    async fn fetch_list(&self, date: Option<NaiveDate>) -> Result<Vec<Task>, ApiError> {
        let url = self.tasks_url(date)?;
        debug!(%url, "fetching tasks");
        self.send::<Vec<Task>>(self.http.get(url)).await?.into_data()
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn list(&self, date: Option<NaiveDate>) -> Result<Vec<Task>, ApiError> {
        (|| async { self.fetch_list(date).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(500))
                    .with_max_delay(Duration::from_secs(10))
                    .with_max_times(3)
                    .with_jitter(),
            )
            .when(|e: &ApiError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "Task list request failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await
    }

    async fn create(&self, task: &NewTask) -> Result<Task, ApiError> {
        let url = self.tasks_url(None)?;
        self.send::<Task>(self.http.post(url).json(task))
            .await?
            .into_data()
    }

    async fn update(&self, id: &TaskId, update: &TaskUpdate, scope: Scope) -> Result<Task, ApiError> {
        let url = self.task_url(id)?;
        let body = UpdateBody {
            update,
            update_all_instances: scope.is_all_future(),
        };
        self.send::<Task>(self.http.put(url).json(&body))
            .await
            .map_err(|e| not_found_as(e, id))?
            .into_data()
    }

    async fn delete(&self, id: &TaskId, scope: Scope) -> Result<(), ApiError> {
        let mut url = self.task_url(id)?;
        // some deployments drop DELETE bodies, so the flag also rides in the query
        url.query_pairs_mut()
            .append_pair("deleteAllInstances", if scope.is_all_future() { "true" } else { "false" });
        let body = DeleteBody {
            delete_all_instances: scope.is_all_future(),
        };
        self.send::<serde_json::Value>(self.http.delete(url).json(&body))
            .await
            .map_err(|e| not_found_as(e, id))?
            .into_ack()
    }
}

fn decode_envelope<T: DeserializeOwned>(bytes: &[u8]) -> Result<ApiResponse<T>, ApiError> {
    serde_json::from_slice(bytes).map_err(|e| ApiError::Malformed(e.to_string()))
}

fn not_found_as(e: ApiError, id: &TaskId) -> ApiError {
    match e {
        ApiError::Http { status, .. } if status == StatusCode::NOT_FOUND.as_u16() => {
            ApiError::NotFound(id.clone())
        }
        other => other,
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transport(e.to_string())
    }
}
