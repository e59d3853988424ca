//! Sends tasks to the remote compute service.
//!
//! A task is identified by the JSON form of `{type, args}`. The dispatcher sends each key at
//! most once while it is in flight or completed, and forgets it again when the call fails so
//! that a later dispatch retries. Failures are logged and turn into a missing result; callers
//! treat `None` as "not ready yet".

use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tabula_lttb::Point;

use crate::history::{DispatchHistory, EvictionPolicy};
use crate::{DispatchError, DownsamplingTaskArgs, RemoteServicesConfig};

/// A kind of task the remote service runs.
pub trait Task {
    /// Path of the task below the service's base URL.
    const TYPE: &'static str;
    type Args: Serialize + Send + Sync;
    type Output: Send;

    /// Validates and converts the response body.
    fn parse_response(body: &[u8]) -> Result<Self::Output, DispatchError>;
}

/// Remote LTTB decimation of a stored table.
#[derive(Debug, Clone, Copy)]
pub struct DownsampleTask;

impl Task for DownsampleTask {
    const TYPE: &'static str = "resources/downsample";
    type Args = DownsamplingTaskArgs;
    type Output = Vec<Vec<Point>>;

    fn parse_response(body: &[u8]) -> Result<Self::Output, DispatchError> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        let first_point = value
            .as_array()
            .and_then(|series| series.first())
            .and_then(serde_json::Value::as_array)
            .and_then(|points| points.first());
        if !first_point.is_some_and(serde_json::Value::is_array) {
            return Err(DispatchError::InvalidResponse(
                "expected array of arrays of points".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|e| DispatchError::InvalidResponse(e.to_string()))
    }
}

#[derive(Serialize)]
struct DispatchRequest<'a, A> {
    #[serde(rename = "type")]
    task_type: &'a str,
    args: &'a A,
}

/// Returns the deduplication key of a task.
pub fn dispatch_key<K: Task>(args: &K::Args) -> Result<String, DispatchError> {
    Ok(serde_json::to_string(&DispatchRequest {
        task_type: K::TYPE,
        args,
    })?)
}

/// Status and body of a transport response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub body: Vec<u8>,
}

/// Posts JSON documents to the remote service.
#[async_trait]
pub trait TaskTransport: Send + Sync {
    async fn post_json(&self, url: &str, body: String) -> Result<TransportResponse, DispatchError>;
}

/// HTTP transport backed by a [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskTransport for ReqwestTransport {
    async fn post_json(&self, url: &str, body: String) -> Result<TransportResponse, DispatchError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(DispatchError::transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(DispatchError::transport)?;

        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body: body.to_vec(),
        })
    }
}

/// Sends tasks and remembers which ones were sent.
pub struct TaskDispatcher<T = ReqwestTransport> {
    config: RemoteServicesConfig,
    transport: T,
    history: DispatchHistory,
}

impl TaskDispatcher<ReqwestTransport> {
    /// Creates a dispatcher that posts over HTTP and keeps completed keys forever.
    pub fn new(config: RemoteServicesConfig) -> Self {
        Self::with_transport(
            config,
            ReqwestTransport::new(),
            DispatchHistory::new(EvictionPolicy::keep_forever()),
        )
    }
}

impl<T: TaskTransport> TaskDispatcher<T> {
    pub fn with_transport(config: RemoteServicesConfig, transport: T, history: DispatchHistory) -> Self {
        Self {
            config,
            transport,
            history,
        }
    }

    pub fn config(&self) -> &RemoteServicesConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn history(&self) -> &DispatchHistory {
        &self.history
    }

    /// Sends a task unless an identical one is in flight or has completed.
    ///
    /// Returns `None` if the task was not sent or if it failed. Failures are logged and evict
    /// the task's key, so a later call with the same arguments sends it again.
    pub async fn dispatch<K: Task>(&self, args: &K::Args) -> Option<K::Output> {
        let url = self.config.task_url(K::TYPE);
        let key = match dispatch_key::<K>(args) {
            Ok(key) => key,
            Err(e) => {
                error!("{e} type={} url={url}", K::TYPE);
                return None;
            }
        };

        trace!("type={} url={url} args={key}", K::TYPE);
        info!("Dispatching task type={} url={url}", K::TYPE);

        if !self.history.try_begin(&key) {
            debug!("Task was already dispatched type={} url={url}", K::TYPE);
            return None;
        }

        match self.send::<K>(&url, args).await {
            Ok(output) => {
                self.history.complete(&key);
                Some(output)
            }
            Err(e) => {
                self.history.fail(&key);
                error!("{e} type={} url={url}", K::TYPE);
                None
            }
        }
    }

    async fn send<K: Task>(&self, url: &str, args: &K::Args) -> Result<K::Output, DispatchError> {
        let body = serde_json::to_string(args)?;
        let response = self.transport.post_json(url, body).await?;

        let status = response.status;
        let reason = &response.status_text;
        if status == 200 {
            info!("Task response received with status {status} ({reason}) type={} url={url}", K::TYPE);
        } else {
            warn!("Task response received with status {status} ({reason}) type={} url={url}", K::TYPE);
        }

        K::parse_response(&response.body)
    }
}

impl<T> std::fmt::Debug for TaskDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("base_url", &self.config.base_url().as_str())
            .field("history", &self.history)
            .finish_non_exhaustive()
    }
}
