//! Outbound RPC to workers
//!
//! The master reaches workers over HTTP/JSON for assignment and
//! cancellation. The client is a trait so the dispatcher can be exercised
//! in tests with a stub; the production implementation rides on a shared
//! reqwest client with a bounded per-request timeout.

use std::future::Future;
use std::time::Duration;

use shared::api::{worker_endpoints, AssignAck, AssignTaskRequest, CancelTaskRequest};
use shared::api::headers;
use tracing::debug;

/// Errors from outbound worker calls.
#[derive(Debug, thiserror::Error)]
pub enum WorkerRpcError {
    #[error("request to worker timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("worker returned HTTP status {0}")]
    Status(u16),

    #[error("invalid response body: {0}")]
    InvalidResponse(String),
}

/// The two master-to-worker operations.
pub trait WorkerRpc: Send + Sync {
    /// Offers a task to the worker. The worker answers with an accept or a
    /// refusal; both are valid outcomes, unlike transport errors.
    fn assign_task(
        &self,
        address: &str,
        request: &AssignTaskRequest,
    ) -> impl Future<Output = Result<AssignAck, WorkerRpcError>> + Send;

    /// Asks the worker to stop a running task gracefully. The worker
    /// reports the terminal `cancelled` status through the completion
    /// endpoint afterwards.
    fn cancel_task(
        &self,
        address: &str,
        task_id: &str,
    ) -> impl Future<Output = Result<(), WorkerRpcError>> + Send;
}

/// Production client over reqwest.
pub struct HttpWorkerClient {
    client: reqwest::Client,
    api_key: String,
}

impl HttpWorkerClient {
    /// Builds a client whose every request carries the given timeout.
    pub fn new(timeout: Duration, api_key: String) -> Result<Self, WorkerRpcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkerRpcError::Transport(e.to_string()))?;
        Ok(Self { client, api_key })
    }

    fn classify(error: reqwest::Error) -> WorkerRpcError {
        if error.is_timeout() {
            WorkerRpcError::Timeout
        } else {
            WorkerRpcError::Transport(error.to_string())
        }
    }
}

impl WorkerRpc for HttpWorkerClient {
    async fn assign_task(
        &self,
        address: &str,
        request: &AssignTaskRequest,
    ) -> Result<AssignAck, WorkerRpcError> {
        let url = format!("{}{}", address.trim_end_matches('/'), worker_endpoints::ASSIGN);
        debug!(task_id = %request.task_id, url = %url, "Sending AssignTask");

        let response = self
            .client
            .post(&url)
            .header(headers::API_KEY, &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(Self::classify)?;

        if !response.status().is_success() {
            return Err(WorkerRpcError::Status(response.status().as_u16()));
        }

        response
            .json::<AssignAck>()
            .await
            .map_err(|e| WorkerRpcError::InvalidResponse(e.to_string()))
    }

    async fn cancel_task(&self, address: &str, task_id: &str) -> Result<(), WorkerRpcError> {
        let url = format!("{}{}", address.trim_end_matches('/'), worker_endpoints::CANCEL);
        debug!(task_id = %task_id, url = %url, "Sending CancelTask");

        let response = self
            .client
            .post(&url)
            .header(headers::API_KEY, &self.api_key)
            .json(&CancelTaskRequest {
                task_id: task_id.to_string(),
            })
            .send()
            .await
            .map_err(Self::classify)?;

        if !response.status().is_success() {
            return Err(WorkerRpcError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
