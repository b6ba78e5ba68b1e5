//! Per-agent RPC surface.
//!
//! The coordinator never talks to agents except through [`AgentClient`].
//! Clients are produced by an [`AgentClientFactory`] from the [`Instance`]
//! the provisioner reported, so tests can swap the transport wholesale.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tracing::debug;

use flotilla_core::{AgentStatus, Instance, SlotAction, SlotId, SlotStatus};

use crate::repository::ResolvedAssignment;

#[derive(Debug, Error)]
pub enum AgentClientError {
    #[error("agent unreachable: {0}")]
    Unreachable(String),

    #[error("agent call timed out after {0:?}")]
    Timeout(Duration),

    #[error("agent rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("slot not found on agent: {0}")]
    SlotNotFound(SlotId),

    #[error("invalid agent response: {0}")]
    Decode(String),

    #[error("invalid agent uri '{0}'")]
    InvalidUri(String),
}

pub type AgentClientResult<T> = Result<T, AgentClientError>;

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Current status of the agent and every slot it hosts.
    async fn status(&self) -> AgentClientResult<AgentStatus>;

    /// Create a slot for a resolved assignment. The new slot starts STOPPED.
    async fn create_slot(&self, installation: &ResolvedAssignment) -> AgentClientResult<SlotStatus>;

    async fn change_slot_state(
        &self,
        slot_id: SlotId,
        action: SlotAction,
    ) -> AgentClientResult<SlotStatus>;

    /// Destroy a slot, returning its final status.
    async fn destroy_slot(&self, slot_id: SlotId) -> AgentClientResult<SlotStatus>;
}

pub trait AgentClientFactory: Send + Sync {
    fn client_for(&self, instance: &Instance) -> AgentClientResult<Arc<dyn AgentClient>>;
}

// ── HTTP transport ─────────────────────────────────────────────────

/// Talks JSON over HTTP/1.1 to an agent's `/v1/agent` endpoints.
///
/// One connection per call; agents are polled on the order of seconds, so
/// there is nothing to gain from pooling.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    authority: String,
    base_path: String,
}

impl HttpAgentClient {
    pub fn new(internal_uri: &str) -> AgentClientResult<Self> {
        let uri: Uri = internal_uri
            .parse()
            .map_err(|_| AgentClientError::InvalidUri(internal_uri.to_string()))?;
        if uri.scheme_str() != Some("http") {
            return Err(AgentClientError::InvalidUri(internal_uri.to_string()));
        }
        let host = uri
            .host()
            .ok_or_else(|| AgentClientError::InvalidUri(internal_uri.to_string()))?;
        let port = uri.port_u16().unwrap_or(80);

        Ok(Self {
            authority: format!("{host}:{port}"),
            base_path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<(&'static str, Bytes)>,
    ) -> AgentClientResult<Bytes> {
        let target = format!("{}{path}", self.base_path);

        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| AgentClientError::Unreachable(format!("{}: {e}", self.authority)))?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| AgentClientError::Unreachable(format!("{}: {e}", self.authority)))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "agent connection closed with error");
            }
        });

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(target.as_str())
            .header(HOST, self.authority.as_str())
            .header(USER_AGENT, "flotilla-coordinator/0.1");
        let body = match body {
            Some((content_type, bytes)) => {
                builder = builder.header(CONTENT_TYPE, content_type);
                Full::new(bytes)
            }
            None => Full::new(Bytes::new()),
        };
        let req = builder
            .body(body)
            .map_err(|e| AgentClientError::InvalidUri(format!("{target}: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| AgentClientError::Unreachable(format!("{}: {e}", self.authority)))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| AgentClientError::Unreachable(format!("{}: {e}", self.authority)))?
            .to_bytes();

        debug!(%method, %target, %status, "agent call complete");
        if !status.is_success() {
            return Err(AgentClientError::Rejected {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes)
    }

    async fn slot_call(
        &self,
        slot_id: SlotId,
        method: Method,
        path: &str,
        body: Option<(&'static str, Bytes)>,
    ) -> AgentClientResult<SlotStatus> {
        match self.call(method, path, body).await {
            Err(AgentClientError::Rejected { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(AgentClientError::SlotNotFound(slot_id))
            }
            Err(e) => Err(e),
            Ok(bytes) => decode(&bytes),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> AgentClientResult<T> {
    serde_json::from_slice(bytes).map_err(|e| AgentClientError::Decode(e.to_string()))
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn status(&self) -> AgentClientResult<AgentStatus> {
        let bytes = self.call(Method::GET, "/v1/agent", None).await?;
        decode(&bytes)
    }

    async fn create_slot(&self, installation: &ResolvedAssignment) -> AgentClientResult<SlotStatus> {
        let body = serde_json::to_vec(installation).map_err(|e| AgentClientError::Decode(e.to_string()))?;
        let bytes = self
            .call(
                Method::POST,
                "/v1/agent/slot",
                Some(("application/json", Bytes::from(body))),
            )
            .await?;
        decode(&bytes)
    }

    async fn change_slot_state(
        &self,
        slot_id: SlotId,
        action: SlotAction,
    ) -> AgentClientResult<SlotStatus> {
        self.slot_call(
            slot_id,
            Method::PUT,
            &format!("/v1/agent/slot/{slot_id}/lifecycle"),
            Some(("text/plain", Bytes::from(action.to_string()))),
        )
        .await
    }

    async fn destroy_slot(&self, slot_id: SlotId) -> AgentClientResult<SlotStatus> {
        self.slot_call(slot_id, Method::DELETE, &format!("/v1/agent/slot/{slot_id}"), None)
            .await
    }
}

/// Builds an [`HttpAgentClient`] from each instance's internal URI.
#[derive(Debug, Default, Clone)]
pub struct HttpAgentClientFactory;

impl AgentClientFactory for HttpAgentClientFactory {
    fn client_for(&self, instance: &Instance) -> AgentClientResult<Arc<dyn AgentClient>> {
        Ok(Arc::new(HttpAgentClient::new(&instance.internal_uri)?))
    }
}
