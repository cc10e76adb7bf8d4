//! Dispatch RPC to the voice-agent runtime.
//!
//! The agent runtime is an external collaborator; the core only hands it a
//! room, a participant identity, a LiveKit token, and an opaque payload.
//! Calls carry the shared secret and a bounded timeout.

use coziyoo_core::{CoreError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub room_name: String,
    pub participant_identity: String,
    pub token: String,
    pub ws_url: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub accepted: bool,
    #[serde(default)]
    pub agent_session_id: Option<String>,
}

#[derive(Clone)]
pub struct AgentDispatchClient {
    http: reqwest::Client,
    base_url: String,
    shared_secret: String,
}

impl AgentDispatchClient {
    pub fn new(base_url: impl Into<String>, shared_secret: impl Into<String>) -> Result<Self, CoreError> {
        let http = reqwest::Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()
            .map_err(|e| CoreError::Config(format!("dispatch client build failed: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            shared_secret: shared_secret.into(),
        })
    }

    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchResponse, CoreError> {
        let url = format!("{}/dispatch", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("x-agent-secret", &self.shared_secret)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                CoreError::domain(
                    ErrorCode::Internal,
                    format!("agent runtime unreachable: {e}"),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            // Provider-qualified code; the body may carry secrets, the
            // status never does.
            return Err(CoreError::domain(
                ErrorCode::Internal,
                format!("AGENT_HTTP_{}", status.as_u16()),
            ));
        }

        let body: DispatchResponse = response.json().await.map_err(|e| {
            CoreError::domain(ErrorCode::Internal, format!("agent runtime bad response: {e}"))
        })?;
        info!(room = %request.room_name, accepted = body.accepted, "agent dispatch");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_request_serializes_the_rpc_contract() {
        let request = DispatchRequest {
            room_name: "order-42".into(),
            participant_identity: "buyer-7".into(),
            token: "tok".into(),
            ws_url: "wss://livekit.example".into(),
            payload: serde_json::json!({ "intent": "order_support" }),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["roomName"], "order-42");
        assert_eq!(value["participantIdentity"], "buyer-7");
        assert_eq!(value["wsUrl"], "wss://livekit.example");
    }

    #[test]
    fn client_builds_with_timeout() {
        let client = AgentDispatchClient::new("http://127.0.0.1:8200", "secret").unwrap();
        assert_eq!(client.base_url, "http://127.0.0.1:8200");
    }
}
