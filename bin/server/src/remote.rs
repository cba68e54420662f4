//! HTTP adapters for the engine's collaborators.
//!
//! - `RemoteAssistant`: `POST {assistant_url}/assistants/run`
//! - `RemoteTools`: `POST {tools_url}/tools/{name}`
//! - `RemoteDirectory`: `POST {identity_url}/travellers/lookup`

use async_trait::async_trait;
use concierge_conversation::{
    Assistant, Message, ResolvedIdentity, ToolDefinition, ToolError, ToolId,
};
use concierge_routing::{
    AssistantError, AssistantRequest, AssistantRunner, IdentityError, IdentityResolver,
    ToolInvoker,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Builds the shared HTTP client.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).build()
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

#[derive(Serialize)]
struct RunRequest<'a> {
    assistant: Assistant,
    label: &'a str,
    messages: &'a [Message],
    tools: &'a [ToolDefinition],
}

/// Runs assistants on a remote model backend.
#[derive(Debug, Clone)]
pub struct RemoteAssistant {
    client: Client,
    base_url: String,
}

impl RemoteAssistant {
    /// Creates an adapter for the backend at `base_url`.
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AssistantRunner for RemoteAssistant {
    #[instrument(skip(self, request), fields(assistant = %request.assistant))]
    async fn run(&self, request: AssistantRequest<'_>) -> Result<Message, AssistantError> {
        let url = endpoint(&self.base_url, "assistants/run");
        let body = RunRequest {
            assistant: request.assistant,
            label: request.label,
            messages: request.state.messages(),
            tools: request.tools,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, endpoint = %url, "assistant backend unreachable");
                AssistantError::Unavailable {
                    reason: e.to_string(),
                }
            })?;

        if !response.status().is_success() {
            return Err(AssistantError::Unavailable {
                reason: format!("backend returned {}", response.status()),
            });
        }

        response
            .json::<Message>()
            .await
            .map_err(|e| AssistantError::InvalidResponse {
                reason: e.to_string(),
            })
    }
}

#[derive(Serialize)]
struct InvokeRequest<'a> {
    arguments: &'a JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity: Option<&'a str>,
}

/// Invokes travel tools on a remote backend.
#[derive(Debug, Clone)]
pub struct RemoteTools {
    client: Client,
    base_url: String,
}

impl RemoteTools {
    /// Creates an adapter for the backend at `base_url`.
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ToolInvoker for RemoteTools {
    #[instrument(skip(self, arguments, identity), fields(tool = %tool))]
    async fn invoke(
        &self,
        tool: &ToolId,
        arguments: &JsonValue,
        identity: Option<&ResolvedIdentity>,
    ) -> Result<JsonValue, ToolError> {
        let name = tool.to_string();
        let url = endpoint(&self.base_url, &format!("tools/{name}"));
        let response = self
            .client
            .post(&url)
            .json(&InvokeRequest {
                arguments,
                identity: identity.map(ResolvedIdentity::as_str),
            })
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("tool succeeded");
            return response
                .json::<JsonValue>()
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    name,
                    reason: format!("invalid response: {e}"),
                });
        }

        let reason = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => ToolError::NotFound { name },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ToolError::MissingIdentity { name },
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                ToolError::InvalidInput { name, reason }
            }
            _ => ToolError::ExecutionFailed { name, reason },
        })
    }
}

#[derive(Deserialize)]
struct TravellerResponse {
    passenger_id: String,
}

/// Looks travellers up in a remote directory.
#[derive(Debug, Clone)]
pub struct RemoteDirectory {
    client: Client,
    base_url: String,
}

impl RemoteDirectory {
    /// Creates an adapter for the directory at `base_url`.
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl IdentityResolver for RemoteDirectory {
    #[instrument(skip(self))]
    async fn resolve(&self, user_ref: &str) -> Result<ResolvedIdentity, IdentityError> {
        let url = endpoint(&self.base_url, "travellers/lookup");
        let response = self
            .client
            .post(&url)
            .json(&json!({"user_ref": user_ref}))
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable {
                reason: e.to_string(),
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(IdentityError::NotFound {
                user_ref: user_ref.to_string(),
            }),
            status if status.is_success() => response
                .json::<TravellerResponse>()
                .await
                .map(|t| ResolvedIdentity::new(t.passenger_id))
                .map_err(|e| IdentityError::Unavailable {
                    reason: format!("invalid response: {e}"),
                }),
            status => Err(IdentityError::Unavailable {
                reason: format!("directory returned {status}"),
            }),
        }
    }
}
