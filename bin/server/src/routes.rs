//! Conversation routes.
//!
//! - `POST /conversations` allocates a conversation id
//! - `POST /conversations/{id}/messages` submits a user turn
//! - `POST /conversations/{id}/approval` approves or rejects a pending action
//! - `GET /conversations/{id}` returns the latest committed snapshot

use crate::error::ApiError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use concierge_conversation::{Assistant, DialogStack, Message, ResumePoint};
use concierge_core::{ApprovalId, ConversationId};
use concierge_routing::{Checkpoint, CheckpointStore, Decision, Engine, TurnInput, TurnOutcome};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Builds the conversation router.
pub fn router<S: CheckpointStore + 'static>(engine: Arc<Engine<S>>) -> Router {
    Router::new()
        .route("/conversations", post(create_conversation))
        .route("/conversations/{id}", get(get_conversation::<S>))
        .route("/conversations/{id}/messages", post(post_message::<S>))
        .route("/conversations/{id}/approval", post(post_approval::<S>))
        .with_state(engine)
}

/// Response for a newly allocated conversation.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedConversation {
    pub conversation_id: ConversationId,
}

/// Body of `POST /conversations/{id}/messages`.
#[derive(Debug, Deserialize)]
pub struct PostMessage {
    text: String,
    #[serde(default)]
    user_ref: Option<String>,
}

/// Body of `POST /conversations/{id}/approval`.
#[derive(Debug, Deserialize)]
pub struct PostApproval {
    approved: bool,
    #[serde(default)]
    reason: Option<String>,
    /// The approval being answered, as returned in the suspended outcome.
    #[serde(default)]
    approval_id: Option<ApprovalId>,
}

impl From<PostApproval> for Decision {
    fn from(body: PostApproval) -> Self {
        match (body.approved, body.reason) {
            (true, _) => Decision::Approve,
            (false, Some(reason)) => Decision::Reject { reason },
            (false, None) => Decision::from(false),
        }
    }
}

/// Read-only view of a conversation.
#[derive(Debug, Serialize)]
pub struct ConversationView {
    pub conversation_id: ConversationId,
    pub version: u64,
    pub active_assistant: Assistant,
    pub dialog_stack: DialogStack,
    pub pending_approval: Option<ResumePoint>,
    pub messages: Vec<Message>,
}

impl From<Checkpoint> for ConversationView {
    fn from(checkpoint: Checkpoint) -> Self {
        let state = checkpoint.state;
        Self {
            conversation_id: checkpoint.conversation_id,
            version: checkpoint.version,
            active_assistant: state.active_assistant(),
            dialog_stack: state.dialog_stack().clone(),
            pending_approval: state.pending_resume_point().cloned(),
            messages: state.messages().to_vec(),
        }
    }
}

fn parse_id(raw: &str) -> Result<ConversationId, ApiError> {
    ConversationId::from_str(raw).map_err(|e| ApiError::InvalidId {
        id: raw.to_string(),
        reason: e.reason,
    })
}

async fn create_conversation() -> (StatusCode, Json<CreatedConversation>) {
    let conversation_id = ConversationId::new();
    tracing::info!(%conversation_id, "conversation allocated");
    (
        StatusCode::CREATED,
        Json(CreatedConversation { conversation_id }),
    )
}

async fn get_conversation<S: CheckpointStore + 'static>(
    State(engine): State<Arc<Engine<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationView>, ApiError> {
    let conversation_id = parse_id(&id)?;
    let checkpoint = engine.snapshot(conversation_id).await?;
    Ok(Json(checkpoint.into()))
}

async fn post_message<S: CheckpointStore + 'static>(
    State(engine): State<Arc<Engine<S>>>,
    Path(id): Path<String>,
    Json(body): Json<PostMessage>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let conversation_id = parse_id(&id)?;
    let mut input = TurnInput::new(body.text);
    if let Some(user_ref) = body.user_ref {
        input = input.with_user_ref(user_ref);
    }
    let outcome = engine.submit_turn(conversation_id, input).await?;
    Ok(Json(outcome))
}

async fn post_approval<S: CheckpointStore + 'static>(
    State(engine): State<Arc<Engine<S>>>,
    Path(id): Path<String>,
    Json(body): Json<PostApproval>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let conversation_id = parse_id(&id)?;
    let outcome = match body.approval_id {
        Some(approval_id) => {
            engine
                .resolve_approval(conversation_id, approval_id, body.into())
                .await?
        }
        None => engine.resolve_suspended(conversation_id, body.into()).await?,
    };
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use concierge_conversation::{ResolvedIdentity, ToolCall, ToolError, ToolId};
    use concierge_routing::{
        AssistantError, AssistantRequest, AssistantRunner, IdentityError, IdentityResolver,
        InMemoryCheckpointStore, ToolInvoker, travel_table,
    };
    use serde_json::{Value as JsonValue, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tower::ServiceExt;

    struct Script(Mutex<VecDeque<Message>>);

    #[async_trait]
    impl AssistantRunner for Script {
        async fn run(&self, _request: AssistantRequest<'_>) -> Result<Message, AssistantError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(AssistantError::InvalidResponse {
                    reason: "script exhausted".to_string(),
                })
        }
    }

    #[derive(Default)]
    struct Tools(Mutex<Vec<String>>);

    #[async_trait]
    impl ToolInvoker for Tools {
        async fn invoke(
            &self,
            tool: &ToolId,
            _arguments: &JsonValue,
            _identity: Option<&ResolvedIdentity>,
        ) -> Result<JsonValue, ToolError> {
            self.0.lock().unwrap().push(tool.to_string());
            Ok(json!({"status": "cancelled"}))
        }
    }

    struct Anonymous;

    #[async_trait]
    impl IdentityResolver for Anonymous {
        async fn resolve(&self, user_ref: &str) -> Result<ResolvedIdentity, IdentityError> {
            Err(IdentityError::NotFound {
                user_ref: user_ref.to_string(),
            })
        }
    }

    fn app(replies: Vec<Message>, tools: Arc<Tools>) -> Router {
        let engine = Engine::new(
            travel_table().expect("catalog is consistent"),
            InMemoryCheckpointStore::new(),
            Arc::new(Script(Mutex::new(replies.into()))),
            tools,
            Arc::new(Anonymous),
        );
        router(Arc::new(engine))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: JsonValue) -> (StatusCode, JsonValue) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
        (status, json)
    }

    #[tokio::test]
    async fn message_round_trip() {
        let app = app(vec![Message::assistant("Hello! How can I help?")], Arc::default());

        let (status, created) = send(&app, "POST", "/conversations", JsonValue::Null).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["conversation_id"].as_str().expect("id").to_string();

        let (status, outcome) = send(
            &app,
            "POST",
            &format!("/conversations/{id}/messages"),
            json!({"text": "hi"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["status"], "completed");
        assert_eq!(outcome["reply"], "Hello! How can I help?");

        let (status, view) = send(&app, "GET", &format!("/conversations/{id}"), JsonValue::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["active_assistant"], "primary");
        assert_eq!(view["messages"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn approval_flow_over_http() {
        let tools = Arc::new(Tools::default());
        let app = app(
            vec![
                Message::assistant("").with_tool_call(ToolCall::new(
                    "call_1",
                    "ToFlightBookingAssistant",
                    json!({"request": "cancel"}),
                )),
                Message::assistant("").with_tool_call(ToolCall::new(
                    "call_2",
                    "cancel_ticket",
                    json!({"ticket_no": "7240005432906569"}),
                )),
                Message::assistant("Your ticket is cancelled."),
            ],
            tools.clone(),
        );
        let id = ConversationId::new();

        let (status, outcome) = send(
            &app,
            "POST",
            &format!("/conversations/{id}/messages"),
            json!({"text": "cancel my ticket"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["status"], "suspended");
        assert_eq!(outcome["tool_id"], "cancel_ticket");
        let approval_id = outcome["approval_id"].clone();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/conversations/{id}/messages"),
            json!({"text": "hello?"}),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["retryable"], false);
        assert!(tools.0.lock().unwrap().is_empty());

        let (status, _) = send(
            &app,
            "POST",
            &format!("/conversations/{id}/approval"),
            json!({"approved": true, "approval_id": ApprovalId::new()}),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(tools.0.lock().unwrap().is_empty());

        let (status, outcome) = send(
            &app,
            "POST",
            &format!("/conversations/{id}/approval"),
            json!({"approved": true, "approval_id": approval_id}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["reply"], "Your ticket is cancelled.");
        assert_eq!(*tools.0.lock().unwrap(), vec!["cancel_ticket".to_string()]);
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids() {
        let app = app(Vec::new(), Arc::default());

        let (status, _) = send(
            &app,
            "GET",
            &format!("/conversations/{}", ConversationId::new()),
            JsonValue::Null,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "GET", "/conversations/not-an-id", JsonValue::Null).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn rejection_without_reason_gets_a_default() {
        let decision = Decision::from(PostApproval {
            approved: false,
            reason: None,
            approval_id: None,
        });
        assert!(matches!(decision, Decision::Reject { reason } if !reason.is_empty()));
    }
}
