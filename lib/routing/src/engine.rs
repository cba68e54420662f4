//! The turn driver.
//!
//! The engine runs one conversation step at a time: execute the node under
//! the cursor, route its outcome, commit a checkpoint. A turn is a loop of
//! steps that ends at `Terminal` or halts at `AwaitingApproval`. Only
//! [`Engine::resolve_suspended`] can move a halted conversation forward.
//!
//! A per-process lease rejects a second turn for the same conversation, and
//! the store's version check rejects a second writer across processes.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::contract::{AssistantRequest, AssistantRunner, IdentityResolver, ToolInvoker};
use crate::error::{CheckpointError, IdentityError, TurnError};
use crate::router::{Node, route};
use crate::table::RoutingTable;
use chrono::Utc;
use concierge_conversation::{
    Assistant, ConversationState, Message, ResumePoint, ToolCall, ToolId, ToolTier,
    deny_tool_call, enter_specialist, leave_specialist,
};
use concierge_core::{ApprovalId, ConversationId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default bound on steps in a single turn.
pub const DEFAULT_MAX_STEPS_PER_TURN: usize = 25;

/// What to do when the traveller's identity cannot be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityPolicy {
    /// Abort the turn before anything is committed.
    #[default]
    Required,
    /// Continue unauthenticated and retry on the next turn.
    Optional,
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pending approvals older than this are rejected instead of approved.
    /// `None` keeps them open indefinitely.
    pub approval_timeout: Option<Duration>,
    /// Behaviour when a supplied user reference cannot be resolved.
    pub identity_policy: IdentityPolicy,
    /// Steps allowed in one turn before it fails with `StepLimitExceeded`.
    pub max_steps_per_turn: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            approval_timeout: None,
            identity_policy: IdentityPolicy::default(),
            max_steps_per_turn: DEFAULT_MAX_STEPS_PER_TURN,
        }
    }
}

/// A user message plus the optional external reference used to identify
/// the traveller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnInput {
    pub text: String,
    pub user_ref: Option<String>,
}

impl TurnInput {
    /// Creates an input with no user reference.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user_ref: None,
        }
    }

    /// Attaches the external user reference.
    #[must_use]
    pub fn with_user_ref(mut self, user_ref: impl Into<String>) -> Self {
        self.user_ref = Some(user_ref.into());
        self
    }
}

impl From<&str> for TurnInput {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for TurnInput {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The active assistant replied.
    Completed { reply: String },
    /// A sensitive tool awaits approval.
    Suspended {
        approval_id: ApprovalId,
        assistant: Assistant,
        tool_id: ToolId,
        arguments: JsonValue,
    },
}

/// The traveller's answer to a pending sensitive action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Run the pending tool and continue.
    Approve,
    /// Answer the pending call with a denial; the tool never runs.
    Reject { reason: String },
}

impl From<bool> for Decision {
    fn from(approved: bool) -> Self {
        if approved {
            Self::Approve
        } else {
            Self::Reject {
                reason: "no reason given".to_string(),
            }
        }
    }
}

type InFlight = Arc<Mutex<HashSet<ConversationId>>>;

/// Marks a conversation as having a turn in flight until dropped.
struct TurnLease {
    in_flight: InFlight,
    conversation_id: ConversationId,
}

impl Drop for TurnLease {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.conversation_id);
    }
}

/// Drives conversations through the dialog state machine.
pub struct Engine<S> {
    table: Arc<RoutingTable>,
    store: S,
    runner: Arc<dyn AssistantRunner>,
    tools: Arc<dyn ToolInvoker>,
    identity: Arc<dyn IdentityResolver>,
    config: EngineConfig,
    in_flight: InFlight,
}

impl<S: CheckpointStore> Engine<S> {
    /// Creates an engine with the default configuration.
    #[must_use]
    pub fn new(
        table: RoutingTable,
        store: S,
        runner: Arc<dyn AssistantRunner>,
        tools: Arc<dyn ToolInvoker>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            table: Arc::new(table),
            store,
            runner,
            tools,
            identity,
            config: EngineConfig::default(),
            in_flight: Arc::default(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the routing table.
    #[must_use]
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Processes a user message.
    ///
    /// # Errors
    ///
    /// - `TurnError::ConcurrentTurn` if a turn for this conversation is in flight
    /// - `TurnError::AwaitingApproval` if a sensitive action awaits a decision
    /// - `TurnError::IdentityUnavailable` if the traveller cannot be resolved
    ///   and the policy requires it
    /// - `TurnError::Routing` if an assistant asked for something no transition
    ///   allows; the turn is aborted at the last committed checkpoint
    /// - `TurnError::Persistence` / `TurnError::Assistant` if a collaborator failed
    #[instrument(skip(self, input), fields(conversation_id = %conversation_id))]
    pub async fn submit_turn(
        &self,
        conversation_id: ConversationId,
        input: impl Into<TurnInput> + Send,
    ) -> concierge_core::Result<TurnOutcome, TurnError> {
        let input = input.into();
        let _lease = self.lease(conversation_id)?;

        let mut checkpoint = self
            .store
            .load(&conversation_id)
            .await
            .map_err(TurnError::from)?
            .unwrap_or_else(|| Checkpoint::initial(ConversationState::new(conversation_id)));

        if let Some(resume_point) = checkpoint.state.pending_resume_point() {
            if !self.is_expired(resume_point) {
                return Err(TurnError::AwaitingApproval {
                    conversation_id,
                    approval_id: resume_point.approval_id,
                }
                .into());
            }
            self.reject_pending(&mut checkpoint, "The approval request expired.");
        }

        if let Some(user_ref) = input.user_ref.as_deref() {
            self.resolve_identity(&mut checkpoint.state, user_ref).await?;
        }

        self.settle_interrupted(&mut checkpoint).await;

        checkpoint.state.append(Message::user(input.text));
        checkpoint.cursor = Node::Assistant {
            assistant: checkpoint.state.active_assistant(),
        };
        self.commit(&mut checkpoint).await?;
        info!(assistant = %checkpoint.state.active_assistant(), "turn started");

        Ok(self.drive(&mut checkpoint).await?)
    }

    /// Continues a suspended conversation with the traveller's decision.
    ///
    /// An approval that arrives after `approval_timeout` is treated as a
    /// rejection.
    ///
    /// # Errors
    ///
    /// - `TurnError::NotFound` if the conversation has no checkpoint
    /// - `TurnError::NotSuspended` if nothing awaits a decision
    /// - any error [`Engine::submit_turn`] can return while driving
    pub async fn resolve_suspended(
        &self,
        conversation_id: ConversationId,
        decision: Decision,
    ) -> concierge_core::Result<TurnOutcome, TurnError> {
        self.resolve(conversation_id, None, decision).await
    }

    /// Continues a suspended conversation only if `approval_id` is the
    /// approval currently pending.
    ///
    /// A decision that names an earlier approval is refused, so a retried
    /// request cannot approve an action the traveller has not seen.
    ///
    /// # Errors
    ///
    /// - `TurnError::NotSuspended` if nothing awaits a decision or a different
    ///   approval is pending
    /// - any error [`Engine::resolve_suspended`] can return
    pub async fn resolve_approval(
        &self,
        conversation_id: ConversationId,
        approval_id: ApprovalId,
        decision: Decision,
    ) -> concierge_core::Result<TurnOutcome, TurnError> {
        self.resolve(conversation_id, Some(approval_id), decision).await
    }

    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    async fn resolve(
        &self,
        conversation_id: ConversationId,
        approval_id: Option<ApprovalId>,
        decision: Decision,
    ) -> concierge_core::Result<TurnOutcome, TurnError> {
        let _lease = self.lease(conversation_id)?;

        let mut checkpoint = self
            .store
            .load(&conversation_id)
            .await
            .map_err(TurnError::from)?
            .ok_or(TurnError::NotFound { conversation_id })?;

        let Some(resume_point) = checkpoint.state.pending_resume_point() else {
            return Err(TurnError::NotSuspended { conversation_id }.into());
        };
        if let Some(approval_id) = approval_id
            && approval_id != resume_point.approval_id
        {
            warn!(%approval_id, pending = %resume_point.approval_id, "decision for a stale approval");
            return Err(TurnError::NotSuspended { conversation_id }.into());
        }

        let decision = if self.is_expired(resume_point) {
            warn!(approval_id = %resume_point.approval_id, "approval expired, rejecting");
            Decision::Reject {
                reason: "The approval request expired.".to_string(),
            }
        } else {
            decision
        };

        match decision {
            Decision::Approve => {
                if let Some(resume_point) = checkpoint.state.take_resume_point() {
                    info!(tool = %resume_point.tool_id, "sensitive tool approved");
                    checkpoint.cursor = Node::Tool {
                        assistant: resume_point.assistant,
                        call: ToolCall::new(
                            resume_point.correlation_id,
                            resume_point.tool_id.as_str(),
                            resume_point.arguments,
                        ),
                    };
                }
            }
            Decision::Reject { reason } => self.reject_pending(&mut checkpoint, &reason),
        }

        self.commit(&mut checkpoint).await?;
        Ok(self.drive(&mut checkpoint).await?)
    }

    /// Approves the pending sensitive action.
    ///
    /// # Errors
    ///
    /// See [`Engine::resolve_suspended`].
    pub async fn approve(
        &self,
        conversation_id: ConversationId,
    ) -> concierge_core::Result<TurnOutcome, TurnError> {
        self.resolve_suspended(conversation_id, Decision::Approve)
            .await
    }

    /// Rejects the pending sensitive action; the tool is never invoked.
    ///
    /// # Errors
    ///
    /// See [`Engine::resolve_suspended`].
    pub async fn reject(
        &self,
        conversation_id: ConversationId,
        reason: impl Into<String> + Send,
    ) -> concierge_core::Result<TurnOutcome, TurnError> {
        let reason = reason.into();
        self.resolve_suspended(conversation_id, Decision::Reject { reason })
            .await
    }

    /// Returns the latest committed checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `TurnError::NotFound` for an unknown conversation.
    pub async fn snapshot(
        &self,
        conversation_id: ConversationId,
    ) -> concierge_core::Result<Checkpoint, TurnError> {
        let checkpoint = self
            .store
            .load(&conversation_id)
            .await
            .map_err(TurnError::from)?
            .ok_or(TurnError::NotFound { conversation_id })?;
        Ok(checkpoint)
    }

    fn lease(&self, conversation_id: ConversationId) -> Result<TurnLease, TurnError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(conversation_id) {
            warn!(%conversation_id, "rejecting concurrent turn");
            return Err(TurnError::ConcurrentTurn { conversation_id });
        }
        Ok(TurnLease {
            in_flight: Arc::clone(&self.in_flight),
            conversation_id,
        })
    }

    fn is_expired(&self, resume_point: &ResumePoint) -> bool {
        let Some(timeout) = self.config.approval_timeout else {
            return false;
        };
        (Utc::now() - resume_point.suspended_at)
            .to_std()
            .is_ok_and(|elapsed| elapsed >= timeout)
    }

    fn reject_pending(&self, checkpoint: &mut Checkpoint, reason: &str) {
        let Some(resume_point) = checkpoint.state.take_resume_point() else {
            return;
        };
        info!(tool = %resume_point.tool_id, reason, "sensitive tool rejected");
        deny_tool_call(&mut checkpoint.state, &resume_point.correlation_id, reason);
        checkpoint.cursor = Node::Assistant {
            assistant: resume_point.assistant,
        };
    }

    async fn resolve_identity(
        &self,
        state: &mut ConversationState,
        user_ref: &str,
    ) -> Result<(), TurnError> {
        if state.resolved_identity().is_some() {
            return Ok(());
        }

        match self.identity.resolve(user_ref).await {
            Ok(identity) => {
                debug!(%identity, "traveller identified");
                state.resolve_identity(identity);
                Ok(())
            }
            Err(e) => match self.config.identity_policy {
                IdentityPolicy::Required => {
                    warn!(error = %e, "identity resolution failed, aborting turn");
                    Err(TurnError::IdentityUnavailable {
                        reason: e.to_string(),
                    })
                }
                IdentityPolicy::Optional => {
                    if !matches!(e, IdentityError::NotFound { .. }) {
                        warn!(error = %e, "identity resolution failed, continuing");
                    }
                    Ok(())
                }
            },
        }
    }

    /// Finishes whatever the previous turn left under the cursor.
    ///
    /// Handoffs are replayed (they are idempotent) and safe tools re-run. A
    /// sensitive tool is never re-run: its call is answered with an
    /// outcome-unknown error so the assistant can verify before retrying.
    async fn settle_interrupted(&self, checkpoint: &mut Checkpoint) {
        let cursor = std::mem::replace(&mut checkpoint.cursor, Node::Terminal);
        match cursor {
            Node::Terminal | Node::Assistant { .. } | Node::AwaitingApproval { .. } => {}
            Node::EnteringAssistant { .. } | Node::LeavingAssistant { .. } => {
                debug!("replaying interrupted handoff");
                self.apply(checkpoint, cursor).await;
            }
            Node::Tool { assistant, call } => {
                if checkpoint.state.has_result_for(&call.id) {
                    return;
                }
                let tool = ToolId::new(call.name.clone());
                if self.table.classify(assistant, &tool) == Some(ToolTier::Safe) {
                    debug!(%tool, "re-running interrupted safe tool");
                    self.apply(checkpoint, Node::Tool { assistant, call }).await;
                } else {
                    warn!(%tool, "interrupted sensitive tool left unconfirmed");
                    checkpoint.state.append(Message::tool_error(
                        call.id,
                        format!(
                            "The previous request was interrupted while running {tool}. \
                             Its outcome is unknown; check before trying again."
                        ),
                    ));
                }
            }
        }
    }

    async fn drive(&self, checkpoint: &mut Checkpoint) -> Result<TurnOutcome, TurnError> {
        for _ in 0..self.config.max_steps_per_turn {
            match &checkpoint.cursor {
                Node::Terminal => {
                    let reply = checkpoint.state.last_reply().unwrap_or_default().to_string();
                    info!("turn completed");
                    return Ok(TurnOutcome::Completed { reply });
                }
                Node::AwaitingApproval { .. } => {
                    return suspended_outcome(checkpoint);
                }
                Node::Assistant { assistant } => {
                    let assistant = *assistant;
                    self.run_assistant(checkpoint, assistant).await?;
                }
                node => {
                    let node = node.clone();
                    self.apply(checkpoint, node).await;
                }
            }
            self.commit(checkpoint).await?;
        }

        warn!(limit = self.config.max_steps_per_turn, "step limit exceeded");
        Err(TurnError::StepLimitExceeded {
            limit: self.config.max_steps_per_turn,
        })
    }

    /// Runs an assistant and routes its action.
    ///
    /// Routing happens before the state is touched, so a routing failure
    /// leaves the last committed checkpoint as the truth.
    async fn run_assistant(
        &self,
        checkpoint: &mut Checkpoint,
        assistant: Assistant,
    ) -> Result<(), TurnError> {
        let tools = self.table.declarations_for(assistant);
        let message = self
            .runner
            .run(AssistantRequest {
                assistant,
                label: self.table.assistant_label(assistant),
                state: &checkpoint.state,
                tools: &tools,
            })
            .await?;

        let decoded = self.table.decode(assistant, &message)?;
        let next = route(&self.table, assistant, &decoded.action).inspect_err(|e| {
            warn!(%assistant, error = %e, "no transition for action");
        })?;
        debug!(%assistant, ?next, "routed");

        checkpoint.state.append(message);
        for call in decoded.skipped {
            warn!(tool = %call.name, "skipping extra tool call");
            checkpoint.state.append(Message::tool_error(
                call.id,
                format!(
                    "{} was not run. Only one action is handled per step; request it again if still needed.",
                    call.name
                ),
            ));
        }

        if let Node::AwaitingApproval { assistant, call } = &next {
            let resume_point = ResumePoint {
                approval_id: ApprovalId::new(),
                assistant: *assistant,
                tool_id: ToolId::new(call.name.clone()),
                arguments: call.arguments.clone(),
                correlation_id: call.id.clone(),
                suspended_at: Utc::now(),
            };
            info!(
                approval_id = %resume_point.approval_id,
                tool = %resume_point.tool_id,
                "suspending for approval"
            );
            checkpoint.state.suspend(resume_point);
        }

        checkpoint.cursor = next;
        Ok(())
    }

    /// Executes a deterministic node: a tool call or a handoff.
    async fn apply(&self, checkpoint: &mut Checkpoint, node: Node) {
        let state = &mut checkpoint.state;
        checkpoint.cursor = match node {
            Node::Tool { assistant, call } => {
                if !state.has_result_for(&call.id) {
                    let message = self.invoke_tool(state, call).await;
                    state.append(message);
                }
                Node::Assistant { assistant }
            }
            Node::EnteringAssistant {
                domain,
                correlation_id,
            } => {
                let label = self.table.label(domain).unwrap_or(domain.as_str());
                enter_specialist(state, domain, label, &correlation_id);
                Node::Assistant {
                    assistant: state.active_assistant(),
                }
            }
            Node::LeavingAssistant {
                domain,
                correlation_id,
            } => {
                let label = self.table.label(domain).unwrap_or(domain.as_str());
                leave_specialist(state, label, &correlation_id);
                Node::Assistant {
                    assistant: Assistant::Primary,
                }
            }
            other => other,
        };
    }

    async fn invoke_tool(&self, state: &ConversationState, call: ToolCall) -> Message {
        let tool = ToolId::new(call.name.clone());
        match self
            .tools
            .invoke(&tool, &call.arguments, state.resolved_identity())
            .await
        {
            Ok(result) => {
                debug!(%tool, "tool succeeded");
                Message::tool(call.id, result)
            }
            Err(e) => {
                warn!(%tool, error = %e, "tool failed");
                Message::tool_error(call.id, e.to_string())
            }
        }
    }

    async fn commit(&self, checkpoint: &mut Checkpoint) -> Result<(), TurnError> {
        checkpoint.version += 1;
        checkpoint.saved_at = Utc::now();
        self.store.save(checkpoint).await?;
        debug!(version = checkpoint.version, "checkpoint committed");
        Ok(())
    }
}

fn suspended_outcome(checkpoint: &Checkpoint) -> Result<TurnOutcome, TurnError> {
    let resume_point = checkpoint.state.pending_resume_point().ok_or_else(|| {
        TurnError::Persistence(CheckpointError::Corrupt {
            conversation_id: checkpoint.conversation_id,
            reason: "awaiting approval without a resume point".to_string(),
        })
    })?;
    Ok(TurnOutcome::Suspended {
        approval_id: resume_point.approval_id,
        assistant: resume_point.assistant,
        tool_id: resume_point.tool_id.clone(),
        arguments: resume_point.arguments.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryCheckpointStore;
    use crate::action::ESCALATION_TOOL;
    use crate::catalog::travel_table;
    use crate::error::{AssistantError, RoutingError};
    use async_trait::async_trait;
    use concierge_conversation::{Domain, MessageRole, ResolvedIdentity, ToolError};
    use rootcause::Report;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::Notify;

    const FLIGHT: Assistant = Assistant::Specialist(Domain::Flight);

    #[derive(Default)]
    struct ScriptedRunner {
        replies: Mutex<VecDeque<Message>>,
        seen: Mutex<Vec<Assistant>>,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl ScriptedRunner {
        fn new(replies: impl IntoIterator<Item = Message>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                ..Self::default()
            }
        }

        fn push(&self, reply: Message) {
            self.replies.lock().unwrap().push_back(reply);
        }

        fn seen(&self) -> Vec<Assistant> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AssistantRunner for ScriptedRunner {
        async fn run(&self, request: AssistantRequest<'_>) -> Result<Message, AssistantError> {
            self.seen.lock().unwrap().push(request.assistant);
            if let Some((started, release)) = &self.gate {
                started.notify_one();
                release.notified().await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(AssistantError::InvalidResponse {
                    reason: "script exhausted".to_string(),
                })
        }
    }

    #[derive(Default)]
    struct RecordingTools {
        calls: Mutex<Vec<(String, Option<ResolvedIdentity>)>>,
        failing: HashSet<String>,
    }

    impl RecordingTools {
        fn failing(tools: &[&str]) -> Self {
            Self {
                failing: tools.iter().map(|t| (*t).to_string()).collect(),
                ..Self::default()
            }
        }

        fn names(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(name, _)| name.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ToolInvoker for RecordingTools {
        async fn invoke(
            &self,
            tool: &ToolId,
            _arguments: &JsonValue,
            identity: Option<&ResolvedIdentity>,
        ) -> Result<JsonValue, ToolError> {
            self.calls
                .lock()
                .unwrap()
                .push((tool.to_string(), identity.cloned()));
            if self.failing.contains(tool.as_str()) {
                return Err(ToolError::ExecutionFailed {
                    name: tool.to_string(),
                    reason: "no tickets found".to_string(),
                });
            }
            Ok(json!({"ok": true}))
        }
    }

    struct Directory;

    #[async_trait]
    impl IdentityResolver for Directory {
        async fn resolve(&self, user_ref: &str) -> Result<ResolvedIdentity, IdentityError> {
            if user_ref == "unknown" {
                return Err(IdentityError::NotFound {
                    user_ref: user_ref.to_string(),
                });
            }
            Ok(ResolvedIdentity::new(format!("passenger:{user_ref}")))
        }
    }

    struct Harness {
        engine: Engine<InMemoryCheckpointStore>,
        store: InMemoryCheckpointStore,
        runner: Arc<ScriptedRunner>,
        tools: Arc<RecordingTools>,
    }

    fn harness_with(runner: ScriptedRunner, tools: RecordingTools, config: EngineConfig) -> Harness {
        let store = InMemoryCheckpointStore::new();
        let runner = Arc::new(runner);
        let tools = Arc::new(tools);
        let engine = Engine::new(
            travel_table().expect("catalog is consistent"),
            store.clone(),
            runner.clone(),
            tools.clone(),
            Arc::new(Directory),
        )
        .with_config(config);
        Harness {
            engine,
            store,
            runner,
            tools,
        }
    }

    fn harness(replies: impl IntoIterator<Item = Message>) -> Harness {
        harness_with(
            ScriptedRunner::new(replies),
            RecordingTools::default(),
            EngineConfig::default(),
        )
    }

    fn calls(id: &str, name: &str, arguments: JsonValue) -> Message {
        Message::assistant("").with_tool_call(ToolCall::new(id, name, arguments))
    }

    fn transfer_to_flights(id: &str) -> Message {
        calls(id, "ToFlightBookingAssistant", json!({"request": "change my flight"}))
    }

    fn cancel_ticket(id: &str) -> Message {
        calls(id, "cancel_ticket", json!({"ticket_no": "7240005432906569"}))
    }

    fn turn_error(report: Report<TurnError>) -> TurnError {
        report.current_context().clone()
    }

    fn answers(state: &ConversationState, correlation_id: &str) -> usize {
        state
            .messages()
            .iter()
            .filter(|m| m.answers() == Some(correlation_id))
            .count()
    }

    async fn suspend_on_cancel(h: &Harness, id: ConversationId) -> TurnOutcome {
        h.runner.push(transfer_to_flights("call_1"));
        h.runner.push(cancel_ticket("call_2"));
        h.engine
            .submit_turn(id, "cancel my ticket")
            .await
            .expect("turn")
    }

    #[tokio::test]
    async fn transfer_enters_specialist_with_one_acknowledgment() {
        let h = harness([
            transfer_to_flights("call_1"),
            Message::assistant("Sure, which ticket?"),
        ]);
        let id = ConversationId::new();

        let outcome = h.engine.submit_turn(id, "change my flight").await.expect("turn");

        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                reply: "Sure, which ticket?".to_string()
            }
        );
        let state = h.engine.snapshot(id).await.expect("snapshot").state;
        assert_eq!(state.dialog_stack().iter().copied().collect::<Vec<_>>(), vec![Domain::Flight]);
        assert_eq!(answers(&state, "call_1"), 1);
        let ack = state
            .messages()
            .iter()
            .find(|m| m.answers() == Some("call_1"))
            .expect("ack");
        assert!(ack.content.contains("Flights"));
        assert_eq!(h.runner.seen(), vec![Assistant::Primary, FLIGHT]);
    }

    #[tokio::test]
    async fn sensitive_tool_suspends_then_runs_once_on_approval() {
        let h = harness([]);
        let id = ConversationId::new();

        let outcome = suspend_on_cancel(&h, id).await;

        match &outcome {
            TurnOutcome::Suspended {
                assistant,
                tool_id,
                arguments,
                ..
            } => {
                assert_eq!(*assistant, FLIGHT);
                assert_eq!(tool_id.as_str(), "cancel_ticket");
                assert_eq!(arguments["ticket_no"], "7240005432906569");
            }
            other => panic!("expected Suspended, got {other:?}"),
        }
        assert!(h.tools.names().is_empty());

        h.runner.push(Message::assistant("Your ticket is cancelled."));
        let outcome = h.engine.approve(id).await.expect("approve");

        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                reply: "Your ticket is cancelled.".to_string()
            }
        );
        assert_eq!(h.tools.names(), vec!["cancel_ticket".to_string()]);
        let state = h.engine.snapshot(id).await.expect("snapshot").state;
        assert!(!state.is_suspended());
        assert_eq!(answers(&state, "call_2"), 1);
    }

    #[tokio::test]
    async fn crash_after_suspension_leaves_tool_uninvoked() {
        let h = harness([]);
        let id = ConversationId::new();
        suspend_on_cancel(&h, id).await;
        drop(h.engine);

        // A fresh process over the same store.
        let runner = Arc::new(ScriptedRunner::new([Message::assistant("Done.")]));
        let tools = Arc::new(RecordingTools::default());
        let engine = Engine::new(
            travel_table().expect("catalog is consistent"),
            h.store.clone(),
            runner,
            tools.clone(),
            Arc::new(Directory),
        );

        let checkpoint = engine.snapshot(id).await.expect("snapshot");
        assert!(checkpoint.state.is_suspended());
        assert!(checkpoint.cursor.awaiting().is_some());
        assert!(tools.names().is_empty());
        assert!(h.tools.names().is_empty());

        engine.approve(id).await.expect("approve");
        assert_eq!(tools.names(), vec!["cancel_ticket".to_string()]);
    }

    #[tokio::test]
    async fn rejection_never_invokes_the_tool() {
        let h = harness([]);
        let id = ConversationId::new();
        suspend_on_cancel(&h, id).await;

        h.runner
            .push(Message::assistant("Understood, I left your ticket as it is."));
        let outcome = h.engine.reject(id, "I changed my mind").await.expect("reject");

        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        assert!(h.tools.names().is_empty());
        let state = h.engine.snapshot(id).await.expect("snapshot").state;
        let denial = state
            .messages()
            .iter()
            .find(|m| m.answers() == Some("call_2"))
            .expect("denial");
        assert!(denial.content.contains("I changed my mind"));
        assert_eq!(state.active_assistant(), FLIGHT);
    }

    #[tokio::test]
    async fn suspended_conversation_only_accepts_a_decision() {
        let h = harness([]);
        let id = ConversationId::new();
        suspend_on_cancel(&h, id).await;

        let err = h
            .engine
            .submit_turn(id, "hello?")
            .await
            .map(|_| ())
            .map_err(turn_error)
            .expect_err("must fail");

        assert!(matches!(err, TurnError::AwaitingApproval { .. }));
        assert!(h.tools.names().is_empty());
    }

    #[tokio::test]
    async fn decision_without_suspension_is_rejected() {
        let h = harness([Message::assistant("Hi! How can I help?")]);
        let id = ConversationId::new();
        h.engine.submit_turn(id, "hi").await.expect("turn");

        let err = h.engine.approve(id).await.map_err(turn_error).expect_err("must fail");
        assert_eq!(err, TurnError::NotSuspended { conversation_id: id });

        let unknown = ConversationId::new();
        let err = h
            .engine
            .approve(unknown)
            .await
            .map_err(turn_error)
            .expect_err("must fail");
        assert_eq!(err, TurnError::NotFound { conversation_id: unknown });
    }

    #[tokio::test]
    async fn escalation_returns_to_primary() {
        let h = harness([
            transfer_to_flights("call_1"),
            Message::assistant("Which flight?"),
            calls("call_2", ESCALATION_TOOL, json!({"reason": "done"})),
            Message::assistant("Anything else I can help with?"),
        ]);
        let id = ConversationId::new();
        h.engine.submit_turn(id, "change my flight").await.expect("turn 1");

        let outcome = h
            .engine
            .submit_turn(id, "never mind, I'll keep it")
            .await
            .expect("turn 2");

        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                reply: "Anything else I can help with?".to_string()
            }
        );
        let state = h.engine.snapshot(id).await.expect("snapshot").state;
        assert!(state.dialog_stack().is_empty());
        assert_eq!(state.active_assistant(), Assistant::Primary);
        assert_eq!(answers(&state, "call_2"), 1);
        assert_eq!(
            h.runner.seen(),
            vec![Assistant::Primary, FLIGHT, FLIGHT, Assistant::Primary]
        );
    }

    #[tokio::test]
    async fn correlation_ids_reused_across_turns_are_handled_again() {
        let h = harness([
            transfer_to_flights("call_0"),
            Message::assistant("Which flight?"),
            calls("call_1", ESCALATION_TOOL, json!({"reason": "done"})),
            Message::assistant("Anything else?"),
            transfer_to_flights("call_0"),
            calls("call_1", "search_flights", json!({"departure_airport": "BSL"})),
            Message::assistant("Here are the flights from Basel."),
        ]);
        let id = ConversationId::new();
        h.engine.submit_turn(id, "change my flight").await.expect("turn 1");
        h.engine.submit_turn(id, "never mind").await.expect("turn 2");

        let outcome = h
            .engine
            .submit_turn(id, "actually, find me flights from Basel")
            .await
            .expect("turn 3");

        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                reply: "Here are the flights from Basel.".to_string()
            }
        );
        assert_eq!(h.tools.names(), vec!["search_flights".to_string()]);
        let state = h.engine.snapshot(id).await.expect("snapshot").state;
        assert_eq!(state.dialog_stack().iter().copied().collect::<Vec<_>>(), vec![Domain::Flight]);
        assert_eq!(answers(&state, "call_0"), 2);
        assert_eq!(
            h.runner.seen(),
            vec![
                Assistant::Primary,
                FLIGHT,
                FLIGHT,
                Assistant::Primary,
                Assistant::Primary,
                FLIGHT,
                FLIGHT,
            ]
        );
    }

    #[tokio::test]
    async fn decision_for_another_approval_is_refused() {
        let h = harness([]);
        let id = ConversationId::new();
        let TurnOutcome::Suspended { approval_id, .. } = suspend_on_cancel(&h, id).await else {
            panic!("expected Suspended");
        };

        let err = h
            .engine
            .resolve_approval(id, ApprovalId::new(), Decision::Approve)
            .await
            .map_err(turn_error)
            .expect_err("must fail");
        assert_eq!(err, TurnError::NotSuspended { conversation_id: id });
        assert!(h.tools.names().is_empty());
        assert!(h.engine.snapshot(id).await.expect("snapshot").state.is_suspended());

        h.runner.push(Message::assistant("Your ticket is cancelled."));
        h.engine
            .resolve_approval(id, approval_id, Decision::Approve)
            .await
            .expect("approve");
        assert_eq!(h.tools.names(), vec!["cancel_ticket".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_turn_is_rejected() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let runner = ScriptedRunner {
            gate: Some((started.clone(), release.clone())),
            ..ScriptedRunner::new([Message::assistant("Hello!")])
        };
        let h = harness_with(runner, RecordingTools::default(), EngineConfig::default());
        let engine = Arc::new(h.engine);
        let id = ConversationId::new();

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.submit_turn(id, "hi").await.map_err(turn_error) }
        });
        started.notified().await;

        let second = engine.submit_turn(id, "hello?").await.map_err(turn_error);
        release.notify_one();

        assert_eq!(
            second.expect_err("second turn must fail"),
            TurnError::ConcurrentTurn { conversation_id: id }
        );
        let first = first.await.expect("join").expect("first turn");
        assert_eq!(
            first,
            TurnOutcome::Completed {
                reply: "Hello!".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unknown_tool_aborts_without_mutation() {
        let h = harness([calls("call_1", "book_hotel", json!({"hotel_id": 3}))]);
        let id = ConversationId::new();

        let err = h
            .engine
            .submit_turn(id, "book me a hotel")
            .await
            .map_err(turn_error)
            .expect_err("must fail");

        assert!(matches!(
            err,
            TurnError::Routing(RoutingError::UnknownTool { .. })
        ));
        let checkpoint = h.engine.snapshot(id).await.expect("snapshot");
        assert_eq!(checkpoint.state.messages().len(), 1);
        assert_eq!(checkpoint.state.messages()[0].role, MessageRole::User);
        assert!(checkpoint.state.dialog_stack().is_empty());
        assert!(h.tools.names().is_empty());
    }

    #[tokio::test]
    async fn tool_error_is_fed_back_to_the_assistant() {
        let h = harness_with(
            ScriptedRunner::new([
                calls("call_1", "fetch_user_flight_information", json!({})),
                Message::assistant("I couldn't find any tickets for you."),
            ]),
            RecordingTools::failing(&["fetch_user_flight_information"]),
            EngineConfig::default(),
        );
        let id = ConversationId::new();

        let outcome = h.engine.submit_turn(id, "what are my flights?").await.expect("turn");

        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                reply: "I couldn't find any tickets for you.".to_string()
            }
        );
        let state = h.engine.snapshot(id).await.expect("snapshot").state;
        let result = state
            .messages()
            .iter()
            .find_map(|m| m.tool_result.as_ref())
            .expect("tool result");
        assert!(!result.is_success());
        assert_eq!(h.runner.seen(), vec![Assistant::Primary, Assistant::Primary]);
    }

    #[tokio::test]
    async fn extra_tool_calls_are_answered_not_run() {
        let reply = Message::assistant("")
            .with_tool_call(ToolCall::new("call_1", "lookup_policy", json!({"query": "refunds"})))
            .with_tool_call(ToolCall::new("call_2", "fetch_user_flight_information", json!({})));
        let h = harness([reply, Message::assistant("Refunds are allowed within 24h.")]);
        let id = ConversationId::new();

        h.engine.submit_turn(id, "refund policy?").await.expect("turn");

        assert_eq!(h.tools.names(), vec!["lookup_policy".to_string()]);
        let state = h.engine.snapshot(id).await.expect("snapshot").state;
        assert_eq!(answers(&state, "call_1"), 1);
        assert_eq!(answers(&state, "call_2"), 1);
    }

    #[tokio::test]
    async fn step_limit_bounds_a_looping_assistant() {
        let loops = (0..10).map(|i| calls(&format!("call_{i}"), "lookup_policy", json!({})));
        let h = harness_with(
            ScriptedRunner::new(loops),
            RecordingTools::default(),
            EngineConfig {
                max_steps_per_turn: 4,
                ..EngineConfig::default()
            },
        );

        let err = h
            .engine
            .submit_turn(ConversationId::new(), "loop")
            .await
            .map_err(turn_error)
            .expect_err("must fail");

        assert_eq!(err, TurnError::StepLimitExceeded { limit: 4 });
    }

    #[tokio::test]
    async fn interrupted_handoff_is_settled_once() {
        let h = harness([Message::assistant("Which flight would you like to change?")]);
        let id = ConversationId::new();

        // A turn that died right after routing the transfer.
        let mut state = ConversationState::new(id);
        state.append(Message::user("change my flight"));
        state.append(transfer_to_flights("call_1"));
        let mut checkpoint = Checkpoint::initial(state);
        checkpoint.version = 1;
        checkpoint.cursor = Node::EnteringAssistant {
            domain: Domain::Flight,
            correlation_id: "call_1".to_string(),
        };
        h.store.save(&checkpoint).await.expect("seed");

        h.engine.submit_turn(id, "hello?").await.expect("turn");

        let state = h.engine.snapshot(id).await.expect("snapshot").state;
        assert_eq!(state.dialog_stack().len(), 1);
        assert_eq!(answers(&state, "call_1"), 1);
        assert_eq!(h.runner.seen(), vec![FLIGHT]);
    }

    #[tokio::test]
    async fn interrupted_sensitive_tool_is_not_rerun() {
        let h = harness([Message::assistant("Let me check whether that went through.")]);
        let id = ConversationId::new();

        let mut state = ConversationState::new(id);
        state.append(cancel_ticket("call_2"));
        let mut checkpoint = Checkpoint::initial(state);
        checkpoint.version = 1;
        checkpoint.cursor = Node::Tool {
            assistant: FLIGHT,
            call: ToolCall::new("call_2", "cancel_ticket", json!({})),
        };
        h.store.save(&checkpoint).await.expect("seed");

        h.engine.submit_turn(id, "did it work?").await.expect("turn");

        assert!(h.tools.names().is_empty());
        let state = h.engine.snapshot(id).await.expect("snapshot").state;
        assert_eq!(answers(&state, "call_2"), 1);
    }

    #[tokio::test]
    async fn expired_approval_is_rejected() {
        let h = harness_with(
            ScriptedRunner::default(),
            RecordingTools::default(),
            EngineConfig {
                approval_timeout: Some(Duration::ZERO),
                ..EngineConfig::default()
            },
        );
        let id = ConversationId::new();
        suspend_on_cancel(&h, id).await;

        h.runner.push(Message::assistant("That request expired, want to try again?"));
        let outcome = h.engine.approve(id).await.expect("resolve");

        assert!(matches!(outcome, TurnOutcome::Completed { .. }));
        assert!(h.tools.names().is_empty());
        let state = h.engine.snapshot(id).await.expect("snapshot").state;
        assert!(!state.is_suspended());
    }

    #[tokio::test]
    async fn identity_is_resolved_once_and_passed_to_tools() {
        let h = harness([
            calls("call_1", "fetch_user_flight_information", json!({})),
            Message::assistant("You have one upcoming flight."),
        ]);
        let id = ConversationId::new();

        h.engine
            .submit_turn(id, TurnInput::new("my flights?").with_user_ref("3442 587242"))
            .await
            .expect("turn");

        let calls = h.tools.calls.lock().unwrap().clone();
        assert_eq!(
            calls[0].1,
            Some(ResolvedIdentity::new("passenger:3442 587242"))
        );
    }

    #[tokio::test]
    async fn required_identity_aborts_before_commit() {
        let h = harness([Message::assistant("unreachable")]);
        let id = ConversationId::new();

        let err = h
            .engine
            .submit_turn(id, TurnInput::new("hi").with_user_ref("unknown"))
            .await
            .map_err(turn_error)
            .expect_err("must fail");

        assert!(matches!(err, TurnError::IdentityUnavailable { .. }));
        assert!(h.store.is_empty());
        assert!(h.runner.seen().is_empty());
    }

    #[tokio::test]
    async fn optional_identity_continues_unauthenticated() {
        let h = harness_with(
            ScriptedRunner::new([Message::assistant("Hello!")]),
            RecordingTools::default(),
            EngineConfig {
                identity_policy: IdentityPolicy::Optional,
                ..EngineConfig::default()
            },
        );
        let id = ConversationId::new();

        h.engine
            .submit_turn(id, TurnInput::new("hi").with_user_ref("unknown"))
            .await
            .expect("turn");

        let state = h.engine.snapshot(id).await.expect("snapshot").state;
        assert!(state.resolved_identity().is_none());
    }

    #[test]
    fn decision_from_bool() {
        assert_eq!(Decision::from(true), Decision::Approve);
        assert!(matches!(Decision::from(false), Decision::Reject { .. }));
    }
}
