//! Per-session tool orchestration.
//!
//! Every model tool call passes through [`ToolOrchestrator::handle`], which
//! enforces the session's limits and returns a payload the model can always
//! consume. Failures never propagate as errors; they become structured error
//! results so the model can recover in conversation.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::SystemTime;

use governor::{Quota, RateLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use serde_json::{Value, json};

use super::action::{ActionClient, redact_payload};
use super::catalog::{END_CONVERSATION_ESCALATION, END_CONVERSATION_SUCCESS};
use super::{ToolClass, ToolDefinition, ToolError, ToolInvocation};
use crate::config::ToolLimits;
use crate::core::realtime::ToolCallRequest;

type SessionLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Termination requested by a call-control tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolTermination {
    /// The model resolved the caller's request.
    Success { summary: String },
    /// The model is handing the caller to a human.
    Escalation {
        reason: String,
        department: Option<String>,
    },
}

/// Outcome of one tool call.
#[derive(Debug, Clone)]
pub struct ToolDisposition {
    /// Result payload to return to the model.
    pub payload: String,
    /// Set when a call-control tool asked to end the conversation.
    pub termination: Option<ToolTermination>,
}

struct RegisteredTool {
    definition: ToolDefinition,
    schema: jsonschema::JSONSchema,
}

/// Validates, limits, and executes the model's tool calls for one session.
pub struct ToolOrchestrator {
    tools: HashMap<String, RegisteredTool>,
    actions: Arc<ActionClient>,
    limits: ToolLimits,
    limiter: SessionLimiter,
    calls_made: u32,
    hops_this_turn: u32,
    history: Vec<ToolInvocation>,
}

impl ToolOrchestrator {
    /// Register the session's catalog. Tools whose schema fails to compile
    /// are dropped with a warning; the rest stay usable.
    pub fn new(definitions: Vec<ToolDefinition>, actions: Arc<ActionClient>, limits: ToolLimits) -> Self {
        let mut tools = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            match jsonschema::JSONSchema::compile(&definition.parameters) {
                Ok(schema) => {
                    tools.insert(definition.name.clone(), RegisteredTool { definition, schema });
                }
                Err(e) => {
                    tracing::warn!(tool = definition.name, "Dropping tool with invalid schema: {e}");
                }
            }
        }

        let per_window = NonZeroU32::new(limits.rate_limit_per_window.max(1))
            .unwrap_or(NonZeroU32::MIN);
        let window = std::time::Duration::from_secs(limits.rate_window_secs.max(1));
        let quota = Quota::with_period(window / per_window.get())
            .unwrap_or_else(|| Quota::per_minute(per_window))
            .allow_burst(per_window);

        Self {
            tools,
            actions,
            limits,
            limiter: RateLimiter::direct(quota),
            calls_made: 0,
            hops_this_turn: 0,
            history: Vec::new(),
        }
    }

    /// Registered tool definitions, for vendor session configuration.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    /// Invocation history for this session.
    pub fn history(&self) -> &[ToolInvocation] {
        &self.history
    }

    /// Reset the per-turn hop counter. Called when the model completes a
    /// turn.
    pub fn reset_turn(&mut self) {
        self.hops_this_turn = 0;
    }

    /// Handle one tool call end to end. Always returns a payload; limit
    /// violations and execution failures are reported to the model as
    /// structured errors.
    pub async fn handle(&mut self, request: ToolCallRequest) -> ToolDisposition {
        match self.try_handle(&request).await {
            Ok(disposition) => disposition,
            Err(e) => {
                tracing::warn!(
                    tool = request.name,
                    call_id = request.call_id,
                    error = e.code(),
                    "Tool call rejected: {e}"
                );
                ToolDisposition {
                    payload: e.as_model_payload(&request.name),
                    termination: None,
                }
            }
        }
    }

    async fn try_handle(&mut self, request: &ToolCallRequest) -> Result<ToolDisposition, ToolError> {
        // Size is checked on the raw argument string, before any parsing
        if request.arguments.len() > self.limits.max_argument_bytes {
            return Err(ToolError::PayloadTooLarge {
                size: request.arguments.len(),
                limit: self.limits.max_argument_bytes,
            });
        }

        let tool = self
            .tools
            .get(&request.name)
            .ok_or_else(|| ToolError::UnknownTool(request.name.clone()))?;

        let arguments: Value = if request.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&request.arguments)
                .map_err(|e| ToolError::ArgumentInvalid(e.to_string()))?
        };

        if let Err(errors) = tool.schema.validate(&arguments) {
            let detail = errors
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ToolError::ArgumentInvalid(detail));
        }

        let class = tool.definition.class;
        let action_id = tool.definition.action_id.clone();

        let disposition = match class {
            ToolClass::CallControl => self.handle_call_control(&request.name, &arguments)?,
            ToolClass::DataAction => {
                // Session cap, hop limit, and rate limit apply to data
                // actions only; call-control must always get through
                if self.calls_made >= self.limits.max_calls_per_session {
                    return Err(ToolError::CapExceeded);
                }
                if self.hops_this_turn >= self.limits.hop_limit {
                    return Err(ToolError::HopLimitExceeded);
                }
                if self.limiter.check().is_err() {
                    return Err(ToolError::RateLimited);
                }
                self.calls_made += 1;
                self.hops_this_turn += 1;
                self.execute_data_action(&request.name, action_id.as_deref(), &arguments)
                    .await?
            }
        };

        self.history.push(ToolInvocation {
            call_id: request.call_id.clone(),
            name: request.name.clone(),
            arguments,
            result: disposition.payload.clone(),
            timestamp: SystemTime::now(),
        });

        Ok(disposition)
    }

    fn handle_call_control(
        &self,
        name: &str,
        arguments: &Value,
    ) -> Result<ToolDisposition, ToolError> {
        let termination = match name {
            END_CONVERSATION_SUCCESS => {
                let summary = arguments
                    .get("summary")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                ToolTermination::Success { summary }
            }
            END_CONVERSATION_ESCALATION => {
                let reason = arguments
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let department = arguments
                    .get("department")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                ToolTermination::Escalation { reason, department }
            }
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };

        tracing::info!(tool = name, "Call-control tool invoked");
        Ok(ToolDisposition {
            payload: json!({
                "status": "ok",
                "message": "Acknowledged. Say a brief goodbye to the caller now; the call \
                            will end once you finish speaking."
            })
            .to_string(),
            termination: Some(termination),
        })
    }

    async fn execute_data_action(
        &self,
        name: &str,
        action_id: Option<&str>,
        arguments: &Value,
    ) -> Result<ToolDisposition, ToolError> {
        let Some(action_id) = action_id else {
            // Pass-through tools have no backing action; echo the call so
            // the platform can observe it in the transcript
            tracing::info!(tool = name, "Pass-through tool invoked without backing action");
            return Ok(ToolDisposition {
                payload: json!({"status": "ok", "tool": name}).to_string(),
                termination: None,
            });
        };

        tracing::info!(tool = name, action_id, "Executing data action");
        let mut result = self
            .actions
            .execute(action_id, arguments)
            .await
            .map_err(|e| ToolError::ActionExecution(e.to_string()))?;

        redact_payload(&mut result, self.actions.redaction_fields());

        Ok(ToolDisposition {
            payload: result.to_string(),
            termination: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActionServiceConfig;
    use crate::core::tools::{ToolOrigin, call_control_tools};

    fn orchestrator(limits: ToolLimits) -> ToolOrchestrator {
        let actions = Arc::new(ActionClient::new(ActionServiceConfig::default()));
        ToolOrchestrator::new(call_control_tools(), actions, limits)
    }

    fn request(name: &str, arguments: &str) -> ToolCallRequest {
        ToolCallRequest {
            call_id: "call-1".to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
            response_id: None,
        }
    }

    #[tokio::test]
    async fn test_success_termination() {
        let mut orch = orchestrator(ToolLimits::default());
        let disposition = orch
            .handle(request(
                END_CONVERSATION_SUCCESS,
                r#"{"summary": "Booked a new seat"}"#,
            ))
            .await;
        assert_eq!(
            disposition.termination,
            Some(ToolTermination::Success {
                summary: "Booked a new seat".to_string()
            })
        );
        assert_eq!(orch.history().len(), 1);
    }

    #[tokio::test]
    async fn test_escalation_termination() {
        let mut orch = orchestrator(ToolLimits::default());
        let disposition = orch
            .handle(request(
                END_CONVERSATION_ESCALATION,
                r#"{"reason": "caller asked for a human", "department": "billing"}"#,
            ))
            .await;
        match disposition.termination {
            Some(ToolTermination::Escalation { reason, department }) => {
                assert_eq!(reason, "caller asked for a human");
                assert_eq!(department.as_deref(), Some("billing"));
            }
            other => panic!("unexpected termination: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_payload() {
        let mut orch = orchestrator(ToolLimits::default());
        let disposition = orch.handle(request("no_such_tool", "{}")).await;
        assert!(disposition.termination.is_none());
        let payload: Value = serde_json::from_str(&disposition.payload).unwrap();
        assert_eq!(payload["error"], "unknown_tool");
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected_by_schema() {
        let mut orch = orchestrator(ToolLimits::default());
        // Missing required "summary"
        let disposition = orch.handle(request(END_CONVERSATION_SUCCESS, "{}")).await;
        assert!(disposition.termination.is_none());
        let payload: Value = serde_json::from_str(&disposition.payload).unwrap();
        assert_eq!(payload["error"], "invalid_arguments");
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_before_parsing() {
        let limits = ToolLimits {
            max_argument_bytes: 32,
            ..Default::default()
        };
        let mut orch = orchestrator(limits);
        let big = format!(r#"{{"summary": "{}"}}"#, "x".repeat(100));
        let disposition = orch.handle(request(END_CONVERSATION_SUCCESS, &big)).await;
        let payload: Value = serde_json::from_str(&disposition.payload).unwrap();
        assert_eq!(payload["error"], "payload_too_large");
    }

    #[tokio::test]
    async fn test_session_cap_applies_to_data_actions_only() {
        let limits = ToolLimits {
            max_calls_per_session: 0,
            ..Default::default()
        };
        let actions = Arc::new(ActionClient::new(ActionServiceConfig::default()));
        let mut definitions = call_control_tools();
        definitions.push(ToolDefinition {
            name: "lookup_order".to_string(),
            description: "Look up an order".to_string(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
            class: ToolClass::DataAction,
            origin: ToolOrigin::Fetched,
            action_id: Some("a-1".to_string()),
        });
        let mut orch = ToolOrchestrator::new(definitions, actions, limits);

        let disposition = orch.handle(request("lookup_order", "{}")).await;
        let payload: Value = serde_json::from_str(&disposition.payload).unwrap();
        assert_eq!(payload["error"], "invocation_cap_exceeded");

        // Call-control still works under a zero cap
        let disposition = orch
            .handle(request(END_CONVERSATION_SUCCESS, r#"{"summary": "done"}"#))
            .await;
        assert!(disposition.termination.is_some());
    }

    #[tokio::test]
    async fn test_hop_limit_resets_on_turn() {
        let limits = ToolLimits {
            hop_limit: 1,
            ..Default::default()
        };
        let actions = Arc::new(ActionClient::new(ActionServiceConfig::default()));
        let definitions = vec![ToolDefinition {
            name: "ping".to_string(),
            description: String::new(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
            class: ToolClass::DataAction,
            origin: ToolOrigin::Fetched,
            action_id: None,
        }];
        let mut orch = ToolOrchestrator::new(definitions, actions, limits);

        let first = orch.handle(request("ping", "{}")).await;
        assert!(first.payload.contains("\"status\":\"ok\""));

        let second = orch.handle(request("ping", "{}")).await;
        let payload: Value = serde_json::from_str(&second.payload).unwrap();
        assert_eq!(payload["error"], "hop_limit_exceeded");

        orch.reset_turn();
        let third = orch.handle(request("ping", "{}")).await;
        assert!(third.payload.contains("\"status\":\"ok\""));
    }
}
