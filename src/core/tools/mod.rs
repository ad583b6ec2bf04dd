//! Tool execution: catalog, validation, limits, and the external
//! data-action service client.
//!
//! Two tool classes cross this module: call-control tools
//! (`end_conversation_successfully`, `end_conversation_with_escalation`) that
//! terminate the call, and business-data actions fetched from an external
//! catalog and executed through the action service. All tool calls pass the
//! same gate: schema validation, payload size, per-session cap, sliding
//! window rate limit, and a per-turn hop limit.

mod action;
mod catalog;
mod orchestrator;

pub use action::{ActionClient, ActionError, redact_payload};
pub use catalog::{
    END_CONVERSATION_SUCCESS, END_CONVERSATION_ESCALATION, build_data_action_tools,
    call_control_tools, data_action_instructions, parse_action_ids, parse_descriptions,
    parse_passthrough_tools, sanitize_function_name,
};
pub use orchestrator::{ToolDisposition, ToolOrchestrator, ToolTermination};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Class of a registered tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolClass {
    /// Terminates the call with an outcome
    CallControl,
    /// Executed against the external action service
    DataAction,
}

/// Where a tool definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOrigin {
    /// Built into the gateway
    Static,
    /// Fetched from the action catalog for this session
    Fetched,
}

/// A tool registered with the vendor session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments
    pub parameters: serde_json::Value,
    pub class: ToolClass,
    pub origin: ToolOrigin,
    /// Backing action id for data actions
    pub action_id: Option<String>,
}

/// A resolved tool call, kept in session history.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    /// Result payload after redaction, as returned to the model
    pub result: String,
    pub timestamp: std::time::SystemTime,
}

/// Non-fatal tool-call failures, surfaced to the model as error results.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid tool arguments: {0}")]
    ArgumentInvalid(String),

    #[error("Tool argument payload is too large ({size} bytes, limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Tool call rate limit exceeded")]
    RateLimited,

    #[error("Maximum tool invocations exceeded for this session")]
    CapExceeded,

    #[error("Too many sequential tool calls in one turn")]
    HopLimitExceeded,

    #[error("Action execution failed: {0}")]
    ActionExecution(String),
}

impl ToolError {
    /// Machine-readable error code included in the result payload.
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::ArgumentInvalid(_) => "invalid_arguments",
            ToolError::PayloadTooLarge { .. } => "payload_too_large",
            ToolError::RateLimited => "rate_limited",
            ToolError::CapExceeded => "invocation_cap_exceeded",
            ToolError::HopLimitExceeded => "hop_limit_exceeded",
            ToolError::ActionExecution(_) => "action_execution_failed",
        }
    }

    /// Structured error result returned to the model in place of execution.
    pub fn as_model_payload(&self, tool: &str) -> String {
        serde_json::json!({
            "status": "error",
            "tool": tool,
            "error": self.code(),
            "message": self.to_string(),
        })
        .to_string()
    }
}
