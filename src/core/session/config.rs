//! Per-call session configuration.
//!
//! Resolved from the open message's input variables layered over server
//! defaults. Variable names are matched case-insensitively; the telephony
//! platform tends to upcase them.

use std::collections::HashMap;

use crate::config::ServerConfig;
use crate::core::realtime::{RealtimeBackend, gemini, openai};
use crate::core::tools::{
    ToolDefinition, parse_action_ids, parse_descriptions, parse_passthrough_tools,
};

use super::controller::SessionError;

/// Configuration for one bridged call.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Conversation id assigned by the telephony platform.
    pub conversation_id: String,
    /// Session id assigned by the telephony platform.
    pub session_id: String,

    pub backend: RealtimeBackend,
    pub api_key: String,
    pub model: String,
    pub voice: Option<String>,
    pub temperature: Option<f32>,

    // Prompt inputs
    pub agent_name: String,
    pub company_name: String,
    pub language: Option<String>,
    pub admin_prompt: Option<String>,
    pub customer_data: Option<String>,

    // Tool inputs
    pub action_ids: Vec<String>,
    pub tool_descriptions: Vec<String>,
    pub passthrough_tools: Vec<ToolDefinition>,
}

fn lookup<'a>(vars: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    vars.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.trim().is_empty())
}

impl SessionConfig {
    /// Resolve a session configuration from the open message's input
    /// variables. Fails when the chosen backend has no API key configured.
    pub fn from_input_variables(
        conversation_id: &str,
        session_id: &str,
        vars: &HashMap<String, String>,
        server: &ServerConfig,
    ) -> Result<Self, SessionError> {
        let backend_name = lookup(vars, "backend")
            .or_else(|| lookup(vars, "provider"))
            .unwrap_or(&server.default_backend);
        let backend = RealtimeBackend::parse(backend_name).ok_or_else(|| {
            SessionError::Configuration(format!("unknown backend '{backend_name}'"))
        })?;

        let api_key = match backend {
            RealtimeBackend::OpenAI => server.openai_api_key.clone(),
            RealtimeBackend::Gemini => server.gemini_api_key.clone(),
        }
        .ok_or_else(|| {
            SessionError::Configuration(format!("no API key configured for backend '{backend}'"))
        })?;

        let model = lookup(vars, "model")
            .map(str::to_string)
            .or_else(|| server.default_model.clone())
            .unwrap_or_else(|| match backend {
                RealtimeBackend::OpenAI => openai::DEFAULT_MODEL.to_string(),
                RealtimeBackend::Gemini => gemini::DEFAULT_MODEL.to_string(),
            });

        let voice = lookup(vars, "voice")
            .map(str::to_string)
            .or_else(|| server.default_voice.clone());

        let temperature = lookup(vars, "temperature").and_then(|v| match v.parse::<f32>() {
            Ok(t) => Some(t),
            Err(_) => {
                tracing::warn!(value = v, "Ignoring non-numeric temperature input variable");
                None
            }
        });

        let action_ids = lookup(vars, "action_ids")
            .map(parse_action_ids)
            .unwrap_or_default();
        let tool_descriptions = lookup(vars, "tool_descriptions")
            .map(|raw| parse_descriptions(raw, action_ids.len()))
            .unwrap_or_default();
        let passthrough_tools = lookup(vars, "tools")
            .map(parse_passthrough_tools)
            .unwrap_or_default();

        Ok(Self {
            conversation_id: conversation_id.to_string(),
            session_id: session_id.to_string(),
            backend,
            api_key,
            model,
            voice,
            temperature,
            agent_name: lookup(vars, "agent_name")
                .unwrap_or(&server.default_agent_name)
                .to_string(),
            company_name: lookup(vars, "company_name")
                .unwrap_or(&server.default_company_name)
                .to_string(),
            language: lookup(vars, "language").map(str::to_string),
            admin_prompt: lookup(vars, "system_prompt")
                .or_else(|| lookup(vars, "prompt"))
                .map(str::to_string),
            customer_data: lookup(vars, "customer_data").map(str::to_string),
            action_ids,
            tool_descriptions,
            passthrough_tools,
        })
    }
}
