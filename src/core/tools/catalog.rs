//! Tool catalog assembly.
//!
//! The catalog registered with a vendor session has three sources: built-in
//! call-control tools, data actions fetched from the action service by id,
//! and pass-through definitions supplied verbatim in the session's input
//! variables. Fetched tool names are sanitized and deduplicated; fetched
//! schemas are normalized to the strict object form realtime vendors accept.

use serde_json::{Value, json};

use super::action::ActionClient;
use super::{ToolClass, ToolDefinition, ToolOrigin};
use crate::config::ToolLimits;

/// Tool the model calls to end the conversation as resolved.
pub const END_CONVERSATION_SUCCESS: &str = "end_conversation_successfully";

/// Tool the model calls to end the conversation as an escalation.
pub const END_CONVERSATION_ESCALATION: &str = "end_conversation_with_escalation";

/// Built-in call-control tools, present in every session.
pub fn call_control_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: END_CONVERSATION_SUCCESS.to_string(),
            description: "End the conversation when the caller's request has been fully \
                          resolved. Call this only after saying goodbye to the caller."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "summary": {
                        "type": "string",
                        "description": "One or two sentence summary of what was accomplished"
                    }
                },
                "required": ["summary"],
                "additionalProperties": false
            }),
            class: ToolClass::CallControl,
            origin: ToolOrigin::Static,
            action_id: None,
        },
        ToolDefinition {
            name: END_CONVERSATION_ESCALATION.to_string(),
            description: "End the conversation and escalate to a human agent when the \
                          caller's request cannot be resolved, the caller asks for a \
                          human, or the caller is distressed. Tell the caller they are \
                          being transferred before calling this."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "reason": {
                        "type": "string",
                        "description": "Why the conversation is being escalated"
                    },
                    "department": {
                        "type": "string",
                        "description": "Department or queue best suited to handle the caller"
                    }
                },
                "required": ["reason"],
                "additionalProperties": false
            }),
            class: ToolClass::CallControl,
            origin: ToolOrigin::Static,
            action_id: None,
        },
    ]
}

/// Sanitize an action name into a valid function name: lowercase ASCII,
/// digits, and underscores, starting with a letter.
pub fn sanitize_function_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if ch == '_' || ch == '-' || ch.is_whitespace() {
            if !out.ends_with('_') {
                out.push('_');
            }
        }
    }
    let trimmed = out.trim_matches('_').to_string();
    if trimmed.is_empty() {
        "action".to_string()
    } else if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        format!("action_{trimmed}")
    } else {
        trimmed
    }
}

/// Normalize a fetched input schema to the strict object schema vendors
/// accept: keeps `properties` and `required`, forces `type: object` and
/// `additionalProperties: false`, drops everything else.
fn normalize_parameters_schema(schema: &Value) -> Value {
    let properties = schema
        .get("properties")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let required = schema
        .get("required")
        .cloned()
        .unwrap_or_else(|| json!([]));
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

/// Description for a fetched tool: the admin-supplied description when one
/// was given, else whatever the schema carries, else a generic fallback.
fn build_tool_description(schema: &Value, supplied: Option<&str>, name: &str) -> String {
    if let Some(text) = supplied
        && !text.trim().is_empty()
    {
        return text.trim().to_string();
    }
    if let Some(text) = schema.get("description").and_then(Value::as_str)
        && !text.trim().is_empty()
    {
        return text.trim().to_string();
    }
    format!("Execute the {name} business action")
}

/// Parse a delimited list of action ids. Accepts `|`, `,`, `;`, and
/// newlines as separators.
pub fn parse_action_ids(raw: &str) -> Vec<String> {
    raw.split(['|', ',', ';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse the order-aligned `|`-separated description list. A count mismatch
/// discards the descriptions rather than misassigning them.
pub fn parse_descriptions(raw: &str, expected: usize) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    let parts: Vec<String> = raw.split('|').map(|s| s.trim().to_string()).collect();
    if parts.len() != expected {
        tracing::warn!(
            supplied = parts.len(),
            expected,
            "Tool description count does not match action id count; ignoring descriptions"
        );
        return Vec::new();
    }
    parts
}

/// Parse pass-through tool definitions supplied as a JSON array of
/// `{name, description, parameters}` objects. Malformed entries are logged
/// and skipped; the call never fails.
pub fn parse_passthrough_tools(raw: &str) -> Vec<ToolDefinition> {
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Ignoring malformed pass-through tool JSON: {e}");
            return Vec::new();
        }
    };
    let Some(entries) = parsed.as_array() else {
        tracing::warn!("Pass-through tools must be a JSON array; ignoring");
        return Vec::new();
    };

    let mut tools = Vec::new();
    for entry in entries {
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            tracing::warn!("Skipping pass-through tool without a name");
            continue;
        };
        let sanitized = sanitize_function_name(name);
        let description = entry
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let parameters = entry
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
        if !parameters.is_object() {
            tracing::warn!(tool = sanitized, "Skipping pass-through tool with non-object schema");
            continue;
        }
        tools.push(ToolDefinition {
            name: sanitized,
            description,
            parameters,
            class: ToolClass::DataAction,
            origin: ToolOrigin::Fetched,
            action_id: None,
        });
    }
    tools
}

/// Fetch and assemble data-action tools for a session.
///
/// Fetch failures skip the action rather than failing the session. Names
/// that collide after sanitization get a numeric suffix. The catalog is
/// capped at `limits.max_tools_per_session`.
pub async fn build_data_action_tools(
    client: &ActionClient,
    action_ids: &[String],
    descriptions: &[String],
    limits: &ToolLimits,
) -> Vec<ToolDefinition> {
    let mut tools: Vec<ToolDefinition> = Vec::new();

    for (index, action_id) in action_ids.iter().enumerate() {
        if tools.len() >= limits.max_tools_per_session {
            tracing::warn!(
                cap = limits.max_tools_per_session,
                skipped = action_ids.len() - index,
                "Data-action tool cap reached; skipping remaining actions"
            );
            break;
        }

        let schema = match client.get_input_schema(action_id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(action_id, "Failed to fetch action schema, skipping: {e}");
                continue;
            }
        };

        let base_name = schema
            .get("title")
            .and_then(Value::as_str)
            .map(sanitize_function_name)
            .unwrap_or_else(|| sanitize_function_name(action_id));
        let mut name = base_name.clone();
        let mut suffix = 2;
        while tools.iter().any(|t| t.name == name) {
            name = format!("{base_name}_{suffix}");
            suffix += 1;
        }

        let description = build_tool_description(&schema, descriptions.get(index).map(String::as_str), &name);

        tools.push(ToolDefinition {
            name,
            description,
            parameters: normalize_parameters_schema(&schema),
            class: ToolClass::DataAction,
            origin: ToolOrigin::Fetched,
            action_id: Some(action_id.clone()),
        });
    }

    tools
}

/// Instruction text appended to the system prompt describing the fetched
/// data actions, so the model knows when to call each.
pub fn data_action_instructions(tools: &[ToolDefinition]) -> String {
    let fetched: Vec<&ToolDefinition> = tools
        .iter()
        .filter(|t| t.class == ToolClass::DataAction)
        .collect();
    if fetched.is_empty() {
        return String::new();
    }
    let mut text = String::from(
        "\n\nAVAILABLE BUSINESS ACTIONS:\nYou can call these functions to look up or \
         update business data. Call them as soon as you have the required information; \
         never invent their results.\n",
    );
    for tool in fetched {
        text.push_str(&format!("- {}: {}\n", tool.name, tool.description));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_control_tools_shape() {
        let tools = call_control_tools();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, END_CONVERSATION_SUCCESS);
        assert_eq!(tools[1].name, END_CONVERSATION_ESCALATION);
        assert!(tools.iter().all(|t| t.class == ToolClass::CallControl));
        assert_eq!(tools[0].parameters["required"][0], "summary");
        assert_eq!(tools[1].parameters["required"][0], "reason");
    }

    #[test]
    fn test_sanitize_function_name() {
        assert_eq!(sanitize_function_name("Lookup Order"), "lookup_order");
        assert_eq!(sanitize_function_name("Get-Customer  Info"), "get_customer_info");
        assert_eq!(sanitize_function_name("42nd action"), "action_42nd_action");
        assert_eq!(sanitize_function_name("!!!"), "action");
    }

    #[test]
    fn test_normalize_schema_strips_extras() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-04/schema#",
            "title": "Lookup Order",
            "type": "object",
            "properties": {"order_id": {"type": "string"}},
            "required": ["order_id"],
            "additionalProperties": true
        });
        let normalized = normalize_parameters_schema(&schema);
        assert_eq!(normalized["type"], "object");
        assert_eq!(normalized["additionalProperties"], false);
        assert_eq!(normalized["required"][0], "order_id");
        assert!(normalized.get("title").is_none());
    }

    #[test]
    fn test_parse_action_ids_mixed_separators() {
        let ids = parse_action_ids("a-1 | a-2, a-3;a-4\na-5");
        assert_eq!(ids, vec!["a-1", "a-2", "a-3", "a-4", "a-5"]);
        assert!(parse_action_ids("  ").is_empty());
    }

    #[test]
    fn test_parse_descriptions_count_mismatch() {
        assert_eq!(
            parse_descriptions("first | second", 2),
            vec!["first", "second"]
        );
        assert!(parse_descriptions("only one", 2).is_empty());
        assert!(parse_descriptions("", 3).is_empty());
    }

    #[test]
    fn test_parse_passthrough_tools() {
        let raw = r#"[
            {"name": "Check Balance", "description": "Check it",
             "parameters": {"type": "object", "properties": {}}},
            {"description": "no name"},
            {"name": "bad_schema", "parameters": 7}
        ]"#;
        let tools = parse_passthrough_tools(raw);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "check_balance");
        assert_eq!(tools[0].origin, ToolOrigin::Fetched);
    }

    #[test]
    fn test_parse_passthrough_tools_malformed_json() {
        assert!(parse_passthrough_tools("not json").is_empty());
        assert!(parse_passthrough_tools("{\"name\": \"x\"}").is_empty());
    }

    #[test]
    fn test_data_action_instructions() {
        let mut tools = call_control_tools();
        assert!(data_action_instructions(&tools).is_empty());
        tools.push(ToolDefinition {
            name: "lookup_order".to_string(),
            description: "Look up an order by id".to_string(),
            parameters: json!({"type": "object"}),
            class: ToolClass::DataAction,
            origin: ToolOrigin::Fetched,
            action_id: Some("a-1".to_string()),
        });
        let text = data_action_instructions(&tools);
        assert!(text.contains("lookup_order: Look up an order by id"));
    }
}
