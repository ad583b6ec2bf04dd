//! Action Service Integration Tests
//!
//! Tests for the data-action service client and the tool pipeline built on
//! top of it, with the service simulated using wiremock.

use std::sync::Arc;

use serde_json::{Value, json};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use callbridge_gateway::config::{ActionServiceConfig, ToolLimits};
use callbridge_gateway::core::realtime::ToolCallRequest;
use callbridge_gateway::core::tools::{
    ActionClient, ActionError, ToolOrchestrator, build_data_action_tools, call_control_tools,
};

/// Action service config pointing at a mock server.
fn service_config(server: &MockServer) -> ActionServiceConfig {
    ActionServiceConfig {
        base_url: server.uri(),
        login_url: server.uri(),
        client_id: Some("client-1".to_string()),
        client_secret: Some("secret-1".to_string()),
        timeout_secs: 5,
        retry_max: 2,
        retry_backoff_ms: 10,
        token_ttl_secs: 900,
        redaction_fields: Vec::new(),
    }
}

/// Mount the OAuth token endpoint returning a fixed bearer token.
async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "expires_in": 3600,
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_token_fetched_once_and_cached() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v2/integrations/actions/a-1/schemas/inputschema.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "object",
            "title": "Lookup Order",
            "properties": {"order_id": {"type": "string"}},
        })))
        .mount(&server)
        .await;

    let client = ActionClient::new(service_config(&server));
    client.get_input_schema("a-1").await.unwrap();
    client.get_input_schema("a-1").await.unwrap();

    // expect(1) on the token mock verifies the second call reused the cache
    server.verify().await;
}

#[tokio::test]
async fn test_token_failure_surfaces_as_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = ActionClient::new(service_config(&server));
    let result = client.get_input_schema("a-1").await;
    assert!(matches!(result, Err(ActionError::TokenAcquisition(_))));
}

#[tokio::test]
async fn test_execute_posts_arguments() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/v2/integrations/actions/a-1/test"))
        .and(body_string_contains("ORD-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "shipped",
            "order_id": "ORD-42",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ActionClient::new(service_config(&server));
    let result = client
        .execute("a-1", &json!({"order_id": "ORD-42"}))
        .await
        .unwrap();
    assert_eq!(result["status"], "shipped");
}

#[tokio::test]
async fn test_server_error_retried_then_succeeds() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/v2/integrations/actions/a-1/test"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/integrations/actions/a-1/test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;

    let client = ActionClient::new(service_config(&server));
    let result = client.execute("a-1", &json!({})).await.unwrap();
    assert_eq!(result["status"], "ok");
}

#[tokio::test]
async fn test_client_error_not_retried() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/v2/integrations/actions/a-1/test"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = ActionClient::new(service_config(&server));
    let result = client.execute("a-1", &json!({})).await;
    assert!(matches!(result, Err(ActionError::Status(404))));
    server.verify().await;
}

#[tokio::test]
async fn test_catalog_built_from_fetched_schemas() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/v2/integrations/actions/a-1/schemas/inputschema.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "object",
            "title": "Lookup Order",
            "description": "Look up an order by id",
            "properties": {"order_id": {"type": "string"}},
            "required": ["order_id"],
        })))
        .mount(&server)
        .await;
    // a-2 is unreachable; the catalog should skip it
    Mock::given(method("GET"))
        .and(path("/api/v2/integrations/actions/a-2/schemas/inputschema.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = ActionClient::new(service_config(&server));
    let tools = build_data_action_tools(
        &client,
        &["a-1".to_string(), "a-2".to_string()],
        &[],
        &ToolLimits::default(),
    )
    .await;

    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "lookup_order");
    assert_eq!(tools[0].action_id.as_deref(), Some("a-1"));
    assert_eq!(tools[0].parameters["additionalProperties"], false);
}

#[tokio::test]
async fn test_orchestrator_executes_and_redacts() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/v2/integrations/actions/a-1/schemas/inputschema.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "object",
            "title": "Lookup Customer",
            "properties": {"customer_id": {"type": "string"}},
            "required": ["customer_id"],
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/integrations/actions/a-1/test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Jordan",
            "contact": {"ssn": "123-45-6789", "phone": "555-0100"},
        })))
        .mount(&server)
        .await;

    let mut config = service_config(&server);
    config.redaction_fields = vec!["contact.ssn".to_string()];
    let client = Arc::new(ActionClient::new(config));

    let mut definitions = call_control_tools();
    definitions.extend(
        build_data_action_tools(
            &client,
            &["a-1".to_string()],
            &[],
            &ToolLimits::default(),
        )
        .await,
    );
    let mut orchestrator =
        ToolOrchestrator::new(definitions, client, ToolLimits::default());

    let disposition = orchestrator
        .handle(ToolCallRequest {
            call_id: "call-1".to_string(),
            name: "lookup_customer".to_string(),
            arguments: r#"{"customer_id": "C-7"}"#.to_string(),
            response_id: None,
        })
        .await;

    assert!(disposition.termination.is_none());
    let payload: Value = serde_json::from_str(&disposition.payload).unwrap();
    assert_eq!(payload["name"], "Jordan");
    assert_eq!(payload["contact"]["ssn"], "[REDACTED]");
    assert_eq!(payload["contact"]["phone"], "555-0100");
    assert_eq!(orchestrator.history().len(), 1);
}

#[tokio::test]
async fn test_orchestrator_rejects_before_network_on_bad_arguments() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/v2/integrations/actions/a-1/schemas/inputschema.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "object",
            "title": "Lookup Customer",
            "properties": {"customer_id": {"type": "string"}},
            "required": ["customer_id"],
        })))
        .mount(&server)
        .await;
    // No execute mock mounted; a network call would 404 against wiremock
    Mock::given(method("POST"))
        .and(path("/api/v2/integrations/actions/a-1/test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let client = Arc::new(ActionClient::new(service_config(&server)));
    let definitions = build_data_action_tools(
        &client,
        &["a-1".to_string()],
        &[],
        &ToolLimits::default(),
    )
    .await;
    let mut orchestrator =
        ToolOrchestrator::new(definitions, client, ToolLimits::default());

    let disposition = orchestrator
        .handle(ToolCallRequest {
            call_id: "call-1".to_string(),
            name: "lookup_customer".to_string(),
            arguments: r#"{"customer_id": 42}"#.to_string(),
            response_id: None,
        })
        .await;

    let payload: Value = serde_json::from_str(&disposition.payload).unwrap();
    assert_eq!(payload["error"], "invalid_arguments");
    server.verify().await;
}
