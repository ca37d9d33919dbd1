use std::time::Duration;

use agentry_core::Session;
use serde_json::{Value as JsonValue, json};

use super::{echo_tool_list, mock_handshake, mock_method, rpc_result, runtime};
use crate::ToolBus;
use crate::mcp::{McpError, McpManager, McpServerConfig, McpServersConfig, ReconnectPolicy};

const UNREACHABLE: &str = "http://127.0.0.1:9/mcp";

async fn mock_echo_server() -> mockito::ServerGuard {
    let mut server = mockito::Server::new_async().await;
    mock_handshake(&mut server, "/mcp").await;
    mock_method(&mut server, "/mcp", "tools/list", rpc_result(2, echo_tool_list())).await;
    mock_method(
        &mut server,
        "/mcp",
        "tools/call",
        rpc_result(3, json!({"content": [{"type": "text", "text": "echoed"}]})),
    )
    .await;
    server
}

fn manager() -> McpManager {
    McpManager::new().with_reconnect(ReconnectPolicy {
        delay: Duration::from_millis(50),
        max_attempts: Some(2),
    })
}

#[test]
fn test_connect_all_skips_unreachable_server() {
    runtime().block_on(async {
        let server = mock_echo_server().await;
        let servers = vec![
            McpServerConfig::new("down", UNREACHABLE).with_timeout_ms(2_000),
            McpServerConfig::new("good", format!("{}/mcp", server.url())),
            McpServerConfig::new("off", UNREACHABLE).with_enabled(false),
        ];

        let manager = manager();
        let mut toolbus = ToolBus::new();
        let mut session = Session::new();

        let connected = manager.connect_all(&servers, &mut toolbus, &mut session).await;

        assert_eq!(connected, 1);
        assert_eq!(manager.list_running().await, ["good"]);
        assert!(toolbus.contains("mcp.good.echo"));
        assert_eq!(toolbus.len(), 1);
        assert_eq!(session.resource_count(), 1);
    });
}

#[test]
fn test_tools_callable_through_toolbus() {
    runtime().block_on(async {
        let server = mock_echo_server().await;
        let servers = vec![McpServerConfig::new("good", format!("{}/mcp", server.url()))];

        let manager = manager();
        let mut toolbus = ToolBus::new();
        let mut session = Session::new();
        manager.connect_all(&servers, &mut toolbus, &mut session).await;

        let info = &toolbus.list_tools()[0];
        assert_eq!(info.name, "mcp.good.echo");
        assert_eq!(info.description, "Echo text back");

        let text = toolbus.call_json("mcp.good.echo", r#"{"text":"x"}"#).await;
        let value: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(value, "echoed");

        assert_eq!(
            manager.call_tool("good", "echo", "{}").await.unwrap(),
            "echoed"
        );

        let listed = manager.list_all_tools().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "mcp.good.echo");
        assert_eq!(listed[0].original_name, "echo");
        assert!(matches!(
            manager.call_tool("good", "nope", "{}").await,
            Err(McpError::ToolNotFound(_))
        ));
    });
}

#[test]
fn test_session_close_tears_down_clients() {
    runtime().block_on(async {
        let first = mock_echo_server().await;
        let second = mock_echo_server().await;
        let servers = vec![
            McpServerConfig::new("one", format!("{}/mcp", first.url())),
            McpServerConfig::new("two", format!("{}/mcp", second.url())),
        ];

        let manager = manager();
        let mut toolbus = ToolBus::new();
        let mut session = Session::new();
        assert_eq!(manager.connect_all(&servers, &mut toolbus, &mut session).await, 2);

        let one = manager.client("one").await.unwrap();
        let two = manager.client("two").await.unwrap();
        assert!(one.is_connected() && two.is_connected());

        assert_eq!(session.close().await, 2);
        assert!(session.is_closed());
        assert!(!one.is_connected());
        assert!(!two.is_connected());

        let text = toolbus.call_json("mcp.one.echo", "{}").await;
        let value: JsonValue = serde_json::from_str(&text).unwrap();
        assert!(value["error"].as_str().unwrap().contains("Not connected"));
    });
}

#[test]
fn test_toolbus_call_without_text_returns_result_object() {
    runtime().block_on(async {
        let mut server = mockito::Server::new_async().await;
        mock_handshake(&mut server, "/mcp").await;
        mock_method(&mut server, "/mcp", "tools/list", rpc_result(2, echo_tool_list())).await;
        let result = json!({"content": [{"type": "image", "data": "AAAA", "mimeType": "image/png"}]});
        mock_method(&mut server, "/mcp", "tools/call", rpc_result(3, result.clone())).await;

        let servers = vec![McpServerConfig::new("pics", format!("{}/mcp", server.url()))];
        let manager = manager();
        let mut toolbus = ToolBus::new();
        let mut session = Session::new();
        manager.connect_all(&servers, &mut toolbus, &mut session).await;

        let text = toolbus.call_json("mcp.pics.echo", "{}").await;
        let value: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(value, result);
    });
}

#[test]
fn test_connect_again_in_new_session_after_close() {
    runtime().block_on(async {
        let server = mock_echo_server().await;
        let servers = vec![McpServerConfig::new("good", format!("{}/mcp", server.url()))];
        let manager = manager();

        let mut first_bus = ToolBus::new();
        let mut first = Session::new();
        assert_eq!(manager.connect_all(&servers, &mut first_bus, &mut first).await, 1);
        first.close().await;

        assert!(!manager.is_running("good").await);
        assert!(manager.list_running().await.is_empty());
        assert!(manager.list_all_tools().await.is_empty());

        let mut second_bus = ToolBus::new();
        let mut second = Session::new();
        assert_eq!(manager.connect_all(&servers, &mut second_bus, &mut second).await, 1);
        assert_eq!(manager.list_running().await, ["good"]);
        assert!(second_bus.contains("mcp.good.echo"));
        assert_eq!(second.resource_count(), 1);
        assert!(manager.client("good").await.unwrap().is_connected());
    });
}

#[test]
fn test_connect_all_on_closed_session_does_nothing() {
    runtime().block_on(async {
        let mut session = Session::new();
        session.close().await;

        let servers = vec![McpServerConfig::new("a", UNREACHABLE)];
        let mut toolbus = ToolBus::new();
        assert_eq!(manager().connect_all(&servers, &mut toolbus, &mut session).await, 0);
        assert!(toolbus.is_empty());
    });
}

#[test]
fn test_connect_configured_from_file() {
    runtime().block_on(async {
        let server = mock_echo_server().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".mcp.json");

        let mut config = McpServersConfig::new();
        config.add_server(McpServerConfig::new("filed", format!("{}/mcp", server.url())));
        config.save(&path).unwrap();

        let manager = McpManager::load(&path).unwrap();
        let mut toolbus = ToolBus::new();
        let mut session = Session::new();

        assert_eq!(manager.connect_configured(&mut toolbus, &mut session).await, 1);
        assert!(toolbus.contains("mcp.filed.echo"));
    });
}

#[test]
fn test_start_and_stop_server() {
    runtime().block_on(async {
        let server = mock_echo_server().await;
        let config = McpServerConfig::new("solo", format!("{}/mcp", server.url()));
        let manager = manager();

        let client = manager.start_server(&config).await.unwrap();
        assert_eq!(client.tool_count(), 1);
        assert!(manager.is_running("solo").await);
        assert!(matches!(
            manager.start_server(&config).await,
            Err(McpError::ServerAlreadyRunning(_))
        ));

        manager.stop_server("solo").await.unwrap();
        assert!(!manager.is_running("solo").await);
        assert!(!client.is_connected());
    });
}

#[test]
fn test_stop_all() {
    runtime().block_on(async {
        let server = mock_echo_server().await;
        let manager = manager();
        let client = manager
            .start_server(&McpServerConfig::new("a", format!("{}/mcp", server.url())))
            .await
            .unwrap();

        manager.stop_all().await;
        assert!(manager.list_running().await.is_empty());
        assert!(!client.is_connected());
    });
}

#[test]
fn test_server_test_reports_details() {
    runtime().block_on(async {
        let server = mock_echo_server().await;
        let manager = manager();

        let ok = manager
            .test_server(&McpServerConfig::new("probe", format!("{}/mcp", server.url())))
            .await;
        assert!(ok.success);
        assert_eq!(ok.server_name.as_deref(), Some("mock-mcp"));
        assert_eq!(ok.server_version.as_deref(), Some("0.3.1"));
        assert_eq!(ok.tools, ["echo"]);
        assert_eq!(ok.tool_count(), 1);
        assert!(ok.error.is_none());
        assert!(!manager.is_running("probe").await);

        let down = manager
            .test_server(&McpServerConfig::new("down", UNREACHABLE).with_timeout_ms(2_000))
            .await;
        assert!(!down.success);
        assert!(down.error.is_some());
    });
}
