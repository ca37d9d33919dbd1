use std::sync::Arc;
use std::time::{Duration, Instant};

use mockito::{Matcher, ServerGuard};
use serde_json::json;

use super::{rpc_result, runtime};
use crate::mcp::protocol::encode_request;
use crate::mcp::{McpError, McpTransport, ReconnectPolicy, SseTransport, TransportConfig};

const FAST_RECONNECT: ReconnectPolicy = ReconnectPolicy {
    delay: Duration::from_millis(50),
    max_attempts: None,
};

fn transport_for(server: &ServerGuard, timeout: Duration) -> SseTransport {
    let config = TransportConfig::new("stream", format!("{}/sse", server.url()))
        .with_timeout(timeout)
        .with_reconnect(FAST_RECONNECT);
    SseTransport::new(config).unwrap()
}

async fn mock_stream(server: &mut ServerGuard, body: &str) {
    server
        .mock("GET", "/sse")
        .match_header("accept", "text/event-stream")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;
}

#[test]
fn test_endpoint_event_sets_post_target() {
    runtime().block_on(async {
        let mut server = mockito::Server::new_async().await;
        mock_stream(&mut server, "event: endpoint\ndata: /rpc\n\n").await;
        let post = server
            .mock("POST", "/rpc")
            .match_body(Matcher::PartialJson(json!({"id": 1, "method": "tools/list"})))
            .with_status(200)
            .with_body(rpc_result(1, json!({"tools": []})))
            .create_async()
            .await;

        let transport = transport_for(&server, Duration::from_secs(5));
        transport.connect().await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(transport.base_url(), server.url());
        assert_eq!(transport.endpoint(), Some(format!("{}/rpc", server.url())));

        let response = transport
            .request(encode_request(1, "tools/list", None), 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response["result"]["tools"], json!([]));
        post.assert_async().await;

        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
        assert!(transport.endpoint().is_none());
    });
}

#[test]
fn test_response_delivered_on_stream() {
    runtime().block_on(async {
        let mut server = mockito::Server::new_async().await;
        mock_stream(
            &mut server,
            "event: endpoint\ndata: /rpc\n\n\
             event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"via\":\"stream\"}}\n\n",
        )
        .await;
        server
            .mock("POST", "/rpc")
            .with_status(202)
            .with_body("Accepted")
            .create_async()
            .await;

        let transport = transport_for(&server, Duration::from_secs(5));
        transport.connect().await.unwrap();

        let response = transport
            .request(encode_request(1, "tools/list", None), 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response["result"]["via"], "stream");

        transport.disconnect().await.unwrap();
    });
}

#[test]
fn test_server_ping_does_not_answer_pending_request() {
    runtime().block_on(async {
        let mut server = mockito::Server::new_async().await;
        mock_stream(
            &mut server,
            "event: endpoint\ndata: /rpc\n\n\
             event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n\n\
             event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"tools\":[]}}\n\n",
        )
        .await;
        server
            .mock("POST", "/rpc")
            .with_status(202)
            .create_async()
            .await;

        let transport = transport_for(&server, Duration::from_secs(5));
        transport.connect().await.unwrap();

        let response = transport
            .request(encode_request(1, "tools/list", None), 1)
            .await
            .unwrap()
            .unwrap();
        assert!(response.get("method").is_none(), "got {}", response);
        assert_eq!(response["result"]["tools"], json!([]));

        transport.disconnect().await.unwrap();
    });
}

#[test]
fn test_notification_returns_none() {
    runtime().block_on(async {
        let mut server = mockito::Server::new_async().await;
        mock_stream(&mut server, "event: endpoint\ndata: rpc\n\n").await;
        let post = server
            .mock("POST", "/rpc")
            .match_body(Matcher::PartialJson(json!({"method": "notifications/initialized"})))
            .with_status(202)
            .create_async()
            .await;

        let transport = transport_for(&server, Duration::from_secs(5));
        transport.connect().await.unwrap();

        let response = transport
            .request(encode_request(0, "notifications/initialized", None), 0)
            .await
            .unwrap();
        assert!(response.is_none());
        post.assert_async().await;

        transport.disconnect().await.unwrap();
    });
}

#[test]
fn test_missing_response_times_out() {
    runtime().block_on(async {
        let mut server = mockito::Server::new_async().await;
        mock_stream(&mut server, "event: endpoint\ndata: /rpc\n\n").await;
        server
            .mock("POST", "/rpc")
            .with_status(202)
            .create_async()
            .await;

        let timeout = Duration::from_millis(400);
        let transport = transport_for(&server, timeout);
        transport.connect().await.unwrap();

        let start = Instant::now();
        let err = transport
            .request(encode_request(7, "tools/call", None), 7)
            .await
            .unwrap_err();

        assert!(matches!(err, McpError::Timeout(_)), "got {:?}", err);
        assert!(err.to_string().contains('7'));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "returned after {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "returned after {:?}", elapsed);
        assert!(transport.last_error().is_some());

        transport.disconnect().await.unwrap();
    });
}

#[test]
fn test_stream_error_fails_connect_fast() {
    runtime().block_on(async {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/sse")
            .with_status(500)
            .with_body("boom")
            .expect_at_least(1)
            .create_async()
            .await;

        let transport = transport_for(&server, Duration::from_secs(10));
        let start = Instant::now();
        let err = transport.connect().await.unwrap_err();

        assert!(matches!(err, McpError::Connection(_)), "got {:?}", err);
        assert!(err.to_string().contains("500"));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!transport.is_connected());
    });
}

#[test]
fn test_no_endpoint_event_times_out() {
    runtime().block_on(async {
        let mut server = mockito::Server::new_async().await;
        mock_stream(&mut server, ": keep-alive\n\n").await;

        let transport = transport_for(&server, Duration::from_millis(300));
        let err = transport.connect().await.unwrap_err();

        assert!(matches!(err, McpError::Timeout(_)), "got {:?}", err);
        assert!(!transport.is_connected());
        assert!(transport.last_error().unwrap().contains("no endpoint"));
    });
}

#[test]
fn test_unreachable_server_fails_connect() {
    runtime().block_on(async {
        let config = TransportConfig::new("stream", "http://127.0.0.1:9/sse")
            .with_timeout(Duration::from_secs(5))
            .with_reconnect(FAST_RECONNECT);
        let transport = SseTransport::new(config).unwrap();

        let err = transport.connect().await.unwrap_err();
        assert!(err.is_transient());
        assert!(!transport.is_connected());
    });
}

#[test]
fn test_disconnect_fails_in_flight_request() {
    runtime().block_on(async {
        let mut server = mockito::Server::new_async().await;
        mock_stream(&mut server, "event: endpoint\ndata: /rpc\n\n").await;
        server
            .mock("POST", "/rpc")
            .with_status(202)
            .create_async()
            .await;

        let transport = Arc::new(transport_for(&server, Duration::from_secs(10)));
        transport.connect().await.unwrap();

        let in_flight = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                transport
                    .request(encode_request(3, "tools/call", None), 3)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        let start = Instant::now();
        transport.disconnect().await.unwrap();

        let outcome = in_flight.await.unwrap();
        assert!(matches!(outcome, Err(McpError::Connection(_))), "got {:?}", outcome);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(transport.pending_responses(), 0);
    });
}

#[test]
fn test_reconnects_after_stream_closes() {
    runtime().block_on(async {
        let mut server = mockito::Server::new_async().await;
        let stream = server
            .mock("GET", "/sse")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("event: endpoint\ndata: /rpc\n\n")
            .expect_at_least(3)
            .create_async()
            .await;

        let transport = transport_for(&server, Duration::from_secs(5));
        transport.connect().await.unwrap();

        // Each body ends the stream; the reader keeps reopening it.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(transport.is_connected());
        stream.assert_async().await;

        transport.disconnect().await.unwrap();
    });
}

#[test]
fn test_reconnect_budget_spent_by_streams_without_events() {
    runtime().block_on(async {
        let mut server = mockito::Server::new_async().await;
        let stream = server
            .mock("GET", "/sse")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(": hello\n\n")
            .expect(3)
            .create_async()
            .await;

        let config = TransportConfig::new("stream", format!("{}/sse", server.url()))
            .with_timeout(Duration::from_secs(5))
            .with_reconnect(ReconnectPolicy {
                delay: Duration::from_millis(50),
                max_attempts: Some(2),
            });
        let transport = SseTransport::new(config).unwrap();

        let start = Instant::now();
        let err = transport.connect().await.unwrap_err();

        assert!(matches!(err, McpError::Connection(_)), "got {:?}", err);
        assert!(start.elapsed() < Duration::from_secs(3));
        stream.assert_async().await;
    });
}

#[test]
fn test_destroy_resets_state() {
    runtime().block_on(async {
        let mut server = mockito::Server::new_async().await;
        mock_stream(&mut server, "event: endpoint\ndata: /rpc\n\n").await;

        let transport = transport_for(&server, Duration::from_secs(5));
        transport.connect().await.unwrap();
        transport.destroy();

        assert!(!transport.is_connected());
        assert!(transport.endpoint().is_none());
        assert!(transport.last_error().is_none());
        let err = transport
            .request(encode_request(1, "tools/list", None), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotConnected(_)));
    });
}
