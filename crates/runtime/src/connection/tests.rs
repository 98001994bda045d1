use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream, duplex};

use super::*;
use crate::transport::{DapTransport, read_frame};

/// The adapter's side of the pipes: reads our requests, writes its replies.
struct FakeAdapter {
	requests: BufReader<DuplexStream>,
	replies: DuplexStream,
}

impl FakeAdapter {
	async fn next_request(&mut self) -> Value {
		let body = read_frame(&mut self.requests).await.unwrap().expect("request frame");
		serde_json::from_slice(&body).unwrap()
	}

	async fn send(&mut self, message: Value) {
		let body = serde_json::to_vec(&message).unwrap();
		let header = format!("Content-Length: {}\r\n\r\n", body.len());
		self.replies.write_all(header.as_bytes()).await.unwrap();
		self.replies.write_all(&body).await.unwrap();
		self.replies.flush().await.unwrap();
	}

	async fn respond(&mut self, request: &Value, success: bool, body: Value) {
		self.send(json!({
			"seq": 100,
			"type": "response",
			"request_seq": request["seq"],
			"success": success,
			"command": request["command"],
			"body": body,
		}))
		.await;
	}
}

fn start_with(timeout: Duration) -> (Arc<Connection>, mpsc::UnboundedReceiver<dap::Event>, FakeAdapter) {
	let (stdin_read, stdin_write) = duplex(64 * 1024);
	let (stdout_read, stdout_write) = duplex(64 * 1024);

	let (transport, message_rx) = DapTransport::new(stdin_write, stdout_read);
	let (connection, events) = Connection::start_with_timeout(transport.into_transport_parts(message_rx), timeout);

	let adapter = FakeAdapter {
		requests: BufReader::new(stdin_read),
		replies: stdout_write,
	};
	(connection, events, adapter)
}

fn start() -> (Arc<Connection>, mpsc::UnboundedReceiver<dap::Event>, FakeAdapter) {
	start_with(Duration::from_secs(5))
}

#[tokio::test]
async fn test_request_resolves_with_response_body() {
	let (connection, _events, mut adapter) = start();

	let pending = tokio::spawn({
		let connection = Arc::clone(&connection);
		async move { connection.request("threads", Value::Null).await }
	});

	let request = adapter.next_request().await;
	assert_eq!(request["type"], "request");
	assert_eq!(request["command"], "threads");
	adapter
		.respond(&request, true, json!({"threads": [{"id": 1, "name": "main"}]}))
		.await;

	let body = pending.await.unwrap().unwrap();
	assert_eq!(body["threads"][0]["name"], "main");
}

#[tokio::test]
async fn test_sequence_numbers_start_at_one_and_increase() {
	let (connection, _events, mut adapter) = start();

	for expected in 1..=3 {
		let pending = tokio::spawn({
			let connection = Arc::clone(&connection);
			async move { connection.request("threads", Value::Null).await }
		});
		let request = adapter.next_request().await;
		assert_eq!(request["seq"], expected);
		adapter.respond(&request, true, json!({})).await;
		pending.await.unwrap().unwrap();
	}
}

#[tokio::test]
async fn test_unsuccessful_response_is_request_error() {
	let (connection, _events, mut adapter) = start();

	let pending = tokio::spawn({
		let connection = Arc::clone(&connection);
		async move { connection.request("evaluate", json!({"expression": "nope"})).await }
	});

	let request = adapter.next_request().await;
	adapter
		.respond(&request, false, json!({"error": {"id": 1, "format": "use of undeclared identifier 'nope'"}}))
		.await;

	match pending.await.unwrap() {
		Err(Error::Request { command, message }) => {
			assert_eq!(command, "evaluate");
			assert!(message.contains("undeclared identifier"));
		}
		other => panic!("expected request error, got {other:?}"),
	}
}

#[tokio::test]
async fn test_events_are_forwarded() {
	let (_connection, mut events, mut adapter) = start();

	adapter
		.send(json!({"seq": 1, "type": "event", "event": "stopped", "body": {"reason": "breakpoint", "threadId": 3}}))
		.await;

	let event = events.recv().await.unwrap();
	assert_eq!(event.event, "stopped");
	assert_eq!(event.body["threadId"], 3);
}

#[tokio::test]
async fn test_transport_loss_fails_pending_and_closes_events() {
	let (connection, mut events, mut adapter) = start();

	let pending = tokio::spawn({
		let connection = Arc::clone(&connection);
		async move { connection.request("continue", json!({"threadId": 1})).await }
	});
	let _ = adapter.next_request().await;

	drop(adapter);

	assert!(matches!(pending.await.unwrap(), Err(Error::ChannelClosed)));
	assert!(events.recv().await.is_none());
	assert!(connection.is_closed());
	assert!(matches!(
		connection.request("threads", Value::Null).await,
		Err(Error::ChannelClosed)
	));
}

#[tokio::test]
async fn test_dropped_request_removes_pending_entry() {
	let (connection, _events, mut adapter) = start();

	let pending = tokio::spawn({
		let connection = Arc::clone(&connection);
		async move { connection.request("threads", Value::Null).await }
	});
	let _ = adapter.next_request().await;
	assert_eq!(connection.pending.lock().len(), 1);

	pending.abort();
	let _ = pending.await;

	assert!(connection.pending.lock().is_empty());
}

#[tokio::test]
async fn test_reverse_request_is_declined() {
	let (_connection, _events, mut adapter) = start();

	adapter
		.send(json!({"seq": 7, "type": "request", "command": "runInTerminal", "arguments": {"args": ["sh"]}}))
		.await;

	let reply = adapter.next_request().await;
	assert_eq!(reply["type"], "response");
	assert_eq!(reply["request_seq"], 7);
	assert_eq!(reply["success"], false);
	assert_eq!(reply["command"], "runInTerminal");
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
	let (connection, _events, mut adapter) = start_with(Duration::from_millis(50));

	let pending = tokio::spawn({
		let connection = Arc::clone(&connection);
		async move { connection.request("stackTrace", json!({"threadId": 1})).await }
	});
	let _ = adapter.next_request().await;

	assert!(matches!(pending.await.unwrap(), Err(Error::Timeout(_))));
	assert!(connection.pending.lock().is_empty());
}
