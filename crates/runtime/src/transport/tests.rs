use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::*;

fn frame(message: &Value) -> Vec<u8> {
	let body = serde_json::to_vec(message).unwrap();
	let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
	frame.extend_from_slice(&body);
	frame
}

#[tokio::test]
async fn test_send_message_writes_content_length_header() {
	let (mut adapter_stdin, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, _stdout_write) = tokio::io::duplex(1024);

	let (transport, _rx) = DapTransport::new(stdin_write, stdout_read);
	let (mut sender, _receiver) = transport.into_parts();

	let message = serde_json::json!({"seq": 1, "type": "request", "command": "threads"});
	sender.send(message.clone()).await.unwrap();

	let expected = frame(&message);
	let mut written = vec![0u8; expected.len()];
	adapter_stdin.read_exact(&mut written).await.unwrap();
	assert_eq!(written, expected);
}

#[tokio::test]
async fn test_multiple_messages_in_sequence() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(4096);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(4096);

	let (transport, mut rx) = DapTransport::new(stdin_write, stdout_read);
	let (_sender, receiver) = transport.into_parts();
	let read_task = tokio::spawn(receiver.run());

	let messages = vec![
		serde_json::json!({"seq": 1, "type": "event", "event": "initialized"}),
		serde_json::json!({"seq": 2, "type": "event", "event": "stopped", "body": {"reason": "entry"}}),
		serde_json::json!({"seq": 3, "type": "response", "request_seq": 1, "success": true, "command": "attach"}),
	];

	// Write all frames in one chunk so the reader has to split them itself.
	let mut bytes = Vec::new();
	for message in &messages {
		bytes.extend(frame(message));
	}
	stdout_write.write_all(&bytes).await.unwrap();
	stdout_write.flush().await.unwrap();

	for expected in &messages {
		assert_eq!(&rx.recv().await.unwrap(), expected);
	}

	drop(stdout_write);
	assert!(read_task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_large_message() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024 * 1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024 * 1024);

	let (transport, mut rx) = DapTransport::new(stdin_write, stdout_read);
	let (_sender, receiver) = transport.into_parts();
	let read_task = tokio::spawn(receiver.run());

	let large = serde_json::json!({
		"seq": 1,
		"type": "event",
		"event": "output",
		"body": {"output": "x".repeat(100_000)}
	});
	stdout_write.write_all(&frame(&large)).await.unwrap();

	assert_eq!(rx.recv().await.unwrap(), large);

	drop(stdout_write);
	let _ = read_task.await;
}

#[tokio::test]
async fn test_header_name_is_case_insensitive_and_extra_headers_are_ignored() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (transport, mut rx) = DapTransport::new(stdin_write, stdout_read);
	let (_sender, receiver) = transport.into_parts();
	let read_task = tokio::spawn(receiver.run());

	let body = br#"{"seq":1,"type":"event","event":"initialized"}"#;
	let header = format!("content-length: {}\r\nContent-Type: application/vscode-jsonrpc\r\n\r\n", body.len());
	stdout_write.write_all(header.as_bytes()).await.unwrap();
	stdout_write.write_all(body).await.unwrap();

	let received = rx.recv().await.unwrap();
	assert_eq!(received["event"], "initialized");

	drop(stdout_write);
	let _ = read_task.await;
}

#[tokio::test]
async fn test_missing_content_length_is_an_error() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (transport, _rx) = DapTransport::new(stdin_write, stdout_read);
	let (_sender, receiver) = transport.into_parts();

	stdout_write.write_all(b"Content-Type: json\r\n\r\n{}").await.unwrap();
	drop(stdout_write);

	let err = receiver.run().await.unwrap_err();
	assert!(err.to_string().contains("missing Content-Length"), "unexpected error: {err}");
}

#[tokio::test]
async fn test_truncated_body_is_an_error() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (transport, _rx) = DapTransport::new(stdin_write, stdout_read);
	let (_sender, receiver) = transport.into_parts();

	stdout_write.write_all(b"Content-Length: 50\r\n\r\n{\"seq\":").await.unwrap();
	drop(stdout_write);

	let err = receiver.run().await.unwrap_err();
	assert!(err.to_string().contains("Failed to read message body"), "unexpected error: {err}");
}

#[tokio::test]
async fn test_eof_between_frames_is_clean_shutdown() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, stdout_write) = tokio::io::duplex(1024);

	let (transport, _rx) = DapTransport::new(stdin_write, stdout_read);
	let (_sender, receiver) = transport.into_parts();

	drop(stdout_write);
	assert!(receiver.run().await.is_ok());
}
