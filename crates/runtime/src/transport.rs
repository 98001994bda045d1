//! Content-Length framed transport for the Debug Adapter Protocol.
//!
//! Every message on the wire is
//!
//! ```text
//! Content-Length: <N>\r\n
//! \r\n
//! <N bytes of UTF-8 JSON>
//! ```
//!
//! [`DapTransport`] owns both halves of the adapter's stdio. Split it with
//! [`DapTransport::into_parts`] so the reader loop and writer can run on separate tasks.

#[cfg(test)]
mod tests;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

const CONTENT_LENGTH: &str = "Content-Length";

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

/// Write half: serializes and frames outbound messages.
pub struct DapSender {
	writer: BoxedWriter,
}

impl DapSender {
	pub async fn send(&mut self, message: Value) -> Result<()> {
		let body = serde_json::to_vec(&message)?;
		let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());
		self.writer
			.write_all(header.as_bytes())
			.await
			.map_err(|e| Error::Transport(format!("Failed to write message header: {e}")))?;
		self.writer
			.write_all(&body)
			.await
			.map_err(|e| Error::Transport(format!("Failed to write message body: {e}")))?;
		self.writer
			.flush()
			.await
			.map_err(|e| Error::Transport(format!("Failed to flush message: {e}")))?;
		Ok(())
	}
}

/// Read half: decodes frames and pushes each message into the channel.
pub struct DapReceiver {
	reader: BoxedReader,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl DapReceiver {
	/// Reads until the stream ends or the channel is dropped.
	///
	/// A stream that ends between frames is a clean shutdown; one that ends inside a
	/// frame, or carries a frame without `Content-Length`, is an error.
	pub async fn run(mut self) -> Result<()> {
		while let Some(body) = read_frame(&mut self.reader).await? {
			let message: Value = serde_json::from_slice(&body).map_err(|e| Error::Protocol(format!("Invalid JSON message: {e}")))?;
			if self.message_tx.send(message).is_err() {
				tracing::debug!(target = "swiftscope.dap", "message channel closed, stopping reader");
				break;
			}
		}
		Ok(())
	}
}

/// Parts handed to [`crate::connection::Connection`].
pub struct TransportParts {
	pub sender: DapSender,
	pub receiver: DapReceiver,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Bidirectional DAP transport over a writer (adapter stdin) and reader (adapter stdout).
pub struct DapTransport {
	sender: DapSender,
	receiver: DapReceiver,
}

impl DapTransport {
	pub fn new<W, R>(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<Value>)
	where
		W: AsyncWrite + Send + Unpin + 'static,
		R: AsyncRead + Send + Unpin + 'static,
	{
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let transport = Self {
			sender: DapSender { writer: Box::new(writer) },
			receiver: DapReceiver {
				reader: BufReader::new(Box::new(reader)),
				message_tx,
			},
		};
		(transport, message_rx)
	}

	pub fn into_parts(self) -> (DapSender, DapReceiver) {
		(self.sender, self.receiver)
	}

	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		TransportParts {
			sender: self.sender,
			receiver: self.receiver,
			message_rx,
		}
	}
}

/// Reads one frame body. Returns `None` on EOF at a frame boundary.
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
	R: AsyncBufRead + Unpin,
{
	let mut content_length: Option<usize> = None;
	let mut seen_header = false;
	let mut line = String::new();

	loop {
		line.clear();
		let read = reader
			.read_line(&mut line)
			.await
			.map_err(|e| Error::Transport(format!("Failed to read message header: {e}")))?;
		if read == 0 {
			if seen_header {
				return Err(Error::Transport("stream ended inside a message header".to_string()));
			}
			return Ok(None);
		}

		let trimmed = line.trim_end_matches(['\r', '\n']);
		if trimmed.is_empty() {
			if seen_header {
				break;
			}
			continue;
		}
		seen_header = true;

		if let Some((name, value)) = trimmed.split_once(':') {
			if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
				let length = value
					.trim()
					.parse::<usize>()
					.map_err(|e| Error::Transport(format!("Invalid Content-Length `{}`: {e}", value.trim())))?;
				content_length = Some(length);
			}
		}
	}

	let length = content_length.ok_or_else(|| Error::Transport("message header missing Content-Length".to_string()))?;
	let mut body = vec![0u8; length];
	reader
		.read_exact(&mut body)
		.await
		.map_err(|e| Error::Transport(format!("Failed to read message body: {e}")))?;
	Ok(Some(body))
}
