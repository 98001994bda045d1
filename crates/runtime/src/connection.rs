//! Request/response correlation on top of [`crate::transport`].
//!
//! [`Connection::start`] spawns three tasks: the transport reader, the transport writer, and
//! a dispatch loop that routes each inbound message:
//!
//! - `response` messages complete the pending request whose `seq` matches `request_seq`
//! - `event` messages go to the event channel returned by `start`
//! - reverse `request`s from the adapter are declined with `success: false`
//!
//! When the reader ends, every pending request fails with [`Error::ChannelClosed`] and the
//! event channel closes. Callers use the closed event channel as the transport-loss signal.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use swiftscope_protocol::dap::{self, ProtocolMessage};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::transport::TransportParts;

/// Default bound on a single adapter round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<dap::Response>>>>>;

/// Removes the pending entry when a request future is dropped before completion.
struct CancelGuard {
	seq: i64,
	pending: PendingMap,
	completed: bool,
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if self.pending.lock().remove(&self.seq).is_some() {
			tracing::debug!(target = "swiftscope.dap", seq = self.seq, "dropped pending request");
		}
	}
}

struct ResponseFuture {
	rx: oneshot::Receiver<Result<dap::Response>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<dap::Response>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.completed = true;
				Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// DAP client connection to a running adapter.
pub struct Connection {
	seq: Arc<AtomicI64>,
	pending: PendingMap,
	outbound_tx: mpsc::UnboundedSender<Value>,
	closed: Arc<AtomicBool>,
	request_timeout: Duration,
}

impl Connection {
	/// Starts the connection tasks and returns the handle plus the adapter's event stream.
	///
	/// Must be called from within a tokio runtime.
	pub fn start(parts: TransportParts) -> (Arc<Self>, mpsc::UnboundedReceiver<dap::Event>) {
		Self::start_with_timeout(parts, DEFAULT_REQUEST_TIMEOUT)
	}

	pub fn start_with_timeout(parts: TransportParts, request_timeout: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<dap::Event>) {
		let TransportParts {
			mut sender,
			receiver,
			message_rx,
		} = parts;

		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Value>();
		let (event_tx, event_rx) = mpsc::unbounded_channel();

		let connection = Arc::new(Self {
			seq: Arc::new(AtomicI64::new(0)),
			pending: Arc::new(Mutex::new(HashMap::new())),
			outbound_tx: outbound_tx.clone(),
			closed: Arc::new(AtomicBool::new(false)),
			request_timeout,
		});

		tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				tracing::warn!(target = "swiftscope.dap", error = %e, "adapter read loop ended with error");
			}
		});

		let writer_pending = Arc::clone(&connection.pending);
		let writer_closed = Arc::clone(&connection.closed);
		tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				if let Err(e) = sender.send(message).await {
					tracing::warn!(target = "swiftscope.dap", error = %e, "adapter write failed");
					fail_pending(&writer_closed, &writer_pending);
					break;
				}
			}
		});

		let dispatch = Dispatch {
			seq: Arc::clone(&connection.seq),
			pending: Arc::clone(&connection.pending),
			closed: Arc::clone(&connection.closed),
			outbound_tx,
			event_tx,
		};
		tokio::spawn(dispatch.run(message_rx));

		(connection, event_rx)
	}

	/// True once the adapter link is gone. No further request can succeed.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Sends `command` and returns the response body.
	///
	/// A `success: false` answer becomes [`Error::Request`] carrying the adapter's message.
	pub async fn request(&self, command: &str, arguments: Value) -> Result<Value> {
		let response = self.send_request(command, arguments).await?;
		if response.success {
			Ok(response.body)
		} else {
			Err(Error::Request {
				command: command.to_string(),
				message: response.error_message(),
			})
		}
	}

	/// Sends `command` and returns the raw response, successful or not.
	pub async fn send_request(&self, command: &str, arguments: Value) -> Result<dap::Response> {
		let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;

		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(seq, tx);
		let guard = CancelGuard {
			seq,
			pending: Arc::clone(&self.pending),
			completed: false,
		};
		// Checked after insertion so a concurrent shutdown either drains this entry or is seen here.
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}

		let message = ProtocolMessage::Request(dap::Request {
			seq,
			command: command.to_string(),
			arguments,
		});
		tracing::debug!(target = "swiftscope.dap", seq, command, "-> request");
		if self.outbound_tx.send(serde_json::to_value(&message)?).is_err() {
			return Err(Error::ChannelClosed);
		}

		match tokio::time::timeout(self.request_timeout, ResponseFuture { rx, guard }).await {
			Ok(result) => result,
			Err(_) => Err(Error::Timeout(format!(
				"{command} got no response within {} ms",
				self.request_timeout.as_millis()
			))),
		}
	}
}

struct Dispatch {
	seq: Arc<AtomicI64>,
	pending: PendingMap,
	closed: Arc<AtomicBool>,
	outbound_tx: mpsc::UnboundedSender<Value>,
	event_tx: mpsc::UnboundedSender<dap::Event>,
}

impl Dispatch {
	async fn run(self, mut message_rx: mpsc::UnboundedReceiver<Value>) {
		while let Some(raw) = message_rx.recv().await {
			match serde_json::from_value::<ProtocolMessage>(raw) {
				Ok(message) => self.dispatch(message),
				Err(e) => tracing::warn!(target = "swiftscope.dap", error = %e, "unparseable adapter message"),
			}
		}
		tracing::debug!(target = "swiftscope.dap", "adapter stream closed");
		fail_pending(&self.closed, &self.pending);
	}

	fn dispatch(&self, message: ProtocolMessage) {
		match message {
			ProtocolMessage::Response(response) => {
				let callback = self.pending.lock().remove(&response.request_seq);
				match callback {
					Some(tx) => {
						tracing::debug!(
							target = "swiftscope.dap",
							request_seq = response.request_seq,
							command = %response.command,
							success = response.success,
							"<- response"
						);
						let _ = tx.send(Ok(response));
					}
					None => tracing::debug!(
						target = "swiftscope.dap",
						request_seq = response.request_seq,
						"response for unknown request"
					),
				}
			}
			ProtocolMessage::Event(event) => {
				tracing::debug!(target = "swiftscope.dap", event = %event.event, "<- event");
				let _ = self.event_tx.send(event);
			}
			ProtocolMessage::Request(request) => {
				tracing::debug!(target = "swiftscope.dap", command = %request.command, "declining reverse request");
				let reply = ProtocolMessage::Response(dap::Response {
					seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
					request_seq: request.seq,
					success: false,
					command: request.command,
					message: Some("not supported".to_string()),
					body: Value::Null,
				});
				if let Ok(value) = serde_json::to_value(&reply) {
					let _ = self.outbound_tx.send(value);
				}
			}
		}
	}
}

fn fail_pending(closed: &AtomicBool, pending: &Mutex<HashMap<i64, oneshot::Sender<Result<dap::Response>>>>) {
	closed.store(true, Ordering::SeqCst);
	let drained: Vec<_> = pending.lock().drain().collect();
	for (_, tx) in drained {
		let _ = tx.send(Err(Error::ChannelClosed));
	}
}
