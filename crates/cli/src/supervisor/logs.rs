//! Fan-out of supervised process output to `GET /logs` subscribers.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Lines buffered per subscriber before it starts skipping.
pub const LOG_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
	Info,
	Warn,
	Error,
}

impl LogLevel {
	pub fn as_str(self) -> &'static str {
		match self {
			LogLevel::Info => "INFO",
			LogLevel::Warn => "WARN",
			LogLevel::Error => "ERROR",
		}
	}
}

impl fmt::Display for LogLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// `[TIMESTAMP] [LEVEL] [COMPONENT] message`
pub fn format_line(at: DateTime<Utc>, level: LogLevel, component: &str, message: &str) -> String {
	format!(
		"[{}] [{}] [{}] {}",
		at.to_rfc3339_opts(SecondsFormat::Millis, true),
		level,
		component,
		message
	)
}

/// Broadcast hub owned by the supervisor, independent of any HTTP connection.
///
/// Closing the hub marks the log-producing subprocess as gone and ends every
/// [`LogHub::lines`] stream once it has delivered what was already published.
#[derive(Debug, Clone)]
pub struct LogHub {
	tx: broadcast::Sender<String>,
	closed: Arc<watch::Sender<bool>>,
}

impl Default for LogHub {
	fn default() -> Self {
		Self::new()
	}
}

impl LogHub {
	pub fn new() -> Self {
		let (tx, _) = broadcast::channel(LOG_CAPACITY);
		Self {
			tx,
			closed: Arc::new(watch::Sender::new(false)),
		}
	}

	pub fn publish(&self, level: LogLevel, component: &str, message: &str) {
		// No subscribers is fine.
		let _ = self.tx.send(format_line(Utc::now(), level, component, message));
	}

	pub fn subscribe(&self) -> broadcast::Receiver<String> {
		self.tx.subscribe()
	}

	pub fn close(&self) {
		self.closed.send_replace(true);
	}

	pub fn is_closed(&self) -> bool {
		*self.closed.borrow()
	}

	/// Lines published from now on, ending when the hub is closed. Lagging readers skip.
	pub fn lines(&self) -> impl Stream<Item = String> + Send + 'static + use<> {
		let rx = self.tx.subscribe();
		let closed = self.closed.subscribe();
		futures::stream::unfold((rx, closed), |(mut rx, mut closed)| async move {
			loop {
				let next = tokio::select! {
					biased;
					line = rx.recv() => match line {
						Ok(line) => Some(line),
						Err(RecvError::Lagged(skipped)) => {
							debug!(target = "swiftscope.logs", skipped, "log subscriber lagged");
							continue;
						}
						Err(RecvError::Closed) => None,
					},
					_ = closed.wait_for(|closed| *closed) => rx.try_recv().ok(),
				};
				return next.map(|line| (line, (rx, closed)));
			}
		})
	}

	/// Publishes every line of `reader` until EOF.
	pub fn forward<R>(&self, reader: R, level: LogLevel, component: &'static str) -> JoinHandle<()>
	where
		R: AsyncRead + Send + Unpin + 'static,
	{
		let hub = self.clone();
		tokio::spawn(async move {
			let mut lines = BufReader::new(reader).lines();
			loop {
				match lines.next_line().await {
					Ok(Some(line)) => hub.publish(level, component, &line),
					Ok(None) => break,
					Err(e) => {
						debug!(target = "swiftscope.logs", component, error = %e, "log reader stopped");
						break;
					}
				}
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use chrono::TimeZone;

	use super::*;

	#[test]
	fn line_format() {
		let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
		assert_eq!(
			format_line(at, LogLevel::Warn, "device-log-err", "sandbox denied"),
			"[2024-05-01T12:30:00.000Z] [WARN] [device-log-err] sandbox denied"
		);
	}

	#[tokio::test]
	async fn forwarded_lines_reach_subscribers() {
		let hub = LogHub::new();
		let mut rx = hub.subscribe();

		hub.forward(&b"first\nsecond\n"[..], LogLevel::Info, "bridge").await.unwrap();

		let first = rx.recv().await.unwrap();
		assert!(first.ends_with("[INFO] [bridge] first"), "{first}");
		let second = rx.recv().await.unwrap();
		assert!(second.ends_with("[INFO] [bridge] second"), "{second}");
	}

	#[tokio::test]
	async fn line_streams_end_after_close() {
		use futures::StreamExt;

		let hub = LogHub::new();
		let lines = hub.lines();
		hub.publish(LogLevel::Info, "device-log", "last words");
		hub.publish(LogLevel::Info, "device-log", "log stream exited: exit status: 0");
		hub.close();

		let lines: Vec<String> = lines.collect().await;
		assert_eq!(lines.len(), 2, "{lines:?}");
		assert!(lines[1].ends_with("log stream exited: exit status: 0"));
		let mut after_close = std::pin::pin!(hub.lines());
		assert!(after_close.next().await.is_none());
	}

	#[test]
	fn publish_without_subscribers_is_silent() {
		LogHub::new().publish(LogLevel::Error, "bridge", "nobody listening");
	}
}
