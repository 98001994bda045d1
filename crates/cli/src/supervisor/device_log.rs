use std::process::Stdio;

use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::logs::{LogHub, LogLevel};

/// Streams `command`'s output into `hub` until it exits, then publishes the exit status
/// and closes the hub.
///
/// The child is owned by the returned task, not by any subscriber.
pub fn spawn_log_stream(mut command: Command, hub: LogHub) -> JoinHandle<()> {
	command
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.kill_on_drop(true);

	tokio::spawn(async move {
		let mut child = match command.spawn() {
			Ok(child) => child,
			Err(e) => {
				warn!(target = "swiftscope.logs", error = %e, "device log stream failed to start");
				hub.publish(LogLevel::Error, "device-log", &format!("log stream failed to start: {e}"));
				hub.close();
				return;
			}
		};
		info!(target = "swiftscope.logs", pid = ?child.id(), "device log stream started");

		let mut readers = Vec::with_capacity(2);
		if let Some(stdout) = child.stdout.take() {
			readers.push(hub.forward(stdout, LogLevel::Info, "device-log"));
		}
		if let Some(stderr) = child.stderr.take() {
			readers.push(hub.forward(stderr, LogLevel::Warn, "device-log-err"));
		}

		let status = child.wait().await;
		for reader in readers {
			let _ = reader.await;
		}
		match status {
			Ok(status) => {
				info!(target = "swiftscope.logs", %status, "device log stream exited");
				hub.publish(LogLevel::Info, "device-log", &format!("log stream exited: {status}"));
			}
			Err(e) => hub.publish(LogLevel::Error, "device-log", &format!("log stream wait failed: {e}")),
		}
		hub.close();
	})
}

#[cfg(all(test, unix))]
mod tests {
	use super::*;

	#[tokio::test]
	async fn tags_streams_and_reports_exit() {
		let hub = LogHub::new();
		let mut rx = hub.subscribe();
		let mut command = Command::new("sh");
		command.args(["-c", "echo hello; echo oops >&2; exit 3"]);

		spawn_log_stream(command, hub.clone()).await.unwrap();
		assert!(hub.is_closed());

		let mut lines = Vec::new();
		while let Ok(line) = rx.try_recv() {
			lines.push(line);
		}
		assert_eq!(lines.len(), 3, "{lines:?}");
		assert!(lines.iter().any(|l| l.ends_with("[INFO] [device-log] hello")));
		assert!(lines.iter().any(|l| l.ends_with("[WARN] [device-log-err] oops")));
		assert!(lines.last().unwrap().contains("log stream exited"));
	}

	#[tokio::test]
	async fn spawn_failure_is_published() {
		let hub = LogHub::new();
		let mut rx = hub.subscribe();

		spawn_log_stream(Command::new("/nonexistent/devicectl"), hub).await.unwrap();

		let line = rx.try_recv().unwrap();
		assert!(line.contains("[ERROR] [device-log] log stream failed to start"), "{line}");
	}
}
