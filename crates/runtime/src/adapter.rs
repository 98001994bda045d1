//! `lldb-dap` process lifecycle.
//!
//! [`DapClient`] owns the adapter child process and the [`Connection`] speaking to it over
//! the child's stdin/stdout. The adapter's stderr is forwarded to tracing.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use swiftscope_protocol::dap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::transport::DapTransport;

/// Running debug adapter plus its DAP connection.
pub struct DapClient {
	executable: PathBuf,
	connection: Arc<Connection>,
	child: Mutex<Option<Child>>,
}

impl DapClient {
	/// Spawns the adapter at `executable` and wires up the connection.
	///
	/// # Errors
	///
	/// Returns [`Error::AdapterLaunch`] if the process cannot be spawned or exits right away.
	pub async fn launch(executable: &Path) -> Result<(Self, mpsc::UnboundedReceiver<dap::Event>)> {
		let mut child = Command::new(executable)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| Error::AdapterLaunch(format!("Failed to spawn {}: {e}", executable.display())))?;

		let stdin = child
			.stdin
			.take()
			.ok_or_else(|| Error::AdapterLaunch("adapter stdin unavailable".to_string()))?;
		let stdout = child
			.stdout
			.take()
			.ok_or_else(|| Error::AdapterLaunch("adapter stdout unavailable".to_string()))?;
		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(async move {
				let mut lines = BufReader::new(stderr).lines();
				while let Ok(Some(line)) = lines.next_line().await {
					tracing::debug!(target = "swiftscope.adapter", "{line}");
				}
			});
		}

		tokio::time::sleep(Duration::from_millis(100)).await;
		match child.try_wait() {
			Ok(Some(status)) => {
				return Err(Error::AdapterLaunch(format!(
					"{} exited immediately with status: {status}",
					executable.display()
				)));
			}
			Ok(None) => {}
			Err(e) => {
				return Err(Error::AdapterLaunch(format!("Failed to check adapter status: {e}")));
			}
		}

		let (transport, message_rx) = DapTransport::new(stdin, stdout);
		let (connection, events) = Connection::start(transport.into_transport_parts(message_rx));
		tracing::info!(
			target = "swiftscope.adapter",
			path = %executable.display(),
			pid = child.id(),
			"debug adapter started"
		);

		let client = Self {
			executable: executable.to_path_buf(),
			connection,
			child: Mutex::new(Some(child)),
		};
		Ok((client, events))
	}

	pub fn executable(&self) -> &Path {
		&self.executable
	}

	pub fn connection(&self) -> &Arc<Connection> {
		&self.connection
	}

	pub async fn request(&self, command: &str, arguments: Value) -> Result<Value> {
		self.connection.request(command, arguments).await
	}

	/// Kills the adapter and reaps it. Safe to call more than once.
	pub async fn shutdown(&self) {
		let Some(mut child) = self.child.lock().await.take() else {
			return;
		};
		if let Err(e) = child.start_kill() {
			tracing::debug!(target = "swiftscope.adapter", error = %e, "adapter already gone");
		}
		let _ = tokio::time::timeout(Duration::from_millis(500), child.wait()).await;
	}
}
