//! Seam between the session and the process that speaks DAP.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use swiftscope_protocol::dap;
use swiftscope_runtime::{Connection, DapClient};
use tokio::sync::mpsc;

use crate::error::SessionError;

/// A DAP peer the session can issue requests to.
#[async_trait]
pub trait DebugAdapter: Send + Sync {
	/// Sends `command` and returns the response body.
	async fn request(&self, command: &str, arguments: Value) -> swiftscope_runtime::Result<Value>;

	/// Releases the peer. Called once the session no longer needs it.
	async fn shutdown(&self) {}
}

#[async_trait]
impl DebugAdapter for DapClient {
	async fn request(&self, command: &str, arguments: Value) -> swiftscope_runtime::Result<Value> {
		DapClient::request(self, command, arguments).await
	}

	async fn shutdown(&self) {
		DapClient::shutdown(self).await;
	}
}

#[async_trait]
impl DebugAdapter for Connection {
	async fn request(&self, command: &str, arguments: Value) -> swiftscope_runtime::Result<Value> {
		Connection::request(self, command, arguments).await
	}
}

/// Adapter handle plus the event stream it feeds.
pub struct AdapterHandle {
	pub adapter: Arc<dyn DebugAdapter>,
	pub events: mpsc::UnboundedReceiver<dap::Event>,
}

/// Produces a fresh adapter for every attach.
#[async_trait]
pub trait AdapterLauncher: Send + Sync {
	async fn launch(&self) -> Result<AdapterHandle, SessionError>;
}

/// Spawns `lldb-dap` processes.
pub struct LldbDapLauncher {
	executable: PathBuf,
}

impl LldbDapLauncher {
	pub fn new(executable: PathBuf) -> Self {
		Self { executable }
	}

	/// Uses `explicit` when given, otherwise searches the usual locations.
	pub fn locate(explicit: Option<&std::path::Path>) -> Result<Self, SessionError> {
		let executable = swiftscope_runtime::driver::resolve_adapter(explicit)?;
		Ok(Self::new(executable))
	}

	pub fn executable(&self) -> &std::path::Path {
		&self.executable
	}
}

#[async_trait]
impl AdapterLauncher for LldbDapLauncher {
	async fn launch(&self) -> Result<AdapterHandle, SessionError> {
		let (client, events) = DapClient::launch(&self.executable).await?;
		Ok(AdapterHandle {
			adapter: Arc::new(client),
			events,
		})
	}
}
