//! Error types for the swiftscope runtime.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the adapter connection and the device bridge.
#[derive(Debug, Error)]
pub enum Error {
	/// No `lldb-dap` (or `lldb-vscode`) executable could be located.
	#[error("lldb-dap not found. Install Xcode command line tools or set SWIFTSCOPE_LLDB_DAP.")]
	AdapterNotFound,

	/// The debug adapter process could not be started.
	#[error("Failed to launch debug adapter: {0}")]
	AdapterLaunch(String),

	/// The artifact cannot be deployed (missing, or lacking debug metadata).
	#[error("Deployment failed: {0}")]
	Deployment(String),

	/// The device refused to start the target process.
	#[error("Launch failed: {0}")]
	Launch(String),

	/// The local port could not be bound after all retries.
	#[error("Failed to bind 127.0.0.1:{port} after {attempts} attempts: {reason}")]
	Bind { port: u16, attempts: u32, reason: String },

	/// Framing or I/O failure on the adapter or bridge byte stream.
	#[error("Transport error: {0}")]
	Transport(String),

	/// Malformed or unexpected message.
	#[error("Protocol error: {0}")]
	Protocol(String),

	/// The adapter answered a request with `success: false`.
	#[error("{command} failed: {message}")]
	Request { command: String, message: String },

	/// The connection shut down while a request was in flight.
	#[error("Debug adapter connection closed")]
	ChannelClosed,

	/// Timed out waiting for an external condition.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// Persisted bridge state could not be read or written.
	#[error("Bridge state error at {path}: {reason}")]
	State { path: PathBuf, reason: String },

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true when the failure means the adapter link is gone for good.
	pub fn is_disconnect(&self) -> bool {
		matches!(self, Error::ChannelClosed | Error::Transport(_))
	}
}
