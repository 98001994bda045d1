//! Persisted bridge binding record.
//!
//! The Transport Supervisor writes one record per live binding; the API server reads it
//! for readiness and reuse. Readers must treat the file as possibly stale and call
//! [`BridgeState::probe`] before acting on it. Writes go through a temp file in the same
//! directory followed by a rename, so a reader never sees a partial record.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::process::{pid_is_alive, port_accepts};

/// Current on-disk schema version.
pub const BRIDGE_STATE_SCHEMA_VERSION: u32 = 1;

/// Default location relative to the working directory.
pub const DEFAULT_STATE_PATH: &str = ".swiftscope/bridge-state.json";

fn bridge_state_schema_version() -> u32 {
	BRIDGE_STATE_SCHEMA_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeState {
	#[serde(default = "bridge_state_schema_version")]
	pub schema_version: u32,
	pub device: String,
	pub bundle_id: String,
	/// Loopback port where the remote debug channel is exposed.
	pub listen_port: u16,
	/// Executable path reported by the device, if any.
	pub app_binary: Option<String>,
	pub target_pid: i64,
	/// PID of the bridge process holding the binding.
	pub bridge_pid: u32,
	/// Unix epoch seconds when the binding was established.
	pub created_at: u64,
}

/// Why a record failed its liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
	Live,
	BridgeGone,
	PortClosed,
}

impl Liveness {
	pub fn is_live(self) -> bool {
		self == Liveness::Live
	}

	pub fn describe(self) -> &'static str {
		match self {
			Liveness::Live => "bridge is live",
			Liveness::BridgeGone => "bridge process is not running",
			Liveness::PortClosed => "bridge port is not accepting connections",
		}
	}
}

impl BridgeState {
	pub fn new(device: impl Into<String>, bundle_id: impl Into<String>, listen_port: u16, target_pid: i64) -> Self {
		Self {
			schema_version: BRIDGE_STATE_SCHEMA_VERSION,
			device: device.into(),
			bundle_id: bundle_id.into(),
			listen_port,
			app_binary: None,
			target_pid,
			bridge_pid: std::process::id(),
			created_at: now_ts(),
		}
	}

	pub fn with_app_binary(mut self, app_binary: Option<String>) -> Self {
		self.app_binary = app_binary;
		self
	}

	/// Loads a record, returning `None` if absent.
	///
	/// Records without a schema version predate the format and are removed.
	pub fn load(path: &Path) -> Result<Option<Self>> {
		let content = match fs::read_to_string(path) {
			Ok(c) => c,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(err) => return Err(state_error(path, err)),
		};

		let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| state_error(path, e))?;
		let schema_version = value.get("schema_version").and_then(|v| v.as_u64()).unwrap_or(0);
		if schema_version == 0 {
			debug!(target = "swiftscope.state", path = %path.display(), "removing bridge state without schema_version");
			let _ = fs::remove_file(path);
			return Ok(None);
		}
		if schema_version != u64::from(BRIDGE_STATE_SCHEMA_VERSION) {
			return Err(Error::State {
				path: path.to_path_buf(),
				reason: format!("unsupported schema_version {schema_version} (expected {BRIDGE_STATE_SCHEMA_VERSION})"),
			});
		}

		let parsed: Self = serde_json::from_value(value).map_err(|e| state_error(path, e))?;
		Ok(Some(parsed))
	}

	/// Atomically replaces the record at `path`.
	pub fn save(&self, path: &Path) -> Result<()> {
		let parent = match path.parent() {
			Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
			_ => PathBuf::from("."),
		};
		fs::create_dir_all(&parent).map_err(|e| state_error(path, e))?;

		let mut normalized = self.clone();
		normalized.schema_version = BRIDGE_STATE_SCHEMA_VERSION;
		let content = serde_json::to_vec_pretty(&normalized)?;

		let mut temp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| state_error(path, e))?;
		temp.write_all(&content).map_err(|e| state_error(path, e))?;
		temp.as_file().sync_all().map_err(|e| state_error(path, e))?;
		temp.persist(path).map_err(|e| state_error(path, e.error))?;
		debug!(target = "swiftscope.state", path = %path.display(), port = self.listen_port, "bridge state saved");
		Ok(())
	}

	/// Removes the record. A missing file is not an error.
	pub fn invalidate(path: &Path) -> Result<()> {
		match fs::remove_file(path) {
			Ok(()) => {
				debug!(target = "swiftscope.state", path = %path.display(), "bridge state invalidated");
				Ok(())
			}
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(err) => Err(state_error(path, err)),
		}
	}

	/// Checks that the bridge process is alive and its port accepts connections.
	pub fn probe(&self) -> Liveness {
		if !pid_is_alive(self.bridge_pid) {
			return Liveness::BridgeGone;
		}
		if !port_accepts(self.listen_port) {
			return Liveness::PortClosed;
		}
		Liveness::Live
	}

	/// True when the record describes the expected device, bundle and port.
	pub fn matches(&self, device: Option<&str>, bundle_id: Option<&str>, port: u16) -> bool {
		let device_ok = device.is_none_or(|d| d == self.device);
		let bundle_ok = bundle_id.is_none_or(|b| b == self.bundle_id);
		device_ok && bundle_ok && self.listen_port == port
	}

	/// True when `app_binary` names the same executable as `program`.
	///
	/// Compares file names because the device reports on-device paths.
	pub fn matches_program(&self, program: &Path) -> bool {
		let Some(reported) = self.app_binary.as_deref() else {
			return true;
		};
		let reported = Path::new(reported);
		if reported == program {
			return true;
		}
		match (reported.file_name(), program.file_name()) {
			(Some(a), Some(b)) => a == b,
			_ => false,
		}
	}
}

/// Current Unix timestamp in seconds.
pub fn now_ts() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}

fn state_error(path: &Path, err: impl std::fmt::Display) -> Error {
	Error::State {
		path: path.to_path_buf(),
		reason: err.to_string(),
	}
}
