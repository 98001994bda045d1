//! Transport Supervisor: makes a device-side debugserver reachable on a loopback port.
//!
//! Bootstrap runs install → launch suspended → bind → persist, then starts debugserver
//! attached to the suspended pid and forwards bytes until the binding dies.

mod devicectl;
mod forward;

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

pub use devicectl::{Devicectl, LaunchResult, extract_app_binary, extract_process_identifier, parse_launch_output};
pub use forward::serve;
use tokio::net::TcpListener;
use tokio::process::Child;
use tracing::{info, warn};

use crate::debug_info::check_artifact;
use crate::error::{Error, Result};
use crate::state::BridgeState;

pub const DEFAULT_LISTEN_PORT: u16 = 2331;
pub const DEFAULT_DEBUGSERVER_PATH: &str = "/Developer/usr/libexec/debugserver";
pub const DEFAULT_BIND_ATTEMPTS: u32 = 5;
pub const DEFAULT_BIND_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct BridgeConfig {
	pub device: String,
	pub bundle_id: String,
	pub listen_port: u16,
	/// `.app` bundle pushed to the device before launching.
	pub install_app: Option<PathBuf>,
	/// Refuse to install an artifact without line-number debug info.
	pub require_debug_info: bool,
	pub debugserver_path: String,
	pub devicectl: Devicectl,
	/// Extra arguments for the suspended launch step.
	pub launch_args: Vec<String>,
	pub state_file: Option<PathBuf>,
	pub bind_attempts: u32,
	pub bind_backoff: Duration,
}

impl BridgeConfig {
	pub fn new(device: impl Into<String>, bundle_id: impl Into<String>) -> Self {
		Self {
			device: device.into(),
			bundle_id: bundle_id.into(),
			listen_port: DEFAULT_LISTEN_PORT,
			install_app: None,
			require_debug_info: false,
			debugserver_path: DEFAULT_DEBUGSERVER_PATH.to_string(),
			devicectl: Devicectl::default(),
			launch_args: Vec::new(),
			state_file: None,
			bind_attempts: DEFAULT_BIND_ATTEMPTS,
			bind_backoff: DEFAULT_BIND_BACKOFF,
		}
	}
}

pub struct TransportSupervisor {
	config: BridgeConfig,
}

impl TransportSupervisor {
	pub fn new(config: BridgeConfig) -> Self {
		Self { config }
	}

	pub fn config(&self) -> &BridgeConfig {
		&self.config
	}

	/// Pushes the configured artifact, if any, after checking its debug metadata.
	pub async fn install(&self) -> Result<()> {
		let Some(app) = &self.config.install_app else {
			return Ok(());
		};
		check_artifact(app, self.config.require_debug_info)?;
		info!(target = "swiftscope.bridge", app = %app.display(), device = %self.config.device, "installing");
		self.config.devicectl.install(&self.config.device, app).await
	}

	pub async fn launch_suspended(&self) -> Result<LaunchResult> {
		let launch = self
			.config
			.devicectl
			.launch_suspended(&self.config.device, &self.config.bundle_id, &self.config.launch_args)
			.await?;
		info!(
			target = "swiftscope.bridge",
			pid = launch.pid,
			bundle_id = %self.config.bundle_id,
			app_binary = ?launch.app_binary,
			"process suspended, awaiting debugserver"
		);
		Ok(launch)
	}

	/// Binds `127.0.0.1:<listen_port>`, retrying with doubling backoff.
	pub async fn bind_local(&self) -> Result<TcpListener> {
		let port = self.config.listen_port;
		let attempts = self.config.bind_attempts.max(1);
		let mut delay = self.config.bind_backoff;
		let mut last_error = String::new();

		for attempt in 1..=attempts {
			match TcpListener::bind(("127.0.0.1", port)).await {
				Ok(listener) => {
					info!(target = "swiftscope.bridge", port, attempt, "bridge listening");
					return Ok(listener);
				}
				Err(e) => {
					warn!(target = "swiftscope.bridge", port, attempt, error = %e, "bind failed");
					last_error = e.to_string();
					if attempt < attempts {
						tokio::time::sleep(delay).await;
						delay = delay.saturating_mul(2);
					}
				}
			}
		}

		Err(Error::Bind {
			port,
			attempts,
			reason: last_error,
		})
	}

	/// Writes the binding record, if a state file is configured.
	pub fn persist_state(&self, launch: &LaunchResult) -> Result<Option<BridgeState>> {
		let Some(path) = &self.config.state_file else {
			return Ok(None);
		};
		let app_binary = launch
			.app_binary
			.as_ref()
			.map(|p| std::fs::canonicalize(p).unwrap_or_else(|_| p.clone()).display().to_string());
		let state = BridgeState::new(&self.config.device, &self.config.bundle_id, self.config.listen_port, launch.pid)
			.with_app_binary(app_binary);
		state.save(path)?;
		info!(target = "swiftscope.bridge", path = %path.display(), "bridge state recorded");
		Ok(Some(state))
	}

	pub fn spawn_debugserver(&self, pid: i64) -> Result<Child> {
		info!(target = "swiftscope.bridge", pid, "starting debugserver");
		self.config
			.devicectl
			.debugserver_command(&self.config.device, &self.config.debugserver_path, pid)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| Error::Launch(format!("failed to start debugserver: {e}")))
	}

	/// Full bootstrap followed by forwarding. Returns when the binding is torn down.
	pub async fn run(self) -> Result<()> {
		self.install().await?;
		let launch = self.launch_suspended().await?;
		let listener = self.bind_local().await?;
		let debugserver = self.spawn_debugserver(launch.pid)?;
		if let Err(e) = self.persist_state(&launch) {
			warn!(target = "swiftscope.bridge", error = %e, "failed to record bridge state");
		}
		serve(listener, debugserver, self.config.state_file.as_deref()).await
	}
}

#[cfg(test)]
mod tests {
	use std::path::Path;

	use tempfile::tempdir;

	use super::*;

	#[tokio::test]
	async fn bind_retries_then_fails_with_bind_error() {
		let held = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
		let port = held.local_addr().unwrap().port();

		let mut config = BridgeConfig::new("dev", "com.example.Demo");
		config.listen_port = port;
		config.bind_attempts = 3;
		config.bind_backoff = Duration::from_millis(5);

		match TransportSupervisor::new(config).bind_local().await {
			Err(Error::Bind { port: p, attempts, .. }) => {
				assert_eq!(p, port);
				assert_eq!(attempts, 3);
			}
			other => panic!("expected bind error, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn bind_succeeds_once_port_is_released() {
		let held = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
		let port = held.local_addr().unwrap().port();

		let mut config = BridgeConfig::new("dev", "com.example.Demo");
		config.listen_port = port;
		config.bind_backoff = Duration::from_millis(50);
		let supervisor = TransportSupervisor::new(config);

		let release = tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(20)).await;
			drop(held);
		});
		let listener = supervisor.bind_local().await.unwrap();
		assert_eq!(listener.local_addr().unwrap().port(), port);
		release.await.unwrap();
	}

	#[tokio::test]
	async fn install_rejects_missing_artifact() {
		let mut config = BridgeConfig::new("dev", "com.example.Demo");
		config.install_app = Some(Path::new("/definitely/not/here/Demo.app").to_path_buf());
		let err = TransportSupervisor::new(config).install().await.unwrap_err();
		assert!(matches!(err, Error::Deployment(_)));
	}

	#[tokio::test]
	async fn install_without_artifact_is_a_no_op() {
		let config = BridgeConfig::new("dev", "com.example.Demo");
		assert!(TransportSupervisor::new(config).install().await.is_ok());
	}

	#[test]
	fn persist_state_writes_record() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("bridge-state.json");
		let mut config = BridgeConfig::new("dev", "com.example.Demo");
		config.state_file = Some(path.clone());
		config.listen_port = 4321;

		let launch = LaunchResult {
			pid: 99,
			app_binary: Some(PathBuf::from("/device/Demo.app/Demo")),
		};
		let written = TransportSupervisor::new(config).persist_state(&launch).unwrap().unwrap();

		let loaded = BridgeState::load(&path).unwrap().unwrap();
		assert_eq!(loaded, written);
		assert_eq!(loaded.listen_port, 4321);
		assert_eq!(loaded.target_pid, 99);
		assert_eq!(loaded.app_binary.as_deref(), Some("/device/Demo.app/Demo"));
		assert_eq!(loaded.bridge_pid, std::process::id());
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn launch_failure_surfaces_device_message() {
		use std::os::unix::fs::PermissionsExt;

		let dir = tempdir().unwrap();
		let fake = dir.path().join("devicectl");
		std::fs::write(&fake, "#!/bin/sh\necho 'trust prompt pending' >&2\nexit 1\n").unwrap();
		let mut perms = std::fs::metadata(&fake).unwrap().permissions();
		perms.set_mode(0o755);
		std::fs::set_permissions(&fake, perms).unwrap();

		let mut config = BridgeConfig::new("dev", "com.example.Demo");
		config.devicectl = Devicectl::new(fake.display().to_string(), "");

		match TransportSupervisor::new(config).launch_suspended().await {
			Err(Error::Launch(message)) => assert!(message.contains("trust prompt pending")),
			other => panic!("expected launch error, got {other:?}"),
		}
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn launch_reads_pid_from_json_output() {
		use std::os::unix::fs::PermissionsExt;

		let dir = tempdir().unwrap();
		let fake = dir.path().join("devicectl");
		// Writes the JSON report to the path following `-j`.
		let script = r#"#!/bin/sh
while [ "$#" -gt 0 ]; do
  if [ "$1" = "-j" ]; then
    printf '{"result":{"process":{"processIdentifier":512,"executableURL":"file:///device/Demo.app/Demo"}}}' > "$2"
  fi
  shift
done
"#;
		std::fs::write(&fake, script).unwrap();
		let mut perms = std::fs::metadata(&fake).unwrap().permissions();
		perms.set_mode(0o755);
		std::fs::set_permissions(&fake, perms).unwrap();

		let mut config = BridgeConfig::new("dev", "com.example.Demo");
		config.devicectl = Devicectl::new(fake.display().to_string(), "");

		let launch = TransportSupervisor::new(config).launch_suspended().await.unwrap();
		assert_eq!(launch.pid, 512);
		assert_eq!(launch.app_binary, Some(PathBuf::from("/device/Demo.app/Demo")));
	}
}
