//! Supervision of the `swiftscope-bridge` child process.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use swiftscope_runtime::state::now_ts;
use swiftscope_runtime::{BridgeState, Error as RuntimeError, GroupSignal, signal_group};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::logs::{LogHub, LogLevel};
use super::probe_record;
use crate::config::Config;
use crate::error::Result;

pub const READY_ATTEMPTS: u32 = 50;
pub const READY_INTERVAL: Duration = Duration::from_millis(100);
/// How long a bridge gets to drop its debugserver after SIGTERM.
pub const TERM_GRACE: Duration = Duration::from_secs(2);

/// Start/stop control over the transport binding, used by `launch` and `restart`.
#[async_trait]
pub trait BridgeControl: Send + Sync {
	/// Returns the live binding, starting a bridge if none is running.
	async fn ensure_running(&self) -> Result<BridgeState>;

	/// Terminates the current bridge, invalidates its record and starts a new one.
	async fn restart(&self) -> Result<BridgeState>;

	async fn shutdown(&self);
}

struct BridgeChild {
	child: Child,
	/// Also the process group id; kept because `Child::id` is gone once reaped.
	pid: Option<u32>,
	readers: Vec<JoinHandle<()>>,
}

pub struct BridgeSupervisor {
	bin: String,
	args: Vec<String>,
	device: String,
	bundle_id: String,
	port: u16,
	state_file: PathBuf,
	logs: LogHub,
	ready_attempts: u32,
	ready_interval: Duration,
	current: Mutex<Option<BridgeChild>>,
}

impl BridgeSupervisor {
	/// Builds the supervisor for a managed configuration, `None` otherwise.
	pub fn from_config(config: &Config, logs: LogHub) -> Option<Self> {
		let settings = config.bridge.as_ref()?;
		let device = config.device.clone()?;
		let bundle_id = config.bundle_id.clone()?;
		let state_file = config.state_file.clone()?;

		let mut args = settings.extra_args.clone();
		args.extend([
			"--device".to_string(),
			device.clone(),
			"--bundle-id".to_string(),
			bundle_id.clone(),
			"--listen-port".to_string(),
			config.debugserver_port.to_string(),
			"--state-file".to_string(),
			state_file.display().to_string(),
		]);
		if let Some(app) = &settings.app_bundle {
			args.push("--install-app".to_string());
			args.push(app.display().to_string());
		}
		if config.require_debug_info {
			args.push("--require-debug-info".to_string());
		}

		Some(Self {
			bin: settings.bin.clone(),
			args,
			device,
			bundle_id,
			port: config.debugserver_port,
			state_file,
			logs,
			ready_attempts: READY_ATTEMPTS,
			ready_interval: READY_INTERVAL,
			current: Mutex::new(None),
		})
	}

	pub fn with_readiness(mut self, attempts: u32, interval: Duration) -> Self {
		self.ready_attempts = attempts;
		self.ready_interval = interval;
		self
	}

	/// Arguments passed to the bridge executable.
	pub fn args(&self) -> &[String] {
		&self.args
	}

	pub fn state_file(&self) -> &Path {
		&self.state_file
	}

	/// True while the supervised child has not exited.
	pub async fn is_running(&self) -> bool {
		let mut current = self.current.lock().await;
		child_alive(&mut current)
	}

	async fn spawn(&self, slot: &mut Option<BridgeChild>) -> Result<BridgeState> {
		info!(target = "swiftscope.supervisor", bin = %self.bin, port = self.port, "starting bridge");
		self.logs.publish(LogLevel::Info, "supervisor", &format!("starting {} on port {}", self.bin, self.port));

		let started_at = now_ts();
		let mut command = Command::new(&self.bin);
		command
			.args(&self.args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		// Own group, so teardown reaches the debugserver the bridge launched.
		#[cfg(unix)]
		command.process_group(0);
		let mut child = command
			.spawn()
			.map_err(|e| RuntimeError::Launch(format!("failed to start bridge `{}`: {e}", self.bin)))?;

		let mut readers = Vec::with_capacity(2);
		if let Some(stdout) = child.stdout.take() {
			readers.push(self.logs.forward(stdout, LogLevel::Info, "bridge"));
		}
		if let Some(stderr) = child.stderr.take() {
			readers.push(self.logs.forward(stderr, LogLevel::Warn, "bridge-err"));
		}
		let pid = child.id();
		let mut spawned = BridgeChild { child, pid, readers };

		match self.wait_ready(&mut spawned.child, started_at).await {
			Ok(record) => {
				info!(target = "swiftscope.supervisor", pid = record.bridge_pid, port = record.listen_port, "bridge ready");
				*slot = Some(spawned);
				Ok(record)
			}
			Err(e) => {
				warn!(target = "swiftscope.supervisor", error = %e, "bridge failed to become ready");
				self.logs.publish(LogLevel::Error, "supervisor", &e.to_string());
				terminate(spawned).await;
				self.invalidate();
				Err(e)
			}
		}
	}

	/// Waits for a record written by this child whose binding passes the liveness probe.
	async fn wait_ready(&self, child: &mut Child, started_at: u64) -> Result<BridgeState> {
		let pid = child.id();
		for _ in 0..self.ready_attempts {
			if let Some(status) = child.try_wait().map_err(RuntimeError::from)? {
				return Err(RuntimeError::Launch(format!("bridge exited during startup: {status}")).into());
			}
			if let Ok(Some(record)) = BridgeState::load(&self.state_file) {
				let fresh = Some(record.bridge_pid) == pid || record.created_at >= started_at;
				if fresh && record.listen_port == self.port {
					let (record, liveness) = probe_record(record).await;
					if liveness.is_live() {
						return Ok(record);
					}
					debug!(target = "swiftscope.supervisor", state = liveness.describe(), "bridge not ready yet");
				}
			}
			tokio::time::sleep(self.ready_interval).await;
		}
		Err(RuntimeError::Bind {
			port: self.port,
			attempts: self.ready_attempts,
			reason: "bridge did not report a live binding".to_string(),
		}
		.into())
	}

	async fn stop_locked(&self, slot: &mut Option<BridgeChild>) {
		if let Some(current) = slot.take() {
			info!(target = "swiftscope.supervisor", pid = ?current.child.id(), "stopping bridge");
			terminate(current).await;
		}
		self.invalidate();
	}

	fn invalidate(&self) {
		if let Err(e) = BridgeState::invalidate(&self.state_file) {
			warn!(target = "swiftscope.supervisor", error = %e, "failed to invalidate bridge state");
		}
	}

	/// A live record for this target, whoever started its bridge.
	async fn adoptable_record(&self) -> Option<BridgeState> {
		let record = BridgeState::load(&self.state_file).ok()??;
		if !record.matches(Some(&self.device), Some(&self.bundle_id), self.port) {
			return None;
		}
		let (record, liveness) = probe_record(record).await;
		liveness.is_live().then_some(record)
	}
}

#[async_trait]
impl BridgeControl for BridgeSupervisor {
	async fn ensure_running(&self) -> Result<BridgeState> {
		let mut current = self.current.lock().await;
		if let Some(record) = self.adoptable_record().await {
			debug!(target = "swiftscope.supervisor", pid = record.bridge_pid, "reusing live bridge");
			return Ok(record);
		}
		self.stop_locked(&mut current).await;
		self.spawn(&mut current).await
	}

	async fn restart(&self) -> Result<BridgeState> {
		let mut current = self.current.lock().await;
		self.stop_locked(&mut current).await;
		self.spawn(&mut current).await
	}

	async fn shutdown(&self) {
		let mut current = self.current.lock().await;
		self.stop_locked(&mut current).await;
	}
}

fn child_alive(slot: &mut Option<BridgeChild>) -> bool {
	match slot {
		Some(current) => matches!(current.child.try_wait(), Ok(None)),
		None => false,
	}
}

/// SIGTERM to the bridge's group, then SIGKILL to whatever is left of it.
async fn terminate(mut current: BridgeChild) {
	if let Some(pgid) = current.pid {
		signal_group(pgid, GroupSignal::Terminate);
		if tokio::time::timeout(TERM_GRACE, current.child.wait()).await.is_err() {
			debug!(target = "swiftscope.supervisor", pid = pgid, "bridge ignored SIGTERM");
		}
		signal_group(pgid, GroupSignal::Kill);
	}
	if let Err(e) = current.child.start_kill() {
		debug!(target = "swiftscope.supervisor", error = %e, "bridge already gone");
	}
	let _ = current.child.wait().await;
	for reader in current.readers {
		reader.abort();
	}
}

#[cfg(all(test, unix))]
mod tests {
	use std::net::TcpListener;

	use tempfile::TempDir;

	use super::*;
	use crate::error::ApiError;

	/// Fake bridge: records itself in the state file, then idles.
	fn fake_bridge(dir: &TempDir, port: u16, script_body: Option<&str>) -> BridgeSupervisor {
		let state_file = dir.path().join("bridge-state.json");
		let script = script_body.map(str::to_string).unwrap_or_else(|| {
			format!(
				r#"printf '{{"schema_version":1,"device":"D","bundle_id":"com.example.Demo","listen_port":{port},"app_binary":"/private/var/App.app/App","target_pid":77,"bridge_pid":%s,"created_at":%s}}' "$$" "$(date +%s)" > "{path}.tmp" && mv "{path}.tmp" "{path}"; exec sleep 30"#,
				path = state_file.display()
			)
		});

		let mut config = Config::new("/build/App.app/App");
		config.debugserver_port = port;
		config.device = Some("D".into());
		config.bundle_id = Some("com.example.Demo".into());
		config.state_file = Some(state_file);
		config.bridge = Some(crate::config::BridgeSettings {
			bin: "sh".into(),
			extra_args: vec!["-c".into(), script, "fake-bridge".into()],
			app_bundle: None,
		});
		BridgeSupervisor::from_config(&config, LogHub::new())
			.unwrap()
			.with_readiness(30, Duration::from_millis(50))
	}

	#[test]
	fn forwards_target_arguments() {
		let dir = TempDir::new().unwrap();
		let mut config = Config::new("/p");
		config.device = Some("D".into());
		config.bundle_id = Some("B".into());
		config.state_file = Some(dir.path().join("s.json"));
		config.require_debug_info = true;
		config.bridge = Some(crate::config::BridgeSettings {
			bin: "swiftscope-bridge".into(),
			extra_args: vec!["--launch-arg=-Verbose".into()],
			app_bundle: Some("/build/App.app".into()),
		});

		let supervisor = BridgeSupervisor::from_config(&config, LogHub::new()).unwrap();
		let args = supervisor.args();
		assert_eq!(args[0], "--launch-arg=-Verbose");
		assert!(args.windows(2).any(|w| w == ["--device", "D"]));
		assert!(args.windows(2).any(|w| w == ["--bundle-id", "B"]));
		assert!(args.windows(2).any(|w| w == ["--listen-port", "2331"]));
		assert!(args.windows(2).any(|w| w == ["--install-app", "/build/App.app"]));
		assert!(args.contains(&"--require-debug-info".to_string()));
	}

	#[test]
	fn unmanaged_config_has_no_supervisor() {
		assert!(BridgeSupervisor::from_config(&Config::new("/p"), LogHub::new()).is_none());
	}

	#[tokio::test]
	async fn restart_replaces_bridge_and_record() {
		let dir = TempDir::new().unwrap();
		let held = TcpListener::bind(("127.0.0.1", 0)).unwrap();
		let port = held.local_addr().unwrap().port();
		let supervisor = fake_bridge(&dir, port, None);

		let first = supervisor.ensure_running().await.unwrap();
		assert_eq!(first.listen_port, port);
		assert!(supervisor.is_running().await);

		let reused = supervisor.ensure_running().await.unwrap();
		assert_eq!(reused.bridge_pid, first.bridge_pid);

		let second = supervisor.restart().await.unwrap();
		assert_ne!(second.bridge_pid, first.bridge_pid);
		assert!(!swiftscope_runtime::pid_is_alive(first.bridge_pid));

		supervisor.shutdown().await;
		assert!(!supervisor.is_running().await);
		assert!(BridgeState::load(supervisor.state_file()).unwrap().is_none());
	}

	#[tokio::test]
	async fn teardown_reaches_the_bridge_children() {
		let dir = TempDir::new().unwrap();
		let held = TcpListener::bind(("127.0.0.1", 0)).unwrap();
		let port = held.local_addr().unwrap().port();
		let state_file = dir.path().join("bridge-state.json");
		let pids = dir.path().join("debugserver.pids");
		let script = format!(
			r#"sleep 300 & echo $! >> "{pids}"; printf '{{"schema_version":1,"device":"D","bundle_id":"com.example.Demo","listen_port":{port},"target_pid":77,"bridge_pid":%s,"created_at":%s}}' "$$" "$(date +%s)" > "{path}.tmp" && mv "{path}.tmp" "{path}"; wait"#,
			pids = pids.display(),
			path = state_file.display()
		);
		let supervisor = fake_bridge(&dir, port, Some(&script));

		supervisor.ensure_running().await.unwrap();
		supervisor.restart().await.unwrap();
		let spawned = debugserver_pids(&pids);
		assert_eq!(spawned.len(), 2);
		assert!(gone(spawned[0]).await, "debugserver of the replaced bridge survived");
		assert!(swiftscope_runtime::pid_is_alive(spawned[1]));

		supervisor.shutdown().await;
		assert!(gone(spawned[1]).await, "debugserver survived shutdown");
	}

	fn debugserver_pids(path: &Path) -> Vec<u32> {
		std::fs::read_to_string(path)
			.unwrap()
			.lines()
			.map(|line| line.trim().parse().unwrap())
			.collect()
	}

	/// Killed orphans may linger as zombies until init reaps them.
	async fn gone(pid: u32) -> bool {
		for _ in 0..100 {
			let zombie = std::fs::read_to_string(format!("/proc/{pid}/stat"))
				.is_ok_and(|stat| stat.rsplit(')').next().is_some_and(|rest| rest.trim_start().starts_with('Z')));
			if zombie || !swiftscope_runtime::pid_is_alive(pid) {
				return true;
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
		false
	}

	#[tokio::test]
	async fn early_exit_is_a_launch_error() {
		let dir = TempDir::new().unwrap();
		let supervisor = fake_bridge(&dir, 1, Some("echo 'device locked' >&2; exit 1"));

		let err = supervisor.ensure_running().await.unwrap_err();
		assert!(matches!(err, ApiError::Runtime(RuntimeError::Launch(_))), "{err}");
		assert!(!supervisor.is_running().await);
	}

	#[tokio::test]
	async fn silent_bridge_times_out_as_bind_error() {
		let dir = TempDir::new().unwrap();
		let supervisor = fake_bridge(&dir, 1, Some("exec sleep 30")).with_readiness(3, Duration::from_millis(10));

		let err = supervisor.ensure_running().await.unwrap_err();
		assert!(matches!(err, ApiError::Runtime(RuntimeError::Bind { attempts: 3, .. })), "{err}");
	}
}
