use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use swiftscope::{AdapterLauncher, AttachConfig, DebugSession, SessionState};
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ApiError, Result};
use crate::supervisor::{BridgeControl, BuildHook, LogHub, LogLevel};

pub type SharedState = Arc<AppState>;

/// Everything a request handler can reach.
///
/// The session sits behind one async mutex, so session operations, `launch`
/// and `restart` never interleave. Readiness reads `observed` instead of waiting
/// for that mutex.
pub struct AppState {
	config: Config,
	session: Mutex<Option<DebugSession>>,
	observed: SyncMutex<Option<watch::Receiver<SessionState>>>,
	launcher: Option<Arc<dyn AdapterLauncher>>,
	bridge: Option<Arc<dyn BridgeControl>>,
	build: Option<BuildHook>,
	logs: LogHub,
}

impl AppState {
	pub fn new(config: Config, logs: LogHub) -> Self {
		let build = config.build_command.clone().and_then(BuildHook::new);
		Self {
			config,
			session: Mutex::new(None),
			observed: SyncMutex::new(None),
			launcher: None,
			bridge: None,
			build,
			logs,
		}
	}

	pub fn with_launcher(mut self, launcher: Arc<dyn AdapterLauncher>) -> Self {
		self.launcher = Some(launcher);
		self
	}

	pub fn with_bridge(mut self, bridge: Arc<dyn BridgeControl>) -> Self {
		self.bridge = Some(bridge);
		self
	}

	pub fn with_session(mut self, session: DebugSession) -> Self {
		*self.observed.get_mut() = Some(session.watch_state());
		self.session = Mutex::new(Some(session));
		self
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn logs(&self) -> &LogHub {
		&self.logs
	}

	pub fn bridge(&self) -> Option<&Arc<dyn BridgeControl>> {
		self.bridge.as_ref()
	}

	pub fn build_hook(&self) -> Option<&BuildHook> {
		self.build.as_ref()
	}

	pub async fn lock_session(&self) -> MutexGuard<'_, Option<DebugSession>> {
		self.session.lock().await
	}

	/// Puts `session` into the locked slot and starts observing it.
	pub fn install(&self, slot: &mut Option<DebugSession>, session: DebugSession) {
		*self.observed.lock() = Some(session.watch_state());
		*slot = Some(session);
	}

	/// Current lifecycle state, `Disconnected` when no session was ever attached.
	///
	/// Never waits: while a command holds the session the last published state is used.
	pub fn session_state(&self) -> SessionState {
		if let Ok(mut slot) = self.session.try_lock() {
			if let Some(session) = slot.as_mut() {
				return session.poll_state();
			}
		}
		match self.observed.lock().as_ref() {
			Some(observed) => *observed.borrow(),
			None => SessionState::Disconnected,
		}
	}

	/// Starts a fresh adapter and attaches it through the bridge on `port`.
	pub async fn connect(&self, port: u16) -> Result<DebugSession> {
		let launcher = self
			.launcher
			.as_ref()
			.ok_or_else(|| ApiError::Unsupported("no debug adapter available".to_string()))?;
		let attach = AttachConfig::new(self.config.program.clone(), port).with_stop_timeout(self.config.stop_timeout);
		let session = DebugSession::connect(launcher.as_ref(), attach).await?;
		self.logs.publish(
			LogLevel::Info,
			"session",
			&format!("attached to 127.0.0.1:{port} ({})", self.config.program.display()),
		);
		Ok(session)
	}

	/// Initial attach at startup. Failure leaves the slot empty; `launch` recovers.
	pub async fn attach_initial(&self) {
		let mut slot = self.session.lock().await;
		match self.connect(self.config.debugserver_port).await {
			Ok(session) => {
				info!(target = "swiftscope.api", port = self.config.debugserver_port, "debug session attached");
				self.install(&mut slot, session);
			}
			Err(e) => {
				warn!(target = "swiftscope.api", error = %e, "initial attach failed; serving without a session");
				self.logs.publish(LogLevel::Warn, "session", &format!("initial attach failed: {e}"));
			}
		}
	}

	/// Detaches the session and stops a managed bridge.
	pub async fn shutdown(&self) {
		if let Some(mut session) = self.session.lock().await.take() {
			session.shutdown().await;
		}
		if let Some(bridge) = &self.bridge {
			bridge.shutdown().await;
		}
	}
}
