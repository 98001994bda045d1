//! `GET /health` readiness checks.

use swiftscope::SessionState;
use swiftscope_protocol::Envelope;
use swiftscope_runtime::BridgeState;

use crate::app::AppState;
use crate::supervisor::probe_record;

/// Outcome of the readiness checks, in the order they run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
	Ready { state: SessionState },
	NoStateFile,
	NoRecord,
	UnreadableRecord(String),
	Mismatch(String),
	NotLive(&'static str),
	NotAttached(SessionState),
}

impl Readiness {
	pub fn is_ready(&self) -> bool {
		matches!(self, Readiness::Ready { .. })
	}

	pub fn reason(&self) -> Option<String> {
		let reason = match self {
			Readiness::Ready { .. } => return None,
			Readiness::NoStateFile => "bridge state file not configured".to_string(),
			Readiness::NoRecord => "bridge has not recorded a binding yet".to_string(),
			Readiness::UnreadableRecord(err) => format!("bridge state unreadable: {err}"),
			Readiness::Mismatch(what) => format!("bridge state does not match: {what}"),
			Readiness::NotLive(why) => format!("bridge not live: {why}"),
			Readiness::NotAttached(state) => format!("debug session not attached (state: {state})"),
		};
		Some(reason)
	}
}

pub async fn check(state: &AppState) -> Readiness {
	let config = state.config();
	let Some(path) = config.state_file.as_deref() else {
		return Readiness::NoStateFile;
	};
	let record = match BridgeState::load(path) {
		Ok(Some(record)) => record,
		Ok(None) => return Readiness::NoRecord,
		Err(e) => return Readiness::UnreadableRecord(e.to_string()),
	};

	if !record.matches_program(&config.program) {
		return Readiness::Mismatch(format!(
			"program {} (bridge reports {})",
			config.program.display(),
			record.app_binary.as_deref().unwrap_or("<none>")
		));
	}
	if !record.matches(config.device.as_deref(), config.bundle_id.as_deref(), config.debugserver_port) {
		return Readiness::Mismatch(format!(
			"expected {}/{} on port {}, bridge has {}/{} on port {}",
			config.device.as_deref().unwrap_or("*"),
			config.bundle_id.as_deref().unwrap_or("*"),
			config.debugserver_port,
			record.device,
			record.bundle_id,
			record.listen_port
		));
	}

	let (_, liveness) = probe_record(record).await;
	if !liveness.is_live() {
		return Readiness::NotLive(liveness.describe());
	}

	let session_state = state.session_state();
	if !session_state.is_attached() {
		return Readiness::NotAttached(session_state);
	}
	Readiness::Ready { state: session_state }
}

/// Envelope for `/health`. Target identity is echoed either way.
pub fn envelope(state: &AppState, readiness: &Readiness) -> Envelope {
	let config = state.config();
	let envelope = match readiness.reason() {
		None => Envelope::success(),
		Some(reason) => Envelope::new(false).with("error", reason),
	};
	let envelope = envelope
		.with("program", config.program.display().to_string())
		.with("device", &config.device)
		.with("bundleId", &config.bundle_id)
		.with("port", config.port)
		.with("debugserverPort", config.debugserver_port);
	match readiness {
		Readiness::Ready { state } | Readiness::NotAttached(state) => envelope.with("state", state),
		_ => envelope,
	}
}
