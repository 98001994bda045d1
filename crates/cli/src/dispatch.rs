//! Maps one validated command to one operation and renders the envelope.

use swiftscope::{DebugSession, SessionError, SessionState};
use swiftscope_protocol::{CommandRequest, DebugCommand, Envelope};
use tracing::{debug, info};

use crate::app::AppState;
use crate::error::{ApiError, Result};
use crate::supervisor::LogLevel;

/// Parses, validates and executes a raw `POST /command` body.
pub async fn handle(state: &AppState, body: &[u8]) -> Result<Envelope> {
	let command = CommandRequest::from_slice(body)?.validate()?;
	dispatch(state, command).await
}

pub async fn dispatch(state: &AppState, command: DebugCommand) -> Result<Envelope> {
	debug!(target = "swiftscope.api", action = %command.action(), "dispatching");
	match command {
		DebugCommand::Restart => relaunch(state, true).await,
		DebugCommand::Launch => relaunch(state, false).await,
		DebugCommand::Build => build(state).await,
		command => {
			let mut slot = state.lock_session().await;
			let session = slot
				.as_mut()
				.ok_or_else(|| SessionError::InvalidState("no debug session attached".to_string()))?;
			run(session, command).await
		}
	}
}

async fn run(session: &mut DebugSession, command: DebugCommand) -> Result<Envelope> {
	let ok = Envelope::success();
	let envelope = match command {
		DebugCommand::Stacktrace => ok.with("stacktrace", session.stacktrace().await?),
		DebugCommand::Threads => ok.with("threads", session.threads().await?),
		DebugCommand::Continue => ok.with("stop", session.continue_execution().await?),
		DebugCommand::Next => ok.with("stop", session.next().await?),
		DebugCommand::StepIn => ok.with("stop", session.step_in().await?),
		DebugCommand::SetBreakpoint { file, line } => {
			let breakpoint = session.set_breakpoint(&file, line).await?;
			ok.with("breakpoint_id", breakpoint.id)
		}
		DebugCommand::Locals => ok.with("locals", session.locals().await?),
		DebugCommand::Scopes => ok.with("scopes", session.scopes().await?),
		DebugCommand::Variables { reference } => ok.with("variables", session.variables(reference).await?),
		DebugCommand::Evaluate { expression } => {
			let value = session.evaluate(&expression).await?;
			ok.with("result", value.result).with("type", value.ty)
		}
		DebugCommand::EvaluateSwift { expression } => {
			let value = session.evaluate_swift(&expression).await?;
			ok.with("result", value.result).with("type", value.ty)
		}
		DebugCommand::WatchExpr { expression } => ok.with("watch", session.watch_expr(&expression).await?),
		DebugCommand::SelectThread { thread_id } => ok.with("threadId", session.select_thread(thread_id).await?),
		DebugCommand::Disconnect => {
			session.disconnect().await?;
			ok
		}
		DebugCommand::Restart | DebugCommand::Launch | DebugCommand::Build => {
			return Err(ApiError::Internal(format!("{} is not a session operation", command.action())));
		}
	};
	Ok(envelope)
}

/// `restart` always rebuilds the bridge and the session; `launch` keeps a live session
/// and otherwise reuses a live bridge.
async fn relaunch(state: &AppState, restart: bool) -> Result<Envelope> {
	let bridge = state
		.bridge()
		.ok_or_else(|| ApiError::Unsupported("restart/launch requires --manage-bridge".to_string()))?;

	let mut slot = state.lock_session().await;
	let program = state.config().program.display().to_string();

	if !restart {
		if let Some(session) = slot.as_mut() {
			let current = session.poll_state();
			if current.is_attached() {
				return Ok(Envelope::success()
					.with("state", current)
					.with("port", session.debugserver_port())
					.with("program", program));
			}
		}
	}

	if let Some(mut old) = slot.take() {
		old.shutdown().await;
	}
	let record = if restart {
		bridge.restart().await?
	} else {
		bridge.ensure_running().await?
	};

	let session = state.connect(record.listen_port).await?;
	let current: SessionState = session.state();
	state.install(&mut slot, session);

	info!(target = "swiftscope.api", restart, port = record.listen_port, "session relaunched");
	state
		.logs()
		.publish(LogLevel::Info, "supervisor", &format!("{} complete on port {}", if restart { "restart" } else { "launch" }, record.listen_port));
	Ok(Envelope::success()
		.with("state", current)
		.with("port", record.listen_port)
		.with("program", program))
}

async fn build(state: &AppState) -> Result<Envelope> {
	let hook = state
		.build_hook()
		.ok_or_else(|| ApiError::Unsupported("build command not configured".to_string()))?;
	let outcome = hook.run().await?;
	Ok(Envelope::new(outcome.success)
		.with("exitCode", outcome.exit_code)
		.with("stdout", outcome.stdout)
		.with("stderr", outcome.stderr))
}
