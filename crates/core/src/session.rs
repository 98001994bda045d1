//! Debug session state machine.
//!
//! ```text
//! Disconnected → Attaching → Stopped ⇄ Running → Terminated
//! ```
//!
//! A session is created already attached to a target that was launched suspended, so it
//! starts in `Stopped`. Adapter events are queued by the connection and applied in order at
//! the start of every operation, which makes `&mut self` the single writer of session state.
//! A closed event channel means the adapter is gone and forces `Terminated`.


use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use swiftscope_protocol::dap;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterHandle, AdapterLauncher, DebugAdapter};
use crate::error::SessionError;
use crate::types::{Breakpoint, EvalResult, Frame, SessionState, SessionStop, Variable, WatchValue};

pub type Result<T> = std::result::Result<T, SessionError>;

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct AttachConfig {
	/// Local copy of the target executable, used for symbols.
	pub program: PathBuf,
	/// Loopback port where the bridge exposes debugserver.
	pub debugserver_port: u16,
	/// Bound on waiting for a stop after continue/next/step_in.
	pub stop_timeout: Duration,
	pub attach_timeout: Duration,
}

impl AttachConfig {
	pub fn new(program: impl Into<PathBuf>, debugserver_port: u16) -> Self {
		Self {
			program: program.into(),
			debugserver_port,
			stop_timeout: DEFAULT_STOP_TIMEOUT,
			attach_timeout: DEFAULT_ATTACH_TIMEOUT,
		}
	}

	pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
		self.stop_timeout = stop_timeout;
		self
	}
}

#[derive(Debug, Clone, Copy)]
enum Resume {
	Continue,
	Next,
	StepIn,
}

impl Resume {
	fn command(self) -> &'static str {
		match self {
			Resume::Continue => "continue",
			Resume::Next => "next",
			Resume::StepIn => "stepIn",
		}
	}
}

pub struct DebugSession {
	adapter: Arc<dyn DebugAdapter>,
	events: mpsc::UnboundedReceiver<dap::Event>,
	/// Events read during the attach handshake, applied before the channel.
	backlog: VecDeque<dap::Event>,
	state: SessionState,
	/// Snapshot of `state` for observers that cannot wait for `&mut self`.
	state_tx: watch::Sender<SessionState>,
	config: AttachConfig,
	thread_id: Option<i64>,
	breakpoints: Vec<Breakpoint>,
	lines_by_file: HashMap<String, BTreeSet<u32>>,
	next_breakpoint_id: u32,
	watches: Vec<WatchValue>,
	last_stop: Option<SessionStop>,
}

impl DebugSession {
	/// Launches a fresh adapter and attaches through it.
	///
	/// The adapter is shut down again if the attach fails.
	pub async fn connect(launcher: &dyn AdapterLauncher, config: AttachConfig) -> Result<Self> {
		let AdapterHandle { adapter, events } = launcher.launch().await?;
		match Self::attach(Arc::clone(&adapter), events, config).await {
			Ok(session) => Ok(session),
			Err(e) => {
				adapter.shutdown().await;
				Err(e)
			}
		}
	}

	/// Runs the DAP attach handshake against the bridge port.
	pub async fn attach(adapter: Arc<dyn DebugAdapter>, events: mpsc::UnboundedReceiver<dap::Event>, config: AttachConfig) -> Result<Self> {
		let mut session = Self {
			adapter,
			events,
			backlog: VecDeque::new(),
			state: SessionState::Attaching,
			state_tx: watch::Sender::new(SessionState::Attaching),
			config,
			thread_id: None,
			breakpoints: Vec::new(),
			lines_by_file: HashMap::new(),
			next_breakpoint_id: 1,
			watches: Vec::new(),
			last_stop: None,
		};

		session.handshake().await?;
		session.set_state(SessionState::Stopped);
		session.drain_events();

		if session.state == SessionState::Stopped && session.thread_id.is_none() {
			match session.fetch_threads().await {
				Ok(threads) => session.thread_id = threads.first().map(|thread| thread.id),
				Err(e) => debug!(target = "swiftscope.session", error = %e, "no initial thread list"),
			}
		}

		info!(
			target = "swiftscope.session",
			program = %session.config.program.display(),
			port = session.config.debugserver_port,
			thread_id = ?session.thread_id,
			state = %session.state,
			"attached"
		);
		Ok(session)
	}

	async fn handshake(&mut self) -> Result<()> {
		self.call(
			"initialize",
			json!({
				"clientID": "swiftscope",
				"clientName": "swiftscope",
				"adapterID": "lldb-dap",
				"pathFormat": "path",
				"linesStartAt1": true,
				"columnsStartAt1": true,
				"supportsVariableType": true,
			}),
		)
		.await?;

		let arguments = json!({
			"program": self.config.program.display().to_string(),
			"attachCommands": [format!("gdb-remote 127.0.0.1:{}", self.config.debugserver_port)],
		});
		let adapter = Arc::clone(&self.adapter);
		let attach = async move { adapter.request("attach", arguments).await };
		tokio::pin!(attach);

		let deadline = Instant::now() + self.config.attach_timeout;
		let mut attached = false;
		// Some adapters answer `attach` only after `configurationDone`, so wait for
		// `initialized` and the response together.
		loop {
			tokio::select! {
				result = &mut attach, if !attached => {
					result?;
					attached = true;
				}
				event = self.events.recv() => match event {
					Some(event) if event.event == "initialized" => break,
					Some(event) => self.backlog.push_back(event),
					None => return Err(SessionError::Transport("adapter exited during attach".to_string())),
				},
				_ = tokio::time::sleep_until(deadline) => {
					return Err(SessionError::Timeout(format!(
						"attach to 127.0.0.1:{} did not complete within {} ms",
						self.config.debugserver_port,
						self.config.attach_timeout.as_millis()
					)));
				}
			}
		}

		self.call("configurationDone", Value::Null).await?;
		if !attached {
			match tokio::time::timeout_at(deadline, &mut attach).await {
				Ok(result) => {
					result?;
				}
				Err(_) => return Err(SessionError::Timeout("attach response never arrived".to_string())),
			}
		}
		Ok(())
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	/// Applies queued adapter events and returns the resulting state.
	pub fn poll_state(&mut self) -> SessionState {
		self.drain_events();
		self.state
	}

	/// Follows every lifecycle transition, including while an operation holds the session.
	pub fn watch_state(&self) -> watch::Receiver<SessionState> {
		self.state_tx.subscribe()
	}

	fn set_state(&mut self, state: SessionState) {
		self.state = state;
		self.state_tx.send_replace(state);
	}

	pub fn program(&self) -> &Path {
		&self.config.program
	}

	pub fn debugserver_port(&self) -> u16 {
		self.config.debugserver_port
	}

	pub fn thread_id(&self) -> Option<i64> {
		self.thread_id
	}

	pub fn breakpoints(&self) -> &[Breakpoint] {
		&self.breakpoints
	}

	pub fn watches(&self) -> &[WatchValue] {
		&self.watches
	}

	pub fn last_stop(&self) -> Option<&SessionStop> {
		self.last_stop.as_ref()
	}

	pub async fn threads(&mut self) -> Result<Vec<dap::Thread>> {
		self.ensure_stopped()?;
		self.fetch_threads().await
	}

	pub async fn stacktrace(&mut self) -> Result<Vec<Frame>> {
		self.ensure_stopped()?;
		self.fetch_frames(None).await
	}

	pub async fn scopes(&mut self) -> Result<Vec<dap::Scope>> {
		self.ensure_stopped()?;
		self.fetch_scopes().await
	}

	pub async fn locals(&mut self) -> Result<Vec<Variable>> {
		self.ensure_stopped()?;
		self.fetch_locals().await
	}

	/// Children of `reference`, or the locals of the top frame when `None`.
	pub async fn variables(&mut self, reference: Option<i64>) -> Result<Vec<Variable>> {
		self.ensure_stopped()?;
		match reference {
			Some(reference) => self.fetch_variables(reference).await,
			None => self.fetch_locals().await,
		}
	}

	/// Evaluates `expression` in the top frame of the selected thread.
	///
	/// Every name the expression looks up must be a local of that frame; anything else
	/// fails with [`SessionError::UnresolvedExpression`] without reaching the adapter.
	pub async fn evaluate(&mut self, expression: &str) -> Result<EvalResult> {
		self.ensure_stopped()?;
		self.evaluate_in_frame(expression).await
	}

	/// Same semantics as [`Self::evaluate`].
	pub async fn evaluate_swift(&mut self, expression: &str) -> Result<EvalResult> {
		self.evaluate(expression).await
	}

	/// Registers `expression` (once) and returns every watch re-evaluated.
	///
	/// A new expression must resolve to be registered.
	pub async fn watch_expr(&mut self, expression: &str) -> Result<Vec<WatchValue>> {
		self.ensure_stopped()?;
		let trimmed = expression.trim();
		if trimmed.is_empty() {
			return Err(SessionError::UnresolvedExpression(expression.to_string()));
		}
		if !self.watches.iter().any(|watch| watch.expression == trimmed) {
			let result = self.evaluate_in_frame(trimmed).await?;
			self.watches.push(WatchValue {
				expression: trimmed.to_string(),
				result: Some(result),
				error: None,
			});
		}
		self.refresh_watches().await?;
		Ok(self.watches.clone())
	}

	pub async fn select_thread(&mut self, thread_id: i64) -> Result<i64> {
		self.ensure_attached()?;
		let threads = self.fetch_threads().await?;
		if !threads.iter().any(|thread| thread.id == thread_id) {
			return Err(SessionError::UnknownThread(thread_id));
		}
		self.thread_id = Some(thread_id);
		Ok(thread_id)
	}

	/// Adds a breakpoint. Every call allocates a new id, even for a duplicate location.
	pub async fn set_breakpoint(&mut self, file: &str, line: u32) -> Result<Breakpoint> {
		self.ensure_attached()?;

		let mut lines = self.lines_by_file.get(file).cloned().unwrap_or_default();
		lines.insert(line);
		let requested: Vec<Value> = lines.iter().map(|line| json!({ "line": line })).collect();
		let name = Path::new(file).file_name().map(|n| n.to_string_lossy().into_owned());
		let body = self
			.call(
				"setBreakpoints",
				json!({
					"source": { "path": file, "name": name },
					"breakpoints": requested,
				}),
			)
			.await?;

		let reported: Vec<dap::Breakpoint> = parse_list(body, "breakpoints")?;
		let verified = lines
			.iter()
			.position(|l| *l == line)
			.and_then(|index| reported.get(index))
			.is_some_and(|bp| bp.verified);
		self.lines_by_file.insert(file.to_string(), lines);

		let id = self.next_breakpoint_id;
		self.next_breakpoint_id = self.next_breakpoint_id.saturating_add(1);
		let breakpoint = Breakpoint {
			id,
			file: file.to_string(),
			line,
			verified,
		};
		info!(target = "swiftscope.session", id, file, line, verified, "breakpoint set");
		self.breakpoints.push(breakpoint.clone());
		Ok(breakpoint)
	}

	pub async fn continue_execution(&mut self) -> Result<SessionStop> {
		self.resume(Resume::Continue).await
	}

	pub async fn next(&mut self) -> Result<SessionStop> {
		self.resume(Resume::Next).await
	}

	pub async fn step_in(&mut self) -> Result<SessionStop> {
		self.resume(Resume::StepIn).await
	}

	/// Detaches without killing the target and moves to `Terminated`.
	pub async fn disconnect(&mut self) -> Result<()> {
		self.drain_events();
		match self.state {
			SessionState::Terminated => return Err(SessionError::terminated()),
			SessionState::Disconnected => {
				return Err(SessionError::InvalidState("no debug session attached".to_string()));
			}
			SessionState::Attaching | SessionState::Running | SessionState::Stopped => {}
		}
		self.teardown().await;
		info!(target = "swiftscope.session", "disconnected");
		Ok(())
	}

	/// Releases the adapter regardless of state. Used when replacing the session.
	pub async fn shutdown(&mut self) {
		self.drain_events();
		if self.state == SessionState::Terminated {
			self.adapter.shutdown().await;
			return;
		}
		self.teardown().await;
	}

	async fn teardown(&mut self) {
		let args = json!({ "terminateDebuggee": false, "restart": false });
		if let Err(e) = self.adapter.request("disconnect", args).await {
			debug!(target = "swiftscope.session", error = %e, "disconnect request failed");
		}
		self.adapter.shutdown().await;
		self.set_state(SessionState::Terminated);
	}

	async fn resume(&mut self, mode: Resume) -> Result<SessionStop> {
		self.ensure_attached()?;
		if self.state == SessionState::Running {
			return Err(SessionError::InvalidState(format!(
				"cannot {}: target is already running",
				mode.command()
			)));
		}

		let thread_id = self.current_thread().await?;
		self.call(mode.command(), json!({ "threadId": thread_id })).await?;
		self.set_state(SessionState::Running);
		debug!(target = "swiftscope.session", command = mode.command(), thread_id, "resumed");
		self.wait_for_stop().await
	}

	async fn wait_for_stop(&mut self) -> Result<SessionStop> {
		let deadline = Instant::now() + self.config.stop_timeout;
		loop {
			let event = match tokio::time::timeout_at(deadline, self.events.recv()).await {
				Ok(Some(event)) => event,
				Ok(None) => {
					self.mark_lost();
					return Err(SessionError::Transport("adapter closed while waiting for a stop".to_string()));
				}
				Err(_) => {
					warn!(target = "swiftscope.session", "no stop event before timeout; target still running");
					return Err(SessionError::Timeout(format!(
						"target did not stop within {} ms",
						self.config.stop_timeout.as_millis()
					)));
				}
			};
			if let Some(stop) = self.apply_event(event) {
				return Ok(stop);
			}
		}
	}

	fn ensure_attached(&mut self) -> Result<()> {
		self.drain_events();
		match self.state {
			SessionState::Running | SessionState::Stopped => Ok(()),
			SessionState::Terminated => Err(SessionError::terminated()),
			SessionState::Disconnected | SessionState::Attaching => {
				Err(SessionError::InvalidState("no debug session attached".to_string()))
			}
		}
	}

	fn ensure_stopped(&mut self) -> Result<()> {
		self.ensure_attached()?;
		if self.state == SessionState::Running {
			return Err(SessionError::NotStopped);
		}
		Ok(())
	}

	fn drain_events(&mut self) {
		while let Some(event) = self.backlog.pop_front() {
			self.apply_event(event);
		}
		loop {
			match self.events.try_recv() {
				Ok(event) => {
					self.apply_event(event);
				}
				Err(TryRecvError::Empty) => break,
				Err(TryRecvError::Disconnected) => {
					self.mark_lost();
					break;
				}
			}
		}
	}

	/// Applies one adapter event. Returns the stop it represents, if any.
	fn apply_event(&mut self, event: dap::Event) -> Option<SessionStop> {
		match event.event.as_str() {
			"stopped" => {
				let stopped: dap::StoppedEvent = match serde_json::from_value(event.body) {
					Ok(stopped) => stopped,
					Err(e) => {
						warn!(target = "swiftscope.session", error = %e, "malformed stopped event");
						return None;
					}
				};
				if self.state == SessionState::Terminated {
					return None;
				}
				if let Some(thread_id) = stopped.thread_id {
					self.thread_id = Some(thread_id);
				}
				let stop = SessionStop::from(stopped);
				debug!(target = "swiftscope.session", reason = %stop.reason, thread_id = ?stop.thread_id, "stopped");
				self.set_state(SessionState::Stopped);
				self.last_stop = Some(stop.clone());
				Some(stop)
			}
			"continued" => {
				if self.state == SessionState::Stopped {
					self.set_state(SessionState::Running);
				}
				None
			}
			"exited" => {
				let stop = SessionStop::exited(&event.body);
				info!(target = "swiftscope.session", description = %stop.description, "target exited");
				self.set_state(SessionState::Terminated);
				self.last_stop = Some(stop.clone());
				Some(stop)
			}
			"terminated" => {
				info!(target = "swiftscope.session", "adapter terminated the session");
				self.set_state(SessionState::Terminated);
				Some(SessionStop::terminated())
			}
			"output" => {
				if let Ok(output) = serde_json::from_value::<dap::OutputEvent>(event.body) {
					debug!(target = "swiftscope.session", category = ?output.category, "{}", output.output.trim_end());
				}
				None
			}
			other => {
				debug!(target = "swiftscope.session", event = other, "ignored event");
				None
			}
		}
	}

	fn mark_lost(&mut self) {
		if self.state != SessionState::Terminated {
			warn!(target = "swiftscope.session", "adapter connection lost; session terminated");
			self.set_state(SessionState::Terminated);
		}
	}

	async fn call(&mut self, command: &str, arguments: Value) -> Result<Value> {
		match self.adapter.request(command, arguments).await {
			Ok(body) => Ok(body),
			Err(e) => {
				let err = SessionError::from(e);
				if matches!(err, SessionError::Transport(_)) {
					self.mark_lost();
				}
				Err(err)
			}
		}
	}

	async fn fetch_threads(&mut self) -> Result<Vec<dap::Thread>> {
		let body = self.call("threads", Value::Null).await?;
		parse_list(body, "threads")
	}

	async fn current_thread(&mut self) -> Result<i64> {
		if let Some(thread_id) = self.thread_id {
			return Ok(thread_id);
		}
		let threads = self.fetch_threads().await?;
		let thread_id = threads
			.first()
			.map(|thread| thread.id)
			.ok_or_else(|| SessionError::Backend("target reports no threads".to_string()))?;
		self.thread_id = Some(thread_id);
		Ok(thread_id)
	}

	async fn fetch_frames(&mut self, levels: Option<u32>) -> Result<Vec<Frame>> {
		let thread_id = self.current_thread().await?;
		let mut arguments = json!({ "threadId": thread_id, "startFrame": 0 });
		if let Some(levels) = levels {
			arguments["levels"] = json!(levels);
		}
		let body = self.call("stackTrace", arguments).await?;
		let frames: Vec<dap::StackFrame> = parse_list(body, "stackFrames")?;
		Ok(frames
			.into_iter()
			.enumerate()
			.map(|(index, frame)| Frame::from_dap(index, frame))
			.collect())
	}

	async fn top_frame_id(&mut self) -> Result<i64> {
		let frames = self.fetch_frames(Some(1)).await?;
		frames
			.first()
			.map(|frame| frame.id)
			.ok_or_else(|| SessionError::Backend("selected thread has no frames".to_string()))
	}

	async fn fetch_scopes(&mut self) -> Result<Vec<dap::Scope>> {
		let frame_id = self.top_frame_id().await?;
		let body = self.call("scopes", json!({ "frameId": frame_id })).await?;
		parse_list(body, "scopes")
	}

	async fn fetch_locals(&mut self) -> Result<Vec<Variable>> {
		let scopes = self.fetch_scopes().await?;
		let scope = scopes
			.iter()
			.find(|scope| scope.name.eq_ignore_ascii_case("locals"))
			.or_else(|| scopes.iter().find(|scope| !scope.expensive));
		match scope {
			Some(scope) => self.fetch_variables(scope.variables_reference).await,
			None => Ok(Vec::new()),
		}
	}

	async fn fetch_variables(&mut self, reference: i64) -> Result<Vec<Variable>> {
		let body = self.call("variables", json!({ "variablesReference": reference })).await?;
		let variables: Vec<dap::Variable> = parse_list(body, "variables")?;
		Ok(variables.into_iter().map(Variable::from).collect())
	}

	async fn evaluate_in_frame(&mut self, expression: &str) -> Result<EvalResult> {
		let trimmed = expression.trim();
		if trimmed.is_empty() {
			return Err(SessionError::UnresolvedExpression(expression.to_string()));
		}

		let locals = self.fetch_locals().await?;
		if let Some(local) = locals.iter().find(|local| local.name == trimmed) {
			return Ok(EvalResult {
				result: local.value.clone(),
				ty: local.ty.clone(),
			});
		}
		let names = free_identifiers(trimmed);
		if names.is_empty() || names.iter().any(|name| !locals.iter().any(|local| local.name == *name)) {
			return Err(SessionError::UnresolvedExpression(trimmed.to_string()));
		}

		let frame_id = self.top_frame_id().await?;
		let body = match self
			.call(
				"evaluate",
				json!({ "expression": trimmed, "frameId": frame_id, "context": "watch" }),
			)
			.await
		{
			Ok(body) => body,
			Err(SessionError::Backend(reason)) => {
				debug!(target = "swiftscope.session", expression = trimmed, %reason, "adapter rejected expression");
				return Err(SessionError::UnresolvedExpression(trimmed.to_string()));
			}
			Err(e) => return Err(e),
		};
		let response: dap::EvaluateResponse =
			serde_json::from_value(body).map_err(|e| SessionError::Backend(format!("malformed evaluate response: {e}")))?;
		Ok(EvalResult {
			result: response.result,
			ty: response.ty.unwrap_or_else(|| "<unknown>".to_string()),
		})
	}

	async fn refresh_watches(&mut self) -> Result<()> {
		for index in 0..self.watches.len() {
			let expression = self.watches[index].expression.clone();
			let (result, error) = match self.evaluate_in_frame(&expression).await {
				Ok(result) => (Some(result), None),
				Err(e @ SessionError::Transport(_)) => return Err(e),
				Err(e) => (None, Some(e.to_string())),
			};
			let watch = &mut self.watches[index];
			watch.result = result;
			watch.error = error;
		}
		Ok(())
	}
}

const EXPRESSION_KEYWORDS: [&str; 6] = ["true", "false", "nil", "as", "is", "try"];

/// Names an expression looks up in scope.
///
/// Member names after `.`, call argument labels, string and numeric literals and
/// keywords are not lookups.
fn free_identifiers(expression: &str) -> Vec<&str> {
	let mut names = Vec::new();
	let mut previous: Option<char> = None;
	let mut chars = expression.char_indices().peekable();

	while let Some((start, c)) = chars.next() {
		if c == '"' {
			let mut escaped = false;
			for (_, c) in chars.by_ref() {
				match c {
					'\\' if !escaped => escaped = true,
					'"' if !escaped => break,
					_ => escaped = false,
				}
			}
			previous = Some('"');
			continue;
		}
		if !(is_identifier_char(c) || c == '$') {
			if !c.is_whitespace() {
				previous = Some(c);
			}
			continue;
		}

		let mut end = start + c.len_utf8();
		while let Some(&(index, next)) = chars.peek() {
			if !is_identifier_char(next) {
				break;
			}
			end = index + next.len_utf8();
			chars.next();
		}
		let token = &expression[start..end];
		let member = previous == Some('.');
		let label = matches!(previous, Some('(' | ','))
			&& expression[end..].trim_start().starts_with(':');
		if !c.is_ascii_digit() && !member && !label && !EXPRESSION_KEYWORDS.contains(&token) {
			names.push(token);
		}
		previous = token.chars().last();
	}
	names
}

fn is_identifier_char(c: char) -> bool {
	c.is_alphanumeric() || c == '_'
}

fn parse_list<T: DeserializeOwned>(mut body: Value, field: &str) -> Result<Vec<T>> {
	match body.get_mut(field).map(Value::take) {
		Some(value) => serde_json::from_value(value)
			.map_err(|e| SessionError::Backend(format!("malformed `{field}` in adapter response: {e}"))),
		None => Ok(Vec::new()),
	}
}
