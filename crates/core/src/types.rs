//! Payload types returned by session operations.

use serde::Serialize;
use serde_json::Value;
use swiftscope_protocol::dap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	Disconnected,
	Attaching,
	Running,
	Stopped,
	Terminated,
}

impl SessionState {
	pub fn is_attached(self) -> bool {
		matches!(self, SessionState::Running | SessionState::Stopped)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			SessionState::Disconnected => "disconnected",
			SessionState::Attaching => "attaching",
			SessionState::Running => "running",
			SessionState::Stopped => "stopped",
			SessionState::Terminated => "terminated",
		}
	}
}

impl std::fmt::Display for SessionState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
	/// Adapter frame handle, usable as `frameId`.
	pub id: i64,
	pub frame_index: usize,
	pub function: String,
	pub file: String,
	pub line: u32,
}

impl Frame {
	pub(crate) fn from_dap(index: usize, frame: dap::StackFrame) -> Self {
		let file = frame
			.source
			.and_then(|source| source.path.or(source.name))
			.unwrap_or_else(|| "<unknown>".to_string());
		Self {
			id: frame.id,
			frame_index: index,
			function: if frame.name.is_empty() { "<unknown>".to_string() } else { frame.name },
			file,
			line: u32::try_from(frame.line.max(0)).unwrap_or(u32::MAX),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
	pub name: String,
	#[serde(rename = "type")]
	pub ty: String,
	pub value: String,
	/// Non-zero when the value has children, see `variables`.
	#[serde(rename = "variablesReference")]
	pub variables_reference: i64,
}

impl From<dap::Variable> for Variable {
	fn from(variable: dap::Variable) -> Self {
		Self {
			name: variable.name,
			ty: variable.ty.unwrap_or_else(|| "<unknown>".to_string()),
			value: variable.value,
			variables_reference: variable.variables_reference,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvalResult {
	pub result: String,
	#[serde(rename = "type")]
	pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchValue {
	pub expression: String,
	/// `null` when the expression no longer resolves.
	pub result: Option<EvalResult>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
	pub id: u32,
	pub file: String,
	pub line: u32,
	pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStop {
	pub reason: String,
	pub description: String,
	#[serde(rename = "threadId")]
	pub thread_id: Option<i64>,
}

impl From<dap::StoppedEvent> for SessionStop {
	fn from(event: dap::StoppedEvent) -> Self {
		Self {
			description: event.description.unwrap_or_else(|| event.reason.clone()),
			reason: event.reason,
			thread_id: event.thread_id,
		}
	}
}

impl SessionStop {
	pub(crate) fn exited(body: &Value) -> Self {
		let description = match body.get("exitCode").and_then(Value::as_i64) {
			Some(code) => format!("process exited with code {code}"),
			None => "process exited".to_string(),
		};
		Self {
			reason: "exited".to_string(),
			description,
			thread_id: None,
		}
	}

	pub(crate) fn terminated() -> Self {
		Self {
			reason: "terminated".to_string(),
			description: "debug session terminated".to_string(),
			thread_id: None,
		}
	}
}
