//! Command requests accepted by the dispatcher.
//!
//! Requests arrive as a flat JSON object keyed by `action`. [`CommandRequest`] mirrors
//! that shape loosely so every malformed input can be reported as a
//! [`ValidationError`] instead of a deserializer rejection; [`DebugCommand`] is the
//! validated, closed form the dispatcher matches on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every action the dispatcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
	Stacktrace,
	Threads,
	Continue,
	Next,
	StepIn,
	SetBreakpoint,
	Locals,
	Scopes,
	Variables,
	Evaluate,
	EvaluateSwift,
	WatchExpr,
	SelectThread,
	Restart,
	Launch,
	Build,
	Disconnect,
}

impl Action {
	pub const ALL: [Action; 17] = [
		Action::Stacktrace,
		Action::Threads,
		Action::Continue,
		Action::Next,
		Action::StepIn,
		Action::SetBreakpoint,
		Action::Locals,
		Action::Scopes,
		Action::Variables,
		Action::Evaluate,
		Action::EvaluateSwift,
		Action::WatchExpr,
		Action::SelectThread,
		Action::Restart,
		Action::Launch,
		Action::Build,
		Action::Disconnect,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			Action::Stacktrace => "stacktrace",
			Action::Threads => "threads",
			Action::Continue => "continue",
			Action::Next => "next",
			Action::StepIn => "step_in",
			Action::SetBreakpoint => "set_breakpoint",
			Action::Locals => "locals",
			Action::Scopes => "scopes",
			Action::Variables => "variables",
			Action::Evaluate => "evaluate",
			Action::EvaluateSwift => "evaluate_swift",
			Action::WatchExpr => "watch_expr",
			Action::SelectThread => "select_thread",
			Action::Restart => "restart",
			Action::Launch => "launch",
			Action::Build => "build",
			Action::Disconnect => "disconnect",
		}
	}

	/// Actions handled by the supervisor rather than the attached session.
	pub fn is_supervisor_action(self) -> bool {
		matches!(self, Action::Restart | Action::Launch | Action::Build)
	}
}

impl fmt::Display for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Action {
	type Err = ValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Action::ALL
			.into_iter()
			.find(|action| action.as_str() == s)
			.ok_or_else(|| ValidationError::UnknownAction(s.to_string()))
	}
}

/// Raw request body for `POST /command`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
	pub action: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub file: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub line: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expression: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub variables_reference: Option<i64>,
	#[serde(default, alias = "thread_id", skip_serializing_if = "Option::is_none")]
	pub thread_id: Option<i64>,
}

impl CommandRequest {
	pub fn new(action: Action) -> Self {
		Self {
			action: action.as_str().to_string(),
			..Default::default()
		}
	}

	/// Parses a JSON request body, reporting malformed input as a validation failure.
	pub fn from_slice(body: &[u8]) -> Result<Self, ValidationError> {
		serde_json::from_slice(body).map_err(|err| ValidationError::Malformed(err.to_string()))
	}

	pub fn validate(self) -> Result<DebugCommand, ValidationError> {
		DebugCommand::try_from(self)
	}
}

/// A validated request, one variant per [`Action`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugCommand {
	Stacktrace,
	Threads,
	Continue,
	Next,
	StepIn,
	SetBreakpoint { file: String, line: u32 },
	Locals,
	Scopes,
	Variables { reference: Option<i64> },
	Evaluate { expression: String },
	EvaluateSwift { expression: String },
	WatchExpr { expression: String },
	SelectThread { thread_id: i64 },
	Restart,
	Launch,
	Build,
	Disconnect,
}

impl DebugCommand {
	pub fn action(&self) -> Action {
		match self {
			DebugCommand::Stacktrace => Action::Stacktrace,
			DebugCommand::Threads => Action::Threads,
			DebugCommand::Continue => Action::Continue,
			DebugCommand::Next => Action::Next,
			DebugCommand::StepIn => Action::StepIn,
			DebugCommand::SetBreakpoint { .. } => Action::SetBreakpoint,
			DebugCommand::Locals => Action::Locals,
			DebugCommand::Scopes => Action::Scopes,
			DebugCommand::Variables { .. } => Action::Variables,
			DebugCommand::Evaluate { .. } => Action::Evaluate,
			DebugCommand::EvaluateSwift { .. } => Action::EvaluateSwift,
			DebugCommand::WatchExpr { .. } => Action::WatchExpr,
			DebugCommand::SelectThread { .. } => Action::SelectThread,
			DebugCommand::Restart => Action::Restart,
			DebugCommand::Launch => Action::Launch,
			DebugCommand::Build => Action::Build,
			DebugCommand::Disconnect => Action::Disconnect,
		}
	}
}

impl TryFrom<CommandRequest> for DebugCommand {
	type Error = ValidationError;

	fn try_from(request: CommandRequest) -> Result<Self, Self::Error> {
		let action: Action = request.action.trim().parse()?;
		let command = match action {
			Action::Stacktrace => DebugCommand::Stacktrace,
			Action::Threads => DebugCommand::Threads,
			Action::Continue => DebugCommand::Continue,
			Action::Next => DebugCommand::Next,
			Action::StepIn => DebugCommand::StepIn,
			Action::SetBreakpoint => {
				let file = request
					.file
					.filter(|file| !file.trim().is_empty())
					.ok_or(ValidationError::MissingField { action, field: "file" })?;
				let line = request.line.ok_or(ValidationError::MissingField { action, field: "line" })?;
				let line = u32::try_from(line).ok().filter(|line| *line > 0).ok_or_else(|| ValidationError::InvalidField {
					field: "line",
					reason: format!("expected a positive line number, got {line}"),
				})?;
				DebugCommand::SetBreakpoint { file, line }
			}
			Action::Locals => DebugCommand::Locals,
			Action::Scopes => DebugCommand::Scopes,
			Action::Variables => {
				if let Some(reference) = request.variables_reference {
					if reference <= 0 {
						return Err(ValidationError::InvalidField {
							field: "variablesReference",
							reason: format!("expected a positive reference, got {reference}"),
						});
					}
				}
				DebugCommand::Variables {
					reference: request.variables_reference,
				}
			}
			Action::Evaluate => DebugCommand::Evaluate {
				expression: required_expression(action, request.expression)?,
			},
			Action::EvaluateSwift => DebugCommand::EvaluateSwift {
				expression: required_expression(action, request.expression)?,
			},
			Action::WatchExpr => DebugCommand::WatchExpr {
				expression: required_expression(action, request.expression)?,
			},
			Action::SelectThread => DebugCommand::SelectThread {
				thread_id: request.thread_id.ok_or(ValidationError::MissingField { action, field: "threadId" })?,
			},
			Action::Restart => DebugCommand::Restart,
			Action::Launch => DebugCommand::Launch,
			Action::Build => DebugCommand::Build,
			Action::Disconnect => DebugCommand::Disconnect,
		};
		Ok(command)
	}
}

fn required_expression(action: Action, expression: Option<String>) -> Result<String, ValidationError> {
	expression.ok_or(ValidationError::MissingField {
		action,
		field: "expression",
	})
}

/// A request rejected before it reached the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
	#[error("invalid request body: {0}")]
	Malformed(String),

	#[error("unknown action `{0}`")]
	UnknownAction(String),

	#[error("{action} requires `{field}`")]
	MissingField { action: Action, field: &'static str },

	#[error("invalid `{field}`: {reason}")]
	InvalidField { field: &'static str, reason: String },
}
