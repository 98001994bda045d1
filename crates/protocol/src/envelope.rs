//! Uniform response envelope.
//!
//! Success:
//!
//! ```json
//! { "ok": true, "breakpoint_id": 1 }
//! ```
//!
//! Failure:
//!
//! ```json
//! { "ok": false, "error": "session is running; stop it before inspecting", "code": "NOT_STOPPED" }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable machine-readable failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	ValidationError,
	InvalidState,
	NotStopped,
	UnknownThread,
	UnresolvedExpression,
	UnsupportedOperation,
	DeploymentFailed,
	LaunchFailed,
	BindFailed,
	Timeout,
	TransportError,
	InternalError,
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ErrorCode::ValidationError => "VALIDATION_ERROR",
			ErrorCode::InvalidState => "INVALID_STATE",
			ErrorCode::NotStopped => "NOT_STOPPED",
			ErrorCode::UnknownThread => "UNKNOWN_THREAD",
			ErrorCode::UnresolvedExpression => "UNRESOLVED_EXPRESSION",
			ErrorCode::UnsupportedOperation => "UNSUPPORTED_OPERATION",
			ErrorCode::DeploymentFailed => "DEPLOYMENT_FAILED",
			ErrorCode::LaunchFailed => "LAUNCH_FAILED",
			ErrorCode::BindFailed => "BIND_FAILED",
			ErrorCode::Timeout => "TIMEOUT",
			ErrorCode::TransportError => "TRANSPORT_ERROR",
			ErrorCode::InternalError => "INTERNAL_ERROR",
		};
		f.write_str(s)
	}
}

/// `{ok, ...payload}` response body.
///
/// The payload is flattened next to `ok`, so action-specific keys sit at the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
	pub ok: bool,
	#[serde(flatten)]
	pub body: Map<String, Value>,
}

impl Envelope {
	pub fn new(ok: bool) -> Self {
		Self { ok, body: Map::new() }
	}

	pub fn success() -> Self {
		Self::new(true)
	}

	pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
		Self::new(false)
			.with("error", message.into())
			.with("code", code)
	}

	/// Adds a payload field. Values that fail to serialize become `null`.
	pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
		let value = serde_json::to_value(value).unwrap_or(Value::Null);
		self.body.insert(key.to_string(), value);
		self
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.body.get(key)
	}

	pub fn error_message(&self) -> Option<&str> {
		self.body.get("error").and_then(Value::as_str)
	}

	pub fn into_value(self) -> Value {
		serde_json::to_value(self).unwrap_or(Value::Null)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn success_payload_is_flattened() {
		let envelope = Envelope::success().with("breakpoint_id", 1u32);
		assert_eq!(envelope.into_value(), json!({"ok": true, "breakpoint_id": 1}));
	}

	#[test]
	fn failure_carries_message_and_code() {
		let envelope = Envelope::failure(ErrorCode::UnsupportedOperation, "build command not configured");
		assert_eq!(envelope.error_message(), Some("build command not configured"));
		assert_eq!(
			envelope.into_value(),
			json!({"ok": false, "error": "build command not configured", "code": "UNSUPPORTED_OPERATION"})
		);
	}

	#[test]
	fn error_code_display_matches_serialized_form() {
		for code in [ErrorCode::InvalidState, ErrorCode::NotStopped, ErrorCode::UnresolvedExpression] {
			assert_eq!(serde_json::to_value(code).unwrap(), json!(code.to_string()));
		}
	}
}
