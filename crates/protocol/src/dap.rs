//! Debug Adapter Protocol messages.
//!
//! Only the subset swiftscope exchanges with `lldb-dap` is modelled. Bodies stay as
//! [`Value`] on the envelope types and are decoded into the typed structs below on
//! demand, so unknown fields and unknown events pass through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminated union of DAP messages, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolMessage {
	Request(Request),
	Response(Response),
	Event(Event),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
	pub seq: i64,
	pub command: String,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
	pub seq: i64,
	pub request_seq: i64,
	pub success: bool,
	pub command: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub body: Value,
}

impl Response {
	/// Human-readable failure text; adapters put details in `body.error.format`.
	pub fn error_message(&self) -> String {
		let detail = self
			.body
			.get("error")
			.and_then(|error| error.get("format"))
			.and_then(Value::as_str);
		match (self.message.as_deref(), detail) {
			(_, Some(detail)) => detail.to_string(),
			(Some(message), None) => message.to_string(),
			(None, None) => format!("{} failed", self.command),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
	pub seq: i64,
	pub event: String,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
	pub id: i64,
	#[serde(default)]
	pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
	pub id: i64,
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub source: Option<Source>,
	#[serde(default)]
	pub line: i64,
	#[serde(default)]
	pub column: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
	pub name: String,
	pub variables_reference: i64,
	#[serde(default)]
	pub expensive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
	pub name: String,
	#[serde(default)]
	pub value: String,
	#[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
	pub ty: Option<String>,
	#[serde(default)]
	pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponse {
	pub result: String,
	#[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
	pub ty: Option<String>,
	#[serde(default)]
	pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEvent {
	pub reason: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub thread_id: Option<i64>,
	#[serde(default)]
	pub all_threads_stopped: bool,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub hit_breakpoint_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitedEvent {
	pub exit_code: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEvent {
	#[serde(default)]
	pub category: Option<String>,
	pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBreakpoint {
	pub line: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<i64>,
	#[serde(default)]
	pub verified: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub line: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn messages_are_tagged_by_type() {
		let raw = json!({
			"seq": 4,
			"type": "response",
			"request_seq": 2,
			"success": true,
			"command": "threads",
			"body": {"threads": [{"id": 1, "name": "main"}]}
		});
		let ProtocolMessage::Response(response) = serde_json::from_value(raw).unwrap() else {
			panic!("expected response");
		};
		assert_eq!(response.request_seq, 2);
		let threads: Vec<Thread> = serde_json::from_value(response.body["threads"].clone()).unwrap();
		assert_eq!(threads[0].name, "main");
	}

	#[test]
	fn request_omits_null_arguments() {
		let request = ProtocolMessage::Request(Request {
			seq: 1,
			command: "configurationDone".into(),
			arguments: Value::Null,
		});
		assert_eq!(
			serde_json::to_value(request).unwrap(),
			json!({"type": "request", "seq": 1, "command": "configurationDone"})
		);
	}

	#[test]
	fn error_message_prefers_formatted_detail() {
		let response = Response {
			seq: 9,
			request_seq: 3,
			success: false,
			command: "evaluate".into(),
			message: Some("error".into()),
			body: json!({"error": {"id": 1, "format": "use of undeclared identifier 'x'"}}),
		};
		assert_eq!(response.error_message(), "use of undeclared identifier 'x'");
	}

	#[test]
	fn stopped_event_defaults_optional_fields() {
		let stop: StoppedEvent = serde_json::from_value(json!({"reason": "breakpoint", "threadId": 7})).unwrap();
		assert_eq!(stop.thread_id, Some(7));
		assert!(stop.description.is_none());
		assert!(stop.hit_breakpoint_ids.is_empty());
	}
}
