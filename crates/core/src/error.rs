use swiftscope_protocol::ErrorCode;
use thiserror::Error;

/// Failures surfaced by [`crate::DebugSession`] operations.
#[derive(Debug, Error)]
pub enum SessionError {
	/// The operation is not legal in the current lifecycle state.
	#[error("{0}")]
	InvalidState(String),

	/// The target is running, so there is no stable frame to inspect.
	#[error("target is running; wait for it to stop before inspecting")]
	NotStopped,

	#[error("unknown thread id {0}")]
	UnknownThread(i64),

	/// The expression names something that is not a local of the selected frame.
	#[error("expression `{0}` cannot be resolved in the current frame")]
	UnresolvedExpression(String),

	#[error("{0}")]
	Timeout(String),

	/// The adapter link is gone; the session has been terminated.
	#[error("debug adapter connection lost: {0}")]
	Transport(String),

	/// The adapter process could not be started.
	#[error("{0}")]
	Adapter(String),

	/// The adapter rejected a request.
	#[error("{0}")]
	Backend(String),
}

impl SessionError {
	pub fn code(&self) -> ErrorCode {
		match self {
			SessionError::InvalidState(_) => ErrorCode::InvalidState,
			SessionError::NotStopped => ErrorCode::NotStopped,
			SessionError::UnknownThread(_) => ErrorCode::UnknownThread,
			SessionError::UnresolvedExpression(_) => ErrorCode::UnresolvedExpression,
			SessionError::Timeout(_) => ErrorCode::Timeout,
			SessionError::Transport(_) | SessionError::Adapter(_) => ErrorCode::TransportError,
			SessionError::Backend(_) => ErrorCode::InternalError,
		}
	}

	pub(crate) fn terminated() -> Self {
		SessionError::InvalidState("session is terminated; use restart or launch to attach again".to_string())
	}
}

impl From<swiftscope_runtime::Error> for SessionError {
	fn from(err: swiftscope_runtime::Error) -> Self {
		use swiftscope_runtime::Error;
		match err {
			e if e.is_disconnect() => SessionError::Transport(e.to_string()),
			e @ (Error::AdapterNotFound | Error::AdapterLaunch(_)) => SessionError::Adapter(e.to_string()),
			Error::Timeout(message) => SessionError::Timeout(message),
			Error::Request { message, .. } => SessionError::Backend(message),
			other => SessionError::Backend(other.to_string()),
		}
	}
}
