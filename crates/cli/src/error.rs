use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use swiftscope::SessionError;
use swiftscope_protocol::{Envelope, ErrorCode, ValidationError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Every failure the dispatcher can render into an `ok:false` envelope.
#[derive(Debug, Error)]
pub enum ApiError {
	#[error(transparent)]
	Validation(#[from] ValidationError),

	#[error(transparent)]
	Session(#[from] SessionError),

	/// Bridge bootstrap or supervision failure.
	#[error(transparent)]
	Runtime(#[from] swiftscope_runtime::Error),

	/// Restart/launch without a managed bridge, or build without a hook.
	#[error("{0}")]
	Unsupported(String),

	#[error("{0}")]
	Internal(String),
}

impl ApiError {
	pub fn code(&self) -> ErrorCode {
		use swiftscope_runtime::Error as RuntimeError;
		match self {
			ApiError::Validation(_) => ErrorCode::ValidationError,
			ApiError::Session(err) => err.code(),
			ApiError::Runtime(err) => match err {
				RuntimeError::Deployment(_) => ErrorCode::DeploymentFailed,
				RuntimeError::Launch(_) => ErrorCode::LaunchFailed,
				RuntimeError::Bind { .. } => ErrorCode::BindFailed,
				RuntimeError::Timeout(_) => ErrorCode::Timeout,
				RuntimeError::AdapterNotFound
				| RuntimeError::AdapterLaunch(_)
				| RuntimeError::Transport(_)
				| RuntimeError::ChannelClosed => ErrorCode::TransportError,
				_ => ErrorCode::InternalError,
			},
			ApiError::Unsupported(_) => ErrorCode::UnsupportedOperation,
			ApiError::Internal(_) => ErrorCode::InternalError,
		}
	}

	pub fn status(&self) -> StatusCode {
		status_for(self.code())
	}

	pub fn to_envelope(&self) -> Envelope {
		Envelope::failure(self.code(), self.to_string())
	}
}

pub fn status_for(code: ErrorCode) -> StatusCode {
	match code {
		ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
		ErrorCode::InvalidState | ErrorCode::NotStopped => StatusCode::CONFLICT,
		ErrorCode::UnknownThread => StatusCode::NOT_FOUND,
		ErrorCode::UnresolvedExpression => StatusCode::UNPROCESSABLE_ENTITY,
		ErrorCode::UnsupportedOperation => StatusCode::NOT_IMPLEMENTED,
		ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
		ErrorCode::DeploymentFailed | ErrorCode::LaunchFailed | ErrorCode::BindFailed | ErrorCode::TransportError => {
			StatusCode::BAD_GATEWAY
		}
		ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		(self.status(), Json(self.to_envelope())).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn session_errors_keep_their_code() {
		let err = ApiError::from(SessionError::NotStopped);
		assert_eq!(err.code(), ErrorCode::NotStopped);
		assert_eq!(err.status(), StatusCode::CONFLICT);

		let err = ApiError::from(SessionError::UnresolvedExpression("ghost".into()));
		assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
	}

	#[test]
	fn bootstrap_failures_are_bad_gateway() {
		let err = ApiError::from(swiftscope_runtime::Error::Bind {
			port: 2331,
			attempts: 5,
			reason: "address in use".into(),
		});
		assert_eq!(err.code(), ErrorCode::BindFailed);
		assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
	}

	#[test]
	fn envelope_carries_message_and_code() {
		let envelope = ApiError::Unsupported("build command not configured".into()).to_envelope();
		assert!(!envelope.ok);
		assert_eq!(envelope.error_message(), Some("build command not configured"));
		assert_eq!(envelope.get("code").and_then(|c| c.as_str()), Some("UNSUPPORTED_OPERATION"));
	}
}
