use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;
use tracing::info;

use crate::error::{ApiError, Result};

/// External build command registered at startup.
#[derive(Debug, Clone)]
pub struct BuildHook {
	argv: Vec<String>,
}

/// Captured result of one build run, output verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
	#[serde(skip)]
	pub success: bool,
	pub exit_code: i32,
	pub stdout: String,
	pub stderr: String,
}

impl BuildHook {
	/// Returns `None` for an empty argv.
	pub fn new(argv: Vec<String>) -> Option<Self> {
		if argv.is_empty() {
			return None;
		}
		Some(Self { argv })
	}

	pub fn argv(&self) -> &[String] {
		&self.argv
	}

	/// Runs the command to completion.
	pub async fn run(&self) -> Result<BuildOutcome> {
		let (program, args) = self
			.argv
			.split_first()
			.ok_or_else(|| ApiError::Internal("build command is empty".to_string()))?;

		info!(target = "swiftscope.build", command = ?self.argv, "running build hook");
		let output = Command::new(program)
			.args(args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.output()
			.await
			.map_err(|e| ApiError::Internal(format!("failed to run build command `{program}`: {e}")))?;

		// Killed by a signal: no exit code.
		let exit_code = output.status.code().unwrap_or(-1);
		info!(target = "swiftscope.build", exit_code, success = output.status.success(), "build finished");
		Ok(BuildOutcome {
			success: output.status.success(),
			exit_code,
			stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		})
	}
}

#[cfg(all(test, unix))]
mod tests {
	use super::*;

	fn sh(script: &str) -> BuildHook {
		BuildHook::new(vec!["sh".into(), "-c".into(), script.into()]).unwrap()
	}

	#[test]
	fn empty_argv_is_no_hook() {
		assert!(BuildHook::new(Vec::new()).is_none());
	}

	#[tokio::test]
	async fn captures_output_verbatim() {
		let outcome = sh("printf 'built\\n'; printf 'warning: x\\n' >&2").run().await.unwrap();
		assert!(outcome.success);
		assert_eq!(outcome.exit_code, 0);
		assert_eq!(outcome.stdout, "built\n");
		assert_eq!(outcome.stderr, "warning: x\n");
	}

	#[tokio::test]
	async fn reports_failing_exit_code() {
		let outcome = sh("echo nope >&2; exit 65").run().await.unwrap();
		assert!(!outcome.success);
		assert_eq!(outcome.exit_code, 65);
		assert_eq!(outcome.stderr, "nope\n");
	}

	#[tokio::test]
	async fn missing_program_is_an_error() {
		let hook = BuildHook::new(vec!["/nonexistent/swiftscope-build".into()]).unwrap();
		assert!(matches!(hook.run().await, Err(ApiError::Internal(_))));
	}
}
