//! `devicectl` invocations and output parsing.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde_json::Value;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Keys under which `devicectl` JSON output may report the launched executable.
const APP_BINARY_KEYS: [&str; 6] = [
	"app_binary",
	"appBinary",
	"executablePath",
	"executableURL",
	"appExecutable",
	"program",
];

/// Process started suspended on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchResult {
	pub pid: i64,
	pub app_binary: Option<PathBuf>,
}

/// Wrapper binary plus subcommand, usually `xcrun devicectl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Devicectl {
	pub program: String,
	pub subcommand: String,
}

impl Default for Devicectl {
	fn default() -> Self {
		Self {
			program: "xcrun".to_string(),
			subcommand: "devicectl".to_string(),
		}
	}
}

impl Devicectl {
	pub fn new(program: impl Into<String>, subcommand: impl Into<String>) -> Self {
		Self {
			program: program.into(),
			subcommand: subcommand.into(),
		}
	}

	/// Base command with the subcommand applied, if any.
	pub fn command(&self) -> Command {
		let mut cmd = Command::new(&self.program);
		if !self.subcommand.is_empty() {
			cmd.arg(&self.subcommand);
		}
		cmd
	}

	/// `device install app --device <id> <app>`
	pub async fn install(&self, device: &str, app: &Path) -> Result<()> {
		let output = self
			.command()
			.args(["device", "install", "app", "--device", device])
			.arg(app)
			.stdin(Stdio::null())
			.output()
			.await
			.map_err(|e| Error::Deployment(format!("failed to run {} install: {e}", self.program)))?;
		if !output.status.success() {
			return Err(Error::Deployment(format!(
				"install of {} failed ({}): {}",
				app.display(),
				output.status,
				String::from_utf8_lossy(&output.stderr).trim()
			)));
		}
		Ok(())
	}

	/// Starts `bundle_id` stopped at entry, replacing any running instance.
	pub async fn launch_suspended(&self, device: &str, bundle_id: &str, extra_args: &[String]) -> Result<LaunchResult> {
		let json_out = tempfile::Builder::new()
			.prefix("swiftscope-launch-")
			.suffix(".json")
			.tempfile()?;

		let output = self
			.command()
			.args([
				"device",
				"process",
				"launch",
				"--device",
				device,
				"--start-stopped",
				"--terminate-existing",
			])
			.args(extra_args)
			.arg("-j")
			.arg(json_out.path())
			.arg(bundle_id)
			.stdin(Stdio::null())
			.output()
			.await
			.map_err(|e| Error::Launch(format!("failed to run {} launch: {e}", self.program)))?;
		if !output.status.success() {
			return Err(Error::Launch(format!(
				"device rejected launch of {bundle_id} ({}): {}",
				output.status,
				String::from_utf8_lossy(&output.stderr).trim()
			)));
		}

		let data = std::fs::read_to_string(json_out.path())
			.map_err(|e| Error::Launch(format!("failed to read launch output: {e}")))?;
		let value: Value =
			serde_json::from_str(&data).map_err(|e| Error::Launch(format!("launch output is not JSON: {e}")))?;
		parse_launch_output(&value)
	}

	/// `device process launch --console <debugserver> stdio --attach=<pid>`
	pub fn debugserver_command(&self, device: &str, debugserver_path: &str, pid: i64) -> Command {
		let mut cmd = self.command();
		cmd.args([
			"device",
			"process",
			"launch",
			"--device",
			device,
			"--console",
			debugserver_path,
			"stdio",
		])
		.arg(format!("--attach={pid}"));
		cmd
	}

	/// `device log stream --device <id>`
	pub fn log_stream_command(&self, device: &str) -> Command {
		let mut cmd = self.command();
		cmd.args(["device", "log", "stream", "--device", device]);
		cmd
	}
}

/// Extracts the pid and executable path from `process launch -j` output.
pub fn parse_launch_output(value: &Value) -> Result<LaunchResult> {
	let pid = extract_process_identifier(value)
		.ok_or_else(|| Error::Launch(format!("launch output missing process identifier: {value}")))?;
	Ok(LaunchResult {
		pid,
		app_binary: extract_app_binary(value),
	})
}

pub fn extract_process_identifier(value: &Value) -> Option<i64> {
	find_i64(value, "processIdentifier").or_else(|| find_i64(value, "pid"))
}

/// Depth-first search for an integer under `key`.
fn find_i64(value: &Value, key: &str) -> Option<i64> {
	match value {
		Value::Object(map) => {
			if let Some(found) = map.get(key).and_then(Value::as_i64) {
				return Some(found);
			}
			map.values().find_map(|entry| find_i64(entry, key))
		}
		Value::Array(items) => items.iter().find_map(|entry| find_i64(entry, key)),
		_ => None,
	}
}

pub fn extract_app_binary(value: &Value) -> Option<PathBuf> {
	match value {
		Value::Object(map) => {
			for key in APP_BINARY_KEYS {
				if let Some(path) = map.get(key).and_then(Value::as_str).and_then(path_from_report) {
					return Some(path);
				}
			}
			map.values().find_map(extract_app_binary)
		}
		Value::Array(items) => items.iter().find_map(extract_app_binary),
		_ => None,
	}
}

fn path_from_report(raw: &str) -> Option<PathBuf> {
	let trimmed = raw.trim();
	let trimmed = trimmed.strip_prefix("file://").unwrap_or(trimmed);
	if trimmed.is_empty() {
		return None;
	}
	Some(PathBuf::from(trimmed))
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn finds_pid_in_nested_json() {
		let value = json!({
			"info": {"outcome": "success"},
			"result": {"process": {"processIdentifier": 4242}}
		});
		assert_eq!(extract_process_identifier(&value), Some(4242));
	}

	#[test]
	fn falls_back_to_pid_key() {
		assert_eq!(extract_process_identifier(&json!({"items": [{"pid": 1337}]})), Some(1337));
	}

	#[test]
	fn missing_pid_is_a_launch_error() {
		let err = parse_launch_output(&json!({"result": {}})).unwrap_err();
		assert!(matches!(err, Error::Launch(_)));
	}

	#[test]
	fn app_binary_url_prefix_is_stripped() {
		let value = json!({
			"result": {
				"processIdentifier": 7,
				"executableURL": "file:///private/var/containers/Bundle/Application/X/Demo.app/Demo"
			}
		});
		let launch = parse_launch_output(&value).unwrap();
		assert_eq!(launch.pid, 7);
		assert_eq!(
			launch.app_binary,
			Some(PathBuf::from("/private/var/containers/Bundle/Application/X/Demo.app/Demo"))
		);
	}

	#[test]
	fn blank_app_binary_is_ignored() {
		assert_eq!(extract_app_binary(&json!({"app_binary": "  ", "nested": {"program": "/tmp/Demo"}})), Some(PathBuf::from("/tmp/Demo")));
	}

	#[test]
	fn debugserver_command_attaches_to_pid() {
		let ctl = Devicectl::default();
		let cmd = ctl.debugserver_command("UDID", "/Developer/usr/libexec/debugserver", 42);
		let args: Vec<_> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
		assert_eq!(args.first().map(String::as_str), Some("devicectl"));
		assert!(args.contains(&"--console".to_string()));
		assert_eq!(args.last().map(String::as_str), Some("--attach=42"));
	}

	#[test]
	fn empty_subcommand_is_omitted() {
		let ctl = Devicectl::new("devicectl-wrapper", "");
		let cmd = ctl.log_stream_command("UDID");
		let args: Vec<_> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
		assert_eq!(args, ["device", "log", "stream", "--device", "UDID"]);
	}
}
