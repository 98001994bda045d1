//! Debug adapter discovery.
//!
//! Locates the `lldb-dap` executable that speaks DAP on stdio. Search order:
//! 1. `SWIFTSCOPE_LLDB_DAP` environment variable (runtime override)
//! 2. `xcrun --find lldb-dap` (Xcode toolchain)
//! 3. `lldb-dap`, then the legacy `lldb-vscode`, on `PATH`

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Environment variable that pins the adapter executable.
pub const LLDB_DAP_ENV: &str = "SWIFTSCOPE_LLDB_DAP";

const PATH_CANDIDATES: [&str; 2] = ["lldb-dap", "lldb-vscode"];

/// Returns the path of a runnable debug adapter.
///
/// # Errors
///
/// Returns [`Error::AdapterNotFound`] when no candidate is present.
pub fn get_adapter_executable() -> Result<PathBuf> {
	// 1. Explicit override
	if let Some(path) = try_env_override() {
		return Ok(path);
	}

	// 2. Xcode toolchain
	if let Some(path) = try_xcrun() {
		return Ok(path);
	}

	// 3. PATH lookup
	if let Some(path) = try_path() {
		return Ok(path);
	}

	Err(Error::AdapterNotFound)
}

/// Resolves an explicit adapter path, falling back to discovery when none is given.
pub fn resolve_adapter(explicit: Option<&Path>) -> Result<PathBuf> {
	match explicit {
		Some(path) if is_executable(path) => Ok(path.to_path_buf()),
		Some(path) => {
			warn!(target = "swiftscope.adapter", path = %path.display(), "configured lldb-dap is not executable; searching");
			get_adapter_executable()
		}
		None => get_adapter_executable(),
	}
}

fn try_env_override() -> Option<PathBuf> {
	let value = std::env::var_os(LLDB_DAP_ENV)?;
	let path = PathBuf::from(value);
	if is_executable(&path) {
		debug!(target = "swiftscope.adapter", path = %path.display(), "using {LLDB_DAP_ENV}");
		return Some(path);
	}
	warn!(
		target = "swiftscope.adapter",
		path = %path.display(),
		"{LLDB_DAP_ENV} does not point at an executable; ignoring"
	);
	None
}

fn try_xcrun() -> Option<PathBuf> {
	let output = Command::new("xcrun")
		.args(["--find", "lldb-dap"])
		.stderr(Stdio::null())
		.output()
		.ok()?;
	if !output.status.success() {
		return None;
	}
	first_existing_line(&String::from_utf8_lossy(&output.stdout))
}

fn try_path() -> Option<PathBuf> {
	PATH_CANDIDATES.iter().find_map(|name| which::which(name).ok())
}

/// Picks the first line of tool output that names an existing file.
fn first_existing_line(output: &str) -> Option<PathBuf> {
	output
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.map(PathBuf::from)
		.find(|path| path.exists())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
	use std::os::unix::fs::PermissionsExt;
	std::fs::metadata(path)
		.map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
		.unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
	path.is_file()
}

#[cfg(test)]
mod tests {
	use std::fs;
	#[cfg(unix)]
	use std::os::unix::fs::PermissionsExt;
	use std::path::Path;

	use tempfile::TempDir;

	use super::*;

	#[cfg(unix)]
	fn write_mock_adapter(path: &Path, mode: u32) {
		fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
		let mut perms = fs::metadata(path).unwrap().permissions();
		perms.set_mode(mode);
		fs::set_permissions(path, perms).unwrap();
	}

	#[test]
	fn test_get_adapter_executable() {
		match get_adapter_executable() {
			Ok(path) => assert!(path.exists()),
			Err(Error::AdapterNotFound) => {
				println!("lldb-dap not found (expected off macOS)");
			}
			Err(e) => panic!("Unexpected error: {:?}", e),
		}
	}

	#[cfg(unix)]
	#[test]
	fn test_explicit_executable_is_used_as_is() {
		let temp = TempDir::new().unwrap();
		let adapter = temp.path().join("lldb-dap");
		write_mock_adapter(&adapter, 0o755);

		assert_eq!(resolve_adapter(Some(&adapter)).unwrap(), adapter);
	}

	#[cfg(unix)]
	#[test]
	fn test_non_executable_file_is_rejected() {
		let temp = TempDir::new().unwrap();
		let adapter = temp.path().join("lldb-dap");
		write_mock_adapter(&adapter, 0o644);

		assert!(!is_executable(&adapter));
		assert!(!is_executable(temp.path()));
	}

	#[test]
	fn test_first_existing_line_skips_blank_and_missing_entries() {
		let temp = TempDir::new().unwrap();
		let real = temp.path().join("lldb-dap");
		fs::write(&real, "").unwrap();

		let output = format!("\n/definitely/not/here/lldb-dap\n{}\n", real.display());
		assert_eq!(first_existing_line(&output), Some(real));
		assert_eq!(first_existing_line(""), None);
	}
}
