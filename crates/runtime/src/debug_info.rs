//! Debug metadata probe for deployable artifacts.
//!
//! A binary is considered debuggable when it embeds a line table section
//! (`__debug_line` in Mach-O, `.debug_line` in ELF) or when a `.dSYM` bundle sits next
//! to it or next to its `.app` bundle.

use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const LINE_SECTION_NAMES: [&[u8]; 2] = [b"__debug_line", b".debug_line"];

/// Returns the executable inside an `.app` bundle, or `path` itself for a plain binary.
///
/// iOS bundles are flat: `Foo.app/Foo`.
pub fn resolve_app_binary(path: &Path) -> PathBuf {
	if path.is_dir() && path.extension().is_some_and(|ext| ext == "app") {
		if let Some(stem) = path.file_stem() {
			return path.join(stem);
		}
	}
	path.to_path_buf()
}

/// True when line-level debug information is available for `path`.
pub fn has_line_info(path: &Path) -> bool {
	let binary = resolve_app_binary(path);
	if sibling_dsym_exists(path) || sibling_dsym_exists(&binary) {
		return true;
	}
	match binary_mentions_line_section(&binary) {
		Ok(found) => found,
		Err(e) => {
			tracing::debug!(target = "swiftscope.bridge", path = %binary.display(), error = %e, "debug info probe failed");
			false
		}
	}
}

/// Ensures `path` exists and, when `require` is set, carries line information.
///
/// Missing line info without `require` only logs a warning.
pub fn check_artifact(path: &Path, require: bool) -> Result<()> {
	if !path.exists() {
		return Err(Error::Deployment(format!("{} does not exist", path.display())));
	}
	if has_line_info(path) {
		return Ok(());
	}
	tracing::warn!(
		target = "swiftscope.bridge",
		path = %path.display(),
		"line info missing; breakpoints may not resolve. Rebuild with a Debug configuration or -g"
	);
	if require {
		return Err(Error::Deployment(format!(
			"{} has no line-number debug info and debug info is required",
			path.display()
		)));
	}
	Ok(())
}

fn sibling_dsym_exists(path: &Path) -> bool {
	let mut dsym = path.as_os_str().to_owned();
	dsym.push(".dSYM");
	Path::new(&dsym).exists()
}

fn binary_mentions_line_section(path: &Path) -> std::io::Result<bool> {
	let mut reader = BufReader::new(fs::File::open(path)?);
	let longest = LINE_SECTION_NAMES.iter().map(|name| name.len()).max().unwrap_or(0);
	let mut window: Vec<u8> = Vec::with_capacity(64 * 1024 + longest);
	let mut chunk = vec![0u8; 64 * 1024];

	loop {
		let read = reader.read(&mut chunk)?;
		if read == 0 {
			return Ok(false);
		}
		window.extend_from_slice(&chunk[..read]);
		if LINE_SECTION_NAMES
			.iter()
			.any(|name| window.windows(name.len()).any(|w| w == *name))
		{
			return Ok(true);
		}
		// Keep a tail so names split across reads are still found.
		let keep = longest.saturating_sub(1).min(window.len());
		window.drain(..window.len() - keep);
	}
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;

	use super::*;

	#[test]
	fn test_plain_binary_resolves_to_itself() {
		let temp = TempDir::new().unwrap();
		let binary = temp.path().join("Demo");
		fs::write(&binary, b"\x7fELF").unwrap();
		assert_eq!(resolve_app_binary(&binary), binary);
	}

	#[test]
	fn test_app_bundle_resolves_to_inner_executable() {
		let temp = TempDir::new().unwrap();
		let bundle = temp.path().join("Demo.app");
		fs::create_dir(&bundle).unwrap();
		assert_eq!(resolve_app_binary(&bundle), bundle.join("Demo"));
	}

	#[test]
	fn test_line_section_name_is_detected() {
		let temp = TempDir::new().unwrap();
		let binary = temp.path().join("Demo");
		let mut bytes = vec![0u8; 200_000];
		bytes.extend_from_slice(b"__DWARF\0__debug_line\0");
		fs::write(&binary, bytes).unwrap();
		assert!(has_line_info(&binary));
	}

	#[test]
	fn test_section_name_split_across_reads_is_detected() {
		let temp = TempDir::new().unwrap();
		let binary = temp.path().join("Demo");
		let mut bytes = vec![0u8; 64 * 1024 - 5];
		bytes.extend_from_slice(b".debug_line");
		fs::write(&binary, bytes).unwrap();
		assert!(has_line_info(&binary));
	}

	#[test]
	fn test_stripped_binary_has_no_line_info() {
		let temp = TempDir::new().unwrap();
		let binary = temp.path().join("Demo");
		fs::write(&binary, vec![0xCFu8; 4096]).unwrap();
		assert!(!has_line_info(&binary));
		assert!(check_artifact(&binary, false).is_ok());
		assert!(matches!(check_artifact(&binary, true), Err(Error::Deployment(_))));
	}

	#[test]
	fn test_dsym_next_to_bundle_counts() {
		let temp = TempDir::new().unwrap();
		let bundle = temp.path().join("Demo.app");
		fs::create_dir(&bundle).unwrap();
		fs::write(bundle.join("Demo"), b"stripped").unwrap();
		fs::create_dir(temp.path().join("Demo.app.dSYM")).unwrap();
		assert!(check_artifact(&bundle, true).is_ok());
	}

	#[test]
	fn test_missing_artifact_is_a_deployment_error() {
		let temp = TempDir::new().unwrap();
		let err = check_artifact(&temp.path().join("Missing.app"), false).unwrap_err();
		assert!(err.to_string().contains("does not exist"));
	}
}
