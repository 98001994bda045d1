//! Immutable service configuration built from [`ApiArgs`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use swiftscope::DEFAULT_STOP_TIMEOUT;
use swiftscope_runtime::bridge::{DEFAULT_LISTEN_PORT, Devicectl};
use swiftscope_runtime::state::DEFAULT_STATE_PATH;

use crate::cli::ApiArgs;

/// Inline JSON (`{"program": "..."}`) naming the program when `--program` is absent.
pub const CONFIG_ENV: &str = "SWIFTSCOPE_CONFIG";

#[derive(Debug, Clone)]
pub struct Config {
	pub host: String,
	pub port: u16,
	pub debugserver_port: u16,
	pub program: PathBuf,
	pub device: Option<String>,
	pub bundle_id: Option<String>,
	pub require_debug_info: bool,
	/// Present when the service owns the bridge process.
	pub bridge: Option<BridgeSettings>,
	pub state_file: Option<PathBuf>,
	pub enable_log_stream: bool,
	pub devicectl: Devicectl,
	pub build_command: Option<Vec<String>>,
	pub stop_timeout: Duration,
	pub lldb_dap: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
	pub bin: String,
	pub extra_args: Vec<String>,
	pub app_bundle: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct EnvConfig {
	program: Option<PathBuf>,
}

impl Config {
	/// Defaults for a session on `program` with nothing managed.
	pub fn new(program: impl Into<PathBuf>) -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: 4000,
			debugserver_port: DEFAULT_LISTEN_PORT,
			program: program.into(),
			device: None,
			bundle_id: None,
			require_debug_info: false,
			bridge: None,
			state_file: None,
			enable_log_stream: false,
			devicectl: Devicectl::default(),
			build_command: None,
			stop_timeout: DEFAULT_STOP_TIMEOUT,
			lldb_dap: None,
		}
	}

	pub fn from_args(args: &ApiArgs) -> Result<Self> {
		let env = std::env::var(CONFIG_ENV).ok();
		Self::from_args_with_env(args, env.as_deref())
	}

	pub fn from_args_with_env(args: &ApiArgs, env: Option<&str>) -> Result<Self> {
		let program = match (&args.program, env) {
			(Some(program), _) => program.clone(),
			(None, Some(raw)) => program_from_env(raw)?
				.with_context(|| format!("{CONFIG_ENV} does not name a program"))?,
			(None, None) => bail!("no program given: pass --program or set {CONFIG_ENV}"),
		};

		let bridge = if args.manage_bridge {
			if args.device.is_none() || args.bundle_id.is_none() {
				bail!("--manage-bridge requires --device and --bundle-id");
			}
			Some(BridgeSettings {
				bin: args.bridge_bin.clone(),
				extra_args: args.bridge_args.clone(),
				app_bundle: args.app_bundle.clone(),
			})
		} else {
			None
		};

		if args.enable_log_stream && args.device.is_none() {
			bail!("--enable-log-stream requires --device");
		}

		// The supervisor needs a record to tell a fresh bridge from a stale one.
		let state_file = match (&args.state_file, args.manage_bridge) {
			(Some(path), _) => Some(path.clone()),
			(None, true) => Some(PathBuf::from(DEFAULT_STATE_PATH)),
			(None, false) => None,
		};

		Ok(Self {
			host: args.host.clone(),
			port: args.port,
			debugserver_port: args.debugserver_port,
			program,
			device: args.device.clone(),
			bundle_id: args.bundle_id.clone(),
			require_debug_info: args.require_debug_info,
			bridge,
			state_file,
			enable_log_stream: args.enable_log_stream,
			devicectl: Devicectl::new(&args.devicectl_bin, &args.devicectl_subcommand),
			build_command: (!args.build_cmd.is_empty()).then(|| args.build_cmd.clone()),
			stop_timeout: Duration::from_millis(args.stop_timeout_ms),
			lldb_dap: args.lldb_dap.clone(),
		})
	}

	pub fn program(&self) -> &Path {
		&self.program
	}

	pub fn manages_bridge(&self) -> bool {
		self.bridge.is_some()
	}
}

fn program_from_env(raw: &str) -> Result<Option<PathBuf>> {
	let parsed: EnvConfig = serde_json::from_str(raw).with_context(|| format!("{CONFIG_ENV} is not valid JSON"))?;
	Ok(parsed.program.filter(|program| !program.as_os_str().is_empty()))
}
