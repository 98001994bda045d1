use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{ArgAction, Parser};
use swiftscope::DEFAULT_STOP_TIMEOUT;
use swiftscope_runtime::bridge::{DEFAULT_DEBUGSERVER_PATH, DEFAULT_LISTEN_PORT};

/// Cargo-like help colors.
pub fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
		.valid(AnsiColor::Cyan.on_default())
}

/// Arguments of `swiftscope-api`.
#[derive(Parser, Debug, Clone)]
#[command(name = "swiftscope-api")]
#[command(about = "HTTP control plane for an lldb-dap session on an iOS device")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct ApiArgs {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, action = ArgAction::Count)]
	pub verbose: u8,

	/// Loopback port where the bridge exposes debugserver
	#[arg(long, default_value_t = DEFAULT_LISTEN_PORT)]
	pub debugserver_port: u16,

	/// Local copy of the app executable, used for symbols (falls back to SWIFTSCOPE_CONFIG)
	#[arg(long, value_name = "PATH")]
	pub program: Option<PathBuf>,

	/// Interface the HTTP server binds to
	#[arg(long, default_value = "127.0.0.1")]
	pub host: String,

	/// HTTP port
	#[arg(long, default_value_t = 4000)]
	pub port: u16,

	/// Device identifier understood by devicectl
	#[arg(long)]
	pub device: Option<String>,

	/// Bundle identifier of the app being debugged
	#[arg(long)]
	pub bundle_id: Option<String>,

	/// Refuse to start when the program has no line-number debug info
	#[arg(long)]
	pub require_debug_info: bool,

	/// Start and supervise the bridge process (enables `launch` and `restart`)
	#[arg(long)]
	pub manage_bridge: bool,

	/// Bridge executable started under --manage-bridge
	#[arg(long, default_value = "swiftscope-bridge", value_name = "PATH")]
	pub bridge_bin: String,

	/// Extra argument forwarded to the bridge (repeatable)
	#[arg(long = "bridge-arg", value_name = "ARG", allow_hyphen_values = true)]
	pub bridge_args: Vec<String>,

	/// Bridge state record shared with the bridge process
	#[arg(long, value_name = "FILE")]
	pub state_file: Option<PathBuf>,

	/// `.app` bundle installed by the bridge before launching
	#[arg(long, value_name = "PATH")]
	pub app_bundle: Option<PathBuf>,

	/// Stream device logs to GET /logs
	#[arg(long)]
	pub enable_log_stream: bool,

	/// devicectl wrapper used for log streaming
	#[arg(long, default_value = "xcrun")]
	pub devicectl_bin: String,

	/// Subcommand passed to the devicectl wrapper
	#[arg(long, default_value = "devicectl")]
	pub devicectl_subcommand: String,

	/// Build command argument run by the `build` action (repeat per argv element)
	#[arg(long = "build-cmd", value_name = "ARG", allow_hyphen_values = true)]
	pub build_cmd: Vec<String>,

	/// How long continue/next/step_in wait for the target to stop
	#[arg(long, default_value_t = DEFAULT_STOP_TIMEOUT.as_millis() as u64, value_name = "MS")]
	pub stop_timeout_ms: u64,

	/// Explicit lldb-dap executable
	#[arg(long, value_name = "PATH")]
	pub lldb_dap: Option<PathBuf>,
}

/// Arguments of `swiftscope-bridge`.
#[derive(Parser, Debug, Clone)]
#[command(name = "swiftscope-bridge")]
#[command(about = "Launch debugserver over devicectl and bridge it to a local port")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct BridgeArgs {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, action = ArgAction::Count)]
	pub verbose: u8,

	/// Device identifier understood by devicectl (UDID, name or serial)
	#[arg(long)]
	pub device: String,

	/// Bundle identifier to start suspended
	#[arg(long)]
	pub bundle_id: String,

	/// `.app` bundle to install before launching
	#[arg(long, value_name = "PATH")]
	pub install_app: Option<PathBuf>,

	/// Refuse to install an app without line-number debug info
	#[arg(long)]
	pub require_debug_info: bool,

	/// Loopback port exposing the gdb-remote connection
	#[arg(long, default_value_t = DEFAULT_LISTEN_PORT)]
	pub listen_port: u16,

	/// debugserver path on the device
	#[arg(long, default_value = DEFAULT_DEBUGSERVER_PATH)]
	pub debugserver_path: String,

	/// devicectl wrapper (usually xcrun)
	#[arg(long, default_value = "xcrun")]
	pub devicectl: String,

	/// Subcommand invoked inside the devicectl wrapper
	#[arg(long, default_value = "devicectl")]
	pub devicectl_subcommand: String,

	/// Extra argument for the suspended launch (repeatable)
	#[arg(long = "launch-arg", value_name = "ARG", allow_hyphen_values = true)]
	pub launch_args: Vec<String>,

	/// Where to record the binding
	#[arg(long, value_name = "FILE")]
	pub state_file: Option<PathBuf>,
}
