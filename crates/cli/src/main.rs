use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use swiftscope::LldbDapLauncher;
use swiftscope_cli::cli::ApiArgs;
use swiftscope_cli::supervisor::{BridgeControl, BridgeSupervisor, LogHub, spawn_log_stream};
use swiftscope_cli::{AppState, Config, logging, server};
use swiftscope_runtime::debug_info::has_line_info;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = ApiArgs::parse();
	logging::init_logging(args.verbose);

	let config = Config::from_args(&args)?;
	check_debug_info(&config)?;

	let logs = LogHub::new();
	let mut state = AppState::new(config.clone(), logs.clone());
	match LldbDapLauncher::locate(config.lldb_dap.as_deref()) {
		Ok(launcher) => {
			info!(target = "swiftscope.api", adapter = %launcher.executable().display(), "using debug adapter");
			state = state.with_launcher(Arc::new(launcher));
		}
		Err(e) => warn!(target = "swiftscope.api", error = %e, "no debug adapter; session commands will fail"),
	}

	if let Some(supervisor) = BridgeSupervisor::from_config(&config, logs.clone()) {
		let supervisor = Arc::new(supervisor);
		if let Err(e) = supervisor.ensure_running().await {
			warn!(target = "swiftscope.api", error = %e, "bridge did not start; use launch to retry");
		}
		state = state.with_bridge(supervisor);
	}

	if config.enable_log_stream {
		if let Some(device) = config.device.as_deref() {
			spawn_log_stream(config.devicectl.log_stream_command(device), logs.clone());
		}
	}

	let state = Arc::new(state);
	state.attach_initial().await;

	let shutdown = async {
		let _ = tokio::signal::ctrl_c().await;
	};
	let result = server::serve(state.clone(), shutdown).await;
	state.shutdown().await;
	result
}

fn check_debug_info(config: &Config) -> anyhow::Result<()> {
	if has_line_info(config.program()) {
		return Ok(());
	}
	warn!(
		target = "swiftscope.api",
		program = %config.program().display(),
		"no line-number debug info; breakpoints may not resolve. Rebuild with a Debug configuration"
	);
	if config.require_debug_info {
		bail!(
			"debug info missing for {}; refusing to start because --require-debug-info was set",
			config.program().display()
		);
	}
	Ok(())
}
