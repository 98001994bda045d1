use anyhow::Context;
use clap::Parser;
use swiftscope_cli::cli::BridgeArgs;
use swiftscope_cli::logging;
use swiftscope_runtime::BridgeState;
use swiftscope_runtime::bridge::{BridgeConfig, Devicectl, TransportSupervisor};
use swiftscope_runtime::state::DEFAULT_STATE_PATH;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = BridgeArgs::parse();
	logging::init_logging(args.verbose.max(1));

	let state_file = args.state_file.clone().unwrap_or_else(|| DEFAULT_STATE_PATH.into());
	let mut config = BridgeConfig::new(&args.device, &args.bundle_id);
	config.listen_port = args.listen_port;
	config.install_app = args.install_app.clone();
	config.require_debug_info = args.require_debug_info;
	config.debugserver_path = args.debugserver_path.clone();
	config.devicectl = Devicectl::new(&args.devicectl, &args.devicectl_subcommand);
	config.launch_args = args.launch_args.clone();
	config.state_file = Some(state_file.clone());

	info!(target = "swiftscope.bridge", device = %args.device, bundle_id = %args.bundle_id, port = args.listen_port, "bridge starting");
	let supervisor = TransportSupervisor::new(config);

	tokio::select! {
		result = supervisor.run() => result.context("bridge stopped"),
		signal = shutdown_signal() => {
			info!(target = "swiftscope.bridge", signal, "shutting down");
			if let Err(e) = BridgeState::invalidate(&state_file) {
				warn!(target = "swiftscope.bridge", error = %e, "failed to remove bridge state");
			}
			Ok(())
		}
	}
}

/// Resolves on SIGINT or SIGTERM. Returning drops the debugserver child, which kills it.
#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigterm = match signal(SignalKind::terminate()) {
		Ok(sigterm) => sigterm,
		Err(e) => {
			warn!(target = "swiftscope.bridge", error = %e, "failed to install SIGTERM handler");
			let _ = tokio::signal::ctrl_c().await;
			return "SIGINT";
		}
	};
	tokio::select! {
		_ = tokio::signal::ctrl_c() => "SIGINT",
		_ = sigterm.recv() => "SIGTERM",
	}
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
	let _ = tokio::signal::ctrl_c().await;
	"ctrl-c"
}
