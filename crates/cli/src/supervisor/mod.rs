//! Process & hook supervision: the bridge child, the build hook and device log streaming.

mod bridge;
mod build;
mod device_log;
mod logs;

pub use bridge::{BridgeControl, BridgeSupervisor, READY_ATTEMPTS, READY_INTERVAL};
pub use build::{BuildHook, BuildOutcome};
pub use device_log::spawn_log_stream;
pub use logs::{LOG_CAPACITY, LogHub, LogLevel, format_line};
use swiftscope_runtime::{BridgeState, Liveness};

/// Runs the blocking liveness probe off the async workers.
pub async fn probe_record(record: BridgeState) -> (BridgeState, Liveness) {
	let fallback = record.clone();
	match tokio::task::spawn_blocking(move || {
		let liveness = record.probe();
		(record, liveness)
	})
	.await
	{
		Ok(result) => result,
		Err(_) => (fallback, Liveness::BridgeGone),
	}
}
