//! Byte forwarding between the debugserver's stdio and loopback clients.
//!
//! Clients are served one at a time. Each connection runs one task per direction; when
//! either side finishes the other is stopped and the debugserver halves are handed back
//! so the next client can reuse them. A client hanging up returns the bridge to
//! accepting. Any failure on the debugserver side is fatal for the binding.

use std::io;
use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::state::BridgeState;

const BUFFER_SIZE: usize = 16 * 1024;

/// How a single forwarding direction ended.
#[derive(Debug)]
enum Flow {
	ReaderClosed,
	ReadFailed(io::Error),
	WriteFailed(io::Error),
	Stopped,
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, stop: &mut watch::Receiver<bool>) -> Flow
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let mut buf = vec![0u8; BUFFER_SIZE];
	loop {
		let read = tokio::select! {
			read = reader.read(&mut buf) => read,
			_ = stop.changed() => return Flow::Stopped,
		};
		let n = match read {
			Ok(0) => return Flow::ReaderClosed,
			Ok(n) => n,
			Err(e) => return Flow::ReadFailed(e),
		};
		if let Err(e) = writer.write_all(&buf[..n]).await {
			return Flow::WriteFailed(e);
		}
		if let Err(e) = writer.flush().await {
			return Flow::WriteFailed(e);
		}
	}
}

/// Serves clients on `listener` until the debugserver side fails or exits.
///
/// On return the child has been killed and the record at `state_file` removed.
pub async fn serve(listener: TcpListener, mut debugserver: Child, state_file: Option<&Path>) -> Result<()> {
	let result = serve_inner(&listener, &mut debugserver).await;

	let _ = debugserver.start_kill();
	let _ = debugserver.wait().await;
	drop(listener);
	if let Some(path) = state_file {
		if let Err(e) = BridgeState::invalidate(path) {
			tracing::warn!(target = "swiftscope.bridge", error = %e, "failed to invalidate bridge state");
		}
	}
	if let Err(e) = &result {
		tracing::warn!(target = "swiftscope.bridge", error = %e, "binding torn down");
	}
	result
}

async fn serve_inner(listener: &TcpListener, debugserver: &mut Child) -> Result<()> {
	let mut stdin = debugserver
		.stdin
		.take()
		.ok_or_else(|| Error::Transport("debugserver stdin not captured".to_string()))?;
	let mut stdout = debugserver
		.stdout
		.take()
		.ok_or_else(|| Error::Transport("debugserver stdout not captured".to_string()))?;
	if let Some(stderr) = debugserver.stderr.take() {
		tokio::spawn(async move {
			use tokio::io::AsyncBufReadExt;
			let mut lines = tokio::io::BufReader::new(stderr).lines();
			while let Ok(Some(line)) = lines.next_line().await {
				tracing::info!(target = "swiftscope.debugserver", "{line}");
			}
		});
	}

	loop {
		let (client, peer) = tokio::select! {
			accepted = listener.accept() => accepted.map_err(|e| Error::Transport(format!("accept failed: {e}")))?,
			status = debugserver.wait() => {
				return Err(Error::Transport(match status {
					Ok(status) => format!("debugserver exited: {status}"),
					Err(e) => format!("debugserver wait failed: {e}"),
				}));
			}
		};
		tracing::info!(target = "swiftscope.bridge", %peer, "adapter connected");

		let (returned_stdin, returned_stdout, outcome) = forward_one(client, stdin, stdout).await?;
		stdin = returned_stdin;
		stdout = returned_stdout;
		match outcome {
			ClientOutcome::Disconnected => {
				tracing::info!(target = "swiftscope.bridge", %peer, "adapter disconnected; waiting for next client");
			}
			ClientOutcome::DebugserverFailed(reason) => return Err(Error::Transport(reason)),
		}
	}
}

enum ClientOutcome {
	Disconnected,
	DebugserverFailed(String),
}

async fn forward_one(
	client: tokio::net::TcpStream,
	mut stdin: ChildStdin,
	mut stdout: ChildStdout,
) -> Result<(ChildStdin, ChildStdout, ClientOutcome)> {
	let (mut client_rd, mut client_wr) = client.into_split();
	let (stop_tx, stop_rx) = watch::channel(false);
	let mut stop_up = stop_rx.clone();
	let mut stop_down = stop_rx;

	let mut upstream = tokio::spawn(async move {
		let flow = pump(&mut client_rd, &mut stdin, &mut stop_up).await;
		(stdin, flow)
	});
	let mut downstream = tokio::spawn(async move {
		let flow = pump(&mut stdout, &mut client_wr, &mut stop_down).await;
		(stdout, flow)
	});

	let join_failed = |e: tokio::task::JoinError| Error::Transport(format!("forwarding task failed: {e}"));

	let (stdin, stdout, outcome) = tokio::select! {
		up = &mut upstream => {
			let (stdin, flow) = up.map_err(join_failed)?;
			let _ = stop_tx.send(true);
			let (stdout, _) = downstream.await.map_err(join_failed)?;
			(stdin, stdout, classify_upstream(flow))
		}
		down = &mut downstream => {
			let (stdout, flow) = down.map_err(join_failed)?;
			let _ = stop_tx.send(true);
			let (stdin, _) = upstream.await.map_err(join_failed)?;
			(stdin, stdout, classify_downstream(flow))
		}
	};
	Ok((stdin, stdout, outcome))
}

/// Client to debugserver: only a failed write into the debugserver is fatal.
fn classify_upstream(flow: Flow) -> ClientOutcome {
	match flow {
		Flow::WriteFailed(e) => ClientOutcome::DebugserverFailed(format!("write to debugserver failed: {e}")),
		Flow::ReadFailed(e) => {
			tracing::debug!(target = "swiftscope.bridge", error = %e, "client read failed");
			ClientOutcome::Disconnected
		}
		Flow::ReaderClosed | Flow::Stopped => ClientOutcome::Disconnected,
	}
}

/// Debugserver to client: anything but a failed client write is fatal.
fn classify_downstream(flow: Flow) -> ClientOutcome {
	match flow {
		Flow::ReaderClosed => ClientOutcome::DebugserverFailed("debugserver closed its output".to_string()),
		Flow::ReadFailed(e) => ClientOutcome::DebugserverFailed(format!("read from debugserver failed: {e}")),
		Flow::WriteFailed(e) => {
			tracing::debug!(target = "swiftscope.bridge", error = %e, "client write failed");
			ClientOutcome::Disconnected
		}
		Flow::Stopped => ClientOutcome::Disconnected,
	}
}
