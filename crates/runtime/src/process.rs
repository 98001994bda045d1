//! Liveness probes for processes and loopback ports.

use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(300);

/// Returns `true` when a process with `pid` exists.
#[cfg(unix)]
pub fn pid_is_alive(pid: u32) -> bool {
	let Ok(pid) = libc::pid_t::try_from(pid) else {
		return false;
	};
	if pid <= 0 {
		return false;
	}
	// SAFETY: signal 0 performs the permission and existence check without delivering anything.
	let rc = unsafe { libc::kill(pid, 0) };
	if rc == 0 {
		return true;
	}
	std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Without `kill(pid, 0)` nothing is reported alive, so stale records are never adopted.
#[cfg(not(unix))]
pub fn pid_is_alive(_pid: u32) -> bool {
	false
}

/// Signals that can be delivered to a whole process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSignal {
	Terminate,
	Kill,
}

/// Sends `signal` to the process group led by `pgid`.
///
/// The leader must have been spawned with `process_group(0)`. Returns `false` when no
/// process of the group is left.
#[cfg(unix)]
pub fn signal_group(pgid: u32, signal: GroupSignal) -> bool {
	let Ok(pgid) = libc::pid_t::try_from(pgid) else {
		return false;
	};
	if pgid <= 1 {
		return false;
	}
	let signal = match signal {
		GroupSignal::Terminate => libc::SIGTERM,
		GroupSignal::Kill => libc::SIGKILL,
	};
	// SAFETY: a negative pid addresses the group; no memory is shared with the callee.
	unsafe { libc::kill(-pgid, signal) == 0 }
}

#[cfg(not(unix))]
pub fn signal_group(_pgid: u32, _signal: GroupSignal) -> bool {
	false
}

/// Returns `true` when something accepts TCP connections on `127.0.0.1:port`.
pub fn port_accepts(port: u16) -> bool {
	let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
	TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).is_ok()
}

/// Async variant of [`port_accepts`].
pub async fn port_accepts_async(port: u16) -> bool {
	matches!(
		tokio::time::timeout(CONNECT_TIMEOUT, tokio::net::TcpStream::connect((Ipv4Addr::LOCALHOST, port))).await,
		Ok(Ok(_))
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[cfg(unix)]
	#[test]
	fn test_current_process_is_alive() {
		assert!(pid_is_alive(std::process::id()));
	}

	#[cfg(unix)]
	#[test]
	fn test_reaped_child_is_not_alive() {
		let mut child = std::process::Command::new("true").spawn().unwrap();
		let pid = child.id();
		child.wait().unwrap();
		assert!(!pid_is_alive(pid));
	}

	#[cfg(unix)]
	#[test]
	fn test_group_signal_reaches_grandchildren() {
		use std::os::unix::process::CommandExt;

		let dir = tempfile::tempdir().unwrap();
		let pid_file = dir.path().join("grandchild.pid");
		let mut leader = std::process::Command::new("sh")
			.arg("-c")
			.arg(format!("sleep 300 & echo $! > {}; wait", pid_file.display()))
			.process_group(0)
			.spawn()
			.unwrap();

		let grandchild = wait_for_pid(&pid_file);
		assert!(pid_is_alive(grandchild));

		assert!(signal_group(leader.id(), GroupSignal::Terminate));
		leader.wait().unwrap();
		assert!(wait_until_gone(grandchild), "grandchild {grandchild} survived");
	}

	#[cfg(not(unix))]
	#[test]
	fn test_unknown_pid_is_not_alive() {
		assert!(!pid_is_alive(u32::MAX));
	}

	#[test]
	fn test_port_check_follows_listener() {
		let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
		let port = listener.local_addr().unwrap().port();
		assert!(port_accepts(port));
		drop(listener);
		assert!(!port_accepts(port));
	}

	#[tokio::test]
	async fn test_async_port_check() {
		let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
		let port = listener.local_addr().unwrap().port();
		assert!(port_accepts_async(port).await);
	}

	#[cfg(unix)]
	fn wait_for_pid(path: &std::path::Path) -> u32 {
		for _ in 0..100 {
			if let Some(pid) = std::fs::read_to_string(path).ok().and_then(|s| s.trim().parse().ok()) {
				return pid;
			}
			std::thread::sleep(Duration::from_millis(20));
		}
		panic!("pid file {} never written", path.display());
	}

	/// Orphans are reaped by init; a zombie still answers `kill(pid, 0)`.
	#[cfg(unix)]
	fn wait_until_gone(pid: u32) -> bool {
		for _ in 0..100 {
			let zombie = std::fs::read_to_string(format!("/proc/{pid}/stat"))
				.is_ok_and(|stat| stat.rsplit(')').next().is_some_and(|rest| rest.trim_start().starts_with('Z')));
			if !pid_is_alive(pid) || zombie {
				return true;
			}
			std::thread::sleep(Duration::from_millis(20));
		}
		false
	}
}
