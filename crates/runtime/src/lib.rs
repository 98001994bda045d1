//! Process and wire plumbing for swiftscope.
//!
//! - [`transport`] / [`connection`]: Content-Length framed DAP client
//! - [`adapter`]: the `lldb-dap` child process
//! - [`bridge`]: the Transport Supervisor exposing debugserver on a loopback port
//! - [`state`]: the persisted binding record shared between processes

pub mod adapter;
pub mod bridge;
pub mod connection;
pub mod debug_info;
pub mod driver;
pub mod error;
pub mod process;
pub mod state;
pub mod transport;

pub use adapter::DapClient;
pub use connection::Connection;
pub use error::{Error, Result};
pub use process::{GroupSignal, pid_is_alive, port_accepts, signal_group};
pub use state::{BridgeState, Liveness};
