//! swiftscope debug session.
//!
//! [`DebugSession`] drives one `lldb-dap` adapter attached to a suspended iOS process through
//! the bridge port, and exposes the inspection and execution-control operations served by the
//! HTTP API.

pub mod adapter;
pub mod error;
pub mod session;
pub mod types;

pub use adapter::{AdapterHandle, AdapterLauncher, DebugAdapter, LldbDapLauncher};
pub use error::SessionError;
pub use session::{AttachConfig, DEFAULT_STOP_TIMEOUT, DebugSession};
pub use types::{Breakpoint, EvalResult, Frame, SessionState, SessionStop, Variable, WatchValue};

/// DAP wire types used in session payloads.
pub use swiftscope_protocol::dap::{Scope, Thread};
