//! Wire types shared by the swiftscope crates.
//!
//! - [`command`]: the JSON request accepted on `POST /command` and its validated form
//! - [`envelope`]: the uniform `{ok, ...}` / `{ok:false, error}` response wrapper
//! - [`dap`]: Debug Adapter Protocol messages exchanged with `lldb-dap`

pub mod command;
pub mod dap;
pub mod envelope;

pub use command::{Action, CommandRequest, DebugCommand, ValidationError};
pub use envelope::{Envelope, ErrorCode};
