//! swiftscope HTTP control plane.
//!
//! - [`dispatch`]: `POST /command` → one [`swiftscope::DebugSession`] operation → envelope
//! - [`health`]: readiness against the bridge record and the session
//! - [`supervisor`]: the bridge child, the build hook and device log streaming
//! - [`server`]: the axum router

pub mod app;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod logging;
pub mod server;
pub mod supervisor;

pub use app::{AppState, SharedState};
pub use config::Config;
pub use error::ApiError;
