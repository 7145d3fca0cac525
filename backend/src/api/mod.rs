//! HTTP API module.
//!
//! The axum server exposing the run-control protocol, plus the log
//! broadcaster shared by the runner and the CLI.

pub mod logs;
pub mod server;
pub mod types;

pub use logs::*;
pub use server::{router, start_server};
pub use types::*;
