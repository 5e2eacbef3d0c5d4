//! Content-Length-framed JSON-RPC language-server loop over [`effc`]'s
//! compile sessions: a thin `handler` module owning all state, and a
//! `main.rs` that only does framing and method dispatch.

pub mod handler;
pub mod server;

pub use crate::handler::{LspHandler, OperationDefinition};
pub use crate::server::{run_loop, run_stdio_loop};
