//! Uniquity MCP Server
//!
//! Exposes the Uniquity reporter to Claude and other AI assistants via the
//! Model Context Protocol (MCP) as a single `analyze_repository` tool.
//! Implements MCP over stdio using JSON-RPC 2.0.

pub mod advisory;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod interpret;
pub mod mapper;
pub mod protocol;
pub mod request;
pub mod runner;
pub mod schema;
pub mod server;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::BridgeError;
pub use runner::{ProcessOutcome, ProcessRunner, Runner};
pub use server::McpServer;
