//! MCP (Model Context Protocol) Server Implementation
//!
//! JSON-RPC 2.0 over stdio exposing the question answering pipeline as tools.


pub mod protocol;
pub mod server;
pub mod tools;

pub use server::{ConnectionState, McpServer, ToolHandler};
