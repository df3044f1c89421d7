//! Google MCP Server Library
//!
//! A Model Context Protocol (MCP) server exposing Google services to an
//! orchestrating agent. The core is the multi-account credential manager
//! ([`auth`]) and the sandboxed local file accessor ([`local`]); tools are
//! consumers of those two.

pub mod auth;
pub mod config;
pub mod error;
pub mod google;
pub mod local;
pub mod mcp;

pub use config::Config;
pub use error::{GoogleMcpError, Result};
