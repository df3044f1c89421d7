//! Google API module
//!
//! Thin consumers of the account subsystem that call Google APIs.

pub mod client;

pub use client::GoogleClient;
