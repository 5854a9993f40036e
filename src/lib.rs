//! Ember - embeddable asynchronous server framework.
//!
//! A reactor-style server where connection events (init, readable,
//! writable, close) are delivered to an ordered chain of registered hooks.
//! The built-in HTTP handler is itself a hook that incrementally parses
//! requests, so applications compose protocol handling and application
//! logic out of the same building block.

pub mod buffer;
pub mod config;
pub mod http;
pub mod server;
pub mod table;
