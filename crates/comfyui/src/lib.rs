//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, WebSocket connection handling, HTTP
//! API wrappers, availability probing, bounded reconnection, execution
//! tracking, history parsing and workflow templating for running a
//! single job against a ComfyUI server.

pub mod api;
pub mod client;
pub mod history;
pub mod messages;
pub mod probe;
pub mod reconnect;
pub mod tracker;
pub mod workflow;
