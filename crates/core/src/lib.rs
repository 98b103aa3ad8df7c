//! Shared domain types for the ComfyUI job worker.
//!
//! Holds the job input model and its validation rules, plus the
//! [`CoreError`](error::CoreError) type used across crates.

pub mod error;
pub mod input;
pub mod types;
