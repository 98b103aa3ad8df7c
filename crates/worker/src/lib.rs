//! Single-job ComfyUI worker.
//!
//! Takes one job, drives it through a ComfyUI server and produces the
//! result envelope the job host expects.

pub mod collector;
pub mod config;
pub mod coordinator;
pub mod outcome;
pub mod output;
