//! Common test utilities for sharelink-dl batch tests

#[allow(dead_code)]
pub mod config;
#[allow(dead_code)]
pub mod engine;

pub use config::*;
#[allow(unused_imports)]
pub use engine::*;
