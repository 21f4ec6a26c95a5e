//! warmpool worker library.
//!
//! This crate primarily ships a `pool-worker` binary, but we expose a small
//! library surface to enable integration testing and reuse by `poolctl`.

pub mod config;
pub mod pool;
