//! Shared helpers for the QuiverDB benchmarks.

pub mod utils;
