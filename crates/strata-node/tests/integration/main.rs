//! Integration test entry point for strata-node.
//!
//! Run with: cargo test --test integration -- --test-threads=1

mod harness;
mod peers;
mod serve;
mod sync;
