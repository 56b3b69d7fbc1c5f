//! Oracle Latency Bot — Library Root
//!
//! Trades prediction markets whose real-world outcome is already known
//! but whose on-chain resolution has not landed yet. Re-exports all
//! modules for integration tests and benchmarks.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod usecases;
