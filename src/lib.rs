//! POLYBOT: Polymarket flash-market arbitrage and signal trading.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod platforms;
pub mod strategy;
pub mod engine;
pub mod monitoring;
pub mod storage;
pub mod reporting;
pub mod dashboard;
