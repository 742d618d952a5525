//! Core engine: the scan → detect → execute → settle loop.
//!
//! - `scanner`: Gamma discovery and flash-market selection
//! - `executor`: live CLOB and paper order execution
//! - `simulator`: slippage, latency and partial-fill model for paper fills
//! - `positions`: two-leg position lifecycle
//! - `runner`: the cycle orchestrator

pub mod executor;
pub mod positions;
pub mod runner;
pub mod scanner;
pub mod simulator;

pub use runner::ArbitrageEngine;
