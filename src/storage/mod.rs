//! Persistence layer.
//!
//! The bot state snapshot is a JSON file rewritten after every cycle; it is
//! what `status`, `latency-report` and `simulation-stats` read. Trade,
//! position and P&L history goes to SQLite through [`repository`].

pub mod repository;

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::types::BotState;

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "polybot_state.json";

/// Save bot state to a JSON file.
pub fn save_state(state: &BotState, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(state).context("Failed to serialise bot state")?;

    // Write-then-rename so a crash mid-write keeps the previous snapshot.
    let tmp = format!("{path}.tmp");
    std::fs::write(&tmp, &json).context(format!("Failed to write state to {tmp}"))?;
    std::fs::rename(&tmp, path).context(format!("Failed to move state into {path}"))?;

    debug!(path, cycles = state.cycle_count, positions = state.positions.len(), "State saved");
    Ok(())
}

/// Load bot state from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_state(path: Option<&str>) -> Result<Option<BotState>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path).context(format!("Failed to read state from {path}"))?;
    let state: BotState =
        serde_json::from_str(&json).context(format!("Failed to parse state from {path}"))?;

    info!(
        path,
        cycles = state.cycle_count,
        trades = state.trades_executed,
        open_positions = state.open_positions().count(),
        halted = state.halted,
        "State loaded from disk"
    );

    Ok(Some(state))
}

/// Delete the state file (for testing or reset).
pub fn delete_state(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path).context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}
