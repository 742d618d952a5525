//! Monitoring: latency measurement, P&L tracking, Telegram alerts and the
//! terminal dashboard.

pub mod alerts;
pub mod console;
pub mod latency;
pub mod pnl;

pub use alerts::{Alert, AlertManager, AlertType};
pub use latency::LatencyLogger;
pub use pnl::PnLTracker;
