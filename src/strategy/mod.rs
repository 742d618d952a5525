//! Strategy layer: spread detection, dislocation tracking, risk, pre-trade
//! validation, stink-bid rotation and the directional signal strategies.

pub mod dislocation;
pub mod risk;
pub mod signals;
pub mod spread;
pub mod stink_bid;
pub mod validators;

pub use risk::{RejectionReason, RiskManager};
pub use spread::{SpreadAnalyzer, SpreadResult};
pub use validators::{TradeValidator, ValidationResult};
