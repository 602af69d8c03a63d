//! Core simulation engine and business types

pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod ledger;
pub mod log;
pub mod policy;

// Re-export main types for cleaner imports
pub use config::{AppConfig, Plan};
pub use engine::{SimulationOutcome, ValuePoint};
pub use error::SimError;
pub use history::{ClosePoint, HistoryProvider, PriceHistory, TradingDay};
pub use ledger::Ledger;
