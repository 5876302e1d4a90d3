//! searcher-backtest: did the detector's predictions match reality?
//!
//! Reconstructs the arbitrages that actually executed in historical
//! blocks from receipt logs, runs the detector over the same pre-state,
//! and aggregates block-level precision/recall over a range.

pub mod recognizer;
pub mod report;
pub mod runner;

pub use recognizer::{find_actual_arbitrages, ExecutedArbitrage, PairGroups};
pub use report::{BacktestReport, BlockOutcome};
pub use runner::{Runner, RunnerConfig};
