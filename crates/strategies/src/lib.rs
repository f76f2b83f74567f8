//! Concrete strategy runners: `grid`, and the two DCA directions built on a
//! shared `dca` state machine.
//!
//! This crate depends on `engine` for the `Runner` trait and its
//! collaborators, never the other way round — `engine` knows nothing about
//! grid levels or DCA ladders, only that something implements `Runner`.

pub mod dca;
pub mod grid;
pub mod support;

pub use dca::{DcaRunner, Direction};
pub use grid::GridRunner;

use core_types::StrategyId;
use engine::Runner;
use std::sync::Arc;

/// Builds the runner for a given strategy id — the one function the binary
/// hands to [`engine::BotManager::new`] as its [`engine::RunnerFactory`].
pub fn build_runner(strategy: StrategyId) -> Arc<dyn Runner> {
    match strategy {
        StrategyId::Grid => GridRunner::new(),
        StrategyId::DcaBuy => DcaRunner::buy(),
        StrategyId::DcaSell => DcaRunner::sell(),
    }
}
