pub mod monitor;
pub mod sweeper;

#[cfg(test)]
mod monitor_tests;

pub use monitor::{BreakingMonitor, MonitorStats};
pub use sweeper::{SweepStats, Sweeper};
