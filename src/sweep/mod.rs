//! Sweep module for SpanJoin
//!
//! This module provides the per-partition sweep join and the active range
//! window it keeps while sweeping.

pub mod join;
pub mod window;

// Re-export key types
pub use join::{SweepError, SweepJoin, SweepStats, SWEEP_COUNTER_GROUP};
pub use window::{ActiveRange, ActiveRangeWindow, DEFAULT_GROW_INCREMENT, DEFAULT_WINDOW_CAPACITY};
