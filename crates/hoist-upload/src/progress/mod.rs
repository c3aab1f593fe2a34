//! Progress tracking and gating.
//!
//! This module turns byte counts into percentages and decides which
//! percentages are worth an event.

mod gate;

pub use gate::{ProgressGate, percent};
