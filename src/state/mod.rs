//! State module for tracking harvest progress
//!
//! # Components
//!
//! - `ItemState`: Tracks a single candidate (pending, fetching, valid, rejected, failed)
//! - `RunPhase` / `PhaseCell`: Tracks the run as a whole (running, draining, stopped)
//! - `CursorState`: The durable progress record written to the checkpoint

mod cursor_state;
mod item_state;
mod run_phase;

// Re-export main types
pub use cursor_state::{CursorState, CURSOR_SCHEMA_VERSION};
pub use item_state::ItemState;
pub use run_phase::{DrainReason, PhaseCell, RunPhase};
