/// Diff engine over catalog snapshots
mod engine;
mod event;

pub use engine::{diff, DiffOutcome};
pub use event::*;
