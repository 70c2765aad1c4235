/// Structured catalog snapshots and list-field helpers
mod list;
mod types;

pub use list::{dedup_items, normalize_item, remarks_items, ListDelta, EMPTY_SENTINEL};
pub use types::*;
