/// Periodic fetch, diff and delivery
mod config;
mod cycle;
mod source;

pub use config::{ConfigError, LoopConfig};
pub use cycle::{CycleError, CycleOutcome, CycleReport, UpdateLoop};
pub use source::{CatalogSource, FetchError, HttpCatalogSource};
