//! Watches a course catalog for quota and section changes and notifies
//! subscribers.
//!
//! A [`scheduler::UpdateLoop`] periodically pulls a [`catalog::Snapshot`]
//! from a [`scheduler::CatalogSource`], diffs it against the committed
//! baseline with [`diff::diff`], posts each [`diff::ChangeEvent`] to the
//! channel picked by [`notify::NotificationRouter`] and fans it out to the
//! subscribers held in [`registry::SubscriberRegistry`].

pub mod catalog;
pub mod diff;
pub mod logging;
pub mod notify;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use catalog::{CourseRecord, SectionRecord, Snapshot};
pub use diff::{ChangeEvent, ChangeKind, DiffOutcome};
pub use notify::{DeliveryService, NotificationRouter};
pub use registry::{SubscriberRegistry, UserId};
pub use scheduler::{LoopConfig, UpdateLoop};
