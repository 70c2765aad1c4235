//! Error types for subscription commands.

use thiserror::Error;

use crate::store::StoreError;

/// Outcomes of a registry operation other than success.
///
/// Everything except `Store` is an expected validation result for the command
/// layer to show to the user.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Subscriber already follows the maximum number of courses
    #[error("Subscription limit of {limit} courses reached")]
    QuotaExceeded { limit: usize },

    #[error("Already subscribed to {course_code}")]
    AlreadySubscribed { course_code: String },

    #[error("Not subscribed to {course_code}")]
    NotSubscribed { course_code: String },

    #[error("Invalid course code: {input}")]
    InvalidCourseCode { input: String },

    /// The change was applied in memory but could not be saved
    #[error("Failed to persist subscribers: {0}")]
    Store(#[from] StoreError),
}

impl RegistryError {
    /// Returns true if this is a validation outcome rather than a failure.
    pub fn is_validation(&self) -> bool {
        !matches!(self, RegistryError::Store(_))
    }
}
