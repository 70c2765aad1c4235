/// Types for subscriber state
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use super::error::RegistryError;

/// Maximum number of courses one subscriber may follow.
pub const MAX_COURSES: usize = 10;

/// Consecutive failed deliveries after which a subscriber is cancelled.
pub const MAX_STRIKES: u8 = 3;

static COURSE_CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{4}\d{4}[A-Z]?$").unwrap());

/// Opaque subscriber identifier, as issued by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a subscriber stands in the confirmation lifecycle.
///
/// Persisted as `0`, `1` or `2`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ConfirmState {
    /// Waiting for the first successful delivery
    #[default]
    Pending,
    /// Receiving course notifications
    Confirmed,
    /// Stopped after too many failed deliveries
    Cancelled,
}

impl From<ConfirmState> for u8 {
    fn from(state: ConfirmState) -> Self {
        match state {
            ConfirmState::Pending => 0,
            ConfirmState::Confirmed => 1,
            ConfirmState::Cancelled => 2,
        }
    }
}

impl TryFrom<u8> for ConfirmState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConfirmState::Pending),
            1 => Ok(ConfirmState::Confirmed),
            2 => Ok(ConfirmState::Cancelled),
            other => Err(format!("invalid confirm state {}", other)),
        }
    }
}

/// Per-user subscription state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    #[serde(rename = "confirm")]
    pub confirm_state: ConfirmState,
    #[serde(default)]
    pub strikes: u8,
    /// Insertion-ordered, at most [`MAX_COURSES`] entries
    #[serde(default)]
    pub courses: Vec<String>,
}

impl Subscriber {
    /// Returns true if course notifications should be delivered.
    pub fn is_deliverable(&self) -> bool {
        self.confirm_state == ConfirmState::Confirmed && self.strikes < MAX_STRIKES
    }

    /// Records a successful delivery. Returns true if this confirmed the user.
    pub(crate) fn mark_delivered(&mut self) -> bool {
        if self.confirm_state == ConfirmState::Cancelled {
            return false;
        }
        self.strikes = 0;
        if self.confirm_state == ConfirmState::Pending {
            self.confirm_state = ConfirmState::Confirmed;
            return true;
        }
        false
    }

    /// Adds a strike, cancelling the subscriber once the limit is reached.
    pub(crate) fn add_strike(&mut self) -> StrikeOutcome {
        self.strikes = self.strikes.saturating_add(1).min(MAX_STRIKES);
        if self.strikes >= MAX_STRIKES {
            self.cancel();
            StrikeOutcome::Cancelled
        } else {
            StrikeOutcome::Counted(self.strikes)
        }
    }

    fn cancel(&mut self) {
        self.strikes = MAX_STRIKES;
        self.courses.clear();
        self.confirm_state = ConfirmState::Cancelled;
    }

    /// Restores invariants on a record loaded from disk.
    ///
    /// Returns true if anything had to be changed.
    pub(crate) fn repair(&mut self) -> bool {
        let mut repaired = false;
        if self.strikes >= MAX_STRIKES && self.confirm_state != ConfirmState::Cancelled {
            self.cancel();
            repaired = true;
        }
        if self.courses.len() > MAX_COURSES {
            self.courses.truncate(MAX_COURSES);
            repaired = true;
        }
        repaired
    }
}

/// What a failed delivery did to a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrikeOutcome {
    /// Strike counted; carries the new total
    Counted(u8),
    /// Limit reached: courses cleared and subscription cancelled
    Cancelled,
    /// No such subscriber
    Unknown,
}

/// Normalises a user-typed course code: spaces removed, upper-cased.
pub fn normalize_course_code(input: &str) -> Result<String, RegistryError> {
    let code: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    if COURSE_CODE_REGEX.is_match(&code) {
        Ok(code)
    } else {
        Err(RegistryError::InvalidCourseCode {
            input: input.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_course_code() {
        assert_eq!(normalize_course_code("comp 2012").unwrap(), "COMP2012");
        assert_eq!(normalize_course_code(" COMP2012H ").unwrap(), "COMP2012H");
        assert!(normalize_course_code("COMP20").is_err());
        assert!(normalize_course_code("All courses").is_err());
    }

    #[test]
    fn test_confirm_state_encoding() {
        assert_eq!(serde_json::to_string(&ConfirmState::Cancelled).unwrap(), "2");
        let state: ConfirmState = serde_json::from_str("1").unwrap();
        assert_eq!(state, ConfirmState::Confirmed);
        assert!(serde_json::from_str::<ConfirmState>("3").is_err());
    }

    #[test]
    fn test_third_strike_cancels() {
        let mut sub = Subscriber {
            courses: vec!["COMP2012".to_string()],
            ..Subscriber::default()
        };
        assert_eq!(sub.add_strike(), StrikeOutcome::Counted(1));
        assert_eq!(sub.add_strike(), StrikeOutcome::Counted(2));
        assert_eq!(sub.add_strike(), StrikeOutcome::Cancelled);
        assert_eq!(sub.confirm_state, ConfirmState::Cancelled);
        assert!(sub.courses.is_empty());
    }

    #[test]
    fn test_delivery_resets_strikes() {
        let mut sub = Subscriber::default();
        sub.add_strike();
        sub.add_strike();
        assert!(sub.mark_delivered());
        assert_eq!(sub.strikes, 0);
        assert_eq!(sub.confirm_state, ConfirmState::Confirmed);
        assert!(!sub.mark_delivered());
    }

    #[test]
    fn test_repair_loaded_record() {
        let mut sub = Subscriber {
            confirm_state: ConfirmState::Confirmed,
            strikes: 3,
            courses: vec!["COMP2012".to_string()],
        };
        assert!(sub.repair());
        assert_eq!(sub.confirm_state, ConfirmState::Cancelled);
        assert!(sub.courses.is_empty());

        let mut crowded = Subscriber {
            courses: (0..12).map(|i| format!("COMP{:04}", i)).collect(),
            ..Subscriber::default()
        };
        assert!(crowded.repair());
        assert_eq!(crowded.courses.len(), MAX_COURSES);
    }
}
