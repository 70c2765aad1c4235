/// Types for structured catalog snapshots
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use super::list::normalize_item;

/// Errors raised when a snapshot cannot be used as either side of a diff.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The snapshot is missing data every complete capture has
    #[error("Snapshot is structurally incomplete: {reason}")]
    ParseInconsistency { reason: String },
}

/// A full point-in-time capture of the course catalog.
///
/// Fields are only reachable through shared references, so a snapshot can't
/// be edited once it has been built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    captured_at: DateTime<Utc>,
    courses: BTreeMap<String, CourseRecord>,
}

impl Snapshot {
    /// Captures a snapshot from already-structured course records.
    pub fn new(captured_at: DateTime<Utc>, courses: BTreeMap<String, CourseRecord>) -> Self {
        Self {
            captured_at,
            courses,
        }
    }

    /// Captures a snapshot stamped with the current time.
    pub fn capture(courses: BTreeMap<String, CourseRecord>) -> Self {
        Self::new(Utc::now(), courses)
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn courses(&self) -> &BTreeMap<String, CourseRecord> {
        &self.courses
    }

    /// Looks up a single course by its code.
    pub fn course(&self, course_code: &str) -> Option<&CourseRecord> {
        self.courses.get(course_code)
    }

    /// Returns all course codes in catalog order.
    pub fn course_codes(&self) -> impl Iterator<Item = &str> {
        self.courses.keys().map(String::as_str)
    }

    /// Returns the distinct subject prefixes (e.g. "COMP", "MATH").
    pub fn prefixes(&self) -> Vec<String> {
        self.courses
            .keys()
            .map(|code| course_prefix(code).to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Returns every distinct instructor and TA name across all sections.
    pub fn instructors(&self) -> Vec<String> {
        self.courses
            .values()
            .flat_map(|course| course.sections.values())
            .flat_map(|section| section.instructor.iter().chain(section.ta.iter()))
            .map(|name| normalize_item(name))
            .filter(|name| !name.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Checks that the snapshot is complete enough to diff against.
    ///
    /// An interrupted capture shows up as an empty catalog, or as records
    /// with blank keys or titles.
    pub fn check_consistency(&self) -> Result<(), CatalogError> {
        if self.courses.is_empty() {
            return Err(CatalogError::ParseInconsistency {
                reason: "snapshot has no courses".to_string(),
            });
        }

        for (code, course) in &self.courses {
            if code.trim().is_empty() {
                return Err(CatalogError::ParseInconsistency {
                    reason: "blank course code".to_string(),
                });
            }
            if course.title.trim().is_empty() {
                return Err(CatalogError::ParseInconsistency {
                    reason: format!("course {} has no title", code),
                });
            }
            if course.sections.keys().any(|s| s.trim().is_empty()) {
                return Err(CatalogError::ParseInconsistency {
                    reason: format!("course {} has a blank section code", code),
                });
            }
        }

        Ok(())
    }

    /// Returns true if [`Snapshot::check_consistency`] passes.
    pub fn is_consistent(&self) -> bool {
        self.check_consistency().is_ok()
    }
}

/// One course and all of its class sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub title: String,
    #[serde(default)]
    pub info: BTreeMap<String, String>,
    #[serde(default)]
    pub sections: BTreeMap<String, SectionRecord>,
}

impl CourseRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            info: BTreeMap::new(),
            sections: BTreeMap::new(),
        }
    }

    /// Adds an info field (e.g. "PRE-REQUISITE").
    pub fn with_info(mut self, field: impl Into<String>, text: impl Into<String>) -> Self {
        self.info.insert(field.into(), text.into());
        self
    }

    /// Adds a section keyed by its section code.
    pub fn with_section(mut self, section_code: impl Into<String>, section: SectionRecord) -> Self {
        self.sections.insert(section_code.into(), section);
        self
    }
}

/// One class section of a course, accessed by field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRecord {
    #[serde(default)]
    pub schedule: Vec<String>,
    #[serde(default)]
    pub venue: Vec<String>,
    #[serde(default)]
    pub instructor: Vec<String>,
    #[serde(default)]
    pub ta: Vec<String>,
    pub quota_total: QuotaTotal,
    #[serde(default)]
    pub quota_reserved: BTreeMap<String, ReservedQuota>,
    /// `None` means the section has no remarks field at all; `Some("")` is
    /// the canonical empty remarks.
    #[serde(default)]
    pub remarks: Option<String>,
}

impl SectionRecord {
    /// Creates a section with the given total quota and no other data.
    pub fn new(quota_total: QuotaTotal) -> Self {
        Self {
            schedule: Vec::new(),
            venue: Vec::new(),
            instructor: Vec::new(),
            ta: Vec::new(),
            quota_total,
            quota_reserved: BTreeMap::new(),
            remarks: None,
        }
    }
}

/// A quota figure as captured from the catalog.
///
/// The source sometimes reports a bare integer and sometimes a text cell whose
/// first line holds the integer followed by annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Figure {
    Count(i64),
    Text(String),
}

impl Figure {
    /// Parses the numeric value, or `None` if the cell is malformed.
    pub fn parse(&self) -> Option<i64> {
        match self {
            Figure::Count(n) => Some(*n),
            Figure::Text(text) => text.lines().next()?.trim().parse::<i64>().ok(),
        }
    }
}

impl From<i64> for Figure {
    fn from(n: i64) -> Self {
        Figure::Count(n)
    }
}

impl From<&str> for Figure {
    fn from(text: &str) -> Self {
        Figure::Text(text.to_string())
    }
}

/// Section-wide quota figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaTotal {
    pub quota: Figure,
    pub enrolled: Figure,
    pub avail: Figure,
    pub wait: Figure,
}

impl QuotaTotal {
    pub fn new(quota: i64, enrolled: i64, avail: i64, wait: i64) -> Self {
        Self {
            quota: quota.into(),
            enrolled: enrolled.into(),
            avail: avail.into(),
            wait: wait.into(),
        }
    }
}

/// Seats reserved for one department.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedQuota {
    pub quota: Figure,
    pub enrolled: Figure,
    pub avail: Figure,
}

impl ReservedQuota {
    pub fn new(quota: i64, enrolled: i64, avail: i64) -> Self {
        Self {
            quota: quota.into(),
            enrolled: enrolled.into(),
            avail: avail.into(),
        }
    }
}

/// Returns the subject prefix of a course code: its first 4 characters.
pub fn course_prefix(course_code: &str) -> &str {
    match course_code.char_indices().nth(4) {
        Some((idx, _)) => &course_code[..idx],
        None => course_code,
    }
}
