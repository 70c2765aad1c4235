/// Typed change events produced by the diff engine
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::catalog::{CourseRecord, ListDelta, SectionRecord};

/// The kind of change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    CourseAdded,
    CourseRemoved,
    TitleChanged,
    InfoFieldAdded,
    InfoFieldChanged,
    InfoFieldRemoved,
    SectionAdded,
    SectionRemoved,
    QuotaChanged,
    ScheduleChanged,
    VenueChanged,
    InstructorChanged,
    TaChanged,
    RemarksChanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::CourseAdded => "course_added",
            ChangeKind::CourseRemoved => "course_removed",
            ChangeKind::TitleChanged => "title_changed",
            ChangeKind::InfoFieldAdded => "info_field_added",
            ChangeKind::InfoFieldChanged => "info_field_changed",
            ChangeKind::InfoFieldRemoved => "info_field_removed",
            ChangeKind::SectionAdded => "section_added",
            ChangeKind::SectionRemoved => "section_removed",
            ChangeKind::QuotaChanged => "quota_changed",
            ChangeKind::ScheduleChanged => "schedule_changed",
            ChangeKind::VenueChanged => "venue_changed",
            ChangeKind::InstructorChanged => "instructor_changed",
            ChangeKind::TaChanged => "ta_changed",
            ChangeKind::RemarksChanged => "remarks_changed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which quota a figure belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuotaScope {
    Total,
    /// Seats reserved for the named department
    Reserved(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FigureName {
    Quota,
    Enrolled,
    Avail,
    Wait,
}

/// One quota figure that moved between snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FigureChange {
    pub scope: QuotaScope,
    pub figure: FigureName,
    pub old: i64,
    pub new: i64,
}

impl FigureChange {
    /// Signed change, `new - old`, saturating at the `i64` bounds.
    pub fn delta(&self) -> i64 {
        self.new.saturating_sub(self.old)
    }
}

/// Every figure that changed in one section, total and reserved alike.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaChange {
    pub figures: Vec<FigureChange>,
}

impl QuotaChange {
    /// Returns the signed delta for a figure, if that figure changed.
    pub fn delta(&self, scope: &QuotaScope, figure: FigureName) -> Option<i64> {
        self.figures
            .iter()
            .find(|change| &change.scope == scope && change.figure == figure)
            .map(FigureChange::delta)
    }

    pub fn is_empty(&self) -> bool {
        self.figures.is_empty()
    }
}

/// Kind-specific old/new values carried by an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangePayload {
    /// The full course record, sections included
    Course(CourseRecord),
    Title {
        old: String,
        new: String,
    },
    InfoField {
        field: String,
        old: Option<String>,
        new: Option<String>,
    },
    /// The full section record
    Section(SectionRecord),
    Quota(QuotaChange),
    List(ListDelta),
}

/// A single change between two snapshots, at course, section or field level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub course_code: String,
    pub section_code: Option<String>,
    pub payload: ChangePayload,
}

impl ChangeEvent {
    fn course_level(kind: ChangeKind, course_code: &str, payload: ChangePayload) -> Self {
        Self {
            kind,
            course_code: course_code.to_string(),
            section_code: None,
            payload,
        }
    }

    fn section_level(
        kind: ChangeKind,
        course_code: &str,
        section_code: &str,
        payload: ChangePayload,
    ) -> Self {
        Self {
            kind,
            course_code: course_code.to_string(),
            section_code: Some(section_code.to_string()),
            payload,
        }
    }

    pub fn course_added(course_code: &str, record: CourseRecord) -> Self {
        Self::course_level(ChangeKind::CourseAdded, course_code, ChangePayload::Course(record))
    }

    pub fn course_removed(course_code: &str, record: CourseRecord) -> Self {
        Self::course_level(
            ChangeKind::CourseRemoved,
            course_code,
            ChangePayload::Course(record),
        )
    }

    pub fn title_changed(course_code: &str, old: &str, new: &str) -> Self {
        Self::course_level(
            ChangeKind::TitleChanged,
            course_code,
            ChangePayload::Title {
                old: old.to_string(),
                new: new.to_string(),
            },
        )
    }

    /// Builds the matching info event from whichever sides are present.
    pub fn info_field(
        course_code: &str,
        field: &str,
        old: Option<&str>,
        new: Option<&str>,
    ) -> Self {
        let kind = match (old, new) {
            (None, _) => ChangeKind::InfoFieldAdded,
            (Some(_), Some(_)) => ChangeKind::InfoFieldChanged,
            (Some(_), None) => ChangeKind::InfoFieldRemoved,
        };
        Self::course_level(
            kind,
            course_code,
            ChangePayload::InfoField {
                field: field.to_string(),
                old: old.map(str::to_string),
                new: new.map(str::to_string),
            },
        )
    }

    pub fn section_added(course_code: &str, section_code: &str, record: SectionRecord) -> Self {
        Self::section_level(
            ChangeKind::SectionAdded,
            course_code,
            section_code,
            ChangePayload::Section(record),
        )
    }

    pub fn section_removed(course_code: &str, section_code: &str, record: SectionRecord) -> Self {
        Self::section_level(
            ChangeKind::SectionRemoved,
            course_code,
            section_code,
            ChangePayload::Section(record),
        )
    }

    pub fn quota_changed(course_code: &str, section_code: &str, change: QuotaChange) -> Self {
        Self::section_level(
            ChangeKind::QuotaChanged,
            course_code,
            section_code,
            ChangePayload::Quota(change),
        )
    }

    /// Builds a list-field event. `kind` must be one of the list-field kinds.
    pub fn list_changed(
        kind: ChangeKind,
        course_code: &str,
        section_code: &str,
        delta: ListDelta,
    ) -> Self {
        Self::section_level(kind, course_code, section_code, ChangePayload::List(delta))
    }

    /// Returns the quota payload, if this is a quota event.
    pub fn quota(&self) -> Option<&QuotaChange> {
        match &self.payload {
            ChangePayload::Quota(change) => Some(change),
            _ => None,
        }
    }

    /// Returns the list delta, if this is a list-field event.
    pub fn list_delta(&self) -> Option<&ListDelta> {
        match &self.payload {
            ChangePayload::List(delta) => Some(delta),
            _ => None,
        }
    }
}

/// A single field comparison that could not be completed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Cannot compare {field} of {course_code} {section_code}: {reason}")]
pub struct DiffFieldError {
    pub course_code: String,
    pub section_code: String,
    pub field: String,
    pub reason: String,
}
