//! Snapshot comparison.
//!
//! Walks the new snapshot first (additions and per-field changes), then the
//! old one (removals), so events always come out in the same order for the
//! same pair of snapshots.

use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::event::{
    ChangeEvent, ChangeKind, DiffFieldError, FigureChange, FigureName, QuotaChange, QuotaScope,
};
use crate::catalog::{
    remarks_items, CourseRecord, Figure, ListDelta, ReservedQuota, SectionRecord, Snapshot,
};

/// Result of comparing two snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffOutcome {
    pub events: Vec<ChangeEvent>,
    /// True iff at least one event was emitted
    pub changed: bool,
}

impl DiffOutcome {
    fn unchanged() -> Self {
        Self::default()
    }

    fn from_events(events: Vec<ChangeEvent>) -> Self {
        let changed = !events.is_empty();
        Self { events, changed }
    }
}

/// Compares a baseline snapshot against a freshly captured one.
///
/// Returns no events and `changed = false` when there is no baseline or when
/// either side fails its consistency check.
pub fn diff(old: Option<&Snapshot>, new: &Snapshot) -> DiffOutcome {
    let Some(old) = old else {
        debug!("No baseline snapshot, skipping diff");
        return DiffOutcome::unchanged();
    };

    if let Err(e) = old.check_consistency() {
        warn!(error = %e, "Baseline snapshot unusable, skipping diff");
        return DiffOutcome::unchanged();
    }
    if let Err(e) = new.check_consistency() {
        warn!(error = %e, "New snapshot unusable, skipping diff");
        return DiffOutcome::unchanged();
    }

    let mut events = Vec::new();

    for (code, new_course) in new.courses() {
        match old.course(code) {
            None => events.push(ChangeEvent::course_added(code, new_course.clone())),
            Some(old_course) => diff_course(code, old_course, new_course, &mut events),
        }
    }

    for (code, old_course) in old.courses() {
        let Some(new_course) = new.course(code) else {
            events.push(ChangeEvent::course_removed(code, old_course.clone()));
            continue;
        };

        for (section_code, old_section) in &old_course.sections {
            if !new_course.sections.contains_key(section_code) {
                events.push(ChangeEvent::section_removed(
                    code,
                    section_code,
                    old_section.clone(),
                ));
            }
        }
    }

    debug!(events = events.len(), "Snapshot diff complete");
    DiffOutcome::from_events(events)
}

fn diff_course(code: &str, old: &CourseRecord, new: &CourseRecord, events: &mut Vec<ChangeEvent>) {
    if old.title != new.title {
        events.push(ChangeEvent::title_changed(code, &old.title, &new.title));
    }

    for (field, new_text) in &new.info {
        match old.info.get(field) {
            Some(old_text) if old_text == new_text => {}
            old_text => events.push(ChangeEvent::info_field(
                code,
                field,
                old_text.map(String::as_str),
                Some(new_text.as_str()),
            )),
        }
    }
    for (field, old_text) in &old.info {
        if !new.info.contains_key(field) {
            events.push(ChangeEvent::info_field(code, field, Some(old_text.as_str()), None));
        }
    }

    for (section_code, new_section) in &new.sections {
        match old.sections.get(section_code) {
            None => events.push(ChangeEvent::section_added(
                code,
                section_code,
                new_section.clone(),
            )),
            Some(old_section) => {
                diff_section(code, section_code, old_section, new_section, events)
            }
        }
    }
}

fn diff_section(
    code: &str,
    section_code: &str,
    old: &SectionRecord,
    new: &SectionRecord,
    events: &mut Vec<ChangeEvent>,
) {
    let (change, errors) = diff_quota(code, section_code, old, new);
    for e in &errors {
        warn!(error = %e, "Skipping quota comparison");
    }
    if let Some(change) = change {
        events.push(ChangeEvent::quota_changed(code, section_code, change));
    }

    for field in ListField::ALL {
        let delta = field.delta(old, new);
        if !delta.is_empty() {
            events.push(ChangeEvent::list_changed(
                field.kind(),
                code,
                section_code,
                delta,
            ));
        }
    }
}

/// Compares total and reserved quotas as numbers.
///
/// All changed figures of a section end up in one [`QuotaChange`]. The total
/// and each reserved department are compared on their own: a figure that
/// does not parse drops only its scope, reported in the returned errors.
fn diff_quota(
    code: &str,
    section_code: &str,
    old: &SectionRecord,
    new: &SectionRecord,
) -> (Option<QuotaChange>, Vec<DiffFieldError>) {
    if old.quota_total == new.quota_total && old.quota_reserved == new.quota_reserved {
        return (None, Vec::new());
    }

    let mut figures = Vec::new();
    let mut errors = Vec::new();

    let totals = [
        (FigureName::Quota, &old.quota_total.quota, &new.quota_total.quota),
        (FigureName::Enrolled, &old.quota_total.enrolled, &new.quota_total.enrolled),
        (FigureName::Avail, &old.quota_total.avail, &new.quota_total.avail),
        (FigureName::Wait, &old.quota_total.wait, &new.quota_total.wait),
    ];
    match compare_scope(code, section_code, QuotaScope::Total, &totals) {
        Ok(changes) => figures.extend(changes),
        Err(e) => errors.push(e),
    }

    // A department missing on one side counts as zero reserved seats there.
    let zero = ReservedQuota::new(0, 0, 0);
    let departments: BTreeSet<&String> = old
        .quota_reserved
        .keys()
        .chain(new.quota_reserved.keys())
        .collect();
    for dept in departments {
        let old_reserved = old.quota_reserved.get(dept).unwrap_or(&zero);
        let new_reserved = new.quota_reserved.get(dept).unwrap_or(&zero);
        if old_reserved == new_reserved {
            continue;
        }
        let reserved = [
            (FigureName::Quota, &old_reserved.quota, &new_reserved.quota),
            (FigureName::Enrolled, &old_reserved.enrolled, &new_reserved.enrolled),
            (FigureName::Avail, &old_reserved.avail, &new_reserved.avail),
        ];
        match compare_scope(code, section_code, QuotaScope::Reserved(dept.clone()), &reserved) {
            Ok(changes) => figures.extend(changes),
            Err(e) => errors.push(e),
        }
    }

    let change = if figures.is_empty() {
        None
    } else {
        Some(QuotaChange { figures })
    };
    (change, errors)
}

/// Parses one scope's figure pairs and returns those whose value moved.
fn compare_scope(
    code: &str,
    section_code: &str,
    scope: QuotaScope,
    pairs: &[(FigureName, &Figure, &Figure)],
) -> Result<Vec<FigureChange>, DiffFieldError> {
    let field = match &scope {
        QuotaScope::Total => "quota_total".to_string(),
        QuotaScope::Reserved(dept) => format!("quota_reserved.{}", dept),
    };
    let parse = |figure: &Figure| {
        figure.parse().ok_or_else(|| DiffFieldError {
            course_code: code.to_string(),
            section_code: section_code.to_string(),
            field: field.clone(),
            reason: format!("figure {:?} is not a number", figure),
        })
    };

    let mut changes = Vec::new();
    for (figure, old_figure, new_figure) in pairs {
        let old_value = parse(*old_figure)?;
        let new_value = parse(*new_figure)?;
        if old_value != new_value {
            changes.push(FigureChange {
                scope: scope.clone(),
                figure: *figure,
                old: old_value,
                new: new_value,
            });
        }
    }
    Ok(changes)
}

/// Section fields compared as ordered sets.
#[derive(Debug, Clone, Copy)]
enum ListField {
    Schedule,
    Venue,
    Instructor,
    Ta,
    Remarks,
}

impl ListField {
    const ALL: [ListField; 5] = [
        ListField::Schedule,
        ListField::Venue,
        ListField::Instructor,
        ListField::Ta,
        ListField::Remarks,
    ];

    fn kind(self) -> ChangeKind {
        match self {
            ListField::Schedule => ChangeKind::ScheduleChanged,
            ListField::Venue => ChangeKind::VenueChanged,
            ListField::Instructor => ChangeKind::InstructorChanged,
            ListField::Ta => ChangeKind::TaChanged,
            ListField::Remarks => ChangeKind::RemarksChanged,
        }
    }

    fn delta(self, old: &SectionRecord, new: &SectionRecord) -> ListDelta {
        match self {
            ListField::Schedule => ListDelta::between(&old.schedule, &new.schedule),
            ListField::Venue => ListDelta::between(&old.venue, &new.venue),
            ListField::Instructor => ListDelta::between(&old.instructor, &new.instructor),
            ListField::Ta => ListDelta::between(&old.ta, &new.ta),
            ListField::Remarks => ListDelta::between(
                &remarks_items(old.remarks.as_deref()),
                &remarks_items(new.remarks.as_deref()),
            ),
        }
    }
}
