//! Subscriber registry.
//!
//! Holds per-user subscription state in memory and writes the whole table
//! back to its [`SubscriberStore`] after every change. Command-layer calls and
//! the delivery loop may touch the registry concurrently; each subscriber is
//! updated under its own map entry lock.

mod error;
mod types;

pub use error::RegistryError;
pub use types::*;

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::store::{StoreError, SubscriberStore};

pub struct SubscriberRegistry {
    entries: DashMap<UserId, Subscriber>,
    store: Arc<dyn SubscriberStore>,
    /// Serialises writes to the store
    persist_lock: Mutex<()>,
}

impl SubscriberRegistry {
    /// Loads the registry from `store`.
    pub fn open(store: Arc<dyn SubscriberStore>) -> Result<Self, StoreError> {
        let entries = DashMap::new();
        let mut repaired = 0usize;

        for (id, mut subscriber) in store.load()? {
            if subscriber.repair() {
                warn!(user = %id, "Repaired inconsistent subscriber record");
                repaired += 1;
            }
            entries.insert(id, subscriber);
        }

        info!(subscribers = entries.len(), repaired, "Loaded subscriber registry");

        let registry = Self {
            entries,
            store,
            persist_lock: Mutex::new(()),
        };
        if repaired > 0 {
            registry.persist()?;
        }
        Ok(registry)
    }

    /// Subscribes `id` to a course.
    ///
    /// A cancelled subscriber is put back to pending and must confirm again
    /// before deliveries resume.
    pub fn subscribe(&self, id: &UserId, course_code: &str) -> Result<(), RegistryError> {
        let code = normalize_course_code(course_code)?;
        {
            let mut entry = self.entries.entry(id.clone()).or_default();
            let subscriber = entry.value_mut();

            if subscriber.confirm_state == ConfirmState::Cancelled {
                info!(user = %id, "Re-arming cancelled subscriber");
                subscriber.confirm_state = ConfirmState::Pending;
                subscriber.strikes = 0;
            }
            if subscriber.courses.len() >= MAX_COURSES {
                return Err(RegistryError::QuotaExceeded { limit: MAX_COURSES });
            }
            if subscriber.courses.contains(&code) {
                return Err(RegistryError::AlreadySubscribed { course_code: code });
            }
            subscriber.courses.push(code.clone());
        }

        info!(user = %id, course = %code, "Subscribed");
        self.persist()?;
        Ok(())
    }

    /// Removes one course from a subscriber.
    pub fn unsubscribe(&self, id: &UserId, course_code: &str) -> Result<(), RegistryError> {
        let code = normalize_course_code(course_code)?;
        let mut created = false;
        let removed = {
            let mut entry = self.entries.entry(id.clone()).or_insert_with(|| {
                created = true;
                Subscriber::default()
            });
            let courses = &mut entry.value_mut().courses;
            match courses.iter().position(|c| *c == code) {
                Some(position) => {
                    courses.remove(position);
                    true
                }
                None => false,
            }
        };

        if !removed {
            if created {
                self.persist()?;
            }
            return Err(RegistryError::NotSubscribed { course_code: code });
        }

        info!(user = %id, course = %code, "Unsubscribed");
        self.persist()?;
        Ok(())
    }

    /// Clears every course of a subscriber.
    pub fn unsubscribe_all(&self, id: &UserId) -> Result<(), RegistryError> {
        self.entries
            .entry(id.clone())
            .or_default()
            .value_mut()
            .courses
            .clear();

        info!(user = %id, "Unsubscribed from all courses");
        self.persist()?;
        Ok(())
    }

    pub fn is_subscribed(&self, id: &UserId, course_code: &str) -> bool {
        let Ok(code) = normalize_course_code(course_code) else {
            return false;
        };
        self.entries
            .get(id)
            .map(|entry| entry.courses.contains(&code))
            .unwrap_or(false)
    }

    /// Lists a subscriber's courses in subscription order.
    pub fn show(&self, id: &UserId) -> Result<Vec<String>, RegistryError> {
        let (courses, created) = match self.entries.get(id) {
            Some(entry) => (entry.courses.clone(), false),
            None => {
                self.entries.entry(id.clone()).or_default();
                (Vec::new(), true)
            }
        };
        if created {
            self.persist()?;
        }
        Ok(courses)
    }

    pub fn confirm_state(&self, id: &UserId) -> Option<ConfirmState> {
        self.entries.get(id).map(|entry| entry.confirm_state)
    }

    /// Returns a copy of a subscriber's state.
    pub fn get(&self, id: &UserId) -> Option<Subscriber> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Confirmed subscribers following `course_code`.
    pub fn recipients_for(&self, course_code: &str) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .entries
            .iter()
            .filter(|entry| {
                entry.is_deliverable() && entry.courses.iter().any(|c| c == course_code)
            })
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Subscribers still waiting for their confirmation message.
    pub fn pending(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .entries
            .iter()
            .filter(|entry| entry.confirm_state == ConfirmState::Pending)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Records a successful delivery. Returns true if the state changed.
    pub fn record_delivered(&self, id: &UserId) -> bool {
        match self.entries.get_mut(id) {
            Some(mut entry) => {
                let had_strikes = entry.strikes > 0;
                let confirmed = entry.mark_delivered();
                if confirmed {
                    info!(user = %id, "Subscriber confirmed");
                }
                confirmed || had_strikes
            }
            None => false,
        }
    }

    /// Records a terminal delivery failure against a subscriber.
    pub fn record_strike(&self, id: &UserId) -> StrikeOutcome {
        match self.entries.get_mut(id) {
            Some(mut entry) => {
                let outcome = entry.add_strike();
                match outcome {
                    StrikeOutcome::Cancelled => {
                        warn!(user = %id, "Subscriber cancelled after repeated delivery failures")
                    }
                    StrikeOutcome::Counted(strikes) => {
                        info!(user = %id, strikes, "Delivery strike recorded")
                    }
                    StrikeOutcome::Unknown => {}
                }
                outcome
            }
            None => StrikeOutcome::Unknown,
        }
    }

    /// Writes the current table to the store.
    pub fn persist(&self) -> Result<(), StoreError> {
        let _guard = self
            .persist_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let table: BTreeMap<UserId, Subscriber> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        self.store.save(&table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonSubscriberStore;

    fn open(dir: &std::path::Path) -> SubscriberRegistry {
        let store = Arc::new(JsonSubscriberStore::new(dir).unwrap());
        SubscriberRegistry::open(store).unwrap()
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(dir.path());
        let id = UserId::from("42");

        registry.subscribe(&id, "comp 2012").unwrap();
        assert!(registry.is_subscribed(&id, "COMP2012"));
        assert_eq!(registry.confirm_state(&id), Some(ConfirmState::Pending));

        registry.unsubscribe(&id, "COMP2012").unwrap();
        assert!(!registry.is_subscribed(&id, "COMP2012"));
        assert!(matches!(
            registry.unsubscribe(&id, "COMP2012"),
            Err(RegistryError::NotSubscribed { .. })
        ));
    }

    #[test]
    fn test_eleventh_subscription_exceeds_quota() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(dir.path());
        let id = UserId::from("42");

        for i in 0..10 {
            registry.subscribe(&id, &format!("COMP{:04}", 1000 + i)).unwrap();
        }
        let err = registry.subscribe(&id, "MATH1003").unwrap_err();
        assert!(matches!(err, RegistryError::QuotaExceeded { limit: 10 }));
        assert!(err.is_validation());
        assert_eq!(registry.show(&id).unwrap().len(), 10);
    }

    #[test]
    fn test_duplicate_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(dir.path());
        let id = UserId::from("42");

        registry.subscribe(&id, "COMP2012").unwrap();
        registry.subscribe(&id, "MATH1003").unwrap();
        assert!(matches!(
            registry.subscribe(&id, "comp2012"),
            Err(RegistryError::AlreadySubscribed { .. })
        ));
        assert_eq!(registry.show(&id).unwrap(), vec!["COMP2012", "MATH1003"]);
    }

    #[test]
    fn test_invalid_code_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(dir.path());
        let id = UserId::from("42");

        assert!(matches!(
            registry.subscribe(&id, "not a course"),
            Err(RegistryError::InvalidCourseCode { .. })
        ));
        assert!(!registry.is_subscribed(&id, "not a course"));
    }

    #[test]
    fn test_entries_created_lazily_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let id = UserId::from("7");
        {
            let registry = open(dir.path());
            assert!(registry.confirm_state(&id).is_none());
            assert!(registry.show(&id).unwrap().is_empty());
            assert_eq!(registry.confirm_state(&id), Some(ConfirmState::Pending));

            registry.subscribe(&id, "PHYS1114").unwrap();
            registry.subscribe(&id, "MATH1003").unwrap();
            registry.unsubscribe_all(&id).unwrap();
            registry.subscribe(&id, "COMP2012").unwrap();
        }

        let reopened = open(dir.path());
        assert_eq!(reopened.show(&id).unwrap(), vec!["COMP2012"]);
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_cancelled_subscriber_is_rearmed_on_subscribe() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(dir.path());
        let id = UserId::from("42");
        registry.subscribe(&id, "COMP2012").unwrap();

        assert_eq!(registry.record_strike(&id), StrikeOutcome::Counted(1));
        assert_eq!(registry.record_strike(&id), StrikeOutcome::Counted(2));
        assert_eq!(registry.record_strike(&id), StrikeOutcome::Cancelled);
        assert_eq!(registry.confirm_state(&id), Some(ConfirmState::Cancelled));
        assert!(registry.show(&id).unwrap().is_empty());

        registry.subscribe(&id, "MATH1003").unwrap();
        let sub = registry.get(&id).unwrap();
        assert_eq!(sub.confirm_state, ConfirmState::Pending);
        assert_eq!(sub.strikes, 0);
        assert_eq!(sub.courses, vec!["MATH1003"]);
    }

    #[test]
    fn test_recipients_and_pending() {
        let dir = tempfile::tempdir().unwrap();
        let registry = open(dir.path());
        let alice = UserId::from("1");
        let bob = UserId::from("2");

        registry.subscribe(&alice, "COMP2012").unwrap();
        registry.subscribe(&bob, "COMP2012").unwrap();
        assert!(registry.recipients_for("COMP2012").is_empty());
        assert_eq!(registry.pending(), vec![alice.clone(), bob.clone()]);

        assert!(registry.record_delivered(&alice));
        assert_eq!(registry.recipients_for("COMP2012"), vec![alice.clone()]);
        assert_eq!(registry.pending(), vec![bob]);
        assert!(registry.recipients_for("MATH1003").is_empty());
        assert!(!registry.record_delivered(&alice));
        assert_eq!(registry.record_strike(&UserId::from("404")), StrikeOutcome::Unknown);
    }

    #[test]
    fn test_unsubscribe_unknown_user_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let id = UserId::from("99");
        {
            let registry = open(dir.path());
            assert!(matches!(
                registry.unsubscribe(&id, "COMP2012"),
                Err(RegistryError::NotSubscribed { .. })
            ));
            assert_eq!(registry.confirm_state(&id), Some(ConfirmState::Pending));
        }

        let reopened = open(dir.path());
        assert_eq!(reopened.confirm_state(&id), Some(ConfirmState::Pending));
        assert!(reopened.show(&id).unwrap().is_empty());
    }
}
