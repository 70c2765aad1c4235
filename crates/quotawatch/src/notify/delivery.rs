//! Fan-out of change events to subscribers, plus the confirmation sweep.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::gateway::{ChannelGateway, DeliveryError, DirectGateway, DirectMessage};
use super::router::NotificationRouter;
use crate::diff::ChangeEvent;
use crate::registry::{StrikeOutcome, SubscriberRegistry, UserId};

/// Tally of direct delivery attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub attempted: usize,
    pub delivered: usize,
    /// Transient failures; no strike, retried on a later cycle
    pub transient: usize,
    pub strikes: usize,
    pub cancelled: usize,
}

impl DeliveryStats {
    pub fn merge(&mut self, other: DeliveryStats) {
        self.attempted += other.attempted;
        self.delivered += other.delivered;
        self.transient += other.transient;
        self.strikes += other.strikes;
        self.cancelled += other.cancelled;
    }
}

/// Tally of one batch of events sent to channels and subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub published: usize,
    pub publish_failed: usize,
    pub direct: DeliveryStats,
}

/// Delivers change events to subscribers over direct messages.
pub struct DeliveryService<D> {
    registry: Arc<SubscriberRegistry>,
    direct: D,
}

impl<D: DirectGateway> DeliveryService<D> {
    pub fn new(registry: Arc<SubscriberRegistry>, direct: D) -> Self {
        Self { registry, direct }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Publishes each event to its channel and fans it out to subscribers.
    ///
    /// A failed channel post is logged and does not stop the fan-out or the
    /// remaining events.
    pub async fn dispatch<C: ChannelGateway>(
        &self,
        router: &NotificationRouter,
        channels: &C,
        events: &[ChangeEvent],
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for event in events {
            match router.publish(channels, event).await {
                Ok(()) => report.published += 1,
                Err(e) => {
                    report.publish_failed += 1;
                    warn!(
                        course = %event.course_code,
                        kind = %event.kind,
                        channel = %router.route(event),
                        error = %e,
                        "Failed to publish change"
                    );
                }
            }

            report.direct.merge(self.fan_out(event).await);
        }

        report
    }

    /// Sends one event to every confirmed subscriber of its course.
    pub async fn fan_out(&self, event: &ChangeEvent) -> DeliveryStats {
        let recipients = self.registry.recipients_for(&event.course_code);
        if recipients.is_empty() {
            return DeliveryStats::default();
        }

        debug!(
            course = %event.course_code,
            kind = %event.kind,
            recipients = recipients.len(),
            "Fanning out change"
        );

        let mut stats = DeliveryStats::default();
        let mut dirty = false;
        for user in &recipients {
            let result = self
                .direct
                .send_direct(user, DirectMessage::Change(event))
                .await;
            dirty |= self.apply(user, result, &mut stats);
        }

        if dirty {
            self.persist();
        }
        stats
    }

    /// Attempts a confirmation message to every pending subscriber.
    pub async fn confirmation_sweep(&self) -> DeliveryStats {
        let pending = self.registry.pending();
        let mut stats = DeliveryStats::default();
        let mut dirty = false;

        for user in &pending {
            let result = self
                .direct
                .send_direct(user, DirectMessage::Confirmation)
                .await;
            dirty |= self.apply(user, result, &mut stats);
        }

        if dirty {
            self.persist();
        }
        if !pending.is_empty() {
            info!(
                pending = pending.len(),
                confirmed = stats.delivered,
                strikes = stats.strikes,
                cancelled = stats.cancelled,
                "Confirmation sweep finished"
            );
        }
        stats
    }

    /// Applies one delivery result to the registry. Returns true if the
    /// subscriber's state changed.
    fn apply(
        &self,
        user: &UserId,
        result: Result<(), DeliveryError>,
        stats: &mut DeliveryStats,
    ) -> bool {
        stats.attempted += 1;
        match result {
            Ok(()) => {
                stats.delivered += 1;
                self.registry.record_delivered(user)
            }
            Err(e) if e.is_terminal() => {
                stats.strikes += 1;
                warn!(user = %user, error = %e, "Direct delivery failed");
                match self.registry.record_strike(user) {
                    StrikeOutcome::Cancelled => {
                        stats.cancelled += 1;
                        true
                    }
                    StrikeOutcome::Counted(_) => true,
                    StrikeOutcome::Unknown => false,
                }
            }
            Err(e) => {
                stats.transient += 1;
                debug!(user = %user, error = %e, "Direct delivery deferred");
                false
            }
        }
    }

    fn persist(&self) {
        if let Err(e) = self.registry.persist() {
            error!(error = %e, "Failed to persist subscriber registry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::catalog::{QuotaTotal, SectionRecord};
    use crate::notify::ChannelKey;
    use crate::registry::ConfirmState;
    use crate::store::JsonSubscriberStore;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Direct gateway with a scripted failure per user.
    #[derive(Default)]
    struct FakeDirect {
        failures: HashMap<UserId, DeliveryError>,
        sent: Mutex<Vec<(UserId, bool)>>,
    }

    impl FakeDirect {
        fn failing(mut self, user: &UserId, error: DeliveryError) -> Self {
            self.failures.insert(user.clone(), error);
            self
        }

        fn sent(&self) -> Vec<(UserId, bool)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DirectGateway for FakeDirect {
        async fn send_direct(
            &self,
            user: &UserId,
            message: DirectMessage<'_>,
        ) -> Result<(), DeliveryError> {
            let is_confirmation = matches!(message, DirectMessage::Confirmation);
            self.sent.lock().unwrap().push((user.clone(), is_confirmation));
            match self.failures.get(user) {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    #[derive(Default)]
    struct FakeChannels {
        down: HashSet<ChannelKey>,
        posted: Mutex<Vec<ChannelKey>>,
    }

    #[async_trait]
    impl ChannelGateway for FakeChannels {
        async fn send(
            &self,
            destination: &ChannelKey,
            _event: &ChangeEvent,
        ) -> Result<(), DeliveryError> {
            if self.down.contains(destination) {
                return Err(DeliveryError::Transient {
                    reason: "channel down".to_string(),
                });
            }
            self.posted.lock().unwrap().push(destination.clone());
            Ok(())
        }

        async fn send_notice(&self, _destination: &ChannelKey, _text: &str) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn unreachable() -> DeliveryError {
        DeliveryError::Unreachable {
            reason: "cannot send messages to this user".to_string(),
        }
    }

    fn registry(dir: &std::path::Path) -> Arc<SubscriberRegistry> {
        let store = Arc::new(JsonSubscriberStore::new(dir).unwrap());
        Arc::new(SubscriberRegistry::open(store).unwrap())
    }

    fn event(course_code: &str) -> ChangeEvent {
        ChangeEvent::section_added(
            course_code,
            "L2",
            SectionRecord::new(QuotaTotal::new(30, 0, 30, 0)),
        )
    }

    #[tokio::test]
    async fn test_sweep_confirms_pending() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let alice = UserId::from("1");
        registry.subscribe(&alice, "COMP2012").unwrap();

        let service = DeliveryService::new(registry.clone(), FakeDirect::default());
        let stats = service.confirmation_sweep().await;

        assert_eq!(stats.delivered, 1);
        assert_eq!(registry.confirm_state(&alice), Some(ConfirmState::Confirmed));
        assert_eq!(service.direct.sent(), vec![(alice, true)]);
    }

    #[tokio::test]
    async fn test_three_failed_sweeps_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let bob = UserId::from("2");
        registry.subscribe(&bob, "COMP2012").unwrap();
        registry.subscribe(&bob, "MATH1003").unwrap();

        let service = DeliveryService::new(
            registry.clone(),
            FakeDirect::default().failing(&bob, unreachable()),
        );
        for _ in 0..2 {
            service.confirmation_sweep().await;
            assert_eq!(registry.confirm_state(&bob), Some(ConfirmState::Pending));
        }
        let stats = service.confirmation_sweep().await;

        assert_eq!(stats.cancelled, 1);
        let sub = registry.get(&bob).unwrap();
        assert_eq!(sub.confirm_state, ConfirmState::Cancelled);
        assert!(sub.courses.is_empty());

        // Cancelled users are not swept again.
        assert_eq!(service.confirmation_sweep().await, DeliveryStats::default());
    }

    #[tokio::test]
    async fn test_transient_failures_do_not_strike() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let carol = UserId::from("3");
        registry.subscribe(&carol, "COMP2012").unwrap();

        let service = DeliveryService::new(
            registry.clone(),
            FakeDirect::default().failing(
                &carol,
                DeliveryError::Transient {
                    reason: "rate limited".to_string(),
                },
            ),
        );
        for _ in 0..5 {
            service.confirmation_sweep().await;
        }

        let sub = registry.get(&carol).unwrap();
        assert_eq!(sub.confirm_state, ConfirmState::Pending);
        assert_eq!(sub.strikes, 0);
    }

    #[tokio::test]
    async fn test_fan_out_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let alice = UserId::from("1");
        let bob = UserId::from("2");
        let dave = UserId::from("4");
        for user in [&alice, &bob, &dave] {
            registry.subscribe(user, "COMP2012").unwrap();
            registry.record_delivered(user);
        }
        registry.subscribe(&dave, "MATH1003").unwrap();

        let service = DeliveryService::new(
            registry.clone(),
            FakeDirect::default().failing(&alice, unreachable()),
        );
        let stats = service.fan_out(&event("COMP2012")).await;

        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.strikes, 1);
        assert_eq!(registry.get(&alice).unwrap().strikes, 1);
        assert_eq!(registry.get(&bob).unwrap().strikes, 0);

        let math = service.fan_out(&event("MATH1003")).await;
        assert_eq!(math.attempted, 1);
        assert_eq!(service.direct.sent().last(), Some(&(dave, false)));
    }

    #[tokio::test]
    async fn test_dispatch_continues_after_channel_failure() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let alice = UserId::from("1");
        registry.subscribe(&alice, "COMP2012").unwrap();
        registry.record_delivered(&alice);

        let router = NotificationRouter::new(ChannelKey::from("other"))
            .with_channel("COMP", ChannelKey::from("comp"));
        let mut channels = FakeChannels::default();
        channels.down.insert(ChannelKey::from("comp"));

        let service = DeliveryService::new(registry.clone(), FakeDirect::default());
        let events = vec![event("COMP2012"), event("PHYS1114")];
        let report = service.dispatch(&router, &channels, &events).await;

        assert_eq!(report.publish_failed, 1);
        assert_eq!(report.published, 1);
        assert_eq!(report.direct.delivered, 1);
        assert_eq!(*channels.posted.lock().unwrap(), vec![ChannelKey::from("other")]);
    }

    #[tokio::test]
    async fn test_three_failed_fan_outs_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let erin = UserId::from("5");
        registry.subscribe(&erin, "COMP2012").unwrap();
        registry.subscribe(&erin, "MATH1003").unwrap();
        registry.record_delivered(&erin);

        let service = DeliveryService::new(
            registry.clone(),
            FakeDirect::default().failing(&erin, unreachable()),
        );
        for strikes in 1..=2u8 {
            service.fan_out(&event("COMP2012")).await;
            let sub = registry.get(&erin).unwrap();
            assert_eq!(sub.confirm_state, ConfirmState::Confirmed);
            assert_eq!(sub.strikes, strikes);
        }
        let stats = service.fan_out(&event("COMP2012")).await;

        assert_eq!(stats.cancelled, 1);
        let sub = registry.get(&erin).unwrap();
        assert_eq!(sub.confirm_state, ConfirmState::Cancelled);
        assert!(sub.courses.is_empty());
        assert!(registry.recipients_for("COMP2012").is_empty());

        // The cancellation was written through to the store.
        let reopened =
            SubscriberRegistry::open(Arc::new(JsonSubscriberStore::new(dir.path()).unwrap()))
                .unwrap();
        assert_eq!(reopened.confirm_state(&erin), Some(ConfirmState::Cancelled));
    }
}
