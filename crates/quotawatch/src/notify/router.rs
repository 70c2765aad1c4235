/// Maps change events to public channels by subject prefix
use std::collections::HashMap;
use tracing::debug;

use super::gateway::{ChannelGateway, ChannelKey, DeliveryError};
use crate::catalog::course_prefix;
use crate::diff::ChangeEvent;

/// Routes events to the channel registered for their course prefix.
///
/// Built once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct NotificationRouter {
    channels: HashMap<String, ChannelKey>,
    fallback: ChannelKey,
}

impl NotificationRouter {
    /// Creates a router that sends everything to `fallback`.
    pub fn new(fallback: ChannelKey) -> Self {
        Self {
            channels: HashMap::new(),
            fallback,
        }
    }

    /// Registers a dedicated channel for a 4-letter prefix such as "COMP".
    pub fn with_channel(mut self, prefix: &str, channel: ChannelKey) -> Self {
        self.register(prefix, channel);
        self
    }

    pub fn register(&mut self, prefix: &str, channel: ChannelKey) {
        self.channels.insert(prefix.to_uppercase(), channel);
    }

    pub fn fallback(&self) -> &ChannelKey {
        &self.fallback
    }

    /// Returns the destination for a course code.
    pub fn route_code(&self, course_code: &str) -> &ChannelKey {
        self.channels
            .get(course_prefix(course_code))
            .unwrap_or(&self.fallback)
    }

    pub fn route(&self, event: &ChangeEvent) -> &ChannelKey {
        self.route_code(&event.course_code)
    }

    /// Routes and posts one event.
    pub async fn publish<C: ChannelGateway>(
        &self,
        gateway: &C,
        event: &ChangeEvent,
    ) -> Result<(), DeliveryError> {
        let destination = self.route(event);
        debug!(
            course = %event.course_code,
            kind = %event.kind,
            channel = %destination,
            "Publishing change"
        );
        gateway.send(destination, event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CourseRecord, QuotaTotal, SectionRecord};

    fn router() -> NotificationRouter {
        NotificationRouter::new(ChannelKey::from("other"))
            .with_channel("COMP", ChannelKey::from("comp-updates"))
            .with_channel("math", ChannelKey::from("math-updates"))
    }

    #[test]
    fn test_route_by_prefix() {
        let router = router();
        assert_eq!(router.route_code("COMP2012").as_str(), "comp-updates");
        assert_eq!(router.route_code("MATH1003").as_str(), "math-updates");
        assert_eq!(router.route_code("PHYS1114").as_str(), "other");
        assert_eq!(router.route_code("CO").as_str(), "other");
    }

    #[test]
    fn test_route_event() {
        let record = CourseRecord::new("COMP 1021 - Intro")
            .with_section("L1", SectionRecord::new(QuotaTotal::new(10, 0, 10, 0)));
        let event = ChangeEvent::course_added("COMP1021", record);
        assert_eq!(router().route(&event).as_str(), "comp-updates");
        assert_eq!(router().fallback().as_str(), "other");
    }
}
