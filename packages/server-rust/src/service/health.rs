//! Health check and watch over module status.
//!
//! The current status of every module lives in one map; transitions are
//! published on the module's health topic. A watcher subscribes before it
//! reads the current status, so no transition between the two is lost.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use conduit_core::messages::{topics, BusEvent};
use conduit_core::ServingStatus;

use super::bus::{BusSignal, BusSubscription, EventBus};
use super::telemetry::{names, Telemetry};

pub struct HealthService {
    statuses: Arc<DashMap<String, ServingStatus>>,
    bus: Arc<EventBus>,
    telemetry: Telemetry,
}

impl HealthService {
    #[must_use]
    pub fn new(bus: Arc<EventBus>, telemetry: Telemetry) -> Self {
        Self {
            statuses: Arc::new(DashMap::new()),
            bus,
            telemetry,
        }
    }

    /// Current status of `service`, `ServiceUnknown` if it is not registered.
    #[must_use]
    pub fn check(&self, service: &str) -> ServingStatus {
        current(&self.statuses, service)
    }

    /// Records `status` for `service`. Publishes a transition only when the
    /// value changed; returns whether it did.
    pub fn set(&self, service: &str, status: ServingStatus) -> bool {
        let previous = self.statuses.insert(service.to_string(), status);
        if previous == Some(status) {
            return false;
        }
        debug!(
            parent: self.telemetry.span(),
            module = service,
            from = ?previous,
            to = %status,
            "health transition"
        );
        self.telemetry.count(names::HEALTH_TRANSITIONS, service);
        self.bus.publish(
            &topics::health(service),
            BusEvent::HealthChanged {
                module: service.to_string(),
                status,
            },
        );
        true
    }

    /// Drops `service`; watchers observe `ServiceUnknown` and end.
    pub fn forget(&self, service: &str) {
        if self.statuses.remove(service).is_some() {
            self.bus.publish(
                &topics::health(service),
                BusEvent::HealthChanged {
                    module: service.to_string(),
                    status: ServingStatus::ServiceUnknown,
                },
            );
        }
    }

    /// Streams the status of `service`: the current value first, then every
    /// change.
    #[must_use]
    pub fn watch(&self, service: &str) -> HealthWatch {
        let subscription = self.bus.subscribe(&topics::health(service));
        let status = current(&self.statuses, service);
        HealthWatch {
            service: service.to_string(),
            statuses: Arc::clone(&self.statuses),
            subscription,
            pending: Some(status),
            last: None,
            finished: false,
        }
    }
}

fn current(statuses: &DashMap<String, ServingStatus>, service: &str) -> ServingStatus {
    statuses
        .get(service)
        .map_or(ServingStatus::ServiceUnknown, |s| *s)
}

/// Stream of status values for one module. Dropping it unsubscribes.
pub struct HealthWatch {
    service: String,
    statuses: Arc<DashMap<String, ServingStatus>>,
    subscription: BusSubscription,
    pending: Option<ServingStatus>,
    last: Option<ServingStatus>,
    finished: bool,
}

impl HealthWatch {
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Next distinct status, or `None` when the stream has ended.
    ///
    /// The stream ends after `ServiceUnknown` has been delivered.
    pub async fn next(&mut self) -> Option<ServingStatus> {
        if self.finished {
            return None;
        }
        loop {
            let candidate = match self.pending.take() {
                Some(status) => status,
                None => match self.subscription.recv().await? {
                    BusSignal::Event(BusEvent::HealthChanged { status, .. }) => status,
                    BusSignal::Event(_) => continue,
                    BusSignal::Lagged(_) => current(&self.statuses, &self.service),
                },
            };
            if self.last == Some(candidate) {
                continue;
            }
            self.last = Some(candidate);
            if candidate == ServingStatus::ServiceUnknown {
                self.finished = true;
            }
            return Some(candidate);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn service() -> HealthService {
        HealthService::new(
            Arc::new(EventBus::new(16, Telemetry::detached())),
            Telemetry::detached(),
        )
    }

    #[test]
    fn unregistered_service_is_service_unknown() {
        assert_eq!(service().check("ghost"), ServingStatus::ServiceUnknown);
    }

    #[test]
    fn set_reports_only_changes() {
        let health = service();
        assert!(health.set("auth", ServingStatus::Serving));
        assert!(!health.set("auth", ServingStatus::Serving));
        assert!(health.set("auth", ServingStatus::NotServing));
        assert_eq!(health.check("auth"), ServingStatus::NotServing);
    }

    #[tokio::test]
    async fn watch_emits_current_then_transitions() {
        let health = service();
        health.set("auth", ServingStatus::Serving);
        let mut watch = health.watch("auth");

        assert_eq!(watch.next().await, Some(ServingStatus::Serving));
        health.set("auth", ServingStatus::NotServing);
        assert_eq!(watch.next().await, Some(ServingStatus::NotServing));
    }

    #[tokio::test]
    async fn watch_of_unknown_service_ends_after_one_value() {
        let health = service();
        let mut watch = health.watch("ghost");
        assert_eq!(watch.next().await, Some(ServingStatus::ServiceUnknown));
        assert_eq!(watch.next().await, None);
    }

    #[tokio::test]
    async fn removal_ends_the_watch() {
        let health = service();
        health.set("auth", ServingStatus::Serving);
        let mut watch = health.watch("auth");
        assert_eq!(watch.next().await, Some(ServingStatus::Serving));

        health.forget("auth");
        assert_eq!(watch.next().await, Some(ServingStatus::ServiceUnknown));
        assert_eq!(watch.next().await, None);
        assert_eq!(health.check("auth"), ServingStatus::ServiceUnknown);
    }

    #[tokio::test]
    async fn lagged_watch_resyncs_to_current_value() {
        let bus = Arc::new(EventBus::new(1, Telemetry::detached()));
        let health = HealthService::new(bus, Telemetry::detached());
        health.set("auth", ServingStatus::Serving);
        let mut watch = health.watch("auth");
        assert_eq!(watch.next().await, Some(ServingStatus::Serving));

        for status in [
            ServingStatus::NotServing,
            ServingStatus::Serving,
            ServingStatus::NotServing,
        ] {
            health.set("auth", status);
        }
        let next = tokio::time::timeout(Duration::from_secs(1), watch.next())
            .await
            .unwrap();
        assert_eq!(next, Some(ServingStatus::NotServing));
    }

    #[test]
    fn dropping_watch_unsubscribes() {
        let bus = Arc::new(EventBus::new(4, Telemetry::detached()));
        let health = HealthService::new(Arc::clone(&bus), Telemetry::detached());
        let watch = health.watch("auth");
        assert_eq!(bus.subscriber_count(&topics::health("auth")), 1);
        drop(watch);
        assert_eq!(bus.subscriber_count(&topics::health("auth")), 0);
    }
}
