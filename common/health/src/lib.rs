use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::{Duration, OffsetDateTime};
use tracing::warn;

/// Liveness reporting for the moving parts of a consumer process.
///
/// A record consumer is only trustworthy while its poll loop and its Kafka
/// clients are all making progress. Each of them registers a component and
/// must keep reporting healthy more often than its deadline:
///   - a component that reported unhealthy fails the check,
///   - a component that missed its deadline is considered stalled,
///   - the process is healthy only when every component is healthy.
#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered, never reported
    Starting,
    /// Reported healthy, must report again before the deadline
    HealthyUntil(OffsetDateTime),
    Unhealthy,
    /// Missed its deadline
    Stalled,
}

impl ComponentStatus {
    fn resolve(&self, now: OffsetDateTime) -> ComponentStatus {
        match self {
            ComponentStatus::HealthyUntil(until) if *until <= now => ComponentStatus::Stalled,
            other => other.clone(),
        }
    }

    fn is_healthy(&self) -> bool {
        matches!(self, ComponentStatus::HealthyUntil(_))
    }
}

type Components = Arc<RwLock<HashMap<String, ComponentStatus>>>;

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Components,
}

impl HealthHandle {
    /// Must be called more frequently than the registered deadline.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() + self.deadline,
        ))
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut map) => {
                map.insert(self.component.clone(), status);
            }
            // Poisoned lock: the probe keeps failing and the process gets restarted
            Err(_) => warn!(component = self.component, "poisoned health registry lock"),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a component in `Starting` state and returns the handle it reports through.
    pub fn register(&self, component: &str, deadline: std::time::Duration) -> HealthHandle {
        let deadline = Duration::try_from(deadline).unwrap_or(Duration::MAX);
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    pub fn get_status(&self) -> HealthStatus {
        let now = OffsetDateTime::now_utc();
        let Ok(map) = self.components.read() else {
            warn!(registry = self.name, "poisoned health registry lock");
            return HealthStatus::default();
        };

        let components: HashMap<String, ComponentStatus> = map
            .iter()
            .map(|(name, status)| (name.clone(), status.resolve(now)))
            .collect();
        let healthy = !components.is_empty() && components.values().all(|s| s.is_healthy());

        HealthStatus {
            healthy,
            components,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn empty_registry_is_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        let status = registry.get_status();
        assert!(!status.healthy);
        assert!(status.components.is_empty());
    }

    #[test]
    fn new_component_starts_unhealthy_until_reported() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("loop", std::time::Duration::from_secs(30));

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("loop"),
            Some(&ComponentStatus::Starting)
        );

        handle.report_healthy();
        assert!(registry.get_status().healthy);
    }

    #[test]
    fn one_unhealthy_component_fails_the_check() {
        let registry = HealthRegistry::new("liveness");
        let first = registry.register("loop", std::time::Duration::from_secs(30));
        let second = registry.register("rdkafka", std::time::Duration::from_secs(30));

        first.report_healthy();
        second.report_healthy();
        assert!(registry.get_status().healthy);

        second.report_status(ComponentStatus::Unhealthy);
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("rdkafka"),
            Some(&ComponentStatus::Unhealthy)
        );
    }

    #[test]
    fn missed_deadline_is_stalled() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("loop", std::time::Duration::from_secs(30));
        handle.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() - Duration::seconds(1),
        ));

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("loop"),
            Some(&ComponentStatus::Stalled)
        );
    }

    #[test]
    fn status_renders_as_http_response() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("loop", std::time::Duration::from_secs(30));
        assert_eq!(
            registry.get_status().into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        handle.report_healthy();
        assert_eq!(registry.get_status().into_response().status(), StatusCode::OK);
    }
}
