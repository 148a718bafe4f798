//! Event-type routing: static maps from a `type` discriminator to a queue
//! name and a numeric priority.

use std::sync::Arc;

use crate::config::{BusConfig, QueueDescriptor};
use crate::error::{PulseError, Result};

/// Queue used for event types with no explicit mapping.
pub const DEFAULT_QUEUE: &str = "default";
/// Priority used for event types with no explicit mapping.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Resolved destination for a published event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueueRoute {
    pub queue: String,
    pub priority: u8,
}

/// Read-only lookup over the configured routing tables. Deterministic and
/// stable for the process lifetime.
#[derive(Clone, Debug)]
pub struct EventRouter {
    config: Arc<BusConfig>,
}

impl EventRouter {
    pub fn new(config: Arc<BusConfig>) -> Self {
        Self { config }
    }

    /// Map an event type to its queue and priority, falling back to the
    /// `default` queue at priority 5.
    pub fn resolve(&self, event_type: &str) -> QueueRoute {
        let queue = self
            .config
            .event_queues
            .get(event_type)
            .cloned()
            .unwrap_or_else(|| DEFAULT_QUEUE.to_string());
        let priority = self
            .config
            .event_priorities
            .get(event_type)
            .copied()
            .unwrap_or(DEFAULT_PRIORITY);
        QueueRoute { queue, priority }
    }

    /// Descriptor lookup for a queue name. A miss is a misconfiguration
    /// (programmer error), surfaced as `QueueNotConfigured`.
    pub fn descriptor(&self, queue: &str) -> Result<&QueueDescriptor> {
        self.config
            .queues
            .get(queue)
            .ok_or_else(|| PulseError::QueueNotConfigured(queue.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> EventRouter {
        EventRouter::new(Arc::new(BusConfig::default()))
    }

    #[test]
    fn resolve_is_deterministic_across_calls() {
        let router = router();
        let first = router.resolve("post.created");
        let second = router.resolve("post.created");
        assert_eq!(first, second);
        assert_eq!(first.queue, "feedFanOut");
        assert_eq!(first.priority, 9);
    }

    #[test]
    fn unmapped_types_fall_back_to_default() {
        let router = router();
        let route = router.resolve("share.created");
        assert_eq!(route.queue, DEFAULT_QUEUE);
        assert_eq!(route.priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn descriptor_miss_is_a_configuration_error() {
        let router = router();
        assert!(router.descriptor("feedFanOut").is_ok());
        assert!(matches!(
            router.descriptor("nope"),
            Err(PulseError::QueueNotConfigured(name)) if name == "nope"
        ));
    }
}
