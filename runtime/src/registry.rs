//! Topic → handler routing table.
//!
//! A [`HandlerRegistry`] is built once at startup through
//! [`HandlerRegistry::builder`] and is read-only afterwards, so it can be
//! shared behind an `Arc` without locking.
//!
//! Two registration styles are supported:
//!
//! - **Shared**: one handler instance serves every message on its topic.
//! - **Scoped**: a factory builds a fresh handler for each message, for hosts
//!   whose handlers must not carry state from one message to the next.
//!
//! Each topic routes to exactly one handler. When a topic is registered
//! twice, the first registration wins and the duplicate is logged.
//!
//! ```text
//!   "user.created"  ──►  Shared(UserCreatedHandler)
//!   "order.created" ──►  Scoped(|| OrderCreatedHandler::new(..))
//! ```

use courier_core::handler::Handler;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Factory producing a fresh handler per message.
pub type HandlerFactory = Arc<dyn Fn() -> Arc<dyn Handler> + Send + Sync>;

#[derive(Clone)]
enum Registration {
    Shared(Arc<dyn Handler>),
    Scoped(HandlerFactory),
}

/// Immutable mapping from topic name to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    routes: HashMap<String, Registration>,
    topics: Vec<String>,
}

impl HandlerRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Distinct registered topics, in registration order.
    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Number of routed topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Whether no topic is routed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Resolve the handler for `topic`.
    ///
    /// Scoped registrations build a new handler on every call.
    #[must_use]
    pub fn resolve(&self, topic: &str) -> Option<Arc<dyn Handler>> {
        match self.routes.get(topic)? {
            Registration::Shared(handler) => Some(Arc::clone(handler)),
            Registration::Scoped(factory) => Some(factory()),
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("topics", &self.topics)
            .finish_non_exhaustive()
    }
}

/// Builder for [`HandlerRegistry`].
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    registry: HandlerRegistry,
}

impl HandlerRegistryBuilder {
    /// Route the handler's own topic to one shared instance.
    #[must_use]
    pub fn register<H>(self, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        self.register_arc(Arc::new(handler))
    }

    /// Route the handler's own topic to an already shared instance.
    #[must_use]
    pub fn register_arc(mut self, handler: Arc<dyn Handler>) -> Self {
        let topic = handler.topic().to_string();
        self.insert(topic, Registration::Shared(handler));
        self
    }

    /// Route `topic` to a factory invoked once per message.
    #[must_use]
    pub fn register_scoped<F, H>(mut self, topic: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: Handler + 'static,
    {
        let factory: HandlerFactory = Arc::new(move || Arc::new(factory()) as Arc<dyn Handler>);
        self.insert(topic.into(), Registration::Scoped(factory));
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> HandlerRegistry {
        tracing::debug!(topics = ?self.registry.topics, "Handler registry built");
        self.registry
    }

    fn insert(&mut self, topic: String, registration: Registration) {
        if self.registry.routes.contains_key(&topic) {
            tracing::warn!(
                topic = %topic,
                "Handler already registered for topic, ignoring duplicate registration"
            );
            return;
        }
        self.registry.topics.push(topic.clone());
        self.registry.routes.insert(topic, registration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_testing::properties::topic_name;
    use courier_testing::ScriptedHandler;
    use courier_core::handler::HandlerError;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn empty_registry_has_no_topics() {
        let registry = HandlerRegistry::builder().build();

        assert!(registry.is_empty());
        assert!(registry.topics().is_empty());
        assert!(registry.resolve("user.created").is_none());
    }

    #[test]
    fn topics_keep_registration_order() {
        let registry = HandlerRegistry::builder()
            .register(ScriptedHandler::succeeding("order.created"))
            .register(ScriptedHandler::succeeding("user.created"))
            .build();

        assert_eq!(registry.topics(), ["order.created", "user.created"]);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn first_registration_wins() {
        let first = ScriptedHandler::succeeding("user.created");
        let second = ScriptedHandler::always_failing("user.created", HandlerError::Failed("x".into()));

        let registry = HandlerRegistry::builder()
            .register(first.clone())
            .register(second.clone())
            .build();

        let handler = registry.resolve("user.created");
        assert!(handler.is_some());
        if let Some(handler) = handler {
            assert_eq!(handler.handle("{}").await, Ok(()));
        }
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
        assert_eq!(registry.topics(), ["user.created"]);
    }

    #[test]
    fn scoped_factory_runs_per_resolution() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);

        let registry = HandlerRegistry::builder()
            .register_scoped("order.created", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                ScriptedHandler::succeeding("order.created")
            })
            .build();

        assert_eq!(built.load(Ordering::SeqCst), 0);
        let _ = registry.resolve("order.created");
        let _ = registry.resolve("order.created");
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    proptest! {
        #[test]
        fn topics_are_distinct(topics in proptest::collection::vec(topic_name(), 0..12)) {
            let registry = topics
                .iter()
                .fold(HandlerRegistry::builder(), |builder, topic| {
                    builder.register(ScriptedHandler::succeeding(topic.clone()))
                })
                .build();

            let mut expected: Vec<String> = Vec::new();
            for topic in &topics {
                if !expected.contains(topic) {
                    expected.push(topic.clone());
                }
            }
            prop_assert_eq!(registry.topics(), expected.as_slice());
        }
    }
}
