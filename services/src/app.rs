//! Role-specific wiring of handlers, dispatcher and services.

use crate::config::{Config, Role};
use crate::entities::{Order, User};
use crate::handlers::{OrderCreatedHandler, UserCreatedHandler};
use crate::repository::{InMemoryRepository, Repository};
use crate::services::{OrderService, UserService};
use courier_core::broker::Broker;
use courier_core::environment::Clock;
use courier_runtime::{DeadLetterSink, Dispatcher, HandlerRegistry, ResilientPublisher};
use std::sync::Arc;

/// Stores shared by the handlers and the producing service of one process.
#[derive(Clone)]
pub struct Stores {
    /// Users (own or reference copies, depending on role)
    pub users: Arc<dyn Repository<User>>,
    /// Orders (own or reference copies, depending on role)
    pub orders: Arc<dyn Repository<Order>>,
}

impl Stores {
    /// Empty in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(InMemoryRepository::<User>::new()),
            orders: Arc::new(InMemoryRepository::<Order>::new()),
        }
    }
}

/// Producing service for a role.
#[derive(Clone)]
pub enum Producer {
    /// Order service
    Orders(OrderService),
    /// User service
    Users(UserService),
}

/// Register the handler this role consumes with.
///
/// Each message gets a fresh handler; only the stores outlive it.
#[must_use]
pub fn handler_registry(config: &Config, stores: &Stores) -> HandlerRegistry {
    let topic = config.consumed_topic().to_string();
    let builder = HandlerRegistry::builder();
    let builder = match config.role {
        Role::Orders => {
            let users = Arc::clone(&stores.users);
            let handler_topic = topic.clone();
            builder.register_scoped(topic, move || {
                UserCreatedHandler::new(handler_topic.clone(), Arc::clone(&users))
            })
        }
        Role::Users => {
            let orders = Arc::clone(&stores.orders);
            let handler_topic = topic.clone();
            builder.register_scoped(topic, move || {
                OrderCreatedHandler::new(handler_topic.clone(), Arc::clone(&orders))
            })
        }
    };
    builder.build()
}

/// Dispatcher for this role, dead-lettering through `broker`.
#[must_use]
pub fn dispatcher(
    config: &Config,
    registry: HandlerRegistry,
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
) -> Dispatcher {
    let sink = DeadLetterSink::new(broker, clock);
    Dispatcher::new(Arc::new(registry), config.retry_policy(), sink)
        .with_unroutable_policy(config.unroutable_policy())
}

/// Producing service for this role.
#[must_use]
pub fn producer(config: &Config, stores: &Stores, publisher: ResilientPublisher) -> Producer {
    match config.role {
        Role::Orders => Producer::Orders(OrderService::new(
            Arc::clone(&stores.orders),
            Arc::clone(&stores.users),
            publisher,
            config.produced_topic(),
        )),
        Role::Users => Producer::Users(UserService::new(
            Arc::clone(&stores.users),
            publisher,
            config.produced_topic(),
        )),
    }
}
