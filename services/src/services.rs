//! Producing services.
//!
//! Each service persists its entity and then publishes the matching
//! creation event through a [`ResilientPublisher`]. A publish failure is
//! surfaced to the caller; the stored entity is kept.

use crate::entities::{Order, User};
use crate::events::{OrderCreatedEvent, UserCreatedEvent};
use crate::repository::{Repository, RepositoryError};
use courier_runtime::{PublishError, ResilientPublisher};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors from the producing services.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// Another user already registered this email
    #[error("A user with the email '{0}' already exists")]
    EmailTaken(String),

    /// The order references a user this service has not seen
    #[error("User not found with ID: {0}")]
    UserNotFound(Uuid),

    /// Lookup by ID found nothing
    #[error("{entity} with ID '{id}' was not found")]
    NotFound {
        /// Entity kind, e.g. `User`
        entity: &'static str,
        /// Requested ID
        id: Uuid,
    },

    /// Persistence failed
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The entity was stored but its event could not be published
    #[error("Failed to publish event: {0}")]
    Publish(#[from] PublishError),
}

/// One page of a listing. Pages are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Page number; 0 is treated as 1
    pub number: usize,
    /// Entries per page
    pub size: usize,
}

impl Page {
    /// Page `number` of `size` entries.
    #[must_use]
    pub const fn new(number: usize, size: usize) -> Self {
        Self { number, size }
    }

    /// Cut this page out of `items`. Past the end yields an empty page.
    fn slice<T>(self, items: Vec<T>) -> Vec<T> {
        let skip = self.number.saturating_sub(1).saturating_mul(self.size);
        items.into_iter().skip(skip).take(self.size).collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

/// Request to register a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
}

/// Request to place an order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    /// Ordering user
    pub user_id: Uuid,
    /// Product name
    pub product: String,
    /// Units ordered
    pub quantity: i32,
    /// Unit price
    pub price: f64,
}

/// Registers users and announces them on `user.created`.
#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn Repository<User>>,
    publisher: ResilientPublisher,
    topic: String,
}

impl UserService {
    /// Create the service.
    pub fn new(
        users: Arc<dyn Repository<User>>,
        publisher: ResilientPublisher,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            users,
            publisher,
            topic: topic.into(),
        }
    }

    /// Register a new user and publish [`UserCreatedEvent`].
    ///
    /// # Errors
    ///
    /// - [`ServiceError::EmailTaken`] if the email is already registered
    ///   (case-insensitive)
    /// - [`ServiceError::Repository`] if the user cannot be stored
    /// - [`ServiceError::Publish`] if the event cannot be published
    pub async fn register_user(&self, request: NewUser) -> Result<User, ServiceError> {
        let existing = self.users.all().await?;
        if existing
            .iter()
            .any(|u| u.email.eq_ignore_ascii_case(&request.email))
        {
            tracing::warn!(email = %request.email, "User with this email already exists");
            return Err(ServiceError::EmailTaken(request.email));
        }

        let user = User {
            id: Uuid::new_v4(),
            name: request.name,
            email: request.email,
        };
        self.users.add(user.clone()).await?;
        tracing::info!(user_id = %user.id, "User created");

        self.publisher
            .publish(&self.topic, &UserCreatedEvent::from(&user))
            .await?;
        tracing::info!(user_id = %user.id, topic = %self.topic, "User created event published");

        Ok(user)
    }

    /// Look up a user by ID.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotFound`] if no user has this ID
    /// - [`ServiceError::Repository`] if the store cannot be read
    pub async fn get_user(&self, id: Uuid) -> Result<User, ServiceError> {
        self.users
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound { entity: "User", id })
    }

    /// One page of users in registration order.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Repository`] if the store cannot be read.
    pub async fn get_users(&self, page: Page) -> Result<Vec<User>, ServiceError> {
        Ok(page.slice(self.users.all().await?))
    }
}

/// Places orders for known users and announces them on `order.created`.
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn Repository<Order>>,
    users: Arc<dyn Repository<User>>,
    publisher: ResilientPublisher,
    topic: String,
}

impl OrderService {
    /// Create the service.
    ///
    /// `users` holds the reference users built from `user.created`.
    pub fn new(
        orders: Arc<dyn Repository<Order>>,
        users: Arc<dyn Repository<User>>,
        publisher: ResilientPublisher,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            orders,
            users,
            publisher,
            topic: topic.into(),
        }
    }

    /// Place an order and publish [`OrderCreatedEvent`].
    ///
    /// # Errors
    ///
    /// - [`ServiceError::UserNotFound`] if the user is unknown
    /// - [`ServiceError::Repository`] if the order cannot be stored
    /// - [`ServiceError::Publish`] if the event cannot be published
    pub async fn place_order(&self, request: NewOrder) -> Result<Order, ServiceError> {
        if self.users.get(request.user_id).await?.is_none() {
            tracing::warn!(user_id = %request.user_id, "User not found");
            return Err(ServiceError::UserNotFound(request.user_id));
        }

        let order = Order {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            product: request.product,
            quantity: request.quantity,
            price: request.price,
        };
        self.orders.add(order.clone()).await?;
        tracing::info!(order_id = %order.id, "Order created");

        self.publisher
            .publish(&self.topic, &OrderCreatedEvent::from(&order))
            .await?;
        tracing::info!(order_id = %order.id, topic = %self.topic, "Order created event published");

        Ok(order)
    }

    /// Look up an order by ID.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotFound`] if no order has this ID
    /// - [`ServiceError::Repository`] if the store cannot be read
    pub async fn get_order(&self, id: Uuid) -> Result<Order, ServiceError> {
        self.orders
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound { entity: "Order", id })
    }

    /// One page of orders in placement order.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Repository`] if the store cannot be read.
    pub async fn get_orders(&self, page: Page) -> Result<Vec<Order>, ServiceError> {
        Ok(page.slice(self.orders.all().await?))
    }
}
