//! Event handlers for the consuming side of each service.
//!
//! - [`UserCreatedHandler`] (order service) keeps a reference copy of each
//!   registered user so orders can be validated against it.
//! - [`OrderCreatedHandler`] (user service) keeps a reference copy of each
//!   placed order.
//!
//! Both acknowledge empty payloads, report undecodable JSON as
//! [`HandlerError::MalformedPayload`], and report duplicates as
//! [`HandlerError::Rejected`]. Retry and dead-lettering are left to the
//! dispatcher.

use crate::entities::{Order, User};
use crate::events::{OrderCreatedEvent, UserCreatedEvent};
use crate::repository::{Repository, RepositoryError};
use courier_core::handler::{HandleFuture, Handler, HandlerError};
use std::sync::Arc;

fn repository_error(error: RepositoryError) -> HandlerError {
    match error {
        RepositoryError::Duplicate(_) => HandlerError::Rejected(error.to_string()),
        RepositoryError::Unavailable(_) => HandlerError::Failed(error.to_string()),
    }
}

/// Stores reference users from `user.created`.
pub struct UserCreatedHandler {
    topic: String,
    users: Arc<dyn Repository<User>>,
}

impl UserCreatedHandler {
    /// Create a handler bound to `topic`.
    pub fn new(topic: impl Into<String>, users: Arc<dyn Repository<User>>) -> Self {
        Self {
            topic: topic.into(),
            users,
        }
    }

    async fn process(&self, payload: &str) -> Result<(), HandlerError> {
        if payload.trim().is_empty() {
            tracing::warn!(topic = %self.topic, "Received an empty message");
            return Ok(());
        }

        let event: UserCreatedEvent = serde_json::from_str(payload)
            .map_err(|e| HandlerError::MalformedPayload(e.to_string()))?;

        tracing::info!(user_id = %event.id, name = %event.name, topic = %self.topic, "Processing user created event");

        let existing = self.users.all().await.map_err(repository_error)?;
        if existing
            .iter()
            .any(|u| u.email.eq_ignore_ascii_case(&event.email))
        {
            tracing::warn!(email = %event.email, "User with this email already exists");
            return Err(HandlerError::Rejected(format!(
                "A user with the email '{}' already exists",
                event.email
            )));
        }

        let id = event.id;
        self.users
            .add(User::from(event))
            .await
            .map_err(repository_error)?;

        tracing::info!(user_id = %id, topic = %self.topic, "User created event processed");
        Ok(())
    }
}

impl Handler for UserCreatedHandler {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn handle<'a>(&'a self, payload: &'a str) -> HandleFuture<'a> {
        Box::pin(self.process(payload))
    }
}

/// Stores reference orders from `order.created`.
pub struct OrderCreatedHandler {
    topic: String,
    orders: Arc<dyn Repository<Order>>,
}

impl OrderCreatedHandler {
    /// Create a handler bound to `topic`.
    pub fn new(topic: impl Into<String>, orders: Arc<dyn Repository<Order>>) -> Self {
        Self {
            topic: topic.into(),
            orders,
        }
    }

    async fn process(&self, payload: &str) -> Result<(), HandlerError> {
        if payload.trim().is_empty() {
            tracing::warn!(topic = %self.topic, "Received an empty message");
            return Ok(());
        }

        let event: OrderCreatedEvent = serde_json::from_str(payload)
            .map_err(|e| HandlerError::MalformedPayload(e.to_string()))?;

        tracing::info!(order_id = %event.id, product = %event.product, topic = %self.topic, "Processing order created event");

        let id = event.id;
        self.orders
            .add(Order::from(event))
            .await
            .map_err(repository_error)?;

        tracing::info!(order_id = %id, topic = %self.topic, "Order created event processed");
        Ok(())
    }
}

impl Handler for OrderCreatedHandler {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn handle<'a>(&'a self, payload: &'a str) -> HandleFuture<'a> {
        Box::pin(self.process(payload))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::repository::InMemoryRepository;
    use courier_core::topics;
    use uuid::Uuid;

    fn user_payload(id: Uuid, email: &str) -> String {
        serde_json::to_string(&UserCreatedEvent {
            id,
            name: "Ada".into(),
            email: email.into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_user_created_stores_reference_user() {
        let users = Arc::new(InMemoryRepository::<User>::new());
        let handler = UserCreatedHandler::new(topics::USER_CREATED, users.clone());
        let id = Uuid::new_v4();

        handler.handle(&user_payload(id, "ada@example.com")).await.unwrap();

        let stored = users.get(id).await.unwrap().unwrap();
        assert_eq!(stored.email, "ada@example.com");
    }

    #[tokio::test]
    async fn test_user_created_rejects_duplicate_email_case_insensitively() {
        let users = Arc::new(InMemoryRepository::<User>::new());
        let handler = UserCreatedHandler::new(topics::USER_CREATED, users.clone());

        handler
            .handle(&user_payload(Uuid::new_v4(), "ada@example.com"))
            .await
            .unwrap();
        let result = handler
            .handle(&user_payload(Uuid::new_v4(), "ADA@example.com"))
            .await;

        assert!(matches!(result, Err(HandlerError::Rejected(_))));
        assert_eq!(users.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_payload_is_acknowledged() {
        let users = Arc::new(InMemoryRepository::<User>::new());
        let handler = UserCreatedHandler::new(topics::USER_CREATED, users.clone());

        assert_eq!(handler.handle("   ").await, Ok(()));
        assert!(users.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json_is_malformed() {
        let orders = Arc::new(InMemoryRepository::<Order>::new());
        let handler = OrderCreatedHandler::new(topics::ORDER_CREATED, orders);

        let result = handler.handle("{not json").await;

        assert!(matches!(result, Err(HandlerError::MalformedPayload(_))));
        assert!(!result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_order_created_rejects_duplicate_id() {
        let orders = Arc::new(InMemoryRepository::<Order>::new());
        let handler = OrderCreatedHandler::new(topics::ORDER_CREATED, orders.clone());
        let payload = serde_json::to_string(&OrderCreatedEvent {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            product: "Keyboard".into(),
            quantity: 1,
            price: 49.5,
        })
        .unwrap();

        handler.handle(&payload).await.unwrap();
        let again = handler.handle(&payload).await;

        assert!(matches!(again, Err(HandlerError::Rejected(_))));
        assert_eq!(orders.all().await.unwrap().len(), 1);
    }
}
