//! Stored entities.
//!
//! Each service keeps its own records plus a reference copy of the other
//! service's entities, built from the events it consumes.

use crate::events::{OrderCreatedEvent, UserCreatedEvent};
use crate::repository::Entity;
use uuid::Uuid;

/// A registered user (or the order service's reference copy of one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// User ID
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
}

/// A placed order (or the user service's reference copy of one).
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    /// Order ID
    pub id: Uuid,
    /// Owning user
    pub user_id: Uuid,
    /// Product name
    pub product: String,
    /// Units ordered
    pub quantity: i32,
    /// Unit price
    pub price: f64,
}

impl Entity for User {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Entity for Order {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl From<UserCreatedEvent> for User {
    fn from(event: UserCreatedEvent) -> Self {
        Self {
            id: event.id,
            name: event.name,
            email: event.email,
        }
    }
}

impl From<OrderCreatedEvent> for Order {
    fn from(event: OrderCreatedEvent) -> Self {
        Self {
            id: event.id,
            user_id: event.user_id,
            product: event.product,
            quantity: event.quantity,
            price: event.price,
        }
    }
}
