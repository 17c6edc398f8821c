//! Integration events exchanged between the user and order services.
//!
//! Field names are `PascalCase` on the wire.

use crate::entities::{Order, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Published on `user.created` after a user is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserCreatedEvent {
    /// User ID
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
}

/// Published on `order.created` after an order is placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderCreatedEvent {
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

impl From<&User> for UserCreatedEvent {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

impl From<&Order> for OrderCreatedEvent {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            product: order.product.clone(),
            quantity: order.quantity,
            price: order.price,
        }
    }
}
