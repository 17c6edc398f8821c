//! # Courier Services
//!
//! The user and order services running on the Courier pipeline.
//!
//! ```text
//!   users role                              orders role
//!   ──────────                              ───────────
//!   UserService ──► "user.created" ───────► UserCreatedHandler ──► reference users
//!                                                                        │
//!   reference orders ◄── OrderCreatedHandler ◄── "order.created" ◄── OrderService
//! ```
//!
//! One process runs one role, selected by `SERVICE_ROLE`. The consuming
//! side is an ordinary [`courier_runtime::Dispatcher`]; the producing side
//! publishes through [`courier_runtime::ResilientPublisher`].

pub mod app;
pub mod config;
pub mod entities;
pub mod events;
pub mod handlers;
pub mod repository;
pub mod services;

pub use config::{Config, ConfigError, Role};
pub use entities::{Order, User};
pub use events::{OrderCreatedEvent, UserCreatedEvent};
pub use handlers::{OrderCreatedHandler, UserCreatedHandler};
pub use repository::{InMemoryRepository, Repository, RepositoryError};
pub use services::{NewOrder, NewUser, OrderService, Page, ServiceError, UserService};
