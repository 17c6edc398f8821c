//! Create/read persistence boundary.
//!
//! Services and handlers depend on [`Repository`] only; the in-memory
//! implementation backs the host binary and the tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use uuid::Uuid;

/// Errors from repository operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// An entity with this ID is already stored
    #[error("Entity {0} already exists")]
    Duplicate(Uuid),

    /// The backing store could not be reached
    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

/// Anything a repository can store.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Unique identifier.
    fn id(&self) -> Uuid;
}

/// Boxed future returned by [`Repository`] operations.
pub type RepositoryFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Generic create/read store.
pub trait Repository<T: Entity>: Send + Sync {
    /// Store a new entity.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Duplicate`] if the ID is taken.
    fn add(&self, entity: T) -> RepositoryFuture<'_, ()>;

    /// Look up an entity by ID.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Unavailable`] if the store cannot be read.
    fn get(&self, id: Uuid) -> RepositoryFuture<'_, Option<T>>;

    /// All stored entities in insertion order.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Unavailable`] if the store cannot be read.
    fn all(&self) -> RepositoryFuture<'_, Vec<T>>;
}

/// In-memory [`Repository`].
#[derive(Debug)]
pub struct InMemoryRepository<T> {
    entities: RwLock<Vec<T>>,
}

impl<T> InMemoryRepository<T> {
    /// Create an empty repository.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entities: RwLock::new(Vec::new()),
        }
    }
}

impl<T> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    fn add(&self, entity: T) -> RepositoryFuture<'_, ()> {
        let result = {
            let mut entities = self.entities.write().unwrap_or_else(PoisonError::into_inner);
            if entities.iter().any(|e| e.id() == entity.id()) {
                Err(RepositoryError::Duplicate(entity.id()))
            } else {
                entities.push(entity);
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn get(&self, id: Uuid) -> RepositoryFuture<'_, Option<T>> {
        let found = self
            .entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.id() == id)
            .cloned();
        Box::pin(async move { Ok(found) })
    }

    fn all(&self) -> RepositoryFuture<'_, Vec<T>> {
        let all = self
            .entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Box::pin(async move { Ok(all) })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Widget(Uuid);

    impl Entity for Widget {
        fn id(&self) -> Uuid {
            self.0
        }
    }

    #[tokio::test]
    async fn test_add_get_all() {
        let repo = InMemoryRepository::new();
        let first = Widget(Uuid::new_v4());
        let second = Widget(Uuid::new_v4());

        repo.add(first.clone()).await.unwrap();
        repo.add(second.clone()).await.unwrap();

        assert_eq!(repo.get(first.0).await.unwrap(), Some(first.clone()));
        assert_eq!(repo.get(Uuid::new_v4()).await.unwrap(), None);
        assert_eq!(repo.all().await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let repo = InMemoryRepository::new();
        let id = Uuid::new_v4();

        repo.add(Widget(id)).await.unwrap();

        assert_eq!(
            repo.add(Widget(id)).await,
            Err(RepositoryError::Duplicate(id))
        );
        assert_eq!(repo.all().await.unwrap().len(), 1);
    }
}
