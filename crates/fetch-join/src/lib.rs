//! Order-preserving joins of a primary list with entities fetched by key.
//!
//! A [`Joiner`] fetches a list of [`Primary`] items, fetches the entity
//! referenced by each item's foreign key, and produces one [`JoinedRecord`]
//! per primary item. In its default configuration each distinct key is
//! fetched exactly once, however many items reference it, and records are
//! produced in the order of the primary list regardless of the order in
//! which entity fetches complete.
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

mod cache;
mod join;

pub use cache::{FetchCache, FetchOutput};
pub use join::{Config, Fetching, Joined, Joiner, Key, Ordering};

/// Primary is an item of the primary list, which references an entity by key.
pub trait Primary {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Key of the entity referenced by this item.
    fn foreign_key(&self) -> Self::Key;
}

/// PrimarySource fetches the ordered list of primary items.
pub trait PrimarySource: Send + Sync {
    type Item: Primary + Send;

    fn fetch_primary(
        &self,
    ) -> impl std::future::Future<Output = anyhow::Result<Vec<Self::Item>>> + Send;
}

/// EntitySource fetches a single entity by its key.
pub trait EntitySource<K>: Send + Sync {
    type Entity: Send + Sync;

    fn fetch_entity(
        &self,
        key: &K,
    ) -> impl std::future::Future<Output = anyhow::Result<Self::Entity>> + Send;
}

/// JoinedRecord pairs a primary item with its referenced entity.
/// Records which reference the same key share a single entity instance.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRecord<P, E> {
    pub primary: P,
    pub entity: Arc<E>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to fetch primary list")]
    Primary(#[source] anyhow::Error),
    #[error("failed to fetch entity {key}")]
    Entity {
        key: String,
        #[source]
        error: SharedError,
    },
}

impl Error {
    fn entity<K: Debug>(key: &K, error: SharedError) -> Self {
        Self::Entity {
            key: format!("{key:?}"),
            error,
        }
    }
}

/// SharedError is the error of a failed fetch, shared by all of its waiters.
#[derive(Debug, Clone)]
pub struct SharedError(pub Arc<anyhow::Error>);

impl std::fmt::Display for SharedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}
