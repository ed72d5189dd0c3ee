use super::{Error, SharedError};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::{map::Entry, IndexMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

// Result<Arc, Arc> because anyhow::Error is not Clone,
// and a Shared future must yield a Clone output to each of its waiters.
pub type FetchOutput<E> = Result<Arc<E>, SharedError>;
type SharedFetch<'a, E> = Shared<BoxFuture<'a, FetchOutput<E>>>;

/// FetchCache maps each key to its single in-flight or completed fetch.
///
/// A fetch is registered at most once per key: later registrations of the
/// same key attach to the existing fetch rather than starting another.
/// Keys are retained in the order they were first registered.
pub struct FetchCache<'a, K, E> {
    fetches: IndexMap<K, SharedFetch<'a, E>>,
}

impl<'a, K, E> Default for FetchCache<'a, K, E> {
    fn default() -> Self {
        Self {
            fetches: IndexMap::new(),
        }
    }
}

impl<'a, K, E> FetchCache<'a, K, E>
where
    K: Clone + Eq + Hash + Debug + Send + 'a,
    E: Send + Sync + 'a,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fetch of `key`, using `start` to build it only if `key`
    /// has no registered fetch. Returns true if this call registered the fetch.
    ///
    /// Registered fetches make progress only while awaited through
    /// `resolve_all()` or `completions()`.
    pub fn fetch<F, Fut>(&mut self, key: K, start: F) -> bool
    where
        F: FnOnce(K) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<E>> + Send + 'a,
    {
        match self.fetches.entry(key) {
            Entry::Occupied(entry) => {
                tracing::trace!(key = ?entry.key(), "attached to registered fetch");
                false
            }
            Entry::Vacant(entry) => {
                tracing::debug!(key = ?entry.key(), "registered fetch");

                let fetch = start(entry.key().clone())
                    .map(|result| result.map(Arc::new).map_err(|err| SharedError(Arc::new(err))))
                    .boxed()
                    .shared();

                entry.insert(fetch);
                true
            }
        }
    }

    /// Number of registered fetches.
    pub fn len(&self) -> usize {
        self.fetches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetches.is_empty()
    }

    /// Registered keys, in the order they were first registered.
    pub fn keys(&self) -> indexmap::map::Keys<'_, K, SharedFetch<'a, E>> {
        self.fetches.keys()
    }

    /// Drive all registered fetches concurrently, and wait for every one
    /// of them to complete. Returns the fetched entity of each key in
    /// registration order, or the first failure to occur.
    pub async fn resolve_all(&self) -> Result<IndexMap<K, Arc<E>>, Error> {
        let mut completions = self.completions();
        let mut resolved = IndexMap::with_capacity(self.fetches.len());

        while let Some((key, result)) = completions.next().await {
            let entity = result.map_err(|error| Error::entity(&key, error))?;
            resolved.insert(key, entity);
        }
        // Completions arrive in any order: restore registration order.
        resolved.sort_by(|lhs, _, rhs, _| {
            let index = |key: &K| self.fetches.get_index_of(key);
            index(lhs).cmp(&index(rhs))
        });

        Ok(resolved)
    }

    /// Drive all registered fetches concurrently,
    /// yielding each key and its result as it completes.
    pub fn completions(&self) -> FuturesUnordered<BoxFuture<'a, (K, FetchOutput<E>)>> {
        self.fetches
            .iter()
            .map(|(key, fetch)| {
                let key = key.clone();
                fetch.clone().map(move |result| (key, result)).boxed()
            })
            .collect()
    }
}
