use super::{EntitySource, Error, FetchCache, JoinedRecord, Primary, PrimarySource, SharedError};
use futures::stream::{FuturesUnordered, StreamExt};
use itertools::Itertools;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Fetching selects how entities are fetched for the primary list.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Fetching {
    /// Fetch each distinct key exactly once, sharing its entity
    /// across every item which references it.
    #[default]
    Memoized,
    /// Fetch an entity for every primary item, even if keys repeat.
    PerItem,
}

/// Ordering selects the order in which joined records are produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Ordering {
    /// Records follow the order of the primary list.
    #[default]
    Primary,
    /// Records are produced as their entities arrive.
    Completion,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    pub fetching: Fetching,
    pub ordering: Ordering,
}

/// Key of the entities joined by a Joiner<P, _>.
pub type Key<P> = <<P as PrimarySource>::Item as Primary>::Key;

/// Joined is the JoinedRecord type produced by a Joiner<P, S>.
pub type Joined<P, S> =
    JoinedRecord<<P as PrimarySource>::Item, <S as EntitySource<Key<P>>>::Entity>;

/// Joiner joins the primary list of a PrimarySource with entities of an EntitySource.
pub struct Joiner<P, S> {
    primary: P,
    entities: S,
    config: Config,
}

impl<P, S> Joiner<P, S>
where
    P: PrimarySource,
    S: EntitySource<Key<P>>,
{
    pub fn new(primary: P, entities: S, config: Config) -> Self {
        Self {
            primary,
            entities,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn entities(&self) -> &S {
        &self.entities
    }

    /// Fetch the primary list and join each of its items with its entity.
    ///
    /// Entity fetches run concurrently. The first failure fails the join,
    /// and fetches still outstanding at that point are dropped.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(fetching = ?self.config.fetching, ordering = ?self.config.ordering),
    )]
    pub async fn join(&self) -> Result<Vec<Joined<P, S>>, Error> {
        let items = self.primary.fetch_primary().await.map_err(Error::Primary)?;
        tracing::debug!(items = items.len(), "fetched primary list");

        if items.is_empty() {
            return Ok(Vec::new());
        }
        let keyed = items
            .into_iter()
            .map(|item| (item.foreign_key(), item))
            .collect::<Vec<_>>();

        let joined = match (self.config.fetching, self.config.ordering) {
            (Fetching::Memoized, Ordering::Primary) => self.memoized_in_order(keyed).await,
            (Fetching::Memoized, Ordering::Completion) => {
                self.memoized_on_completion(keyed).await
            }
            (Fetching::PerItem, Ordering::Primary) => self.per_item_in_order(keyed).await,
            (Fetching::PerItem, Ordering::Completion) => {
                self.per_item_on_completion(keyed).await
            }
        }?;

        tracing::debug!(records = joined.len(), "joined primary list");
        Ok(joined)
    }

    /// Stream which yields the outcome of `join()` exactly once, and then ends.
    pub fn join_stream(
        &self,
    ) -> impl futures::Stream<Item = Result<Vec<Joined<P, S>>, Error>> + '_ {
        futures::stream::once(self.join())
    }

    fn fetch_distinct<'s>(
        &'s self,
        keyed: &[(Key<P>, P::Item)],
    ) -> FetchCache<'s, Key<P>, S::Entity> {
        let mut cache = FetchCache::new();

        for (key, _item) in keyed {
            cache.fetch(key.clone(), |key| async move {
                self.entities.fetch_entity(&key).await
            });
        }
        tracing::debug!(
            items = keyed.len(),
            fetches = cache.len(),
            "fetching distinct entities"
        );
        cache
    }

    async fn memoized_in_order(
        &self,
        keyed: Vec<(Key<P>, P::Item)>,
    ) -> Result<Vec<Joined<P, S>>, Error> {
        let cache = self.fetch_distinct(&keyed);
        let entities = cache.resolve_all().await?;

        Ok(keyed
            .into_iter()
            .map(|(key, primary)| JoinedRecord {
                // Every key of `keyed` was registered with `cache`.
                entity: Arc::clone(&entities[&key]),
                primary,
            })
            .collect())
    }

    async fn memoized_on_completion(
        &self,
        keyed: Vec<(Key<P>, P::Item)>,
    ) -> Result<Vec<Joined<P, S>>, Error> {
        let cache = self.fetch_distinct(&keyed);
        let mut joined = Vec::with_capacity(keyed.len());
        let mut waiting = keyed.into_iter().into_group_map();

        let mut completions = cache.completions();
        while let Some((key, result)) = completions.next().await {
            let entity = result.map_err(|error| Error::entity(&key, error))?;

            for primary in waiting.remove(&key).unwrap_or_default() {
                joined.push(JoinedRecord {
                    primary,
                    entity: entity.clone(),
                });
            }
        }
        Ok(joined)
    }

    async fn per_item_in_order(
        &self,
        keyed: Vec<(Key<P>, P::Item)>,
    ) -> Result<Vec<Joined<P, S>>, Error> {
        let (keys, items): (Vec<_>, Vec<_>) = keyed.into_iter().unzip();
        tracing::debug!(fetches = keys.len(), "fetching entity of each item");

        let entities =
            futures::future::try_join_all(keys.iter().map(|key| self.fetch_one(key))).await?;

        Ok(items
            .into_iter()
            .zip(entities)
            .map(|(primary, entity)| JoinedRecord { primary, entity })
            .collect())
    }

    async fn per_item_on_completion(
        &self,
        keyed: Vec<(Key<P>, P::Item)>,
    ) -> Result<Vec<Joined<P, S>>, Error> {
        let mut joined = Vec::with_capacity(keyed.len());
        tracing::debug!(fetches = keyed.len(), "fetching entity of each item");

        let mut fetches = keyed
            .into_iter()
            .map(|(key, primary)| async move {
                let result = self.fetch_one(&key).await;
                (primary, result)
            })
            .collect::<FuturesUnordered<_>>();

        while let Some((primary, result)) = fetches.next().await {
            joined.push(JoinedRecord {
                primary,
                entity: result?,
            });
        }
        Ok(joined)
    }

    async fn fetch_one(&self, key: &Key<P>) -> Result<Arc<S::Entity>, Error> {
        match self.entities.fetch_entity(key).await {
            Ok(entity) => Ok(Arc::new(entity)),
            Err(err) => Err(Error::entity(key, SharedError(Arc::new(err)))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_defaults_and_parsing() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(
            config,
            Config {
                fetching: Fetching::Memoized,
                ordering: Ordering::Primary,
            }
        );

        let config: Config =
            serde_json::from_str(r#"{"fetching": "perItem", "ordering": "completion"}"#).unwrap();
        assert_eq!(
            config,
            Config {
                fetching: Fetching::PerItem,
                ordering: Ordering::Completion,
            }
        );

        let err = serde_json::from_str::<Config>(r#"{"order": "primary"}"#).unwrap_err();
        assert!(err.to_string().contains("unknown field `order`"), "{err}");
    }
}
