use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Config selects and parameterizes the stages of a Pipeline.
/// Stages with an `Option` parameter are disabled when it's `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// # Quiet window after which the latest query is admitted.
    /// Queries superseded by another within this window never reach the backend.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "Option<String>")]
    pub debounce: Option<Duration>,
    /// # Minimum number of characters in a query sent to the backend.
    pub min_query_len: usize,
    /// # Handling of queries shorter than `minQueryLen`.
    pub short_query: ShortQuery,
    /// # Bound on a single backend call.
    /// A call which doesn't complete in time is answered with an empty list.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "Option<String>")]
    pub timeout: Option<Duration>,
    /// # Delay before re-issuing a rate-limited backend call.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "Option<String>")]
    pub rate_limit_retry: Option<Duration>,
    /// # Maximum number of rate-limit retries of a single query.
    /// Retries are unbounded if unset.
    pub max_rate_limit_retries: Option<u32>,
    /// # Suppress a result list equal to the one emitted just before it.
    pub distinct: bool,
}

/// ShortQuery determines what happens to a query below the minimum length.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ShortQuery {
    /// Answer with an empty list without calling the backend,
    /// clearing any results of a prior query.
    #[default]
    Clear,
    /// Discard the query before it's debounced. It produces no output.
    Drop,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debounce: Some(Duration::from_millis(500)),
            min_query_len: 2,
            short_query: ShortQuery::Clear,
            timeout: Some(Duration::from_millis(1000)),
            rate_limit_retry: Some(Duration::from_millis(1000)),
            max_rate_limit_retries: None,
            distinct: true,
        }
    }
}

impl Config {
    /// Only the switch stage: every query is sent immediately,
    /// and results of superseded queries are ignored.
    pub fn switch_only() -> Self {
        Self {
            debounce: None,
            min_query_len: 0,
            timeout: None,
            rate_limit_retry: None,
            distinct: false,
            ..Default::default()
        }
    }

    /// Short queries are dropped, and the remainder are debounced and switched.
    pub fn debounced() -> Self {
        Self {
            short_query: ShortQuery::Drop,
            timeout: None,
            rate_limit_retry: None,
            distinct: false,
            ..Default::default()
        }
    }

    /// All stages except rate-limit retries.
    pub fn without_retry() -> Self {
        Self {
            rate_limit_retry: None,
            ..Default::default()
        }
    }

    /// Returns true if `query` is shorter than the minimum query length.
    pub fn is_short(&self, query: &str) -> bool {
        query.chars().count() < self.min_query_len
    }

    /// Returns the delay before another rate-limit retry, given the number
    /// of attempts made so far, or None if no further retry is permitted.
    pub(crate) fn retry_delay(&self, attempts: u32) -> Option<Duration> {
        match self.max_rate_limit_retries {
            Some(max) if attempts > max => None,
            _ => self.rate_limit_retry,
        }
    }
}
