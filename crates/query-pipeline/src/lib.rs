//! Debounced, cancellable query pipelines.
//!
//! A [`Pipeline`] maps a live stream of query strings into a stream of
//! [`ResultList`]s, answering each admitted query through a [`Backend`].
//! Its stages (minimum-length gate, debounce, switch, timeout,
//! rate-limit retry, and duplicate suppression) are selected by [`Config`].
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;

mod actor;
mod attempt;
mod config;
mod debounce;
pub mod timed;

pub use config::{Config, ShortQuery};
use debounce::Debounce;

/// ResultList is an ordered list of results for a single query.
/// Lists are compared structurally.
pub type ResultList = Vec<String>;

/// Error returned by a Backend when a query could not be answered.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend is rate limiting requests")]
    RateLimited,
    #[error("backend responded with status {0}")]
    Status(u16),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BackendError {
    /// Returns true if the backend asked us to slow down (HTTP 429 semantics).
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Status(429))
    }
}

/// Backend answers a single query with a ResultList.
pub trait Backend: Send + Sync + 'static {
    /// Fetch results for `query`.
    ///
    /// The returned future may be dropped before it completes, or may be
    /// allowed to run to completion after its result is no longer wanted.
    /// Implementations must tolerate both.
    fn fetch_results(
        &self,
        query: &str,
    ) -> impl std::future::Future<Output = Result<ResultList, BackendError>> + Send;
}

impl<B: Backend> Backend for Arc<B> {
    fn fetch_results(
        &self,
        query: &str,
    ) -> impl std::future::Future<Output = Result<ResultList, BackendError>> + Send {
        (**self).fetch_results(query)
    }
}

/// Pipeline binds a Backend to a Config, and spawns pipeline instances
/// over input streams of queries.
pub struct Pipeline<B> {
    backend: Arc<B>,
    config: Config,
}

// Manual Clone impl to avoid requiring B: Clone
impl<B> Clone for Pipeline<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
        }
    }
}

impl<B: Backend> Pipeline<B> {
    pub fn new(backend: B, config: Config) -> Self {
        Self {
            backend: Arc::new(backend),
            config,
        }
    }

    /// Config of this Pipeline.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Spawn a pipeline over `input`, returning its stream of ResultLists.
    ///
    /// The pipeline runs as a tokio task and must be spawned from within a
    /// runtime. It never yields an error, and it ends only after `input` ends
    /// and its last admitted query has been answered. Dropping the returned
    /// stream stops the pipeline.
    pub fn spawn<S>(&self, input: S) -> ReceiverStream<ResultList>
    where
        S: futures::Stream<Item = String> + Send + 'static,
    {
        let (tx, rx) = tokio::sync::mpsc::channel(OUTPUT_BUFFER);
        let actor = actor::Actor::new(self.backend.clone(), self.config.clone(), tx);

        tokio::spawn(actor.run(input));

        ReceiverStream::new(rx)
    }
}

// Number of ResultLists which may be buffered ahead of a slow consumer.
const OUTPUT_BUFFER: usize = 8;
