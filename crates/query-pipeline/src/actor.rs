use super::{attempt, Backend, Config, Debounce, ResultList, ShortQuery};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Actor owns the state of a single running pipeline.
pub struct Actor<B> {
    backend: Arc<B>,
    config: Config,
    tx: mpsc::Sender<ResultList>,
    // Generation of the most-recently admitted query.
    generation: u64,
    // Whether the query of the current `generation` is still awaiting its result.
    live: bool,
    // Last ResultList sent to `tx`.
    last: Option<ResultList>,
}

// A request future, tagged with the generation of its query.
type Request = BoxFuture<'static, (u64, ResultList)>;

impl<B: Backend> Actor<B> {
    pub fn new(backend: Arc<B>, config: Config, tx: mpsc::Sender<ResultList>) -> Self {
        Self {
            backend,
            config,
            tx,
            generation: 0,
            live: false,
            last: None,
        }
    }

    pub async fn run<S>(mut self, input: S)
    where
        S: futures::Stream<Item = String> + Send,
    {
        let mut input = std::pin::pin!(input);
        let mut input_done = false;
        let mut debounce = Debounce::new(self.config.debounce);
        // Request of the current generation, if it's still awaiting its result.
        // Admitting a query drops the request it supersedes.
        let mut requests: FuturesUnordered<Request> = FuturesUnordered::new();

        while !input_done || debounce.is_pending() || self.live {
            tokio::select! {
                query = input.next(), if !input_done => match query {
                    Some(query) if self.config.short_query == ShortQuery::Drop
                        && self.config.is_short(&query) =>
                    {
                        tracing::debug!(query, "dropped short query");
                    }
                    Some(query) => {
                        if let Some(query) = debounce.push(query) {
                            self.admit(query, &mut requests);
                        }
                    }
                    None => {
                        tracing::debug!("input stream ended");
                        input_done = true;

                        if let Some(query) = debounce.flush() {
                            self.admit(query, &mut requests);
                        }
                    }
                },
                Some(query) = debounce.ready(), if debounce.is_pending() => {
                    self.admit(query, &mut requests);
                }
                Some((generation, results)) = requests.next(), if !requests.is_empty() => {
                    if !self.complete(generation, results).await {
                        return;
                    }
                }
                () = self.tx.closed() => {
                    tracing::debug!("output stream was dropped");
                    return;
                }
            }
        }
    }

    fn admit(&mut self, query: String, requests: &mut FuturesUnordered<Request>) {
        if self.live {
            tracing::debug!(
                generation = self.generation,
                "cancelled request of superseded query"
            );
        }
        // Stops any further attempts or rate-limit retries of superseded queries.
        requests.clear();
        self.generation += 1;
        self.live = true;

        let generation = self.generation;
        tracing::debug!(generation, query, "admitted query");

        requests.push(
            attempt::fetch(self.backend.clone(), query, self.config.clone())
                .map(move |results| (generation, results))
                .boxed(),
        );
    }

    // Apply the results of a completed request.
    // Returns false if the output stream was dropped.
    async fn complete(&mut self, generation: u64, results: ResultList) -> bool {
        if generation != self.generation {
            tracing::debug!(
                generation,
                current = self.generation,
                "discarding results of superseded query"
            );
            return true;
        }
        self.live = false;

        if self.config.distinct && self.last.as_ref() == Some(&results) {
            tracing::trace!(generation, "suppressing repeated results");
            return true;
        }
        if self.config.distinct {
            self.last = Some(results.clone());
        }
        self.tx.send(results).await.is_ok()
    }
}
