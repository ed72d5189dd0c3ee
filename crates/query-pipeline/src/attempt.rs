use super::{Backend, Config, ResultList, ShortQuery};
use std::sync::Arc;

/// Answer one admitted query, never failing.
///
/// Short queries are answered with an empty list without calling the backend.
/// Each backend call races `config.timeout`, and a call which times out is
/// answered with an empty list. Rate-limited calls are re-issued after
/// `config.rate_limit_retry`, and all other errors are answered with an empty list.
pub async fn fetch<B: Backend>(backend: Arc<B>, query: String, config: Config) -> ResultList {
    if config.short_query == ShortQuery::Clear && config.is_short(&query) {
        tracing::debug!(query, "query is too short (clearing results)");
        return ResultList::new();
    }
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;

        let result = match config.timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, backend.fetch_results(&query)).await {
                    Ok(result) => result,
                    Err(_elapsed) => {
                        tracing::warn!(
                            query,
                            attempts,
                            ?timeout,
                            "backend timed out (using empty result)"
                        );
                        return ResultList::new();
                    }
                }
            }
            None => backend.fetch_results(&query).await,
        };

        match result {
            Ok(results) => {
                tracing::trace!(query, attempts, results = results.len(), "backend responded");
                return results;
            }
            Err(err) if err.is_rate_limited() => {
                let Some(delay) = config.retry_delay(attempts) else {
                    tracing::warn!(%err, query, attempts, "backend rate limited (using empty result)");
                    return ResultList::new();
                };
                tracing::warn!(%err, query, attempts, ?delay, "backend rate limited (will retry)");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                tracing::warn!(%err, query, attempts, "backend failed (using empty result)");
                return ResultList::new();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::BackendError;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    // Backend which plays back scripted outcomes, and records when it was called.
    struct Scripted {
        outcomes: Mutex<VecDeque<(Duration, Result<ResultList, BackendError>)>>,
        calls: Mutex<Vec<(Instant, String)>>,
    }

    impl Scripted {
        fn new(outcomes: Vec<(u64, Result<ResultList, BackendError>)>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(
                    outcomes
                        .into_iter()
                        .map(|(ms, outcome)| (Duration::from_millis(ms), outcome))
                        .collect(),
                ),
                calls: Default::default(),
            })
        }
        fn calls(&self) -> Vec<(Instant, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Backend for Scripted {
        async fn fetch_results(&self, query: &str) -> Result<ResultList, BackendError> {
            self.calls
                .lock()
                .unwrap()
                .push((Instant::now(), query.to_string()));

            let (delay, outcome) = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected backend call");

            tokio::time::sleep(delay).await;
            outcome
        }
    }

    fn ok(items: &[&str]) -> Result<ResultList, BackendError> {
        Ok(items.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_query_skips_backend() {
        let backend = Scripted::new(vec![]);
        let out = fetch(backend.clone(), "G".to_string(), Config::default()).await;

        assert!(out.is_empty());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_query_is_sent_when_dropping() {
        let backend = Scripted::new(vec![(0, ok(&["Gacrux"]))]);
        let config = Config {
            short_query: ShortQuery::Drop,
            ..Default::default()
        };
        // The drop policy is applied before admission, not here.
        let out = fetch(backend.clone(), "G".to_string(), config).await;
        assert_eq!(out, vec!["Gacrux"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_empty_list() {
        let started = Instant::now();
        let backend = Scripted::new(vec![(1100, ok(&["Vega"]))]);

        let out = fetch(backend, "Veg".to_string(), Config::default()).await;
        assert!(out.is_empty());
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried_after_delay() {
        let started = Instant::now();
        let backend = Scripted::new(vec![
            (0, Err(BackendError::Status(429))),
            (10, Err(BackendError::RateLimited)),
            (0, ok(&["Betelgeuse"])),
        ]);

        let out = fetch(backend.clone(), "Bet".to_string(), Config::default()).await;
        assert_eq!(out, vec!["Betelgeuse"]);

        let offsets: Vec<_> = backend
            .calls()
            .into_iter()
            .map(|(at, query)| (at.duration_since(started).as_millis(), query))
            .collect();

        assert_eq!(
            offsets,
            vec![
                (0, "Bet".to_string()),
                (1000, "Bet".to_string()),
                (2010, "Bet".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let backend = Scripted::new(vec![
            (0, Err(BackendError::Status(429))),
            (0, Err(BackendError::Status(500))),
        ]);

        let out = fetch(backend.clone(), "Bet".to_string(), Config::default()).await;
        assert!(out.is_empty());
        assert_eq!(backend.calls().len(), 2);

        let backend = Scripted::new(vec![(0, Err(anyhow::anyhow!("connection reset").into()))]);
        let out = fetch(backend.clone(), "Bet".to_string(), Config::default()).await;
        assert!(out.is_empty());
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_is_honored() {
        let backend = Scripted::new(vec![
            (0, Err(BackendError::RateLimited)),
            (0, Err(BackendError::RateLimited)),
        ]);
        let config = Config {
            max_rate_limit_retries: Some(1),
            ..Default::default()
        };

        let out = fetch(backend.clone(), "Bet".to_string(), config).await;
        assert!(out.is_empty());
        assert_eq!(backend.calls().len(), 2);

        // Without retries, a rate-limit is answered like any other error.
        let backend = Scripted::new(vec![(0, Err(BackendError::RateLimited))]);
        let out = fetch(backend.clone(), "Bet".to_string(), Config::without_retry()).await;
        assert!(out.is_empty());
        assert_eq!(backend.calls().len(), 1);
    }
}
