//! Streams of values released on a virtual-time schedule,
//! for driving pipelines in tests and scripted scenarios.
use futures::Stream;
use std::time::Duration;
use tokio::time::Instant;

/// Build a Stream which yields each value at its offset from when
/// the Stream is first polled. Values with equal offsets are yielded
/// in their given order.
///
/// The Stream ends at `complete_at` if it's later than the last offset,
/// and otherwise immediately after the last value is yielded.
pub fn stream<T>(mut values: Vec<(Duration, T)>, complete_at: Duration) -> impl Stream<Item = T>
where
    T: Send + 'static,
{
    // Stable sort: values of equal offset keep their relative order.
    values.sort_by_key(|(at, _)| *at);
    let last = values.last().map(|(at, _)| *at).unwrap_or_default();

    futures::stream::unfold(
        (None, values.into_iter()),
        move |(started, mut it): (Option<Instant>, std::vec::IntoIter<(Duration, T)>)| async move {
            let started = started.unwrap_or_else(Instant::now);

            match it.next() {
                Some((at, value)) => {
                    tokio::time::sleep_until(offset(started, at)).await;
                    Some((value, (Some(started), it)))
                }
                None => {
                    if complete_at > last {
                        tokio::time::sleep_until(offset(started, complete_at)).await;
                    }
                    None
                }
            }
        },
    )
}

// Offsets too large to represent are never reached.
fn offset(started: Instant, at: Duration) -> Instant {
    started
        .checked_add(at)
        .unwrap_or_else(|| crate::debounce::deadline_after(at))
}

/// Convenience for building a `stream()` of queries from millisecond offsets.
pub fn queries(values: &[(u64, &str)], complete_at_ms: u64) -> impl Stream<Item = String> {
    stream(
        values
            .iter()
            .map(|(ms, query)| (Duration::from_millis(*ms), query.to_string()))
            .collect(),
        Duration::from_millis(complete_at_ms),
    )
}
