//! Bounded scatter/gather for independent sub-units inside a phase.

use crate::cancellation::CancellationToken;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// What happened to one sub-unit.
#[derive(Debug, Clone, PartialEq)]
pub enum SubunitOutcome<T> {
    /// The unit produced a value.
    Completed(T),
    /// The unit returned an error or panicked.
    Failed(String),
    /// The unit was never started because the run was cancelled.
    Cancelled,
}

impl<T> SubunitOutcome<T> {
    /// Returns true for [`SubunitOutcome::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Runs `work` over `items` with at most `limit` units in flight.
///
/// Outcomes come back in input order. A failing or panicking unit never
/// affects its siblings. The token is checked before each unit starts;
/// units already in flight are allowed to finish.
pub async fn fan_out<I, T, F, Fut>(
    items: Vec<I>,
    limit: usize,
    token: &CancellationToken,
    work: F,
) -> Vec<SubunitOutcome<T>>
where
    F: Fn(usize, I) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let total = items.len();
    let limit = limit.max(1);
    let mut outcomes: Vec<Option<SubunitOutcome<T>>> = (0..total).map(|_| None).collect();
    let mut pending = items.into_iter().enumerate();
    let mut in_flight = FuturesUnordered::new();

    loop {
        while in_flight.len() < limit {
            let Some((index, item)) = pending.next() else {
                break;
            };
            if token.is_cancelled() {
                outcomes[index] = Some(SubunitOutcome::Cancelled);
                continue;
            }
            let unit = AssertUnwindSafe(work(index, item)).catch_unwind();
            in_flight.push(unit.map(move |result| (index, result)));
        }

        let Some((index, result)) = in_flight.next().await else {
            break;
        };
        let outcome = match result {
            Ok(Ok(value)) => SubunitOutcome::Completed(value),
            Ok(Err(e)) => {
                tracing::warn!(subunit = index, error = %format!("{e:#}"), "Sub-unit failed");
                SubunitOutcome::Failed(format!("{e:#}"))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(subunit = index, error = %message, "Sub-unit panicked");
                SubunitOutcome::Failed(format!("panicked: {message}"))
            }
        };
        outcomes[index] = Some(outcome);
    }

    outcomes
        .into_iter()
        .map(|o| o.unwrap_or(SubunitOutcome::Cancelled))
        .collect()
}

/// Best-effort text from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let token = CancellationToken::new();
        let outcomes = fan_out(vec![30u64, 1, 15], 3, &token, |_, ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ms)
        })
        .await;

        assert_eq!(
            outcomes,
            vec![
                SubunitOutcome::Completed(30),
                SubunitOutcome::Completed(1),
                SubunitOutcome::Completed(15),
            ]
        );
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let token = CancellationToken::new();
        let outcomes = fan_out(vec![1, 2, 3, 4], 2, &token, |i, n| async move {
            if i == 1 {
                anyhow::bail!("unit {n} broke");
            }
            if i == 2 {
                panic!("unit exploded");
            }
            Ok(n * 10)
        })
        .await;

        assert_eq!(outcomes[0], SubunitOutcome::Completed(10));
        assert_eq!(outcomes[1], SubunitOutcome::Failed("unit 2 broke".to_string()));
        assert_eq!(outcomes[2], SubunitOutcome::Failed("panicked: unit exploded".to_string()));
        assert_eq!(outcomes[3], SubunitOutcome::Completed(40));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let token = CancellationToken::new();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let outcomes = fan_out((0..8).collect(), 3, &token, |_, n: i32| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(n)
            }
        })
        .await;

        assert_eq!(outcomes.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_cancellation_stops_unstarted_units() {
        let token = Arc::new(CancellationToken::new());
        let started = Arc::new(AtomicUsize::new(0));

        let outcomes = fan_out(vec!["a", "b", "c"], 1, &token, |_, name| {
            let token = Arc::clone(&token);
            let started = Arc::clone(&started);
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                token.cancel("stop after first");
                Ok(name)
            }
        })
        .await;

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(outcomes[0], SubunitOutcome::Completed("a"));
        assert!(outcomes[1].is_cancelled());
        assert!(outcomes[2].is_cancelled());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let token = CancellationToken::new();
        let outcomes: Vec<SubunitOutcome<()>> =
            fan_out(Vec::<()>::new(), 4, &token, |_, ()| async { Ok(()) }).await;
        assert!(outcomes.is_empty());
    }
}
