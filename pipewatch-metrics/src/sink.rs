use std::error::Error;

use async_trait::async_trait;

use crate::{MetricBatch, MetricPoint};

/// An error returned by a [`MetricSink`] for a single call.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The backend could not be reached or the call timed out.
    #[error("could not send metrics")]
    Transport(#[source] Box<dyn Error + Send + Sync>),
    /// The backend responded with an error.
    #[error("metrics backend rejected the call with status {status}: {message}")]
    Rejected {
        /// The HTTP status code.
        status: u16,
        /// The error message returned by the backend.
        message: String,
    },
    /// The call exceeded the number of points the sink accepts.
    #[error("call with {0} points exceeds the per-call limit")]
    TooManyPoints(usize),
}

/// The metrics ingestion backend.
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Publishes a slice of points into a namespace in a single call.
    async fn put_metrics(&self, namespace: &str, points: &[&MetricPoint]) -> Result<(), SinkError>;
}

/// Result of flushing a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Number of calls made to the sink.
    pub calls: usize,
    /// Number of points in calls that succeeded.
    pub sent: usize,
    /// Number of points in calls that failed.
    pub failed: usize,
}

impl FlushOutcome {
    /// Returns `true` if every call succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Sends all points of a batch in calls of at most `max_per_call` points.
///
/// A failed call is logged and does not stop the remaining calls.
pub async fn flush(sink: &dyn MetricSink, batch: &MetricBatch, max_per_call: usize) -> FlushOutcome {
    let mut outcome = FlushOutcome::default();

    for chunk in batch.chunks(max_per_call) {
        outcome.calls += 1;

        match sink.put_metrics(batch.namespace(), &chunk).await {
            Ok(()) => outcome.sent += chunk.len(),
            Err(error) => {
                pipewatch_log::error!(
                    namespace = batch.namespace(),
                    points = chunk.len(),
                    error = &error as &dyn Error,
                    "failed to publish metrics",
                );
                outcome.failed += chunk.len();
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::MetricUnit;

    #[derive(Default)]
    struct FlakySink {
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl MetricSink for FlakySink {
        async fn put_metrics(
            &self,
            _namespace: &str,
            points: &[&MetricPoint],
        ) -> Result<(), SinkError> {
            let mut calls = self.calls.lock();
            calls.push(points.len());

            // Every second call fails.
            if calls.len() % 2 == 0 {
                return Err(SinkError::Rejected {
                    status: 400,
                    message: "Throttling".to_owned(),
                });
            }

            Ok(())
        }
    }

    #[tokio::test]
    async fn test_flush_continues_after_failure() {
        let mut batch = MetricBatch::new("GlueCM");
        for i in 0..5 {
            batch
                .push(MetricPoint::new(format!("m{i}"), 1.0, MetricUnit::Count))
                .unwrap();
        }

        let sink = FlakySink::default();
        let outcome = flush(&sink, &batch, 2).await;

        assert_eq!(*sink.calls.lock(), [2, 2, 1]);
        assert_eq!(
            outcome,
            FlushOutcome {
                calls: 3,
                sent: 3,
                failed: 2
            }
        );
        assert!(!outcome.is_complete());
    }

    #[tokio::test]
    async fn test_flush_empty_batch() {
        let sink = FlakySink::default();
        let outcome = flush(&sink, &MetricBatch::new("GlueCM"), 10).await;

        assert_eq!(outcome, FlushOutcome::default());
        assert!(sink.calls.lock().is_empty());
    }
}
