//! Span helper for façade calls.
//!
//! Each façade method opens an `info_span!` named after the operation and
//! carrying `axiom.<resource>_id` fields, then runs the call inside it via
//! [`traced`]. A failure is recorded as an `error` event within the span.

use crate::error::Error;
use std::future::Future;
use tracing::{Instrument, Span};

/// Runs `call` inside `span` and records a failure as an error event.
pub async fn traced<T, F>(span: Span, call: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    async move {
        let result = call.await;
        if let Err(e) = &result {
            tracing::error!(
                error = %e,
                kind = ?e.kind(),
                status = ?e.status(),
                trace_id = ?e.trace_id(),
                "axiom call failed"
            );
        }
        result
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_results_through() {
        let ok = traced(tracing::info_span!("test.ok"), async { Ok::<_, Error>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = traced(tracing::info_span!("test.err", axiom.dataset_id = "logs"), async {
            Err::<(), _>(Error::UnprivilegedToken)
        })
        .await;
        assert!(matches!(err, Err(Error::UnprivilegedToken)));
    }
}
