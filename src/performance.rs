use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::protocol;

const MAX_SPANS: usize = 1_000;

/// The context used to start a new transaction.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    name: String,
    op: String,
    trace_id: protocol::TraceId,
    sampled: Option<bool>,
}

impl TransactionContext {
    /// Creates a new Transaction Context with the given `name` and `op`.
    #[must_use = "this must be used with `start_transaction`"]
    pub fn new(name: &str, op: &str) -> Self {
        TransactionContext {
            name: name.into(),
            op: op.into(),
            trace_id: Default::default(),
            sampled: None,
        }
    }

    /// Set the sampling decision for this Transaction.
    ///
    /// This can be either an explicit boolean flag, or [`None`], which will fall
    /// back to use the configured `traces_sample_rate` option.
    pub fn set_sampled(&mut self, sampled: impl Into<Option<bool>>) {
        self.sampled = sampled.into();
    }

    /// Returns the forced sampling decision, if any.
    pub fn sampled(&self) -> Option<bool> {
        self.sampled
    }

    /// Returns the transaction name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the operation.
    pub fn operation(&self) -> &str {
        &self.op
    }
}

/// Returned when a transaction is finished while child spans are still open.
#[derive(Debug, Error)]
#[error("transaction finished while {open_spans} child span(s) are still open")]
pub struct PrematureFinishError {
    open_spans: usize,
    transaction: Transaction,
}

impl PrematureFinishError {
    /// The number of spans that were not finished.
    pub fn open_spans(&self) -> usize {
        self.open_spans
    }

    /// Gives back the transaction so it can be finished later.
    pub fn into_transaction(self) -> Transaction {
        self.transaction
    }
}

#[derive(Debug)]
pub(crate) struct TransactionInner {
    sampled: bool,
    open_spans: usize,
    context: protocol::TraceContext,
    transaction: Option<protocol::Transaction>,
}

type TransactionArc = Arc<Mutex<TransactionInner>>;

/// A running transaction.
///
/// Transactions are started with
/// [`Client::start_transaction`](crate::Client::start_transaction) and must be
/// handed back to [`Client::finish_transaction`](crate::Client::finish_transaction)
/// to be sent. Every child span has to be finished first.
#[derive(Clone, Debug)]
pub struct Transaction {
    inner: TransactionArc,
}

impl Transaction {
    pub(crate) fn new(ctx: TransactionContext, sampled: bool) -> Self {
        let context = protocol::TraceContext {
            trace_id: ctx.trace_id,
            op: Some(ctx.op),
            ..Default::default()
        };

        Self {
            inner: Arc::new(Mutex::new(TransactionInner {
                sampled,
                open_spans: 0,
                context,
                transaction: Some(protocol::Transaction {
                    name: Some(ctx.name),
                    ..Default::default()
                }),
            })),
        }
    }

    /// Whether this transaction will be sent when finished.
    pub fn is_sampled(&self) -> bool {
        self.inner.lock().unwrap().sampled
    }

    /// The number of child spans that were started but not finished.
    pub fn open_spans(&self) -> usize {
        self.inner.lock().unwrap().open_spans
    }

    /// The trace this transaction belongs to.
    pub fn trace_id(&self) -> protocol::TraceId {
        self.inner.lock().unwrap().context.trace_id
    }

    /// Set some extra information to be sent with this Transaction.
    pub fn set_data(&self, key: &str, value: protocol::Value) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(transaction) = inner.transaction.as_mut() {
            transaction.extra.insert(key.into(), value);
        }
    }

    /// Starts a new child Span with the given `op` and `description`.
    ///
    /// The span must be explicitly finished via [`Span::finish`].
    #[must_use = "a span must be explicitly closed via `finish()`"]
    pub fn start_child(&self, op: &str, description: &str) -> Span {
        let mut inner = self.inner.lock().unwrap();
        inner.open_spans += 1;
        let span = protocol::Span {
            trace_id: inner.context.trace_id,
            parent_span_id: Some(inner.context.span_id),
            op: Some(op.into()),
            description: if description.is_empty() {
                None
            } else {
                Some(description.into())
            },
            ..Default::default()
        };
        Span {
            transaction: Arc::clone(&self.inner),
            span: Arc::new(Mutex::new(span)),
        }
    }

    /// Closes the transaction and returns the payload to send.
    ///
    /// `Ok(None)` means the transaction was not sampled.
    pub(crate) fn close(self) -> Result<Option<protocol::Transaction>, PrematureFinishError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.open_spans > 0 {
            let open_spans = inner.open_spans;
            drop(inner);
            return Err(PrematureFinishError {
                open_spans,
                transaction: self,
            });
        }
        let mut transaction = match inner.transaction.take() {
            Some(transaction) if inner.sampled => transaction,
            _ => return Ok(None),
        };
        transaction.finish();
        transaction
            .contexts
            .insert("trace".into(), inner.context.clone().into());
        Ok(Some(transaction))
    }
}

/// A running span.
///
/// The span needs to be explicitly finished via [`Span::finish`], otherwise
/// the transaction it belongs to cannot be finished.
#[derive(Clone, Debug)]
pub struct Span {
    transaction: TransactionArc,
    span: Arc<Mutex<protocol::Span>>,
}

impl Span {
    /// Set some extra information to be sent with this Span.
    pub fn set_data(&self, key: &str, value: protocol::Value) {
        let mut span = self.span.lock().unwrap();
        span.data.insert(key.into(), value);
    }

    /// Finishes the Span.
    ///
    /// This records the end timestamp and adds the span to the transaction
    /// in which it was started. Finishing a span twice has no effect.
    pub fn finish(self) {
        let mut span = self.span.lock().unwrap();
        if span.timestamp.is_some() {
            return;
        }
        span.finish();
        let mut inner = self.transaction.lock().unwrap();
        inner.open_spans = inner.open_spans.saturating_sub(1);
        if !inner.sampled {
            return;
        }
        if let Some(transaction) = inner.transaction.as_mut() {
            if transaction.spans.len() < MAX_SPANS {
                transaction.spans.push(span.clone());
            }
        }
    }

    /// Starts a new child Span with the given `op` and `description`.
    ///
    /// The span must be explicitly finished via [`Span::finish`].
    #[must_use = "a span must be explicitly closed via `finish()`"]
    pub fn start_child(&self, op: &str, description: &str) -> Span {
        let span = self.span.lock().unwrap();
        self.transaction.lock().unwrap().open_spans += 1;
        let span = protocol::Span {
            trace_id: span.trace_id,
            parent_span_id: Some(span.span_id),
            op: Some(op.into()),
            description: if description.is_empty() {
                None
            } else {
                Some(description.into())
            },
            ..Default::default()
        };
        Span {
            transaction: self.transaction.clone(),
            span: Arc::new(Mutex::new(span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction(sampled: bool) -> Transaction {
        Transaction::new(TransactionContext::new("checkout", "http.server"), sampled)
    }

    #[test]
    fn test_spans_are_collected() {
        let tx = transaction(true);
        let span = tx.start_child("db", "SELECT 1");
        let nested = span.start_child("db.fetch", "");
        assert_eq!(tx.open_spans(), 2);
        nested.finish();
        span.finish();
        assert_eq!(tx.open_spans(), 0);

        let payload = tx.close().unwrap().unwrap();
        assert_eq!(payload.name.as_deref(), Some("checkout"));
        assert_eq!(payload.spans.len(), 2);
        assert_eq!(payload.spans[0].op.as_deref(), Some("db.fetch"));
        assert_eq!(payload.spans[0].description, None);
        assert_eq!(
            payload.spans[1].parent_span_id,
            payload.trace_context().map(|t| t.span_id)
        );
        assert!(payload.timestamp.is_some());
    }

    #[test]
    fn test_open_span_blocks_close() {
        let tx = transaction(true);
        let span = tx.start_child("db", "");
        let err = tx.close().unwrap_err();
        assert_eq!(err.open_spans(), 1);

        span.finish();
        let tx = err.into_transaction();
        assert!(tx.close().unwrap().is_some());
    }

    #[test]
    fn test_double_finish_counts_once() {
        let tx = transaction(true);
        let span = tx.start_child("db", "");
        let other = tx.start_child("cache", "");
        span.clone().finish();
        span.finish();
        assert_eq!(tx.open_spans(), 1);
        other.finish();
        assert_eq!(tx.open_spans(), 0);
    }

    #[test]
    fn test_unsampled_close() {
        let tx = transaction(false);
        assert!(!tx.is_sampled());
        tx.start_child("db", "").finish();
        assert!(tx.close().unwrap().is_none());
    }
}
