use futures::future::{Either, Shared};
use futures::stream;
use futures::FutureExt;
use futures::Stream;
use futures::StreamExt;

use crate::stream::{LazyValue, RowStream};
use crate::{Error, Row, StructType};

/// The outcome of executing one statement: a count of affected rows and, for
/// queries, a lazy sequence of result rows.
///
/// The rows-updated count is cached: every subscriber observes the same
/// value (or the same error) and the statement is executed at most once. The
/// row sequence, by contrast, can be consumed exactly once — [`map`] and
/// [`rows`] take the result by value, so re-subscribing against a different
/// snapshot is not expressible.
///
/// [`map`]: SpannerResult::map
/// [`rows`]: SpannerResult::rows
pub struct SpannerResult {
    rows: Option<RowStream>,
    rows_updated: Shared<LazyValue<i64>>,
}

impl std::fmt::Debug for SpannerResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpannerResult").finish_non_exhaustive()
    }
}

impl SpannerResult {
    /// Result of a query: rows to stream, zero rows updated.
    pub(crate) fn query(rows: RowStream) -> Self {
        Self {
            rows: Some(rows),
            rows_updated: LazyValue::ready(Ok(0)).shared(),
        }
    }

    /// Result of a DML statement: no rows, a lazily computed update count.
    pub(crate) fn update(rows_updated: LazyValue<i64>) -> Self {
        Self {
            rows: None,
            rows_updated: rows_updated.shared(),
        }
    }

    /// Number of rows the statement changed; `0` for queries.
    ///
    /// The returned future can be obtained and awaited any number of times;
    /// all of them resolve to the same cached outcome.
    pub fn rows_updated(&self) -> Shared<LazyValue<i64>> {
        self.rows_updated.clone()
    }

    /// The underlying row sequence, if this result carries one.
    pub fn rows(self) -> Option<RowStream> {
        self.rows
    }

    /// Transforms every row through `f`, which receives the row and its
    /// metadata. Yields the empty sequence when the statement produced no
    /// rows (DML).
    pub fn map<T, F>(self, mut f: F) -> impl Stream<Item = Result<T, Error>>
    where
        F: FnMut(&Row, &StructType) -> T,
    {
        match self.rows {
            Some(rows) => Either::Left(rows.map(move |item| item.map(|row| f(&row, row.row_type())))),
            None => Either::Right(stream::empty()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures::StreamExt;
    use tokio::runtime::Handle;

    use super::*;

    #[tokio::test]
    async fn test_rows_updated_is_cached_across_subscribers() {
        let executions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&executions);

        let result = SpannerResult::update(LazyValue::spawn_with(Handle::current(), async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(3)
        }));

        let first = result.rows_updated();
        let second = result.rows_updated();
        assert_eq!(first.await.unwrap(), 3);
        assert_eq!(second.await.unwrap(), 3);
        assert_eq!(result.rows_updated().await.unwrap(), 3);
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_map_on_update_result_is_empty() {
        let result = SpannerResult::update(LazyValue::ready(Ok(1)));
        let mapped: Vec<_> = result.map(|_, _| ()).collect().await;
        assert!(mapped.is_empty());
    }

    #[tokio::test]
    async fn test_query_result_reports_zero_rows_updated() {
        let result = SpannerResult::query(RowStream::failed(Error::Closed));
        assert_eq!(result.rows_updated().await.unwrap(), 0);
    }
}
