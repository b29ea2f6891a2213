use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::ready;
use futures::Stream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::result_set::{CursorStep, RowCursor};
use crate::{Error, Row};

/// How many rows may sit between the cursor driver and the consumer. When the
/// buffer is full the driver parks, which stops pulling the gRPC stream.
pub(crate) const ROW_BUFFER: usize = 32;

/// A cold, single-emission value.
///
/// Nothing happens at construction: the wrapped work is shipped to the
/// adapter's executor on first poll. Dropping the value before completion
/// aborts the spawned task, which in turn drops (and thereby cancels) any
/// in-flight RPC. A `LazyValue` can be awaited once; wrap it in
/// [`futures::future::Shared`] where replay is required.
pub struct LazyValue<T: Send + 'static> {
    state: LazyState<T>,
}

impl<T: Send + 'static> std::fmt::Debug for LazyValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyValue").finish_non_exhaustive()
    }
}

enum LazyState<T> {
    /// Result known without any work; handed out on first poll.
    Ready(Option<Result<T, Error>>),
    Deferred {
        executor: Handle,
        work: Option<BoxFuture<'static, Result<T, Error>>>,
    },
    Running(JoinHandle<Result<T, Error>>),
    Finished,
}

impl<T: Send + 'static> LazyValue<T> {
    /// A lazy value that will run `work` on `executor` once polled.
    pub(crate) fn spawn_with(
        executor: Handle,
        work: impl Future<Output = Result<T, Error>> + Send + 'static,
    ) -> Self {
        Self {
            state: LazyState::Deferred {
                executor,
                work: Some(Box::pin(work)),
            },
        }
    }

    /// A lazy value that resolves without doing any work.
    pub(crate) fn ready(value: Result<T, Error>) -> Self {
        Self {
            state: LazyState::Ready(Some(value)),
        }
    }
}

impl<T: Send + Unpin + 'static> Future for LazyValue<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                LazyState::Ready(value) => {
                    let value = value.take().unwrap_or_else(|| {
                        Err(Error::Client("lazy value polled twice".to_string()))
                    });
                    this.state = LazyState::Finished;
                    return Poll::Ready(value);
                }
                LazyState::Deferred { executor, work } => {
                    let task = match work.take() {
                        Some(work) => executor.spawn(work),
                        None => {
                            return Poll::Ready(Err(Error::Client(
                                "lazy value polled twice".to_string(),
                            )))
                        }
                    };
                    this.state = LazyState::Running(task);
                }
                LazyState::Running(task) => {
                    let joined = ready!(Pin::new(task).poll(cx));
                    this.state = LazyState::Finished;
                    return Poll::Ready(match joined {
                        Ok(result) => result,
                        // the executor was shut down underneath the task
                        Err(join_error) if join_error.is_cancelled() => Err(Error::Closed),
                        Err(join_error) => Err(Error::Client(format!(
                            "executor task failed: {join_error}"
                        ))),
                    });
                }
                LazyState::Finished => return Poll::Pending,
            }
        }
    }
}

impl<T: Send + 'static> Drop for LazyValue<T> {
    fn drop(&mut self) {
        if let LazyState::Running(task) = &self.state {
            task.abort();
        }
    }
}

/// A cold, cancellable sequence of rows.
///
/// The driver task that pulls the server cursor is spawned on the adapter's
/// executor at first poll; until then no RPC is issued. Dropping the stream
/// aborts the driver, which cancels the server-side call. Once a terminal
/// (end-of-rows or error) has been observed, no further items are produced.
pub struct RowStream {
    rows: mpsc::Receiver<Result<Row, Error>>,
    driver: DriverState,
}

enum DriverState {
    Deferred {
        executor: Handle,
        driver: Option<BoxFuture<'static, ()>>,
    },
    Running(JoinHandle<()>),
    Finished,
}

impl RowStream {
    /// A stream fed by `driver`, which is handed the sending half and runs on
    /// `executor` from the first poll onwards.
    pub(crate) fn spawn_with(
        executor: Handle,
        driver: BoxFuture<'static, ()>,
        rows: mpsc::Receiver<Result<Row, Error>>,
    ) -> Self {
        Self {
            rows,
            driver: DriverState::Deferred {
                executor,
                driver: Some(driver),
            },
        }
    }

    /// A stream that only reports `error`.
    pub(crate) fn failed(error: Error) -> Self {
        let (sender, rows) = mpsc::channel(1);
        let _ = sender.try_send(Err(error));
        Self {
            rows,
            driver: DriverState::Finished,
        }
    }
}

impl Stream for RowStream {
    type Item = Result<Row, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let DriverState::Deferred { executor, driver } = &mut this.driver {
            let executor = executor.clone();
            let driver = driver.take();
            this.driver = match driver {
                Some(driver) => DriverState::Running(executor.spawn(driver)),
                None => DriverState::Finished,
            };
        }
        this.rows.poll_recv(cx)
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        if let DriverState::Running(task) = &self.driver {
            task.abort();
        }
    }
}

/// The cursor-to-sink pump: advances the cursor one step at a time and feeds
/// whole rows to the channel.
///
/// Terminals are exclusive: after the sequence completes or errors the sink
/// is never signalled again. When the consumer goes away the cursor is
/// cancelled instead of drained.
pub(crate) async fn drive_cursor(mut cursor: RowCursor, rows: mpsc::Sender<Result<Row, Error>>) {
    loop {
        match cursor.step().await {
            Ok(CursorStep::Done) => break,
            Ok(CursorStep::NotReady) => continue,
            Ok(CursorStep::Row(row)) => {
                if rows.send(Ok(row)).await.is_err() {
                    cursor.cancel();
                    break;
                }
            }
            Err(error) => {
                let _ = rows.send(Err(error)).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn test_lazy_value_does_no_work_until_polled() {
        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);

        let lazy = LazyValue::spawn_with(Handle::current(), async move {
            flag.store(true, Ordering::SeqCst);
            Ok(42i64)
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!started.load(Ordering::SeqCst));

        assert_eq!(lazy.await.unwrap(), 42);
        assert!(started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_lazy_value_ready() {
        assert_eq!(LazyValue::ready(Ok(7i64)).await.unwrap(), 7);
        assert_matches!(
            LazyValue::<i64>::ready(Err(Error::Closed)).await,
            Err(Error::Closed)
        );
    }

    #[tokio::test]
    async fn test_dropping_lazy_value_aborts_the_task() {
        struct SetOnDrop(Arc<AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(Arc::clone(&dropped));

        let mut lazy = LazyValue::spawn_with(Handle::current(), async move {
            let _guard = guard;
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1i64)
        });

        // first poll spawns the task, then the value is dropped mid-flight
        assert!(futures::poll!(&mut lazy).is_pending());
        drop(lazy);

        for _ in 0..100 {
            if dropped.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task was not aborted");
    }

    #[tokio::test]
    async fn test_failed_row_stream_reports_the_error_once() {
        let mut stream = RowStream::failed(Error::Closed);
        assert_matches!(stream.next().await, Some(Err(Error::Closed)));
        assert_matches!(stream.next().await, None);
    }
}
