//! Pull-based cursors over streamed query results.
//!
//! A [`DbCursor`] owns the row stream of one query, and through it the pooled
//! connection the query runs on. Rows are pulled one at a time. The stream,
//! and with it the connection, is released exactly once: when the rows run
//! out, when the engine reports an error, on [`DbCursor::close`], or on drop.

use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures::future::poll_fn;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use sqlx::any::AnyRow;
use sqlx::Row;
use tracing::{debug, warn};

use crate::error::{Result, StorageError};

type RowStream<T> = BoxStream<'static, Result<T>>;

/// Something holding database resources that can be released early.
pub trait Release: Send + Sync {
    /// Release the held resources. Returns `false` if they were already released.
    fn release(&self) -> Result<bool>;
}

/// Shared slot holding a cursor's row stream until release.
struct CursorSlot<T> {
    rows: Mutex<Option<RowStream<T>>>,
}

impl<T> CursorSlot<T> {
    fn poll_row(&self, cx: &mut Context<'_>) -> Poll<Option<Result<T>>> {
        let mut rows = match self.rows.lock() {
            Ok(guard) => guard,
            Err(_) => {
                return Poll::Ready(Some(Err(StorageError::CursorRelease(
                    "cursor lock poisoned".to_string(),
                ))))
            }
        };
        match rows.as_mut() {
            Some(stream) => stream.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}

impl<T: Send> Release for CursorSlot<T> {
    fn release(&self) -> Result<bool> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StorageError::CursorRelease("cursor lock poisoned".to_string()))?;
        match rows.take() {
            Some(stream) => {
                drop(stream);
                debug!("Cursor released");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Lazily advancing cursor over query results.
///
/// [`has_next`](Self::has_next) pulls one row and memoizes the outcome;
/// [`next`](Self::next) hands out the memoized row. Records are immutable,
/// so there is no way to remove through a cursor.
pub struct DbCursor<T> {
    slot: Arc<CursorSlot<T>>,
    pending: Option<T>,
    has_next: Option<bool>,
    fetch_size: Option<usize>,
}

impl<T: Send + 'static> DbCursor<T> {
    /// Wrap a row stream. `fetch_size` is a streaming hint, never a limit.
    pub fn new(rows: RowStream<T>, fetch_size: Option<usize>) -> Self {
        Self {
            slot: Arc::new(CursorSlot {
                rows: Mutex::new(Some(rows)),
            }),
            pending: None,
            has_next: None,
            fetch_size,
        }
    }

    /// A cursor that yields nothing.
    pub fn empty() -> Self {
        Self::new(futures::stream::empty().boxed(), None)
    }

    /// Handle through which an owner can release this cursor early.
    pub fn release_handle(&self) -> Arc<dyn Release> {
        self.slot.clone()
    }
}

impl<T> DbCursor<T> {
    pub fn fetch_size(&self) -> Option<usize> {
        self.fetch_size
    }

    /// Whether another element is available.
    ///
    /// Repeated calls without an intervening [`next`](Self::next) do not
    /// advance the underlying rows. Once the rows are exhausted the cursor
    /// releases its resources.
    pub async fn has_next(&mut self) -> Result<bool> {
        if let Some(memoized) = self.has_next {
            return Ok(memoized);
        }

        let slot = &self.slot;
        match poll_fn(|cx| slot.poll_row(cx)).await {
            Some(Ok(item)) => {
                self.pending = Some(item);
                self.has_next = Some(true);
                Ok(true)
            }
            Some(Err(e)) => {
                self.has_next = Some(false);
                Err(self.release_after_error(e))
            }
            None => {
                self.has_next = Some(false);
                self.release_slot()?;
                Ok(false)
            }
        }
    }

    /// Take the next element, advancing first if needed.
    pub async fn next(&mut self) -> Result<T> {
        if !self.has_next().await? {
            return Err(StorageError::NoSuchElement);
        }
        self.has_next = None;
        self.pending.take().ok_or(StorageError::NoSuchElement)
    }

    /// Release the cursor before exhaustion. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        self.pending = None;
        self.has_next = Some(false);
        self.release_slot()
    }

    /// Drain the remaining elements into a vector.
    pub async fn collect_remaining(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while self.has_next().await? {
            items.push(self.next().await?);
        }
        Ok(items)
    }

    fn release_slot(&self) -> Result<()> {
        let mut rows = self
            .slot
            .rows
            .lock()
            .map_err(|_| StorageError::CursorRelease("cursor lock poisoned".to_string()))?;
        if rows.take().is_some() {
            debug!("Cursor released");
        }
        Ok(())
    }

    /// Release after the rows failed. A failing release is reported together
    /// with the row error.
    fn release_after_error(&self, error: StorageError) -> StorageError {
        match self.release_slot() {
            Ok(()) => error,
            Err(release) => {
                warn!(error = %release, "Cursor release failed after row error");
                StorageError::Cleanup(vec![error, release])
            }
        }
    }
}

// Elements are never pinned in place; the stream itself is boxed.
impl<T> Unpin for DbCursor<T> {}

impl<T> Stream for DbCursor<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(item) = this.pending.take() {
            this.has_next = None;
            return Poll::Ready(Some(Ok(item)));
        }
        if this.has_next == Some(false) {
            return Poll::Ready(None);
        }

        match this.slot.poll_row(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(item))) => {
                this.has_next = None;
                Poll::Ready(Some(Ok(item)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.has_next = Some(false);
                Poll::Ready(Some(Err(this.release_after_error(e))))
            }
            Poll::Ready(None) => {
                this.has_next = Some(false);
                match this.release_slot() {
                    Ok(()) => Poll::Ready(None),
                    Err(e) => Poll::Ready(Some(Err(e))),
                }
            }
        }
    }
}

/// Decodes one typed value from a result row.
pub trait ColumnReader<T>: Send + Sync + 'static {
    fn read(&self, row: &AnyRow) -> Result<T>;
}

/// Reads a 32-bit integer column by name.
#[derive(Debug, Clone)]
pub struct IntReader(pub String);

impl ColumnReader<i32> for IntReader {
    fn read(&self, row: &AnyRow) -> Result<i32> {
        let value = row.try_get::<i64, _>(self.0.as_str())?;
        i32::try_from(value).map_err(|_| {
            StorageError::Database(sqlx::Error::ColumnDecode {
                index: self.0.clone(),
                source: format!("{value} does not fit into i32").into(),
            })
        })
    }
}

/// Row decoder for a cursor over one column.
pub fn single<T, A>(reader: A) -> impl Fn(&AnyRow) -> Result<T> + Send + Sync + 'static
where
    T: 'static,
    A: ColumnReader<T>,
{
    move |row| reader.read(row)
}

/// Row decoder for a cursor over two columns.
pub fn pair<A, B, RA, RB>(
    first: RA,
    second: RB,
) -> impl Fn(&AnyRow) -> Result<(A, B)> + Send + Sync + 'static
where
    A: 'static,
    B: 'static,
    RA: ColumnReader<A>,
    RB: ColumnReader<B>,
{
    move |row| Ok((first.read(row)?, second.read(row)?))
}

/// Tracks cursors handed out by a storage so they can be released together.
#[derive(Default)]
pub struct CursorRegistry {
    open: Mutex<Vec<Weak<dyn Release>>>,
}

impl CursorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a cursor. Entries for cursors already dropped are pruned.
    pub fn register(&self, handle: Arc<dyn Release>) -> Result<()> {
        let mut open = self
            .open
            .lock()
            .map_err(|_| StorageError::CursorRelease("registry lock poisoned".to_string()))?;
        open.retain(|weak| weak.strong_count() > 0);
        open.push(Arc::downgrade(&handle));
        Ok(())
    }

    /// Number of tracked cursors whose owners are still alive.
    pub fn live_count(&self) -> usize {
        self.open
            .lock()
            .map(|open| open.iter().filter(|weak| weak.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Release every tracked cursor.
    ///
    /// Keeps going after a failure; all failures are reported together.
    pub fn close_all(&self) -> Result<usize> {
        let handles: Vec<Weak<dyn Release>> = {
            let mut open = self
                .open
                .lock()
                .map_err(|_| StorageError::CursorRelease("registry lock poisoned".to_string()))?;
            std::mem::take(&mut *open)
        };

        let mut released = 0;
        let mut errors = Vec::new();
        for handle in handles.iter().filter_map(Weak::upgrade) {
            match handle.release() {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(released)
        } else {
            Err(StorageError::Cleanup(errors))
        }
    }
}
