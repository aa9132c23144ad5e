//! Lazy single-pass iteration over paged storage reads.

use std::collections::VecDeque;

use futures::future::BoxFuture;

use crate::error::EngineResult;

/// Opaque continuation token handed back by a paged fetch.
pub type PageToken = Vec<u8>;

/// One paged fetch: given the previous continuation token, produce the next
/// batch of items and the token for the page after it (if any).
pub type PaginationFn<T> =
    Box<dyn FnMut(Option<PageToken>) -> BoxFuture<'static, EngineResult<(Vec<T>, Option<PageToken>)>> + Send>;

/// Lazy iterator over a paged data source.
///
/// Pages are fetched on demand, one at a time, and never re-fetched; the
/// iterator is single-pass and not restartable.
pub struct PagingIterator<T> {
    fetch: PaginationFn<T>,
    buffer: VecDeque<T>,
    next_token: Option<PageToken>,
    exhausted: bool,
}

impl<T> PagingIterator<T> {
    pub fn new(fetch: PaginationFn<T>) -> Self {
        Self {
            fetch,
            buffer: VecDeque::new(),
            next_token: None,
            exhausted: false,
        }
    }

    /// Whether another item is available, fetching pages as needed.
    ///
    /// Empty pages carrying a continuation token are skipped until either an
    /// item or the end of the source is reached.
    pub async fn has_next(&mut self) -> EngineResult<bool> {
        while self.buffer.is_empty() && !self.exhausted {
            let (items, next_token) = (self.fetch)(self.next_token.take()).await?;
            self.buffer.extend(items);
            self.exhausted = next_token.is_none();
            self.next_token = next_token;
        }
        Ok(!self.buffer.is_empty())
    }

    /// Pop the next buffered item. Returns `None` when `has_next` has not
    /// buffered one.
    pub fn next(&mut self) -> Option<T> {
        self.buffer.pop_front()
    }
}
