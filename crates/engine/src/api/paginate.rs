//! Generic paginated-fetch driver
//!
//! Pulls pages from a source until a short page signals the end or
//! `max_items` is reached. A failure after the first page is logged and the
//! partial progress returned rather than discarded.

use super::{FetchError, FetchResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Courtesy delay between pages (the subgraph in particular rate-limits)
const PAGE_DELAY_MS: u64 = 100;

/// A paginated data source: given (offset, limit), one page of records
#[async_trait]
pub trait PagedSource {
    type Item: Send;

    async fn fetch_page(&self, offset: u64, limit: u64) -> FetchResult<Vec<Self::Item>>;
}

/// Result of draining a paged source
#[derive(Debug)]
pub struct PageOutcome<T> {
    pub items: Vec<T>,
    /// False when the drain stopped early on an error or cancellation
    pub complete: bool,
    pub pages_fetched: u32,
}

/// Drain a source page by page. Stops at a short page, at `max_items`, on
/// cancellation, or on error — in the last two cases partial progress is
/// still returned.
pub async fn fetch_all_pages<S: PagedSource>(
    source: &S,
    page_size: u64,
    max_items: usize,
    cancelled: &AtomicBool,
) -> PageOutcome<S::Item> {
    let mut items: Vec<S::Item> = Vec::new();
    let mut offset = 0u64;
    let mut pages = 0u32;

    loop {
        if cancelled.load(Ordering::Relaxed) {
            return PageOutcome {
                items,
                complete: false,
                pages_fetched: pages,
            };
        }

        let remaining = max_items.saturating_sub(items.len());
        if remaining == 0 {
            return PageOutcome {
                items,
                complete: true,
                pages_fetched: pages,
            };
        }
        let limit = page_size.min(remaining as u64);

        match source.fetch_page(offset, limit).await {
            Ok(page) => {
                pages += 1;
                let got = page.len() as u64;
                items.extend(page);
                if got < limit {
                    // Short page: end of data
                    return PageOutcome {
                        items,
                        complete: true,
                        pages_fetched: pages,
                    };
                }
                offset += got;
            }
            Err(FetchError::RateLimited) if items.is_empty() => {
                // Nothing collected yet: surface the rate limit to the caller
                // by returning an empty incomplete outcome
                warn!("Rate limited on first page");
                return PageOutcome {
                    items,
                    complete: false,
                    pages_fetched: pages,
                };
            }
            Err(e) => {
                warn!(error = %e, collected = items.len(), "Pagination stopped early");
                return PageOutcome {
                    items,
                    complete: false,
                    pages_fetched: pages,
                };
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(PAGE_DELAY_MS)).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// Emits `total` sequential numbers, optionally failing a given page
    struct CountingSource {
        total: u64,
        fail_on_page: Option<u32>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl PagedSource for CountingSource {
        type Item = u64;

        async fn fetch_page(&self, offset: u64, limit: u64) -> FetchResult<Vec<u64>> {
            let page_no = self.calls.fetch_add(1, Ordering::Relaxed);
            if Some(page_no) == self.fail_on_page {
                return Err(FetchError::Http(502));
            }
            let end = (offset + limit).min(self.total);
            Ok((offset..end).collect())
        }
    }

    #[tokio::test]
    async fn test_drains_to_short_page() {
        let source = CountingSource {
            total: 25,
            fail_on_page: None,
            calls: AtomicU32::new(0),
        };
        let outcome = fetch_all_pages(&source, 10, 1000, &AtomicBool::new(false)).await;
        assert!(outcome.complete);
        assert_eq!(outcome.items.len(), 25);
        assert_eq!(outcome.pages_fetched, 3);
    }

    #[tokio::test]
    async fn test_respects_max_items() {
        let source = CountingSource {
            total: 1000,
            fail_on_page: None,
            calls: AtomicU32::new(0),
        };
        let outcome = fetch_all_pages(&source, 10, 15, &AtomicBool::new(false)).await;
        assert!(outcome.complete);
        assert_eq!(outcome.items.len(), 15);
    }

    #[tokio::test]
    async fn test_partial_progress_on_late_failure() {
        let source = CountingSource {
            total: 100,
            fail_on_page: Some(2),
            calls: AtomicU32::new(0),
        };
        let outcome = fetch_all_pages(&source, 10, 1000, &AtomicBool::new(false)).await;
        assert!(!outcome.complete);
        assert_eq!(outcome.items.len(), 20);
    }

    #[tokio::test]
    async fn test_cancellation_returns_incomplete() {
        let source = CountingSource {
            total: 100,
            fail_on_page: None,
            calls: AtomicU32::new(0),
        };
        let cancelled = AtomicBool::new(true);
        let outcome = fetch_all_pages(&source, 10, 1000, &cancelled).await;
        assert!(!outcome.complete);
        assert!(outcome.items.is_empty());
    }
}
