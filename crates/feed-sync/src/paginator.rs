use std::collections::HashSet;

use feed_protocol::Page;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::{Cursor, SharedCache, Stored};
use crate::error::FetchError;
use crate::events::{CacheEvent, Notifier};
use crate::keys::PartitionKey;
use crate::source::PageSource;

/// Outcome of [`Paginator::fetch_next_page`].
#[derive(Debug)]
pub enum FetchStatus {
    Loaded { added: usize, exhausted: bool },
    /// Another fetch for the same partition is still running. No I/O was done.
    Busy,
    /// The partition already holds its last page. No I/O was done.
    Exhausted,
    /// The partition was reset while the page was in flight; the page was dropped.
    Discarded,
    /// The read failed; cache state is untouched and a retry is safe.
    Failed(FetchError),
}

impl FetchStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, FetchStatus::Loaded { .. })
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            FetchStatus::Exhausted | FetchStatus::Loaded { exhausted: true, .. }
        )
    }
}

/// Drives paged reads into the cache, one in-flight fetch per partition.
pub struct Paginator {
    cache: SharedCache,
    notifier: Notifier,
    in_flight: Mutex<HashSet<PartitionKey>>,
}

/// Clears the busy flag however the fetch future ends, including being dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<PartitionKey>>,
    key: PartitionKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

impl Paginator {
    pub fn new(cache: SharedCache, notifier: Notifier) -> Self {
        Self {
            cache,
            notifier,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_in_flight(&self, key: &PartitionKey) -> bool {
        self.in_flight.lock().contains(key)
    }

    /// Loads the partition's next page from `source` and merges it at the tail.
    pub async fn fetch_next_page(&self, key: &PartitionKey, source: &dyn PageSource) -> FetchStatus {
        if self.cache.lock().is_exhausted(key) {
            debug!(partition = %key, "partition exhausted; skipping fetch");
            return FetchStatus::Exhausted;
        }
        let Some(_guard) = self.begin(key) else {
            debug!(partition = %key, "fetch already in flight");
            return FetchStatus::Busy;
        };
        // Read under the guard so a fetch that finished just before it was
        // taken is seen.
        let (epoch, cursor) = {
            let mut cache = self.cache.lock();
            let partition = cache.open_partition(key);
            (partition.epoch(), partition.cursor())
        };
        if cursor.exhausted {
            return FetchStatus::Exhausted;
        }

        let page_index = cursor.next_page;
        let merged = match key {
            PartitionKey::Feed(scope) => source
                .fetch_requests(*scope, page_index)
                .await
                .map(|page| self.merge(key, epoch, page_index, page)),
            PartitionKey::Responses(request_id) => source
                .fetch_responses(request_id, page_index)
                .await
                .map(|page| self.merge(key, epoch, page_index, page)),
        };

        match merged {
            Ok(status) => status,
            Err(err) => {
                warn!(partition = %key, page = page_index, error = %err, "page fetch failed");
                FetchStatus::Failed(err)
            }
        }
    }

    fn begin(&self, key: &PartitionKey) -> Option<InFlight<'_>> {
        if !self.in_flight.lock().insert(key.clone()) {
            return None;
        }
        Some(InFlight {
            set: &self.in_flight,
            key: key.clone(),
        })
    }

    fn merge<T: Stored>(
        &self,
        key: &PartitionKey,
        epoch: u64,
        page_index: u32,
        page: Page<T>,
    ) -> FetchStatus {
        let exhausted = page.is_last();
        let cursor = Cursor {
            next_page: page_index.saturating_add(1),
            exhausted,
        };
        let merged = self.cache.lock().merge_page(key, epoch, page.items, cursor);
        match merged {
            Some(added) => {
                debug!(partition = %key, page = page_index, added, exhausted, "page merged");
                self.notifier.emit(CacheEvent::PartitionChanged(key.clone()));
                FetchStatus::Loaded { added, exhausted }
            }
            None => {
                debug!(partition = %key, page = page_index, "partition reset during fetch; page dropped");
                FetchStatus::Discarded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::cache::EntityCache;
    use crate::keys::FeedScope;
    use crate::testing::{page, request, response, ScriptedSource};

    const GLOBAL: PartitionKey = PartitionKey::Feed(FeedScope::Global);

    fn paginator() -> (Paginator, SharedCache, Notifier) {
        let cache = EntityCache::shared();
        let notifier = Notifier::new(16);
        (
            Paginator::new(cache.clone(), notifier.clone()),
            cache,
            notifier,
        )
    }

    fn ids(cache: &SharedCache, scope: FeedScope) -> Vec<String> {
        cache
            .lock()
            .requests(scope)
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    #[tokio::test]
    async fn exhausted_partition_does_no_io() {
        let (paginator, cache, _) = paginator();
        let source = ScriptedSource::default();
        source.push_requests(FeedScope::Global, page(vec![request("p1", "ana")], 0, 1));

        let status = paginator.fetch_next_page(&GLOBAL, &source).await;
        assert!(matches!(
            status,
            FetchStatus::Loaded {
                added: 1,
                exhausted: true
            }
        ));
        assert!(cache.lock().is_exhausted(&GLOBAL));

        let again = paginator.fetch_next_page(&GLOBAL, &source).await;
        assert!(matches!(again, FetchStatus::Exhausted));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn overlapping_fetches_make_one_call() {
        let (paginator, cache, _) = paginator();
        let (source, gate) = ScriptedSource::gated();
        source.push_requests(FeedScope::Global, page(vec![request("p1", "ana")], 0, 3));

        let first = paginator.fetch_next_page(&GLOBAL, &source);
        let second = async {
            let status = paginator.fetch_next_page(&GLOBAL, &source).await;
            gate.add_permits(1);
            status
        };
        let (first, second) = tokio::join!(first, second);

        assert!(first.is_loaded());
        assert!(matches!(second, FetchStatus::Busy));
        assert_eq!(source.calls(), 1);
        assert!(!paginator.is_in_flight(&GLOBAL));
        assert_eq!(ids(&cache, FeedScope::Global), ["p1"]);
    }

    #[tokio::test]
    async fn failure_leaves_cursor_untouched() {
        let (paginator, cache, _) = paginator();
        let source = ScriptedSource::default();
        source.fail_requests(FeedScope::Global, "boom");
        source.push_requests(FeedScope::Global, page(vec![request("p1", "ana")], 0, 2));

        let status = paginator.fetch_next_page(&GLOBAL, &source).await;
        assert!(matches!(status, FetchStatus::Failed(FetchError::Source(_))));
        let cursor = cache.lock().partition(&GLOBAL).map(|p| p.cursor());
        assert_eq!(cursor, Some(Cursor::default()));

        let retry = paginator.fetch_next_page(&GLOBAL, &source).await;
        assert!(matches!(
            retry,
            FetchStatus::Loaded {
                added: 1,
                exhausted: false
            }
        ));
        let cursor = cache.lock().partition(&GLOBAL).map(|p| p.cursor());
        assert_eq!(
            cursor,
            Some(Cursor {
                next_page: 1,
                exhausted: false
            })
        );
    }

    #[tokio::test]
    async fn page_landing_after_reset_is_discarded() {
        let (paginator, cache, _) = paginator();
        let (source, gate) = ScriptedSource::gated();
        source.push_requests(FeedScope::Global, page(vec![request("p1", "ana")], 0, 1));

        let fetch = paginator.fetch_next_page(&GLOBAL, &source);
        let reset = async {
            tokio::task::yield_now().await;
            cache.lock().reset(&GLOBAL);
            gate.add_permits(1);
        };
        let (status, ()) = tokio::join!(fetch, reset);

        assert!(matches!(status, FetchStatus::Discarded));
        assert!(cache.lock().partition(&GLOBAL).is_none());
        assert!(cache.lock().request("p1").is_none());
    }

    #[tokio::test]
    async fn dropped_fetch_clears_busy_flag() {
        let (paginator, _, _) = paginator();
        let (source, gate) = ScriptedSource::gated();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), paginator.fetch_next_page(&GLOBAL, &source))
                .await;
        assert!(abandoned.is_err());
        assert!(!paginator.is_in_flight(&GLOBAL));

        source.push_requests(FeedScope::Global, page(vec![request("p1", "ana")], 0, 1));
        gate.add_permits(1);
        let status = paginator.fetch_next_page(&GLOBAL, &source).await;
        assert!(status.is_loaded());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_callers_never_refetch_a_page() {
        const PAGES: u64 = 40;
        let (paginator, cache, _) = paginator();
        let paginator = Arc::new(paginator);
        let source = Arc::new(ScriptedSource::default());
        for index in 0..PAGES {
            let item = request(&format!("p{index}"), "ana");
            source.push_requests(FeedScope::Global, page(vec![item], index, PAGES));
        }

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let paginator = paginator.clone();
                let source = source.clone();
                tokio::spawn(async move {
                    loop {
                        match paginator.fetch_next_page(&GLOBAL, source.as_ref()).await {
                            FetchStatus::Exhausted | FetchStatus::Failed(_) => break,
                            _ => tokio::task::yield_now().await,
                        }
                    }
                })
            })
            .collect();
        for caller in callers {
            caller.await.expect("caller task");
        }

        let requested = source.requested_pages();
        let expected: Vec<u32> = (0..PAGES as u32).collect();
        assert_eq!(requested, expected);
        assert_eq!(cache.lock().requests(FeedScope::Global).len(), PAGES as usize);
    }

    #[tokio::test]
    async fn cursor_does_not_overflow_at_last_page_index() {
        let (paginator, cache, _) = paginator();
        {
            let mut cache = cache.lock();
            let epoch = cache.open_partition(&GLOBAL).epoch();
            let cursor = Cursor {
                next_page: u32::MAX,
                exhausted: false,
            };
            cache.merge_page::<feed_protocol::Request>(&GLOBAL, epoch, Vec::new(), cursor);
        }
        let source = ScriptedSource::default();
        source.push_requests(FeedScope::Global, page(vec![request("p1", "ana")], 0, 5));

        let status = paginator.fetch_next_page(&GLOBAL, &source).await;
        assert!(status.is_loaded());
        let cursor = cache.lock().partition(&GLOBAL).map(|p| p.cursor());
        assert_eq!(cursor.map(|c| c.next_page), Some(u32::MAX));
    }

    #[tokio::test]
    async fn response_pages_merge_and_notify() {
        let (paginator, cache, notifier) = paginator();
        let mut events = notifier.subscribe();
        let source = ScriptedSource::default();
        let key = PartitionKey::responses("r1");
        source.push_responses("r1", page(vec![response("s1", "r1"), response("s2", "r1")], 0, 2));

        let status = paginator.fetch_next_page(&key, &source).await;
        assert!(status.is_exhausted());
        let listed: Vec<String> = cache.lock().responses("r1").into_iter().map(|r| r.id).collect();
        assert_eq!(listed, ["s1", "s2"]);
        assert_eq!(events.try_recv().ok(), Some(CacheEvent::PartitionChanged(key)));
    }
}
