use crate::cache::{PollHandle, QueryCache, Subscription};
use crate::query::QueryDescriptor;
use crate::selection::Selection;
use crawldeck_api::{ApiError, CrawlRecord, ListPage, Result};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// What a list front end renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListSnapshot {
    /// Server order, unchanged.
    pub records: Vec<CrawlRecord>,
    pub total: u64,
    pub page_count: u64,
    pub is_loading: bool,
    pub is_error: bool,
    pub error: Option<ApiError>,
    /// The records belong to the previous descriptor; the current one has
    /// not produced data yet.
    pub is_placeholder: bool,
}

struct Watch {
    descriptor: QueryDescriptor,
    placeholder: Option<ListPage>,
    _subscription: Subscription,
    _poller: Option<PollHandle>,
}

/// A paginated, sorted, filtered window onto the list cache.
///
/// The view keeps one subscription (and, when polling is enabled, one poller)
/// for its current descriptor. Both move with the descriptor and go away with
/// the view. Subscribing loads a descriptor that has no fresh data.
pub struct ListView {
    cache: QueryCache<QueryDescriptor, ListPage>,
    selection: Selection,
    poll_interval: Option<Duration>,
    watch: Mutex<Watch>,
}

impl ListView {
    pub(crate) fn new(
        cache: QueryCache<QueryDescriptor, ListPage>,
        descriptor: QueryDescriptor,
        selection: Selection,
        poll_interval: Option<Duration>,
    ) -> Self {
        let watch = Self::watch(&cache, descriptor, None, poll_interval);
        Self {
            cache,
            selection,
            poll_interval,
            watch: Mutex::new(watch),
        }
    }

    pub fn descriptor(&self) -> QueryDescriptor {
        self.lock().descriptor.clone()
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Moves the view to `descriptor`. A descriptor equal to the current one
    /// changes nothing.
    pub fn set_descriptor(&self, descriptor: QueryDescriptor) {
        let mut watch = self.lock();
        if watch.descriptor == descriptor {
            return;
        }

        let shown = self
            .cache
            .get(&watch.descriptor)
            .data
            .or_else(|| watch.placeholder.take());
        debug!(from = %watch.descriptor, to = %descriptor, "list view descriptor changed");

        // Assigning drops the old subscription and poller.
        *watch = Self::watch(&self.cache, descriptor, shown, self.poll_interval);
    }

    pub fn snapshot(&self) -> ListSnapshot {
        let mut watch = self.lock();
        let state = self.cache.get(&watch.descriptor);

        let (page, is_placeholder) = match state.data {
            Some(page) => {
                watch.placeholder = None;
                (page, false)
            }
            None => match &watch.placeholder {
                Some(previous) => (previous.clone(), true),
                None => (ListPage::default(), false),
            },
        };

        ListSnapshot {
            page_count: watch.descriptor.page_count(page.total),
            total: page.total,
            records: page.results,
            is_loading: state.is_loading,
            is_error: state.error.is_some(),
            error: state.error,
            is_placeholder,
        }
    }

    /// Loads the current descriptor unless fresh data is already cached.
    ///
    /// Returns `Ok(None)` if the descriptor changed while the request was
    /// out; that response is not this view's data any more.
    pub async fn load(&self) -> Result<Option<ListPage>> {
        let descriptor = self.descriptor();
        let result = self.cache.ensure(&descriptor).await;
        self.settle(&descriptor, result)
    }

    /// Re-fetches the current descriptor, joining a request already in flight.
    pub async fn refresh(&self) -> Result<Option<ListPage>> {
        let descriptor = self.descriptor();
        let result = self.cache.fetch(&descriptor).await;
        self.settle(&descriptor, result)
    }

    fn settle(
        &self,
        requested: &QueryDescriptor,
        result: Result<ListPage>,
    ) -> Result<Option<ListPage>> {
        if self.lock().descriptor != *requested {
            debug!(descriptor = %requested, "list response arrived after descriptor change");
            return Ok(None);
        }
        result.map(Some)
    }

    fn watch(
        cache: &QueryCache<QueryDescriptor, ListPage>,
        descriptor: QueryDescriptor,
        placeholder: Option<ListPage>,
        poll_interval: Option<Duration>,
    ) -> Watch {
        let subscription = cache.subscribe(&descriptor);
        let poller = poll_interval.map(|interval| cache.poll(&descriptor, interval));
        Watch {
            descriptor,
            placeholder,
            _subscription: subscription,
            _poller: poller,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Watch> {
        self.watch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
