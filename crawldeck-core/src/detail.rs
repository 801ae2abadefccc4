use crate::cache::{QueryCache, Subscription};
use crawldeck_api::{ApiError, CrawlRecord, RecordId, Result};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailSnapshot {
    pub record: Option<CrawlRecord>,
    pub is_loading: bool,
    pub is_error: bool,
    pub error: Option<ApiError>,
}

struct Focus {
    id: Option<RecordId>,
    _subscription: Option<Subscription>,
}

/// One record, fetched when the view is created or its id changes, and
/// re-fetched only after invalidation.
pub struct DetailView {
    cache: QueryCache<RecordId, CrawlRecord>,
    focus: Mutex<Focus>,
}

impl DetailView {
    pub(crate) fn new(cache: QueryCache<RecordId, CrawlRecord>, id: Option<RecordId>) -> Self {
        let focus = Self::focus(&cache, id);
        Self {
            cache,
            focus: Mutex::new(focus),
        }
    }

    pub fn id(&self) -> Option<RecordId> {
        self.lock().id
    }

    pub fn set_id(&self, id: Option<RecordId>) {
        let mut focus = self.lock();
        if focus.id == id {
            return;
        }
        debug!(from = ?focus.id, to = ?id, "detail view id changed");
        *focus = Self::focus(&self.cache, id);
    }

    /// Without an id the view is empty, idle and not in error.
    pub fn snapshot(&self) -> DetailSnapshot {
        let Some(id) = self.id() else {
            return DetailSnapshot::default();
        };
        let state = self.cache.get(&id);
        DetailSnapshot {
            record: state.data,
            is_loading: state.is_loading,
            is_error: state.error.is_some(),
            error: state.error,
        }
    }

    /// Fetches the record unless a fresh copy is cached.
    ///
    /// Returns `Ok(None)` when there is no id, or when the id changed before
    /// the response arrived.
    pub async fn load(&self) -> Result<Option<CrawlRecord>> {
        let Some(id) = self.id() else {
            return Ok(None);
        };
        let result = self.cache.ensure(&id).await;

        if self.id() != Some(id) {
            debug!(%id, "detail response arrived after id change");
            return Ok(None);
        }
        result.map(Some)
    }

    fn focus(cache: &QueryCache<RecordId, CrawlRecord>, id: Option<RecordId>) -> Focus {
        Focus {
            id,
            _subscription: id.map(|id| cache.subscribe(&id)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Focus> {
        self.focus.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
