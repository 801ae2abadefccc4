use crate::cache::{DEFAULT_IDLE_EVICTION, DEFAULT_POLL_INTERVAL, QueryCache};
use crate::detail::DetailView;
use crate::list::ListView;
use crate::mutation::{BulkSubmitReport, Mutations, Outcome};
use crate::query::QueryDescriptor;
use crate::selection::SelectionRegistry;
use crawldeck_api::{Ack, ApiClient, CrawlRecord, ListPage, RecordId, Result, SubmitAck};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub poll_interval: Duration,
    pub idle_eviction: Duration,
    /// When off, list views only fetch on demand.
    pub polling_enabled: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            idle_eviction: DEFAULT_IDLE_EVICTION,
            polling_enabled: true,
        }
    }
}

/// Entry point of the core: one transport, the list and record caches, and
/// the selections handed out to list views.
#[derive(Clone)]
pub struct CrawlStore {
    client: ApiClient,
    lists: QueryCache<QueryDescriptor, ListPage>,
    records: QueryCache<RecordId, CrawlRecord>,
    selections: SelectionRegistry,
    mutations: Mutations,
    options: StoreOptions,
}

impl CrawlStore {
    pub fn new(client: ApiClient) -> Self {
        Self::with_options(client, StoreOptions::default())
    }

    pub fn with_options(client: ApiClient, options: StoreOptions) -> Self {
        let list_client = client.clone();
        let lists = QueryCache::with_idle_window(
            move |descriptor: QueryDescriptor| {
                let client = list_client.clone();
                async move { client.list(&descriptor.to_params()).await }
            },
            options.idle_eviction,
        );

        let record_client = client.clone();
        let records = QueryCache::with_idle_window(
            move |id: RecordId| {
                let client = record_client.clone();
                async move { client.detail(id).await }
            },
            options.idle_eviction,
        );

        let selections = SelectionRegistry::new();
        let mutations = Mutations::new(
            client.clone(),
            lists.clone(),
            records.clone(),
            selections.clone(),
        );

        Self {
            client,
            lists,
            records,
            selections,
            mutations,
            options,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// A list view with its own fresh selection. The page starts loading
    /// right away unless it is already cached.
    pub fn list_view(&self, descriptor: QueryDescriptor) -> ListView {
        let poll_interval = self
            .options
            .polling_enabled
            .then_some(self.options.poll_interval);
        ListView::new(
            self.lists.clone(),
            descriptor,
            self.selections.create(),
            poll_interval,
        )
    }

    pub fn detail_view(&self, id: Option<RecordId>) -> DetailView {
        DetailView::new(self.records.clone(), id)
    }

    pub fn mutations(&self) -> &Mutations {
        &self.mutations
    }

    pub async fn submit(&self, url: &str) -> Result<Outcome<SubmitAck>> {
        self.mutations.submit(url).await
    }

    pub async fn bulk_submit<I, S>(&self, urls: I) -> Result<Outcome<BulkSubmitReport>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mutations.bulk_submit(urls).await
    }

    pub async fn bulk_delete(&self, ids: &[RecordId]) -> Result<Outcome<Ack>> {
        self.mutations.bulk_delete(ids).await
    }

    pub async fn bulk_rerun(&self, ids: &[RecordId]) -> Result<Outcome<Ack>> {
        self.mutations.bulk_rerun(ids).await
    }

    /// Wakes whenever a list or a record in either cache changes.
    pub fn changes(&self) -> Changes {
        Changes {
            lists: self.lists.changes(),
            records: self.records.changes(),
        }
    }
}

/// Change notifications from both caches of a [`CrawlStore`].
#[derive(Debug)]
pub struct Changes {
    lists: watch::Receiver<u64>,
    records: watch::Receiver<u64>,
}

impl Changes {
    /// Waits for the next change. Returns `false` once the store is gone.
    pub async fn changed(&mut self) -> bool {
        tokio::select! {
            changed = self.lists.changed() => changed.is_ok(),
            changed = self.records.changed() => changed.is_ok(),
        }
    }
}
