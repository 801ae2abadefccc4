//! Create, delete and re-run, followed by cache and selection reconciliation.
//!
//! A mutation touches the cache only after the server confirmed it. On
//! failure nothing local changes and the error is handed back as is.

use crate::cache::QueryCache;
use crate::query::QueryDescriptor;
use crate::selection::SelectionRegistry;
use crawldeck_api::{Ack, ApiClient, ApiError, CrawlRecord, ListPage, RecordId, Result, SubmitAck};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{info, warn};

/// Why an action did not reach the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyUrl,
    NoUrls,
    NoIds,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EmptyUrl => f.write_str("no URL given"),
            SkipReason::NoUrls => f.write_str("no URLs to submit"),
            SkipReason::NoIds => f.write_str("nothing selected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Done(T),
    Skipped(SkipReason),
}

impl<T> Outcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(value) => Some(value),
            Outcome::Skipped(_) => None,
        }
    }
}

/// Per-address result of a bulk submit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSubmitReport {
    pub accepted: Vec<(String, SubmitAck)>,
    pub rejected: Vec<(String, ApiError)>,
}

impl BulkSubmitReport {
    pub fn total(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }
}

#[derive(Clone)]
pub struct Mutations {
    client: ApiClient,
    lists: QueryCache<QueryDescriptor, ListPage>,
    records: QueryCache<RecordId, CrawlRecord>,
    selections: SelectionRegistry,
}

impl Mutations {
    pub(crate) fn new(
        client: ApiClient,
        lists: QueryCache<QueryDescriptor, ListPage>,
        records: QueryCache<RecordId, CrawlRecord>,
        selections: SelectionRegistry,
    ) -> Self {
        Self {
            client,
            lists,
            records,
            selections,
        }
    }

    /// Submits one address for analysis. Returns as soon as the server has
    /// accepted it; the record then starts out queued.
    pub async fn submit(&self, url: &str) -> Result<Outcome<SubmitAck>> {
        let url = url.trim();
        if url.is_empty() {
            return Ok(Outcome::Skipped(SkipReason::EmptyUrl));
        }

        match self.client.create(url).await {
            Ok(ack) => {
                info!("Submitted {} for analysis", url);
                self.lists.invalidate_all();
                Ok(Outcome::Done(ack))
            }
            Err(e) => {
                warn!("Submitting {} failed: {}", url, e);
                Err(e)
            }
        }
    }

    /// Submits each distinct non-blank address in turn, carrying on past
    /// individual failures. Fails only when every address was rejected.
    pub async fn bulk_submit<I, S>(&self, urls: I) -> Result<Outcome<BulkSubmitReport>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = BTreeSet::new();
        let urls: Vec<String> = urls
            .into_iter()
            .map(|url| url.as_ref().trim().to_string())
            .filter(|url| !url.is_empty() && seen.insert(url.clone()))
            .collect();
        if urls.is_empty() {
            return Ok(Outcome::Skipped(SkipReason::NoUrls));
        }

        let mut report = BulkSubmitReport::default();
        for url in urls {
            match self.client.create(&url).await {
                Ok(ack) => report.accepted.push((url, ack)),
                Err(e) => {
                    warn!("Submitting {} failed: {}", url, e);
                    report.rejected.push((url, e));
                }
            }
        }

        if report.accepted.is_empty() {
            let (_, first) = report.rejected.swap_remove(0);
            return Err(first);
        }

        info!(
            "Submitted {} of {} URLs for analysis",
            report.accepted.len(),
            report.total()
        );
        self.lists.invalidate_all();
        Ok(Outcome::Done(report))
    }

    /// Deletes `ids`. On success every list is invalidated, the records are
    /// dropped from the cache and the ids leave every live selection.
    pub async fn bulk_delete(&self, ids: &[RecordId]) -> Result<Outcome<Ack>> {
        let ids = distinct(ids);
        if ids.is_empty() {
            return Ok(Outcome::Skipped(SkipReason::NoIds));
        }

        match self.client.delete(&ids).await {
            Ok(ack) => {
                info!("Deleted {} record(s)", ids.len());
                self.lists.invalidate_all();
                for id in &ids {
                    self.records.forget(id);
                }
                self.selections.scrub(&ids);
                Ok(Outcome::Done(ack))
            }
            Err(e) => {
                warn!("Deleting {} record(s) failed: {}", ids.len(), e);
                Err(e)
            }
        }
    }

    /// Queues `ids` for another analysis run. Selections are left alone.
    pub async fn bulk_rerun(&self, ids: &[RecordId]) -> Result<Outcome<Ack>> {
        let ids = distinct(ids);
        if ids.is_empty() {
            return Ok(Outcome::Skipped(SkipReason::NoIds));
        }

        match self.client.rerun(&ids).await {
            Ok(ack) => {
                info!("Re-run requested for {} record(s)", ids.len());
                self.lists.invalidate_all();
                let rerun: BTreeSet<RecordId> = ids.iter().copied().collect();
                self.records.invalidate_where(|id| rerun.contains(id));
                Ok(Outcome::Done(ack))
            }
            Err(e) => {
                warn!("Re-run of {} record(s) failed: {}", ids.len(), e);
                Err(e)
            }
        }
    }
}

fn distinct(ids: &[RecordId]) -> Vec<RecordId> {
    ids.iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
