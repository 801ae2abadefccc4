use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Server-assigned identity of a crawl record.
///
/// Accepted on the wire both as a JSON number and as a decimal string, the
/// latter being what the service returns from its create endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    /// Returns `None` for zero; ids are always positive.
    pub fn new(id: u64) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: u64 = s
            .trim()
            .parse()
            .map_err(|e| format!("invalid record id '{}': {}", s, e))?;
        RecordId::new(n).ok_or_else(|| format!("invalid record id '{}': must be positive", s))
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Number(u64),
            Text(String),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Number(n) => {
                RecordId::new(n).ok_or_else(|| de::Error::custom("record id must be positive"))
            }
            Wire::Text(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

/// Processing state of a record, owned by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Error,
    #[serde(other)]
    Unknown,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Queued => "queued",
            CrawlStatus::Running => "running",
            CrawlStatus::Completed => "completed",
            CrawlStatus::Error => "error",
            CrawlStatus::Unknown => "unknown",
        }
    }

    /// `completed` and `error` end a pass; only a re-run leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CrawlStatus::Completed | CrawlStatus::Error)
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            CrawlStatus::Completed => "✅",
            CrawlStatus::Error => "❌",
            CrawlStatus::Queued => "⏳",
            CrawlStatus::Running => "⚙️",
            CrawlStatus::Unknown => "❓",
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenLink {
    pub url: String,
    #[serde(alias = "statusCode")]
    pub status_code: u16,
}

/// One analysed URL as reported by the service.
///
/// Analysis fields are only meaningful once [`CrawlStatus::is_terminal`];
/// before that they hold their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRecord {
    #[serde(alias = "ID")]
    pub id: RecordId,
    #[serde(alias = "URL")]
    pub url: String,
    #[serde(alias = "Status", default)]
    pub status: CrawlStatus,
    #[serde(alias = "PageTitle", default, deserialize_with = "null_as_default")]
    pub page_title: String,
    #[serde(alias = "HTMLVersion", default, deserialize_with = "null_as_default")]
    pub html_version: String,
    #[serde(alias = "Headings", default, deserialize_with = "null_as_default")]
    pub headings: BTreeMap<String, u64>,
    #[serde(alias = "InternalLinksCount", default, deserialize_with = "null_as_default")]
    pub internal_links_count: u64,
    #[serde(alias = "ExternalLinksCount", default, deserialize_with = "null_as_default")]
    pub external_links_count: u64,
    #[serde(alias = "InaccessibleLinksCount", default, deserialize_with = "null_as_default")]
    pub inaccessible_links_count: u64,
    #[serde(alias = "BrokenLinks", default, deserialize_with = "null_as_default")]
    pub broken_links: Vec<BrokenLink>,
    #[serde(alias = "HasLoginForm", default, deserialize_with = "null_as_default")]
    pub has_login_form: bool,
    #[serde(alias = "ErrorMessage", default, deserialize_with = "null_as_default")]
    pub error_message: String,
    #[serde(alias = "CreatedAt", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(alias = "UpdatedAt", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CrawlRecord {
    /// A freshly submitted record: queued, nothing analysed yet.
    pub fn queued(id: RecordId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            status: CrawlStatus::Queued,
            page_title: String::new(),
            html_version: String::new(),
            headings: BTreeMap::new(),
            internal_links_count: 0,
            external_links_count: 0,
            inaccessible_links_count: 0,
            broken_links: Vec::new(),
            has_login_form: false,
            error_message: String::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn total_links(&self) -> u64 {
        self.internal_links_count + self.external_links_count
    }

    /// Internal and external share of all links, in percent.
    pub fn link_distribution(&self) -> Option<(f64, f64)> {
        let total = self.total_links();
        if total == 0 {
            return None;
        }
        let internal = self.internal_links_count as f64 * 100.0 / total as f64;
        Some((internal, 100.0 - internal))
    }

    /// Case-insensitive match against url, page title and status.
    pub fn matches_search(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }
        self.url.to_lowercase().contains(&term)
            || self.page_title.to_lowercase().contains(&term)
            || self.status.as_str().contains(&term)
    }
}

/// One page of the list endpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ListPage {
    pub results: Vec<CrawlRecord>,
    pub total: u64,
}

/// Raw list payload. The paged shape is preferred; a bare array is what older
/// service builds return.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ListResponse {
    Paged {
        #[serde(default, deserialize_with = "null_as_default")]
        results: Vec<CrawlRecord>,
        #[serde(default)]
        total: Option<u64>,
    },
    Bare(Vec<CrawlRecord>),
}

impl ListResponse {
    /// Normalises into a [`ListPage`]. Without a server total, the count is
    /// taken to end at this page.
    pub fn into_page(self, offset: u64) -> ListPage {
        match self {
            ListResponse::Paged { results, total } => {
                let total = total.unwrap_or(offset + results.len() as u64);
                ListPage { results, total }
            }
            ListResponse::Bare(results) => ListPage {
                total: offset + results.len() as u64,
                results,
            },
        }
    }
}

/// Acknowledgement of a create request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct SubmitAck {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub id: Option<RecordId>,
}

/// Generic acknowledgement of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
