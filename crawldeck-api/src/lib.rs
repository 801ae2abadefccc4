pub mod config;
pub mod error;
pub mod record;
pub mod transport;

pub use config::ClientConfig;
pub use error::{ApiError, Result};
pub use record::{Ack, BrokenLink, CrawlRecord, CrawlStatus, ListPage, RecordId, SubmitAck};
pub use transport::{ApiClient, CallOptions, ListParams};
