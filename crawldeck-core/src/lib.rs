pub mod cache;
pub mod detail;
pub mod list;
pub mod mutation;
pub mod query;
pub mod report;
pub mod selection;
pub mod store;

pub use cache::{PollHandle, QueryCache, QueryState, Subscription};
pub use detail::{DetailSnapshot, DetailView};
pub use list::{ListSnapshot, ListView};
pub use mutation::{BulkSubmitReport, Mutations, Outcome, SkipReason};
pub use query::{QueryDescriptor, SortField, SortKey};
pub use selection::{Selection, SelectionRegistry};
pub use store::{Changes, CrawlStore, StoreOptions};
