pub mod dashboard;

pub use dashboard::{Dashboard, DashboardMessage, LogLevel, run_dashboard};
