// Plain-text and JSON renderings of crawl records

use crate::list::ListSnapshot;
use chrono::{DateTime, Utc};
use crawldeck_api::{CrawlRecord, CrawlStatus};
use serde::{Deserialize, Serialize};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";
const TITLE_PENDING: &str = "Fetching title...";
const HEADING_LEVELS: [&str; 6] = ["H1", "H2", "H3", "H4", "H5", "H6"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Title column of the list table. Records still being analysed have none.
pub fn display_title(record: &CrawlRecord) -> &str {
    if record.page_title.trim().is_empty() {
        match record.status {
            CrawlStatus::Error => "-",
            _ => TITLE_PENDING,
        }
    } else {
        &record.page_title
    }
}

pub fn generate_record_report(record: &CrawlRecord) -> String {
    let mut report = String::new();

    report.push_str(RULE);
    report.push('\n');
    report.push_str(&format!("  {} {}\n", record.status.emoji(), record.url));
    report.push_str(RULE);
    report.push_str("\n\n");

    report.push_str(&format!("ID:            {}\n", record.id));
    report.push_str(&format!("Status:        {} {}\n", record.status.emoji(), record.status));
    if let Some(created) = record.created_at {
        report.push_str(&format!("Submitted:     {}\n", format_timestamp(&created)));
    }
    if let Some(updated) = record.updated_at {
        report.push_str(&format!("Updated:       {}\n", format_timestamp(&updated)));
    }

    if !record.status.is_terminal() {
        report.push_str("\nAnalysis in progress; results appear once it completes.\n");
        return report;
    }

    if record.status == CrawlStatus::Error {
        let message = if record.error_message.is_empty() {
            "unknown error"
        } else {
            record.error_message.as_str()
        };
        report.push_str(&format!("Error:         {}\n", message));
    }

    report.push_str(&format!("Page Title:    {}\n", or_dash(&record.page_title)));
    report.push_str(&format!("HTML Version:  {}\n", or_dash(&record.html_version)));
    report.push_str(&format!(
        "Login Form:    {}\n",
        if record.has_login_form { "Yes" } else { "No" }
    ));

    report.push('\n');
    report.push_str(RULE);
    report.push_str("\nHEADINGS\n");
    report.push_str(RULE);
    report.push_str("\n\n");
    for level in HEADING_LEVELS {
        let count = record.headings.get(level).copied().unwrap_or(0);
        report.push_str(&format!("  {}  {}\n", level, count));
    }

    report.push('\n');
    report.push_str(RULE);
    report.push_str("\nLINKS\n");
    report.push_str(RULE);
    report.push_str("\n\n");
    report.push_str(&format!("  Internal:      {}\n", record.internal_links_count));
    report.push_str(&format!("  External:      {}\n", record.external_links_count));
    report.push_str(&format!("  Inaccessible:  {}\n", record.inaccessible_links_count));
    match record.link_distribution() {
        Some((internal, external)) => report.push_str(&format!(
            "  Distribution:  {:.1}% internal / {:.1}% external\n",
            internal, external
        )),
        None => report.push_str("  Distribution:  no links found\n"),
    }

    report.push_str("\nBroken Links:\n");
    if record.broken_links.is_empty() {
        report.push_str("  No broken links found.\n");
    } else {
        for link in &record.broken_links {
            report.push_str(&format!("  [{}] {}\n", link.status_code, link.url));
        }
    }

    report
}

pub fn generate_record_json(record: &CrawlRecord) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(record)
}

/// Aligned table of one list page, followed by a page indicator.
pub fn generate_list_table(snapshot: &ListSnapshot, page_index: u64) -> String {
    if snapshot.records.is_empty() {
        return "No results found.\n".to_string();
    }

    let title_width = snapshot
        .records
        .iter()
        .map(|r| truncate(display_title(r), 40).chars().count())
        .max()
        .unwrap_or(0)
        .max("TITLE".len());

    let mut table = String::new();
    table.push_str(&format!(
        "{:>6}  {:<12}  {:<title_width$}  {:<12}  {:>8}  {:>8}\n",
        "ID", "STATUS", "TITLE", "HTML", "INTERNAL", "EXTERNAL",
    ));

    for record in &snapshot.records {
        let status = format!("{} {}", record.status.emoji(), record.status);
        table.push_str(&format!(
            "{:>6}  {:<12}  {:<title_width$}  {:<12}  {:>8}  {:>8}\n",
            record.id,
            status,
            truncate(display_title(record), 40),
            or_dash(&record.html_version),
            record.internal_links_count,
            record.external_links_count,
        ));
    }

    let pages = snapshot.page_count.max(1);
    table.push_str(&format!(
        "\nPage {} of {} ({} total)\n",
        (page_index + 1).min(pages),
        pages,
        snapshot.total
    ));
    table
}

pub fn generate_list_json(snapshot: &ListSnapshot) -> Result<String, serde_json::Error> {
    let json = serde_json::json!({
        "results": snapshot.records,
        "total": snapshot.total,
        "page_count": snapshot.page_count,
    });
    serde_json::to_string_pretty(&json)
}

fn or_dash(value: &str) -> &str {
    if value.trim().is_empty() { "-" } else { value }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
