use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use crawldeck_api::config::{API_KEY_VAR, BASE_URL_VAR};
use crawldeck_api::{ApiClient, ClientConfig, CrawlStatus, RecordId};
use crawldeck_core::report::{
    ReportFormat, generate_list_json, generate_list_table, generate_record_json,
    generate_record_report,
};
use crawldeck_core::{
    BulkSubmitReport, CrawlStore, ListSnapshot, Outcome, QueryDescriptor, SortField, SortKey,
    StoreOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Load URLs from either a file or a single URL argument
pub fn load_urls_from_source(
    url: Option<&String>,
    file: Option<&PathBuf>,
) -> Result<Vec<String>, String> {
    if let Some(path) = file {
        load_urls_from_file(path)
    } else if let Some(url) = url {
        parse_url_line(url.trim())
            .map(|url| vec![url])
            .ok_or_else(|| format!("'{}' is not a valid URL", url))
    } else {
        Err("Either a URL or --file must be provided".to_string())
    }
}

/// Load and parse URLs from a newline-delimited file
pub fn load_urls_from_file(path: &PathBuf) -> Result<Vec<String>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read URL file {}: {}", path.display(), e))?;

    let urls: Vec<String> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| parse_url_line(line.trim()))
        .collect();

    if urls.is_empty() {
        return Err(format!("No valid URLs found in {}", path.display()));
    }

    Ok(urls)
}

/// Parse a single line as a URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    if let Ok(url) = Url::parse(line)
        && matches!(url.scheme(), "http" | "https")
        && url.host_str().is_some()
    {
        return Some(line.to_string());
    }

    let with_scheme = format!("http://{}", line);
    if let Ok(url) = Url::parse(&with_scheme)
        && url.host_str().is_some()
    {
        return Some(with_scheme);
    }

    eprintln!("⚠️  Skipping invalid URL '{}'", line);
    None
}

/// Record ids from the command line. Zero is never a valid id.
pub fn parse_ids<'a, I>(values: I) -> Result<Vec<RecordId>, String>
where
    I: IntoIterator<Item = &'a u64>,
{
    values
        .into_iter()
        .map(|raw| RecordId::new(*raw).ok_or_else(|| format!("Invalid record id: {}", raw)))
        .collect()
}

/// Builds the list query from `--limit`, `--offset`/`--page`, `--sort`,
/// `--desc` and `--filter`.
pub fn descriptor_from_args(args: &ArgMatches) -> Result<QueryDescriptor, String> {
    let limit = args.get_one::<u64>("limit").copied().unwrap_or(10);
    let offset = match (args.get_one::<u64>("offset"), args.get_one::<u64>("page")) {
        (Some(offset), _) => *offset,
        (None, Some(page)) => page.saturating_sub(1).saturating_mul(limit),
        (None, None) => 0,
    };

    let field = match args.get_one::<String>("sort") {
        Some(name) => {
            SortField::from_str(name).ok_or_else(|| format!("Unknown sort column: {}", name))?
        }
        None => SortField::default(),
    };
    let sort_by = SortKey {
        field,
        descending: args.get_flag("desc"),
    };
    let filter = args.get_one::<String>("filter").map_or("", String::as_str);

    Ok(QueryDescriptor::new(limit, offset, sort_by, filter))
}

/// Reads `--base-url`, `--api-key`, `--timeout` (or their environment
/// variables) and `--user-agent` into a client configuration.
pub fn client_config_from_args(args: &ArgMatches) -> Result<ClientConfig> {
    let base_url = args
        .get_one::<String>("base-url")
        .ok_or_else(|| anyhow!("No service URL configured; pass --base-url or set {}", BASE_URL_VAR))?;
    let api_key = args
        .get_one::<String>("api-key")
        .ok_or_else(|| anyhow!("No API key configured; pass --api-key or set {}", API_KEY_VAR))?;
    let timeout = args.get_one::<u64>("timeout").copied().unwrap_or(30);

    let mut config = ClientConfig::new(base_url, api_key.as_str())?
        .with_timeout(Duration::from_secs(timeout));
    if let Some(user_agent) = args.get_one::<String>("user-agent") {
        config = config.with_user_agent(user_agent.as_str());
    }
    Ok(config)
}

pub fn build_store(config: ClientConfig, options: StoreOptions) -> Result<CrawlStore> {
    debug!(base_url = %config.base_url, ?options, "building store");
    let client = ApiClient::new(config).context("Failed to set up the HTTP client")?;
    Ok(CrawlStore::with_options(client, options))
}

/// Installs the stderr log subscriber. `RUST_LOG` wins over `-v`.
pub fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // A subscriber may already be installed, e.g. by a test harness.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn print_banner() {
    println!(
        "{} {}",
        "crawldeck".bright_cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
    println!("{}", "Page analysis at your fingertips".bright_black());
    println!();
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(message.into());
    spinner
}

fn report_format(args: &ArgMatches) -> ReportFormat {
    args.get_one::<String>("format")
        .and_then(|format| ReportFormat::from_str(format))
        .unwrap_or_default()
}

fn without_polling() -> StoreOptions {
    StoreOptions {
        polling_enabled: false,
        ..StoreOptions::default()
    }
}

pub async fn handle_submit(config: ClientConfig, args: &ArgMatches) -> Result<()> {
    let urls = load_urls_from_source(args.get_one::<String>("URL"), args.get_one::<PathBuf>("file"))
        .map_err(|e| anyhow!(e))?;
    let store = build_store(config, without_polling())?;

    if let [url] = urls.as_slice() {
        let progress = spinner(format!("Submitting {}", url));
        let outcome = store.submit(url).await;
        progress.finish_and_clear();

        match outcome? {
            Outcome::Done(ack) => {
                let id = ack.id.map(|id| format!(" as #{}", id)).unwrap_or_default();
                println!("{} Submitted {}{}", "✓".green().bold(), url.bright_white(), id);
                println!(
                    "{} {}",
                    "→".blue(),
                    ack.message.as_deref().unwrap_or("Analysis queued")
                );
            }
            Outcome::Skipped(reason) => println!("{} Nothing submitted: {}", "→".yellow().bold(), reason),
        }
        return Ok(());
    }

    let progress = spinner(format!("Submitting {} URLs", urls.len()));
    let outcome = store.bulk_submit(&urls).await;
    progress.finish_and_clear();

    match outcome? {
        Outcome::Done(report) => print_submit_report(&report),
        Outcome::Skipped(reason) => println!("{} Nothing submitted: {}", "→".yellow().bold(), reason),
    }
    Ok(())
}

fn print_submit_report(report: &BulkSubmitReport) {
    for (url, ack) in &report.accepted {
        let id = ack.id.map(|id| format!(" #{}", id)).unwrap_or_default();
        println!("  {} {}{}", "✓".green(), url.bright_white(), id.cyan());
    }
    for (url, error) in &report.rejected {
        println!("  {} {} {}", "✗".red(), url.bright_white(), error.to_string().red());
    }
    println!();
    println!(
        "{} {} of {} URLs submitted",
        "✓".green().bold(),
        report.accepted.len().to_string().cyan(),
        report.total().to_string().cyan()
    );
}

pub async fn handle_list(config: ClientConfig, args: &ArgMatches) -> Result<()> {
    let descriptor = descriptor_from_args(args).map_err(|e| anyhow!(e))?;
    let store = build_store(config, without_polling())?;
    let view = store.list_view(descriptor.clone());

    let progress = spinner("Fetching results...");
    let loaded = view.load().await;
    progress.finish_and_clear();
    loaded?;

    let snapshot = view.snapshot();
    match report_format(args) {
        ReportFormat::Json => println!("{}", generate_list_json(&snapshot)?),
        ReportFormat::Text => print_list(&snapshot, &descriptor),
    }
    Ok(())
}

fn print_list(snapshot: &ListSnapshot, descriptor: &QueryDescriptor) {
    let completed = snapshot
        .records
        .iter()
        .filter(|r| r.status == CrawlStatus::Completed)
        .count();
    let in_progress = snapshot
        .records
        .iter()
        .filter(|r| !r.status.is_terminal())
        .count();

    print!("{}", generate_list_table(snapshot, descriptor.page_index()));
    if !snapshot.records.is_empty() {
        println!(
            "{} completed, {} in progress on this page",
            completed.to_string().green(),
            in_progress.to_string().yellow()
        );
    }
}

pub async fn handle_show(config: ClientConfig, args: &ArgMatches) -> Result<()> {
    let raw = args.get_one::<u64>("ID").copied().unwrap_or_default();
    let id = RecordId::new(raw).ok_or_else(|| anyhow!("Invalid record id: {}", raw))?;
    let store = build_store(config, without_polling())?;
    let view = store.detail_view(Some(id));

    let progress = spinner(format!("Fetching record #{}", id));
    let loaded = view.load().await;
    progress.finish_and_clear();

    let record = loaded?.ok_or_else(|| anyhow!("Record #{} was not returned", id))?;
    match report_format(args) {
        ReportFormat::Json => println!("{}", generate_record_json(&record)?),
        ReportFormat::Text => print!("{}", generate_record_report(&record)),
    }
    Ok(())
}

pub async fn handle_delete(config: ClientConfig, args: &ArgMatches) -> Result<()> {
    let ids = parse_ids(args.get_many::<u64>("ID").into_iter().flatten()).map_err(|e| anyhow!(e))?;
    let store = build_store(config, without_polling())?;

    let progress = spinner(format!("Deleting {} record(s)", ids.len()));
    let outcome = store.bulk_delete(&ids).await;
    progress.finish_and_clear();

    match outcome? {
        Outcome::Done(ack) => println!(
            "{} {}",
            "✓".green().bold(),
            ack.message
                .unwrap_or_else(|| format!("Deleted {} record(s)", ids.len()))
        ),
        Outcome::Skipped(reason) => println!("{} Nothing deleted: {}", "→".yellow().bold(), reason),
    }
    Ok(())
}

pub async fn handle_rerun(config: ClientConfig, args: &ArgMatches) -> Result<()> {
    let ids = parse_ids(args.get_many::<u64>("ID").into_iter().flatten()).map_err(|e| anyhow!(e))?;
    let store = build_store(config, without_polling())?;

    let progress = spinner(format!("Re-running {} record(s)", ids.len()));
    let outcome = store.bulk_rerun(&ids).await;
    progress.finish_and_clear();

    match outcome? {
        Outcome::Done(ack) => println!(
            "{} {}",
            "✓".green().bold(),
            ack.message
                .unwrap_or_else(|| format!("Re-run requested for {} record(s)", ids.len()))
        ),
        Outcome::Skipped(reason) => println!("{} Nothing re-run: {}", "→".yellow().bold(), reason),
    }
    Ok(())
}

/// Polls one list page and reprints it whenever its content changes, until
/// Ctrl-C.
pub async fn handle_watch(config: ClientConfig, args: &ArgMatches) -> Result<()> {
    let descriptor = descriptor_from_args(args).map_err(|e| anyhow!(e))?;
    let interval = args.get_one::<u64>("interval").copied().unwrap_or(5);
    let store = build_store(
        config,
        StoreOptions {
            poll_interval: Duration::from_secs(interval),
            ..StoreOptions::default()
        },
    )?;

    let mut changes = store.changes();
    let view = store.list_view(descriptor.clone());
    if let Err(e) = view.load().await {
        eprintln!("{} {}", "✗".red().bold(), e);
    }

    let mut shown: Option<(Vec<RecordId>, Vec<CrawlStatus>, u64)> = None;
    loop {
        let snapshot = view.snapshot();
        let current = (
            snapshot.records.iter().map(|r| r.id).collect::<Vec<_>>(),
            snapshot.records.iter().map(|r| r.status).collect::<Vec<_>>(),
            snapshot.total,
        );
        if !snapshot.is_loading && shown.as_ref() != Some(&current) {
            print_divider();
            println!(
                "{} {}",
                "Updated".bright_black(),
                chrono::Local::now().format("%H:%M:%S").to_string().bright_black()
            );
            print_list(&snapshot, &descriptor);
            if let Some(e) = &snapshot.error {
                println!("{} {}", "⚠".yellow().bold(), e.to_string().yellow());
            }
            shown = Some(current);
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            alive = changes.changed() => {
                if !alive {
                    bail!("result cache shut down");
                }
            }
        }
    }

    println!();
    println!("{} Stopped watching", "✓".green().bold());
    Ok(())
}

pub async fn handle_ui(config: ClientConfig, args: &ArgMatches) -> Result<()> {
    let descriptor = descriptor_from_args(args).map_err(|e| anyhow!(e))?;
    let store = build_store(config, StoreOptions::default())?;
    let handle = tokio::runtime::Handle::current();

    tokio::task::spawn_blocking(move || crawldeck_tui::run_dashboard(handle, store, descriptor))
        .await
        .context("Dashboard thread panicked")?
}
