use anyhow::Result;
use crawldeck_api::{ApiError, CrawlRecord, CrawlStatus, RecordId};
use crawldeck_core::report::{display_title, generate_record_report};
use crawldeck_core::{
    CrawlStore, DetailSnapshot, DetailView, ListSnapshot, ListView, Outcome, QueryDescriptor,
    SortKey,
};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

const TICK: Duration = Duration::from_millis(100);
const MAX_LOGS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Results of background actions, reported back to the dashboard.
#[derive(Debug, Clone)]
pub enum DashboardMessage {
    Log { level: LogLevel, message: String },
    /// A confirmed delete; these ids no longer exist on the service.
    Deleted(Vec<RecordId>),
}

#[derive(Debug, Clone, PartialEq)]
enum InputMode {
    Normal,
    Filter(String),
    Submit(String),
    Search(String),
}

/// Dashboard state: one list view, its selection, an optional detail pane
/// and a log of what the background actions did.
///
/// `search` narrows the loaded page locally; it never reaches the service.
pub struct Dashboard {
    store: CrawlStore,
    view: Arc<ListView>,
    detail: Arc<DetailView>,
    show_detail: bool,
    cursor: usize,
    mode: InputMode,
    search: String,
    logs: Vec<(LogLevel, String)>,
    should_quit: bool,
    handle: Handle,
    tx: mpsc::UnboundedSender<DashboardMessage>,
    rx: mpsc::UnboundedReceiver<DashboardMessage>,
}

impl Dashboard {
    /// Must be called from within a tokio runtime.
    pub fn new(store: CrawlStore, descriptor: QueryDescriptor) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let view = Arc::new(store.list_view(descriptor));
        let detail = Arc::new(store.detail_view(None));
        let dashboard = Self {
            store,
            view,
            detail,
            show_detail: false,
            cursor: 0,
            mode: InputMode::Normal,
            search: String::new(),
            logs: Vec::new(),
            should_quit: false,
            handle: Handle::current(),
            tx,
            rx,
        };
        dashboard.spawn_load();
        dashboard
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn descriptor(&self) -> QueryDescriptor {
        self.view.descriptor()
    }

    pub fn selected_ids(&self) -> Vec<RecordId> {
        self.view.selection().ids()
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn detail_id(&self) -> Option<RecordId> {
        self.show_detail.then(|| self.detail.id()).flatten()
    }

    pub fn logs(&self) -> impl Iterator<Item = &(LogLevel, String)> {
        self.logs.iter()
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push((level, message.into()));
        if self.logs.len() > MAX_LOGS {
            self.logs.drain(0..self.logs.len() - MAX_LOGS);
        }
    }

    /// Drains messages from finished background actions.
    pub fn process_messages(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                DashboardMessage::Log { level, message } => self.log(level, message),
                DashboardMessage::Deleted(ids) => {
                    if self.detail.id().is_some_and(|open| ids.contains(&open)) {
                        self.close_detail();
                    }
                }
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }

        match self.mode.clone() {
            InputMode::Normal => self.handle_normal_key(key.code),
            InputMode::Filter(text) => {
                if let Some(text) = self.edit_input(key.code, text, InputMode::Filter) {
                    self.apply_filter(&text);
                }
            }
            InputMode::Submit(text) => {
                if let Some(text) = self.edit_input(key.code, text, InputMode::Submit) {
                    self.submit(text);
                }
            }
            InputMode::Search(text) => {
                if key.code == KeyCode::Esc {
                    self.mode = InputMode::Normal;
                    self.search.clear();
                } else if let Some(text) = self.edit_input(key.code, text, InputMode::Search) {
                    self.search = text;
                } else if let InputMode::Search(text) = &self.mode {
                    self.search = text.clone();
                }
                self.cursor = 0;
            }
        }
    }

    fn handle_normal_key(&mut self, code: KeyCode) {
        let snapshot = self.view.snapshot();
        let visible = self.visible(&snapshot);
        match code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Esc => {
                if self.show_detail {
                    self.close_detail();
                } else if !self.search.is_empty() {
                    self.search.clear();
                    self.cursor = 0;
                } else {
                    self.should_quit = true;
                }
            }
            KeyCode::Up => self.cursor = self.cursor.saturating_sub(1),
            KeyCode::Down => {
                if self.cursor + 1 < visible.len() {
                    self.cursor += 1;
                }
            }
            KeyCode::Char(' ') => {
                if let Some(record) = visible.get(self.cursor) {
                    self.view.selection().toggle(record.id);
                }
            }
            KeyCode::Char('a') => {
                let ids = visible.iter().map(|r| r.id);
                self.view.selection().select_all(ids);
            }
            KeyCode::Char('c') => self.view.selection().clear(),
            KeyCode::Char('d') => self.delete_selected(),
            KeyCode::Char('r') => self.rerun_selected(),
            KeyCode::Enter => {
                if let Some(record) = visible.get(self.cursor) {
                    let id = record.id;
                    self.open_detail(id);
                }
            }
            KeyCode::Char('n') => {
                let descriptor = self.view.descriptor();
                if descriptor.page_index() + 1 < snapshot.page_count {
                    self.move_to(descriptor.next_page());
                }
            }
            KeyCode::Char('p') => {
                let descriptor = self.view.descriptor();
                if descriptor.page_index() > 0 {
                    self.move_to(descriptor.previous_page());
                }
            }
            KeyCode::Char('s') => {
                let descriptor = self.view.descriptor();
                let current = descriptor.sort_by();
                let next = SortKey {
                    field: current.field.next(),
                    descending: current.descending,
                };
                self.move_to(descriptor.with_sort(next));
            }
            KeyCode::Char('S') => {
                let descriptor = self.view.descriptor();
                let current = descriptor.sort_by();
                let flipped = SortKey {
                    descending: !current.descending,
                    ..current
                };
                self.move_to(descriptor.with_sort(flipped));
            }
            KeyCode::Char('/') => {
                self.mode = InputMode::Filter(self.view.descriptor().filter_text().to_string());
            }
            KeyCode::Char('i') => self.mode = InputMode::Submit(String::new()),
            KeyCode::Char('f') => self.mode = InputMode::Search(self.search.clone()),
            _ => {}
        }
    }

    /// Applies one key to a line being edited. Returns the text on Enter.
    fn edit_input(
        &mut self,
        code: KeyCode,
        mut text: String,
        mode: fn(String) -> InputMode,
    ) -> Option<String> {
        match code {
            KeyCode::Enter => {
                self.mode = InputMode::Normal;
                return Some(text);
            }
            KeyCode::Esc => self.mode = InputMode::Normal,
            KeyCode::Backspace => {
                text.pop();
                self.mode = mode(text);
            }
            KeyCode::Char(c) => {
                text.push(c);
                self.mode = mode(text);
            }
            _ => {}
        }
        None
    }

    /// Records of the current page that match the local search.
    fn visible<'a>(&self, snapshot: &'a ListSnapshot) -> Vec<&'a CrawlRecord> {
        snapshot
            .records
            .iter()
            .filter(|record| record.matches_search(&self.search))
            .collect()
    }

    fn move_to(&mut self, descriptor: QueryDescriptor) {
        self.view.set_descriptor(descriptor);
        self.cursor = 0;
        self.spawn_load();
    }

    fn apply_filter(&mut self, text: &str) {
        let descriptor = self.view.descriptor().with_filter(text);
        self.move_to(descriptor);
    }

    fn open_detail(&mut self, id: RecordId) {
        self.detail.set_id(Some(id));
        self.show_detail = true;

        let detail = self.detail.clone();
        self.spawn_report(async move {
            match detail.load().await {
                Ok(_) => None,
                Err(e) => Some((LogLevel::Error, format!("Loading #{} failed: {}", id, e))),
            }
        });
    }

    fn close_detail(&mut self) {
        self.show_detail = false;
        self.detail.set_id(None);
    }

    fn submit(&mut self, url: String) {
        let store = self.store.clone();
        self.spawn_report(async move {
            Some(match store.submit(&url).await {
                Ok(Outcome::Done(ack)) => (
                    LogLevel::Info,
                    match ack.id {
                        Some(id) => format!("Submitted {} as #{}", url.trim(), id),
                        None => format!("Submitted {}", url.trim()),
                    },
                ),
                Ok(Outcome::Skipped(reason)) => (LogLevel::Warn, format!("Nothing submitted: {}", reason)),
                Err(e) => (LogLevel::Error, format!("Submit failed: {}", e)),
            })
        });
    }

    fn delete_selected(&mut self) {
        let selection = self.view.selection().clone();
        let ids = selection.ids();
        let store = self.store.clone();
        let tx = self.tx.clone();
        self.spawn_report(async move {
            let result = store.bulk_delete(&ids).await;
            Some(match result {
                Ok(Outcome::Done(_)) => {
                    selection.clear();
                    let message = format!("Deleted {} record(s)", ids.len());
                    let _ = tx.send(DashboardMessage::Deleted(ids));
                    (LogLevel::Info, message)
                }
                Ok(Outcome::Skipped(reason)) => (LogLevel::Warn, format!("Nothing deleted: {}", reason)),
                Err(e) => (LogLevel::Error, format!("Delete failed: {}", e)),
            })
        });
    }

    fn rerun_selected(&mut self) {
        let selection = self.view.selection().clone();
        let ids = selection.ids();
        let store = self.store.clone();
        self.spawn_report(async move {
            Some(match store.bulk_rerun(&ids).await {
                Ok(Outcome::Done(_)) => {
                    selection.clear();
                    (
                        LogLevel::Info,
                        format!("Re-run requested for {} record(s)", ids.len()),
                    )
                }
                Ok(Outcome::Skipped(reason)) => (LogLevel::Warn, format!("Nothing re-run: {}", reason)),
                Err(e) => (LogLevel::Error, format!("Re-run failed: {}", e)),
            })
        });
    }

    fn spawn_load(&self) {
        let view = self.view.clone();
        self.spawn_report(async move {
            match view.load().await {
                Ok(_) => None,
                Err(e) => Some((LogLevel::Error, describe_load_error(&e))),
            }
        });
    }

    fn spawn_report<F>(&self, task: F)
    where
        F: Future<Output = Option<(LogLevel, String)>> + Send + 'static,
    {
        let tx = self.tx.clone();
        self.handle.spawn(async move {
            if let Some((level, message)) = task.await {
                // The dashboard may already be gone.
                let _ = tx.send(DashboardMessage::Log { level, message });
            }
        });
    }

    pub fn render(&self, f: &mut Frame) {
        let vertical_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(10),   // Main area
                Constraint::Length(1), // Hints or input line
            ])
            .split(f.area());

        let main_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(vertical_chunks[0]);

        let right_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(8), Constraint::Length(10)])
            .split(main_chunks[1]);

        let snapshot = self.view.snapshot();
        self.render_results(f, main_chunks[0], &snapshot);
        if self.show_detail {
            self.render_detail(f, right_chunks[0]);
        } else {
            self.render_summary(f, right_chunks[0], &snapshot);
        }
        self.render_logs(f, right_chunks[1]);
        self.render_footer(f, vertical_chunks[1]);
    }

    fn render_results(&self, f: &mut Frame, area: Rect, snapshot: &ListSnapshot) {
        let descriptor = self.view.descriptor();
        let mut title = format!(
            " Results (page {}/{}, {} total) ",
            descriptor.page_index() + 1,
            snapshot.page_count.max(1),
            snapshot.total
        );
        if snapshot.is_loading {
            title.push_str("⠋ ");
        }

        let border_color = if snapshot.is_error { Color::Red } else { Color::Cyan };
        let block = Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(border_color));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let visible = self.visible(snapshot);
        if visible.is_empty() {
            let message = match &snapshot.error {
                Some(e) => format!("Could not load results: {}", e),
                None if snapshot.is_loading => "Loading...".to_string(),
                None if !snapshot.records.is_empty() => {
                    format!("Nothing on this page matches \"{}\".", self.search)
                }
                None => "No results found.".to_string(),
            };
            let empty = Paragraph::new(message)
                .style(Style::default().fg(Color::DarkGray))
                .wrap(Wrap { trim: true });
            f.render_widget(empty, inner);
            return;
        }

        let height = inner.height as usize;
        let scroll_offset = if self.cursor >= height {
            self.cursor + 1 - height
        } else {
            0
        };

        let selection = self.view.selection();
        let items: Vec<ListItem> = visible
            .iter()
            .enumerate()
            .skip(scroll_offset)
            .take(height)
            .map(|(idx, record)| {
                let checkbox = if selection.contains(record.id) { "[x]" } else { "[ ]" };
                let text = format!(
                    "{} {} #{:<5} {}  {}",
                    checkbox,
                    record.status.emoji(),
                    record.id,
                    display_title(record),
                    record.url
                );

                let mut style = Style::default().fg(status_color(record.status));
                if snapshot.is_placeholder {
                    style = style.add_modifier(Modifier::DIM);
                }
                if idx == self.cursor {
                    style = style.bg(Color::DarkGray).add_modifier(Modifier::BOLD);
                }
                ListItem::new(text).style(style)
            })
            .collect();

        f.render_widget(List::new(items), inner);
    }

    fn render_summary(&self, f: &mut Frame, area: Rect, snapshot: &ListSnapshot) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Query ")
            .border_style(Style::default().fg(Color::Yellow));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let descriptor = self.view.descriptor();
        let filter = match descriptor.filter_text() {
            "" => "(none)".to_string(),
            text => text.to_string(),
        };
        let label = Style::default().fg(Color::DarkGray);
        let value = Style::default().fg(Color::Cyan);

        let mut text = vec![
            Line::from(vec![
                Span::styled("Sort:     ", label),
                Span::styled(descriptor.sort_by().to_string(), value),
            ]),
            Line::from(vec![
                Span::styled("Filter:   ", label),
                Span::styled(filter, value),
            ]),
            Line::from(vec![
                Span::styled("Search:   ", label),
                Span::styled(
                    match self.search.as_str() {
                        "" => "(none)".to_string(),
                        text => text.to_string(),
                    },
                    value,
                ),
            ]),
            Line::from(vec![
                Span::styled("Selected: ", label),
                Span::styled(
                    self.view.selection().len().to_string(),
                    value.add_modifier(Modifier::BOLD),
                ),
            ]),
        ];
        if snapshot.is_placeholder {
            text.push(Line::from(""));
            text.push(Line::from(Span::styled(
                "Showing previous results while loading...",
                Style::default().fg(Color::Yellow),
            )));
        }

        f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), inner);
    }

    fn render_detail(&self, f: &mut Frame, area: Rect) {
        let snapshot = self.detail.snapshot();
        let title = match self.detail.id() {
            Some(id) => format!(" Record #{} ", id),
            None => " Record ".to_string(),
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(Color::Green));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let lines = detail_lines(&snapshot);
        f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), inner);
    }

    fn render_logs(&self, f: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Log ")
            .border_style(Style::default().fg(Color::Magenta));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let height = inner.height as usize;
        let items: Vec<ListItem> = self
            .logs
            .iter()
            .skip(self.logs.len().saturating_sub(height))
            .map(|(level, message)| {
                let (prefix, style) = match level {
                    LogLevel::Info => ("INFO ", Style::default().fg(Color::Blue)),
                    LogLevel::Warn => ("WARN ", Style::default().fg(Color::Yellow)),
                    LogLevel::Error => ("ERROR", Style::default().fg(Color::Red)),
                };
                ListItem::new(format!("[{}] {}", prefix, message)).style(style)
            })
            .collect();

        f.render_widget(List::new(items), inner);
    }

    fn render_footer(&self, f: &mut Frame, area: Rect) {
        let (prompt, text) = match &self.mode {
            InputMode::Filter(text) => ("filter> ", text),
            InputMode::Submit(text) => ("submit> ", text),
            InputMode::Search(text) => ("search> ", text),
            InputMode::Normal => {
                self.render_hints(f, area);
                return;
            }
        };

        let input = Paragraph::new(format!("{}{}", prompt, text))
            .style(Style::default().fg(Color::Yellow));
        f.render_widget(input, area);
        f.set_cursor_position((
            area.x + (prompt.len() + text.chars().count()) as u16,
            area.y,
        ));
    }

    fn render_hints(&self, f: &mut Frame, area: Rect) {
        let key = Style::default().fg(Color::Black).bg(Color::Gray);
        let hints = Line::from(vec![
            Span::styled(" q ", key),
            Span::raw(" Quit  "),
            Span::styled(" ↑/↓ ", key),
            Span::raw(" Move  "),
            Span::styled(" Space ", key),
            Span::raw(" Select  "),
            Span::styled(" a/c ", key),
            Span::raw(" All/Clear  "),
            Span::styled(" d ", key),
            Span::raw(" Delete  "),
            Span::styled(" r ", key),
            Span::raw(" Re-run  "),
            Span::styled(" Enter ", key),
            Span::raw(" Details  "),
            Span::styled(" n/p ", key),
            Span::raw(" Page  "),
            Span::styled(" / ", key),
            Span::raw(" Filter  "),
            Span::styled(" f ", key),
            Span::raw(" Search  "),
            Span::styled(" s ", key),
            Span::raw(" Sort  "),
            Span::styled(" i ", key),
            Span::raw(" Submit"),
        ]);

        let paragraph = Paragraph::new(hints).style(Style::default().bg(Color::Black).fg(Color::Gray));
        f.render_widget(paragraph, area);
    }
}

fn status_color(status: CrawlStatus) -> Color {
    match status {
        CrawlStatus::Completed => Color::Green,
        CrawlStatus::Error => Color::Red,
        CrawlStatus::Running => Color::Yellow,
        CrawlStatus::Queued => Color::White,
        CrawlStatus::Unknown => Color::DarkGray,
    }
}

/// The detail pane body. A load error is shown ahead of any cached report so
/// a record that vanished from the service does not look current.
fn detail_lines(snapshot: &DetailSnapshot) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    if let Some(e) = &snapshot.error {
        lines.push(Line::from(Span::styled(
            format!("Could not load record: {}", e),
            Style::default().fg(Color::Red),
        )));
    }
    match &snapshot.record {
        Some(record) => {
            if !lines.is_empty() {
                lines.push(Line::from(Span::styled(
                    "Last known state:",
                    Style::default().fg(Color::DarkGray),
                )));
            }
            lines.extend(
                generate_record_report(record)
                    .lines()
                    .map(|line| Line::from(line.to_string())),
            );
        }
        None if lines.is_empty() => lines.push(Line::from("Loading...")),
        None => {}
    }
    lines
}

fn describe_load_error(e: &ApiError) -> String {
    if e.is_unavailable() {
        format!("Service unreachable: {}", e)
    } else {
        format!("Loading results failed: {}", e)
    }
}

/// Runs the dashboard until the user quits. Blocks the calling thread; call
/// it from `spawn_blocking` or a dedicated thread that can reach `handle`.
pub fn run_dashboard(handle: Handle, store: CrawlStore, descriptor: QueryDescriptor) -> Result<()> {
    let _runtime = handle.enter();

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut dashboard = Dashboard::new(store, descriptor);
    let result = run_loop(&mut terminal, &mut dashboard);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run_loop<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    dashboard: &mut Dashboard,
) -> Result<()> {
    loop {
        dashboard.process_messages();
        terminal.draw(|f| dashboard.render(f))?;

        if dashboard.should_quit() {
            break;
        }

        if event::poll(TICK)?
            && let Event::Key(key) = event::read()?
        {
            dashboard.handle_key(key);
        }
    }
    Ok(())
}
