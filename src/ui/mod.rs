//! Terminal output for the CLI.
//!
//! Colored status lines, a progress bar that follows a pipeline run, and
//! summaries of run reports and parsed documents.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::time::Duration;

use crate::models::{ExtractedContent, ItemState, PipelineOutcome, Record};
use crate::pipeline::{PipelineObserver, RunReport};

/// Check if stderr is a terminal.
pub fn is_terminal() -> bool {
    std::io::stderr().is_terminal()
}

/// Status types for colored output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
    Warning,
    Info,
    Cancelled,
}

/// Status icons for different operations.
pub fn status_icon(status: Status) -> &'static str {
    match status {
        Status::Success => "✓",
        Status::Error => "✗",
        Status::Warning => "⚠",
        Status::Info => "ℹ",
        Status::Cancelled => "○",
    }
}

/// Status shown for an item's terminal state.
pub fn state_status(state: ItemState) -> Status {
    match state {
        ItemState::Parsed => Status::Success,
        ItemState::Cancelled => Status::Cancelled,
        ItemState::DownloadFailed | ItemState::ParseFailed => Status::Error,
        _ => Status::Info,
    }
}

fn colored_icon(status: Status) -> String {
    let icon = status_icon(status);
    match status {
        Status::Success => icon.green().bold().to_string(),
        Status::Error => icon.red().bold().to_string(),
        Status::Warning => icon.yellow().bold().to_string(),
        Status::Info => icon.cyan().bold().to_string(),
        Status::Cancelled => icon.white().dimmed().to_string(),
    }
}

/// Print a styled status message.
pub fn print_status(status: Status, msg: &str) {
    println!("{} {}", colored_icon(status), msg);
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", format!("━━━ {} ━━━", title).bold().cyan());
}

/// Truncate text to at most `max_chars` characters, marking the cut.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= 3 {
        return "...".to_string();
    }
    let kept: String = text.chars().take(max_chars - 3).collect();
    format!("{}...", kept)
}

/// Format a duration as `1m 05s` or `3.20s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

/// Progress bar advanced once per finished item
///
/// Hidden when stderr is not a terminal.
pub struct RunProgress {
    pb: ProgressBar,
}

impl RunProgress {
    pub fn new() -> Self {
        let pb = ProgressBar::with_draw_target(Some(0), Self::draw_target());
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        pb.set_message("fetching records");
        pb.enable_steady_tick(Duration::from_millis(120));
        Self { pb }
    }

    /// A progress bar that never draws
    pub fn hidden() -> Self {
        Self {
            pb: ProgressBar::hidden(),
        }
    }

    fn draw_target() -> ProgressDrawTarget {
        if is_terminal() {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        }
    }

    /// Items finished so far
    pub fn position(&self) -> u64 {
        self.pb.position()
    }

    /// Remove the bar from the terminal
    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl Default for RunProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineObserver for RunProgress {
    fn on_fetched(&self, count: usize) {
        self.pb.set_length(count as u64);
        self.pb.set_message(format!("{} records", count));
    }

    fn on_outcome(&self, outcome: &PipelineOutcome) {
        self.pb.inc(1);
        if !outcome.is_success() {
            let reason = outcome
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| outcome.state.to_string());
            self.pb.println(format!(
                "{} {} {}",
                colored_icon(state_status(outcome.state)),
                outcome.record_id().yellow(),
                reason.dimmed()
            ));
        }
    }
}

/// Print one line per record.
pub fn print_records(records: &[Record]) {
    for record in records {
        println!(
            "{} {} {}",
            record.id.yellow(),
            truncate_with_ellipsis(&record.title, 70).bold(),
            record.published.chars().take(10).collect::<String>().dimmed()
        );
    }
}

/// Print the counters and per-item errors of a run.
pub fn print_run_summary(report: &RunReport) {
    let stats = &report.stats;

    print_section("Run summary");
    println!("  Fetched:    {}", stats.fetched.to_string().bold());
    println!("  Downloaded: {}", stats.downloaded.to_string().bold());
    println!("  Parsed:     {}", stats.parsed.to_string().green().bold());
    if stats.stored > 0 {
        println!("  Stored:     {}", stats.stored.to_string().bold());
    }
    println!("  Failed:     {}", stats.failed().to_string().red().bold());
    println!("  Elapsed:    {}", format_duration(stats.elapsed));

    if !stats.errors.is_empty() {
        print_section("Errors");
        for entry in &stats.errors {
            println!(
                "  {} {} [{}] {}",
                colored_icon(Status::Error),
                entry.record_id.yellow(),
                entry.kind.to_string().magenta(),
                truncate_with_ellipsis(&entry.message, 100)
            );
        }
    }

    if let Some(error) = &report.store_error {
        println!();
        print_status(Status::Error, &format!("Parsed papers were not stored: {}", error));
    }

    println!();
    if report.cancelled {
        print_status(Status::Warning, "Run was cancelled before every item finished");
    } else if stats.is_complete_success() {
        print_status(Status::Success, "All records parsed");
    } else {
        print_status(
            Status::Warning,
            &format!("{} of {} records parsed", stats.parsed, stats.fetched),
        );
    }
}

/// Print the structure of extracted content.
pub fn print_content_summary(content: &ExtractedContent) {
    print_section("Document");
    println!("  Parser:     {}", content.parser.to_string().cyan());
    println!("  Characters: {}", content.char_count());
    println!("  References: {}", content.references.len());

    if !content.sections.is_empty() {
        print_section("Sections");
        for section in &content.sections {
            let indent = "  ".repeat(section.level.max(1) as usize);
            println!(
                "{}{} {}",
                indent,
                section.title.bold(),
                format!("({} chars)", section.body.chars().count()).dimmed()
            );
        }
    }
}
