//! CLI output formatting.
//!
//! Provides consistent terminal output with support for JSON mode (for
//! scripting), quiet mode, and verbosity levels. Every JSON line has the
//! shape `{"type": ..., "payload": ...}`.

use std::fmt::Display;
use std::sync::OnceLock;

use owo_colors::OwoColorize;
use parking_lot::RwLock;
use serde_json::json;

/// Runtime output configuration shared by CLI handlers.
///
/// Set once from the global flags; every printing helper in this module
/// consults it.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Emit machine-readable JSON output instead of human-readable text.
    pub json: bool,
    /// Suppress non-essential output.
    pub quiet: bool,
    /// Verbosity level (0 = normal, 1+ = increasingly verbose).
    pub verbose: u8,
}

impl OutputConfig {
    /// Output configuration from the parsed global flags.
    #[must_use]
    pub const fn new(json: bool, quiet: bool, verbose: u8) -> Self {
        Self {
            json,
            quiet,
            verbose,
        }
    }
}

/// Process-wide output configuration.
static OUTPUT_CONFIG: OnceLock<RwLock<OutputConfig>> = OnceLock::new();

fn config_cell() -> &'static RwLock<OutputConfig> {
    OUTPUT_CONFIG.get_or_init(|| RwLock::new(OutputConfig::default()))
}

/// Snapshot of the current output configuration.
fn read_config() -> OutputConfig {
    *config_cell().read()
}

/// Check if regular (non-JSON) output should be suppressed.
fn regular_output_suppressed(config: OutputConfig) -> bool {
    !config.json && config.quiet
}

/// Emit a JSON line with type and payload structure.
fn emit_json_line(kind: &str, payload: serde_json::Value) {
    println!(
        "{}",
        json!({
            "type": kind,
            "payload": payload,
        })
    );
}

/// Apply output settings from global CLI flags.
///
/// `main` calls this before any handler prints.
pub fn configure(config: OutputConfig) {
    *config_cell().write() = config;
}

/// Whether output is JSON lines (`--json`).
#[must_use]
pub fn is_json() -> bool {
    read_config().json
}

/// Whether non-essential output is suppressed (`--quiet`).
#[must_use]
pub fn is_quiet() -> bool {
    read_config().quiet
}

/// Number of `-v` flags given.
#[must_use]
pub fn verbosity() -> u8 {
    read_config().verbose
}

/// Print the application header with name and version.
pub fn header(version: &str) {
    let config = read_config();
    if config.json || regular_output_suppressed(config) {
        return;
    }

    println!("{} {}", "stackctl".bold(), version.dimmed());
    println!();
}

/// Print a labeled value.
pub fn field(label: &str, value: impl Display) {
    let config = read_config();
    let value = value.to_string();

    if config.json {
        emit_json_line("field", json!({ "label": label, "value": value }));
        return;
    }
    if regular_output_suppressed(config) {
        return;
    }

    println!("  {:<12} {}", label.dimmed(), value);
}

/// Print a success line with a checkmark.
pub fn success(message: &str) {
    let config = read_config();

    if config.json {
        emit_json_line("success", json!({ "message": message }));
        return;
    }
    if regular_output_suppressed(config) {
        return;
    }

    println!("  {} {}", "✓".green(), message);
}

/// Warnings are printed even in quiet mode.
pub fn warning(message: &str) {
    let config = read_config();

    if config.json {
        emit_json_line("warning", json!({ "message": message }));
        return;
    }

    println!("  {} {}", "⚠".yellow(), message);
}

/// Errors go to stderr.
pub fn error(message: &str) {
    let config = read_config();

    if config.json {
        eprintln!(
            "{}",
            json!({
                "type": "error",
                "payload": { "message": message },
            })
        );
        return;
    }

    eprintln!("  {} {}", "×".red(), message);
}

/// Print a bold section title after a blank line.
pub fn section(title: &str) {
    let config = read_config();

    if config.json {
        emit_json_line("section", json!({ "title": title }));
        return;
    }
    if regular_output_suppressed(config) {
        return;
    }

    println!();
    println!("{}", title.bold());
}

/// Print a timestamped event line (for streaming output).
pub fn event(timestamp: &str, label: &str, message: &str) {
    let config = read_config();

    if config.json {
        emit_json_line(
            "event",
            json!({
                "timestamp": timestamp,
                "label": label,
                "message": message,
            }),
        );
        return;
    }
    if regular_output_suppressed(config) {
        return;
    }

    println!("  {} {} {}", timestamp.dimmed(), label.cyan(), message);
}

/// Braille spinner animation frames.
const BRAILLE_SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Create and start a progress spinner.
///
/// Returns a hidden progress bar in JSON or quiet mode.
pub fn spinner(message: &str) -> indicatif::ProgressBar {
    let config = read_config();
    if config.json || config.quiet {
        let pb = indicatif::ProgressBar::hidden();
        pb.set_message(message.to_string());
        return pb;
    }

    let pb = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::default_spinner()
        .tick_strings(BRAILLE_SPINNER)
        .template("  {spinner:.cyan} {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Finish a spinner with a success checkmark.
pub fn spinner_success(pb: &indicatif::ProgressBar, message: &str) {
    let config = read_config();
    if config.json {
        emit_json_line("spinner_success", json!({ "message": message }));
        pb.finish_and_clear();
        return;
    }
    if config.quiet {
        pb.finish_and_clear();
        return;
    }

    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

/// Finish a spinner with a failure mark.
pub fn spinner_fail(pb: &indicatif::ProgressBar, message: &str) {
    let config = read_config();
    if config.json {
        emit_json_line("spinner_fail", json!({ "message": message }));
        pb.finish_and_clear();
        return;
    }

    pb.finish_with_message(format!("{} {}", "×".red(), message));
}

/// Format a value in green (ready, healthy).
pub fn positive(value: impl Display) -> String {
    let value = value.to_string();
    if is_json() {
        return value;
    }
    format!("{}", value.green())
}

/// Format a value in red (failed, unhealthy).
pub fn negative(value: impl Display) -> String {
    let value = value.to_string();
    if is_json() {
        return value;
    }
    format!("{}", value.red())
}

/// Format a value in yellow (degraded, starting).
pub fn caution(value: impl Display) -> String {
    let value = value.to_string();
    if is_json() {
        return value;
    }
    format!("{}", value.yellow())
}

/// Format a value in cyan, e.g. service names.
pub fn highlight(value: impl Display) -> String {
    let value = value.to_string();
    if is_json() {
        return value;
    }
    format!("{}", value.cyan())
}

/// Format a dimmed value.
pub fn muted(value: impl Display) -> String {
    let value = value.to_string();
    if is_json() {
        return value;
    }
    format!("{}", value.dimmed())
}

/// Print a dimmed note.
pub fn note(message: &str) {
    let config = read_config();

    if config.json {
        emit_json_line("note", json!({ "message": message }));
        return;
    }
    if regular_output_suppressed(config) {
        return;
    }

    println!("  {}", message.dimmed());
}

/// Print a hint with "hint:" prefix.
pub fn hint(message: &str) {
    let config = read_config();

    if config.json {
        emit_json_line("hint", json!({ "message": message }));
        return;
    }
    if regular_output_suppressed(config) {
        return;
    }

    println!("  {}: {}", "hint".cyan().dimmed(), message.dimmed());
}

/// Print multiple lines of content, each indented.
pub fn lines(content: &str) {
    let config = read_config();

    if config.json {
        emit_json_line("lines", json!({ "content": content }));
        return;
    }
    if regular_output_suppressed(config) {
        return;
    }

    for line in content.lines() {
        println!("  {line}");
    }
}

/// Emit a JSON value directly (for commands that need custom JSON output).
pub fn json_output(value: serde_json::Value) {
    println!("{value}");
}
