//! Telemetry: tracing initialization and event formatting for sinks.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

use crate::channels::errors::ErrorEvent;
use crate::event_bus::Event;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta
pub const RESET_COLOR: &str = "\x1b[0m";

/// Install the global tracing subscriber.
///
/// Filter comes from `RUST_LOG`, defaulting to `info`. Safe to call more
/// than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();
}

/// Formatter color mode for telemetry output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatterMode {
    /// Auto-detect TTY capability (checks `stderr.is_terminal()`).
    #[default]
    Auto,
    /// Always include ANSI color codes.
    Colored,
    /// Never include ANSI color codes.
    Plain,
}

impl FormatterMode {
    pub fn auto_detect() -> Self {
        if std::io::stderr().is_terminal() {
            FormatterMode::Colored
        } else {
            FormatterMode::Plain
        }
    }

    pub fn is_colored(&self) -> bool {
        match self {
            FormatterMode::Auto => std::io::stderr().is_terminal(),
            FormatterMode::Colored => true,
            FormatterMode::Plain => false,
        }
    }
}

/// Rendered output for a telemetry item that can be consumed by sinks.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
    fn render_errors(&self, errors: &[ErrorEvent]) -> Vec<EventRender>;
}

/// Plain text formatter with optional ANSI color codes.
pub struct PlainFormatter {
    mode: FormatterMode,
}

impl PlainFormatter {
    pub fn new() -> Self {
        Self {
            mode: FormatterMode::Auto,
        }
    }

    pub fn with_mode(mode: FormatterMode) -> Self {
        Self { mode }
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.mode.is_colored() {
            format!("{color}{text}{RESET_COLOR}")
        } else {
            text.to_string()
        }
    }
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        let context = event.scope_label().map(|s| self.paint(CONTEXT_COLOR, s));
        let line = format!("{}\n", self.paint(LINE_COLOR, &event.to_string()));
        EventRender {
            context,
            lines: vec![line],
        }
    }

    fn render_errors(&self, errors: &[ErrorEvent]) -> Vec<EventRender> {
        errors
            .iter()
            .map(|e| {
                let line = format!(
                    "{}\n",
                    self.paint(LINE_COLOR, &format!("[{:?}] {}", e.scope, e.error.message))
                );
                EventRender {
                    context: Some(self.paint(CONTEXT_COLOR, "error")),
                    lines: vec![line],
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::errors::CauseChain;

    #[test]
    fn plain_mode_renders_without_ansi_codes() {
        let formatter = PlainFormatter::with_mode(FormatterMode::Plain);
        let render = formatter.render_event(&Event::diagnostic("scope", "message"));
        assert_eq!(render.join_lines(), "message\n");
    }

    #[test]
    fn colored_mode_wraps_with_escape_codes() {
        let formatter = PlainFormatter::with_mode(FormatterMode::Colored);
        let render = formatter.render_event(&Event::diagnostic("scope", "message"));
        assert!(render.join_lines().contains(LINE_COLOR));
    }

    #[test]
    fn errors_render_one_entry_each() {
        let formatter = PlainFormatter::with_mode(FormatterMode::Plain);
        let errors = vec![
            ErrorEvent::node("a", 1, CauseChain::msg("first")),
            ErrorEvent::node("b", 2, CauseChain::msg("second")),
        ];
        assert_eq!(formatter.render_errors(&errors).len(), 2);
    }
}
