//! Progress reporting
//!
//! The uploader reports through [`ProgressReporter`]: a start message, a
//! text update after every file, then exactly one of `succeed` or `fail`.
//! The CLI uses [`SpinnerProgress`]; [`LogProgress`] sends the same
//! messages to `tracing` for non-interactive runs and
//! [`RecordingProgress`] keeps them in memory.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

/// Receives progress for one upload run
pub trait ProgressReporter: Send + Sync {
    fn start(&self, message: &str);
    fn set_text(&self, text: &str);
    fn succeed(&self, message: &str);
    fn fail(&self, message: &str);
}

/// Terminal spinner
///
/// Draws to stderr and hides itself when stderr is not a terminal.
pub struct SpinnerProgress {
    bar: ProgressBar,
}

impl SpinnerProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ");
        bar.set_style(style);
        Self { bar }
    }
}

impl Default for SpinnerProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for SpinnerProgress {
    fn start(&self, message: &str) {
        self.bar.set_message(message.to_string());
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn set_text(&self, text: &str) {
        self.bar.set_message(text.to_string());
    }

    fn succeed(&self, message: &str) {
        self.bar.finish_with_message(format!("✔ {}", message));
    }

    fn fail(&self, message: &str) {
        self.bar.abandon_with_message(format!("✖ {}", message));
    }
}

/// Progress as log events
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn start(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn set_text(&self, text: &str) {
        tracing::debug!("{}", text);
    }

    fn succeed(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn fail(&self, message: &str) {
        tracing::error!("{}", message);
    }
}

/// A recorded progress call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started(String),
    Text(String),
    Succeeded(String),
    Failed(String),
}

/// Keeps every progress call in memory
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, in call order
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn push(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ProgressReporter for RecordingProgress {
    fn start(&self, message: &str) {
        self.push(ProgressEvent::Started(message.to_string()));
    }

    fn set_text(&self, text: &str) {
        self.push(ProgressEvent::Text(text.to_string()));
    }

    fn succeed(&self, message: &str) {
        self.push(ProgressEvent::Succeeded(message.to_string()));
    }

    fn fail(&self, message: &str) {
        self.push(ProgressEvent::Failed(message.to_string()));
    }
}
