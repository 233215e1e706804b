//! Host notification surface: a status line plus one-shot messages.

use tracing::{error, info};

/// Severity of a one-shot message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Success,
    Error,
}

/// Where the coordinator reports progress for a human to see.
pub trait Notifier: Send + Sync {
    /// Replace the single-line status text.
    fn status(&self, text: &str);

    /// Show a one-shot success or error message.
    fn message(&self, level: MessageLevel, text: &str);
}

/// Notifier that writes to the tracing subscriber.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn status(&self, text: &str) {
        info!(target: "lattice::status", "{}", text);
    }

    fn message(&self, level: MessageLevel, text: &str) {
        match level {
            MessageLevel::Success => info!(target: "lattice::message", "{}", text),
            MessageLevel::Error => error!(target: "lattice::message", "{}", text),
        }
    }
}
