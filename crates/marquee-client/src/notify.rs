//! User-facing feedback for settled mutations.
//!
//! Every rollback produces an error toast saying what failed and that the
//! change was reverted. Commits produce a success toast.
use marquee_cache::{MutationListener, MutationReport};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub title: String,
    pub message: String,
}

impl Toast {
    pub fn from_report(report: &MutationReport) -> Self {
        match &report.error {
            None => Toast {
                level: ToastLevel::Success,
                title: report.label.clone(),
                message: "Saved".to_string(),
            },
            Some(error) => Toast {
                level: ToastLevel::Error,
                title: format!("{} failed", report.label),
                message: format!("{error}. The change was reverted."),
            },
        }
    }
}

impl fmt::Display for Toast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, toast: Toast);
}

/// Bounded queue a UI drains to render toasts. Toasts are dropped, with a
/// warning, when the UI falls behind.
#[derive(Debug, Clone)]
pub struct ToastQueue {
    sender: mpsc::Sender<Toast>,
}

impl ToastQueue {
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<Toast>) {
        let (sender, receiver) = mpsc::channel(depth.max(1));
        (Self { sender }, receiver)
    }
}

impl Notifier for ToastQueue {
    fn notify(&self, toast: Toast) {
        if let Err(err) = self.sender.try_send(toast) {
            warn!(error = %err, "toast dropped");
        }
    }
}

/// Writes toasts to the log; used by the command-line console.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, toast: Toast) {
        match toast.level {
            ToastLevel::Success => info!(title = %toast.title, "{}", toast.message),
            ToastLevel::Error => warn!(title = %toast.title, "{}", toast.message),
        }
    }
}

/// Turns mutation reports from the cache into toasts.
pub struct NotifyingListener {
    notifier: Arc<dyn Notifier>,
}

impl NotifyingListener {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

impl MutationListener for NotifyingListener {
    fn on_settled(&self, report: &MutationReport) {
        self.notifier.notify(Toast::from_report(report));
    }
}
