//! Desktop notifications via notify-rust (D-Bus).

use notify_rust::Notification;
use tracing::{debug, warn};

pub struct Notifier {
    enabled: bool,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Show an error toast. Failures to reach the notification daemon are logged only.
    pub fn error(&self, summary: &str, body: &str) {
        if !self.enabled {
            debug!("Notification suppressed: {summary}");
            return;
        }

        if let Err(e) = Notification::new()
            .summary(summary)
            .body(body)
            .icon("dialog-error")
            .appname("read-aloud")
            .timeout(5000)
            .show()
        {
            warn!("Failed to show notification: {e}");
        }
    }
}
