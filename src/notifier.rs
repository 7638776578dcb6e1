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

    pub fn session_finished(&self, quiz_title: &str, score: usize, total: usize) {
        self.notify(
            &format!("Quiz finished: {quiz_title}"),
            &format!("Score: {score} / {total}"),
        );
    }

    pub fn load_failed(&self, message: &str) {
        self.notify("Quiz could not be loaded", message);
    }

    fn notify(&self, summary: &str, body: &str) {
        if !self.enabled {
            return;
        }

        debug!("Notification: {summary}");

        if let Err(e) = Notification::new()
            .summary(summary)
            .body(body)
            .icon("accessories-dictionary")
            .timeout(5000)
            .show()
        {
            warn!("Failed to show notification: {e}");
        }
    }
}
