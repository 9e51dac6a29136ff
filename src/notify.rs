//! User-facing notifications raised by mutations.

use tracing::{error, info};

/// Shown when a failed request carries no message of its own.
pub const GENERIC_ERROR: &str = "Something went wrong. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
  Success,
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub level: NotificationLevel,
  pub title: String,
  pub message: String,
}

impl Notification {
  pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      level: NotificationLevel::Success,
      title: title.into(),
      message: message.into(),
    }
  }

  /// Error notification carrying `message` verbatim, or the generic fallback.
  pub fn error(title: impl Into<String>, message: &str) -> Self {
    let message = if message.trim().is_empty() {
      GENERIC_ERROR.to_string()
    } else {
      message.to_string()
    };
    Self {
      level: NotificationLevel::Error,
      title: title.into(),
      message,
    }
  }
}

pub trait Notifier: Send + Sync {
  fn notify(&self, notification: Notification);
}

/// Prints notifications for a terminal user.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
  fn notify(&self, notification: Notification) {
    match notification.level {
      NotificationLevel::Success => {
        info!(title = %notification.title, "{}", notification.message);
        if notification.message.is_empty() {
          println!("✓ {}", notification.title);
        } else {
          println!("✓ {}: {}", notification.title, notification.message);
        }
      }
      NotificationLevel::Error => {
        error!(title = %notification.title, "{}", notification.message);
        eprintln!("✗ {}: {}", notification.title, notification.message);
      }
    }
  }
}

/// Keeps notifications in memory for assertions.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier {
  seen: std::sync::Mutex<Vec<Notification>>,
}

#[cfg(test)]
impl RecordingNotifier {
  pub fn notifications(&self) -> Vec<Notification> {
    self.seen.lock().unwrap().clone()
  }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
  fn notify(&self, notification: Notification) {
    self.seen.lock().unwrap().push(notification);
  }
}
