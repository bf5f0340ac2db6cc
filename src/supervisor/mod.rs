//! Operator-facing notifications.

pub mod notifier;

pub use notifier::{DeliveryReport, LogNotifier, Notification, NotificationHub, Notifier, Severity};
