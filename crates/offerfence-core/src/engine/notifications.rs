use tracing::info;

use crate::models::GeoFence;

/// A local notification to surface to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    /// Schedule id as a string; `remove` uses the same value.
    pub identifier: String,
    pub title: String,
    pub subtitle: String,
    /// Always zero for region offers: the processor holds the request back
    /// until the delivery delay has passed.
    pub delay_seconds: f64,
    pub silent: bool,
}

impl NotificationRequest {
    /// Build the notification for a region, or `None` if the region must not notify.
    ///
    /// Regions with `doesNotNotify` or an empty title are tracking-only.
    pub fn for_region(region: &GeoFence) -> Option<Self> {
        if region.does_not_notify || region.notification_title.trim().is_empty() {
            return None;
        }
        Some(Self {
            identifier: region.schedule_id.to_string(),
            title: region.notification_title.clone(),
            subtitle: region.notification_message.clone(),
            delay_seconds: 0.0,
            silent: region.notifies_silently,
        })
    }
}

/// System notification delivery.
pub trait NotificationSender: Send + Sync {
    fn send(&self, request: &NotificationRequest);

    fn remove(&self, identifier: &str);

    /// Whether the user allows notifications. Sends are skipped when false.
    fn has_permission(&self) -> bool {
        true
    }
}

/// Sender that writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotificationSender;

impl NotificationSender for LogNotificationSender {
    fn send(&self, request: &NotificationRequest) {
        info!(
            identifier = %request.identifier,
            title = %request.title,
            subtitle = %request.subtitle,
            silent = request.silent,
            "Notification"
        );
    }

    fn remove(&self, identifier: &str) {
        info!(identifier = %identifier, "Notification removed");
    }
}
