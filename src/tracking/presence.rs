//! Presence signal: keeps the host aware that visible background work is
//! in progress while a session runs.
//!
//! The tracking service only sees [`PresenceSignal`]. [`ForegroundNotice`]
//! implements it on top of a host notification service.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::PresenceConfig;

/// Token returned by `activate`, handed back to `deactivate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PresenceHandle(pub u64);

/// Liveness signal the host requires for long-running background work.
///
/// The service never activates twice without an intervening deactivate.
/// Both calls are made while the service holds its session lock, so an
/// implementation must not call back into the service.
pub trait PresenceSignal: Send + Sync {
    fn activate(&self, status: &str) -> PresenceHandle;
    fn deactivate(&self, handle: PresenceHandle);
}

// ─── Host notification service ──────────────────────────────────

/// Notification channel registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSpec {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    LocationSharing,
    Service,
}

/// Content of an ongoing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationContent {
    pub channel_id: String,
    pub title: String,
    pub ticker: String,
    pub text: String,
    pub ongoing: bool,
    pub show_when: bool,
    pub category: NotificationCategory,
}

/// External notification service of the host.
pub trait NotificationHost: Send + Sync {
    fn ensure_channel(&self, channel: &ChannelSpec);
    fn post(&self, id: u32, content: &NotificationContent);
    fn cancel(&self, id: u32);
}

/// Presence backed by an ongoing notification.
pub struct ForegroundNotice<H: NotificationHost> {
    host: H,
    config: PresenceConfig,
    channel_ready: AtomicBool,
    next_handle: AtomicU64,
}

impl<H: NotificationHost> ForegroundNotice<H> {
    pub fn new(host: H, config: PresenceConfig) -> Self {
        Self {
            host,
            config,
            channel_ready: AtomicBool::new(false),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn content(&self, status: &str) -> NotificationContent {
        NotificationContent {
            channel_id: self.config.channel_id.clone(),
            title: self.config.title.clone(),
            ticker: self.config.ticker.clone(),
            text: status.to_string(),
            ongoing: true,
            show_when: false,
            category: NotificationCategory::LocationSharing,
        }
    }
}

impl<H: NotificationHost> PresenceSignal for ForegroundNotice<H> {
    fn activate(&self, status: &str) -> PresenceHandle {
        if !self.channel_ready.swap(true, Ordering::SeqCst) {
            self.host.ensure_channel(&ChannelSpec {
                id: self.config.channel_id.clone(),
                name: self.config.channel_name.clone(),
            });
        }
        self.host.post(self.config.notification_id, &self.content(status));
        let handle = PresenceHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        debug!(handle = handle.0, id = self.config.notification_id, "presence notification posted");
        handle
    }

    fn deactivate(&self, handle: PresenceHandle) {
        self.host.cancel(self.config.notification_id);
        debug!(handle = handle.0, id = self.config.notification_id, "presence notification cancelled");
    }
}

/// Notification host that only logs; used where no real host exists.
#[derive(Debug, Default)]
pub struct LogNotificationHost;

impl NotificationHost for LogNotificationHost {
    fn ensure_channel(&self, channel: &ChannelSpec) {
        info!(channel = %channel.id, name = %channel.name, "notification channel ready");
    }

    fn post(&self, id: u32, content: &NotificationContent) {
        info!(id, title = %content.title, text = %content.text, "foreground notice shown");
    }

    fn cancel(&self, id: u32) {
        info!(id, "foreground notice removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHost {
        calls: Mutex<Vec<String>>,
        last: Mutex<Option<NotificationContent>>,
    }

    impl NotificationHost for RecordingHost {
        fn ensure_channel(&self, channel: &ChannelSpec) {
            self.calls.lock().unwrap().push(format!("channel:{}", channel.id));
        }

        fn post(&self, id: u32, content: &NotificationContent) {
            self.calls.lock().unwrap().push(format!("post:{}", id));
            *self.last.lock().unwrap() = Some(content.clone());
        }

        fn cancel(&self, id: u32) {
            self.calls.lock().unwrap().push(format!("cancel:{}", id));
        }
    }

    fn notice() -> ForegroundNotice<RecordingHost> {
        ForegroundNotice::new(RecordingHost::default(), PresenceConfig::default())
    }

    #[test]
    fn test_channel_ensured_once() {
        let n = notice();
        let id = n.config.notification_id;
        let h1 = n.activate("one");
        n.deactivate(h1);
        let h2 = n.activate("two");
        n.deactivate(h2);

        let calls = n.host().calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                format!("channel:{}", n.config.channel_id),
                format!("post:{}", id),
                format!("cancel:{}", id),
                format!("post:{}", id),
                format!("cancel:{}", id),
            ]
        );
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_content_is_ongoing_location_sharing() {
        let n = notice();
        n.activate("Tracking via gps");
        let content = n.host().last.lock().unwrap().clone().unwrap();
        assert_eq!(content.text, "Tracking via gps");
        assert!(content.ongoing);
        assert!(!content.show_when);
        assert_eq!(content.category, NotificationCategory::LocationSharing);
        assert_eq!(content.title, PresenceConfig::default().title);
    }
}
