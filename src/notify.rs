use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::engine::EngineError;
use crate::model::*;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingRequested,
    BookingAccepted,
    BookingRejected,
    BookingCancelled,
    BookingReturned,
    BookingPicked,
    /// A nomadic tool moved; the booking's counterparty is now its new holder.
    HolderChanged,
    RatingReceived,
}

impl NotificationKind {
    /// What the counterparty hears about when a booking enters `status`.
    pub fn for_status(status: BookingStatus) -> Self {
        match status {
            BookingStatus::Pending => NotificationKind::BookingRequested,
            BookingStatus::Accepted => NotificationKind::BookingAccepted,
            BookingStatus::Rejected => NotificationKind::BookingRejected,
            BookingStatus::Cancelled => NotificationKind::BookingCancelled,
            BookingStatus::Returned => NotificationKind::BookingReturned,
            BookingStatus::Picked => NotificationKind::BookingPicked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub recipient: UserId,
    pub kind: NotificationKind,
    pub booking_id: BookingId,
    pub tool_id: ToolId,
    pub tool_name: String,
    /// Display name of the tool's new holder, for `HolderChanged`.
    pub holder_name: Option<String>,
    pub brand: String,
}

impl Notification {
    /// Template variables for the external mail renderer.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind,
            "booking_id": self.booking_id.to_string(),
            "tool_id": self.tool_id.to_string(),
            "tool_name": self.tool_name,
            "holder_name": self.holder_name,
            "brand": self.brand,
        })
    }
}

/// Outbound notification channel. Delivery is best effort: callers log
/// failures and carry on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, notification: Notification) -> Result<(), EngineError>;
}

/// Per-user broadcast fan-out of notifications.
pub struct NotifyHub {
    channels: DashMap<UserId, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to one user's notifications. Creates the channel if needed.
    pub fn subscribe(&self, user_id: UserId) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Deliver to current subscribers. No-op if nobody is listening.
    pub fn send(&self, notification: &Notification) {
        if let Some(sender) = self.channels.get(&notification.recipient) {
            let _ = sender.send(notification.clone());
        }
    }

    pub fn remove(&self, user_id: &UserId) {
        self.channels.remove(user_id);
    }
}

#[async_trait]
impl Notifier for NotifyHub {
    async fn dispatch(&self, notification: Notification) -> Result<(), EngineError> {
        self.send(&notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn note(recipient: UserId, kind: NotificationKind) -> Notification {
        Notification {
            recipient,
            kind,
            booking_id: Ulid::new(),
            tool_id: Ulid::new(),
            tool_name: "Hedge trimmer".into(),
            holder_name: Some("Lu".into()),
            brand: "Toolshed".into(),
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let user = Ulid::new();
        let mut rx = hub.subscribe(user);

        let n = note(user, NotificationKind::HolderChanged);
        hub.dispatch(n.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), n);
    }

    #[tokio::test]
    async fn other_users_do_not_receive() {
        let hub = NotifyHub::new();
        let (alice, bob) = (Ulid::new(), Ulid::new());
        let mut rx = hub.subscribe(alice);
        hub.send(&note(bob, NotificationKind::BookingAccepted));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatch_without_subscribers_is_ok() {
        let hub = NotifyHub::new();
        let user = Ulid::new();
        hub.subscribe(user);
        hub.remove(&user);
        assert!(hub.dispatch(note(user, NotificationKind::BookingRequested)).await.is_ok());
    }

    #[test]
    fn payload_carries_template_fields() {
        let n = note(Ulid::new(), NotificationKind::HolderChanged);
        let payload = n.payload();
        assert_eq!(payload["kind"], "holder_changed");
        assert_eq!(payload["tool_name"], "Hedge trimmer");
        assert_eq!(payload["holder_name"], "Lu");
        assert_eq!(payload["brand"], "Toolshed");
        assert_eq!(payload["booking_id"], n.booking_id.to_string());
    }

    #[test]
    fn kinds_follow_status() {
        assert_eq!(
            NotificationKind::for_status(BookingStatus::Picked),
            NotificationKind::BookingPicked
        );
        assert_eq!(
            NotificationKind::for_status(BookingStatus::Cancelled),
            NotificationKind::BookingCancelled
        );
    }
}
