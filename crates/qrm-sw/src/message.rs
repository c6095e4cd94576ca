//! Messages exchanged with controlled pages and notification payloads.

use serde::{Deserialize, Serialize};

/// Title shown on worker notifications.
pub const NOTIFICATION_TITLE: &str = "QR Master";

/// A message posted from a controlled page to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Force immediate activation of a waiting update.
    SkipWaiting,
    /// Ask for the deployed version; answered over the reply channel.
    GetVersion,
}

/// Reply to a [`WorkerMessage::GetVersion`] query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// The current static partition name.
    pub version: String,
}

/// A notification action button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

/// Payload for a worker-shown notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub actions: Vec<NotificationAction>,
}

impl NotificationPayload {
    /// Build the standard QR Master notification around a body text.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            title: NOTIFICATION_TITLE.to_string(),
            body: body.into(),
            icon: "/icon-192.png".to_string(),
            badge: "/icon-72.png".to_string(),
            actions: vec![
                NotificationAction {
                    action: "explore".to_string(),
                    title: "Open QR Master".to_string(),
                    icon: "/icon-192.png".to_string(),
                },
                NotificationAction {
                    action: "close".to_string(),
                    title: "Close".to_string(),
                    icon: "/icon-192.png".to_string(),
                },
            ],
        }
    }
}

impl Default for NotificationPayload {
    fn default() -> Self {
        Self::new("New QR code notification")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let msg: WorkerMessage = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
        assert_eq!(msg, WorkerMessage::SkipWaiting);

        let msg: WorkerMessage = serde_json::from_str(r#"{"type":"GET_VERSION"}"#).unwrap();
        assert_eq!(msg, WorkerMessage::GetVersion);

        let json = serde_json::to_string(&WorkerMessage::SkipWaiting).unwrap();
        assert_eq!(json, r#"{"type":"SKIP_WAITING"}"#);
    }

    #[test]
    fn test_unknown_message_rejected() {
        let result: Result<WorkerMessage, _> = serde_json::from_str(r#"{"type":"REFRESH"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_version_info_roundtrip() {
        let info = VersionInfo {
            version: "qr-master-static-v2.0.0".to_string(),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"version":"qr-master-static-v2.0.0"}"#);
    }

    #[test]
    fn test_notification_defaults() {
        let payload = NotificationPayload::default();
        assert_eq!(payload.title, "QR Master");
        assert_eq!(payload.icon, "/icon-192.png");
        assert_eq!(payload.badge, "/icon-72.png");
        assert_eq!(payload.actions.len(), 2);
        assert_eq!(payload.actions[0].action, "explore");
        assert_eq!(payload.actions[1].action, "close");
    }
}
