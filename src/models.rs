use serde::Serialize;

/// Lifecycle of the remote gateway session as observed locally.
///
/// Only the current and previous values are kept in memory; there is no
/// persisted transition history. `Connected` carries the display name the
/// gateway reports for the logged-in account, when it reports one.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SessionState {
    Stopped,
    Starting,
    AwaitingQrScan,
    Authenticating,
    Connected { identity: Option<String> },
    Failed,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected { .. })
    }

    /// True when both values are the same variant, ignoring identity.
    pub fn same_phase(&self, other: &SessionState) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Stopped => "stopped",
            SessionState::Starting => "starting",
            SessionState::AwaitingQrScan => "awaiting qr scan",
            SessionState::Authenticating => "authenticating",
            SessionState::Connected { .. } => "connected",
            SessionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Delivery acknowledgment level. Only meaningful for outgoing messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AckLevel {
    Sent,
    Delivered,
    Read,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Other,
}

impl MediaKind {
    pub fn from_mime(mime: &str) -> Self {
        let top = mime.split('/').next().unwrap_or_default();
        match top.to_ascii_lowercase().as_str() {
            "image" => MediaKind::Image,
            "audio" => MediaKind::Audio,
            "video" => MediaKind::Video,
            _ => MediaKind::Other,
        }
    }

    /// Classify from a file name when the gateway omits the MIME type.
    pub fn from_file_name(name: &str) -> Self {
        match mime_guess::from_path(name).first() {
            Some(mime) => MediaKind::from_mime(mime.essence_str()),
            None => MediaKind::Other,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Other => "file",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub kind: MediaKind,
    /// URL exactly as the gateway handed it out. May be relative.
    pub raw_url: String,
    /// Absolute URL produced by the media resolver.
    pub url: String,
    pub mime_type: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub direction: Direction,
    pub body: Option<String>,
    pub attachment: Option<Attachment>,
    /// Unix timestamp, seconds.
    pub timestamp: i64,
    pub ack: Option<AckLevel>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub name: String,
    pub is_group: bool,
    pub unread_count: u32,
    /// Unix timestamp of the most recent activity, seconds.
    pub last_activity: Option<i64>,
}

/// Read-side chat list filter. Pure: never mutates stored data.
#[derive(Clone, Debug, Default)]
pub struct ChatFilter {
    pub hide_groups: bool,
    pub query: Option<String>,
}

impl ChatFilter {
    pub fn matches(&self, chat: &ChatSummary) -> bool {
        if self.hide_groups && chat.is_group {
            return false;
        }
        match self.query.as_deref() {
            None => true,
            Some(query) => {
                let query = query.to_lowercase();
                chat.name.to_lowercase().contains(&query)
                    || chat.id.to_lowercase().contains(&query)
            }
        }
    }
}

/// Ascending by timestamp; stable, so wire order breaks ties.
pub fn sort_messages(messages: &mut [Message]) {
    messages.sort_by_key(|message| message.timestamp);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, timestamp: i64) -> Message {
        Message {
            id: id.to_string(),
            chat_id: "123@c.us".to_string(),
            direction: Direction::Incoming,
            body: Some(id.to_string()),
            attachment: None,
            timestamp,
            ack: None,
        }
    }

    fn chat(id: &str, name: &str, is_group: bool) -> ChatSummary {
        ChatSummary {
            id: id.to_string(),
            name: name.to_string(),
            is_group,
            unread_count: 0,
            last_activity: None,
        }
    }

    #[test]
    fn sorts_messages_ascending_by_timestamp() {
        let mut messages = vec![message("c", 30), message("a", 10), message("b", 20)];
        sort_messages(&mut messages);
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn equal_timestamps_keep_wire_order() {
        let mut messages = vec![
            message("first", 10),
            message("second", 10),
            message("third", 10),
        ];
        sort_messages(&mut messages);
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["first", "second", "third"]);
    }

    #[test]
    fn filter_hides_groups() {
        let filter = ChatFilter {
            hide_groups: true,
            query: None,
        };
        assert!(filter.matches(&chat("1@c.us", "Ana", false)));
        assert!(!filter.matches(&chat("2@g.us", "Parents 2026", true)));
    }

    #[test]
    fn filter_query_matches_name_or_id_case_insensitive() {
        let filter = ChatFilter {
            hide_groups: false,
            query: Some("ANA".to_string()),
        };
        assert!(filter.matches(&chat("1@c.us", "Ana Souza", false)));
        assert!(filter.matches(&chat("ana@c.us", "someone", false)));
        assert!(!filter.matches(&chat("2@c.us", "Bruno", false)));
    }

    #[test]
    fn filters_compose() {
        let filter = ChatFilter {
            hide_groups: true,
            query: Some("team".to_string()),
        };
        assert!(!filter.matches(&chat("2@g.us", "Team Group", true)));
        assert!(filter.matches(&chat("3@c.us", "Team Lead", false)));
    }

    #[test]
    fn media_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("image/jpeg"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("audio/ogg; codecs=opus"), MediaKind::Audio);
        assert_eq!(MediaKind::from_mime("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("application/pdf"), MediaKind::Other);
    }

    #[test]
    fn media_kind_from_file_name() {
        assert_eq!(MediaKind::from_file_name("voice.oga"), MediaKind::Audio);
        assert_eq!(MediaKind::from_file_name("photo.jpg"), MediaKind::Image);
        assert_eq!(MediaKind::from_file_name("notes.txt"), MediaKind::Other);
    }

    #[test]
    fn same_phase_ignores_identity() {
        let a = SessionState::Connected {
            identity: Some("Ana".to_string()),
        };
        let b = SessionState::Connected { identity: None };
        assert!(a.same_phase(&b));
        assert!(!a.same_phase(&SessionState::Stopped));
    }
}
