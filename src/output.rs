use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::models::{ChatSummary, Direction, MediaKind, Message, SessionState};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusOutput {
    pub session: String,
    pub state: SessionState,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListOutput {
    pub items: Vec<ChatSummary>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListOutput {
    pub chat_id: String,
    pub items: Vec<Message>,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), OutputError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_status(output: &StatusOutput, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(output);
    }
    match &output.state {
        SessionState::Connected {
            identity: Some(identity),
        } => println!("{}: connected as {}", output.session, identity),
        state => println!("{}: {}", output.session, state),
    }
    Ok(())
}

pub fn print_chat_list(output: &ChatListOutput, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(output);
    }

    let mut id_width = display_width("id");
    let mut name_width = display_width("name");
    for chat in &output.items {
        id_width = id_width.max(display_width(&chat.id));
        name_width = name_width.max(display_width(&chat.name));
    }
    id_width = id_width.min(28);
    name_width = name_width.min(28);

    println!(
        "{}  {}  {}  {}  {}",
        pad_right("id", id_width),
        pad_right("name", name_width),
        pad_right("kind", 5),
        pad_left("unread", 6),
        pad_right("last activity", 16),
    );
    for chat in &output.items {
        let kind = if chat.is_group { "group" } else { "dm" };
        let last = chat
            .last_activity
            .map(format_timestamp)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  {}  {}  {}",
            pad_right(&truncate_display(&chat.id, id_width), id_width),
            pad_right(&truncate_display(&chat.name, name_width), name_width),
            pad_right(kind, 5),
            pad_left(&chat.unread_count.to_string(), 6),
            pad_right(&last, 16),
        );
    }
    Ok(())
}

pub fn print_messages(output: &MessageListOutput, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(output);
    }

    println!("Messages for {}", output.chat_id);
    println!(
        "{}  {}  {}  {}",
        pad_right("when", 16),
        pad_right("dir", 3),
        pad_right("ack", 9),
        pad_right("text", 72),
    );
    for message in &output.items {
        let direction = match message.direction {
            Direction::Incoming => "<-",
            Direction::Outgoing => "->",
        };
        let ack = message
            .ack
            .map(|ack| format!("{ack:?}").to_lowercase())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  {}  {}",
            pad_right(&format_timestamp(message.timestamp), 16),
            pad_right(direction, 3),
            pad_right(&ack, 9),
            pad_right(&truncate_display(&message_line(message), 72), 72),
        );
    }
    Ok(())
}

fn message_line(message: &Message) -> String {
    match (&message.body, &message.attachment) {
        (Some(body), Some(attachment)) => {
            format!("[{}] {}", attachment.kind.label(), body)
        }
        (Some(body), None) => body.clone(),
        (None, Some(attachment)) => match attachment.kind {
            MediaKind::Audio => format!("[audio] {}", attachment.url),
            kind => format!("[{}] {}", kind.label(), attachment.url),
        },
        (None, None) => "<empty>".to_string(),
    }
}

fn format_timestamp(timestamp: i64) -> String {
    match DateTime::<Utc>::from_timestamp(timestamp, 0) {
        Some(datetime) => datetime.format("%Y-%m-%d %H:%M").to_string(),
        None => timestamp.to_string(),
    }
}

fn display_width(value: &str) -> usize {
    UnicodeWidthStr::width(value)
}

fn truncate_display(value: &str, max_width: usize) -> String {
    if display_width(value) <= max_width {
        return value.to_string();
    }
    let ellipsis = "...";
    let mut width = 0usize;
    let mut output = String::new();
    for ch in value.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width + ellipsis.len() > max_width {
            break;
        }
        output.push(ch);
        width += ch_width;
    }
    output.push_str(ellipsis);
    output
}

fn pad_right(value: &str, width: usize) -> String {
    let mut output = value.to_string();
    let current = display_width(value);
    if current < width {
        output.push_str(&" ".repeat(width - current));
    }
    output
}

fn pad_left(value: &str, width: usize) -> String {
    let current = display_width(value);
    if current >= width {
        return value.to_string();
    }
    let mut output = " ".repeat(width - current);
    output.push_str(value);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Attachment;

    #[test]
    fn formats_timestamps_as_utc() {
        assert_eq!(format_timestamp(1_754_500_000), "2025-08-06 17:06");
    }

    #[test]
    fn message_line_prefers_body_and_labels_media() {
        let attachment = Attachment {
            kind: MediaKind::Audio,
            raw_url: "/api/files/default/voice.oga".to_string(),
            url: "http://localhost:3000/api/files/default/voice.oga".to_string(),
            mime_type: Some("audio/ogg".to_string()),
        };
        let message = Message {
            id: "a".to_string(),
            chat_id: "1@c.us".to_string(),
            direction: Direction::Incoming,
            body: None,
            attachment: Some(attachment),
            timestamp: 0,
            ack: None,
        };
        assert!(message_line(&message).starts_with("[audio]"));
    }

    #[test]
    fn truncation_respects_display_width() {
        let truncated = truncate_display("a very long chat name indeed", 10);
        assert!(display_width(&truncated) <= 10);
        assert!(truncated.ends_with("..."));
    }
}
