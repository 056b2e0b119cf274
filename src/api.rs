use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::models::SessionState;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Typed client for the messaging gateway.
///
/// Every call carries the shared-secret header. Responses the gateway uses
/// to say "already in this state" (session already created, already started)
/// are normalized to success here so callers never see them as errors.
#[derive(Clone)]
pub struct BridgeClient {
    base_url: String,
    session: String,
    api_key: Option<String>,
    http: Client,
}

impl BridgeClient {
    pub fn new(base_url: String, session: String, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            api_key,
            http: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Current remote session status. `Ok(None)` when the session does not
    /// exist on the gateway yet.
    pub async fn session_status(&self) -> Result<Option<SessionStatusResponse>, ApiError> {
        let url = format!("{}/api/sessions/{}", self.base_url, self.session);
        let response = self.with_key(self.http.get(url)).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let response = into_api_result(response).await?;
        Ok(Some(response.json().await?))
    }

    /// Create the session. A gateway answer of "already exists" is success.
    pub async fn create_session(&self) -> Result<(), ApiError> {
        let url = format!("{}/api/sessions", self.base_url);
        let payload = json!({ "name": self.session });
        let response = self.with_key(self.http.post(url).json(&payload)).send().await?;
        self.discard_already_in_state(response).await
    }

    /// Start the session. A gateway answer of "already started" is success.
    pub async fn start_session(&self) -> Result<(), ApiError> {
        let url = format!("{}/api/sessions/{}/start", self.base_url, self.session);
        let response = self.with_key(self.http.post(url)).send().await?;
        self.discard_already_in_state(response).await
    }

    pub async fn stop_session(&self) -> Result<(), ApiError> {
        let url = format!("{}/api/sessions/{}/stop", self.base_url, self.session);
        let response = self.with_key(self.http.post(url)).send().await?;
        self.discard_already_in_state(response).await
    }

    /// Fetch the login QR image. The gateway answers the QR endpoint with an
    /// error once the session is past the scan step; that case is surfaced
    /// as [`QrFetch::AlreadyConnected`] so the caller can re-check status
    /// immediately instead of waiting for the next poll.
    pub async fn fetch_qr(&self) -> Result<QrFetch, ApiError> {
        let url = format!("{}/api/{}/auth/qr", self.base_url, self.session);
        let response = self.with_key(self.http.get(url)).send().await?;
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("image/png")
                .to_string();
            let bytes = response.bytes().await?.to_vec();
            return Ok(QrFetch::Image {
                bytes,
                content_type,
            });
        }
        let body = response.text().await.unwrap_or_default();
        if already_connected_reply(status, &body) {
            return Ok(QrFetch::AlreadyConnected);
        }
        Err(ApiError::Status { status, body })
    }

    pub async fn list_chats(&self) -> Result<Vec<ChatPayload>, ApiError> {
        let url = format!("{}/api/{}/chats", self.base_url, self.session);
        let response = into_api_result(self.with_key(self.http.get(url)).send().await?).await?;
        Ok(response.json().await?)
    }

    /// Message history with attachment data inlined, so the media resolver
    /// has URLs upfront rather than per-render fetches.
    pub async fn list_messages(
        &self,
        chat_id: &str,
        limit: u32,
    ) -> Result<Vec<MessagePayload>, ApiError> {
        let url = format!(
            "{}/api/{}/chats/{}/messages",
            self.base_url, self.session, chat_id
        );
        let limit = limit.to_string();
        let request = self
            .with_key(self.http.get(url))
            .query(&[("downloadMedia", "true"), ("limit", limit.as_str())]);
        let response = into_api_result(request.send().await?).await?;
        Ok(response.json().await?)
    }

    pub async fn send_text(&self, chat_id: &str, text: &str) -> Result<SendTextResult, ApiError> {
        let url = format!("{}/api/sendText", self.base_url);
        let payload = json!({
            "session": self.session,
            "chatId": chat_id,
            "text": text,
        });
        let response = into_api_result(
            self.with_key(self.http.post(url).json(&payload)).send().await?,
        )
        .await?;
        Ok(response.json().await?)
    }

    pub async fn mark_read(&self, chat_id: &str) -> Result<(), ApiError> {
        let url = format!(
            "{}/api/{}/chats/{}/messages/read",
            self.base_url, self.session, chat_id
        );
        let response = self.with_key(self.http.post(url)).send().await?;
        into_api_result(response).await?;
        Ok(())
    }

    fn with_key(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key.as_deref() {
            Some(key) => request.header("X-Api-Key", key),
            None => request,
        }
    }

    async fn discard_already_in_state(&self, response: Response) -> Result<(), ApiError> {
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if already_in_state_reply(status, &body) {
            return Ok(());
        }
        Err(ApiError::Status { status, body })
    }
}

async fn into_api_result(response: Response) -> Result<Response, ApiError> {
    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status { status, body })
}

/// "Session already exists" / "already started" style replies. The gateway
/// reports these as client errors; they mean the remote side is already
/// where we asked it to be.
pub fn already_in_state_reply(status: u16, body: &str) -> bool {
    if !matches!(status, 400 | 409 | 422) {
        return false;
    }
    let body = body.to_lowercase();
    body.contains("already")
}

/// A QR fetch rejected because the session is past the scan step.
pub fn already_connected_reply(status: u16, body: &str) -> bool {
    if !matches!(status, 400 | 404 | 409 | 422) {
        return false;
    }
    let body = body.to_lowercase();
    body.contains("already")
        || body.contains("working")
        || body.contains("connected")
        || body.contains("authenticated")
}

pub enum QrFetch {
    Image { bytes: Vec<u8>, content_type: String },
    AlreadyConnected,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub name: Option<String>,
    pub status: WireStatus,
    pub me: Option<AccountInfo>,
}

impl SessionStatusResponse {
    pub fn session_state(&self) -> SessionState {
        match self.status {
            WireStatus::Stopped => SessionState::Stopped,
            WireStatus::Starting => SessionState::Starting,
            WireStatus::ScanQrCode => SessionState::AwaitingQrScan,
            WireStatus::Authenticating => SessionState::Authenticating,
            WireStatus::Working => SessionState::Connected {
                identity: self
                    .me
                    .as_ref()
                    .and_then(|account| account.push_name.clone()),
            },
            WireStatus::Failed => SessionState::Failed,
            // Gateways grow statuses; treat anything unknown as transitional
            // rather than crashing the poll loop.
            WireStatus::Unknown => SessionState::Starting,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
pub enum WireStatus {
    #[serde(rename = "STOPPED")]
    Stopped,
    #[serde(rename = "STARTING")]
    Starting,
    #[serde(rename = "SCAN_QR_CODE")]
    ScanQrCode,
    #[serde(rename = "AUTHENTICATING")]
    Authenticating,
    #[serde(rename = "WORKING")]
    Working,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub id: Option<String>,
    pub push_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub id: String,
    pub name: Option<String>,
    pub is_group: Option<bool>,
    pub unread_count: Option<u32>,
    pub conversation_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    pub timestamp: i64,
    pub body: Option<String>,
    pub from_me: Option<bool>,
    pub ack: Option<i32>,
    pub has_media: Option<bool>,
    pub media: Option<MediaPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    pub url: Option<String>,
    pub mimetype: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextResult {
    pub id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_working_status_with_identity() {
        let payload = r#"{
            "name": "default",
            "status": "WORKING",
            "me": { "id": "5511999990000@c.us", "pushName": "Ana" }
        }"#;
        let response: SessionStatusResponse = serde_json::from_str(payload).expect("valid json");
        assert_eq!(
            response.session_state(),
            SessionState::Connected {
                identity: Some("Ana".to_string())
            }
        );
    }

    #[test]
    fn maps_every_known_wire_status() {
        let cases = [
            ("STOPPED", SessionState::Stopped),
            ("STARTING", SessionState::Starting),
            ("SCAN_QR_CODE", SessionState::AwaitingQrScan),
            ("AUTHENTICATING", SessionState::Authenticating),
            ("FAILED", SessionState::Failed),
        ];
        for (wire, expected) in cases {
            let payload = format!(r#"{{ "status": "{wire}" }}"#);
            let response: SessionStatusResponse =
                serde_json::from_str(&payload).expect("valid json");
            assert_eq!(response.session_state(), expected, "wire status {wire}");
        }
    }

    #[test]
    fn unknown_wire_status_does_not_fail_parsing() {
        let payload = r#"{ "status": "SOMETHING_NEW" }"#;
        let response: SessionStatusResponse = serde_json::from_str(payload).expect("valid json");
        assert_eq!(response.session_state(), SessionState::Starting);
    }

    #[test]
    fn already_in_state_replies_are_success() {
        assert!(already_in_state_reply(422, "Session already started"));
        assert!(already_in_state_reply(409, r#"{"message":"Session already exists"}"#));
        assert!(!already_in_state_reply(500, "already dead"));
        assert!(!already_in_state_reply(422, "unknown session"));
    }

    #[test]
    fn qr_replies_past_scan_step_are_classified() {
        assert!(already_connected_reply(422, "Session is in WORKING state"));
        assert!(already_connected_reply(400, "already connected"));
        assert!(!already_connected_reply(500, "working on it"));
        assert!(!already_connected_reply(422, "session not found"));
    }

    #[test]
    fn parses_chat_payload() {
        let payload = r#"[
            { "id": "5511999990000@c.us", "name": "Ana", "unreadCount": 5, "conversationTimestamp": 1754500000 },
            { "id": "1203633@g.us", "isGroup": true }
        ]"#;
        let chats: Vec<ChatPayload> = serde_json::from_str(payload).expect("valid json");
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].unread_count, Some(5));
        assert_eq!(chats[1].is_group, Some(true));
    }

    #[test]
    fn parses_message_payload_with_media() {
        let payload = r#"{
            "id": "true_5511999990000@c.us_AAA",
            "timestamp": 1754500000,
            "body": "listen to this",
            "fromMe": false,
            "ack": 2,
            "hasMedia": true,
            "media": { "url": "/api/files/default/voice.oga", "mimetype": "audio/ogg; codecs=opus" }
        }"#;
        let message: MessagePayload = serde_json::from_str(payload).expect("valid json");
        let media = message.media.expect("media present");
        assert_eq!(media.url.as_deref(), Some("/api/files/default/voice.oga"));
    }
}
