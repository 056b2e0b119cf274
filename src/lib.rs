//! Bridge subsystem for a session-oriented messaging gateway.
//!
//! Supervises a long-lived gateway session (QR login, adaptive status
//! polling, silent reconnection), mirrors its chat and message lists,
//! sends outgoing text with an optimistic local echo and enforces
//! exclusive-ownership audio playback for embedded attachments.

pub mod api;
pub mod config;
pub mod media;
pub mod models;
pub mod outbox;
pub mod output;
pub mod playback;
pub mod qr;
pub mod scheduler;
pub mod session;
pub mod sync;

pub use api::{ApiError, BridgeClient};
pub use config::Config;
pub use media::MediaResolver;
pub use models::{ChatFilter, ChatSummary, Message, SessionState};
pub use outbox::MessageChannel;
pub use playback::{AudioPlaybackManager, AudioSink};
pub use qr::QrImage;
pub use session::{SessionController, SessionEvent};
pub use sync::ChatSyncEngine;
