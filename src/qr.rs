use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Notify, broadcast};
use tracing::{debug, warn};

use crate::api::{BridgeClient, QrFetch};
use crate::scheduler::Scheduler;
use crate::session::{QR_SLOT, SessionEvent};

const QR_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct QrImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub fetched_at: i64,
}

/// Supplies a fresh login image while the session awaits a scan.
///
/// Fetches immediately on start and then on a fixed cadence. A fetch the
/// gateway rejects because the session is already past the scan step wakes
/// the controller's poll loop out of band, so the UI flips to connected
/// without waiting for the next scheduled status poll.
pub struct QrProvider {
    api: BridgeClient,
    image: Arc<Mutex<Option<QrImage>>>,
}

impl QrProvider {
    pub(crate) fn new(api: BridgeClient) -> Self {
        Self {
            api,
            image: Arc::new(Mutex::new(None)),
        }
    }

    pub fn current(&self) -> Option<QrImage> {
        self.image.lock().expect("qr image lock poisoned").clone()
    }

    pub(crate) fn start(
        &self,
        scheduler: &Scheduler,
        wake: Arc<Notify>,
        events: broadcast::Sender<SessionEvent>,
    ) {
        let api = self.api.clone();
        let image = Arc::clone(&self.image);
        let handle = tokio::spawn(async move {
            loop {
                match api.fetch_qr().await {
                    Ok(QrFetch::Image {
                        bytes,
                        content_type,
                    }) => {
                        *image.lock().expect("qr image lock poisoned") = Some(QrImage {
                            bytes,
                            content_type,
                            fetched_at: current_epoch_seconds(),
                        });
                        let _ = events.send(SessionEvent::QrRefreshed);
                    }
                    Ok(QrFetch::AlreadyConnected) => {
                        debug!("qr endpoint reports session already connected, waking status poll");
                        wake.notify_one();
                    }
                    Err(error) => warn!(%error, "qr fetch failed, retrying on next tick"),
                }
                tokio::time::sleep(QR_REFRESH_INTERVAL).await;
            }
        });
        scheduler.set(QR_SLOT, handle);
    }

    pub(crate) fn stop(&self, scheduler: &Scheduler) {
        scheduler.cancel(QR_SLOT);
        self.clear_image();
    }

    pub(crate) fn clear_image(&self) {
        *self.image.lock().expect("qr image lock poisoned") = None;
    }

    #[cfg(test)]
    pub(crate) fn set_image_for_test(&self, bytes: Vec<u8>) {
        *self.image.lock().expect("qr image lock poisoned") = Some(QrImage {
            bytes,
            content_type: "image/png".to_string(),
            fetched_at: current_epoch_seconds(),
        });
    }
}

fn current_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> QrProvider {
        QrProvider::new(BridgeClient::new(
            "http://127.0.0.1:9".to_string(),
            "default".to_string(),
            None,
        ))
    }

    #[test]
    fn starts_with_no_image() {
        assert!(provider().current().is_none());
    }

    #[tokio::test]
    async fn stop_discards_the_current_image() {
        let provider = provider();
        let scheduler = Scheduler::new();
        provider.set_image_for_test(vec![1, 2, 3]);
        assert!(provider.current().is_some());

        provider.stop(&scheduler);
        assert!(provider.current().is_none());
        assert!(!scheduler.is_scheduled(QR_SLOT));
    }
}
