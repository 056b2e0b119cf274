use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, broadcast};
use tracing::{info, warn};

use crate::api::{ApiError, BridgeClient, WireStatus};
use crate::models::SessionState;
use crate::qr::{QrImage, QrProvider};
use crate::scheduler::Scheduler;
use crate::sync::ChatSyncEngine;

pub(crate) const STATUS_SLOT: &str = "status";
pub(crate) const QR_SLOT: &str = "qr";
pub(crate) const RECONNECT_SLOT: &str = "reconnect";

const RECONNECT_DELAY: Duration = Duration::from_secs(3);
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Notifications pushed to subscribers on observed state changes.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Connected { identity: Option<String> },
    Disconnected,
    Failed,
    Stopped,
    QrRefreshed,
}

/// Side effects of one observed state transition. Computed purely from the
/// previous and next states so the ordering guarantees are testable without
/// a gateway.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Effect {
    StartQr,
    StopQr,
    HydrateChats,
    NotifyConnected(Option<String>),
    NotifyDisconnected,
    NotifyFailed,
    ScheduleReconnect,
}

/// Effects are emitted only on a phase change, never on every poll.
pub(crate) fn transition_effects(prev: &SessionState, next: &SessionState) -> Vec<Effect> {
    if prev.same_phase(next) {
        return Vec::new();
    }
    let mut effects = Vec::new();
    if matches!(prev, SessionState::AwaitingQrScan) {
        effects.push(Effect::StopQr);
    }
    match next {
        SessionState::AwaitingQrScan => effects.push(Effect::StartQr),
        SessionState::Connected { identity } => {
            effects.push(Effect::HydrateChats);
            effects.push(Effect::NotifyConnected(identity.clone()));
        }
        _ => {}
    }
    let dropped = prev.is_connected()
        && matches!(
            next,
            SessionState::AwaitingQrScan | SessionState::Stopped | SessionState::Failed
        );
    if dropped {
        effects.push(Effect::NotifyDisconnected);
        effects.push(Effect::ScheduleReconnect);
    } else if matches!(next, SessionState::Failed) {
        // Failure reported outside an established connection is fatal;
        // recovery needs an explicit user-initiated start.
        effects.push(Effect::NotifyFailed);
    }
    effects
}

/// Poll cadence tracks how time-sensitive the current state is.
pub(crate) fn poll_interval(state: &SessionState) -> Duration {
    match state {
        SessionState::AwaitingQrScan => Duration::from_millis(500),
        SessionState::Starting | SessionState::Authenticating => Duration::from_millis(800),
        SessionState::Connected { .. } => Duration::from_secs(15),
        SessionState::Stopped | SessionState::Failed => Duration::from_secs(2),
    }
}

struct Inner {
    state: SessionState,
    /// Bumped on every stop. Async completions started under an older epoch
    /// discard their results instead of resurrecting timers or effects.
    epoch: u64,
}

/// Root driver of the gateway session.
///
/// Keeps the local [`SessionState`] aligned with the gateway's authoritative
/// status through an adaptively paced poll loop, starts and stops the QR
/// provider on the matching transitions, triggers chat hydration on connect
/// and schedules automatic reconnection after an unexpected drop.
pub struct SessionController {
    api: BridgeClient,
    sync: ChatSyncEngine,
    qr: QrProvider,
    scheduler: Scheduler,
    events: broadcast::Sender<SessionEvent>,
    wake: Arc<Notify>,
    inner: Mutex<Inner>,
}

impl SessionController {
    pub fn new(api: BridgeClient, sync: ChatSyncEngine) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let qr = QrProvider::new(api.clone());
        Arc::new(Self {
            api,
            sync,
            qr,
            scheduler: Scheduler::new(),
            events,
            wake: Arc::new(Notify::new()),
            inner: Mutex::new(Inner {
                state: SessionState::Stopped,
                epoch: 0,
            }),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().expect("session lock poisoned").state.clone()
    }

    pub fn qr_image(&self) -> Option<QrImage> {
        self.qr.current()
    }

    pub fn chats(&self) -> &ChatSyncEngine {
        &self.sync
    }

    /// Idempotent start. Creates the remote session when it does not exist,
    /// issues a start command when it is stopped or failed, and otherwise
    /// just resumes monitoring. "Already started" gateway replies are
    /// success, not errors.
    pub async fn request_start(self: &Arc<Self>) -> Result<(), ApiError> {
        let epoch = self.epoch();
        self.request_start_inner(epoch).await
    }

    async fn request_start_inner(self: &Arc<Self>, epoch: u64) -> Result<(), ApiError> {
        {
            let inner = self.inner.lock().expect("session lock poisoned");
            if inner.epoch != epoch {
                return Ok(());
            }
            if matches!(
                inner.state,
                SessionState::AwaitingQrScan | SessionState::Connected { .. }
            ) {
                let interval = poll_interval(&inner.state);
                drop(inner);
                if !self.scheduler.is_scheduled(STATUS_SLOT) {
                    self.schedule_poll(interval, epoch);
                }
                return Ok(());
            }
        }

        let observed = match self.api.session_status().await? {
            None => {
                self.api.create_session().await?;
                self.api.start_session().await?;
                SessionState::Starting
            }
            Some(response) => match response.status {
                WireStatus::Stopped | WireStatus::Failed => {
                    self.api.start_session().await?;
                    SessionState::Starting
                }
                _ => response.session_state(),
            },
        };
        if self.epoch() != epoch {
            return Ok(());
        }
        let interval = self.apply_status(observed, epoch);
        self.schedule_poll(interval, epoch);
        // First poll right away rather than one interval from now.
        self.wake.notify_one();
        Ok(())
    }

    /// Stop the session: local state is cleared and every owned timer is
    /// cancelled synchronously, then the gateway stop command is issued.
    pub async fn request_stop(self: &Arc<Self>) -> Result<(), ApiError> {
        self.shutdown_local();
        self.api.stop_session().await
    }

    pub(crate) fn shutdown_local(&self) {
        {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            inner.epoch += 1;
            inner.state = SessionState::Stopped;
        }
        self.scheduler.cancel_all();
        self.qr.clear_image();
        let _ = self.events.send(SessionEvent::Stopped);
    }

    /// One status poll. Transient failures are logged and swallowed; the
    /// next scheduled tick retries. Returns the interval the loop should
    /// run at from here on.
    async fn poll_once(self: &Arc<Self>, epoch: u64) -> Option<Duration> {
        let observed = match self.api.session_status().await {
            Ok(Some(response)) => response.session_state(),
            Ok(None) => SessionState::Stopped,
            Err(error) => {
                warn!(%error, "status poll failed, retrying on next tick");
                return None;
            }
        };
        if self.epoch() != epoch {
            return None;
        }
        Some(self.apply_status(observed, epoch))
    }

    /// Record an observed state and run the side effects of the transition.
    /// Effects fire in observed-transition order, comparing against the
    /// previous observed state so transient transitions are not missed.
    pub(crate) fn apply_status(self: &Arc<Self>, next: SessionState, epoch: u64) -> Duration {
        let (prev, effects) = {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            if inner.epoch != epoch {
                return poll_interval(&inner.state);
            }
            let prev = std::mem::replace(&mut inner.state, next.clone());
            (prev.clone(), transition_effects(&prev, &next))
        };
        if !effects.is_empty() {
            info!(from = %prev, to = %next, "session state changed");
        }
        for effect in effects {
            self.run_effect(effect, epoch);
        }
        poll_interval(&next)
    }

    fn run_effect(self: &Arc<Self>, effect: Effect, epoch: u64) {
        match effect {
            Effect::StartQr => {
                self.qr
                    .start(&self.scheduler, Arc::clone(&self.wake), self.events.clone());
            }
            Effect::StopQr => self.qr.stop(&self.scheduler),
            Effect::HydrateChats => {
                let controller = Arc::clone(self);
                tokio::spawn(async move {
                    if controller.epoch() != epoch {
                        return;
                    }
                    if let Err(error) = controller.sync.load_chats().await {
                        warn!(%error, "chat hydration after connect failed");
                    }
                });
            }
            Effect::NotifyConnected(identity) => {
                let _ = self.events.send(SessionEvent::Connected { identity });
            }
            Effect::NotifyDisconnected => {
                let _ = self.events.send(SessionEvent::Disconnected);
            }
            Effect::NotifyFailed => {
                let _ = self.events.send(SessionEvent::Failed);
            }
            Effect::ScheduleReconnect => self.schedule_reconnect(epoch),
        }
    }

    /// The status loop: one named timer, cancelled and recreated with a new
    /// interval whenever the state changes, woken out of band by the QR
    /// provider. Every completion re-checks the epoch before applying.
    fn schedule_poll(self: &Arc<Self>, interval: Duration, epoch: u64) {
        if self.epoch() != epoch {
            return;
        }
        let controller = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = controller.wake.notified() => {}
                }
                if controller.epoch() != epoch {
                    return;
                }
                if let Some(next) = controller.poll_once(epoch).await {
                    if next != interval {
                        controller.schedule_poll(next, epoch);
                        return;
                    }
                }
            }
        });
        self.scheduler.set(STATUS_SLOT, handle);
    }

    /// Recover from an unexpected drop: one delayed start attempt, retried
    /// on the same cadence for as long as it keeps failing.
    fn schedule_reconnect(self: &Arc<Self>, epoch: u64) {
        let controller = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(RECONNECT_DELAY).await;
                if controller.epoch() != epoch {
                    return;
                }
                match controller.request_start_inner(epoch).await {
                    Ok(()) => return,
                    Err(error) => warn!(%error, "automatic reconnect failed, retrying"),
                }
            }
        });
        self.scheduler.set(RECONNECT_SLOT, handle);
    }

    fn epoch(&self) -> u64 {
        self.inner.lock().expect("session lock poisoned").epoch
    }
}
