use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

pub type HandleId = u64;

/// Rates the transport controls accept.
pub const PLAYBACK_RATES: [f32; 3] = [1.0, 1.5, 2.0];

const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("unknown playback handle")]
    UnknownHandle,
    #[error("audio source is not loaded yet")]
    NotReady,
    #[error("audio source failed, controls are unavailable")]
    Unavailable,
    #[error("duration unknown, cannot seek")]
    DurationUnknown,
    #[error("unsupported playback rate {0}")]
    UnsupportedRate(f32),
}

#[derive(Debug, Error)]
#[error("audio sink error: {0}")]
pub struct SinkError(pub String);

/// Per-handle lifecycle. `Errored` is reachable from any phase on a load or
/// playback failure, after which transport calls are rejected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlaybackPhase {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
    Errored,
}

/// Seam to the actual audio backend. The manager owns all logical state;
/// the sink only receives commands and reports metadata.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Load the source and report its duration in seconds, when known.
    async fn load(&self, handle: HandleId, url: &str) -> Result<Option<f32>, SinkError>;
    fn begin(&self, handle: HandleId, url: &str, position: f32, rate: f32);
    fn pause(&self, handle: HandleId);
    fn seek(&self, handle: HandleId, position: f32);
    fn set_rate(&self, handle: HandleId, rate: f32);
}

#[derive(Clone, Debug)]
pub struct HandleSnapshot {
    pub id: HandleId,
    pub url: String,
    pub phase: PlaybackPhase,
    pub position: f32,
    pub duration: Option<f32>,
    pub rate: f32,
}

struct HandleState {
    url: String,
    phase: PlaybackPhase,
    position: f32,
    duration: Option<f32>,
    rate: f32,
}

#[derive(Default)]
struct Registry {
    handles: HashMap<HandleId, HandleState>,
    next_id: HandleId,
}

/// Owns every audio handle in the process and enforces the one invariant
/// that matters here: at most one handle is `Playing` at any time. All
/// mutation funnels through this type; nothing else talks to the sink.
pub struct AudioPlaybackManager {
    sink: Arc<dyn AudioSink>,
    load_timeout: Duration,
    registry: Mutex<Registry>,
}

impl AudioPlaybackManager {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self::with_load_timeout(sink, DEFAULT_LOAD_TIMEOUT)
    }

    pub fn with_load_timeout(sink: Arc<dyn AudioSink>, load_timeout: Duration) -> Self {
        Self {
            sink,
            load_timeout,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn register(&self, url: impl Into<String>) -> HandleId {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handles.insert(
            id,
            HandleState {
                url: url.into(),
                phase: PlaybackPhase::Idle,
                position: 0.0,
                duration: None,
                rate: PLAYBACK_RATES[0],
            },
        );
        id
    }

    /// Drop a handle (its message left the screen).
    pub fn release(&self, id: HandleId) {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .handles
            .remove(&id);
    }

    /// Load source metadata with a bounded timeout. A sink that never
    /// answers leaves the handle `Ready` with unknown duration — the
    /// controls must stay usable even if metadata never arrives.
    pub async fn load(&self, id: HandleId) -> Result<(), PlaybackError> {
        let url = {
            let mut registry = self.registry.lock().expect("registry lock poisoned");
            let handle = registry
                .handles
                .get_mut(&id)
                .ok_or(PlaybackError::UnknownHandle)?;
            handle.phase = PlaybackPhase::Loading;
            handle.url.clone()
        };

        let outcome = tokio::time::timeout(self.load_timeout, self.sink.load(id, &url)).await;

        let mut registry = self.registry.lock().expect("registry lock poisoned");
        // The handle may have been released while the sink was loading.
        let Some(handle) = registry.handles.get_mut(&id) else {
            return Ok(());
        };
        if handle.phase != PlaybackPhase::Loading {
            return Ok(());
        }
        match outcome {
            Ok(Ok(duration)) => {
                handle.duration = duration;
                handle.phase = PlaybackPhase::Ready;
                Ok(())
            }
            Ok(Err(error)) => {
                warn!(handle = id, %error, "audio load failed");
                handle.phase = PlaybackPhase::Errored;
                Err(PlaybackError::Unavailable)
            }
            Err(_) => {
                debug!(handle = id, "audio metadata timed out, duration unknown");
                handle.duration = None;
                handle.phase = PlaybackPhase::Ready;
                Ok(())
            }
        }
    }

    /// Start (or resume) playback, pausing whichever other handle currently
    /// plays. This gate is the only path into the `Playing` phase.
    pub fn play(&self, id: HandleId) -> Result<(), PlaybackError> {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        match registry.handles.get(&id) {
            None => return Err(PlaybackError::UnknownHandle),
            Some(handle) => match handle.phase {
                PlaybackPhase::Errored => return Err(PlaybackError::Unavailable),
                PlaybackPhase::Idle | PlaybackPhase::Loading => {
                    return Err(PlaybackError::NotReady);
                }
                PlaybackPhase::Ready
                | PlaybackPhase::Playing
                | PlaybackPhase::Paused
                | PlaybackPhase::Ended => {}
            },
        }

        let playing: Vec<HandleId> = registry
            .handles
            .iter()
            .filter(|(other, state)| **other != id && state.phase == PlaybackPhase::Playing)
            .map(|(other, _)| *other)
            .collect();
        for other in playing {
            if let Some(state) = registry.handles.get_mut(&other) {
                state.phase = PlaybackPhase::Paused;
            }
            self.sink.pause(other);
        }

        let handle = registry
            .handles
            .get_mut(&id)
            .ok_or(PlaybackError::UnknownHandle)?;
        if handle.phase == PlaybackPhase::Ended {
            handle.position = 0.0;
        }
        handle.phase = PlaybackPhase::Playing;
        self.sink.begin(id, &handle.url, handle.position, handle.rate);
        Ok(())
    }

    pub fn pause(&self, id: HandleId) -> Result<(), PlaybackError> {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        let handle = registry
            .handles
            .get_mut(&id)
            .ok_or(PlaybackError::UnknownHandle)?;
        if handle.phase == PlaybackPhase::Errored {
            return Err(PlaybackError::Unavailable);
        }
        if handle.phase == PlaybackPhase::Playing {
            handle.phase = PlaybackPhase::Paused;
            self.sink.pause(id);
        }
        Ok(())
    }

    /// Seeking needs a known duration to clamp against.
    pub fn seek(&self, id: HandleId, position: f32) -> Result<(), PlaybackError> {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        let handle = registry
            .handles
            .get_mut(&id)
            .ok_or(PlaybackError::UnknownHandle)?;
        if handle.phase == PlaybackPhase::Errored {
            return Err(PlaybackError::Unavailable);
        }
        let duration = handle.duration.ok_or(PlaybackError::DurationUnknown)?;
        let position = position.clamp(0.0, duration);
        handle.position = position;
        self.sink.seek(id, position);
        Ok(())
    }

    pub fn set_rate(&self, id: HandleId, rate: f32) -> Result<(), PlaybackError> {
        if !PLAYBACK_RATES.iter().any(|known| (known - rate).abs() < f32::EPSILON) {
            return Err(PlaybackError::UnsupportedRate(rate));
        }
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        let handle = registry
            .handles
            .get_mut(&id)
            .ok_or(PlaybackError::UnknownHandle)?;
        if handle.phase == PlaybackPhase::Errored {
            return Err(PlaybackError::Unavailable);
        }
        handle.rate = rate;
        if handle.phase == PlaybackPhase::Playing {
            self.sink.set_rate(id, rate);
        }
        Ok(())
    }

    /// Position report from the sink.
    pub fn note_progress(&self, id: HandleId, position: f32) {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        if let Some(handle) = registry.handles.get_mut(&id) {
            handle.position = position;
        }
    }

    /// The sink reached the end of the source.
    pub fn note_ended(&self, id: HandleId) {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        if let Some(handle) = registry.handles.get_mut(&id) {
            handle.phase = PlaybackPhase::Ended;
        }
    }

    /// Playback failure from the sink. Controls on this handle become inert;
    /// the caller presents a fallback (a raw download link) instead.
    pub fn note_error(&self, id: HandleId) {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        if let Some(handle) = registry.handles.get_mut(&id) {
            handle.phase = PlaybackPhase::Errored;
        }
    }

    pub fn playing(&self) -> Option<HandleId> {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .handles
            .iter()
            .find(|(_, state)| state.phase == PlaybackPhase::Playing)
            .map(|(id, _)| *id)
    }

    pub fn snapshot(&self, id: HandleId) -> Option<HandleSnapshot> {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .handles
            .get(&id)
            .map(|state| HandleSnapshot {
                id,
                url: state.url.clone(),
                phase: state.phase,
                position: state.position,
                duration: state.duration,
                rate: state.rate,
            })
    }

    #[cfg(test)]
    fn playing_count(&self) -> usize {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .handles
            .values()
            .filter(|state| state.phase == PlaybackPhase::Playing)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    enum SinkCall {
        Begin(HandleId, f32),
        Pause(HandleId),
        Seek(HandleId, f32),
        Rate(HandleId, f32),
    }

    #[derive(Default)]
    struct FakeSink {
        duration: Option<f32>,
        fail_load: bool,
        hang_load: bool,
        calls: Mutex<Vec<SinkCall>>,
    }

    impl FakeSink {
        fn with_duration(duration: f32) -> Self {
            Self {
                duration: Some(duration),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<SinkCall> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl AudioSink for FakeSink {
        async fn load(&self, _handle: HandleId, _url: &str) -> Result<Option<f32>, SinkError> {
            if self.hang_load {
                std::future::pending::<()>().await;
            }
            if self.fail_load {
                return Err(SinkError("decode failure".to_string()));
            }
            Ok(self.duration)
        }

        fn begin(&self, handle: HandleId, _url: &str, _position: f32, rate: f32) {
            self.calls
                .lock()
                .expect("calls lock")
                .push(SinkCall::Begin(handle, rate));
        }

        fn pause(&self, handle: HandleId) {
            self.calls.lock().expect("calls lock").push(SinkCall::Pause(handle));
        }

        fn seek(&self, handle: HandleId, position: f32) {
            self.calls
                .lock()
                .expect("calls lock")
                .push(SinkCall::Seek(handle, position));
        }

        fn set_rate(&self, handle: HandleId, rate: f32) {
            self.calls
                .lock()
                .expect("calls lock")
                .push(SinkCall::Rate(handle, rate));
        }
    }

    async fn ready_manager(sink: Arc<FakeSink>, handles: usize) -> (AudioPlaybackManager, Vec<HandleId>) {
        let manager = AudioPlaybackManager::new(sink);
        let mut ids = Vec::new();
        for index in 0..handles {
            let id = manager.register(format!("http://localhost:3000/api/files/default/{index}.oga"));
            manager.load(id).await.expect("load");
            ids.push(id);
        }
        (manager, ids)
    }

    #[tokio::test]
    async fn playing_a_second_handle_pauses_the_first() {
        let sink = Arc::new(FakeSink::with_duration(12.0));
        let (manager, ids) = ready_manager(sink.clone(), 2).await;
        let (a, b) = (ids[0], ids[1]);

        manager.play(a).expect("play a");
        manager.play(b).expect("play b");

        assert_eq!(manager.snapshot(a).expect("a").phase, PlaybackPhase::Paused);
        assert_eq!(manager.snapshot(b).expect("b").phase, PlaybackPhase::Playing);
        assert!(sink.calls().contains(&SinkCall::Pause(a)));
    }

    #[tokio::test]
    async fn at_most_one_handle_plays_across_many() {
        let sink = Arc::new(FakeSink::with_duration(30.0));
        let (manager, ids) = ready_manager(sink, 5).await;

        for id in &ids {
            manager.play(*id).expect("play");
            assert_eq!(manager.playing_count(), 1);
            assert_eq!(manager.playing(), Some(*id));
        }
    }

    #[tokio::test]
    async fn seek_requires_known_duration() {
        let sink = Arc::new(FakeSink::default());
        let (manager, ids) = ready_manager(sink, 1).await;
        let error = manager.seek(ids[0], 3.0).expect_err("no duration");
        assert!(matches!(error, PlaybackError::DurationUnknown));
    }

    #[tokio::test]
    async fn seek_clamps_to_duration() {
        let sink = Arc::new(FakeSink::with_duration(10.0));
        let (manager, ids) = ready_manager(sink.clone(), 1).await;
        manager.seek(ids[0], 99.0).expect("seek");
        assert_eq!(sink.calls(), vec![SinkCall::Seek(ids[0], 10.0)]);
    }

    #[tokio::test]
    async fn load_timeout_leaves_handle_usable_without_duration() {
        let sink = Arc::new(FakeSink {
            hang_load: true,
            ..FakeSink::default()
        });
        let manager =
            AudioPlaybackManager::with_load_timeout(sink, Duration::from_millis(20));
        let id = manager.register("http://localhost:3000/a.oga");
        manager.load(id).await.expect("load resolves via timeout");

        let snapshot = manager.snapshot(id).expect("snapshot");
        assert_eq!(snapshot.phase, PlaybackPhase::Ready);
        assert_eq!(snapshot.duration, None);
        manager.play(id).expect("playable without duration");
    }

    #[tokio::test]
    async fn failed_load_makes_controls_inert() {
        let sink = Arc::new(FakeSink {
            fail_load: true,
            ..FakeSink::default()
        });
        let manager = AudioPlaybackManager::new(sink);
        let id = manager.register("http://localhost:3000/a.oga");
        let error = manager.load(id).await.expect_err("load fails");
        assert!(matches!(error, PlaybackError::Unavailable));

        assert!(matches!(manager.play(id), Err(PlaybackError::Unavailable)));
        assert!(matches!(manager.seek(id, 1.0), Err(PlaybackError::Unavailable)));
        assert!(matches!(manager.set_rate(id, 1.5), Err(PlaybackError::Unavailable)));
    }

    #[tokio::test]
    async fn rates_outside_the_fixed_set_are_rejected() {
        let sink = Arc::new(FakeSink::with_duration(5.0));
        let (manager, ids) = ready_manager(sink.clone(), 1).await;
        assert!(matches!(
            manager.set_rate(ids[0], 1.25),
            Err(PlaybackError::UnsupportedRate(_))
        ));

        manager.play(ids[0]).expect("play");
        manager.set_rate(ids[0], 2.0).expect("rate");
        assert!(sink.calls().contains(&SinkCall::Rate(ids[0], 2.0)));
    }

    #[tokio::test]
    async fn replay_after_ended_restarts_from_zero() {
        let sink = Arc::new(FakeSink::with_duration(5.0));
        let (manager, ids) = ready_manager(sink.clone(), 1).await;
        let id = ids[0];

        manager.play(id).expect("play");
        manager.note_progress(id, 5.0);
        manager.note_ended(id);
        assert_eq!(manager.snapshot(id).expect("snapshot").phase, PlaybackPhase::Ended);

        manager.play(id).expect("replay");
        let snapshot = manager.snapshot(id).expect("snapshot");
        assert_eq!(snapshot.phase, PlaybackPhase::Playing);
        assert_eq!(snapshot.position, 0.0);
    }

    #[tokio::test]
    async fn play_before_load_is_rejected() {
        let sink = Arc::new(FakeSink::with_duration(5.0));
        let manager = AudioPlaybackManager::new(sink);
        let id = manager.register("http://localhost:3000/a.oga");
        assert!(matches!(manager.play(id), Err(PlaybackError::NotReady)));
    }
}
