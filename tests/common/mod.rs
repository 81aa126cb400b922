//! Scripted stand-ins for the transport, microphone, and speaker.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use parley::audio::{CaptureDevice, PlaybackSink, SampleCallback};
use parley::config::SessionConfig;
use parley::error::{ParleyError, Result};
use parley::realtime::{RealtimeTransport, ServerEvent};
use parley::session::SessionController;
use serde_json::Value;
use tokio::sync::mpsc;

pub type TestSession = SessionController<FakeTransport, FakeMic, FakeSpeaker>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("fake state lock should not poison")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectBehavior {
    #[default]
    Accept,
    Reject,
    Hang,
}

#[derive(Debug, Default)]
pub struct TransportState {
    pub behavior: ConnectBehavior,
    pub connected: bool,
    pub connects: usize,
    pub disconnects: usize,
    pub sent: Vec<Value>,
}

pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

/// Test-side view of a [`FakeTransport`].
#[derive(Clone)]
pub struct TransportHandle {
    state: Arc<Mutex<TransportState>>,
    events_tx: Option<mpsc::UnboundedSender<ServerEvent>>,
}

impl FakeTransport {
    pub fn new(behavior: ConnectBehavior) -> (Self, TransportHandle) {
        let state = Arc::new(Mutex::new(TransportState {
            behavior,
            ..TransportState::default()
        }));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::clone(&state),
                events_rx,
            },
            TransportHandle {
                state,
                events_tx: Some(events_tx),
            },
        )
    }
}

impl TransportHandle {
    /// Queue a server event payload for the controller to receive.
    pub fn push(&self, payload: Value) {
        let event = ServerEvent::from_payload(payload).expect("payload should carry a type");
        self.events_tx
            .as_ref()
            .expect("event stream should be open")
            .send(event)
            .expect("transport should still be alive");
    }

    /// End the server event stream, as a remote close would.
    pub fn close_stream(&mut self) {
        self.events_tx = None;
    }

    pub fn sent(&self) -> Vec<Value> {
        lock(&self.state).sent.clone()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|payload| payload["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn state(&self) -> MutexGuard<'_, TransportState> {
        lock(&self.state)
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn connect(&mut self) -> Result<()> {
        let behavior = {
            let mut state = lock(&self.state);
            state.connects += 1;
            state.behavior
        };
        match behavior {
            ConnectBehavior::Accept => {
                lock(&self.state).connected = true;
                Ok(())
            }
            ConnectBehavior::Reject => Err(ParleyError::RemoteConnectionFailed(
                "handshake refused".into(),
            )),
            ConnectBehavior::Hang => std::future::pending::<Result<()>>().await,
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.connected = false;
        state.disconnects += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    async fn send(&mut self, payload: Value) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(ParleyError::InvalidState("fake transport closed".into()));
        }
        state.sent.push(payload);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events_rx.recv().await
    }
}

#[derive(Default)]
pub struct MicState {
    pub unavailable: bool,
    pub acquired: bool,
    pub streaming: bool,
    pub acquires: usize,
    pub releases: usize,
    callback: Option<SampleCallback>,
}

#[derive(Clone, Default)]
pub struct FakeMic {
    state: Arc<Mutex<MicState>>,
}

impl FakeMic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        let mic = Self::default();
        lock(&mic.state).unavailable = true;
        mic
    }

    /// Deliver one buffer as if the hardware captured it.
    pub fn speak(&self, samples: &[i16]) {
        let mut state = lock(&self.state);
        if let Some(callback) = state.callback.as_mut() {
            callback(samples);
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MicState> {
        lock(&self.state)
    }
}

impl CaptureDevice for FakeMic {
    fn acquire(&mut self, _sample_rate: u32) -> Result<()> {
        let mut state = lock(&self.state);
        if state.unavailable {
            return Err(ParleyError::DeviceUnavailable("no input device".into()));
        }
        state.acquired = true;
        state.acquires += 1;
        Ok(())
    }

    fn start_stream(&mut self, on_samples: SampleCallback) -> Result<()> {
        let mut state = lock(&self.state);
        state.callback = Some(on_samples);
        state.streaming = true;
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.callback = None;
        state.streaming = false;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.callback = None;
        state.acquired = false;
        state.streaming = false;
        state.releases += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SpeakerState {
    pub open: bool,
    pub writes: Vec<(String, Vec<i16>)>,
    pub flushes: usize,
    /// Samples the fake hardware has "played".
    pub played: u64,
}

#[derive(Clone, Default)]
pub struct FakeSpeaker {
    state: Arc<Mutex<SpeakerState>>,
}

impl FakeSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, samples: u64) {
        lock(&self.state).played += samples;
    }

    pub fn state(&self) -> MutexGuard<'_, SpeakerState> {
        lock(&self.state)
    }
}

impl PlaybackSink for FakeSpeaker {
    fn open(&mut self, _sample_rate: u32) -> Result<()> {
        lock(&self.state).open = true;
        Ok(())
    }

    fn write(&mut self, item_id: &str, samples: &[i16]) -> Result<()> {
        lock(&self.state)
            .writes
            .push((item_id.to_string(), samples.to_vec()));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        lock(&self.state).flushes += 1;
        Ok(())
    }

    fn position(&self) -> u64 {
        lock(&self.state).played
    }
}

/// Config that points at a relay so no credential lookup happens.
pub fn relay_config() -> SessionConfig {
    SessionConfig {
        relay_url: Some("ws://127.0.0.1:8081".into()),
        ..SessionConfig::default()
    }
}

pub struct Harness {
    pub session: TestSession,
    pub transport: TransportHandle,
    pub mic: FakeMic,
    pub speaker: FakeSpeaker,
}

pub fn harness(behavior: ConnectBehavior) -> Harness {
    harness_with(relay_config(), behavior, FakeMic::new())
}

pub fn harness_with(config: SessionConfig, behavior: ConnectBehavior, mic: FakeMic) -> Harness {
    let (transport, handle) = FakeTransport::new(behavior);
    let speaker = FakeSpeaker::new();
    let session = SessionController::new(config, transport, mic.clone(), speaker.clone())
        .expect("config should validate");
    Harness {
        session,
        transport: handle,
        mic,
        speaker,
    }
}
