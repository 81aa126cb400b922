//! Session controller: lifecycle of one realtime voice conversation.

use std::fmt;

use serde_json::Value;
use tokio::sync::mpsc;

use super::subscribers::{Subscribers, Subscription};
use super::{ConnectionState, SessionUpdate};
use crate::audio::capture::{AudioCapture, CaptureDevice, CaptureFrame, CaptureStatus};
use crate::audio::pcm::{decode, encode_base64};
use crate::audio::playback::{PlaybackSink, StreamPlayer, TrackOffset};
use crate::config::{SessionConfig, TurnDetection};
use crate::error::{ParleyError, Result};
use crate::realtime::conversation::{Conversation, ConversationItem, ConversationUpdate, ItemDelta};
use crate::realtime::events::{EventLog, EventSource, RealtimeEventRecord};
use crate::realtime::protocol::{
    ClientEvent, ContentPart, MessageParams, ServerEvent, ServerEventKind, SessionParams,
    TranscriptionParams, TurnDetectionParams,
};
use crate::realtime::transport::RealtimeTransport;

enum Next {
    Frame(Option<CaptureFrame>),
    Event(Option<ServerEvent>),
}

/// Owns one session together with its transport, capture, and playback handles.
///
/// Built and torn down by the caller. Dropping the controller releases the
/// microphone and aborts the transport.
pub struct SessionController<T, C, P>
where
    T: RealtimeTransport,
    C: CaptureDevice,
    P: PlaybackSink,
{
    config: SessionConfig,
    transport: T,
    capture: AudioCapture<C>,
    player: StreamPlayer<P>,
    state: ConnectionState,
    turn_detection: TurnDetection,
    conversation: Conversation,
    events: EventLog,
    subscribers: Subscribers,
    frames_tx: mpsc::UnboundedSender<CaptureFrame>,
    frames_rx: mpsc::UnboundedReceiver<CaptureFrame>,
    last_interrupt: Option<TrackOffset>,
}

impl<T, C, P> fmt::Debug for SessionController<T, C, P>
where
    T: RealtimeTransport,
    C: CaptureDevice,
    P: PlaybackSink,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state)
            .field("turn_detection", &self.turn_detection)
            .field("capture", &self.capture)
            .field("player", &self.player)
            .field("items", &self.conversation.len())
            .field("events", &self.events.len())
            .finish()
    }
}

impl<T, C, P> SessionController<T, C, P>
where
    T: RealtimeTransport,
    C: CaptureDevice,
    P: PlaybackSink,
{
    pub fn new(config: SessionConfig, transport: T, microphone: C, speaker: P) -> Result<Self> {
        config.validate()?;
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        Ok(Self {
            capture: AudioCapture::new(microphone, config.sample_rate),
            player: StreamPlayer::new(speaker, config.sample_rate),
            conversation: Conversation::new(config.sample_rate),
            turn_detection: TurnDetection::None,
            config,
            transport,
            state: ConnectionState::Disconnected,
            events: EventLog::new(),
            subscribers: Subscribers::default(),
            frames_tx,
            frames_rx,
            last_interrupt: None,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the session is connected and the transport still is.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.transport.is_connected()
    }

    /// Turn detection currently applied to the remote session.
    pub fn turn_detection(&self) -> TurnDetection {
        self.turn_detection
    }

    pub fn capture_status(&self) -> CaptureStatus {
        self.capture.status()
    }

    pub fn items(&self) -> Vec<ConversationItem> {
        self.conversation.items()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn events(&self) -> &[RealtimeEventRecord] {
        self.events.records()
    }

    /// Where playback was cut by the last `disconnect()`.
    pub fn last_interrupt(&self) -> Option<&TrackOffset> {
        self.last_interrupt.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn capture(&self) -> &AudioCapture<C> {
        &self.capture
    }

    pub fn player(&self) -> &StreamPlayer<P> {
        &self.player
    }

    pub fn subscribe(&mut self) -> Subscription {
        self.subscribers.subscribe()
    }

    /// Returns whether `id` was subscribed.
    pub fn unsubscribe(&mut self, id: u64) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Connect, configure the remote session, greet, and start streaming.
    ///
    /// On failure every acquired resource is released and the state is back
    /// to `Disconnected`. Retrying is up to the caller. If this future is
    /// dropped mid-way the state stays `Connecting` until `disconnect()`.
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Connecting => return Err(ParleyError::AlreadyConnecting),
            ConnectionState::Connected => return Err(ParleyError::AlreadyConnected),
            ConnectionState::Disconnected => {}
        }
        self.set_state(ConnectionState::Connecting);

        if let Err(error) = self.establish().await {
            tracing::warn!(error = %error, "realtime connect failed");
            self.release_resources().await;
            self.set_state(ConnectionState::Disconnected);
            return Err(error);
        }
        Ok(())
    }

    async fn establish(&mut self) -> Result<()> {
        if self.capture.status() == CaptureStatus::Recording {
            self.capture.pause()?;
        }
        self.conversation.reset_input();
        self.capture.begin()?;
        self.player.connect()?;
        self.transport.connect().await?;
        self.set_state(ConnectionState::Connected);

        let params = self.session_params();
        self.update_session(params).await?;
        if let Some(greeting) = self.config.greeting.clone() {
            self.send_user_message_content(vec![ContentPart::InputText { text: greeting }])
                .await?;
        }
        if self.turn_detection == TurnDetection::ServerVad {
            self.start_streaming()?;
        }
        tracing::debug!(turn_detection = %self.turn_detection, "realtime session connected");
        Ok(())
    }

    /// Close the connection, release the microphone, and flush playback.
    ///
    /// Never fails: cleanup errors are logged and swallowed.
    pub async fn disconnect(&mut self) {
        self.release_resources().await;
        self.set_state(ConnectionState::Disconnected);
    }

    async fn release_resources(&mut self) {
        if let Err(error) = self.transport.disconnect().await {
            tracing::warn!(error = %error, "transport disconnect failed");
        }
        self.capture.end();
        if let Some(offset) = self.player.interrupt() {
            tracing::debug!(item_id = %offset.item_id, offset = offset.offset_samples, "playback interrupted");
            self.last_interrupt = Some(offset);
        }
        self.restart_frame_channel();
    }

    /// Clear items and the event log. Device and connection handles are left alone.
    pub fn reset(&mut self) {
        self.conversation.clear();
        self.events.clear();
        self.last_interrupt = None;
    }

    /// Apply session parameters on the remote endpoint.
    pub async fn update_session(&mut self, session: SessionParams) -> Result<()> {
        let turn_detection = session
            .turn_detection
            .as_ref()
            .map(|params| params.kind)
            .unwrap_or(TurnDetection::None);
        self.send(ClientEvent::SessionUpdate { session }).await?;
        self.turn_detection = turn_detection;
        Ok(())
    }

    /// Add a user message and ask for a response.
    pub async fn send_user_message_content(&mut self, content: Vec<ContentPart>) -> Result<()> {
        self.send(ClientEvent::ConversationItemCreate {
            item: MessageParams::user(content),
        })
        .await?;
        self.send(ClientEvent::ResponseCreate).await
    }

    /// Stream one buffer of captured PCM16 to the remote input buffer.
    pub async fn append_input_audio(&mut self, samples: &[i16]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.send(ClientEvent::InputAudioBufferAppend {
            audio: encode_base64(samples),
        })
        .await?;
        self.conversation.queue_input_audio(samples);
        Ok(())
    }

    /// Handle one captured frame or one server event.
    ///
    /// Returns `false` once the session is no longer connected.
    pub async fn process_next(&mut self) -> Result<bool> {
        if self.state != ConnectionState::Connected {
            self.discard_pending_frames();
            return Ok(false);
        }

        let next = tokio::select! {
            biased;
            frame = self.frames_rx.recv() => Next::Frame(frame),
            event = self.transport.next_event() => Next::Event(event),
        };

        match next {
            Next::Frame(Some(frame)) => {
                if let Err(error) = self.append_input_audio(&frame.mono).await {
                    tracing::warn!(error = %error, sequence = frame.sequence, "input audio send failed");
                    self.disconnect().await;
                    return Err(error);
                }
                Ok(true)
            }
            Next::Frame(None) => Ok(true),
            Next::Event(Some(event)) => {
                self.handle_server_event(event);
                Ok(true)
            }
            Next::Event(None) => {
                tracing::debug!("remote endpoint closed the session");
                self.disconnect().await;
                Ok(false)
            }
        }
    }

    /// Drive the session until it disconnects.
    pub async fn run(&mut self) -> Result<()> {
        while self.process_next().await? {}
        Ok(())
    }

    /// Log a server event and fold it into the conversation.
    ///
    /// Events that arrive while disconnected are discarded.
    pub fn handle_server_event(&mut self, event: ServerEvent) {
        if self.state == ConnectionState::Disconnected {
            tracing::debug!(event_type = %event.event_type, "discarding event after disconnect");
            return;
        }
        self.record(EventSource::Server, &event.event_type, event.payload.clone());

        match &event.kind {
            ServerEventKind::Error { message } => {
                tracing::warn!(error = %message, "realtime server error");
            }
            ServerEventKind::SessionUpdated { turn_detection } => {
                if *turn_detection != self.turn_detection {
                    tracing::debug!(
                        requested = %self.turn_detection,
                        reported = %turn_detection,
                        "server reports different turn detection"
                    );
                }
            }
            _ => {}
        }

        if let Some(update) = self.conversation.apply(&event) {
            self.route_update(update);
        }
    }

    fn route_update(&mut self, mut update: ConversationUpdate) {
        if let Some(ItemDelta::Audio(bytes)) = &update.delta {
            if let Err(error) = self.player.add_16bit_pcm(bytes, &update.item.id) {
                tracing::warn!(error = %error, item_id = %update.item.id, "dropping audio delta");
            }
        }

        if update.item.is_completed() && update.item.audio_bytes > 0 && update.item.artifact.is_none()
        {
            let rate = self.config.sample_rate;
            let decoded = self
                .conversation
                .audio(&update.item.id)
                .map(|audio| decode(audio, rate, rate));
            match decoded {
                Some(Ok(artifact)) => {
                    if let Some(item) = self.conversation.attach_artifact(&update.item.id, artifact) {
                        update.item = item;
                    }
                }
                Some(Err(error)) => {
                    tracing::warn!(error = %error, item_id = %update.item.id, "item audio decode failed");
                }
                None => {}
            }
        }

        self.subscribers.publish(SessionUpdate::Conversation(update));
    }

    fn session_params(&self) -> SessionParams {
        SessionParams {
            turn_detection: match self.config.turn_detection {
                TurnDetection::None => None,
                kind => Some(TurnDetectionParams { kind }),
            },
            input_audio_transcription: self
                .config
                .transcription_model
                .clone()
                .map(|model| TranscriptionParams { model }),
            instructions: self.config.instructions.clone(),
            voice: self.config.voice.clone(),
            input_audio_format: "pcm16",
            output_audio_format: "pcm16",
        }
    }

    fn start_streaming(&mut self) -> Result<()> {
        self.restart_frame_channel();
        let frames_tx = self.frames_tx.clone();
        self.capture.record(move |frame| {
            // Fails only after the controller moved on to a new channel.
            let _ = frames_tx.send(frame);
        })
    }

    /// Swap in a fresh frame channel so frames from an old recording are never forwarded.
    fn restart_frame_channel(&mut self) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        self.frames_tx = frames_tx;
        self.frames_rx = frames_rx;
    }

    fn discard_pending_frames(&mut self) {
        while self.frames_rx.try_recv().is_ok() {}
    }

    async fn send(&mut self, event: ClientEvent) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(ParleyError::InvalidState(format!(
                "Cannot send {} while {}",
                event.event_type(),
                self.state
            )));
        }
        let payload = event.to_payload()?;
        self.record(EventSource::Client, event.event_type(), payload.clone());
        self.transport.send(payload).await
    }

    fn record(&mut self, source: EventSource, event_type: &str, payload: Value) {
        let record = self.events.push(source, event_type, payload).clone();
        self.subscribers.publish(SessionUpdate::Event(record));
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.subscribers.publish(SessionUpdate::State(state));
        }
    }
}
