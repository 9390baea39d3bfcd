//! Stream playback engine - lifecycle and orchestration
//!
//! [`StreamEngine`] is the public handle: non-blocking command methods plus
//! event subscription. The work happens in [`EngineCore`], a single task that
//! owns every mutable piece (transport, decode session, buffer queue, sink)
//! and multiplexes their channels in one select loop. One owner, no state
//! lock ordering to reason about.
//!
//! A connection attempt creates a *session*: a transport event channel, a
//! byte channel into a blocking decode worker, and a PCM channel back out.
//! Tearing the session down drops those channels, which both stops the
//! worker and structurally discards any events still in flight from the old
//! connection. A generation counter does the same for reconnect timers.

use crate::audio::decoder::StreamDecoder;
use crate::audio::types::PcmBuffer;
use crate::config::StreamConfig;
use crate::error::Error;
use crate::events::PlayerEvent;
use crate::playback::queue::BufferQueue;
use crate::playback::sink::{AudioSink, SinkEvent};
use crate::state::{SharedState, StreamState};
use crate::transport::{StreamTransport, TransportEvent};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Commands accepted by the engine task.
#[derive(Debug, Clone, PartialEq)]
enum EngineCommand {
    Play,
    Pause,
    Stop,
    SetVolume(f32),
    Shutdown,
}

/// Timer callbacks routed back into the engine task.
#[derive(Debug)]
enum InternalEvent {
    /// A scheduled reconnect delay elapsed
    ReconnectDue { generation: u64 },
}

/// Public handle to a stream engine.
///
/// Cheap to construct; [`start`](StreamEngine::start) spawns the engine task
/// onto the current runtime. Command methods never block and may be called
/// from any state.
pub struct StreamEngine {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
    shared: Arc<SharedState>,
    core: Option<EngineCore>,
}

impl StreamEngine {
    /// Create an engine from its three collaborators.
    ///
    /// The transport and sink are trait objects so tests can substitute
    /// scripted fakes for the network and the audio device.
    pub fn new(
        config: StreamConfig,
        transport: Box<dyn StreamTransport>,
        mut sink: Box<dyn AudioSink>,
    ) -> Self {
        let config = config.normalized();
        let shared = Arc::new(SharedState::new());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        sink.set_event_channel(sink_tx);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let queue = BufferQueue::new(
            config.buffer_queue_size,
            config.minimum_buffers_before_playback,
        );

        let core = EngineCore {
            config,
            shared: Arc::clone(&shared),
            transport,
            sink,
            queue,
            state: StreamState::Idle,
            transport_rx: None,
            pcm_rx: None,
            bytes_tx: None,
            generation: 0,
            reconnect_attempts: 0,
            cmd_rx,
            sink_rx,
            internal_tx,
            internal_rx,
        };

        Self {
            cmd_tx,
            shared,
            core: Some(core),
        }
    }

    /// Spawn the engine task. Call once, from within a tokio runtime.
    pub fn start(&mut self) {
        if let Some(core) = self.core.take() {
            info!("Starting stream engine");
            tokio::spawn(core.run());
        }
    }

    /// Begin (or resume, or restart after an error) playback.
    pub fn play(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Play);
    }

    /// Suspend playback; the connection and decoder keep running.
    pub fn pause(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Pause);
    }

    /// Disconnect and drop all buffered audio.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Stop);
    }

    /// Set output volume (clamped to 0.0-1.0).
    pub fn set_volume(&self, volume: f32) {
        let _ = self.cmd_tx.send(EngineCommand::SetVolume(volume));
    }

    /// Stop everything and end the engine task.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown);
    }

    /// Subscribe to the engine's event broadcast.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.subscribe_events()
    }

    /// Shared state handle for direct reads.
    pub fn shared(&self) -> Arc<SharedState> {
        Arc::clone(&self.shared)
    }

    /// Current stream state.
    pub async fn state(&self) -> StreamState {
        self.shared.get_stream_state().await
    }
}

/// The engine task: sole owner of the playback state machine.
///
/// The session channel halves are separate `Option` fields rather than one
/// struct so the select loop can borrow each receiver independently.
/// Teardown takes all three together: closing `bytes_tx` drains the decode
/// worker, dropping the receivers discards in-flight events from the dead
/// connection.
struct EngineCore {
    config: StreamConfig,
    shared: Arc<SharedState>,
    transport: Box<dyn StreamTransport>,
    sink: Box<dyn AudioSink>,
    queue: BufferQueue,
    /// Authoritative state; `shared` mirrors it for observers
    state: StreamState,
    transport_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    pcm_rx: Option<mpsc::UnboundedReceiver<Arc<PcmBuffer>>>,
    bytes_tx: Option<mpsc::UnboundedSender<Bytes>>,
    /// Bumped on every session teardown; stale timers carry the old value
    generation: u64,
    reconnect_attempts: u32,
    cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,
    sink_rx: mpsc::UnboundedReceiver<SinkEvent>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
}

/// Next transport event, or park forever while no session exists.
///
/// Parking (instead of returning an Option) keeps the select loop free of
/// busy-polling when a branch has nothing to say; the future is recreated
/// on the next loop iteration anyway.
async fn next_transport_event(
    rx: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> TransportEvent {
    match rx {
        Some(rx) => match rx.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

/// Next decoded buffer, or park forever while no session exists.
async fn next_pcm_buffer(
    rx: &mut Option<mpsc::UnboundedReceiver<Arc<PcmBuffer>>>,
) -> Arc<PcmBuffer> {
    match rx {
        Some(rx) => match rx.recv().await {
            Some(pcm) => pcm,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

impl EngineCore {
    async fn run(mut self) {
        debug!("Engine task started");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.handle_command(cmd).await {
                                break;
                            }
                        }
                        // All handles dropped
                        None => break,
                    }
                }
                event = next_transport_event(&mut self.transport_rx) => {
                    self.handle_transport_event(event).await;
                }
                pcm = next_pcm_buffer(&mut self.pcm_rx) => {
                    self.handle_pcm(pcm).await;
                }
                Some(event) = self.sink_rx.recv() => {
                    self.handle_sink_event(event).await;
                }
                Some(event) = self.internal_rx.recv() => {
                    self.handle_internal(event).await;
                }
            }
        }

        self.teardown_session();
        self.sink.stop();
        debug!("Engine task exited");
    }

    /// Returns true when the engine should shut down.
    async fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::Play => self.handle_play().await,
            EngineCommand::Pause => self.handle_pause().await,
            EngineCommand::Stop => self.handle_stop().await,
            EngineCommand::SetVolume(volume) => {
                let clamped = volume.clamp(0.0, 1.0);
                self.sink.set_volume(clamped);
                self.shared.set_volume(clamped).await;
            }
            EngineCommand::Shutdown => {
                info!("Engine shutdown requested");
                return true;
            }
        }
        false
    }

    async fn handle_play(&mut self) {
        match &self.state {
            StreamState::Idle => {
                self.reconnect_attempts = 0;
                self.connect_session().await;
            }
            StreamState::Paused => {
                info!("Resuming playback");
                self.sink.resume();
                self.drain_queue_to_sink();
                self.set_state(StreamState::Playing).await;
            }
            StreamState::Error(_) | StreamState::Stalled => {
                // Explicit play is an escape hatch even from states that
                // could recover on their own: tear down and start fresh
                info!("Restarting stream from state \"{}\"", self.state);
                self.teardown_session();
                self.sink.stop();
                self.queue.clear();
                self.reconnect_attempts = 0;
                self.connect_session().await;
            }
            StreamState::Connecting | StreamState::Buffering { .. } | StreamState::Playing => {
                debug!("Play request ignored in state \"{}\"", self.state);
            }
        }
    }

    async fn handle_pause(&mut self) {
        match &self.state {
            StreamState::Playing => {
                info!("Pausing playback");
                self.sink.pause();
                self.set_state(StreamState::Paused).await;
            }
            // A stalled stream is already silent and mid-recovery; pausing
            // it would only abandon the refill
            _ => debug!("Pause request ignored in state \"{}\"", self.state),
        }
    }

    async fn handle_stop(&mut self) {
        info!("Stopping stream");
        self.teardown_session();
        self.sink.stop();
        self.queue.clear();
        self.reconnect_attempts = 0;
        self.set_state(StreamState::Idle).await;
    }

    /// Open a new session: transport task, decode worker, fresh channels.
    async fn connect_session(&mut self) {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (bytes_tx, bytes_rx) = mpsc::unbounded_channel::<Bytes>();
        let (pcm_tx, pcm_rx) = mpsc::unbounded_channel();

        // Decoder state lives and dies with the session; a reconnect gets a
        // clean sync scan with no assumptions from the old connection
        tokio::task::spawn_blocking(move || run_decode_worker(bytes_rx, pcm_tx));

        self.transport.connect(transport_tx);
        self.transport_rx = Some(transport_rx);
        self.pcm_rx = Some(pcm_rx);
        self.bytes_tx = Some(bytes_tx);
        self.set_state(StreamState::Connecting).await;
    }

    fn teardown_session(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.transport.disconnect();
        let had_session = self.transport_rx.is_some();
        self.transport_rx = None;
        self.pcm_rx = None;
        self.bytes_tx = None;
        if had_session {
            debug!("Session torn down (generation now {})", self.generation);
        }
    }

    fn has_session(&self) -> bool {
        self.transport_rx.is_some()
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                info!("Stream connected");
                self.reconnect_attempts = 0;
                // Cut anything still playing out from a previous connection
                self.sink.stop();
                self.queue.clear();
                self.set_state(StreamState::Buffering {
                    buffered: 0,
                    required: self.queue.minimum(),
                })
                .await;
            }
            TransportEvent::Data(bytes) => {
                if let Some(tx) = &self.bytes_tx {
                    // Worker gone means teardown is already in progress
                    let _ = tx.send(bytes);
                }
            }
            TransportEvent::Disconnected => {
                warn!("Stream disconnected by server");
                self.teardown_session();
                self.schedule_reconnect_or_fail(None).await;
            }
            TransportEvent::Error(e) => {
                warn!("Transport error: {}", e);
                self.teardown_session();
                self.schedule_reconnect_or_fail(Some(e)).await;
            }
        }
    }

    /// After a lost or failed connection: schedule a retry if the budget
    /// allows, otherwise settle in the terminal error state.
    async fn schedule_reconnect_or_fail(&mut self, cause: Option<Error>) {
        if self.config.auto_reconnect
            && self.reconnect_attempts < self.config.max_reconnect_attempts
        {
            self.reconnect_attempts += 1;
            let attempt = self.reconnect_attempts;
            let max_attempts = self.config.max_reconnect_attempts;
            let delay = self.config.reconnect_delay();
            info!(
                "Scheduling reconnect attempt {}/{} in {:?}",
                attempt, max_attempts, delay
            );

            // A clean server disconnect waits in Connecting; a failure shows
            // its cause while the timer runs
            match cause {
                Some(e) => self.set_state(StreamState::Error(e)).await,
                None => self.set_state(StreamState::Connecting).await,
            }
            self.shared
                .broadcast_event(PlayerEvent::reconnect_scheduled(attempt, max_attempts, delay));

            let generation = self.generation;
            let internal_tx = self.internal_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = internal_tx.send(InternalEvent::ReconnectDue { generation });
            });
        } else {
            let cause = cause.unwrap_or(Error::ConnectionLost);
            error!("Stream lost, reconnect disabled or budget spent: {}", cause);
            self.set_state(StreamState::Error(cause)).await;
        }
    }

    async fn handle_pcm(&mut self, pcm: Arc<PcmBuffer>) {
        match &self.state {
            StreamState::Buffering { .. } | StreamState::Stalled => {
                let snap = self.queue.push(pcm);
                if snap.has_minimum {
                    if let Err(e) = self.sink.start() {
                        error!("Audio output failed to start: {}", e);
                        self.teardown_session();
                        self.queue.clear();
                        self.set_state(StreamState::Error(e)).await;
                        return;
                    }
                    self.drain_queue_to_sink();
                    info!("Playback started ({} buffers primed)", snap.count);
                    self.set_state(StreamState::Playing).await;
                } else if matches!(self.state, StreamState::Buffering { .. }) {
                    self.set_state(StreamState::Buffering {
                        buffered: snap.count,
                        required: self.queue.minimum(),
                    })
                    .await;
                }
            }
            StreamState::Playing => {
                self.shared
                    .broadcast_event(PlayerEvent::buffer_scheduled(Arc::clone(&pcm)));
                self.sink.schedule(pcm);
            }
            StreamState::Paused => {
                // Keep decoding while paused; the queue evicts the oldest on
                // overflow so resume picks up near the live edge
                self.queue.push(pcm);
            }
            _ => {
                debug!("Dropping PCM buffer in state \"{}\"", self.state);
            }
        }
    }

    async fn handle_sink_event(&mut self, event: SinkEvent) {
        match event {
            SinkEvent::Stalled => {
                if self.state == StreamState::Playing {
                    warn!(
                        "Output stalled, rebuffering to {} buffers",
                        self.queue.minimum()
                    );
                    self.sink.pause();
                    self.set_state(StreamState::Stalled).await;
                }
            }
            SinkEvent::NeedsMoreBuffers => {
                if self.state == StreamState::Playing && !self.queue.is_empty() {
                    self.drain_queue_to_sink();
                }
            }
            SinkEvent::Failed(message) => {
                error!("Audio output failed: {}", message);
                self.teardown_session();
                self.queue.clear();
                self.set_state(StreamState::Error(Error::AudioOutput(message)))
                    .await;
            }
        }
    }

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::ReconnectDue { generation } => {
                if generation != self.generation {
                    debug!("Stale reconnect timer ignored");
                    return;
                }
                if self.has_session() {
                    return;
                }
                match self.state {
                    StreamState::Connecting | StreamState::Error(_) => {
                        info!(
                            "Reconnecting (attempt {}/{})",
                            self.reconnect_attempts, self.config.max_reconnect_attempts
                        );
                        self.connect_session().await;
                    }
                    _ => debug!("Reconnect timer fired in state \"{}\", ignoring", self.state),
                }
            }
        }
    }

    /// Hand every queued buffer to the sink, in order.
    fn drain_queue_to_sink(&mut self) {
        for pcm in self.queue.drain_all() {
            self.shared
                .broadcast_event(PlayerEvent::buffer_scheduled(Arc::clone(&pcm)));
            self.sink.schedule(pcm);
        }
    }

    /// Transition the state machine, mirror it, and broadcast the change.
    /// Setting the current state again is a no-op.
    async fn set_state(&mut self, state: StreamState) {
        if self.state == state {
            return;
        }
        debug!("State: \"{}\" -> \"{}\"", self.state, state);
        self.state = state.clone();
        self.shared.set_stream_state(state.clone()).await;
        self.shared.broadcast_event(PlayerEvent::state_changed(state));
    }
}

/// Blocking decode loop, one per session, on the blocking thread pool.
///
/// Exits when the byte channel closes (session teardown) or the PCM
/// receiver goes away. Decode errors are logged and skipped; a live stream
/// resynchronizes on the next frame boundary rather than dying.
fn run_decode_worker(
    mut bytes_rx: mpsc::UnboundedReceiver<Bytes>,
    pcm_tx: mpsc::UnboundedSender<Arc<PcmBuffer>>,
) {
    let mut decoder = StreamDecoder::new();
    while let Some(chunk) = bytes_rx.blocking_recv() {
        match decoder.decode(&chunk) {
            Ok(buffers) => {
                for buffer in buffers {
                    if pcm_tx.send(Arc::new(buffer)).is_err() {
                        debug!("PCM receiver closed, decode worker exiting");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("Decode error (resyncing): {}", e);
            }
        }
    }

    let stats = decoder.stats();
    debug!(
        "Decode worker finished: {} frames decoded, {} bytes skipped, {} decode errors",
        stats.frames_decoded, stats.bytes_skipped, stats.decode_errors
    );
}
