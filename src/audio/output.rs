//! cpal-backed audio output sink
//!
//! [`CpalSink`] owns the physical output device behind the [`AudioSink`]
//! trait. PCM buffers scheduled by the engine are broken into frames and
//! pushed into a lock-free ring; the cpal callback drains the ring on the
//! device's real-time thread. A dedicated std thread owns the `cpal::Stream`
//! (streams are not `Send`) and doubles as the monitor loop that turns
//! ring-level observations into [`SinkEvent`]s for the engine.
//!
//! The real-time callback itself never allocates, blocks, or sends: it only
//! pops frames and bumps atomics. Stall and refill detection happen on the
//! audio thread's polling cycle, outside the callback.

use crate::audio::types::{AudioFrame, PcmBuffer, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};
use crate::error::{Error, Result};
use crate::playback::sink::{AudioSink, SinkEvent};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// Device ring capacity in stereo frames (4 seconds @ 44.1kHz)
const RING_CAPACITY_FRAMES: usize = 4 * OUTPUT_SAMPLE_RATE as usize;

/// Ring level below which the monitor asks the engine for more audio (250ms)
const LOW_WATER_FRAMES: usize = OUTPUT_SAMPLE_RATE as usize / 4;

/// Ring level that re-arms the refill request (500ms)
const REARM_WATER_FRAMES: usize = OUTPUT_SAMPLE_RATE as usize / 2;

/// Underrun frames within one monitor cycle that count as a stall (~12ms)
///
/// A handful of missed frames at a push boundary is inaudible; a genuine
/// starvation inserts thousands per cycle.
const STALL_THRESHOLD_FRAMES: u64 = 512;

/// Most pending buffers held sink-side while the device ring is full
const PENDING_MAX: usize = 256;

/// Monitor poll cadence on the audio thread
const MONITOR_POLL: Duration = Duration::from_millis(50);

/// Monitor cycles between health log lines (600 x 50ms = 30s)
const HEALTH_LOG_CYCLES: u64 = 600;

/// Commands from the engine thread to the audio thread.
enum SinkCommand {
    Play,
    Pause,
    Stop,
    Shutdown,
}

/// State shared between the engine-side handle, the audio thread, and the
/// real-time callback.
///
/// The callback touches only the atomics. `last_error` and `events` are
/// mutex-guarded but never locked from the callback.
struct SinkShared {
    /// Frames currently queued in the device ring
    /// Ordering: Relaxed (statistics only, exact value not critical)
    fill_level: AtomicUsize,

    /// Output volume as f32 bit pattern (lock-free read in the callback)
    volume_bits: AtomicU32,

    /// True between engine start/resume and pause/stop
    playing: AtomicBool,

    /// Total silent frames inserted because the ring was empty
    underrun_frames: AtomicU64,

    /// Set by the cpal error callback, consumed by the monitor
    error_flag: AtomicBool,

    /// Message from the most recent stream error
    last_error: Mutex<String>,

    /// Event channel to the engine, installed via `set_event_channel`
    events: Mutex<Option<UnboundedSender<SinkEvent>>>,
}

impl SinkShared {
    fn new() -> Self {
        Self {
            fill_level: AtomicUsize::new(0),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            playing: AtomicBool::new(false),
            underrun_frames: AtomicU64::new(0),
            error_flag: AtomicBool::new(false),
            last_error: Mutex::new(String::new()),
            events: Mutex::new(None),
        }
    }

    fn send_event(&self, event: SinkEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            // Receiver gone means the engine is shutting down
            let _ = tx.send(event);
        }
    }
}

/// Audio output sink backed by the system's default cpal device.
///
/// Construction probes the device and spawns the audio thread; playback does
/// not begin until [`AudioSink::start`]. The handle itself is `Send` and is
/// owned by the engine task, while the `cpal::Stream` lives on the audio
/// thread for its whole life.
pub struct CpalSink {
    cmd_tx: Sender<SinkCommand>,
    producer: HeapProd<AudioFrame>,
    /// Buffers waiting for ring space, oldest first
    pending: VecDeque<(Arc<PcmBuffer>, usize)>,
    pending_dropped: u64,
    shared: Arc<SinkShared>,
    device_name: String,
    sample_rate: u32,
    thread: Option<JoinHandle<()>>,
}

impl CpalSink {
    /// Open the default output device and spawn the audio thread.
    ///
    /// Requires a device configuration that can run 44.1kHz stereo; the
    /// decoder normalizes everything to that rate, so a device that cannot
    /// do it would play at the wrong pitch.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No audio output device available".to_string()))?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let (config, sample_format) = Self::get_best_config(&device)?;
        info!(
            "Audio output: device=\"{}\", rate={}, channels={}, format={:?}",
            device_name, config.sample_rate.0, config.channels, sample_format
        );

        let rb = HeapRb::<AudioFrame>::new(RING_CAPACITY_FRAMES);
        let (producer, consumer) = rb.split();

        let shared = Arc::new(SinkShared::new());
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let sample_rate = config.sample_rate.0;

        // cpal streams are not Send, so the stream and the device that
        // builds it must be created on the thread that owns them. The
        // probe device above never leaves this function.
        let consumer = Arc::new(Mutex::new(consumer));
        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || run_audio_thread(config, sample_format, consumer, thread_shared, cmd_rx))
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn audio thread: {}", e)))?;

        Ok(Self {
            cmd_tx,
            producer,
            pending: VecDeque::new(),
            pending_dropped: 0,
            shared,
            device_name,
            sample_rate,
            thread: Some(thread),
        })
    }

    /// Pick the best supported device configuration.
    ///
    /// Prefers 44.1kHz stereo f32 (the pipeline's native format), then any
    /// 44.1kHz stereo integer format the output path can convert to.
    fn get_best_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
        let candidates: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
            .filter(|c| {
                c.channels() as usize == OUTPUT_CHANNELS
                    && c.min_sample_rate().0 <= OUTPUT_SAMPLE_RATE
                    && c.max_sample_rate().0 >= OUTPUT_SAMPLE_RATE
            })
            .collect();

        let chosen = candidates
            .iter()
            .find(|c| c.sample_format() == SampleFormat::F32)
            .or_else(|| {
                candidates
                    .iter()
                    .find(|c| matches!(c.sample_format(), SampleFormat::I16 | SampleFormat::U16))
            });

        match chosen {
            Some(range) => {
                let sample_format = range.sample_format();
                let config = range
                    .clone()
                    .with_sample_rate(cpal::SampleRate(OUTPUT_SAMPLE_RATE))
                    .config();
                Ok((config, sample_format))
            }
            None => Err(Error::AudioOutput(format!(
                "No output config supports {} Hz stereo",
                OUTPUT_SAMPLE_RATE
            ))),
        }
    }

    /// Move as many pending frames as fit into the device ring.
    fn flush_pending(&mut self) {
        while let Some((buffer, cursor)) = self.pending.front_mut() {
            let mut pushed = 0usize;
            for frame in buffer.iter_frames().skip(*cursor) {
                if self.producer.try_push(frame).is_err() {
                    break;
                }
                pushed += 1;
            }
            *cursor += pushed;
            if pushed > 0 {
                self.shared.fill_level.fetch_add(pushed, Ordering::Relaxed);
            }
            if *cursor < buffer.frames() {
                // Ring full, resume from the cursor on the next schedule
                return;
            }
            self.pending.pop_front();
        }
    }

    fn send_command(&self, cmd: SinkCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| Error::AudioOutput("Audio thread is not running".to_string()))
    }

    /// Name of the opened output device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Device sample rate (always 44100 for accepted devices).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames currently queued toward the device.
    pub fn buffered_frames(&self) -> usize {
        self.shared.fill_level.load(Ordering::Relaxed)
    }

    /// Total silent frames inserted on ring underrun.
    pub fn underrun_frames(&self) -> u64 {
        self.shared.underrun_frames.load(Ordering::Relaxed)
    }
}

impl AudioSink for CpalSink {
    fn set_event_channel(&mut self, events: UnboundedSender<SinkEvent>) {
        *self.shared.events.lock().unwrap() = Some(events);
    }

    fn start(&mut self) -> Result<()> {
        self.send_command(SinkCommand::Play)
    }

    fn pause(&mut self) {
        let _ = self.send_command(SinkCommand::Pause);
    }

    fn resume(&mut self) {
        let _ = self.send_command(SinkCommand::Play);
    }

    fn stop(&mut self) {
        self.pending.clear();
        let _ = self.send_command(SinkCommand::Stop);
    }

    fn schedule(&mut self, buffer: Arc<PcmBuffer>) {
        if !buffer.is_empty() {
            self.pending.push_back((buffer, 0));
            if self.pending.len() > PENDING_MAX {
                // Live audio: favor fresh frames over stale backlog
                self.pending.pop_front();
                self.pending_dropped += 1;
                warn!(
                    "Output backlog full, dropped oldest pending buffer ({} dropped total)",
                    self.pending_dropped
                );
            }
        }
        self.flush_pending();
    }

    fn set_volume(&mut self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        self.shared
            .volume_bits
            .store(clamped.to_bits(), Ordering::Relaxed);
        debug!("Volume set to {:.2}", clamped);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.shared.volume_bits.load(Ordering::Relaxed))
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(SinkCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Monitor bookkeeping between polling cycles.
struct MonitorState {
    last_underruns: u64,
    stall_latched: bool,
    refill_latched: bool,
    cycles: u64,
}

impl MonitorState {
    fn new(underruns: u64) -> Self {
        Self {
            last_underruns: underruns,
            stall_latched: false,
            refill_latched: false,
            cycles: 0,
        }
    }

    /// Reset latches when playback (re)starts or stops.
    fn rearm(&mut self, underruns: u64) {
        self.last_underruns = underruns;
        self.stall_latched = false;
        self.refill_latched = false;
    }
}

/// One monitor cycle: translate ring observations into sink events.
///
/// Stall detection is edge-triggered and latched so the engine sees exactly
/// one `Stalled` per starvation episode; the latch clears when the engine
/// issues the next play/resume. Refill requests re-arm on their own once the
/// ring climbs back above the high water mark.
fn monitor_tick(shared: &SinkShared, mon: &mut MonitorState) {
    if shared.error_flag.swap(false, Ordering::SeqCst) {
        let message = shared.last_error.lock().unwrap().clone();
        shared.send_event(SinkEvent::Failed(message));
    }

    if !shared.playing.load(Ordering::Acquire) {
        return;
    }

    let underruns = shared.underrun_frames.load(Ordering::Relaxed);
    let delta = underruns.saturating_sub(mon.last_underruns);
    if delta >= STALL_THRESHOLD_FRAMES && !mon.stall_latched {
        mon.stall_latched = true;
        warn!("Audio output ran dry ({} silent frames inserted)", delta);
        shared.send_event(SinkEvent::Stalled);
    }
    mon.last_underruns = underruns;

    let fill = shared.fill_level.load(Ordering::Relaxed);
    if fill >= REARM_WATER_FRAMES {
        mon.refill_latched = false;
    } else if fill < LOW_WATER_FRAMES && !mon.refill_latched {
        mon.refill_latched = true;
        shared.send_event(SinkEvent::NeedsMoreBuffers);
    }

    mon.cycles += 1;
    if mon.cycles % HEALTH_LOG_CYCLES == 0 {
        debug!(
            "Audio output health: fill={} frames ({:.2}s @ 44.1kHz), underrun_frames={}",
            fill,
            fill as f64 / OUTPUT_SAMPLE_RATE as f64,
            underruns
        );
    }
}

/// Audio thread entry point: reopen the default device and service commands.
///
/// If the device disappeared between the constructor's probe and this point
/// the thread exits; the command channel closes and later `start()` calls
/// report "Audio thread is not running".
fn run_audio_thread(
    config: StreamConfig,
    sample_format: SampleFormat,
    consumer: Arc<Mutex<HeapCons<AudioFrame>>>,
    shared: Arc<SinkShared>,
    cmd_rx: Receiver<SinkCommand>,
) {
    let device = match cpal::default_host().default_output_device() {
        Some(device) => device,
        None => {
            error!("Audio output device disappeared before the audio thread started");
            return;
        }
    };
    let thread = AudioThread {
        device,
        config,
        sample_format,
        consumer,
        shared,
        stream: None,
    };
    thread.run(cmd_rx);
}

/// Owns the cpal stream for its whole life; streams are not `Send` so all
/// stream operations happen on this thread.
struct AudioThread {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    consumer: Arc<Mutex<HeapCons<AudioFrame>>>,
    shared: Arc<SinkShared>,
    stream: Option<Stream>,
}

impl AudioThread {
    fn run(mut self, cmd_rx: Receiver<SinkCommand>) {
        debug!("Audio thread started");
        let mut mon = MonitorState::new(self.shared.underrun_frames.load(Ordering::Relaxed));

        loop {
            match cmd_rx.recv_timeout(MONITOR_POLL) {
                Ok(SinkCommand::Play) => {
                    if let Err(e) = self.start_stream() {
                        error!("Audio stream start failed: {}", e);
                        self.shared.send_event(SinkEvent::Failed(e.to_string()));
                    } else {
                        self.shared.playing.store(true, Ordering::Release);
                        mon.rearm(self.shared.underrun_frames.load(Ordering::Relaxed));
                    }
                }
                Ok(SinkCommand::Pause) => {
                    self.shared.playing.store(false, Ordering::Release);
                    self.pause_stream();
                }
                Ok(SinkCommand::Stop) => {
                    self.shared.playing.store(false, Ordering::Release);
                    self.pause_stream();
                    self.flush();
                    mon.rearm(self.shared.underrun_frames.load(Ordering::Relaxed));
                }
                Ok(SinkCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            monitor_tick(&self.shared, &mut mon);
        }

        self.shared.playing.store(false, Ordering::Release);
        self.stream.take();
        debug!("Audio thread exited");
    }

    /// Build the stream on first use, then (re)start playback.
    fn start_stream(&mut self) -> Result<()> {
        if self.stream.is_none() {
            info!("Starting audio stream");
            let stream = match self.sample_format {
                SampleFormat::F32 => self.build_stream_f32()?,
                SampleFormat::I16 => self.build_stream_i16()?,
                SampleFormat::U16 => self.build_stream_u16()?,
                sample_format => {
                    return Err(Error::AudioOutput(format!(
                        "Unsupported sample format: {:?}",
                        sample_format
                    )));
                }
            };
            self.stream = Some(stream);
        }

        if let Some(stream) = &self.stream {
            stream
                .play()
                .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        }
        Ok(())
    }

    fn pause_stream(&self) {
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause stream: {}", e);
            }
        }
    }

    /// Drop everything still queued in the device ring.
    fn flush(&self) {
        let mut consumer = self.consumer.lock().unwrap();
        let mut drained = 0usize;
        while consumer.try_pop().is_some() {
            drained += 1;
        }
        if drained > 0 {
            self.shared.fill_level.fetch_sub(drained, Ordering::Relaxed);
            debug!("Flushed {} frames from output ring", drained);
        }
    }

    /// Build audio stream for f32 samples
    fn build_stream_f32(&self) -> Result<Stream> {
        let channels = self.config.channels as usize;
        let consumer = Arc::clone(&self.consumer);
        let shared = Arc::clone(&self.shared);
        let error_shared = Arc::clone(&self.shared);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let volume = f32::from_bits(shared.volume_bits.load(Ordering::Relaxed));

                    // Contended only during a flush; emit silence rather than block
                    let mut consumer = match consumer.try_lock() {
                        Ok(guard) => guard,
                        Err(_) => {
                            data.fill(0.0);
                            return;
                        }
                    };

                    for frame in data.chunks_mut(channels) {
                        let audio = match consumer.try_pop() {
                            Some(f) => {
                                shared.fill_level.fetch_sub(1, Ordering::Relaxed);
                                f
                            }
                            None => {
                                shared.underrun_frames.fetch_add(1, Ordering::Relaxed);
                                AudioFrame::zero()
                            }
                        };

                        // Apply volume and clamp to prevent clipping
                        frame[0] = (audio.left * volume).clamp(-1.0, 1.0);
                        if channels > 1 {
                            frame[1] = (audio.right * volume).clamp(-1.0, 1.0);
                        }
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    *error_shared.last_error.lock().unwrap() = err.to_string();
                    error_shared.error_flag.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?;

        Ok(stream)
    }

    /// Build audio stream for i16 samples
    fn build_stream_i16(&self) -> Result<Stream> {
        let channels = self.config.channels as usize;
        let consumer = Arc::clone(&self.consumer);
        let shared = Arc::clone(&self.shared);
        let error_shared = Arc::clone(&self.shared);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let volume = f32::from_bits(shared.volume_bits.load(Ordering::Relaxed));

                    let mut consumer = match consumer.try_lock() {
                        Ok(guard) => guard,
                        Err(_) => {
                            data.fill(0);
                            return;
                        }
                    };

                    for frame in data.chunks_mut(channels) {
                        let audio = match consumer.try_pop() {
                            Some(f) => {
                                shared.fill_level.fetch_sub(1, Ordering::Relaxed);
                                f
                            }
                            None => {
                                shared.underrun_frames.fetch_add(1, Ordering::Relaxed);
                                AudioFrame::zero()
                            }
                        };

                        // Apply volume and convert to i16
                        let left = (audio.left * volume).clamp(-1.0, 1.0);
                        let right = (audio.right * volume).clamp(-1.0, 1.0);
                        frame[0] = (left * i16::MAX as f32) as i16;
                        if channels > 1 {
                            frame[1] = (right * i16::MAX as f32) as i16;
                        }
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    *error_shared.last_error.lock().unwrap() = err.to_string();
                    error_shared.error_flag.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?;

        Ok(stream)
    }

    /// Build audio stream for u16 samples
    fn build_stream_u16(&self) -> Result<Stream> {
        let channels = self.config.channels as usize;
        let consumer = Arc::clone(&self.consumer);
        let shared = Arc::clone(&self.shared);
        let error_shared = Arc::clone(&self.shared);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    let volume = f32::from_bits(shared.volume_bits.load(Ordering::Relaxed));

                    let mut consumer = match consumer.try_lock() {
                        Ok(guard) => guard,
                        Err(_) => {
                            data.fill(u16::MAX / 2);
                            return;
                        }
                    };

                    for frame in data.chunks_mut(channels) {
                        let audio = match consumer.try_pop() {
                            Some(f) => {
                                shared.fill_level.fetch_sub(1, Ordering::Relaxed);
                                f
                            }
                            None => {
                                shared.underrun_frames.fetch_add(1, Ordering::Relaxed);
                                AudioFrame::zero()
                            }
                        };

                        // Apply volume, convert from [-1.0, 1.0] to [0, 65535]
                        let left = (audio.left * volume).clamp(-1.0, 1.0);
                        let right = (audio.right * volume).clamp(-1.0, 1.0);
                        frame[0] = ((left + 1.0) * 32767.5) as u16;
                        if channels > 1 {
                            frame[1] = ((right + 1.0) * 32767.5) as u16;
                        }
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    *error_shared.last_error.lock().unwrap() = err.to_string();
                    error_shared.error_flag.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?;

        Ok(stream)
    }
}
