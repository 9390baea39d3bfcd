//! Incremental MP3 stream decoder
//!
//! Turns an unaligned byte stream into fixed-format PCM. Network chunks
//! carry no relationship to MP3 frame boundaries, so bytes accumulate in a
//! persistent buffer; complete frames are carved out analytically (length
//! computed from each frame's own header, which handles CBR and VBR alike)
//! and fed to symphonia's MP3 codec one frame per packet.
//!
//! ## Design
//!
//! - **Lock-on**: a sync candidate is only accepted once the header at the
//!   candidate's computed frame length parses and agrees on version, sample
//!   rate, and channel count, or an ID3v2 tag begins there (a track
//!   boundary). A single false sync inside garbage costs one byte of scan
//!   advance; a real frame costs one frame of lookahead latency,
//!   irrelevant for a live stream.
//! - **Late readiness**: codec and resampler are created lazily from the
//!   first confirmed header. Bytes arriving earlier stay in the
//!   accumulation buffer and are decoded once the format is locked; nothing
//!   is dropped for arriving "too early".
//! - **Fixed output**: every emitted buffer is 44.1 kHz planar f32 stereo.
//!   Mono input is upmixed by plane duplication; other input rates pass
//!   through a stateful resampler created at format lock.
//! - **Damage tolerance**: garbage yields no buffers and no errors; decode
//!   failures on individual frames (common right after joining mid-stream,
//!   before the bit reservoir fills) are counted and skipped.
//!
//! ## Thread Safety
//!
//! Not internally synchronized. `decode()` calls must be issued in delivery
//! order from one context at a time; the engine dedicates one blocking
//! worker per connection to exactly that.

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Channels, Signal};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_MP3};
use symphonia::core::conv::IntoSample;
use symphonia::core::formats::Packet;
use symphonia::core::sample::Sample;
use tracing::{debug, info, trace, warn};

use crate::audio::mp3::{probe_id3v2, FrameHeader, Id3Probe, HEADER_LEN};
use crate::audio::resampler::StreamResampler;
use crate::audio::types::{PcmBuffer, OUTPUT_SAMPLE_RATE};
use crate::error::{Error, Result};

/// Stream parameters locked from the first confirmed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Native sample rate of the compressed stream (Hz)
    pub sample_rate: u32,
    /// Channel count of the compressed stream
    pub channels: usize,
    /// PCM samples per channel per compressed frame
    pub samples_per_frame: usize,
}

/// Decoder health counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Bytes consumed as frame data
    pub bytes_consumed: u64,
    /// Bytes discarded hunting for frame sync (garbage, ID3 tags)
    pub bytes_skipped: u64,
    /// Compressed frames successfully decoded
    pub frames_decoded: u64,
    /// Compressed frames the codec rejected
    pub decode_errors: u64,
}

/// Incremental push decoder: arbitrary byte chunks in, PCM buffers out
pub struct StreamDecoder {
    /// Persistent accumulation buffer; never holds more than one maximal
    /// frame plus scan tail once the stream is locked
    acc: Vec<u8>,
    /// Bytes of an oversized ID3 tag still to swallow from future chunks
    pending_skip: usize,
    decoder: Option<Box<dyn Decoder>>,
    format: Option<StreamFormat>,
    resampler: Option<StreamResampler>,
    /// Running timestamp handed to the codec, in input-rate samples
    next_ts: u64,
    stats: DecoderStats,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            acc: Vec::with_capacity(8192),
            pending_skip: 0,
            decoder: None,
            format: None,
            resampler: None,
            next_ts: 0,
            stats: DecoderStats::default(),
        }
    }

    /// Feed one network chunk; emit zero or more decoded buffers
    ///
    /// Correct for any chunk size and alignment, down to single bytes.
    /// Returned buffers are in stream order and never empty.
    ///
    /// # Errors
    /// Only unrecoverable setup failures (codec or resampler construction)
    /// surface as `Err`; malformed input and per-frame codec rejections are
    /// absorbed and counted in [`DecoderStats`].
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<PcmBuffer>> {
        let mut chunk = chunk;
        if self.pending_skip > 0 {
            let take = self.pending_skip.min(chunk.len());
            self.pending_skip -= take;
            self.stats.bytes_skipped += take as u64;
            chunk = &chunk[take..];
            if chunk.is_empty() {
                return Ok(Vec::new());
            }
        }
        self.acc.extend_from_slice(chunk);

        let mut out = Vec::new();
        loop {
            match probe_id3v2(&self.acc) {
                Id3Probe::Tag(len) => {
                    debug!("Skipping {} byte ID3v2 tag in stream", len);
                    if len >= self.acc.len() {
                        self.pending_skip = len - self.acc.len();
                        self.stats.bytes_skipped += self.acc.len() as u64;
                        self.acc.clear();
                        break;
                    }
                    self.acc.drain(..len);
                    self.stats.bytes_skipped += len as u64;
                    continue;
                }
                Id3Probe::NeedMoreData => break,
                Id3Probe::NotPresent => {}
            }

            match self.next_confirmed_frame() {
                Some(hdr) => self.decode_frame(&hdr, &mut out)?,
                None => break,
            }
        }
        Ok(out)
    }

    /// Discard all accumulated state: a fresh decoder identity
    ///
    /// Replaces the internals wholesale rather than rewinding them, so the
    /// result is indistinguishable from a newly constructed decoder.
    pub fn reset(&mut self) {
        debug!(
            "Decoder reset after {} frames ({} bytes skipped)",
            self.stats.frames_decoded, self.stats.bytes_skipped
        );
        *self = Self::new();
    }

    /// Stream format, once locked from the first confirmed header
    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Locate the next frame confirmed by its successor, draining scan
    /// garbage as a side effect
    ///
    /// A candidate is confirmed by a compatible header at its computed end,
    /// or by an ID3v2 tag header there (tags sit between tracks, so the
    /// frame before one is real). Returns `None` when more data is needed;
    /// the candidate frame is then at the head of `acc` with at least
    /// `frame_len` bytes present.
    fn next_confirmed_frame(&mut self) -> Option<FrameHeader> {
        loop {
            let (pos, hdr) = match Self::find_candidate(&self.acc) {
                Some(found) => found,
                None => {
                    // Nothing parseable: drop all but a possible split
                    // header at the tail
                    let drop_n = self.acc.len().saturating_sub(HEADER_LEN - 1);
                    if drop_n > 0 {
                        self.acc.drain(..drop_n);
                        self.stats.bytes_skipped += drop_n as u64;
                    }
                    return None;
                }
            };

            if pos > 0 {
                trace!("Skipped {} bytes to next sync candidate", pos);
                self.acc.drain(..pos);
                self.stats.bytes_skipped += pos as u64;
            }

            // Need the whole frame plus the next header to confirm
            if self.acc.len() < hdr.frame_len + HEADER_LEN {
                return None;
            }

            match FrameHeader::parse(&self.acc[hdr.frame_len..]) {
                Some(next) if hdr.compatible_with(&next) => return Some(hdr),
                _ => match probe_id3v2(&self.acc[hdr.frame_len..]) {
                    // A tag right at the frame's end confirms it; the head
                    // probe skips the tag analytically once the frame drains
                    Id3Probe::Tag(_) => return Some(hdr),
                    Id3Probe::NeedMoreData => return None,
                    Id3Probe::NotPresent => {
                        // False sync; advance one byte and rescan
                        self.acc.drain(..1);
                        self.stats.bytes_skipped += 1;
                    }
                },
            }
        }
    }

    fn find_candidate(buf: &[u8]) -> Option<(usize, FrameHeader)> {
        let mut i = 0;
        while i + HEADER_LEN <= buf.len() {
            if buf[i] == 0xFF {
                if let Some(hdr) = FrameHeader::parse(&buf[i..]) {
                    return Some((i, hdr));
                }
            }
            i += 1;
        }
        None
    }

    /// Decode the confirmed frame at the head of `acc`
    fn decode_frame(&mut self, hdr: &FrameHeader, out: &mut Vec<PcmBuffer>) -> Result<()> {
        if let Some(fmt) = self.format {
            // A confirmed pair disagreeing with the lock is a genuine
            // mid-broadcast format change: relock around it
            if fmt.sample_rate != hdr.sample_rate || fmt.channels != hdr.channels {
                warn!(
                    "Stream format changed mid-broadcast: {} Hz/{} ch -> {} Hz/{} ch, relocking",
                    fmt.sample_rate, fmt.channels, hdr.sample_rate, hdr.channels
                );
                self.decoder = None;
                self.resampler = None;
                self.format = None;
            }
        }
        self.ensure_decoder(hdr)?;

        let packet = Packet::new_from_slice(
            0,
            self.next_ts,
            hdr.samples_per_frame as u64,
            &self.acc[..hdr.frame_len],
        );

        let mut planes = None;
        if let Some(decoder) = self.decoder.as_mut() {
            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let mut left = Vec::new();
                    let mut right = Vec::new();
                    extract_planes(&decoded, &mut left, &mut right);
                    planes = Some((left, right));
                    self.stats.frames_decoded += 1;
                }
                Err(symphonia::core::errors::Error::ResetRequired) => {
                    warn!("Codec requested reset; rebuilding decoder");
                    self.decoder = None;
                    self.stats.decode_errors += 1;
                }
                Err(e) => {
                    // Expected right after a mid-stream join, before the bit
                    // reservoir has history to satisfy back-references
                    debug!("Frame decode failed (skipping): {}", e);
                    self.stats.decode_errors += 1;
                }
            }
        }
        if let Some((left, right)) = planes {
            if !left.is_empty() {
                let buffer = self.normalize(left, right)?;
                if !buffer.is_empty() {
                    out.push(buffer);
                }
            }
        }

        self.stats.bytes_consumed += hdr.frame_len as u64;
        self.next_ts += hdr.samples_per_frame as u64;
        self.acc.drain(..hdr.frame_len);
        Ok(())
    }

    /// Resample decoded planes to the pipeline output rate if needed
    fn normalize(&mut self, left: Vec<f32>, right: Vec<f32>) -> Result<PcmBuffer> {
        let Some(fmt) = self.format else {
            return Ok(PcmBuffer::new(left, right, OUTPUT_SAMPLE_RATE));
        };
        if fmt.sample_rate == OUTPUT_SAMPLE_RATE {
            return Ok(PcmBuffer::new(left, right, OUTPUT_SAMPLE_RATE));
        }

        // Created (or re-created on a plane-length surprise) lazily so the
        // chunk size always matches what the codec actually emits
        let recreate = match &self.resampler {
            Some(rs) => rs.chunk_frames() != left.len(),
            None => true,
        };
        if recreate {
            self.resampler = Some(StreamResampler::new(fmt.sample_rate, left.len())?);
        }
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(PcmBuffer::new(left, right, OUTPUT_SAMPLE_RATE));
        };
        let (left, right) = resampler.process(&left, &right)?;
        Ok(PcmBuffer::new(left, right, OUTPUT_SAMPLE_RATE))
    }

    fn ensure_decoder(&mut self, hdr: &FrameHeader) -> Result<()> {
        if self.decoder.is_some() {
            return Ok(());
        }

        let channels = if hdr.channels == 1 {
            Channels::FRONT_LEFT
        } else {
            Channels::FRONT_LEFT | Channels::FRONT_RIGHT
        };
        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_MP3)
            .with_sample_rate(hdr.sample_rate)
            .with_channels(channels);

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("failed to create MP3 decoder: {}", e)))?;
        self.decoder = Some(decoder);

        if self.format.is_none() {
            self.format = Some(StreamFormat {
                sample_rate: hdr.sample_rate,
                channels: hdr.channels,
                samples_per_frame: hdr.samples_per_frame,
            });
            info!(
                "🎵 Stream format locked: {} Hz, {} ch, {} kbit/s nominal",
                hdr.sample_rate,
                hdr.channels,
                hdr.bitrate / 1000
            );
        }
        Ok(())
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull planar f32 stereo out of whatever sample format the codec produced
///
/// Mono input is duplicated into both planes; MP3 never carries more than
/// two channels.
fn extract_planes(decoded: &AudioBufferRef, left: &mut Vec<f32>, right: &mut Vec<f32>) {
    match decoded {
        AudioBufferRef::F32(buf) => planes_from(buf, left, right),
        AudioBufferRef::F64(buf) => planes_from(buf, left, right),
        AudioBufferRef::S32(buf) => planes_from(buf, left, right),
        AudioBufferRef::S24(buf) => planes_from(buf, left, right),
        AudioBufferRef::S16(buf) => planes_from(buf, left, right),
        AudioBufferRef::S8(buf) => planes_from(buf, left, right),
        AudioBufferRef::U32(buf) => planes_from(buf, left, right),
        AudioBufferRef::U24(buf) => planes_from(buf, left, right),
        AudioBufferRef::U16(buf) => planes_from(buf, left, right),
        AudioBufferRef::U8(buf) => planes_from(buf, left, right),
    }
}

fn planes_from<S>(buf: &AudioBuffer<S>, left: &mut Vec<f32>, right: &mut Vec<f32>)
where
    S: Sample + IntoSample<f32>,
{
    let channels = buf.spec().channels.count();
    let frames = buf.frames();
    left.reserve(frames);
    right.reserve(frames);
    left.extend(buf.chan(0).iter().map(|s| (*s).into_sample()));
    if channels > 1 {
        right.extend(buf.chan(1).iter().map(|s| (*s).into_sample()));
    } else {
        right.extend_from_slice(left);
    }
}
