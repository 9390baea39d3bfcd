//! MP3 frame header parsing
//!
//! The broadcast arrives as a bare MPEG audio bitstream with no container,
//! so frame boundaries must be recovered from the 4-byte frame headers
//! themselves. Each header carries enough information (bitrate index,
//! sample rate index, padding bit) to compute the exact byte length of its
//! frame analytically, which works uniformly for CBR and VBR streams: VBR
//! just means consecutive headers disagree about bitrate.
//!
//! Only MPEG Layer III is accepted. Headers naming any other layer are
//! treated as invalid sync candidates and skipped by the caller's scan.

/// Length of an MPEG audio frame header in bytes
pub const HEADER_LEN: usize = 4;

/// MPEG version as encoded in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

/// Bitrate table for MPEG1 Layer III, indexed 1..=14 (kbit/s)
const BITRATES_V1_L3: [u32; 14] = [
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];

/// Bitrate table for MPEG2/2.5 Layer III, indexed 1..=14 (kbit/s)
const BITRATES_V2_L3: [u32; 14] = [
    8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160,
];

/// Sample rate tables per version, indexed 0..=2
const SAMPLE_RATES_V1: [u32; 3] = [44100, 48000, 32000];
const SAMPLE_RATES_V2: [u32; 3] = [22050, 24000, 16000];
const SAMPLE_RATES_V25: [u32; 3] = [11025, 12000, 8000];

/// A validated MPEG Layer III frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    /// Nominal bitrate in bits per second
    pub bitrate: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count (1 for mono mode, otherwise 2)
    pub channels: usize,
    /// Padding slot present (adds one byte to the frame)
    pub padding: bool,
    /// Total frame length in bytes, header included
    pub frame_len: usize,
    /// PCM samples per channel produced by this frame
    pub samples_per_frame: usize,
}

impl FrameHeader {
    /// Parse a frame header from the start of `bytes`
    ///
    /// Returns `None` when fewer than [`HEADER_LEN`] bytes are available or
    /// when the bytes are not a valid Layer III header (bad sync, reserved
    /// version/layer, free or invalid bitrate, invalid sample rate).
    pub fn parse(bytes: &[u8]) -> Option<FrameHeader> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        // 11-bit sync: 0xFF then top three bits of the next byte set
        if bytes[0] != 0xFF || (bytes[1] & 0xE0) != 0xE0 {
            return None;
        }

        let version = match (bytes[1] >> 3) & 0x03 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return None, // reserved
        };

        // Layer bits: 01 = Layer III; everything else is out of scope
        if (bytes[1] >> 1) & 0x03 != 0b01 {
            return None;
        }

        let bitrate_index = (bytes[2] >> 4) as usize;
        if bitrate_index == 0 || bitrate_index == 15 {
            // 0 is "free format" (length not derivable), 15 is forbidden
            return None;
        }
        let table = match version {
            MpegVersion::Mpeg1 => &BITRATES_V1_L3,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => &BITRATES_V2_L3,
        };
        let bitrate = table[bitrate_index - 1] * 1000;

        let rate_index = ((bytes[2] >> 2) & 0x03) as usize;
        if rate_index == 3 {
            return None;
        }
        let sample_rate = match version {
            MpegVersion::Mpeg1 => SAMPLE_RATES_V1[rate_index],
            MpegVersion::Mpeg2 => SAMPLE_RATES_V2[rate_index],
            MpegVersion::Mpeg25 => SAMPLE_RATES_V25[rate_index],
        };

        let padding = (bytes[2] & 0x02) != 0;

        // Channel mode 11 is single-channel; stereo/joint/dual are all 2ch
        let channels = if (bytes[3] >> 6) & 0x03 == 0b11 { 1 } else { 2 };

        // Layer III frame size: 144 coefficient for MPEG1, halved window
        // (72) for MPEG2/2.5, plus the optional padding slot
        let coefficient: usize = match version {
            MpegVersion::Mpeg1 => 144,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => 72,
        };
        let frame_len =
            (coefficient * bitrate as usize) / sample_rate as usize + usize::from(padding);

        let samples_per_frame = match version {
            MpegVersion::Mpeg1 => 1152,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => 576,
        };

        Some(FrameHeader {
            version,
            bitrate,
            sample_rate,
            channels,
            padding,
            frame_len,
            samples_per_frame,
        })
    }

    /// Whether `other` could belong to the same stream as `self`
    ///
    /// Bitrate and padding legitimately vary frame to frame (VBR); version,
    /// sample rate, and channel count do not. Used both to confirm a sync
    /// candidate against its successor and to reject mid-stream format
    /// changes that would invalidate the locked codec parameters.
    pub fn compatible_with(&self, other: &FrameHeader) -> bool {
        self.version == other.version
            && self.sample_rate == other.sample_rate
            && self.channels == other.channels
    }
}

/// Result of probing a buffer for a leading ID3v2 tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Id3Probe {
    /// Buffer does not start with an ID3v2 tag
    NotPresent,
    /// Looks like a tag but the 10-byte tag header is not complete yet
    NeedMoreData,
    /// Tag present; skip this many bytes (header + body + optional footer)
    Tag(usize),
}

/// Probe for an ID3v2 tag at the start of `buf`
///
/// Broadcast encoders occasionally inject ID3v2 tags at track boundaries.
/// Their body can contain byte sequences that look like frame sync, so the
/// tag is skipped analytically (syncsafe length from the tag header) rather
/// than ground through the resync scan.
pub fn probe_id3v2(buf: &[u8]) -> Id3Probe {
    if buf.is_empty() || buf[0] != b'I' {
        return Id3Probe::NotPresent;
    }
    if buf.len() < 3 {
        // Could still become "ID3"
        if buf.starts_with(&b"ID3"[..buf.len()]) {
            return Id3Probe::NeedMoreData;
        }
        return Id3Probe::NotPresent;
    }
    if &buf[0..3] != b"ID3" {
        return Id3Probe::NotPresent;
    }
    if buf.len() < 10 {
        return Id3Probe::NeedMoreData;
    }
    // Four syncsafe size bytes; a set high bit means this is not a tag
    if buf[6..10].iter().any(|b| b & 0x80 != 0) {
        return Id3Probe::NotPresent;
    }
    let body = ((buf[6] as usize) << 21)
        | ((buf[7] as usize) << 14)
        | ((buf[8] as usize) << 7)
        | (buf[9] as usize);
    // Footer flag doubles the 10-byte framing
    let footer = if buf[5] & 0x10 != 0 { 10 } else { 0 };
    Id3Probe::Tag(10 + body + footer)
}
