//! Codec descriptors
//!
//! A [`Codec`] is one concrete encoding (name, clock rate, channel count and
//! format parameters). Codecs are compared by value; matching is asymmetric,
//! the remote side may leave clock rate and channels unspecified or ask for
//! any codec at all.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::descriptor::Kind;

pub const CODEC_H264: &str = "H264";
pub const CODEC_H265: &str = "H265";
pub const CODEC_VP8: &str = "VP8";
pub const CODEC_VP9: &str = "VP9";
pub const CODEC_AV1: &str = "AV1";
pub const CODEC_JPEG: &str = "JPEG";
pub const CODEC_RAW: &str = "RAW";

pub const CODEC_PCMU: &str = "PCMU";
pub const CODEC_PCMA: &str = "PCMA";
pub const CODEC_AAC: &str = "MPEG4-GENERIC";
pub const CODEC_OPUS: &str = "OPUS";
pub const CODEC_G722: &str = "G722";
pub const CODEC_MP3: &str = "MPA";
/// Linear PCM, big endian
pub const CODEC_PCM: &str = "L16";
/// Linear PCM, little endian
pub const CODEC_PCML: &str = "PCML";
/// AAC-ELD
pub const CODEC_ELD: &str = "ELD";
pub const CODEC_FLAC: &str = "FLAC";

/// Wildcard: consumer wants every matching media, not just the first
pub const CODEC_ALL: &str = "ALL";
/// Wildcard: consumer accepts any codec
pub const CODEC_ANY: &str = "ANY";

/// Payload type used by codecs that are not carried over RTP
pub const PAYLOAD_TYPE_RAW: u8 = 255;

/// A single codec description
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Codec {
    /// Codec name (H264, PCMU, OPUS...)
    pub name: String,
    /// Clock rate (90000, 8000, 48000...), 0 if unspecified
    pub clock_rate: u32,
    /// Channel count, 0 if unspecified
    pub channels: u16,
    /// Format specific parameters (SDP fmtp line)
    pub fmtp_line: String,
    /// RTP payload type
    pub payload_type: u8,
}

impl Codec {
    /// Create a codec with only a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the clock rate
    pub fn clock_rate(mut self, clock_rate: u32) -> Self {
        self.clock_rate = clock_rate;
        self
    }

    /// Set the channel count
    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    /// Set the fmtp line
    pub fn fmtp(mut self, fmtp_line: impl Into<String>) -> Self {
        self.fmtp_line = fmtp_line.into();
        self
    }

    /// Set the payload type
    pub fn payload_type(mut self, payload_type: u8) -> Self {
        self.payload_type = payload_type;
        self
    }

    /// Check whether `remote` accepts this codec
    pub fn matches(&self, remote: &Codec) -> bool {
        if remote.name == CODEC_ALL || remote.name == CODEC_ANY {
            return true;
        }

        self.name == remote.name
            && (self.clock_rate == remote.clock_rate || remote.clock_rate == 0)
            && (self.channels == remote.channels || remote.channels == 0)
    }

    /// Media kind implied by the codec name
    pub fn kind(&self) -> Option<Kind> {
        kind_of(&self.name)
    }

    pub fn is_video(&self) -> bool {
        self.kind() == Some(Kind::Video)
    }

    pub fn is_audio(&self) -> bool {
        self.kind() == Some(Kind::Audio)
    }

    pub fn is_rtp(&self) -> bool {
        self.payload_type != PAYLOAD_TYPE_RAW
    }

    /// Short human name used in error messages
    pub fn print_name(&self) -> &str {
        match self.name.as_str() {
            CODEC_AAC => "AAC",
            CODEC_PCM => "S16B",
            CODEC_PCML => "S16L",
            name => name,
        }
    }
}

/// Media kind for a codec name, if it is a known one
pub fn kind_of(name: &str) -> Option<Kind> {
    match name {
        CODEC_H264 | CODEC_H265 | CODEC_VP8 | CODEC_VP9 | CODEC_AV1 | CODEC_JPEG | CODEC_RAW => {
            Some(Kind::Video)
        }
        CODEC_PCMU | CODEC_PCMA | CODEC_AAC | CODEC_OPUS | CODEC_G722 | CODEC_MP3 | CODEC_PCM
        | CODEC_PCML | CODEC_ELD | CODEC_FLAC => Some(Kind::Audio),
        _ => None,
    }
}

/// FFmpeg name for a codec, falls back to the codec name itself
pub fn ffmpeg_name(name: &str) -> &str {
    match name {
        CODEC_H264 => "h264",
        CODEC_H265 => "hevc",
        CODEC_JPEG => "mjpeg",
        CODEC_RAW => "rawvideo",
        CODEC_PCMA => "pcm_alaw",
        CODEC_PCMU => "pcm_mulaw",
        CODEC_PCM => "pcm_s16be",
        CODEC_PCML => "pcm_s16le",
        CODEC_AAC => "aac",
        CODEC_OPUS => "opus",
        CODEC_VP8 => "vp8",
        CODEC_VP9 => "vp9",
        CODEC_AV1 => "av1",
        CODEC_ELD => "aac/eld",
        CODEC_FLAC => "flac",
        CODEC_MP3 => "mp3",
        name => name,
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.clock_rate != 0 && self.clock_rate != 90000 {
            write!(f, "/{}", self.clock_rate)?;
        }
        if self.channels > 0 {
            write!(f, "/{}", self.channels)?;
        }
        Ok(())
    }
}

/// FFprobe compatible output
impl Serialize for Codec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if !self.name.is_empty() {
            map.serialize_entry("codec_name", ffmpeg_name(&self.name))?;
            if let Some(kind) = self.kind() {
                map.serialize_entry("codec_type", kind.as_str())?;
            }
        }
        if self.clock_rate != 0 && self.clock_rate != 90000 {
            map.serialize_entry("sample_rate", &self.clock_rate)?;
        }
        if self.channels > 0 {
            map.serialize_entry("channels", &self.channels)?;
        }
        map.end()
    }
}
