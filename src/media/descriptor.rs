//! Media descriptors
//!
//! A [`Media`] describes one track slot of a connection: its kind, the
//! direction data flows from the connection's point of view, and the codecs
//! it offers in preference order.
//!
//! Producers expose `recvonly` media for normal playback and `sendonly`
//! media when they accept input (two-way audio). Consumers use the opposite
//! directions, so a match always pairs complementary directions.

use std::fmt;

use serde::{Serialize, Serializer};

use super::codec::{
    Codec, CODEC_AAC, CODEC_ALL, CODEC_ANY, CODEC_JPEG, CODEC_MP3,
};

/// Media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Video,
    Audio,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Video => "video",
            Kind::Audio => "audio",
        }
    }

    /// Parse from `video` / `audio`
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "video" => Some(Kind::Video),
            "audio" => Some(Kind::Audio),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of data flow, seen from the connection owning the media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Connection receives from the remote side (a source for consumers)
    Recvonly,
    /// Connection sends to the remote side
    Sendonly,
    /// Both directions
    Sendrecv,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Recvonly => "recvonly",
            Direction::Sendonly => "sendonly",
            Direction::Sendrecv => "sendrecv",
        }
    }

    /// Whether `remote` is the complementary direction
    pub fn complements(&self, remote: Direction) -> bool {
        match self {
            Direction::Sendonly => remote == Direction::Recvonly,
            Direction::Recvonly => remote == Direction::Sendonly,
            Direction::Sendrecv => true,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of one media slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub kind: Kind,
    pub direction: Direction,
    /// Codecs in preference order
    pub codecs: Vec<Codec>,
    /// MID for WebRTC, control for RTSP
    pub id: String,
}

impl Media {
    /// Create a media without codecs
    pub fn new(kind: Kind, direction: Direction) -> Self {
        Self {
            kind,
            direction,
            codecs: Vec::new(),
            id: String::new(),
        }
    }

    /// Append a codec
    pub fn codec(mut self, codec: Codec) -> Self {
        self.codecs.push(codec);
        self
    }

    /// Set the media id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Pick a mutually acceptable codec pair
    ///
    /// Returns `(local, remote)` for the first local codec (in local
    /// preference order) that some remote codec accepts.
    pub fn match_media(&self, remote: &Media) -> Option<(Codec, Codec)> {
        if self.kind != remote.kind || !self.direction.complements(remote.direction) {
            return None;
        }

        for codec in &self.codecs {
            for remote_codec in &remote.codecs {
                if codec.matches(remote_codec) {
                    return Some((codec.clone(), remote_codec.clone()));
                }
            }
        }

        None
    }

    /// Find a local codec accepted by `remote`
    pub fn match_codec(&self, remote: &Codec) -> Option<Codec> {
        self.codecs.iter().find(|codec| codec.matches(remote)).cloned()
    }

    /// Whether the media asks for every matching source instead of the first
    pub fn match_all(&self) -> bool {
        self.codecs.iter().any(|codec| codec.name == CODEC_ALL)
    }
}

impl fmt::Display for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = format!("{}, {}", self.kind, self.direction);
        for codec in &self.codecs {
            let name = codec.to_string();
            if s.contains(&name) {
                continue;
            }
            s.push_str(", ");
            s.push_str(&name);
        }
        f.write_str(&s)
    }
}

impl Serialize for Media {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Build consumer medias from query parameters
///
/// Every `video=...` / `audio=...` pair becomes one `sendonly` media whose
/// codecs are the comma separated names (empty or `copy` means any codec).
pub fn parse_query<'a, I>(pairs: I) -> Vec<Media>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut medias = Vec::new();

    for (key, value) in pairs {
        let Some(kind) = Kind::parse(key) else {
            continue;
        };

        let mut media = Media::new(kind, Direction::Sendonly);
        for name in value.split(',') {
            let name = name.to_uppercase();
            let name = match name.as_str() {
                "" | "COPY" => CODEC_ANY,
                "MJPEG" => CODEC_JPEG,
                "AAC" => CODEC_AAC,
                "MP3" => CODEC_MP3,
                other => other,
            };
            media.codecs.push(Codec::new(name));
        }

        medias.push(media);
    }

    medias
}
