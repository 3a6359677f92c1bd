//! Media model
//!
//! This module provides:
//! - Codec descriptors and codec matching
//! - Media descriptors (kind, direction, ranked codecs) and media matching
//! - Tracks: non-blocking fan-out from one receiver to many senders

pub mod codec;
pub mod descriptor;
pub mod track;

pub use codec::Codec;
pub use descriptor::{parse_query, Direction, Kind, Media};
pub use track::{next_id, Packet, Receiver, Sender, TrackInfo};
