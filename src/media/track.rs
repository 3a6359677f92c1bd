//! Tracks: live data paths between connections
//!
//! A [`Receiver`] is created by the side that sources data for a media/codec
//! pair. Any number of [`Sender`]s bind to it; each gets its own bounded
//! buffer and pump task, so a slow reader drops packets instead of stalling
//! the writer or the other readers.
//!
//! ```text
//!   producer conn ──write_packet()──► Receiver ──┬──► Sender ──► handler
//!                                      (Fanout)  ├──► Sender ──► handler
//!                                                └──► Sender ──► handler
//! ```
//!
//! The set of bound senders lives in a shared `Fanout`. On reconnect a
//! fresh receiver takes over the fanout of the old one, so downstream
//! senders keep working without being rebound.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use super::codec::Codec;
use super::descriptor::{Kind, Media};

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate a process-wide unique id for tracks and connections
pub fn next_id() -> u32 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Buffer size for video readers (high bitrate streams can have 700+
/// packets between keyframes)
const VIDEO_BUFFER: usize = 1000;

/// Buffer size for audio readers
const AUDIO_BUFFER: usize = 100;

/// A media packet
///
/// Cheap to clone, the payload is reference counted.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub payload: Bytes,
    pub timestamp: u32,
    pub sequence: u16,
    pub marker: bool,
}

impl Packet {
    pub fn new(payload: Bytes, timestamp: u32) -> Self {
        Self {
            payload,
            timestamp,
            ..Default::default()
        }
    }
}

struct Output {
    tx: mpsc::Sender<Packet>,
    overflow: Arc<AtomicU64>,
}

/// Downstream set of a receiver, shared across reconnects
struct Fanout {
    /// Id of the receiver currently feeding this fanout
    parent: AtomicU32,
    outputs: Mutex<HashMap<u32, Output>>,
}

impl Fanout {
    fn new(parent: u32) -> Self {
        Self {
            parent: AtomicU32::new(parent),
            outputs: Mutex::new(HashMap::new()),
        }
    }
}

/// Source side of a track
pub struct Receiver {
    id: u32,
    pub media: Media,
    pub codec: Codec,
    fanout: Mutex<Arc<Fanout>>,
    bytes: AtomicU64,
}

impl Receiver {
    pub fn new(media: Media, codec: Codec) -> Self {
        let id = next_id();
        Self {
            id,
            media,
            codec,
            fanout: Mutex::new(Arc::new(Fanout::new(id))),
            bytes: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    fn fanout(&self) -> Arc<Fanout> {
        Arc::clone(&self.fanout.lock())
    }

    /// Deliver a packet to every bound sender without blocking
    ///
    /// Full buffers count an overflow on that sender and drop the packet.
    pub fn write_packet(&self, packet: Packet) {
        self.bytes
            .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);

        let fanout = self.fanout();
        let outputs = fanout.outputs.lock();
        for output in outputs.values() {
            if let Err(mpsc::error::TrySendError::Full(_)) = output.tx.try_send(packet.clone()) {
                output.overflow.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of senders currently bound downstream
    pub fn sender_count(&self) -> usize {
        self.fanout().outputs.lock().len()
    }

    /// Ids of the senders currently bound downstream
    pub fn sender_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.fanout().outputs.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Detach every sender; their pump tasks finish after draining
    pub fn close(&self) {
        self.fanout().outputs.lock().clear();
    }

    /// Hand this receiver's downstream senders over to `target`
    ///
    /// This receiver is left with an empty downstream set.
    pub fn replace(&self, target: &Receiver) {
        if std::ptr::eq(self, target) {
            return;
        }
        let fanout = self.fanout();
        fanout.parent.store(target.id, Ordering::Relaxed);
        *target.fanout.lock() = fanout;
        *self.fanout.lock() = Arc::new(Fanout::new(self.id));
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            id: self.id,
            codec: self.codec.clone(),
            parent: 0,
            childs: self.sender_ids(),
            bytes: self.bytes(),
        }
    }
}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("id", &self.id)
            .field("codec", &self.codec.to_string())
            .field("bytes", &self.bytes())
            .field("senders", &self.sender_count())
            .finish()
    }
}

/// Packet callback of a sender
pub type PacketHandler = Arc<dyn Fn(&Packet) + Send + Sync>;

/// Sink side of a track
pub struct Sender {
    id: u32,
    pub media: Media,
    pub codec: Codec,
    handler: PacketHandler,
    bindings: Mutex<Vec<Arc<Fanout>>>,
    bytes: Arc<AtomicU64>,
    overflow: Arc<AtomicU64>,
}

impl Sender {
    /// Create a sender delivering packets to `handler`
    pub fn new<F>(media: Media, codec: Codec, handler: F) -> Arc<Self>
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        Arc::new(Self {
            id: next_id(),
            media,
            codec,
            handler: Arc::new(handler),
            bindings: Mutex::new(Vec::new()),
            bytes: Arc::new(AtomicU64::new(0)),
            overflow: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Create a sender that discards packets
    pub fn discard(media: Media, codec: Codec) -> Arc<Self> {
        Self::new(media, codec, |_| {})
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Start reading packets from `receiver`
    ///
    /// Must be called within a tokio runtime; spawns the pump task.
    pub fn bind(&self, receiver: &Receiver) {
        let capacity = if receiver.codec.kind() == Some(Kind::Video) {
            VIDEO_BUFFER
        } else {
            AUDIO_BUFFER
        };
        let (tx, mut rx) = mpsc::channel::<Packet>(capacity);

        let fanout = receiver.fanout();
        fanout.outputs.lock().insert(
            self.id,
            Output {
                tx,
                overflow: Arc::clone(&self.overflow),
            },
        );
        self.bindings.lock().push(fanout);

        let handler = Arc::clone(&self.handler);
        let bytes = Arc::clone(&self.bytes);
        tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                bytes.fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
                handler(&packet);
            }
        });
    }

    /// Detach from every receiver this sender is bound to
    pub fn close(&self) {
        for fanout in self.bindings.lock().drain(..) {
            fanout.outputs.lock().remove(&self.id);
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Packets dropped because the buffer was full
    pub fn overflow(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    pub fn info(&self) -> TrackInfo {
        let parent = self
            .bindings
            .lock()
            .first()
            .map(|fanout| fanout.parent.load(Ordering::Relaxed))
            .unwrap_or_default();

        TrackInfo {
            id: self.id,
            codec: self.codec.clone(),
            parent,
            childs: Vec::new(),
            bytes: self.bytes(),
        }
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("id", &self.id)
            .field("codec", &self.codec.to_string())
            .field("bytes", &self.bytes())
            .field("overflow", &self.overflow())
            .finish()
    }
}

/// Serializable snapshot of a track
#[derive(Debug, Clone, Serialize)]
pub struct TrackInfo {
    pub id: u32,
    pub codec: Codec,
    #[serde(skip_serializing_if = "is_zero")]
    pub parent: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub childs: Vec<u32>,
    pub bytes: u64,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::media::codec::{CODEC_H264, CODEC_PCMU};
    use crate::media::descriptor::Direction;

    fn video() -> (Media, Codec) {
        let codec = Codec::new(CODEC_H264).clock_rate(90000);
        let media = Media::new(Kind::Video, Direction::Recvonly).codec(codec.clone());
        (media, codec)
    }

    fn counting_sender(media: &Media, codec: &Codec) -> (Arc<Sender>, Arc<AtomicU64>) {
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let sender = Sender::new(media.clone(), codec.clone(), move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        (sender, count)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_fan_out() {
        let (media, codec) = video();
        let receiver = Receiver::new(media.clone(), codec.clone());

        let (s1, c1) = counting_sender(&media, &codec);
        let (s2, c2) = counting_sender(&media, &codec);
        s1.bind(&receiver);
        s2.bind(&receiver);
        assert_eq!(receiver.sender_count(), 2);

        receiver.write_packet(Packet::new(Bytes::from_static(&[1, 2, 3]), 0));
        settle().await;

        assert_eq!(c1.load(Ordering::Relaxed), 1);
        assert_eq!(c2.load(Ordering::Relaxed), 1);
        assert_eq!(receiver.bytes(), 3);
        assert_eq!(s1.bytes(), 3);
    }

    #[tokio::test]
    async fn test_sender_close_detaches() {
        let (media, codec) = video();
        let receiver = Receiver::new(media.clone(), codec.clone());
        let (sender, count) = counting_sender(&media, &codec);

        sender.bind(&receiver);
        sender.close();
        assert_eq!(receiver.sender_count(), 0);

        receiver.write_packet(Packet::new(Bytes::from_static(&[1]), 0));
        settle().await;
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_replace_keeps_downstream() {
        let (media, codec) = video();
        let old = Receiver::new(media.clone(), codec.clone());
        let fresh = Receiver::new(media.clone(), codec.clone());
        let (sender, count) = counting_sender(&media, &codec);

        sender.bind(&old);
        old.replace(&fresh);
        assert_eq!(fresh.sender_count(), 1);
        assert_eq!(old.sender_count(), 0);
        assert_eq!(sender.info().parent, fresh.id());

        fresh.write_packet(Packet::new(Bytes::from_static(&[9]), 0));
        settle().await;
        assert_eq!(count.load(Ordering::Relaxed), 1);

        // closing the sender still detaches it from the new receiver
        sender.close();
        assert_eq!(fresh.sender_count(), 0);
    }

    #[tokio::test]
    async fn test_overflow_counts_drops() {
        let codec = Codec::new(CODEC_PCMU).clock_rate(8000);
        let media = Media::new(Kind::Audio, Direction::Recvonly).codec(codec.clone());
        let receiver = Receiver::new(media.clone(), codec.clone());
        let sender = Sender::discard(media, codec);
        sender.bind(&receiver);

        for i in 0..(AUDIO_BUFFER as u32 * 3) {
            receiver.write_packet(Packet::new(Bytes::from_static(&[0]), i));
        }

        // the pump task never ran, so everything past the buffer was dropped
        assert_eq!(sender.overflow(), AUDIO_BUFFER as u64 * 2);
        sender.close();
    }

    #[tokio::test]
    async fn test_receiver_close() {
        let (media, codec) = video();
        let receiver = Receiver::new(media.clone(), codec.clone());
        let sender = Sender::discard(media, codec);

        sender.bind(&receiver);
        receiver.close();
        assert_eq!(receiver.sender_count(), 0);
        assert_eq!(receiver.info().childs.len(), 0);
    }
}
