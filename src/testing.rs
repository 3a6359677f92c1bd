//! Fake connections and handlers for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::connection::{ConnectionInfo, Consumer, Producer};
use crate::error::{Error, Result};
use crate::media::codec::{CODEC_AAC, CODEC_H264, CODEC_PCMU};
use crate::media::{next_id, parse_query, Codec, Direction, Kind, Media, Packet, Receiver, Sender};
use crate::scheme::SchemeRegistry;

/// Opt-in log output: `RUST_LOG=media_router=trace cargo test`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn h264() -> Media {
    Media::new(Kind::Video, Direction::Recvonly).codec(Codec::new(CODEC_H264).clock_rate(90000))
}

pub fn aac() -> Media {
    Media::new(Kind::Audio, Direction::Recvonly)
        .codec(Codec::new(CODEC_AAC).clock_rate(16000).channels(1))
}

/// Backchannel media of a camera with a speaker
pub fn speaker() -> Media {
    Media::new(Kind::Audio, Direction::Sendonly).codec(Codec::new(CODEC_PCMU).clock_rate(8000))
}

/// Medias of a viewer, built like a query string
pub fn wants(query: &str) -> Vec<Media> {
    parse_query(query.split('&').filter_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (!key.is_empty()).then_some((key, value))
    }))
}

/// In-memory producer
///
/// `start` blocks until `stop` or `disconnect`. Medias with `sendonly`
/// direction make it a two-way connection that also accepts tracks.
pub struct FakeProducer {
    id: u32,
    url: String,
    medias: Vec<Media>,
    receivers: Mutex<Vec<Arc<Receiver>>>,
    inputs: Mutex<Vec<Arc<Sender>>>,
    closed: watch::Sender<bool>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeProducer {
    pub fn new(medias: Vec<Media>) -> Arc<Self> {
        Self::with_url("", medias)
    }

    pub fn with_url(url: &str, medias: Vec<Media>) -> Arc<Self> {
        Arc::new(Self {
            id: next_id(),
            url: url.to_string(),
            medias,
            receivers: Mutex::new(Vec::new()),
            inputs: Mutex::new(Vec::new()),
            closed: watch::channel(false).0,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }

    pub fn video() -> Arc<Self> {
        Self::new(vec![h264()])
    }

    /// End the current `start` as if the remote side hung up
    pub fn disconnect(&self) {
        self.closed.send_replace(true);
    }

    /// Push a packet into every track handed out so far
    pub fn write(&self, payload: &'static [u8]) {
        for receiver in self.receivers.lock().iter() {
            receiver.write_packet(Packet::new(Bytes::from_static(payload), 0));
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stops() > 0
    }

    pub fn receivers(&self) -> Vec<Arc<Receiver>> {
        self.receivers.lock().clone()
    }

    /// Backchannel tracks attached to this connection
    pub fn inputs(&self) -> usize {
        self.inputs.lock().len()
    }

    fn two_way(&self) -> bool {
        self.medias
            .iter()
            .any(|media| media.direction == Direction::Sendonly)
    }
}

#[async_trait]
impl Producer for FakeProducer {
    fn medias(&self) -> Vec<Media> {
        self.medias.clone()
    }

    fn get_track(&self, media: &Media, codec: &Codec) -> Result<Arc<Receiver>> {
        if !self.medias.contains(media) {
            return Err(Error::NoTrackAvailable);
        }
        let receiver = Arc::new(Receiver::new(media.clone(), codec.clone()));
        self.receivers.lock().push(Arc::clone(&receiver));
        Ok(receiver)
    }

    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;

        if self.is_stopped() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        for input in self.inputs.lock().drain(..) {
            input.close();
        }
        self.closed.send_replace(true);
        Ok(())
    }

    fn as_consumer(self: Arc<Self>) -> Option<Arc<dyn Consumer>> {
        if self.two_way() {
            Some(self)
        } else {
            None
        }
    }

    fn info(&self) -> ConnectionInfo {
        let mut info = ConnectionInfo::new(self.id, "fake");
        info.url = self.url.clone();
        info.remote_addr = "10.0.0.2:554".into();
        info.medias = self.medias.clone();
        info.receivers = self.receivers.lock().iter().map(|r| r.info()).collect();
        info.bytes_recv = self.receivers.lock().iter().map(|r| r.bytes()).sum();
        info
    }
}

#[async_trait]
impl Consumer for FakeProducer {
    fn medias(&self) -> Vec<Media> {
        self.medias.clone()
    }

    fn add_track(&self, media: &Media, codec: &Codec, track: &Arc<Receiver>) -> Result<()> {
        let sender = Sender::discard(media.clone(), codec.clone());
        sender.bind(track);
        self.inputs.lock().push(sender);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Producer::stop(self).await
    }

    fn as_producer(self: Arc<Self>) -> Option<Arc<dyn Producer>> {
        Some(self)
    }
}

/// In-memory consumer counting delivered packets
pub struct FakeConsumer {
    id: u32,
    medias: Vec<Media>,
    source: Option<String>,
    senders: Mutex<Vec<Arc<Sender>>>,
    /// Microphone tracks handed to producers
    outputs: Mutex<Vec<Arc<Receiver>>>,
    packets: Arc<AtomicUsize>,
    stops: AtomicUsize,
}

impl FakeConsumer {
    pub fn new(medias: Vec<Media>) -> Arc<Self> {
        Self::build(medias, None)
    }

    /// Consumer created from a source URL (loop detection)
    pub fn with_source(medias: Vec<Media>, source: &str) -> Arc<Self> {
        Self::build(medias, Some(source.to_string()))
    }

    fn build(medias: Vec<Media>, source: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            id: next_id(),
            medias,
            source,
            senders: Mutex::new(Vec::new()),
            outputs: Mutex::new(Vec::new()),
            packets: Arc::new(AtomicUsize::new(0)),
            stops: AtomicUsize::new(0),
        })
    }

    /// Tracks attached by the stream
    pub fn tracks(&self) -> Vec<Codec> {
        self.senders.lock().iter().map(|s| s.codec.clone()).collect()
    }

    pub fn packets(&self) -> usize {
        self.packets.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn microphone(&self) -> Vec<Arc<Receiver>> {
        self.outputs.lock().clone()
    }
}

#[async_trait]
impl Consumer for FakeConsumer {
    fn medias(&self) -> Vec<Media> {
        self.medias.clone()
    }

    fn add_track(&self, media: &Media, codec: &Codec, track: &Arc<Receiver>) -> Result<()> {
        let packets = Arc::clone(&self.packets);
        let sender = Sender::new(media.clone(), codec.clone(), move |_| {
            packets.fetch_add(1, Ordering::SeqCst);
        });
        sender.bind(track);
        self.senders.lock().push(sender);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        for sender in self.senders.lock().drain(..) {
            sender.close();
        }
        Ok(())
    }

    fn as_producer(self: Arc<Self>) -> Option<Arc<dyn Producer>> {
        Some(self)
    }

    fn source(&self) -> Option<String> {
        self.source.clone()
    }

    fn info(&self) -> ConnectionInfo {
        let mut info = ConnectionInfo::new(self.id, "viewer");
        info.remote_addr = "192.168.1.50:50000".into();
        info.senders = self.senders.lock().iter().map(|s| s.info()).collect();
        info.bytes_send = self.senders.lock().iter().map(|s| s.bytes()).sum();
        info
    }
}

/// Microphone side of a two-way viewer
#[async_trait]
impl Producer for FakeConsumer {
    fn medias(&self) -> Vec<Media> {
        self.medias.clone()
    }

    fn get_track(&self, media: &Media, codec: &Codec) -> Result<Arc<Receiver>> {
        let receiver = Arc::new(Receiver::new(media.clone(), codec.clone()));
        self.outputs.lock().push(Arc::clone(&receiver));
        Ok(receiver)
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Consumer::stop(self).await
    }
}

/// Source handler producing fake connections
///
/// Every URL dials successfully with H264 video unless configured
/// otherwise. Connections are recorded in dial order.
#[derive(Default)]
pub struct Dialer {
    dials: AtomicUsize,
    delay: Mutex<Duration>,
    failing: Mutex<HashSet<String>>,
    offers: Mutex<HashMap<String, Vec<Media>>>,
    conns: Mutex<Vec<(String, Arc<FakeProducer>)>>,
}

impl Dialer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register under `scheme` in a fresh scheme registry
    pub fn schemes(self: &Arc<Self>, scheme: &str) -> Arc<SchemeRegistry> {
        let schemes = Arc::new(SchemeRegistry::new());
        self.register(&schemes, scheme);
        schemes
    }

    pub fn register(self: &Arc<Self>, schemes: &SchemeRegistry, scheme: &str) {
        let dialer = Arc::clone(self);
        schemes.register_handler(scheme, move |url: String| {
            let dialer = Arc::clone(&dialer);
            async move { dialer.dial(url).await }
        });
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().insert(url.to_string());
    }

    pub fn recover(&self, url: &str) {
        self.failing.lock().remove(url);
    }

    pub fn offer(&self, url: &str, medias: Vec<Media>) {
        self.offers.lock().insert(url.to_string(), medias);
    }

    pub fn delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Connections opened so far
    pub fn conns(&self) -> Vec<Arc<FakeProducer>> {
        self.conns.lock().iter().map(|(_, c)| Arc::clone(c)).collect()
    }

    /// Most recent connection opened for `url`
    pub fn last(&self, url: &str) -> Option<Arc<FakeProducer>> {
        self.conns
            .lock()
            .iter()
            .rev()
            .find(|(u, _)| u == url)
            .map(|(_, c)| Arc::clone(c))
    }

    async fn dial(&self, url: String) -> Result<Arc<dyn Producer>> {
        self.dials.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().contains(&url) {
            return Err(Error::dial(format!("dial {url}: connection refused")));
        }

        let medias = self
            .offers
            .lock()
            .get(&url)
            .cloned()
            .unwrap_or_else(|| vec![h264()]);
        let conn = FakeProducer::with_url(&url, medias);
        self.conns.lock().push((url, Arc::clone(&conn)));
        Ok(conn)
    }
}

/// Let spawned tasks run
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
