//! Preload: a standing consumer that keeps producers warm
//!
//! A preload asks for the medias named in a query string (`video`, `audio`
//! and `microphone` keys, values as in viewer queries) and throws away
//! everything it receives. Its only effect is that the stream's producers
//! stay started, so the first real viewer skips the cold dial.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::connection::{ConnectionInfo, Consumer, Producer};
use crate::error::{Error, Result};
use crate::media::{next_id, parse_query, Codec, Direction, Media, Receiver, Sender};

/// Query used when none is given
pub const DEFAULT_QUERY: &str = "video&audio";

pub struct Preload {
    id: u32,
    query: String,
    medias: Vec<Media>,
    senders: Mutex<Vec<Arc<Sender>>>,
    /// Microphone tracks handed to two-way producers
    receivers: Mutex<Vec<Arc<Receiver>>>,
    closed: watch::Sender<bool>,
}

impl Preload {
    pub fn new(query: &str) -> Arc<Self> {
        let query = if query.is_empty() { DEFAULT_QUERY } else { query };

        Arc::new(Self {
            id: next_id(),
            query: query.to_string(),
            medias: parse_medias(query),
            senders: Mutex::new(Vec::new()),
            receivers: Mutex::new(Vec::new()),
            closed: watch::channel(false).0,
        })
    }

    /// Raw query this preload was created from
    pub fn query(&self) -> &str {
        &self.query
    }
}

/// Viewer medias for `video`/`audio`, a recvonly audio media for `microphone`
fn parse_medias(query: &str) -> Vec<Media> {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut medias = Vec::new();
    for (key, value) in &pairs {
        match key.as_str() {
            "microphone" => {
                for mut media in parse_query([("audio", value.as_str())]) {
                    media.direction = Direction::Recvonly;
                    medias.push(media);
                }
            }
            _ => medias.extend(parse_query([(key.as_str(), value.as_str())])),
        }
    }

    medias
}

#[async_trait]
impl Consumer for Preload {
    fn medias(&self) -> Vec<Media> {
        self.medias.clone()
    }

    fn add_track(&self, media: &Media, codec: &Codec, track: &Arc<Receiver>) -> Result<()> {
        let sender = Sender::discard(media.clone(), codec.clone());
        sender.bind(track);
        self.senders.lock().push(sender);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        for sender in self.senders.lock().drain(..) {
            sender.close();
        }
        for receiver in self.receivers.lock().drain(..) {
            receiver.close();
        }
        self.closed.send_replace(true);
        Ok(())
    }

    fn as_producer(self: Arc<Self>) -> Option<Arc<dyn Producer>> {
        Some(self)
    }

    fn info(&self) -> ConnectionInfo {
        let senders = self.senders.lock();

        let mut info = ConnectionInfo::new(self.id, "preload");
        info.protocol = "native".into();
        info.remote_addr = "localhost".into();
        info.user_agent = format!("preload?{}", self.query);
        info.medias = self.medias.clone();
        info.senders = senders.iter().map(|sender| sender.info()).collect();
        info.receivers = self.receivers.lock().iter().map(|r| r.info()).collect();
        info.bytes_send = senders.iter().map(|sender| sender.bytes()).sum();
        info
    }
}

/// The microphone side; it never produces packets
#[async_trait]
impl Producer for Preload {
    fn medias(&self) -> Vec<Media> {
        self.medias.clone()
    }

    fn get_track(&self, media: &Media, codec: &Codec) -> Result<Arc<Receiver>> {
        if media.direction != Direction::Recvonly || !self.medias.contains(media) {
            return Err(Error::NoTrackAvailable);
        }

        let receiver = Arc::new(Receiver::new(media.clone(), codec.clone()));
        self.receivers.lock().push(Arc::clone(&receiver));
        Ok(receiver)
    }

    async fn start(&self) -> Result<()> {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Consumer::stop(self).await
    }
}

impl std::fmt::Debug for Preload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preload")
            .field("id", &self.id)
            .field("query", &self.query)
            .finish()
    }
}
