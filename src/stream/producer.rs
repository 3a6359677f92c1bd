//! Producer wrapper state machine
//!
//! Wraps one source URL of a stream. The upstream connection is dialed
//! lazily, shared by every consumer of the stream, started once the first
//! track is handed out and stopped by the stream's reaper when nobody reads
//! from it anymore.
//!
//! ```text
//!   None ──dial()──► Medias ──get_track()/add_track()──► Tracks ──start()──► Started
//!    ▲                                                                          │
//!    └────────────────────────────── stop() ◄───────────────────────────────────┘
//! ```
//!
//! `External` and `Internal` wrap connections created elsewhere (inbound
//! pushes, Play). They never transition.
//!
//! A started producer runs one worker task. When the connection ends, the
//! worker dials the URL again and moves every handed out track onto the new
//! connection, so downstream consumers keep their tracks. Each start bumps a
//! generation number; a worker that finds the generation changed exits.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use tokio::sync::{oneshot, Mutex, MutexGuard};

use crate::connection::Producer;
use crate::error::{Error, Result};
use crate::media::{Codec, Direction, Media, Receiver};
use crate::redact::redact;
use crate::scheme::SchemeRegistry;

/// Placeholder replaced by [`StreamProducer::set_source`] in templated URLs
pub const SOURCE_TEMPLATE: &str = "{input}";

/// Delay before reconnect attempt number `retry` (0-based)
pub fn reconnect_backoff(retry: u32) -> Duration {
    match retry {
        0..=4 => Duration::from_secs(1),
        5..=9 => Duration::from_secs(5),
        10..=19 => Duration::from_secs(10),
        _ => Duration::from_secs(60),
    }
}

/// Observable state of a producer wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    /// Not connected
    None,
    /// Connected, medias known
    Medias,
    /// At least one track handed out
    Tracks,
    /// Worker running
    Started,
    /// Connection owned by another subsystem
    External,
    /// Connection created by Play
    Internal,
}

/// Connection state; a connection exists in every state but `None`
enum State {
    None,
    Medias(Arc<dyn Producer>),
    Tracks(Arc<dyn Producer>),
    Started {
        conn: Arc<dyn Producer>,
        /// Dropping or firing this ends the worker
        abort: oneshot::Sender<()>,
    },
    External(Arc<dyn Producer>),
    Internal(Arc<dyn Producer>),
}

impl State {
    fn conn(&self) -> Option<&Arc<dyn Producer>> {
        match self {
            State::None => None,
            State::Medias(conn)
            | State::Tracks(conn)
            | State::Started { conn, .. }
            | State::External(conn)
            | State::Internal(conn) => Some(conn),
        }
    }

    fn kind(&self) -> ProducerState {
        match self {
            State::None => ProducerState::None,
            State::Medias(_) => ProducerState::Medias,
            State::Tracks(_) => ProducerState::Tracks,
            State::Started { .. } => ProducerState::Started,
            State::External(_) => ProducerState::External,
            State::Internal(_) => ProducerState::Internal,
        }
    }
}

struct Inner {
    state: State,
    generation: u64,
    /// Tracks handed out to consumers
    receivers: Vec<Arc<Receiver>>,
    /// Backchannel tracks handed to the connection
    senders: Vec<Arc<Receiver>>,
}

impl Inner {
    fn new(state: State) -> Self {
        Self {
            state,
            generation: 0,
            receivers: Vec::new(),
            senders: Vec::new(),
        }
    }

    /// Whether any handed out track still feeds somebody
    fn has_readers(&self) -> bool {
        self.receivers
            .iter()
            .chain(self.senders.iter())
            .any(|track| track.sender_count() > 0)
    }

    /// Promote `Medias` to `Tracks` after the first track
    fn mark_tracks(&mut self) {
        if let State::Medias(conn) = &self.state {
            self.state = State::Tracks(Arc::clone(conn));
        }
    }

    /// Move tracks from the current connection onto `conn`
    ///
    /// Tracks without a match on the new connection stay where they are and
    /// stall until the next reconnect.
    fn rehome(&mut self, conn: &Arc<dyn Producer>) {
        for media in conn.medias() {
            match media.direction {
                Direction::Recvonly => {
                    for receiver in self.receivers.iter_mut() {
                        let Some(codec) = media.match_codec(&receiver.codec) else {
                            continue;
                        };
                        let Ok(track) = conn.get_track(&media, &codec) else {
                            continue;
                        };
                        receiver.replace(&track);
                        *receiver = track;
                        break;
                    }
                }
                Direction::Sendonly => {
                    let Some(cons) = Arc::clone(conn).as_consumer() else {
                        continue;
                    };
                    for sender in &self.senders {
                        if let Some(codec) = media.match_codec(&sender.codec) {
                            if let Err(e) = cons.add_track(&media, &codec, sender) {
                                tracing::trace!(error = %e, "Backchannel not moved");
                            }
                        }
                    }
                }
                Direction::Sendrecv => {}
            }
        }
    }
}

/// One source of a stream
pub struct StreamProducer {
    url: RwLock<String>,
    template: Option<String>,
    inner: Mutex<Inner>,
    schemes: Arc<SchemeRegistry>,
}

impl StreamProducer {
    /// Wrap a source URL, which may contain [`SOURCE_TEMPLATE`]
    pub fn new(source: &str, schemes: Arc<SchemeRegistry>) -> Arc<Self> {
        let template = source
            .contains(SOURCE_TEMPLATE)
            .then(|| source.to_string());
        let url = if template.is_some() { "" } else { source };

        Arc::new(Self {
            url: RwLock::new(url.to_string()),
            template,
            inner: Mutex::new(Inner::new(State::None)),
            schemes,
        })
    }

    /// Wrap a connection created by another subsystem
    pub fn external(conn: Arc<dyn Producer>, schemes: Arc<SchemeRegistry>) -> Arc<Self> {
        Self::attached(State::External(conn), schemes)
    }

    /// Wrap a connection created by Play
    pub(crate) fn internal(conn: Arc<dyn Producer>, schemes: Arc<SchemeRegistry>) -> Arc<Self> {
        Self::attached(State::Internal(conn), schemes)
    }

    fn attached(state: State, schemes: Arc<SchemeRegistry>) -> Arc<Self> {
        let url = state
            .conn()
            .map(|conn| conn.info().url)
            .unwrap_or_default();

        Arc::new(Self {
            url: RwLock::new(url),
            template: None,
            inner: Mutex::new(Inner::new(state)),
            schemes,
        })
    }

    /// Current source URL
    pub fn url(&self) -> String {
        self.url.read().clone()
    }

    /// Change the source; templated URLs substitute the placeholder
    ///
    /// Takes effect on the next dial.
    pub fn set_source(&self, source: &str) {
        let url = match &self.template {
            Some(template) => template.replacen(SOURCE_TEMPLATE, source, 1),
            None => source.to_string(),
        };
        *self.url.write() = url;
    }

    pub async fn state(&self) -> ProducerState {
        self.inner.lock().await.state.kind()
    }

    /// Worker generation, bumped on every start and stop
    pub async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }

    pub async fn connection(&self) -> Option<Arc<dyn Producer>> {
        self.inner.lock().await.state.conn().cloned()
    }

    pub async fn is_internal(&self) -> bool {
        matches!(self.inner.lock().await.state, State::Internal(_))
    }

    /// Connect if not connected yet
    ///
    /// The lock is held while dialing, so concurrent callers wait and then
    /// share the connection.
    pub async fn dial(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if let State::None = inner.state {
            let conn = self.schemes.open_producer(&self.url()).await?;
            inner.state = State::Medias(conn);
        }

        Ok(())
    }

    /// Medias of the live connection, empty when not connected
    pub async fn medias(&self) -> Vec<Media> {
        let inner = self.inner.lock().await;
        inner
            .state
            .conn()
            .map(|conn| conn.medias())
            .unwrap_or_default()
    }

    /// Track for `codec`, shared with earlier callers asking for the same codec
    pub async fn get_track(&self, media: &Media, codec: &Codec) -> Result<Arc<Receiver>> {
        let mut inner = self.inner.lock().await;

        let Some(conn) = inner.state.conn().cloned() else {
            return Err(Error::InvalidState("get track from none state"));
        };

        if let Some(track) = inner.receivers.iter().find(|track| track.codec == *codec) {
            return Ok(Arc::clone(track));
        }

        let track = conn.get_track(media, codec)?;
        inner.receivers.push(Arc::clone(&track));
        inner.mark_tracks();

        Ok(track)
    }

    /// Hand a backchannel track to the connection
    pub async fn add_track(&self, media: &Media, codec: &Codec, track: &Arc<Receiver>) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let Some(conn) = inner.state.conn().cloned() else {
            return Err(Error::InvalidState("add track from none state"));
        };

        let Some(cons) = conn.as_consumer() else {
            return Err(Error::attach("producer doesn't accept tracks"));
        };

        cons.add_track(media, codec, track)?;
        inner.senders.push(Arc::clone(track));
        inner.mark_tracks();

        Ok(())
    }

    /// Start the worker; does nothing unless in `Tracks`
    pub async fn start(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;

        let State::Tracks(conn) = &inner.state else {
            return;
        };
        let conn = Arc::clone(conn);

        tracing::debug!(url = %redact(&self.url()), "Start producer");

        let (abort, abort_rx) = oneshot::channel();
        inner.state = State::Started {
            conn: Arc::clone(&conn),
            abort,
        };
        inner.generation += 1;

        let generation = inner.generation;
        tokio::spawn(Arc::clone(self).worker(conn, generation, abort_rx));
    }

    /// Disconnect and forget every track
    ///
    /// No-op when not connected or external.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await;
    }

    /// Reaper entry: stop unless somebody still reads from this producer
    ///
    /// External and internal connections are never reaped.
    pub(crate) async fn reap(&self) -> bool {
        let mut inner = self.inner.lock().await;

        if matches!(inner.state, State::External(_) | State::Internal(_)) || inner.has_readers() {
            return false;
        }

        self.stop_locked(&mut inner).await
    }

    /// Stop the connection of an internal producer, ending its Play task
    pub(crate) async fn stop_internal(&self) {
        let conn = match &self.inner.lock().await.state {
            State::Internal(conn) => Arc::clone(conn),
            _ => return,
        };

        if let Err(e) = conn.stop().await {
            tracing::debug!(error = %e, "Internal producer stop failed");
        }
    }

    async fn stop_locked(&self, inner: &mut MutexGuard<'_, Inner>) -> bool {
        match inner.state {
            State::None => {
                tracing::trace!("Skip stop none producer");
                return false;
            }
            State::External(_) => {
                tracing::trace!("Skip stop external producer");
                return false;
            }
            _ => {}
        }

        tracing::debug!(url = %redact(&self.url()), "Stop producer");

        let conn = match std::mem::replace(&mut inner.state, State::None) {
            State::Started { conn, abort } => {
                inner.generation += 1;
                let _ = abort.send(());
                conn
            }
            State::Medias(conn) | State::Tracks(conn) | State::Internal(conn) => conn,
            State::None | State::External(_) => return false,
        };

        inner.receivers.clear();
        inner.senders.clear();

        if let Err(e) = conn.stop().await {
            tracing::debug!(error = %e, "Producer stop failed");
        }

        true
    }

    /// Run the connection until it ends, then reconnect, until superseded
    async fn worker(
        self: Arc<Self>,
        mut conn: Arc<dyn Producer>,
        generation: u64,
        mut abort: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                result = conn.start() => {
                    if let Err(e) = result {
                        if self.generation().await != generation {
                            return;
                        }
                        match e {
                            Error::Closed => tracing::debug!(url = %redact(&self.url()), "Producer connection closed"),
                            e => tracing::warn!(url = %redact(&self.url()), error = %e, "Producer connection ended"),
                        }
                    }
                }
                _ = &mut abort => {
                    tracing::trace!(url = %redact(&self.url()), "Producer worker aborted");
                    return;
                }
            }

            match self.reconnect(generation, &mut abort).await {
                Some(next) => conn = next,
                None => return,
            }
        }
    }

    /// Dial again with backoff and swap the connection in place
    ///
    /// Returns `None` once the worker is superseded.
    async fn reconnect(
        &self,
        generation: u64,
        abort: &mut oneshot::Receiver<()>,
    ) -> Option<Arc<dyn Producer>> {
        let mut retry = 0;

        loop {
            if self.generation().await != generation {
                tracing::trace!(url = %redact(&self.url()), "Stop reconnect");
                return None;
            }

            let url = self.url();
            tracing::debug!(url = %redact(&url), retry = retry, "Reconnect producer");

            let conn = match self.schemes.open_producer(&url).await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::debug!(url = %redact(&url), error = %e, "Reconnect failed");

                    let backoff = reconnect_backoff(retry);
                    retry += 1;

                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = &mut *abort => return None,
                    }
                    continue;
                }
            };

            let mut inner = self.inner.lock().await;

            let superseded = inner.generation != generation;
            let old = match &mut inner.state {
                State::Started { conn: current, .. } if !superseded => {
                    Some(std::mem::replace(current, Arc::clone(&conn)))
                }
                _ => None,
            };

            let Some(old) = old else {
                drop(inner);
                let _ = conn.stop().await;
                return None;
            };

            inner.rehome(&conn);

            // stop the previous connection only after its tracks moved
            if let Err(e) = old.stop().await {
                tracing::debug!(error = %e, "Previous connection stop failed");
            }

            return Some(conn);
        }
    }
}

#[derive(Serialize)]
struct Unconnected {
    url: String,
}

impl Serialize for StreamProducer {
    /// Connection info when connected, the redacted URL otherwise
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if let Ok(inner) = self.inner.try_lock() {
            if let Some(conn) = inner.state.conn() {
                return conn.info().serialize(serializer);
            }
        }

        Unconnected {
            url: redact(&self.url()),
        }
        .serialize(serializer)
    }
}

impl std::fmt::Debug for StreamProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProducer")
            .field("url", &redact(&self.url()))
            .finish()
    }
}
