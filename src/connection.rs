//! Producer and consumer capabilities
//!
//! Protocol adapters plug into the router by implementing these traits.
//! The surface is intentionally small: a producer exposes its medias, hands
//! out tracks and runs a blocking receive loop; a consumer exposes the
//! medias it wants and accepts tracks.
//!
//! Two-way protocols implement both traits and return themselves from
//! [`Producer::as_consumer`] / [`Consumer::as_producer`], which is how
//! backchannel audio and Play find their counterpart.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::media::{Codec, Media, Receiver, TrackInfo};

/// A source of media
#[async_trait]
pub trait Producer: Send + Sync {
    /// Medias offered by the connection
    fn medias(&self) -> Vec<Media>;

    /// Create a track for one of the offered medias
    fn get_track(&self, media: &Media, codec: &Codec) -> Result<Arc<Receiver>>;

    /// Run the receive loop until the connection ends
    async fn start(&self) -> Result<()>;

    /// Stop the connection; must be idempotent and must make a pending
    /// `start` return
    async fn stop(&self) -> Result<()>;

    /// The same connection seen as a consumer, if it accepts input
    fn as_consumer(self: Arc<Self>) -> Option<Arc<dyn Consumer>> {
        None
    }

    /// Snapshot for diagnostics
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo::default()
    }
}

/// A sink of media
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Medias wanted by the consumer
    fn medias(&self) -> Vec<Media>;

    /// Attach a producer track to one of the wanted medias
    fn add_track(&self, media: &Media, codec: &Codec, track: &Arc<Receiver>) -> Result<()>;

    /// Detach from every track and release the connection
    async fn stop(&self) -> Result<()>;

    /// The same connection seen as a producer (backchannel)
    fn as_producer(self: Arc<Self>) -> Option<Arc<dyn Producer>> {
        None
    }

    /// Source URL this consumer was created from, used to avoid routing a
    /// stream into itself
    fn source(&self) -> Option<String> {
        None
    }

    /// Snapshot for diagnostics
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo::default()
    }
}

/// Compare two connections by object identity
///
/// Only the data pointers are compared, so a producer and a consumer
/// handle to the same object are considered equal.
pub fn same_connection<A: ?Sized, B: ?Sized>(a: &Arc<A>, b: &Arc<B>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Serializable snapshot of a connection
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionInfo {
    pub id: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub format_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub remote_addr: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub medias: Vec<Media>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub receivers: Vec<TrackInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub senders: Vec<TrackInfo>,
    #[serde(skip_serializing_if = "is_zero")]
    pub bytes_recv: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub bytes_send: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl ConnectionInfo {
    pub fn new(id: u32, format_name: impl Into<String>) -> Self {
        Self {
            id,
            format_name: format_name.into(),
            ..Default::default()
        }
    }
}
