//! # media-router
//!
//! Stream routing and lifecycle engine for multi-protocol media hubs.
//!
//! Protocol adapters (RTSP, WebRTC, HLS, pipelines...) live outside this
//! crate. They plug in through two small traits, [`Producer`] and
//! [`Consumer`], and a [`SchemeRegistry`] that maps URL schemes to the code
//! able to open them. The router decides which producer feeds which
//! consumer:
//!
//! - Producers are dialed lazily when the first consumer asks for them,
//!   reconnected with backoff when they drop, and stopped once nobody reads
//!   from them any more
//! - Consumers are matched per media kind against the stream's producers,
//!   in order, with two-way audio (backchannel) support
//! - Play pushes another source into a stream's producer, Publish pushes a
//!   stream to a destination and keeps it there
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use media_router::{RegistryConfig, SchemeRegistry, StreamRegistry};
//!
//! # async fn run() -> media_router::Result<()> {
//! let schemes = Arc::new(SchemeRegistry::new());
//! // schemes.register_handler("rtsp", |url: String| async move { ... });
//!
//! let config = RegistryConfig::default().stream("cam1", "rtsp://10.0.0.5/live");
//! let registry = Arc::new(StreamRegistry::with_config(schemes, config));
//!
//! registry.start_preloads().await;
//! registry.start_publishing();
//!
//! if let Some(stream) = registry.get("cam1").await {
//!     println!("{}", serde_json::to_string(&*stream).unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod media;
pub mod redact;
pub mod registry;
pub mod scheme;
pub mod stream;

#[cfg(test)]
mod testing;

pub use connection::{same_connection, ConnectionInfo, Consumer, Producer};
pub use error::{Error, Result};
pub use media::{Codec, Direction, Kind, Media, Packet, Receiver, Sender};
pub use redact::redact;
pub use registry::{RegistryConfig, RegistryError, StreamRegistry};
pub use scheme::{Publication, SchemeRegistry};
pub use stream::{Preload, Stream, StreamOptions, StreamProducer};
