//! Stream registry: named streams and their standing consumers
//!
//! The registry owns the `name -> Stream` map the rest of the router looks
//! streams up in. Names are cheap: `patch` can point a second name at an
//! existing stream, so both names share producers and consumers.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<StreamRegistry>
//!                     ┌─────────────────────────────┐
//!                     │ streams: HashMap<name,      │
//!                     │   Arc<Stream>>              │
//!                     │ preloads: name -> Preload   │
//!                     │ schemes: Arc<SchemeRegistry>│
//!                     └──────────────┬──────────────┘
//!                                    │
//!         ┌──────────────────────────┼──────────────────────────┐
//!         ▼                          ▼                          ▼
//!   "cam1" ──► Arc<Stream> ◄── "lobby" (alias)          "door" ──► Arc<Stream>
//!                  │                                               │
//!           producers / consumers                           producers / consumers
//! ```
//!
//! Configured streams are created up front from [`RegistryConfig`]; dynamic
//! ones go through `create`/`patch`, which validate caller supplied sources.

pub mod config;
pub mod error;
pub mod store;

pub use config::{Destinations, RegistryConfig, SourceList, SourceUrls};
pub use error::RegistryError;
pub use store::StreamRegistry;
