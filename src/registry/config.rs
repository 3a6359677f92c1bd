//! Registry configuration
//!
//! Mirrors the `streams` / `publish` / `preload` sections of the router
//! config file. Loading the file is left to the caller; anything that
//! deserializes through serde works.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

/// Sources of one stream as written in the config
///
/// Accepts a single URL, a list of URLs, an object with a `url` field, or
/// nothing at all (a stream waiting for an external producer).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SourceList {
    #[default]
    Empty,
    One(String),
    Many(Vec<String>),
    Object { url: SourceUrls },
}

/// `url` field of the object form
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SourceUrls {
    One(String),
    Many(Vec<String>),
}

impl SourceList {
    /// Flatten into a list of URLs, dropping empty entries
    pub fn urls(&self) -> Vec<String> {
        let urls: Vec<String> = match self {
            SourceList::Empty => Vec::new(),
            SourceList::One(url) | SourceList::Object { url: SourceUrls::One(url) } => {
                vec![url.clone()]
            }
            SourceList::Many(urls) | SourceList::Object { url: SourceUrls::Many(urls) } => {
                urls.clone()
            }
        };
        urls.into_iter().filter(|url| !url.is_empty()).collect()
    }
}

/// Publish destinations of one stream
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Destinations {
    One(String),
    Many(Vec<String>),
}

impl Destinations {
    pub fn urls(&self) -> Vec<String> {
        match self {
            Destinations::One(url) => vec![url.clone()],
            Destinations::Many(urls) => urls.clone(),
        }
    }
}

/// Stream registry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Stream name to sources
    pub streams: BTreeMap<String, SourceList>,

    /// Stream name to publish destinations
    pub publish: BTreeMap<String, Destinations>,

    /// Stream name to preload query (`video&audio` when empty)
    pub preload: BTreeMap<String, Option<String>>,

    /// Interval between publish reconnect attempts
    #[serde(skip)]
    pub publish_retry: Duration,

    /// Delay before configured publishes start
    #[serde(skip)]
    pub publish_delay: Duration,

    /// How long a Play bridge keeps the destination open after the source ends
    #[serde(skip)]
    pub drain_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            streams: BTreeMap::new(),
            publish: BTreeMap::new(),
            preload: BTreeMap::new(),
            publish_retry: Duration::from_secs(5),
            publish_delay: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(1),
        }
    }
}

impl RegistryConfig {
    /// Add a stream with a single source
    pub fn stream(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.streams
            .insert(name.into(), SourceList::One(source.into()));
        self
    }

    /// Set publish retry interval
    pub fn publish_retry(mut self, interval: Duration) -> Self {
        self.publish_retry = interval;
        self
    }

    /// Set delay before configured publishes start
    pub fn publish_delay(mut self, delay: Duration) -> Self {
        self.publish_delay = delay;
        self
    }

    /// Set Play bridge drain timeout
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}
