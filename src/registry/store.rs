//! Stream registry implementation
//!
//! The central registry mapping stream names to streams. Several names may
//! point at the same stream (aliases created by `patch`).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::config::RegistryConfig;
use super::error::RegistryError;
use crate::error::Error;
use crate::redact::redact;
use crate::scheme::SchemeRegistry;
use crate::stream::{Preload, Stream, StreamOptions};

struct PreloadEntry {
    stream: Arc<Stream>,
    preload: Arc<Preload>,
}

/// Central registry for all streams
///
/// Thread-safe via `RwLock`. Lookups from viewer requests take the read
/// side; create, patch and delete take the write side.
pub struct StreamRegistry {
    /// Map of stream name to stream
    streams: RwLock<HashMap<String, Arc<Stream>>>,

    /// Map of stream name to its standing preload consumer
    preloads: Mutex<HashMap<String, PreloadEntry>>,

    schemes: Arc<SchemeRegistry>,

    /// Configuration
    config: RegistryConfig,
}

impl StreamRegistry {
    /// Create an empty registry with default configuration
    pub fn new(schemes: Arc<SchemeRegistry>) -> Self {
        Self::with_config(schemes, RegistryConfig::default())
    }

    /// Create a registry holding the configured streams
    ///
    /// Configured sources are trusted and not validated.
    pub fn with_config(schemes: Arc<SchemeRegistry>, config: RegistryConfig) -> Self {
        let options = StreamOptions::from(&config);

        let streams = config
            .streams
            .iter()
            .map(|(name, sources)| {
                let stream =
                    Stream::new(sources.urls(), Arc::clone(&schemes)).with_options(options);
                (name.clone(), Arc::new(stream))
            })
            .collect();

        Self {
            streams: RwLock::new(streams),
            preloads: Mutex::new(HashMap::new()),
            schemes,
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn schemes(&self) -> &Arc<SchemeRegistry> {
        &self.schemes
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Stream>> {
        self.streams.read().await.get(name).cloned()
    }

    /// Create (or replace) a stream from sources given by a remote caller
    pub async fn create<I, S>(&self, name: &str, sources: I) -> Result<Arc<Stream>, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sources: Vec<String> = sources.into_iter().map(|s| s.as_ref().to_string()).collect();
        for source in &sources {
            self.schemes.validate(source)?;
        }

        let stream = Arc::new(self.new_stream(&sources));
        self.streams
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&stream));

        tracing::info!(stream = %name, sources = sources.len(), "Stream created");
        Ok(stream)
    }

    /// Create, update or alias a stream
    ///
    /// A source naming an existing stream, directly or as the path of an
    /// `rtsp://` URL, makes `name` an alias of that stream. Otherwise the
    /// sources must have a known scheme; an existing stream under `name`
    /// takes them over, or a new one is created. No sources at all replace
    /// `name` with an empty stream; other aliases keep the old one.
    pub async fn patch<I, S>(&self, name: &str, sources: I) -> Result<Arc<Stream>, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sources: Vec<String> = sources.into_iter().map(|s| s.as_ref().to_string()).collect();
        let mut streams = self.streams.write().await;

        for source in &sources {
            let linked = stream_link(source)
                .and_then(|link| streams.get(link))
                .or_else(|| streams.get(source.as_str()))
                .cloned();

            if let Some(stream) = linked {
                streams.insert(name.to_string(), Arc::clone(&stream));
                tracing::info!(stream = %name, source = %redact(source), "Stream alias");
                return Ok(stream);
            }

            self.schemes.validate(source)?;
            if !self.schemes.has_producer(source) {
                return Err(RegistryError::InvalidSource {
                    url: redact(source),
                    reason: "unsupported scheme",
                });
            }
        }

        if let Some(stream) = streams.get(name).cloned().filter(|_| !sources.is_empty()) {
            match sources.as_slice() {
                [source] => stream.set_source(source).await,
                _ => stream.set_sources(&sources).await,
            }
            tracing::info!(stream = %name, sources = sources.len(), "Stream patched");
            return Ok(stream);
        }

        let stream = Arc::new(self.new_stream(&sources));
        streams.insert(name.to_string(), Arc::clone(&stream));

        tracing::info!(stream = %name, sources = sources.len(), "Stream created");
        Ok(stream)
    }

    /// Remove a name; the stream lives on under its other aliases
    pub async fn delete(&self, name: &str) -> Option<Arc<Stream>> {
        let removed = self.streams.write().await.remove(name);
        if removed.is_some() {
            tracing::info!(stream = %name, "Stream deleted");
        }
        removed
    }

    /// Sorted stream names
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.streams.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of the name to stream map
    pub async fn streams(&self) -> HashMap<String, Arc<Stream>> {
        self.streams.read().await.clone()
    }

    /// Get total number of names
    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Every stream having `source` among its sources
    pub async fn from_source(&self, source: &str) -> Vec<Arc<Stream>> {
        let mut found = Vec::new();
        for (_, stream) in sorted(self.streams().await) {
            if stream.sources().await.iter().any(|s| s == source) {
                found.push(stream);
            }
        }
        found
    }

    /// Stream named `src`, else `src` patched in under `name` (or `src`)
    pub async fn get_or_patch(
        &self,
        src: &str,
        name: Option<&str>,
    ) -> Result<Arc<Stream>, RegistryError> {
        if src.is_empty() {
            return Err(RegistryError::StreamNotFound(String::new()));
        }

        if let Some(stream) = self.get(src).await {
            return Ok(stream);
        }

        match name.filter(|name| !name.is_empty()) {
            Some(name) => {
                tracing::info!(stream = %name, url = %redact(src), "Create new stream");
                self.patch(name, [src]).await
            }
            None => self.patch(src, [src]).await,
        }
    }

    /// JSON of every stream keyed by name
    pub async fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, stream) in sorted(self.streams().await) {
            let value = serde_json::to_value(&*stream).unwrap_or(Value::Null);
            map.insert(name, value);
        }
        Value::Object(map)
    }

    /// Graphviz graph of the named streams, or of all streams when empty
    pub async fn dot(&self, names: &[&str]) -> String {
        let streams = self.streams().await;

        let selected: Vec<Arc<Stream>> = if names.is_empty() {
            sorted(streams).into_iter().map(|(_, stream)| stream).collect()
        } else {
            names
                .iter()
                .filter_map(|name| streams.get(*name).cloned())
                .collect()
        };

        let mut dot = String::from("digraph {\n");
        for stream in selected {
            stream.append_dot(&mut dot).await;
        }
        dot.push('}');
        dot
    }

    /// Keep the producers of stream `name` warm
    ///
    /// An empty query asks for any video and any audio. Adding a preload
    /// for a name that already has one replaces it.
    pub async fn add_preload(&self, name: &str, query: &str) -> Result<(), Error> {
        let stream = self
            .get(name)
            .await
            .ok_or_else(|| RegistryError::StreamNotFound(name.to_string()))?;

        let mut preloads = self.preloads.lock().await;

        // attach the new one first so a shared producer stays connected
        let preload = Preload::new(query);
        stream.add_consumer(Arc::clone(&preload) as Arc<dyn crate::connection::Consumer>).await?;
        tracing::info!(stream = %name, query = %preload.query(), "Preload added");

        let previous = preloads.insert(name.to_string(), PreloadEntry { stream, preload });
        if let Some(old) = previous {
            old.stream.remove_consumer(&old.preload).await;
        }

        Ok(())
    }

    pub async fn del_preload(&self, name: &str) -> Result<(), RegistryError> {
        let entry = self
            .preloads
            .lock()
            .await
            .remove(name)
            .ok_or_else(|| RegistryError::PreloadNotFound(name.to_string()))?;

        entry.stream.remove_consumer(&entry.preload).await;

        tracing::info!(stream = %name, "Preload removed");
        Ok(())
    }

    /// Stream name to preload query
    pub async fn preloads(&self) -> BTreeMap<String, String> {
        self.preloads
            .lock()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.preload.query().to_string()))
            .collect()
    }

    /// Add the configured preloads, logging the ones that fail
    pub async fn start_preloads(&self) {
        for (name, query) in &self.config.preload {
            let query = query.as_deref().unwrap_or_default();
            if let Err(e) = self.add_preload(name, query).await {
                tracing::warn!(stream = %name, error = %e, "Preload failed");
            }
        }
    }

    /// Spawn the configured publishes after `publish_delay`
    ///
    /// Destinations that refuse the first connection are retried every
    /// `publish_retry` until one succeeds; from then on the stream's
    /// publish task keeps reconnecting.
    pub fn start_publishing(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let delay = registry.config.publish_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            for (name, destinations) in &registry.config.publish {
                let Some(stream) = registry.get(name).await else {
                    tracing::warn!(stream = %name, "Publish of unknown stream");
                    continue;
                };

                for destination in destinations.urls() {
                    tokio::spawn(publish_forever(Arc::clone(&stream), destination));
                }
            }
        })
    }

    fn new_stream(&self, sources: &[String]) -> Stream {
        Stream::new(sources, Arc::clone(&self.schemes))
            .with_options(StreamOptions::from(&self.config))
    }
}

async fn publish_forever(stream: Arc<Stream>, destination: String) {
    let retry = stream.options().publish_retry;

    loop {
        match stream.publish(&destination).await {
            Ok(_task) => return,
            Err(e) => {
                tracing::warn!(url = %redact(&destination), error = %e, "Publish failed");
                tokio::time::sleep(retry).await;
            }
        }
    }
}

/// Stream name targeted by an `rtsp://host/<name>` loopback URL
fn stream_link(source: &str) -> Option<&str> {
    if !source.starts_with("rtsp://") {
        return None;
    }

    let rest = &source["rtsp://".len()..];
    let path = &rest[rest.find('/')?..];
    let path = path.split(['?', '#']).next().unwrap_or_default();

    path.get(1..).filter(|name| !name.is_empty())
}

fn sorted(streams: HashMap<String, Arc<Stream>>) -> Vec<(String, Arc<Stream>)> {
    let mut streams: Vec<_> = streams.into_iter().collect();
    streams.sort_by(|a, b| a.0.cmp(&b.0));
    streams
}
