//! Scheme handler registry
//!
//! Maps URL schemes to the adapters that can open them:
//! - source handlers turn a URL into a [`Producer`] connection
//! - redirects turn a URL into another URL (resolved recursively)
//! - destination handlers turn a URL into a [`Publication`] for Publish
//!
//! Resolution checks redirects first, then source handlers; anything else
//! fails with [`Error::UnsupportedScheme`].

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::connection::{Consumer, Producer};
use crate::error::{Error, Result};
use crate::redact::redact;
use crate::registry::RegistryError;

/// Upper bound on chained redirects
const MAX_REDIRECTS: usize = 16;

/// Opens producer connections for a scheme
#[async_trait]
pub trait SourceHandler: Send + Sync {
    async fn open(&self, url: &str) -> Result<Arc<dyn Producer>>;
}

#[async_trait]
impl<F, Fut> SourceHandler for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Arc<dyn Producer>>> + Send,
{
    async fn open(&self, url: &str) -> Result<Arc<dyn Producer>> {
        (self)(url.to_string()).await
    }
}

/// Resolves a URL to another URL
///
/// `Ok(None)` means "no redirect", resolution continues with the source
/// handlers for the original URL.
#[async_trait]
pub trait RedirectHandler: Send + Sync {
    async fn location(&self, url: &str) -> Result<Option<String>>;
}

#[async_trait]
impl<F, Fut> RedirectHandler for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<String>>> + Send,
{
    async fn location(&self, url: &str) -> Result<Option<String>> {
        (self)(url.to_string()).await
    }
}

/// A push target opened for Publish
pub struct Publication {
    /// Consumer added to the published stream
    pub consumer: Arc<dyn Consumer>,
    /// Completes when the destination disconnects
    pub session: BoxFuture<'static, ()>,
}

/// Opens publish destinations for a scheme
#[async_trait]
pub trait DestinationHandler: Send + Sync {
    async fn open(&self, url: &str) -> Result<Publication>;
}

#[async_trait]
impl<F, Fut> DestinationHandler for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Publication>> + Send,
{
    async fn open(&self, url: &str) -> Result<Publication> {
        (self)(url.to_string()).await
    }
}

/// Registry of scheme handlers
#[derive(Default)]
pub struct SchemeRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn SourceHandler>>>,
    redirects: RwLock<HashMap<String, Arc<dyn RedirectHandler>>>,
    destinations: RwLock<HashMap<String, Arc<dyn DestinationHandler>>>,
    insecure: RwLock<HashSet<String>>,
}

/// Scheme part of a URL (`rtsp` for `rtsp://...`), if any
pub fn scheme_of(url: &str) -> Option<&str> {
    match url.find(':') {
        Some(i) if i > 0 => Some(&url[..i]),
        _ => None,
    }
}

impl SchemeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source handler
    pub fn register_handler(&self, scheme: &str, handler: impl SourceHandler + 'static) {
        self.handlers
            .write()
            .insert(scheme.to_string(), Arc::new(handler));
    }

    /// Register a redirect
    pub fn register_redirect(&self, scheme: &str, redirect: impl RedirectHandler + 'static) {
        self.redirects
            .write()
            .insert(scheme.to_string(), Arc::new(redirect));
    }

    /// Register a publish destination handler
    pub fn register_destination(&self, scheme: &str, handler: impl DestinationHandler + 'static) {
        self.destinations
            .write()
            .insert(scheme.to_string(), Arc::new(handler));
    }

    /// Forbid dynamically created sources with this scheme
    pub fn mark_insecure(&self, scheme: &str) {
        self.insecure.write().insert(scheme.to_string());
    }

    /// Whether some handler or redirect accepts the URL's scheme
    pub fn has_producer(&self, url: &str) -> bool {
        let Some(scheme) = scheme_of(url) else {
            tracing::warn!(url = %redact(url), "Invalid producer URL");
            return false;
        };

        if self.handlers.read().contains_key(scheme) || self.redirects.read().contains_key(scheme)
        {
            return true;
        }

        tracing::warn!(scheme = scheme, "Unknown producer scheme");
        false
    }

    /// Resolve one redirect step
    pub async fn location(&self, url: &str) -> Result<Option<String>> {
        let redirect = scheme_of(url).and_then(|scheme| self.redirects.read().get(scheme).cloned());

        match redirect {
            Some(redirect) => redirect.location(url).await,
            None => Ok(None),
        }
    }

    /// Open a producer connection, following redirects
    pub async fn open_producer(&self, url: &str) -> Result<Arc<dyn Producer>> {
        let mut url = url.to_string();

        for _ in 0..MAX_REDIRECTS {
            let Some(scheme) = scheme_of(&url) else {
                return Err(Error::UnsupportedScheme(redact(&url)));
            };

            let redirect = self.redirects.read().get(scheme).cloned();
            if let Some(redirect) = redirect {
                if let Some(location) = redirect.location(&url).await? {
                    tracing::trace!(from = %redact(&url), to = %redact(&location), "Redirect");
                    url = location;
                    continue;
                }
            }

            let handler = self.handlers.read().get(scheme).cloned();
            return match handler {
                Some(handler) => handler.open(&url).await,
                None => Err(Error::UnsupportedScheme(redact(&url))),
            };
        }

        Err(Error::TooManyRedirects(redact(&url)))
    }

    /// Open a publish destination
    pub async fn open_destination(&self, url: &str) -> Result<Publication> {
        let handler = scheme_of(url).and_then(|scheme| self.destinations.read().get(scheme).cloned());

        match handler {
            Some(handler) => handler.open(url).await,
            None => Err(Error::UnsupportedScheme(redact(url))),
        }
    }

    /// Sorted list of every scheme the router can open
    pub fn supported_schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self
            .handlers
            .read()
            .keys()
            .chain(self.redirects.read().keys())
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        schemes.sort();
        schemes
    }

    /// Check a source given by a remote caller
    ///
    /// Rejects whitespace (may smuggle extra arguments into pipelines) and
    /// schemes marked insecure.
    pub fn validate(&self, source: &str) -> std::result::Result<(), RegistryError> {
        if let Some(scheme) = scheme_of(source) {
            if self.insecure.read().contains(scheme) {
                return Err(RegistryError::InvalidSource {
                    url: redact(source),
                    reason: "source from insecure producer",
                });
            }
        }

        if source.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidSource {
                url: redact(source),
                reason: "source with spaces may be insecure",
            });
        }

        Ok(())
    }
}
