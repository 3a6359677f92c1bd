//! Consumer negotiation
//!
//! Wires a new consumer into the stream: for every media the consumer
//! wants, producers are tried in order (dialing them as needed) until one
//! offers a matching codec. Failures are collected per producer so a
//! broken source does not hide a working one.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::{Stream, StreamProducer};
use crate::connection::{same_connection, Consumer};
use crate::error::{Error, Result};
use crate::media::{Direction, Kind, Media};

impl Stream {
    /// Match a consumer against the stream's producers and attach it
    ///
    /// Succeeds when at least one track was wired; wanted medias without a
    /// match are left out. Every matched producer is started.
    pub async fn add_consumer(&self, cons: Arc<dyn Consumer>) -> Result<()> {
        let cons_n = self.pending.fetch_add(1, Ordering::SeqCst);

        let producers = self.producers().await;
        let cons_medias = cons.medias();
        let cons_source = cons.source().filter(|source| !source.is_empty());

        let mut prod_errors: Vec<Option<Error>> = producers.iter().map(|_| None).collect();
        let mut prod_medias: Vec<Media> = Vec::new();
        let mut prod_starts: Vec<Arc<StreamProducer>> = Vec::new();

        for cons_media in &cons_medias {
            tracing::trace!(cons = cons_n, media = %cons_media, "Check consumer media");

            'producers: for (prod_n, prod) in producers.iter().enumerate() {
                // a stream sourced from itself, e.g. `camera1: ffmpeg:camera1`
                if cons_source.as_deref() == Some(prod.url().as_str()) {
                    tracing::trace!(cons = cons_n, prod = prod_n, "Skip loop request");
                    continue;
                }

                // two-way connections must not get their own audio back
                if cons_media.kind == Kind::Audio {
                    if let Some(conn) = prod.connection().await {
                        if same_connection(&conn, &cons) {
                            tracing::trace!(cons = cons_n, prod = prod_n, "Skip same connection");
                            continue;
                        }
                    }
                }

                if prod_errors[prod_n].is_some() {
                    tracing::trace!(cons = cons_n, prod = prod_n, "Skip failed producer");
                    continue;
                }

                if let Err(e) = prod.dial().await {
                    tracing::trace!(cons = cons_n, prod = prod_n, error = %e, "Dial failed");
                    prod_errors[prod_n] = Some(e);
                    continue;
                }

                for prod_media in prod.medias().await {
                    tracing::trace!(cons = cons_n, prod = prod_n, media = %prod_media, "Check producer media");
                    prod_medias.push(prod_media.clone());

                    let Some((prod_codec, cons_codec)) = prod_media.match_media(cons_media) else {
                        continue;
                    };

                    match prod_media.direction {
                        Direction::Recvonly => {
                            tracing::trace!(cons = cons_n, prod = prod_n, "Match cons <= prod");

                            let track = match prod.get_track(&prod_media, &prod_codec).await {
                                Ok(track) => track,
                                Err(e) => {
                                    tracing::info!(error = %e, "Can't get track");
                                    prod_errors[prod_n] = Some(e);
                                    continue;
                                }
                            };

                            if let Err(e) = cons.add_track(cons_media, &cons_codec, &track) {
                                tracing::info!(error = %e, "Can't add track");
                                continue;
                            }
                        }
                        Direction::Sendonly => {
                            tracing::trace!(cons = cons_n, prod = prod_n, "Match cons => prod");

                            let Some(mic) = Arc::clone(&cons).as_producer() else {
                                tracing::info!("Consumer has no backchannel");
                                continue;
                            };

                            let track = match mic.get_track(cons_media, &cons_codec) {
                                Ok(track) => track,
                                Err(e) => {
                                    tracing::info!(error = %e, "Can't get track");
                                    continue;
                                }
                            };

                            if let Err(e) = prod.add_track(&prod_media, &prod_codec, &track).await {
                                tracing::info!(error = %e, "Can't add track");
                                prod_errors[prod_n] = Some(e);
                                continue;
                            }
                        }
                        Direction::Sendrecv => continue,
                    }

                    prod_starts.push(Arc::clone(prod));

                    if !cons_media.match_all() {
                        break 'producers;
                    }
                }
            }
        }

        // reap producers dialed for nothing, unless others are still negotiating
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.stop_producers().await;

        if prod_starts.is_empty() {
            return Err(format_error(&cons_medias, &prod_medias, prod_errors));
        }

        self.inner.lock().await.consumers.push(cons);

        // duplicates are fine, start is idempotent
        for prod in prod_starts {
            prod.start().await;
        }

        Ok(())
    }
}

/// Compose the error of a failed negotiation
///
/// Producer failures win; otherwise the codec sets are reported side by
/// side when some producer media was seen.
pub(crate) fn format_error(
    cons_medias: &[Media],
    prod_medias: &[Media],
    prod_errors: Vec<Option<Error>>,
) -> Error {
    let mut messages: Vec<String> = Vec::new();
    for e in prod_errors.into_iter().flatten() {
        let message = e.to_string();
        if !messages.contains(&message) {
            messages.push(message);
        }
    }

    if !messages.is_empty() {
        return Error::Producers(messages);
    }

    if !prod_medias.is_empty() {
        return Error::CodecsNotMatched {
            producer: codec_list(prod_medias, Direction::Recvonly),
            consumer: codec_list(cons_medias, Direction::Sendonly),
        };
    }

    Error::Unknown
}

/// `kind:NAME` of every codec in medias with `direction`, de-duplicated
fn codec_list(medias: &[Media], direction: Direction) -> String {
    let mut items: Vec<String> = Vec::new();

    for media in medias.iter().filter(|media| media.direction == direction) {
        for codec in &media.codecs {
            let item = format!("{}:{}", media.kind, codec.print_name());
            if !items.contains(&item) {
                items.push(item);
            }
        }
    }

    items.join(", ")
}
