//! Play: push another source into the stream's producers
//!
//! Two ways to get there:
//! - a live producer connection that also accepts input (a two-way camera)
//!   takes the new source's tracks directly
//! - otherwise the producer's URL is dialed again as a push target and the
//!   new source is bridged into it until the source ends

use std::sync::Arc;

use super::{Stream, StreamProducer};
use crate::connection::{Consumer, Producer};
use crate::error::{Error, Result};
use crate::media::Direction;
use crate::redact::redact;

impl Stream {
    /// Play `source` into the stream; an empty source only stops playback
    pub async fn play(self: &Arc<Self>, source: &str) -> Result<()> {
        let producers = {
            let inner = self.inner.lock().await;
            for prod in &inner.producers {
                prod.stop_internal().await;
            }
            inner.producers.clone()
        };

        if source.is_empty() {
            return Ok(());
        }

        let mut src: Option<Arc<dyn Producer>> = None;

        // 1. existing connection accepting input
        for prod in &producers {
            if prod.is_internal().await {
                continue;
            }
            let Some(cons) = prod.connection().await.and_then(|conn| conn.as_consumer()) else {
                continue;
            };

            let src = self.open_source(source, &mut src).await?;
            if !match_media(&src, &cons) {
                continue;
            }

            tracing::debug!(source = %redact(source), "Play into live connection");
            self.add_internal_producer(Arc::clone(&src)).await;

            let stream = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = src.start().await {
                    tracing::debug!(error = %e, "Play source ended");
                }
                stream.remove_producer(&src).await;
            });

            return Ok(());
        }

        // 2. fresh connection to the producer's URL as push target
        for prod in &producers {
            let url = prod.url();
            if url.is_empty() {
                continue;
            }

            let dst = match self.schemes.open_producer(&url).await {
                Ok(dst) => dst,
                Err(e) => {
                    tracing::trace!(url = %redact(&url), error = %e, "Play target unavailable");
                    continue;
                }
            };

            let Some(cons) = Arc::clone(&dst).as_consumer() else {
                let _ = dst.stop().await;
                continue;
            };

            let src = match self.open_source(source, &mut src).await {
                Ok(src) => src,
                Err(e) => {
                    let _ = dst.stop().await;
                    return Err(e);
                }
            };

            if !match_media(&src, &cons) {
                let _ = dst.stop().await;
                continue;
            }

            tracing::debug!(source = %redact(source), target = %redact(&url), "Play through bridge");
            self.add_internal_producer(Arc::clone(&src)).await;
            self.inner.lock().await.consumers.push(Arc::clone(&cons));

            let stream = Arc::clone(self);
            let (bridge_src, bridge_dst) = (Arc::clone(&src), Arc::clone(&dst));
            tokio::spawn(async move {
                let _ = bridge_dst.start().await;
                let _ = bridge_src.stop().await;
                stream.detach_consumer(&cons).await;
            });

            let stream = Arc::clone(self);
            let drain = self.options.drain_timeout;
            tokio::spawn(async move {
                let _ = src.start().await;
                // let the target flush what it buffered
                tokio::time::sleep(drain).await;
                let _ = dst.stop().await;
                stream.remove_producer(&src).await;
            });

            return Ok(());
        }

        if let Some(src) = src {
            let _ = src.stop().await;
        }

        Err(Error::NoCompatiblePath)
    }

    /// Dial the Play source once, reusing it across candidates
    async fn open_source(
        &self,
        source: &str,
        slot: &mut Option<Arc<dyn Producer>>,
    ) -> Result<Arc<dyn Producer>> {
        if let Some(src) = slot {
            return Ok(Arc::clone(src));
        }
        let src = self.schemes.open_producer(source).await?;
        *slot = Some(Arc::clone(&src));
        Ok(src)
    }

    async fn add_internal_producer(&self, conn: Arc<dyn Producer>) {
        let prod = StreamProducer::internal(conn, Arc::clone(&self.schemes));
        self.inner.lock().await.producers.push(prod);
    }
}

/// Wire the first matching recvonly media of `prod` into `cons`
fn match_media(prod: &Arc<dyn Producer>, cons: &Arc<dyn Consumer>) -> bool {
    for cons_media in cons.medias() {
        for prod_media in prod.medias() {
            if prod_media.direction != Direction::Recvonly {
                continue;
            }

            let Some((prod_codec, cons_codec)) = prod_media.match_media(&cons_media) else {
                continue;
            };

            let Ok(track) = prod.get_track(&prod_media, &prod_codec) else {
                continue;
            };

            if cons.add_track(&cons_media, &cons_codec, &track).is_ok() {
                return true;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::media::codec::CODEC_PCMU;
    use crate::media::{Codec, Kind, Media};
    use crate::stream::{ProducerState, StreamOptions};
    use crate::testing::{h264, init_tracing, settle, speaker, wants, Dialer, FakeConsumer};

    fn announcement() -> Media {
        Media::new(Kind::Audio, Direction::Recvonly).codec(Codec::new(CODEC_PCMU).clock_rate(8000))
    }

    #[tokio::test]
    async fn test_empty_source_only_stops() {
        let dialer = Dialer::new();
        let stream = Arc::new(Stream::new(["fake:cam"], dialer.schemes("fake")));

        stream.play("").await.unwrap();
        assert_eq!(dialer.dials(), 0);
    }

    #[tokio::test]
    async fn test_play_into_live_connection() {
        let dialer = Dialer::new();
        dialer.offer("fake:doorbell", vec![h264(), speaker()]);
        dialer.offer("fake:chime.wav", vec![announcement()]);
        let stream = Arc::new(Stream::new(["fake:doorbell"], dialer.schemes("fake")));

        stream
            .add_consumer(FakeConsumer::new(wants("video")))
            .await
            .unwrap();

        stream.play("fake:chime.wav").await.unwrap();
        settle().await;

        let doorbell = dialer.last("fake:doorbell").unwrap();
        let chime = dialer.last("fake:chime.wav").unwrap();
        assert_eq!(doorbell.inputs(), 1);
        assert_eq!(chime.starts(), 1);

        let producers = stream.producers().await;
        assert_eq!(producers.len(), 2);
        assert_eq!(producers[1].state().await, ProducerState::Internal);

        // source ends: internal producer removed, camera untouched
        chime.disconnect();
        settle().await;
        assert_eq!(stream.producers().await.len(), 1);
        assert!(!doorbell.is_stopped());
    }

    #[tokio::test]
    async fn test_new_play_stops_previous() {
        let dialer = Dialer::new();
        dialer.offer("fake:doorbell", vec![h264(), speaker()]);
        dialer.offer("fake:a.wav", vec![announcement()]);
        let stream = Arc::new(Stream::new(["fake:doorbell"], dialer.schemes("fake")));
        stream
            .add_consumer(FakeConsumer::new(wants("video")))
            .await
            .unwrap();

        stream.play("fake:a.wav").await.unwrap();
        settle().await;
        let first = dialer.last("fake:a.wav").unwrap();

        stream.play("").await.unwrap();
        settle().await;

        assert!(first.is_stopped());
        assert_eq!(stream.producers().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_through_bridge() {
        init_tracing();
        let dialer = Dialer::new();
        dialer.offer("fake:doorbell", vec![h264(), speaker()]);
        dialer.offer("fake:chime.wav", vec![announcement()]);
        let options = StreamOptions {
            drain_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let stream = Arc::new(
            Stream::new(["fake:doorbell"], dialer.schemes("fake")).with_options(options),
        );

        // nobody watches: the camera is dialed fresh as push target
        stream.play("fake:chime.wav").await.unwrap();
        settle().await;

        let target = dialer.last("fake:doorbell").unwrap();
        let chime = dialer.last("fake:chime.wav").unwrap();
        assert_eq!(target.inputs(), 1);
        assert_eq!(target.starts(), 1);
        assert_eq!(stream.consumers().await.len(), 1);
        assert_eq!(stream.producers().await[0].state().await, ProducerState::None);

        chime.disconnect();
        settle().await;
        assert!(!target.is_stopped());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        settle().await;

        assert!(target.is_stopped());
        assert!(chime.is_stopped());
        assert!(stream.consumers().await.is_empty());
        assert_eq!(stream.producers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_no_compatible_path() {
        let dialer = Dialer::new();
        dialer.offer("fake:chime.wav", vec![announcement()]);
        let stream = Arc::new(Stream::new(["fake:cam"], dialer.schemes("fake")));

        // one-way camera cannot take audio
        let err = stream.play("fake:chime.wav").await.unwrap_err();
        assert!(matches!(err, Error::NoCompatiblePath));
        assert!(dialer.last("fake:cam").unwrap().is_stopped());
        assert_eq!(stream.producers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_play_unknown_source() {
        let dialer = Dialer::new();
        dialer.offer("fake:doorbell", vec![h264(), speaker()]);
        let stream = Arc::new(Stream::new(["fake:doorbell"], dialer.schemes("fake")));

        let err = stream.play("nope:file.wav").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme(_)));
        assert!(dialer.last("fake:doorbell").unwrap().is_stopped());
    }
}
