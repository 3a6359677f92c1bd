//! Publish: push a stream to an external destination and keep it there

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::Stream;
use crate::error::Result;
use crate::redact::redact;
use crate::scheme::Publication;

impl Stream {
    /// Push this stream to `destination`
    ///
    /// The first connection is made before returning so the caller sees its
    /// error. After that the returned task reconnects every
    /// `publish_retry` for as long as it runs.
    pub async fn publish(self: &Arc<Self>, destination: &str) -> Result<JoinHandle<()>> {
        let publication = self.connect_destination(destination).await?;

        let stream = Arc::clone(self);
        let destination = destination.to_string();
        let retry = self.options.publish_retry;

        Ok(tokio::spawn(async move {
            let mut publication = Some(publication);

            loop {
                if let Some(Publication { consumer, session }) = publication.take() {
                    session.await;
                    tracing::debug!(url = %redact(&destination), "Publish session ended");
                    stream.remove_consumer(&consumer).await;
                }

                tokio::time::sleep(retry).await;

                match stream.connect_destination(&destination).await {
                    Ok(next) => publication = Some(next),
                    Err(e) => {
                        tracing::warn!(url = %redact(&destination), error = %e, "Publish failed");
                    }
                }
            }
        }))
    }

    async fn connect_destination(&self, destination: &str) -> Result<Publication> {
        let publication = self.schemes.open_destination(destination).await?;

        if let Err(e) = self.add_consumer(Arc::clone(&publication.consumer)).await {
            if let Err(stop) = publication.consumer.stop().await {
                tracing::debug!(error = %stop, "Publish consumer stop failed");
            }
            return Err(e);
        }

        tracing::info!(url = %redact(destination), "Publish started");
        Ok(publication)
    }
}
