//! Event-stream handles and the reconnecting consume loop.

use crate::error::{Error, Result};
use crate::events::EventEnvelope;
use crate::model::Source;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A live, one-way sequence of event notifications.
pub type EventStream = BoxStream<'static, Result<EventEnvelope>>;

/// Opens event streams for one upstream origin.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Human-readable origin, used in logs.
    fn origin(&self) -> String;

    async fn open(&self) -> Result<EventStream>;
}

/// Builds the event source for a sandbox's session service.
pub trait SourceConnector: Send + Sync {
    fn connect(&self, source: &Source) -> Arc<dyn EventSource>;
}

/// Consume `source` until `token` is cancelled, reopening it after
/// `reconnect_delay` whenever opening fails or the stream ends.
///
/// The token is checked before every reopen and while waiting for events,
/// so a cancelled loop never reconnects.
pub async fn consume_with_retry<E, F>(
    source: &E,
    reconnect_delay: Duration,
    token: CancellationToken,
    mut on_event: F,
) where
    E: EventSource + ?Sized,
    F: FnMut(EventEnvelope) + Send,
{
    let origin = source.origin();

    loop {
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            opened = source.open() => opened,
        };

        match opened {
            Ok(mut stream) => {
                info!(source = %origin, "event stream connected");
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            debug!(source = %origin, "event stream cancelled");
                            return;
                        }
                        next = stream.next() => next,
                    };
                    match next {
                        Some(Ok(event)) => on_event(event),
                        Some(Err(e)) => {
                            warn!(source = %origin, error = %e, "event stream failed");
                            break;
                        }
                        None => {
                            let e = Error::StreamEnded { origin: origin.clone() };
                            warn!(source = %origin, error = %e, "event stream closed");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(source = %origin, error = %e, "failed to open event stream");
            }
        }

        if token.is_cancelled() {
            break;
        }
        debug!(source = %origin, delay_ms = reconnect_delay.as_millis() as u64, "scheduling reconnect");
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }

    debug!(source = %origin, "event stream cancelled");
}
