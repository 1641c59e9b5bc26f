//! The two long-running loops of a live connection.

use futures::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::ConsumerError;
use crate::message::{self, LogRecord};

/// Payload of every keepalive write.
pub const KEEPALIVE_FRAME: &[u8] = &[42];

/// Why the read pump returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// Teardown was triggered elsewhere (explicit close or keepalive failure).
    Cancelled,
    /// Close frame or end of stream.
    PeerClosed,
    TransportFailed,
    /// The records receiver was dropped.
    ConsumerGone,
}

/// Push an error without ever waiting on the consumer.
pub(crate) fn report(errors: &mpsc::Sender<ConsumerError>, err: ConsumerError) {
    match errors.try_send(err) {
        Ok(()) => {}
        Err(TrySendError::Full(err)) => {
            warn!(error = %err, "error channel full, dropping error");
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

/// Drain the transport until it ends or `cancel` fires.
///
/// Decode failures go to `errors` and the loop keeps going; transport failures
/// are reported once and end the loop.
pub(crate) async fn read_pump<S>(
    mut stream: S,
    records: &mpsc::Sender<LogRecord>,
    errors: &mpsc::Sender<ConsumerError>,
    cancel: &CancellationToken,
) -> ReadOutcome
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ReadOutcome::Cancelled,
            next = stream.next() => next,
        };

        let frame = match next {
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "peer closed the connection");
                return ReadOutcome::PeerClosed;
            }
            Some(Ok(_)) => continue,
            Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed))
            | None => {
                debug!("transport ended");
                return ReadOutcome::PeerClosed;
            }
            Some(Err(e)) => {
                warn!(error = %e, "transport read failed");
                report(errors, ConsumerError::Transport(e));
                return ReadOutcome::TransportFailed;
            }
        };

        match message::decode(&frame) {
            Ok(record) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return ReadOutcome::Cancelled,
                    sent = records.send(record) => {
                        if sent.is_err() {
                            debug!("records receiver dropped");
                            return ReadOutcome::ConsumerGone;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, len = frame.len(), "failed to decode frame");
                report(errors, ConsumerError::Decode(e));
            }
        }
    }
}

/// Write a keepalive frame every `period` until `cancel` fires.
///
/// Hands the sink back on cancellation so the caller decides whether a close
/// frame is still appropriate. The first write happens one period after start.
pub(crate) async fn keepalive_pump<S>(
    mut sink: S,
    period: Duration,
    cancel: CancellationToken,
) -> Result<S, tungstenite::Error>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                trace!("sending keepalive");
                // A peer that stops reading can leave the write pending forever.
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = sink.send(Message::Binary(KEEPALIVE_FRAME.to_vec())) => sent?,
                }
            }
        }
    }

    Ok(sink)
}
