//! Size-bounded buffering of an inbound byte stream.
//!
//! At most `limit + 1` bytes are ever retained: the extra byte is the probe
//! that tells "exactly `limit`" apart from "more than `limit`". Once the probe
//! byte arrives the stream is dropped without being drained.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LimitError {
    #[error("stream exceeded the limit of {limit} bytes")]
    Overflow { limit: u64 },

    #[error("failed to read stream: {0}")]
    Io(String),

    #[error("stream read was cancelled")]
    Cancelled,
}

/// Buffer `stream` completely if it holds at most `limit` bytes.
pub async fn read_limited<S, E>(
    stream: S,
    limit: u64,
    cancel: &CancellationToken,
) -> Result<Bytes, LimitError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    futures::pin_mut!(stream);

    let ceiling = limit.saturating_add(1);
    let mut buf = BytesMut::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LimitError::Cancelled),
            next = stream.next() => next,
        };

        let chunk = match next {
            None => break,
            Some(Err(e)) => return Err(LimitError::Io(e.to_string())),
            Some(Ok(chunk)) => chunk,
        };

        let room = ceiling - buf.len() as u64;
        let take = (chunk.len() as u64).min(room) as usize;
        buf.extend_from_slice(&chunk[..take]);

        if buf.len() as u64 > limit {
            debug!(limit = limit, "Stream limit exceeded, abandoning read");
            return Err(LimitError::Overflow { limit });
        }
    }

    Ok(buf.freeze())
}
