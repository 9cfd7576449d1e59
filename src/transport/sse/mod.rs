use std::fmt::Display;
use std::pin::pin;

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};

use crate::core::error::ProviderError;
use crate::core::types::{CompletionOptions, STREAM_DONE_MARKER};

/// How an event stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The server sent the `[DONE]` marker.
    Done,
    /// The connection closed without a marker.
    Exhausted,
    /// The abort predicate fired.
    Aborted,
}

/// Feeds every SSE `data` payload of `bytes` to `on_data` until the stream
/// ends, the server sends `[DONE]`, or `options.should_abort` returns true.
///
/// The abort predicate is polled before each incoming event. Returning early
/// drops the byte stream, which tears down the underlying connection.
pub async fn consume_events<S, B, E, F>(
    provider: &str,
    bytes: S,
    options: &CompletionOptions,
    mut on_data: F,
) -> Result<StreamEnd, ProviderError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    F: FnMut(&str) -> Result<(), ProviderError>,
{
    let mut events = pin!(bytes.eventsource());

    loop {
        if options.abort_requested() {
            return Ok(StreamEnd::Aborted);
        }

        let Some(event) = events.next().await else {
            return Ok(StreamEnd::Exhausted);
        };

        let event = event.map_err(|error| ProviderError::Transport {
            provider: provider.to_string(),
            message: format!("event stream error: {error}"),
        })?;

        let data = event.data.trim();
        if data.is_empty() {
            continue;
        }
        if data == STREAM_DONE_MARKER {
            return Ok(StreamEnd::Done);
        }

        on_data(data)?;
    }
}
