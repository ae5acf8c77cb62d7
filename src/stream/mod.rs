use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures_util::{Stream, StreamExt};
use reqwest::Response;
use reqwest::header::HeaderName;
use tokio_util::sync::CancellationToken;

use crate::core::error::ProviderError;
use crate::core::traits::{CompletionStream, StreamCloser};
use crate::core::types::{
    CHAT_COMPLETION_CHUNK_OBJECT, CHAT_COMPLETION_OBJECT, ChatCompletionChunk,
    ChatCompletionResponse, ProviderId,
};
use crate::normalize::ErrorNormalizer;
use crate::transport::http::extract_request_id;

const DONE_SENTINEL: &str = "[DONE]";
const REQUEST_ID_HEADER: &str = "x-request-id";

type EventStream =
    Pin<Box<dyn Stream<Item = Result<Event, EventStreamError<reqwest::Error>>> + Send>>;

/// Lifecycle of a [`ChatStream`]. The current variant is the only record of
/// where the stream stands.
enum StreamState {
    /// Response headers received; status not inspected yet.
    Unchecked(Response),
    Streaming(EventStream),
    Done,
    Failed,
    Closed,
}

/// Outcome of one guarded read.
enum Read<T> {
    Ready(T),
    Cancelled,
}

/// Pull adapter over an OpenAI-compatible chat response, SSE or buffered.
pub struct ChatStream {
    provider: ProviderId,
    model: Option<String>,
    streaming: bool,
    request_id: Option<String>,
    state: StreamState,
    normalizer: ErrorNormalizer,
    response: Option<ChatCompletionResponse>,
    error: Option<ProviderError>,
    cancellation: CancellationToken,
}

impl ChatStream {
    pub fn new(
        provider: ProviderId,
        model: Option<String>,
        response: Response,
        streaming: bool,
        normalizer: ErrorNormalizer,
        cancellation: CancellationToken,
    ) -> Self {
        let request_id =
            extract_request_id(response.headers(), &HeaderName::from_static(REQUEST_ID_HEADER));

        Self {
            provider,
            model,
            streaming,
            request_id,
            state: StreamState::Unchecked(response),
            normalizer,
            response: None,
            error: None,
            cancellation,
        }
    }

    /// Records the terminal error and parks the stream in `Failed`.
    fn fail(&mut self, error: ProviderError) -> ProviderError {
        self.state = StreamState::Failed;
        self.error = Some(error.clone());
        error
    }

    fn cancelled(&mut self) -> ProviderError {
        self.fail(ProviderError::Cancelled {
            provider: self.provider.clone(),
        })
    }

    async fn read_upstream_error(&mut self, response: Response) -> ProviderError {
        let status_code = response.status().as_u16();
        tracing::warn!(
            provider = %self.provider,
            model = ?self.model,
            status_code,
            "upstream chat request failed"
        );

        let body = match guarded(self.cancellation.clone(), response.bytes()).await {
            Read::Ready(body) => body.map(|bytes| bytes.to_vec()).unwrap_or_default(),
            Read::Cancelled => return self.cancelled(),
        };

        let error = ProviderError::Upstream {
            provider: self.provider.clone(),
            model: self.model.clone(),
            request_id: self.request_id.clone(),
            error: self.normalizer.normalize(status_code, &body),
        };
        self.fail(error)
    }

    async fn read_buffered(&mut self, response: Response) -> Result<(), ProviderError> {
        let body = match guarded(self.cancellation.clone(), response.bytes()).await {
            Read::Ready(Ok(body)) => body,
            Read::Ready(Err(error)) => {
                let error = ProviderError::Transport {
                    provider: self.provider.clone(),
                    request_id: self.request_id.clone(),
                    message: error.to_string(),
                };
                return Err(self.fail(error));
            }
            Read::Cancelled => return Err(self.cancelled()),
        };

        match serde_json::from_slice::<ChatCompletionResponse>(&body) {
            Ok(mut response) => {
                normalize_response(&mut response);
                self.response = Some(response);
                self.state = StreamState::Done;
                Ok(())
            }
            Err(error) => {
                let error = ProviderError::Decode {
                    provider: self.provider.clone(),
                    model: self.model.clone(),
                    request_id: self.request_id.clone(),
                    message: error.to_string(),
                };
                Err(self.fail(error))
            }
        }
    }
}

#[async_trait]
impl CompletionStream for ChatStream {
    async fn next(&mut self) -> Result<Option<ChatCompletionChunk>, ProviderError> {
        loop {
            match std::mem::replace(&mut self.state, StreamState::Done) {
                StreamState::Unchecked(response) => {
                    if !response.status().is_success() {
                        return Err(self.read_upstream_error(response).await);
                    }

                    if !self.streaming {
                        self.read_buffered(response).await?;
                        return Ok(None);
                    }

                    self.state = StreamState::Streaming(Box::pin(
                        response.bytes_stream().eventsource(),
                    ));
                }
                StreamState::Streaming(mut events) => {
                    let next = match guarded(self.cancellation.clone(), events.next()).await {
                        Read::Ready(next) => next,
                        Read::Cancelled => return Err(self.cancelled()),
                    };

                    match next {
                        None => return Ok(None),
                        Some(Err(error)) => {
                            let error = ProviderError::Transport {
                                provider: self.provider.clone(),
                                request_id: self.request_id.clone(),
                                message: error.to_string(),
                            };
                            return Err(self.fail(error));
                        }
                        Some(Ok(event)) => {
                            self.state = StreamState::Streaming(events);
                            if let Some(chunk) = decode_event(&self.provider, &event) {
                                return Ok(Some(chunk));
                            }
                        }
                    }
                }
                state @ (StreamState::Done | StreamState::Failed | StreamState::Closed) => {
                    self.state = state;
                    return Ok(None);
                }
            }
        }
    }

    fn response(&self) -> Option<&ChatCompletionResponse> {
        self.response.as_ref()
    }

    fn err(&self) -> Option<&ProviderError> {
        self.error.as_ref()
    }

    fn close(&mut self) {
        self.cancellation.cancel();
        if matches!(
            self.state,
            StreamState::Unchecked(_) | StreamState::Streaming(_)
        ) {
            self.state = StreamState::Closed;
        }
    }

    fn closer(&self) -> StreamCloser {
        StreamCloser::new(self.cancellation.clone())
    }
}

async fn guarded<F>(cancellation: CancellationToken, future: F) -> Read<F::Output>
where
    F: std::future::Future,
{
    tokio::select! {
        biased;
        () = cancellation.cancelled() => Read::Cancelled,
        output = future => Read::Ready(output),
    }
}

/// Empty frames, the `[DONE]` sentinel and undecodable frames yield `None`.
fn decode_event(provider: &ProviderId, event: &Event) -> Option<ChatCompletionChunk> {
    let data = event.data.trim();
    if data.is_empty() || data == DONE_SENTINEL {
        return None;
    }

    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(mut chunk) => {
            normalize_chunk(&mut chunk);
            Some(chunk)
        }
        Err(error) => {
            tracing::debug!(
                provider = %provider,
                error = %error,
                "skipping malformed stream event"
            );
            None
        }
    }
}

pub fn normalize_chunk(chunk: &mut ChatCompletionChunk) {
    if chunk.object.is_empty() {
        chunk.object = CHAT_COMPLETION_CHUNK_OBJECT.to_string();
    }
    if chunk.created == 0 {
        chunk.created = unix_now();
    }
    if let Some(usage) = chunk.usage.as_mut() {
        usage.total_tokens = usage.derived_total_tokens();
    }
}

pub fn normalize_response(response: &mut ChatCompletionResponse) {
    if response.object.is_empty() {
        response.object = CHAT_COMPLETION_OBJECT.to_string();
    }
    if response.created == 0 {
        response.created = unix_now();
    }
    if let Some(usage) = response.usage.as_mut() {
        usage.total_tokens = usage.derived_total_tokens();
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(1)
        .max(1)
}
