//! Chat-completions wire format shared by the OpenAI-compatible vendors.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::ProviderError;
use crate::core::types::{
    Completion, CompletionOptions, CompletionRequest, Message, StreamChunk,
};
use crate::transport::http::{HttpTransport, RequestAuth};
use crate::transport::sse::{self, StreamEnd};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ChatRequestBody {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponseBody {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamBody {
    #[serde(default)]
    choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    #[serde(default)]
    delta: Option<ChatDelta>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One chat-completions endpoint with its credentials.
pub(crate) struct ChatEndpoint<'a> {
    pub provider: &'a str,
    pub transport: &'a HttpTransport,
    pub url: String,
    pub model: &'a str,
    pub max_tokens: Option<u32>,
    pub auth: RequestAuth,
}

impl ChatEndpoint<'_> {
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        let body = ChatRequestBody {
            model: self.model.to_string(),
            messages: request.to_messages(),
            max_tokens: self.max_tokens,
            stream: options.is_streaming(),
        };

        if body.stream {
            self.stream(&body, options).await
        } else {
            self.request(&body).await
        }
    }

    async fn request(&self, body: &ChatRequestBody) -> Result<Completion, ProviderError> {
        let response: ChatResponseBody = self
            .transport
            .post_json(
                self.provider,
                Some(self.model),
                &self.url,
                body,
                &self.auth,
            )
            .await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Protocol {
                provider: self.provider.to_string(),
                model: Some(self.model.to_string()),
                message: "response contained no choices".to_string(),
            })?;

        Ok(match choice.message.content {
            Some(content) if !content.is_empty() => Completion::Message(Message::assistant(content)),
            _ => Completion::Empty,
        })
    }

    /// Streams deltas to the callback. Once the connection is open the
    /// callback always receives a final [`StreamChunk::Done`], whatever ends
    /// the stream.
    async fn stream(
        &self,
        body: &ChatRequestBody,
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        let response = self
            .transport
            .post_stream(
                self.provider,
                Some(self.model),
                &self.url,
                body,
                &self.auth,
            )
            .await?;

        let outcome = sse::consume_events(
            self.provider,
            response.bytes_stream(),
            options,
            |data| {
                match serde_json::from_str::<ChatStreamBody>(data) {
                    Ok(chunk) => {
                        let content = chunk
                            .choices
                            .into_iter()
                            .filter_map(|choice| choice.delta.and_then(|delta| delta.content))
                            .collect::<String>();
                        if !content.is_empty() {
                            options.emit(StreamChunk::Delta(content));
                        }
                    }
                    Err(error) => {
                        warn!(provider = self.provider, error = %error, "unparseable stream chunk skipped");
                    }
                }
                Ok(())
            },
        )
        .await;

        options.emit(StreamChunk::Done);

        match outcome? {
            StreamEnd::Aborted => {
                warn!(provider = self.provider, "stream aborted by caller");
            }
            StreamEnd::Done | StreamEnd::Exhausted => {}
        }

        Ok(Completion::Streamed)
    }
}

#[cfg(test)]
mod tests;
