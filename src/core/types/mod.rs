use std::collections::BTreeMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::traits::FinishHook;

/// Sentinel fragment delivered to stream callbacks when a stream terminates.
pub const STREAM_DONE_MARKER: &str = "[DONE]";

/// Key type identifying one provider slot in a pool.
///
/// Callers usually supply a closed enum of their configured vendors; plain
/// `String` and `&'static str` keys work as well.
pub trait ProviderName: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> ProviderName for T where T: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    InputAudio { input_audio: InputAudio },
    PdfUrl { pdf_url: PdfUrl },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputAudio {
    pub data: String,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Part(ContentPart),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// True when the content carries no media and no text.
    pub fn is_empty(&self) -> bool {
        let text_only = self
            .parts()
            .iter()
            .all(|part| matches!(part, ContentPart::Text { .. }));
        text_only && self.text().is_empty()
    }

    pub fn parts(&self) -> Vec<&ContentPart> {
        match self {
            Self::Text(_) => Vec::new(),
            Self::Part(part) => vec![part],
            Self::Parts(parts) => parts.iter().collect(),
        }
    }

    /// Concatenated text segments, ignoring media parts.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            _ => self
                .parts()
                .into_iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }
}

/// One logical completion request: either a bare prompt or a full conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletionRequest {
    Text(String),
    Messages(Vec<Message>),
}

impl CompletionRequest {
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Self::Text(text) => vec![Message::user(text)],
            Self::Messages(messages) => messages,
        }
    }

    pub fn to_messages(&self) -> Vec<Message> {
        self.clone().into_messages()
    }

    pub fn has_input_audio(&self) -> bool {
        self.any_part(|part| matches!(part, ContentPart::InputAudio { .. }))
    }

    pub fn has_input_pdf(&self) -> bool {
        self.any_part(|part| matches!(part, ContentPart::PdfUrl { .. }))
    }

    /// URL of the first PDF reference in conversation order.
    pub fn first_pdf_url(&self) -> Option<&str> {
        let Self::Messages(messages) = self else {
            return None;
        };

        messages
            .iter()
            .flat_map(|message| message.content.parts())
            .find_map(|part| match part {
                ContentPart::PdfUrl { pdf_url } => Some(pdf_url.url.as_str()),
                _ => None,
            })
    }

    fn any_part(&self, predicate: impl Fn(&ContentPart) -> bool) -> bool {
        match self {
            Self::Text(_) => false,
            Self::Messages(messages) => messages
                .iter()
                .any(|message| message.content.parts().into_iter().any(&predicate)),
        }
    }
}

impl From<&str> for CompletionRequest {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CompletionRequest {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<Message>> for CompletionRequest {
    fn from(value: Vec<Message>) -> Self {
        Self::Messages(value)
    }
}

/// Outcome of a single provider attempt. Failures are carried by `Err`, never
/// encoded as content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Message(Message),
    /// Output was delivered through the stream callback.
    Streamed,
    Empty,
}

impl Completion {
    /// Whether this outcome ends a dispatch run.
    pub fn is_usable(&self, streaming: bool) -> bool {
        match self {
            Self::Message(message) => !message.content.is_empty(),
            Self::Streamed => streaming,
            Self::Empty => false,
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn into_message(self) -> Option<Message> {
        match self {
            Self::Message(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Delta(String),
    Done,
}

impl StreamChunk {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Delta(text) => text,
            Self::Done => STREAM_DONE_MARKER,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

pub type StreamCallback = Arc<dyn Fn(StreamChunk) + Send + Sync>;

/// Polled by streaming providers before each incoming network event.
pub type AbortPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct CompletionOptions {
    pub on_stream: Option<StreamCallback>,
    pub should_abort: Option<AbortPredicate>,
}

impl CompletionOptions {
    pub fn streaming(on_stream: StreamCallback) -> Self {
        Self {
            on_stream: Some(on_stream),
            should_abort: None,
        }
    }

    pub fn with_abort(mut self, should_abort: AbortPredicate) -> Self {
        self.should_abort = Some(should_abort);
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.on_stream.is_some()
    }

    pub fn abort_requested(&self) -> bool {
        self.should_abort
            .as_ref()
            .is_some_and(|should_abort| should_abort())
    }

    pub fn emit(&self, chunk: StreamChunk) {
        if let Some(on_stream) = &self.on_stream {
            on_stream(chunk);
        }
    }
}

impl Debug for CompletionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionOptions")
            .field("on_stream", &self.on_stream.is_some())
            .field("should_abort", &self.should_abort.is_some())
            .finish()
    }
}

/// Per-call hooks threaded from the manager through a strategy to providers.
pub struct DispatchHooks<N: ProviderName> {
    pub on_finish: Option<Arc<dyn FinishHook<N>>>,
    pub options: CompletionOptions,
}

impl<N: ProviderName> DispatchHooks<N> {
    pub fn new() -> Self {
        Self {
            on_finish: None,
            options: CompletionOptions::default(),
        }
    }

    pub fn with_finish(mut self, on_finish: Arc<dyn FinishHook<N>>) -> Self {
        self.on_finish = Some(on_finish);
        self
    }

    pub fn with_stream(mut self, on_stream: StreamCallback) -> Self {
        self.options.on_stream = Some(on_stream);
        self
    }

    pub fn with_abort(mut self, should_abort: AbortPredicate) -> Self {
        self.options.should_abort = Some(should_abort);
        self
    }
}

impl<N: ProviderName> Default for DispatchHooks<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: ProviderName> Clone for DispatchHooks<N> {
    fn clone(&self) -> Self {
        Self {
            on_finish: self.on_finish.clone(),
            options: self.options.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProviderStatus {
    pub is_available: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}
