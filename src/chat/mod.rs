//! Chat operations: history CRUD and the streaming completion call.
//!
//! Every operation resolves the session first through
//! [`SessionManager::require_auth`], so nothing here runs on a dead
//! session; an expired access token is refreshed transparently before
//! the real request goes out.

pub mod recent;
pub mod sse;

use crate::api::ApiClient;
use crate::auth::SessionManager;
use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use sse::{SseParser, StreamSignal};
use std::collections::VecDeque;
use std::pin::Pin;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

// ── Wire types ────────────────────────────────────────────────────

/// One row of the chat list, as `/chats` returns it (newest first).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatSummary {
    pub chat_id: String,
    pub name: String,
    #[serde(default)]
    pub message_count: Option<u32>,
    /// Absent or null on the wire becomes the empty string; the recent
    /// cache treats that as a missing required field.
    #[serde(default, deserialize_with = "nullable_string")]
    pub updated_at: String,
    #[serde(default)]
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatDetail {
    pub chat_id: String,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    #[serde(rename = "isUser")]
    pub is_user: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedChat {
    pub chat_id: String,
    pub name: String,
}

/// An attached file sent inline with a prompt.
#[derive(Debug, Clone, Serialize)]
pub struct ContextFile {
    pub name: String,
    pub content: String,
}

/// Reference to a document collection the server should search.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionRef {
    pub id: String,
    pub name: String,
}

/// Optional context attached to a generation request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<ContextFile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<CollectionRef>,
}

fn nullable_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Serialize)]
struct StreamRequest<'a> {
    chat_id: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<&'a [ContextFile]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    collection: Option<&'a CollectionRef>,
}

#[derive(Debug, Serialize)]
struct CreateChatRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct RenameChatRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatsListResponse {
    chats: Vec<ChatSummary>,
}

#[derive(Debug, Deserialize)]
struct RenameChatResponse {
    chat: ChatSummary,
}

// ── Client ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChatClient {
    api: ApiClient,
    session: SessionManager,
}

impl ChatClient {
    pub fn new(api: ApiClient, session: SessionManager) -> Self {
        Self { api, session }
    }

    pub async fn create_chat(&self, name: Option<&str>) -> Result<CreatedChat> {
        self.session.require_auth().await?;
        match name {
            Some(name) => {
                self.api
                    .post_json("/create_chat", Some(&CreateChatRequest { name }))
                    .await
            }
            None => self.api.post_json::<_, ()>("/create_chat", None).await,
        }
    }

    pub async fn fetch_chats(&self) -> Result<Vec<ChatSummary>> {
        self.session.require_auth().await?;
        let response: ChatsListResponse = self.api.get_json("/chats", true).await?;
        Ok(response.chats)
    }

    pub async fn fetch_chat(&self, chat_id: &str) -> Result<ChatDetail> {
        self.session.require_auth().await?;
        self.api.get_json(&format!("/chats/{chat_id}"), true).await
    }

    pub async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        self.session.require_auth().await?;
        self.api.delete(&format!("/chats/{chat_id}")).await
    }

    pub async fn rename_chat(&self, chat_id: &str, name: &str) -> Result<ChatSummary> {
        self.session.require_auth().await?;
        let response: RenameChatResponse = self
            .api
            .put_json(&format!("/chats/{chat_id}"), &RenameChatRequest { name })
            .await?;
        Ok(response.chat)
    }

    /// The server has no search endpoint; filter the fetched list by
    /// name or preview, case-insensitively.
    pub async fn search_chats(&self, query: &str) -> Result<Vec<ChatSummary>> {
        let chats = self.fetch_chats().await?;
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Ok(chats);
        }
        Ok(chats
            .into_iter()
            .filter(|chat| {
                chat.name.to_lowercase().contains(&query)
                    || chat
                        .preview
                        .as_deref()
                        .is_some_and(|preview| preview.to_lowercase().contains(&query))
            })
            .collect())
    }

    /// Open a generation stream for `chat_id`.
    ///
    /// Resolves the session first and fails `Unauthenticated` rather than
    /// ever sending the prompt on a dead session. The returned
    /// [`ChatStream`] is a finite lazy sequence of [`StreamSignal`]s;
    /// abort it any time through [`ChatStream::cancel_handle`].
    pub async fn open_stream(
        &self,
        chat_id: &str,
        prompt: &str,
        context: Option<ChatContext>,
    ) -> Result<ChatStream> {
        self.session.require_auth().await?;
        let context = context.unwrap_or_default();
        let request = StreamRequest {
            chat_id,
            prompt,
            files: context.files.as_deref(),
            collection: context.collection.as_ref(),
        };
        let response = self.api.post_stream("/generate_stream", &request).await?;
        Ok(ChatStream::new(response))
    }

    /// Callback-style wrapper over [`open_stream`](Self::open_stream).
    ///
    /// `on_chunk` fires per content token in arrival order. `on_complete`
    /// and `on_error` are mutually exclusive and each fires at most once:
    /// the first upstream or transport error claims `on_error` and
    /// suppresses `on_complete`, though remaining tokens still reach
    /// `on_chunk`. Transport failures are additionally returned as `Err`.
    /// Cancelling through `cancel` stops consumption without invoking
    /// either terminal callback.
    pub async fn generate_stream_response<FC, FD, FE>(
        &self,
        chat_id: &str,
        user_message: &str,
        mut on_chunk: FC,
        on_complete: FD,
        on_error: FE,
        context: Option<ChatContext>,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        FC: FnMut(&str),
        FD: FnOnce(),
        FE: FnOnce(&ClientError),
    {
        let mut on_complete = Some(on_complete);
        let mut on_error = Some(on_error);

        let mut stream = match self.open_stream(chat_id, user_message, context).await {
            Ok(stream) => stream.with_cancel(cancel),
            Err(err) => {
                if !matches!(err, ClientError::Unauthenticated) {
                    if let Some(cb) = on_error.take() {
                        cb(&err);
                    }
                }
                return Err(err);
            }
        };

        while let Some(signal) = stream.next().await {
            match signal {
                StreamSignal::Delta(text) => on_chunk(&text),
                StreamSignal::Error(message) => {
                    if let Some(cb) = on_error.take() {
                        cb(&ClientError::Upstream(message));
                    }
                }
                StreamSignal::Done => {
                    // Suppressed when an error already claimed the call.
                    if on_error.is_some() {
                        if let Some(cb) = on_complete.take() {
                            cb();
                        }
                    }
                    return Ok(());
                }
            }
        }

        if let Some(err) = stream.take_failure() {
            if let Some(cb) = on_error.take() {
                cb(&err);
            }
            return Err(err);
        }

        // Cancelled before any terminal signal: neither callback fires.
        Ok(())
    }
}

// ── Stream consumption ────────────────────────────────────────────

type ByteStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Vec<u8>, reqwest::Error>> + Send>>;

/// Finite lazy sequence of decoded stream signals.
///
/// Yields `None` after a terminal signal, a transport failure (check
/// [`take_failure`](Self::take_failure)), or cancellation.
pub struct ChatStream {
    body: ByteStream,
    parser: SseParser,
    pending: VecDeque<StreamSignal>,
    finished: bool,
    failure: Option<ClientError>,
    cancel: CancellationToken,
}

impl ChatStream {
    fn new(response: reqwest::Response) -> Self {
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()));
        Self {
            body: Box::pin(body),
            parser: SseParser::new(),
            pending: VecDeque::new(),
            finished: false,
            failure: None,
            cancel: CancellationToken::new(),
        }
    }

    fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle for aborting the stream from another task.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Transport error that ended the stream, if any. Meaningful once
    /// [`next`](Self::next) has returned `None`.
    pub fn take_failure(&mut self) -> Option<ClientError> {
        self.failure.take()
    }

    /// Next signal, in wire order. Awaits body chunks as needed.
    ///
    /// Cancellation wins over anything already buffered: once the token
    /// is cancelled no further signal is yielded.
    pub async fn next(&mut self) -> Option<StreamSignal> {
        loop {
            if self.cancel.is_cancelled() {
                if !self.finished {
                    tracing::debug!("generation stream cancelled");
                    self.finished = true;
                }
                return None;
            }
            if let Some(signal) = self.pending.pop_front() {
                return Some(signal);
            }
            if self.finished {
                return None;
            }

            tokio::select! {
                () = self.cancel.cancelled() => {
                    // Loop back so the check above reports the cancel.
                }
                chunk = self.body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        self.pending.extend(self.parser.push(&bytes));
                        if self.parser.is_terminated() {
                            self.finished = true;
                        }
                    }
                    Some(Err(err)) => {
                        self.finished = true;
                        self.failure = Some(ClientError::Transport(err));
                        return None;
                    }
                    None => {
                        self.finished = true;
                        if !self.parser.is_terminated() {
                            // Reader exhausted without [DONE]: treat the
                            // clean end of stream as completion.
                            return Some(StreamSignal::Done);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_request_omits_absent_context() {
        let request = StreamRequest {
            chat_id: "c1",
            prompt: "hello",
            files: None,
            collection: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"chat_id": "c1", "prompt": "hello"})
        );
    }

    #[test]
    fn stream_request_carries_context() {
        let files = vec![ContextFile {
            name: "notes.txt".into(),
            content: "alpha".into(),
        }];
        let collection = CollectionRef {
            id: "col-1".into(),
            name: "papers".into(),
        };
        let request = StreamRequest {
            chat_id: "c1",
            prompt: "summarize",
            files: Some(&files),
            collection: Some(&collection),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["files"][0]["name"], "notes.txt");
        assert_eq!(json["collection"]["id"], "col-1");
    }

    #[test]
    fn chat_summary_tolerates_missing_optionals() {
        let summary: ChatSummary =
            serde_json::from_str(r#"{"chat_id": "c1", "name": "New Chat"}"#).unwrap();
        assert_eq!(summary.updated_at, "");
        assert!(summary.message_count.is_none());
        assert!(summary.preview.is_none());
    }

    #[test]
    fn chat_summary_tolerates_null_updated_at() {
        let summary: ChatSummary = serde_json::from_str(
            r#"{"chat_id": "c1", "name": "New Chat", "updated_at": null, "preview": null}"#,
        )
        .unwrap();
        assert_eq!(summary.updated_at, "");
        assert!(summary.preview.is_none());
    }
}
