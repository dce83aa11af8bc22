//! Small in-memory cache of the most recent chats (sidebar data).

use super::{ChatClient, ChatSummary};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Newest-first cap; older entries are evicted silently.
pub const RECENT_CHAT_CAP: usize = 25;

#[derive(Debug, Default)]
pub struct RecentChats {
    entries: Mutex<Vec<ChatSummary>>,
    last_error: Mutex<Option<String>>,
    loading: AtomicBool,
}

impl RecentChats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh the cache from `/chats`. A call that overlaps an in-flight
    /// fetch is a no-op, so concurrent callers produce one network call.
    /// Failures clear the cache and are recorded, never propagated.
    pub async fn fetch_recent_chats(&self, chats: &ChatClient) {
        if self.loading.swap(true, Ordering::SeqCst) {
            return;
        }

        *self.last_error.lock().expect("recent chats poisoned") = None;
        match chats.fetch_chats().await {
            Ok(mut fetched) => {
                fetched.truncate(RECENT_CHAT_CAP);
                *self.entries.lock().expect("recent chats poisoned") = fetched;
            }
            Err(err) => {
                tracing::warn!("failed to load recent chats: {err}");
                self.entries.lock().expect("recent chats poisoned").clear();
                *self.last_error.lock().expect("recent chats poisoned") = Some(err.to_string());
            }
        }

        self.loading.store(false, Ordering::SeqCst);
    }

    /// Prepend a freshly created chat. Entries missing a required field
    /// are dropped with a warning instead of corrupting the cache.
    pub fn add_chat(&self, chat: ChatSummary) {
        if chat.chat_id.is_empty() || chat.name.is_empty() || chat.updated_at.is_empty() {
            tracing::warn!(
                chat_id = %chat.chat_id,
                name = %chat.name,
                "refusing to cache chat with missing fields"
            );
            return;
        }
        let mut entries = self.entries.lock().expect("recent chats poisoned");
        entries.insert(0, chat);
        entries.truncate(RECENT_CHAT_CAP);
    }

    pub fn entries(&self) -> Vec<ChatSummary> {
        self.entries.lock().expect("recent chats poisoned").clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().expect("recent chats poisoned").clone()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(id: &str) -> ChatSummary {
        ChatSummary {
            chat_id: id.to_string(),
            name: format!("chat {id}"),
            message_count: None,
            updated_at: "2025-06-01T12:00:00".to_string(),
            preview: None,
        }
    }

    #[test]
    fn add_chat_prepends() {
        let cache = RecentChats::new();
        cache.add_chat(chat("a"));
        cache.add_chat(chat("b"));
        let ids: Vec<String> = cache.entries().into_iter().map(|c| c.chat_id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn missing_updated_at_leaves_cache_unchanged() {
        let cache = RecentChats::new();
        cache.add_chat(chat("keep"));

        let mut invalid = chat("bad");
        invalid.updated_at = String::new();
        cache.add_chat(invalid);

        let entries = cache.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].chat_id, "keep");
    }

    #[test]
    fn missing_id_or_name_is_rejected() {
        let cache = RecentChats::new();

        let mut no_id = chat("x");
        no_id.chat_id = String::new();
        cache.add_chat(no_id);

        let mut no_name = chat("y");
        no_name.name = String::new();
        cache.add_chat(no_name);

        assert!(cache.entries().is_empty());
    }

    #[test]
    fn cache_never_exceeds_cap() {
        let cache = RecentChats::new();
        for i in 0..40 {
            cache.add_chat(chat(&format!("c{i}")));
        }
        let entries = cache.entries();
        assert_eq!(entries.len(), RECENT_CHAT_CAP);
        // Newest stays at the front, oldest evicted.
        assert_eq!(entries[0].chat_id, "c39");
        assert_eq!(entries.last().unwrap().chat_id, "c15");
    }
}
