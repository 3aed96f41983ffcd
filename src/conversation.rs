//! Per-conversation state and the process-wide conversation store.
//!
//! A [`Conversation`] moves through `Empty → Indexing → Ready`. Indexing
//! happens while the caller holds the conversation's lock, so it is never
//! observed half-done; a failed build leaves the conversation `Empty`.
//!
//! When a turn arrives for a different source than the one the
//! conversation was built from, the turn sees an `Empty` conversation, but
//! the committed history, index and digest stay in place. The index built
//! for the new source is staged, and only [`Conversation::append_turn`]
//! swaps it in and clears the old history. A turn that fails or is
//! cancelled therefore leaves the conversation as it was.
//!
//! Each conversation sits behind its own `tokio::sync::Mutex`. That mutex
//! is fair, so concurrent turns on one id run one after another in arrival
//! order, while turns on different ids proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use paper_chat_core::index::VectorIndex;
use paper_chat_core::models::Message;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Exclusive access to one conversation for the duration of a turn.
pub type ConversationGuard = OwnedMutexGuard<Conversation>;

/// Hex SHA-256 of the PDF bytes an index was built from.
pub fn source_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Lifecycle state of a [`Conversation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// No index; the next turn must build one.
    Empty,
    /// Index built and turns can be answered.
    Ready,
}

/// History and retrieval index for one conversation id.
#[derive(Debug)]
pub struct Conversation {
    id: String,
    history: Vec<Message>,
    index: Option<Arc<VectorIndex>>,
    source_digest: Option<String>,
    /// Digest of the source the current turn is about.
    turn_digest: Option<String>,
    /// Index built for a source that no turn has committed against yet.
    staged: Option<(String, Arc<VectorIndex>)>,
}

impl Conversation {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            history: Vec::new(),
            index: None,
            source_digest: None,
            turn_digest: None,
            staged: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// History the current turn builds on; empty while switching sources.
    pub fn history(&self) -> &[Message] {
        if self.switching() {
            &[]
        } else {
            &self.history
        }
    }

    /// Index for the current turn's source, if one is built.
    pub fn index(&self) -> Option<&Arc<VectorIndex>> {
        if self.switching() {
            self.staged
                .as_ref()
                .filter(|(digest, _)| self.turn_digest.as_deref() == Some(digest.as_str()))
                .map(|(_, index)| index)
        } else {
            self.index.as_ref()
        }
    }

    /// Digest of the source the committed history belongs to.
    pub fn source_digest(&self) -> Option<&str> {
        self.source_digest.as_deref()
    }

    pub fn state(&self) -> ConversationState {
        if self.index().is_some() {
            ConversationState::Ready
        } else {
            ConversationState::Empty
        }
    }

    /// Whether the current turn is about a different source than the
    /// committed history.
    fn switching(&self) -> bool {
        match (&self.turn_digest, &self.source_digest) {
            (Some(turn), Some(committed)) => turn != committed,
            _ => false,
        }
    }

    /// Start a turn about the source with `digest`.
    fn begin_turn(&mut self, digest: &str) {
        if self.source_digest.is_none() {
            self.source_digest = Some(digest.to_string());
        }
        self.turn_digest = Some(digest.to_string());
    }

    /// Attach a freshly built index for the current turn's source.
    ///
    /// While switching sources the index is staged until the turn commits.
    pub fn install_index(&mut self, index: VectorIndex) -> Arc<VectorIndex> {
        let index = Arc::new(index);
        match (self.switching(), &self.turn_digest) {
            (true, Some(digest)) => {
                self.staged = Some((digest.clone(), Arc::clone(&index)));
            }
            _ => self.index = Some(Arc::clone(&index)),
        }
        index
    }

    /// Append a completed question/answer pair.
    ///
    /// If the turn was about a new source, its staged index replaces the
    /// old one and the old history is dropped first.
    pub fn append_turn(&mut self, human: impl Into<String>, ai: impl Into<String>) {
        if self.switching() {
            debug!(conversation = %self.id, "Source changed, replacing conversation");
            let digest = self.turn_digest.clone();
            self.index = self
                .staged
                .take()
                .filter(|(staged, _)| digest.as_deref() == Some(staged.as_str()))
                .map(|(_, index)| index);
            self.history.clear();
            self.source_digest = digest;
        }
        self.history.reserve(2);
        self.history.push(Message::human(human));
        self.history.push(Message::ai(ai));
    }

    fn clear(&mut self) {
        self.history.clear();
        self.index = None;
        self.source_digest = None;
        self.turn_digest = None;
        self.staged = None;
    }
}

/// Maps conversation ids to their state.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Mutex<HashMap<String, Arc<AsyncMutex<Conversation>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &str) -> Arc<AsyncMutex<Conversation>> {
        let mut map = self
            .conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            map.entry(id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(Conversation::new(id)))),
        )
    }

    fn existing(&self, id: &str) -> Option<Arc<AsyncMutex<Conversation>>> {
        let map = self
            .conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        map.get(id).cloned()
    }

    /// Lock the conversation `id`, creating it if needed.
    ///
    /// If it was last indexed from a different source, the returned
    /// conversation is `Empty` for this turn; the previous history and
    /// index are only replaced when the turn appends its answer. Waits
    /// behind any turn already holding the conversation. A conversation
    /// reset while waiting is replaced by a fresh one.
    pub async fn get_or_create(&self, id: &str, digest: &str) -> ConversationGuard {
        loop {
            let slot = self.slot(id);
            let mut guard = Arc::clone(&slot).lock_owned().await;
            let live = self
                .existing(id)
                .is_some_and(|current| Arc::ptr_eq(&current, &slot));
            if live {
                guard.begin_turn(digest);
                return guard;
            }
            debug!(conversation = %id, "Conversation reset while waiting, retrying");
        }
    }

    /// Append a question/answer pair to an existing conversation.
    ///
    /// Returns `false` if no conversation with `id` exists.
    pub async fn append_turn(&self, id: &str, human: &str, ai: &str) -> bool {
        match self.existing(id) {
            Some(slot) => {
                let mut conv = slot.lock().await;
                // Outside a turn, append to the committed source.
                conv.turn_digest = conv.source_digest.clone();
                conv.append_turn(human, ai);
                true
            }
            None => false,
        }
    }

    /// Forget conversation `id`.
    ///
    /// A turn already holding it finishes first, and its result is
    /// discarded with the rest of the conversation. Turns still waiting
    /// for the lock start on a fresh conversation.
    pub async fn reset(&self, id: &str) {
        let removed = {
            let mut map = self
                .conversations
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            map.remove(id)
        };
        if let Some(slot) = removed {
            slot.lock().await.clear();
            debug!(conversation = %id, "Conversation reset");
        }
    }

    /// Forget every conversation.
    pub async fn reset_all(&self) {
        let drained: Vec<_> = {
            let mut map = self
                .conversations
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            map.drain().map(|(_, slot)| slot).collect()
        };
        let count = drained.len();
        for slot in drained {
            slot.lock().await.clear();
        }
        debug!(count, "All conversations reset");
    }

    /// Snapshot of the history of `id`, empty if unknown.
    pub async fn history(&self, id: &str) -> Vec<Message> {
        match self.existing(id) {
            Some(slot) => slot.lock().await.history().to_vec(),
            None => Vec::new(),
        }
    }

    /// Number of live conversations.
    pub fn len(&self) -> usize {
        self.conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.existing(id).is_some()
    }
}
