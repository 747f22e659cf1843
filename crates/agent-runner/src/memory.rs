//! Chat Memory
//!
//! Long-lived conversation memory shared by a runner and every task it
//! creates. The runner never reads message content; it only hands the same
//! handle to each task and clears it on reset.

use std::sync::{Arc, PoisonError, RwLock};

use crate::message::{Conversation, Message};

/// Shared handle to a memory implementation
pub type SharedMemory = Arc<dyn Memory>;

/// Memory collaborator trait
pub trait Memory: Send + Sync + std::fmt::Debug {
    /// Messages that fit the memory's context window
    fn get(&self) -> Vec<Message>;

    /// Every stored message, in insertion order
    fn get_all(&self) -> Vec<Message>;

    /// Append a message
    fn put(&self, message: Message);

    /// Replace all stored messages
    fn set(&self, messages: Vec<Message>);

    /// Remove every message
    fn reset(&self);
}

/// In-process chat memory bounded by an estimated token budget on reads
#[derive(Debug)]
pub struct ChatMemoryBuffer {
    conversation: RwLock<Conversation>,
    token_limit: u32,
}

fn default_token_limit() -> u32 {
    8192
}

impl Default for ChatMemoryBuffer {
    fn default() -> Self {
        Self::new(default_token_limit())
    }
}

impl ChatMemoryBuffer {
    /// Create an empty buffer that reads back at most `token_limit` tokens
    pub fn new(token_limit: u32) -> Self {
        Self {
            conversation: RwLock::new(Conversation::new()),
            token_limit,
        }
    }

    /// Create a buffer pre-filled with history
    pub fn with_history(messages: Vec<Message>, token_limit: u32) -> Self {
        Self {
            conversation: RwLock::new(Conversation::from_messages(messages)),
            token_limit,
        }
    }

    /// Wrap in a shared handle
    pub fn shared(self) -> SharedMemory {
        Arc::new(self)
    }

    /// Token budget applied by `get`
    pub fn token_limit(&self) -> u32 {
        self.token_limit
    }
}

impl Memory for ChatMemoryBuffer {
    fn get(&self) -> Vec<Message> {
        let conversation = self.conversation.read().unwrap_or_else(PoisonError::into_inner);
        conversation.window(self.token_limit)
    }

    fn get_all(&self) -> Vec<Message> {
        let conversation = self.conversation.read().unwrap_or_else(PoisonError::into_inner);
        conversation.messages().to_vec()
    }

    fn put(&self, message: Message) {
        let mut conversation = self.conversation.write().unwrap_or_else(PoisonError::into_inner);
        conversation.push(message);
    }

    fn set(&self, messages: Vec<Message>) {
        let mut conversation = self.conversation.write().unwrap_or_else(PoisonError::into_inner);
        *conversation = Conversation::from_messages(messages);
    }

    fn reset(&self) {
        let mut conversation = self.conversation.write().unwrap_or_else(PoisonError::into_inner);
        conversation.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get_all() {
        let memory = ChatMemoryBuffer::default();
        memory.put(Message::user("1"));
        memory.put(Message::user("2"));

        let messages = memory.get_all();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "2");
    }

    #[test]
    fn test_get_respects_token_limit() {
        let memory = ChatMemoryBuffer::new(10);
        for idx in 0..5 {
            memory.put(Message::user(idx.to_string()));
        }

        // each single-digit message costs 4 tokens
        assert_eq!(memory.get().len(), 2);
        assert_eq!(memory.get_all().len(), 5);
    }

    #[test]
    fn test_set_and_reset() {
        let memory = ChatMemoryBuffer::default().shared();
        memory.set(vec![Message::user("a"), Message::assistant("b")]);
        assert_eq!(memory.get_all().len(), 2);

        memory.reset();
        assert!(memory.get_all().is_empty());
    }
}
