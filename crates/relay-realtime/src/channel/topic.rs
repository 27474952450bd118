//! Topic entry in the subscriber index.

use std::collections::HashSet;

use relay_core::types::SessionId;

/// Local interest in one topic.
#[derive(Debug, Clone)]
pub struct Topic {
    /// Topic name
    pub name: String,
    /// Sessions subscribed on this node
    pub subscribers: HashSet<SessionId>,
    /// In-flight catch-up readers
    pub readers: usize,
}

impl Topic {
    /// Create an empty topic entry.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: HashSet::new(),
            readers: 0,
        }
    }

    /// No subscribers and no pending catch-up work.
    pub fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && self.readers == 0
    }
}
