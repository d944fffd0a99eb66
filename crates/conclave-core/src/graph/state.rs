//! State threaded through a workflow run.
//!
//! The context is a strongly-typed struct chosen per graph, so every node's
//! inputs and outputs are checked at compile time instead of being looked up
//! by string key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::provider::ChatMessage;

/// A node failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub step: String,
    pub error: String,
}

/// Mutable state owned by exactly one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphState<C> {
    pub messages: Vec<ChatMessage>,
    /// Name of the node about to run. Empty means "start at the entry node".
    pub current_step: String,
    pub context: C,
    pub errors: Vec<StepError>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl<C> GraphState<C> {
    pub fn new(context: C) -> Self {
        Self {
            messages: Vec::new(),
            current_step: String::new(),
            context,
            errors: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Seed the conversation (builder pattern).
    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Merge a node's partial update into this state.
    ///
    /// Messages are appended, the context is replaced when provided, and
    /// metadata entries overwrite by key.
    pub fn apply(&mut self, update: StateUpdate<C>) {
        self.messages.extend(update.messages);
        if let Some(context) = update.context {
            self.context = context;
        }
        self.metadata.extend(update.metadata);
    }
}

/// Partial state returned by a node.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate<C> {
    pub messages: Vec<ChatMessage>,
    pub context: Option<C>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl<C> Default for StateUpdate<C> {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            context: None,
            metadata: BTreeMap::new(),
        }
    }
}

impl<C> StateUpdate<C> {
    /// An update that changes nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// An update replacing the context.
    pub fn context(context: C) -> Self {
        Self {
            context: Some(context),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
