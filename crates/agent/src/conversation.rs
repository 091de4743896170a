//! Append-only conversation history

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use sandagent_provider::{Message, ToolCallDef};

use crate::dispatcher::CallOutcome;

/// One entry of the history. Never modified after creation.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    User(String),
    Model(Option<String>),
    CallRequest {
        id: String,
        name: String,
        arguments: Value,
    },
    CallResult {
        id: String,
        outcome: CallOutcome,
    },
}

impl Turn {
    pub fn is_call_request(&self) -> bool {
        matches!(self, Turn::CallRequest { .. })
    }

    pub fn is_call_result(&self) -> bool {
        matches!(self, Turn::CallResult { .. })
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Turn::User(text) => write!(f, "user: {}", preview(text)),
            Turn::Model(Some(text)) => write!(f, "model: {}", preview(text)),
            Turn::Model(None) => write!(f, "model: <no text>"),
            Turn::CallRequest { name, arguments, .. } => {
                write!(f, "call: {}({})", name, preview(&arguments.to_string()))
            }
            Turn::CallResult { outcome, .. } => match &outcome.result {
                Ok(value) => write!(
                    f,
                    "result: {} -> {}",
                    outcome.tool,
                    preview(&value.to_string())
                ),
                Err(error) => write!(
                    f,
                    "result: {} failed ({}): {}",
                    outcome.tool,
                    error.kind(),
                    preview(&error.to_string())
                ),
            },
        }
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 200;
    match text.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// System instructions plus the ordered turns of one run.
///
/// Cloning is cheap. `append` returns a new state and leaves `self`
/// untouched; the turn vector is only copied when another clone still
/// shares it.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    system: Arc<str>,
    turns: Arc<Vec<Turn>>,
}

impl Conversation {
    /// A fresh history holding only the user prompt
    pub fn seed(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: Arc::from(system.into()),
            turns: Arc::new(vec![Turn::User(prompt.into())]),
        }
    }

    pub fn append(&self, turn: Turn) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.turns).push(turn);
        next
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The last `n` turns, oldest first
    pub fn tail(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// Text of the last model message, if any
    pub fn final_text(&self) -> Option<&str> {
        self.turns.iter().rev().find_map(|turn| match turn {
            Turn::Model(Some(text)) => Some(text.as_str()),
            _ => None,
        })
    }

    /// Ids of requests with no matching result
    pub fn unresolved_calls(&self) -> Vec<&str> {
        self.turns
            .iter()
            .filter_map(|turn| match turn {
                Turn::CallRequest { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .filter(|id| {
                !self
                    .turns
                    .iter()
                    .any(|t| matches!(t, Turn::CallResult { id: rid, .. } if rid == id))
            })
            .collect()
    }

    /// Serialize into the backend message list.
    ///
    /// A model message directly followed by requests becomes one assistant
    /// message carrying those calls.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        if !self.system.is_empty() {
            messages.push(Message::system(self.system.to_string()));
        }

        let mut turns = self.turns.iter().peekable();
        while let Some(turn) = turns.next() {
            match turn {
                Turn::User(text) => messages.push(Message::user(text.as_str())),
                Turn::Model(text) => {
                    let calls = collect_calls(&mut turns);
                    if calls.is_empty() {
                        messages.push(Message::assistant(text.clone().unwrap_or_default()));
                    } else {
                        messages.push(Message::assistant_calls(text.clone(), calls));
                    }
                }
                Turn::CallRequest {
                    id,
                    name,
                    arguments,
                } => {
                    let mut calls = vec![ToolCallDef::new(id, name, arguments.clone())];
                    calls.extend(collect_calls(&mut turns));
                    messages.push(Message::assistant_calls(None, calls));
                }
                Turn::CallResult { id, outcome } => {
                    messages.push(Message::tool(id, &outcome.tool, outcome.payload_text()));
                }
            }
        }
        messages
    }
}

fn collect_calls<'a, I>(turns: &mut std::iter::Peekable<I>) -> Vec<ToolCallDef>
where
    I: Iterator<Item = &'a Turn>,
{
    let mut calls = Vec::new();
    while let Some(Turn::CallRequest {
        id,
        name,
        arguments,
    }) = turns.peek()
    {
        calls.push(ToolCallDef::new(id, name, arguments.clone()));
        turns.next();
    }
    calls
}
