//! Conversation Identifiers
//!
//! A conversation is addressed by an opaque string chosen by the caller. The
//! identifier becomes the last path segment of the connection URL, so the
//! characters that would change the URL's meaning are rejected up front.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a string cannot be used as a conversation identifier
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvalidConversationId {
    /// The identifier was empty
    #[error("conversation id must not be empty")]
    Empty,

    /// The identifier contained a character that is not allowed in a path segment
    #[error("conversation id {id:?} contains forbidden character {ch:?}")]
    ForbiddenCharacter {
        /// The rejected identifier
        id: String,
        /// The first offending character
        ch: char,
    },
}

/// Identifier of one logical conversation (one connection, one message history)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    /// Validate and wrap a conversation identifier
    ///
    /// # Errors
    ///
    /// Returns [`InvalidConversationId`] if the value is empty or contains
    /// `/`, `?`, `#` or whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidConversationId> {
        let id = id.into();
        if id.is_empty() {
            return Err(InvalidConversationId::Empty);
        }
        if let Some(ch) = id
            .chars()
            .find(|c| matches!(c, '/' | '?' | '#') || c.is_whitespace())
        {
            return Err(InvalidConversationId::ForbiddenCharacter { id, ch });
        }
        Ok(Self(id))
    }

    /// The identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build the connection URL for this conversation under `endpoint`
    #[must_use]
    pub fn url_under(&self, endpoint: &str) -> String {
        format!("{}/{}", endpoint.trim_end_matches('/'), self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ConversationId {
    type Err = InvalidConversationId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for ConversationId {
    type Error = InvalidConversationId;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for ConversationId {
    type Error = InvalidConversationId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}
