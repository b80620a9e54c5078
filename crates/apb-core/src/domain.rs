use std::fmt;

use serde::{Deserialize, Serialize};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl ChatId {
    /// Groups, supergroups and channels carry negative ids; private chats are positive.
    pub fn is_group(self) -> bool {
        self.0 < 0
    }

    /// Normalize an operator-typed chat id.
    ///
    /// Bare positive ids are treated as supergroup ids without the `-100` prefix
    /// (the form Telegram clients show when copying a group id).
    pub fn from_operator_input(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.starts_with('-') {
            return raw.parse::<i64>().ok().map(ChatId);
        }
        let digits = raw.parse::<u64>().ok()?;
        if digits == 0 {
            return Some(ChatId(0));
        }
        format!("-100{digits}").parse::<i64>().ok().map(ChatId)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display identity of the user behind an update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl Actor {
    pub fn new(id: UserId, first_name: impl Into<String>) -> Self {
        Self {
            id,
            first_name: first_name.into(),
            last_name: None,
            username: None,
        }
    }

    /// Best human-readable name: full name, then `@username`, then the numeric id.
    pub fn display_name(&self) -> String {
        if !self.first_name.is_empty() {
            let full = match &self.last_name {
                Some(last) => format!("{} {last}", self.first_name),
                None => self.first_name.clone(),
            };
            return full.trim().to_string();
        }
        if let Some(u) = self.username.as_deref().filter(|u| !u.is_empty()) {
            return format!("@{u}");
        }
        self.id.to_string()
    }
}
