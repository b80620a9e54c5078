//! Moderation decision engine.
//!
//! `evaluate` is a pure function of the event and the group's member lists;
//! everything it needs from the platform (admin status, bio) is resolved
//! beforehand and carried on the event.

use std::fmt;

use crate::{
    domain::{Actor, ChatId, MessageId, UserId},
    session::GroupUserState,
};

/// Substrings that mark a bio as promotional.
pub const BIO_MARKERS: [&str; 4] = ["t.me", "@", "http", "www"];

/// Substrings that mark a message as promotional.
pub const TEXT_MARKERS: [&str; 3] = ["t.me", "http", "www"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    NewMember,
    MemberUpdate,
    Message,
}

impl EventKind {
    pub fn is_membership(self) -> bool {
        matches!(self, EventKind::NewMember | EventKind::MemberUpdate)
    }
}

/// Normalized view of one incoming update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModerationEvent {
    pub group: ChatId,
    pub actor: Actor,
    pub kind: EventKind,
    /// The offending message, for `Message` events.
    pub message_id: Option<MessageId>,
    pub message_text: Option<String>,
    pub actor_is_admin_or_owner: bool,
    pub actor_bio: Option<String>,
}

impl ModerationEvent {
    pub fn message(group: ChatId, actor: Actor, message_id: MessageId, text: Option<String>) -> Self {
        Self {
            group,
            actor,
            kind: EventKind::Message,
            message_id: Some(message_id),
            message_text: text,
            actor_is_admin_or_owner: false,
            actor_bio: None,
        }
    }

    pub fn membership(group: ChatId, actor: Actor, kind: EventKind) -> Self {
        Self {
            group,
            actor,
            kind,
            message_id: None,
            message_text: None,
            actor_is_admin_or_owner: false,
            actor_bio: None,
        }
    }

    pub fn actor_id(&self) -> UserId {
        self.actor.id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViolationReason {
    Bio,
    Text,
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationReason::Bio => f.write_str("bio"),
            ViolationReason::Text => f.write_str("text"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Violation(ViolationReason),
}

pub fn evaluate(event: &ModerationEvent, state: &GroupUserState) -> Verdict {
    if state.is_exempt(event.actor_id()) {
        return Verdict::Clean;
    }
    if event.actor_is_admin_or_owner {
        return Verdict::Clean;
    }
    if contains_any(event.actor_bio.as_deref(), &BIO_MARKERS) {
        return Verdict::Violation(ViolationReason::Bio);
    }
    if contains_any(event.message_text.as_deref(), &TEXT_MARKERS) {
        return Verdict::Violation(ViolationReason::Text);
    }
    Verdict::Clean
}

fn contains_any(text: Option<&str>, markers: &[&str]) -> bool {
    let Some(text) = text else {
        return false;
    };
    let lower = text.to_lowercase();
    markers.iter().any(|m| lower.contains(m))
}
