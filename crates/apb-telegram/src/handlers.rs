//! Telegram update handlers.
//!
//! Each handler converts a teloxide update into pipeline updates and submits
//! them. Nothing here waits for processing; the dispatcher moves on at once.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{ChatMemberKind, ChatMemberUpdated, Message, User},
};

use apb_core::{
    commands::CommandRequest,
    domain::{Actor, ChatId, MessageId, UserId},
    moderation::{EventKind, ModerationEvent},
    pipeline::{self, Submission},
};

use crate::router::AppState;

fn actor_of(user: &User) -> Actor {
    Actor {
        id: UserId(user.id.0 as i64),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
    }
}

/// Pipeline updates carried by one message.
///
/// Commands are recognized in any chat; everything else is only moderated in
/// groups. Messages without a sending user (channel posts) are skipped.
pub fn updates_from_message(msg: &Message) -> Vec<pipeline::Update> {
    let chat = ChatId(msg.chat.id.0);

    if let Some(members) = msg.new_chat_members() {
        return members
            .iter()
            .map(|u| {
                pipeline::Update::Moderation(ModerationEvent::membership(
                    chat,
                    actor_of(u),
                    EventKind::NewMember,
                ))
            })
            .collect();
    }

    let Some(from) = msg.from() else {
        return Vec::new();
    };
    let actor = actor_of(from);
    let message_id = MessageId(msg.id.0);

    if let Some(text) = msg.text() {
        if let Some(req) = CommandRequest::parse(chat, actor.clone(), Some(message_id), text) {
            return vec![pipeline::Update::Command(req)];
        }
    }

    if !chat.is_group() {
        return Vec::new();
    }

    let text = msg.text().or_else(|| msg.caption()).map(str::to_string);
    vec![pipeline::Update::Moderation(ModerationEvent::message(
        chat, actor, message_id, text,
    ))]
}

/// A member update is moderated when the user ends up a regular member.
pub fn update_from_member(upd: &ChatMemberUpdated) -> Option<pipeline::Update> {
    let chat = ChatId(upd.chat.id.0);
    if !chat.is_group() || !matches!(upd.new_chat_member.kind, ChatMemberKind::Member) {
        return None;
    }
    Some(pipeline::Update::Moderation(ModerationEvent::membership(
        chat,
        actor_of(&upd.new_chat_member.user),
        EventKind::MemberUpdate,
    )))
}

fn submit_all(state: &AppState, updates: Vec<pipeline::Update>) {
    for update in updates {
        let chat = update.chat();
        match state.pipeline.submit(update) {
            Submission::Accepted => {}
            Submission::Dropped => {
                tracing::debug!(chat = %chat, "update dropped by inbound limit");
            }
            Submission::ShuttingDown => {
                tracing::debug!(chat = %chat, "update refused during shutdown");
            }
        }
    }
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    submit_all(&state, updates_from_message(&msg));
    Ok(())
}

pub async fn handle_chat_member(
    upd: ChatMemberUpdated,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    submit_all(&state, update_from_member(&upd).into_iter().collect());
    Ok(())
}
