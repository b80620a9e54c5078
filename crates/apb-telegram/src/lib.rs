//! Telegram adapter (teloxide).
//!
//! This crate implements the `apb-core` PlatformPort over the Telegram Bot API
//! and turns incoming updates into pipeline submissions.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{ChatMemberKind, ChatPermissions},
    ApiError, RequestError,
};

pub mod handlers;
pub mod router;

use apb_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    errors::Error,
    platform::{
        types::{
            ActorProfile, AdminRights, ChatInfo, ChatKind, ChatMember, MemberRole, ParseMode,
            Permissions, SendOptions,
        },
        PlatformPort,
    },
    Result,
};

/// Raw Bot API access. Throttling and retry are layered on top in `apb-core`.
#[derive(Clone)]
pub struct TelegramPlatform {
    bot: Bot,
}

impl TelegramPlatform {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn tg_user(user: UserId) -> Result<teloxide::types::UserId> {
        u64::try_from(user.0)
            .map(teloxide::types::UserId)
            .map_err(|_| Error::Fatal(format!("invalid user id {user}")))
    }
}

/// Sort a Bot API failure into the retryable and non-retryable buckets.
pub fn map_err(e: RequestError) -> Error {
    match e {
        RequestError::RetryAfter(d) => Error::rate_limited("telegram flood control", d),
        RequestError::Network(e) => Error::transient(format!("telegram network error: {e}")),
        RequestError::Io(e) => Error::transient(format!("telegram i/o error: {e}")),
        RequestError::Api(api) => map_api_err(api),
        other => Error::External(format!("telegram error: {other}")),
    }
}

fn map_api_err(api: ApiError) -> Error {
    let text = api.to_string();
    let lower = text.to_ascii_lowercase();
    let server_side = [
        "too many requests",
        "internal server error",
        "bad gateway",
        "gateway timeout",
        "service unavailable",
    ];
    if server_side.iter().any(|s| lower.contains(s)) {
        Error::transient(format!("telegram api error: {text}"))
    } else {
        Error::Fatal(format!("telegram api error: {text}"))
    }
}

fn member_role(kind: &ChatMemberKind) -> MemberRole {
    match kind {
        ChatMemberKind::Owner(_) => MemberRole::Creator,
        ChatMemberKind::Administrator(a) => MemberRole::Administrator(AdminRights {
            can_change_info: a.can_change_info,
            can_promote_members: a.can_promote_members,
            can_restrict_members: a.can_restrict_members,
        }),
        _ => MemberRole::Member,
    }
}

fn chat_kind(chat: &teloxide::types::Chat) -> ChatKind {
    if chat.is_private() {
        ChatKind::Private
    } else if chat.is_supergroup() {
        ChatKind::Supergroup
    } else if chat.is_channel() {
        ChatKind::Channel
    } else {
        ChatKind::Group
    }
}

fn chat_info(id: ChatId, chat: &teloxide::types::Chat) -> ChatInfo {
    // Only present on supergroups; read it from the wire shape.
    let join_by_request = serde_json::to_value(chat)
        .ok()
        .and_then(|v| v.get("join_by_request").and_then(|f| f.as_bool()))
        .unwrap_or(false);
    ChatInfo {
        id,
        title: chat.title().map(str::to_string),
        kind: chat_kind(chat),
        username: chat.username().map(str::to_string),
        invite_link: chat.invite_link().map(str::to_string),
        join_by_request,
    }
}

fn tg_permissions(p: Permissions) -> ChatPermissions {
    let mut out = ChatPermissions::empty();
    if p.can_send_messages {
        out |= ChatPermissions::SEND_MESSAGES;
    }
    if p.can_send_media {
        out |= ChatPermissions::SEND_MEDIA_MESSAGES;
    }
    if p.can_send_other {
        out |= ChatPermissions::SEND_OTHER_MESSAGES;
    }
    if p.can_add_web_page_previews {
        out |= ChatPermissions::ADD_WEB_PAGE_PREVIEWS;
    }
    out
}

#[async_trait]
impl PlatformPort for TelegramPlatform {
    async fn fetch_administrators(&self, group: ChatId) -> Result<Vec<ChatMember>> {
        let admins = self
            .bot
            .get_chat_administrators(Self::tg_chat(group))
            .await
            .map_err(map_err)?;
        Ok(admins
            .iter()
            .map(|m| ChatMember {
                user: UserId(m.user.id.0 as i64),
                role: member_role(&m.kind),
            })
            .collect())
    }

    async fn fetch_actor_profile(&self, actor: UserId) -> Result<ActorProfile> {
        let chat = self
            .bot
            .get_chat(teloxide::types::ChatId(actor.0))
            .await
            .map_err(map_err)?;
        Ok(ActorProfile {
            bio: chat.bio().map(str::to_string),
        })
    }

    async fn get_chat_info(&self, chat: ChatId) -> Result<ChatInfo> {
        let tg = self
            .bot
            .get_chat(Self::tg_chat(chat))
            .await
            .map_err(map_err)?;
        Ok(chat_info(chat, &tg))
    }

    async fn send_message(
        &self,
        dest: ChatId,
        text: &str,
        options: SendOptions,
    ) -> Result<MessageRef> {
        let mut req = self.bot.send_message(Self::tg_chat(dest), text.to_string());
        if options.parse_mode == ParseMode::MarkdownV2 {
            req = req.parse_mode(teloxide::types::ParseMode::MarkdownV2);
        }
        if let Some(reply_to) = options.reply_to {
            req = req.reply_to_message_id(Self::tg_msg_id(reply_to));
        }
        let msg = req.await.map_err(map_err)?;

        Ok(MessageRef {
            chat_id: dest,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<()> {
        self.bot
            .delete_message(Self::tg_chat(chat), Self::tg_msg_id(message))
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn ban_actor(&self, group: ChatId, actor: UserId) -> Result<()> {
        self.bot
            .ban_chat_member(Self::tg_chat(group), Self::tg_user(actor)?)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn unban_actor(&self, group: ChatId, actor: UserId) -> Result<()> {
        self.bot
            .unban_chat_member(Self::tg_chat(group), Self::tg_user(actor)?)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn restrict_actor(
        &self,
        group: ChatId,
        actor: UserId,
        permissions: Permissions,
    ) -> Result<()> {
        self.bot
            .restrict_chat_member(
                Self::tg_chat(group),
                Self::tg_user(actor)?,
                tg_permissions(permissions),
            )
            .await
            .map_err(map_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn flood_control_keeps_the_wait_hint() {
        let e = map_err(RequestError::RetryAfter(Duration::from_secs(3)));
        assert!(e.is_transient());
        assert_eq!(e.retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn rejected_requests_are_fatal() {
        let e = map_err(RequestError::Api(ApiError::BotBlocked));
        assert!(matches!(e, Error::Fatal(_)));
        let e = map_err(RequestError::Api(ApiError::MessageToDeleteNotFound));
        assert!(!e.is_transient());
    }

    #[test]
    fn server_side_api_errors_are_transient() {
        let e = map_err(RequestError::Api(ApiError::Unknown(
            "Bad Gateway".to_string(),
        )));
        assert!(e.is_transient());
        assert_eq!(e.retry_after(), None);
    }

    #[test]
    fn negative_user_ids_are_rejected_before_the_call() {
        assert!(TelegramPlatform::tg_user(UserId(-5)).is_err());
        assert_eq!(
            TelegramPlatform::tg_user(UserId(42)).ok(),
            Some(teloxide::types::UserId(42))
        );
    }

    #[test]
    fn mute_maps_to_no_permissions() {
        assert_eq!(tg_permissions(Permissions::muted()), ChatPermissions::empty());
        let p = Permissions {
            can_send_messages: true,
            ..Permissions::muted()
        };
        assert_eq!(tg_permissions(p), ChatPermissions::SEND_MESSAGES);
    }
}
