use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    platform::types::{ActorProfile, ChatInfo, ChatMember, Permissions, SendOptions},
    Result,
};

/// Outbound side of the chat platform.
///
/// Implementations map their transport errors into [`crate::Error::Transient`]
/// (safe to retry) or [`crate::Error::Fatal`] (rejected by the platform).
#[async_trait]
pub trait PlatformPort: Send + Sync {
    async fn fetch_administrators(&self, group: ChatId) -> Result<Vec<ChatMember>>;
    async fn fetch_actor_profile(&self, actor: UserId) -> Result<ActorProfile>;
    async fn get_chat_info(&self, chat: ChatId) -> Result<ChatInfo>;

    async fn send_message(
        &self,
        destination: ChatId,
        text: &str,
        options: SendOptions,
    ) -> Result<MessageRef>;
    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<()>;

    async fn ban_actor(&self, group: ChatId, actor: UserId) -> Result<()>;
    async fn unban_actor(&self, group: ChatId, actor: UserId) -> Result<()>;
    async fn restrict_actor(
        &self,
        group: ChatId,
        actor: UserId,
        permissions: Permissions,
    ) -> Result<()>;
}
