use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    platform::{
        port::PlatformPort,
        types::{ActorProfile, ChatInfo, ChatMember, Permissions, SendOptions},
    },
    retry::RetryPolicy,
    Result,
};

/// PlatformPort decorator that retries transient failures per [`RetryPolicy`].
pub struct RetryingPlatform {
    inner: Arc<dyn PlatformPort>,
    policy: RetryPolicy,
}

impl RetryingPlatform {
    pub fn new(inner: Arc<dyn PlatformPort>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl PlatformPort for RetryingPlatform {
    async fn fetch_administrators(&self, group: ChatId) -> Result<Vec<ChatMember>> {
        let inner = &self.inner;
        self.policy
            .invoke("fetch_administrators", move || {
                inner.fetch_administrators(group)
            })
            .await
    }

    async fn fetch_actor_profile(&self, actor: UserId) -> Result<ActorProfile> {
        let inner = &self.inner;
        self.policy
            .invoke("fetch_actor_profile", move || {
                inner.fetch_actor_profile(actor)
            })
            .await
    }

    async fn get_chat_info(&self, chat: ChatId) -> Result<ChatInfo> {
        let inner = &self.inner;
        self.policy
            .invoke("get_chat_info", move || inner.get_chat_info(chat))
            .await
    }

    async fn send_message(
        &self,
        destination: ChatId,
        text: &str,
        options: SendOptions,
    ) -> Result<MessageRef> {
        let inner = &self.inner;
        self.policy
            .invoke("send_message", move || {
                inner.send_message(destination, text, options)
            })
            .await
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<()> {
        let inner = &self.inner;
        self.policy
            .invoke("delete_message", move || inner.delete_message(chat, message))
            .await
    }

    async fn ban_actor(&self, group: ChatId, actor: UserId) -> Result<()> {
        let inner = &self.inner;
        self.policy
            .invoke("ban_actor", move || inner.ban_actor(group, actor))
            .await
    }

    async fn unban_actor(&self, group: ChatId, actor: UserId) -> Result<()> {
        let inner = &self.inner;
        self.policy
            .invoke("unban_actor", move || inner.unban_actor(group, actor))
            .await
    }

    async fn restrict_actor(
        &self,
        group: ChatId,
        actor: UserId,
        permissions: Permissions,
    ) -> Result<()> {
        let inner = &self.inner;
        self.policy
            .invoke("restrict_actor", move || {
                inner.restrict_actor(group, actor, permissions)
            })
            .await
    }
}
