use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    platform::{
        port::PlatformPort,
        types::{ActorProfile, ChatInfo, ChatMember, Permissions, SendOptions},
    },
    throttle::{OutboundThrottler, Route},
    Result,
};

/// PlatformPort decorator that gates every call on the outbound buckets.
///
/// The destination chat picks the class bucket; profile lookups address the
/// actor's private chat.
pub struct ThrottledPlatform {
    inner: Arc<dyn PlatformPort>,
    throttler: Arc<OutboundThrottler>,
}

impl ThrottledPlatform {
    pub fn new(inner: Arc<dyn PlatformPort>, throttler: Arc<OutboundThrottler>) -> Self {
        Self { inner, throttler }
    }
}

#[async_trait]
impl PlatformPort for ThrottledPlatform {
    async fn fetch_administrators(&self, group: ChatId) -> Result<Vec<ChatMember>> {
        self.throttler
            .schedule(Route::for_chat(group), || {
                self.inner.fetch_administrators(group)
            })
            .await
    }

    async fn fetch_actor_profile(&self, actor: UserId) -> Result<ActorProfile> {
        self.throttler
            .schedule(Route::Private, || self.inner.fetch_actor_profile(actor))
            .await
    }

    async fn get_chat_info(&self, chat: ChatId) -> Result<ChatInfo> {
        self.throttler
            .schedule(Route::for_chat(chat), || self.inner.get_chat_info(chat))
            .await
    }

    async fn send_message(
        &self,
        destination: ChatId,
        text: &str,
        options: SendOptions,
    ) -> Result<MessageRef> {
        self.throttler
            .schedule(Route::for_chat(destination), || {
                self.inner.send_message(destination, text, options)
            })
            .await
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<()> {
        self.throttler
            .schedule(Route::for_chat(chat), || {
                self.inner.delete_message(chat, message)
            })
            .await
    }

    async fn ban_actor(&self, group: ChatId, actor: UserId) -> Result<()> {
        self.throttler
            .schedule(Route::for_chat(group), || self.inner.ban_actor(group, actor))
            .await
    }

    async fn unban_actor(&self, group: ChatId, actor: UserId) -> Result<()> {
        self.throttler
            .schedule(Route::for_chat(group), || {
                self.inner.unban_actor(group, actor)
            })
            .await
    }

    async fn restrict_actor(
        &self,
        group: ChatId,
        actor: UserId,
        permissions: Permissions,
    ) -> Result<()> {
        self.throttler
            .schedule(Route::for_chat(group), || {
                self.inner.restrict_actor(group, actor, permissions)
            })
            .await
    }
}
