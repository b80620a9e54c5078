//! Recording platform double for tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    errors::Error,
    platform::{
        port::PlatformPort,
        types::{
            ActorProfile, ChatInfo, ChatKind, ChatMember, MemberRole, Permissions, SendOptions,
        },
    },
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    Admins(ChatId),
    Profile(UserId),
    ChatInfo(ChatId),
    Send {
        to: ChatId,
        text: String,
        options: SendOptions,
    },
    Delete {
        chat: ChatId,
        message: MessageId,
    },
    Ban {
        group: ChatId,
        actor: UserId,
    },
    Unban {
        group: ChatId,
        actor: UserId,
    },
    Restrict {
        group: ChatId,
        actor: UserId,
        permissions: Permissions,
    },
}

impl Call {
    fn op(&self) -> &'static str {
        match self {
            Call::Admins(_) => "fetch_administrators",
            Call::Profile(_) => "fetch_actor_profile",
            Call::ChatInfo(_) => "get_chat_info",
            Call::Send { .. } => "send_message",
            Call::Delete { .. } => "delete_message",
            Call::Ban { .. } => "ban_actor",
            Call::Unban { .. } => "unban_actor",
            Call::Restrict { .. } => "restrict_actor",
        }
    }
}

#[derive(Default)]
pub(crate) struct FakePlatform {
    calls: Mutex<Vec<Call>>,
    admins: Mutex<Vec<ChatMember>>,
    bios: Mutex<HashMap<UserId, String>>,
    titles: Mutex<HashMap<ChatId, String>>,
    next_errors: Mutex<VecDeque<Error>>,
    errors_at: Mutex<HashMap<usize, Error>>,
    broken_ops: Mutex<HashSet<&'static str>>,
    next_message_id: Mutex<i32>,
}

impl FakePlatform {
    pub(crate) fn with_admin(self, user: UserId, role: MemberRole) -> Self {
        self.admins.lock().unwrap().push(ChatMember { user, role });
        self
    }

    pub(crate) fn with_bio(self, user: UserId, bio: &str) -> Self {
        self.bios.lock().unwrap().insert(user, bio.to_string());
        self
    }

    pub(crate) fn with_title(self, chat: ChatId, title: &str) -> Self {
        self.titles.lock().unwrap().insert(chat, title.to_string());
        self
    }

    /// Fail the next call (of any kind) with `err`.
    pub(crate) fn fail_next(&self, err: Error) {
        self.next_errors.lock().unwrap().push_back(err);
    }

    /// Fail the `index`-th call (zero-based, counting every kind) with `err`.
    pub(crate) fn fail_on_call(&self, index: usize, err: Error) {
        self.errors_at.lock().unwrap().insert(index, err);
    }

    /// Reject every call of `op` with a fatal error.
    pub(crate) fn break_op(&self, op: &'static str) {
        self.broken_ops.lock().unwrap().insert(op);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that change the platform (everything except lookups).
    pub(crate) fn actions(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Admins(_) | Call::Profile(_) | Call::ChatInfo(_)))
            .collect()
    }

    pub(crate) fn sent_to(&self, chat: ChatId) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { to, text, .. } if to == chat => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) -> Result<()> {
        let op = call.op();
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(call);
            calls.len() - 1
        };
        if let Some(err) = self.errors_at.lock().unwrap().remove(&index) {
            return Err(err);
        }
        if let Some(err) = self.next_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        if self.broken_ops.lock().unwrap().contains(op) {
            return Err(Error::Fatal(format!("{op} is broken")));
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformPort for FakePlatform {
    async fn fetch_administrators(&self, group: ChatId) -> Result<Vec<ChatMember>> {
        self.record(Call::Admins(group))?;
        Ok(self.admins.lock().unwrap().clone())
    }

    async fn fetch_actor_profile(&self, actor: UserId) -> Result<ActorProfile> {
        self.record(Call::Profile(actor))?;
        Ok(ActorProfile {
            bio: self.bios.lock().unwrap().get(&actor).cloned(),
        })
    }

    async fn get_chat_info(&self, chat: ChatId) -> Result<ChatInfo> {
        self.record(Call::ChatInfo(chat))?;
        Ok(ChatInfo {
            id: chat,
            title: self.titles.lock().unwrap().get(&chat).cloned(),
            kind: if chat.is_group() {
                ChatKind::Supergroup
            } else {
                ChatKind::Private
            },
            username: None,
            invite_link: None,
            join_by_request: false,
        })
    }

    async fn send_message(
        &self,
        destination: ChatId,
        text: &str,
        options: SendOptions,
    ) -> Result<MessageRef> {
        self.record(Call::Send {
            to: destination,
            text: text.to_string(),
            options,
        })?;
        let mut next = self.next_message_id.lock().unwrap();
        *next += 1;
        Ok(MessageRef {
            chat_id: destination,
            message_id: MessageId(*next),
        })
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<()> {
        self.record(Call::Delete { chat, message })
    }

    async fn ban_actor(&self, group: ChatId, actor: UserId) -> Result<()> {
        self.record(Call::Ban { group, actor })
    }

    async fn unban_actor(&self, group: ChatId, actor: UserId) -> Result<()> {
        self.record(Call::Unban { group, actor })
    }

    async fn restrict_actor(
        &self,
        group: ChatId,
        actor: UserId,
        permissions: Permissions,
    ) -> Result<()> {
        self.record(Call::Restrict {
            group,
            actor,
            permissions,
        })
    }
}
