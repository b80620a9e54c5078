use crate::domain::{ChatId, MessageId, UserId};

/// Rights that matter for moderation and for changing group settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdminRights {
    pub can_change_info: bool,
    pub can_promote_members: bool,
    pub can_restrict_members: bool,
}

impl AdminRights {
    pub fn all() -> Self {
        Self {
            can_change_info: true,
            can_promote_members: true,
            can_restrict_members: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberRole {
    Creator,
    Administrator(AdminRights),
    Member,
}

impl MemberRole {
    /// Creators and administrators are never moderated.
    pub fn is_privileged(self) -> bool {
        !matches!(self, MemberRole::Member)
    }

    /// Allowed to change the punishment and the log destination.
    pub fn can_configure(self) -> bool {
        match self {
            MemberRole::Creator => true,
            MemberRole::Administrator(r) => {
                r.can_change_info && r.can_promote_members && r.can_restrict_members
            }
            MemberRole::Member => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChatMember {
    pub user: UserId,
    pub role: MemberRole,
}

/// Role of `user` in an administrator listing; absent means a plain member.
pub fn role_of(admins: &[ChatMember], user: UserId) -> MemberRole {
    admins
        .iter()
        .find(|m| m.user == user)
        .map(|m| m.role)
        .unwrap_or(MemberRole::Member)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActorProfile {
    pub bio: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: ChatId,
    pub title: Option<String>,
    pub kind: ChatKind,
    pub username: Option<String>,
    pub invite_link: Option<String>,
    pub join_by_request: bool,
}

impl ChatInfo {
    /// Placeholder used when the chat lookup fails.
    pub fn unknown(id: ChatId) -> Self {
        Self {
            id,
            title: None,
            kind: if id.is_group() {
                ChatKind::Supergroup
            } else {
                ChatKind::Private
            },
            username: None,
            invite_link: None,
            join_by_request: false,
        }
    }

    pub fn title_or_empty(&self) -> &str {
        self.title.as_deref().unwrap_or("")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParseMode {
    #[default]
    Plain,
    MarkdownV2,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub parse_mode: ParseMode,
    pub reply_to: Option<MessageId>,
}

impl SendOptions {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn markdown() -> Self {
        Self {
            parse_mode: ParseMode::MarkdownV2,
            reply_to: None,
        }
    }

    pub fn reply_to(mut self, message: MessageId) -> Self {
        self.reply_to = Some(message);
        self
    }
}

/// Member permissions applied by a restriction. Everything defaults to denied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Permissions {
    pub can_send_messages: bool,
    pub can_send_media: bool,
    pub can_send_other: bool,
    pub can_add_web_page_previews: bool,
}

impl Permissions {
    /// A mute: nothing may be posted.
    pub fn muted() -> Self {
        Self::default()
    }
}
