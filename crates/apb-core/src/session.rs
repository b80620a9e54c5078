//! Per-group session records.
//!
//! Two record kinds live side by side for every group: the member lists
//! (`GroupUserState`) and the moderation settings (`GroupConfig`). Both are
//! owned by the session store; the pipeline only holds a copy while the
//! group's serializer lock is held.

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChatId, UserId},
    errors::Error,
};

/// What happens to an actor once a violation is confirmed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunishmentPolicy {
    None,
    #[default]
    Warn,
    Mute,
    Kick,
    Ban,
}

impl PunishmentPolicy {
    pub const ALL: [PunishmentPolicy; 5] = [
        PunishmentPolicy::None,
        PunishmentPolicy::Warn,
        PunishmentPolicy::Mute,
        PunishmentPolicy::Kick,
        PunishmentPolicy::Ban,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Warn => "warn",
            Self::Mute => "mute",
            Self::Kick => "kick",
            Self::Ban => "ban",
        }
    }
}

impl fmt::Display for PunishmentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PunishmentPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| Error::Config(format!("unknown punishment: {s:?}")))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarnEntry {
    pub actor: UserId,
    pub count: u32,
    pub warned_at: DateTime<Utc>,
}

/// Member lists and log routing for one group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupUserState {
    /// Actors exempt from moderation.
    pub exception_list: BTreeSet<UserId>,
    /// Informational only; nothing increments it yet.
    pub warn_list: Vec<WarnEntry>,
    /// Audit destination. `None` (or chat 0 in old records) disables audit lines.
    pub log_destination: Option<ChatId>,
}

impl GroupUserState {
    pub fn with_log_destination(log_destination: Option<ChatId>) -> Self {
        Self {
            log_destination: log_destination.filter(|c| c.0 != 0),
            ..Self::default()
        }
    }

    pub fn is_exempt(&self, actor: UserId) -> bool {
        self.exception_list.contains(&actor)
    }

    /// Returns `true` if the actor was not exempt before.
    pub fn exempt(&mut self, actor: UserId) -> bool {
        self.exception_list.insert(actor)
    }

    /// Returns `true` if the actor was exempt before.
    pub fn unexempt(&mut self, actor: UserId) -> bool {
        self.exception_list.remove(&actor)
    }

    pub fn log_destination(&self) -> Option<ChatId> {
        self.log_destination.filter(|c| c.0 != 0)
    }
}

/// Moderation settings for one group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub punishment: PunishmentPolicy,
    /// One-shot: set the first time the bot announces having joined the group.
    pub has_announced_join: bool,
}

impl GroupConfig {
    pub fn with_punishment(punishment: PunishmentPolicy) -> Self {
        Self {
            punishment,
            has_announced_join: false,
        }
    }
}

/// Lock-scoped working copy of both records for one group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupSession {
    pub group: ChatId,
    pub users: GroupUserState,
    pub config: GroupConfig,
}
