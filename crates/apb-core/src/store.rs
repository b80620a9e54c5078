//! Session store adapter.
//!
//! The backing store is an opaque async key-value map keyed by
//! `(record kind, group)`. No transactional semantics are assumed: callers
//! serialize access per group with the key-based serializer.

use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::{Arc, Mutex as StdMutex},
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

use crate::{
    domain::ChatId,
    errors::Error,
    session::{GroupConfig, GroupSession, GroupUserState, PunishmentPolicy},
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Users,
    Config,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Config => "config",
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, kind: RecordKind, group: ChatId) -> Result<Option<serde_json::Value>>;
    async fn save(&self, kind: RecordKind, group: ChatId, record: serde_json::Value)
        -> Result<()>;
    /// Every group with at least one stored record.
    async fn groups(&self) -> Result<Vec<ChatId>>;
}

/// Process-lifetime store.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(RecordKind, ChatId), serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self, kind: RecordKind, group: ChatId) -> Result<Option<serde_json::Value>> {
        Ok(self.records.lock().await.get(&(kind, group)).cloned())
    }

    async fn save(
        &self,
        kind: RecordKind,
        group: ChatId,
        record: serde_json::Value,
    ) -> Result<()> {
        self.records.lock().await.insert((kind, group), record);
        Ok(())
    }

    async fn groups(&self) -> Result<Vec<ChatId>> {
        let map = self.records.lock().await;
        let set: BTreeSet<ChatId> = map.keys().map(|(_, g)| *g).collect();
        Ok(set.into_iter().collect())
    }
}

/// One JSON document per record under `<root>/<kind>/<group>.json`.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, kind: RecordKind, group: ChatId) -> PathBuf {
        self.root.join(kind.as_str()).join(format!("{}.json", group.0))
    }

    fn storage_err(path: &Path, reason: impl ToString) -> Error {
        Error::Storage {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn load(&self, kind: RecordKind, group: ChatId) -> Result<Option<serde_json::Value>> {
        let path = self.record_path(kind, group);
        let txt = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::storage_err(&path, e)),
        };
        serde_json::from_str(&txt)
            .map(Some)
            .map_err(|e| Self::storage_err(&path, e))
    }

    async fn save(
        &self,
        kind: RecordKind,
        group: ChatId,
        record: serde_json::Value,
    ) -> Result<()> {
        let path = self.record_path(kind, group);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Self::storage_err(dir, e))?;
        }

        // Write-then-rename so a crash never leaves a half-written record.
        let tmp = path.with_extension("json.tmp");
        let txt = serde_json::to_string_pretty(&record)?;
        tokio::fs::write(&tmp, txt)
            .await
            .map_err(|e| Self::storage_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Self::storage_err(&path, e))
    }

    async fn groups(&self) -> Result<Vec<ChatId>> {
        let mut set = BTreeSet::new();
        for kind in [RecordKind::Users, RecordKind::Config] {
            let dir = self.root.join(kind.as_str());
            let mut rd = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Self::storage_err(&dir, e)),
            };
            while let Some(ent) = rd
                .next_entry()
                .await
                .map_err(|e| Self::storage_err(&dir, e))?
            {
                let name = ent.file_name().to_string_lossy().to_string();
                if let Some(id) = name
                    .strip_suffix(".json")
                    .and_then(|stem| stem.parse::<i64>().ok())
                {
                    set.insert(ChatId(id));
                }
            }
        }
        Ok(set.into_iter().collect())
    }
}

/// Defaults applied when a group has no stored record yet.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionDefaults {
    pub log_destination: Option<ChatId>,
    pub punishment: PunishmentPolicy,
}

/// Records whose last save failed, keyed by group.
///
/// They stay authoritative for this process and are written again on the
/// group's next save.
#[derive(Debug, Default)]
struct Unsaved {
    users: HashMap<ChatId, GroupUserState>,
    config: HashMap<ChatId, GroupConfig>,
}

/// Typed view over a [`SessionStore`].
#[derive(Clone)]
pub struct Sessions {
    store: Arc<dyn SessionStore>,
    defaults: SessionDefaults,
    unsaved: Arc<StdMutex<Unsaved>>,
}

impl Sessions {
    pub fn new(store: Arc<dyn SessionStore>, defaults: SessionDefaults) -> Self {
        Self {
            store,
            defaults,
            unsaved: Arc::new(StdMutex::new(Unsaved::default())),
        }
    }

    fn unsaved(&self) -> std::sync::MutexGuard<'_, Unsaved> {
        self.unsaved.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Groups with changes that have not reached the store yet.
    pub fn unsaved_groups(&self) -> Vec<ChatId> {
        let u = self.unsaved();
        let set: BTreeSet<ChatId> = u.users.keys().chain(u.config.keys()).copied().collect();
        set.into_iter().collect()
    }

    /// Load both records for `group`, falling back to defaults for missing ones.
    pub async fn load(&self, group: ChatId) -> Result<GroupSession> {
        let (users, config) = {
            let u = self.unsaved();
            (u.users.get(&group).cloned(), u.config.get(&group).cloned())
        };
        let users = match users {
            Some(users) => users,
            None => self
                .load_record(RecordKind::Users, group)
                .await?
                .unwrap_or_else(|| {
                    GroupUserState::with_log_destination(self.defaults.log_destination)
                }),
        };
        let config = match config {
            Some(config) => config,
            None => self
                .load_record(RecordKind::Config, group)
                .await?
                .unwrap_or_else(|| GroupConfig::with_punishment(self.defaults.punishment)),
        };
        Ok(GroupSession {
            group,
            users,
            config,
        })
    }

    /// Persist whichever records differ from `before` (or failed to save earlier).
    ///
    /// Both records are attempted; the first failure is returned. A record
    /// that fails to save is kept in memory and served by [`Sessions::load`].
    pub async fn save_changes(&self, before: &GroupSession, after: &GroupSession) -> Result<()> {
        let group = after.group;
        let (users_pending, config_pending) = {
            let u = self.unsaved();
            (u.users.contains_key(&group), u.config.contains_key(&group))
        };
        let mut first_err = None;

        if users_pending || before.users != after.users {
            let res = self.save_record(RecordKind::Users, group, &after.users).await;
            let mut u = self.unsaved();
            match res {
                Ok(()) => {
                    u.users.remove(&group);
                }
                Err(e) => {
                    u.users.insert(group, after.users.clone());
                    first_err.get_or_insert(e);
                }
            }
        }
        if config_pending || before.config != after.config {
            let res = self.save_record(RecordKind::Config, group, &after.config).await;
            let mut u = self.unsaved();
            match res {
                Ok(()) => {
                    u.config.remove(&group);
                }
                Err(e) => {
                    u.config.insert(group, after.config.clone());
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn groups(&self) -> Result<Vec<ChatId>> {
        let mut set: BTreeSet<ChatId> = self.store.groups().await?.into_iter().collect();
        set.extend(self.unsaved_groups());
        Ok(set.into_iter().collect())
    }

    async fn load_record<T: DeserializeOwned>(
        &self,
        kind: RecordKind,
        group: ChatId,
    ) -> Result<Option<T>> {
        let Some(raw) = self.store.load(kind, group).await? else {
            return Ok(None);
        };
        serde_json::from_value(raw).map(Some).map_err(|e| Error::Storage {
            path: PathBuf::from(format!("{}/{}", kind.as_str(), group.0)),
            reason: format!("malformed record: {e}"),
        })
    }

    async fn save_record<T: Serialize>(
        &self,
        kind: RecordKind,
        group: ChatId,
        record: &T,
    ) -> Result<()> {
        let raw = serde_json::to_value(record)?;
        self.store.save(kind, group, raw).await
    }
}
