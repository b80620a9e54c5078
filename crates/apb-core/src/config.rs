use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    domain::{ChatId, UserId},
    errors::Error,
    retry::RetryPolicy,
    session::PunishmentPolicy,
    store::SessionDefaults,
    throttle::{BucketConfig, ThrottleConfig},
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    /// One JSON file per record under this directory.
    File(PathBuf),
}

/// Typed configuration, read from the environment (and `.env` if present).
#[derive(Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    /// Operator allowed to run `/ban`, `/kick` and `/mute` against any chat.
    pub owner_id: Option<UserId>,

    // New groups
    pub default_log_chat: Option<ChatId>,
    pub default_punishment: PunishmentPolicy,
    pub announce_chat: Option<ChatId>,

    pub storage: StorageBackend,

    // Inbound admission
    pub admission_limit: u32,
    pub admission_window: Duration,

    // Outbound
    pub retry: RetryPolicy,
    pub throttle: ThrottleConfig,

    pub shutdown_grace: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("telegram_bot_token", &"<redacted>")
            .field("owner_id", &self.owner_id)
            .field("default_log_chat", &self.default_log_chat)
            .field("default_punishment", &self.default_punishment)
            .field("announce_chat", &self.announce_chat)
            .field("storage", &self.storage)
            .field("admission_limit", &self.admission_limit)
            .field("admission_window", &self.admission_window)
            .field("retry", &self.retry)
            .field("throttle", &self.throttle)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup (the process environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Env(&lookup);

        let telegram_bot_token = vars.str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let owner_id = vars.i64("OWNER_ID")?.map(UserId);
        let default_log_chat = vars.chat("DEFAULT_LOG_CHAT_ID")?.filter(|c| c.0 != 0);
        let announce_chat = vars.chat("ANNOUNCE_CHAT_ID")?.filter(|c| c.0 != 0);
        let default_punishment = match vars.str("DEFAULT_PUNISHMENT") {
            Some(raw) => raw.parse()?,
            None => PunishmentPolicy::default(),
        };

        let storage = match vars.str("STORAGE").as_deref().map(str::trim) {
            None | Some("") | Some("file") => StorageBackend::File(
                vars.str("SESSION_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/sessions")),
            ),
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(Error::Config(format!(
                    "STORAGE must be \"memory\" or \"file\", got {other:?}"
                )))
            }
        };

        let admission_limit = vars.u32("ADMISSION_LIMIT")?.unwrap_or(58);
        let admission_window = vars.millis("ADMISSION_WINDOW_MS")?.unwrap_or(Duration::from_millis(2000));

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: vars.u32("RETRY_MAX_ATTEMPTS")?.unwrap_or(retry_defaults.max_attempts),
            max_delay: vars.millis("RETRY_MAX_DELAY_MS")?.unwrap_or(retry_defaults.max_delay),
            base_delay: vars.millis("RETRY_BASE_DELAY_MS")?.unwrap_or(retry_defaults.base_delay),
        };

        let throttle = ThrottleConfig {
            global: vars.bucket("GLOBAL", BucketConfig::global_default())?,
            group: vars.bucket("GROUP", BucketConfig::group_default())?,
            private: vars.bucket("PRIVATE", BucketConfig::private_default())?,
        };

        let shutdown_grace = vars.millis("SHUTDOWN_GRACE_MS")?.unwrap_or(Duration::from_secs(10));

        if admission_limit == 0 {
            return Err(Error::Config("ADMISSION_LIMIT must be at least 1".to_string()));
        }

        Ok(Self {
            telegram_bot_token,
            owner_id,
            default_log_chat,
            default_punishment,
            announce_chat,
            storage,
            admission_limit,
            admission_window,
            retry,
            throttle,
            shutdown_grace,
        })
    }

    pub fn session_defaults(&self) -> SessionDefaults {
        SessionDefaults {
            log_destination: self.default_log_chat,
            punishment: self.default_punishment,
        }
    }
}

/// Typed accessors over a key lookup. Unset or blank keys read as `None`;
/// set but unparsable ones are errors.
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn str(&self, key: &str) -> Option<String> {
        (self.0)(key).and_then(non_empty)
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.str(key) else {
            return Ok(None);
        };
        raw.trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw:?}")))
    }

    fn i64(&self, key: &str) -> Result<Option<i64>> {
        self.parsed(key)
    }

    fn u32(&self, key: &str) -> Result<Option<u32>> {
        self.parsed(key)
    }

    fn usize(&self, key: &str) -> Result<Option<usize>> {
        self.parsed(key)
    }

    fn millis(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.parsed::<u64>(key)?.map(Duration::from_millis))
    }

    fn chat(&self, key: &str) -> Result<Option<ChatId>> {
        let Some(raw) = self.str(key) else {
            return Ok(None);
        };
        ChatId::from_operator_input(&raw)
            .map(Some)
            .ok_or_else(|| Error::Config(format!("{key} is not a chat id: {raw:?}")))
    }

    /// `THROTTLE_<CLASS>_*` overrides on top of `base`.
    fn bucket(&self, class: &str, base: BucketConfig) -> Result<BucketConfig> {
        let key = |field: &str| format!("THROTTLE_{class}_{field}");
        let cfg = BucketConfig {
            capacity: self.u32(&key("CAPACITY"))?.unwrap_or(base.capacity),
            refill_amount: self.u32(&key("REFILL_AMOUNT"))?.unwrap_or(base.refill_amount),
            refill_interval: self
                .millis(&key("REFILL_INTERVAL_MS"))?
                .unwrap_or(base.refill_interval),
            min_spacing: self.millis(&key("MIN_SPACING_MS"))?.unwrap_or(base.min_spacing),
            high_water: self.usize(&key("HIGH_WATER"))?.unwrap_or(base.high_water),
            penalty: self.millis(&key("PENALTY_MS"))?.unwrap_or(base.penalty),
            max_concurrent: self
                .usize(&key("MAX_CONCURRENT"))?
                .unwrap_or(base.max_concurrent),
        };
        if cfg.capacity == 0 || cfg.refill_amount == 0 || cfg.max_concurrent == 0 {
            return Err(Error::Config(format!(
                "THROTTLE_{class}: capacity, refill amount and concurrency must be positive"
            )));
        }
        if cfg.refill_interval.is_zero() {
            return Err(Error::Config(format!(
                "THROTTLE_{class}_REFILL_INTERVAL_MS must be positive"
            )));
        }
        Ok(cfg)
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn token_is_required() {
        assert!(matches!(load(&[]), Err(Error::Config(_))));
        assert!(matches!(
            load(&[("TELEGRAM_BOT_TOKEN", "  ")]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn defaults_match_deployment() {
        let cfg = load(&[("TELEGRAM_BOT_TOKEN", "t")]).unwrap();
        assert_eq!(cfg.default_punishment, PunishmentPolicy::Warn);
        assert_eq!(
            cfg.storage,
            StorageBackend::File(PathBuf::from("./data/sessions"))
        );
        assert_eq!(cfg.admission_limit, 58);
        assert_eq!(cfg.admission_window, Duration::from_millis(2000));
        assert_eq!(cfg.retry, RetryPolicy::default());
        assert_eq!(cfg.throttle, ThrottleConfig::default());
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(10));
        assert_eq!(cfg.owner_id, None);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = load(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("OWNER_ID", "1632101837"),
            ("DEFAULT_LOG_CHAT_ID", "2236576514"),
            ("DEFAULT_PUNISHMENT", "Kick"),
            ("STORAGE", "memory"),
            ("THROTTLE_GROUP_CAPACITY", "20"),
            ("THROTTLE_PRIVATE_MIN_SPACING_MS", "0"),
            ("RETRY_MAX_ATTEMPTS", "3"),
        ])
        .unwrap();
        assert_eq!(cfg.owner_id, Some(UserId(1632101837)));
        assert_eq!(cfg.default_log_chat, Some(ChatId(-1002236576514)));
        assert_eq!(cfg.default_punishment, PunishmentPolicy::Kick);
        assert_eq!(cfg.storage, StorageBackend::Memory);
        assert_eq!(cfg.throttle.group.capacity, 20);
        assert_eq!(cfg.throttle.group.refill_amount, 58);
        assert_eq!(cfg.throttle.private.min_spacing, Duration::ZERO);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.session_defaults().punishment, PunishmentPolicy::Kick);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (k, v) in [
            ("DEFAULT_PUNISHMENT", "shoot"),
            ("STORAGE", "redis"),
            ("ADMISSION_LIMIT", "lots"),
            ("ADMISSION_LIMIT", "0"),
            ("THROTTLE_GLOBAL_REFILL_INTERVAL_MS", "0"),
            ("ANNOUNCE_CHAT_ID", "group"),
        ] {
            let res = load(&[("TELEGRAM_BOT_TOKEN", "t"), (k, v)]);
            assert!(matches!(res, Err(Error::Config(_))), "{k}={v}");
        }
    }

    #[test]
    fn debug_output_hides_the_token() {
        let cfg = load(&[("TELEGRAM_BOT_TOKEN", "123:secret")]).unwrap();
        assert!(!format!("{cfg:?}").contains("secret"));
    }
}
