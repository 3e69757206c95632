use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of target models processed per unit of work.
pub const DEFAULT_CHUNK_COUNT: usize = 200;

/// Default number of ledger rows retained per actionable model.
pub const DEFAULT_LEDGER_RETENTION_LIMIT: usize = 25;

pub const DEFAULT_NOT_AUTHORIZED_MESSAGE: &str =
    "Sorry! You are not authorized to perform this action.";

pub const DEFAULT_EXECUTED_MESSAGE: &str = "The action was executed successfully.";

/// Action pipeline configuration
///
/// Hosts usually embed this in their own settings file (it deserializes
/// with every field optional) or build it with the chained setters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Chunk size used when an action does not set its own
    pub chunk_count: usize,

    /// Ledger rows kept per (actionable_type, actionable_id)
    pub ledger_retention_limit: usize,

    /// Queue connection used when an action does not name one
    pub default_connection: String,

    /// Queue name used when an action does not name one
    pub default_queue: String,

    /// Attempts for queued actions without an explicit retry policy
    pub default_tries: u32,

    /// Delay before a failed queued action is retried
    #[serde(with = "duration_ms")]
    pub default_backoff: Duration,

    /// Danger message returned when no target was authorized
    pub not_authorized_message: String,

    /// Message returned when an action produced no reply of its own
    pub executed_message: String,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            chunk_count: DEFAULT_CHUNK_COUNT,
            ledger_retention_limit: DEFAULT_LEDGER_RETENTION_LIMIT,
            default_connection: "memory".to_string(),
            default_queue: "default".to_string(),
            default_tries: 1,
            default_backoff: Duration::ZERO,
            not_authorized_message: DEFAULT_NOT_AUTHORIZED_MESSAGE.to_string(),
            executed_message: DEFAULT_EXECUTED_MESSAGE.to_string(),
        }
    }
}

impl ActionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default chunk size
    pub fn chunk_count(mut self, count: usize) -> Self {
        self.chunk_count = count;
        self
    }

    /// Set the ledger retention limit (at least 1, so a batch keeps its own rows)
    pub fn ledger_retention_limit(mut self, limit: usize) -> Self {
        self.ledger_retention_limit = limit.max(1);
        self
    }

    /// Set the default queue connection
    pub fn default_connection(mut self, connection: &str) -> Self {
        self.default_connection = connection.to_string();
        self
    }

    /// Set the default queue name
    pub fn default_queue(mut self, queue: &str) -> Self {
        self.default_queue = queue.to_string();
        self
    }

    /// Set default attempts for queued actions
    pub fn default_tries(mut self, tries: u32) -> Self {
        self.default_tries = tries;
        self
    }

    /// Set default retry backoff
    pub fn default_backoff(mut self, backoff: Duration) -> Self {
        self.default_backoff = backoff;
        self
    }

    /// Override the "not authorized" danger message
    pub fn not_authorized_message(mut self, message: &str) -> Self {
        self.not_authorized_message = message.to_string();
        self
    }

    /// Override the default success message
    pub fn executed_message(mut self, message: &str) -> Self {
        self.executed_message = message.to_string();
        self
    }

    /// Build a configuration from `ACTIONS_*` environment variables
    ///
    /// Recognized: `ACTIONS_CHUNK_COUNT`, `ACTIONS_LEDGER_LIMIT`,
    /// `ACTIONS_QUEUE_CONNECTION`, `ACTIONS_QUEUE`.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ActionConfig::from_env`] with a caller supplied variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("ACTIONS_CHUNK_COUNT") {
            config.chunk_count = value
                .trim()
                .parse()
                .map_err(|_| format!("ACTIONS_CHUNK_COUNT must be an integer, got '{value}'"))?;
        }
        if let Some(value) = lookup("ACTIONS_LEDGER_LIMIT") {
            config.ledger_retention_limit = value
                .trim()
                .parse()
                .map_err(|_| format!("ACTIONS_LEDGER_LIMIT must be an integer, got '{value}'"))?;
        }
        if let Some(value) = lookup("ACTIONS_QUEUE_CONNECTION") {
            config.default_connection = value.trim().to_string();
        }
        if let Some(value) = lookup("ACTIONS_QUEUE") {
            config.default_queue = value.trim().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_count == 0 {
            return Err("chunk_count must be > 0".to_string());
        }

        if self.ledger_retention_limit == 0 {
            return Err("ledger_retention_limit must be > 0".to_string());
        }

        if self.default_tries == 0 {
            return Err("default_tries must be > 0".to_string());
        }

        if self.default_queue.is_empty() {
            return Err("default_queue cannot be empty".to_string());
        }

        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
