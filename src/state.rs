use std::sync::Arc;

use thiserror::Error;

use crate::conversation::ConversationService;
use crate::group::GroupService;
use crate::message::{HistoryLimits, MessageService};
use crate::notification::SystemNotifier;
use crate::store::{ConversationStore, MessageStore};
use crate::user::UserDirectory;
use crate::websocket::ConnectionManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub users: Arc<dyn UserDirectory>,
    pub connections: ConnectionManager,
    pub conversation_service: ConversationService,
    pub group_service: GroupService,
    pub message_service: MessageService,
    pub system_notifier: SystemNotifier,
}

impl AppState {
    /// Wires services around store handles built once at startup.
    pub fn new(
        config: Arc<Config>,
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        let connections = ConnectionManager::new();

        let conversation_service =
            ConversationService::new(conversations.clone(), users.clone(), connections.clone());
        let group_service = GroupService::new(conversations.clone(), users.clone());
        let message_service = MessageService::new(
            conversations,
            messages,
            users.clone(),
            connections.clone(),
            config.history_limits(),
        );
        let system_notifier = SystemNotifier::new(message_service.clone(), users.clone(), connections.clone());

        Self {
            config,
            users,
            connections,
            conversation_service,
            group_service,
            message_service,
            system_notifier,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub storage_backend: StorageBackend,
    pub cors_allowed_origins: Vec<String>,
    pub history_default_limit: usize,
    pub history_max_limit: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let database_url = lookup("DATABASE_URL").filter(|s| !s.is_empty());

        let storage_backend = match lookup("STORAGE_BACKEND").as_deref() {
            Some("postgres") => StorageBackend::Postgres,
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE_BACKEND",
                    value: other.to_string(),
                })
            }
            None if database_url.is_some() => StorageBackend::Postgres,
            None => StorageBackend::Memory,
        };
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let history_default_limit = parse_or(&lookup, "HISTORY_DEFAULT_LIMIT", 50)?;
        let history_max_limit = parse_or(&lookup, "HISTORY_MAX_LIMIT", 100)?;
        if history_default_limit == 0 || history_default_limit > history_max_limit {
            return Err(ConfigError::Invalid {
                key: "HISTORY_DEFAULT_LIMIT",
                value: history_default_limit.to_string(),
            });
        }

        Ok(Self {
            jwt_secret,
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&lookup, "PORT", 3000)?,
            database_url,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            storage_backend,
            cors_allowed_origins: lookup("CORS_ALLOWED_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]),
            history_default_limit,
            history_max_limit,
        })
    }

    pub fn history_limits(&self) -> HistoryLimits {
        HistoryLimits {
            default_limit: self.history_default_limit,
            max_limit: self.history_max_limit,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}
