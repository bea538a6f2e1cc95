//! Конфигурация бота: TOML-файл с токеном, списком админов и параметрами backend.

use anyhow::{Context, anyhow};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const TOKEN_ENV_VARS: [&str; 2] = ["BOT_TOKEN", "TELOXIDE_TOKEN"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub admin_ids: Vec<i64>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Незавершённый диалог без новых сообщений дольше этого срока сбрасывается.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    pub backend: BackendConfig,
    #[serde(default)]
    pub keys: KeyDefaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Таймаут HTTP-запроса; без значения действует умолчание reqwest.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Параметры новых ключей.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyDefaults {
    /// 0 — без ограничения трафика.
    #[serde(default = "default_traffic_limit_gb")]
    pub default_traffic_limit_gb: u64,
    #[serde(default = "default_expiration_days")]
    pub default_expiration_days: u32,
}

impl Default for KeyDefaults {
    fn default() -> Self {
        Self {
            default_traffic_limit_gb: default_traffic_limit_gb(),
            default_expiration_days: default_expiration_days(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_session_ttl_secs() -> u64 {
    30 * 60
}

fn default_traffic_limit_gb() -> u64 {
    50
}

fn default_expiration_days() -> u32 {
    30
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Не удалось прочитать конфиг {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Некорректный конфиг {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self, anyhow::Error> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.backend.base_url.trim().is_empty() {
            return Err(anyhow!("backend.base_url не может быть пустым"));
        }
        if self.session_ttl_secs == 0 {
            return Err(anyhow!("session_ttl_secs должен быть >= 1"));
        }
        if self.keys.default_expiration_days == 0 {
            return Err(anyhow!("keys.default_expiration_days должен быть >= 1"));
        }
        Ok(())
    }

    /// Токен из файла, иначе из переменных окружения.
    pub fn bot_token(&self) -> Result<String, anyhow::Error> {
        if let Some(token) = self.bot_token.as_deref().map(str::trim)
            && !token.is_empty()
        {
            return Ok(token.to_string());
        }
        TOKEN_ENV_VARS
            .iter()
            .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                anyhow!("Токен бота не задан: укажите bot_token в конфиге или BOT_TOKEN в окружении")
            })
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        match (
            self.backend.username.as_deref(),
            self.backend.password.as_deref(),
        ) {
            (Some(user), Some(password)) if !user.is_empty() => Some((user, password)),
            _ => None,
        }
    }
}
