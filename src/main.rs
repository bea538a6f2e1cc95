//! outline-vpn-bot — Telegram-бот для выдачи ключей VPN через backend-сервис.

mod api;
mod bot;
mod config;
mod qr;

use bot::handlers::{BotCommand, BotState, Conversation, SessionStore};
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::dispatching::Dispatcher;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/outline-vpn-bot.toml"));
    let config = Arc::new(config::Config::load(&config_path)?);
    init_tracing(&config.log_level);

    tracing::info!(
        config_path = %config_path.display(),
        "Starting outline-vpn-bot"
    );
    let token = config.bot_token()?;
    tracing::info!(
        admin_count = config.admin_ids.len(),
        backend_url = %config.backend.base_url,
        backend_auth = config.basic_auth().is_some(),
        default_traffic_limit_gb = config.keys.default_traffic_limit_gb,
        default_expiration_days = config.keys.default_expiration_days,
        session_ttl_secs = config.session_ttl_secs,
        "Configuration loaded"
    );

    let backend = Arc::new(api::HttpBackend::new(&config)?);
    let conversation = Conversation::new(
        backend,
        config.clone(),
        SessionStore::new(config.session_ttl()),
    );

    let bot = Bot::new(token);
    if let Err(error) = bot.set_my_commands(BotCommand::bot_commands()).await {
        tracing::warn!(
            error = %error,
            "Не удалось зарегистрировать список команд бота"
        );
    }

    let state = BotState {
        conversation: Arc::new(conversation),
    };
    tracing::info!("Dispatcher initialized, bot is ready");

    Dispatcher::builder(bot, bot::handlers::schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::info!("Bot stopped");
    Ok(())
}
