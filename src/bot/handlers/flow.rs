//! Диалоги пользователя и администратора.
//!
//! Контроллер не знает о транспорте: на каждое входящее событие он возвращает
//! список ответов, которые отправляет слой `shared`. Состояние между
//! сообщениями хранится в [`SessionStore`] и очищается при любом завершении
//! диалога.

use super::commands::BotCommand;
use super::format::{
    CAPTION_LIMIT, ERROR_BACKEND, ERROR_CREATING_KEY, ERROR_NO_SERVERS, MESSAGE_LIMIT,
    confirm_prompt_text, created_key_caption, help_text, key_block, key_caption, key_name,
    pack_blocks, profile_text, server_block, servers_text, user_block, utf16_len, welcome_text,
};
use super::session::{FlowState, Session, SessionStore};
use crate::api::{Backend, Key, NewKey, Server};
use crate::bot::keyboards::{
    ADMIN_BUTTONS, BTN_ADMIN_KEYS, BTN_ADMIN_SERVERS, BTN_ADMIN_USERS, BTN_BACK, BTN_CONFIRM,
    BTN_GET_VPN, BTN_HELP, BTN_MY_KEYS, BTN_PROFILE, BTN_SHOW_QR, Menu,
};
use crate::config::Config;
use crate::qr::build_qr_png_bytes;
use std::sync::Arc;

/// Отправитель события.
#[derive(Debug, Clone, PartialEq)]
pub struct Sender {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

impl Sender {
    #[cfg(test)]
    pub fn new(id: i64) -> Self {
        Self {
            id,
            username: None,
            first_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text {
        text: String,
        menu: Option<Menu>,
        html: bool,
    },
    /// Подпись всегда в HTML.
    Photo {
        png: Vec<u8>,
        file_name: String,
        caption: String,
        menu: Option<Menu>,
    },
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text {
            text: text.into(),
            menu: None,
            html: false,
        }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Reply::Text {
            text: text.into(),
            menu: None,
            html: true,
        }
    }

    pub fn with_menu(mut self, new_menu: Menu) -> Self {
        match &mut self {
            Reply::Text { menu, .. } | Reply::Photo { menu, .. } => *menu = Some(new_menu),
        }
        self
    }

    #[cfg(test)]
    pub fn menu(&self) -> Option<&Menu> {
        match self {
            Reply::Text { menu, .. } | Reply::Photo { menu, .. } => menu.as_ref(),
        }
    }
}

const CANCELLED_TEXT: &str = "Создание ключа отменено";
const ADMIN_PANEL_TEXT: &str = "👑 Админ-панель\n\nВыберите действие:";

fn admin_panel() -> Reply {
    Reply::text(ADMIN_PANEL_TEXT).with_menu(Menu::Admin)
}

fn backend_failure() -> Reply {
    Reply::text(ERROR_BACKEND).with_menu(Menu::Main)
}

pub struct Conversation<B> {
    backend: Arc<B>,
    config: Arc<Config>,
    sessions: SessionStore,
}

impl<B: Backend> Conversation<B> {
    pub fn new(backend: Arc<B>, config: Arc<Config>, sessions: SessionStore) -> Self {
        Self {
            backend,
            config,
            sessions,
        }
    }

    #[cfg(test)]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.config.is_admin(user_id)
    }

    /// Команда прерывает незавершённый диалог и выполняется с чистой сессией.
    pub async fn on_command(&self, sender: &Sender, command: BotCommand) -> Vec<Reply> {
        if command == BotCommand::Admin && !self.is_admin(sender.id) {
            return Vec::new();
        }

        let mut session = self.sessions.acquire(sender.id).await;
        if !session.is_idle() {
            tracing::debug!(
                user_id = sender.id,
                state = ?session.state,
                "Command abandons unfinished flow"
            );
            session.reset();
        }

        let replies = match command {
            BotCommand::Start => self.start(sender).await,
            BotCommand::Help => vec![self.help()],
            BotCommand::Profile => self.profile(sender.id).await,
            BotCommand::Vpn => self.vpn_overview(sender.id).await,
            BotCommand::Servers => self.servers().await,
            BotCommand::Admin => vec![admin_panel()],
        };

        self.sessions.release(sender.id, session).await;
        replies
    }

    /// Обычный текст: сначала шаг диалога, затем кнопки меню.
    pub async fn on_text(&self, sender: &Sender, text: &str) -> Vec<Reply> {
        let mut session = self.sessions.acquire(sender.id).await;
        let replies = match session.take() {
            FlowState::SelectingServer { servers } => {
                self.select_server(&mut session, servers, text)
            }
            FlowState::ConfirmingKey { server } => self.confirm_key(sender, server, text).await,
            FlowState::AwaitingKeyIdForRevocation => {
                if self.is_admin(sender.id) {
                    self.revoke_key(sender.id, text).await
                } else {
                    Vec::new()
                }
            }
            FlowState::Idle => self.route_idle_text(&mut session, sender, text).await,
        };
        self.sessions.release(sender.id, session).await;
        replies
    }

    async fn route_idle_text(
        &self,
        session: &mut Session,
        sender: &Sender,
        text: &str,
    ) -> Vec<Reply> {
        match text {
            BTN_GET_VPN => self.begin_key_creation(session).await,
            BTN_MY_KEYS | BTN_SHOW_QR => self.show_keys(sender.id).await,
            BTN_HELP => vec![self.help()],
            BTN_PROFILE => self.profile(sender.id).await,
            BTN_BACK => {
                vec![Reply::text("Вы вернулись в главное меню.").with_menu(Menu::Main)]
            }
            _ if ADMIN_BUTTONS.contains(&text) => {
                if !self.is_admin(sender.id) {
                    tracing::debug!(user_id = sender.id, "Ignoring admin button from non-admin");
                    return Vec::new();
                }
                self.route_admin_button(session, sender.id, text).await
            }
            _ => {
                let (reply_text, menu) = if self.is_admin(sender.id) {
                    (
                        "Не понял команду. Используйте кнопки админ-меню ниже.",
                        Menu::Admin,
                    )
                } else {
                    ("Не понял запрос. Используйте кнопки меню ниже.", Menu::Main)
                };
                vec![Reply::text(reply_text).with_menu(menu)]
            }
        }
    }

    async fn start(&self, sender: &Sender) -> Vec<Reply> {
        tracing::info!(
            user_id = sender.id,
            username = ?sender.username,
            "Received /start command"
        );
        if let Err(error) = self
            .backend
            .register_user(
                sender.id,
                sender.username.as_deref(),
                sender.first_name.as_deref(),
            )
            .await
        {
            tracing::error!(user_id = sender.id, error = %error, "Error registering user");
        }
        vec![Reply::text(welcome_text()).with_menu(Menu::Main)]
    }

    fn help(&self) -> Reply {
        Reply::html(help_text()).with_menu(Menu::Main)
    }

    async fn profile(&self, user_id: i64) -> Vec<Reply> {
        let keys = match self.backend.list_user_keys(user_id).await {
            Ok(keys) => keys,
            Err(error) => {
                tracing::error!(user_id, error = %error, "Error getting user keys");
                return vec![backend_failure()];
            }
        };
        if keys.is_empty() {
            return vec![
                Reply::text(
                    "У вас пока нет активных VPN ключей. Используйте /vpn для получения доступа.",
                )
                .with_menu(Menu::Main),
            ];
        }
        vec![Reply::text(profile_text(&keys)).with_menu(Menu::Main)]
    }

    async fn vpn_overview(&self, user_id: i64) -> Vec<Reply> {
        match self.backend.list_user_keys(user_id).await {
            Ok(keys) if keys.is_empty() => vec![
                Reply::text("У вас пока нет VPN ключей. Хотите создать новый?")
                    .with_menu(Menu::VpnNoKeys),
            ],
            Ok(keys) => vec![
                Reply::text(format!(
                    "У вас {} VPN ключ(ей). Что вы хотите сделать?",
                    keys.len()
                ))
                .with_menu(Menu::VpnHasKeys),
            ],
            Err(error) => {
                tracing::error!(user_id, error = %error, "Error getting user keys");
                vec![backend_failure()]
            }
        }
    }

    async fn servers(&self) -> Vec<Reply> {
        match self.backend.list_active_servers().await {
            Ok(servers) if servers.is_empty() => {
                vec![Reply::text("В настоящее время нет доступных серверов.")]
            }
            Ok(servers) => vec![Reply::text(servers_text(&servers)).with_menu(Menu::Main)],
            Err(error) => {
                tracing::error!(error = %error, "Error getting servers");
                vec![backend_failure()]
            }
        }
    }

    /// QR на каждый активный ключ пользователя.
    async fn show_keys(&self, user_id: i64) -> Vec<Reply> {
        let keys = match self.backend.list_user_keys(user_id).await {
            Ok(keys) => keys,
            Err(error) => {
                tracing::error!(user_id, error = %error, "Error getting user keys");
                return vec![backend_failure()];
            }
        };
        if keys.is_empty() {
            return vec![
                Reply::text("У вас пока нет VPN ключей. Хотите создать новый?")
                    .with_menu(Menu::VpnNoKeys),
            ];
        }

        let mut replies: Vec<Reply> = keys
            .iter()
            .filter(|key| key.is_active)
            .map(|key| key_reply(key, key_caption(key)))
            .collect();
        replies.push(Reply::text("Выберите действие:").with_menu(Menu::VpnHasKeys));
        replies
    }

    async fn begin_key_creation(&self, session: &mut Session) -> Vec<Reply> {
        let servers = match self.backend.list_active_servers().await {
            Ok(servers) => servers,
            Err(error) => {
                tracing::error!(error = %error, "Error getting servers");
                return vec![backend_failure()];
            }
        };
        if servers.is_empty() {
            return vec![Reply::text(ERROR_NO_SERVERS)];
        }

        let picker = server_picker(&servers);
        session.state = FlowState::SelectingServer { servers };
        vec![Reply::text("Выберите сервер для создания VPN ключа:").with_menu(picker)]
    }

    fn select_server(&self, session: &mut Session, servers: Vec<Server>, text: &str) -> Vec<Reply> {
        let Some(server) = servers.iter().find(|server| server.name == text).cloned() else {
            let picker = server_picker(&servers);
            session.state = FlowState::SelectingServer { servers };
            return vec![Reply::text("Пожалуйста, выберите сервер из списка").with_menu(picker)];
        };

        let prompt = confirm_prompt_text(&server, &self.config.keys);
        session.state = FlowState::ConfirmingKey { server };
        vec![Reply::text(prompt).with_menu(Menu::Confirm)]
    }

    async fn confirm_key(&self, sender: &Sender, server: Server, text: &str) -> Vec<Reply> {
        if text != BTN_CONFIRM {
            return vec![Reply::text(CANCELLED_TEXT).with_menu(Menu::Main)];
        }

        let defaults = &self.config.keys;
        let request = NewKey {
            telegram_id: sender.id,
            server_id: server.id,
            name: key_name(sender.id, &server.name),
            traffic_limit_gb: defaults.default_traffic_limit_gb,
            expiration_days: defaults.default_expiration_days,
        };
        tracing::info!(
            user_id = sender.id,
            server_id = server.id,
            key_name = %request.name,
            "Creating VPN key"
        );

        let key = match self.backend.create_key(&request).await {
            Ok(key) => key,
            Err(error) => {
                tracing::error!(
                    user_id = sender.id,
                    server_id = server.id,
                    error = %error,
                    "Error creating VPN key"
                );
                return vec![Reply::text(ERROR_CREATING_KEY).with_menu(Menu::Main)];
            }
        };

        let caption = created_key_caption(&server, &key, defaults);
        vec![key_reply(&key, caption).with_menu(Menu::Main)]
    }

    async fn route_admin_button(
        &self,
        session: &mut Session,
        admin_id: i64,
        text: &str,
    ) -> Vec<Reply> {
        tracing::info!(admin_id, button = text, "Admin menu action");
        match text {
            BTN_ADMIN_USERS => {
                let users = self.backend.list_all_users().await;
                self.admin_listing(
                    users.map(|users| users.iter().map(user_block).collect()),
                    "👥 Список пользователей:",
                    "Пользователей не найдено",
                )
            }
            BTN_ADMIN_SERVERS => {
                let servers = self.backend.list_all_servers().await;
                self.admin_listing(
                    servers.map(|servers| servers.iter().map(server_block).collect()),
                    "🖥️ Список серверов:",
                    "Серверы не найдены",
                )
            }
            BTN_ADMIN_KEYS => {
                let keys = self.backend.list_all_keys().await;
                self.admin_listing(
                    keys.map(|keys| keys.iter().map(key_block).collect()),
                    "🔑 Список ключей:",
                    "Ключи не найдены",
                )
            }
            _ => {
                session.state = FlowState::AwaitingKeyIdForRevocation;
                vec![Reply::text("Введите ID ключа для отзыва:")]
            }
        }
    }

    fn admin_listing(
        &self,
        blocks: Result<Vec<String>, crate::api::ApiError>,
        header: &str,
        empty_text: &str,
    ) -> Vec<Reply> {
        match blocks {
            Ok(blocks) if blocks.is_empty() => vec![Reply::text(empty_text)],
            Ok(blocks) => pack_blocks(header, &blocks, MESSAGE_LIMIT)
                .into_iter()
                .map(Reply::text)
                .collect(),
            Err(error) => {
                tracing::error!(error = %error, listing = header, "Admin listing failed");
                vec![Reply::text(ERROR_BACKEND)]
            }
        }
    }

    /// Любой исход возвращает админа в панель, в том числе некорректный ввод.
    async fn revoke_key(&self, admin_id: i64, text: &str) -> Vec<Reply> {
        let outcome = match text.trim().parse::<i64>() {
            Ok(key_id) => {
                tracing::info!(admin_id, key_id, "Revoking key");
                if self.backend.revoke_key(key_id).await {
                    format!("✅ Ключ с ID {} успешно отозван", key_id)
                } else {
                    format!("❌ Не удалось отозвать ключ с ID {}", key_id)
                }
            }
            Err(_) => "❌ Некорректный ID ключа. Введите число.".to_string(),
        };
        vec![Reply::text(outcome), admin_panel()]
    }
}

/// QR ключа с подписью; если подпись не влезает в фото или QR не строится, ответ уходит текстом.
fn key_reply(key: &Key, caption: String) -> Reply {
    if utf16_len(&caption) > CAPTION_LIMIT {
        tracing::warn!(
            key_id = key.id,
            caption_len = utf16_len(&caption),
            "Key caption too long for a photo, sending text"
        );
        return Reply::html(caption);
    }
    match build_qr_png_bytes(&key.access_url) {
        Ok(png) => Reply::Photo {
            png,
            file_name: format!("vpn-key-{}.png", key.id),
            caption,
            menu: None,
        },
        Err(error) => {
            tracing::warn!(key_id = key.id, error = %error, "Failed to render key QR");
            Reply::html(format!("{caption}\n\n⚠️ QR-код сформировать не удалось."))
        }
    }
}

fn server_picker(servers: &[Server]) -> Menu {
    Menu::ServerPicker(servers.iter().map(|server| server.name.clone()).collect())
}
