use crate::api::{Key, Server, User, bytes_to_gb};
use crate::config::KeyDefaults;
use chrono::DateTime;
use teloxide::utils::html::escape;

/// Длина сообщения в UTF-16 единицах, с запасом до лимита Telegram в 4096.
pub const MESSAGE_LIMIT: usize = 4000;
/// Лимит подписи к фото.
pub const CAPTION_LIMIT: usize = 1024;

pub const UNLIMITED_TRAFFIC: &str = "Безлимитно";
pub const UNLIMITED_EXPIRATION: &str = "Бессрочно";

pub const ERROR_NO_SERVERS: &str =
    "В настоящее время нет доступных серверов. Пожалуйста, попробуйте позже.";
pub const ERROR_CREATING_KEY: &str =
    "❌ Ошибка при создании VPN ключа. Пожалуйста, попробуйте еще раз позже.";
pub const ERROR_BACKEND: &str = "❌ Сервис временно недоступен. Пожалуйста, попробуйте позже.";

pub fn welcome_text() -> &'static str {
    r#"🌐 Добро пожаловать в VPN Bot! 🌐

Этот бот поможет вам получить доступ к VPN-сервису.
Нажмите "Получить VPN" для начала работы."#
}

pub fn help_text() -> &'static str {
    r#"Как подключиться?
Для подключения к VPN необходимо установить приложение Outline на ваше устройство.
Ссылка на приложение Windows: <a href="https://disk.yandex.ru/d/4CpLGQgqqfoG-w">Outline для Windows</a>
Ссылка на приложение на iOS: <a href="https://apps.apple.com/ru/app/outline-app/id1356177741">Outline для iOS</a>
Ссылка на приложение на Android: <a href="https://play.google.com/store/apps/details?id=org.outline.android.client&amp;hl=ru">Outline для Android</a>

🔍 Помощь по командам:

/start - Начать работу с ботом
/help - Показать это сообщение
/profile - Посмотреть свой профиль
/vpn - Управление VPN ключами
/servers - Список доступных серверов"#
}

/// Имя ключа в backend: одно и то же для пары пользователь + сервер.
pub fn key_name(telegram_id: i64, server_name: &str) -> String {
    format!("TG_{}_{}", telegram_id, server_name)
}

/// Только дата, без времени.
pub fn format_expiration(expiration: Option<&str>) -> String {
    let Some(raw) = expiration.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return UNLIMITED_EXPIRATION.to_string();
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.date_naive().format("%Y-%m-%d").to_string(),
        Err(_) => raw.split('T').next().unwrap_or(raw).to_string(),
    }
}

pub fn format_traffic(used_bytes: u64, limit_bytes: u64) -> String {
    let used = bytes_to_gb(used_bytes);
    if limit_bytes == 0 {
        format!("{:.2} GB / {}", used, UNLIMITED_TRAFFIC)
    } else {
        format!("{:.2} GB / {:.2} GB", used, bytes_to_gb(limit_bytes))
    }
}

pub fn traffic_limit_label(limit_gb: u64) -> String {
    if limit_gb == 0 {
        UNLIMITED_TRAFFIC.to_string()
    } else {
        format!("{} GB", limit_gb)
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "Да" } else { "Нет" }
}

pub fn confirm_prompt_text(server: &Server, defaults: &KeyDefaults) -> String {
    format!(
        "Вы выбрали сервер: {} ({})\n\n\
         Будет создан VPN ключ со следующими параметрами:\n\
         - Трафик: {}\n\
         - Срок действия: {} дней\n\n\
         Подтвердить создание ключа?",
        server.name,
        server.location,
        traffic_limit_label(defaults.default_traffic_limit_gb),
        defaults.default_expiration_days,
    )
}

/// HTML-подпись к QR нового ключа.
pub fn created_key_caption(server: &Server, key: &Key, defaults: &KeyDefaults) -> String {
    format!(
        "✅ <b>VPN ключ успешно создан!</b>\n\n\
         📍 <b>Сервер:</b> {} ({})\n\
         📅 <b>Срок действия:</b> {} дней\n\
         📊 <b>Трафик:</b> {}\n\n\
         🔑 <b>Конфигурация:</b>\n\
         Ссылка <b>на конфигурацию:</b> <code>{}</code>\n\n\
         Отсканируйте QR-код или скопируйте конфигурацию для настройки VPN-клиента.",
        escape(&server.name),
        escape(&server.location),
        defaults.default_expiration_days,
        traffic_limit_label(defaults.default_traffic_limit_gb),
        escape(&key.access_url),
    )
}

/// HTML-подпись к QR существующего ключа.
pub fn key_caption(key: &Key) -> String {
    format!(
        "🔑 VPN ключ: {}\n\
         📍 Сервер: {} ({})\n\
         📅 Истекает: {}\n\
         📊 Трафик: {}\n\n\
         🔗 Конфигурация:\n\
         <code>{}</code>",
        escape(&key.name),
        escape(&key.server_name),
        escape(&key.server_location),
        format_expiration(key.expiration_date.as_deref()),
        format_traffic(key.traffic_used_bytes, key.traffic_limit_bytes),
        escape(&key.access_url),
    )
}

pub fn profile_text(keys: &[Key]) -> String {
    let mut text = String::from("🔑 Ваши VPN ключи:\n\n");
    for key in keys {
        text.push_str(&format!(
            "🔸 {}\n\
             📍 Сервер: {} ({})\n\
             📅 Истекает: {}\n\
             📊 Трафик: {}\n\
             🔗 Статус: {}\n\n",
            key.name,
            key.server_name,
            key.server_location,
            format_expiration(key.expiration_date.as_deref()),
            format_traffic(key.traffic_used_bytes, key.traffic_limit_bytes),
            if key.is_active { "Активен" } else { "Неактивен" },
        ));
    }
    text.trim_end().to_string()
}

pub fn servers_text(servers: &[Server]) -> String {
    let lines: Vec<String> = servers
        .iter()
        .map(|server| format!("🔹 {} - {}", server.name, server.location))
        .collect();
    format!("🌍 Доступные серверы:\n\n{}", lines.join("\n"))
}

pub fn user_block(user: &User) -> String {
    format!(
        "ID: {}\nTelegram ID: {}\nUsername: {}\nИмя: {}\nАктивен: {}",
        user.id,
        user.telegram_id,
        user.username.as_deref().unwrap_or("Не указан"),
        user.first_name.as_deref().unwrap_or("Не указано"),
        yes_no(user.is_active),
    )
}

pub fn server_block(server: &Server) -> String {
    format!(
        "ID: {}\nИмя: {}\nЛокация: {}\nАктивен: {}",
        server.id,
        server.name,
        server.location,
        yes_no(server.active),
    )
}

pub fn key_block(key: &Key) -> String {
    let owner = key
        .user_telegram_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "—".to_string());
    format!(
        "ID: {}\nПользователь: {}\nСервер: {}\nНазвание: {}\nАктивен: {}",
        key.id,
        owner,
        key.server_name,
        key.name,
        yes_no(key.is_active),
    )
}

/// Длина так, как её считает Telegram.
pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

fn split_long(text: &str, limit: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for ch in text.chars() {
        let width = ch.len_utf16();
        if current_len + width > limit && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push(ch);
        current_len += width;
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Склеивает блоки под заголовком в сообщения не длиннее `limit` UTF-16 единиц.
/// Блок режется только если сам не помещается в одно сообщение.
pub fn pack_blocks(header: &str, blocks: &[String], limit: usize) -> Vec<String> {
    let mut messages = Vec::new();
    let mut current = header.to_string();
    for block in blocks {
        for piece in split_long(block, limit) {
            let separator = if current.is_empty() { "" } else { "\n\n" };
            if !current.is_empty()
                && utf16_len(&current) + utf16_len(separator) + utf16_len(&piece) > limit
            {
                messages.push(std::mem::replace(&mut current, piece));
            } else {
                current.push_str(separator);
                current.push_str(&piece);
            }
        }
    }
    if !current.is_empty() {
        messages.push(current);
    }
    messages
}
