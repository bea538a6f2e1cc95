//! Клавиатуры бота: постоянные reply-кнопки пользовательского и админского меню.

use teloxide::types::{KeyboardButton, KeyboardMarkup};

pub const BTN_GET_VPN: &str = "Получить VPN";
pub const BTN_MY_KEYS: &str = "Мои VPN ключи";
pub const BTN_HELP: &str = "Помощь";
pub const BTN_PROFILE: &str = "Профиль";
pub const BTN_SHOW_QR: &str = "Показать QR-коды";
pub const BTN_BACK: &str = "Вернуться в меню";
pub const BTN_CONFIRM: &str = "Подтвердить";
pub const BTN_CANCEL: &str = "Отмена";

pub const BTN_ADMIN_USERS: &str = "👥 Пользователи";
pub const BTN_ADMIN_SERVERS: &str = "🖥️ Серверы";
pub const BTN_ADMIN_KEYS: &str = "🔑 Ключи";
pub const BTN_ADMIN_REVOKE: &str = "🗑️ Отозвать ключ";

pub const ADMIN_BUTTONS: [&str; 4] = [
    BTN_ADMIN_USERS,
    BTN_ADMIN_SERVERS,
    BTN_ADMIN_KEYS,
    BTN_ADMIN_REVOKE,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Menu {
    Main,
    VpnHasKeys,
    VpnNoKeys,
    ServerPicker(Vec<String>),
    Confirm,
    Admin,
}

impl Menu {
    /// Ряды подписей кнопок сверху вниз.
    pub fn rows(&self) -> Vec<Vec<String>> {
        let row = |labels: &[&str]| -> Vec<String> {
            labels.iter().map(|label| label.to_string()).collect()
        };
        match self {
            Menu::Main => vec![row(&[BTN_GET_VPN, BTN_MY_KEYS]), row(&[BTN_HELP, BTN_PROFILE])],
            Menu::VpnHasKeys => vec![row(&[BTN_SHOW_QR]), row(&[BTN_BACK])],
            Menu::VpnNoKeys => vec![row(&[BTN_GET_VPN]), row(&[BTN_BACK])],
            Menu::ServerPicker(names) => names.iter().map(|name| vec![name.clone()]).collect(),
            Menu::Confirm => vec![row(&[BTN_CONFIRM]), row(&[BTN_CANCEL])],
            Menu::Admin => vec![
                row(&[BTN_ADMIN_USERS, BTN_ADMIN_SERVERS]),
                row(&[BTN_ADMIN_KEYS, BTN_ADMIN_REVOKE]),
                row(&[BTN_BACK]),
            ],
        }
    }

    pub fn markup(&self) -> KeyboardMarkup {
        let keyboard = self
            .rows()
            .into_iter()
            .map(|row| row.into_iter().map(KeyboardButton::new).collect())
            .collect::<Vec<Vec<KeyboardButton>>>();
        let markup = KeyboardMarkup::new(keyboard).resize_keyboard();
        match self {
            Menu::Main | Menu::Admin => markup.persistent(),
            _ => markup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_menu_is_two_by_two() {
        assert_eq!(
            Menu::Main.rows(),
            vec![
                vec![BTN_GET_VPN.to_string(), BTN_MY_KEYS.to_string()],
                vec![BTN_HELP.to_string(), BTN_PROFILE.to_string()],
            ]
        );
    }

    #[test]
    fn server_picker_lists_only_servers_one_per_row() {
        let menu = Menu::ServerPicker(vec!["NL".to_string(), "DE".to_string()]);
        assert_eq!(
            menu.rows(),
            vec![vec!["NL".to_string()], vec!["DE".to_string()]]
        );
    }

    #[test]
    fn admin_menu_contains_every_admin_button_once() {
        let labels: Vec<String> = Menu::Admin.rows().into_iter().flatten().collect();
        for button in ADMIN_BUTTONS {
            assert_eq!(labels.iter().filter(|label| *label == button).count(), 1);
        }
        assert_eq!(labels.last().map(String::as_str), Some(BTN_BACK));
    }

    #[test]
    fn vpn_menus_differ_by_first_row() {
        assert_eq!(Menu::VpnHasKeys.rows()[0], vec![BTN_SHOW_QR.to_string()]);
        assert_eq!(Menu::VpnNoKeys.rows()[0], vec![BTN_GET_VPN.to_string()]);
    }

    #[test]
    fn markup_keeps_layout() {
        let markup = Menu::Admin.markup();
        assert_eq!(markup.keyboard.len(), 3);
        assert_eq!(markup.keyboard[0][0].text, BTN_ADMIN_USERS);
    }
}
