//! Telegram-слой: схема обработчиков и клавиатуры.

pub mod handlers;
pub mod keyboards;
