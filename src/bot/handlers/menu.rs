use super::shared::{HandlerResult, deliver};
use super::state::{BotState, message_sender};
use teloxide::prelude::*;

/// Текст без команды: шаг текущего диалога или кнопка меню.
pub async fn handle_menu_buttons(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(sender) = message_sender(&msg) else {
        return Ok(());
    };
    tracing::debug!(user_id = sender.id, "Received text message");

    let replies = state.conversation.on_text(&sender, text).await;
    deliver(&bot, msg.chat.id, replies).await
}
