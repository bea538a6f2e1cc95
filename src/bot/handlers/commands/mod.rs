use super::shared::{HandlerResult, deliver};
use super::state::{BotState, message_sender};
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Copy, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase")]
pub enum BotCommand {
    #[command(description = "Начать работу с ботом")]
    Start,
    #[command(description = "Показать справку")]
    Help,
    #[command(description = "Посмотреть свой профиль")]
    Profile,
    #[command(description = "Управление VPN ключами")]
    Vpn,
    #[command(description = "Список доступных серверов")]
    Servers,
    #[command(hide)]
    Admin,
}

pub fn handler() -> teloxide::dispatching::UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    teloxide::filter_command::<BotCommand, _>().endpoint(run_command)
}

async fn run_command(bot: Bot, msg: Message, cmd: BotCommand, state: BotState) -> HandlerResult {
    let Some(sender) = message_sender(&msg) else {
        tracing::warn!(command = ?cmd, "Received command without sender");
        return Ok(());
    };
    tracing::info!(user_id = sender.id, command = ?cmd, "Received command");

    let replies = state.conversation.on_command(&sender, cmd).await;
    deliver(&bot, msg.chat.id, replies).await
}
