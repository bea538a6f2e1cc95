use super::flow::Reply;
use teloxide::prelude::*;
use teloxide::types::{InputFile, LinkPreviewOptions, ParseMode};

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

fn disabled_link_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

/// Отправляет ответы диалога по порядку; ошибка Telegram прерывает отправку.
pub async fn deliver(bot: &Bot, chat_id: ChatId, replies: Vec<Reply>) -> HandlerResult {
    for reply in replies {
        match reply {
            Reply::Text { text, menu, html } => {
                let mut request = bot.send_message(chat_id, text);
                if html {
                    request = request
                        .parse_mode(ParseMode::Html)
                        .link_preview_options(disabled_link_preview());
                }
                if let Some(menu) = menu {
                    request = request.reply_markup(menu.markup());
                }
                request.await?;
            }
            Reply::Photo {
                png,
                file_name,
                caption,
                menu,
            } => {
                let mut request = bot
                    .send_photo(chat_id, InputFile::memory(png).file_name(file_name))
                    .caption(caption)
                    .parse_mode(ParseMode::Html);
                if let Some(menu) = menu {
                    request = request.reply_markup(menu.markup());
                }
                request.await?;
            }
        }
    }
    Ok(())
}
