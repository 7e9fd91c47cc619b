mod command;
mod message;

use teloxide::{
    adaptors::Throttle,
    dispatching::{UpdateFilterExt, UpdateHandler},
    payloads::SendMessageSetters,
    prelude::Requester,
    types::{ChatId, LinkPreviewOptions, ParseMode, Update},
    Bot,
};

use command::get_command_handler;
use message::get_message_handler;

use crate::{error::HandlerResult, service::chat::Reply};

pub fn get_handler() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    Update::filter_message()
        .branch(get_command_handler())
        .branch(get_message_handler())
}

async fn send_reply(bot: &Throttle<Bot>, chat_id: ChatId, reply: Reply) -> HandlerResult<()> {
    let request = bot.send_message(chat_id, reply.text);

    if reply.markdown {
        request
            .parse_mode(ParseMode::MarkdownV2)
            .link_preview_options(LinkPreviewOptions {
                is_disabled: true,
                url: None,
                prefer_small_media: false,
                prefer_large_media: false,
                show_above_text: false,
            })
            .await?;
    } else {
        request.await?;
    }

    Ok(())
}
