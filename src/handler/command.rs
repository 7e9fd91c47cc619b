use teloxide::{
    adaptors::Throttle,
    dispatching::{HandlerExt, UpdateHandler},
    prelude::*,
    types::Message,
    Bot,
};

use crate::{command::Command, error::HandlerResult, state::AppState};

use super::send_reply;

async fn handle_command(bot: Throttle<Bot>, msg: Message, cmd: Command, state: AppState) -> HandlerResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let telegram_id = user.id.0 as i64;
    let chat = &state.service_registry.chat;

    info!("User {}: /{:?}", telegram_id, cmd);

    let reply = match cmd {
        Command::Start => chat.start(telegram_id).await?,
        Command::About => chat.about(),
        Command::Save => chat.begin_capture(telegram_id),
        Command::Balance => {
            bot.send_chat_action(msg.chat.id, teloxide::types::ChatAction::Typing).await?;
            chat.balance(telegram_id).await
        }
        Command::Delete => chat.delete(telegram_id).await,
    };

    send_reply(&bot, msg.chat.id, reply).await
}

pub fn get_command_handler() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    dptree::entry()
        .filter_command::<Command>()
        .endpoint(handle_command)
}
