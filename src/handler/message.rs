use teloxide::{
    adaptors::Throttle,
    dispatching::UpdateHandler,
    prelude::*,
    types::Message,
    Bot,
};

use crate::{error::HandlerResult, service::capture::CaptureState, state::AppState};

use super::send_reply;

fn telegram_id(msg: &Message) -> Option<i64> {
    msg.from.as_ref().map(|user| user.id.0 as i64)
}

async fn handle_message_credentials(bot: Throttle<Bot>, msg: Message, text: String, state: AppState) -> HandlerResult<()> {
    let Some(telegram_id) = telegram_id(&msg) else {
        return Ok(());
    };

    let Some(reply) = state.service_registry.chat.handle_text(telegram_id, &text).await else {
        return Ok(());
    };

    // the credentials line should not stay in the chat history
    if let Err(e) = bot.delete_message(msg.chat.id, msg.id).await {
        warn!("User {}: could not delete credentials message: {}", telegram_id, e);
    }

    send_reply(&bot, msg.chat.id, reply).await
}

pub fn get_message_handler() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    dptree::filter_map(|msg: Message| msg.text().map(str::to_owned))
        .filter_map(|msg: Message, state: AppState| {
            telegram_id(&msg).map(|id| state.service_registry.capture.state(id))
        })
        .branch(dptree::case![CaptureState::AwaitingCredentials].endpoint(handle_message_credentials))
}
