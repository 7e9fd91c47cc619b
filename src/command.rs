use teloxide::{
    adaptors::Throttle,
    macros::BotCommands,
    prelude::Requester,
    types::BotCommand,
    Bot,
};

use crate::error::HandlerResult;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    Start,
    About,
    Save,
    Balance,
    Delete,
}

impl Command {
    pub fn user_commands(locale: &str) -> Vec<BotCommand> {
        vec![
            BotCommand::new("start", t!("commands.description.start", locale = locale)),
            BotCommand::new("about", t!("commands.description.about", locale = locale)),
            BotCommand::new("save", t!("commands.description.save", locale = locale)),
            BotCommand::new("balance", t!("commands.description.balance", locale = locale)),
            BotCommand::new("delete", t!("commands.description.delete", locale = locale)),
        ]
    }
}

pub async fn setup_user_commands(bot: &Throttle<Bot>, locale: &str) -> HandlerResult<()> {
    bot.delete_my_commands().await?;
    bot.set_my_commands(Command::user_commands(locale)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::utils::command::BotCommands as _;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/balance", "bot").unwrap(), Command::Balance);
        assert_eq!(Command::parse("/save", "bot").unwrap(), Command::Save);
        assert!(Command::parse("/help", "bot").is_err());
    }

    #[test]
    fn test_user_commands_cover_every_command() {
        let names: Vec<String> = Command::user_commands("ru").into_iter().map(|c| c.command).collect();
        assert_eq!(names, ["start", "about", "save", "balance", "delete"]);
    }
}
