use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Commands that can be invoked by starting a message with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Start a new conversation
    New,
    /// Show the backend conversation id
    Id,
    /// Exit the application
    Bye,
    /// Show help
    Help,
}

pub fn command_entries() -> Vec<CommandEntry> {
    SlashCommand::iter()
        .map(|command| CommandEntry {
            keyword: command.command(),
            description: command.description(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: SlashCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandEntry {
    pub keyword: &'static str,
    pub description: &'static str,
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::New => "start a new conversation (clears the transcript)",
            SlashCommand::Id => "show the current conversation id",
            SlashCommand::Bye => "exit the application",
            SlashCommand::Help => "show usage tips and available commands",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }
}

/// Return all built-in commands in a Vec paired with their command string.
pub fn built_in_slash_commands() -> Vec<(&'static str, SlashCommand)> {
    SlashCommand::iter().map(|c| (c.command(), c)).collect()
}

/// Parse a slash command from user input
pub fn parse_slash_command(input: &str) -> Option<ParsedCommand> {
    let rest = input.trim_start().strip_prefix('/')?;

    let head = rest.split_whitespace().next()?.to_lowercase();

    let command = SlashCommand::from_str(&head).ok().or_else(|| match head.as_str() {
        "q" | "quit" | "exit" => Some(SlashCommand::Bye),
        "reset" | "clear" => Some(SlashCommand::New),
        "h" | "?" => Some(SlashCommand::Help),
        _ => None,
    })?;

    Some(ParsedCommand { command })
}

/// Usage guide plus the command list
pub fn get_help_text() -> String {
    let mut help = String::from(
        "Usage tips: describe your symptoms in detail, for example \
\"I've had headaches most afternoons lately and my blood pressure is 140/90, what should I do?\"\n\n\
Available commands:\n",
    );
    for (command_str, command) in built_in_slash_commands() {
        help.push_str(&format!("/{} - {}\n", command_str, command.description()));
    }

    help.push_str("\nAliases: /q, /quit, /exit for /bye; /reset for /new. Ctrl+N also starts a new conversation.");

    help
}
