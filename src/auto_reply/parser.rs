use super::traits::ParsedCommand;

/// Split a slash command out of `text`.
///
/// Only text whose first non-blank character is `/` is a command. The first
/// token is the command; a trailing `@BotName` mention is dropped and the name
/// is lowercased. Everything after the first token is returned as args.
pub fn parse_command(text: &str) -> Option<ParsedCommand> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix('/')?;

    let (token, args) = match rest.find(char::is_whitespace) {
        Some(pos) => (&rest[..pos], rest[pos..].trim()),
        None => (rest, ""),
    };

    let name = token.split('@').next().unwrap_or_default();
    if name.is_empty() {
        return None;
    }

    Some(ParsedCommand {
        command: format!("/{}", name.to_lowercase()),
        args: args.to_string(),
    })
}
