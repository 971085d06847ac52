//! Command parsing from extracted message text.

/// The command-related fields of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Lowercase command name, empty when the text is not a command.
    pub command: String,
    /// The prefix that matched, empty when none did.
    pub prefix: String,
    /// Everything after the command, whitespace-normalised.
    pub content: String,
    pub args: Vec<String>,
    pub is_cmd: bool,
}

/// Parses `text` against the configured prefixes.
///
/// The first prefix `text` starts with is stripped. Without a matching prefix
/// the text is only treated as a command when `require_prefix` is off, in
/// which case the first token is the command.
pub fn parse_command(text: &str, prefixes: &[String], require_prefix: bool) -> ParsedCommand {
    let text = text.trim();
    if text.is_empty() {
        return ParsedCommand::default();
    }

    let prefix = prefixes
        .iter()
        .find(|p| !p.is_empty() && text.starts_with(p.as_str()));

    let body = match prefix {
        Some(p) => &text[p.len()..],
        None if !require_prefix => text,
        None => return ParsedCommand::default(),
    };

    let mut tokens = body.split_whitespace();
    let command = tokens.next().unwrap_or("").to_lowercase();
    let args: Vec<String> = tokens.map(str::to_string).collect();

    ParsedCommand {
        is_cmd: !command.is_empty(),
        command,
        prefix: prefix.cloned().unwrap_or_default(),
        content: args.join(" "),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixes() -> Vec<String> {
        vec![".".into(), "!".into(), "#".into()]
    }

    #[test]
    fn prefixed_command() {
        let parsed = parse_command(".Ping  a   b", &prefixes(), true);
        assert!(parsed.is_cmd);
        assert_eq!(parsed.command, "ping");
        assert_eq!(parsed.prefix, ".");
        assert_eq!(parsed.args, vec!["a", "b"]);
        assert_eq!(parsed.content, "a b");
    }

    #[test]
    fn space_after_prefix() {
        let parsed = parse_command("! menu", &prefixes(), true);
        assert_eq!(parsed.command, "menu");
        assert_eq!(parsed.prefix, "!");
    }

    #[test]
    fn prefix_required_but_missing() {
        let parsed = parse_command("ping", &prefixes(), true);
        assert!(!parsed.is_cmd);
        assert!(parsed.command.is_empty());
    }

    #[test]
    fn prefix_optional_uses_first_token() {
        let parsed = parse_command("Ping now", &prefixes(), false);
        assert!(parsed.is_cmd);
        assert_eq!(parsed.command, "ping");
        assert_eq!(parsed.prefix, "");
        assert_eq!(parsed.args, vec!["now"]);

        let prefixed = parse_command("#ping", &prefixes(), false);
        assert_eq!(prefixed.command, "ping");
        assert_eq!(prefixed.prefix, "#");
    }

    #[test]
    fn bare_prefix_is_not_a_command() {
        let parsed = parse_command(".", &prefixes(), true);
        assert!(!parsed.is_cmd);
        assert_eq!(parsed.prefix, ".");
    }

    #[test]
    fn multi_character_prefixes() {
        let parsed = parse_command("bot! stats", &["bot!".to_string()], true);
        assert_eq!(parsed.command, "stats");
    }
}
