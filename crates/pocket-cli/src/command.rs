//! Prompt-line commands

/// What one line typed at the prompt asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Blank line
    Empty,
    Quit,
    ClearHistory,
    ShowHistory,
    ShowWallet,
    ClearWallet,
    ToggleStream,
    /// Anything else goes to the agent
    Query(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }

        let lower = line.to_lowercase();
        let words: Vec<&str> = lower.split_whitespace().collect();
        match words.as_slice() {
            ["quit" | "exit"] => Self::Quit,
            ["!clear"] => Self::ClearHistory,
            ["!history"] => Self::ShowHistory,
            ["!wallet"] => Self::ShowWallet,
            ["!wallet", "clear"] => Self::ClearWallet,
            ["!stream"] => Self::ToggleStream,
            _ => Self::Query(line.to_string()),
        }
    }
}

pub const HELP: &str = "Commands: !history, !clear, !wallet, !wallet clear, !stream, quit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands() {
        assert_eq!(Command::parse("quit"), Command::Quit);
        assert_eq!(Command::parse("  EXIT "), Command::Quit);
        assert_eq!(Command::parse("!clear"), Command::ClearHistory);
        assert_eq!(Command::parse("!history"), Command::ShowHistory);
        assert_eq!(Command::parse("!wallet"), Command::ShowWallet);
        assert_eq!(Command::parse("!wallet   clear"), Command::ClearWallet);
        assert_eq!(Command::parse("!stream"), Command::ToggleStream);
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[test]
    fn test_everything_else_is_a_query() {
        assert_eq!(
            Command::parse(" What is my SOL balance? "),
            Command::Query("What is my SOL balance?".into())
        );
        // Commands only match as the whole line
        assert_eq!(Command::parse("quit smoking"), Command::Query("quit smoking".into()));
        assert_eq!(Command::parse("!wallet foo"), Command::Query("!wallet foo".into()));
    }
}
