//! Free-text session commands.

/// What a session message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Stop one instance (by id or id prefix) or, without a target, all of them
    Stop { target: Option<String> },
    /// Report every instance plus the value chart
    Status,
    /// Anything else is a request to create an instance
    Create(String),
}

const STOP_WORDS: [&str; 3] = ["stop", "pause", "halt"];
const STATUS_WORDS: [&str; 2] = ["status", "summary"];

/// Shortest id prefix accepted as a stop target.
const MIN_ID_PREFIX: usize = 4;

/// Classify a message by its first word.
pub fn parse_command(message: &str) -> SessionCommand {
    let message = message.trim();
    let mut words = message.split_whitespace();
    let first = words
        .next()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .unwrap_or_default();

    if STOP_WORDS.contains(&first.as_str()) {
        let target = words
            .map(|w| w.trim_matches(|c: char| !c.is_ascii_hexdigit() && c != '-'))
            .find(|w| looks_like_id(w))
            .map(|w| w.to_lowercase());
        return SessionCommand::Stop { target };
    }

    if STATUS_WORDS.contains(&first.as_str()) {
        return SessionCommand::Status;
    }

    SessionCommand::Create(message.to_string())
}

fn looks_like_id(word: &str) -> bool {
    word.len() >= MIN_ID_PREFIX
        && word.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
        && word.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_variants() {
        assert_eq!(parse_command("stop"), SessionCommand::Stop { target: None });
        assert_eq!(parse_command("  Pause!  "), SessionCommand::Stop { target: None });
        assert_eq!(
            parse_command("halt 3f2a91c0"),
            SessionCommand::Stop { target: Some("3f2a91c0".into()) }
        );
        assert_eq!(
            parse_command("stop instance 3F2A91C0-1b2c-4d5e-8f90-0123456789ab."),
            SessionCommand::Stop {
                target: Some("3f2a91c0-1b2c-4d5e-8f90-0123456789ab".into())
            }
        );
        assert_eq!(parse_command("stop trading now"), SessionCommand::Stop { target: None });
    }

    #[test]
    fn test_status_and_create() {
        assert_eq!(parse_command("Status"), SessionCommand::Status);
        assert_eq!(parse_command("summary please"), SessionCommand::Status);
        assert_eq!(
            parse_command("trade BTC with $1000"),
            SessionCommand::Create("trade BTC with $1000".into())
        );
        assert_eq!(parse_command("stopwatch BTC"), SessionCommand::Create("stopwatch BTC".into()));
    }
}
