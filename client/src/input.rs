//! Line commands typed into the terminal client.

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `e2e4`, `e2 e4` or `move e2 e4`
    Move { from: String, to: String },
    /// `click e2`: one board click, as a pointer would send it
    Click(String),
    Rematch,
    /// Give the seat up
    Leave,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("unknown command {0:?}, type `help`")]
    Unknown(String),

    #[error("{0:?} is not a square")]
    BadSquare(String),
}

pub const HELP: &str = "commands: e2e4 | move e2 e4 | click e2 | rematch | leave | status | help | quit";

/// Parses one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<Result<Command, InputError>> {
    let words: Vec<String> = line
        .split_whitespace()
        .map(|w| w.to_ascii_lowercase())
        .collect();
    let words: Vec<&str> = words.iter().map(String::as_str).collect();

    let command = match words.as_slice() {
        [] => return None,
        ["rematch"] => Ok(Command::Rematch),
        ["leave"] => Ok(Command::Leave),
        ["status"] => Ok(Command::Status),
        ["help"] | ["?"] => Ok(Command::Help),
        ["quit"] | ["exit"] => Ok(Command::Quit),
        ["click", square] => square_arg(square).map(Command::Click),
        ["move", from, to] => move_args(from, to),
        // two words are a move only if one of them names a square
        [from, to] if is_square(from) || is_square(to) => move_args(from, to),
        [word] if word.len() == 4 && word.is_ascii() => move_args(&word[..2], &word[2..]),
        _ => Err(InputError::Unknown(line.trim().to_string())),
    };
    Some(command)
}

fn move_args(from: &str, to: &str) -> Result<Command, InputError> {
    Ok(Command::Move {
        from: square_arg(from)?,
        to: square_arg(to)?,
    })
}

fn is_square(word: &str) -> bool {
    square_arg(word).is_ok()
}

fn square_arg(word: &str) -> Result<String, InputError> {
    let bytes = word.as_bytes();
    match bytes {
        [file @ b'a'..=b'h', rank @ b'1'..=b'8'] => {
            Ok(format!("{}{}", *file as char, *rank as char))
        }
        _ => Err(InputError::BadSquare(word.to_string())),
    }
}

/// Reads commands line by line from any async reader (stdin in the binary).
pub struct CommandReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> CommandReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Next non-blank command; `None` at end of input.
    pub async fn next_command(&mut self) -> Option<Result<Command, InputError>> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(command) = parse_command(&line) {
                        return Some(command);
                    }
                }
                Ok(None) | Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(from: &str, to: &str) -> Command {
        Command::Move {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    #[test]
    fn test_move_forms() {
        assert_eq!(parse_command("e2e4"), Some(Ok(mv("e2", "e4"))));
        assert_eq!(parse_command("  E2 E4 "), Some(Ok(mv("e2", "e4"))));
        assert_eq!(parse_command("move g1 f3"), Some(Ok(mv("g1", "f3"))));
    }

    #[test]
    fn test_keywords() {
        assert_eq!(parse_command("rematch"), Some(Ok(Command::Rematch)));
        assert_eq!(parse_command("LEAVE"), Some(Ok(Command::Leave)));
        assert_eq!(parse_command("exit"), Some(Ok(Command::Quit)));
        assert_eq!(
            parse_command("click h8"),
            Some(Ok(Command::Click("h8".to_string())))
        );
        assert_eq!(parse_command("   "), None);
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(
            parse_command("e9e4"),
            Some(Err(InputError::BadSquare("e9".to_string())))
        );
        assert_eq!(
            parse_command("click z1"),
            Some(Err(InputError::BadSquare("z1".to_string())))
        );
        assert!(matches!(
            parse_command("resign now please"),
            Some(Err(InputError::Unknown(_)))
        ));
    }

    #[test]
    fn test_two_words_need_a_square() {
        assert_eq!(
            parse_command("rematch now"),
            Some(Err(InputError::Unknown("rematch now".to_string())))
        );
        assert_eq!(
            parse_command("e2 e9"),
            Some(Err(InputError::BadSquare("e9".to_string())))
        );
        assert_eq!(parse_command("g1 f3"), Some(Ok(mv("g1", "f3"))));
    }

    #[tokio::test]
    async fn test_reader_skips_blank_lines() {
        let input: &[u8] = b"\ne2e4\n\n  \nquit\n";
        let mut reader = CommandReader::new(input);

        assert_eq!(reader.next_command().await, Some(Ok(mv("e2", "e4"))));
        assert_eq!(reader.next_command().await, Some(Ok(Command::Quit)));
        assert_eq!(reader.next_command().await, None);
    }

    #[tokio::test]
    async fn test_reader_joins_split_reads() {
        let input = tokio_test::io::Builder::new()
            .read(b"mo")
            .read(b"ve g1 f3\nrema")
            .read(b"tch\n")
            .build();
        let mut reader = CommandReader::new(input);

        assert_eq!(reader.next_command().await, Some(Ok(mv("g1", "f3"))));
        assert_eq!(reader.next_command().await, Some(Ok(Command::Rematch)));
        assert_eq!(reader.next_command().await, None);
    }
}
