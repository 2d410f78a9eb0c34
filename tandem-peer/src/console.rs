//! Line-oriented editing commands read from stdin.
//!
//! ```text
//! i <offset> <text>   insert text at offset
//! r <offset> <len>    remove len chars starting at offset
//! p                   print the document
//! q                   disconnect and quit
//! ```

use tandem_core::TextEvent;

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Edit(TextEvent),
    Print,
    Quit,
}

/// Console parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    UnknownCommand(String),
    MissingArgument(&'static str),
    InvalidNumber(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty command"),
            Self::UnknownCommand(c) => write!(f, "Unknown command: {c}"),
            Self::MissingArgument(name) => write!(f, "Missing argument: {name}"),
            Self::InvalidNumber(s) => write!(f, "Not a number: {s}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Split off the first whitespace-delimited word.
fn next_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(end) => (&input[..end], &input[end..]),
        None => (input, ""),
    }
}

fn parse_number(word: &str, name: &'static str) -> Result<usize, ParseError> {
    if word.is_empty() {
        return Err(ParseError::MissingArgument(name));
    }
    word.parse()
        .map_err(|_| ParseError::InvalidNumber(word.to_string()))
}

/// Parse a console line.
///
/// Insert text is everything after the single space that follows the
/// offset, so it may itself contain spaces.
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (command, rest) = next_word(line);
    match command {
        "" => Err(ParseError::Empty),
        "p" => Ok(Command::Print),
        "q" => Ok(Command::Quit),
        "i" => {
            let (offset, rest) = next_word(rest);
            let offset = parse_number(offset, "offset")?;
            let text = rest.strip_prefix(' ').unwrap_or(rest);
            if text.is_empty() {
                return Err(ParseError::MissingArgument("text"));
            }
            Ok(Command::Edit(TextEvent::insert(offset, text)))
        }
        "r" => {
            let (offset, rest) = next_word(rest);
            let offset = parse_number(offset, "offset")?;
            let (len, _) = next_word(rest);
            let len = parse_number(len, "len")?;
            Ok(Command::Edit(TextEvent::remove(offset, len)))
        }
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}
