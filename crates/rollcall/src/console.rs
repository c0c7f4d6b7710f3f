//! Operator console input.
//!
//! Anything that is not a command is a decoded payload. Commands are matched
//! case-insensitively after trimming; a payload spelled like a command word
//! cannot be entered from the console.

/// One line from the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    /// A decoded QR payload
    Scan(String),
    /// Manual sync (the `s` key)
    Sync,
    Status,
    Help,
    Quit,
}

pub const HELP_TEXT: &str = "Scan a code (or type an ID) and press Enter.\n\
  s       sync now\n\
  status  connection and pending counts\n\
  help    this text\n\
  q       quit";

/// Parse one console line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<ConsoleInput> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let input = match trimmed.to_ascii_lowercase().as_str() {
        "s" | "sync" => ConsoleInput::Sync,
        "status" => ConsoleInput::Status,
        "?" | "help" => ConsoleInput::Help,
        "q" | "quit" | "exit" => ConsoleInput::Quit,
        _ => ConsoleInput::Scan(trimmed.to_string()),
    };
    Some(input)
}
