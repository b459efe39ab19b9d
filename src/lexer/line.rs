//! Assembles lexed tokens into something the talk session can act on

use thiserror::Error;

use super::{tokenize_spanned, LexError, Token};
use crate::protocol::{Argument, EncodeError, Message};

/// Errors turning an input line into a message or command
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LineError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("Expected an address such as /synth/freq at column {column}")]
    MissingAddress { column: usize },

    #[error("Unknown command ':{0}' (try :help)")]
    UnknownCommand(String),

    #[error("Command ':{0}' takes no arguments")]
    CommandArguments(String),
}

pub type LineResult<T> = Result<T, LineError>;

/// Directives handled by the REPL itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    Help,
}

impl Command {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "quit" | "q" | "exit" => Some(Command::Quit),
            "help" | "h" => Some(Command::Help),
            _ => None,
        }
    }
}

/// One interpreted input line
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Empty,
    Command(Command),
    Message(Message),
}

impl TryFrom<Token> for Argument {
    type Error = EncodeError;

    fn try_from(token: Token) -> Result<Self, Self::Error> {
        match token {
            Token::Int(value) => Ok(Argument::Int32(value)),
            Token::Float(value) => Ok(Argument::Float32(value)),
            Token::String(value) | Token::Address(value) => Ok(Argument::String(value)),
            Token::Command(name) => Err(EncodeError::Unsupported(format!("Command ':{}'", name))),
            Token::Whitespace => Err(EncodeError::Unsupported("Whitespace".to_string())),
        }
    }
}

/// Interpret a line typed at the talk prompt
pub fn parse_line(line: &str) -> LineResult<Line> {
    let mut tokens = tokenize_spanned(line)?
        .into_iter()
        .filter(|spanned| spanned.token != Token::Whitespace);

    let Some(first) = tokens.next() else {
        return Ok(Line::Empty);
    };

    match first.token {
        Token::Command(name) => {
            let command =
                Command::from_name(&name).ok_or_else(|| LineError::UnknownCommand(name.clone()))?;
            if tokens.next().is_some() {
                return Err(LineError::CommandArguments(name));
            }
            Ok(Line::Command(command))
        }
        Token::Address(address) => {
            let args = tokens
                .map(|spanned| Argument::try_from(spanned.token))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Line::Message(Message::new(address, args)))
        }
        _ => Err(LineError::MissingAddress {
            column: line[..first.start].chars().count() + 1,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TypeTag;

    #[test]
    fn test_parse_message() {
        let line = parse_line(r#"/synth/freq 440.5 "lead""#).unwrap();
        let Line::Message(message) = line else {
            panic!("Expected a message");
        };
        assert_eq!(message.address, "/synth/freq");
        assert_eq!(message.type_tag_string(), "fs");
        assert_eq!(
            message.args,
            vec![Argument::Float32(440.5), Argument::String("lead".to_string())]
        );
    }

    #[test]
    fn test_parse_integer_with_f_suffix_is_float() {
        let Line::Message(message) = parse_line("/x 3f 3").unwrap() else {
            panic!("Expected a message");
        };
        assert_eq!(message.type_tags, vec![TypeTag::Float32, TypeTag::Int32]);
    }

    #[test]
    fn test_leading_whitespace_is_skipped() {
        assert!(matches!(parse_line("   /x"), Ok(Line::Message(_))));
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_line(":quit").unwrap(), Line::Command(Command::Quit));
        assert_eq!(parse_line(" :q ").unwrap(), Line::Command(Command::Quit));
        assert_eq!(parse_line(":help").unwrap(), Line::Command(Command::Help));
        assert_eq!(
            parse_line(":launch"),
            Err(LineError::UnknownCommand("launch".to_string()))
        );
        assert_eq!(
            parse_line(":quit 1"),
            Err(LineError::CommandArguments("quit".to_string()))
        );
    }

    #[test]
    fn test_empty_line() {
        assert_eq!(parse_line("").unwrap(), Line::Empty);
        assert_eq!(parse_line("    ").unwrap(), Line::Empty);
    }

    #[test]
    fn test_missing_address() {
        assert_eq!(
            parse_line("  42 /x"),
            Err(LineError::MissingAddress { column: 3 })
        );
    }

    #[test]
    fn test_command_cannot_be_an_argument() {
        assert!(matches!(
            parse_line("/x 1 :quit"),
            Err(LineError::Encode(EncodeError::Unsupported(_)))
        ));
    }

    #[test]
    fn test_lex_error_is_reported() {
        assert!(matches!(
            parse_line(r#"/x "abc"#),
            Err(LineError::Lex(LexError::UnterminatedString { column: 4 }))
        ));
    }
}
