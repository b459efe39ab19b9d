//! Line lexer for typed message input
//!
//! Splits a line such as `/synth/freq 440.5 "lead"` into tokens. Rules are
//! tried in a fixed order at each position and the first one that matches
//! wins:
//! - whitespace: one or more spaces
//! - address: one or more `/segment` groups of lowercase letters and digits
//! - float: `1.5`, `1.`, `.5` or `3f`, optionally signed, optional `f` suffix
//! - int: optionally signed digits
//! - string: double-quoted, with JSON-style escapes
//! - command: `:` followed by word characters

mod line;

pub use line::*;

use std::str::CharIndices;
use thiserror::Error;

/// Lexer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("Didn't recognize character '{ch}' at column {column}")]
    Unrecognized { ch: char, column: usize },

    #[error("String starting with '\"' at column {column} is never closed")]
    UnterminatedString { column: usize },

    #[error("Invalid escape after '\\' at column {column}")]
    InvalidEscape { column: usize },

    #[error("Integer {text} at column {column} does not fit in 32 bits")]
    IntOutOfRange { text: String, column: usize },
}

pub type LexResult<T> = Result<T, LexError>;

/// A lexed value
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Whitespace,
    Address(String),
    Int(i32),
    Float(f32),
    String(String),
    /// REPL directive such as `:quit`, stored without the colon
    Command(String),
}

/// A token with the byte range it was lexed from
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

/// Lex a full line into tokens
pub fn tokenize(line: &str) -> LexResult<Vec<Token>> {
    Ok(tokenize_spanned(line)?
        .into_iter()
        .map(|spanned| spanned.token)
        .collect())
}

/// Lex a full line, keeping each token's position
pub fn tokenize_spanned(line: &str) -> LexResult<Vec<Spanned>> {
    let lexer = Lexer { line };
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < line.len() {
        let (token, len) = lexer.next_token(pos)?;
        tokens.push(Spanned {
            token,
            start: pos,
            end: pos + len,
        });
        pos += len;
    }

    Ok(tokens)
}

struct Lexer<'a> {
    line: &'a str,
}

impl<'a> Lexer<'a> {
    /// 1-based character column of a byte offset
    fn column(&self, offset: usize) -> usize {
        self.line[..offset].chars().count() + 1
    }

    fn next_token(&self, pos: usize) -> LexResult<(Token, usize)> {
        let rest = &self.line[pos..];

        if let Some(len) = match_whitespace(rest) {
            return Ok((Token::Whitespace, len));
        }

        if let Some(len) = match_address(rest) {
            return Ok((Token::Address(rest[..len].to_string()), len));
        }

        if let Some(len) = match_float(rest) {
            let text = rest[..len].trim_end_matches('f');
            let value = text.parse::<f32>().map_err(|_| LexError::Unrecognized {
                ch: rest.chars().next().unwrap_or(' '),
                column: self.column(pos),
            })?;
            return Ok((Token::Float(value), len));
        }

        if let Some(len) = match_int(rest) {
            let text = &rest[..len];
            let value = text.parse::<i32>().map_err(|_| LexError::IntOutOfRange {
                text: text.to_string(),
                column: self.column(pos),
            })?;
            return Ok((Token::Int(value), len));
        }

        if rest.starts_with('"') {
            let (value, len) = self.lex_string(pos)?;
            return Ok((Token::String(value), len));
        }

        if let Some(len) = match_command(rest) {
            return Ok((Token::Command(rest[1..len].to_string()), len));
        }

        Err(LexError::Unrecognized {
            ch: rest.chars().next().unwrap_or(' '),
            column: self.column(pos),
        })
    }

    /// Lex a quoted string starting at `pos`, returning the unescaped text
    /// and the number of bytes consumed including both quotes
    fn lex_string(&self, pos: usize) -> LexResult<(String, usize)> {
        let body = &self.line[pos + 1..];
        let mut value = String::new();
        let mut chars = body.char_indices();

        while let Some((i, c)) = chars.next() {
            match c {
                '"' => return Ok((value, i + 2)),
                '\\' => {
                    let escape_column = self.column(pos + 1 + i);
                    let invalid = LexError::InvalidEscape {
                        column: escape_column,
                    };
                    let Some((_, escaped)) = chars.next() else {
                        return Err(LexError::UnterminatedString {
                            column: self.column(pos),
                        });
                    };
                    let unescaped = match escaped {
                        '"' => '"',
                        '\\' => '\\',
                        '/' => '/',
                        'b' => '\u{8}',
                        'f' => '\u{c}',
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        'u' => {
                            let high = read_hex4(&mut chars).ok_or_else(|| invalid.clone())?;
                            let code = match high {
                                0xD800..=0xDBFF => {
                                    // A high surrogate only counts with its low half after it
                                    let low = match (chars.next(), chars.next()) {
                                        (Some((_, '\\')), Some((_, 'u'))) => read_hex4(&mut chars),
                                        _ => None,
                                    };
                                    match low {
                                        Some(low @ 0xDC00..=0xDFFF) => {
                                            0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00)
                                        }
                                        _ => return Err(invalid),
                                    }
                                }
                                _ => high,
                            };
                            char::from_u32(code).ok_or(invalid)?
                        }
                        _ => return Err(invalid),
                    };
                    value.push(unescaped);
                }
                _ => value.push(c),
            }
        }

        Err(LexError::UnterminatedString {
            column: self.column(pos),
        })
    }
}

/// Four hex digits of a `\u` escape as one UTF-16 code unit
fn read_hex4(chars: &mut CharIndices<'_>) -> Option<u32> {
    let mut code = 0u32;
    for _ in 0..4 {
        let (_, h) = chars.next()?;
        code = code * 16 + h.to_digit(16)?;
    }
    Some(code)
}

fn count_digits(s: &str) -> usize {
    s.bytes().take_while(u8::is_ascii_digit).count()
}

fn sign_len(s: &str) -> usize {
    if s.starts_with('+') || s.starts_with('-') {
        1
    } else {
        0
    }
}

fn match_whitespace(s: &str) -> Option<usize> {
    let len = s.bytes().take_while(|&b| b == b' ').count();
    (len > 0).then_some(len)
}

fn match_address(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut len = 0;

    while bytes.get(len) == Some(&b'/') {
        let segment = bytes[len + 1..]
            .iter()
            .take_while(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
            .count();
        if segment == 0 {
            break;
        }
        len += 1 + segment;
    }

    (len > 0).then_some(len)
}

fn match_float(s: &str) -> Option<usize> {
    let sign = sign_len(s);
    let body = &s[sign..];
    let whole = count_digits(body);
    let after = &body[whole..];

    let mut len = if let Some(fraction) = after.strip_prefix('.') {
        let frac = count_digits(fraction);
        if whole == 0 && frac == 0 {
            return None;
        }
        whole + 1 + frac
    } else if whole > 0 && after.starts_with('f') {
        return Some(sign + whole + 1);
    } else {
        return None;
    };

    if body[len..].starts_with('f') {
        len += 1;
    }
    Some(sign + len)
}

fn match_int(s: &str) -> Option<usize> {
    let sign = sign_len(s);
    let digits = count_digits(&s[sign..]);
    (digits > 0).then_some(sign + digits)
}

fn match_command(s: &str) -> Option<usize> {
    let name = s.strip_prefix(':')?;
    let len = name
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
        .count();
    (len > 0).then_some(1 + len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_line() {
        let tokens = tokenize(r#"/synth/freq 440.5 "lead""#).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Address("/synth/freq".to_string()),
                Token::Whitespace,
                Token::Float(440.5),
                Token::Whitespace,
                Token::String("lead".to_string()),
            ]
        );
    }

    #[test]
    fn test_command() {
        assert_eq!(tokenize(":quit").unwrap(), vec![Token::Command("quit".to_string())]);
    }

    #[test]
    fn test_numbers() {
        let tokens = tokenize("1 -2 +3 1.5 -.25 2. 3f 4.5f").unwrap();
        let values: Vec<_> = tokens
            .into_iter()
            .filter(|t| *t != Token::Whitespace)
            .collect();
        assert_eq!(
            values,
            vec![
                Token::Int(1),
                Token::Int(-2),
                Token::Int(3),
                Token::Float(1.5),
                Token::Float(-0.25),
                Token::Float(2.0),
                Token::Float(3.0),
                Token::Float(4.5),
            ]
        );
    }

    #[test]
    fn test_int_out_of_range() {
        assert_eq!(
            tokenize("/x 2147483648"),
            Err(LexError::IntOutOfRange {
                text: "2147483648".to_string(),
                column: 4
            })
        );
        assert_eq!(tokenize("-2147483648").unwrap(), vec![Token::Int(i32::MIN)]);
    }

    #[test]
    fn test_string_escapes() {
        let tokens = tokenize(r#""a\"b\\c\/d\n\txA""#).unwrap();
        assert_eq!(tokens, vec![Token::String("a\"b\\c/d\n\txA".to_string())]);
    }

    #[test]
    fn test_control_and_unicode_escapes() {
        assert_eq!(
            tokenize(r#""\b\f\r""#).unwrap(),
            vec![Token::String("\u{8}\u{c}\r".to_string())]
        );
        assert_eq!(
            tokenize(r#""\u0041\u00e9""#).unwrap(),
            vec![Token::String("A\u{e9}".to_string())]
        );
        assert_eq!(
            tokenize(r#""\ud83d\ude00!""#).unwrap(),
            vec![Token::String("\u{1f600}!".to_string())]
        );
    }

    #[test]
    fn test_unpaired_surrogate_escape() {
        assert_eq!(
            tokenize(r#""\ud83d""#),
            Err(LexError::InvalidEscape { column: 2 })
        );
        assert_eq!(
            tokenize(r#""\ud83dx""#),
            Err(LexError::InvalidEscape { column: 2 })
        );
        assert_eq!(
            tokenize(r#""ab\ude00""#),
            Err(LexError::InvalidEscape { column: 4 })
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize(r#""abc"#).unwrap_err();
        assert_eq!(err, LexError::UnterminatedString { column: 1 });
        assert!(err.to_string().contains("'\"'"));
    }

    #[test]
    fn test_invalid_escape() {
        assert_eq!(
            tokenize(r#"/x "a\qb""#),
            Err(LexError::InvalidEscape { column: 6 })
        );
        assert_eq!(
            tokenize(r#""\u12""#),
            Err(LexError::InvalidEscape { column: 2 })
        );
    }

    #[test]
    fn test_unrecognized_character() {
        assert_eq!(
            tokenize("/x @"),
            Err(LexError::Unrecognized { ch: '@', column: 4 })
        );
        assert_eq!(
            tokenize("/Synth"),
            Err(LexError::Unrecognized { ch: '/', column: 1 })
        );
    }

    #[test]
    fn test_address_stops_at_trailing_slash() {
        let err = tokenize("/a/b/").unwrap_err();
        assert_eq!(err, LexError::Unrecognized { ch: '/', column: 5 });
    }

    #[test]
    fn test_spans_cover_line() {
        let line = "/a  7";
        let spanned = tokenize_spanned(line).unwrap();
        assert_eq!(spanned.len(), 3);
        assert_eq!((spanned[1].start, spanned[1].end), (2, 4));
        assert_eq!(spanned.last().unwrap().end, line.len());
    }

    #[test]
    fn test_empty_line() {
        assert!(tokenize("").unwrap().is_empty());
    }
}
