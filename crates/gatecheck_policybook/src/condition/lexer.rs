// SPDX-License-Identifier: Apache-2.0

//! Tokenizer for the condition mini-language.

use crate::Error;

/// A lexical token of the condition language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A bare word: keyword, identifier or plain string.
    Ident(String),
    /// A quoted string, remembering the quote character used in the source.
    Str {
        /// The unquoted value.
        value: String,
        /// `'` or `"`.
        quote: char,
    },
    /// An integer literal.
    Int(i64),
    /// A float literal.
    Float(f64),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `=`
    Assign,
    /// `<<`
    ShiftAssign,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

fn parse_error(condition: &str, message: impl Into<String>) -> Error {
    Error::ParseError {
        condition: condition.to_owned(),
        error: message.into(),
    }
}

/// Splits a condition string into tokens.
///
/// Numbers absorb a leading sign (the grammar has no arithmetic operators,
/// so `-` and `+` only ever introduce a signed literal).
pub fn tokenize(condition: &str) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::new();
    let mut chars = condition.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                _ = chars.next();
            }
            '(' => {
                _ = chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                _ = chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                _ = chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                _ = chars.next();
                tokens.push(Token::RBracket);
            }
            ',' => {
                _ = chars.next();
                tokens.push(Token::Comma);
            }
            '.' => {
                _ = chars.next();
                tokens.push(Token::Dot);
            }
            '\'' | '"' => {
                _ = chars.next();
                let mut value = String::new();
                let mut closed = false;
                for (_, sc) in chars.by_ref() {
                    if sc == c {
                        closed = true;
                        break;
                    }
                    value.push(sc);
                }
                if !closed {
                    return Err(parse_error(condition, "unterminated string literal"));
                }
                tokens.push(Token::Str { value, quote: c });
            }
            '=' => {
                _ = chars.next();
                if matches!(chars.peek(), Some(&(_, '='))) {
                    _ = chars.next();
                    tokens.push(Token::EqEq);
                } else {
                    tokens.push(Token::Assign);
                }
            }
            '!' => {
                _ = chars.next();
                if matches!(chars.peek(), Some(&(_, '='))) {
                    _ = chars.next();
                    tokens.push(Token::NotEq);
                } else {
                    return Err(parse_error(condition, "unexpected character `!`"));
                }
            }
            '<' => {
                _ = chars.next();
                match chars.peek() {
                    Some(&(_, '=')) => {
                        _ = chars.next();
                        tokens.push(Token::LtEq);
                    }
                    Some(&(_, '<')) => {
                        _ = chars.next();
                        tokens.push(Token::ShiftAssign);
                    }
                    _ => tokens.push(Token::Lt),
                }
            }
            '>' => {
                _ = chars.next();
                if matches!(chars.peek(), Some(&(_, '='))) {
                    _ = chars.next();
                    tokens.push(Token::GtEq);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '-' | '+' => {
                _ = chars.next();
                match chars.peek() {
                    Some(&(_, d)) if d.is_ascii_digit() => {
                        tokens.push(lex_number(condition, &mut chars, c == '-')?);
                    }
                    _ => {
                        return Err(parse_error(
                            condition,
                            format!("unexpected character `{c}`"),
                        ));
                    }
                }
            }
            _ if c.is_ascii_digit() => {
                tokens.push(lex_number(condition, &mut chars, false)?);
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&(_, wc)) = chars.peek() {
                    if wc.is_alphanumeric() || wc == '_' {
                        word.push(wc);
                        _ = chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(word));
            }
            _ => {
                return Err(parse_error(
                    condition,
                    format!("unexpected character `{c}` at offset {pos}"),
                ));
            }
        }
    }

    Ok(tokens)
}

fn lex_number(
    condition: &str,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    negative: bool,
) -> Result<Token, Error> {
    let mut text = String::new();
    if negative {
        text.push('-');
    }
    let mut is_float = false;
    while let Some(&(_, c)) = chars.peek() {
        if c.is_ascii_digit() {
            text.push(c);
            _ = chars.next();
        } else if c == '.' {
            // A dot only continues the number when a digit follows; otherwise
            // it is a path separator (`input.range[0].i`).
            let mut lookahead = chars.clone();
            _ = lookahead.next();
            match lookahead.peek() {
                Some(&(_, d)) if d.is_ascii_digit() => {
                    if is_float {
                        break;
                    }
                    is_float = true;
                    text.push('.');
                    _ = chars.next();
                }
                _ => break,
            }
        } else if c == 'e' || c == 'E' {
            let mut lookahead = chars.clone();
            _ = lookahead.next();
            match lookahead.peek() {
                Some(&(_, d)) if d.is_ascii_digit() || d == '-' || d == '+' => {
                    is_float = true;
                    text.push(c);
                    _ = chars.next();
                    let (_, sign_or_digit) = *lookahead.peek().expect("peeked above");
                    text.push(sign_or_digit);
                    _ = chars.next();
                }
                _ => break,
            }
        } else {
            break;
        }
    }

    if is_float {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|e| parse_error(condition, format!("invalid float literal `{text}`: {e}")))
    } else {
        text.parse::<i64>()
            .map(Token::Int)
            .map_err(|e| parse_error(condition, format!("invalid integer literal `{text}`: {e}")))
    }
}
