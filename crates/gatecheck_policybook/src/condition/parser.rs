// SPDX-License-Identifier: Apache-2.0

//! Recursive-descent parser for the condition mini-language.
//!
//! Operator precedence, tightest first: `>=`/`<=`/`<`/`>`, then `!=`, then
//! `==`, then `is`/`is not`, then `in`/`not in`/`contains`/`not contains`,
//! then `has key`/`lacks key`, then unary `not`, then `and`/`or` (one level,
//! left associative).

use crate::ast::{BinaryExpr, Expr, KeywordValue, SearchType, SelectAttrType, SelectType};
use crate::condition::lexer::{tokenize, Token};
use crate::condition::{VariableMap, VALID_SELECT_ATTR_OPERATORS, VALID_SELECT_OPERATORS};
use crate::Error;

/// Atoms that are only meaningful on the right-hand side of `is`/`is not`.
enum Atom {
    Expr(Expr),
    Search(SearchType),
    Select(SelectType),
    SelectAttr(SelectAttrType),
}

pub(crate) struct Parser<'a> {
    condition: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    vars: &'a VariableMap,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(condition: &'a str, vars: &'a VariableMap) -> Result<Self, Error> {
        Ok(Self {
            condition,
            tokens: tokenize(condition)?,
            pos: 0,
            vars,
        })
    }

    pub(crate) fn parse(mut self) -> Result<Expr, Error> {
        let expr = self.parse_or_and()?;
        if let Some(token) = self.peek() {
            return Err(self.error(format!("unexpected trailing token {token:?}")));
        }
        Ok(expr)
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::ParseError {
            condition: self.condition.to_owned(),
            error: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), Error> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(self.error(format!("expected {expected:?}, found {token:?}"))),
            None => Err(self.error(format!("expected {expected:?}, found end of input"))),
        }
    }

    /// Returns the bare word at the given lookahead offset, if any.
    fn word_at(&self, offset: usize) -> Option<&str> {
        match self.peek_at(offset) {
            Some(Token::Ident(word)) => Some(word.as_str()),
            _ => None,
        }
    }

    fn word_at_is(&self, offset: usize, keyword: &str) -> bool {
        self.word_at(offset)
            .is_some_and(|word| word.eq_ignore_ascii_case(keyword))
    }

    // and / or, one level, left associative.
    fn parse_or_and(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_not()?;
        loop {
            let op = match self.word_at(0) {
                Some("and") => Expr::And as fn(Box<BinaryExpr>) -> Expr,
                Some("or") => Expr::Or as fn(Box<BinaryExpr>) -> Expr,
                _ => break,
            };
            _ = self.next();
            let rhs = self.parse_not()?;
            lhs = op(BinaryExpr::new(lhs, rhs));
        }
        Ok(lhs)
    }

    // Unary `not`, right associative.
    fn parse_not(&mut self) -> Result<Expr, Error> {
        if self.word_at(0) == Some("not") {
            _ = self.next();
            return Ok(Expr::Negate(Box::new(self.parse_not()?)));
        }
        self.parse_has_key()
    }

    // `has key` / `lacks key` (case-insensitive keywords).
    fn parse_has_key(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_membership()?;
        loop {
            let op = if self.word_at_is(0, "has") && self.word_at_is(1, "key") {
                Expr::KeyInDict as fn(Box<BinaryExpr>) -> Expr
            } else if self.word_at_is(0, "lacks") && self.word_at_is(1, "key") {
                Expr::KeyNotInDict as fn(Box<BinaryExpr>) -> Expr
            } else {
                break;
            };
            _ = self.next();
            _ = self.next();
            let rhs = self.parse_membership()?;
            lhs = op(BinaryExpr::new(lhs, rhs));
        }
        Ok(lhs)
    }

    // `in` / `not in` / `contains` / `not contains` (case-insensitive).
    fn parse_membership(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_is()?;
        loop {
            let (op, keywords) = if self.word_at_is(0, "in") {
                (Expr::ItemInList as fn(Box<BinaryExpr>) -> Expr, 1)
            } else if self.word_at_is(0, "contains") {
                (Expr::ListContainsItem as fn(Box<BinaryExpr>) -> Expr, 1)
            } else if self.word_at_is(0, "not") && self.word_at_is(1, "in") {
                (Expr::ItemNotInList as fn(Box<BinaryExpr>) -> Expr, 2)
            } else if self.word_at_is(0, "not") && self.word_at_is(1, "contains") {
                (Expr::ListNotContainsItem as fn(Box<BinaryExpr>) -> Expr, 2)
            } else {
                break;
            };
            for _ in 0..keywords {
                _ = self.next();
            }
            let rhs = self.parse_is()?;
            lhs = op(BinaryExpr::new(lhs, rhs));
        }
        Ok(lhs)
    }

    // `is` / `is not` with a specification atom on the right-hand side.
    fn parse_is(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_eq()?;
        while self.word_at(0) == Some("is") {
            _ = self.next();
            let negated = self.word_at(0) == Some("not");
            if negated {
                _ = self.next();
            }
            let rhs = self.parse_atom()?;
            lhs = match rhs {
                Atom::Expr(Expr::String(word)) if word == "defined" => {
                    if negated {
                        Expr::IsNotDefined(Box::new(lhs))
                    } else {
                        Expr::IsDefined(Box::new(lhs))
                    }
                }
                Atom::Search(search) => {
                    if negated {
                        Expr::SearchNotMatches {
                            lhs: Box::new(lhs),
                            search,
                        }
                    } else {
                        Expr::SearchMatches {
                            lhs: Box::new(lhs),
                            search,
                        }
                    }
                }
                Atom::Select(select) => {
                    if negated {
                        Expr::SelectNot {
                            lhs: Box::new(lhs),
                            select,
                        }
                    } else {
                        Expr::Select {
                            lhs: Box::new(lhs),
                            select,
                        }
                    }
                }
                Atom::SelectAttr(selectattr) => {
                    if negated {
                        Expr::SelectAttrNot {
                            lhs: Box::new(lhs),
                            selectattr,
                        }
                    } else {
                        Expr::SelectAttr {
                            lhs: Box::new(lhs),
                            selectattr,
                        }
                    }
                }
                _ => {
                    return Err(self.error(
                        "`is` must be followed by `defined`, `search(..)`, `match(..)`, \
                         `regex(..)`, `select(..)` or `selectattr(..)`",
                    ));
                }
            };
        }
        Ok(lhs)
    }

    // `==` and the `<<` assignment check.
    fn parse_eq(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_neq()?;
        loop {
            match self.peek() {
                Some(Token::EqEq) => {
                    _ = self.next();
                    let rhs = self.parse_neq()?;
                    lhs = Expr::Equals(BinaryExpr::new(lhs, rhs));
                }
                Some(Token::ShiftAssign) => {
                    _ = self.next();
                    return Err(self.reject_assignment(&lhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_neq(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Some(Token::NotEq)) {
            _ = self.next();
            let rhs = self.parse_cmp()?;
            lhs = Expr::NotEquals(BinaryExpr::new(lhs, rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_operand()?;
        loop {
            let op = match self.peek() {
                Some(Token::GtEq) => Expr::GreaterThanOrEqualTo as fn(Box<BinaryExpr>) -> Expr,
                Some(Token::LtEq) => Expr::LessThanOrEqualTo as fn(Box<BinaryExpr>) -> Expr,
                Some(Token::Gt) => Expr::GreaterThan as fn(Box<BinaryExpr>) -> Expr,
                Some(Token::Lt) => Expr::LessThan as fn(Box<BinaryExpr>) -> Expr,
                _ => break,
            };
            _ = self.next();
            let rhs = self.parse_operand()?;
            lhs = op(BinaryExpr::new(lhs, rhs));
        }
        Ok(lhs)
    }

    /// Assignments exist in the grammar only to be diagnosed: the left-hand
    /// side must be `events.<var>` or `facts.<var>`, and even a well-formed
    /// one cannot be compiled to the target language.
    fn reject_assignment(&self, lhs: &Expr) -> Error {
        let text = match lhs {
            Expr::String(s) => s.clone(),
            Expr::Input(path) | Expr::Variable(path) => path.clone(),
            _ => {
                return Error::InvalidAssignment {
                    expression: self.condition.to_owned(),
                };
            }
        };
        let parts: Vec<&str> = text.split('.').collect();
        let valid = parts.len() == 2
            && matches!(parts[0], "events" | "facts")
            && parts[1].chars().all(|c| c.is_alphanumeric() || c == '_');
        if valid {
            self.error("assignment expressions are not supported in policybook conditions")
        } else {
            Error::InvalidAssignment {
                expression: text,
            }
        }
    }

    fn parse_operand(&mut self) -> Result<Expr, Error> {
        match self.parse_atom()? {
            Atom::Expr(expr) => Ok(expr),
            Atom::Search(_) | Atom::Select(_) | Atom::SelectAttr(_) => Err(self.error(
                "`search(..)`, `select(..)` and `selectattr(..)` are only valid after `is`",
            )),
        }
    }

    fn parse_atom(&mut self) -> Result<Atom, Error> {
        match self.peek().cloned() {
            Some(Token::LParen) => {
                _ = self.next();
                let expr = self.parse_or_and()?;
                self.expect(&Token::RParen)?;
                Ok(Atom::Expr(expr))
            }
            Some(Token::LBracket) => Ok(Atom::Expr(self.parse_list()?)),
            Some(Token::Str { value, .. }) => {
                _ = self.next();
                Ok(Atom::Expr(Expr::String(value)))
            }
            Some(Token::Int(value)) => {
                _ = self.next();
                Ok(Atom::Expr(Expr::Integer(value)))
            }
            Some(Token::Float(value)) => {
                _ = self.next();
                Ok(Atom::Expr(Expr::Float(value)))
            }
            Some(Token::Ident(word)) => {
                _ = self.next();
                self.parse_word(&word)
            }
            Some(token) => Err(self.error(format!("unexpected token {token:?}"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_list(&mut self) -> Result<Expr, Error> {
        self.expect(&Token::LBracket)?;
        let mut items = Vec::new();
        if matches!(self.peek(), Some(Token::RBracket)) {
            _ = self.next();
            return Ok(Expr::List(items));
        }
        loop {
            items.push(self.parse_operand()?);
            match self.next() {
                Some(Token::Comma) => {}
                Some(Token::RBracket) => break,
                Some(token) => {
                    return Err(self.error(format!("expected `,` or `]`, found {token:?}")));
                }
                None => return Err(self.error("unterminated list literal")),
            }
        }
        Ok(Expr::List(items))
    }

    fn parse_word(&mut self, word: &str) -> Result<Atom, Error> {
        match word {
            "true" | "True" => return Ok(Atom::Expr(Expr::Boolean(true))),
            "false" | "False" => return Ok(Atom::Expr(Expr::Boolean(false))),
            "null" => return Ok(Atom::Expr(Expr::Null)),
            _ => {}
        }

        let called = matches!(self.peek(), Some(Token::LParen));
        match word {
            "select" if called => return self.parse_select(),
            "selectattr" if called => return self.parse_selectattr(),
            "search" | "match" | "regex" if called => return self.parse_search(word),
            _ => {}
        }

        if word == "input" || self.vars.contains_key(word) {
            let path = self.parse_path(word)?;
            if word == "input" {
                return Ok(Atom::Expr(Expr::Input(path)));
            }
            return Ok(Atom::Expr(Expr::Variable(path)));
        }

        if matches!(self.peek(), Some(Token::Dot | Token::LBracket)) {
            // The word roots a path but is neither `input` nor a declared
            // variable. Assignment targets get their own diagnostic.
            let path = self.parse_path(word)?;
            if matches!(self.peek(), Some(Token::ShiftAssign)) {
                _ = self.next();
                let placeholder = Expr::Variable(path);
                return Err(self.reject_assignment(&placeholder));
            }
            return Err(self.error(format!(
                "unknown identifier root `{word}`: paths must start with `input` or a \
                 variable declared in the policy set"
            )));
        }

        Ok(Atom::Expr(Expr::String(word.to_owned())))
    }

    /// Reassembles the source spelling of a qualified path, preserving the
    /// quote character of bracketed string keys.
    fn parse_path(&mut self, root: &str) -> Result<String, Error> {
        let mut path = root.to_owned();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    _ = self.next();
                    match self.next() {
                        Some(Token::Ident(segment)) => {
                            path.push('.');
                            path.push_str(&segment);
                        }
                        other => {
                            return Err(
                                self.error(format!("expected a path segment, found {other:?}"))
                            );
                        }
                    }
                }
                Some(Token::LBracket) => {
                    _ = self.next();
                    match self.next() {
                        Some(Token::Str { value, quote }) => {
                            path.push('[');
                            path.push(quote);
                            path.push_str(&value);
                            path.push(quote);
                            path.push(']');
                        }
                        Some(Token::Int(index)) => {
                            path.push('[');
                            path.push_str(&index.to_string());
                            path.push(']');
                        }
                        other => {
                            return Err(self.error(format!(
                                "expected a quoted key or an integer index, found {other:?}"
                            )));
                        }
                    }
                    self.expect(&Token::RBracket)?;
                }
                _ => break,
            }
        }
        Ok(path)
    }

    fn parse_select(&mut self) -> Result<Atom, Error> {
        self.expect(&Token::LParen)?;
        let operator = self.parse_spec_string("select operator")?;
        if !VALID_SELECT_OPERATORS.contains(&operator.as_str()) {
            return Err(Error::SelectOperatorError { operator });
        }
        self.expect(&Token::Comma)?;
        let value = self.parse_operand()?;
        self.expect(&Token::RParen)?;
        Ok(Atom::Select(SelectType {
            operator,
            value: Box::new(value),
        }))
    }

    fn parse_selectattr(&mut self) -> Result<Atom, Error> {
        self.expect(&Token::LParen)?;
        let key = self.parse_spec_string("selectattr key")?;
        self.expect(&Token::Comma)?;
        let operator = self.parse_spec_string("selectattr operator")?;
        if !VALID_SELECT_ATTR_OPERATORS.contains(&operator.as_str()) {
            return Err(Error::SelectAttrOperatorError { operator });
        }
        self.expect(&Token::Comma)?;
        let value = self.parse_operand()?;
        self.expect(&Token::RParen)?;
        Ok(Atom::SelectAttr(SelectAttrType {
            key,
            operator,
            value: Box::new(value),
        }))
    }

    fn parse_search(&mut self, kind: &str) -> Result<Atom, Error> {
        self.expect(&Token::LParen)?;
        let pattern = self.parse_operand()?;
        let mut options = Vec::new();
        while matches!(self.peek(), Some(Token::Comma)) {
            _ = self.next();
            let name = match self.next() {
                Some(Token::Ident(name)) => name,
                other => {
                    return Err(self.error(format!("expected an option name, found {other:?}")));
                }
            };
            self.expect(&Token::Assign)?;
            let value = self.parse_operand()?;
            options.push(KeywordValue { name, value });
        }
        self.expect(&Token::RParen)?;
        Ok(Atom::Search(SearchType {
            kind: kind.to_owned(),
            pattern: Box::new(pattern),
            options,
        }))
    }

    fn parse_spec_string(&mut self, what: &str) -> Result<String, Error> {
        match self.next() {
            Some(Token::Str { value, .. }) => Ok(value),
            other => Err(self.error(format!("expected a quoted {what}, found {other:?}"))),
        }
    }
}
