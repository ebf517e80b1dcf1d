//! Recursive-descent parser for selector source text
//!
//! Type errors are reported at parse time so a rule with a bad selector is
//! rejected when it is loaded, not on every evaluation.

use regex::Regex;

use crate::ast::{
    Attr, Axis, Comparison, Connector, Expr, Literal, Operator, Position, Selector, Unit,
    ValueKind,
};
use crate::error::{SelectorError, SelectorResult};

pub(crate) struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    pub(crate) fn parse_selector(mut self) -> SelectorResult<Selector> {
        self.skip_ws();
        let mut units = vec![self.parse_unit()?];
        let mut connectors = Vec::new();

        loop {
            let had_ws = self.skip_ws();
            if self.peek().is_none() {
                break;
            }
            if !had_ws {
                return Err(self.error("whitespace or end of selector"));
            }
            let connector = match self.peek() {
                Some('>' | '<' | '+' | '-') => {
                    let connector = self.parse_connector()?;
                    if !self.skip_ws() {
                        return Err(self.error("whitespace after connector"));
                    }
                    connector
                }
                _ => Connector::DESCENDANT,
            };
            connectors.push(connector);
            units.push(self.parse_unit()?);
        }

        let mut targets = units
            .iter()
            .enumerate()
            .filter(|(_, unit)| unit.is_target)
            .map(|(i, _)| i);
        let target = match (targets.next(), targets.next()) {
            (None, _) => units.len() - 1,
            (Some(i), None) => i,
            (Some(_), Some(_)) => return Err(SelectorError::MultipleTargets),
        };

        Ok(Selector {
            source: self.source.trim().to_string(),
            units,
            connectors,
            target,
        })
    }

    fn parse_connector(&mut self) -> SelectorResult<Connector> {
        let axis = match self.bump() {
            Some('>') => Axis::Ancestor,
            Some('<') => Axis::Child,
            Some('+') => Axis::PrevSibling,
            Some('-') => Axis::NextSibling,
            _ => return Err(self.error_at(self.pos.saturating_sub(1), "connector")),
        };

        let position = if self.eat(axis.symbol()) {
            Position::Any
        } else if self.peek().is_some_and(|c| c.is_ascii_digit()) {
            let start = self.pos;
            let digits = self.take_while(|c| c.is_ascii_digit());
            match digits.parse::<usize>() {
                Ok(n) if n >= 1 => Position::Nth(n),
                _ => return Err(self.error_at(start, "positive connector index")),
            }
        } else {
            Position::Direct
        };

        Ok(Connector { axis, position })
    }

    fn parse_unit(&mut self) -> SelectorResult<Unit> {
        let is_target = self.eat('@');

        let mut wildcard = false;
        let name = if self.eat('*') {
            wildcard = true;
            None
        } else if self.peek().is_some_and(is_name_start) {
            Some(self.take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '$')))
        } else {
            None
        };

        let mut blocks = Vec::new();
        while self.eat('[') {
            self.skip_ws();
            blocks.push(self.parse_or()?);
            self.skip_ws();
            if !self.eat(']') {
                return Err(self.error("']'"));
            }
        }

        if name.is_none() && !wildcard && blocks.is_empty() {
            return Err(self.error("class name, '*' or '['"));
        }

        let expr = match blocks.len() {
            0 => None,
            1 => blocks.pop(),
            _ => Some(Expr::And(blocks)),
        };

        Ok(Unit {
            name,
            expr,
            is_target,
        })
    }

    fn parse_or(&mut self) -> SelectorResult<Expr> {
        let mut items = vec![self.parse_and()?];
        loop {
            self.skip_ws();
            if !self.eat_str("||") {
                break;
            }
            self.skip_ws();
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::Or(items)
        })
    }

    fn parse_and(&mut self) -> SelectorResult<Expr> {
        let mut items = vec![self.parse_primary()?];
        loop {
            self.skip_ws();
            if !self.eat_str("&&") {
                break;
            }
            self.skip_ws();
            items.push(self.parse_primary()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::And(items)
        })
    }

    fn parse_primary(&mut self) -> SelectorResult<Expr> {
        self.skip_ws();
        if self.eat('(') {
            self.skip_ws();
            let expr = self.parse_or()?;
            self.skip_ws();
            if !self.eat(')') {
                return Err(self.error("')'"));
            }
            return Ok(expr);
        }
        self.parse_comparison().map(Expr::Compare)
    }

    fn parse_comparison(&mut self) -> SelectorResult<Comparison> {
        let ident = self.take_while(|c| c.is_alphanumeric() || c == '_');
        if ident.is_empty() {
            return Err(self.error("attribute name"));
        }
        let attr =
            Attr::from_name(&ident).ok_or_else(|| SelectorError::UnknownAttribute(ident.clone()))?;

        let mut length = false;
        if self.eat('.') {
            let member = self.take_while(|c| c.is_alphanumeric() || c == '_');
            if member == "length" && attr.kind() == ValueKind::Str {
                length = true;
            } else {
                return Err(SelectorError::UnknownMember {
                    attr: ident,
                    member,
                });
            }
        }

        self.skip_ws();
        let op = self.parse_operator()?;
        self.skip_ws();
        let literal = self.parse_literal()?;

        let operand_kind = if length { ValueKind::Int } else { attr.kind() };
        let type_ok = match literal.kind() {
            None => matches!(op, Operator::Eq | Operator::Ne),
            Some(kind) => kind == operand_kind && op.accepts(kind),
        };
        if !type_ok {
            let attr_name = if length {
                format!("{}.length", attr.name())
            } else {
                attr.name().to_string()
            };
            return Err(SelectorError::MismatchOperator {
                attr: attr_name,
                op: op.symbol().to_string(),
                literal: literal.to_string(),
            });
        }

        let regex = match (&op, &literal) {
            (Operator::Matches | Operator::NotMatches, Literal::Str(pattern)) => Some(
                Regex::new(pattern).map_err(|e| SelectorError::InvalidRegex {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?,
            ),
            _ => None,
        };

        Ok(Comparison {
            attr,
            length,
            op,
            literal,
            regex,
        })
    }

    fn parse_operator(&mut self) -> SelectorResult<Operator> {
        for op in Operator::ALL {
            if self.eat_str(op.symbol()) {
                return Ok(op);
            }
        }
        Err(self.error("comparison operator"))
    }

    fn parse_literal(&mut self) -> SelectorResult<Literal> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.bump();
                self.parse_string(quote).map(Literal::Str)
            }
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let start = self.pos;
                let negative = self.eat('-');
                let digits = self.take_while(|c| c.is_ascii_digit());
                let text = if negative {
                    format!("-{digits}")
                } else {
                    digits
                };
                text.parse::<i64>()
                    .map(Literal::Int)
                    .map_err(|_| self.error_at(start, "integer literal"))
            }
            Some(c) if c.is_alphabetic() => {
                let start = self.pos;
                match self.take_while(|c| c.is_alphanumeric()).as_str() {
                    "true" => Ok(Literal::Bool(true)),
                    "false" => Ok(Literal::Bool(false)),
                    "null" => Ok(Literal::Null),
                    _ => Err(self.error_at(start, "literal")),
                }
            }
            _ => Err(self.error("literal")),
        }
    }

    fn parse_string(&mut self, quote: char) -> SelectorResult<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("closing quote")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some('b') => '\u{8}',
                        Some('f') => '\u{c}',
                        Some('u') => self.parse_unicode_escape()?,
                        Some(c @ ('\\' | '\'' | '"')) => c,
                        _ => return Err(self.error_at(self.pos.saturating_sub(1), "escape sequence")),
                    };
                    out.push(escaped);
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_unicode_escape(&mut self) -> SelectorResult<char> {
        let start = self.pos;
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error_at(start, "four hex digits"))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| self.error_at(start, "valid unicode scalar"))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, expected: &str) -> bool {
        let len = expected.chars().count();
        let matches = self.pos + len <= self.chars.len()
            && self.chars[self.pos..self.pos + len]
                .iter()
                .copied()
                .eq(expected.chars());
        if matches {
            self.pos += len;
        }
        matches
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn error(&self, expected: &str) -> SelectorError {
        self.error_at(self.pos, expected)
    }

    fn error_at(&self, offset: usize, expected: &str) -> SelectorError {
        let found = match self.chars.get(offset) {
            Some(c) => format!("'{c}'"),
            None => "end of input".to_string(),
        };
        SelectorError::Syntax {
            offset,
            expected: expected.to_string(),
            found,
        }
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}
