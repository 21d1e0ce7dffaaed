//! Permissive parser for Python-style literals and keyword arguments
//!
//! Accepts what models write when they imitate a function call in prose:
//! single or double quotes, `True`/`False`/`None`, tuples, trailing commas
//! and bare words. Anything it cannot read yields `None`.

use serde_json::{Map, Number, Value};

/// Parse a single literal that must span the whole input
pub(super) fn parse_value(text: &str) -> Option<Value> {
    let mut parser = Parser::new(text);
    let value = parser.value()?;
    parser.skip_ws();
    parser.at_end().then_some(value)
}

/// Parse `key=value, key2=value2` into an object
pub(super) fn parse_kwargs(text: &str) -> Option<Map<String, Value>> {
    let mut parser = Parser::new(text);
    let mut map = Map::new();
    loop {
        parser.skip_ws();
        if parser.at_end() {
            break;
        }
        let key = parser.identifier()?;
        parser.skip_ws();
        if !parser.eat('=') && !parser.eat(':') {
            return None;
        }
        let value = parser.value()?;
        map.insert(key, value);
        parser.skip_ws();
        if parser.at_end() {
            break;
        }
        if !parser.eat(',') {
            return None;
        }
    }
    Some(map)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn identifier(&mut self) -> Option<String> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => self.pos += 1,
            _ => return None,
        }
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '-')
        {
            self.pos += 1;
        }
        Some(self.chars[start..self.pos].iter().collect())
    }

    fn value(&mut self) -> Option<Value> {
        self.skip_ws();
        match self.peek()? {
            '{' => self.object(),
            '[' => self.sequence(']'),
            '(' => self.sequence(')'),
            '"' | '\'' => self.string().map(Value::String),
            c if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            _ => {
                let word = self.identifier()?;
                Some(match word.as_str() {
                    "True" | "true" => Value::Bool(true),
                    "False" | "false" => Value::Bool(false),
                    "None" | "null" | "none" => Value::Null,
                    _ => Value::String(word),
                })
            }
        }
    }

    fn object(&mut self) -> Option<Value> {
        self.eat('{');
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.eat('}') {
                return Some(Value::Object(map));
            }
            let key = match self.peek()? {
                '"' | '\'' => self.string()?,
                c if c == '-' || c.is_ascii_digit() => match self.number()? {
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                },
                _ => self.identifier()?,
            };
            self.skip_ws();
            if !self.eat(':') {
                return None;
            }
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            if !self.eat(',') {
                self.skip_ws();
                return self.eat('}').then_some(Value::Object(map));
            }
        }
    }

    fn sequence(&mut self, close: char) -> Option<Value> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Some(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            if !self.eat(',') {
                self.skip_ws();
                return self.eat(close).then_some(Value::Array(items));
            }
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.peek()?;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let c = self.peek()?;
            self.pos += 1;
            if c == quote {
                return Some(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let escaped = self.peek()?;
            self.pos += 1;
            match escaped {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'u' => {
                    let hex: String = self.chars.get(self.pos..self.pos + 4)?.iter().collect();
                    let code = u32::from_str_radix(&hex, 16).ok()?;
                    out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    self.pos += 4;
                }
                other => out.push(other),
            }
        }
    }

    fn number(&mut self) -> Option<Value> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E' | '_'))
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let text = text.strip_prefix('+').unwrap_or(&text);
        if let Ok(int) = text.parse::<i64>() {
            return Some(Value::Number(int.into()));
        }
        let float = text.parse::<f64>().ok()?;
        Number::from_f64(float).map(Value::Number)
    }
}
