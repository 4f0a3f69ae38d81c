//! Arithmetic calculator tool

use crate::registry::Tool;
use axon_core::{Error, Result};
use serde_json::Value;

pub struct CalculatorTool;

#[async_trait::async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Perform mathematical calculations"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Mathematical expression to evaluate"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let expression = args
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::tool("calculator", "missing 'expression' argument"))?;

        if !expression
            .chars()
            .all(|c| c.is_ascii_digit() || "+-*/(). ".contains(c))
        {
            return Err(Error::tool("calculator", "invalid characters in expression"));
        }

        let value = Parser::new(expression).parse()?;
        if value.fract() == 0.0 && value.abs() < 1e15 {
            Ok(format!("{}", value as i64))
        } else {
            Ok(format!("{value}"))
        }
    }
}

/// Recursive-descent evaluator over + - * / ( ) and unary minus.
struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { chars: input.chars().peekable() }
    }

    fn parse(mut self) -> Result<f64> {
        let value = self.expression()?;
        self.skip_spaces();
        if self.chars.peek().is_some() {
            return Err(Error::tool("calculator", "unexpected trailing input"));
        }
        Ok(value)
    }

    fn expression(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        loop {
            self.skip_spaces();
            match self.chars.peek() {
                Some('+') => {
                    self.chars.next();
                    value += self.term()?;
                }
                Some('-') => {
                    self.chars.next();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.factor()?;
        loop {
            self.skip_spaces();
            match self.chars.peek() {
                Some('*') => {
                    self.chars.next();
                    value *= self.factor()?;
                }
                Some('/') => {
                    self.chars.next();
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err(Error::tool("calculator", "division by zero"));
                    }
                    value /= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    fn factor(&mut self) -> Result<f64> {
        self.skip_spaces();
        match self.chars.peek() {
            Some('-') => {
                self.chars.next();
                Ok(-self.factor()?)
            }
            Some('(') => {
                self.chars.next();
                let value = self.expression()?;
                self.skip_spaces();
                if self.chars.next() != Some(')') {
                    return Err(Error::tool("calculator", "unbalanced parentheses"));
                }
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || *c == '.' => self.number(),
            _ => Err(Error::tool("calculator", "malformed expression")),
        }
    }

    fn number(&mut self) -> Result<f64> {
        let mut raw = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                raw.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        raw.parse()
            .map_err(|_| Error::tool("calculator", format!("bad number '{raw}'")))
    }

    fn skip_spaces(&mut self) {
        while matches!(self.chars.peek(), Some(' ')) {
            self.chars.next();
        }
    }
}
