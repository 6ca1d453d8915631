use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::operations::{require_str, ExecutionContext, OperationError, OperationHandler};

/// Evaluates basic arithmetic expressions.
///
/// Supports `+ - * /`, unary minus, parentheses, and decimal numbers.
/// Division by zero and malformed input are handler errors, never panics.
#[derive(Debug, Clone, Copy)]
pub struct CalculatorHandler;

#[async_trait]
impl OperationHandler for CalculatorHandler {
    fn name(&self) -> &str {
        "calculator"
    }

    fn describe(&self) -> &str {
        "Evaluate an arithmetic expression (+, -, *, /, parentheses)"
    }

    fn validate(&self, parameters: &Map<String, Value>) -> Result<(), OperationError> {
        require_str(parameters, "expression").map(|_| ())
    }

    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        _ctx: &ExecutionContext,
    ) -> Result<Value, OperationError> {
        let expression = require_str(parameters, "expression")?;
        let result = evaluate(expression).map_err(OperationError::Handler)?;
        Ok(json!({ "expression": expression, "result": result }))
    }
}

/// Evaluates an expression string to a number.
///
/// # Errors
/// A human readable message describing the first syntax or math error.
pub fn evaluate(expression: &str) -> Result<f64, String> {
    let mut parser = ExprParser {
        chars: expression.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.chars.len() {
        return Err(format!(
            "unexpected trailing input at position {}",
            parser.pos
        ));
    }
    Ok(value)
}

struct ExprParser {
    chars: Vec<char>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                '+' => {
                    self.bump();
                    value += self.term()?;
                }
                '-' => {
                    self.bump();
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.factor()?;
        while let Some(op) = self.peek() {
            match op {
                '*' => {
                    self.bump();
                    value *= self.factor()?;
                }
                '/' => {
                    self.bump();
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err("division by zero".into());
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('-') => {
                self.bump();
                Ok(-self.factor()?)
            }
            Some('(') => {
                self.bump();
                let value = self.expr()?;
                if self.bump() != Some(')') {
                    return Err("missing closing parenthesis".into());
                }
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(format!("unexpected character `{c}`")),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.')
        {
            self.bump();
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse()
            .map_err(|_| format!("invalid number `{text}`"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn respects_precedence_and_parentheses() {
        assert!((evaluate("2 + 3 * 4").unwrap() - 14.0).abs() < 1e-9);
        assert!((evaluate("(2 + 3) * 4").unwrap() - 20.0).abs() < 1e-9);
        assert!((evaluate("-3 + 10 / 4").unwrap() + 0.5).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_input_without_panicking() {
        assert!(evaluate("1 / 0").is_err());
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("hello").is_err());
    }

    #[tokio::test]
    async fn handler_wraps_the_evaluator() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new(dir.path());
        let mut params = Map::new();
        params.insert("expression".into(), json!("6 * 7"));
        let output = CalculatorHandler.execute(&params, &ctx).await.unwrap();
        assert_eq!(output["result"], 42.0);
    }
}
