//! Recursive descent parser: OR < AND < NOT < primary

use super::lexer::{Bracket, Token};
use super::{Attribute, Condition};
use crate::{FlowError, Result};

/// Maximum combined nesting of brackets and negations
pub const MAX_DEPTH: usize = 256;

/// Parser over a normalized token stream
pub struct ConditionParser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl ConditionParser {
    /// Create a parser
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Parse the whole token stream into one condition
    pub fn parse(mut self) -> Result<Condition> {
        let condition = self.parse_or()?;
        if let Some(token) = self.peek() {
            return Err(FlowError::Condition(format!(
                "Unexpected {} after complete condition",
                describe(token)
            )));
        }
        Ok(condition)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(FlowError::Condition(format!(
                "Condition nested too deeply (more than {} levels)",
                MAX_DEPTH
            )));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Condition> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition> {
        let mut left = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Condition> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.descend()?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Condition> {
        match self.next() {
            Some(Token::Open(kind)) => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.next() {
                    Some(Token::Close(close)) if close == kind => Ok(inner),
                    Some(Token::Close(close)) => Err(FlowError::Condition(format!(
                        "Mismatched brackets: {} closed by {}",
                        open_char(kind),
                        close_char(close)
                    ))),
                    Some(other) => Err(FlowError::Condition(format!(
                        "Expected {} but found {}",
                        close_char(kind),
                        describe(&other)
                    ))),
                    None => Err(FlowError::Condition(format!(
                        "Missing closing {}",
                        close_char(kind)
                    ))),
                }
            }
            Some(Token::Word(name)) => self.parse_comparison(&name),
            Some(other) => Err(FlowError::Condition(format!(
                "Expected attribute but found {}",
                describe(&other)
            ))),
            None => Err(FlowError::Condition("Unexpected end of condition".into())),
        }
    }

    fn parse_comparison(&mut self, name: &str) -> Result<Condition> {
        let attr = Attribute::from_name(name)
            .ok_or_else(|| FlowError::Condition(format!("Unknown attribute: {}", name)))?;

        let op = match self.next() {
            Some(Token::Compare(op)) => op,
            Some(other) => {
                return Err(FlowError::Condition(format!(
                    "Expected comparator after {} but found {}",
                    name,
                    describe(&other)
                )))
            }
            None => {
                return Err(FlowError::Condition(format!(
                    "Missing comparator after {}",
                    name
                )))
            }
        };

        match self.next() {
            Some(Token::Word(value)) => Ok(Condition::Compare { attr, op, value }),
            Some(other) => Err(FlowError::Condition(format!(
                "Expected value after {} {} but found {}",
                name,
                op,
                describe(&other)
            ))),
            None => Err(FlowError::Condition(format!(
                "Missing value after {} {}",
                name, op
            ))),
        }
    }
}

fn open_char(kind: Bracket) -> char {
    match kind {
        Bracket::Round => '(',
        Bracket::Square => '[',
        Bracket::Curly => '{',
    }
}

fn close_char(kind: Bracket) -> char {
    match kind {
        Bracket::Round => ')',
        Bracket::Square => ']',
        Bracket::Curly => '}',
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Open(kind) => format!("'{}'", open_char(*kind)),
        Token::Close(kind) => format!("'{}'", close_char(*kind)),
        Token::Not => "'!'".to_string(),
        Token::And => "'&'".to_string(),
        Token::Or => "'|'".to_string(),
        Token::Compare(op) => format!("'{}'", op),
        Token::Word(word) => format!("{:?}", word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::condition::lexer::tokenize;

    fn parse(input: &str) -> Result<Condition> {
        ConditionParser::new(tokenize(input)?).parse()
    }

    #[test]
    fn test_nesting_at_limit() {
        let input = format!("{}dport = 1{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert!(parse(&input).is_ok());
        let input = format!("{}dport = 1", "!".repeat(MAX_DEPTH));
        assert!(parse(&input).is_ok());
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let depth = 10_000;
        for input in [
            format!("{}dport = 1{}", "(".repeat(depth), ")".repeat(depth)),
            format!("{}dport = 1", "!".repeat(depth)),
            format!("{}dport = 1{}", "[!".repeat(depth), "]".repeat(depth)),
        ] {
            match parse(&input) {
                Err(FlowError::Condition(msg)) => assert!(msg.contains("nested too deeply")),
                other => panic!("expected a nesting error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_sibling_groups_do_not_accumulate() {
        let group = format!("{}dport = 1{}", "(".repeat(200), ")".repeat(200));
        let input = vec![group; 4].join(" | ");
        assert!(parse(&input).is_ok());
    }
}
