//! Condition tokenizer with synonym normalization

use super::CompareOp;
use crate::{FlowError, Result};

/// Bracket family; an opening bracket must be closed by the same kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    Round,
    Square,
    Curly,
}

/// Normalized condition token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Open(Bracket),
    Close(Bracket),
    Not,
    And,
    Or,
    Compare(CompareOp),
    Word(String),
}

const SYMBOL_CHARS: &[char] = &['!', '&', '|', '*', '+', '=', '<', '>'];

// Longest forms first so that greedy matching picks `===` over `==` over `=`
const SYMBOLS: &[(&str, Token)] = &[
    ("===", Token::Compare(CompareOp::Eq)),
    ("==", Token::Compare(CompareOp::Eq)),
    ("!=", Token::Compare(CompareOp::Ne)),
    ("<=", Token::Compare(CompareOp::Le)),
    (">=", Token::Compare(CompareOp::Ge)),
    ("&&", Token::And),
    ("||", Token::Or),
    ("=", Token::Compare(CompareOp::Eq)),
    ("<", Token::Compare(CompareOp::Lt)),
    (">", Token::Compare(CompareOp::Gt)),
    ("!", Token::Not),
    ("&", Token::And),
    ("*", Token::And),
    ("|", Token::Or),
    ("+", Token::Or),
];

fn bracket(c: char) -> Option<Token> {
    match c {
        '(' => Some(Token::Open(Bracket::Round)),
        '[' => Some(Token::Open(Bracket::Square)),
        '{' => Some(Token::Open(Bracket::Curly)),
        ')' => Some(Token::Close(Bracket::Round)),
        ']' => Some(Token::Close(Bracket::Square)),
        '}' => Some(Token::Close(Bracket::Curly)),
        _ => None,
    }
}

/// Keyword meaning of a word; only applies to whitespace-delimited words
fn keyword(word: &str) -> Option<Token> {
    let token = match word.to_lowercase().as_str() {
        "not" => Token::Not,
        "and" => Token::And,
        "or" => Token::Or,
        "eq" | "-eq" | "equals" => Token::Compare(CompareOp::Eq),
        "neq" | "-neq" | "ne" | "-ne" => Token::Compare(CompareOp::Ne),
        "le" | "-le" | "leq" | "-leq" => Token::Compare(CompareOp::Le),
        "ge" | "-ge" | "geq" | "-geq" => Token::Compare(CompareOp::Ge),
        "less" | "l" | "-l" | "lt" | "-lt" => Token::Compare(CompareOp::Lt),
        "greater" | "g" | "-g" | "gt" | "-gt" => Token::Compare(CompareOp::Gt),
        _ => return None,
    };
    Some(token)
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !SYMBOL_CHARS.contains(&c) && bracket(c).is_none()
}

/// A character that lets an adjacent word act as a keyword
fn is_separator(c: Option<char>) -> bool {
    match c {
        None => true,
        Some(c) => c.is_whitespace() || bracket(c).is_some(),
    }
}

/// Split a condition into normalized tokens
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if let Some(token) = bracket(c) {
            tokens.push(token);
            i += 1;
        } else if SYMBOL_CHARS.contains(&c) {
            let start = i;
            while i < chars.len() && SYMBOL_CHARS.contains(&chars[i]) {
                i += 1;
            }
            let run: String = chars[start..i].iter().collect();
            split_symbols(&run, &mut tokens)?;
        } else {
            let start = i;
            while i < chars.len() && is_word_char(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let before = start.checked_sub(1).map(|p| chars[p]);
            let after = chars.get(i).copied();
            let spaced = is_separator(before) && is_separator(after);

            match keyword(&word) {
                Some(token) if spaced => tokens.push(token),
                _ => tokens.push(Token::Word(word)),
            }
        }
    }

    Ok(tokens)
}

fn split_symbols(mut run: &str, tokens: &mut Vec<Token>) -> Result<()> {
    while !run.is_empty() {
        let (symbol, token) = SYMBOLS
            .iter()
            .find(|(symbol, _)| run.starts_with(symbol))
            .ok_or_else(|| FlowError::Condition(format!("Unknown operator near {:?}", run)))?;
        tokens.push(token.clone());
        run = &run[symbol.len()..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(s: &str) -> Token {
        Token::Word(s.to_string())
    }

    #[test]
    fn test_symbol_forms() {
        let tokens = tokenize("dport>=1024&&!proto===UDP").unwrap();
        assert_eq!(
            tokens,
            vec![
                word("dport"),
                Token::Compare(CompareOp::Ge),
                word("1024"),
                Token::And,
                Token::Not,
                word("proto"),
                Token::Compare(CompareOp::Eq),
                word("UDP"),
            ]
        );
    }

    #[test]
    fn test_word_forms_need_whitespace() {
        let tokens = tokenize("(dport -le 80) or not sip eq 10.0.0.1").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Open(Bracket::Round),
                word("dport"),
                Token::Compare(CompareOp::Le),
                word("80"),
                Token::Close(Bracket::Round),
                Token::Or,
                Token::Not,
                word("sip"),
                Token::Compare(CompareOp::Eq),
                word("10.0.0.1"),
            ]
        );

        // `eq` glued to an operator is just a word
        let tokens = tokenize("sip=eq").unwrap();
        assert_eq!(tokens[2], word("eq"));
    }

    #[test]
    fn test_ipv6_and_networks_are_words() {
        let tokens = tokenize("snet = 2a00:50::/32 | dip != fe80::1").unwrap();
        assert_eq!(tokens[2], word("2a00:50::/32"));
        assert_eq!(tokens[6], word("fe80::1"));
    }
}
