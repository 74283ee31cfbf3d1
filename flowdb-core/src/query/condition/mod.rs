//! Filter condition language
//!
//! Conditions chain `attribute comparator value` terms with NOT, AND and OR,
//! grouped by `()`, `[]` or `{}`. Every operator has symbolic and word
//! spellings (`&`, `&&`, `*`, `and`; `!=`, `neq`, `-ne`, ...), which the
//! lexer normalizes before parsing.
//!
//! Compilation runs: tokenize, parse, expand `host`/`net` aliases, then
//! resolve hostnames into a [`Predicate`] that can be evaluated on flows.

mod lexer;
mod parser;
mod predicate;

pub use lexer::{tokenize, Bracket, Token};
pub use parser::ConditionParser;
pub use predicate::{AddrField, Predicate, Test};

use crate::resolver::Resolver;
use crate::{FlowError, Result};
use std::fmt;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq, // =
    Ne, // !=
    Lt, // <
    Le, // <=
    Gt, // >
    Ge, // >=
}

impl CompareOp {
    /// Apply the operator to two ordered values
    pub fn eval<T: Ord>(&self, left: T, right: T) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// Condition attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Sip,
    Dip,
    /// Source or destination address
    Host,
    Snet,
    Dnet,
    /// Source or destination network
    Net,
    Dport,
    Proto,
}

impl Attribute {
    /// Parse an attribute name, accepting `src`/`dst` synonyms
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "sip" | "src" => Some(Attribute::Sip),
            "dip" | "dst" => Some(Attribute::Dip),
            "host" => Some(Attribute::Host),
            "snet" => Some(Attribute::Snet),
            "dnet" => Some(Attribute::Dnet),
            "net" => Some(Attribute::Net),
            "dport" => Some(Attribute::Dport),
            "proto" => Some(Attribute::Proto),
            _ => None,
        }
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            Attribute::Sip => "sip",
            Attribute::Dip => "dip",
            Attribute::Host => "host",
            Attribute::Snet => "snet",
            Attribute::Dnet => "dnet",
            Attribute::Net => "net",
            Attribute::Dport => "dport",
            Attribute::Proto => "proto",
        }
    }

    /// Attributes holding addresses only support `=` and `!=`
    pub fn is_address(&self) -> bool {
        !matches!(self, Attribute::Dport | Attribute::Proto)
    }
}

/// Parsed condition tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Single `attribute comparator value` term
    Compare {
        attr: Attribute,
        op: CompareOp,
        value: String,
    },
    /// AND combination
    And(Box<Condition>, Box<Condition>),
    /// OR combination
    Or(Box<Condition>, Box<Condition>),
    /// NOT negation
    Not(Box<Condition>),
}

impl Condition {
    /// Parse a condition string. Blank input means "no filter".
    pub fn parse(input: &str) -> Result<Option<Condition>> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Ok(None);
        }
        ConditionParser::new(tokens).parse().map(Some)
    }

    fn compare(attr: Attribute, op: CompareOp, value: &str) -> Condition {
        Condition::Compare {
            attr,
            op,
            value: value.to_string(),
        }
    }

    /// Rewrite `host` and `net` into source/destination terms.
    ///
    /// `host = x` becomes `sip = x | dip = x`, `host != x` becomes
    /// `sip != x & dip != x`, and likewise for `net` with `snet`/`dnet`.
    pub fn expand_aliases(self) -> Result<Condition> {
        match self {
            Condition::Compare { attr, op, value } => {
                if attr.is_address() && !matches!(op, CompareOp::Eq | CompareOp::Ne) {
                    return Err(FlowError::Condition(format!(
                        "Attribute {} only supports = and !=, got {}",
                        attr.name(),
                        op
                    )));
                }
                let pair = match attr {
                    Attribute::Host => (Attribute::Sip, Attribute::Dip),
                    Attribute::Net => (Attribute::Snet, Attribute::Dnet),
                    _ => return Ok(Condition::Compare { attr, op, value }),
                };
                let left = Box::new(Condition::compare(pair.0, op, &value));
                let right = Box::new(Condition::compare(pair.1, op, &value));
                Ok(match op {
                    CompareOp::Eq => Condition::Or(left, right),
                    _ => Condition::And(left, right),
                })
            }
            Condition::And(l, r) => Ok(Condition::And(
                Box::new(l.expand_aliases()?),
                Box::new(r.expand_aliases()?),
            )),
            Condition::Or(l, r) => Ok(Condition::Or(
                Box::new(l.expand_aliases()?),
                Box::new(r.expand_aliases()?),
            )),
            Condition::Not(inner) => Ok(Condition::Not(Box::new(inner.expand_aliases()?))),
        }
    }

    /// Full pipeline from text to an evaluable predicate
    pub fn compile(input: &str, resolver: &dyn Resolver) -> Result<Predicate> {
        match Condition::parse(input)? {
            Some(condition) => predicate::compile(&condition.expand_aliases()?, resolver),
            None => Ok(Predicate::Any),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Compare { attr, op, value } => {
                write!(f, "{} {} {}", attr.name(), op, value)
            }
            Condition::And(l, r) => write!(f, "({} & {})", l, r),
            Condition::Or(l, r) => write!(f, "({} | {})", l, r),
            Condition::Not(inner) => write!(f, "!{}", inner),
        }
    }
}
