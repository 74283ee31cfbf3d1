//! Compiled, evaluable predicates

use super::{Attribute, CompareOp, Condition};
use crate::resolver::Resolver;
use crate::{proto_number, FlowError, FlowRecord, Result};
use ipnet::IpNet;
use std::net::IpAddr;

/// Which address of a flow a test looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrField {
    Src,
    Dst,
}

impl AddrField {
    fn of(&self, record: &FlowRecord) -> IpAddr {
        match self {
            AddrField::Src => record.sip,
            AddrField::Dst => record.dip,
        }
    }
}

/// Leaf test against one flow attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Test {
    Addr {
        field: AddrField,
        addr: IpAddr,
        negated: bool,
    },
    Net {
        field: AddrField,
        net: IpNet,
        negated: bool,
    },
    Dport {
        op: CompareOp,
        value: u16,
    },
    Proto {
        op: CompareOp,
        value: u8,
    },
}

impl Test {
    fn matches(&self, record: &FlowRecord) -> bool {
        match self {
            Test::Addr {
                field,
                addr,
                negated,
            } => (field.of(record) == *addr) != *negated,
            Test::Net {
                field,
                net,
                negated,
            } => net.contains(&field.of(record)) != *negated,
            Test::Dport { op, value } => op.eval(record.dport, *value),
            Test::Proto { op, value } => op.eval(record.proto, *value),
        }
    }
}

/// Predicate tree; immutable once compiled and safe to share across workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Matches every flow
    Any,
    Test(Test),
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Evaluate against a stored flow
    pub fn matches(&self, record: &FlowRecord) -> bool {
        match self {
            Predicate::Any => true,
            Predicate::Test(test) => test.matches(record),
            Predicate::Not(inner) => !inner.matches(record),
            Predicate::And(items) => items.iter().all(|p| p.matches(record)),
            Predicate::Or(items) => items.iter().any(|p| p.matches(record)),
        }
    }
}

/// Compile an alias-free condition, resolving hostnames through `resolver`
pub fn compile(condition: &Condition, resolver: &dyn Resolver) -> Result<Predicate> {
    match condition {
        Condition::Compare { attr, op, value } => compile_compare(*attr, *op, value, resolver),
        Condition::Not(inner) => Ok(Predicate::Not(Box::new(compile(inner, resolver)?))),
        Condition::And(l, r) => Ok(Predicate::And(vec![
            compile(l, resolver)?,
            compile(r, resolver)?,
        ])),
        Condition::Or(l, r) => Ok(Predicate::Or(vec![
            compile(l, resolver)?,
            compile(r, resolver)?,
        ])),
    }
}

fn compile_compare(
    attr: Attribute,
    op: CompareOp,
    value: &str,
    resolver: &dyn Resolver,
) -> Result<Predicate> {
    if attr.is_address() && !matches!(op, CompareOp::Eq | CompareOp::Ne) {
        return Err(FlowError::Condition(format!(
            "Attribute {} only supports = and !=",
            attr.name()
        )));
    }
    let negated = op == CompareOp::Ne;

    match attr {
        Attribute::Sip | Attribute::Dip => {
            let field = if attr == Attribute::Sip {
                AddrField::Src
            } else {
                AddrField::Dst
            };
            if let Ok(addr) = value.parse::<IpAddr>() {
                return Ok(Predicate::Test(Test::Addr {
                    field,
                    addr,
                    negated,
                }));
            }

            // Hostname: any of its addresses matches, none of them for !=
            let tests: Vec<Predicate> = resolver
                .lookup(value)?
                .into_iter()
                .map(|addr| {
                    Predicate::Test(Test::Addr {
                        field,
                        addr,
                        negated,
                    })
                })
                .collect();
            Ok(if negated {
                Predicate::And(tests)
            } else {
                Predicate::Or(tests)
            })
        }
        Attribute::Snet | Attribute::Dnet => {
            let field = if attr == Attribute::Snet {
                AddrField::Src
            } else {
                AddrField::Dst
            };
            Ok(Predicate::Test(Test::Net {
                field,
                net: parse_net(value)?,
                negated,
            }))
        }
        Attribute::Dport => {
            let port = value
                .parse::<u16>()
                .map_err(|_| FlowError::Condition(format!("Invalid port: {}", value)))?;
            Ok(Predicate::Test(Test::Dport { op, value: port }))
        }
        Attribute::Proto => {
            let proto = proto_number(value)
                .ok_or_else(|| FlowError::Condition(format!("Unknown protocol: {}", value)))?;
            Ok(Predicate::Test(Test::Proto { op, value: proto }))
        }
        Attribute::Host | Attribute::Net => Err(FlowError::Condition(format!(
            "Alias {} must be expanded before compilation",
            attr.name()
        ))),
    }
}

fn parse_net(value: &str) -> Result<IpNet> {
    if let Ok(net) = value.parse::<IpNet>() {
        return Ok(net.trunc());
    }
    let addr = value
        .parse::<IpAddr>()
        .map_err(|_| FlowError::Condition(format!("Invalid network: {}", value)))?;
    let prefix = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    IpNet::new(addr, prefix).map_err(|e| FlowError::Condition(format!("Invalid network {}: {}", value, e)))
}
