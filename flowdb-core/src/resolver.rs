//! Hostname resolution used by the condition compiler and result enrichment

use crate::{FlowError, Result};
use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;

/// Forward and reverse name lookups
pub trait Resolver: Send + Sync {
    /// Resolve a hostname to its addresses
    fn lookup(&self, host: &str) -> Result<Vec<IpAddr>>;

    /// Find a name for an address; `None` when unknown
    fn reverse(&self, addr: IpAddr) -> Option<String>;
}

/// Resolver backed by the operating system
#[derive(Debug, Clone)]
pub struct SystemResolver {
    hosts_file: String,
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self {
            hosts_file: "/etc/hosts".to_string(),
        }
    }
}

impl SystemResolver {
    /// Create a resolver using the system defaults
    pub fn new() -> Self {
        Self::default()
    }
}

impl Resolver for SystemResolver {
    fn lookup(&self, host: &str) -> Result<Vec<IpAddr>> {
        let mut addrs: Vec<IpAddr> = (host, 0)
            .to_socket_addrs()
            .map_err(|e| FlowError::Condition(format!("Cannot resolve host {}: {}", host, e)))?
            .map(|sa| sa.ip())
            .collect();
        addrs.sort();
        addrs.dedup();
        if addrs.is_empty() {
            return Err(FlowError::Condition(format!("Host {} has no addresses", host)));
        }
        Ok(addrs)
    }

    fn reverse(&self, addr: IpAddr) -> Option<String> {
        let hosts = fs::read_to_string(&self.hosts_file).ok()?;
        parse_hosts(&hosts).remove(&addr)
    }
}

/// Map each address in a hosts file to its first name
fn parse_hosts(content: &str) -> HashMap<IpAddr, String> {
    let mut names = HashMap::new();
    for line in content.lines() {
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        let (Some(addr), Some(name)) = (fields.next(), fields.next()) else {
            continue;
        };
        if let Ok(addr) = addr.parse::<IpAddr>() {
            names.entry(addr).or_insert_with(|| name.to_string());
        }
    }
    names
}

/// Fixed lookup tables, used in tests and offline setups
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    forward: HashMap<String, Vec<IpAddr>>,
    reverse: HashMap<IpAddr, String>,
    delay: Option<Duration>,
}

impl StaticResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host with its addresses; the first one also resolves back
    pub fn with_host(mut self, name: &str, addrs: &[IpAddr]) -> Self {
        for addr in addrs {
            self.reverse.entry(*addr).or_insert_with(|| name.to_string());
        }
        self.forward.insert(name.to_string(), addrs.to_vec());
        self
    }

    /// Make every reverse lookup sleep first
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Resolver for StaticResolver {
    fn lookup(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.forward
            .get(host)
            .cloned()
            .ok_or_else(|| FlowError::Condition(format!("Cannot resolve host {}", host)))
    }

    fn reverse(&self, addr: IpAddr) -> Option<String> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.reverse.get(&addr).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hosts() {
        let hosts = "127.0.0.1 localhost\n# comment\n10.0.0.5  db db.lan # primary\n\n::1 ip6-localhost\n";
        let names = parse_hosts(hosts);
        assert_eq!(names[&"10.0.0.5".parse::<IpAddr>().unwrap()], "db");
        assert_eq!(names[&"::1".parse::<IpAddr>().unwrap()], "ip6-localhost");
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_static_resolver() {
        let addr: IpAddr = "192.168.0.10".parse().unwrap();
        let resolver = StaticResolver::new().with_host("nas", &[addr]);
        assert_eq!(resolver.lookup("nas").unwrap(), vec![addr]);
        assert_eq!(resolver.reverse(addr), Some("nas".to_string()));
        assert!(resolver.lookup("missing").is_err());
    }
}
