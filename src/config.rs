use crate::attack::AttackOptions;
use crate::error::{Error, Result};
use crate::key::KeyContext;
use crate::pool::PoolOptions;
use num_bigint::BigUint;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// One host shared by every port, or one host per port.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Hosts {
    One(String),
    Many(Vec<String>),
}

/// Attack parameters, read from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AttackConfig {
    pub hosts: Hosts,
    pub ports: Vec<u16>,
    #[serde(rename = "N", deserialize_with = "big_uint")]
    pub n: BigUint,
    #[serde(rename = "E", deserialize_with = "big_uint")]
    pub e: BigUint,
    #[serde(rename = "C", deserialize_with = "big_uint")]
    pub c: BigUint,
    #[serde(default)]
    pub random_blinding: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_parallel_iterations")]
    pub parallel_iterations: usize,
    #[serde(default = "default_response_len")]
    pub response_len: usize,
    #[serde(default)]
    pub max_iterations: Option<usize>,
    #[serde(default = "default_attackers")]
    pub attackers: usize,
}

fn default_batch_size() -> usize {
    PoolOptions::default().batch_size
}

fn default_parallel_iterations() -> usize {
    PoolOptions::default().parallel_iterations
}

fn default_response_len() -> usize {
    1
}

fn default_attackers() -> usize {
    1
}

/// Decimal or `0x` hex text.
pub fn parse_biguint(text: &str) -> Option<BigUint> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => BigUint::parse_bytes(hex.as_bytes(), 16),
        None => BigUint::parse_bytes(text.as_bytes(), 10),
    }
}

fn big_uint<'de, D>(deserializer: D) -> std::result::Result<BigUint, D::Error>
where
    D: Deserializer<'de>,
{
    let text = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s,
        other => {
            return Err(serde::de::Error::custom(format!(
                "expected an integer, found {}",
                other
            )))
        }
    };
    parse_biguint(&text)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid unsigned integer {:?}", text)))
}

impl AttackConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: AttackConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.ports.is_empty() {
            return Err(Error::Config("no oracle ports given".to_string()));
        }
        if let Hosts::Many(hosts) = &self.hosts {
            if hosts.len() != 1 && hosts.len() != self.ports.len() {
                return Err(Error::Config(format!(
                    "{} hosts given for {} ports",
                    hosts.len(),
                    self.ports.len()
                )));
            }
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }
        if self.response_len == 0 {
            return Err(Error::Config("response_len must be positive".to_string()));
        }
        if self.attackers == 0 || self.attackers > self.ports.len() {
            return Err(Error::Config(format!(
                "{} attackers cannot share {} ports",
                self.attackers,
                self.ports.len()
            )));
        }
        Ok(())
    }

    pub fn key(&self) -> Result<KeyContext> {
        KeyContext::new(self.n.clone(), self.e.clone())
    }

    /// `host:port` for every oracle connection, in port order.
    pub fn addrs(&self) -> Vec<String> {
        self.ports
            .iter()
            .enumerate()
            .map(|(i, port)| {
                let host = match &self.hosts {
                    Hosts::One(host) => host.as_str(),
                    Hosts::Many(hosts) if hosts.len() == 1 => hosts[0].as_str(),
                    Hosts::Many(hosts) => hosts[i].as_str(),
                };
                format!("{}:{}", host, port)
            })
            .collect()
    }

    /// Splits the connections into `attackers` disjoint groups, dealt round robin.
    pub fn addr_groups(&self) -> Vec<Vec<String>> {
        let len = self.attackers.max(1);
        let mut groups = vec![vec![]; len];
        for (i, addr) in self.addrs().into_iter().enumerate() {
            groups[i % len].push(addr);
        }
        groups
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            batch_size: self.batch_size,
            parallel_iterations: self.parallel_iterations,
        }
    }

    pub fn attack_options(&self) -> AttackOptions {
        AttackOptions {
            random_blinding: self.random_blinding,
            max_iterations: self.max_iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "hosts": ["10.0.0.1", "10.0.0.2", "10.0.0.3"],
        "ports": [8001, 8002, 8003],
        "N": 147120277398606908734627539017049138631212768224578440498036394733541434733811,
        "E": 65537,
        "C": "0x1f2e3d",
        "random_blinding": true,
        "batch_size": 64,
        "parallel_iterations": 3,
        "response_len": 128,
        "max_iterations": 500,
        "attackers": 3
    }"#;

    #[test]
    fn full_config_works() {
        let config = AttackConfig::parse(FULL).expect("config");
        let n = parse_biguint(
            "147120277398606908734627539017049138631212768224578440498036394733541434733811",
        )
        .expect("decimal");
        assert_eq!(config.n, n);
        assert_eq!(config.e, 65537u32.into());
        assert_eq!(config.c, 0x1f2e3du32.into());
        assert_eq!(config.key().expect("key").k, 33);
        assert_eq!(
            config.addrs(),
            vec!["10.0.0.1:8001", "10.0.0.2:8002", "10.0.0.3:8003"]
        );
        assert_eq!(
            config.pool_options(),
            PoolOptions {
                batch_size: 64,
                parallel_iterations: 3
            }
        );
        assert_eq!(
            config.attack_options(),
            AttackOptions {
                random_blinding: true,
                max_iterations: Some(500)
            }
        );
        assert_eq!(config.response_len, 128);
        assert_eq!(config.addr_groups().len(), 3);
    }

    #[test]
    fn defaults_works() {
        let text = r#"{ "hosts": "localhost", "ports": [1, 2, 3, 4, 5],
                        "N": "3233", "E": 17, "C": 2790 }"#;
        let config = AttackConfig::parse(text).expect("config");
        assert_eq!(config.hosts, Hosts::One("localhost".to_string()));
        assert_eq!(config.addrs()[4], "localhost:5");
        assert_eq!(config.pool_options(), PoolOptions::default());
        assert_eq!(config.attack_options(), AttackOptions::default());
        assert_eq!(config.response_len, 1);
        assert_eq!(config.attackers, 1);
        assert_eq!(config.addr_groups(), vec![config.addrs()]);

        let text = text.replace("\"C\": 2790", "\"C\": 2790, \"attackers\": 2");
        let groups = AttackConfig::parse(&text).expect("config").addr_groups();
        assert_eq!(groups[0], vec!["localhost:1", "localhost:3", "localhost:5"]);
        assert_eq!(groups[1], vec!["localhost:2", "localhost:4"]);
    }

    #[test]
    fn invalid_config_works() {
        let mismatch = r#"{ "hosts": ["a", "b"], "ports": [1, 2, 3], "N": 3233, "E": 17, "C": 1 }"#;
        assert!(matches!(AttackConfig::parse(mismatch), Err(Error::Config(_))));
        let no_ports = r#"{ "hosts": "a", "ports": [], "N": 3233, "E": 17, "C": 1 }"#;
        assert!(matches!(AttackConfig::parse(no_ports), Err(Error::Config(_))));
        let crowded = r#"{ "hosts": "a", "ports": [1], "N": 3233, "E": 17, "C": 1, "attackers": 2 }"#;
        assert!(matches!(AttackConfig::parse(crowded), Err(Error::Config(_))));
        let bad_n = r#"{ "hosts": "a", "ports": [1], "N": "0xzz", "E": 17, "C": 1 }"#;
        assert!(matches!(AttackConfig::parse(bad_n), Err(Error::Json(_))));
        let negative = r#"{ "hosts": "a", "ports": [1], "N": -5, "E": 17, "C": 1 }"#;
        assert!(matches!(AttackConfig::parse(negative), Err(Error::Json(_))));
        assert!(matches!(AttackConfig::parse("{"), Err(Error::Json(_))));
    }

    #[test]
    fn parse_biguint_works() {
        assert_eq!(parse_biguint("0xff"), Some(255u8.into()));
        assert_eq!(parse_biguint(" 1234 "), Some(1234u16.into()));
        assert_eq!(parse_biguint("12a"), None);
        assert_eq!(parse_biguint(""), None);
    }
}
