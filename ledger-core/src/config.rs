//! Configuration for the ledger client

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ledger client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Replica addresses (`host:port` or full URIs)
    pub addresses: Vec<String>,

    /// Connection establishment timeout (ms)
    pub connect_timeout_ms: u64,

    /// Per-request timeout (ms)
    pub request_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            addresses: vec!["127.0.0.1:3000".to_string()],
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl LedgerConfig {
    /// Parse a comma separated address list as found in `LEDGER_ADDRESSES`
    pub fn parse_addresses(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Reject configurations the client cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.addresses.is_empty() {
            return Err(Error::Config("at least one ledger address is required".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request timeout must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addresses() {
        assert_eq!(
            LedgerConfig::parse_addresses(" 10.0.0.1:3000, ,10.0.0.2:3000"),
            vec!["10.0.0.1:3000".to_string(), "10.0.0.2:3000".to_string()]
        );
    }

    #[test]
    fn test_default_is_valid() {
        assert!(LedgerConfig::default().validate().is_ok());
    }
}
