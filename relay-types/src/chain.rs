use std::fmt;

use serde::{Deserialize, Serialize};

/// The chains a relay instance can be configured to speak to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Bitcoin,
    Ethereum,
    Solana,
}

impl Chain {
    pub const ALL: [Chain; 3] = [Chain::Bitcoin, Chain::Ethereum, Chain::Solana];

    /// Default dedup TTL for this chain, absent an override from configuration.
    pub fn default_dedup_ttl(self) -> std::time::Duration {
        match self {
            Chain::Bitcoin => std::time::Duration::from_secs(10 * 60),
            Chain::Ethereum => std::time::Duration::from_secs(2 * 60),
            Chain::Solana => std::time::Duration::from_secs(3 * 60),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Bitcoin => "bitcoin",
            Chain::Ethereum => "ethereum",
            Chain::Solana => "solana",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Chain {
    type Err = crate::error::RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bitcoin" | "btc" => Ok(Chain::Bitcoin),
            "ethereum" | "eth" => Ok(Chain::Ethereum),
            "solana" | "sol" => Ok(Chain::Solana),
            other => Err(crate::error::RelayError::Unsupported {
                what: format!("unknown chain {other:?}"),
            }),
        }
    }
}
