use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Nominal SLA class. Controls buffer size, write deadline, and rate limit;
/// represented as a tagged enum with a table-driven config rather than an
/// inheritance hierarchy (see design notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Pro,
    Business,
    Turbo,
    Enterprise,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Free,
        Tier::Pro,
        Tier::Business,
        Tier::Turbo,
        Tier::Enterprise,
    ];

    /// Whether a full subscriber buffer should be drained of its oldest
    /// entry and overwritten, rather than simply dropping the new event.
    pub fn allow_overwrite_on_full(self) -> bool {
        matches!(self, Tier::Turbo | Tier::Enterprise)
    }

    pub fn config(self) -> TierConfig {
        match self {
            Tier::Free => TierConfig {
                tier: self,
                buffer_size: 512,
                write_deadline: Duration::from_micros(1_000),
                rate_limit_per_hour: 3_600,
                allow_overwrite_on_full: false,
            },
            Tier::Pro => TierConfig {
                tier: self,
                buffer_size: 1_280,
                write_deadline: Duration::from_micros(500),
                rate_limit_per_hour: 36_000,
                allow_overwrite_on_full: false,
            },
            Tier::Business => TierConfig {
                tier: self,
                buffer_size: 1_536,
                write_deadline: Duration::from_micros(200),
                rate_limit_per_hour: 360_000,
                allow_overwrite_on_full: false,
            },
            Tier::Turbo => TierConfig {
                tier: self,
                buffer_size: 2_048,
                write_deadline: Duration::from_millis(5),
                rate_limit_per_hour: 3_600_000,
                allow_overwrite_on_full: true,
            },
            Tier::Enterprise => TierConfig {
                tier: self,
                buffer_size: 4_096,
                write_deadline: Duration::from_secs(60),
                rate_limit_per_hour: u64::MAX,
                allow_overwrite_on_full: true,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Business => "business",
            Tier::Turbo => "turbo",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable per-tier configuration, fixed for the server's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    pub tier: Tier,
    pub buffer_size: usize,
    #[serde(with = "duration_millis")]
    pub write_deadline: Duration,
    pub rate_limit_per_hour: u64,
    pub allow_overwrite_on_full: bool,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sizes_match_documented_defaults() {
        assert_eq!(Tier::Free.config().buffer_size, 512);
        assert_eq!(Tier::Pro.config().buffer_size, 1_280);
        assert_eq!(Tier::Business.config().buffer_size, 1_536);
        assert_eq!(Tier::Turbo.config().buffer_size, 2_048);
        assert_eq!(Tier::Enterprise.config().buffer_size, 4_096);
    }

    #[test]
    fn only_turbo_and_enterprise_overwrite() {
        for tier in Tier::ALL {
            assert_eq!(
                tier.allow_overwrite_on_full(),
                matches!(tier, Tier::Turbo | Tier::Enterprise)
            );
        }
    }
}
