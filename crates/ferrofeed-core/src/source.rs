use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Upstream provider identity. Also selects the payload schema the
/// normalizer applies to that provider's responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    CoinGecko,
    CoinCap,
}

impl ProviderId {
    pub const ALL: [Self; 2] = [Self::CoinGecko, Self::CoinCap];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CoinGecko => "coingecko",
            Self::CoinCap => "coincap",
        }
    }

    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::CoinGecko => "https://api.coingecko.com/api/v3",
            Self::CoinCap => "https://api.coincap.io/v2",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "coingecko" => Ok(Self::CoinGecko),
            "coincap" => Ok(Self::CoinCap),
            other => Err(ValidationError::InvalidProvider {
                value: other.to_owned(),
            }),
        }
    }
}
