use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_ASSET_LEN: usize = 15;

/// Normalized asset ticker (`BTC`, `ETH`, `USDC`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetId(String);

impl AssetId {
    /// Parse and normalize an asset ticker to uppercase.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_uppercase();
        let Some(first) = normalized.chars().next() else {
            return Err(ValidationError::EmptyAsset);
        };

        let len = normalized.chars().count();
        if len > MAX_ASSET_LEN {
            return Err(ValidationError::AssetTooLong {
                len,
                max: MAX_ASSET_LEN,
            });
        }

        if !first.is_ascii_alphabetic() {
            return Err(ValidationError::AssetInvalidStart { ch: first });
        }

        // ':' is the cache key separator and must never appear here.
        if let Some((index, ch)) = normalized
            .chars()
            .enumerate()
            .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '.'))
        {
            return Err(ValidationError::AssetInvalidChar { ch, index });
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AssetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for AssetId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for AssetId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<AssetId> for String {
    fn from(value: AssetId) -> Self {
        value.0
    }
}

/// Quote currency the asset is priced in (`USD`, `EUR`, `USDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_uppercase();
        let valid = (3..=5).contains(&normalized.len())
            && normalized.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !valid {
            return Err(ValidationError::InvalidCurrency {
                value: input.to_owned(),
            });
        }
        Ok(Self(normalized))
    }

    pub fn usd() -> Self {
        Self(String::from("USD"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used in provider query strings and payload keys.
    pub fn to_provider_code(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_asset() {
        let parsed = AssetId::parse(" btc ").expect("asset should parse");
        assert_eq!(parsed.as_str(), "BTC");
    }

    #[test]
    fn rejects_key_separator_in_asset() {
        let err = AssetId::parse("BTC:USD").expect_err("must fail");
        assert_eq!(err, ValidationError::AssetInvalidChar { ch: ':', index: 3 });
    }

    #[test]
    fn rejects_invalid_start() {
        let err = AssetId::parse("1INCH").expect_err("must fail");
        assert!(matches!(err, ValidationError::AssetInvalidStart { ch: '1' }));
    }

    #[test]
    fn currency_is_upper_cased_and_bounded() {
        assert_eq!(Currency::parse("usdt").expect("parse").as_str(), "USDT");
        assert!(Currency::parse("US").is_err());
        assert!(Currency::parse("US-D").is_err());
        assert_eq!(Currency::usd().to_provider_code(), "usd");
    }
}
