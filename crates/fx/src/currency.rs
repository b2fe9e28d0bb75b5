//! ISO-4217-style currency codes.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use majolica_core::{DomainError, DomainResult};

/// A three-letter currency code (e.g. "LYD", "USD", "EUR").
///
/// Stored uppercased; comparison is exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(code: impl AsRef<str>) -> DomainResult<Self> {
        let code = code.as_ref().trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::invalid_argument(format!(
                "currency code must be 3 ASCII letters, got '{code}'"
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CurrencyCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_and_uppercases_three_letter_codes() {
        assert_eq!(CurrencyCode::new("lyd").unwrap().as_str(), "LYD");
        assert_eq!(CurrencyCode::new(" USD ").unwrap().as_str(), "USD");
    }

    #[test]
    fn rejects_malformed_codes() {
        for bad in ["", "LY", "LYDD", "L1D", "US$"] {
            let err = CurrencyCode::new(bad).unwrap_err();
            assert!(matches!(err, DomainError::InvalidArgument(_)));
        }
    }
}
