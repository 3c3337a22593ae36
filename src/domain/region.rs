//! Region (market) codes and their syntactic validation.
//!
//! The upstream archive addresses every market with a `language-COUNTRY`
//! locale code (`en-US`, `zh-CN`, …). Validation is deliberately strict:
//! anything that does not match that shape is rejected before any network
//! or repository work happens, so a malformed code can never trigger an
//! upstream round trip.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// A validated market/locale code in canonical `xx-YY` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Region(String);

impl Region {
    /// Parse and canonicalize a market code.
    ///
    /// Accepts any casing (`EN-us` becomes `en-US`) but requires exactly a
    /// two-letter language subtag and a two-letter country subtag.
    pub fn parse(code: &str) -> Result<Self, DomainError> {
        let mut parts = code.split('-');
        let (Some(language), Some(country), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid(code));
        };

        if language.len() != 2
            || country.len() != 2
            || !language.bytes().all(|b| b.is_ascii_alphabetic())
            || !country.bytes().all(|b| b.is_ascii_alphabetic())
        {
            return Err(invalid(code));
        }

        Ok(Self(format!(
            "{}-{}",
            language.to_ascii_lowercase(),
            country.to_ascii_uppercase()
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Region {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Region> for String {
    fn from(region: Region) -> Self {
        region.0
    }
}

fn invalid(code: &str) -> DomainError {
    DomainError::validation(format!("invalid region code `{code}`"))
}

/// A known upstream market with a human-readable label.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegionInfo {
    pub code: &'static str,
    pub label: &'static str,
}

/// Markets the upstream archive is known to serve.
pub const KNOWN_REGIONS: &[RegionInfo] = &[
    RegionInfo { code: "zh-CN", label: "China" },
    RegionInfo { code: "en-US", label: "United States" },
    RegionInfo { code: "ja-JP", label: "Japan" },
    RegionInfo { code: "en-AU", label: "Australia" },
    RegionInfo { code: "en-GB", label: "United Kingdom" },
    RegionInfo { code: "de-DE", label: "Germany" },
    RegionInfo { code: "en-NZ", label: "New Zealand" },
    RegionInfo { code: "en-CA", label: "Canada" },
    RegionInfo { code: "fr-FR", label: "France" },
    RegionInfo { code: "it-IT", label: "Italy" },
    RegionInfo { code: "es-ES", label: "Spain" },
    RegionInfo { code: "pt-BR", label: "Brazil" },
    RegionInfo { code: "ko-KR", label: "South Korea" },
    RegionInfo { code: "en-IN", label: "India" },
    RegionInfo { code: "ru-RU", label: "Russia" },
];
