//! Region-aware phone number normalization to E.164.

use phonenumber::country;
use phonenumber::Mode;
use std::collections::HashMap;

use crate::config::{ConfigError, NameConfig};

fn parse_region(code: &str) -> Option<country::Id> {
    code.trim().to_uppercase().parse::<country::Id>().ok()
}

#[derive(Debug, Clone)]
pub struct PhoneNormalizer {
    default_region: country::Id,
    country_regions: HashMap<String, country::Id>,
}

impl PhoneNormalizer {
    pub fn new(config: &NameConfig) -> Result<Self, ConfigError> {
        let default_region = parse_region(&config.default_region).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "unknown default region '{}'",
                config.default_region
            ))
        })?;

        let mut country_regions = HashMap::new();
        for (country, code) in &config.country_regions {
            let region = parse_region(code).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "unknown region code '{}' for country '{}'",
                    code, country
                ))
            })?;
            country_regions.insert(country.trim().to_lowercase(), region);
        }

        Ok(Self {
            default_region,
            country_regions,
        })
    }

    /// Region for a free-text country name, falling back to the default.
    pub fn region_for(&self, country: Option<&str>) -> country::Id {
        country
            .and_then(|c| self.country_regions.get(&c.trim().to_lowercase()))
            .copied()
            .unwrap_or(self.default_region)
    }

    /// E.164 form of `raw` if it parses to a globally valid number.
    /// Anything else, including garbage input, yields `None`.
    pub fn normalize(&self, raw: &str, country: Option<&str>) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() || !raw.chars().any(|c| c.is_ascii_digit()) {
            return None;
        }

        let number = phonenumber::parse(Some(self.region_for(country)), raw).ok()?;
        if !phonenumber::is_valid(&number) {
            return None;
        }
        Some(number.format().mode(Mode::E164).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::tests::test_config;

    fn phones() -> PhoneNormalizer {
        PhoneNormalizer::new(&test_config()).unwrap()
    }

    #[test]
    fn test_indian_mobile() {
        assert_eq!(
            phones().normalize("9876543210", Some("India")),
            Some("+919876543210".to_string())
        );
        // Default region applies when the country is unknown or absent
        assert_eq!(
            phones().normalize("98765 43210", None),
            Some("+919876543210".to_string())
        );
        assert_eq!(
            phones().normalize("+91-98765-43210", Some("Atlantis")),
            Some("+919876543210".to_string())
        );
    }

    #[test]
    fn test_country_lookup_is_case_insensitive() {
        let phones = phones();
        assert_eq!(phones.region_for(Some("  UNITED States ")), country::Id::US);
        assert_eq!(phones.region_for(Some("Narnia")), country::Id::IN);
        assert_eq!(phones.region_for(None), country::Id::IN);
    }

    #[test]
    fn test_invalid_numbers_become_none() {
        let phones = phones();
        assert_eq!(phones.normalize("not-a-number", Some("India")), None);
        assert_eq!(phones.normalize("", None), None);
        assert_eq!(phones.normalize("12", None), None);
    }

    #[test]
    fn test_unknown_default_region_is_config_error() {
        let mut config = test_config();
        config.default_region = "ZZZ".to_string();
        assert!(matches!(PhoneNormalizer::new(&config), Err(ConfigError::Invalid(_))));
    }
}
