//! Company-name canonicalization for equality checks.

use regex::Regex;
use std::collections::HashSet;

use crate::config::{ConfigError, NameConfig};

/// Reduces company names to a comparison key: "Shah & Sons Pvt. Ltd." and
/// "shah sons" compare equal. The key is never written to output.
#[derive(Debug, Clone)]
pub struct CompanyCanonicalizer {
    legal_tokens: HashSet<String>,
    punctuation: Regex,
}

impl CompanyCanonicalizer {
    pub fn new(config: &NameConfig) -> Result<Self, ConfigError> {
        let punctuation = Regex::new(r"[^\w\s]")
            .map_err(|e| ConfigError::Invalid(format!("company punctuation pattern: {}", e)))?;

        let legal_tokens = config
            .company_suffix_tokens
            .iter()
            .map(|t| punctuation.replace_all(&t.trim().to_lowercase(), "").into_owned())
            .filter(|t| !t.is_empty())
            .collect();

        Ok(Self {
            legal_tokens,
            punctuation,
        })
    }

    /// Comparison key, or `None` when nothing distinctive is left.
    pub fn canonicalize(&self, name: &str) -> Option<String> {
        let lowered = name.to_lowercase();
        let stripped = self.punctuation.replace_all(&lowered, "");

        let tokens: Vec<&str> = stripped
            .split_whitespace()
            .filter(|token| !self.legal_tokens.contains(*token))
            .collect();

        if tokens.is_empty() {
            None
        } else {
            Some(tokens.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::tests::test_config;

    fn companies() -> CompanyCanonicalizer {
        CompanyCanonicalizer::new(&test_config()).unwrap()
    }

    #[test]
    fn test_strips_legal_suffixes_and_punctuation() {
        let c = companies();

        assert_eq!(c.canonicalize("Colour Coats Pvt. Ltd."), Some("colour coats".to_string()));
        assert_eq!(c.canonicalize("  COLOUR   coats  "), Some("colour coats".to_string()));
        assert_eq!(c.canonicalize("Shah & Sons LLC"), Some("shah sons".to_string()));
        assert_eq!(c.canonicalize("Metalia Group Inc"), Some("metalia".to_string()));
    }

    #[test]
    fn test_tokens_are_whole_words() {
        let c = companies();
        // "inc" inside "Incubator" and "corp" inside "Corporal" stay
        assert_eq!(c.canonicalize("Incubator Labs"), Some("incubator labs".to_string()));
        assert_eq!(c.canonicalize("Corporal Designs"), Some("corporal designs".to_string()));
    }

    #[test]
    fn test_only_legal_tokens_yields_none() {
        let c = companies();
        assert_eq!(c.canonicalize("Pvt Ltd"), None);
        assert_eq!(c.canonicalize(""), None);
        assert_eq!(c.canonicalize("Ltd."), None);
    }

    #[test]
    fn test_variants_share_a_canonical_name() {
        let c = companies();
        assert_eq!(c.canonicalize("Acme Corp."), c.canonicalize("ACME"));
        assert_ne!(c.canonicalize("Acme"), c.canonicalize("Acme Studio"));
    }
}
