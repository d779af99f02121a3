//! Job-title cleanup.

use regex::Regex;

use crate::config::ConfigError;

/// Drops trailing affiliations ("Architect at Studio X", "CEO | Acme") and
/// parenthetical asides from free-text job titles.
#[derive(Debug, Clone)]
pub struct JobTitleCleaner {
    at_separator: Regex,
    asides: Regex,
}

impl JobTitleCleaner {
    pub fn new() -> Result<Self, ConfigError> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| ConfigError::Invalid(format!("job title pattern: {}", e)))
        };

        Ok(Self {
            at_separator: compile(r"(?i)\s+at\s+")?,
            asides: compile(r"\([^)]*\)|\[[^\]]*\]")?,
        })
    }

    fn clean_once(&self, title: &str) -> String {
        let mut cut = title.len();
        if let Some(m) = self.at_separator.find(title) {
            cut = cut.min(m.start());
        }
        if let Some(pos) = title.find('|') {
            cut = cut.min(pos);
        }

        let truncated = &title[..cut];
        let without_asides = self.asides.replace_all(truncated, " ");
        without_asides
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .trim_matches(|c: char| c == '-' || c == ',' || c.is_whitespace())
            .to_string()
    }

    /// Cleaned title, or `None` when nothing is left. Idempotent.
    pub fn clean(&self, title: &str) -> Option<String> {
        let mut current = self.clean_once(title);
        // Removing an aside can expose a new " at "; iterate to a fixed point
        loop {
            let next = self.clean_once(&current);
            if next == current {
                break;
            }
            current = next;
        }

        if current.is_empty() {
            None
        } else {
            Some(current)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(title: &str) -> Option<String> {
        JobTitleCleaner::new().unwrap().clean(title)
    }

    #[test]
    fn test_truncates_affiliations() {
        assert_eq!(
            clean("Principal Architect at Studio Nine"),
            Some("Principal Architect".to_string())
        );
        assert_eq!(clean("Founder AT Acme"), Some("Founder".to_string()));
        assert_eq!(clean("CEO | Acme Corp"), Some("CEO".to_string()));
        assert_eq!(clean("CEO |Acme"), Some("CEO".to_string()));
    }

    #[test]
    fn test_keeps_words_containing_at() {
        assert_eq!(clean("Data Analyst"), Some("Data Analyst".to_string()));
        assert_eq!(clean("Creative Lead"), Some("Creative Lead".to_string()));
    }

    #[test]
    fn test_strips_asides() {
        assert_eq!(clean("Interior Designer (Freelance)"), Some("Interior Designer".to_string()));
        assert_eq!(clean("Manager [Sales]   Team"), Some("Manager Team".to_string()));
    }

    #[test]
    fn test_empty_results() {
        assert_eq!(clean("(none)"), None);
        assert_eq!(clean("   "), None);
        assert_eq!(clean("| Acme"), None);
    }

    #[test]
    fn test_idempotent() {
        let cleaner = JobTitleCleaner::new().unwrap();
        for raw in [
            "Lead (x)at Studio",
            "Architect at A at B",
            "Head of Design (Retail) | Acme",
            "Partner - ",
        ] {
            let once = cleaner.clean(raw);
            let twice = once.as_deref().and_then(|t| cleaner.clean(t));
            assert_eq!(once, twice, "input {:?}", raw);
        }
    }
}
