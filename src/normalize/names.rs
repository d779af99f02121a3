//! Person name cleaning and professional-title inference.

use regex::Regex;

use crate::config::{ConfigError, NameConfig};

/// Result of running the name pipeline over one record's raw name fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameParts {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    /// Title implied by a stripped prefix such as `Ar.` or `Dr`
    pub inferred_title: Option<String>,
}

impl NameParts {
    pub fn has_name(&self) -> bool {
        self.first_name.is_some() || self.last_name.is_some() || self.full_name.is_some()
    }
}

#[derive(Debug)]
struct TitleRule {
    title: String,
    /// Leading-prefix patterns, longest first
    prefixes: Vec<Regex>,
    /// Whole-word patterns used when no prefix matched
    words: Vec<Regex>,
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern)
        .map_err(|e| ConfigError::Invalid(format!("bad name pattern '{}': {}", pattern, e)))
}

fn leading(token: &str) -> Result<Regex, ConfigError> {
    compile(&format!(r"(?i)^{}\s+", regex::escape(token.trim())))
}

fn trailing(token: &str) -> Result<Regex, ConfigError> {
    compile(&format!(r"(?i)\s+{}\s*$", regex::escape(token.trim())))
}

fn whole_word(token: &str) -> Result<Regex, ConfigError> {
    compile(&format!(
        r"(?i)(?:^|[\s(\[,]){}(?:$|[\s)\],])",
        regex::escape(token.trim())
    ))
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(text: &str) -> Option<String> {
    let collapsed = collapse(text);
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Strips honorifics, suffixes and professional prefixes from names and
/// infers a title from them.
#[derive(Debug)]
pub struct NameProcessor {
    rules: Vec<TitleRule>,
    honorifics: Vec<Regex>,
    suffixes: Vec<Regex>,
}

impl NameProcessor {
    pub fn new(config: &NameConfig) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(config.title_prefix_categories.len());
        for category in config.title_prefix_categories.values() {
            let mut patterns: Vec<&str> = category.patterns.iter().map(|p| p.trim()).collect();
            // Longest match first, so `arch.` wins over `ar`
            patterns.sort_by(|a, b| b.len().cmp(&a.len()));

            rules.push(TitleRule {
                title: category.title.clone(),
                prefixes: patterns.iter().map(|p| leading(p)).collect::<Result<_, _>>()?,
                words: patterns.iter().map(|p| whole_word(p)).collect::<Result<_, _>>()?,
            });
        }

        Ok(Self {
            rules,
            honorifics: config
                .honorifics_to_strip
                .iter()
                .map(|h| leading(h))
                .collect::<Result<_, _>>()?,
            suffixes: config
                .suffixes_to_strip
                .iter()
                .map(|s| trailing(s))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Clean one name string, returning the cleaned name and the title
    /// implied by a stripped prefix.
    pub fn clean_name(&self, name: &str) -> (String, Option<String>) {
        let mut name = collapse(name);
        let mut title = None;

        'categories: for rule in &self.rules {
            for prefix in &rule.prefixes {
                if let Some(m) = prefix.find(&name) {
                    let rest = name[m.end()..].trim();
                    // "Dr" on its own is a name, not a title
                    if !rest.is_empty() {
                        name = rest.to_string();
                        title = Some(rule.title.clone());
                        break 'categories;
                    }
                }
            }
        }

        for honorific in &self.honorifics {
            if let Some(m) = honorific.find(&name) {
                let rest = name[m.end()..].trim();
                if !rest.is_empty() {
                    name = rest.to_string();
                }
                break;
            }
        }

        for suffix in &self.suffixes {
            let stripped = suffix.replace(&name, "").trim().to_string();
            if !stripped.is_empty() {
                name = stripped;
            }
        }

        (name, title)
    }

    /// Derive first/last/full names from whatever raw name fields a record
    /// carried. A full name takes precedence and is split on whitespace.
    pub fn process(
        &self,
        first_name: Option<&str>,
        last_name: Option<&str>,
        full_name: Option<&str>,
    ) -> NameParts {
        let mut parts = NameParts::default();

        if let Some(full) = full_name {
            let (clean, title) = self.clean_name(full);
            let tokens: Vec<&str> = clean.split_whitespace().collect();
            if let Some((first, rest)) = tokens.split_first() {
                parts.first_name = Some(first.to_string());
                parts.last_name = non_empty(&rest.join(" "));
                parts.full_name = Some(clean.clone());
                parts.inferred_title = title;
            }
        }

        if parts.full_name.is_none() {
            let (first, first_title) = self.clean_name(first_name.unwrap_or_default());
            let (last, last_title) = self.clean_name(last_name.unwrap_or_default());

            parts.first_name = non_empty(&first);
            parts.last_name = non_empty(&last);
            parts.inferred_title = first_title.or(last_title);
            parts.full_name = match (&parts.first_name, &parts.last_name) {
                (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
                (Some(only), None) | (None, Some(only)) => Some(only.clone()),
                (None, None) => None,
            };
        }

        parts
    }

    /// Look for a title pattern as a whole word anywhere in `text`.
    pub fn infer_title(&self, text: &str) -> Option<String> {
        let text = collapse(text);
        if text.is_empty() {
            return None;
        }
        self.rules
            .iter()
            .find(|rule| rule.words.iter().any(|w| w.is_match(&text)))
            .map(|rule| rule.title.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::tests::test_config;

    fn processor() -> NameProcessor {
        NameProcessor::new(&test_config()).unwrap()
    }

    #[test]
    fn test_prefix_strips_and_infers_title() {
        let names = processor();

        assert_eq!(
            names.clean_name("Ar. Rohan Shah"),
            ("Rohan Shah".to_string(), Some("Architect".to_string()))
        );
        assert_eq!(
            names.clean_name("dr   Meera  Iyer"),
            ("Meera Iyer".to_string(), Some("Doctor".to_string()))
        );
        // Prefix needs trailing whitespace
        assert_eq!(names.clean_name("Arjun Rao"), ("Arjun Rao".to_string(), None));
    }

    #[test]
    fn test_prefix_alone_is_kept_as_name() {
        let names = processor();
        assert_eq!(names.clean_name("Dr"), ("Dr".to_string(), None));
    }

    #[test]
    fn test_honorific_and_suffix_stripping() {
        let names = processor();

        assert_eq!(names.clean_name("Mr. Anil Kapoor"), ("Anil Kapoor".to_string(), None));
        assert_eq!(names.clean_name("Anil Kapoor Jr"), ("Anil Kapoor".to_string(), None));
        // Honorifics are still stripped after a title prefix
        assert_eq!(
            names.clean_name("Ar. Mrs. Kavya Nair"),
            ("Kavya Nair".to_string(), Some("Architect".to_string()))
        );
    }

    #[test]
    fn test_process_full_name() {
        let parts = processor().process(None, None, Some("Ar. Rohan Kumar Shah"));

        assert_eq!(parts.first_name.as_deref(), Some("Rohan"));
        assert_eq!(parts.last_name.as_deref(), Some("Kumar Shah"));
        assert_eq!(parts.full_name.as_deref(), Some("Rohan Kumar Shah"));
        assert_eq!(parts.inferred_title.as_deref(), Some("Architect"));
    }

    #[test]
    fn test_process_single_token_full_name() {
        let parts = processor().process(None, None, Some("Madonna"));

        assert_eq!(parts.first_name.as_deref(), Some("Madonna"));
        assert_eq!(parts.last_name, None);
        assert_eq!(parts.full_name.as_deref(), Some("Madonna"));
    }

    #[test]
    fn test_process_first_and_last() {
        let parts = processor().process(Some("Dr Priya"), Some("Menon"), None);

        assert_eq!(parts.first_name.as_deref(), Some("Priya"));
        assert_eq!(parts.last_name.as_deref(), Some("Menon"));
        assert_eq!(parts.full_name.as_deref(), Some("Priya Menon"));
        assert_eq!(parts.inferred_title.as_deref(), Some("Doctor"));

        let parts = processor().process(None, Some("Menon"), Some("   "));
        assert_eq!(parts.full_name.as_deref(), Some("Menon"));
    }

    #[test]
    fn test_process_no_name() {
        let parts = processor().process(Some(""), None, None);
        assert!(!parts.has_name());
    }

    #[test]
    fn test_infer_title_whole_words_only() {
        let names = processor();

        assert_eq!(
            names.infer_title("Rohan Shah (Architect)"),
            Some("Architect".to_string())
        );
        // "ar" inside "Kumar" is not a title
        assert_eq!(names.infer_title("Ramesh Kumar"), None);
    }
}
