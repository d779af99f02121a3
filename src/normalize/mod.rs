//! Field-level normalizers.
//!
//! Every normalizer is built once per run from the name-processing
//! configuration and bundled into [`Normalizers`]. The same instances back
//! the named transforms in [`crate::transforms::TransformRegistry`].

pub mod company;
pub mod job_title;
pub mod names;
pub mod phone;

pub use company::CompanyCanonicalizer;
pub use job_title::JobTitleCleaner;
pub use names::{NameParts, NameProcessor};
pub use phone::PhoneNormalizer;

use crate::config::{ConfigError, NameConfig};

/// Trim and lower-case an email address. Values without `@` are dropped.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if email.contains('@') && !email.starts_with('@') && !email.ends_with('@') {
        Some(email)
    } else {
        None
    }
}

/// All normalizers for one run.
#[derive(Debug)]
pub struct Normalizers {
    pub names: NameProcessor,
    pub phones: PhoneNormalizer,
    pub companies: CompanyCanonicalizer,
    pub job_titles: JobTitleCleaner,
}

impl Normalizers {
    pub fn new(config: &NameConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            names: NameProcessor::new(config)?,
            phones: PhoneNormalizer::new(config)?,
            companies: CompanyCanonicalizer::new(config)?,
            job_titles: JobTitleCleaner::new()?,
        })
    }
}
