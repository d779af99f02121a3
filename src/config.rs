//! Run, name-processing and policy configuration.
//!
//! Three documents drive a run: the run configuration (`unify.yaml`), the
//! field mapping (see [`crate::mapping`]) and the name-processing
//! configuration. All of them are YAML, which also means plain JSON files
//! are accepted. A missing or malformed document is a [`ConfigError`] and
//! aborts the run before any record is processed.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::extraction::PathParseError;
use crate::ids::IdStrategy;
use crate::matcher::{MatchPolicy, MatchRule};
use crate::serialization::OutputFormat;
use crate::source::SourceSpec;

/// Error type for configuration loading and validation
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, message: String },
    Missing(String),
    Invalid(String),
    Path { context: String, source: PathParseError },
    UnknownTransform { column: String, transform: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Failed to read config file {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, message } => {
                write!(f, "Failed to parse {}: {}", path.display(), message)
            }
            ConfigError::Missing(what) => write!(f, "Missing configuration: {}", what),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
            ConfigError::Path { context, source } => write!(f, "{} ({})", source, context),
            ConfigError::UnknownTransform { column, transform } => {
                write!(f, "Column '{}' uses unknown transform '{}'", column, transform)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Path { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Read and deserialize a YAML (or JSON) document.
pub fn load_yaml<T, P>(path: P) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// A professional-title category, e.g. architects recognised by `Ar.`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleCategory {
    pub patterns: Vec<String>,
    pub title: String,
}

fn default_country_regions() -> IndexMap<String, String> {
    [
        ("india", "IN"),
        ("united states", "US"),
        ("united kingdom", "GB"),
        ("canada", "CA"),
        ("australia", "AU"),
    ]
    .into_iter()
    .map(|(country, region)| (country.to_string(), region.to_string()))
    .collect()
}

fn default_company_suffix_tokens() -> Vec<String> {
    ["ltd", "limited", "pvt", "private", "llc", "inc", "corp", "group"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Name-processing configuration.
///
/// Field aliases accept the key names used by older exports of this file
/// (`default_country`, `title_prefixes`, `honorifics_to_remove`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameConfig {
    /// Region used for phone parsing when a record has no known country
    #[serde(alias = "default_country")]
    pub default_region: String,

    /// Lower-case country name -> region code
    #[serde(default = "default_country_regions")]
    pub country_regions: IndexMap<String, String>,

    /// Title categories, tried in declaration order
    #[serde(default, alias = "title_prefixes")]
    pub title_prefix_categories: IndexMap<String, TitleCategory>,

    #[serde(default, alias = "honorifics_to_remove")]
    pub honorifics_to_strip: Vec<String>,

    #[serde(default, alias = "suffixes_to_remove")]
    pub suffixes_to_strip: Vec<String>,

    /// Legal-entity tokens ignored when comparing company names
    #[serde(default = "default_company_suffix_tokens", alias = "company_indicators")]
    pub company_suffix_tokens: Vec<String>,
}

impl NameConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: NameConfig = load_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_region.trim().is_empty() {
            return Err(ConfigError::Missing("name_processing.default_region".to_string()));
        }
        for (category, data) in &self.title_prefix_categories {
            if data.title.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "title category '{}' has an empty title",
                    category
                )));
            }
            if data.patterns.iter().any(|p| p.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "title category '{}' has an empty pattern",
                    category
                )));
            }
        }
        Ok(())
    }
}

fn default_person_policy() -> MatchPolicy {
    MatchPolicy {
        trusted_identifiers: Vec::new(),
        rules: vec![MatchRule::Email, MatchRule::Phone, MatchRule::NameAndCompany],
    }
}

fn default_company_policy() -> MatchPolicy {
    MatchPolicy {
        trusted_identifiers: Vec::new(),
        rules: vec![MatchRule::CompanyName],
    }
}

/// Match policies per entity kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default = "default_person_policy")]
    pub persons: MatchPolicy,
    #[serde(default = "default_company_policy")]
    pub companies: MatchPolicy,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            persons: default_person_policy(),
            companies: default_company_policy(),
        }
    }
}

/// How duplicate relationships are recognised.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipPolicy {
    /// Compare canonicalized company names in the de-duplication key
    #[serde(default)]
    pub canonicalize_company_names: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

/// Where and how result tables are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            format: OutputFormat::default(),
        }
    }
}

/// Top-level run configuration (`unify.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Field mapping document
    pub mapping: PathBuf,
    /// Name-processing document
    pub name_processing: PathBuf,
    pub sources: Vec<SourceSpec>,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub relationships: RelationshipPolicy,
    #[serde(default)]
    pub id_strategy: IdStrategy,
    #[serde(default)]
    pub output: OutputConfig,
}

impl RunConfig {
    /// Load the run configuration. Relative paths inside it are resolved
    /// against the directory containing the file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config: RunConfig = load_yaml(path)?;

        if config.sources.is_empty() {
            return Err(ConfigError::Missing(format!(
                "no sources declared in {}",
                path.display()
            )));
        }

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        resolve(&mut self.mapping);
        resolve(&mut self.name_processing);
        resolve(&mut self.output.dir);
        for source in &mut self.sources {
            if let Some(dataset) = source.persons.as_mut() {
                resolve(&mut dataset.file);
            }
            if let Some(dataset) = source.companies.as_mut() {
                resolve(&mut dataset.file);
            }
        }
    }
}
