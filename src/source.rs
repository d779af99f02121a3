//! Source systems and raw export loading.
//!
//! Every CRM export is described by a [`SourceSpec`] in the run
//! configuration. At run time the specs become a [`SourceSet`], which owns
//! the explicit priority order used by the merger.

use convert_case::{Case, Casing};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ConfigError;
use crate::extraction::FieldPath;

/// Index of a source inside its [`SourceSet`].
pub type SourceId = usize;

/// Family of CRM system a source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Rolodex-style contacts system (nested emails, phones and companies)
    Rolodex,
    /// Bigin-style CRM (flat contact and account records)
    Bigin,
}

impl SourceKind {
    /// Default merge priority; lower wins.
    pub fn default_priority(&self) -> u32 {
        match self {
            SourceKind::Rolodex => 0,
            SourceKind::Bigin => 10,
        }
    }
}

/// One dataset (contacts or accounts) exported by a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSpec {
    /// JSON export file
    pub file: PathBuf,
    /// Table prefix stripped from mapping paths (e.g. `Contacts.`)
    #[serde(default)]
    pub path_prefix: Option<String>,
}

fn default_id_path() -> String {
    "id".to_string()
}

/// Source declaration from the run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub kind: SourceKind,
    /// Overrides the kind's default priority
    #[serde(default)]
    pub priority: Option<u32>,
    /// Path of the record's native id
    #[serde(default = "default_id_path")]
    pub id_path: String,
    #[serde(default)]
    pub persons: Option<DatasetSpec>,
    #[serde(default)]
    pub companies: Option<DatasetSpec>,
}

/// A configured source, ready for use by the unifier and merger.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub kind: SourceKind,
    pub priority: u32,
    /// Column holding this source's native id (e.g. `colourcoats_bigin_id`)
    pub native_id_column: String,
    pub id_path: FieldPath,
}

/// Column name for a source's native id: `ColourcoatsBigin` -> `colourcoats_bigin_id`.
pub fn native_id_column(source_name: &str) -> String {
    format!("{}_id", source_name.to_case(Case::Snake))
}

/// Ordered collection of sources with a total merge-priority order.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    sources: Vec<Source>,
}

impl SourceSet {
    pub fn from_specs(specs: &[SourceSpec]) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut sources = Vec::with_capacity(specs.len());

        for (id, spec) in specs.iter().enumerate() {
            let name = spec.name.trim();
            if name.is_empty() {
                return Err(ConfigError::Invalid(format!("source #{} has an empty name", id)));
            }
            if !seen.insert(name.to_string()) {
                return Err(ConfigError::Invalid(format!("duplicate source name '{}'", name)));
            }
            let id_path = FieldPath::parse(&spec.id_path).map_err(|e| ConfigError::Path {
                context: format!("id_path of source '{}'", name),
                source: e,
            })?;

            sources.push(Source {
                id,
                name: name.to_string(),
                kind: spec.kind,
                priority: spec.priority.unwrap_or_else(|| spec.kind.default_priority()),
                native_id_column: native_id_column(name),
                id_path,
            });
        }

        Ok(Self { sources })
    }

    pub fn get(&self, id: SourceId) -> Option<&Source> {
        self.sources.get(id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sort key for merge priority: explicit priority, then declaration order.
    pub fn rank(&self, id: SourceId) -> (u32, SourceId) {
        let priority = self.get(id).map(|s| s.priority).unwrap_or(u32::MAX);
        (priority, id)
    }

    /// Native id columns in declaration order.
    pub fn native_id_columns(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.native_id_column.clone()).collect()
    }
}

/// Error type for raw export loading
#[derive(Debug)]
pub enum SourceError {
    Io { path: PathBuf, source: std::io::Error },
    Json { path: PathBuf, source: serde_json::Error },
    Shape { path: PathBuf },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Io { path, source } => {
                write!(f, "Failed to read {}: {}", path.display(), source)
            }
            SourceError::Json { path, source } => {
                write!(f, "Failed to parse {}: {}", path.display(), source)
            }
            SourceError::Shape { path } => write!(
                f,
                "{} is neither a JSON array nor an object with a 'data' array",
                path.display()
            ),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Io { source, .. } => Some(source),
            SourceError::Json { source, .. } => Some(source),
            SourceError::Shape { .. } => None,
        }
    }
}

/// Load raw records from a JSON export: either a top-level array or an
/// API envelope with a `data` array.
pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<JsonValue>, SourceError> {
    let path = path.as_ref();

    let contents = fs::read_to_string(path).map_err(|e| SourceError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let value: JsonValue = serde_json::from_str(&contents).map_err(|e| SourceError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;

    records_from_value(value).ok_or_else(|| SourceError::Shape {
        path: path.to_path_buf(),
    })
}

/// Unwrap an export payload into its records.
pub fn records_from_value(value: JsonValue) -> Option<Vec<JsonValue>> {
    match value {
        JsonValue::Array(records) => Some(records),
        JsonValue::Object(mut map) => match map.remove("data") {
            Some(JsonValue::Array(records)) => Some(records),
            _ => None,
        },
        _ => None,
    }
}
