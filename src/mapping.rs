//! Declarative field mapping from source layouts to unified columns.
//!
//! The mapping document lists, per entity, every output column and where
//! each source keeps that value:
//!
//! ```yaml
//! persons:
//!   columns:
//!     person_id:
//!       Rolodex: generated
//!       ColourcoatsBigin: generated
//!     mobile:
//!       transform: phone
//!       Rolodex: phones[0].number
//!       ColourcoatsBigin: Contacts.Mobile
//!     all_emails:
//!       type: list
//!       Rolodex: emails[*].email
//!   affiliations:
//!     Rolodex:
//!       list: companies
//!       company_name: name
//!       is_active: is_current
//! ```
//!
//! The document is loaded once per run and compiled into an
//! [`EntitySchema`] per entity, with every path parsed up front.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{load_yaml, ConfigError};
use crate::entity::{columns, EntityKind};
use crate::extraction::FieldPath;
use crate::source::{SourceId, SourceSet};
use crate::transforms::TransformRegistry;

/// Shape of a unified column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    Scalar,
    List,
}

/// A source path, or several paths whose texts are joined with a space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathValue {
    One(String),
    Many(Vec<String>),
}

/// One column of the mapping document. Every key other than `type`,
/// `transform` and `description` is a source name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    #[serde(default, rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub transform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub sources: IndexMap<String, Option<PathValue>>,
}

/// Where a source keeps the company a person is affiliated with.
///
/// With `list`, one relationship is produced per element of that list and
/// the other paths are relative to the element. Without it, `company_id`
/// and `company_name` are read from the record itself and no metadata is
/// available.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AffiliationSpec {
    #[serde(default)]
    pub list: Option<String>,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub is_active: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub title_at_company: Option<String>,
}

/// Mapping section for one entity kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityMapping {
    /// Generated id column; defaults to `person_id` / `company_id`
    #[serde(default)]
    pub id_column: Option<String>,
    pub columns: IndexMap<String, ColumnSpec>,
    /// Per-source affiliation paths (persons only)
    #[serde(default)]
    pub affiliations: IndexMap<String, AffiliationSpec>,
}

/// The whole mapping document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(alias = "Unified_Personnel")]
    pub persons: EntityMapping,
    #[serde(default, alias = "Unified_Companies")]
    pub companies: Option<EntityMapping>,
}

impl FieldMapping {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mapping: FieldMapping = load_yaml(path)?;
        if mapping.persons.columns.is_empty() {
            return Err(ConfigError::Missing("persons.columns in field mapping".to_string()));
        }
        Ok(mapping)
    }
}

/// How one source populates one column.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceMapping {
    /// The source does not carry this field
    Absent,
    /// Filled by the engine (ids)
    Generated,
    /// Computed from other columns (`data_source`, names)
    Derived,
    Path(FieldPath),
    /// Several paths whose texts are joined with a single space
    Concat(Vec<FieldPath>),
}

impl SourceMapping {
    fn compile(
        value: &Option<PathValue>,
        prefix: Option<&str>,
        context: &str,
    ) -> Result<Self, ConfigError> {
        let parse = |raw: &str| {
            FieldPath::parse_with_prefix(raw, prefix).map_err(|e| ConfigError::Path {
                context: context.to_string(),
                source: e,
            })
        };

        match value {
            None => Ok(SourceMapping::Absent),
            Some(PathValue::One(raw)) => {
                match raw.trim().to_lowercase().as_str() {
                    "" => Ok(SourceMapping::Absent),
                    "generated" | "system generated" | "system_generated" => {
                        Ok(SourceMapping::Generated)
                    }
                    "derived" => Ok(SourceMapping::Derived),
                    _ => parse(raw.as_str()).map(SourceMapping::Path),
                }
            }
            Some(PathValue::Many(raws)) => {
                let paths = raws
                    .iter()
                    .filter(|r| !r.trim().is_empty())
                    .map(|r| parse(r.as_str()))
                    .collect::<Result<Vec<_>, _>>()?;
                if paths.is_empty() {
                    Ok(SourceMapping::Absent)
                } else {
                    Ok(SourceMapping::Concat(paths))
                }
            }
        }
    }
}

/// A compiled output column.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub transform: Option<String>,
    /// Indexed by [`SourceId`]
    pub sources: Vec<SourceMapping>,
}

impl Column {
    pub fn source(&self, id: SourceId) -> &SourceMapping {
        self.sources.get(id).unwrap_or(&SourceMapping::Absent)
    }
}

/// Compiled affiliation paths for one source.
#[derive(Debug, Clone, Default)]
pub struct Affiliation {
    pub list: Option<FieldPath>,
    pub company_id: Option<FieldPath>,
    pub company_name: Option<FieldPath>,
    pub is_active: Option<FieldPath>,
    pub start_date: Option<FieldPath>,
    pub title_at_company: Option<FieldPath>,
}

impl Affiliation {
    fn compile(
        spec: &AffiliationSpec,
        prefix: Option<&str>,
        source: &str,
    ) -> Result<Self, ConfigError> {
        let has_metadata = spec.is_active.is_some()
            || spec.start_date.is_some()
            || spec.title_at_company.is_some();
        if spec.list.is_none() && has_metadata {
            return Err(ConfigError::Invalid(format!(
                "affiliations for '{}' declare relationship metadata without a 'list' path",
                source
            )));
        }

        // Element paths are relative to the list element, never prefixed
        let element_prefix = if spec.list.is_some() { None } else { prefix };
        let parse = |raw: &Option<String>, field: &str, prefix: Option<&str>| {
            raw.as_deref()
                .map(|r| {
                    FieldPath::parse_with_prefix(r, prefix).map_err(|e| ConfigError::Path {
                        context: format!("affiliations.{}.{}", source, field),
                        source: e,
                    })
                })
                .transpose()
        };

        let affiliation = Affiliation {
            list: parse(&spec.list, "list", prefix)?,
            company_id: parse(&spec.company_id, "company_id", element_prefix)?,
            company_name: parse(&spec.company_name, "company_name", element_prefix)?,
            is_active: parse(&spec.is_active, "is_active", None)?,
            start_date: parse(&spec.start_date, "start_date", None)?,
            title_at_company: parse(&spec.title_at_company, "title_at_company", None)?,
        };

        if affiliation.company_id.is_none() && affiliation.company_name.is_none() {
            return Err(ConfigError::Invalid(format!(
                "affiliations for '{}' need a company_id or company_name path",
                source
            )));
        }
        Ok(affiliation)
    }
}

/// Mapping for one entity kind, compiled against a [`SourceSet`].
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub kind: EntityKind,
    pub id_column: String,
    pub columns: Vec<Column>,
    /// Indexed by [`SourceId`]
    pub affiliations: Vec<Option<Affiliation>>,
}

impl EntitySchema {
    /// Compile a mapping section. `prefixes` holds each source's dataset
    /// path prefix, indexed by [`SourceId`].
    pub fn compile(
        kind: EntityKind,
        mapping: &EntityMapping,
        sources: &SourceSet,
        prefixes: &[Option<String>],
        transforms: &TransformRegistry,
    ) -> Result<Self, ConfigError> {
        let prefix = |id: SourceId| prefixes.get(id).and_then(|p| p.as_deref());
        let id_column = mapping.id_column.clone().unwrap_or_else(|| match kind {
            EntityKind::Person => columns::PERSON_ID.to_string(),
            EntityKind::Company => columns::COMPANY_ID.to_string(),
        });

        let mut compiled = Vec::with_capacity(mapping.columns.len());
        for (name, spec) in &mapping.columns {
            if let Some(transform) = &spec.transform {
                if !transforms.has_transform(transform) {
                    return Err(ConfigError::UnknownTransform {
                        column: name.clone(),
                        transform: transform.clone(),
                    });
                }
            }

            for source_name in spec.sources.keys() {
                if sources.by_name(source_name).is_none() {
                    tracing::warn!(
                        "Column '{}' maps unknown source '{}'; ignoring it",
                        name,
                        source_name
                    );
                }
            }

            let mut per_source = Vec::with_capacity(sources.len());
            for source in sources.iter() {
                let value = spec.sources.get(&source.name).cloned().flatten();
                let context = format!("{}.{} for source '{}'", kind, name, source.name);
                per_source.push(SourceMapping::compile(&value, prefix(source.id), &context)?);
            }

            compiled.push(Column {
                name: name.clone(),
                column_type: spec.column_type,
                transform: spec.transform.clone(),
                sources: per_source,
            });
        }

        if kind == EntityKind::Company && !mapping.affiliations.is_empty() {
            tracing::warn!("Affiliations are only read for persons; ignoring company affiliations");
        }

        let mut affiliations = Vec::with_capacity(sources.len());
        for source in sources.iter() {
            let affiliation = match (kind, mapping.affiliations.get(&source.name)) {
                (EntityKind::Person, Some(spec)) => {
                    Some(Affiliation::compile(spec, prefix(source.id), &source.name)?)
                }
                _ => None,
            };
            affiliations.push(affiliation);
        }

        Ok(Self {
            kind,
            id_column,
            columns: compiled,
            affiliations,
        })
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_type(&self, name: &str) -> ColumnType {
        self.column(name).map(|c| c.column_type).unwrap_or_default()
    }

    pub fn affiliation(&self, source: SourceId) -> Option<&Affiliation> {
        self.affiliations.get(source).and_then(Option::as_ref)
    }

    /// Output column order: the id column (when not declared), mapping
    /// order, `data_source` (when not declared), then native id columns
    /// the mapping does not declare, in source order.
    pub fn output_columns(&self, sources: &SourceSet) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.columns.len() + sources.len() + 2);
        if self.column(&self.id_column).is_none() {
            out.push(self.id_column.clone());
        }
        out.extend(self.columns.iter().map(|c| c.name.clone()));
        if self.column(columns::DATA_SOURCE).is_none() {
            out.push(columns::DATA_SOURCE.to_string());
        }
        for native in sources.native_id_columns() {
            if !out.contains(&native) {
                out.push(native);
            }
        }
        out
    }
}
