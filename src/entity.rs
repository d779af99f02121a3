//! Core value and record types shared by every pipeline stage.
//!
//! Source records stay as raw `serde_json::Value` trees. Everything the
//! unifier produces is expressed with the types in this module: a loosely
//! typed [`FieldValue`], the generic [`UnifiedRecord`] used for both persons
//! and companies, and the [`Relationship`] linking a person to a company.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::normalize::CompanyCanonicalizer;
use crate::source::SourceId;

/// Separator used when a set of source names is flattened into `data_source`.
pub const SOURCE_SEPARATOR: &str = "+";

/// Unified column names the engine itself reads or writes.
pub mod columns {
    pub const PERSON_ID: &str = "person_id";
    pub const COMPANY_ID: &str = "company_id";
    pub const FIRST_NAME: &str = "first_name";
    pub const LAST_NAME: &str = "last_name";
    pub const FULL_NAME: &str = "full_name";
    pub const TITLE: &str = "title";
    pub const EMAIL: &str = "email";
    pub const ALL_EMAILS: &str = "all_emails";
    pub const MOBILE: &str = "mobile";
    pub const ALTERNATE_MOBILE: &str = "alternate_mobile";
    pub const ALL_PHONES: &str = "all_phones";
    pub const COUNTRY: &str = "country";
    pub const COMPANY_NAME: &str = "company_name";
    pub const DATA_SOURCE: &str = "data_source";

    /// Columns whose values feed the `email` match rule
    pub const EMAIL_COLUMNS: [&str; 2] = [EMAIL, ALL_EMAILS];
    /// Columns whose values feed the `phone` match rule
    pub const PHONE_COLUMNS: [&str; 3] = [MOBILE, ALTERNATE_MOBILE, ALL_PHONES];
}

/// Represents different types of field values in a unified record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<FieldValue>),
    Null,
}

impl FieldValue {
    /// Null, blank strings and empty lists all count as "no value".
    pub fn is_absent(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::String(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.iter().all(FieldValue::is_absent),
            _ => false,
        }
    }

    pub fn is_present(&self) -> bool {
        !self.is_absent()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Scalar rendered as text. Lists and absent values have no text form.
    pub fn to_text(&self) -> Option<String> {
        if self.is_absent() {
            return None;
        }
        match self {
            FieldValue::String(s) => Some(s.trim().to_string()),
            FieldValue::Int(i) => Some(i.to_string()),
            FieldValue::Float(f) => Some(f.to_string()),
            FieldValue::Bool(b) => Some(b.to_string()),
            FieldValue::List(_) | FieldValue::Null => None,
        }
    }

    /// Loose boolean coercion for flags such as `is_active`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            FieldValue::Int(i) => match i {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            },
            FieldValue::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "y" | "1" | "active" => Some(true),
                "false" | "no" | "n" | "0" | "inactive" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Flatten into list items, dropping absent entries.
    pub fn into_items(self) -> Vec<FieldValue> {
        match self {
            FieldValue::List(items) => items
                .into_iter()
                .flat_map(FieldValue::into_items)
                .collect(),
            other if other.is_absent() => Vec::new(),
            other => vec![other],
        }
    }

    /// Collapse a list to its first present item; scalars pass through.
    pub fn into_scalar(self) -> FieldValue {
        match self {
            FieldValue::List(items) => items
                .into_iter()
                .flat_map(FieldValue::into_items)
                .next()
                .unwrap_or(FieldValue::Null),
            other => other,
        }
    }

    /// Absent values collapse to `Null` so that downstream checks only need
    /// to look for one variant.
    pub fn normalized(self) -> FieldValue {
        if self.is_absent() {
            FieldValue::Null
        } else {
            self
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => write!(f, "{}", s),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(fl) => write!(f, "{}", fl),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::List(l) => {
                let parts: Vec<String> = l.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join("; "))
            }
            FieldValue::Null => Ok(()),
        }
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => FieldValue::String(s),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    FieldValue::Float(f)
                } else {
                    FieldValue::Null
                }
            }
            serde_json::Value::Bool(b) => FieldValue::Bool(b),
            serde_json::Value::Array(arr) => {
                FieldValue::List(arr.into_iter().map(FieldValue::from).collect())
            }
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Object(_) => {
                // Nested objects have no column shape; keep them as JSON text
                FieldValue::String(value.to_string())
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Kind of unified entity a mapping section or record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Company,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Company => "company",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A person or company, either a pre-merge candidate or a merged canonical
/// record. Both share this shape.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedRecord {
    pub kind: EntityKind,
    pub id: String,
    /// Names of every source that contributed to this record.
    pub data_sources: BTreeSet<String>,
    /// Column name to value, in mapping order.
    pub fields: IndexMap<String, FieldValue>,
}

impl UnifiedRecord {
    pub fn new(kind: EntityKind, id: impl Into<String>, source_name: impl Into<String>) -> Self {
        let mut data_sources = BTreeSet::new();
        data_sources.insert(source_name.into());
        Self {
            kind,
            id: id.into(),
            data_sources,
            fields: IndexMap::new(),
        }
    }

    /// Present value of a column, if any.
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.fields.get(column).filter(|v| v.is_present())
    }

    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).and_then(FieldValue::to_text)
    }

    pub fn set(&mut self, column: impl Into<String>, value: FieldValue) {
        self.fields.insert(column.into(), value.normalized());
    }

    pub fn has(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Sorted, de-duplicated `+`-join of contributing source names.
    pub fn data_source(&self) -> String {
        join_sources(&self.data_sources)
    }
}

pub(crate) fn join_sources(sources: &BTreeSet<String>) -> String {
    sources
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(SOURCE_SEPARATOR)
}

/// A person's affiliation with a company as reported by one or more sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relationship {
    pub relationship_id: String,
    pub person_id: String,
    pub company_id: Option<String>,
    pub company_name: Option<String>,
    pub is_active: Option<bool>,
    pub start_date: Option<String>,
    pub title_at_company: Option<String>,
    #[serde(skip)]
    pub data_sources: BTreeSet<String>,
    /// Highest-priority contributing source, used to order metadata merges.
    #[serde(skip)]
    pub source: SourceId,
    /// `company_id` holds a unified company id rather than a native one
    #[serde(skip)]
    pub company_linked: bool,
}

impl Relationship {
    pub fn data_source(&self) -> String {
        join_sources(&self.data_sources)
    }

    /// Company side of the de-duplication key.
    ///
    /// Unified company ids compare directly. Native ids only compare within
    /// the source that reported them. Without an id the name is used,
    /// canonicalized when `companies` is given.
    pub fn company_key(&self, companies: Option<&CompanyCanonicalizer>) -> Option<String> {
        match (&self.company_id, &self.company_name) {
            (Some(id), _) if self.company_linked => Some(format!("id:{}", id)),
            (Some(id), _) => Some(format!("native:{}:{}", self.source, id)),
            (None, Some(name)) => {
                let name = companies
                    .and_then(|c| c.canonicalize(name))
                    .unwrap_or_else(|| name.trim().to_string());
                Some(format!("name:{}", name))
            }
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_values() {
        assert!(FieldValue::Null.is_absent());
        assert!(FieldValue::from("   ").is_absent());
        assert!(FieldValue::List(vec![]).is_absent());
        assert!(FieldValue::List(vec![FieldValue::Null]).is_absent());
        assert!(FieldValue::Int(0).is_present());
        assert!(FieldValue::Bool(false).is_present());
    }

    #[test]
    fn test_from_json_value() {
        assert_eq!(FieldValue::from(json!("x")), FieldValue::from("x"));
        assert_eq!(FieldValue::from(json!(42)), FieldValue::Int(42));
        assert_eq!(
            FieldValue::from(json!(["a", 1])),
            FieldValue::List(vec![FieldValue::from("a"), FieldValue::Int(1)])
        );
        assert_eq!(
            FieldValue::from(json!({"k": "v"})),
            FieldValue::from(r#"{"k":"v"}"#)
        );
    }

    #[test]
    fn test_scalar_and_list_coercion() {
        let list = FieldValue::List(vec![
            FieldValue::Null,
            FieldValue::from("a"),
            FieldValue::from("b"),
        ]);
        assert_eq!(list.clone().into_scalar(), FieldValue::from("a"));
        assert_eq!(list.into_items().len(), 2);
        assert_eq!(FieldValue::from("a").into_items(), vec![FieldValue::from("a")]);
        assert!(FieldValue::Null.into_items().is_empty());
    }

    #[test]
    fn test_as_bool() {
        assert_eq!(FieldValue::from("Yes").as_bool(), Some(true));
        assert_eq!(FieldValue::Int(0).as_bool(), Some(false));
        assert_eq!(FieldValue::from("maybe").as_bool(), None);
    }

    #[test]
    fn test_display_joins_lists() {
        let list = FieldValue::List(vec![FieldValue::from("a@x.com"), FieldValue::from("b@x.com")]);
        assert_eq!(list.to_string(), "a@x.com; b@x.com");
        assert_eq!(FieldValue::Null.to_string(), "");
    }

    #[test]
    fn test_data_source_is_sorted_join() {
        let mut record = UnifiedRecord::new(EntityKind::Person, "p1", "Rolodex");
        record.data_sources.insert("MetaliaBigin".to_string());
        record.data_sources.insert("ColourcoatsBigin".to_string());
        record.data_sources.insert("Rolodex".to_string());
        assert_eq!(record.data_source(), "ColourcoatsBigin+MetaliaBigin+Rolodex");
    }
}
