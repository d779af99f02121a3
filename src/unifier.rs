//! Per-source record unification.
//!
//! Turns one raw source record into a candidate [`UnifiedRecord`] (plus,
//! for persons, the relationships it reports) by walking the compiled
//! [`EntitySchema`]. Nothing here fails: missing fields are absent values,
//! values that do not normalize become null, and records without the
//! minimum identity are rejected.

use serde_json::Value as JsonValue;

use crate::entity::{columns, FieldValue, Relationship, UnifiedRecord};
use crate::extraction::{Extractor, FieldPath};
use crate::ids::IdGenerator;
use crate::mapping::{Affiliation, ColumnType, EntitySchema, SourceMapping};
use crate::normalize::Normalizers;
use crate::source::{Source, SourceId, SourceSet};
use crate::transforms::{TransformContext, TransformRegistry};

/// A pre-merge record together with the source that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub source: SourceId,
    pub record: UnifiedRecord,
}

/// Result of unifying one raw person record.
#[derive(Debug, Clone, Default)]
pub struct PersonUnification {
    pub candidate: Option<Candidate>,
    pub relationships: Vec<Relationship>,
    /// Values that were present but did not survive a transform
    pub normalization_failures: usize,
}

impl PersonUnification {
    pub fn rejected() -> Self {
        Self::default()
    }

    pub fn into_parts(self) -> (Option<Candidate>, Vec<Relationship>) {
        (self.candidate, self.relationships)
    }
}

/// Result of unifying one raw company record.
#[derive(Debug, Clone, Default)]
pub struct CompanyUnification {
    pub candidate: Option<Candidate>,
    pub normalization_failures: usize,
}

fn count_items(value: &FieldValue) -> usize {
    match value {
        FieldValue::List(items) => items.iter().filter(|i| i.is_present()).count(),
        other if other.is_present() => 1,
        _ => 0,
    }
}

fn tidy(value: FieldValue) -> FieldValue {
    match value {
        FieldValue::String(s) => FieldValue::String(s.trim().to_string()),
        other => other,
    }
}

/// Coerce an extracted value to the column's declared shape.
fn coerce(value: FieldValue, column_type: ColumnType) -> FieldValue {
    match column_type {
        ColumnType::Scalar => tidy(value.into_scalar()),
        ColumnType::List => {
            let mut items: Vec<FieldValue> = Vec::new();
            for item in value.into_items().into_iter().map(tidy) {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
            FieldValue::List(items)
        }
    }
    .normalized()
}

/// Resolve a column mapping against a raw record. Several paths feed a
/// list column item by item and a scalar column as space-joined text.
fn extract(
    raw: &JsonValue,
    mapping: &SourceMapping,
    column_type: ColumnType,
) -> Option<FieldValue> {
    match mapping {
        SourceMapping::Path(path) => raw.extract(path),
        SourceMapping::Concat(paths) if column_type == ColumnType::List => {
            let items: Vec<FieldValue> = paths
                .iter()
                .filter_map(|p| raw.extract(p))
                .flat_map(FieldValue::into_items)
                .collect();
            if items.is_empty() {
                None
            } else {
                Some(FieldValue::List(items))
            }
        }
        SourceMapping::Concat(paths) => {
            let parts: Vec<String> = paths.iter().filter_map(|p| raw.extract_text(p)).collect();
            if parts.is_empty() {
                None
            } else {
                Some(FieldValue::String(parts.join(" ")))
            }
        }
        SourceMapping::Absent | SourceMapping::Generated | SourceMapping::Derived => None,
    }
}

/// Builds candidates from raw records of every configured source.
pub struct Unifier<'a> {
    sources: &'a SourceSet,
    normalizers: &'a Normalizers,
    transforms: &'a TransformRegistry,
    ids: IdGenerator,
}

impl<'a> Unifier<'a> {
    pub fn new(
        sources: &'a SourceSet,
        normalizers: &'a Normalizers,
        transforms: &'a TransformRegistry,
        ids: IdGenerator,
    ) -> Self {
        Self {
            sources,
            normalizers,
            transforms,
            ids,
        }
    }

    /// Unify record `index` of `source`'s contacts export.
    ///
    /// A rejected person yields no candidate and no relationships.
    pub fn unify_person(
        &self,
        schema: &EntitySchema,
        source: SourceId,
        index: usize,
        raw: &JsonValue,
    ) -> PersonUnification {
        let Some(source) = self.sources.get(source) else {
            return PersonUnification::rejected();
        };
        if !raw.is_object() {
            tracing::debug!("{} person #{} is not an object; rejected", source.name, index);
            return PersonUnification::rejected();
        }

        let mut record = self.base_record(schema, source, index, raw);

        if !self.apply_names(&mut record) {
            tracing::debug!("{} person #{} has no name; rejected", source.name, index);
            return PersonUnification::rejected();
        }

        let normalization_failures = self.apply_transforms(schema, &mut record);
        let relationships = schema
            .affiliation(source.id)
            .map(|affiliation| self.relationships(affiliation, source, index, raw, &record.id))
            .unwrap_or_default();

        PersonUnification {
            candidate: Some(Candidate {
                source: source.id,
                record,
            }),
            relationships,
            normalization_failures,
        }
    }

    /// Unify record `index` of `source`'s accounts export. Companies without
    /// a name are rejected.
    pub fn unify_company(
        &self,
        schema: &EntitySchema,
        source: SourceId,
        index: usize,
        raw: &JsonValue,
    ) -> CompanyUnification {
        let Some(source) = self.sources.get(source) else {
            return CompanyUnification::default();
        };
        if !raw.is_object() {
            tracing::debug!("{} company #{} is not an object; rejected", source.name, index);
            return CompanyUnification::default();
        }

        let mut record = self.base_record(schema, source, index, raw);
        if !record.has(columns::COMPANY_NAME) {
            tracing::debug!("{} company #{} has no name; rejected", source.name, index);
            return CompanyUnification::default();
        }

        let normalization_failures = self.apply_transforms(schema, &mut record);
        CompanyUnification {
            candidate: Some(Candidate {
                source: source.id,
                record,
            }),
            normalization_failures,
        }
    }

    /// Id, source bookkeeping and every mapped column, before any
    /// entity-specific processing.
    fn base_record(
        &self,
        schema: &EntitySchema,
        source: &Source,
        index: usize,
        raw: &JsonValue,
    ) -> UnifiedRecord {
        let id = self.ids.candidate_id(schema.kind, &source.name, index);
        let mut record = UnifiedRecord::new(schema.kind, id, source.name.clone());

        for column in &schema.columns {
            if column.name == schema.id_column || column.name == columns::DATA_SOURCE {
                continue;
            }
            if let Some(value) = extract(raw, column.source(source.id), column.column_type) {
                record.set(column.name.clone(), coerce(value, column.column_type));
            }
        }

        // A source's own id wins over a foreign reference to it
        if let Some(native) = raw.extract_text(&source.id_path) {
            record.set(source.native_id_column.clone(), FieldValue::String(native));
        }

        record
    }

    /// Run the name and title pipeline. Returns false when the record has
    /// no usable name.
    fn apply_names(&self, record: &mut UnifiedRecord) -> bool {
        let first = record.text(columns::FIRST_NAME);
        let last = record.text(columns::LAST_NAME);
        let full = record.text(columns::FULL_NAME);

        let parts = self
            .normalizers
            .names
            .process(first.as_deref(), last.as_deref(), full.as_deref());
        if !parts.has_name() {
            return false;
        }

        let inferred = parts.inferred_title.clone().or_else(|| {
            let raw_names: Vec<&str> = [&first, &last, &full]
                .into_iter()
                .filter_map(|n| n.as_deref())
                .collect();
            self.normalizers.names.infer_title(&raw_names.join(" "))
        });

        record.set(columns::FIRST_NAME, FieldValue::from(parts.first_name));
        record.set(columns::LAST_NAME, FieldValue::from(parts.last_name));
        record.set(columns::FULL_NAME, FieldValue::from(parts.full_name));

        let title = record
            .text(columns::TITLE)
            .and_then(|explicit| self.normalizers.job_titles.clean(&explicit))
            .or(inferred);
        record.set(columns::TITLE, FieldValue::from(title));

        true
    }

    /// Apply column transforms, returning how many present values were lost.
    fn apply_transforms(&self, schema: &EntitySchema, record: &mut UnifiedRecord) -> usize {
        let context = TransformContext {
            country: record.text(columns::COUNTRY),
        };
        let mut failures = 0;

        for column in &schema.columns {
            let Some(transform) = &column.transform else {
                continue;
            };
            let Some(value) = record.get(&column.name).cloned() else {
                continue;
            };

            let before = count_items(&value);
            let result = match self.transforms.call(transform, value, &context) {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(
                        "Transform '{}' failed on column '{}' of {}: {}",
                        transform,
                        column.name,
                        record.id,
                        e
                    );
                    FieldValue::Null
                }
            };

            let lost = before.saturating_sub(count_items(&result));
            if lost > 0 {
                tracing::debug!(
                    "{} value(s) of '{}' on {} did not normalize",
                    lost,
                    column.name,
                    record.id
                );
            }
            failures += lost;
            record.set(column.name.clone(), coerce(result, column.column_type));
        }

        failures
    }

    fn relationships(
        &self,
        affiliation: &Affiliation,
        source: &Source,
        index: usize,
        raw: &JsonValue,
        person_id: &str,
    ) -> Vec<Relationship> {
        let elements: Vec<JsonValue> = match &affiliation.list {
            Some(list) => match list.resolve(raw) {
                Some(JsonValue::Array(items)) => items,
                Some(single @ JsonValue::Object(_)) => vec![single],
                _ => Vec::new(),
            },
            None => vec![raw.clone()],
        };

        let text = |element: &JsonValue, path: &Option<FieldPath>| {
            path.as_ref().and_then(|p| element.extract_text(p))
        };

        elements
            .iter()
            .enumerate()
            .filter_map(|(position, element)| {
                let company_id = text(element, &affiliation.company_id);
                let company_name = text(element, &affiliation.company_name);
                if company_id.is_none() && company_name.is_none() {
                    return None;
                }

                let is_active = affiliation
                    .is_active
                    .as_ref()
                    .and_then(|p| element.extract(p))
                    .and_then(|v| v.into_scalar().as_bool());
                let title_at_company = text(element, &affiliation.title_at_company)
                    .and_then(|t| self.normalizers.job_titles.clean(&t));

                let mut relationship = Relationship {
                    relationship_id: self.ids.relationship_id(&source.name, index, position),
                    person_id: person_id.to_string(),
                    company_id,
                    company_name,
                    is_active,
                    start_date: text(element, &affiliation.start_date),
                    title_at_company,
                    data_sources: Default::default(),
                    source: source.id,
                    company_linked: false,
                };
                relationship.data_sources.insert(source.name.clone());
                Some(relationship)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use crate::ids::IdStrategy;
    use crate::mapping::FieldMapping;
    use crate::normalize::tests::test_config;
    use crate::source::{SourceKind, SourceSpec};
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        sources: SourceSet,
        normalizers: Arc<Normalizers>,
        transforms: TransformRegistry,
        persons: EntitySchema,
        companies: EntitySchema,
    }

    fn fixture() -> Fixture {
        let spec = |name: &str, kind| SourceSpec {
            name: name.to_string(),
            kind,
            priority: None,
            id_path: "id".to_string(),
            persons: None,
            companies: None,
        };
        let sources = SourceSet::from_specs(&[
            spec("ColourcoatsBigin", SourceKind::Bigin),
            spec("Rolodex", SourceKind::Rolodex),
        ])
        .unwrap();
        let normalizers = Arc::new(Normalizers::new(&test_config()).unwrap());
        let transforms = TransformRegistry::with_builtins(Arc::clone(&normalizers));

        let mapping: FieldMapping = serde_yaml::from_str(
            r#"
persons:
  columns:
    person_id:
      ColourcoatsBigin: generated
      Rolodex: generated
    first_name:
      ColourcoatsBigin: First_Name
      Rolodex: first_name
    last_name:
      ColourcoatsBigin: Last_Name
      Rolodex: last_name
    full_name:
      ColourcoatsBigin: Full_Name
    title:
      ColourcoatsBigin: Title
      Rolodex: designation
    email:
      transform: email
      ColourcoatsBigin: Email
      Rolodex: emails[0].email
    all_emails:
      type: list
      transform: email
      Rolodex: emails[*].email
    mobile:
      transform: phone
      ColourcoatsBigin: Mobile
      Rolodex: phones[0].number
    all_phones:
      type: list
      transform: phone
      ColourcoatsBigin: [Mobile, Phone]
    country:
      ColourcoatsBigin: Mailing_Country
      Rolodex: address.split(', ')[1]
    company_name:
      ColourcoatsBigin: Account_Name.name
      Rolodex: companies[0].name
    data_source:
      Rolodex: derived
  affiliations:
    ColourcoatsBigin:
      company_id: Account_Name.id
      company_name: Account_Name.name
    Rolodex:
      list: companies
      company_id: id
      company_name: name
      is_active: current
      title_at_company: role
companies:
  columns:
    company_name:
      ColourcoatsBigin: Account_Name
      Rolodex: name
    website:
      ColourcoatsBigin: Website
"#,
        )
        .unwrap();

        let prefixes = vec![None, None];
        let persons = EntitySchema::compile(
            EntityKind::Person,
            &mapping.persons,
            &sources,
            &prefixes,
            &transforms,
        )
        .unwrap();
        let companies = EntitySchema::compile(
            EntityKind::Company,
            mapping.companies.as_ref().unwrap(),
            &sources,
            &prefixes,
            &transforms,
        )
        .unwrap();

        Fixture {
            sources,
            normalizers,
            transforms,
            persons,
            companies,
        }
    }

    impl Fixture {
        fn unifier(&self) -> Unifier<'_> {
            Unifier::new(
                &self.sources,
                &self.normalizers,
                &self.transforms,
                IdGenerator::new(IdStrategy::Deterministic),
            )
        }
    }

    #[test]
    fn test_bigin_person() {
        let fx = fixture();
        let raw = json!({
            "id": 4411,
            "First_Name": "Ar. Rohan",
            "Last_Name": "Shah",
            "Email": " Rohan@Studio.in ",
            "Mobile": "98765 43210",
            "Mailing_Country": "India",
            "Account_Name": {"id": "900", "name": "Studio Nine Pvt Ltd"}
        });

        let result = fx.unifier().unify_person(&fx.persons, 0, 0, &raw);
        assert_eq!(result.normalization_failures, 0);
        let candidate = result.candidate.unwrap();
        let record = &candidate.record;

        assert_eq!(candidate.source, 0);
        assert_eq!(record.text("first_name").as_deref(), Some("Rohan"));
        assert_eq!(record.text("full_name").as_deref(), Some("Rohan Shah"));
        assert_eq!(record.text("title").as_deref(), Some("Architect"));
        assert_eq!(record.text("email").as_deref(), Some("rohan@studio.in"));
        assert_eq!(record.text("mobile").as_deref(), Some("+919876543210"));
        assert_eq!(record.text("colourcoats_bigin_id").as_deref(), Some("4411"));
        assert_eq!(record.data_source(), "ColourcoatsBigin");

        assert_eq!(result.relationships.len(), 1);
        let rel = &result.relationships[0];
        assert_eq!(rel.person_id, record.id);
        assert_eq!(rel.company_id.as_deref(), Some("900"));
        assert_eq!(rel.company_name.as_deref(), Some("Studio Nine Pvt Ltd"));
        assert_eq!(rel.is_active, None);
    }

    #[test]
    fn test_rolodex_person_with_lists_and_affiliations() {
        let fx = fixture();
        let raw = json!({
            "id": "55",
            "first_name": "Meera",
            "last_name": "Iyer",
            "designation": "Principal (Retail) at Studio Nine",
            "emails": [{"email": "MEERA@x.com"}, {"email": "meera@x.com"}, {"email": "bad"}],
            "phones": [{"number": "not-a-number"}],
            "address": "Pune, United States",
            "companies": [
                {"id": 7, "name": "Studio Nine", "current": "yes", "role": "Partner | Studio Nine"},
                {"name": ""},
                {"id": 8, "current": false}
            ]
        });

        let result = fx.unifier().unify_person(&fx.persons, 1, 3, &raw);
        let record = result.candidate.as_ref().unwrap().record.clone();

        assert_eq!(record.text("full_name").as_deref(), Some("Meera Iyer"));
        assert_eq!(record.text("title").as_deref(), Some("Principal"));
        assert_eq!(
            record.get("all_emails"),
            Some(&FieldValue::List(vec![FieldValue::from("meera@x.com")]))
        );
        assert_eq!(record.get("mobile"), None);
        assert_eq!(record.text("country").as_deref(), Some("United States"));
        assert_eq!(record.text("rolodex_id").as_deref(), Some("55"));
        // bad email in the list and the unparseable phone
        assert_eq!(result.normalization_failures, 2);

        let rels = &result.relationships;
        assert_eq!(rels.len(), 2);
        assert_eq!(rels[0].company_id.as_deref(), Some("7"));
        assert_eq!(rels[0].is_active, Some(true));
        assert_eq!(rels[0].title_at_company.as_deref(), Some("Partner"));
        assert_eq!(rels[1].company_id.as_deref(), Some("8"));
        assert_eq!(rels[1].company_name, None);
        assert_eq!(rels[1].is_active, Some(false));
        assert_ne!(rels[0].relationship_id, rels[1].relationship_id);
    }

    #[test]
    fn test_several_paths_feed_a_list_column() {
        let fx = fixture();
        let raw = json!({
            "id": "3",
            "Full_Name": "Kavya Nair",
            "Mobile": "9876543210",
            "Phone": "+91 98765 43210",
            "Mailing_Country": "India"
        });

        let record = fx.unifier().unify_person(&fx.persons, 0, 0, &raw).candidate.unwrap().record;
        assert_eq!(
            record.get("all_phones"),
            Some(&FieldValue::List(vec![FieldValue::from("+919876543210")]))
        );
    }

    #[test]
    fn test_inferred_title_from_name_text() {
        let fx = fixture();
        let raw = json!({"id": "1", "Full_Name": "Rohan Shah (Architect)"});

        let record = fx.unifier().unify_person(&fx.persons, 0, 0, &raw).candidate.unwrap().record;
        assert_eq!(record.text("title").as_deref(), Some("Architect"));
    }

    #[test]
    fn test_explicit_title_wins() {
        let fx = fixture();
        let raw = json!({"id": "1", "First_Name": "Dr Priya", "Title": "Consultant"});

        let record = fx.unifier().unify_person(&fx.persons, 0, 0, &raw).candidate.unwrap().record;
        assert_eq!(record.text("first_name").as_deref(), Some("Priya"));
        assert_eq!(record.text("title").as_deref(), Some("Consultant"));
    }

    #[test]
    fn test_rejected_person_has_no_relationships() {
        let fx = fixture();
        let raw = json!({
            "id": "2",
            "Email": "x@y.com",
            "Account_Name": {"id": "1", "name": "Acme"}
        });

        let (candidate, relationships) =
            fx.unifier().unify_person(&fx.persons, 0, 0, &raw).into_parts();
        assert!(candidate.is_none());
        assert!(relationships.is_empty());

        let (candidate, relationships) =
            fx.unifier().unify_person(&fx.persons, 0, 1, &json!("garbage")).into_parts();
        assert!(candidate.is_none());
        assert!(relationships.is_empty());
    }

    #[test]
    fn test_company_requires_name() {
        let fx = fixture();
        let unifier = fx.unifier();

        let raw = json!({"id": 9, "Account_Name": " Acme Ltd "});
        let named = unifier.unify_company(&fx.companies, 0, 0, &raw);
        let record = named.candidate.unwrap().record;
        assert_eq!(record.kind, EntityKind::Company);
        assert_eq!(record.text("company_name").as_deref(), Some("Acme Ltd"));
        assert_eq!(record.text("colourcoats_bigin_id").as_deref(), Some("9"));

        let raw = json!({"id": 10, "Website": "x.com"});
        let unnamed = unifier.unify_company(&fx.companies, 0, 1, &raw);
        assert!(unnamed.candidate.is_none());
    }
}
