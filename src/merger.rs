//! Collapsing identity groups into canonical records.

use indexmap::IndexMap;
use std::collections::HashMap;

use crate::entity::{columns, FieldValue, Relationship, UnifiedRecord};
use crate::ids::IdGenerator;
use crate::mapping::{ColumnType, EntitySchema};
use crate::normalize::CompanyCanonicalizer;
use crate::source::{SourceId, SourceSet};
use crate::unifier::Candidate;

/// Maps every pre-merge id to the id of the record that replaced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdRemap {
    map: HashMap<String, String>,
}

impl IdRemap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, old: impl Into<String>, new: impl Into<String>) {
        self.map.insert(old.into(), new.into());
    }

    pub fn get(&self, old: &str) -> Option<&str> {
        self.map.get(old).map(String::as_str)
    }

    /// The replacing id, or `id` itself when it was never remapped.
    pub fn resolve<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id).unwrap_or(id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Canonical records plus the id remap produced by [`Merger::merge_all`].
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    pub records: Vec<UnifiedRecord>,
    pub remap: IdRemap,
}

fn union_into(target: &mut FieldValue, incoming: &FieldValue) {
    let mut items = std::mem::replace(target, FieldValue::Null).into_items();
    for item in incoming.clone().into_items() {
        if !items.contains(&item) {
            items.push(item);
        }
    }
    *target = FieldValue::List(items).normalized();
}

pub struct Merger<'a> {
    sources: &'a SourceSet,
    ids: IdGenerator,
}

impl<'a> Merger<'a> {
    pub fn new(sources: &'a SourceSet, ids: IdGenerator) -> Self {
        Self { sources, ids }
    }

    /// Collapse one identity group.
    ///
    /// Members are ordered by source priority (ties keep their incoming
    /// order). The top member is the starting point; every other member
    /// adds list items it does not already have and fills scalar columns
    /// that are still absent. A single-member group keeps its id.
    pub fn merge_group(
        &self,
        schema: &EntitySchema,
        mut members: Vec<&Candidate>,
    ) -> Option<UnifiedRecord> {
        members.sort_by_key(|c| self.sources.rank(c.source));
        let (top, rest) = members.split_first()?;

        let mut canonical = top.record.clone();
        for member in rest {
            for (column, value) in &member.record.fields {
                if column == &schema.id_column || column == columns::DATA_SOURCE {
                    continue;
                }
                if value.is_absent() {
                    continue;
                }
                match schema.column_type(column) {
                    ColumnType::List => {
                        let slot = canonical
                            .fields
                            .entry(column.clone())
                            .or_insert(FieldValue::Null);
                        union_into(slot, value);
                    }
                    ColumnType::Scalar => {
                        if !canonical.has(column) {
                            canonical.set(column.clone(), value.clone());
                        }
                    }
                }
            }
            canonical
                .data_sources
                .extend(member.record.data_sources.iter().cloned());
        }

        if !rest.is_empty() {
            canonical.id = self.ids.merged_id(
                schema.kind.as_str(),
                members.iter().map(|m| m.record.id.as_str()),
            );
        }
        Some(canonical)
    }

    /// Merge every group. `groups` holds indices into `candidates`.
    pub fn merge_all(
        &self,
        schema: &EntitySchema,
        candidates: &[Candidate],
        groups: &[Vec<usize>],
    ) -> MergeResult {
        let mut result = MergeResult::default();

        for group in groups {
            let members: Vec<&Candidate> =
                group.iter().filter_map(|&i| candidates.get(i)).collect();
            let Some(canonical) = self.merge_group(schema, members.clone()) else {
                continue;
            };
            for member in &members {
                result.remap.insert(member.record.id.clone(), canonical.id.clone());
            }
            result.records.push(canonical);
        }

        result
    }

    /// Remap `person_id` and collapse relationships sharing
    /// `(person_id, company)`. Metadata is taken first-non-null in source
    /// priority order. When `companies` is given, company names are
    /// compared canonically.
    pub fn merge_relationships(
        &self,
        relationships: Vec<Relationship>,
        remap: &IdRemap,
        companies: Option<&CompanyCanonicalizer>,
    ) -> Vec<Relationship> {
        let mut grouped: IndexMap<(String, String), Vec<Relationship>> = IndexMap::new();

        for mut relationship in relationships {
            relationship.person_id = remap.resolve(&relationship.person_id).to_string();

            let Some(company) = relationship.company_key(companies) else {
                continue;
            };

            grouped
                .entry((relationship.person_id.clone(), company))
                .or_default()
                .push(relationship);
        }

        grouped
            .into_values()
            .filter_map(|mut members| {
                members.sort_by_key(|r| self.sources.rank(r.source));
                let mut members = members.into_iter();
                let mut merged = members.next()?;
                for other in members {
                    merged.company_id = merged.company_id.or(other.company_id);
                    merged.company_name = merged.company_name.or(other.company_name);
                    merged.is_active = merged.is_active.or(other.is_active);
                    merged.start_date = merged.start_date.or(other.start_date);
                    merged.title_at_company = merged.title_at_company.or(other.title_at_company);
                    merged.data_sources.extend(other.data_sources);
                }
                Some(merged)
            })
            .collect()
    }
}

/// Lookup from a source's native company id to the unified company id.
#[derive(Debug, Clone, Default)]
pub struct CompanyIndex {
    by_native: HashMap<(SourceId, String), String>,
}

impl CompanyIndex {
    /// Index every company candidate under the id of the record that
    /// replaced it. A candidate's own native id wins over a foreign
    /// reference to the same id.
    pub fn build(candidates: &[Candidate], remap: &IdRemap, sources: &SourceSet) -> Self {
        let mut by_native = HashMap::new();
        for candidate in candidates {
            let unified = remap.resolve(&candidate.record.id);
            for source in sources.iter() {
                let Some(native) = candidate.record.text(&source.native_id_column) else {
                    continue;
                };
                if source.id == candidate.source {
                    by_native.insert((source.id, native), unified.to_string());
                } else {
                    by_native
                        .entry((source.id, native))
                        .or_insert_with(|| unified.to_string());
                }
            }
        }
        Self { by_native }
    }

    /// Replace each relationship's native company id with the unified id
    /// when the company is known. Returns how many were resolved.
    pub fn resolve(&self, relationships: &mut [Relationship]) -> usize {
        let mut resolved = 0;
        for relationship in relationships.iter_mut() {
            let Some(native) = relationship.company_id.clone() else {
                continue;
            };
            if let Some(unified) = self.by_native.get(&(relationship.source, native)) {
                relationship.company_id = Some(unified.clone());
                relationship.company_linked = true;
                resolved += 1;
            }
        }
        resolved
    }

    pub fn len(&self) -> usize {
        self.by_native.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_native.is_empty()
    }
}
