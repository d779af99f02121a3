//! End-to-end unification run.
//!
//! A [`Pipeline`] is built once from configuration; every path, transform
//! name and region code is validated at that point. Running it is then
//! infallible: unreadable exports are logged and treated as empty, bad
//! records are rejected and counted, and the result is a set of tables plus
//! a [`RunReport`].

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::assembler::{assemble_entities, assemble_relationships, Table};
use crate::config::{ConfigError, MatchingConfig, NameConfig, RelationshipPolicy, RunConfig};
use crate::entity::{EntityKind, UnifiedRecord};
use crate::ids::{IdGenerator, IdStrategy};
use crate::mapping::{EntitySchema, FieldMapping};
use crate::matcher::{MatchPolicy, Matcher};
use crate::merger::{CompanyIndex, MergeResult, Merger};
use crate::normalize::Normalizers;
use crate::serialization::{SerializationError, TableSink};
use crate::source::{load_records, DatasetSpec, SourceSet, SourceSpec};
use crate::transforms::TransformRegistry;
use crate::unifier::{Candidate, Unifier};

pub const PERSONS_TABLE: &str = "persons";
pub const COMPANIES_TABLE: &str = "companies";
pub const RELATIONSHIPS_TABLE: &str = "relationships";

/// Raw records per source name, for persons and companies.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    pub persons: IndexMap<String, Vec<JsonValue>>,
    pub companies: IndexMap<String, Vec<JsonValue>>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persons(mut self, source: impl Into<String>, records: Vec<JsonValue>) -> Self {
        self.persons.insert(source.into(), records);
        self
    }

    pub fn with_companies(mut self, source: impl Into<String>, records: Vec<JsonValue>) -> Self {
        self.companies.insert(source.into(), records);
        self
    }
}

/// Policies that are not part of the mapping or name configuration.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub matching: MatchingConfig,
    pub relationships: RelationshipPolicy,
    pub id_strategy: IdStrategy,
}

/// Counters for one entity kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityReport {
    /// Raw records per source
    pub loaded: IndexMap<String, usize>,
    /// Rejected records per source
    pub rejected: IndexMap<String, usize>,
    pub candidates: usize,
    /// Identity groups with more than one member
    pub groups_found: usize,
    pub records_after_merge: usize,
    pub normalization_failures: usize,
    pub refused_unions: usize,
}

/// Summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub id_strategy: IdStrategy,
    pub persons: EntityReport,
    pub companies: Option<EntityReport>,
    pub relationships_before_merge: usize,
    pub relationships_after_merge: usize,
    /// Relationships whose native company id was replaced by a unified id
    pub relationships_linked_to_companies: usize,
}

impl RunReport {
    pub fn to_json(&self) -> Result<String, SerializationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), SerializationError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// Tables and report produced by a run.
#[derive(Debug, Clone)]
pub struct UnifyOutput {
    pub persons: Table,
    pub companies: Option<Table>,
    pub relationships: Table,
    pub report: RunReport,
}

impl UnifyOutput {
    /// Hand every table to `sink`.
    pub fn write_to(&self, sink: &mut dyn TableSink) -> Result<(), SerializationError> {
        sink.write_table(&self.persons)?;
        if let Some(companies) = &self.companies {
            sink.write_table(companies)?;
        }
        sink.write_table(&self.relationships)
    }
}

fn load_or_empty(source: &str, dataset: &DatasetSpec) -> Vec<JsonValue> {
    match load_records(&dataset.file) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!("Treating {} export as empty: {}", source, e);
            Vec::new()
        }
    }
}

pub struct Pipeline {
    specs: Vec<SourceSpec>,
    sources: SourceSet,
    normalizers: Arc<Normalizers>,
    transforms: TransformRegistry,
    persons: EntitySchema,
    companies: Option<EntitySchema>,
    options: PipelineOptions,
}

impl Pipeline {
    /// Build a pipeline, compiling the mapping against the declared sources.
    pub fn new(
        specs: Vec<SourceSpec>,
        mapping: &FieldMapping,
        names: &NameConfig,
        options: PipelineOptions,
    ) -> Result<Self, ConfigError> {
        let sources = SourceSet::from_specs(&specs)?;
        if sources.is_empty() {
            return Err(ConfigError::Missing("at least one source".to_string()));
        }

        let normalizers = Arc::new(Normalizers::new(names)?);
        let transforms = TransformRegistry::with_builtins(Arc::clone(&normalizers));

        let person_prefixes: Vec<Option<String>> = specs
            .iter()
            .map(|s| s.persons.as_ref().and_then(|d| d.path_prefix.clone()))
            .collect();
        let company_prefixes: Vec<Option<String>> = specs
            .iter()
            .map(|s| s.companies.as_ref().and_then(|d| d.path_prefix.clone()))
            .collect();

        let persons = EntitySchema::compile(
            EntityKind::Person,
            &mapping.persons,
            &sources,
            &person_prefixes,
            &transforms,
        )?;
        let companies = mapping
            .companies
            .as_ref()
            .map(|companies| {
                EntitySchema::compile(
                    EntityKind::Company,
                    companies,
                    &sources,
                    &company_prefixes,
                    &transforms,
                )
            })
            .transpose()?;

        Ok(Self {
            specs,
            sources,
            normalizers,
            transforms,
            persons,
            companies,
            options,
        })
    }

    /// Load the mapping and name-processing documents named by `config`
    /// and build the pipeline.
    pub fn from_config(config: &RunConfig) -> Result<Self, ConfigError> {
        let mapping = FieldMapping::load_from_file(&config.mapping)?;
        let names = NameConfig::load_from_file(&config.name_processing)?;

        Self::new(
            config.sources.clone(),
            &mapping,
            &names,
            PipelineOptions {
                matching: config.matching.clone(),
                relationships: config.relationships.clone(),
                id_strategy: config.id_strategy,
            },
        )
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    pub fn person_schema(&self) -> &EntitySchema {
        &self.persons
    }

    pub fn company_schema(&self) -> Option<&EntitySchema> {
        self.companies.as_ref()
    }

    pub fn transforms(&self) -> &TransformRegistry {
        &self.transforms
    }

    /// Read every configured export. Files that cannot be read or parsed
    /// are logged and contribute no records.
    pub fn load_inputs(&self) -> RecordSet {
        let mut records = RecordSet::new();
        for (spec, source) in self.specs.iter().zip(self.sources.iter()) {
            if let Some(dataset) = &spec.persons {
                records
                    .persons
                    .insert(source.name.clone(), load_or_empty(&source.name, dataset));
            }
            if let Some(dataset) = &spec.companies {
                records
                    .companies
                    .insert(source.name.clone(), load_or_empty(&source.name, dataset));
            }
        }
        records
    }

    /// Load the configured exports and unify them.
    pub fn run(&self) -> UnifyOutput {
        self.run_with_records(&self.load_inputs())
    }

    /// Unify already-loaded records.
    pub fn run_with_records(&self, records: &RecordSet) -> UnifyOutput {
        let started_at = Utc::now();
        let ids = IdGenerator::new(self.options.id_strategy);
        let unifier = Unifier::new(&self.sources, &self.normalizers, &self.transforms, ids);
        let merger = Merger::new(&self.sources, ids);

        // Companies first, so relationships can point at unified company ids
        let (company_index, company_records, company_report) = match &self.companies {
            Some(schema) => {
                let mut report = EntityReport::default();
                let mut candidates = Vec::new();
                for source in self.sources.iter() {
                    let raws = records
                        .companies
                        .get(&source.name)
                        .map(Vec::as_slice)
                        .unwrap_or(&[]);
                    let mut rejected = 0;
                    for (index, raw) in raws.iter().enumerate() {
                        let result = unifier.unify_company(schema, source.id, index, raw);
                        report.normalization_failures += result.normalization_failures;
                        match result.candidate {
                            Some(candidate) => candidates.push(candidate),
                            None => rejected += 1,
                        }
                    }
                    tracing::info!(
                        "{}: {} companies loaded, {} rejected",
                        source.name,
                        raws.len(),
                        rejected
                    );
                    report.loaded.insert(source.name.clone(), raws.len());
                    report.rejected.insert(source.name.clone(), rejected);
                }

                let merged = self.resolve(
                    schema,
                    &candidates,
                    &self.options.matching.companies,
                    &merger,
                    &mut report,
                );
                let index = CompanyIndex::build(&candidates, &merged.remap, &self.sources);
                (index, merged.records, Some(report))
            }
            None => (CompanyIndex::default(), Vec::new(), None),
        };

        let mut person_report = EntityReport::default();
        let mut candidates = Vec::new();
        let mut relationships = Vec::new();
        for source in self.sources.iter() {
            let raws = records
                .persons
                .get(&source.name)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let mut rejected = 0;
            for (index, raw) in raws.iter().enumerate() {
                let result = unifier.unify_person(&self.persons, source.id, index, raw);
                person_report.normalization_failures += result.normalization_failures;
                match result.candidate {
                    Some(candidate) => {
                        candidates.push(candidate);
                        relationships.extend(result.relationships);
                    }
                    None => rejected += 1,
                }
            }
            tracing::info!(
                "{}: {} persons loaded, {} rejected",
                source.name,
                raws.len(),
                rejected
            );
            person_report.loaded.insert(source.name.clone(), raws.len());
            person_report.rejected.insert(source.name.clone(), rejected);
        }

        let merged_persons = self.resolve(
            &self.persons,
            &candidates,
            &self.options.matching.persons,
            &merger,
            &mut person_report,
        );

        let relationships_before_merge = relationships.len();
        let linked = company_index.resolve(&mut relationships);
        let canonicalizer = self
            .options
            .relationships
            .canonicalize_company_names
            .then_some(&self.normalizers.companies);
        let relationships =
            merger.merge_relationships(relationships, &merged_persons.remap, canonicalizer);
        tracing::info!(
            "Relationships: {} before merge, {} after",
            relationships_before_merge,
            relationships.len()
        );

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            id_strategy: self.options.id_strategy,
            persons: person_report,
            companies: company_report,
            relationships_before_merge,
            relationships_after_merge: relationships.len(),
            relationships_linked_to_companies: linked,
        };

        UnifyOutput {
            persons: assemble_entities(
                PERSONS_TABLE,
                &self.persons,
                &self.sources,
                merged_persons.records,
            ),
            companies: self.companies.as_ref().map(|schema| {
                assemble_entities(COMPANIES_TABLE, schema, &self.sources, company_records)
            }),
            relationships: assemble_relationships(RELATIONSHIPS_TABLE, relationships),
            report,
        }
    }

    /// Partition and merge one entity kind's candidates.
    fn resolve(
        &self,
        schema: &EntitySchema,
        candidates: &[Candidate],
        policy: &MatchPolicy,
        merger: &Merger<'_>,
        report: &mut EntityReport,
    ) -> MergeResult {
        let records: Vec<&UnifiedRecord> = candidates.iter().map(|c| &c.record).collect();
        let partition = Matcher::new(policy, &self.normalizers.companies).partition(&records);
        let merged = merger.merge_all(schema, candidates, &partition.groups);

        report.candidates = candidates.len();
        report.groups_found = partition.duplicate_groups();
        report.refused_unions = partition.refused_unions;
        report.records_after_merge = merged.records.len();

        tracing::info!(
            "{}: {} candidates, {} duplicate groups, {} records after merge, {} refused unions",
            schema.kind,
            report.candidates,
            report.groups_found,
            report.records_after_merge,
            report.refused_unions
        );
        merged
    }
}
