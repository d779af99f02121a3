//! # crm-unify: Multi-CRM Person and Company Unification
//!
//! crm-unify reads personnel and company exports from several CRM systems
//! (Bigin accounts and a Rolodex address book), maps them onto one unified
//! schema, resolves which records describe the same real-world entity and
//! merges them into a single canonical record per person and company.
//!
//! ## Features
//!
//! - **YAML field mapping**: one document maps every unified column to a JSON path per source
//! - **Normalization**: honorific/title stripping, E.164 phone numbers,
//!   lower-cased emails, cleaned job titles
//! - **Conflict-aware matching**: trusted identifiers veto merges, rules
//!   (email, phone, name + company) join groups
//! - **Priority merge**: list columns are unioned, scalar columns take the
//!   first non-null value by source priority
//! - **Relationships**: person to company affiliations, re-pointed at merged ids and de-duplicated
//!
//! ## Example mapping
//!
//! ```yaml
//! persons:
//!   columns:
//!     person_id:
//!       MetaliaBigin: generated
//!       Rolodex: generated
//!     full_name:
//!       MetaliaBigin: Full_Name
//!       Rolodex: name
//!     all_emails:
//!       type: list
//!       transform: email
//!       MetaliaBigin: [Email, Secondary_Email]
//!       Rolodex: emails
//! ```

// Core modules
pub mod entity;
pub mod error;
pub mod extraction;
pub mod ids;
pub mod source;

// Configuration and mapping
pub mod config;
pub mod mapping;
pub mod transforms;

// Normalization, matching and merging
pub mod normalize;
pub mod unifier;
pub mod matcher;
pub mod merger;

// Output
pub mod assembler;
pub mod serialization;

pub mod pipeline;

// Re-export key types
pub use entity::{EntityKind, FieldValue, Relationship, UnifiedRecord};
pub use error::UnifyError;
pub use extraction::{Extractor, FieldPath};
pub use transforms::{TransformError, TransformRegistry};

pub use config::{ConfigError, NameConfig, RunConfig};
pub use mapping::{EntitySchema, FieldMapping};
pub use source::{SourceKind, SourceSet, SourceSpec};

pub use matcher::{MatchDecision, MatchPolicy, MatchRule, Matcher};
pub use merger::Merger;
pub use normalize::{NameParts, NameProcessor, Normalizers, PhoneNormalizer};

pub use assembler::Table;
pub use pipeline::{Pipeline, PipelineOptions, RecordSet, RunReport, UnifyOutput};
pub use serialization::{DirectorySink, OutputFormat, TableSink};
