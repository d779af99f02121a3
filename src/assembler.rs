//! Final table layout: column order, null filling and row ordering.

use serde::Serialize;
use std::cmp::Ordering;

use crate::entity::{columns, EntityKind, FieldValue, Relationship, UnifiedRecord};
use crate::mapping::EntitySchema;
use crate::source::SourceSet;

/// Relationship table columns, in output order.
pub const RELATIONSHIP_COLUMNS: [&str; 8] = [
    "relationship_id",
    "person_id",
    "company_id",
    "company_name",
    "is_active",
    "start_date",
    "title_at_company",
    "data_source",
];

/// An ordered output table. Every row has one value per column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<FieldValue>>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Value at `row` / `column`, if the column exists.
    pub fn value(&self, row: usize, column: &str) -> Option<&FieldValue> {
        let index = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(index))
    }

    /// Every value of one column.
    pub fn column_values(&self, column: &str) -> Vec<&FieldValue> {
        match self.column_index(column) {
            Some(index) => self.rows.iter().filter_map(|r| r.get(index)).collect(),
            None => Vec::new(),
        }
    }
}

/// Ascending, with `None` after every value.
fn nulls_last(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Build a person or company table. Rows are sorted by `data_source`, then
/// by full name (persons) or company name (companies).
pub fn assemble_entities(
    name: &str,
    schema: &EntitySchema,
    sources: &SourceSet,
    mut records: Vec<UnifiedRecord>,
) -> Table {
    let sort_column = match schema.kind {
        EntityKind::Person => columns::FULL_NAME,
        EntityKind::Company => columns::COMPANY_NAME,
    };
    records.sort_by(|a, b| {
        a.data_source()
            .cmp(&b.data_source())
            .then_with(|| nulls_last(&a.text(sort_column), &b.text(sort_column)))
    });

    let header = schema.output_columns(sources);
    let rows = records
        .iter()
        .map(|record| {
            header
                .iter()
                .map(|column| {
                    if column == &schema.id_column {
                        FieldValue::String(record.id.clone())
                    } else if column == columns::DATA_SOURCE {
                        FieldValue::String(record.data_source())
                    } else {
                        record.fields.get(column).cloned().unwrap_or(FieldValue::Null)
                    }
                })
                .collect()
        })
        .collect();

    Table {
        name: name.to_string(),
        columns: header,
        rows,
    }
}

/// Build the relationship table, sorted by `(person_id, company_name)`.
pub fn assemble_relationships(name: &str, mut relationships: Vec<Relationship>) -> Table {
    relationships.sort_by(|a, b| {
        a.person_id
            .cmp(&b.person_id)
            .then_with(|| nulls_last(&a.company_name, &b.company_name))
    });

    let rows = relationships
        .into_iter()
        .map(|r| {
            let data_source = r.data_source();
            vec![
                FieldValue::String(r.relationship_id),
                FieldValue::String(r.person_id),
                FieldValue::from(r.company_id),
                FieldValue::from(r.company_name),
                r.is_active.map(FieldValue::Bool).unwrap_or(FieldValue::Null),
                FieldValue::from(r.start_date),
                FieldValue::from(r.title_at_company),
                FieldValue::String(data_source),
            ]
        })
        .collect();

    Table {
        name: name.to_string(),
        columns: RELATIONSHIP_COLUMNS.iter().map(|c| c.to_string()).collect(),
        rows,
    }
}
