//! Table sinks.
//!
//! This module writes assembled [`Table`]s as CSV, NDJSON or a JSON array.
//! CSV cells render list values joined with `"; "` and nulls as empty
//! cells; the JSON formats keep lists as arrays and nulls as `null`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::assembler::Table;

/// Error type for serialization operations
#[derive(Debug)]
pub enum SerializationError {
    JsonError(serde_json::Error),
    CsvError(csv::Error),
    IoError(std::io::Error),
}

impl From<serde_json::Error> for SerializationError {
    fn from(err: serde_json::Error) -> Self {
        SerializationError::JsonError(err)
    }
}

impl From<csv::Error> for SerializationError {
    fn from(err: csv::Error) -> Self {
        SerializationError::CsvError(err)
    }
}

impl From<std::io::Error> for SerializationError {
    fn from(err: std::io::Error) -> Self {
        SerializationError::IoError(err)
    }
}

impl std::fmt::Display for SerializationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializationError::JsonError(e) => write!(f, "JSON error: {}", e),
            SerializationError::CsvError(e) => write!(f, "CSV error: {}", e),
            SerializationError::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for SerializationError {}

/// Output file format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Ndjson,
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Ndjson => "ndjson",
            OutputFormat::Json => "json",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "ndjson" | "jsonl" => Ok(OutputFormat::Ndjson),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!(
                "unknown output format '{}' (expected csv, ndjson or json)",
                other
            )),
        }
    }
}

/// Destination for assembled tables
pub trait TableSink {
    fn write_table(&mut self, table: &Table) -> Result<(), SerializationError>;
}

/// One table row as a JSON object, keyed by column name in column order.
fn row_object(
    table: &Table,
    row: &[crate::entity::FieldValue],
) -> Result<JsonValue, SerializationError> {
    let mut object = Map::with_capacity(table.columns.len());
    for (column, value) in table.columns.iter().zip(row) {
        object.insert(column.clone(), serde_json::to_value(value)?);
    }
    Ok(JsonValue::Object(object))
}

/// CSV writer: a header row, then one record per table row
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
        }
    }

    /// Flush and hand back the underlying writer
    pub fn into_inner(self) -> Result<W, SerializationError> {
        self.writer
            .into_inner()
            .map_err(|e| SerializationError::IoError(e.into_error()))
    }
}

impl<W: Write> TableSink for CsvSink<W> {
    fn write_table(&mut self, table: &Table) -> Result<(), SerializationError> {
        self.writer.write_record(&table.columns)?;
        for row in &table.rows {
            self.writer.write_record(row.iter().map(|v| v.to_string()))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// NDJSON (Newline Delimited JSON) writer
///
/// Writes one JSON object per row.
pub struct NdjsonSink<W: Write> {
    writer: W,
}

impl<W: Write> NdjsonSink<W> {
    /// Create a new NDJSON writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a single value as an NDJSON line
    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<(), SerializationError> {
        let json = serde_json::to_string(value)?;
        writeln!(self.writer, "{}", json)?;
        Ok(())
    }

    /// Flush the underlying writer
    pub fn flush(&mut self) -> Result<(), SerializationError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write> TableSink for NdjsonSink<W> {
    fn write_table(&mut self, table: &Table) -> Result<(), SerializationError> {
        for row in &table.rows {
            let object = row_object(table, row)?;
            self.write(&object)?;
        }
        self.flush()
    }
}

/// JSON array writer
///
/// Writes every row of a table as one JSON array of objects.
pub struct JsonArraySink<W: Write> {
    writer: W,
}

impl<W: Write> JsonArraySink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> TableSink for JsonArraySink<W> {
    fn write_table(&mut self, table: &Table) -> Result<(), SerializationError> {
        write!(self.writer, "[")?;
        for (i, row) in table.rows.iter().enumerate() {
            if i > 0 {
                write!(self.writer, ",")?;
            }
            let json = serde_json::to_string(&row_object(table, row)?)?;
            write!(self.writer, "{}", json)?;
        }
        write!(self.writer, "]")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes each table to `<dir>/<table name>.<extension>`.
pub struct DirectorySink {
    dir: PathBuf,
    format: OutputFormat,
    written: Vec<PathBuf>,
}

impl DirectorySink {
    /// Create the sink, creating `dir` if needed
    pub fn new<P: AsRef<Path>>(dir: P, format: OutputFormat) -> Result<Self, SerializationError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            format,
            written: Vec::new(),
        })
    }

    /// Files written so far
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl TableSink for DirectorySink {
    fn write_table(&mut self, table: &Table) -> Result<(), SerializationError> {
        let path = self
            .dir
            .join(format!("{}.{}", table.name, self.format.extension()));
        let file = BufWriter::new(File::create(&path)?);

        match self.format {
            OutputFormat::Csv => CsvSink::new(file).write_table(table)?,
            OutputFormat::Ndjson => NdjsonSink::new(file).write_table(table)?,
            OutputFormat::Json => JsonArraySink::new(file).write_table(table)?,
        }

        tracing::info!("Wrote {} rows to {}", table.len(), path.display());
        self.written.push(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::FieldValue;
    use tempfile::TempDir;

    fn table() -> Table {
        Table {
            name: "persons".to_string(),
            columns: vec![
                "person_id".to_string(),
                "full_name".to_string(),
                "all_emails".to_string(),
            ],
            rows: vec![
                vec![
                    FieldValue::from("p1"),
                    FieldValue::from("Alice, Jr"),
                    FieldValue::List(vec![
                        FieldValue::from("a@x.com"),
                        FieldValue::from("b@x.com"),
                    ]),
                ],
                vec![FieldValue::from("p2"), FieldValue::from("Bob"), FieldValue::Null],
            ],
        }
    }

    #[test]
    fn test_csv_sink() {
        let mut sink = CsvSink::new(Vec::new());
        sink.write_table(&table()).unwrap();

        let output = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "person_id,full_name,all_emails");
        assert_eq!(lines[1], "p1,\"Alice, Jr\",a@x.com; b@x.com");
        assert_eq!(lines[2], "p2,Bob,");
    }

    #[test]
    fn test_ndjson_sink() {
        let mut buf = Vec::new();
        NdjsonSink::new(&mut buf).write_table(&table()).unwrap();

        let output = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 2);
        let first: JsonValue = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["all_emails"], serde_json::json!(["a@x.com", "b@x.com"]));
        let second: JsonValue = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["all_emails"], JsonValue::Null);
    }

    #[test]
    fn test_json_array_sink() {
        let mut buf = Vec::new();
        JsonArraySink::new(&mut buf).write_table(&table()).unwrap();

        let output = String::from_utf8(buf).unwrap();
        assert!(output.starts_with('['));
        assert!(output.ends_with(']'));

        let parsed: Vec<JsonValue> = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1]["full_name"], "Bob");
    }

    #[test]
    fn test_directory_sink() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("nested/out");
        let mut sink = DirectorySink::new(&out, OutputFormat::Ndjson).unwrap();

        sink.write_table(&table()).unwrap();

        assert_eq!(sink.written(), &[out.join("persons.ndjson")]);
        let contents = fs::read_to_string(out.join("persons.ndjson")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("CSV".parse::<OutputFormat>(), Ok(OutputFormat::Csv));
        assert_eq!("jsonl".parse::<OutputFormat>(), Ok(OutputFormat::Ndjson));
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Json.extension(), "json");
    }
}
