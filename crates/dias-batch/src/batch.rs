//! In-memory batch table and its tab separated rendering.
//!
//! The platform's batch format pairs every file slot with a `<slot> ID`
//! column. A single file renders as its id, several as `[id1,id2]`.

use std::collections::BTreeMap;

use csv::{ReaderBuilder, WriterBuilder};
use dias_core::{DiasError, ErrorInfo, InputValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header of the row-name column.
pub const BATCH_ID_COLUMN: &str = "batch ID";

/// Row name used for run-wide jobs.
pub const RUN_ROW: &str = "run";

/// One job's worth of inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRow {
    /// Row name; becomes part of the job name.
    pub batch_id: String,
    /// Sample the row belongs to, `None` for run-wide rows.
    pub sample: Option<String>,
    /// Slot bindings; absent slots are left empty.
    pub values: BTreeMap<String, InputValue>,
}

/// Rows sharing one set of declared slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchTable {
    slots: Vec<String>,
    rows: Vec<BatchRow>,
}

fn wrap_csv(code: &str, err: csv::Error) -> DiasError {
    DiasError::Serde(ErrorInfo::new(code, "batch table failure").with_hint(err.to_string()))
}

fn literal_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn file_cell(value: Option<&InputValue>) -> String {
    match value {
        Some(InputValue::File(id)) => id.to_string(),
        Some(InputValue::Files(ids)) => format!(
            "[{}]",
            ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(",")
        ),
        Some(InputValue::Literal(value)) => literal_text(value),
        None => String::new(),
    }
}

impl BatchTable {
    /// Creates an empty table with the declared slots, in column order.
    pub fn new<I, S>(slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slots: slots.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Declared slots.
    pub fn slots(&self) -> &[String] {
        &self.slots
    }

    /// Rows in insertion order.
    pub fn rows(&self) -> &[BatchRow] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a row; every bound slot must be declared.
    pub fn push(&mut self, row: BatchRow) -> Result<(), DiasError> {
        if let Some(slot) = row.values.keys().find(|slot| !self.slots.contains(slot)) {
            return Err(DiasError::InvalidConfig(
                ErrorInfo::new("batch_undeclared_slot", "row binds an undeclared slot")
                    .with_context("row", row.batch_id.clone())
                    .with_context("slot", slot.clone()),
            ));
        }
        self.rows.push(row);
        Ok(())
    }

    fn is_file_slot(&self, slot: &str) -> bool {
        self.rows
            .iter()
            .any(|row| row.values.get(slot).is_some_and(InputValue::is_file))
    }

    /// Column headers of the rendered table.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec![BATCH_ID_COLUMN.to_string()];
        for slot in &self.slots {
            columns.push(slot.clone());
            if self.is_file_slot(slot) {
                columns.push(format!("{slot} ID"));
            }
        }
        columns
    }

    /// Renders the table as tab separated text.
    pub fn to_tsv(&self) -> Result<Vec<u8>, DiasError> {
        let file_slots: Vec<bool> = self.slots.iter().map(|slot| self.is_file_slot(slot)).collect();
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(Vec::new());
        writer
            .write_record(self.columns())
            .map_err(|err| wrap_csv("batch_write_header", err))?;
        for row in &self.rows {
            let mut record = vec![row.batch_id.clone()];
            for (slot, is_file) in self.slots.iter().zip(&file_slots) {
                let value = row.values.get(slot);
                if *is_file {
                    // The name column stays empty; the platform resolves ids.
                    record.push(String::new());
                    record.push(file_cell(value));
                } else {
                    record.push(match value {
                        Some(InputValue::Literal(value)) => literal_text(value),
                        other => file_cell(other),
                    });
                }
            }
            writer
                .write_record(&record)
                .map_err(|err| wrap_csv("batch_write_row", err))?;
        }
        writer
            .into_inner()
            .map_err(|err| DiasError::serde("batch_flush", err.to_string()))
    }
}

/// Checks that every row of a rendered table has as many cells as the header.
pub fn check_shape(tsv: &[u8]) -> Result<usize, DiasError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(tsv);
    let width = reader
        .headers()
        .map_err(|err| wrap_csv("batch_read_header", err))?
        .len();
    let mut rows = 0;
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|err| wrap_csv("batch_read_row", err))?;
        if record.len() != width {
            return Err(DiasError::Serde(
                ErrorInfo::new("batch_shape", "batch row width differs from header")
                    .with_context("line", (index + 2).to_string())
                    .with_context("expected", width.to_string())
                    .with_context("found", record.len().to_string()),
            ));
        }
        rows += 1;
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dias_core::FileId;

    #[test]
    fn literal_slots_have_one_column() {
        let mut table = BatchTable::new(["name", "vcf"]);
        let mut values = BTreeMap::new();
        values.insert("name".to_string(), InputValue::text("X1_1"));
        values.insert("vcf".to_string(), InputValue::File(FileId::new("file-1")));
        table
            .push(BatchRow {
                batch_id: "X1".to_string(),
                sample: Some("X1".to_string()),
                values,
            })
            .unwrap();
        assert_eq!(table.columns(), vec!["batch ID", "name", "vcf", "vcf ID"]);
        let tsv = String::from_utf8(table.to_tsv().unwrap()).unwrap();
        assert_eq!(tsv, "batch ID\tname\tvcf\tvcf ID\nX1\tX1_1\t\tfile-1\n");
        assert_eq!(check_shape(tsv.as_bytes()).unwrap(), 1);
    }

    #[test]
    fn undeclared_slot_is_rejected() {
        let mut table = BatchTable::new(["vcf"]);
        let mut values = BTreeMap::new();
        values.insert("bam".to_string(), InputValue::text("x"));
        let row = BatchRow {
            batch_id: RUN_ROW.to_string(),
            sample: None,
            values,
        };
        assert!(table.push(row).is_err());
    }

    #[test]
    fn ragged_rows_are_reported() {
        let err = check_shape(b"batch ID\ta\tb\nX1\t1\n").unwrap_err();
        assert_eq!(err.info().code, "batch_shape");
    }
}
