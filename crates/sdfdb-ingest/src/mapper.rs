//! Raw record to candidate row

use std::sync::Arc;

use crate::reader::RawRecord;
use crate::schema::{ColumnSpec, SchemaSpec};
use crate::value::Value;

/// A record projected onto the schema's columns, not yet validated
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRow {
    /// One value per schema column, in schema order
    pub values: Vec<Value>,
    /// Positions of the columns whose value failed to coerce
    pub coercion_failures: Vec<usize>,
}

impl CandidateRow {
    pub fn coercion_failed(&self, column: usize) -> bool {
        self.coercion_failures.contains(&column)
    }
}

/// Maps records for one schema
#[derive(Debug, Clone)]
pub struct RecordMapper {
    schema: Arc<SchemaSpec>,
}

impl RecordMapper {
    pub fn new(schema: Arc<SchemaSpec>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &SchemaSpec {
        &self.schema
    }

    pub fn map(&self, record: &RawRecord) -> CandidateRow {
        map_record(record, &self.schema)
    }
}

/// Project a record onto the schema
///
/// For each column the first tag of its chain with a non-blank value wins.
/// The value is transformed, then coerced; a failed coercion leaves the
/// column absent and is noted on the row.
pub fn map_record(record: &RawRecord, schema: &SchemaSpec) -> CandidateRow {
    let mut values = Vec::with_capacity(schema.columns().len());
    let mut coercion_failures = Vec::new();

    for (i, column) in schema.columns().iter().enumerate() {
        let value = match select(record, column) {
            None => Value::Absent,
            Some(raw) => match column.dtype.coerce(&raw) {
                Ok(v) => v,
                Err(e) => {
                    tracing::trace!(record = record.index, column = %column.name, error = %e, "Coercion failed");
                    coercion_failures.push(i);
                    Value::Absent
                },
            },
        };
        values.push(value);
    }

    CandidateRow {
        values,
        coercion_failures,
    }
}

fn select(record: &RawRecord, column: &ColumnSpec) -> Option<String> {
    let raw = column
        .source_tags
        .iter()
        .find_map(|tag| record.first_non_empty(tag))?;

    match &column.transform {
        None => Some(raw.to_string()),
        Some(t) => t.apply(raw).map(|v| v.into_owned()),
    }
}
