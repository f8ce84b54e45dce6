//! JSON layout documents
//!
//! ```json
//! {
//!   "table": "compounds",
//!   "columns": {
//!     "cid":  {"SD_TAG": ["PUBCHEM_COMPOUND_CID"], "DTYPE": "integer", "PRIMARY_KEY": true},
//!     "mass": {"SD_TAG": ["PUBCHEM_EXACT_MASS"], "DTYPE": "real", "WITH_INDEX": true}
//!   }
//! }
//! ```
//!
//! The document is walked by hand rather than derived so that one pass can
//! report every problem instead of stopping at the first.

use serde_json::{Map, Value as Json};

use super::{ColumnSpec, Dtype, SchemaSpec, SchemaViolation, Transform, DEFAULT_TABLE};

const DOCUMENT_KEYS: &[&str] = &["table", "columns"];
const COLUMN_KEYS: &[&str] = &[
    "SD_TAG",
    "DTYPE",
    "NOT_NULL",
    "PRIMARY_KEY",
    "WITH_INDEX",
    "TRANSFORM",
];

/// Parse a layout document into a schema plus the problems met on the way.
/// The returned schema is only meaningful when the list is empty.
pub(super) fn parse_document(doc: &Json) -> (SchemaSpec, Vec<SchemaViolation>) {
    let mut violations = Vec::new();
    let mut spec = SchemaSpec {
        table: DEFAULT_TABLE.to_string(),
        columns: Vec::new(),
    };

    let Some(root) = doc.as_object() else {
        violations.push(SchemaViolation::Structure(
            "layout must be a JSON object".to_string(),
        ));
        return (spec, violations);
    };

    reject_unknown_keys(root, DOCUMENT_KEYS, "layout", &mut violations);

    match root.get("table") {
        None => {},
        Some(Json::String(t)) => spec.table = t.clone(),
        Some(_) => violations.push(SchemaViolation::Structure(
            "\"table\" must be a string".to_string(),
        )),
    }

    match root.get("columns") {
        Some(Json::Object(columns)) => {
            for (name, body) in columns {
                if let Some(col) = parse_column(name, body, &mut violations) {
                    spec.columns.push(col);
                }
            }
        },
        Some(_) => violations.push(SchemaViolation::Structure(
            "\"columns\" must be an object keyed by column name".to_string(),
        )),
        None => violations.push(SchemaViolation::Structure(
            "layout has no \"columns\" object".to_string(),
        )),
    }

    (spec, violations)
}

fn parse_column(name: &str, body: &Json, out: &mut Vec<SchemaViolation>) -> Option<ColumnSpec> {
    let Some(fields) = body.as_object() else {
        out.push(SchemaViolation::Structure(format!(
            "column '{}' must be an object",
            name
        )));
        return None;
    };

    reject_unknown_keys(fields, COLUMN_KEYS, &format!("column '{}'", name), out);

    let source_tags = match fields.get("SD_TAG") {
        None => {
            out.push(SchemaViolation::MissingField {
                column: name.to_string(),
                field: "SD_TAG",
            });
            Vec::new()
        },
        Some(Json::Array(items)) => {
            let tags: Option<Vec<String>> =
                items.iter().map(|t| t.as_str().map(str::to_string)).collect();
            tags.unwrap_or_else(|| {
                out.push(invalid(name, "SD_TAG", "must be a list of strings"));
                Vec::new()
            })
        },
        Some(_) => {
            out.push(invalid(name, "SD_TAG", "must be a list of strings"));
            Vec::new()
        },
    };

    // Placeholder type keeps the column in place so later checks still run
    let dtype = match fields.get("DTYPE") {
        None => {
            out.push(SchemaViolation::MissingField {
                column: name.to_string(),
                field: "DTYPE",
            });
            Dtype::Text
        },
        Some(Json::String(s)) => Dtype::from_name(s).unwrap_or_else(|| {
            out.push(SchemaViolation::UnknownDtype {
                column: name.to_string(),
                dtype: s.clone(),
            });
            Dtype::Text
        }),
        Some(_) => {
            out.push(invalid(name, "DTYPE", "must be a string"));
            Dtype::Text
        },
    };

    let transform = match fields.get("TRANSFORM") {
        None | Some(Json::Null) => None,
        Some(t) => match serde_json::from_value::<Transform>(t.clone()) {
            Ok(t) => Some(t),
            Err(e) => {
                out.push(invalid(name, "TRANSFORM", &format!("is not a known transform ({})", e)));
                None
            },
        },
    };

    Some(ColumnSpec {
        name: name.to_string(),
        source_tags,
        transform,
        dtype,
        not_null: flag(fields, name, "NOT_NULL", out),
        primary_key: flag(fields, name, "PRIMARY_KEY", out),
        with_index: flag(fields, name, "WITH_INDEX", out),
    })
}

fn flag(
    fields: &Map<String, Json>,
    column: &str,
    field: &'static str,
    out: &mut Vec<SchemaViolation>,
) -> bool {
    match fields.get(field) {
        None | Some(Json::Null) => false,
        Some(Json::Bool(b)) => *b,
        Some(_) => {
            out.push(invalid(column, field, "must be true or false"));
            false
        },
    }
}

fn invalid(column: &str, field: &'static str, reason: &str) -> SchemaViolation {
    SchemaViolation::InvalidField {
        column: column.to_string(),
        field,
        reason: reason.to_string(),
    }
}

fn reject_unknown_keys(
    map: &Map<String, Json>,
    allowed: &[&str],
    location: &str,
    out: &mut Vec<SchemaViolation>,
) {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            out.push(SchemaViolation::UnknownKey {
                location: location.to_string(),
                key: key.clone(),
            });
        }
    }
}
