//! Output table layout
//!
//! A [`SchemaSpec`] is the validated, in-memory form of a layout file. It is
//! immutable once built: every constructor runs [`SchemaSpec::validate`] and
//! reports all problems at once through [`SchemaError`].

mod layout;
mod transform;

pub use transform::Transform;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Table name used when the layout does not name one
pub const DEFAULT_TABLE: &str = "compounds";

/// Layout for PubChem's bulk `Compound_*.sdf.gz` files
pub const PUBCHEM_LAYOUT: &str = include_str!("../../layouts/pubchem.json");

/// Column storage type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Text,
    Integer,
    Real,
}

impl Dtype {
    /// Parse a layout dtype name, including the SQL spellings older layouts use
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "text" | "varchar" | "character" | "string" => Some(Dtype::Text),
            "integer" | "int" => Some(Dtype::Integer),
            "real" | "float" | "double" => Some(Dtype::Real),
            _ => None,
        }
    }

    pub fn sql_type(self) -> &'static str {
        match self {
            Dtype::Text => "TEXT",
            Dtype::Integer => "INTEGER",
            Dtype::Real => "REAL",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dtype::Text => write!(f, "text"),
            Dtype::Integer => write!(f, "integer"),
            Dtype::Real => write!(f, "real"),
        }
    }
}

/// Rules for one output column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    /// Fallback chain: the first tag with a non-empty value wins
    pub source_tags: Vec<String>,
    pub transform: Option<Transform>,
    pub dtype: Dtype,
    pub not_null: bool,
    pub primary_key: bool,
    pub with_index: bool,
}

impl ColumnSpec {
    pub fn new<I, T>(name: impl Into<String>, source_tags: I, dtype: Dtype) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            source_tags: source_tags.into_iter().map(Into::into).collect(),
            transform: None,
            dtype,
            not_null: false,
            primary_key: false,
            with_index: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn with_index(mut self) -> Self {
        self.with_index = true;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Primary keys are implicitly NOT NULL
    pub fn is_required(&self) -> bool {
        self.not_null || self.primary_key
    }
}

/// One problem found in a layout
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("cannot read layout {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("layout is not valid JSON: {0}")]
    Syntax(String),

    #[error("{0}")]
    Structure(String),

    #[error("unknown key '{key}' in {location}")]
    UnknownKey { location: String, key: String },

    #[error("invalid table name '{0}'")]
    InvalidTable(String),

    #[error("layout defines no columns")]
    NoColumns,

    #[error("column name must not be empty")]
    EmptyColumnName,

    #[error("column '{0}' is defined more than once")]
    DuplicateColumn(String),

    #[error("more than one primary key: {}", .0.join(", "))]
    MultiplePrimaryKeys(Vec<String>),

    #[error("column '{column}': missing {field}")]
    MissingField { column: String, field: &'static str },

    #[error("column '{column}': {field} {reason}")]
    InvalidField {
        column: String,
        field: &'static str,
        reason: String,
    },

    #[error("column '{column}': unknown DTYPE '{dtype}' (expected text, integer or real)")]
    UnknownDtype { column: String, dtype: String },

    #[error("column '{0}': SD_TAG must list at least one tag")]
    EmptySourceTags(String),

    #[error("column '{0}': SD_TAG entries must not be empty")]
    EmptyTag(String),
}

/// Every violation found while loading or validating a layout
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct SchemaError {
    pub violations: Vec<SchemaViolation>,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid layout ({} problem", self.violations.len())?;
        if self.violations.len() != 1 {
            write!(f, "s")?;
        }
        write!(f, ")")?;
        for v in &self.violations {
            write!(f, "\n  - {}", v)?;
        }
        Ok(())
    }
}

impl From<SchemaViolation> for SchemaError {
    fn from(v: SchemaViolation) -> Self {
        Self { violations: vec![v] }
    }
}

/// Validated description of the output table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaSpec {
    table: String,
    columns: Vec<ColumnSpec>,
}

impl SchemaSpec {
    /// Build a schema from columns, validating it
    pub fn new(table: impl Into<String>, columns: Vec<ColumnSpec>) -> Result<Self, SchemaError> {
        let spec = Self {
            table: table.into(),
            columns,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Load a JSON layout file
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SchemaViolation::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&text)
    }

    /// The bundled PubChem layout
    pub fn pubchem() -> Result<Self, SchemaError> {
        Self::from_json_str(PUBCHEM_LAYOUT)
    }

    /// Load a JSON layout document
    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        let doc: serde_json::Value =
            serde_json::from_str(text).map_err(|e| SchemaViolation::Syntax(e.to_string()))?;
        Self::from_json(&doc)
    }

    /// Load an already parsed layout document
    pub fn from_json(doc: &serde_json::Value) -> Result<Self, SchemaError> {
        let (spec, mut violations) = layout::parse_document(doc);
        violations.extend(spec.violations());
        if violations.is_empty() {
            Ok(spec)
        } else {
            Err(SchemaError { violations })
        }
    }

    /// Check the structural invariants, reporting every violation
    pub fn validate(&self) -> Result<(), SchemaError> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaError { violations })
        }
    }

    fn violations(&self) -> Vec<SchemaViolation> {
        let mut out = Vec::new();

        if !is_identifier(&self.table) {
            out.push(SchemaViolation::InvalidTable(self.table.clone()));
        }

        if self.columns.is_empty() {
            out.push(SchemaViolation::NoColumns);
        }

        let mut names = HashSet::new();
        let mut reported = HashSet::new();
        for col in &self.columns {
            if col.name.trim().is_empty() {
                out.push(SchemaViolation::EmptyColumnName);
                continue;
            }
            if !names.insert(col.name.as_str()) && reported.insert(col.name.as_str()) {
                out.push(SchemaViolation::DuplicateColumn(col.name.clone()));
            }
            if col.source_tags.is_empty() {
                out.push(SchemaViolation::EmptySourceTags(col.name.clone()));
            } else if col.source_tags.iter().any(|t| t.trim().is_empty()) {
                out.push(SchemaViolation::EmptyTag(col.name.clone()));
            }
            if let Some(problem) = col.transform.as_ref().and_then(Transform::problem) {
                out.push(SchemaViolation::InvalidField {
                    column: col.name.clone(),
                    field: "TRANSFORM",
                    reason: problem.to_string(),
                });
            }
        }

        let keys: Vec<String> = self
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        if keys.len() > 1 {
            out.push(SchemaViolation::MultiplePrimaryKeys(keys));
        }

        out
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Same columns, different output table
    pub fn with_table(mut self, table: impl Into<String>) -> Result<Self, SchemaError> {
        self.table = table.into();
        self.validate()?;
        Ok(self)
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Position and spec of the primary-key column, if the layout has one
    pub fn primary_key(&self) -> Option<(usize, &ColumnSpec)> {
        self.columns.iter().enumerate().find(|(_, c)| c.primary_key)
    }

    /// Columns that get a secondary index after the bulk load
    pub fn indexed_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.with_index)
    }
}

/// Table names are interpolated into DDL, so keep them to plain identifiers
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        },
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn cid() -> ColumnSpec {
        ColumnSpec::new("cid", ["PUBCHEM_COMPOUND_CID"], Dtype::Integer)
            .not_null()
            .primary_key()
    }

    #[test]
    fn test_new_valid_schema() {
        let schema = SchemaSpec::new(
            DEFAULT_TABLE,
            vec![
                cid(),
                ColumnSpec::new("mass", ["PUBCHEM_EXACT_MASS"], Dtype::Real).with_index(),
            ],
        )
        .unwrap();

        assert_eq!(schema.table(), "compounds");
        assert_eq!(schema.primary_key().map(|(i, c)| (i, c.name.as_str())), Some((0, "cid")));
        assert_eq!(schema.indexed_columns().count(), 1);
        assert_eq!(schema.column_index("mass"), Some(1));
    }

    #[test]
    fn test_validate_reports_every_violation() {
        let err = SchemaSpec::new(
            "compounds",
            vec![
                cid(),
                ColumnSpec::new("cid", ["X"], Dtype::Text),
                ColumnSpec::new("inchikey", Vec::<String>::new(), Dtype::Text).primary_key(),
            ],
        )
        .unwrap_err();

        assert_eq!(err.violations.len(), 3);
        assert!(err.violations.contains(&SchemaViolation::DuplicateColumn("cid".into())));
        assert!(err.violations.contains(&SchemaViolation::EmptySourceTags("inchikey".into())));
        assert!(err.violations.contains(&SchemaViolation::MultiplePrimaryKeys(vec![
            "cid".into(),
            "inchikey".into()
        ])));
        assert!(err.to_string().starts_with("invalid layout (3 problems)"));
    }

    #[test]
    fn test_bundled_pubchem_layout() {
        let schema = SchemaSpec::pubchem().unwrap();
        assert_eq!(schema.primary_key().map(|(_, c)| c.name.as_str()), Some("cid"));
        assert_eq!(
            schema.column("xlogp3").unwrap().source_tags,
            ["PUBCHEM_XLOGP3", "PUBCHEM_XLOGP3_AA"]
        );
        assert!(schema.indexed_columns().any(|c| c.name == "inchikey1"));
    }

    #[test]
    fn test_no_columns() {
        let err = SchemaSpec::new("compounds", vec![]).unwrap_err();
        assert_eq!(err.violations, vec![SchemaViolation::NoColumns]);
    }

    #[test]
    fn test_table_name_must_be_identifier() {
        let schema = SchemaSpec::new("compounds", vec![cid()]).unwrap();
        assert!(schema.clone().with_table("pubchem_2024").is_ok());
        assert!(schema.with_table("drop table; --").is_err());
    }

    #[test]
    fn test_dtype_aliases() {
        assert_eq!(Dtype::from_name("VARCHAR"), Some(Dtype::Text));
        assert_eq!(Dtype::from_name("int"), Some(Dtype::Integer));
        assert_eq!(Dtype::from_name("Double"), Some(Dtype::Real));
        assert_eq!(Dtype::from_name("blob"), None);
    }

    #[test]
    fn test_primary_key_implies_required() {
        let pk = ColumnSpec::new("cid", ["CID"], Dtype::Integer).primary_key();
        assert!(pk.is_required());
        assert!(!ColumnSpec::new("x", ["X"], Dtype::Real).is_required());
    }
}
