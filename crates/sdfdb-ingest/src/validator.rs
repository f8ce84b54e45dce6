//! Row acceptance policy: required columns and primary-key uniqueness

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::mapper::CandidateRow;
use crate::schema::SchemaSpec;
use crate::value::{PrimaryKey, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    MissingRequiredColumn,
    /// A required column is absent because its value could not be coerced
    InvalidValue,
    DuplicatePrimaryKey,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::MissingRequiredColumn => "missing-required-column",
            RejectReason::InvalidValue => "invalid-value",
            RejectReason::DuplicatePrimaryKey => "duplicate-primary-key",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row that passed validation, ready for the loader
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedRow {
    pub values: Vec<Value>,
    pub key: Option<PrimaryKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub reason: RejectReason,
    /// Column that caused the rejection
    pub column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted(AcceptedRow),
    Rejected(Rejection),
}

/// Primary keys accepted so far in this run, shared by every validator
///
/// Claiming a key is a single check-and-insert under the lock, so two
/// files racing on the same key cannot both win.
#[derive(Debug, Default)]
pub struct PrimaryKeyRegistry {
    keys: Mutex<HashSet<PrimaryKey>>,
}

impl PrimaryKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from keys already present in the output table
    pub fn seeded(keys: impl IntoIterator<Item = PrimaryKey>) -> Self {
        Self {
            keys: Mutex::new(keys.into_iter().collect()),
        }
    }

    /// Record the key; `false` when it was already claimed
    pub fn claim(&self, key: PrimaryKey) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key)
    }

    pub fn contains(&self, key: &PrimaryKey) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies the schema's row policy
#[derive(Debug, Clone)]
pub struct RowValidator {
    schema: Arc<SchemaSpec>,
    registry: Arc<PrimaryKeyRegistry>,
}

impl RowValidator {
    pub fn new(schema: Arc<SchemaSpec>, registry: Arc<PrimaryKeyRegistry>) -> Self {
        Self { schema, registry }
    }

    /// Check required columns first, then claim the primary key
    pub fn validate(&self, row: CandidateRow) -> Verdict {
        for (i, column) in self.schema.columns().iter().enumerate() {
            if column.is_required() && row.values.get(i).map_or(true, Value::is_absent) {
                let reason = if row.coercion_failed(i) {
                    RejectReason::InvalidValue
                } else {
                    RejectReason::MissingRequiredColumn
                };
                return Verdict::Rejected(Rejection {
                    reason,
                    column: column.name.clone(),
                });
            }
        }

        let key = match self.schema.primary_key() {
            None => None,
            Some((i, column)) => {
                let key = row.values.get(i).and_then(Value::key);
                if let Some(ref k) = key {
                    if !self.registry.claim(k.clone()) {
                        return Verdict::Rejected(Rejection {
                            reason: RejectReason::DuplicatePrimaryKey,
                            column: column.name.clone(),
                        });
                    }
                }
                key
            },
        };

        Verdict::Accepted(AcceptedRow {
            values: row.values,
            key,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, Dtype};

    fn validator() -> RowValidator {
        let schema = SchemaSpec::new(
            "compounds",
            vec![
                ColumnSpec::new("cid", ["CID"], Dtype::Integer).primary_key(),
                ColumnSpec::new("weight", ["W"], Dtype::Real).not_null(),
                ColumnSpec::new("name", ["N"], Dtype::Text),
            ],
        )
        .unwrap();
        RowValidator::new(Arc::new(schema), Arc::new(PrimaryKeyRegistry::new()))
    }

    fn row(values: Vec<Value>) -> CandidateRow {
        CandidateRow {
            values,
            coercion_failures: vec![],
        }
    }

    #[test]
    fn test_accept_then_duplicate() {
        let v = validator();
        let first = v.validate(row(vec![Value::Integer(100), Value::Real(18.02), Value::Absent]));
        match first {
            Verdict::Accepted(r) => assert_eq!(r.key, Some(PrimaryKey::Integer(100))),
            other => panic!("expected acceptance, got {:?}", other),
        }

        let second = v.validate(row(vec![Value::Integer(100), Value::Real(1.0), Value::Absent]));
        assert_eq!(
            second,
            Verdict::Rejected(Rejection {
                reason: RejectReason::DuplicatePrimaryKey,
                column: "cid".into()
            })
        );
    }

    #[test]
    fn test_missing_required_before_key_claim() {
        let v = validator();
        let verdict = v.validate(row(vec![Value::Integer(7), Value::Absent, Value::Absent]));
        assert!(matches!(
            verdict,
            Verdict::Rejected(Rejection { reason: RejectReason::MissingRequiredColumn, .. })
        ));
        // The rejected row must not have consumed the key
        assert!(v.registry.is_empty());
    }

    #[test]
    fn test_invalid_value_reason() {
        let v = validator();
        let verdict = v.validate(CandidateRow {
            values: vec![Value::Integer(1), Value::Absent, Value::Absent],
            coercion_failures: vec![1],
        });
        assert!(matches!(
            verdict,
            Verdict::Rejected(Rejection { reason: RejectReason::InvalidValue, .. })
        ));
    }

    #[test]
    fn test_seeded_registry() {
        let registry = PrimaryKeyRegistry::seeded([PrimaryKey::Integer(5)]);
        assert!(registry.contains(&PrimaryKey::Integer(5)));
        assert!(!registry.claim(PrimaryKey::Integer(5)));
        assert!(registry.claim(PrimaryKey::Integer(6)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let registry = Arc::new(PrimaryKeyRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..1000).filter(|i| registry.claim(PrimaryKey::Integer(*i))).count()
                })
            })
            .collect();

        let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(wins, 1000);
    }

    #[test]
    fn test_reason_names() {
        assert_eq!(
            serde_json::to_string(&RejectReason::MissingRequiredColumn).unwrap(),
            "\"missing-required-column\""
        );
        assert_eq!(RejectReason::DuplicatePrimaryKey.to_string(), "duplicate-primary-key");
    }
}
