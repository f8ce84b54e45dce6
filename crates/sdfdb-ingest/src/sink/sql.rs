//! SQL text for the output table
//!
//! Column and table names come from the layout, so every identifier is
//! quoted. Values are always bound, never interpolated.

use crate::schema::{ColumnSpec, SchemaSpec};

use super::LEDGER_TABLE;

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"name" TYPE [NOT NULL] [PRIMARY KEY]`; a primary key is always NOT NULL
pub fn column_definition(column: &ColumnSpec) -> String {
    let mut def = format!("{} {}", quote_ident(&column.name), column.dtype.sql_type());
    if column.is_required() {
        def.push_str(" NOT NULL");
    }
    if column.primary_key {
        def.push_str(" PRIMARY KEY");
    }
    def
}

pub fn create_table(schema: &SchemaSpec) -> String {
    let columns: Vec<String> = schema.columns().iter().map(column_definition).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(schema.table()),
        columns.join(", ")
    )
}

pub fn create_ledger() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         filename TEXT NOT NULL PRIMARY KEY, \
         lowest_cid INTEGER, \
         highest_cid INTEGER, \
         date_added TEXT NOT NULL, \
         n_compounds INTEGER NOT NULL)",
        LEDGER_TABLE
    )
}

pub fn insert_ledger() -> String {
    format!(
        "INSERT OR REPLACE INTO {} (filename, lowest_cid, highest_cid, date_added, n_compounds) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        LEDGER_TABLE
    )
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

pub fn insert_row(schema: &SchemaSpec) -> String {
    let names: Vec<String> = schema.columns().iter().map(|c| quote_ident(&c.name)).collect();
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(schema.table()),
        names.join(", "),
        placeholders.join(", ")
    )
}

pub fn index_name(schema: &SchemaSpec, column: &ColumnSpec) -> String {
    if schema.table() == crate::schema::DEFAULT_TABLE {
        format!("idx_{}", column.name)
    } else {
        format!("idx_{}_{}", schema.table(), column.name)
    }
}

pub fn drop_index(schema: &SchemaSpec, column: &ColumnSpec) -> String {
    format!("DROP INDEX IF EXISTS {}", quote_ident(&index_name(schema, column)))
}

pub fn create_index(schema: &SchemaSpec, column: &ColumnSpec) -> String {
    format!(
        "CREATE INDEX {} ON {} ({})",
        quote_ident(&index_name(schema, column)),
        quote_ident(schema.table()),
        quote_ident(&column.name)
    )
}

pub fn select_column(schema: &SchemaSpec, column: &ColumnSpec) -> String {
    format!(
        "SELECT {} FROM {}",
        quote_ident(&column.name),
        quote_ident(schema.table())
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::Dtype;

    fn schema() -> SchemaSpec {
        SchemaSpec::new(
            "compounds",
            vec![
                ColumnSpec::new("MASS", ["M"], Dtype::Real),
                ColumnSpec::new("INCHI", ["I"], Dtype::Text).not_null(),
                ColumnSpec::new("CID", ["C"], Dtype::Integer).primary_key().with_index(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_create_table() {
        assert_eq!(
            create_table(&schema()),
            "CREATE TABLE IF NOT EXISTS \"compounds\" (\"MASS\" REAL, \"INCHI\" TEXT NOT NULL, \
             \"CID\" INTEGER NOT NULL PRIMARY KEY)"
        );
    }

    #[test]
    fn test_insert_row() {
        assert_eq!(
            insert_row(&schema()),
            "INSERT INTO \"compounds\" (\"MASS\", \"INCHI\", \"CID\") VALUES (?1, ?2, ?3)"
        );
    }

    #[test]
    fn test_index_statements() {
        let s = schema();
        let cid = s.column("CID").unwrap();
        assert_eq!(drop_index(&s, cid), "DROP INDEX IF EXISTS \"idx_CID\"");
        assert_eq!(create_index(&s, cid), "CREATE INDEX \"idx_CID\" ON \"compounds\" (\"CID\")");

        let other = s.clone().with_table("pubchem").unwrap();
        assert_eq!(index_name(&other, cid), "idx_pubchem_CID");
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
