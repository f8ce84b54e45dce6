//! End-to-end loads into a SQLite file

mod common;

use common::*;
use sdfdb_ingest::{
    ingest, ColumnSpec, Dtype, IngestConfig, IngestError, RejectReason, RunStatus, SchemaSpec,
    SqliteSink,
};
use sqlx::Row;
use std::path::Path;
use tokio_util::sync::CancellationToken;

fn config(db: &Path) -> IngestConfig {
    IngestConfig::default()
        .with_database(db)
        .with_batch_size(8)
        .with_max_parallel_files(2)
}

async fn open(db: &Path) -> SqliteSink {
    SqliteSink::connect(db, None).await.unwrap()
}

async fn count(sink: &SqliteSink, sql: &str) -> i64 {
    sqlx::query(sql).fetch_one(sink.pool()).await.unwrap().get(0)
}

#[tokio::test]
async fn test_scenario_into_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("out.sqlite");
    let input = write_sdf(
        dir.path(),
        "Compound_000000100_000000200.sdf",
        &scenario_records(),
    );

    let summary = ingest(
        &config(&db),
        cid_weight_schema(),
        &[input],
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded, "{:?}", summary.error);
    assert_eq!(summary.stats.seen, 3);
    assert_eq!(summary.stats.accepted, 1);
    assert_eq!(summary.stats.rejected, 2);
    assert_eq!(summary.stats.rejections_for(RejectReason::DuplicatePrimaryKey), 1);
    assert_eq!(summary.stats.rejections_for(RejectReason::MissingRequiredColumn), 1);

    let sink = open(&db).await;
    let rows = sqlx::query("SELECT cid, weight FROM compounds")
        .fetch_all(sink.pool())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<i64, _>("cid"), 100);
    assert!((rows[0].get::<f64, _>("weight") - 18.02).abs() < 1e-9);

    let ledger = sqlx::query("SELECT filename, lowest_cid, highest_cid, n_compounds FROM sdf_file")
        .fetch_one(sink.pool())
        .await
        .unwrap();
    assert_eq!(ledger.get::<String, _>("filename"), "Compound_000000100_000000200.sdf");
    assert_eq!(ledger.get::<i64, _>("lowest_cid"), 100);
    assert_eq!(ledger.get::<i64, _>("highest_cid"), 200);
    assert_eq!(ledger.get::<i64, _>("n_compounds"), 1);

    assert_eq!(
        count(&sink, "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_weight'").await,
        1
    );
    sink.close().await;
}

#[tokio::test]
async fn test_nan_weight_is_rejected_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("out.sqlite");
    let records = vec![
        compound(1, 1.5),
        RecordFixture::new("nan")
            .with_tag("COMPOUND_CID", "2")
            .with_tag("MOLECULAR_WEIGHT", "NaN"),
        compound(3, 3.5),
    ];
    let input = write_sdf(dir.path(), "nan.sdf", &records);
    let schema = SchemaSpec::new(
        "compounds",
        vec![
            ColumnSpec::new("cid", ["COMPOUND_CID"], Dtype::Integer).primary_key(),
            ColumnSpec::new("weight", ["MOLECULAR_WEIGHT"], Dtype::Real).not_null(),
        ],
    )
    .unwrap();

    let summary = ingest(&config(&db), schema, &[input], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.status, RunStatus::Succeeded, "{:?}", summary.error);
    assert_eq!(summary.stats.accepted, 2);
    assert_eq!(summary.stats.rejections_for(RejectReason::InvalidValue), 1);

    let sink = open(&db).await;
    assert_eq!(count(&sink, "SELECT COUNT(*) FROM compounds").await, 2);
    sink.close().await;
}

#[tokio::test]
async fn test_directory_of_gzipped_files() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = dir.path().join("sdf");
    std::fs::create_dir(&inputs).unwrap();
    write_sdf_gz(&inputs, "Compound_000000001_000000030.sdf.gz", &compounds(1, 30));
    write_sdf(&inputs, "Compound_000000031_000000045.sdf", &compounds(31, 15));
    std::fs::write(inputs.join("README.txt"), "not an SD file").unwrap();
    let db = dir.path().join("out.sqlite");

    let summary = ingest(&config(&db), cid_weight_schema(), &[inputs], CancellationToken::new())
        .await
        .unwrap();
    assert!(summary.succeeded(), "{:?}", summary.error);
    assert_eq!(summary.stats.files.len(), 2);

    let sink = open(&db).await;
    assert_eq!(count(&sink, "SELECT COUNT(*) FROM compounds").await, 45);
    assert_eq!(count(&sink, "SELECT COUNT(*) FROM sdf_file").await, 2);
    sink.close().await;
}

#[tokio::test]
async fn test_second_run_skips_and_reset_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("out.sqlite");
    let input = write_sdf(dir.path(), "batch.sdf", &compounds(1, 20));
    let inputs = [input];

    let first = ingest(&config(&db), cid_weight_schema(), &inputs, CancellationToken::new())
        .await
        .unwrap();
    assert!(first.succeeded());

    let second = ingest(&config(&db), cid_weight_schema(), &inputs, CancellationToken::new())
        .await
        .unwrap();
    assert!(second.succeeded());
    assert_eq!(second.stats.files_skipped, 1);
    assert_eq!(second.stats.rows_committed, 0);

    let third = ingest(
        &config(&db).with_reset(true),
        cid_weight_schema(),
        &inputs,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert!(third.succeeded());
    assert_eq!(third.stats.rows_committed, 20);

    let sink = open(&db).await;
    assert_eq!(count(&sink, "SELECT COUNT(*) FROM compounds").await, 20);
    sink.close().await;
}

#[tokio::test]
async fn test_table_override() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("out.sqlite");
    let input = write_sdf(dir.path(), "a.sdf", &compounds(1, 4));

    let summary = ingest(
        &config(&db).with_table("molecules"),
        cid_weight_schema(),
        &[input],
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(summary.table, "molecules");

    let sink = open(&db).await;
    assert_eq!(count(&sink, "SELECT COUNT(*) FROM molecules").await, 4);
    assert_eq!(
        count(&sink, "SELECT COUNT(*) FROM sqlite_master WHERE name = 'idx_molecules_weight'").await,
        1
    );
    sink.close().await;
}

#[tokio::test]
async fn test_bundled_pubchem_layout() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("pubchem.sqlite");
    let aspirin = RecordFixture::new("2244")
        .with_tag("PUBCHEM_COMPOUND_CID", "2244")
        .with_tag("PUBCHEM_IUPAC_NAME", "2-acetyloxybenzoic acid")
        .with_tag("PUBCHEM_IUPAC_INCHI", "InChI=1S/C9H8O4/c1-6(10)13-8-5-3-2-4-7(8)9(11)12/h2-5H,1H3,(H,11,12)")
        .with_tag("PUBCHEM_IUPAC_INCHIKEY", "BSYNRYMUTXBXSQ-UHFFFAOYSA-N")
        .with_tag("PUBCHEM_XLOGP3", "1.2")
        .with_tag("PUBCHEM_EXACT_MASS", "180.04225873")
        .with_tag("PUBCHEM_MOLECULAR_FORMULA", "C9H8O4")
        .with_tag("PUBCHEM_MOLECULAR_WEIGHT", "180.16")
        .with_tag("PUBCHEM_MONOISOTOPIC_WEIGHT", "180.04225873");
    // No InChI: rejected
    let incomplete = RecordFixture::new("1").with_tag("PUBCHEM_COMPOUND_CID", "1");
    let input = write_sdf_gz(
        dir.path(),
        "Compound_000000001_000500000.sdf.gz",
        &[aspirin, incomplete],
    );

    let summary = ingest(
        &config(&db),
        SchemaSpec::pubchem().unwrap(),
        &[input],
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert!(summary.succeeded(), "{:?}", summary.error);
    assert_eq!(summary.stats.rejections_for(RejectReason::MissingRequiredColumn), 1);
    assert_eq!(summary.stats.indexes_built, 4);

    let sink = open(&db).await;
    let row = sqlx::query("SELECT cid, inchikey1, xlogp3, iupac_name FROM compounds")
        .fetch_one(sink.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("cid"), 2244);
    assert_eq!(row.get::<String, _>("inchikey1"), "BSYNRYMUTXBXSQ");
    assert!((row.get::<f64, _>("xlogp3") - 1.2).abs() < 1e-9);
    assert_eq!(row.get::<String, _>("iupac_name"), "2-acetyloxybenzoic acid");
    sink.close().await;
}

#[tokio::test]
async fn test_missing_input_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("out.sqlite");

    let err = ingest(
        &config(&db),
        cid_weight_schema(),
        &[dir.path().join("nope.sdf")],
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, IngestError::Source { .. }), "{}", err);
    assert!(!db.exists());
}

#[tokio::test]
async fn test_invalid_configuration_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_sdf(dir.path(), "a.sdf", &compounds(1, 1));

    let err = ingest(
        &config(&dir.path().join("out.sqlite")).with_batch_size(0),
        cid_weight_schema(),
        &[input],
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, IngestError::Config(_)));
}
